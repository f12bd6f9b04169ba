//! Client-side orchestration: prompt submission, paginated gallery and
//! search listings, and the expiring memo in front of them.

pub mod api;
pub mod guard;
pub mod memo;
pub mod orchestrator;

pub use api::{GalleryApi, HttpGalleryApi};
pub use memo::{Clock, FileBackend, MemoBackend, MemoStore, MemoryBackend, SystemClock};
pub use orchestrator::{FeedKind, FeedSnapshot, GalleryOrchestrator, Notice, NoticeLevel, Outcome};
