pub mod files;
pub mod hash;
pub mod table;

pub use files::LocalFileStorage;
pub use hash::{compute_hash, image_id};
pub use table::{ImageTable, JsonFileTable, MemoryTable, ScanPage, ScanRequest};
