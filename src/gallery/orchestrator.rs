use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::{
    error::ApiError,
    models::{GalleryPage, ImageRecord, ListQuery, PageCursor},
};

use super::{
    api::GalleryApi,
    guard::{InFlight, Operation, lock},
    memo::MemoStore,
};

/// Cursor marker used for the first page of any listing.
pub const FIRST_PAGE_MARKER: &str = "first";
const GENERIC_ERROR: &str = "An unexpected error occurred";

/// Memo key for a page: `term:first` for a fresh query, `term:<cursor>` for
/// a continuation. `None` when a continuation has no cursor to continue from.
pub fn memo_key(term: &str, reset: bool, cursor: Option<&PageCursor>) -> Option<String> {
    if reset {
        return Some(format!("{term}:{FIRST_PAGE_MARKER}"));
    }
    cursor.map(|cursor| format!("{term}:{cursor}"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedKind {
    Gallery,
    Search,
}

impl FeedKind {
    pub fn for_term(term: &str) -> Self {
        if term.is_empty() {
            FeedKind::Gallery
        } else {
            FeedKind::Search
        }
    }

    fn operation(self) -> Operation {
        match self {
            FeedKind::Gallery => Operation::GalleryFetch,
            FeedKind::Search => Operation::SearchFetch,
        }
    }

    fn error_title(self) -> &'static str {
        match self {
            FeedKind::Gallery => "Error fetching gallery images",
            FeedKind::Search => "Error searching images",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    ServedFromMemo,
    Rejected,
    Busy,
    NothingToLoad,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub title: String,
    pub description: Option<String>,
}

impl Notice {
    fn new(level: NoticeLevel, title: &str, description: Option<String>) -> Self {
        Self {
            level,
            title: title.to_string(),
            description,
        }
    }

    fn from_error(title: &str, err: &ApiError) -> Self {
        let description = err.server_message().unwrap_or(GENERIC_ERROR).to_string();
        Self::new(NoticeLevel::Error, title, Some(description))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedSnapshot {
    pub term: String,
    pub items: Vec<ImageRecord>,
    pub cursor: Option<PageCursor>,
    pub has_more: bool,
    pub loading: bool,
}

#[derive(Debug, Default)]
struct FeedState {
    term: String,
    items: Vec<ImageRecord>,
    cursor: Option<PageCursor>,
    has_more: bool,
}

/// Drives generation and paginated listing for one user session.
///
/// Each feed and the generate slot move `idle -> loading -> idle` on every
/// call. A call that finds its own operation already in flight returns
/// [`Outcome::Busy`] without touching the network. Failures never mutate the
/// visible list, cursor or has-more flag.
pub struct GalleryOrchestrator {
    api: Arc<dyn GalleryApi>,
    memo: MemoStore,
    page_limit: u32,
    in_flight: InFlight,
    gallery: Mutex<FeedState>,
    search: Mutex<FeedState>,
    last_generated: Mutex<Option<String>>,
    notices: Mutex<Vec<Notice>>,
    initial_loaded: AtomicBool,
}

impl GalleryOrchestrator {
    pub fn new(api: Arc<dyn GalleryApi>, memo: MemoStore, page_limit: u32) -> Self {
        Self {
            api,
            memo,
            page_limit: page_limit.max(1),
            in_flight: InFlight::default(),
            gallery: Mutex::default(),
            search: Mutex::default(),
            last_generated: Mutex::default(),
            notices: Mutex::default(),
            initial_loaded: AtomicBool::new(false),
        }
    }

    fn feed(&self, kind: FeedKind) -> &Mutex<FeedState> {
        match kind {
            FeedKind::Gallery => &self.gallery,
            FeedKind::Search => &self.search,
        }
    }

    fn notify(&self, notice: Notice) {
        lock(&self.notices).push(notice);
    }

    pub async fn submit_prompt(&self, prompt: &str) -> Outcome {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Outcome::Rejected;
        }
        let Some(_generating) = self.in_flight.try_acquire(Operation::Generate) else {
            return Outcome::Busy;
        };

        match self.api.generate(prompt).await {
            Ok(response) => {
                tracing::info!(image_url = %response.image_url, "image generated");
                *lock(&self.last_generated) = Some(response.image_url);
                if let Some(key) = memo_key("", true, None) {
                    self.memo.remove(&key).await;
                }
                self.notify(Notice::new(
                    NoticeLevel::Success,
                    "Image generated successfully",
                    None,
                ));
                Outcome::Completed
            }
            Err(err) => {
                tracing::warn!(error = %err, "generate request failed");
                self.notify(Notice::from_error("Error generating image", &err));
                Outcome::Failed
            }
        }
    }

    pub async fn load_page(&self, search_term: &str, reset: bool) -> Outcome {
        let term = search_term.trim();
        let kind = FeedKind::for_term(term);
        let Some(_loading) = self.in_flight.try_acquire(kind.operation()) else {
            return Outcome::Busy;
        };

        let cursor = if reset {
            None
        } else {
            let feed = lock(self.feed(kind));
            if feed.term != term {
                return Outcome::NothingToLoad;
            }
            feed.cursor.clone()
        };
        let Some(key) = memo_key(term, reset, cursor.as_ref()) else {
            return Outcome::NothingToLoad;
        };

        if let Some(page) = self.memo.get(&key).await {
            self.apply(kind, term, reset, page);
            return Outcome::ServedFromMemo;
        }

        let query = ListQuery {
            term: (!term.is_empty()).then(|| term.to_string()),
            cursor,
            limit: Some(self.page_limit),
        };
        match self.api.list(&query).await {
            Ok(page) => {
                self.memo.set(&key, &page).await;
                self.apply(kind, term, reset, page);
                Outcome::Completed
            }
            Err(err) => {
                tracing::warn!(error = %err, term, reset, "list request failed");
                self.notify(Notice::from_error(kind.error_title(), &err));
                Outcome::Failed
            }
        }
    }

    pub async fn load_more(&self, search_term: &str) -> Outcome {
        let kind = FeedKind::for_term(search_term.trim());
        if !lock(self.feed(kind)).has_more {
            return Outcome::NothingToLoad;
        }
        self.load_page(search_term, false).await
    }

    /// First gallery listing of a session. Later calls are no-ops once one
    /// has succeeded.
    pub async fn initial_load(&self) -> Outcome {
        if self.initial_loaded.load(Ordering::SeqCst) {
            return Outcome::NothingToLoad;
        }
        let outcome = self.load_page("", true).await;
        if matches!(outcome, Outcome::Completed | Outcome::ServedFromMemo) {
            self.initial_loaded.store(true, Ordering::SeqCst);
        }
        outcome
    }

    fn apply(&self, kind: FeedKind, term: &str, reset: bool, page: GalleryPage) {
        let no_results = reset && kind == FeedKind::Search && page.items.is_empty();
        {
            let mut feed = lock(self.feed(kind));
            if reset {
                feed.items = page.items;
            } else {
                feed.items.extend(page.items);
            }
            feed.term = term.to_string();
            feed.cursor = page.next_cursor;
            feed.has_more = page.has_more;
        }
        if no_results {
            self.notify(Notice::new(
                NoticeLevel::Info,
                "No results found",
                Some("Try a different search term".to_string()),
            ));
        }
    }

    pub fn snapshot(&self, kind: FeedKind) -> FeedSnapshot {
        let feed = lock(self.feed(kind));
        FeedSnapshot {
            term: feed.term.clone(),
            items: feed.items.clone(),
            cursor: feed.cursor.clone(),
            has_more: feed.has_more,
            loading: self.in_flight.is_active(kind.operation()),
        }
    }

    pub fn is_generating(&self) -> bool {
        self.in_flight.is_active(Operation::Generate)
    }

    pub fn last_generated_image(&self) -> Option<String> {
        lock(&self.last_generated).clone()
    }

    pub fn take_notices(&self) -> Vec<Notice> {
        std::mem::take(&mut *lock(&self.notices))
    }
}
