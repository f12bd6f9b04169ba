use std::fmt;

use serde::{Deserialize, Serialize};

/// One generated image as the service returns it.
///
/// `image_url` is derived from `id` when the record is read; it is never
/// persisted in the table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    pub id: String,
    pub prompt: String,
    pub created_at: i64,
    pub image_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRow {
    pub id: String,
    pub prompt: String,
    pub created_at: i64,
}

/// Opaque continuation token handed out by a listing.
///
/// Clients forward it verbatim on the next request; only the service knows
/// how to read it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageCursor(String);

impl PageCursor {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PageCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GalleryPage {
    pub items: Vec<ImageRecord>,
    #[serde(default)]
    pub next_cursor: Option<PageCursor>,
    #[serde(default)]
    pub has_more: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    #[serde(default)]
    pub message: Option<String>,
    pub image_url: String,
}

/// Listing parameters sent by the client. An empty or absent term means the
/// unfiltered latest-first gallery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    pub term: Option<String>,
    pub cursor: Option<PageCursor>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
}
