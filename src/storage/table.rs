use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use tokio::{fs, sync::RwLock};

use crate::models::ImageRow;

const RECORD_DIR: &str = "records";

/// Scan parameters. Rows come back latest-first (descending id, ids are
/// time-prefixed).
#[derive(Debug, Clone, Default)]
pub struct ScanRequest {
    pub filter: Option<String>,
    pub limit: usize,
    /// Id of the last row of the previous page; scanning resumes after it.
    pub exclusive_start: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    pub rows: Vec<ImageRow>,
    pub last_evaluated_key: Option<String>,
}

#[async_trait]
pub trait ImageTable: Send + Sync {
    async fn put(&self, row: &ImageRow) -> Result<()>;
    async fn scan(&self, request: &ScanRequest) -> Result<ScanPage>;
}

fn matches(row: &ImageRow, filter: Option<&str>) -> bool {
    match filter {
        Some(term) if !term.is_empty() => row.prompt.contains(term),
        _ => true,
    }
}

fn after_start(id: &str, start: Option<&str>) -> bool {
    start.is_none_or(|start| id < start)
}

/// Collects up to `limit` matches from rows already in scan order, peeking
/// one further match to decide whether a continuation key is due.
fn collect_page(rows: impl Iterator<Item = ImageRow>, request: &ScanRequest) -> ScanPage {
    let limit = request.limit.max(1);
    let filter = request.filter.as_deref();
    let mut page = Vec::with_capacity(limit);
    let mut more = false;
    for row in rows.filter(|row| matches(row, filter)) {
        if page.len() == limit {
            more = true;
            break;
        }
        page.push(row);
    }
    let last_evaluated_key = if more {
        page.last().map(|row| row.id.clone())
    } else {
        None
    };
    ScanPage {
        rows: page,
        last_evaluated_key,
    }
}

#[derive(Clone, Debug)]
pub struct JsonFileTable {
    base_dir: PathBuf,
}

impl JsonFileTable {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    fn record_dir(&self) -> PathBuf {
        self.base_dir.join(RECORD_DIR)
    }

    async fn sorted_ids(&self) -> Result<Vec<String>> {
        let mut dir = match fs::read_dir(self.record_dir()).await {
            Ok(dir) => dir,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut ids = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name();
            if let Some(id) = name.to_str().and_then(|name| name.strip_suffix(".json")) {
                ids.push(id.to_string());
            }
        }
        ids.sort_by(|a, b| b.cmp(a));
        Ok(ids)
    }

    /// A row that vanished or does not parse is skipped, not fatal.
    async fn read_row(&self, id: &str) -> Option<ImageRow> {
        let path = self.record_dir().join(format!("{id}.json"));
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "skipping missing image row");
                return None;
            }
        };
        match serde_json::from_slice::<ImageRow>(&bytes) {
            Ok(row) => Some(row),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "skipping unreadable image row");
                None
            }
        }
    }
}

#[async_trait]
impl ImageTable for JsonFileTable {
    async fn put(&self, row: &ImageRow) -> Result<()> {
        let dir = self.record_dir();
        fs::create_dir_all(&dir).await?;
        let payload = serde_json::to_vec_pretty(row)?;
        fs::write(dir.join(format!("{}.json", row.id)), payload).await?;
        Ok(())
    }

    async fn scan(&self, request: &ScanRequest) -> Result<ScanPage> {
        let start = request.exclusive_start.as_deref();
        let filter = request.filter.as_deref();
        let wanted = request.limit.max(1) + 1;
        let mut rows = Vec::with_capacity(wanted);
        for id in self.sorted_ids().await? {
            if rows.len() == wanted {
                break;
            }
            if !after_start(&id, start) {
                continue;
            }
            if let Some(row) = self.read_row(&id).await {
                if matches(&row, filter) {
                    rows.push(row);
                }
            }
        }
        Ok(collect_page(rows.into_iter(), request))
    }
}

#[derive(Debug, Default)]
pub struct MemoryTable {
    rows: RwLock<BTreeMap<String, ImageRow>>,
}

impl MemoryTable {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ImageTable for MemoryTable {
    async fn put(&self, row: &ImageRow) -> Result<()> {
        self.rows.write().await.insert(row.id.clone(), row.clone());
        Ok(())
    }

    async fn scan(&self, request: &ScanRequest) -> Result<ScanPage> {
        let rows = self.rows.read().await;
        let start = request.exclusive_start.as_deref();
        let ordered = rows
            .values()
            .rev()
            .filter(|row| after_start(&row.id, start))
            .cloned();
        Ok(collect_page(ordered, request))
    }
}
