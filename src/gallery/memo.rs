//! Expiring local memo of listing pages.
//!
//! All entries live in one serialized blob under [`STORAGE_KEY`]. Each entry
//! carries its own write timestamp and expires on its own; the blob-level
//! timestamp only records when the blob was last rewritten.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
#[cfg(test)]
use std::sync::atomic::{AtomicI64, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::{fs, sync::Mutex};

use crate::models::GalleryPage;

pub const STORAGE_KEY: &str = "ai_image_gallery_cache";
pub const MEMO_TTL_MS: i64 = 24 * 60 * 60 * 1000;

pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct ManualClock {
    now: AtomicI64,
}

#[cfg(test)]
impl ManualClock {
    pub(crate) fn new(start_millis: i64) -> Self {
        Self {
            now: AtomicI64::new(start_millis),
        }
    }

    pub(crate) fn advance(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[async_trait]
pub trait MemoBackend: Send + Sync {
    async fn load(&self, storage_key: &str) -> Result<Option<String>>;
    async fn store(&self, storage_key: &str, blob: String) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    blobs: Mutex<HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoBackend for MemoryBackend {
    async fn load(&self, storage_key: &str) -> Result<Option<String>> {
        Ok(self.blobs.lock().await.get(storage_key).cloned())
    }

    async fn store(&self, storage_key: &str, blob: String) -> Result<()> {
        self.blobs.lock().await.insert(storage_key.to_string(), blob);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path_for(&self, storage_key: &str) -> PathBuf {
        self.dir.join(format!("{storage_key}.json"))
    }
}

#[async_trait]
impl MemoBackend for FileBackend {
    async fn load(&self, storage_key: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.path_for(storage_key)).await {
            Ok(blob) => Ok(Some(blob)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn store(&self, storage_key: &str, blob: String) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(storage_key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, blob).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct MemoBlob {
    #[serde(default)]
    data: BTreeMap<String, MemoEntry>,
    #[serde(default)]
    timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MemoEntry {
    value: GalleryPage,
    timestamp: i64,
}

pub struct MemoStore {
    backend: Arc<dyn MemoBackend>,
    clock: Arc<dyn Clock>,
    ttl_ms: i64,
    write_lock: Mutex<()>,
}

impl MemoStore {
    pub fn new(backend: Arc<dyn MemoBackend>, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend,
            clock,
            ttl_ms: MEMO_TTL_MS,
            write_lock: Mutex::new(()),
        }
    }

    fn is_live(&self, entry: &MemoEntry, now: i64) -> bool {
        now - entry.timestamp < self.ttl_ms
    }

    /// Unreadable or malformed blobs read as empty.
    async fn read_blob(&self) -> MemoBlob {
        let raw = match self.backend.load(STORAGE_KEY).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return MemoBlob::default(),
            Err(err) => {
                tracing::warn!(error = %err, "memo backend read failed, treating as empty");
                return MemoBlob::default();
            }
        };
        serde_json::from_str(&raw).unwrap_or_else(|err| {
            tracing::warn!(error = %err, "discarding malformed memo blob");
            MemoBlob::default()
        })
    }

    async fn write_blob(&self, blob: &MemoBlob) {
        let raw = match serde_json::to_string(blob) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(error = %err, "failed to serialize memo blob");
                return;
            }
        };
        if let Err(err) = self.backend.store(STORAGE_KEY, raw).await {
            tracing::warn!(error = %err, "memo backend write failed");
        }
    }

    pub async fn get(&self, key: &str) -> Option<GalleryPage> {
        let now = self.clock.now_millis();
        let mut blob = self.read_blob().await;
        match blob.data.remove(key) {
            Some(entry) if self.is_live(&entry, now) => {
                tracing::debug!(key, "memo hit");
                Some(entry.value)
            }
            _ => {
                tracing::debug!(key, "memo miss");
                None
            }
        }
    }

    pub async fn set(&self, key: &str, page: &GalleryPage) {
        let _write = self.write_lock.lock().await;
        let now = self.clock.now_millis();
        let mut blob = self.read_blob().await;
        blob.data.retain(|_, entry| now - entry.timestamp < self.ttl_ms);
        blob.data.insert(
            key.to_string(),
            MemoEntry {
                value: page.clone(),
                timestamp: now,
            },
        );
        blob.timestamp = now;
        self.write_blob(&blob).await;
    }

    pub async fn remove(&self, key: &str) {
        let _write = self.write_lock.lock().await;
        let mut blob = self.read_blob().await;
        if blob.data.remove(key).is_some() {
            blob.timestamp = self.clock.now_millis();
            self.write_blob(&blob).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ImageRecord, PageCursor};

    const HOUR_MS: i64 = 60 * 60 * 1000;

    fn page(ids: &[&str], cursor: Option<&str>) -> GalleryPage {
        GalleryPage {
            items: ids
                .iter()
                .map(|id| ImageRecord {
                    id: id.to_string(),
                    prompt: format!("prompt {id}"),
                    created_at: 1,
                    image_url: format!("http://gallery.test/images/{id}"),
                })
                .collect(),
            next_cursor: cursor.map(PageCursor::new),
            has_more: cursor.is_some(),
        }
    }

    fn store() -> (MemoStore, Arc<MemoryBackend>, Arc<ManualClock>) {
        let backend = Arc::new(MemoryBackend::new());
        let clock = Arc::new(ManualClock::new(1_000_000));
        (MemoStore::new(backend.clone(), clock.clone()), backend, clock)
    }

    #[tokio::test]
    async fn round_trip_within_ttl_then_miss_at_expiry() {
        let (memo, _, clock) = store();
        let value = page(&["a", "b"], Some("k1"));
        memo.set("cats:first", &value).await;

        clock.advance(MEMO_TTL_MS - 1);
        assert_eq!(memo.get("cats:first").await, Some(value));

        clock.advance(1);
        assert_eq!(memo.get("cats:first").await, None);
    }

    #[tokio::test]
    async fn entries_expire_independently() {
        let (memo, _, clock) = store();
        memo.set("cats:first", &page(&["a"], None)).await;
        clock.advance(23 * HOUR_MS);
        memo.set("dogs:first", &page(&["d"], None)).await;
        clock.advance(HOUR_MS);

        assert_eq!(memo.get("cats:first").await, None);
        assert_eq!(memo.get("dogs:first").await, Some(page(&["d"], None)));
    }

    #[tokio::test]
    async fn malformed_blob_reads_as_miss_and_is_replaced_on_write() {
        let (memo, backend, _) = store();
        backend
            .store(STORAGE_KEY, "{not json".to_string())
            .await
            .unwrap();
        assert_eq!(memo.get("cats:first").await, None);

        memo.set("cats:first", &page(&["a"], None)).await;
        assert_eq!(memo.get("cats:first").await, Some(page(&["a"], None)));
    }

    #[tokio::test]
    async fn blob_keeps_documented_shape() {
        let (memo, backend, clock) = store();
        memo.set("cats:first", &page(&["a"], Some("k1"))).await;
        let raw = backend.load(STORAGE_KEY).await.unwrap().expect("blob");
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["timestamp"], clock.now_millis());
        assert_eq!(value["data"]["cats:first"]["timestamp"], clock.now_millis());
        assert_eq!(value["data"]["cats:first"]["value"]["nextCursor"], "k1");
    }

    #[tokio::test]
    async fn remove_drops_only_the_named_entry() {
        let (memo, _, _) = store();
        memo.set(":first", &page(&["a"], None)).await;
        memo.set("cats:first", &page(&["c"], None)).await;
        memo.remove(":first").await;
        assert_eq!(memo.get(":first").await, None);
        assert!(memo.get("cats:first").await.is_some());
    }

    #[tokio::test]
    async fn concurrent_writes_are_not_lost() {
        let (memo, _, _) = store();
        let first = page(&["a"], None);
        let second = page(&["b"], None);
        tokio::join!(memo.set("a:first", &first), memo.set("b:first", &second));
        assert_eq!(memo.get("a:first").await, Some(first));
        assert_eq!(memo.get("b:first").await, Some(second));
    }

    #[tokio::test]
    async fn file_backend_persists_across_stores() {
        let suffix = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let dir = std::env::temp_dir().join(format!("ai_image_gallery_memo_{suffix}"));
        let clock = Arc::new(ManualClock::new(5));

        let writer = MemoStore::new(Arc::new(FileBackend::new(dir.clone())), clock.clone());
        writer.set("cats:first", &page(&["a"], Some("k1"))).await;

        let reader = MemoStore::new(Arc::new(FileBackend::new(dir.clone())), clock);
        assert_eq!(reader.get("cats:first").await, Some(page(&["a"], Some("k1"))));
        let _ = std::fs::remove_dir_all(dir);
    }
}
