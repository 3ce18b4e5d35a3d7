//! Catalog Facade
//!
//! The contract consumed by the presentation layer: record completed
//! downloads, enumerate and resolve entries, delete entries with their files.
//! All store access goes through one mutex so load-mutate-save cycles from
//! different tasks cannot interleave. Cross-process writers are unsupported.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::{CatalogError, CatalogResult};
use crate::models::{CatalogEntry, DownloadRecord, LibraryEntry, LibrarySnapshot};
use crate::resolver;
use crate::store::CatalogStore;

/// Shared handle to the download diary. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Catalog {
    store: Arc<Mutex<CatalogStore>>,
}

impl Catalog {
    /// Open the catalog under `storage_dir`, creating it on first use.
    pub fn open<P: Into<PathBuf>>(storage_dir: P) -> CatalogResult<Self> {
        let store = CatalogStore::open(storage_dir)?;
        log::info!("Catalog opened at {}", store.path().display());
        Ok(Self::new(store))
    }

    pub fn new(store: CatalogStore) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
        }
    }

    /// Run `op` against the store on the blocking pool while holding the lock.
    async fn with_store<T, F>(&self, op: F) -> CatalogResult<T>
    where
        F: FnOnce(&CatalogStore) -> T + Send + 'static,
        T: Send + 'static,
    {
        let guard = self.store.clone().lock_owned().await;
        tokio::task::spawn_blocking(move || op(&*guard))
            .await
            .map_err(|e| CatalogError::Task(e.to_string()))
    }

    /// Record a completed download (insert or merge by URL).
    pub async fn record_download(&self, record: DownloadRecord) -> CatalogResult<CatalogEntry> {
        self.with_store(move |store| store.upsert(record)).await?
    }

    /// All entries in insertion order. Empty on any read problem.
    pub async fn list_entries(&self) -> Vec<CatalogEntry> {
        self.with_store(|store| store.load())
            .await
            .unwrap_or_else(|e| {
                log::error!("Failed to list catalog entries: {}", e);
                Vec::new()
            })
    }

    /// Distinct source URLs for autocomplete.
    pub async fn list_known_urls(&self) -> BTreeSet<String> {
        self.with_store(|store| store.unique_urls())
            .await
            .unwrap_or_else(|e| {
                log::error!("Failed to list known URLs: {}", e);
                BTreeSet::new()
            })
    }

    pub async fn find_entry(&self, id: &str) -> Option<CatalogEntry> {
        let id = id.to_string();
        self.with_store(move |store| store.find(&id))
            .await
            .unwrap_or_else(|e| {
                log::error!("Failed to look up catalog entry: {}", e);
                None
            })
    }

    /// Delete an entry and its files. `Ok(false)` when the id is unknown.
    ///
    /// File removal may block on the filesystem; it runs on the blocking pool.
    pub async fn remove_entry(&self, id: &str) -> CatalogResult<bool> {
        let id = id.to_string();
        self.with_store(move |store| store.delete(&id)).await?
    }

    pub fn resolve_display_path(&self, path: Option<&str>) -> Option<String> {
        resolver::resolve(path)
    }

    pub async fn clear_all(&self) -> CatalogResult<()> {
        self.with_store(|store| store.clear()).await?
    }

    /// Every entry with its paths resolved against the current filesystem,
    /// plus library totals.
    pub async fn library(&self) -> LibrarySnapshot {
        self.with_store(|store| build_snapshot(store.load()))
            .await
            .unwrap_or_else(|e| {
                log::error!("Failed to build library snapshot: {}", e);
                LibrarySnapshot::default()
            })
    }
}

fn build_snapshot(entries: Vec<CatalogEntry>) -> LibrarySnapshot {
    let mut snapshot = LibrarySnapshot::default();

    for entry in entries {
        let video_path = resolver::resolve(entry.video_path.as_deref());
        // A missing video can resolve to the subtitle sharing its stem.
        let video_size_bytes = video_path
            .as_deref()
            .filter(|p| !is_subtitle_file(p))
            .and_then(|p| std::fs::metadata(p).ok())
            .filter(|m| m.is_file())
            .map(|m| m.len());
        let video_exists = video_size_bytes.is_some();

        let srt_path = resolver::resolve(entry.srt_path.as_deref());
        let srt_exists = srt_path
            .as_deref()
            .map(|p| std::path::Path::new(p).is_file())
            .unwrap_or(false);

        if video_exists {
            snapshot.video_count += 1;
            snapshot.total_video_bytes += video_size_bytes.unwrap_or(0);
        }
        if srt_exists {
            snapshot.srt_count += 1;
        }

        snapshot.entries.push(LibraryEntry {
            entry,
            video_path,
            video_exists,
            video_size_bytes,
            srt_path,
            srt_exists,
        });
    }

    snapshot
}

fn is_subtitle_file(path: &str) -> bool {
    std::path::Path::new(path)
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("srt"))
        .unwrap_or(false)
}
