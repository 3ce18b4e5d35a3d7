use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;

use crate::error::{CatalogError, CatalogResult};
use crate::models::{CatalogEntry, DownloadRecord};
use crate::resolver;

/// File name of the persisted catalog inside the storage directory.
pub const HISTORY_FILE_NAME: &str = "download_history.json";

/// Catalog store handle.
///
/// Notes:
/// - Holds no entries in memory; every operation is a full load-mutate-save
///   cycle against `download_history.json`.
/// - Not safe for interleaved writers. Share it through [`crate::catalog::Catalog`],
///   which serializes access behind one mutex.
#[derive(Debug, Clone)]
pub struct CatalogStore {
    dir: PathBuf,
    path: PathBuf,
}

impl CatalogStore {
    /// Open (and initialize if needed) the catalog under `storage_dir`.
    ///
    /// Creates the directory and an empty `[]` catalog file when missing.
    /// Calling this again on the same directory never touches existing data.
    pub fn open<P: Into<PathBuf>>(storage_dir: P) -> CatalogResult<Self> {
        let dir = storage_dir.into();
        let path = dir.join(HISTORY_FILE_NAME);
        let store = Self { dir, path };
        store.ensure_history_file()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn ensure_history_file(&self) -> CatalogResult<()> {
        fs::create_dir_all(&self.dir).map_err(|source| CatalogError::StorageUnavailable {
            path: self.dir.clone(),
            source,
        })?;

        if !self.path.exists() {
            log::info!("Creating empty catalog at {}", self.path.display());
            self.save(&[])?;
        }
        Ok(())
    }

    /// Read every entry in insertion order.
    ///
    /// Never fails: a missing or unparseable file reads as an empty catalog.
    /// The file itself is left alone; the next successful save replaces it.
    pub fn load(&self) -> Vec<CatalogEntry> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) => {
                log::warn!("Catalog {} unreadable: {}", self.path.display(), e);
                return Vec::new();
            }
        };

        let elements = match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Array(elements)) => elements,
            Ok(_) => {
                log::warn!(
                    "Catalog {} is not a JSON array, treating as empty",
                    self.path.display()
                );
                return Vec::new();
            }
            Err(e) => {
                log::warn!(
                    "Catalog {} is corrupt ({}), treating as empty",
                    self.path.display(),
                    e
                );
                return Vec::new();
            }
        };

        let mut entries = Vec::with_capacity(elements.len());
        for (index, element) in elements.into_iter().enumerate() {
            match serde_json::from_value::<CatalogEntry>(element) {
                Ok(entry) => entries.push(entry),
                Err(e) => log::warn!("Skipping catalog element {}: {}", index, e),
            }
        }
        entries
    }

    /// Replace the catalog with `entries`.
    ///
    /// Written to a sibling temp file first and renamed over the catalog, so a
    /// concurrent reader sees either the old or the new file, never a partial one.
    pub fn save(&self, entries: &[CatalogEntry]) -> CatalogResult<()> {
        let mut payload = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut payload, formatter);
        entries.serialize(&mut serializer)?;

        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, &payload).map_err(|source| CatalogError::Write {
            path: tmp_path.clone(),
            source,
        })?;
        fs::rename(&tmp_path, &self.path).map_err(|source| CatalogError::Write {
            path: self.path.clone(),
            source,
        })?;
        Ok(())
    }

    /// Insert a new entry for `record.url`, or merge into the existing one.
    ///
    /// Returns the entry as stored.
    pub fn upsert(&self, record: DownloadRecord) -> CatalogResult<CatalogEntry> {
        let mut entries = self.load();

        let stored = match entries.iter_mut().find(|e| e.url == record.url) {
            Some(existing) => {
                log::info!("Updating catalog entry {} for {}", existing.id, record.url);
                existing.merge(record);
                existing.clone()
            }
            None => {
                let entry = CatalogEntry::from_record(record);
                log::info!("Adding catalog entry {} for {}", entry.id, entry.url);
                entries.push(entry.clone());
                entry
            }
        };

        self.save(&entries)?;
        Ok(stored)
    }

    /// Delete an entry and, best-effort, the files it points at.
    ///
    /// Returns `Ok(false)` without writing when `id` is unknown. File removal
    /// failures are logged and do not prevent the record from being removed.
    pub fn delete(&self, id: &str) -> CatalogResult<bool> {
        let mut entries = self.load();
        let Some(index) = entries.iter().position(|e| e.id == id) else {
            log::info!("Catalog entry {} not found, nothing to delete", id);
            return Ok(false);
        };

        let entry = entries.remove(index);
        for recorded in [entry.video_path.as_deref(), entry.srt_path.as_deref()] {
            remove_resolved_file(recorded);
        }

        self.save(&entries)?;
        log::info!("Deleted catalog entry {} ({})", entry.id, entry.url);
        Ok(true)
    }

    /// Overwrite the catalog with an empty list.
    pub fn clear(&self) -> CatalogResult<()> {
        log::info!("Clearing catalog {}", self.path.display());
        self.save(&[])
    }

    /// Distinct source URLs, for input autocomplete. Order carries no meaning.
    pub fn unique_urls(&self) -> BTreeSet<String> {
        self.load().into_iter().map(|e| e.url).collect()
    }

    pub fn find(&self, id: &str) -> Option<CatalogEntry> {
        self.load().into_iter().find(|e| e.id == id)
    }
}

fn remove_resolved_file(recorded: Option<&str>) {
    let Some(path) = resolver::resolve_existing(recorded) else {
        return;
    };
    match fs::remove_file(&path) {
        Ok(()) => log::info!("Removed {}", path.display()),
        Err(e) => log::warn!("Error deleting file {}: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn setup_store() -> (tempfile::TempDir, CatalogStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = CatalogStore::open(dir.path().join("db")).unwrap();
        (dir, store)
    }

    fn video(url: &str, path: &str) -> DownloadRecord {
        DownloadRecord::new("Test Video", url)
            .creator("Test Creator")
            .description("Test Desc")
            .format("1080p")
            .video_path(path)
    }

    #[test]
    fn test_open_creates_empty_catalog() {
        let (_dir, store) = setup_store();
        assert!(store.path().exists());
        let raw = fs::read_to_string(store.path()).unwrap();
        assert_eq!(serde_json::from_str::<Value>(&raw).unwrap(), Value::Array(vec![]));
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_open_twice_keeps_data() {
        let (dir, store) = setup_store();
        store.upsert(video("https://youtube.com/watch?v=123", "videos/test.mp4")).unwrap();

        let reopened = CatalogStore::open(dir.path().join("db")).unwrap();
        let entries = reopened.load();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].title, "Test Video");
    }

    #[test]
    fn test_open_fails_when_dir_is_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("db");
        fs::write(&blocker, b"not a dir").unwrap();
        let err = CatalogStore::open(&blocker).unwrap_err();
        assert!(matches!(err, CatalogError::StorageUnavailable { .. }));
    }

    #[test]
    fn test_upsert_same_url_keeps_one_entry() {
        let (_dir, store) = setup_store();
        let first = store.upsert(video("u1", "a.mp4")).unwrap();
        let second = store.upsert(video("u1", "b.mp4")).unwrap();
        store.upsert(video("u2", "c.mp4")).unwrap();

        let entries = store.load();
        assert_eq!(entries.len(), 2);
        assert_eq!(first.id, second.id);
        assert_eq!(entries[0].url, "u1");
        assert_eq!(entries[0].video_path.as_deref(), Some("b.mp4"));
        assert_eq!(entries[0].date, second.date);
        assert_eq!(entries[1].url, "u2");
    }

    #[test]
    fn test_subtitle_download_preserves_video_path() {
        let (_dir, store) = setup_store();
        store.upsert(video("u", "videos/a.mp4")).unwrap();
        store
            .upsert(
                DownloadRecord::new("Test Video", "u")
                    .description("Subtitle File")
                    .format("Subtitle (en)")
                    .srt_path("videos/SRT/a.srt"),
            )
            .unwrap();

        let entry = &store.load()[0];
        assert_eq!(entry.video_path.as_deref(), Some("videos/a.mp4"));
        assert_eq!(entry.srt_path.as_deref(), Some("videos/SRT/a.srt"));
        assert_eq!(entry.description, "Test Desc");
    }

    #[test]
    fn test_video_download_preserves_srt_path() {
        let (_dir, store) = setup_store();
        store
            .upsert(DownloadRecord::new("T", "u").srt_path("a.srt"))
            .unwrap();
        store.upsert(video("u", "a.mp4")).unwrap();

        let entry = &store.load()[0];
        assert_eq!(entry.video_path.as_deref(), Some("a.mp4"));
        assert_eq!(entry.srt_path.as_deref(), Some("a.srt"));
    }

    #[test]
    fn test_long_description_truncated_on_create() {
        let (_dir, store) = setup_store();
        let long = "x".repeat(250);
        store
            .upsert(DownloadRecord::new("T", "long").description(long.clone()))
            .unwrap();
        store
            .upsert(DownloadRecord::new("T", "exact").description("y".repeat(200)))
            .unwrap();

        let entries = store.load();
        assert_eq!(entries[0].description, format!("{}...", &long[..200]));
        assert_eq!(entries[1].description, "y".repeat(200));
    }

    #[test]
    fn test_delete_removes_record_and_files() {
        let (dir, store) = setup_store();
        let media = dir.path().join("clip.mp4");
        let subs = dir.path().join("clip.srt");
        fs::write(&media, b"video").unwrap();
        fs::write(&subs, b"1\n00:00:00,000 --> 00:00:01,000\nhi\n").unwrap();

        let entry = store
            .upsert(
                video("u", &media.to_string_lossy())
                    .srt_path(subs.to_string_lossy().into_owned()),
            )
            .unwrap();
        store.upsert(video("other", "missing.mp4")).unwrap();

        assert!(store.delete(&entry.id).unwrap());
        assert!(!media.exists());
        assert!(!subs.exists());
        let remaining = store.load();
        assert_eq!(remaining.len(), 1);
        assert!(remaining.iter().all(|e| e.id != entry.id));
    }

    #[test]
    fn test_delete_removes_renamed_file() {
        let (dir, store) = setup_store();
        let merged = dir.path().join("video.mkv");
        fs::write(&merged, b"video").unwrap();
        let recorded = dir.path().join("video.f137.mp4");

        let entry = store
            .upsert(video("u", &recorded.to_string_lossy()))
            .unwrap();
        assert!(store.delete(&entry.id).unwrap());
        assert!(!merged.exists());
    }

    #[test]
    fn test_delete_with_missing_files_still_removes_record() {
        let (_dir, store) = setup_store();
        let entry = store.upsert(video("u", "/nowhere/gone.mp4")).unwrap();
        assert!(store.delete(&entry.id).unwrap());
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_delete_unknown_id_is_noop() {
        let (_dir, store) = setup_store();
        store.upsert(video("u", "a.mp4")).unwrap();
        let before = fs::read_to_string(store.path()).unwrap();

        assert!(!store.delete("nonexistent").unwrap());
        assert_eq!(fs::read_to_string(store.path()).unwrap(), before);
    }

    #[test]
    fn test_clear() {
        let (_dir, store) = setup_store();
        store.upsert(video("T", "U")).unwrap();
        store.upsert(video("T2", "U2")).unwrap();
        store.clear().unwrap();
        assert!(store.load().is_empty());
        assert!(store.unique_urls().is_empty());
    }

    #[test]
    fn test_corrupt_file_reads_empty() {
        let (_dir, store) = setup_store();
        fs::write(store.path(), "{ not json").unwrap();
        assert!(store.load().is_empty());

        fs::write(store.path(), r#"{"id": "1"}"#).unwrap();
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_corrupt_file_is_replaced_on_next_write() {
        let (_dir, store) = setup_store();
        fs::write(store.path(), "garbage").unwrap();
        store.upsert(video("u", "a.mp4")).unwrap();
        assert_eq!(store.load().len(), 1);
    }

    #[test]
    fn test_missing_file_reads_empty() {
        let (_dir, store) = setup_store();
        fs::remove_file(store.path()).unwrap();
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_invalid_elements_are_skipped() {
        let (_dir, store) = setup_store();
        fs::write(
            store.path(),
            r#"[
                {"id": "1", "url": "u1", "title": "Kept", "color": "blue"},
                {"id": "2", "title": "No url"},
                42,
                {"id": "3", "url": "u3", "title": null, "video_path": null}
            ]"#,
        )
        .unwrap();

        let entries = store.load();
        let ids: Vec<&str> = entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "3"]);
        assert_eq!(entries[0].title, "Kept");
        assert_eq!(entries[1].title, "");
    }

    #[test]
    fn test_legacy_timestamp_ids_load() {
        let (_dir, store) = setup_store();
        fs::write(
            store.path(),
            r#"[{"id": "1700000000", "title": "Old", "url": "u", "creator": "c",
                 "description": "d", "date": "2023-11-14 22:13:20",
                 "video_path": "videos/old.mp4", "srt_path": null, "format": "720p"}]"#,
        )
        .unwrap();

        assert!(store.delete("1700000000").unwrap());
    }

    #[test]
    fn test_non_ascii_is_written_unescaped() {
        let (_dir, store) = setup_store();
        store
            .upsert(DownloadRecord::new("東京の夜 – café", "u").creator("Zoë"))
            .unwrap();

        let raw = fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("東京の夜 – café"));
        assert!(raw.contains("    \"id\""));
        assert_eq!(store.load()[0].creator, "Zoë");
    }

    #[test]
    fn test_unique_urls_and_ids() {
        let (_dir, store) = setup_store();
        for i in 0..25 {
            store.upsert(video(&format!("u{}", i % 5), "a.mp4")).unwrap();
        }
        let urls = store.unique_urls();
        assert_eq!(urls.len(), 5);
        assert!(urls.contains("u0"));

        for i in 0..50 {
            store.upsert(video(&format!("fresh{i}"), "a.mp4")).unwrap();
        }
        let ids: HashSet<String> = store.load().into_iter().map(|e| e.id).collect();
        assert_eq!(ids.len(), 55);
    }

    #[test]
    fn test_find() {
        let (_dir, store) = setup_store();
        let entry = store.upsert(video("u", "a.mp4")).unwrap();
        assert_eq!(store.find(&entry.id), Some(entry));
        assert_eq!(store.find("nope"), None);
    }

    #[test]
    fn test_save_leaves_no_temp_file() {
        let (_dir, store) = setup_store();
        store.upsert(video("u", "a.mp4")).unwrap();
        let leftovers: Vec<_> = fs::read_dir(store.dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
