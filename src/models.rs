use chrono::Local;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Longest description (in characters) kept on a new entry.
pub const DESCRIPTION_LIMIT: usize = 200;

/// Appended to a description cut at [`DESCRIPTION_LIMIT`].
pub const TRUNCATION_MARKER: &str = "...";

/// Layout of the `date` field. Local time, second resolution.
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Helper to deserialize `null` as the type's default (e.g. empty string).
fn deserialize_null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Helper to deserialize an empty string as `None` for optional paths.
fn deserialize_blank_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.filter(|s| !s.trim().is_empty()))
}

/// One persisted diary record (one element of `download_history.json`).
///
/// The source URL is the de-facto primary key; `id` exists so the
/// presentation layer can address a row without repeating the URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,

    #[serde(default, deserialize_with = "deserialize_null_as_default")]
    pub title: String,

    pub url: String,

    #[serde(default, deserialize_with = "deserialize_null_as_default")]
    pub creator: String,

    #[serde(default, deserialize_with = "deserialize_null_as_default")]
    pub description: String,

    /// Last create/update time, formatted with [`DATE_FORMAT`].
    #[serde(default, deserialize_with = "deserialize_null_as_default")]
    pub date: String,

    /// Last known location of the media file. `None` means never downloaded,
    /// which is different from a path that no longer resolves.
    #[serde(default, deserialize_with = "deserialize_blank_as_none")]
    pub video_path: Option<String>,

    #[serde(default, deserialize_with = "deserialize_blank_as_none")]
    pub srt_path: Option<String>,

    /// Free-text description of the quality/track selection.
    #[serde(default, deserialize_with = "deserialize_null_as_default")]
    pub format: String,
}

impl CatalogEntry {
    /// Build a brand-new entry from a completed download.
    pub fn from_record(record: DownloadRecord) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: record.title,
            url: record.url,
            creator: record.creator,
            description: truncate_description(&record.description),
            date: now_stamp(),
            video_path: non_empty(record.video_path),
            srt_path: non_empty(record.srt_path),
            format: record.format,
        }
    }

    /// Merge a later download for the same URL into this entry.
    ///
    /// Paths are only overwritten by non-empty values so a subtitle-only
    /// download never drops a previously recorded video, and vice versa.
    pub fn merge(&mut self, record: DownloadRecord) {
        if let Some(path) = non_empty(record.video_path) {
            self.video_path = Some(path);
        }
        if let Some(path) = non_empty(record.srt_path) {
            self.srt_path = Some(path);
        }
        if self.title.is_empty() {
            self.title = record.title;
        }
        if !record.format.trim().is_empty() {
            self.format = record.format;
        }
        self.date = now_stamp();
    }
}

/// Fields handed over by the presentation layer once a download completes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRecord {
    pub title: String,
    pub url: String,
    pub creator: String,
    pub description: String,
    pub format: String,
    pub video_path: Option<String>,
    pub srt_path: Option<String>,
}

impl DownloadRecord {
    pub fn new<S1: Into<String>, S2: Into<String>>(title: S1, url: S2) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn creator<S: Into<String>>(mut self, creator: S) -> Self {
        self.creator = creator.into();
        self
    }

    pub fn description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = description.into();
        self
    }

    pub fn format<S: Into<String>>(mut self, format: S) -> Self {
        self.format = format.into();
        self
    }

    pub fn video_path<S: Into<String>>(mut self, path: S) -> Self {
        self.video_path = Some(path.into());
        self
    }

    pub fn srt_path<S: Into<String>>(mut self, path: S) -> Self {
        self.srt_path = Some(path.into());
        self
    }
}

/// An entry together with what its recorded paths resolve to right now.
#[derive(Debug, Clone, Serialize)]
pub struct LibraryEntry {
    pub entry: CatalogEntry,
    pub video_path: Option<String>,
    pub video_exists: bool,
    pub video_size_bytes: Option<u64>,
    pub srt_path: Option<String>,
    pub srt_exists: bool,
}

/// Explorer view over the whole catalog.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LibrarySnapshot {
    pub entries: Vec<LibraryEntry>,
    /// Entries whose video currently resolves to an existing file.
    pub video_count: usize,
    pub total_video_bytes: u64,
    /// Entries whose subtitle file currently exists.
    pub srt_count: usize,
}

/// Cut `description` to [`DESCRIPTION_LIMIT`] characters plus a marker.
pub fn truncate_description(description: &str) -> String {
    match description.char_indices().nth(DESCRIPTION_LIMIT) {
        Some((cut, _)) => format!("{}{}", &description[..cut], TRUNCATION_MARKER),
        None => description.to_string(),
    }
}

pub fn now_stamp() -> String {
    Local::now().format(DATE_FORMAT).to_string()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}
