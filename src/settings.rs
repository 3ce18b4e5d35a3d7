//! Settings Manager
//!
//! Handles persistence and retrieval of user preferences.
//! Settings live in a single `settings.json` in the per-user config directory;
//! a missing or unreadable file yields defaults.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

/// File name of the settings document inside the config directory.
pub const SETTINGS_FILE_NAME: &str = "settings.json";

/// User settings structure with all configurable options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppSettings {
    /// Where the download diary is kept
    #[serde(default)]
    pub storage: StorageSettings,

    /// Download destinations and quality
    #[serde(default)]
    pub downloads: DownloadSettings,

    /// Subtitle settings
    #[serde(default)]
    pub subtitles: SubtitleSettings,

    /// External tool locations
    #[serde(default)]
    pub tools: ToolSettings,
}

/// Catalog storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Directory holding `download_history.json`.
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
        }
    }
}

/// Download destination and format settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadSettings {
    /// Folder media files are written to.
    #[serde(default = "default_download_folder")]
    pub download_folder: PathBuf,

    /// yt-dlp output template for video downloads, relative to `download_folder`.
    #[serde(default = "default_video_template")]
    pub video_template: String,

    /// Container used when video and audio streams are merged.
    #[serde(default = "default_merge_format")]
    pub merge_output_format: String,

    /// Highest video height offered and used for "best" (0 = no limit).
    #[serde(default = "default_max_height")]
    pub max_video_height: u32,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            download_folder: default_download_folder(),
            video_template: default_video_template(),
            merge_output_format: default_merge_format(),
            max_video_height: default_max_height(),
        }
    }
}

impl DownloadSettings {
    /// Full output template for video downloads.
    pub fn video_output(&self) -> String {
        self.download_folder
            .join(&self.video_template)
            .to_string_lossy()
            .into_owned()
    }
}

/// Subtitle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtitleSettings {
    /// Subfolder of the download folder for subtitle files.
    #[serde(default = "default_subtitle_subdir")]
    pub subfolder: String,

    /// yt-dlp output template for subtitle downloads.
    #[serde(default = "default_subtitle_template")]
    pub template: String,

    /// Format subtitles are converted to.
    #[serde(default = "default_subtitle_format")]
    pub preferred_format: String,

    /// Default subtitle language (ISO 639-1 code).
    #[serde(default = "default_subtitle_language")]
    pub default_language: String,
}

impl Default for SubtitleSettings {
    fn default() -> Self {
        Self {
            subfolder: default_subtitle_subdir(),
            template: default_subtitle_template(),
            preferred_format: default_subtitle_format(),
            default_language: default_subtitle_language(),
        }
    }
}

impl SubtitleSettings {
    /// Full output template for subtitle downloads under `download_folder`.
    pub fn output(&self, download_folder: &Path) -> String {
        download_folder
            .join(&self.subfolder)
            .join(&self.template)
            .to_string_lossy()
            .into_owned()
    }
}

/// Locations and timeouts for external tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSettings {
    /// Explicit yt-dlp binary; discovered when absent.
    #[serde(default)]
    pub yt_dlp_path: Option<PathBuf>,

    /// Explicit ffmpeg binary; discovered when absent.
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    /// Timeout for metadata fetches in seconds.
    #[serde(default = "default_metadata_timeout")]
    pub metadata_timeout_secs: u64,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            yt_dlp_path: None,
            ffmpeg_path: None,
            metadata_timeout_secs: default_metadata_timeout(),
        }
    }
}

impl ToolSettings {
    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.metadata_timeout_secs.max(1))
    }
}

// Default value functions
fn default_storage_dir() -> PathBuf {
    app_data_dir()
        .map(|dir| dir.join("db"))
        .unwrap_or_else(|_| PathBuf::from("db"))
}

fn default_download_folder() -> PathBuf {
    dirs::video_dir()
        .or_else(dirs::download_dir)
        .map(|dir| dir.join("tubediary"))
        .unwrap_or_else(|| PathBuf::from("videos"))
}

fn default_video_template() -> String {
    "%(title)s [%(height)sp].%(ext)s".to_string()
}

fn default_merge_format() -> String {
    "mp4".to_string()
}

fn default_max_height() -> u32 {
    1080
}

fn default_subtitle_subdir() -> String {
    "SRT".to_string()
}

fn default_subtitle_template() -> String {
    "%(title)s (Subtitle).%(ext)s".to_string()
}

fn default_subtitle_format() -> String {
    "srt".to_string()
}

fn default_subtitle_language() -> String {
    "en".to_string()
}

fn default_metadata_timeout() -> u64 {
    30
}

/// Determines the per-user project directories.
///
/// macOS:  ~/Library/Application Support/tubediary
/// Windows: %APPDATA%\\tubediary
/// Linux:  ~/.local/share/tubediary and ~/.config/tubediary (depending on XDG)
pub fn app_project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("com", "tubediary", "tubediary")
        .ok_or_else(|| anyhow!("failed to resolve per-user app directories"))
}

/// Returns the directory where tubediary stores its state (catalog).
pub fn app_data_dir() -> Result<PathBuf> {
    Ok(app_project_dirs()?.data_dir().to_path_buf())
}

/// Returns the default location of `settings.json`.
pub fn default_settings_path() -> Result<PathBuf> {
    Ok(app_project_dirs()?.config_dir().join(SETTINGS_FILE_NAME))
}

/// Settings manager for reading and writing `settings.json`.
pub struct SettingsManager {
    path: PathBuf,
}

impl SettingsManager {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    /// Manager for the per-user default location.
    pub fn at_default_location() -> Result<Self> {
        Ok(Self::new(default_settings_path()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load settings, falling back to defaults when the file is missing or invalid.
    pub fn load(&self) -> AppSettings {
        match self.try_load() {
            Ok(Some(settings)) => settings,
            Ok(None) => AppSettings::default(),
            Err(e) => {
                log::warn!("Ignoring settings at {}: {:#}", self.path.display(), e);
                AppSettings::default()
            }
        }
    }

    fn try_load(&self) -> Result<Option<AppSettings>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("read settings: {}", self.path.display()))?;
        let settings = serde_json::from_str(&raw).context("Failed to deserialize settings")?;
        Ok(Some(settings))
    }

    /// Save settings.
    pub fn save(&self, settings: &AppSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create settings dir: {}", parent.display()))?;
        }
        let json =
            serde_json::to_string_pretty(settings).context("Failed to serialize settings")?;

        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, json)
            .with_context(|| format!("write settings: {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("replace settings: {}", self.path.display()))?;
        Ok(())
    }
}

/// Merge partial settings into existing settings.
impl AppSettings {
    /// Update the catalog location.
    pub fn with_storage_dir(mut self, dir: PathBuf) -> Self {
        self.storage.storage_dir = dir;
        self
    }

    /// Update the download folder.
    pub fn with_download_folder(mut self, dir: PathBuf) -> Self {
        self.downloads.download_folder = dir;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = AppSettings::default();
        assert_eq!(settings.downloads.max_video_height, 1080);
        assert_eq!(settings.downloads.merge_output_format, "mp4");
        assert_eq!(settings.subtitles.preferred_format, "srt");
        assert_eq!(settings.tools.metadata_timeout(), Duration::from_secs(30));
        assert!(settings.storage.storage_dir.ends_with("db"));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SettingsManager::new(dir.path().join("settings.json"));
        let loaded = manager.load();
        assert_eq!(loaded.downloads.max_video_height, 1080);
    }

    #[test]
    fn test_corrupt_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ nope").unwrap();
        let loaded = SettingsManager::new(&path).load();
        assert_eq!(loaded.subtitles.default_language, "en");
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"downloads": {"max_video_height": 720}}"#).unwrap();

        let loaded = SettingsManager::new(&path).load();
        assert_eq!(loaded.downloads.max_video_height, 720);
        assert_eq!(loaded.downloads.merge_output_format, "mp4");
        assert_eq!(loaded.subtitles.subfolder, "SRT");
    }

    #[test]
    fn test_settings_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SettingsManager::new(dir.path().join("nested").join("settings.json"));

        let settings = AppSettings::default()
            .with_storage_dir(PathBuf::from("/custom/db"))
            .with_download_folder(PathBuf::from("/custom/videos"));
        manager.save(&settings).unwrap();

        let loaded = manager.load();
        assert_eq!(loaded.storage.storage_dir, PathBuf::from("/custom/db"));
        assert_eq!(
            loaded.downloads.download_folder,
            PathBuf::from("/custom/videos")
        );
    }

    #[test]
    fn test_output_templates() {
        let mut settings = AppSettings::default();
        settings.downloads.download_folder = PathBuf::from("videos");
        assert_eq!(
            settings.downloads.video_output(),
            Path::new("videos")
                .join("%(title)s [%(height)sp].%(ext)s")
                .to_string_lossy()
        );
        assert_eq!(
            settings.subtitles.output(&settings.downloads.download_folder),
            Path::new("videos")
                .join("SRT")
                .join("%(title)s (Subtitle).%(ext)s")
                .to_string_lossy()
        );
    }
}
