//! Tool Manager
//!
//! Discovery, version checking and health validation for the external tools
//! (yt-dlp, ffmpeg) the downloads depend on.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

#[cfg(windows)]
use std::os::windows::process::CommandExt;

/// Windows flag to prevent console window from appearing when spawning processes.
#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x08000000;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::settings::ToolSettings;

/// External tools used by tubediary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tool {
    YtDlp,
    Ffmpeg,
}

impl Tool {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tool::YtDlp => "yt-dlp",
            Tool::Ffmpeg => "ffmpeg",
        }
    }

    pub fn binary_name(&self) -> &'static str {
        #[cfg(target_os = "windows")]
        {
            match self {
                Tool::YtDlp => "yt-dlp.exe",
                Tool::Ffmpeg => "ffmpeg.exe",
            }
        }
        #[cfg(not(target_os = "windows"))]
        {
            match self {
                Tool::YtDlp => "yt-dlp",
                Tool::Ffmpeg => "ffmpeg",
            }
        }
    }

    pub fn version_args(&self) -> &[&str] {
        match self {
            Tool::YtDlp => &["--version"],
            Tool::Ffmpeg => &["-version"],
        }
    }

    /// Install locations outside PATH that are worth probing
    /// (Homebrew, pip --user, pipx, MacPorts).
    fn common_paths(&self) -> Vec<PathBuf> {
        let name = self.binary_name();
        let mut paths: Vec<PathBuf> = ["/opt/homebrew/bin", "/usr/local/bin", "/usr/bin", "/opt/local/bin"]
            .iter()
            .map(|dir| Path::new(dir).join(name))
            .collect();
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".local").join("bin").join(name));
            if *self == Tool::YtDlp {
                paths.push(
                    home.join(".local/pipx/venvs/yt-dlp/bin")
                        .join(name),
                );
            }
        }
        paths
    }
}

/// Where a tool binary was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolSource {
    /// Explicit path from settings.
    Configured,
    /// Next to the tubediary executable.
    Bundled,
    /// System PATH.
    Path,
    /// A well-known install directory.
    CommonLocation,
}

/// Health status for a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Ok,
    Missing,
    Broken,
}

/// Information about an installed tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub tool: Tool,
    pub path: Option<PathBuf>,
    pub source: Option<ToolSource>,
    pub version: Option<String>,
    pub status: ToolStatus,
    pub last_checked: DateTime<Local>,
}

/// Combined toolchain status for `doctor`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolchainStatus {
    pub yt_dlp: ToolInfo,
    pub ffmpeg: ToolInfo,
    pub overall_status: ToolStatus,
}

/// Tool Manager configuration.
#[derive(Debug, Clone)]
pub struct ToolManagerConfig {
    pub yt_dlp_path: Option<PathBuf>,
    pub ffmpeg_path: Option<PathBuf>,
    /// Directory checked for bundled binaries; the executable's directory by default.
    pub bundled_dir: Option<PathBuf>,
    /// How long to wait for version checks.
    pub version_timeout: Duration,
}

impl Default for ToolManagerConfig {
    fn default() -> Self {
        Self {
            yt_dlp_path: None,
            ffmpeg_path: None,
            bundled_dir: std::env::current_exe()
                .ok()
                .and_then(|exe| exe.parent().map(Path::to_path_buf)),
            version_timeout: Duration::from_secs(5),
        }
    }
}

impl ToolManagerConfig {
    pub fn from_settings(tools: &ToolSettings) -> Self {
        Self {
            yt_dlp_path: tools.yt_dlp_path.clone(),
            ffmpeg_path: tools.ffmpeg_path.clone(),
            ..Self::default()
        }
    }
}

/// Finds and validates tool binaries.
#[derive(Debug, Clone)]
pub struct ToolManager {
    config: ToolManagerConfig,
}

impl ToolManager {
    pub fn new(config: ToolManagerConfig) -> Self {
        Self { config }
    }

    fn configured(&self, tool: Tool) -> Option<&PathBuf> {
        match tool {
            Tool::YtDlp => self.config.yt_dlp_path.as_ref(),
            Tool::Ffmpeg => self.config.ffmpeg_path.as_ref(),
        }
    }

    /// Find a tool binary without running it.
    ///
    /// Priority:
    /// 1. Path configured in settings
    /// 2. Bundled next to the executable
    /// 3. System PATH
    /// 4. Common install locations (bundled apps don't inherit the user's PATH)
    pub fn locate(&self, tool: Tool) -> Option<(PathBuf, ToolSource)> {
        if let Some(path) = self.configured(tool) {
            if path.exists() {
                return Some((path.clone(), ToolSource::Configured));
            }
            log::warn!(
                "Configured {} path does not exist: {}",
                tool.as_str(),
                path.display()
            );
        }

        if let Some(ref bundled_dir) = self.config.bundled_dir {
            let bundled = bundled_dir.join(tool.binary_name());
            if bundled.is_file() {
                return Some((bundled, ToolSource::Bundled));
            }
        }

        if let Ok(path) = which::which(tool.binary_name()) {
            return Some((path, ToolSource::Path));
        }

        tool.common_paths()
            .into_iter()
            .find(|p| p.is_file())
            .map(|p| (p, ToolSource::CommonLocation))
    }

    /// yt-dlp to run; the bare binary name when nothing was found so the
    /// spawn error names the tool.
    pub fn yt_dlp_path(&self) -> PathBuf {
        match self.locate(Tool::YtDlp) {
            Some((path, source)) => {
                log::info!("Using yt-dlp at {} ({:?})", path.display(), source);
                path
            }
            None => {
                log::warn!("Could not find yt-dlp, falling back to PATH lookup");
                PathBuf::from(Tool::YtDlp.binary_name())
            }
        }
    }

    /// ffmpeg to pass to yt-dlp, if any was found.
    pub fn ffmpeg_path(&self) -> Option<PathBuf> {
        self.locate(Tool::Ffmpeg).map(|(path, _)| path)
    }

    /// Get detailed info about a specific tool.
    pub async fn get_tool_info(&self, tool: Tool) -> ToolInfo {
        let Some((path, source)) = self.locate(tool) else {
            return ToolInfo {
                tool,
                path: None,
                source: None,
                version: None,
                status: ToolStatus::Missing,
                last_checked: Local::now(),
            };
        };

        let (version, status) = match self.get_version(&path, tool).await {
            Ok(v) => (Some(v), ToolStatus::Ok),
            Err(e) => {
                log::warn!("{} at {} is unhealthy: {:#}", tool.as_str(), path.display(), e);
                (None, ToolStatus::Broken)
            }
        };

        ToolInfo {
            tool,
            path: Some(path),
            source: Some(source),
            version,
            status,
            last_checked: Local::now(),
        }
    }

    /// Get the complete toolchain status.
    pub async fn get_toolchain_status(&self) -> ToolchainStatus {
        let yt_dlp = self.get_tool_info(Tool::YtDlp).await;
        let ffmpeg = self.get_tool_info(Tool::Ffmpeg).await;
        let overall_status = overall_status(yt_dlp.status, ffmpeg.status);

        ToolchainStatus {
            yt_dlp,
            ffmpeg,
            overall_status,
        }
    }

    /// Get the version string from a tool.
    pub async fn get_version(&self, path: &Path, tool: Tool) -> Result<String> {
        let mut cmd = Command::new(path);
        cmd.args(tool.version_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Hide console window on Windows
        #[cfg(windows)]
        cmd.creation_flags(CREATE_NO_WINDOW);

        let output = tokio::time::timeout(self.config.version_timeout, cmd.output())
            .await
            .context("Version check timed out")?
            .context("Failed to execute tool")?;

        if !output.status.success() {
            return Err(anyhow!(
                "Tool returned non-zero exit code: {}",
                output.status
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_version(&stdout, tool).ok_or_else(|| anyhow!("Could not parse version from output"))
    }
}

/// yt-dlp decides usability; a missing ffmpeg only limits merging and
/// subtitle conversion, so it degrades the status to `Broken` at most.
fn overall_status(yt_dlp: ToolStatus, ffmpeg: ToolStatus) -> ToolStatus {
    match (yt_dlp, ffmpeg) {
        (ToolStatus::Missing, _) => ToolStatus::Missing,
        (ToolStatus::Broken, _) | (_, ToolStatus::Broken) | (_, ToolStatus::Missing) => {
            ToolStatus::Broken
        }
        _ => ToolStatus::Ok,
    }
}

/// Parse version string from tool output.
fn parse_version(output: &str, tool: Tool) -> Option<String> {
    let first_line = output.lines().next()?.trim();
    if first_line.is_empty() {
        return None;
    }

    match tool {
        // yt-dlp outputs just the version number, e.g., "2024.01.01"
        Tool::YtDlp => Some(first_line.to_string()),
        Tool::Ffmpeg => {
            // "ffmpeg version 6.1.1 Copyright (c) ..."
            let parts: Vec<&str> = first_line.split_whitespace().collect();
            match parts.as_slice() {
                ["ffmpeg", "version", version, ..] => Some(version.to_string()),
                _ => Some(first_line.to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn isolated_config() -> ToolManagerConfig {
        ToolManagerConfig {
            yt_dlp_path: None,
            ffmpeg_path: None,
            bundled_dir: None,
            version_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_parse_version_ytdlp() {
        let output = "2024.01.01\n";
        assert_eq!(
            parse_version(output, Tool::YtDlp),
            Some("2024.01.01".to_string())
        );
        assert_eq!(parse_version("", Tool::YtDlp), None);
    }

    #[test]
    fn test_parse_version_ffmpeg() {
        let output = "ffmpeg version 6.1.1 Copyright (c) 2000-2023 the FFmpeg developers\n";
        assert_eq!(
            parse_version(output, Tool::Ffmpeg),
            Some("6.1.1".to_string())
        );
    }

    #[test]
    fn test_tool_binary_names() {
        #[cfg(target_os = "windows")]
        {
            assert_eq!(Tool::YtDlp.binary_name(), "yt-dlp.exe");
            assert_eq!(Tool::Ffmpeg.binary_name(), "ffmpeg.exe");
        }
        #[cfg(not(target_os = "windows"))]
        {
            assert_eq!(Tool::YtDlp.binary_name(), "yt-dlp");
            assert_eq!(Tool::Ffmpeg.binary_name(), "ffmpeg");
        }
    }

    #[test]
    fn test_overall_status() {
        assert_eq!(overall_status(ToolStatus::Ok, ToolStatus::Ok), ToolStatus::Ok);
        assert_eq!(overall_status(ToolStatus::Ok, ToolStatus::Missing), ToolStatus::Broken);
        assert_eq!(overall_status(ToolStatus::Missing, ToolStatus::Ok), ToolStatus::Missing);
        assert_eq!(overall_status(ToolStatus::Broken, ToolStatus::Ok), ToolStatus::Broken);
    }

    #[test]
    fn test_configured_path_wins() {
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("my-yt-dlp");
        std::fs::write(&fake, b"").unwrap();

        let manager = ToolManager::new(ToolManagerConfig {
            yt_dlp_path: Some(fake.clone()),
            ..isolated_config()
        });
        assert_eq!(
            manager.locate(Tool::YtDlp),
            Some((fake.clone(), ToolSource::Configured))
        );
        assert_eq!(manager.yt_dlp_path(), fake);
    }

    #[test]
    fn test_bundled_dir_is_checked() {
        let dir = tempfile::tempdir().unwrap();
        let bundled = dir.path().join(Tool::Ffmpeg.binary_name());
        std::fs::write(&bundled, b"").unwrap();

        let manager = ToolManager::new(ToolManagerConfig {
            ffmpeg_path: Some(dir.path().join("missing-ffmpeg")),
            bundled_dir: Some(dir.path().to_path_buf()),
            ..isolated_config()
        });
        assert_eq!(
            manager.locate(Tool::Ffmpeg),
            Some((bundled, ToolSource::Bundled))
        );
    }

    #[tokio::test]
    async fn test_broken_binary_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        // Not executable, so the version check fails.
        let fake = dir.path().join("yt-dlp-broken");
        std::fs::write(&fake, b"not a program").unwrap();

        let manager = ToolManager::new(ToolManagerConfig {
            yt_dlp_path: Some(fake.clone()),
            ..isolated_config()
        });
        let info = manager.get_tool_info(Tool::YtDlp).await;
        assert_eq!(info.status, ToolStatus::Broken);
        assert_eq!(info.path, Some(fake));
        assert_eq!(info.source, Some(ToolSource::Configured));
    }
}
