use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

#[cfg(windows)]
use std::os::windows::process::CommandExt;

/// Windows flag to prevent console window from appearing when spawning processes.
#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x08000000;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

/// Where to find yt-dlp.
#[derive(Debug, Clone)]
pub struct YtDlpConfig {
    /// Path to the `yt-dlp` binary.
    pub yt_dlp_path: PathBuf,

    /// Timeout for metadata calls (not for downloads).
    pub metadata_timeout: Duration,
}

impl YtDlpConfig {
    pub fn new(yt_dlp_path: PathBuf) -> Self {
        Self {
            yt_dlp_path,
            metadata_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_metadata_timeout(mut self, timeout: Duration) -> Self {
        self.metadata_timeout = timeout;
        self
    }
}

/// One entry of yt-dlp's `formats` list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormatDescriptor {
    #[serde(default)]
    pub format_id: String,
    #[serde(default)]
    pub ext: Option<String>,
    #[serde(default)]
    pub height: Option<u32>,
    /// `"none"` for audio-only formats.
    #[serde(default)]
    pub vcodec: Option<String>,
    /// `"none"` for video-only formats.
    #[serde(default)]
    pub acodec: Option<String>,
    /// Audio bitrate in kbps.
    #[serde(default)]
    pub abr: Option<f64>,
    /// Total bitrate in kbps.
    #[serde(default)]
    pub tbr: Option<f64>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub format_note: Option<String>,
}

impl FormatDescriptor {
    pub fn has_video(&self) -> bool {
        codec_present(self.vcodec.as_deref())
    }

    pub fn has_audio(&self) -> bool {
        codec_present(self.acodec.as_deref())
    }

    pub fn is_audio_only(&self) -> bool {
        self.acodec.as_deref() != Some("none") && self.vcodec.as_deref() == Some("none")
    }
}

fn codec_present(codec: Option<&str>) -> bool {
    matches!(codec, Some(c) if c != "none")
}

/// One downloadable rendition of a subtitle track.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitleFormat {
    #[serde(default)]
    pub ext: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// Subtitle tracks keyed by language/track code.
pub type SubtitleMap = BTreeMap<String, Vec<SubtitleFormat>>;

/// Metadata for a single video as reported by `yt-dlp --dump-json`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MediaInfo {
    pub url: String,
    pub id: Option<String>,
    pub title: Option<String>,
    pub uploader: Option<String>,
    /// Uploader page, or the channel page when the uploader has none.
    pub uploader_url: Option<String>,
    pub description: Option<String>,
    pub thumbnail_url: Option<String>,
    pub duration_seconds: Option<u64>,
    pub formats: Vec<FormatDescriptor>,
    /// Manually authored subtitle tracks.
    pub subtitles: SubtitleMap,
    /// Auto-generated caption tracks.
    pub automatic_captions: SubtitleMap,
}

/// Subset of the yt-dlp info document we read.
#[derive(Debug, Deserialize)]
struct RawInfo {
    id: Option<String>,
    title: Option<String>,
    uploader: Option<String>,
    uploader_url: Option<String>,
    channel_url: Option<String>,
    description: Option<String>,
    thumbnail: Option<String>,
    duration: Option<f64>,
    webpage_url: Option<String>,
    #[serde(default)]
    formats: Option<Vec<FormatDescriptor>>,
    #[serde(default)]
    subtitles: Option<SubtitleMap>,
    #[serde(default)]
    automatic_captions: Option<SubtitleMap>,
}

/// Low-level execution result.
#[derive(Debug, Clone)]
pub struct YtDlpOutput {
    /// Raw stdout lines captured (bounded).
    pub stdout_lines: Vec<String>,
    /// Raw stderr lines captured (bounded).
    pub stderr_lines: Vec<String>,
    /// Exit code if available.
    pub exit_code: Option<i32>,
}

/// Error categories we can map to user-facing messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum YtDlpErrorKind {
    NotFound,
    Timeout,
    InvalidJson,
    NonZeroExit,
}

#[derive(Debug)]
pub struct YtDlpError {
    pub kind: YtDlpErrorKind,
    pub message: String,
    pub output: Option<YtDlpOutput>,
}

impl std::fmt::Display for YtDlpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for YtDlpError {}

/// Primary runner for metadata operations.
#[derive(Debug, Clone)]
pub struct YtDlpRunner {
    cfg: YtDlpConfig,
}

impl YtDlpRunner {
    pub fn new(cfg: YtDlpConfig) -> Self {
        Self { cfg }
    }

    pub fn yt_dlp_path(&self) -> &Path {
        &self.cfg.yt_dlp_path
    }

    /// Fetch metadata for a URL via `yt-dlp --dump-json`.
    ///
    /// Notes:
    /// - Single video only (`--no-playlist`).
    /// - Uses the configured metadata timeout.
    /// - Does NOT download media.
    pub async fn fetch_media_info(&self, url: &str) -> Result<(MediaInfo, YtDlpOutput)> {
        let args = vec![
            "--dump-json".to_string(),
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            url.to_string(),
        ];

        let (json_lines, output) = self
            .exec_json_lines(&args, self.cfg.metadata_timeout)
            .await?;
        let first = json_lines
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("yt-dlp returned no JSON output"))?;

        let info = parse_media_info(&first, url)?;
        log::info!(
            "Fetched metadata for {}: {} formats, {} manual / {} automatic subtitle tracks",
            url,
            info.formats.len(),
            info.subtitles.len(),
            info.automatic_captions.len()
        );

        Ok((info, output))
    }

    /// Execute yt-dlp and return each stdout line that parses as a JSON object.
    ///
    /// - Captures bounded stdout/stderr logs for diagnostics.
    /// - Fails on non-zero exit.
    async fn exec_json_lines(
        &self,
        args: &[String],
        timeout: Duration,
    ) -> Result<(Vec<String>, YtDlpOutput)> {
        // A bare name is left to PATH lookup at spawn time.
        let is_bare_name = self.cfg.yt_dlp_path.components().count() == 1;
        if !is_bare_name && !self.cfg.yt_dlp_path.exists() {
            return Err(YtDlpError {
                kind: YtDlpErrorKind::NotFound,
                message: format!("yt-dlp not found at {}", self.cfg.yt_dlp_path.display()),
                output: None,
            }
            .into());
        }

        let mut cmd = Command::new(&self.cfg.yt_dlp_path);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Hide console window on Windows
        #[cfg(windows)]
        cmd.creation_flags(CREATE_NO_WINDOW);

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                anyhow::Error::new(YtDlpError {
                    kind: YtDlpErrorKind::NotFound,
                    message: format!("yt-dlp not found: {}", self.cfg.yt_dlp_path.display()),
                    output: None,
                })
            } else {
                anyhow::Error::new(e).context(format!(
                    "failed to spawn yt-dlp: {}",
                    self.cfg.yt_dlp_path.display()
                ))
            }
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("failed to capture yt-dlp stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("failed to capture yt-dlp stderr"))?;

        let mut stdout_reader = BufReader::new(stdout).lines();
        let mut stderr_reader = BufReader::new(stderr).lines();

        // Bound log capture to avoid unbounded memory use.
        const MAX_STDOUT_LINES: usize = 20_000;
        const MAX_STDERR_LINES: usize = 20_000;

        let mut stdout_lines: Vec<String> = Vec::new();
        let mut stderr_lines: Vec<String> = Vec::new();
        let mut json_lines: Vec<String> = Vec::new();

        let read_task = async {
            let mut stderr_open = true;
            loop {
                tokio::select! {
                    line = stdout_reader.next_line() => {
                        match line {
                            Ok(Some(l)) => {
                                if looks_like_json_object(&l) {
                                    json_lines.push(l);
                                } else if stdout_lines.len() < MAX_STDOUT_LINES {
                                    stdout_lines.push(l);
                                }
                            }
                            Ok(None) => break,
                            Err(e) => return Err(anyhow!("error reading yt-dlp stdout: {e}")),
                        }
                    }
                    line = stderr_reader.next_line(), if stderr_open => {
                        match line {
                            Ok(Some(l)) => {
                                if stderr_lines.len() < MAX_STDERR_LINES {
                                    stderr_lines.push(l);
                                }
                            }
                            Ok(None) => stderr_open = false,
                            Err(e) => return Err(anyhow!("error reading yt-dlp stderr: {e}")),
                        }
                    }
                }
            }
            // Drain whatever stderr remains after stdout closed.
            while stderr_open {
                match stderr_reader.next_line().await {
                    Ok(Some(l)) if stderr_lines.len() < MAX_STDERR_LINES => stderr_lines.push(l),
                    Ok(Some(_)) => {}
                    Ok(None) | Err(_) => stderr_open = false,
                }
            }
            Ok::<(), anyhow::Error>(())
        };

        match tokio::time::timeout(timeout, read_task).await {
            Ok(read_result) => read_result?,
            Err(_) => {
                // Timeout: kill process and return error with partial output.
                let _ = child.kill().await;
                return Err(YtDlpError {
                    kind: YtDlpErrorKind::Timeout,
                    message: format!("yt-dlp timed out after {:?}", timeout),
                    output: Some(YtDlpOutput {
                        stdout_lines,
                        stderr_lines,
                        exit_code: None,
                    }),
                }
                .into());
            }
        }

        let status = child.wait().await.context("failed to wait for yt-dlp")?;
        let exit_code = status.code();

        let output = YtDlpOutput {
            stdout_lines,
            stderr_lines,
            exit_code,
        };

        if !status.success() {
            let detail = output
                .stderr_lines
                .iter()
                .rev()
                .find(|l| l.contains("ERROR"))
                .cloned()
                .unwrap_or_else(|| format!("exit status {:?}", exit_code));
            return Err(YtDlpError {
                kind: YtDlpErrorKind::NonZeroExit,
                message: detail,
                output: Some(output),
            }
            .into());
        }

        Ok((json_lines, output))
    }
}

fn looks_like_json_object(s: &str) -> bool {
    let t = s.trim();
    t.starts_with('{') && t.ends_with('}')
}

/// Parse one `--dump-json` document.
pub fn parse_media_info(json_line: &str, fallback_url: &str) -> Result<MediaInfo> {
    let raw: RawInfo = serde_json::from_str(json_line).map_err(|e| YtDlpError {
        kind: YtDlpErrorKind::InvalidJson,
        message: format!("invalid yt-dlp JSON: {e}"),
        output: None,
    })?;

    Ok(MediaInfo {
        url: raw.webpage_url.unwrap_or_else(|| fallback_url.to_string()),
        id: raw.id,
        title: raw.title,
        uploader: raw.uploader,
        uploader_url: raw.uploader_url.or(raw.channel_url),
        description: raw.description,
        thumbnail_url: raw.thumbnail,
        duration_seconds: raw.duration.filter(|d| *d >= 0.0).map(|d| d as u64),
        formats: raw.formats.unwrap_or_default(),
        subtitles: raw.subtitles.unwrap_or_default(),
        automatic_captions: raw.automatic_captions.unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "id": "dQw4w9WgXcQ",
        "title": "Sample Talk",
        "uploader": "Some Channel",
        "uploader_url": null,
        "channel_url": "https://www.youtube.com/channel/UC123",
        "description": "A talk.",
        "thumbnail": "https://i.ytimg.com/vi/dQw4w9WgXcQ/maxresdefault.jpg",
        "duration": 212.0,
        "webpage_url": "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
        "formats": [
            {"format_id": "140", "ext": "m4a", "vcodec": "none", "acodec": "mp4a.40.2", "abr": 129.5, "language": "en", "format_note": "medium"},
            {"format_id": "137", "ext": "mp4", "height": 1080, "vcodec": "avc1.640028", "acodec": "none", "tbr": 4400.1},
            {"format_id": "sb0", "ext": "mhtml", "vcodec": "none", "acodec": "none"}
        ],
        "subtitles": {"en": [{"ext": "vtt", "name": "English"}]},
        "automatic_captions": {"de": [{"ext": "vtt", "name": "German"}]},
        "unrelated": {"nested": true}
    }"#;

    #[test]
    fn test_parse_media_info() {
        let info = parse_media_info(SAMPLE, "fallback").unwrap();
        assert_eq!(info.url, "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
        assert_eq!(info.title.as_deref(), Some("Sample Talk"));
        assert_eq!(
            info.uploader_url.as_deref(),
            Some("https://www.youtube.com/channel/UC123")
        );
        assert_eq!(info.duration_seconds, Some(212));
        assert_eq!(info.formats.len(), 3);
        assert!(info.formats[0].is_audio_only());
        assert!(info.formats[1].has_video());
        assert!(!info.formats[1].has_audio());
        assert!(!info.formats[2].is_audio_only());
        assert_eq!(info.subtitles["en"][0].name.as_deref(), Some("English"));
        assert!(info.automatic_captions.contains_key("de"));
    }

    #[test]
    fn test_parse_minimal_uses_fallback_url() {
        let info = parse_media_info(r#"{"title": "x"}"#, "https://example.com/v").unwrap();
        assert_eq!(info.url, "https://example.com/v");
        assert!(info.formats.is_empty());
        assert!(info.subtitles.is_empty());
    }

    #[test]
    fn test_parse_invalid_json() {
        let err = parse_media_info("{oops", "u").unwrap_err();
        let kind = err.downcast_ref::<YtDlpError>().map(|e| e.kind.clone());
        assert_eq!(kind, Some(YtDlpErrorKind::InvalidJson));
    }

    #[test]
    fn test_json_line_detection() {
        assert!(looks_like_json_object("  {\"a\": 1}  "));
        assert!(!looks_like_json_object("[download] 10%"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_not_found() {
        let runner = YtDlpRunner::new(YtDlpConfig::new(PathBuf::from(
            "/definitely/not/here/yt-dlp",
        )));
        let err = runner.fetch_media_info("https://example.com").await.unwrap_err();
        let kind = err.downcast_ref::<YtDlpError>().map(|e| e.kind.clone());
        assert_eq!(kind, Some(YtDlpErrorKind::NotFound));
    }
}
