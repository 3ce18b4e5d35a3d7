//! Download Manager
//!
//! Runs a single yt-dlp download (video or subtitle track), streams progress
//! as [`DownloadEvent`]s and reports the file path yt-dlp ended up writing.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::OnceLock;

#[cfg(windows)]
use std::os::windows::process::CommandExt;

/// Windows flag to prevent console window from appearing when spawning processes.
#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x08000000;

use regex::Regex;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::events::{ActionKind, DownloadEvent, DownloadFailure, ErrorCode, Progress};
use crate::settings::AppSettings;

/// Prefix of our `--progress-template` lines.
const PROGRESS_TAG: &str = "[tubediary]";

/// Configuration for download execution.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub yt_dlp_path: PathBuf,
    pub ffmpeg_path: Option<PathBuf>,
    /// Full yt-dlp output template for video downloads.
    pub video_output: String,
    /// Full yt-dlp output template for subtitle downloads.
    pub subtitle_output: String,
    pub merge_output_format: String,
    pub subtitle_format: String,
}

impl DownloadConfig {
    pub fn from_settings(
        settings: &AppSettings,
        yt_dlp_path: PathBuf,
        ffmpeg_path: Option<PathBuf>,
    ) -> Self {
        Self {
            yt_dlp_path,
            ffmpeg_path,
            video_output: settings.downloads.video_output(),
            subtitle_output: settings
                .subtitles
                .output(&settings.downloads.download_folder),
            merge_output_format: settings.downloads.merge_output_format.clone(),
            subtitle_format: settings.subtitles.preferred_format.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DownloadKind {
    /// Media download with a yt-dlp `-f` selector.
    Video { selector: String },
    /// One subtitle track, no media.
    Subtitle { code: String, auto: bool },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadRequest {
    pub url: String,
    pub kind: DownloadKind,
}

impl DownloadRequest {
    pub fn video(url: impl Into<String>, selector: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            kind: DownloadKind::Video {
                selector: selector.into(),
            },
        }
    }

    pub fn subtitle(url: impl Into<String>, code: impl Into<String>, auto: bool) -> Self {
        Self {
            url: url.into(),
            kind: DownloadKind::Subtitle {
                code: code.into(),
                auto,
            },
        }
    }
}

/// Runs downloads with a fixed configuration.
#[derive(Debug, Clone)]
pub struct Downloader {
    config: DownloadConfig,
}

impl Downloader {
    pub fn new(config: DownloadConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// yt-dlp arguments for `request`, URL last.
    pub fn build_args(&self, request: &DownloadRequest) -> Vec<String> {
        let mut args = vec![
            "--newline".to_string(),
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "--progress".to_string(),
            "--progress-template".to_string(),
            format!(
                "download:{PROGRESS_TAG} %(progress._percent_str)s %(progress._speed_str)s %(progress._eta_str)s %(progress._total_bytes_str)s"
            ),
        ];

        match &request.kind {
            DownloadKind::Video { selector } => {
                args.extend([
                    "-f".to_string(),
                    selector.clone(),
                    "--merge-output-format".to_string(),
                    self.config.merge_output_format.clone(),
                    "-o".to_string(),
                    self.config.video_output.clone(),
                ]);
            }
            DownloadKind::Subtitle { code, auto } => {
                let write_flag = if *auto {
                    "--write-auto-subs"
                } else {
                    "--write-subs"
                };
                args.extend([
                    "--skip-download".to_string(),
                    write_flag.to_string(),
                    "--sub-langs".to_string(),
                    code.clone(),
                    "--sub-format".to_string(),
                    format!("{}/best", self.config.subtitle_format),
                    "--convert-subs".to_string(),
                    self.config.subtitle_format.clone(),
                    "-o".to_string(),
                    self.config.subtitle_output.clone(),
                ]);
            }
        }

        if let Some(ref ffmpeg_path) = self.config.ffmpeg_path {
            args.push("--ffmpeg-location".to_string());
            args.push(ffmpeg_path.to_string_lossy().to_string());
        }

        args.push(request.url.clone());
        args
    }

    /// Execute a single download.
    ///
    /// Progress goes to `event_tx`; a closed receiver does not stop the
    /// download. Returns the last output path yt-dlp reported, if any.
    pub async fn download(
        &self,
        request: &DownloadRequest,
        event_tx: mpsc::Sender<DownloadEvent>,
    ) -> Result<Option<String>, DownloadFailure> {
        let result = self.execute(request, &event_tx).await;
        let final_event = match &result {
            Ok(final_path) => DownloadEvent::Completed {
                final_path: final_path.clone(),
            },
            Err(failure) => DownloadEvent::Failed(failure.clone()),
        };
        let _ = event_tx.send(final_event).await;
        result
    }

    async fn execute(
        &self,
        request: &DownloadRequest,
        event_tx: &mpsc::Sender<DownloadEvent>,
    ) -> Result<Option<String>, DownloadFailure> {
        let args = self.build_args(request);
        log::info!("Starting download of {} with args: {:?}", request.url, args);

        let mut cmd = Command::new(&self.config.yt_dlp_path);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Hide console window on Windows
        #[cfg(windows)]
        cmd.creation_flags(CREATE_NO_WINDOW);

        let mut child = cmd.spawn().map_err(|e| {
            DownloadFailure::new(ErrorCode::ToolMissing, format!("Failed to start yt-dlp: {e}"))
                .with_action(ActionKind::CheckTools, "Run `tubediary doctor`")
        })?;

        let _ = event_tx
            .send(DownloadEvent::Started {
                url: request.url.clone(),
            })
            .await;

        let stdout = child.stdout.take().ok_or_else(|| {
            DownloadFailure::new(ErrorCode::Unknown, "Failed to capture stdout")
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            DownloadFailure::new(ErrorCode::Unknown, "Failed to capture stderr")
        })?;

        let mut stdout_reader = BufReader::new(stdout);
        let mut stderr_reader = BufReader::new(stderr);
        // yt-dlp writes in the console encoding, which is not always UTF-8.
        let mut stdout_buf: Vec<u8> = Vec::new();
        let mut stderr_buf: Vec<u8> = Vec::new();

        let mut stderr_lines: Vec<String> = Vec::new();
        let mut parser = OutputParser::new();
        let mut stderr_open = true;

        loop {
            tokio::select! {
                read = stdout_reader.read_until(b'\n', &mut stdout_buf) => {
                    match read {
                        Ok(0) => {
                            if !stdout_buf.is_empty() {
                                let l = take_line(&mut stdout_buf);
                                for event in parser.parse_line(&l) {
                                    let _ = event_tx.send(event).await;
                                }
                            }
                            break;
                        }
                        Ok(_) => {
                            let l = take_line(&mut stdout_buf);
                            log::debug!("yt-dlp stdout: {}", l);
                            for event in parser.parse_line(&l) {
                                let _ = event_tx.send(event).await;
                            }
                        }
                        Err(e) => {
                            log::error!("Error reading stdout: {}", e);
                            break;
                        }
                    }
                }
                read = stderr_reader.read_until(b'\n', &mut stderr_buf), if stderr_open => {
                    match read {
                        Ok(0) => {
                            if !stderr_buf.is_empty() {
                                stderr_lines.push(take_line(&mut stderr_buf));
                            }
                            stderr_open = false;
                        }
                        Ok(_) => {
                            let l = take_line(&mut stderr_buf);
                            log::debug!("yt-dlp stderr: {}", l);
                            stderr_lines.push(l);
                        }
                        Err(e) => {
                            log::error!("Error reading stderr: {}", e);
                            stderr_open = false;
                        }
                    }
                }
            }
        }

        while stderr_open {
            match stderr_reader.read_until(b'\n', &mut stderr_buf).await {
                Ok(0) | Err(_) => {
                    if !stderr_buf.is_empty() {
                        stderr_lines.push(take_line(&mut stderr_buf));
                    }
                    stderr_open = false;
                }
                Ok(_) => stderr_lines.push(take_line(&mut stderr_buf)),
            }
        }

        let status = child.wait().await.map_err(|e| {
            DownloadFailure::new(ErrorCode::Unknown, format!("Failed to wait for yt-dlp: {e}"))
        })?;

        if !status.success() {
            let failure = classify_error(&stderr_lines.join("\n"));
            log::warn!("Download of {} failed: {:?}", request.url, failure.code);
            return Err(failure);
        }

        let final_path = parser.final_path();
        log::info!("Download of {} finished: {:?}", request.url, final_path);
        Ok(final_path)
    }
}

/// Decodes one raw output line (lossy) and empties `buf` for the next read.
fn take_line(buf: &mut Vec<u8>) -> String {
    let line = String::from_utf8_lossy(buf)
        .trim_end_matches(|c| c == '\r' || c == '\n')
        .to_string();
    buf.clear();
    line
}

struct Patterns {
    progress: Regex,
    fallback_progress: Regex,
    bare_percent: Regex,
    post_process: Regex,
    destination: Regex,
    merged: Regex,
    already: Regex,
    subtitle: Regex,
}

fn patterns() -> Option<&'static Patterns> {
    static PATTERNS: OnceLock<Option<Patterns>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            Some(Patterns {
                // [tubediary] 50.5% 1.5MiB/s 00:30 100MiB
                progress: Regex::new(r"\[tubediary\]\s+(\S+)\s+(\S+)\s+(\S+)\s+(\S+)").ok()?,
                // [download]  50.5% of ~100.00MiB at 1.50MiB/s ETA 00:30
                fallback_progress: Regex::new(
                    r"\[download\]\s+(\d+\.?\d*)%\s+of\s+~?\s*(\S+)\s+at\s+(\S+)\s+ETA\s+(\S+)",
                )
                .ok()?,
                bare_percent: Regex::new(r"\[download\]\s+(\d+\.?\d*)%").ok()?,
                post_process: Regex::new(
                    r"^\[(Merger|ffmpeg|VideoConvertor|VideoRemuxer|SubtitlesConvertor|FixupM3u8|FixupM4a)\]",
                )
                .ok()?,
                destination: Regex::new(r"^\[download\] Destination: (.+)$").ok()?,
                merged: Regex::new(r#"^\[Merger\] Merging formats into "(.+)"$"#).ok()?,
                already: Regex::new(r"^\[download\] (.+) has already been downloaded").ok()?,
                subtitle: Regex::new(r"Writing video subtitles to: (.+)$").ok()?,
            })
        })
        .as_ref()
}

/// Line-by-line interpreter of yt-dlp's stdout.
#[derive(Debug, Default)]
pub struct OutputParser {
    last_percent: Option<f64>,
    final_path: Option<String>,
}

impl OutputParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last output path seen (merged file beats stream destinations).
    pub fn final_path(&self) -> Option<String> {
        self.final_path.clone()
    }

    /// Events for one stdout line; updates the detected output path.
    pub fn parse_line(&mut self, line: &str) -> Vec<DownloadEvent> {
        let mut events = Vec::new();
        let Some(p) = patterns() else {
            return events;
        };

        if let Some(progress) = parse_progress(p, line) {
            // Only send if percent changed meaningfully (avoid flooding)
            let current = progress.percent.unwrap_or(0.0);
            let changed = match self.last_percent {
                Some(last) => (current - last).abs() >= 0.5 || current >= 99.9,
                None => true,
            };
            if changed {
                self.last_percent = Some(current);
                events.push(DownloadEvent::Progress(progress));
            }
        }

        if let Some(caps) = p.post_process.captures(line) {
            let step = match caps.get(1).map(|m| m.as_str()) {
                Some("Merger") => "Merging streams",
                Some("SubtitlesConvertor") => "Converting subtitles",
                Some("VideoRemuxer") | Some("VideoConvertor") => "Converting video",
                _ => "Post-processing",
            };
            events.push(DownloadEvent::PostProcessing {
                step: step.to_string(),
            });
        }

        let path = p
            .merged
            .captures(line)
            .or_else(|| p.destination.captures(line))
            .or_else(|| p.already.captures(line))
            .or_else(|| p.subtitle.captures(line))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string());
        if let Some(path) = path {
            self.final_path = Some(path);
        }

        events
    }
}

fn parse_progress(p: &Patterns, line: &str) -> Option<Progress> {
    if let Some(caps) = p.progress.captures(line) {
        let field = |i: usize| caps.get(i).map(|m| m.as_str()).unwrap_or("");
        return Some(Progress {
            percent: parse_percent(field(1)),
            speed_bps: parse_speed(field(2)),
            eta_seconds: parse_eta(field(3)),
            bytes_total: parse_bytes(field(4)),
            phase: Some("Downloading".to_string()),
        });
    }

    if let Some(caps) = p.fallback_progress.captures(line) {
        return Some(Progress {
            percent: caps.get(1).and_then(|m| m.as_str().parse::<f64>().ok()),
            bytes_total: caps.get(2).and_then(|m| parse_bytes(m.as_str())),
            speed_bps: caps.get(3).and_then(|m| parse_speed(m.as_str())),
            eta_seconds: caps.get(4).and_then(|m| parse_eta(m.as_str())),
            phase: Some("Downloading".to_string()),
        });
    }

    let percent = p
        .bare_percent
        .captures(line)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())?;
    Some(Progress {
        percent: Some(percent),
        phase: Some("Downloading".to_string()),
        ..Default::default()
    })
}

fn parse_percent(s: &str) -> Option<f64> {
    let cleaned = s.trim_end_matches('%').trim();
    cleaned.parse::<f64>().ok()
}

fn size_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([\d.]+)\s*(Ki?B|Mi?B|Gi?B|B)").ok())
        .as_ref()
}

/// `"1.5MiB"` -> bytes. Also accepts speeds (`"500KiB/s"`).
fn parse_size(s: &str) -> Option<u64> {
    let s = s.trim();
    if s == "N/A" || s.is_empty() {
        return None;
    }

    let caps = size_re()?.captures(s)?;
    let num: f64 = caps.get(1)?.as_str().parse().ok()?;
    let multiplier: f64 = match caps.get(2)?.as_str() {
        "KB" | "KiB" => 1024.0,
        "MB" | "MiB" => 1024.0 * 1024.0,
        "GB" | "GiB" => 1024.0 * 1024.0 * 1024.0,
        _ => 1.0,
    };

    Some((num * multiplier) as u64)
}

fn parse_speed(s: &str) -> Option<u64> {
    parse_size(s)
}

fn parse_bytes(s: &str) -> Option<u64> {
    parse_size(s)
}

fn parse_eta(s: &str) -> Option<u64> {
    // Format: "00:05:30" or "05:30" or "30" or "N/A"
    let s = s.trim();
    if s == "N/A" || s.is_empty() {
        return None;
    }

    let parts: Vec<&str> = s.split(':').collect();
    match parts.as_slice() {
        [secs] => secs.parse::<u64>().ok(),
        [mins, secs] => {
            let mins: u64 = mins.parse().ok()?;
            let secs: u64 = secs.parse().ok()?;
            Some(mins * 60 + secs)
        }
        [hours, mins, secs] => {
            let hours: u64 = hours.parse().ok()?;
            let mins: u64 = mins.parse().ok()?;
            let secs: u64 = secs.parse().ok()?;
            Some(hours * 3600 + mins * 60 + secs)
        }
        _ => None,
    }
}

/// Classify yt-dlp errors into user-friendly categories with remediation actions.
fn classify_error(stderr: &str) -> DownloadFailure {
    let stderr_lower = stderr.to_lowercase();

    if stderr_lower.contains("ffmpeg") && stderr_lower.contains("not")
        && (stderr_lower.contains("installed") || stderr_lower.contains("found"))
    {
        return DownloadFailure::new(
            ErrorCode::ToolMissing,
            "ffmpeg is required to merge or convert this download.",
        )
        .with_action(ActionKind::InstallFfmpeg, "Install ffmpeg");
    }

    // Sign-in / cookies required
    if stderr_lower.contains("sign in")
        || stderr_lower.contains("login")
        || stderr_lower.contains("cookies")
        || stderr_lower.contains("age-restricted")
    {
        return DownloadFailure::new(
            ErrorCode::LoginRequired,
            "This content requires sign-in. Import cookies from your browser and retry.",
        )
        .with_action(ActionKind::ImportCookies, "Import cookies from browser");
    }

    // Bot check / CAPTCHA
    if stderr_lower.contains("bot")
        || stderr_lower.contains("captcha")
        || stderr_lower.contains("confirm you're not")
    {
        return DownloadFailure::new(
            ErrorCode::BotCheck,
            "The site requires verification. Import cookies from a logged-in browser session.",
        )
        .with_action(ActionKind::ImportCookies, "Import cookies from browser");
    }

    if stderr_lower.contains("not available in your country")
        || stderr_lower.contains("geo")
        || stderr_lower.contains("blocked")
    {
        return DownloadFailure::new(
            ErrorCode::GeoRestricted,
            "This content is not available in your region.",
        )
        .with_action(ActionKind::ConfigureProxy, "Configure a proxy");
    }

    if stderr_lower.contains("is not a valid url") || stderr_lower.contains("unsupported url") {
        return DownloadFailure::new(ErrorCode::InvalidUrl, "This URL is not supported.");
    }

    if stderr_lower.contains("no video formats") || stderr_lower.contains("extractor") {
        return DownloadFailure::new(
            ErrorCode::ExtractorOutdated,
            "The downloader engine may be outdated for this site.",
        )
        .with_action(ActionKind::UpdateYtDlp, "Update yt-dlp")
        .with_action(ActionKind::Retry, "Retry");
    }

    if stderr_lower.contains("requested format") || stderr_lower.contains("format not available") {
        return DownloadFailure::new(
            ErrorCode::FormatUnavailable,
            "The requested format is not available for this content.",
        )
        .with_action(ActionKind::ChooseOtherFormat, "Pick another quality or audio track");
    }

    if stderr_lower.contains("postprocessing") || stderr_lower.contains("conversion failed") {
        return DownloadFailure::new(
            ErrorCode::PostProcessingFailed,
            "The download finished but post-processing failed.",
        )
        .with_action(ActionKind::CheckTools, "Run `tubediary doctor`");
    }

    if stderr_lower.contains("network")
        || stderr_lower.contains("connection")
        || stderr_lower.contains("timeout")
        || stderr_lower.contains("timed out")
    {
        return DownloadFailure::new(
            ErrorCode::Network,
            "Network error occurred. Check your connection and retry.",
        )
        .with_action(ActionKind::Retry, "Retry");
    }

    let message = if stderr.trim().is_empty() {
        "Download failed with unknown error.".to_string()
    } else if stderr.chars().count() > 200 {
        let head: String = stderr.chars().take(200).collect();
        format!("Download failed: {head}...")
    } else {
        format!("Download failed: {stderr}")
    };

    DownloadFailure::new(ErrorCode::Unknown, message).with_action(ActionKind::Retry, "Retry")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> DownloadConfig {
        DownloadConfig {
            yt_dlp_path: PathBuf::from("yt-dlp"),
            ffmpeg_path: None,
            video_output: "videos/%(title)s [%(height)sp].%(ext)s".to_string(),
            subtitle_output: "videos/SRT/%(title)s (Subtitle).%(ext)s".to_string(),
            merge_output_format: "mp4".to_string(),
            subtitle_format: "srt".to_string(),
        }
    }

    fn arg_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn test_parse_percent() {
        assert_eq!(parse_percent("50.5%"), Some(50.5));
        assert_eq!(parse_percent("100%"), Some(100.0));
        assert_eq!(parse_percent("N/A"), None);
    }

    #[test]
    fn test_parse_speed() {
        assert_eq!(parse_speed("1.5MiB/s"), Some(1572864));
        assert_eq!(parse_speed("500KiB/s"), Some(512000));
        assert_eq!(parse_speed("N/A"), None);
    }

    #[test]
    fn test_parse_eta() {
        assert_eq!(parse_eta("30"), Some(30));
        assert_eq!(parse_eta("05:30"), Some(330));
        assert_eq!(parse_eta("01:05:30"), Some(3930));
        assert_eq!(parse_eta("N/A"), None);
    }

    #[test]
    fn test_parse_bytes() {
        assert_eq!(parse_bytes("2.00GiB"), Some(2 * 1024 * 1024 * 1024));
        assert_eq!(parse_bytes("512B"), Some(512));
        assert_eq!(parse_bytes(""), None);
    }

    #[test]
    fn test_video_args() {
        let downloader = Downloader::new(test_config());
        let args = downloader.build_args(&DownloadRequest::video(
            "https://www.youtube.com/watch?v=abc",
            "bestvideo[height<=1080]+bestaudio/best[height<=1080]",
        ));
        assert_eq!(
            arg_after(&args, "-f"),
            Some("bestvideo[height<=1080]+bestaudio/best[height<=1080]")
        );
        assert_eq!(arg_after(&args, "--merge-output-format"), Some("mp4"));
        assert_eq!(
            arg_after(&args, "-o"),
            Some("videos/%(title)s [%(height)sp].%(ext)s")
        );
        assert!(!args.contains(&"--skip-download".to_string()));
        assert_eq!(
            args.last().map(String::as_str),
            Some("https://www.youtube.com/watch?v=abc")
        );
    }

    #[test]
    fn test_subtitle_args() {
        let mut config = test_config();
        config.ffmpeg_path = Some(PathBuf::from("/opt/ffmpeg"));
        let downloader = Downloader::new(config);

        let manual = downloader.build_args(&DownloadRequest::subtitle("u", "en", false));
        assert!(manual.contains(&"--skip-download".to_string()));
        assert!(manual.contains(&"--write-subs".to_string()));
        assert!(!manual.contains(&"--write-auto-subs".to_string()));
        assert_eq!(arg_after(&manual, "--sub-langs"), Some("en"));
        assert_eq!(arg_after(&manual, "--sub-format"), Some("srt/best"));
        assert_eq!(arg_after(&manual, "--convert-subs"), Some("srt"));
        assert_eq!(
            arg_after(&manual, "-o"),
            Some("videos/SRT/%(title)s (Subtitle).%(ext)s")
        );
        assert_eq!(arg_after(&manual, "--ffmpeg-location"), Some("/opt/ffmpeg"));

        let auto = downloader.build_args(&DownloadRequest::subtitle("u", "de", true));
        assert!(auto.contains(&"--write-auto-subs".to_string()));
        assert!(!auto.contains(&"--write-subs".to_string()));
    }

    #[test]
    fn test_parser_progress_lines() {
        let mut parser = OutputParser::new();
        let events = parser.parse_line("[tubediary]  42.0% 1.50MiB/s 00:30 100.00MiB");
        assert_eq!(
            events,
            vec![DownloadEvent::Progress(Progress {
                percent: Some(42.0),
                bytes_total: Some(104857600),
                speed_bps: Some(1572864),
                eta_seconds: Some(30),
                phase: Some("Downloading".to_string()),
            })]
        );

        // Below the reporting threshold.
        assert!(parser.parse_line("[tubediary]  42.2% 1.50MiB/s 00:29 100.00MiB").is_empty());

        let events = parser.parse_line("[download]  80.0% of ~ 10.00MiB at 2.00MiB/s ETA 00:01");
        match events.as_slice() {
            [DownloadEvent::Progress(p)] => {
                assert_eq!(p.percent, Some(80.0));
                assert_eq!(p.bytes_total, Some(10485760));
                assert_eq!(p.eta_seconds, Some(1));
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[test]
    fn test_parser_final_path_prefers_merged_file() {
        let mut parser = OutputParser::new();
        parser.parse_line("[download] Destination: videos/Talk [1080p].f137.mp4");
        assert_eq!(
            parser.final_path().as_deref(),
            Some("videos/Talk [1080p].f137.mp4")
        );
        parser.parse_line("[download] Destination: videos/Talk [1080p].f140.m4a");

        let events =
            parser.parse_line(r#"[Merger] Merging formats into "videos/Talk [1080p].mp4""#);
        assert_eq!(
            events,
            vec![DownloadEvent::PostProcessing {
                step: "Merging streams".to_string()
            }]
        );
        assert_eq!(parser.final_path().as_deref(), Some("videos/Talk [1080p].mp4"));

        // Cleanup lines do not change the path.
        parser.parse_line("Deleting original file videos/Talk [1080p].f137.mp4");
        assert_eq!(parser.final_path().as_deref(), Some("videos/Talk [1080p].mp4"));
    }

    #[test]
    fn test_parser_already_downloaded_and_subtitles() {
        let mut parser = OutputParser::new();
        parser.parse_line("[download] videos/Old.mp4 has already been downloaded");
        assert_eq!(parser.final_path().as_deref(), Some("videos/Old.mp4"));

        let mut parser = OutputParser::new();
        parser.parse_line("[info] Writing video subtitles to: videos/SRT/Talk (Subtitle).en.vtt");
        let events = parser.parse_line(
            "[SubtitlesConvertor] Converting subtitles",
        );
        assert_eq!(
            events,
            vec![DownloadEvent::PostProcessing {
                step: "Converting subtitles".to_string()
            }]
        );
        assert_eq!(
            parser.final_path().as_deref(),
            Some("videos/SRT/Talk (Subtitle).en.vtt")
        );
    }

    #[test]
    fn test_classify_error_login() {
        let failure = classify_error("ERROR: Sign in to confirm your age");
        assert_eq!(failure.code, ErrorCode::LoginRequired);
        assert_eq!(failure.actions[0].kind, ActionKind::ImportCookies);
    }

    #[test]
    fn test_classify_error_geo() {
        let failure = classify_error("Video not available in your country");
        assert_eq!(failure.code, ErrorCode::GeoRestricted);
    }

    #[test]
    fn test_classify_error_format_and_ffmpeg() {
        let failure = classify_error("ERROR: [youtube] abc: Requested format is not available");
        assert_eq!(failure.code, ErrorCode::FormatUnavailable);

        let failure = classify_error("ERROR: ffmpeg is not installed. Aborting due to --abort-on-error");
        assert_eq!(failure.code, ErrorCode::ToolMissing);
    }

    #[test]
    fn test_classify_error_unknown_truncates_on_char_boundary() {
        let failure = classify_error(&"é".repeat(300));
        assert_eq!(failure.code, ErrorCode::Unknown);
        assert!(failure.message.ends_with("..."));
        assert_eq!(failure.message.chars().filter(|c| *c == 'é').count(), 200);
    }

    #[tokio::test]
    async fn test_missing_binary_reports_tool_missing() {
        let mut config = test_config();
        config.yt_dlp_path = PathBuf::from("/definitely/not/here/yt-dlp");
        let downloader = Downloader::new(config);
        let (tx, mut rx) = mpsc::channel(8);

        let failure = downloader
            .download(&DownloadRequest::video("u", "best"), tx)
            .await
            .unwrap_err();
        assert_eq!(failure.code, ErrorCode::ToolMissing);
        assert!(matches!(rx.recv().await, Some(DownloadEvent::Failed(_))));
    }

    #[test]
    fn test_take_line_replaces_invalid_utf8() {
        let mut buf = b"[download] Destination: Caf\xe9.mp4\r\n".to_vec();
        assert_eq!(take_line(&mut buf), "[download] Destination: Caf\u{FFFD}.mp4");
        assert!(buf.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_utf8_output_still_reports_final_path() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("yt-dlp");
        std::fs::write(
            &script,
            "#!/bin/sh\n\
             printf '[download] Destination: Caf\\351.f137.mp4\\n'\n\
             printf '[Merger] Merging formats into \"Caf\\351.mp4\"\\n'\n\
             exit 0\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut config = test_config();
        config.yt_dlp_path = script;
        let downloader = Downloader::new(config);
        let (tx, mut rx) = mpsc::channel(32);

        let final_path = downloader
            .download(&DownloadRequest::video("u", "best"), tx)
            .await
            .unwrap();
        assert_eq!(final_path.as_deref(), Some("Caf\u{FFFD}.mp4"));

        let mut completed = false;
        while let Some(event) = rx.recv().await {
            if let DownloadEvent::Completed { final_path } = event {
                completed = final_path.is_some();
            }
        }
        assert!(completed);
    }
}
