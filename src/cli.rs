//! Command-line front end: fetch, download and browse the download diary.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::catalog::Catalog;
use crate::download_manager::{DownloadConfig, DownloadRequest, Downloader};
use crate::events::{DownloadEvent, Progress};
use crate::formats::{self, BEST_AUDIO, BEST_VIDEO};
use crate::models::{CatalogEntry, DownloadRecord, LibraryEntry};
use crate::settings::{AppSettings, SettingsManager};
use crate::tool_manager::{ToolInfo, ToolManager, ToolManagerConfig, ToolStatus};
use crate::url_utils;
use crate::ytdlp::{MediaInfo, YtDlpConfig, YtDlpRunner};

const UNKNOWN: &str = "Unknown";
const SUBTITLE_DESCRIPTION: &str = "Subtitle File";

#[derive(Debug, Parser)]
#[command(name = "tubediary")]
#[command(version, about = "Fetch, download and keep a diary of videos via yt-dlp", long_about = None)]
pub struct Cli {
    /// Directory holding download_history.json (overrides settings)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Folder downloads are written to (overrides settings)
    #[arg(long, global = true)]
    pub download_dir: Option<PathBuf>,

    /// Settings file to use instead of the per-user default
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Print machine-readable JSON where supported
    #[arg(long, global = true)]
    pub json: bool,

    /// Log at info level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show metadata and the available quality, audio and subtitle choices
    Info {
        /// Video URL or 11-character video id
        url: String,
    },

    /// Download a video and record it in the diary
    Download {
        /// Video URL or 11-character video id
        url: String,

        /// Format id or height such as 720p ("best" for the highest allowed)
        #[arg(short, long, default_value = BEST_VIDEO)]
        quality: String,

        /// Audio format id ("bestaudio" for the default track)
        #[arg(short, long, default_value = BEST_AUDIO)]
        audio: String,
    },

    /// Download one subtitle track as SRT and record it in the diary
    Subs {
        /// Video URL or 11-character video id
        url: String,

        /// Subtitle language code (defaults to the configured language)
        #[arg(short, long)]
        lang: Option<String>,

        /// Use auto-generated captions
        #[arg(long)]
        auto: bool,
    },

    /// List diary entries, oldest first
    List,

    /// Print every distinct URL in the diary
    Urls,

    /// Show one entry with its resolved file paths
    Show {
        /// Entry id or a unique prefix of it
        id: String,
    },

    /// Delete an entry and its files
    Remove {
        /// Entry id or a unique prefix of it
        id: String,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Print the file a recorded path currently resolves to
    Resolve {
        path: String,
    },

    /// Open an entry's video (or subtitles) with the default application
    Open {
        /// Entry id or a unique prefix of it
        id: String,

        /// Open the subtitle file instead of the video
        #[arg(long)]
        subtitles: bool,
    },

    /// Open an entry's source page, or a URL/video id, in the browser
    Browse {
        /// Entry id, URL or video id
        target: String,
    },

    /// Remove every entry (files are kept)
    Clear {
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Library totals: videos present, their size, subtitle files present
    Stats,

    /// Check that yt-dlp and ffmpeg are available
    Doctor,

    /// Inspect or write the settings file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Print the effective settings
    Show,
    /// Print the settings file location
    Path,
    /// Write the effective settings (including overrides) to the settings file
    Save,
}

/// Everything a command handler needs.
struct App {
    settings: AppSettings,
    catalog: Catalog,
    tools: ToolManager,
    json: bool,
}

impl App {
    fn runner(&self) -> YtDlpRunner {
        let cfg = YtDlpConfig::new(self.tools.yt_dlp_path())
            .with_metadata_timeout(self.settings.tools.metadata_timeout());
        YtDlpRunner::new(cfg)
    }

    fn downloader(&self) -> Downloader {
        Downloader::new(DownloadConfig::from_settings(
            &self.settings,
            self.tools.yt_dlp_path(),
            self.tools.ffmpeg_path(),
        ))
    }
}

/// Run the parsed command.
pub async fn execute(cli: Cli) -> Result<()> {
    let manager = match &cli.config {
        Some(path) => SettingsManager::new(path.clone()),
        None => SettingsManager::at_default_location()?,
    };

    let mut settings = manager.load();
    if let Some(dir) = cli.data_dir {
        settings = settings.with_storage_dir(dir);
    }
    if let Some(dir) = cli.download_dir {
        settings = settings.with_download_folder(dir);
    }

    if let Commands::Config { action } = &cli.command {
        return config_command(action, &manager, &settings);
    }

    let catalog = Catalog::open(settings.storage.storage_dir.clone()).with_context(|| {
        format!(
            "cannot open the download diary in {}",
            settings.storage.storage_dir.display()
        )
    })?;
    let tools = ToolManager::new(ToolManagerConfig::from_settings(&settings.tools));

    let app = App {
        settings,
        catalog,
        tools,
        json: cli.json,
    };

    match cli.command {
        Commands::Info { url } => info(&app, &url).await,
        Commands::Download {
            url,
            quality,
            audio,
        } => download_video(&app, &url, &quality, &audio).await,
        Commands::Subs { url, lang, auto } => download_subtitles(&app, &url, lang, auto).await,
        Commands::List => list(&app).await,
        Commands::Urls => {
            for url in app.catalog.list_known_urls().await {
                println!("{url}");
            }
            Ok(())
        }
        Commands::Show { id } => show(&app, &id).await,
        Commands::Remove { id, yes } => remove(&app, &id, yes).await,
        Commands::Resolve { path } => {
            match app.catalog.resolve_display_path(Some(&path)) {
                Some(resolved) if Path::new(&resolved).exists() => println!("{resolved}"),
                Some(resolved) => println!("{resolved} (missing)"),
                None => bail!("empty path"),
            }
            Ok(())
        }
        Commands::Open { id, subtitles } => open_entry(&app, &id, subtitles).await,
        Commands::Browse { target } => browse(&app, &target).await,
        Commands::Clear { yes } => clear(&app, yes).await,
        Commands::Stats => stats(&app).await,
        Commands::Doctor => doctor(&app).await,
        Commands::Config { .. } => Ok(()),
    }
}

fn config_command(
    action: &ConfigAction,
    manager: &SettingsManager,
    settings: &AppSettings,
) -> Result<()> {
    match action {
        ConfigAction::Show => print_json(settings),
        ConfigAction::Path => {
            println!("{}", manager.path().display());
            Ok(())
        }
        ConfigAction::Save => {
            manager.save(settings)?;
            println!("Saved settings to {}", manager.path().display());
            Ok(())
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{json}");
    Ok(())
}

async fn fetch(app: &App, input: &str) -> Result<(String, MediaInfo)> {
    let url = url_utils::canonical_input(input)
        .ok_or_else(|| anyhow!("not a video URL or id: {input}"))?;
    let (info, _output) = app
        .runner()
        .fetch_media_info(&url)
        .await
        .with_context(|| format!("yt-dlp metadata failed for {url}"))?;
    Ok((url, info))
}

#[derive(Serialize)]
struct InfoOutput<'a> {
    info: &'a MediaInfo,
    video: Vec<formats::VideoChoice>,
    audio: Vec<formats::AudioChoice>,
    subtitles: Vec<formats::SubtitleChoice>,
}

async fn info(app: &App, input: &str) -> Result<()> {
    let (_url, info) = fetch(app, input).await?;
    let max_height = app.settings.downloads.max_video_height;
    let output = InfoOutput {
        info: &info,
        video: formats::video_choices(&info.formats, max_height),
        audio: formats::audio_choices(&info.formats),
        subtitles: formats::subtitle_choices(&info.subtitles, &info.automatic_captions),
    };
    if app.json {
        return print_json(&output);
    }

    println!("{}", info.title.as_deref().unwrap_or(UNKNOWN));
    match (&info.uploader, &info.uploader_url) {
        (Some(name), Some(link)) => println!("by {name} <{link}>"),
        (Some(name), None) => println!("by {name}"),
        (None, _) => println!("by {UNKNOWN}"),
    }
    if let Some(secs) = info.duration_seconds {
        println!("duration {}", format_duration(secs));
    }
    if let Some(desc) = info.description.as_deref().filter(|d| !d.is_empty()) {
        println!();
        println!("{desc}");
    }

    println!("\nQuality (--quality):");
    for choice in &output.video {
        println!("  {:<10} {}", choice.id, choice.label);
    }
    println!("\nAudio (--audio):");
    for choice in &output.audio {
        println!("  {:<10} {}", choice.id, choice.label);
    }
    if output.subtitles.is_empty() {
        println!("\nNo CC available");
    } else {
        println!("\nSubtitles (subs --lang CODE [--auto]):");
        for choice in &output.subtitles {
            let auto = if choice.auto { " --auto" } else { "" };
            println!("  {:<16} {}", format!("{}{auto}", choice.code), choice.label);
        }
    }
    Ok(())
}

async fn download_video(app: &App, input: &str, quality: &str, audio: &str) -> Result<()> {
    let (url, info) = fetch(app, input).await?;
    let max_height = app.settings.downloads.max_video_height;

    let videos = formats::video_choices(&info.formats, max_height);
    let video = videos.iter().find(|c| c.matches(quality)).ok_or_else(|| {
        anyhow!(
            "quality '{quality}' is not available; choose one of: {}",
            videos.iter().map(|c| c.id.as_str()).collect::<Vec<_>>().join(", ")
        )
    })?;
    let audios = formats::audio_choices(&info.formats);
    let track = audios.iter().find(|c| c.id == audio).ok_or_else(|| {
        anyhow!(
            "audio track '{audio}' is not available; choose one of: {}",
            audios.iter().map(|c| c.id.as_str()).collect::<Vec<_>>().join(", ")
        )
    })?;

    let selector = formats::format_selector(&video.id, &track.id, max_height);
    let request = DownloadRequest::video(url.clone(), selector);
    let Some(path) = run_download(app, &request).await? else {
        log::warn!("yt-dlp did not report an output file for {url}");
        bail!("download finished but no output file was reported; nothing recorded");
    };

    let record = DownloadRecord::new(info.title.as_deref().unwrap_or(UNKNOWN), url)
        .creator(info.uploader.as_deref().unwrap_or(UNKNOWN))
        .description(info.description.as_deref().unwrap_or_default())
        .format(formats::video_format_description(&video.label, &track.label))
        .video_path(path.clone());
    let entry = app.catalog.record_download(record).await?;
    println!("Saved to: {path}");
    log::info!("Recorded {} as entry {}", entry.url, entry.id);
    Ok(())
}

async fn download_subtitles(
    app: &App,
    input: &str,
    lang: Option<String>,
    auto: bool,
) -> Result<()> {
    let (url, info) = fetch(app, input).await?;
    let code = lang.unwrap_or_else(|| app.settings.subtitles.default_language.clone());

    let choices = formats::subtitle_choices(&info.subtitles, &info.automatic_captions);
    let matching = |want_auto: bool| {
        choices
            .iter()
            .find(|c| c.code == code && c.auto == want_auto)
    };
    // Without --auto an authored track is preferred, auto captions are the fallback.
    let choice = if auto {
        matching(true)
    } else {
        matching(false).or_else(|| matching(true))
    };
    let Some(choice) = choice else {
        let available: Vec<String> = choices
            .iter()
            .map(|c| if c.auto { format!("{} (auto)", c.code) } else { c.code.clone() })
            .collect();
        if available.is_empty() {
            bail!("no subtitles available for {url}");
        }
        bail!(
            "no {}subtitles for '{code}'; available: {}",
            if auto { "auto-generated " } else { "" },
            available.join(", ")
        );
    };

    let request = DownloadRequest::subtitle(url.clone(), choice.code.clone(), choice.auto);
    let Some(path) = run_download(app, &request).await? else {
        log::warn!("yt-dlp did not report a subtitle file for {url}");
        bail!("download finished but no subtitle file was reported; nothing recorded");
    };

    let record = DownloadRecord::new(info.title.as_deref().unwrap_or(UNKNOWN), url)
        .creator(info.uploader.as_deref().unwrap_or(UNKNOWN))
        .description(SUBTITLE_DESCRIPTION)
        .format(formats::subtitle_format_description(&choice.code, choice.auto))
        .srt_path(path.clone());
    app.catalog.record_download(record).await?;

    let shown = app
        .catalog
        .resolve_display_path(Some(&path))
        .unwrap_or(path);
    println!("Saved to: {shown}");
    Ok(())
}

/// Run a download while rendering its events to stderr.
async fn run_download(app: &App, request: &DownloadRequest) -> Result<Option<String>> {
    let (tx, rx) = mpsc::channel(64);
    let printer = tokio::spawn(render_events(rx));
    let result = app.downloader().download(request, tx).await;
    let _ = printer.await;

    match result {
        Ok(path) => Ok(path),
        Err(failure) => {
            for action in &failure.actions {
                eprintln!("hint: {}", action.label);
            }
            Err(failure.into())
        }
    }
}

async fn render_events(mut rx: mpsc::Receiver<DownloadEvent>) {
    let mut mid_line = false;
    while let Some(event) = rx.recv().await {
        match event {
            DownloadEvent::Started { url } => eprintln!("Downloading {url}"),
            DownloadEvent::Progress(progress) => {
                eprint!("\r{:<60}", progress_summary(&progress));
                mid_line = true;
            }
            DownloadEvent::PostProcessing { step } => {
                if std::mem::take(&mut mid_line) {
                    eprintln!();
                }
                eprintln!("{step}...");
            }
            DownloadEvent::Completed { .. } | DownloadEvent::Failed(_) => {
                if std::mem::take(&mut mid_line) {
                    eprintln!();
                }
            }
        }
    }
}

fn progress_summary(progress: &Progress) -> String {
    let mut parts = vec![match progress.percent {
        Some(p) => format!("{p:5.1}%"),
        None => "  ?  %".to_string(),
    }];
    if let Some(total) = progress.bytes_total {
        parts.push(format!("of {}", format_bytes(total)));
    }
    if let Some(speed) = progress.speed_bps {
        parts.push(format!("at {}/s", format_bytes(speed)));
    }
    if let Some(eta) = progress.eta_seconds {
        parts.push(format!("ETA {}", format_duration(eta)));
    }
    parts.join(" ")
}

/// Pick the entry whose id equals `query`, else the single one starting with it.
async fn find_entry(catalog: &Catalog, query: &str) -> Result<CatalogEntry> {
    if let Some(entry) = catalog.find_entry(query).await {
        return Ok(entry);
    }
    let mut candidates: Vec<CatalogEntry> = catalog
        .list_entries()
        .await
        .into_iter()
        .filter(|e| !query.is_empty() && e.id.starts_with(query))
        .collect();
    match candidates.len() {
        0 => bail!("no entry with id '{query}'"),
        1 => Ok(candidates.remove(0)),
        n => bail!("id prefix '{query}' matches {n} entries"),
    }
}

async fn library_entry(app: &App, query: &str) -> Result<LibraryEntry> {
    let entry = find_entry(&app.catalog, query).await?;
    app.catalog
        .library()
        .await
        .entries
        .into_iter()
        .find(|item| item.entry.id == entry.id)
        .ok_or_else(|| anyhow!("entry '{}' disappeared", entry.id))
}

async fn list(app: &App) -> Result<()> {
    let library = app.catalog.library().await;
    if app.json {
        return print_json(&library.entries);
    }
    if library.entries.is_empty() {
        println!("The diary is empty.");
        return Ok(());
    }

    for item in &library.entries {
        let size = item
            .video_size_bytes
            .map(format_bytes)
            .unwrap_or_else(|| "N/A".to_string());
        let srt = if item.srt_exists { "SRT" } else { "-" };
        println!(
            "{}  {}  {:>10}  {:<3}  {}",
            short_id(&item.entry.id),
            item.entry.date,
            size,
            srt,
            item.entry.title
        );
    }
    Ok(())
}

async fn show(app: &App, query: &str) -> Result<()> {
    let item = library_entry(app, query).await?;
    if app.json {
        return print_json(&item);
    }

    let entry = &item.entry;
    println!("id:          {}", entry.id);
    println!("title:       {}", entry.title);
    println!("url:         {}", entry.url);
    println!("creator:     {}", entry.creator);
    println!("date:        {}", entry.date);
    println!("format:      {}", entry.format);
    println!("description: {}", entry.description);
    println!(
        "video:       {}",
        describe_path(item.video_path.as_deref(), item.video_exists)
    );
    println!(
        "subtitles:   {}",
        describe_path(item.srt_path.as_deref(), item.srt_exists)
    );
    Ok(())
}

fn describe_path(path: Option<&str>, exists: bool) -> String {
    match path {
        None => "-".to_string(),
        Some(p) if exists => p.to_string(),
        Some(p) => format!("{p} (missing)"),
    }
}

async fn remove(app: &App, query: &str, yes: bool) -> Result<()> {
    let entry = find_entry(&app.catalog, query).await?;
    if !yes
        && !confirm(&format!(
            "Delete \"{}\" and its files? [y/N] ",
            entry.title
        ))?
    {
        println!("Cancelled.");
        return Ok(());
    }

    if app.catalog.remove_entry(&entry.id).await? {
        println!("Entry deleted");
    } else {
        println!("Entry was already gone");
    }
    Ok(())
}

async fn clear(app: &App, yes: bool) -> Result<()> {
    if !yes && !confirm("Remove every diary entry? Files are kept. [y/N] ")? {
        println!("Cancelled.");
        return Ok(());
    }
    app.catalog.clear_all().await?;
    println!("Diary cleared");
    Ok(())
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt}");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

async fn open_entry(app: &App, query: &str, subtitles: bool) -> Result<()> {
    let item = library_entry(app, query).await?;
    let (path, exists) = if subtitles {
        (item.srt_path, item.srt_exists)
    } else {
        (item.video_path, item.video_exists)
    };

    let path = match path {
        Some(p) if exists => PathBuf::from(p),
        _ => bail!("The file no longer exists at the recorded location."),
    };
    open::that(&path).with_context(|| format!("Failed to open {}", path.display()))
}

async fn browse(app: &App, target: &str) -> Result<()> {
    let url = match url_utils::canonical_input(target) {
        Some(url) => url,
        None => find_entry(&app.catalog, target).await?.url,
    };
    open::that(&url).with_context(|| format!("Failed to open {url}"))
}

#[derive(Serialize)]
struct StatsOutput {
    entries: usize,
    videos: usize,
    total_video_bytes: u64,
    subtitles: usize,
}

async fn stats(app: &App) -> Result<()> {
    let library = app.catalog.library().await;
    let output = StatsOutput {
        entries: library.entries.len(),
        videos: library.video_count,
        total_video_bytes: library.total_video_bytes,
        subtitles: library.srt_count,
    };
    if app.json {
        return print_json(&output);
    }
    println!("Entries: {}", output.entries);
    println!("Videos:  {}", output.videos);
    println!("Size:    {}", format_bytes(output.total_video_bytes));
    println!("SRTs:    {}", output.subtitles);
    Ok(())
}

async fn doctor(app: &App) -> Result<()> {
    let status = app.tools.get_toolchain_status().await;
    if app.json {
        print_json(&status)?;
    } else {
        for info in [&status.yt_dlp, &status.ffmpeg] {
            println!("{}", describe_tool(info));
        }
        println!("diary:   {}", app.settings.storage.storage_dir.display());
        println!(
            "videos:  {}",
            app.settings.downloads.download_folder.display()
        );
    }

    match status.overall_status {
        ToolStatus::Ok => Ok(()),
        ToolStatus::Missing => bail!("yt-dlp was not found; install it or set tools.yt_dlp_path"),
        ToolStatus::Broken => bail!("some tools are missing or unhealthy"),
    }
}

fn describe_tool(info: &ToolInfo) -> String {
    let name = info.tool.as_str();
    match (&info.status, &info.path) {
        (ToolStatus::Missing, _) | (_, None) => format!("{name:<8} missing"),
        (ToolStatus::Broken, Some(path)) => {
            format!("{name:<8} broken ({})", path.display())
        }
        (ToolStatus::Ok, Some(path)) => format!(
            "{name:<8} {} ({})",
            info.version.as_deref().unwrap_or("?"),
            path.display()
        ),
    }
}

fn short_id(id: &str) -> &str {
    match id.char_indices().nth(8) {
        Some((cut, _)) => &id[..cut],
        None => id,
    }
}

/// Size in MB with one decimal, as shown in the library view.
fn format_bytes(bytes: u64) -> String {
    const MIB: f64 = 1024.0 * 1024.0;
    const GIB: f64 = MIB * 1024.0;
    let b = bytes as f64;
    if b >= GIB {
        format!("{:.2} GB", b / GIB)
    } else {
        format!("{:.1} MB", b / MIB)
    }
}

fn format_duration(secs: u64) -> String {
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{m}:{s:02}")
    }
}
