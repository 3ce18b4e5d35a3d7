//! tubediary: fetch video metadata, download media and subtitles through
//! yt-dlp, and keep a local JSON diary of what was downloaded.

use anyhow::Context;
use clap::Parser;

pub mod catalog;
pub mod cli;
pub mod download_manager;
pub mod error;
pub mod events;
pub mod formats;
pub mod models;
pub mod resolver;
pub mod settings;
pub mod store;
pub mod tool_manager;
pub mod url_utils;
pub mod ytdlp;

pub use catalog::Catalog;
pub use error::{CatalogError, CatalogResult};
pub use models::{CatalogEntry, DownloadRecord};

fn init_logging(verbose: bool) {
    let default_level = if verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .init();
}

// ============================================================================
// App Entry Point
// ============================================================================

pub fn run() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();
    init_logging(cli.verbose);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;

    runtime.block_on(cli::execute(cli))
}
