//! Path Resolver
//!
//! Maps a possibly-stale recorded file path to the file currently on disk.
//! Downloads get remuxed (`.webm` -> `.mkv`), converted (`.vtt` -> `.srt`) or
//! lose the `.f137`-style stream suffix after merging, so the path written at
//! download time is often not the path that exists later.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

/// Extensions probed, in order, when the recorded path is gone.
pub const PROBE_EXTENSIONS: [&str; 5] = ["mp4", "mkv", "webm", "avi", "srt"];

fn stream_suffix_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\.f\d+$").ok()).as_ref()
}

/// Locate the real file for `recorded`.
///
/// - absent/empty input -> `None`
/// - existing path -> unchanged
/// - otherwise probe [`PROBE_EXTENSIONS`] on the stem, then on the stem with a
///   trailing stream-format suffix removed
/// - nothing found -> the input unchanged; callers must check existence
pub fn resolve(recorded: Option<&str>) -> Option<String> {
    let raw = recorded?;
    if raw.is_empty() {
        return None;
    }

    let path = Path::new(raw);
    if path.exists() {
        return Some(raw.to_string());
    }

    let stem = strip_extension(path);
    if let Some(found) = probe(&stem) {
        return Some(found);
    }

    if let Some(cleaned) = strip_stream_suffix(&stem) {
        if let Some(found) = probe(&cleaned) {
            log::debug!("resolved {} via stream-suffix strip", raw);
            return Some(found);
        }
    }

    Some(raw.to_string())
}

/// `resolve` for callers that only want paths that exist right now.
pub fn resolve_existing(recorded: Option<&str>) -> Option<PathBuf> {
    resolve(recorded)
        .map(PathBuf::from)
        .filter(|p| p.exists())
}

/// Path with its final extension removed, as a string (`a/b.f1.mp4` -> `a/b.f1`).
fn strip_extension(path: &Path) -> String {
    match path.extension() {
        Some(_) => path.with_extension("").to_string_lossy().into_owned(),
        None => path.to_string_lossy().into_owned(),
    }
}

/// Remove a trailing `.f<digits>` from `stem`. `None` if there was none.
pub fn strip_stream_suffix(stem: &str) -> Option<String> {
    let cleaned = stream_suffix_re()?.replace(stem, "");
    if cleaned.len() == stem.len() {
        None
    } else {
        Some(cleaned.into_owned())
    }
}

fn probe(stem: &str) -> Option<String> {
    PROBE_EXTENSIONS
        .iter()
        .map(|ext| format!("{stem}.{ext}"))
        .find(|candidate| Path::new(candidate).exists())
}
