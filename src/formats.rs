//! Quality, audio track and subtitle choices derived from fetched metadata,
//! plus the yt-dlp format selector built from a choice.

use std::collections::HashMap;
use std::collections::HashSet;

use serde::Serialize;

use crate::ytdlp::{FormatDescriptor, SubtitleFormat, SubtitleMap};

/// Choice id meaning "best video within the height cap".
pub const BEST_VIDEO: &str = "best";
/// Choice id meaning "best audio track".
pub const BEST_AUDIO: &str = "bestaudio";

const ORIGINAL_AUDIO: &str = "Original Audio";
const LIVE_CHAT: &str = "live_chat";

const LANG_MAP: [(&str, &str); 12] = [
    ("en", "English"),
    ("ko", "Korean"),
    ("es", "Spanish"),
    ("ja", "Japanese"),
    ("zh", "Chinese"),
    ("fr", "French"),
    ("de", "German"),
    ("hi", "Hindi"),
    ("ru", "Russian"),
    ("pt", "Portuguese"),
    ("it", "Italian"),
    ("ar", "Arabic"),
];

// "ultra-low" before "low" so the longer term is removed whole.
const NOTE_NOISE: [&str; 4] = ["ultra-low", "low", "medium", "high"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoChoice {
    /// yt-dlp format id, or [`BEST_VIDEO`].
    pub id: String,
    pub label: String,
    pub height: Option<u32>,
}

impl VideoChoice {
    /// Match by format id or by `<height>p`.
    pub fn matches(&self, query: &str) -> bool {
        self.id == query || self.height.is_some_and(|h| format!("{h}p") == query)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AudioChoice {
    /// yt-dlp format id, or [`BEST_AUDIO`].
    pub id: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubtitleChoice {
    pub code: String,
    pub label: String,
    /// Auto-generated captions rather than an authored track.
    pub auto: bool,
}

/// Video quality choices: a leading "best" choice, then one entry per height
/// (highest first) for formats with video at or below `max_height`.
/// `max_height == 0` disables the cap.
pub fn video_choices(formats: &[FormatDescriptor], max_height: u32) -> Vec<VideoChoice> {
    let mut candidates: Vec<(u32, &FormatDescriptor)> = formats
        .iter()
        .filter(|f| f.vcodec.as_deref() != Some("none"))
        .filter_map(|f| f.height.map(|h| (h, f)))
        .filter(|(h, _)| max_height == 0 || *h <= max_height)
        .collect();
    // Stable sort keeps yt-dlp's order within one height.
    candidates.sort_by(|a, b| b.0.cmp(&a.0));

    let best_label = match candidates.first() {
        Some((h, _)) => format!("Best Available ({h}p)"),
        None if max_height > 0 => format!("Best Available (Max {max_height}p)"),
        None => "Best Available".to_string(),
    };

    let mut choices = vec![VideoChoice {
        id: BEST_VIDEO.to_string(),
        label: best_label,
        height: candidates.first().map(|(h, _)| *h),
    }];

    let mut seen = HashSet::new();
    for (height, f) in candidates {
        if seen.insert(height) {
            choices.push(VideoChoice {
                id: f.format_id.clone(),
                label: format!("{height}p - {}", f.ext.as_deref().unwrap_or("?")),
                height: Some(height),
            });
        }
    }

    choices
}

/// Audio track choices: a leading "best" choice, then one entry per
/// (language, note) pair keeping the highest bitrate.
pub fn audio_choices(formats: &[FormatDescriptor]) -> Vec<AudioChoice> {
    let mut tracks: HashMap<(String, String), &FormatDescriptor> = HashMap::new();
    // First-seen order, so ties in the final sort stay deterministic.
    let mut order: Vec<(String, String)> = Vec::new();

    for f in formats.iter().filter(|f| f.is_audio_only()) {
        let key = (
            language_label(f.language.as_deref()),
            clean_note(f.format_note.as_deref()),
        );
        let replace = match tracks.get(&key) {
            Some(existing) => abr(f) > abr(existing),
            None => {
                order.push(key.clone());
                true
            }
        };
        if replace {
            tracks.insert(key, f);
        }
    }

    let mut sorted: Vec<&FormatDescriptor> =
        order.iter().filter_map(|k| tracks.get(k).copied()).collect();
    sorted.sort_by(|a, b| {
        let lang_a = a.language.as_deref().unwrap_or("und");
        let lang_b = b.language.as_deref().unwrap_or("und");
        lang_b
            .cmp(lang_a)
            .then_with(|| abr(b).total_cmp(&abr(a)))
    });

    let best_label = match sorted.first() {
        Some(f) => format!(
            "Default / Best Audio ({} - {} kbps)",
            language_label(f.language.as_deref()),
            abr(f) as u32
        ),
        None => "Default / Best Audio".to_string(),
    };

    let mut choices = vec![AudioChoice {
        id: BEST_AUDIO.to_string(),
        label: best_label,
    }];

    for f in sorted {
        let mut label = language_label(f.language.as_deref());
        let note = clean_note(f.format_note.as_deref());
        if !note.is_empty() {
            label.push_str(&format!(" ({note})"));
        }
        let kbps = abr(f) as u32;
        if kbps > 0 {
            label.push_str(&format!(" - {kbps} kbps"));
        }
        choices.push(AudioChoice {
            id: f.format_id.clone(),
            label,
        });
    }

    choices
}

fn abr(f: &FormatDescriptor) -> f64 {
    f.abr.unwrap_or(0.0)
}

/// Subtitle choices: authored tracks, then auto captions for languages with
/// no authored counterpart. English sorts first, the rest by label.
pub fn subtitle_choices(manual: &SubtitleMap, automatic: &SubtitleMap) -> Vec<SubtitleChoice> {
    let mut choices: Vec<SubtitleChoice> = manual
        .iter()
        .filter(|(code, _)| code.as_str() != LIVE_CHAT)
        .map(|(code, tracks)| SubtitleChoice {
            code: code.clone(),
            label: subtitle_label(code, tracks),
            auto: false,
        })
        .collect();

    for (code, tracks) in automatic {
        if code == LIVE_CHAT {
            continue;
        }
        let covered = manual
            .keys()
            .any(|m| m.contains(code.as_str()) || code.contains(m.as_str()));
        if !covered {
            choices.push(SubtitleChoice {
                code: code.clone(),
                label: format!("{} (auto-generated)", subtitle_label(code, tracks)),
                auto: true,
            });
        }
    }

    choices.sort_by(|a, b| {
        english_rank(&a.code, &a.label)
            .cmp(&english_rank(&b.code, &b.label))
            .then_with(|| a.label.cmp(&b.label))
    });
    choices
}

fn english_rank(code: &str, label: &str) -> i8 {
    let code = code.to_lowercase();
    let label = label.to_lowercase();
    if code == "en" || label == "english" {
        -2
    } else if code.contains("en") || label.contains("english") {
        -1
    } else {
        0
    }
}

/// Track name from the first rendition, `"English - English"` collapsed to
/// `"English"`; the code when there is no name.
fn subtitle_label(code: &str, tracks: &[SubtitleFormat]) -> String {
    let Some(name) = tracks.first().and_then(|t| t.name.as_deref()).filter(|n| !n.is_empty())
    else {
        return code.to_string();
    };
    let mut parts = name.split(" - ");
    if let (Some(first), Some(second)) = (parts.next(), parts.next()) {
        if first.trim() == second.trim() {
            return first.trim().to_string();
        }
    }
    name.to_string()
}

/// Human name for an audio language code (`en-US` -> `English`).
pub fn language_label(code: Option<&str>) -> String {
    let Some(code) = code.filter(|c| !c.is_empty()) else {
        return ORIGINAL_AUDIO.to_string();
    };
    let base = code.split('-').next().unwrap_or(code);
    if let Some((_, name)) = LANG_MAP.iter().find(|(c, _)| *c == base) {
        return (*name).to_string();
    }
    if code == "und" {
        ORIGINAL_AUDIO.to_string()
    } else {
        code.to_string()
    }
}

/// Strip bitrate tiers from a format note and title-case what remains.
///
/// `"original (default), low"` -> `"Original (Default)"`, `"medium"` -> `""`.
pub fn clean_note(note: Option<&str>) -> String {
    let Some(note) = note else {
        return String::new();
    };
    let mut n = note.to_lowercase();
    for term in NOTE_NOISE {
        n = n.replace(term, "");
    }
    title_case(n.trim_matches(|c| c == ',' || c == ' ').trim())
}

fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_alpha = false;
    for ch in s.chars() {
        if ch.is_alphabetic() {
            if prev_alpha {
                out.extend(ch.to_lowercase());
            } else {
                out.extend(ch.to_uppercase());
            }
            prev_alpha = true;
        } else {
            out.push(ch);
            prev_alpha = false;
        }
    }
    out
}

fn height_filter(max_height: u32) -> String {
    if max_height == 0 {
        String::new()
    } else {
        format!("[height<={max_height}]")
    }
}

/// yt-dlp `-f` selector for a video choice id and audio choice id.
///
/// Best audio keeps a single-file fallback; an explicit audio track does not,
/// since the fallback could pick a different language.
pub fn format_selector(video_id: &str, audio_id: &str, max_height: u32) -> String {
    let cap = height_filter(max_height);
    let video = if video_id == BEST_VIDEO {
        format!("bestvideo{cap}")
    } else {
        video_id.to_string()
    };

    if audio_id == BEST_AUDIO {
        format!("{video}+bestaudio/best{cap}")
    } else {
        format!("{video}+{audio_id}")
    }
}

/// Catalog `format` text for a video download.
pub fn video_format_description(video_label: &str, audio_label: &str) -> String {
    format!("Video: {video_label}, Audio: {audio_label}")
}

/// Catalog `format` text for a subtitle download.
pub fn subtitle_format_description(code: &str, auto: bool) -> String {
    if auto {
        format!("Subtitle ({code} auto)")
    } else {
        format!("Subtitle ({code})")
    }
}
