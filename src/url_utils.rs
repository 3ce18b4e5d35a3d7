use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use url::Url;

const WATCH_URL_PREFIX: &str = "https://www.youtube.com/watch?v=";

fn url_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"https?://[^\s]+").ok()).as_ref()
}

fn video_id_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{11}$").ok())
        .as_ref()
}

/// Turn user input into the URL handed to yt-dlp.
///
/// Accepts a bare 11-character video id, a URL, or text containing a URL
/// (the first one wins). Returns `None` when nothing usable is found.
pub fn canonical_input(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if let Some(url) = expand_video_id(trimmed) {
        return Some(url);
    }
    extract_urls(trimmed).into_iter().next()
}

/// `dQw4w9WgXcQ` -> `https://www.youtube.com/watch?v=dQw4w9WgXcQ`.
pub fn expand_video_id(input: &str) -> Option<String> {
    let re = video_id_re()?;
    if re.is_match(input) {
        Some(format!("{WATCH_URL_PREFIX}{input}"))
    } else {
        None
    }
}

/// Extracts URLs from arbitrary text (e.g. multi-paste).
///
/// Behavior:
/// - Finds `http://` and `https://` URLs in the input, regardless of separators
/// - Trims common trailing punctuation like `)` `]` `,` `.`
/// - Normalizes URLs (host lowercasing, removes default ports, strips fragments)
/// - De-duplicates while preserving original order
pub fn extract_urls(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    if text.trim().is_empty() {
        return out;
    }

    let Some(re) = url_re() else {
        return out;
    };

    for m in re.find_iter(text) {
        let cleaned = trim_trailing_punct(m.as_str());
        if cleaned.is_empty() {
            continue;
        }

        if let Some(normalized) = normalize_http_url(cleaned) {
            if seen.insert(normalized.clone()) {
                out.push(normalized);
            }
        }
    }

    out
}

/// Normalize a presumed http(s) URL.
///
/// - Only accepts http/https
/// - Lowercases the host (`Url` already lowercases the scheme)
/// - Removes fragments (`#t=10` is meaningless for a download)
/// - Removes default ports
/// - Preserves path and query
pub fn normalize_http_url(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    let mut url = Url::parse(trimmed).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }

    url.set_fragment(None);

    if let Some(host) = url.host_str() {
        let lower = host.to_ascii_lowercase();
        if lower != host {
            url.set_host(Some(&lower)).ok()?;
        }
    }

    let is_default_port = matches!(
        (url.scheme(), url.port()),
        ("http", Some(80)) | ("https", Some(443))
    );
    if is_default_port {
        let _ = url.set_port(None);
    }

    Some(url.to_string())
}

/// Trim common trailing punctuation which frequently appears in pasted text.
///
/// Example: `https://example.com/foo),` -> `https://example.com/foo`
fn trim_trailing_punct(s: &str) -> &str {
    s.trim_end_matches(|ch: char| {
        matches!(
            ch,
            ')' | ']' | '}' | '>' | ',' | '.' | ';' | ':' | '!' | '?' | '"' | '\''
        )
    })
}
