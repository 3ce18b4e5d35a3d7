use serde::Serialize;

/// A remediation the presentation layer can offer next to a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    ImportCookies,
    UpdateYtDlp,
    ConfigureProxy,
    ChooseOtherFormat,
    InstallFfmpeg,
    CheckTools,
    Retry,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Action {
    pub kind: ActionKind,
    pub label: String,
}

impl Action {
    pub fn new(kind: ActionKind, label: impl Into<String>) -> Self {
        Self {
            kind,
            label: label.into(),
        }
    }
}

/// Stable error codes for download failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Unknown,
    InvalidUrl,
    Network,
    GeoRestricted,
    LoginRequired,
    BotCheck,
    ExtractorOutdated,
    FormatUnavailable,
    ToolMissing,
    PostProcessingFailed,
}

/// Progress values are best-effort; any field may be None depending on what yt-dlp reports.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Progress {
    /// 0..=100 if known.
    pub percent: Option<f64>,
    pub bytes_total: Option<u64>,
    pub speed_bps: Option<u64>,
    pub eta_seconds: Option<u64>,
    /// Short human-readable phase, e.g. "Downloading".
    pub phase: Option<String>,
}

/// A failed download, classified for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{message}")]
pub struct DownloadFailure {
    pub code: ErrorCode,
    pub message: String,
    pub actions: Vec<Action>,
}

impl DownloadFailure {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            actions: vec![],
        }
    }

    pub fn with_action(mut self, kind: ActionKind, label: impl Into<String>) -> Self {
        self.actions.push(Action::new(kind, label));
        self
    }
}

/// Downloader -> presentation layer events, one stream per download.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum DownloadEvent {
    Started {
        url: String,
    },
    Progress(Progress),
    PostProcessing {
        step: String,
    },
    Completed {
        final_path: Option<String>,
    },
    Failed(DownloadFailure),
}
