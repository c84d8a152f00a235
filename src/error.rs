use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("failed to enumerate formats: {0}")]
    FormatQuery(String),

    #[error("yt-dlp is required. Install it with `winget install yt-dlp.yt-dlp` or `pip install -U yt-dlp`")]
    EngineMissing,

    #[error("engine failed: {0}")]
    Engine(String),

    #[error("download failed ({kind}): {message}")]
    Download { kind: FailureKind, message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Terminal failure classification for one download target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Network,
    FormatUnavailable,
    Permission,
    Unknown,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Network => "network",
            FailureKind::FormatUnavailable => "format-unavailable",
            FailureKind::Permission => "permission",
            FailureKind::Unknown => "unknown",
        }
    }

    /// Only network failures are worth re-running as a new batch.
    pub fn retriable(self) -> bool {
        matches!(self, FailureKind::Network)
    }

    /// Maps yt-dlp stderr onto the failure taxonomy by substring.
    pub fn classify(stderr: &str) -> Self {
        let lower = stderr.to_ascii_lowercase();

        if lower.contains("http error 403")
            || lower.contains("forbidden")
            || lower.contains("sign in to confirm")
            || lower.contains("login required")
            || lower.contains("private video")
            || lower.contains("copyright")
            || (lower.contains("geo") && lower.contains("block"))
        {
            return FailureKind::Permission;
        }

        if (lower.contains("requested format") && lower.contains("not available"))
            || lower.contains("no video formats")
            || lower.contains("format is not available")
        {
            return FailureKind::FormatUnavailable;
        }

        if lower.contains("timed out")
            || lower.contains("timeout")
            || lower.contains("http error 429")
            || lower.contains("http error 5")
            || lower.contains("connection reset")
            || lower.contains("connection refused")
            || lower.contains("unable to connect")
            || lower.contains("temporary failure in name resolution")
            || lower.contains("network is unreachable")
            || lower.contains("unable to download webpage")
            || lower.contains("ssl")
        {
            return FailureKind::Network;
        }

        FailureKind::Unknown
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
