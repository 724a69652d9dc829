// Error types for the download client core

use std::fmt;

/// Errors surfaced by the catalog and the session controller.
///
/// Every variant carries a human-readable message that can be shown to the
/// user as-is in a notification. No variant is fatal: after reporting any of
/// these the client is back in a state where a new session can be started.
#[derive(Debug, Clone)]
pub enum ClientError {
    /// Input could not be recognized as a video URL or id
    InvalidInput(String),

    /// The service reported a domain error (bad URL, unavailable video, ...)
    Upstream(String),

    /// The requested format id is in neither variant list of the descriptor
    FormatNotFound(String),

    /// Session-slot conflict, missing selection, or wrong-state operation
    Precondition(String),

    /// The request/response exchange itself failed
    Transport(String),

    /// The finished artifact could not be transferred
    Delivery(String),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            Self::Upstream(msg) => write!(f, "{}", msg),
            Self::FormatNotFound(id) => write!(
                f,
                "Format \"{}\" is not available for this video. Please select another format.",
                id
            ),
            Self::Precondition(msg) => write!(f, "{}", msg),
            Self::Transport(msg) => write!(f, "Network error: {}", msg),
            Self::Delivery(msg) => write!(f, "Download failed: {}", msg),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        // Classify the common transport failures so the notification text
        // tells the user something actionable.
        if e.is_timeout() {
            return Self::Transport(format!("request timed out ({})", e));
        }
        if e.is_connect() {
            return Self::Transport(format!("could not reach the download service ({})", e));
        }
        if e.is_decode() {
            return Self::Transport(format!("unreadable service response ({})", e));
        }
        Self::Transport(e.to_string())
    }
}
