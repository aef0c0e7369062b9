use reqwest::StatusCode;
use thiserror::Error;

/// Errors surfaced to the caller at the point of the failed action.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Missing, expired or rejected token. Never retried; the caller must
    /// send the user back to login.
    #[error("Not authorized: {0}")]
    Auth(String),

    /// Transport failure before a response arrived.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("Server returned {status}: {detail}")]
    Server { status: StatusCode, detail: String },

    #[error("Malformed response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Push channel error: {0}")]
    PushChannel(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No conversation selected")]
    NoActivePeer,

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl ClientError {
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ClientError>;
