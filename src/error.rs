//! Error types for Leo

use thiserror::Error;

/// Result type alias for Leo operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Leo
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Tool error: {0}")]
    Tool(String),

    #[error("Memory error: {0}")]
    Memory(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(reqwest::Error),

    #[error("Operation timed out")]
    Timeout,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Message bus closed")]
    BusClosed,

    #[error("Missing collaborator: {0}")]
    MissingCollaborator(&'static str),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for deadline expiry, whether it came from the turn timer or the HTTP client.
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Timeout => true,
            Error::Http(e) => e.is_timeout(),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Timeout
        } else {
            Error::Http(err)
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(err.to_string())
    }
}
