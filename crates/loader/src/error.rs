//! Error types for the upstream connection and the loader facade.

use std::time::Duration;

use thiserror::Error;

/// Failures opening or reading the upstream stream. All of them are retried.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("upstream rejected credentials (HTTP {status})")]
    Unauthorized { status: u16 },

    #[error("upstream returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("token exchange failed: {0}")]
    Token(String),

    #[error("no event or heartbeat for {0:?}")]
    Inactive(Duration),

    #[error("upstream did not answer within {0:?}")]
    OpenTimeout(Duration),

    #[error("upstream reported error: {0}")]
    Upstream(String),
}

impl SourceError {
    /// Credential problems are logged louder than plain network trouble.
    pub fn is_auth(&self) -> bool {
        matches!(self, SourceError::Unauthorized { .. } | SourceError::Token(_))
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(s) if s.as_u16() == 401 || s.as_u16() == 403 => {
                SourceError::Unauthorized { status: s.as_u16() }
            }
            _ => SourceError::Transport(e.to_string()),
        }
    }
}

/// Errors surfaced by the loader facade.
#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("loader has been shut down")]
    ShutDown,

    #[error("ingestor task failed: {0}")]
    Task(String),
}
