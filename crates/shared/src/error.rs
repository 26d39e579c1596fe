//! Error taxonomy for the sync core.

use serde::Deserialize;
use thiserror::Error;

/// Everything that can go wrong between the client and the backend.
///
/// None of these escape a capability boundary: the API client turns them into
/// `None`, the socket into `false`/`None`, storage into a cache miss. They are
/// still carried as values so they can be logged and reported.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("server error: {0}")]
    Server(String),
    #[error("storage failure: {0}")]
    Storage(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("invalid path {0:?}: paths are relative to the API root")]
    InvalidPath(String),
}

impl SyncError {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }

    pub fn storage(err: impl std::fmt::Display) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: serde_json::Value,
}

/// Pull the `error` message out of a server body like `{"error": "..."}`.
///
/// Non-string error values are rendered as JSON. Returns `None` when the body
/// has no `error` field.
pub fn try_error_message(body: &serde_json::Value) -> Option<String> {
    let parsed = ErrorBody::deserialize(body).ok()?;
    match parsed.error {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}
