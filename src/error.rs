//! Error types for collaborator failures and field validation.

use thiserror::Error;

/// Failure of an injected collaborator (network, storage, browser globals).
///
/// Every path in the session recovers from these locally; only the
/// immediate-save path hands one back to its caller.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyncError {
    #[error("transport failed: {0}")]
    Transport(String),
    #[error("request returned status {0}")]
    Status(u16),
    #[error("response body is not valid JSON: {0}")]
    Decode(String),
    #[error("storage unavailable: {0}")]
    Storage(String),
    #[error("no browser window")]
    NoWindow,
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Decode(err.to_string())
    }
}

/// Why a single raw JSON field was rejected by a validator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("expected {0}")]
    WrongType(&'static str),
    #[error("number is not finite")]
    NotFinite,
    #[error("value {0} outside {1}..={2}")]
    OutOfRange(f64, u64, u64),
    #[error("key {0:?} is not an allowed identifier")]
    BadKey(String),
    #[error("unparseable timestamp {0:?}")]
    BadTimestamp(String),
    #[error("empty text")]
    Empty,
    #[error("text longer than {0} chars")]
    TooLong(usize),
}
