use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::store::StoreError;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("chart fetch failed: {0}")]
    Fetch(String),
    #[error("track search failed: {0}")]
    Resolution(String),
    #[error("playlist write rejected: {0}")]
    RemoteWrite(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("credential store error: {0}")]
    Store(#[from] StoreError),
}

impl SyncError {
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Fetch(_) => "fetch",
            SyncError::Resolution(_) => "resolution",
            SyncError::RemoteWrite(_) => "remote_write",
            SyncError::Auth(_) => "auth",
            SyncError::Store(_) => "store",
        }
    }
}

/// Snapshot of the most recent cycle failure, as shown to operators.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    pub kind: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl ErrorInfo {
    pub fn new(err: &SyncError, at: DateTime<Utc>) -> Self {
        ErrorInfo {
            kind: err.kind().to_string(),
            message: err.to_string(),
            at,
        }
    }
}
