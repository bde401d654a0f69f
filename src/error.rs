use std::path::PathBuf;
use thiserror::Error;

/// Error taxonomy for the whole sync pipeline.
///
/// `Configuration` is fatal at startup; `ContentParse` is reported per file
/// and skips that file; `RemoteApi` and `Connection` mark the affected
/// mapping as failed; `Conflict` marks it as waiting for explicit resolution.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("content parse error: {0}")]
    ContentParse(String),

    #[error("remote API error (status {status}): {body}")]
    RemoteApi { status: u16, body: String },

    #[error("connection error: {0}")]
    Connection(String),

    #[error("conflict: local and remote edits diverge for {path}")]
    Conflict { path: PathBuf },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),
}

impl SyncError {
    /// True when the remote reported the resource as missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::RemoteApi { status: 404, .. })
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
