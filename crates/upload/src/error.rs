//! Upload error types.

use crate::session::TransitionError;

/// Errors produced by the upload flow.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The request never got a usable answer (connection, timeout, ...).
    #[error("transport error: {0}")]
    Transport(String),

    /// The server answered with a non-200 envelope code.
    #[error("server error {code}: {msg}")]
    Server { code: u16, msg: String },

    #[error("fingerprint error: {0}")]
    Fingerprint(#[from] chunkload_fingerprint::FingerprintError),

    #[error("transfer error: {0}")]
    Transfer(#[from] chunkload_transfer::TransferError),

    #[error("upload task {0} panicked")]
    TaskPanicked(usize),

    #[error("cancelled")]
    Cancelled,

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("no file selected")]
    NoFile,
}

impl From<TransitionError> for UploadError {
    fn from(e: TransitionError) -> Self {
        match e {
            TransitionError::Unsupported(what) => Self::Unsupported(what.to_string()),
            other => Self::InvalidState(other.to_string()),
        }
    }
}
