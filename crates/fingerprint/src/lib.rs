//! File fingerprinting for upload deduplication.
//!
//! [`FingerprintEngine`] hashes a file chunk by chunk and can be paused
//! between units without losing its accumulated state. [`spawn_hasher`]
//! runs the engine in its own task behind a typed command channel.

mod engine;
mod worker;

pub use engine::{FingerprintEngine, FingerprintMode, SAMPLE_SLICE_SIZE};
pub use worker::{HashCommand, HashEvent, HashJob, HasherControl, HasherHandle, spawn_hasher};

use chunkload_transfer::TransferError;

/// Errors produced while computing a fingerprint.
#[derive(Debug, thiserror::Error)]
pub enum FingerprintError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A read returned fewer bytes than the plan promised.
    #[error("chunk {index}: expected {expected} bytes, read {actual}")]
    Decode {
        index: u64,
        expected: u64,
        actual: u64,
    },

    #[error("fingerprint cancelled")]
    Cancelled,

    #[error("hasher worker is gone")]
    WorkerGone,
}

impl From<TransferError> for FingerprintError {
    fn from(e: TransferError) -> Self {
        match e {
            TransferError::Io(e) => Self::Io(e),
            TransferError::InvalidName(name) => Self::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid name: {name}"),
            )),
        }
    }
}
