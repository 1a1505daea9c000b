//! Chunk planning and file access for chunked uploads.
//!
//! The [`split`] function turns a file size into an ordered chunk plan;
//! [`ChunkReader`] reads the bytes behind a plan entry. [`sanitize_file_name`]
//! turns a client-supplied name into something safe to use as a single path
//! component on the server.

mod sanitize;
mod speed;
mod splitter;

pub use chunkload_protocol::DEFAULT_CHUNK_SIZE;
pub use sanitize::{has_unsafe_chars, sanitize_file_name};
pub use speed::SpeedCalculator;
pub use splitter::{ChunkDescriptor, ChunkReader, is_chunked, split};

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid name: {0}")]
    InvalidName(String),
}
