//! Wire types shared by the chunkload client and server.
//!
//! Every HTTP response uses the [`ApiResponse`] envelope. Chunk uploads are
//! multipart requests whose field names live in [`constants`]; merge requests
//! are JSON bodies described by [`MergeRequest`].

pub mod constants;
pub mod envelope;
pub mod messages;
pub mod types;

// Re-export primary types for convenience.
pub use constants::{
    CODE_INVALID, CODE_OK, CODE_SERVER_ERROR, DEFAULT_CHUNK_SIZE, DEFAULT_DELIMITER,
};
pub use envelope::ApiResponse;
pub use messages::{MergeRequest, UploadChunkReply};
pub use types::{ChunkId, ChunkStatus};
