//! Client side of the chunked upload flow.
//!
//! Sends one file at a time to a chunkload server. Transport is abstracted
//! behind [`ChunkTransport`] so the flow can be driven against mocks;
//! [`HttpTransport`] is the real one.
//!
//! # Pipeline
//!
//! 1. **Select**: size the file and build the chunk plan
//! 2. **Hash**: fingerprint the file in the hasher worker (pausable)
//! 3. **Upload**: send pending chunks with bounded concurrency (pausable)
//! 4. **Merge**: ask the server to reassemble the chunks
//!
//! Files that fit in one chunk skip steps 2 to 4 and go up in a single request.

pub mod config;
pub mod controller;
pub mod error;
pub mod session;
pub mod transport;
pub mod types;

// Re-export primary types for convenience.
pub use config::UploadConfig;
pub use controller::UploadController;
pub use error::UploadError;
pub use session::{PausedPhase, SessionEvent, TransitionError, UploadSession, UploadState};
pub use transport::{ChunkTransport, HttpTransport};
pub use types::{ProgressThrottle, UploadEvent, UploadOutcome, UploadSummary};
