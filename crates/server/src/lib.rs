//! Server side of chunkload.
//!
//! [`ChunkRegistry`] stores uploaded chunks per file and merges them back
//! into the original file. [`routes::router`] exposes it over HTTP and
//! [`ChunkServer`] runs the listener until shutdown.

pub mod config;
pub mod registry;
pub mod routes;
mod server;

pub use config::ServerConfig;
pub use registry::{ChunkRegistry, MergeSummary, RegistryError};
pub use server::ChunkServer;

/// Errors produced by the chunk server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
}
