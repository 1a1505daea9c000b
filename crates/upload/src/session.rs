//! Upload session snapshot and its state machine.
//!
//! A session only changes through [`UploadSession::apply`], which returns a
//! new snapshot or a [`TransitionError`]. The controller owns the current
//! snapshot; everything else sees clones.

use std::fmt;
use std::path::PathBuf;

use chunkload_protocol::{ChunkId, ChunkStatus};
use chunkload_transfer::{ChunkDescriptor, is_chunked, split};

/// Phase a paused session will return to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PausedPhase {
    Hashing,
    Uploading,
}

/// Lifecycle state of an upload session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UploadState {
    #[default]
    Idle,
    Hashing,
    Uploading,
    Paused(PausedPhase),
    Merging,
    Completed,
    Cancelled,
    Failed,
}

impl UploadState {
    /// `true` for states no event other than `Cancel` can leave.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// `true` while a transfer is running or paused.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Hashing | Self::Uploading | Self::Paused(_) | Self::Merging
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Hashing => "hashing",
            Self::Uploading => "uploading",
            Self::Paused(PausedPhase::Hashing) => "paused (hashing)",
            Self::Paused(PausedPhase::Uploading) => "paused (uploading)",
            Self::Merging => "merging",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Inputs to the session state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Start,
    HashProgress(f64),
    Hashed(String),
    Pause,
    Resume,
    ChunkSettled { index: u64, status: ChunkStatus },
    UploadsFinished,
    Merged,
    Fail(String),
    Cancel,
}

impl SessionEvent {
    fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::HashProgress(_) => "record hash progress",
            Self::Hashed(_) => "record fingerprint",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::ChunkSettled { .. } => "settle a chunk",
            Self::UploadsFinished => "finish uploads",
            Self::Merged => "complete merge",
            Self::Fail(_) => "fail",
            Self::Cancel => "cancel",
        }
    }
}

/// A rejected transition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("cannot {event} while {state}")]
    Invalid {
        state: UploadState,
        event: &'static str,
    },

    #[error("{0}")]
    Unsupported(&'static str),

    #[error("chunk {index} out of range ({total} chunks)")]
    ChunkOutOfRange { index: u64, total: usize },

    #[error("{remaining} chunks not uploaded")]
    Incomplete { remaining: usize },
}

/// Snapshot of one file upload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadSession {
    pub path: PathBuf,
    pub file_name: String,
    pub total_size: u64,
    pub chunk_size: u64,
    pub chunks: Vec<ChunkDescriptor>,
    pub chunked: bool,
    pub fingerprint: Option<String>,
    pub chunk_status: Vec<ChunkStatus>,
    pub state: UploadState,
    pub hash_progress: f64,
    pub error: Option<String>,
}

impl UploadSession {
    /// Creates an `Idle` session for a file of `total_size` bytes.
    pub fn new(
        path: impl Into<PathBuf>,
        file_name: impl Into<String>,
        total_size: u64,
        chunk_size: u64,
    ) -> Self {
        let chunks = split(total_size, chunk_size);
        Self {
            path: path.into(),
            file_name: file_name.into(),
            total_size,
            chunk_size,
            chunked: is_chunked(total_size, chunk_size),
            fingerprint: None,
            chunk_status: vec![ChunkStatus::Pending; chunks.len()],
            chunks,
            state: UploadState::Idle,
            hash_progress: 0.0,
            error: None,
        }
    }

    pub fn chunks_total(&self) -> usize {
        self.chunks.len()
    }

    /// Wire id of chunk `index`, once the fingerprint is known.
    pub fn chunk_id(&self, index: u64, delimiter: &str) -> Option<ChunkId> {
        let fingerprint = self.fingerprint.as_ref()?;
        Some(ChunkId {
            fingerprint: fingerprint.clone(),
            index,
            delimiter: delimiter.to_string(),
        })
    }

    /// Chunks that still need to be sent.
    pub fn pending_chunks(&self) -> Vec<ChunkDescriptor> {
        self.chunks
            .iter()
            .zip(&self.chunk_status)
            .filter(|(_, status)| **status != ChunkStatus::Success)
            .map(|(chunk, _)| *chunk)
            .collect()
    }

    pub fn all_uploaded(&self) -> bool {
        self.chunk_status.iter().all(|s| *s == ChunkStatus::Success)
    }

    pub fn count(&self, status: ChunkStatus) -> usize {
        self.chunk_status.iter().filter(|s| **s == status).count()
    }

    /// Bytes covered by chunks already stored on the server.
    pub fn uploaded_bytes(&self) -> u64 {
        self.chunks
            .iter()
            .zip(&self.chunk_status)
            .filter(|(_, status)| **status == ChunkStatus::Success)
            .map(|(chunk, _)| chunk.size())
            .sum()
    }

    /// Upload percentage by stored bytes.
    pub fn upload_progress(&self) -> f64 {
        if self.total_size == 0 {
            return if self.all_uploaded() { 100.0 } else { 0.0 };
        }
        self.uploaded_bytes() as f64 * 100.0 / self.total_size as f64
    }

    /// Applies `event` and returns the resulting snapshot.
    pub fn apply(&self, event: SessionEvent) -> Result<Self, TransitionError> {
        use UploadState::*;

        let mut next = self.clone();
        let invalid = || TransitionError::Invalid {
            state: self.state,
            event: event.name(),
        };

        match (&event, self.state) {
            (SessionEvent::Cancel, _) => {
                return Ok(Self {
                    state: Cancelled,
                    ..Self::default()
                });
            }

            (SessionEvent::Start, Idle) => {
                next.state = if self.chunked { Hashing } else { Uploading };
                next.error = None;
            }
            (SessionEvent::Start, Failed) => {
                next.error = None;
                for status in &mut next.chunk_status {
                    if *status == ChunkStatus::Failed {
                        *status = ChunkStatus::Pending;
                    }
                }
                next.state = if !self.chunked || self.fingerprint.is_some() {
                    Uploading
                } else {
                    next.hash_progress = 0.0;
                    Hashing
                };
            }

            (SessionEvent::HashProgress(pct), Hashing | Paused(PausedPhase::Hashing)) => {
                next.hash_progress = pct.clamp(0.0, 100.0);
            }

            (SessionEvent::Hashed(fp), Hashing) => {
                next.fingerprint = Some(fp.clone());
                next.hash_progress = 100.0;
                next.state = Uploading;
            }
            (SessionEvent::Hashed(fp), Paused(PausedPhase::Hashing)) => {
                next.fingerprint = Some(fp.clone());
                next.hash_progress = 100.0;
                next.state = Paused(PausedPhase::Uploading);
            }

            (SessionEvent::Pause, Hashing) => next.state = Paused(PausedPhase::Hashing),
            (SessionEvent::Pause, Uploading) => {
                if !self.chunked {
                    return Err(TransitionError::Unsupported(
                        "single-request uploads cannot be paused",
                    ));
                }
                next.state = Paused(PausedPhase::Uploading);
            }

            (SessionEvent::Resume, Paused(PausedPhase::Hashing)) => next.state = Hashing,
            (SessionEvent::Resume, Paused(PausedPhase::Uploading)) => next.state = Uploading,

            (
                SessionEvent::ChunkSettled { index, status },
                Uploading | Paused(PausedPhase::Uploading) | Failed,
            ) => {
                let total = self.chunk_status.len();
                let slot = usize::try_from(*index)
                    .ok()
                    .and_then(|i| next.chunk_status.get_mut(i))
                    .ok_or(TransitionError::ChunkOutOfRange {
                        index: *index,
                        total,
                    })?;
                *slot = *status;
            }

            (SessionEvent::UploadsFinished, Uploading) => {
                let remaining = self.chunk_status.len() - self.count(ChunkStatus::Success);
                if remaining > 0 {
                    return Err(TransitionError::Incomplete { remaining });
                }
                next.state = if self.chunked { Merging } else { Completed };
            }

            (SessionEvent::Merged, Merging) => next.state = Completed,

            (SessionEvent::Fail(msg), state) if !state.is_terminal() => {
                next.state = Failed;
                next.error = Some(msg.clone());
            }

            _ => return Err(invalid()),
        }

        Ok(next)
    }
}
