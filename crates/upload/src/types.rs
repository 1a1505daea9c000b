//! Data types shared by the upload controller and its callers.

use std::time::Duration;

use chunkload_protocol::ChunkStatus;
use tokio::time::Instant;

use crate::session::UploadState;

/// Event emitted by the controller while a session runs.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    StateChanged {
        state: UploadState,
    },
    /// Throttled fingerprint progress.
    HashProgress {
        percent: f64,
    },
    Fingerprinted {
        fingerprint: String,
    },
    ChunkSettled {
        index: u64,
        status: ChunkStatus,
    },
    /// Throttled upload progress.
    Progress {
        uploaded_bytes: u64,
        total_bytes: u64,
        percent: f64,
        bytes_per_second: f64,
    },
    Completed {
        file_name: String,
        total_bytes: u64,
    },
    Failed {
        error: String,
    },
}

/// What a finished `start()` call achieved.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    Completed(UploadSummary),
    Cancelled,
}

/// Summary of a completed upload.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadSummary {
    pub file_name: String,
    pub total_bytes: u64,
    pub chunks: usize,
    pub fingerprint: Option<String>,
}

/// Rate limiter for progress events.
///
/// Emits on a change of at least 2 points, after 500 ms without an
/// emission, or when 100% is reached.
#[derive(Debug, Clone)]
pub struct ProgressThrottle {
    last_pct: f64,
    last_emit: Option<Instant>,
    min_step: f64,
    interval: Duration,
}

impl Default for ProgressThrottle {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressThrottle {
    pub fn new() -> Self {
        Self {
            last_pct: 0.0,
            last_emit: None,
            min_step: 2.0,
            interval: Duration::from_millis(500),
        }
    }

    /// Returns whether `pct` should be reported, recording it if so.
    pub fn should_emit(&mut self, pct: f64) -> bool {
        let now = Instant::now();
        let should_emit = pct >= 100.0
            || self.last_emit.is_none()
            || (pct - self.last_pct) >= self.min_step
            || self
                .last_emit
                .is_some_and(|t| now.duration_since(t) >= self.interval);

        if should_emit {
            self.last_pct = pct;
            self.last_emit = Some(now);
        }
        should_emit
    }

    pub fn reset(&mut self) {
        self.last_pct = 0.0;
        self.last_emit = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn throttle_on_step_time_and_completion() {
        let mut t = ProgressThrottle::new();
        assert!(t.should_emit(0.5), "first value always goes out");
        assert!(!t.should_emit(1.0));
        assert!(t.should_emit(2.6));
        assert!(!t.should_emit(3.0));

        tokio::time::advance(Duration::from_millis(600)).await;
        assert!(t.should_emit(3.1));

        assert!(t.should_emit(100.0));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_allows_immediate_emit() {
        let mut t = ProgressThrottle::new();
        assert!(t.should_emit(50.0));
        assert!(!t.should_emit(50.5));
        t.reset();
        assert!(t.should_emit(1.0));
    }
}
