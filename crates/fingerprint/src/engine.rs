use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chunkload_tasks::PauseGate;
use chunkload_transfer::{ChunkDescriptor, ChunkReader};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::FingerprintError;

/// Bytes hashed from each end of a block in sampled mode.
pub const SAMPLE_SLICE_SIZE: u64 = 2 * 1024;

/// How much of the file feeds the fingerprint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FingerprintMode {
    /// Every byte, in chunk order. Equals the MD5 of the whole file.
    #[default]
    Full,
    /// The first block in full, then a head and a tail slice of each later
    /// block. A cheap identity check for large files, not an integrity check:
    /// edits between the sampled slices go unnoticed.
    Sampled,
}

/// One hashing step: a byte range attributed to a chunk index.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Unit {
    index: u64,
    range: Range<u64>,
}

fn units(plan: &[ChunkDescriptor], mode: FingerprintMode) -> Vec<Unit> {
    match mode {
        FingerprintMode::Full => plan
            .iter()
            .map(|c| Unit {
                index: c.index,
                range: c.range(),
            })
            .collect(),
        FingerprintMode::Sampled => {
            let mut units = Vec::with_capacity(plan.len() * 2);
            for c in plan {
                if c.index == 0 || c.size() <= 2 * SAMPLE_SLICE_SIZE {
                    units.push(Unit {
                        index: c.index,
                        range: c.range(),
                    });
                } else {
                    units.push(Unit {
                        index: c.index,
                        range: c.start..c.start + SAMPLE_SLICE_SIZE,
                    });
                    units.push(Unit {
                        index: c.index,
                        range: c.end - SAMPLE_SLICE_SIZE..c.end,
                    });
                }
            }
            units
        }
    }
}

/// Incremental, pausable MD5 fingerprinting over a chunk plan.
///
/// Clones share the pause flag, gate and cancellation token.
#[derive(Debug, Clone)]
pub struct FingerprintEngine {
    gate: PauseGate,
    paused: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl FingerprintEngine {
    pub fn new(gate: PauseGate) -> Self {
        Self::with_cancel(gate, CancellationToken::new())
    }

    /// Creates an engine that stops with [`FingerprintError::Cancelled`] once
    /// `cancel` fires.
    pub fn with_cancel(gate: PauseGate, cancel: CancellationToken) -> Self {
        Self {
            gate,
            paused: Arc::new(AtomicBool::new(false)),
            cancel,
        }
    }

    /// Requests a pause. The engine stops after the unit in progress.
    pub fn pause(&self) {
        self.gate.arm();
        self.set_paused(true);
    }

    /// Clears the pause request and releases the gate.
    pub async fn resume(&self) {
        self.set_paused(false);
        self.gate.release().await;
    }

    /// Sets the pause flag without arming or releasing the gate.
    ///
    /// For owners that drive the gate themselves: a paused engine waits at
    /// its next checkpoint until the gate's current epoch is released.
    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Computes the fingerprint of the file behind `reader`.
    ///
    /// `on_progress` receives the completed percentage after every unit; it
    /// reaches exactly 100 only when the last unit has been read. Returns the
    /// lowercase hex digest.
    pub async fn compute<P>(
        &self,
        reader: &ChunkReader,
        plan: &[ChunkDescriptor],
        mode: FingerprintMode,
        mut on_progress: P,
    ) -> Result<String, FingerprintError>
    where
        P: FnMut(f64),
    {
        let units = units(plan, mode);
        let total = units.len();
        debug!(path = %reader.path().display(), ?mode, units = total, "fingerprint started");

        let mut hasher = Md5::new();
        for (done, unit) in units.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Err(FingerprintError::Cancelled);
            }

            let expected = unit.range.end - unit.range.start;
            let bytes = reader.read_range(unit.range).await?;
            let actual = bytes.len() as u64;
            if actual != expected {
                return Err(FingerprintError::Decode {
                    index: unit.index,
                    expected,
                    actual,
                });
            }
            hasher.update(&bytes);
            on_progress(((done + 1) * 100) as f64 / total as f64);

            self.checkpoint().await?;
        }

        let digest = hex::encode(hasher.finalize());
        debug!(path = %reader.path().display(), fingerprint = %digest, "fingerprint done");
        Ok(digest)
    }

    async fn checkpoint(&self) -> Result<(), FingerprintError> {
        if !self.is_paused() {
            return Ok(());
        }
        debug!("fingerprint paused");
        tokio::select! {
            _ = self.gate.await_release() => {
                debug!("fingerprint resumed");
                Ok(())
            }
            _ = self.cancel.cancelled() => Err(FingerprintError::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunkload_transfer::split;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    fn write_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    #[tokio::test]
    async fn full_mode_matches_md5_of_file() {
        let tmp = TempDir::new().unwrap();
        let data = pattern(10_000);
        let path = write_file(tmp.path(), "a.bin", &data);
        let plan = split(data.len() as u64, 3_000);

        let engine = FingerprintEngine::new(PauseGate::new());
        let fp = engine
            .compute(&ChunkReader::new(&path), &plan, FingerprintMode::Full, |_| {})
            .await
            .unwrap();

        assert_eq!(fp, hex::encode(Md5::digest(&data)));
        assert_eq!(fp.len(), 32);
    }

    #[tokio::test]
    async fn progress_is_monotonic_and_ends_at_100() {
        let tmp = TempDir::new().unwrap();
        let path = write_file(tmp.path(), "a.bin", &pattern(7_000));
        let plan = split(7_000, 1_000);

        let mut seen = Vec::new();
        let engine = FingerprintEngine::new(PauseGate::new());
        engine
            .compute(&ChunkReader::new(&path), &plan, FingerprintMode::Full, |p| {
                seen.push(p)
            })
            .await
            .unwrap();

        assert_eq!(seen.len(), 7);
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(*seen.last().unwrap(), 100.0);
        assert!(seen[..6].iter().all(|p| *p < 100.0));
    }

    #[tokio::test]
    async fn sampled_mode_is_deterministic() {
        let tmp = TempDir::new().unwrap();
        let data = pattern(50_000);
        let path = write_file(tmp.path(), "a.bin", &data);
        let plan = split(data.len() as u64, 10_000);
        let reader = ChunkReader::new(&path);
        let engine = FingerprintEngine::new(PauseGate::new());

        let a = engine
            .compute(&reader, &plan, FingerprintMode::Sampled, |_| {})
            .await
            .unwrap();
        let b = engine
            .compute(&reader, &plan, FingerprintMode::Sampled, |_| {})
            .await
            .unwrap();
        assert_eq!(a, b);

        let full = engine
            .compute(&reader, &plan, FingerprintMode::Full, |_| {})
            .await
            .unwrap();
        assert_ne!(a, full);
    }

    #[tokio::test]
    async fn sampled_mode_skips_block_middles() {
        let tmp = TempDir::new().unwrap();
        let data = pattern(30_000);
        let mut edited = data.clone();
        // Middle of block 1, outside both sampled slices.
        edited[15_000] ^= 0xff;
        let mut edited_head = data.clone();
        edited_head[10_000] ^= 0xff;

        let plan = split(data.len() as u64, 10_000);
        let engine = FingerprintEngine::new(PauseGate::new());
        let mut fps = Vec::new();
        for (name, bytes) in [("a", &data), ("b", &edited), ("c", &edited_head)] {
            let path = write_file(tmp.path(), name, bytes);
            fps.push(
                engine
                    .compute(&ChunkReader::new(&path), &plan, FingerprintMode::Sampled, |_| {})
                    .await
                    .unwrap(),
            );
        }

        assert_eq!(fps[0], fps[1]);
        assert_ne!(fps[0], fps[2]);
    }

    #[test]
    fn sampled_units_cover_small_blocks_whole() {
        let plan = split(10_000 + 3_000, 10_000);
        let units = units(&plan, FingerprintMode::Sampled);
        assert_eq!(
            units,
            vec![
                Unit { index: 0, range: 0..10_000 },
                Unit { index: 1, range: 10_000..13_000 },
            ]
        );

        let plan = split(20_000, 10_000);
        let units = super::units(&plan, FingerprintMode::Sampled);
        assert_eq!(units.len(), 3);
        assert_eq!(units[1].range, 10_000..10_000 + SAMPLE_SLICE_SIZE);
        assert_eq!(units[2].range, 20_000 - SAMPLE_SLICE_SIZE..20_000);
    }

    #[tokio::test]
    async fn truncated_file_fails_with_decode_error() {
        let tmp = TempDir::new().unwrap();
        let path = write_file(tmp.path(), "a.bin", &pattern(2_500));
        // Plan for a file that used to be larger.
        let plan = split(3_000, 1_000);

        let engine = FingerprintEngine::new(PauseGate::new());
        let err = engine
            .compute(&ChunkReader::new(&path), &plan, FingerprintMode::Full, |_| {})
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            FingerprintError::Decode {
                index: 2,
                expected: 1_000,
                actual: 500
            }
        ));
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let tmp = TempDir::new().unwrap();
        let engine = FingerprintEngine::new(PauseGate::new());
        let err = engine
            .compute(
                &ChunkReader::new(&tmp.path().join("nope")),
                &split(10, 5),
                FingerprintMode::Full,
                |_| {},
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FingerprintError::Io(_)));
    }

    #[tokio::test]
    async fn pause_and_resume_give_the_same_fingerprint() {
        let tmp = TempDir::new().unwrap();
        let data = pattern(8_000);
        let path = write_file(tmp.path(), "a.bin", &data);
        let plan = split(data.len() as u64, 1_000);

        let engine = FingerprintEngine::new(PauseGate::new());
        let uninterrupted = engine
            .compute(&ChunkReader::new(&path), &plan, FingerprintMode::Full, |_| {})
            .await
            .unwrap();

        let progress = Arc::new(Mutex::new(Vec::new()));
        engine.pause();
        let task = {
            let engine = engine.clone();
            let progress = Arc::clone(&progress);
            let reader = ChunkReader::new(&path);
            let plan = plan.clone();
            tokio::spawn(async move {
                engine
                    .compute(&reader, &plan, FingerprintMode::Full, |p| {
                        progress.lock().unwrap().push(p)
                    })
                    .await
            })
        };

        // The first unit completes, then the engine parks on the gate.
        while progress.lock().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(progress.lock().unwrap().len(), 1);
        assert!(!task.is_finished());

        engine.resume().await;
        let resumed = task.await.unwrap().unwrap();
        assert_eq!(resumed, uninterrupted);
        assert_eq!(progress.lock().unwrap().len(), 8);
    }

    #[tokio::test]
    async fn sampled_fingerprint_survives_pause_and_resume() {
        let tmp = TempDir::new().unwrap();
        let data = pattern(50_000);
        let path = write_file(tmp.path(), "a.bin", &data);
        let plan = split(data.len() as u64, 10_000);

        let engine = FingerprintEngine::new(PauseGate::new());
        let uninterrupted = engine
            .compute(&ChunkReader::new(&path), &plan, FingerprintMode::Sampled, |_| {})
            .await
            .unwrap();

        let progress = Arc::new(Mutex::new(Vec::new()));
        engine.pause();
        let task = {
            let engine = engine.clone();
            let progress = Arc::clone(&progress);
            let reader = ChunkReader::new(&path);
            tokio::spawn(async move {
                engine
                    .compute(&reader, &plan, FingerprintMode::Sampled, |p| {
                        progress.lock().unwrap().push(p)
                    })
                    .await
            })
        };

        while progress.lock().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(progress.lock().unwrap().len(), 1);
        assert!(!task.is_finished());

        engine.resume().await;
        assert_eq!(task.await.unwrap().unwrap(), uninterrupted);
        // Block 0 whole, then a head and a tail slice for each of blocks 1 to 4.
        assert_eq!(progress.lock().unwrap().len(), 9);
    }

    #[tokio::test]
    async fn cancel_while_paused_stops_the_engine() {
        let tmp = TempDir::new().unwrap();
        let path = write_file(tmp.path(), "a.bin", &pattern(4_000));
        let plan = split(4_000, 1_000);
        let token = CancellationToken::new();
        let engine = FingerprintEngine::with_cancel(PauseGate::new(), token.clone());
        engine.pause();

        let task = {
            let engine = engine.clone();
            let reader = ChunkReader::new(&path);
            tokio::spawn(async move {
                engine
                    .compute(&reader, &plan, FingerprintMode::Full, |_| {})
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, FingerprintError::Cancelled));
    }
}
