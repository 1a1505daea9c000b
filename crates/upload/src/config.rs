//! Client upload configuration.
//!
//! Read from an optional JSON file with camelCase keys. Missing keys take
//! their defaults; a file that fails to parse is reported and ignored.

use std::path::Path;
use std::time::Duration;

use chunkload_fingerprint::FingerprintMode;
use chunkload_protocol::{DEFAULT_CHUNK_SIZE, DEFAULT_DELIMITER};
use chunkload_tasks::DEFAULT_CONCURRENCY;
use serde::{Deserialize, Serialize};

/// Files at or above this size may use sampled fingerprints.
pub const DEFAULT_SAMPLED_THRESHOLD: u64 = 256 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UploadConfig {
    pub chunk_size: u64,
    /// Chunk uploads in flight at once; 0 means unbounded.
    pub concurrency: usize,
    pub delimiter: String,
    /// Mode used for files at or above `sampled_threshold`. Smaller files
    /// always get a full fingerprint.
    pub fingerprint_mode: FingerprintMode,
    pub sampled_threshold: u64,
    /// Auto-resume a paused upload after this many milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pause_timeout_ms: Option<u64>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            delimiter: DEFAULT_DELIMITER.into(),
            fingerprint_mode: FingerprintMode::Full,
            sampled_threshold: DEFAULT_SAMPLED_THRESHOLD,
            pause_timeout_ms: None,
        }
    }
}

impl UploadConfig {
    /// Loads configuration from `path`, falling back to defaults.
    pub fn load(path: &Path) -> std::io::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        match serde_json::from_str::<Self>(&content) {
            Ok(mut config) => {
                if config.delimiter.is_empty() {
                    config.delimiter = DEFAULT_DELIMITER.into();
                }
                Ok(config)
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse upload config, using defaults"
                );
                Ok(Self::default())
            }
        }
    }

    /// Fingerprint mode for a file of `total_size` bytes.
    pub fn mode_for(&self, total_size: u64) -> FingerprintMode {
        if total_size >= self.sampled_threshold {
            self.fingerprint_mode
        } else {
            FingerprintMode::Full
        }
    }

    pub fn pause_timeout(&self) -> Option<Duration> {
        self.pause_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = UploadConfig::default();
        assert_eq!(c.chunk_size, 1024 * 1024);
        assert_eq!(c.concurrency, 4);
        assert_eq!(c.delimiter, "_");
        assert_eq!(c.fingerprint_mode, FingerprintMode::Full);
        assert_eq!(c.pause_timeout(), None);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.json");
        std::fs::write(
            &path,
            r#"{"chunkSize": 65536, "fingerprintMode": "sampled", "pauseTimeoutMs": 1500}"#,
        )
        .unwrap();

        let c = UploadConfig::load(&path).unwrap();
        assert_eq!(c.chunk_size, 65536);
        assert_eq!(c.concurrency, 4);
        assert_eq!(c.fingerprint_mode, FingerprintMode::Sampled);
        assert_eq!(c.pause_timeout(), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn broken_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.json");
        std::fs::write(&path, "{not json").unwrap();
        assert_eq!(UploadConfig::load(&path).unwrap(), UploadConfig::default());
    }

    #[test]
    fn missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let c = UploadConfig::load(&dir.path().join("nope.json")).unwrap();
        assert_eq!(c, UploadConfig::default());
    }

    #[test]
    fn sampled_only_above_threshold() {
        let c = UploadConfig {
            fingerprint_mode: FingerprintMode::Sampled,
            sampled_threshold: 1000,
            ..Default::default()
        };
        assert_eq!(c.mode_for(999), FingerprintMode::Full);
        assert_eq!(c.mode_for(1000), FingerprintMode::Sampled);
    }
}
