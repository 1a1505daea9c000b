//! Server configuration.
//!
//! Read from an optional JSON file with camelCase keys. Missing keys take
//! their defaults; a file that fails to parse is reported and ignored.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default request body limit; must fit one chunk plus multipart framing.
pub const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Merged files land here; chunks are kept under `temp/` below it.
    pub storage_root: PathBuf,
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            storage_root: PathBuf::from("upload"),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from `path`, falling back to defaults.
    pub fn load(path: &Path) -> std::io::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        match serde_json::from_str(&content) {
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse server config, using defaults"
                );
                Ok(Self::default())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.json");
        std::fs::write(&path, r#"{"bindAddr": "127.0.0.1:8080", "storageRoot": "/srv/up"}"#)
            .unwrap();

        let c = ServerConfig::load(&path).unwrap();
        assert_eq!(c.bind_addr, SocketAddr::from(([127, 0, 0, 1], 8080)));
        assert_eq!(c.storage_root, PathBuf::from("/srv/up"));
        assert_eq!(c.max_body_bytes, DEFAULT_MAX_BODY_BYTES);
    }

    #[test]
    fn broken_or_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.json");
        assert_eq!(ServerConfig::load(&path).unwrap(), ServerConfig::default());

        std::fs::write(&path, "[1, 2").unwrap();
        assert_eq!(ServerConfig::load(&path).unwrap(), ServerConfig::default());
    }
}
