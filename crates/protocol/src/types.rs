use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of one chunk on the wire: `<fingerprint><delimiter><index>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChunkId {
    pub fingerprint: String,
    pub index: u64,
    pub delimiter: String,
}

impl ChunkId {
    /// Creates an id with the default delimiter.
    pub fn new(fingerprint: impl Into<String>, index: u64) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            index,
            delimiter: crate::DEFAULT_DELIMITER.to_string(),
        }
    }

    /// Parses an id, splitting on the *last* occurrence of `delimiter`.
    ///
    /// Returns `None` if the delimiter is absent or the suffix is not a
    /// non-negative integer.
    pub fn parse(s: &str, delimiter: &str) -> Option<Self> {
        if delimiter.is_empty() {
            return None;
        }
        let (fingerprint, suffix) = s.rsplit_once(delimiter)?;
        let index = suffix.parse::<u64>().ok()?;
        Some(Self {
            fingerprint: fingerprint.to_string(),
            index,
            delimiter: delimiter.to_string(),
        })
    }

    /// Extracts only the index suffix of a stored chunk name.
    pub fn index_of(name: &str, delimiter: &str) -> Option<u64> {
        Self::parse(name, delimiter).map(|id| id.index)
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.fingerprint, self.delimiter, self.index)
    }
}

/// Upload state of a single chunk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChunkStatus {
    #[default]
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "success")]
    Success,
    #[serde(rename = "failed")]
    Failed,
}

impl ChunkStatus {
    /// Short label used in chunk tables.
    pub fn label(&self) -> &'static str {
        match self {
            ChunkStatus::Pending => "pending",
            ChunkStatus::Success => "success",
            ChunkStatus::Failed => "failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_id_format() {
        let id = ChunkId::new("d41d8cd98f00b204e9800998ecf8427e", 7);
        assert_eq!(id.to_string(), "d41d8cd98f00b204e9800998ecf8427e_7");
    }

    #[test]
    fn chunk_id_parse() {
        let id = ChunkId::parse("abc_12", "_").unwrap();
        assert_eq!(id.fingerprint, "abc");
        assert_eq!(id.index, 12);
    }

    #[test]
    fn chunk_id_parse_uses_last_delimiter() {
        let id = ChunkId::parse("my_file_3", "_").unwrap();
        assert_eq!(id.fingerprint, "my_file");
        assert_eq!(id.index, 3);
    }

    #[test]
    fn chunk_id_parse_rejects_bad_suffix() {
        assert!(ChunkId::parse("abc_x", "_").is_none());
        assert!(ChunkId::parse("abc", "_").is_none());
        assert!(ChunkId::parse("abc_-1", "_").is_none());
        assert!(ChunkId::parse("abc_1", "").is_none());
    }

    #[test]
    fn chunk_id_custom_delimiter() {
        assert_eq!(ChunkId::index_of("abc--4", "--"), Some(4));
    }

    #[test]
    fn chunk_status_serde() {
        let json = serde_json::to_string(&ChunkStatus::Success).unwrap();
        assert_eq!(json, r#""success""#);
        assert_eq!(ChunkStatus::default(), ChunkStatus::Pending);
    }
}
