use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_DELIMITER, FIELD_DELIMITER, FIELD_FILE_NAME, FIELD_SIZE};

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Asks the server to merge every stored chunk of a file.
///
/// All fields are optional on the wire so the server can report each
/// missing one by name instead of failing deserialization as a whole.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delimiter: Option<String>,
}

impl MergeRequest {
    /// Creates a complete merge request using the default delimiter.
    pub fn new(file_name: impl Into<String>, chunk_size: u64) -> Self {
        Self {
            size: Some(chunk_size),
            file_name: Some(file_name.into()),
            delimiter: Some(DEFAULT_DELIMITER.to_string()),
        }
    }

    /// Returns the wire name of the first missing (or empty) field.
    ///
    /// Checked in the order `size`, `delimiter`, `fileName`. A zero size
    /// counts as missing.
    pub fn missing_field(&self) -> Option<&'static str> {
        if self.size.is_none_or(|s| s == 0) {
            return Some(FIELD_SIZE);
        }
        if self.delimiter.as_deref().is_none_or(str::is_empty) {
            return Some(FIELD_DELIMITER);
        }
        if self.file_name.as_deref().is_none_or(str::is_empty) {
            return Some(FIELD_FILE_NAME);
        }
        None
    }
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// Reply to a chunk upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadChunkReply {
    /// The chunk id that was stored.
    #[serde(default)]
    pub hash: String,
    /// `1` once the chunk is stored (or was already present), `0` otherwise.
    pub status: u8,
}

impl UploadChunkReply {
    /// Creates a reply for a stored chunk.
    pub fn stored(hash: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            status: 1,
        }
    }

    /// Returns `true` if the server reports the chunk as stored.
    pub fn is_stored(&self) -> bool {
        self.status == 1
    }
}
