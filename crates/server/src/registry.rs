//! Chunk registry and merge engine.
//!
//! Layout under the storage root:
//!
//! ```text
//! <root>/staging/          in-progress chunk writes
//! <root>/temp/<key>/<id>   stored chunks of one file, named by chunk id
//! <root>/<key>             merged or directly uploaded file
//! ```
//!
//! `<key>` is the sanitized file name. Chunks are written to a staging file
//! and published with a hard link, so an id is stored at most once no matter
//! how many times or how concurrently it is uploaded.

use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use chunkload_protocol::{CODE_INVALID, CODE_SERVER_ERROR, ChunkId, MergeRequest, UploadChunkReply};
use chunkload_transfer::{TransferError, has_unsafe_chars, sanitize_file_name};
use tokio::fs;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, warn};

const TEMP_DIR: &str = "temp";
const STAGING_DIR: &str = "staging";

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// A required request field is missing or unusable.
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    /// A stored chunk whose name has no numeric index suffix.
    #[error("invalid chunk name: {0}")]
    InvalidChunkName(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Transfer(#[from] TransferError),
}

impl RegistryError {
    /// Envelope code reported to the client.
    pub fn code(&self) -> u16 {
        match self {
            Self::Validation(_) | Self::NotFound(_) => CODE_INVALID,
            Self::Transfer(TransferError::InvalidName(_)) => CODE_INVALID,
            Self::InvalidChunkName(_) | Self::Io(_) | Self::Transfer(_) => CODE_SERVER_ERROR,
        }
    }
}

/// Result of a successful merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeSummary {
    pub key: String,
    pub path: PathBuf,
    pub chunks: usize,
    pub bytes: u64,
}

/// File-system backed store of uploaded chunks.
#[derive(Debug, Clone)]
pub struct ChunkRegistry {
    root: PathBuf,
}

impl ChunkRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the chunks of `key`.
    pub fn temp_dir(&self, key: &str) -> PathBuf {
        self.root.join(TEMP_DIR).join(key)
    }

    /// Final location of the file stored under `key`.
    pub fn output_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    /// Sanitizes a client file name into a storage key.
    pub fn key_for(file_name: &str) -> Result<String, RegistryError> {
        let key = sanitize_file_name(file_name)?;
        if key == TEMP_DIR || key == STAGING_DIR {
            return Err(RegistryError::Validation(format!(
                "reserved file name: {file_name}"
            )));
        }
        Ok(key)
    }

    /// Stores one chunk unless a chunk with the same id is already present.
    pub async fn receive(
        &self,
        file_name: &str,
        chunk_id: &str,
        data: Bytes,
    ) -> Result<UploadChunkReply, RegistryError> {
        let key = Self::key_for(file_name)?;
        let id = sanitize_file_name(chunk_id)?;
        if id != chunk_id {
            // A stripped id could no longer be split on its delimiter at merge.
            return Err(RegistryError::Validation(format!(
                "hash contains unsafe characters: {chunk_id}"
            )));
        }
        let dir = self.temp_dir(&key);
        fs::create_dir_all(&dir).await?;

        let target = dir.join(&id);
        if fs::try_exists(&target).await? {
            debug!(file = %key, chunk = %id, "chunk already stored");
            return Ok(UploadChunkReply::stored(id));
        }

        let staged = self.stage(&data).await?;
        let published = fs::hard_link(&staged, &target).await;
        if let Err(e) = fs::remove_file(&staged).await {
            warn!(path = %staged.display(), error = %e, "failed to remove staging file");
        }
        match published {
            Ok(()) => debug!(file = %key, chunk = %id, bytes = data.len(), "chunk stored"),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                debug!(file = %key, chunk = %id, "chunk stored concurrently");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(UploadChunkReply::stored(id))
    }

    /// Writes `data` to a uniquely named staging file.
    async fn stage(&self, data: &[u8]) -> Result<PathBuf, RegistryError> {
        let staging = self.root.join(STAGING_DIR);
        fs::create_dir_all(&staging).await?;
        let path = staging.join(format!("{}.part", uuid::Uuid::new_v4()));

        let mut file = fs::File::create(&path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        Ok(path)
    }

    /// Reassembles every stored chunk of a file into its output path.
    ///
    /// Chunk `i` is written at byte offset `i * size`. Each chunk file is
    /// removed once written; on failure the partial output is left behind.
    pub async fn merge(&self, request: &MergeRequest) -> Result<MergeSummary, RegistryError> {
        if let Some(field) = request.missing_field() {
            return Err(RegistryError::Validation(format!("{field} is required")));
        }
        let (Some(size), Some(delimiter), Some(file_name)) = (
            request.size,
            request.delimiter.as_deref(),
            request.file_name.as_deref(),
        ) else {
            return Err(RegistryError::Validation("incomplete merge request".into()));
        };

        if has_unsafe_chars(delimiter) {
            return Err(RegistryError::Validation(format!(
                "delimiter contains unsafe characters: {delimiter}"
            )));
        }
        let key = Self::key_for(file_name)?;
        let dir = self.temp_dir(&key);
        if !fs::try_exists(&dir).await? {
            return Err(RegistryError::NotFound(format!("{file_name} not found")));
        }

        let chunks = list_chunks(&dir, delimiter).await?;
        let path = self.output_path(&key);
        let mut output = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .await?;

        for (index, chunk_path) in &chunks {
            let offset = index.checked_mul(size).ok_or_else(|| {
                RegistryError::InvalidChunkName(chunk_path.display().to_string())
            })?;
            output.seek(io::SeekFrom::Start(offset)).await?;
            let mut input = fs::File::open(chunk_path).await?;
            tokio::io::copy(&mut input, &mut output).await?;
            drop(input);
            fs::remove_file(chunk_path).await?;
        }
        output.flush().await?;
        output.sync_all().await?;
        let bytes = output.metadata().await?.len();
        drop(output);

        if let Err(e) = fs::remove_dir_all(&dir).await {
            warn!(dir = %dir.display(), error = %e, "failed to remove temp directory");
        }

        info!(file = %key, chunks = chunks.len(), bytes, "file merged");
        Ok(MergeSummary {
            key,
            path,
            chunks: chunks.len(),
            bytes,
        })
    }

    /// Stores a file sent in a single request, replacing any previous one.
    pub async fn store_file(&self, file_name: &str, data: Bytes) -> Result<PathBuf, RegistryError> {
        let key = Self::key_for(file_name)?;
        let staged = self.stage(&data).await?;
        let path = self.output_path(&key);
        fs::rename(&staged, &path).await?;
        info!(file = %key, bytes = data.len(), "file stored");
        Ok(path)
    }

    /// Lists the chunk ids stored for `file_name`, sorted by name.
    pub async fn stored_chunks(&self, file_name: &str) -> Result<Vec<String>, RegistryError> {
        let dir = self.temp_dir(&Self::key_for(file_name)?);
        if !fs::try_exists(&dir).await? {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Regular files in `dir` with their parsed index, in ascending index order.
///
/// Two files with the same index (chunks left by an upload of different
/// content under the same name) fail the listing.
async fn list_chunks(dir: &Path, delimiter: &str) -> Result<Vec<(u64, PathBuf)>, RegistryError> {
    let mut chunks = Vec::new();
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let index = ChunkId::index_of(&name, delimiter)
            .ok_or_else(|| RegistryError::InvalidChunkName(name.to_string()))?;
        chunks.push((index, entry.path()));
    }
    chunks.sort();
    if let Some(pair) = chunks.windows(2).find(|pair| pair[0].0 == pair[1].0) {
        return Err(RegistryError::InvalidChunkName(format!(
            "{} duplicates index {} of {}",
            file_label(&pair[1].1),
            pair[0].0,
            file_label(&pair[0].1)
        )));
    }
    Ok(chunks)
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
