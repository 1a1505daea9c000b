use std::io::SeekFrom;
use std::ops::Range;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::{DEFAULT_CHUNK_SIZE, TransferError};

// ---------------------------------------------------------------------------
// Chunk plan
// ---------------------------------------------------------------------------

/// One entry of a chunk plan: the byte range `[start, end)` of chunk `index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkDescriptor {
    pub index: u64,
    pub start: u64,
    pub end: u64,
}

impl ChunkDescriptor {
    /// Size of this chunk in bytes.
    pub fn size(&self) -> u64 {
        self.end - self.start
    }

    /// Byte range covered by this chunk.
    pub fn range(&self) -> Range<u64> {
        self.start..self.end
    }
}

/// Splits a file of `total_size` bytes into consecutive chunks.
///
/// Every chunk but the last is exactly `chunk_size` bytes; the last one holds
/// the remainder (or a full chunk when the size divides evenly). A
/// `chunk_size` of 0 falls back to [`DEFAULT_CHUNK_SIZE`].
pub fn split(total_size: u64, chunk_size: u64) -> Vec<ChunkDescriptor> {
    let chunk_size = effective_chunk_size(chunk_size);
    let count = total_size.div_ceil(chunk_size);
    (0..count)
        .map(|index| {
            let start = index * chunk_size;
            ChunkDescriptor {
                index,
                start,
                end: (start + chunk_size).min(total_size),
            }
        })
        .collect()
}

/// Returns `true` if a file of `total_size` needs the chunked upload path.
///
/// Files no larger than one chunk are sent in a single request.
pub fn is_chunked(total_size: u64, chunk_size: u64) -> bool {
    total_size > effective_chunk_size(chunk_size)
}

fn effective_chunk_size(chunk_size: u64) -> u64 {
    if chunk_size == 0 {
        DEFAULT_CHUNK_SIZE
    } else {
        chunk_size
    }
}

// ---------------------------------------------------------------------------
// ChunkReader
// ---------------------------------------------------------------------------

/// Reads the bytes behind chunk descriptors.
///
/// Each read opens its own file handle, so one reader can be shared by many
/// concurrent upload tasks.
#[derive(Debug, Clone)]
pub struct ChunkReader {
    path: PathBuf,
}

impl ChunkReader {
    /// Creates a reader for `path`. The file is not opened until a read.
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    /// Returns the path being read.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the current size of the file on disk.
    pub async fn file_size(&self) -> Result<u64, TransferError> {
        Ok(tokio::fs::metadata(&self.path).await?.len())
    }

    /// Reads the full byte range of `chunk`.
    pub async fn read_chunk(&self, chunk: &ChunkDescriptor) -> Result<Bytes, TransferError> {
        self.read_range(chunk.range()).await
    }

    /// Reads up to `range.end - range.start` bytes starting at `range.start`.
    ///
    /// A file that ends early yields a shorter buffer rather than an error;
    /// callers that need an exact length compare it themselves.
    pub async fn read_range(&self, range: Range<u64>) -> Result<Bytes, TransferError> {
        let len = range.end.saturating_sub(range.start);
        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(SeekFrom::Start(range.start)).await?;

        let mut buf = Vec::with_capacity(len as usize);
        file.take(len).read_to_end(&mut buf).await?;
        Ok(Bytes::from(buf))
    }
}
