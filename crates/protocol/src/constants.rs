//! Protocol constants shared by both sides of the wire.

/// Default chunk size: 1 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

/// Separator between the fingerprint and the chunk index in a chunk id.
pub const DEFAULT_DELIMITER: &str = "_";

/// Envelope code for a successful request.
pub const CODE_OK: u16 = 200;

/// Envelope code for a client-input problem (missing field, unknown file).
pub const CODE_INVALID: u16 = 415;

/// Envelope code for a server-side failure.
pub const CODE_SERVER_ERROR: u16 = 500;

/// Route receiving one chunk as multipart form data.
pub const ROUTE_UPLOAD_CHUNK: &str = "/upload/chunk";

/// Route merging every stored chunk of a file.
pub const ROUTE_MERGE: &str = "/upload/merge";

/// Route receiving a whole (non-chunked) file in one request.
pub const ROUTE_UPLOAD_FILE: &str = "/upload";

/// Liveness route.
pub const ROUTE_HEALTH: &str = "/health";

/// Multipart field carrying the chunk bytes.
pub const FIELD_CHUNK: &str = "chunk";

/// Multipart field carrying the whole file for direct uploads.
pub const FIELD_FILE: &str = "file";

/// Multipart/JSON field carrying the original file name.
pub const FIELD_FILE_NAME: &str = "fileName";

/// Multipart field carrying the chunk id (`<fingerprint>_<index>`).
pub const FIELD_HASH: &str = "hash";

/// JSON field carrying the chunk size of a merge request.
pub const FIELD_SIZE: &str = "size";

/// JSON field carrying the chunk id delimiter of a merge request.
pub const FIELD_DELIMITER: &str = "delimiter";
