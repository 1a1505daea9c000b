//! Transport seam between the upload flow and a chunkload server.
//!
//! `ChunkTransport` is implemented by [`HttpTransport`] for real servers and
//! by mocks in tests.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use chunkload_protocol::constants::{
    FIELD_CHUNK, FIELD_FILE, FIELD_FILE_NAME, FIELD_HASH, ROUTE_MERGE, ROUTE_UPLOAD_CHUNK,
    ROUTE_UPLOAD_FILE,
};
use chunkload_protocol::{ApiResponse, MergeRequest, UploadChunkReply};
use reqwest::multipart::{Form, Part};
use tracing::debug;

use crate::error::UploadError;

/// Abstract connection to a chunkload server.
///
/// Futures own their arguments so callers can spawn them freely.
pub trait ChunkTransport: Send + Sync {
    /// Stores one chunk under `chunk_id` for `file_name`.
    fn upload_chunk(
        &self,
        file_name: String,
        chunk_id: String,
        data: Bytes,
    ) -> Pin<Box<dyn Future<Output = Result<UploadChunkReply, UploadError>> + Send + '_>>;

    /// Asks the server to reassemble every stored chunk of a file.
    fn merge(
        &self,
        request: MergeRequest,
    ) -> Pin<Box<dyn Future<Output = Result<(), UploadError>> + Send + '_>>;

    /// Sends a small file in one request.
    fn upload_file(
        &self,
        file_name: String,
        data: Bytes,
    ) -> Pin<Box<dyn Future<Output = Result<(), UploadError>> + Send + '_>>;
}

/// [`ChunkTransport`] over HTTP using `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// Creates a transport for the server at `base_url` (e.g.
    /// `http://127.0.0.1:3000`).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, route: &str) -> String {
        format!("{}{route}", self.base_url)
    }

    /// Reads a response envelope and returns its data if the code is 200.
    async fn read_envelope(
        response: reqwest::Response,
    ) -> Result<Option<serde_json::Value>, UploadError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| UploadError::Transport(e.to_string()))?;

        let envelope: ApiResponse = serde_json::from_str(&body).map_err(|_| UploadError::Server {
            code: status.as_u16(),
            msg: body.clone(),
        })?;
        if !envelope.is_ok() {
            let msg = envelope
                .msg
                .or_else(|| {
                    envelope
                        .data
                        .map(|d| d.as_str().map_or_else(|| d.to_string(), str::to_string))
                })
                .unwrap_or_default();
            return Err(UploadError::Server {
                code: envelope.code,
                msg,
            });
        }
        Ok(envelope.data)
    }
}

impl ChunkTransport for HttpTransport {
    fn upload_chunk(
        &self,
        file_name: String,
        chunk_id: String,
        data: Bytes,
    ) -> Pin<Box<dyn Future<Output = Result<UploadChunkReply, UploadError>> + Send + '_>> {
        Box::pin(async move {
            let len = data.len();
            let form = Form::new()
                .part(
                    FIELD_CHUNK,
                    Part::bytes(data.to_vec()).file_name(chunk_id.clone()),
                )
                .text(FIELD_FILE_NAME, file_name)
                .text(FIELD_HASH, chunk_id.clone());

            let response = self
                .client
                .post(self.url(ROUTE_UPLOAD_CHUNK))
                .multipart(form)
                .send()
                .await
                .map_err(|e| UploadError::Transport(e.to_string()))?;

            let data = Self::read_envelope(response).await?.unwrap_or_default();
            let reply: UploadChunkReply = serde_json::from_value(data)?;
            debug!(chunk = %chunk_id, bytes = len, status = reply.status, "chunk sent");
            Ok(reply)
        })
    }

    fn merge(
        &self,
        request: MergeRequest,
    ) -> Pin<Box<dyn Future<Output = Result<(), UploadError>> + Send + '_>> {
        Box::pin(async move {
            let response = self
                .client
                .post(self.url(ROUTE_MERGE))
                .json(&request)
                .send()
                .await
                .map_err(|e| UploadError::Transport(e.to_string()))?;
            Self::read_envelope(response).await?;
            Ok(())
        })
    }

    fn upload_file(
        &self,
        file_name: String,
        data: Bytes,
    ) -> Pin<Box<dyn Future<Output = Result<(), UploadError>> + Send + '_>> {
        Box::pin(async move {
            let form = Form::new()
                .part(
                    FIELD_FILE,
                    Part::bytes(data.to_vec()).file_name(file_name.clone()),
                )
                .text(FIELD_FILE_NAME, file_name);

            let response = self
                .client
                .post(self.url(ROUTE_UPLOAD_FILE))
                .multipart(form)
                .send()
                .await
                .map_err(|e| UploadError::Transport(e.to_string()))?;
            Self::read_envelope(response).await?;
            Ok(())
        })
    }
}
