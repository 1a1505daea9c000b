//! HTTP routes over a [`ChunkRegistry`].
//!
//! Every handler answers HTTP 200 with an [`ApiResponse`] envelope; the
//! envelope `code` carries the outcome.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use chunkload_protocol::constants::{
    FIELD_CHUNK, FIELD_FILE, FIELD_FILE_NAME, FIELD_HASH, ROUTE_HEALTH, ROUTE_MERGE,
    ROUTE_UPLOAD_CHUNK, ROUTE_UPLOAD_FILE,
};
use chunkload_protocol::{ApiResponse, CODE_INVALID, MergeRequest};
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::registry::{ChunkRegistry, RegistryError};

/// Builds the router for all chunkload endpoints.
pub fn router(registry: Arc<ChunkRegistry>, max_body_bytes: usize) -> Router {
    Router::new()
        .route(ROUTE_UPLOAD_CHUNK, post(upload_chunk))
        .route(ROUTE_MERGE, post(merge))
        .route(ROUTE_UPLOAD_FILE, post(upload_file))
        .route(ROUTE_HEALTH, get(health))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(registry)
}

async fn upload_chunk(State(registry): State<Arc<ChunkRegistry>>, multipart: Multipart) -> Response {
    let mut form = match read_form(multipart).await {
        Ok(form) => form,
        Err(resp) => return resp,
    };
    let chunk = match form.take_bytes(FIELD_CHUNK) {
        Ok(chunk) => chunk,
        Err(resp) => return resp,
    };
    let (file_name, hash) = match (form.take_text(FIELD_FILE_NAME), form.take_text(FIELD_HASH)) {
        (Ok(file_name), Ok(hash)) => (file_name, hash),
        (Err(resp), _) | (_, Err(resp)) => return resp,
    };

    match registry.receive(&file_name, &hash, chunk).await {
        Ok(reply) => Json(ApiResponse::ok(reply)).into_response(),
        Err(e) => registry_error("chunk upload failed", e),
    }
}

async fn merge(
    State(registry): State<Arc<ChunkRegistry>>,
    request: Result<Json<MergeRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match request {
        Ok(request) => request,
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "rejected merge body");
            return Json(ApiResponse::invalid(rejection.body_text())).into_response();
        }
    };

    match registry.merge(&request).await {
        Ok(_) => Json(ApiResponse::ok_with_msg(true, "merged")).into_response(),
        Err(e) => registry_error("merge failed", e),
    }
}

async fn upload_file(State(registry): State<Arc<ChunkRegistry>>, multipart: Multipart) -> Response {
    let mut form = match read_form(multipart).await {
        Ok(form) => form,
        Err(resp) => return resp,
    };
    let (file_name, data) = match (form.take_text(FIELD_FILE_NAME), form.take_bytes(FIELD_FILE)) {
        (Ok(file_name), Ok(data)) => (file_name, data),
        (Err(resp), _) | (_, Err(resp)) => return resp,
    };

    match registry.store_file(&file_name, data).await {
        Ok(_) => Json(ApiResponse::ok(true)).into_response(),
        Err(e) => registry_error("file upload failed", e),
    }
}

async fn health() -> Json<ApiResponse<&'static str>> {
    Json(ApiResponse::ok("ok"))
}

fn registry_error(context: &str, e: RegistryError) -> Response {
    let envelope = if e.code() == CODE_INVALID {
        warn!(error = %e, "{context}");
        ApiResponse::invalid(e.to_string())
    } else {
        error!(error = %e, "{context}");
        ApiResponse::server_error(context, e.to_string())
    };
    Json(envelope).into_response()
}

// ---------------------------------------------------------------------------
// Multipart form
// ---------------------------------------------------------------------------

/// Fields of a multipart body keyed by name. Later duplicates win.
struct Form(HashMap<String, Bytes>);

async fn read_form(mut multipart: Multipart) -> Result<Form, Response> {
    let mut fields = HashMap::new();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return Err(form_error(e.body_text())),
        };
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        match field.bytes().await {
            Ok(bytes) => {
                fields.insert(name, bytes);
            }
            Err(e) => return Err(form_error(e.body_text())),
        }
    }
    Ok(Form(fields))
}

fn form_error(detail: String) -> Response {
    warn!(error = %detail, "failed to parse multipart form");
    Json(ApiResponse::server_error("failed to parse form", detail)).into_response()
}

impl Form {
    fn take_bytes(&mut self, name: &str) -> Result<Bytes, Response> {
        self.0.remove(name).ok_or_else(|| missing(name))
    }

    fn take_text(&mut self, name: &str) -> Result<String, Response> {
        let bytes = self.take_bytes(name)?;
        match String::from_utf8(bytes.to_vec()) {
            Ok(text) if !text.is_empty() => Ok(text),
            Ok(_) => Err(missing(name)),
            Err(_) => Err(Json(ApiResponse::invalid(format!("{name} is not valid UTF-8")))
                .into_response()),
        }
    }
}

fn missing(name: &str) -> Response {
    Json(ApiResponse::invalid(format!("{name} is required"))).into_response()
}
