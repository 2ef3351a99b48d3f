use std::io::ErrorKind;

use axum::{
    Router,
    body::{Body, Bytes},
    extract::{Path, State},
    http::{
        HeaderValue, StatusCode,
        header::{CONTENT_LENGTH, CONTENT_TYPE},
    },
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use tracing::error;

use super::{log_responses, set_request_context};
use crate::cache::{CacheState, response_cache_layer};
use crate::infra::files::{FileStore, FileStoreError};

const INDEX_FILE: &str = "index.html";

#[derive(Clone)]
pub struct FileState {
    pub files: FileStore,
}

/// Router serving `state.files` behind the response cache.
///
/// `/healthz` bypasses the cache.
pub fn build_router(state: FileState, cache: CacheState) -> Router {
    let files = Router::new()
        .route("/", get(serve_index))
        .route("/{*path}", get(serve_file))
        .layer(middleware::from_fn_with_state(cache, response_cache_layer))
        .with_state(state);

    Router::new()
        .route("/healthz", get(healthz))
        .merge(files)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

async fn healthz() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn serve_index(State(state): State<FileState>) -> Response {
    serve(&state, INDEX_FILE.to_string()).await
}

async fn serve_file(State(state): State<FileState>, Path(path): Path<String>) -> Response {
    let path = if path.is_empty() || path.ends_with('/') {
        format!("{path}{INDEX_FILE}")
    } else {
        path
    };
    serve(&state, path).await
}

async fn serve(state: &FileState, path: String) -> Response {
    const SOURCE: &str = "infra::http::files::serve";

    match state.files.read(&path).await {
        Ok(bytes) => build_file_response(&path, bytes),
        Err(FileStoreError::InvalidPath) => (StatusCode::NOT_FOUND, "File not found").into_response(),
        Err(FileStoreError::Io(err))
            if matches!(err.kind(), ErrorKind::NotFound | ErrorKind::IsADirectory) =>
        {
            (StatusCode::NOT_FOUND, "File not found").into_response()
        }
        Err(err) => {
            error!(
                target = SOURCE,
                path = %path,
                error = %err,
                "failed to read file"
            );
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to read file").into_response()
        }
    }
}

fn build_file_response(path: &str, bytes: Bytes) -> Response {
    let length = bytes.len();
    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        headers.insert(CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::from_str(&length.to_string()) {
        headers.insert(CONTENT_LENGTH, value);
    }

    response
}
