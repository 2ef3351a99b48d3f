//! Response cache middleware.
//!
//! Caches GET responses by recording what the handler produced into a
//! [`ResponseCapture`] and replaying the stored entry on later hits.

use std::io::Write;
use std::sync::Arc;

use axum::{
    body::{Body, Bytes, HttpBody},
    extract::State,
    http::{
        HeaderMap, Method, Request, StatusCode,
        header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE, SET_COOKIE},
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use bytes::BytesMut;
use futures::{StreamExt, stream};
use tracing::{debug, error, instrument, warn};

use super::{
    CacheConfig,
    capture::{CaptureError, ResponseCapture},
    keys::CacheKey,
    manager::{CacheManager, Clock, SystemClock},
    response::ResponseMutations,
    store::{CacheStore, LruStore},
};
use crate::infra::http::BufferedResponse;

/// Shared cache state for middleware.
#[derive(Clone)]
pub struct CacheState {
    pub config: CacheConfig,
    pub store: Arc<dyn CacheStore>,
    pub clock: Arc<dyn Clock>,
}

impl CacheState {
    /// In-memory LRU store sized from `config`, on the system clock.
    pub fn new(config: CacheConfig) -> Self {
        let store = Arc::new(LruStore::new(config.capacity_non_zero()));
        Self::with_parts(config, store, Arc::new(SystemClock))
    }

    pub fn with_parts(
        config: CacheConfig,
        store: Arc<dyn CacheStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            store,
            clock,
        }
    }
}

/// Middleware for response caching.
///
/// Only GET requests are considered. Non-2xx responses, responses that set
/// cookies or forbid shared caching, and bodies over the configured limit
/// are passed through without being stored.
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn response_cache_layer(
    State(cache): State<CacheState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !cache.config.enabled || request.method() != Method::GET {
        return next.run(request).await;
    }

    let key = CacheKey::derive(
        cache.config.key_strategy,
        request.uri().path(),
        request.uri().query(),
    );
    let manager = CacheManager::new(
        key,
        cache.config.max_age(),
        Arc::clone(&cache.store),
        Arc::clone(&cache.clock),
    );

    if manager.is_valid() {
        let mut replayed = BufferedResponse::new();
        return match manager.send(&mut replayed) {
            Ok(()) => replayed.into_response(),
            Err(err) => {
                error!(cache = "response", key = %manager.key(), error = %err, "failed to replay cached response");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        };
    }

    let response = next.run(request).await;
    if !is_storable(&response, cache.config.body_limit_bytes) {
        debug!(cache = "response", status = %response.status(), "response not storable");
        return response;
    }

    let (parts, body) = response.into_parts();
    let bytes = match collect_body(body, cache.config.body_limit_bytes).await {
        Collected::Complete(bytes) => bytes,
        Collected::Passthrough(body) => return Response::from_parts(parts, body),
    };

    let mut capture = ResponseCapture::new(BufferedResponse::new());
    match record(&mut capture, parts.status, &parts.headers, &bytes) {
        Ok(()) => {
            manager.save(&mut capture);
        }
        Err(err) => {
            error!(cache = "response", key = %manager.key(), error = %err, "failed to record response");
        }
    }

    Response::from_parts(parts, Body::from(bytes))
}

enum Collected {
    /// The whole body fit under the limit.
    Complete(Bytes),
    /// Capture gave up; the body must be forwarded as is.
    Passthrough(Body),
}

/// Buffer `body` up to `limit` bytes.
///
/// Past the limit, or on a stream error, the frames read so far are chained
/// back in front of the remaining stream.
async fn collect_body(body: Body, limit: usize) -> Collected {
    let mut rest = body.into_data_stream();
    let mut chunks: Vec<Bytes> = Vec::new();
    let mut total = 0usize;

    while let Some(frame) = rest.next().await {
        match frame {
            Ok(chunk) => {
                total = total.saturating_add(chunk.len());
                chunks.push(chunk);
                if total > limit {
                    debug!(cache = "response", limit, "streamed body exceeds limit, not storing");
                    let prefix = stream::iter(chunks.into_iter().map(Ok::<_, axum::Error>));
                    return Collected::Passthrough(Body::from_stream(prefix.chain(rest)));
                }
            }
            Err(err) => {
                warn!(cache = "response", error = %err, "response body failed while buffering");
                let prefix = stream::iter(chunks.into_iter().map(Ok::<_, axum::Error>));
                let failed = stream::once(async move { Err(err) });
                return Collected::Passthrough(Body::from_stream(prefix.chain(failed)));
            }
        }
    }

    let mut buf = BytesMut::with_capacity(total);
    for chunk in chunks {
        buf.extend_from_slice(&chunk);
    }
    Collected::Complete(buf.freeze())
}

fn is_storable(response: &Response, body_limit: usize) -> bool {
    if !response.status().is_success() {
        return false;
    }

    let headers = response.headers();
    if headers.contains_key(SET_COOKIE) {
        return false;
    }

    let forbids_caching = headers
        .get_all(CACHE_CONTROL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|directive| {
            let directive = directive.trim();
            directive.eq_ignore_ascii_case("no-store") || directive.eq_ignore_ascii_case("private")
        });
    if forbids_caching {
        return false;
    }

    let declared_len = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .or_else(|| response.body().size_hint().exact());
    !declared_len.is_some_and(|len| len > body_limit as u64)
}

/// Re-issue a handler response through `capture`.
fn record(
    capture: &mut ResponseCapture<BufferedResponse>,
    status: StatusCode,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<(), CaptureError> {
    capture.set_status(i32::from(status.as_u16()));

    let mut content_type = None;
    for (name, value) in headers {
        if name == CONTENT_LENGTH {
            continue;
        }
        let Ok(value) = value.to_str() else {
            debug!(cache = "response", header = %name, "skipping non-text header");
            continue;
        };
        if name == CONTENT_TYPE {
            capture.set_content_type(value);
            content_type = Some(value);
        } else {
            capture.add_header(name.as_str(), value);
        }
    }

    if body.is_empty() {
        return Ok(());
    }
    if let Ok(length) = i32::try_from(body.len()) {
        capture.set_content_length(length);
    }

    match std::str::from_utf8(body) {
        Ok(text) if content_type.is_some_and(is_textual) => {
            let writer = capture.writer()?;
            writer.write_text(text)?;
            writer.flush()?;
        }
        _ => {
            let stream = capture.output_stream()?;
            stream.write_all(body)?;
            stream.flush()?;
        }
    }
    Ok(())
}

fn is_textual(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence.starts_with("text/")
        || essence.ends_with("+json")
        || essence.ends_with("+xml")
        || matches!(
            essence.as_str(),
            "application/json" | "application/xml" | "application/javascript"
        )
}
