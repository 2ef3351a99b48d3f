use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    extract::Query,
    http::{HeaderValue, Method, Request, StatusCode, header},
    middleware,
    response::Response,
    routing::get,
};
use bytes::Bytes;
use futures::stream;
use reprise::cache::{
    CacheConfig, CacheKey, CacheState, CacheStore, Clock, KeyStrategy, LruStore,
    response_cache_layer,
};
use serde::Deserialize;
use time::{OffsetDateTime, macros::datetime};
use tower::ServiceExt;

#[derive(Deserialize)]
struct StreamParams {
    chunks: u8,
}

struct ManualClock(Mutex<OffsetDateTime>);

impl ManualClock {
    fn advance(&self, by: Duration) {
        *self.0.lock().expect("clock lock") += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *self.0.lock().expect("clock lock")
    }
}

struct Harness {
    app: Router,
    calls: Arc<AtomicUsize>,
    store: Arc<LruStore>,
    clock: Arc<ManualClock>,
}

impl Harness {
    fn new(config: CacheConfig) -> Self {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = Arc::new(LruStore::new(config.capacity_non_zero()));
        let clock = Arc::new(ManualClock(Mutex::new(datetime!(2024-05-01 12:00 UTC))));
        let state = CacheState::with_parts(
            config,
            Arc::clone(&store) as Arc<dyn CacheStore>,
            Arc::clone(&clock) as Arc<dyn Clock>,
        );

        let counter = |calls: &Arc<AtomicUsize>| {
            let calls = Arc::clone(calls);
            move || {
                calls.fetch_add(1, Ordering::SeqCst);
            }
        };
        let page = counter(&calls);
        let binary = counter(&calls);
        let missing = counter(&calls);
        let cookie = counter(&calls);
        let big = counter(&calls);
        let streamed = counter(&calls);
        let opaque = counter(&calls);

        let app = Router::new()
            .route(
                "/page",
                get(move || {
                    page();
                    async move {
                        (
                            [
                                (header::VARY, "Accept"),
                                (header::HeaderName::from_static("x-generated"), "yes"),
                            ],
                            "hello",
                        )
                    }
                })
                .post(|| async { "posted" }),
            )
            .route(
                "/logo.png",
                get(move || {
                    binary();
                    async move {
                        (
                            [(header::CONTENT_TYPE, "image/png")],
                            vec![0x89_u8, b'P', b'N', b'G', 0xFF, 0x00],
                        )
                    }
                }),
            )
            .route(
                "/missing",
                get(move || {
                    missing();
                    async move { (StatusCode::NOT_FOUND, "gone") }
                }),
            )
            .route(
                "/session",
                get(move || {
                    cookie();
                    async move { ([(header::SET_COOKIE, "sid=1")], "private") }
                }),
            )
            .route(
                "/big",
                get(move || {
                    big();
                    async move { "x".repeat(64) }
                }),
            )
            .route(
                "/stream",
                get(move |Query(params): Query<StreamParams>| {
                    streamed();
                    async move {
                        let chunks = (0..params.chunks)
                            .map(|i| Ok::<_, std::io::Error>(Bytes::from(vec![b'a' + i; 10])));
                        Body::from_stream(stream::iter(chunks))
                    }
                }),
            )
            .route(
                "/opaque",
                get(move || {
                    opaque();
                    async move {
                        let mut response = Response::new(Body::from("opaque"));
                        response.headers_mut().insert(
                            "x-raw",
                            HeaderValue::from_bytes(b"caf\xE9").expect("obs-text is allowed"),
                        );
                        response
                    }
                }),
            )
            .layer(middleware::from_fn_with_state(state, response_cache_layer));

        Self {
            app,
            calls,
            store,
            clock,
        }
    }

    async fn send(&self, method: Method, uri: &str) -> Response {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .expect("request should build");
        self.app
            .clone()
            .oneshot(request)
            .await
            .expect("router should respond")
    }

    async fn get(&self, uri: &str) -> Response {
        self.send(Method::GET, uri).await
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn config() -> CacheConfig {
    CacheConfig {
        body_limit_bytes: 32,
        ..Default::default()
    }
}

async fn body_bytes(response: Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should collect")
        .to_vec()
}

#[tokio::test]
async fn second_request_is_replayed_from_cache() {
    let harness = Harness::new(config());

    let first = harness.get("/page?x=1").await;
    assert_eq!(first.status(), StatusCode::OK);
    let first_headers = first.headers().clone();
    assert_eq!(body_bytes(first).await, b"hello");
    assert_eq!(harness.calls(), 1);
    assert!(harness.store.get("/page?x=1").is_some());

    let second = harness.get("/page?x=1").await;
    assert_eq!(harness.calls(), 1);
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(
        second.headers()[header::CONTENT_TYPE],
        first_headers[header::CONTENT_TYPE]
    );
    assert_eq!(second.headers()["x-generated"], "yes");
    assert_eq!(second.headers()[header::VARY], "Accept");
    assert_eq!(second.headers()[header::CONTENT_LENGTH], "5");
    assert_eq!(body_bytes(second).await, b"hello");
}

#[tokio::test]
async fn query_string_is_part_of_the_key() {
    let harness = Harness::new(config());

    harness.get("/page?x=1").await;
    harness.get("/page?x=2").await;
    harness.get("/page").await;
    assert_eq!(harness.calls(), 3);

    harness.get("/page?").await;
    assert_eq!(harness.calls(), 3, "empty query shares the key of no query");
}

#[tokio::test]
async fn binary_bodies_replay_byte_for_byte() {
    let harness = Harness::new(config());
    let expected = vec![0x89_u8, b'P', b'N', b'G', 0xFF, 0x00];

    assert_eq!(body_bytes(harness.get("/logo.png").await).await, expected);
    let replayed = harness.get("/logo.png").await;
    assert_eq!(harness.calls(), 1);
    assert_eq!(replayed.headers()[header::CONTENT_TYPE], "image/png");
    assert_eq!(body_bytes(replayed).await, expected);
}

#[tokio::test]
async fn entries_expire_after_max_age() {
    let harness = Harness::new(CacheConfig {
        max_age_seconds: 10,
        ..config()
    });

    harness.get("/page").await;
    harness.clock.advance(Duration::from_secs(9));
    harness.get("/page").await;
    assert_eq!(harness.calls(), 1);

    harness.clock.advance(Duration::from_secs(1));
    harness.get("/page").await;
    assert_eq!(harness.calls(), 2);
}

#[tokio::test]
async fn uncacheable_responses_always_reach_the_handler() {
    let harness = Harness::new(config());

    for _ in 0..2 {
        let missing = harness.get("/missing").await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_bytes(missing).await, b"gone");

        let session = harness.get("/session").await;
        assert_eq!(session.headers()[header::SET_COOKIE], "sid=1");

        let big = harness.get("/big").await;
        assert_eq!(body_bytes(big).await.len(), 64);
    }

    assert_eq!(harness.calls(), 6);
    assert!(harness.store.is_empty());
}

#[tokio::test]
async fn non_get_requests_bypass_the_cache() {
    let harness = Harness::new(config());

    let response = harness.send(Method::POST, "/page").await;
    assert_eq!(body_bytes(response).await, b"posted");
    assert!(harness.store.is_empty());
}

#[tokio::test]
async fn disabled_cache_stores_nothing() {
    let harness = Harness::new(CacheConfig {
        enabled: false,
        ..config()
    });

    harness.get("/page").await;
    harness.get("/page").await;
    assert_eq!(harness.calls(), 2);
    assert!(harness.store.is_empty());
}

#[tokio::test]
async fn sha256_strategy_hashes_the_key() {
    let harness = Harness::new(CacheConfig {
        key_strategy: KeyStrategy::Sha256,
        ..config()
    });

    harness.get("/page?x=1").await;
    harness.get("/page?x=1").await;
    assert_eq!(harness.calls(), 1);

    let hashed = CacheKey::sha256("/page", Some("x=1"));
    assert_eq!(hashed.as_str().len(), 64);
    assert!(harness.store.get(hashed.as_str()).is_some());
    assert!(harness.store.get("/page?x=1").is_none());
}

#[tokio::test]
async fn corrupt_entry_yields_server_error() {
    use reprise::cache::{CacheEntry, CachedBody};

    let harness = Harness::new(config());
    harness.store.put(
        "/page?".to_string(),
        Arc::new(CacheEntry::new(
            datetime!(2030-01-01 0:00 UTC),
            Bytes::from_static(&[0xFF, 0x03, 0x00]),
            CachedBody::Empty,
        )),
    );

    let response = harness.get("/page").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(harness.calls(), 0);
}

#[tokio::test]
async fn handler_headers_survive_the_miss_path() {
    let harness = Harness::new(config());

    let response = harness.get("/page").await;
    assert_eq!(
        response.headers().get("x-generated"),
        Some(&HeaderValue::from_static("yes"))
    );
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/plain; charset=utf-8"
    );
}

#[tokio::test]
async fn streamed_body_over_the_limit_is_served_whole() {
    let harness = Harness::new(config());

    for _ in 0..2 {
        let response = harness.get("/stream?chunks=4").await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_bytes(response).await;
        assert_eq!(body.len(), 40);
        assert_eq!(&body[..10], &[b'a'; 10]);
        assert_eq!(&body[30..], &[b'd'; 10]);
    }

    assert_eq!(harness.calls(), 2);
    assert!(harness.store.is_empty());
}

#[tokio::test]
async fn streamed_body_under_the_limit_is_cached() {
    let harness = Harness::new(config());

    let first = body_bytes(harness.get("/stream?chunks=2").await).await;
    let second = body_bytes(harness.get("/stream?chunks=2").await).await;

    assert_eq!(first.len(), 20);
    assert_eq!(first, second);
    assert_eq!(harness.calls(), 1);
}

#[tokio::test]
async fn opaque_header_reaches_the_client_but_not_the_cache() {
    let harness = Harness::new(config());

    let live = harness.get("/opaque").await;
    assert_eq!(live.headers()["x-raw"].as_bytes(), b"caf\xE9");
    assert_eq!(body_bytes(live).await, b"opaque");

    let replayed = harness.get("/opaque").await;
    assert_eq!(harness.calls(), 1);
    assert!(replayed.headers().get("x-raw").is_none());
    assert_eq!(body_bytes(replayed).await, b"opaque");
}
