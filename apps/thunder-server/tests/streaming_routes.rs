//! End-to-end tests for the HTTP surface against the in-memory backend

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    response::Response,
    Router,
};
use tower::ServiceExt;

use thunder_server::config::Config;
use thunder_server::routes;
use thunder_server::state::AppState;
use thunder_server::streaming::ConnectionPool;
use thunder_server::upstream::memory::MemoryBackend;
use thunder_server::upstream::{UpstreamClient, UpstreamError};

const SIZE: usize = 2_500_000;
/// Compact links for the fixtures added in `TestApp::new`
const MOVIE: &str = "/Ag00011";
const REMOTE: &str = "/Ag00022";
const EMPTY: &str = "/Ag00033";

struct TestApp {
    backend: MemoryBackend,
    state: AppState,
    router: Router,
    data: Vec<u8>,
}

impl TestApp {
    fn new(connections: usize) -> Self {
        let backend = MemoryBackend::new();
        let data: Vec<u8> = (0..SIZE).map(|i| (i % 251) as u8).collect();
        backend.add_file(1, 1, "movie.mkv", "video/x-matroska", data.clone());
        backend.add_file(2, 2, "report.pdf", "application/pdf", data[..4096].to_vec());
        backend.add_file(3, 1, "empty.txt", "text/plain", Vec::new());

        let pool = ConnectionPool::new(
            backend.client(1),
            (1..connections).map(|i| (i, backend.client(1) as Arc<dyn UpstreamClient>)),
        );

        let mut config = Config::default();
        config.upstream.channel = -1001234567890;
        let state = AppState::new(config, pool);
        let router = routes::router(state.clone());

        Self {
            backend,
            state,
            router,
            data,
        }
    }

    async fn send(&self, method: Method, uri: &str, range: Option<&str>) -> Response {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(range) = range {
            request = request.header(header::RANGE, range);
        }
        self.router
            .clone()
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn get(&self, uri: &str, range: Option<&str>) -> Response {
        self.send(Method::GET, uri, range).await
    }

    fn loads(&self) -> Vec<(usize, usize)> {
        self.state.pool().loads()
    }
}

async fn body(response: Response) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()
}

fn header_str<'a>(response: &'a Response, name: header::HeaderName) -> Option<&'a str> {
    response.headers().get(name).map(|v| v.to_str().unwrap())
}

#[tokio::test]
async fn test_partial_content() {
    let app = TestApp::new(1);
    let response = app.get(MOVIE, Some("bytes=1000000-2400000")).await;

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(header_str(&response, header::CONTENT_LENGTH), Some("1400001"));
    assert_eq!(
        header_str(&response, header::CONTENT_RANGE),
        Some("bytes 1000000-2400000/2500000")
    );
    assert_eq!(header_str(&response, header::ACCEPT_RANGES), Some("bytes"));
    assert_eq!(header_str(&response, header::CONTENT_TYPE), Some("video/x-matroska"));
    assert!(header_str(&response, header::CONTENT_DISPOSITION)
        .unwrap()
        .starts_with("inline; filename=\"movie.mkv\""));

    let bytes = body(response).await;
    assert_eq!(bytes, &app.data[1_000_000..=2_400_000]);
    assert_eq!(app.backend.chunk_fetches(), 3);
}

#[tokio::test]
async fn test_full_content_is_idempotent() {
    let app = TestApp::new(1);

    let first = app.get(MOVIE, None).await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(header_str(&first, header::CONTENT_LENGTH), Some("2500000"));
    assert!(first.headers().get(header::CONTENT_RANGE).is_none());
    let first = body(first).await;

    let second = body(app.get(MOVIE, None).await).await;

    assert_eq!(first, second);
    assert_eq!(first, app.data);
    // Second request was served from the descriptor cache
    assert_eq!(app.backend.message_fetches(), 1);
}

#[tokio::test]
async fn test_query_form_link() {
    let app = TestApp::new(1);
    let response = app.get("/1/movie.mkv?hash=Ag0001", Some("bytes=0-0")).await;

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(body(response).await, &app.data[..1]);
}

#[tokio::test]
async fn test_single_byte_ranges() {
    let app = TestApp::new(1);

    let last = format!("bytes={}-{}", SIZE - 1, SIZE - 1);
    let response = app.get(MOVIE, Some(&last)).await;
    assert_eq!(header_str(&response, header::CONTENT_LENGTH), Some("1"));
    assert_eq!(body(response).await, &app.data[SIZE - 1..]);

    let suffix = app.get(MOVIE, Some("bytes=-10")).await;
    assert_eq!(body(suffix).await, &app.data[SIZE - 10..]);
}

#[tokio::test]
async fn test_hash_mismatch_is_forbidden() {
    let app = TestApp::new(1);

    for range in [None, Some("bytes=0-10"), Some("bytes=10-5"), Some("garbage")] {
        let response = app.get("/Zz99991", range).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN, "{:?}", range);
    }

    assert_eq!(app.get("/1", None).await.status(), StatusCode::FORBIDDEN);
    assert_eq!(app.get("/1?hash=Ag000", None).await.status(), StatusCode::FORBIDDEN);
    assert_eq!(app.backend.sessions_opened(), 0);
}

#[tokio::test]
async fn test_unsatisfiable_ranges() {
    let app = TestApp::new(1);

    for range in ["bytes=2500000-", "bytes=0-2500000", "bytes=10-5", "bytes=-0"] {
        let response = app.get(MOVIE, Some(range)).await;
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE, "{}", range);
        assert_eq!(header_str(&response, header::CONTENT_RANGE), Some("bytes */2500000"));
    }
    assert_eq!(app.backend.chunk_fetches(), 0);
}

#[tokio::test]
async fn test_malformed_range() {
    let app = TestApp::new(1);

    for range in ["bytes=a-b", "pages=0-1", "bytes=-"] {
        let response = app.get(MOVIE, Some(range)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", range);
    }
}

#[tokio::test]
async fn test_invalid_links() {
    let app = TestApp::new(1);

    for uri in ["/", "/favicon.ico", "/Ag00019", "/watch/nothing"] {
        let response = app.get(uri, None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{}", uri);
        let text = String::from_utf8(body(response).await).unwrap();
        assert!(text.contains("Invalid link. Please check your URL."), "{}", uri);
    }
}

#[tokio::test]
async fn test_head_does_not_stream() {
    let app = TestApp::new(1);

    let response = app.send(Method::HEAD, MOVIE, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, header::CONTENT_LENGTH), Some("2500000"));

    let response = app.send(Method::HEAD, MOVIE, Some("bytes=100-199")).await;
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(header_str(&response, header::CONTENT_LENGTH), Some("100"));
    assert!(body(response).await.is_empty());

    assert_eq!(app.backend.sessions_opened(), 0);
    assert_eq!(app.backend.chunk_fetches(), 0);
    assert_eq!(app.loads(), vec![(0, 0)]);
}

#[tokio::test]
async fn test_empty_object() {
    let app = TestApp::new(1);
    let response = app.get(EMPTY, None).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, header::CONTENT_LENGTH), Some("0"));
    assert!(body(response).await.is_empty());
    assert_eq!(app.backend.chunk_fetches(), 0);

    let ranged = app.get(EMPTY, Some("bytes=0-")).await;
    assert_eq!(ranged.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(header_str(&ranged, header::CONTENT_RANGE), Some("bytes */0"));
}

#[tokio::test]
async fn test_cross_shard_object() {
    let app = TestApp::new(1);
    let response = app.get(REMOTE, None).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(header_str(&response, header::CONTENT_DISPOSITION)
        .unwrap()
        .starts_with("attachment;"));
    assert_eq!(body(response).await, &app.data[..4096]);
    assert_eq!(app.backend.imports(), 1);

    body(app.get(REMOTE, Some("bytes=0-99")).await).await;
    assert_eq!(app.backend.sessions_opened(), 1);
}

#[tokio::test]
async fn test_workload_tracks_open_streams() {
    let app = TestApp::new(2);

    let first = app.get(MOVIE, None).await;
    let second = app.get(MOVIE, None).await;
    let third = app.get(MOVIE, Some("bytes=0-99")).await;
    assert_eq!(app.loads(), vec![(0, 2), (1, 1)]);

    // Finished stream releases its slot
    body(third).await;
    assert_eq!(app.loads(), vec![(0, 1), (1, 1)]);

    // Client going away releases the rest
    drop(first);
    drop(second);
    assert_eq!(app.loads(), vec![(0, 0), (1, 0)]);
}

#[tokio::test]
async fn test_expired_reference_invalidates_descriptor() {
    let app = TestApp::new(1);
    app.backend.fail_next_fetch(UpstreamError::FileReferenceExpired);

    let response = app.get(MOVIE, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(to_bytes(response.into_body(), usize::MAX).await.is_err());
    assert_eq!(app.loads(), vec![(0, 0)]);

    let response = app.get(MOVIE, Some("bytes=0-9")).await;
    assert_eq!(body(response).await, &app.data[..10]);
    assert_eq!(app.backend.message_fetches(), 2);
}

#[tokio::test]
async fn test_watch_page() {
    let app = TestApp::new(1);
    let response = app.get("/watch/Ag00011/movie.mkv", None).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(header_str(&response, header::CONTENT_TYPE).unwrap().starts_with("text/html"));
    assert_eq!(
        header_str(&response, header::CACHE_CONTROL),
        Some("no-cache, must-revalidate")
    );
    let page = String::from_utf8(body(response).await).unwrap();
    assert!(page.contains("<video src=\"/Ag00011/movie.mkv\""));
    assert_eq!(app.backend.sessions_opened(), 0);

    let forbidden = app.get("/watch/1?hash=nope00", None).await;
    assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_status() {
    let app = TestApp::new(3);
    let _stream = app.get(MOVIE, None).await;

    let response = app.get("/status", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let status: serde_json::Value = serde_json::from_slice(&body(response).await).unwrap();
    assert_eq!(status["server_status"], "running");
    assert_eq!(status["connected_bots"], 3);
    assert_eq!(
        status["loads"],
        serde_json::json!({ "bot0": 1, "bot1": 0, "bot2": 0 })
    );
    assert_eq!(status["version"], env!("CARGO_PKG_VERSION"));
    assert!(status["uptime"].as_str().unwrap().ends_with('s'));
}
