use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use axum::{
    extract::{Multipart, State},
    http::{HeaderMap, StatusCode, Uri},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use owcompiler_client::{ApiClient, ClientError, ClientOptions, FileKind, TokenCache};
use serde_json::{json, Value as JsonValue};

#[derive(Clone)]
struct MockResponse {
    status: StatusCode,
    body: JsonValue,
    delay: Duration,
}

impl MockResponse {
    fn json(status: StatusCode, body: JsonValue) -> Self {
        Self {
            status,
            body,
            delay: Duration::from_millis(0),
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Clone)]
struct MockState {
    responses: Arc<Mutex<VecDeque<MockResponse>>>,
    hits: Arc<AtomicUsize>,
    auth_headers: Arc<Mutex<Vec<Option<String>>>>,
    requests: Arc<Mutex<Vec<String>>>,
}

async fn api_handler(
    State(state): State<MockState>,
    uri: Uri,
    headers: HeaderMap,
    _body: String,
) -> impl IntoResponse {
    state.hits.fetch_add(1, Ordering::SeqCst);
    state
        .requests
        .lock()
        .expect("request log mutex must not be poisoned")
        .push(uri.to_string());
    state
        .auth_headers
        .lock()
        .expect("auth header mutex must not be poisoned")
        .push(
            headers
                .get("authorization")
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned),
        );

    let response = {
        let mut queue = state
            .responses
            .lock()
            .expect("response queue mutex must not be poisoned");
        queue.pop_front().unwrap_or_else(|| {
            MockResponse::json(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({"success": false, "code": 500, "message": "no mock response available"}),
            )
        })
    };

    if !response.delay.is_zero() {
        tokio::time::sleep(response.delay).await;
    }

    (response.status, Json(response.body))
}

struct TestServer {
    base_url: String,
    hits: Arc<AtomicUsize>,
    auth_headers: Arc<Mutex<Vec<Option<String>>>>,
    requests: Arc<Mutex<Vec<String>>>,
    task: tokio::task::JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl TestServer {
    fn api_url(&self) -> String {
        format!("{}/api", self.base_url)
    }

    fn last_auth_header(&self) -> Option<String> {
        self.auth_headers
            .lock()
            .expect("auth header mutex must not be poisoned")
            .last()
            .cloned()
            .flatten()
    }

    fn last_request(&self) -> String {
        self.requests
            .lock()
            .expect("request log mutex must not be poisoned")
            .last()
            .cloned()
            .unwrap_or_default()
    }
}

async fn spawn_server(responses: Vec<MockResponse>) -> TestServer {
    let state = MockState {
        responses: Arc::new(Mutex::new(responses.into())),
        hits: Arc::new(AtomicUsize::new(0)),
        auth_headers: Arc::new(Mutex::new(Vec::new())),
        requests: Arc::new(Mutex::new(Vec::new())),
    };

    let app = Router::new().fallback(api_handler).with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("must bind test listener");
    let address = listener.local_addr().expect("must have local addr");
    let task = tokio::spawn(async move {
        axum::serve(listener, app)
            .await
            .expect("mock server must run");
    });

    TestServer {
        base_url: format!("http://{address}"),
        hits: state.hits,
        auth_headers: state.auth_headers,
        requests: state.requests,
        task,
    }
}

fn ok_envelope(data: JsonValue) -> JsonValue {
    json!({ "success": true, "code": 200, "message": "ok", "data": data })
}

fn error_envelope(code: u16, message: &str) -> JsonValue {
    json!({ "success": false, "code": code, "message": message })
}

fn fast_options(max_attempts: u32) -> ClientOptions {
    ClientOptions {
        timeout: Duration::from_secs(2),
        max_attempts,
        retry_delay: Duration::from_millis(1),
    }
}

#[tokio::test]
async fn compile_status_decodes_envelope() {
    let server = spawn_server(vec![MockResponse::json(
        StatusCode::OK,
        ok_envelope(json!({ "status": "compiling", "progress": 55.5, "task_id": "t-9" })),
    )])
    .await;
    let api = ApiClient::new(server.api_url());

    let status = api.compile_status().await.expect("status must decode");

    assert_eq!(status.status, "compiling");
    assert_eq!(status.progress, 55.5);
    assert_eq!(status.task_id.as_deref(), Some("t-9"));
    assert_eq!(server.hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn retries_5xx_with_growing_delays_until_success() {
    let busy = error_envelope(503, "compiler busy");
    let server = spawn_server(vec![
        MockResponse::json(StatusCode::SERVICE_UNAVAILABLE, busy.clone()),
        MockResponse::json(StatusCode::SERVICE_UNAVAILABLE, busy.clone()),
        MockResponse::json(StatusCode::SERVICE_UNAVAILABLE, busy),
        MockResponse::json(StatusCode::OK, ok_envelope(json!({ "uptime": 42 }))),
    ])
    .await;
    let api = ApiClient::new(server.api_url()).with_options(ClientOptions {
        timeout: Duration::from_secs(2),
        max_attempts: 4,
        retry_delay: Duration::from_millis(20),
    });

    let started = Instant::now();
    let status = api.system_status().await.expect("must succeed on attempt 4");

    assert_eq!(status["uptime"], 42);
    assert_eq!(server.hits.load(Ordering::SeqCst), 4);
    // linear backoff: 20ms + 40ms + 60ms between the four attempts
    assert!(started.elapsed() >= Duration::from_millis(120));
}

#[tokio::test]
async fn server_errors_exhaust_the_attempt_ceiling() {
    let boom = error_envelope(500, "boom");
    let server = spawn_server(vec![
        MockResponse::json(StatusCode::INTERNAL_SERVER_ERROR, boom.clone()),
        MockResponse::json(StatusCode::INTERNAL_SERVER_ERROR, boom.clone()),
        MockResponse::json(StatusCode::INTERNAL_SERVER_ERROR, boom),
    ])
    .await;
    let api = ApiClient::new(server.api_url()).with_options(fast_options(3));

    let err = api.repository_status().await.expect_err("must fail");

    match err {
        ClientError::Api { status, message, .. } => {
            assert_eq!(status, 500);
            assert_eq!(message, "boom");
        }
        other => panic!("expected api error, got {other:?}"),
    }
    assert_eq!(server.hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn client_errors_get_exactly_one_attempt() {
    let server = spawn_server(vec![MockResponse::json(
        StatusCode::NOT_FOUND,
        error_envelope(404, "no such config"),
    )])
    .await;
    let api = ApiClient::new(server.api_url()).with_options(fast_options(3));

    let err = api.config("missing").await.expect_err("must fail");

    match err {
        ClientError::Api { status, message, .. } => {
            assert_eq!(status, 404);
            assert_eq!(message, "no such config");
        }
        other => panic!("expected api error, got {other:?}"),
    }
    assert_eq!(server.hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn timeouts_are_never_retried() {
    let server = spawn_server(vec![
        MockResponse::json(StatusCode::OK, ok_envelope(json!({})))
            .with_delay(Duration::from_millis(200)),
    ])
    .await;
    let api = ApiClient::new(server.api_url()).with_options(ClientOptions {
        timeout: Duration::from_millis(30),
        max_attempts: 3,
        retry_delay: Duration::from_millis(1),
    });

    let err = api.configs().await.expect_err("must time out");

    match err {
        ClientError::Transport(inner) => assert!(inner.is_timeout()),
        other => panic!("expected transport timeout, got {other:?}"),
    }
    assert_eq!(server.hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn login_persists_token_and_sends_bearer_auth() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cache_path = dir.path().join("auth_token");

    let server = spawn_server(vec![
        MockResponse::json(
            StatusCode::OK,
            ok_envelope(json!({ "token": "tok-1", "user": { "username": "kit" } })),
        ),
        MockResponse::json(StatusCode::OK, ok_envelope(json!({ "cloned": true }))),
        MockResponse::json(StatusCode::OK, ok_envelope(json!({ "cloned": true }))),
    ])
    .await;

    let api = ApiClient::new(server.api_url())
        .with_token_cache(TokenCache::new(&cache_path))
        .expect("cache attach");
    let login = api.login("kit", "hunter2").await.expect("login");
    assert_eq!(login.token, "tok-1");

    api.repository_status().await.expect("authed call");
    assert_eq!(
        server.last_auth_header().as_deref(),
        Some("Bearer tok-1"),
        "token must ride along after login"
    );

    // a fresh client resumes the session from the cache alone
    let resumed = ApiClient::new(server.api_url())
        .with_token_cache(TokenCache::new(&cache_path))
        .expect("cache attach");
    resumed.repository_status().await.expect("authed call");
    assert_eq!(server.last_auth_header().as_deref(), Some("Bearer tok-1"));
}

#[tokio::test]
async fn unauthorized_response_clears_the_cached_token() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cache = TokenCache::new(dir.path().join("auth_token"));
    cache.store("stale-token").expect("seed cache");

    let server = spawn_server(vec![MockResponse::json(
        StatusCode::UNAUTHORIZED,
        error_envelope(401, "invalid token"),
    )])
    .await;
    let api = ApiClient::new(server.api_url())
        .with_token_cache(cache.clone())
        .expect("cache attach");

    let err = api.configs().await.expect_err("must be unauthorized");
    match err {
        ClientError::Api { status, .. } => assert_eq!(status, 401),
        other => panic!("expected api error, got {other:?}"),
    }
    assert_eq!(api.token(), None);
    assert_eq!(cache.load().expect("load"), None);
}

#[tokio::test]
async fn logout_clears_token_and_cache() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cache = TokenCache::new(dir.path().join("auth_token"));
    cache.store("tok-2").expect("seed cache");

    let server = spawn_server(Vec::new()).await;
    let api = ApiClient::new(server.api_url())
        .with_token_cache(cache.clone())
        .expect("cache attach");
    assert_eq!(api.token().as_deref(), Some("tok-2"));

    api.logout().expect("logout");
    assert_eq!(api.token(), None);
    assert_eq!(cache.load().expect("load"), None);
}

#[tokio::test]
async fn stale_token_validation_clears_the_cache() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cache = TokenCache::new(dir.path().join("auth_token"));
    cache.store("stale-token").expect("seed cache");

    let server = spawn_server(vec![MockResponse::json(
        StatusCode::OK,
        json!({ "success": false, "message": "token expired" }),
    )])
    .await;
    let api = ApiClient::new(server.api_url())
        .with_token_cache(cache.clone())
        .expect("cache attach");

    let user = api.validate_token().await.expect("validation call");

    assert_eq!(user, None);
    assert_eq!(api.token(), None);
    assert_eq!(cache.load().expect("load"), None);
    assert_eq!(server.last_request(), "/api/auth/validate");
}

#[tokio::test]
async fn valid_token_validation_returns_the_user() {
    let server = spawn_server(vec![MockResponse::json(
        StatusCode::OK,
        ok_envelope(json!({ "user": { "username": "kit", "role": "admin" } })),
    )])
    .await;
    let api = ApiClient::new_bearer(server.api_url(), "tok-3");

    let user = api.validate_token().await.expect("validation call");

    assert_eq!(user.expect("valid token")["username"], "kit");
    assert_eq!(api.token().as_deref(), Some("tok-3"));
}

#[tokio::test]
async fn validation_without_a_token_skips_the_backend() {
    let server = spawn_server(Vec::new()).await;
    let api = ApiClient::new(server.api_url());

    let user = api.validate_token().await.expect("validation call");

    assert_eq!(user, None);
    assert_eq!(server.hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn device_search_sends_query_and_decodes() {
    let server = spawn_server(vec![MockResponse::json(
        StatusCode::OK,
        ok_envelope(json!({
            "devices": [{
                "id": "rpi-4b",
                "name": "Raspberry Pi 4B",
                "target": "bcm27xx/bcm2711",
                "keywords": ["raspberry", "rpi"]
            }],
            "total": 1
        })),
    )])
    .await;
    let api = ApiClient::new(server.api_url());

    let result = api.search_devices("rpi 4", 20).await.expect("search");

    assert_eq!(result.total, 1);
    assert_eq!(result.devices[0].id, "rpi-4b");
    assert_eq!(result.devices[0].target.as_deref(), Some("bcm27xx/bcm2711"));
    let request = server.last_request();
    assert!(request.starts_with("/api/devices/search?"));
    assert!(request.contains("q=rpi%204") || request.contains("q=rpi+4"));
    assert!(request.contains("limit=20"));
}

#[tokio::test]
async fn device_config_carries_istore_and_packages() {
    let server = spawn_server(vec![MockResponse::json(
        StatusCode::OK,
        ok_envelope(json!({ "device_id": "rpi-4b", "config": "CONFIG_TARGET_bcm27xx=y\n" })),
    )])
    .await;
    let api = ApiClient::new(server.api_url());

    let config = api
        .device_config("rpi-4b", true, &["luci".to_owned(), "htop".to_owned()])
        .await
        .expect("device config");

    assert!(config.config.starts_with("CONFIG_TARGET"));
    let request = server.last_request();
    assert!(request.starts_with("/api/devices/rpi-4b/config?"));
    assert!(request.contains("istore=true"));
    assert!(request.contains("packages=luci"));
    assert!(request.contains("packages=htop"));
}

#[tokio::test]
async fn compile_history_passes_the_limit() {
    let server = spawn_server(vec![MockResponse::json(
        StatusCode::OK,
        ok_envelope(json!([{ "device": "rpi-4b", "status": "success" }])),
    )])
    .await;
    let api = ApiClient::new(server.api_url());

    let history = api.compile_history("kit", 5).await.expect("history");

    assert_eq!(history[0]["status"], "success");
    assert_eq!(server.last_request(), "/api/users/kit/compile-history?limit=5");
}

#[tokio::test]
async fn envelope_level_failure_is_an_api_error() {
    let server = spawn_server(vec![MockResponse::json(
        StatusCode::OK,
        json!({ "success": false, "code": 400, "message": "invalid device", "error_code": "BAD_DEVICE" }),
    )])
    .await;
    let api = ApiClient::new(server.api_url());

    let err = api
        .delete_file(FileKind::Firmware, "fw.bin")
        .await
        .expect_err("must fail");

    match err {
        ClientError::Api {
            status,
            message,
            error_code,
        } => {
            assert_eq!(status, 400);
            assert_eq!(message, "invalid device");
            assert_eq!(error_code.as_deref(), Some("BAD_DEVICE"));
        }
        other => panic!("expected api error, got {other:?}"),
    }
}

#[tokio::test]
async fn health_check_maps_failures_to_unhealthy() {
    let server = spawn_server(vec![MockResponse::json(
        StatusCode::INTERNAL_SERVER_ERROR,
        error_envelope(500, "db down"),
    )])
    .await;
    let api = ApiClient::new(server.api_url()).with_options(fast_options(1));

    let health = api.health_check().await;

    assert!(!health.healthy);
    assert!(health.error.expect("error detail").contains("db down"));
}

#[derive(Clone, Default)]
struct UploadCapture {
    fields: Arc<Mutex<Vec<(String, String)>>>,
}

async fn upload_handler(
    State(capture): State<UploadCapture>,
    mut multipart: Multipart,
) -> impl IntoResponse {
    while let Some(field) = multipart.next_field().await.expect("multipart field") {
        let name = field.name().unwrap_or_default().to_owned();
        let value = match name.as_str() {
            "file" => field.file_name().unwrap_or_default().to_owned(),
            _ => field.text().await.expect("field text"),
        };
        capture
            .fields
            .lock()
            .expect("capture mutex must not be poisoned")
            .push((name, value));
    }
    (
        StatusCode::OK,
        Json(json!({ "success": true, "code": 200, "message": "uploaded" })),
    )
}

#[tokio::test]
async fn upload_sends_multipart_form() {
    let capture = UploadCapture::default();
    let app = Router::new()
        .route("/api/files/configs/:filename", post(upload_handler))
        .with_state(capture.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("must bind test listener");
    let address = listener.local_addr().expect("must have local addr");
    let task = tokio::spawn(async move {
        axum::serve(listener, app)
            .await
            .expect("mock server must run");
    });

    let api = ApiClient::new(format!("http://{address}/api"));
    let ack = api
        .upload_config_file("router.config", b"CONFIG_TARGET=1\n".to_vec(), true)
        .await
        .expect("upload must succeed");
    assert_eq!(ack.message.as_deref(), Some("uploaded"));

    let fields = capture
        .fields
        .lock()
        .expect("capture mutex must not be poisoned")
        .clone();
    assert!(fields.contains(&("file".to_owned(), "router.config".to_owned())));
    assert!(fields.contains(&("overwrite".to_owned(), "true".to_owned())));

    task.abort();
}

async fn firmware_bytes() -> impl IntoResponse {
    (StatusCode::OK, b"\x27\x05\x19\x56firmware-image".to_vec())
}

#[tokio::test]
async fn download_returns_raw_bytes() {
    let app = Router::new().route("/api/files/firmware/:filename", get(firmware_bytes));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("must bind test listener");
    let address = listener.local_addr().expect("must have local addr");
    let task = tokio::spawn(async move {
        axum::serve(listener, app)
            .await
            .expect("mock server must run");
    });

    let api = ApiClient::new(format!("http://{address}/api"));
    let bytes = api
        .download_file(FileKind::Firmware, "fw.bin")
        .await
        .expect("download must succeed");
    assert_eq!(&bytes[..4], b"\x27\x05\x19\x56");
    assert!(bytes.ends_with(b"firmware-image"));

    task.abort();
}
