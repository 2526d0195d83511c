#![cfg(feature = "retrieve")]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::Router;

use lib_dispatch::gateway::{GatewayError, NextCall, ResourceGateway};
use lib_dispatch::models::{DispatchCommand, ServiceKind};
use lib_dispatch::retrieve::{ClientSettings, HttpGateway, HttpGatewayConfig};

/// Stub coordinator. Each field tunes one endpoint.
#[derive(Default)]
struct Stub {
    /// Bearer token the protected endpoints accept.
    valid_token: Mutex<String>,
    /// Number of malformed `calls/queue` answers before a valid one.
    garbled_queue_answers: AtomicUsize,
    /// Body returned by `{kind}/search`.
    search_body: Mutex<String>,
    /// Body returned by `{kind}/searchbycity`.
    availability_body: Mutex<String>,
    /// `calls/next` answers 404 when set.
    queue_empty: bool,
    refresh_allowed: bool,

    logins: AtomicUsize,
    refreshes: AtomicUsize,
    queue_requests: AtomicUsize,
    search_requests: AtomicUsize,
    seen_queries: Mutex<Vec<HashMap<String, String>>>,
    dispatches: Mutex<Vec<(String, serde_json::Value)>>,
}

type Shared = Arc<Stub>;

fn authorized(stub: &Stub, headers: &HeaderMap) -> bool {
    let expected = format!("Bearer {}", stub.valid_token.lock().unwrap());
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == expected)
        .unwrap_or(false)
}

async fn login(State(stub): State<Shared>, body: String) -> (StatusCode, String) {
    stub.logins.fetch_add(1, Ordering::SeqCst);
    let parsed: serde_json::Value = serde_json::from_str(&body).unwrap_or_default();
    if parsed["userName"] != "distancify" || parsed["password"] != "hackathon" {
        return (StatusCode::UNAUTHORIZED, String::new());
    }
    (StatusCode::OK, r#"{"Token":"first","RefreshToken":"renew-me"}"#.to_string())
}

async fn refresh(State(stub): State<Shared>, headers: HeaderMap) -> (StatusCode, String) {
    stub.refreshes.fetch_add(1, Ordering::SeqCst);
    let presented = headers.get("refresh_token").and_then(|v| v.to_str().ok());
    if !stub.refresh_allowed || presented != Some("renew-me") {
        return (StatusCode::UNAUTHORIZED, String::new());
    }
    *stub.valid_token.lock().unwrap() = "second".to_string();
    (StatusCode::OK, r#"{"Token":"second","RefreshToken":"renew-again"}"#.to_string())
}

async fn next_call(State(stub): State<Shared>, headers: HeaderMap) -> (StatusCode, String) {
    if !authorized(&stub, &headers) {
        return (StatusCode::UNAUTHORIZED, String::new());
    }
    if stub.queue_empty {
        return (StatusCode::NOT_FOUND, String::new());
    }
    (
        StatusCode::OK,
        r#"{"county":"Lincoln","city":"Springfield","latitude":1.5,"longitude":2.5,
            "requests":[{"Type":"Fire","Quantity":2},{"type":"Medical","quantity":1}]}"#
            .to_string(),
    )
}

async fn call_queue(State(stub): State<Shared>) -> (StatusCode, String) {
    stub.queue_requests.fetch_add(1, Ordering::SeqCst);
    let garbled = stub.garbled_queue_answers.load(Ordering::SeqCst);
    if garbled > 0 {
        stub.garbled_queue_answers.store(garbled - 1, Ordering::SeqCst);
        return (StatusCode::OK, "[{\"county\":".to_string());
    }
    (StatusCode::OK, "[]".to_string())
}

async fn search(State(stub): State<Shared>, Path(_kind): Path<String>) -> (StatusCode, String) {
    stub.search_requests.fetch_add(1, Ordering::SeqCst);
    (StatusCode::OK, stub.search_body.lock().unwrap().clone())
}

async fn search_by_city(
    State(stub): State<Shared>,
    Path(kind): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, String) {
    let mut params = params;
    params.insert("kind".to_string(), kind);
    stub.seen_queries.lock().unwrap().push(params);
    (StatusCode::OK, stub.availability_body.lock().unwrap().clone())
}

async fn dispatch(State(stub): State<Shared>, Path(kind): Path<String>, body: String) -> StatusCode {
    match serde_json::from_str(&body) {
        Ok(value) => {
            stub.dispatches.lock().unwrap().push((kind, value));
            StatusCode::OK
        }
        Err(_) => StatusCode::BAD_REQUEST,
    }
}

async fn reset(State(stub): State<Shared>, Query(params): Query<HashMap<String, String>>) -> (StatusCode, String) {
    stub.seen_queries.lock().unwrap().push(params);
    (StatusCode::OK, r#"{"status":"Running","seed":"default","targetDispatches":50}"#.to_string())
}

async fn status(State(stub): State<Shared>, headers: HeaderMap) -> (StatusCode, String) {
    if !authorized(&stub, &headers) {
        return (StatusCode::UNAUTHORIZED, String::new());
    }
    (StatusCode::OK, r#"{"status":"Running","totalDispatches":7}"#.to_string())
}

async fn spawn(stub: Stub) -> (Shared, HttpGateway) {
    let stub = Arc::new(stub);
    let app = Router::new()
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/calls/next", get(next_call))
        .route("/calls/queue", get(call_queue))
        .route("/control/reset", post(reset))
        .route("/control/status", get(status))
        .route("/{kind}/search", get(search))
        .route("/{kind}/searchbycity", get(search_by_city))
        .route("/{kind}/dispatch", post(dispatch))
        .with_state(Arc::clone(&stub));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let config = HttpGatewayConfig {
        base_url: format!("http://{}", addr),
        client: ClientSettings {
            max_retries: 0,
            timeout: Duration::from_secs(5),
            ..ClientSettings::default()
        },
        decode_backoff: Duration::from_millis(1),
        ..HttpGatewayConfig::default()
    };
    (stub, HttpGateway::new(config).unwrap())
}

fn stub_with_token() -> Stub {
    Stub { valid_token: Mutex::new("first".to_string()), ..Stub::default() }
}

#[tokio::test]
async fn not_found_on_next_call_is_an_empty_queue() {
    let (_stub, gateway) = spawn(Stub { queue_empty: true, ..stub_with_token() }).await;
    gateway.authenticate().await.unwrap();

    assert_eq!(gateway.next_call().await.unwrap(), NextCall::Empty);
}

#[tokio::test]
async fn next_call_accepts_either_casing_of_request_fields() {
    let (_stub, gateway) = spawn(stub_with_token()).await;
    gateway.authenticate().await.unwrap();

    let NextCall::Call(call) = gateway.next_call().await.unwrap() else {
        panic!("expected a call");
    };
    assert_eq!(call.target_key(), "Springfield::Lincoln");
    assert_eq!(call.requests().len(), 2);
    assert_eq!(call.requests()[0].kind, ServiceKind::Fire);
    assert_eq!(call.requests()[1].quantity, 1);
}

#[tokio::test]
async fn availability_is_a_plain_integer_with_encoded_query() {
    let stub = stub_with_token();
    *stub.availability_body.lock().unwrap() = "7".to_string();
    let (stub, gateway) = spawn(stub).await;

    let count = gateway
        .check_availability(ServiceKind::Police, "Lincoln County", "Spring field")
        .await
        .unwrap();

    assert_eq!(count, 7);
    let seen = stub.seen_queries.lock().unwrap();
    assert_eq!(seen[0]["kind"], "Police");
    assert_eq!(seen[0]["county"], "Lincoln County");
    assert_eq!(seen[0]["city"], "Spring field");
}

#[tokio::test]
async fn negative_availability_is_rejected_without_retry() {
    let stub = stub_with_token();
    *stub.search_body.lock().unwrap() =
        r#"[{"county":"Lincoln","city":"A","latitude":1.0,"longitude":2.0,"quantity":-4}]"#.to_string();
    let (stub, gateway) = spawn(stub).await;

    let result = gateway.service_availability(ServiceKind::Medical).await;

    assert!(matches!(result, Err(GatewayError::Validation(_))));
    assert_eq!(stub.search_requests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn out_of_range_coordinates_are_rejected() {
    let stub = stub_with_token();
    *stub.search_body.lock().unwrap() =
        r#"[{"county":"Lincoln","city":"A","latitude":91.0,"longitude":2.0,"quantity":4}]"#.to_string();
    let (_stub, gateway) = spawn(stub).await;

    assert!(matches!(
        gateway.service_availability(ServiceKind::Medical).await,
        Err(GatewayError::Validation(_))
    ));
}

#[tokio::test]
async fn malformed_payload_is_fetched_again() {
    let stub = stub_with_token();
    stub.garbled_queue_answers.store(2, Ordering::SeqCst);
    let (stub, gateway) = spawn(stub).await;

    let queue = gateway.call_queue().await.unwrap();

    assert!(queue.is_empty());
    assert_eq!(stub.queue_requests.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn persistently_malformed_payload_is_a_decode_error() {
    let stub = stub_with_token();
    stub.garbled_queue_answers.store(10, Ordering::SeqCst);
    let (stub, gateway) = spawn(stub).await;

    let result = gateway.call_queue().await;

    assert!(matches!(result, Err(GatewayError::Decode { ref path, .. }) if path == "calls/queue"));
    assert_eq!(stub.queue_requests.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn expired_token_is_refreshed_and_the_call_resent() {
    let (stub, gateway) = spawn(Stub { refresh_allowed: true, ..stub_with_token() }).await;
    gateway.authenticate().await.unwrap();
    // The coordinator rotates its accepted token behind the client's back.
    *stub.valid_token.lock().unwrap() = "rotated".to_string();

    // Refresh installs "second" on both sides.
    let status = gateway.run_status().await.unwrap();

    assert_eq!(status.total_dispatches, 7);
    assert_eq!(stub.refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(gateway.tokens().bearer().await.as_deref(), Some("second"));
}

#[tokio::test]
async fn refresh_attempts_are_bounded() {
    let (stub, gateway) = spawn(Stub { refresh_allowed: false, ..stub_with_token() }).await;
    gateway.authenticate().await.unwrap();
    *stub.valid_token.lock().unwrap() = "rotated".to_string();

    let result = gateway.run_status().await;

    assert!(matches!(result, Err(GatewayError::Unauthorized { attempts: 1 })));
    assert_eq!(stub.refreshes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn concurrent_rejections_share_one_refresh() {
    let (stub, gateway) = spawn(Stub { refresh_allowed: true, ..stub_with_token() }).await;
    gateway.authenticate().await.unwrap();
    *stub.valid_token.lock().unwrap() = "rotated".to_string();

    // A second refresh would present "renew-again" and be rejected.
    let results = futures_util::future::join_all((0..5).map(|_| gateway.run_status())).await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(stub.refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(gateway.tokens().bearer().await.as_deref(), Some("second"));
}

#[tokio::test]
async fn cleared_credentials_are_not_sent() {
    let (_stub, gateway) = spawn(stub_with_token()).await;
    gateway.authenticate().await.unwrap();
    gateway.clear_credentials().await;

    assert_eq!(gateway.tokens().bearer().await, None);
}

#[tokio::test]
async fn dispatch_posts_camel_case_body_under_the_kind_path() {
    let (stub, gateway) = spawn(stub_with_token()).await;
    let command = DispatchCommand {
        source_county: "Lincoln".into(),
        source_city: "A".into(),
        target_county: "Lincoln".into(),
        target_city: "Springfield".into(),
        quantity: 2,
        kind: ServiceKind::Fire,
    };

    gateway.commit_dispatch(&command).await.unwrap();

    let dispatches = stub.dispatches.lock().unwrap();
    assert_eq!(dispatches.len(), 1);
    let (kind, body) = &dispatches[0];
    assert_eq!(kind, "Fire");
    assert_eq!(
        *body,
        serde_json::json!({
            "sourceCounty": "Lincoln",
            "sourceCity": "A",
            "targetCounty": "Lincoln",
            "targetCity": "Springfield",
            "quantity": 2
        })
    );
}

#[tokio::test]
async fn invalid_dispatch_is_never_sent() {
    let (stub, gateway) = spawn(stub_with_token()).await;
    let command = DispatchCommand {
        source_county: "Lincoln".into(),
        source_city: "A".into(),
        target_county: "Lincoln".into(),
        target_city: " ".into(),
        quantity: 2,
        kind: ServiceKind::Fire,
    };

    let result = gateway.commit_dispatch(&command).await;

    assert!(matches!(result, Err(GatewayError::InvalidArgument(_))));
    assert!(stub.dispatches.lock().unwrap().is_empty());
}

#[tokio::test]
async fn reset_sends_run_parameters_as_query() {
    let (stub, gateway) = spawn(stub_with_token()).await;

    let status = gateway.reset_run("seed-42", 25, 5).await.unwrap();

    assert_eq!(status.status, "Running");
    let seen = stub.seen_queries.lock().unwrap();
    assert_eq!(seen[0]["seed"], "seed-42");
    assert_eq!(seen[0]["targetDispatches"], "25");
    assert_eq!(seen[0]["maxActiveCalls"], "5");
}

#[tokio::test]
async fn failed_login_surfaces_the_status() {
    let stub = stub_with_token();
    let (_stub, gateway) = spawn(stub).await;
    let bad = HttpGateway::new(HttpGatewayConfig {
        password: "wrong".into(),
        base_url: gateway_base(&gateway),
        client: ClientSettings { max_retries: 0, ..ClientSettings::default() },
        ..HttpGatewayConfig::default()
    })
    .unwrap();

    assert!(matches!(
        bad.authenticate().await,
        Err(GatewayError::Status { status: 401, .. })
    ));
}

fn gateway_base(gateway: &HttpGateway) -> String {
    gateway.base_url().to_string()
}
