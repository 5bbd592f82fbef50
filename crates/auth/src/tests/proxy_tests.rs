use super::*;

use std::sync::Arc;

use axum::{
    extract::State,
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};
use tokio::{
    net::TcpListener,
    sync::{oneshot, Mutex},
};

#[derive(Clone)]
struct ProxyState {
    status: StatusCode,
    body: Value,
    headers_tx: Arc<Mutex<Option<oneshot::Sender<HeaderMap>>>>,
}

async fn handle_token(
    State(state): State<ProxyState>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    if let Some(tx) = state.headers_tx.lock().await.take() {
        let _ = tx.send(headers);
    }
    (state.status, Json(state.body.clone()))
}

async fn spawn_proxy(status: StatusCode, body: Value) -> (Url, oneshot::Receiver<HeaderMap>) {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let (tx, rx) = oneshot::channel();
    let state = ProxyState {
        status,
        body,
        headers_tx: Arc::new(Mutex::new(Some(tx))),
    };
    let app = Router::new()
        .route("/api/token", post(handle_token))
        .with_state(state);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    let endpoint = Url::parse(&format!("http://{addr}/api/token")).expect("endpoint url");
    (endpoint, rx)
}

#[tokio::test]
async fn parses_token_and_relative_expiry() {
    let (endpoint, headers_rx) = spawn_proxy(
        StatusCode::OK,
        json!({"access_token": "tok-live", "expires_in": 3600}),
    )
    .await;

    let credential = ProxyTokenAcquirer::new(endpoint)
        .acquire()
        .await
        .expect("token");

    assert_eq!(credential.token(), "tok-live");
    let expires_at = credential.expires_at().expect("expiry");
    assert!(expires_at > Utc::now() + chrono::Duration::seconds(3500));

    let headers = headers_rx.await.expect("captured headers");
    assert_eq!(
        headers.get("content-type").and_then(|v| v.to_str().ok()),
        Some("application/json")
    );
}

#[tokio::test]
async fn absolute_expiry_wins_over_relative() {
    let (endpoint, _headers_rx) = spawn_proxy(
        StatusCode::OK,
        json!({
            "access_token": "tok-live",
            "expires_in": 60,
            "expires_on": "4102444800"
        }),
    )
    .await;

    let credential = ProxyTokenAcquirer::new(endpoint)
        .acquire()
        .await
        .expect("token");

    assert_eq!(
        credential.expires_at(),
        DateTime::<Utc>::from_timestamp(4_102_444_800, 0)
    );
}

#[tokio::test]
async fn error_status_surfaces_the_body_message() {
    let (endpoint, _headers_rx) = spawn_proxy(
        StatusCode::BAD_GATEWAY,
        json!({"error": {"message": "issuer unreachable"}}),
    )
    .await;

    let err = ProxyTokenAcquirer::new(endpoint)
        .acquire()
        .await
        .expect_err("must fail");

    match err {
        AuthError::Status { status, message } => {
            assert_eq!(status, 502);
            assert_eq!(message, "issuer unreachable");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn oversized_relative_expiry_still_yields_a_credential() {
    let (endpoint, _headers_rx) = spawn_proxy(
        StatusCode::OK,
        json!({"access_token": "tok-live", "expires_in": i64::MAX}),
    )
    .await;

    let credential = ProxyTokenAcquirer::new(endpoint)
        .acquire()
        .await
        .expect("token");

    assert_eq!(credential.token(), "tok-live");
    assert!(credential.expires_at().is_none());
}

#[tokio::test]
async fn token_less_success_body_is_malformed() {
    let (endpoint, _headers_rx) = spawn_proxy(StatusCode::OK, json!({"ok": true})).await;

    let err = ProxyTokenAcquirer::new(endpoint)
        .acquire()
        .await
        .expect_err("must fail");

    assert!(matches!(err, AuthError::Malformed(_)));
}

#[test]
fn numeric_absolute_expiry_parses() {
    let body: ProxyTokenResponse = serde_json::from_value(json!({
        "access_token": "tok",
        "expires_on": 4102444800i64
    }))
    .expect("parse response");

    let credential = credential_from_response(body, Utc::now());
    assert_eq!(
        credential.expires_at(),
        DateTime::<Utc>::from_timestamp(4_102_444_800, 0)
    );
}

#[test]
fn missing_expiry_means_no_client_side_expiry() {
    let body: ProxyTokenResponse =
        serde_json::from_value(json!({"access_token": "tok"})).expect("parse response");

    let credential = credential_from_response(body, Utc::now());
    assert!(credential.expires_at().is_none());
}

#[test]
fn out_of_range_relative_expiry_is_dropped() {
    let body: ProxyTokenResponse = serde_json::from_value(json!({
        "access_token": "tok",
        "expires_in": i64::MAX
    }))
    .expect("parse response");

    let credential = credential_from_response(body, Utc::now());
    assert!(credential.expires_at().is_none());
}
