//! Gateway End-to-End Tests
//!
//! Drives the gateway router against a fake queue service so the full path
//! runs: admission, decode, queue provisioning, signed submission, response.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use wiremock::matchers::{header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, Request as ReceivedRequest, ResponseTemplate};

use signal_gateway::{
    AppState, AzureQueueClient, GatewayConfig, GatewayStats, PolicyEvaluator, SignalDelivery,
    SignalEvent, create_router, parse_signal,
};

const ORIGIN: &str = "https://alerts.example.com";
const BODY: &str = r#"{"ticker":"ES1!","action":"sell","close":5321.5,"contracts":2,"key":"shared-secret"}"#;
const PUT_RESPONSE: &str = "<?xml version=\"1.0\" encoding=\"utf-8\"?><QueueMessagesList><QueueMessage>\
    <MessageId>0f6c1d2e-1111-2222-3333-444455556666</MessageId></QueueMessage></QueueMessagesList>";

fn config(server: &MockServer, overrides: &[(&str, &str)]) -> GatewayConfig {
    let queue_url = format!("{}/signals", server.uri());
    let mut env: HashMap<String, String> = [
        ("ALLOWED_ORIGIN", "*.example.com"),
        ("AUTHORIZATION_TOKEN", "shared-secret"),
        ("REQUIRE_SIGNAL_KEY", "true"),
        ("SIGNAL_QUEUE_URL", queue_url.as_str()),
        ("SIGNAL_QUEUE_ACCOUNT_NAME", "acct"),
        ("SIGNAL_QUEUE_ACCOUNT_KEY", "c2VjcmV0LWtleS1mb3ItdGVzdHM="),
        ("SIGNAL_QUEUE_MESSAGE_TTL_SECS", "-1"),
        ("SIGNAL_QUEUE_CLIENT_TIMEOUT_MS", "2000"),
        ("SIGNAL_QUEUE_CLIENT_RETRIES", "3"),
        ("GATEWAY_REQUEST_TIMEOUT_MS", "10000"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    for (key, value) in overrides {
        env.insert((*key).to_string(), (*value).to_string());
    }

    GatewayConfig::from_lookup(|key| env.get(key).cloned()).unwrap()
}

fn gateway(config: &GatewayConfig) -> Router {
    let queue = Arc::new(AzureQueueClient::new(config.queue.client_config()).unwrap());
    let state = AppState::new(
        PolicyEvaluator::new(config.policy.clone()),
        SignalDelivery::new(queue, config.queue.message_ttl),
        config.server.clone(),
        Arc::new(GatewayStats::new()),
        CancellationToken::new(),
    );
    create_router(state)
}

/// Serve `app` on an ephemeral port until `shutdown` is cancelled.
async fn serve(app: Router, shutdown: CancellationToken) -> (String, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
            .unwrap();
    });
    (format!("http://{addr}/api/gateway"), handle)
}

fn signal_post() -> Request<Body> {
    Request::post("/api/gateway")
        .header("origin", ORIGIN)
        .header("content-type", "application/json")
        .body(Body::from(BODY))
        .unwrap()
}

async fn mount_probe_ok(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/signals"))
        .and(query_param("comp", "metadata"))
        .and(header_exists("authorization"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-ms-approximate-messages-count", "7")
                .insert_header("x-ms-request-id", "probe-req"),
        )
        .mount(server)
        .await;
}

async fn mount_put_ok(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/signals/messages"))
        .and(query_param("messagettl", "-1"))
        .and(header_exists("authorization"))
        .respond_with(
            ResponseTemplate::new(201)
                .insert_header("x-ms-request-id", "put-req")
                .set_body_string(PUT_RESPONSE),
        )
        .mount(server)
        .await;
}

async fn queued_messages(server: &MockServer) -> Vec<SignalEvent> {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.method == Method::POST)
        .map(decode_message)
        .collect()
}

fn decode_message(request: &ReceivedRequest) -> SignalEvent {
    let body = String::from_utf8(request.body.clone()).unwrap();
    let start = body.find("<MessageText>").unwrap() + "<MessageText>".len();
    let end = body.find("</MessageText>").unwrap();
    parse_signal(&BASE64.decode(&body[start..end]).unwrap()).unwrap()
}

#[tokio::test]
async fn accepted_signal_is_enqueued_once_with_correlation_id() {
    let server = MockServer::start().await;
    mount_probe_ok(&server).await;
    mount_put_ok(&server).await;
    let app = gateway(&config(&server, &[]));

    let response = app.oneshot(signal_post()).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let request_id = response.headers()["x-request-id"]
        .to_str()
        .unwrap()
        .to_string();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let echoed: SignalEvent = serde_json::from_slice(&body).unwrap();
    assert_eq!(echoed.ticker, "ES1!");
    assert_eq!(echoed.key, None);

    let queued = queued_messages(&server).await;
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].key, None);
    assert_eq!(queued[0].notes, Some(format!("requestId={request_id}")));
}

#[tokio::test]
async fn missing_queue_is_created_then_used() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/signals"))
        .respond_with(ResponseTemplate::new(404).insert_header("x-ms-error-code", "QueueNotFound"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_probe_ok(&server).await;
    Mock::given(method("PUT"))
        .and(path("/signals"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;
    mount_put_ok(&server).await;
    let app = gateway(&config(&server, &[]));

    let response = app.oneshot(signal_post()).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let sequence: Vec<String> = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|r| r.method.to_string())
        .collect();
    assert_eq!(sequence, vec!["GET", "PUT", "GET", "POST"]);
}

#[tokio::test]
async fn enqueue_timeout_fails_within_retry_bound() {
    let server = MockServer::start().await;
    mount_probe_ok(&server).await;
    Mock::given(method("POST"))
        .and(path("/signals/messages"))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_string(PUT_RESPONSE)
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;
    let app = gateway(&config(
        &server,
        &[
            ("SIGNAL_QUEUE_CLIENT_TIMEOUT_MS", "100"),
            ("SIGNAL_QUEUE_CLIENT_RETRIES", "2"),
        ],
    ));

    let response = app.oneshot(signal_post()).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"Internal Server Error");

    let attempts = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.method == Method::POST)
        .count();
    assert!((1..=2).contains(&attempts), "attempts = {attempts}");
}

#[tokio::test]
async fn identical_posts_enqueue_independently() {
    let server = MockServer::start().await;
    mount_probe_ok(&server).await;
    mount_put_ok(&server).await;
    let app = gateway(&config(&server, &[]));

    let first = app.clone().oneshot(signal_post()).await.unwrap();
    let second = app.oneshot(signal_post()).await.unwrap();

    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(second.status(), StatusCode::OK);
    assert_ne!(
        first.headers()["x-request-id"],
        second.headers()["x-request-id"]
    );

    let queued = queued_messages(&server).await;
    assert_eq!(queued.len(), 2);
    assert_ne!(queued[0].request_id(), queued[1].request_id());
}

#[tokio::test]
async fn denied_requests_never_reach_the_queue() {
    let server = MockServer::start().await;
    let app = gateway(&config(&server, &[]));

    let wrong_origin = Request::post("/api/gateway")
        .header("origin", "https://evil.test")
        .body(Body::from(BODY))
        .unwrap();
    let wrong_key = Request::post("/api/gateway")
        .header("origin", ORIGIN)
        .body(Body::from(BODY.replace("shared-secret", "guess")))
        .unwrap();
    let get = Request::get("/api/gateway")
        .header("origin", ORIGIN)
        .body(Body::empty())
        .unwrap();
    let preflight = Request::options("/api/gateway")
        .header("origin", ORIGIN)
        .body(Body::empty())
        .unwrap();

    let statuses = [
        app.clone().oneshot(wrong_origin).await.unwrap().status(),
        app.clone().oneshot(wrong_key).await.unwrap().status(),
        app.clone().oneshot(get).await.unwrap().status(),
        app.oneshot(preflight).await.unwrap().status(),
    ];

    assert_eq!(
        statuses,
        [
            StatusCode::UNAUTHORIZED,
            StatusCode::UNAUTHORIZED,
            StatusCode::METHOD_NOT_ALLOWED,
            StatusCode::NO_CONTENT,
        ]
    );
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn graceful_shutdown_lets_in_flight_delivery_finish() {
    let server = MockServer::start().await;
    mount_probe_ok(&server).await;
    Mock::given(method("POST"))
        .and(path("/signals/messages"))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_string(PUT_RESPONSE)
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;
    let shutdown = CancellationToken::new();
    let (url, handle) = serve(gateway(&config(&server, &[])), shutdown.clone()).await;

    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let response = reqwest::Client::new()
        .post(&url)
        .header("origin", ORIGIN)
        .header("content-type", "application/json")
        .body(BODY)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let echoed: SignalEvent = response.json().await.unwrap();
    assert_eq!(echoed.ticker, "ES1!");
    assert_eq!(queued_messages(&server).await.len(), 1);

    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
}
