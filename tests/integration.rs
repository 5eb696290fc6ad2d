//! Integration tests: health, publish validation, and a live SSE round trip
//! between the relay server and an `EventRelayStore` using `SseTransport`.
//!
//! Everything runs in-process without Redis. Redis fan-out is exercised only
//! when `TEST_REDIS_URL` is set.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use relay::client::{ConnectionStateHandler, EventHandler, EventRelayStore, SseTransport};
use relay::models::event::EventKind;
use relay::repositories::RedisRepository;
use relay::{create_app, AppState, ChannelService, RelayConfig, RelayEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tower::util::ServiceExt;

fn test_state() -> AppState {
    AppState {
        channel_service: ChannelService::local(16),
        sse_keepalive: Duration::from_secs(15),
    }
}

async fn json_body(res: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn publish_request(channel: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/api/events/{}", channel))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn health_returns_ok() {
    let app = create_app(test_state());
    let req = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let json = json_body(res).await;
    assert_eq!(json.get("status").and_then(|v| v.as_str()), Some("ok"));
    assert_eq!(json.get("service").and_then(|v| v.as_str()), Some("relay"));
}

#[tokio::test]
async fn publish_rejects_bad_channel_and_payloads() {
    let app = create_app(test_state());

    let res = app
        .clone()
        .oneshot(publish_request("user.1", r#"{"type":"heartbeat"}"#))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = app
        .clone()
        .oneshot(publish_request("project.p1", r#"{"type":"teleport"}"#))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert!(json_body(res).await["error"]
        .as_str()
        .unwrap()
        .starts_with("Invalid payload"));

    let res = app
        .clone()
        .oneshot(publish_request("project.p1", r#"{"type":"progress","progress":250}"#))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = app
        .oneshot(publish_request(
            "project.p1",
            r#"{"type":"heartbeat","projectId":""}"#,
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn publish_without_listeners_reports_zero() {
    let app = create_app(test_state());
    let res = app
        .oneshot(publish_request("project.p1", r#"{"type":"status","status":"queued"}"#))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let json = json_body(res).await;
    assert_eq!(json["ok"], true);
    assert_eq!(json["channel"], "project.p1");
    assert_eq!(json["type"], "status");
    assert_eq!(json["subscriber_count"], 0);
}

#[tokio::test]
async fn publish_accepts_events_missing_payload_fields() {
    let app = create_app(test_state());
    let res = app
        .oneshot(publish_request(
            "project.p1",
            r#"{"type":"progress","status":"processing"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(json_body(res).await["type"], "progress");
}

#[tokio::test]
async fn events_rejects_bad_channel() {
    let app = create_app(test_state());
    let req = Request::builder()
        .uri("/api/events/project.")
        .body(Body::empty())
        .unwrap();
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

async fn spawn_server(state: AppState) -> std::net::SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, create_app(state)).await.unwrap();
    });
    addr
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<RelayEvent>) -> RelayEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("handler channel closed")
}

async fn round_trip(state: AppState) {
    let addr = spawn_server(state).await;
    let base = format!("http://{}", addr);

    let mut config = RelayConfig::default().with_base_url(base.clone());
    config.reconnect_delay = Duration::from_millis(100);
    let store = EventRelayStore::new(Arc::new(SseTransport::from_config(&config)), config);
    let (up_tx, mut up_rx) = mpsc::unbounded_channel();
    store.add_connection_state_handler(ConnectionStateHandler::new(move |up| {
        let _ = up_tx.send(up);
    }));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handler = EventHandler::new(move |ev: &RelayEvent| {
        let _ = tx.send(ev.clone());
    });

    store.connect("/api/events/project.p1", &[handler.clone()], Some("req-1"));

    let hello = next_event(&mut rx).await;
    assert_eq!(hello.kind, EventKind::Connected);
    assert_eq!(hello.subject(), Some("p1"));
    assert_eq!(up_rx.recv().await, Some(true));
    assert!(store.is_connected());

    let res = reqwest::Client::new()
        .post(format!("{}/api/events/project.p1", base))
        .body(r#"{"type":"progress","progress":42,"requestId":"req-1"}"#)
        .send()
        .await
        .unwrap();
    assert!(res.status().is_success());

    let progress = next_event(&mut rx).await;
    assert_eq!(progress.subject(), Some("p1"));
    assert_eq!(progress.request_id.as_deref(), Some("req-1"));
    assert_eq!(
        progress.kind,
        EventKind::Progress {
            progress: Some(42.0),
            status: None
        }
    );

    store.disconnect();
    assert!(!store.is_connected());
    assert_eq!(up_rx.recv().await, Some(false));
}

#[tokio::test]
async fn sse_round_trip_in_process() {
    round_trip(test_state()).await;
}

#[tokio::test]
async fn sse_round_trip_through_redis() {
    let redis_url = match std::env::var("TEST_REDIS_URL") {
        Ok(u) => u,
        Err(_) => {
            eprintln!("Skip redis round trip: set TEST_REDIS_URL");
            return;
        }
    };
    let repo = match RedisRepository::new(&redis_url) {
        Ok(r) => Arc::new(r),
        Err(e) => {
            eprintln!("Skip redis round trip: {}", e);
            return;
        }
    };
    round_trip(AppState {
        channel_service: ChannelService::new(Some(repo), 16),
        sse_keepalive: Duration::from_secs(15),
    })
    .await;
}
