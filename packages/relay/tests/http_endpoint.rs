//! HTTP Endpoint Tests
//!
//! Serves the relay on an ephemeral port and drives it with a real HTTP
//! client. The webhook side is either a recording notifier or a local axum
//! server standing in for the chat service.

mod support;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde_json::Value;
use tokio::net::TcpListener;

use verto_relay::dedup::MemoryLedger;
use verto_relay::publisher::{Notifier, WebhookNotifier, WebhookTarget};
use verto_relay::relay::{Relay, RelayConfig};
use verto_relay::server::{self, SENT_BODY};

use support::{eth_deposit_tx, MockLedger, RecordingNotifier};

async fn spawn_relay(ledger: Arc<MockLedger>, notifier: Arc<dyn Notifier>) -> SocketAddr {
    let relay = Arc::new(Relay::new(
        ledger,
        notifier,
        Arc::new(MemoryLedger::new()),
        RelayConfig::default(),
    ));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server::serve(listener, relay));
    addr
}

async fn get(url: String) -> (StatusCode, String) {
    let response = reqwest::get(url).await.unwrap();
    let status = StatusCode::from_u16(response.status().as_u16()).unwrap();
    (status, response.text().await.unwrap())
}

// ==================== Endpoint tests ====================

#[tokio::test]
async fn test_send_then_repeat() {
    let ledger = Arc::new(MockLedger::new());
    ledger.add_transaction(eth_deposit_tx("abc"));
    let notifier = RecordingNotifier::new();
    let addr = spawn_relay(ledger, Arc::new(notifier.clone())).await;

    let (status, body) = get(format!("http://{}/?id=abc", addr)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, SENT_BODY);

    let (status, body) = get(format!("http://{}/?id=abc", addr)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body, "Already sent");

    assert_eq!(notifier.message_count(), 1);
}

#[tokio::test]
async fn test_transaction_route_and_legacy_legs() {
    let ledger = Arc::new(MockLedger::new());
    ledger.add_transaction(eth_deposit_tx("abc"));
    let notifier = RecordingNotifier::new();
    let addr = spawn_relay(ledger, Arc::new(notifier.clone())).await;

    let (status, _) = get(format!(
        "http://{}/transaction?id=abc&from=1%20AR&to=0.1%20ETH",
        addr
    ))
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(notifier.messages()[0].embeds[0]
        .description
        .starts_with("1 AR → 0.1 ETH"));
}

#[tokio::test]
async fn test_missing_id_is_refused() {
    let addr = spawn_relay(Arc::new(MockLedger::new()), Arc::new(RecordingNotifier::new())).await;

    for path in ["/", "/?id=", "/?foo=bar"] {
        let (status, body) = get(format!("http://{}{}", addr, path)).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "path {}", path);
        assert_eq!(body, "Invalid request");
    }
}

#[tokio::test]
async fn test_ineligible_transaction_is_refused() {
    let ledger = Arc::new(MockLedger::new());
    let mut tx = eth_deposit_tx("abc");
    tx.recipient = "someone-else".to_string();
    ledger.add_transaction(tx);
    let addr = spawn_relay(ledger, Arc::new(RecordingNotifier::new())).await;

    let (status, body) = get(format!("http://{}/?id=abc", addr)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body, "Invalid trading post");
}

#[tokio::test]
async fn test_upstream_failures_are_500() {
    let ledger = Arc::new(MockLedger::new());
    ledger.add_transaction(eth_deposit_tx("abc"));
    let notifier = RecordingNotifier::new();
    notifier.set_fail_next(1);
    let addr = spawn_relay(ledger, Arc::new(notifier.clone())).await;

    // unknown to the gateway
    let (status, _) = get(format!("http://{}/?id=missing", addr)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    // webhook refuses once, then the retry goes through
    let (status, _) = get(format!("http://{}/?id=abc", addr)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let (status, _) = get(format!("http://{}/?id=abc", addr)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(notifier.message_count(), 1);
}

#[tokio::test]
async fn test_health() {
    let addr = spawn_relay(Arc::new(MockLedger::new()), Arc::new(RecordingNotifier::new())).await;
    let (status, body) = get(format!("http://{}/health", addr)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ok");
}

// ==================== Webhook delivery tests ====================

type Captured = Arc<Mutex<Vec<Value>>>;

async fn capture(State(captured): State<Captured>, Json(body): Json<Value>) -> StatusCode {
    captured.lock().unwrap().push(body);
    StatusCode::NO_CONTENT
}

async fn spawn_webhook(status_override: Option<StatusCode>) -> (String, Captured) {
    let captured: Captured = Arc::new(Mutex::new(Vec::new()));
    let app: Router = match status_override {
        Some(status) => Router::new().route("/hook", post(move || async move { (status, "nope") })),
        None => Router::new()
            .route("/hook", post(capture))
            .with_state(captured.clone()),
    };
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await });
    (format!("http://{}/hook", addr), captured)
}

#[tokio::test]
async fn test_webhook_receives_embed() {
    let (hook_url, captured) = spawn_webhook(None).await;
    let ledger = Arc::new(MockLedger::new());
    ledger.add_transaction(eth_deposit_tx("abc"));
    let notifier = WebhookNotifier::new(WebhookTarget::Url(hook_url)).unwrap();
    let addr = spawn_relay(ledger, Arc::new(notifier)).await;

    let (status, _) = get(format!("http://{}/?id=abc", addr)).await;
    assert_eq!(status, StatusCode::OK);

    let bodies = captured.lock().unwrap().clone();
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["username"], "Verto");
    assert_eq!(bodies[0]["embeds"][0]["url"], "https://etherscan.io/tx/0xdead");
}

#[tokio::test]
async fn test_webhook_rejection_is_500_and_not_recorded() {
    let (hook_url, _) = spawn_webhook(Some(StatusCode::BAD_REQUEST)).await;
    let ledger = Arc::new(MockLedger::new());
    ledger.add_transaction(eth_deposit_tx("abc"));
    let notifier = WebhookNotifier::new(WebhookTarget::Url(hook_url)).unwrap();
    let addr = spawn_relay(ledger, Arc::new(notifier)).await;

    let (status, _) = get(format!("http://{}/?id=abc", addr)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    // still not recorded, so the same rejection is reported again
    let (status, body) = get(format!("http://{}/?id=abc", addr)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_ne!(body, "Already sent");
}
