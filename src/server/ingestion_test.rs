//! Tests for the ingestion endpoint
//!
//! Each test serves the real router on an ephemeral port and talks to it over HTTP.

use super::*;
use crate::bridge::message::{message_channel, BridgeMessage, MessageReceiver};
use crate::bridge::normalize::{HealthStatus, ServiceStatus};
use crate::cluster::Fid;
use crate::server::metrics::create_metrics;
use crate::server::shutdown::{shutdown_channel, ShutdownController};
use serde_json::json;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

struct TestServer {
    addr: SocketAddr,
    rx: MessageReceiver,
    metrics: SharedMetrics,
    shutdown: ShutdownController,
    handle: tokio::task::JoinHandle<Result<(), std::io::Error>>,
}

impl TestServer {
    async fn start(config: IngestionConfig) -> Self {
        let (tx, rx) = message_channel();
        let metrics = create_metrics().unwrap();
        let (shutdown, signal) = shutdown_channel();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = IngestionState::new(tx, config, metrics.clone());
        let handle = tokio::spawn(serve_ingestion(listener, state, signal.wait_owned()));

        Self {
            addr,
            rx,
            metrics,
            shutdown,
            handle,
        }
    }

    fn url(&self) -> String {
        format!("http://{}/", self.addr)
    }

    async fn post(&self, body: impl Into<reqwest::Body>) -> reqwest::Response {
        reqwest::Client::new()
            .post(self.url())
            .timeout(Duration::from_secs(5))
            .body(body)
            .send()
            .await
            .expect("Failed to reach ingestion server")
    }

    async fn stop(self) {
        self.shutdown.shutdown();
        let result = tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("server should stop after shutdown");
        assert!(result.unwrap().is_ok());
    }
}

/// Send a hand-written HTTP/1.1 request and return the raw response
async fn raw_request(addr: SocketAddr, request: &str) -> String {
    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
        .await
        .expect("server should answer and close")
        .unwrap();
    String::from_utf8_lossy(&response).into_owned()
}

fn expect_batch(message: Option<BridgeMessage>) -> Vec<ServiceStatus> {
    match message {
        Some(BridgeMessage::StatusBatch(batch)) => batch,
        Some(other) => panic!("expected a status batch, got {}", other.kind()),
        None => panic!("expected a status batch, queue was empty"),
    }
}

#[tokio::test]
async fn test_get_returns_liveness_payload() {
    let mut server = TestServer::start(IngestionConfig::default()).await;

    let response = reqwest::get(server.url()).await.unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body, json!({ "message": "I am alive" }));
    assert!(server.rx.try_recv().is_none(), "liveness never enqueues");

    server.stop().await;
}

#[tokio::test]
async fn test_head_returns_headers_only() {
    let mut server = TestServer::start(IngestionConfig::default()).await;

    let response = reqwest::Client::new()
        .head(server.url())
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
    assert!(response.bytes().await.unwrap().is_empty());
    assert!(server.rx.try_recv().is_none());

    server.stop().await;
}

#[tokio::test]
async fn test_post_enqueues_normalized_batch_before_acknowledging() {
    let mut server = TestServer::start(IngestionConfig::default()).await;
    let report = json!([
        { "Service": { "ID": "0x7200000000000001:0x1" }, "Checks": [{ "Status": "passing" }] },
        { "Service": { "ID": "0x7200000000000001:0x2" }, "Checks": [{ "Status": "critical" }] }
    ]);

    let response = server.post(report.to_string()).await;

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
    let ack: serde_json::Value = response.json().await.unwrap();
    assert_eq!(ack["services"], 2);

    // The acknowledgment implies the batch is already queued
    let batch = expect_batch(server.rx.try_recv());
    assert_eq!(
        batch,
        vec![
            ServiceStatus {
                identifier: Fid::new(0x7200000000000001, 0x1),
                status: HealthStatus::Online,
            },
            ServiceStatus {
                identifier: Fid::new(0x7200000000000001, 0x2),
                status: HealthStatus::Offline,
            },
        ]
    );
    assert_eq!(server.metrics.delivery_count("accepted"), 1);

    server.stop().await;
}

#[tokio::test]
async fn test_invalid_json_is_relayed_as_empty_by_default() {
    let mut server = TestServer::start(IngestionConfig::default()).await;

    let response = server.post("{not json").await;

    assert_eq!(response.status(), 200);
    assert!(expect_batch(server.rx.try_recv()).is_empty());

    let response = server.post("null").await;
    assert_eq!(response.status(), 200);
    assert!(expect_batch(server.rx.try_recv()).is_empty());

    server.stop().await;
}

#[tokio::test]
async fn test_invalid_json_is_rejected_under_reject_policy() {
    let mut server = TestServer::start(IngestionConfig {
        decode_failure: DecodeFailurePolicy::Reject,
        ..Default::default()
    })
    .await;

    let response = server.post("{not json").await;

    assert_eq!(response.status(), 400);
    assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("not valid JSON"));
    assert!(server.rx.try_recv().is_none());
    assert_eq!(server.metrics.delivery_count("rejected"), 1);

    server.stop().await;
}

#[tokio::test]
async fn test_malformed_service_id_fails_whole_delivery() {
    let mut server = TestServer::start(IngestionConfig::default()).await;
    let report = json!([
        { "Service": { "ID": "0x7200000000000001:0x1" }, "Checks": [] },
        { "Service": { "ID": "ios-service" }, "Checks": [] }
    ]);

    let response = server.post(report.to_string()).await;

    assert_eq!(response.status(), 422);
    assert!(server.rx.try_recv().is_none(), "no partial batch");
    assert_eq!(server.metrics.delivery_count("invalid_report"), 1);

    server.stop().await;
}

#[tokio::test]
async fn test_badly_shaped_entries_fail_whole_delivery() {
    let mut server = TestServer::start(IngestionConfig::default()).await;
    let valid = json!({ "Service": { "ID": "0x7200000000000001:0x1" }, "Checks": [{ "Status": "passing" }] });
    let bad_entries = [
        json!({ "Service": { "ID": 5 }, "Checks": [] }),
        json!({ "Service": { "ID": "0x7200000000000001:0x2" }, "Checks": "passing" }),
        json!({ "Service": { "ID": "0x7200000000000001:0x2" }, "Checks": [5] }),
    ];

    for bad in &bad_entries {
        let report = json!([valid.clone(), bad.clone()]);

        let response = server.post(report.to_string()).await;

        assert_eq!(response.status(), 422, "entry {} should be refused", bad);
        assert!(server.rx.try_recv().is_none(), "nothing enqueued for {}", bad);
    }
    assert_eq!(server.metrics.delivery_count("invalid_report"), 3);
    assert_eq!(server.metrics.delivery_count("accepted"), 0);

    server.stop().await;
}

#[tokio::test]
async fn test_missing_content_length_is_rejected() {
    let mut server = TestServer::start(IngestionConfig::default()).await;

    let response = raw_request(
        server.addr,
        "POST / HTTP/1.1\r\nHost: localhost\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n2\r\n[]\r\n0\r\n\r\n",
    )
    .await;

    assert!(
        response.starts_with("HTTP/1.1 411"),
        "unexpected response: {}",
        response
    );
    assert!(server.rx.try_recv().is_none());

    server.stop().await;
}

#[tokio::test]
async fn test_oversized_report_is_rejected() {
    let mut server = TestServer::start(IngestionConfig {
        max_body_bytes: 16,
        ..Default::default()
    })
    .await;

    let response = server.post(vec![b' '; 64]).await;

    assert_eq!(response.status(), 413);
    assert!(server.rx.try_recv().is_none());

    server.stop().await;
}

#[tokio::test]
async fn test_stopped_worker_makes_ingestion_unavailable() {
    let mut server = TestServer::start(IngestionConfig::default()).await;
    // Replacing the receiver drops the one the server feeds
    server.rx = message_channel().1;

    let response = server.post("[]").await;

    assert_eq!(response.status(), 503);
    assert_eq!(server.metrics.delivery_count("unavailable"), 1);

    server.stop().await;
}

#[tokio::test]
async fn test_concurrent_reports_are_all_enqueued_once() {
    let mut server = TestServer::start(IngestionConfig::default()).await;
    let client = reqwest::Client::new();

    let requests = (0..20u64).map(|key| {
        let client = client.clone();
        let url = server.url();
        async move {
            let body = json!([{
                "Service": { "ID": format!("0x7200000000000001:0x{:x}", key) },
                "Checks": [{ "Status": "passing" }]
            }]);
            client.post(url).body(body.to_string()).send().await.unwrap()
        }
    });
    for response in futures::future::join_all(requests).await {
        assert_eq!(response.status(), 200);
    }

    let mut keys = Vec::new();
    while let Some(message) = server.rx.try_recv() {
        keys.push(expect_batch(Some(message))[0].identifier.key);
    }
    keys.sort_unstable();
    assert_eq!(keys, (0..20u64).collect::<Vec<_>>());

    server.stop().await;
}

#[tokio::test]
async fn test_metrics_endpoint_exposes_delivery_counts() {
    let server = TestServer::start(IngestionConfig::default()).await;
    server.post("[]").await;

    let response = reqwest::get(format!("http://{}/metrics", server.addr))
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let text = response.text().await.unwrap();
    assert!(text.contains("hax_bridge_deliveries_total{outcome=\"accepted\"} 1"));

    server.stop().await;
}

#[test]
fn test_decode_failure_policy_parses() {
    assert_eq!("accept-empty".parse(), Ok(DecodeFailurePolicy::AcceptEmpty));
    assert_eq!("reject".parse(), Ok(DecodeFailurePolicy::Reject));
    assert!("ignore".parse::<DecodeFailurePolicy>().is_err());
}
