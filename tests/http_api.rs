//! HTTP API tests
//!
//! Each test starts the router on an ephemeral loopback port, backed by the
//! in-memory kernel, and drives it with reqwest.

use nftset_api::api::{self, AppState, ErrorResponse, HealthResponse};
use nftset_api::audit::{AuditEvent, AuditLog};
use nftset_api::core::engine::Engine;
use nftset_api::core::memory::{MemoryConnector, MemoryKernel};
use nftset_api::core::resolver::EngineConfig;
use nftset_api::core::ruleset::{Table, TableFamily};
use reqwest::StatusCode;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

struct TestServer {
    addr: SocketAddr,
    kernel: MemoryKernel,
    table: Table,
    client: reqwest::Client,
    _shutdown: oneshot::Sender<()>,
}

impl TestServer {
    async fn start() -> Self {
        Self::start_with(|state| state).await
    }

    async fn start_with(
        customize: impl FnOnce(AppState<MemoryConnector>) -> AppState<MemoryConnector>,
    ) -> Self {
        let kernel = MemoryKernel::new();
        let table = kernel.add_table(TableFamily::Inet, "filter");
        let engine = Engine::new(
            MemoryConnector::new(kernel.clone()),
            EngineConfig::new("filter"),
        );
        let state = customize(AppState::new(engine, Duration::from_secs(5)));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            api::serve(listener, api::router(Arc::new(state)), async move {
                let _ = rx.await;
            })
            .await
            .unwrap();
        });

        Self {
            addr,
            kernel,
            table,
            client: reqwest::Client::new(),
            _shutdown: tx,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn send(&self, method: reqwest::Method, path: &str) -> (StatusCode, Value) {
        let response = self
            .client
            .request(method, self.url(path))
            .send()
            .await
            .unwrap();
        let status = response.status();
        let body = response.json::<Value>().await.unwrap();
        (status, body)
    }
}

#[tokio::test]
async fn test_health() {
    let server = TestServer::start().await;
    let health: HealthResponse = server
        .client
        .get(server.url("/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(health.status, "ok");
    assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
    assert_eq!(health.table, "filter");
}

#[tokio::test]
async fn test_put_and_delete_lifecycle() {
    let server = TestServer::start().await;

    let (status, body) = server.send(reqwest::Method::PUT, "/set/blocked/203.0.113.5").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], "added");

    let (_, body) = server.send(reqwest::Method::PUT, "/set/blocked/203.0.113.5").await;
    assert_eq!(body["success"], "already");

    let (status, body) = server.send(reqwest::Method::DELETE, "/set/blocked/203.0.113.5").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], "deleted");

    let (_, body) = server.send(reqwest::Method::DELETE, "/set/blocked/203.0.113.5").await;
    assert_eq!(body["success"], "not present");

    assert!(server.kernel.elements(&server.table, "blocked4").unwrap().is_empty());
}

#[tokio::test]
async fn test_ipv6_address_in_path() {
    let server = TestServer::start().await;

    let (status, body) = server.send(reqwest::Method::PUT, "/set/blocked/2001:db8::5").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], "added");
    assert_eq!(
        server.kernel.elements(&server.table, "blocked6").unwrap().len(),
        1
    );
}

#[tokio::test]
async fn test_non_address_value_is_rejected() {
    let server = TestServer::start().await;

    for method in [reqwest::Method::PUT, reqwest::Method::DELETE] {
        let (status, body) = server.send(method, "/set/blocked/not-an-ip").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "only flush or IP addresses are supported");
    }
    assert!(server.kernel.calls().is_empty());
}

#[tokio::test]
async fn test_post_only_flushes() {
    let server = TestServer::start().await;

    let (status, body) = server.send(reqwest::Method::POST, "/set/blocked4/203.0.113.5").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "only flush is supported for POST");
}

#[tokio::test]
async fn test_flush_set() {
    let server = TestServer::start().await;
    for host in 1..=3 {
        server
            .send(reqwest::Method::PUT, &format!("/set/blocked/198.51.100.{host}"))
            .await;
    }

    let (status, body) = server.send(reqwest::Method::POST, "/set/blocked4/flush").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "requested");
    assert!(server.kernel.elements(&server.table, "blocked4").unwrap().is_empty());
}

#[tokio::test]
async fn test_flush_all_families() {
    let server = TestServer::start().await;
    server.send(reqwest::Method::PUT, "/set/blocked/192.0.2.1").await;
    server.send(reqwest::Method::PUT, "/set/blocked/2001:db8::1").await;

    let (status, body) = server
        .send(reqwest::Method::POST, "/set/blocked/flush?families=all")
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "requested");
    assert!(server.kernel.elements(&server.table, "blocked4").unwrap().is_empty());
    assert!(server.kernel.elements(&server.table, "blocked6").unwrap().is_empty());
}

#[tokio::test]
async fn test_flush_without_family_suffix_fails() {
    let server = TestServer::start().await;

    let (status, body) = server.send(reqwest::Method::POST, "/set/blocked/flush").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let error: ErrorResponse = serde_json::from_value(body).unwrap();
    assert!(!error.retryable);
    assert_eq!(server.kernel.commit_count(), 0);
}

#[tokio::test]
async fn test_invalid_set_name_is_rejected() {
    let server = TestServer::start().await;

    let (status, body) = server.send(reqwest::Method::PUT, "/set/bad%20name/192.0.2.1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().starts_with("invalid set name"));
    assert!(server.kernel.calls().is_empty());
}

#[tokio::test]
async fn test_commit_failure_is_reported() {
    let server = TestServer::start().await;
    server
        .kernel
        .fail_next_commit("Error: Could not process rule: Device or resource busy");

    let (status, body) = server.send(reqwest::Method::PUT, "/set/blocked/192.0.2.1").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let error: ErrorResponse = serde_json::from_value(body).unwrap();
    assert_eq!(error.outcome, "error");
    assert!(error.retryable);
    assert!(error.hint.is_some());
    assert!(error.error.contains("blocked4"));
}

#[tokio::test]
async fn test_missing_table_is_server_error() {
    let kernel = MemoryKernel::new();
    let engine = Engine::new(
        MemoryConnector::new(kernel.clone()),
        EngineConfig::new("absent"),
    );
    let state = Arc::new(AppState::new(engine, Duration::from_secs(5)));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        api::serve(listener, api::router(state), std::future::pending())
            .await
            .unwrap();
    });

    let response = reqwest::Client::new()
        .put(format!("http://{addr}/set/blocked/192.0.2.1"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let error: ErrorResponse = response.json().await.unwrap();
    assert!(!error.retryable);
    assert_eq!(error.outcome, "");
}

#[tokio::test]
async fn test_mutations_are_audited() {
    let dir = tempfile::tempdir().unwrap();
    let audit_path = dir.path().join("audit.log");
    let audit = AuditLog::new(&audit_path);
    let server = TestServer::start_with(|state| state.with_audit(audit)).await;

    server.send(reqwest::Method::PUT, "/set/blocked/192.0.2.1").await;
    server.send(reqwest::Method::POST, "/set/blocked4/flush").await;
    // Rejected before reaching the engine, so not audited
    server.send(reqwest::Method::PUT, "/set/blocked/nope").await;

    let events: Vec<AuditEvent> = server
        .client
        .get(server.url("/audit?limit=10"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].details["outcome"], "requested");
    assert_eq!(events[1].details["outcome"], "added");
    assert_eq!(events[1].details["address"], "192.0.2.1");
    assert!(events.iter().all(|e| e.success));
}

#[tokio::test]
async fn test_audit_disabled_is_not_found() {
    let server = TestServer::start().await;

    let (status, body) = server.send(reqwest::Method::GET, "/audit").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "audit log is not enabled");
}

#[tokio::test]
async fn test_audit_before_first_mutation_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let audit = AuditLog::new(dir.path().join("audit.log"));
    let server = TestServer::start_with(|state| state.with_audit(audit)).await;

    let (status, body) = server.send(reqwest::Method::GET, "/audit").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!([]));
}

#[tokio::test]
async fn test_slow_kernel_hits_request_deadline() {
    let server = TestServer::start_with(|mut state| {
        state.request_timeout = Duration::from_millis(200);
        state
    })
    .await;
    server.kernel.set_latency(Some(Duration::from_secs(5)));

    let (status, body) = server.send(reqwest::Method::PUT, "/set/blocked/192.0.2.1").await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);

    let error: ErrorResponse = serde_json::from_value(body).unwrap();
    assert_eq!(error.error, "request deadline exceeded");
    assert!(error.retryable);
    assert_eq!(server.kernel.commit_count(), 0);
    assert!(server.kernel.set(&server.table, "blocked4").is_none());
}
