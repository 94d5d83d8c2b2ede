//! Unit tests for the health and metrics router

use axum_test::TestServer;
use serde_json::Value;
use std::sync::Arc;
use vaultq::core::http::{create_router, AppState};
use vaultq::metrics::Metrics;

fn server(role: &str) -> (TestServer, Arc<Metrics>) {
    let metrics = Arc::new(Metrics::new().expect("metrics initialization"));
    let router = create_router(AppState::new(metrics.clone(), role));
    (TestServer::new(router).expect("start test server"), metrics)
}

#[tokio::test]
async fn health_reports_service_and_role() {
    let (server, _metrics) = server("consumer:trigger");
    let response = server.get("/health").await;
    assert_eq!(response.status_code(), 200);

    let body: Value = response.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "vaultq");
    assert_eq!(body["role"], "consumer:trigger");
    assert!(body["uptime_seconds"].as_u64().is_some());
}

#[tokio::test]
async fn metrics_exposes_queue_counters() {
    let (server, metrics) = server("broker");
    metrics.claim_races_total.inc();
    metrics
        .tasks_processed_total
        .with_label_values(&["metrics.collect", "done"])
        .inc();

    let response = server.get("/metrics").await;
    assert_eq!(response.status_code(), 200);

    let text = response.text();
    assert!(text.contains("claim_races_total 1"));
    assert!(text.contains("tasks_processed_total{handler=\"metrics.collect\",status=\"done\"} 1"));
    assert!(text.contains("tasks_in_flight"));
}

#[tokio::test]
async fn requests_are_counted() {
    let (server, metrics) = server("broker");
    server.get("/health").await;
    server.get("/health").await;
    assert_eq!(metrics.http_requests_total.get(), 2);
    assert_eq!(metrics.http_requests_in_flight.get(), 0);
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let (server, _metrics) = server("broker");
    let response = server.get("/tasks").expect_failure().await;
    assert_eq!(response.status_code(), 404);
}
