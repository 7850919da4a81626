//! API Integration Tests
//!
//! Tests the control surface through the real router:
//! - Health check
//! - Statistics and accounts
//! - Run start/stop and their conflicts
//! - Wallet report and metrics
//!
//! Requests go through `tower::ServiceExt::oneshot`.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

use sniper_operator::engine::Orchestrator;
use sniper_operator::handlers::{build_router, AppState};
use sniper_operator::metrics::MetricsState;

use crate::fakes::*;

fn app(orchestrator: Orchestrator) -> Router {
    let state = Arc::new(AppState {
        orchestrator,
        started_at: Utc::now(),
        test_mode: false,
    });
    build_router(state, Arc::new(MetricsState::new()))
}

fn rig() -> Rig {
    Rig::new(vec![direct_account("alpha")], ScriptedStore::always_orders(1_000))
}

async fn send(app: &Router, method: &str, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

// =============================================================================
// HEALTH CHECK TESTS
// =============================================================================

#[tokio::test]
async fn test_health_reports_idle() {
    let app = app(rig().orchestrator);

    let (status, body) = send(&app, "GET", "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["run"], "idle");
    assert_eq!(body["configured_accounts"], 1);
    assert_eq!(body["test_mode"], false);
}

#[tokio::test]
async fn test_health_degraded_without_accounts() {
    let app = app(Rig::new(Vec::new(), ScriptedStore::always_orders(1)).orchestrator);

    let (status, body) = send(&app, "GET", "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");
}

// =============================================================================
// STATISTICS & ACCOUNTS
// =============================================================================

#[tokio::test]
async fn test_stats_before_any_run() {
    let app = app(rig().orchestrator);

    let (status, body) = send(&app, "GET", "/api/v1/stats").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_requests"], 0);
    assert_eq!(body["sent_transactions"], 0);
    assert_eq!(body["invalid_tokens"], 0);
}

#[tokio::test]
async fn test_accounts_listed_while_running() {
    let rig = rig();
    let app = app(rig.orchestrator.clone());

    let (status, _) = send(&app, "POST", "/api/v1/start").await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, body) = send(&app, "GET", "/api/v1/accounts").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["active"], 1);
    assert_eq!(body["total"], 1);
    assert_eq!(body["accounts"][0]["name"], "alpha");
    assert_eq!(body["accounts"][0]["mode"], "direct");
    assert_eq!(body["credentials"][0]["account"], "alpha");
    assert_eq!(body["credentials"][0]["preview"], "seed");

    rig.orchestrator.stop().await.unwrap();
}

// =============================================================================
// RUN CONTROL
// =============================================================================

#[tokio::test]
async fn test_stop_when_idle_is_conflict() {
    let app = app(rig().orchestrator);

    let (status, _) = send(&app, "POST", "/api/v1/stop").await;

    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_start_then_start_again_conflicts() {
    let app = app(rig().orchestrator);

    let (status, body) = send(&app, "POST", "/api/v1/start").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "started");

    let (status, _) = send(&app, "POST", "/api/v1/start").await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, health) = send(&app, "GET", "/health").await;
    assert_eq!(health["run"], "running");

    let (status, body) = send(&app, "POST", "/api/v1/stop").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "stopped");
}

#[tokio::test]
async fn test_start_without_valid_accounts_is_bad_request() {
    let broken = sniper_operator::config::AccountConfig {
        collection: 0,
        ..direct_account("broken")
    };
    let app = app(Rig::new(vec![broken], ScriptedStore::always_orders(1)).orchestrator);

    let (status, _) = send(&app, "POST", "/api/v1/start").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// =============================================================================
// WALLETS & METRICS
// =============================================================================

#[tokio::test]
async fn test_wallet_report() {
    let app = app(rig().orchestrator);

    let (status, body) = send(&app, "GET", "/api/v1/wallets").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert_eq!(body["wallets"][0]["account"], "alpha");
    assert_eq!(body["wallets"][0]["balance_nano"], 100_000_000_000u64);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = app(rig().orchestrator);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("sniper_purchase_attempts_total"));
}
