//! Health check endpoint

use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

use crate::engine::Orchestrator;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    /// Run state
    pub run: RunStatus,
    /// Uptime in seconds
    pub uptime_seconds: i64,
    pub active_accounts: usize,
    pub total_accounts: usize,
    pub configured_accounts: usize,
    /// Wallet queues created so far
    pub wallets: usize,
    pub test_mode: bool,
    pub version: &'static str,
}

#[derive(Debug, Serialize, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Nothing to purchase with
    Degraded,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Idle,
    Running,
    Stopping,
}

/// Shared application state for the control surface
pub struct AppState {
    pub orchestrator: Orchestrator,
    /// Application start time
    pub started_at: chrono::DateTime<Utc>,
    pub test_mode: bool,
}

/// Health check handler
///
/// GET /health
pub async fn health_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    let orchestrator = &state.orchestrator;
    let (active_accounts, total_accounts) = orchestrator.account_activity();

    let run = if !orchestrator.is_running() {
        RunStatus::Idle
    } else if orchestrator.is_stopping() {
        RunStatus::Stopping
    } else {
        RunStatus::Running
    };

    let status = if orchestrator.configured_accounts() == 0 {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    };

    let response = HealthResponse {
        status,
        run,
        uptime_seconds: (Utc::now() - state.started_at).num_seconds(),
        active_accounts,
        total_accounts,
        configured_accounts: orchestrator.configured_accounts(),
        wallets: orchestrator.wallet_count(),
        test_mode: state.test_mode,
        version: env!("CARGO_PKG_VERSION"),
    };

    (StatusCode::OK, Json(response))
}
