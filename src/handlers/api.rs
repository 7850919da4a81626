//! REST API handlers for Sniper Operator
//!
//! Provides endpoints for:
//! - Statistics of the current or last run
//! - Account run states and cached credentials
//! - Starting and stopping a run
//! - Wallet balances

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::sync::Arc;

use super::health::AppState;
use crate::credentials::CredentialStatus;
use crate::engine::WalletBalance;
use crate::error::AppError;
use crate::models::{AccountStatus, StatisticsSnapshot};

// =============================================================================
// STATISTICS
// =============================================================================

/// GET /api/v1/stats
pub async fn get_stats(State(state): State<Arc<AppState>>) -> Json<StatisticsSnapshot> {
    Json(state.orchestrator.statistics())
}

// =============================================================================
// ACCOUNTS
// =============================================================================

#[derive(Debug, Serialize)]
pub struct AccountsResponse {
    pub accounts: Vec<AccountStatus>,
    pub active: usize,
    pub total: usize,
    /// Cached bearers, masked
    pub credentials: Vec<CredentialStatus>,
}

/// GET /api/v1/accounts
pub async fn list_accounts(State(state): State<Arc<AppState>>) -> Json<AccountsResponse> {
    let (active, total) = state.orchestrator.account_activity();
    Json(AccountsResponse {
        accounts: state.orchestrator.account_statuses(),
        active,
        total,
        credentials: state.orchestrator.credential_status(),
    })
}

// =============================================================================
// RUN CONTROL
// =============================================================================

#[derive(Debug, Serialize)]
pub struct RunControlResponse {
    pub status: &'static str,
}

/// POST /api/v1/start
pub async fn start_run(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<RunControlResponse>), AppError> {
    state.orchestrator.start().await?;
    tracing::info!("Run started by operator");
    Ok((StatusCode::ACCEPTED, Json(RunControlResponse { status: "started" })))
}

/// POST /api/v1/stop
///
/// Returns once the grace period is over and the run is cancelled.
pub async fn stop_run(State(state): State<Arc<AppState>>) -> Result<Json<RunControlResponse>, AppError> {
    state.orchestrator.stop().await?;
    Ok(Json(RunControlResponse { status: "stopped" }))
}

// =============================================================================
// WALLETS
// =============================================================================

#[derive(Debug, Serialize)]
pub struct WalletsResponse {
    pub wallets: Vec<WalletBalance>,
    pub total: usize,
}

/// GET /api/v1/wallets
pub async fn list_wallets(State(state): State<Arc<AppState>>) -> Json<WalletsResponse> {
    let wallets = state.orchestrator.wallet_report().await;
    let total = wallets.len();
    Json(WalletsResponse { wallets, total })
}
