//! HTTP handlers for Sniper Operator

mod api;
mod health;
mod ws;

pub use api::*;
pub use health::*;
pub use ws::*;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::metrics::{metrics_router, MetricsState};

/// Control surface: health, run control, statistics, event stream, metrics
pub fn build_router(state: Arc<AppState>, metrics: Arc<MetricsState>) -> Router {
    let api_routes = Router::new()
        .route("/stats", get(get_stats))
        .route("/accounts", get(list_accounts))
        .route("/wallets", get(list_wallets))
        .route("/start", post(start_run))
        .route("/stop", post(stop_run));

    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws_handler))
        .nest("/api/v1", api_routes)
        .with_state(state)
        .merge(metrics_router().with_state(metrics))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
