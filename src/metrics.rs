//! Prometheus metrics for Sniper Operator
//!
//! Mirrors the run statistics:
//! - Purchase attempt/success/failure counters
//! - Authorization rejections
//! - Payments sent and failed, payment latency histogram
//! - Discoveries
//! - Active account and wallet queue gauges

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};
use prometheus::core::Collector;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Metrics state
pub struct MetricsState {
    /// Prometheus registry
    registry: Registry,
    pub purchase_attempts: IntCounter,
    pub purchase_successes: IntCounter,
    pub purchase_failures: IntCounter,
    /// Store responses that rejected the bearer
    pub invalid_tokens: IntCounter,
    pub payments_sent: IntCounter,
    pub payments_failed: IntCounter,
    /// Submit-to-result time of a payment (in milliseconds)
    pub payment_latency: Histogram,
    pub discoveries: IntCounter,
    pub active_accounts: IntGauge,
    pub wallet_queues: IntGauge,
}

fn register<T: Collector + Clone + 'static>(registry: &Registry, metric: T) -> T {
    registry
        .register(Box::new(metric.clone()))
        .expect("Failed to register metric");
    metric
}

fn counter(registry: &Registry, name: &str, help: &str) -> IntCounter {
    register(
        registry,
        IntCounter::with_opts(Opts::new(name, help)).expect("Failed to create counter"),
    )
}

fn gauge(registry: &Registry, name: &str, help: &str) -> IntGauge {
    register(
        registry,
        IntGauge::with_opts(Opts::new(name, help)).expect("Failed to create gauge"),
    )
}

impl MetricsState {
    /// Create a new metrics state with all metrics registered
    pub fn new() -> Self {
        let registry = Registry::new();

        // Payment latency histogram (in milliseconds)
        let payment_latency = register(
            &registry,
            Histogram::with_opts(
                HistogramOpts::new(
                    "sniper_payment_latency_ms",
                    "Time from payment submission to result in milliseconds",
                )
                .buckets(vec![
                    250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 30000.0, 60000.0, 120000.0,
                ]),
            )
            .expect("Failed to create payment_latency"),
        );

        Self {
            purchase_attempts: counter(&registry, "sniper_purchase_attempts_total", "Purchase attempts"),
            purchase_successes: counter(&registry, "sniper_purchase_success_total", "Successful purchases"),
            purchase_failures: counter(&registry, "sniper_purchase_failed_total", "Failed purchases"),
            invalid_tokens: counter(
                &registry,
                "sniper_invalid_tokens_total",
                "Store responses that rejected the credential",
            ),
            payments_sent: counter(&registry, "sniper_payments_sent_total", "Payments confirmed on chain"),
            payments_failed: counter(&registry, "sniper_payments_failed_total", "Payments that did not settle"),
            payment_latency,
            discoveries: counter(&registry, "sniper_discoveries_total", "Discovered sub-items that passed filters"),
            active_accounts: gauge(&registry, "sniper_active_accounts", "Accounts still purchasing"),
            wallet_queues: gauge(&registry, "sniper_wallet_queues", "Wallet queues created"),
            registry,
        }
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl Default for MetricsState {
    fn default() -> Self {
        Self::new()
    }
}

/// Metrics handler - returns Prometheus metrics in text format
///
/// GET /metrics
pub async fn metrics_handler(State(state): State<Arc<MetricsState>>) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = state.registry().gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, [("Content-Type", "text/plain")], Vec::new());
    }

    (
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        buffer,
    )
}

/// Create metrics router
pub fn metrics_router() -> Router<Arc<MetricsState>> {
    Router::new().route("/metrics", get(metrics_handler))
}
