//! Run statistics
//!
//! Lock-free counters; `snapshot()` copies them out together with the run
//! timing. Counters are mirrored to Prometheus when metrics are attached.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::metrics::MetricsState;
use crate::models::StatisticsSnapshot;

#[derive(Default)]
struct RunWindow {
    started: Option<DateTime<Utc>>,
    finished: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub struct Statistics {
    total_requests: AtomicU64,
    success_requests: AtomicU64,
    failed_requests: AtomicU64,
    invalid_tokens: AtomicU64,
    sent_transactions: AtomicU64,
    window: RwLock<RunWindow>,
    metrics: Option<Arc<MetricsState>>,
}

impl Statistics {
    pub fn new(metrics: Option<Arc<MetricsState>>) -> Self {
        Self {
            metrics,
            ..Default::default()
        }
    }

    /// Zero the counters and open a new run window
    pub fn reset(&self) {
        self.total_requests.store(0, Ordering::Relaxed);
        self.success_requests.store(0, Ordering::Relaxed);
        self.failed_requests.store(0, Ordering::Relaxed);
        self.invalid_tokens.store(0, Ordering::Relaxed);
        self.sent_transactions.store(0, Ordering::Relaxed);
        *self.window.write() = RunWindow {
            started: Some(Utc::now()),
            finished: None,
        };
    }

    pub fn finish(&self) {
        let mut window = self.window.write();
        if window.started.is_some() && window.finished.is_none() {
            window.finished = Some(Utc::now());
        }
    }

    pub fn record_attempt(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if let Some(m) = &self.metrics {
            m.purchase_attempts.inc();
        }
    }

    pub fn record_success(&self) {
        self.success_requests.fetch_add(1, Ordering::Relaxed);
        if let Some(m) = &self.metrics {
            m.purchase_successes.inc();
        }
    }

    pub fn record_failure(&self) {
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
        if let Some(m) = &self.metrics {
            m.purchase_failures.inc();
        }
    }

    pub fn record_invalid_token(&self) {
        self.invalid_tokens.fetch_add(1, Ordering::Relaxed);
        if let Some(m) = &self.metrics {
            m.invalid_tokens.inc();
        }
    }

    pub fn record_payment(&self, success: bool, latency_ms: f64) {
        if let Some(m) = &self.metrics {
            m.payment_latency.observe(latency_ms);
            if success {
                m.payments_sent.inc();
            } else {
                m.payments_failed.inc();
            }
        }
        if success {
            self.sent_transactions.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_discovery(&self) {
        if let Some(m) = &self.metrics {
            m.discoveries.inc();
        }
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        let (started, finished) = {
            let window = self.window.read();
            (window.started, window.finished)
        };
        let total_requests = self.total_requests.load(Ordering::Relaxed);

        let duration_secs = started
            .map(|start| {
                let end = finished.unwrap_or_else(Utc::now);
                (end - start).num_milliseconds().max(0) as f64 / 1000.0
            })
            .unwrap_or(0.0);
        let requests_per_sec = if duration_secs > 0.0 {
            total_requests as f64 / duration_secs
        } else {
            0.0
        };

        StatisticsSnapshot {
            total_requests,
            success_requests: self.success_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            invalid_tokens: self.invalid_tokens.load(Ordering::Relaxed),
            sent_transactions: self.sent_transactions.load(Ordering::Relaxed),
            start_time: started,
            duration_secs,
            requests_per_sec,
        }
    }
}
