//! Statistics and account activity snapshots

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Point-in-time copy of the run statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatisticsSnapshot {
    /// Purchase attempts (a retried attempt counts once)
    pub total_requests: u64,
    pub success_requests: u64,
    pub failed_requests: u64,
    /// Authorization rejections seen from the store
    pub invalid_tokens: u64,
    /// Payments confirmed on chain
    pub sent_transactions: u64,
    pub start_time: Option<DateTime<Utc>>,
    pub duration_secs: f64,
    pub requests_per_sec: f64,
}

/// Mode an account runs in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountMode {
    Direct,
    Discovery,
}

/// Per-account run state as reported to operators
#[derive(Debug, Clone, Serialize)]
pub struct AccountStatus {
    pub name: String,
    pub mode: AccountMode,
    pub active: bool,
    pub transactions_completed: u32,
    /// 0 means unlimited
    pub max_transactions: u32,
}
