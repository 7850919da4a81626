//! Live event stream for operators
//!
//! Every outcome worth showing is logged through `tracing` and mirrored here
//! as a `LogEvent`; the `/ws` handler forwards events to connected clients.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::models::{PaymentResult, PurchaseIntent, StatisticsSnapshot};

const EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Info,
    Warn,
    Error,
}

/// Events that can be sent over the stream
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum LogEvent {
    /// Human-readable status line
    #[serde(rename = "log")]
    Log(LogLine),

    /// Periodic statistics line
    #[serde(rename = "statistics")]
    Statistics(StatisticsSnapshot),

    /// Payment settled or failed
    #[serde(rename = "payment")]
    Payment(PaymentEventData),

    /// Discovered sub-item passed the filters
    #[serde(rename = "discovery")]
    Discovery(PurchaseIntent),

    /// Run started, stopping or stopped
    #[serde(rename = "run_state")]
    RunState(RunStateData),
}

#[derive(Clone, Debug, Serialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub level: EventLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    pub message: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct PaymentEventData {
    pub account: String,
    pub order_id: String,
    #[serde(flatten)]
    pub result: PaymentResult,
}

#[derive(Clone, Debug, Serialize)]
pub struct RunStateData {
    pub state: RunPhase,
    pub active_accounts: usize,
    pub total_accounts: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunPhase {
    Running,
    Stopping,
    Stopped,
}

/// Broadcast hub for `LogEvent`s
pub struct EventBus {
    tx: broadcast::Sender<LogEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUFFER);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: LogEvent) {
        // No receivers is fine
        let _ = self.tx.send(event);
    }

    fn line(&self, level: EventLevel, account: Option<&str>, message: String) {
        self.publish(LogEvent::Log(LogLine {
            timestamp: Utc::now(),
            level,
            account: account.map(str::to_string),
            message,
        }));
    }

    pub fn info(&self, account: Option<&str>, message: impl Into<String>) {
        self.line(EventLevel::Info, account, message.into());
    }

    pub fn warn(&self, account: Option<&str>, message: impl Into<String>) {
        self.line(EventLevel::Warn, account, message.into());
    }

    pub fn error(&self, account: Option<&str>, message: impl Into<String>) {
        self.line(EventLevel::Error, account, message.into());
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
