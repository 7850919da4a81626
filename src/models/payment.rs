//! Payment request/result exchanged with wallet queues

use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

/// A transfer to execute from a wallet
#[derive(Debug, Clone)]
pub struct PaymentRequest {
    /// Destination address
    pub destination: String,
    /// Amount in nano units (fee padding already included)
    pub amount: u64,
    /// Memo attached to the transfer (the store uses it to match the order)
    pub memo: String,
    /// Requests still queued after this instant are failed without broadcast
    pub deadline: Instant,
}

impl PaymentRequest {
    pub fn new(destination: impl Into<String>, amount: u64, memo: impl Into<String>, ttl: Duration) -> Self {
        Self {
            destination: destination.into(),
            amount,
            memo: memo.into(),
            deadline: Instant::now() + ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

/// Outcome of a payment request
///
/// Failed results keep the attempted addresses and amount so they can be
/// written to the audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentResult {
    pub source_address: String,
    pub destination_address: String,
    pub amount: u64,
    pub memo: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_tx_id: Option<String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl PaymentResult {
    pub fn succeeded(source: &str, request: &PaymentRequest, chain_tx_id: String) -> Self {
        Self {
            source_address: source.to_string(),
            destination_address: request.destination.clone(),
            amount: request.amount,
            memo: request.memo.clone(),
            chain_tx_id: Some(chain_tx_id),
            success: true,
            failure: None,
        }
    }

    pub fn failed(source: &str, request: &PaymentRequest, reason: impl Into<String>) -> Self {
        Self {
            source_address: source.to_string(),
            destination_address: request.destination.clone(),
            amount: request.amount,
            memo: request.memo.clone(),
            chain_tx_id: None,
            success: false,
            failure: Some(reason.into()),
        }
    }
}
