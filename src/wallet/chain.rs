//! Chain client abstraction
//!
//! Signing and key derivation happen behind `ChainClient`; the wallet queue
//! only reads counters and balances and asks for transfers.

use async_trait::async_trait;
use secrecy::SecretString;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::constants::NOT_ACTIVE_MARKERS;
use crate::models::NetworkProfile;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// Wallet contract not deployed yet
    #[error("wallet is not active: {0}")]
    NotActive(String),

    #[error("insufficient balance for activation: have {balance} nano, need {required} nano")]
    InsufficientReserve { balance: u64, required: u64 },

    #[error("wallet activation not visible after {0:?}")]
    ActivationTimeout(Duration),

    #[error("broadcast timed out after {0:?}")]
    BroadcastTimeout(Duration),

    #[error("broadcast failed: {0}")]
    Broadcast(String),

    #[error("chain RPC error: {0}")]
    Rpc(String),

    /// Client or wallet could not be constructed at all
    #[error("wallet setup failed: {0}")]
    Setup(String),
}

impl ChainError {
    /// Map a raw chain error text to `NotActive` or `Rpc`
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        if NOT_ACTIVE_MARKERS.iter().any(|m| lower.contains(m)) {
            ChainError::NotActive(message.to_string())
        } else {
            ChainError::Rpc(message.to_string())
        }
    }
}

/// An opened signing wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WalletHandle {
    /// User-friendly address of the wallet
    pub address: String,
    /// Opaque id the chain client uses to sign for this wallet
    pub wallet_id: String,
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Derive and open the wallet for a mnemonic
    async fn open_wallet(&self, secret: &SecretString) -> Result<WalletHandle, ChainError>;

    /// Current sequence counter; `NotActive` if the wallet is not deployed
    async fn read_sequence(&self, address: &str) -> Result<u64, ChainError>;

    /// Sign and broadcast a transfer of `amount` nano to `to`
    async fn broadcast(
        &self,
        wallet: &WalletHandle,
        to: &str,
        amount: u64,
        memo: &str,
    ) -> Result<(), ChainError>;

    /// Balance in nano
    async fn read_balance(&self, address: &str) -> Result<u64, ChainError>;
}

/// Creates one chain client per network profile
#[async_trait]
pub trait ChainConnector: Send + Sync {
    async fn connect(&self, profile: &NetworkProfile) -> Result<Arc<dyn ChainClient>, ChainError>;
}
