//! Store API: purchase and catalog endpoints
//!
//! Traits are what the core consumes; `StoreClient` is the reqwest-backed
//! implementation.

mod store_client;

pub use store_client::{StoreClient, StoreClients};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::models::{NetworkProfile, PurchaseTarget};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Http(String),

    #[error("request timed out")]
    Timeout,

    #[error("client setup failed: {0}")]
    Setup(String),
}

/// Outcome of a buy call, successful or not
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuyResponse {
    pub status: u16,
    pub body: String,
    pub order_id: Option<String>,
    /// Quoted price in nano
    pub total_amount: Option<u64>,
    pub currency: Option<String>,
    /// Address the payment must go to
    pub payout_address: Option<String>,
    /// 401/403 or a structured invalid-token payload
    pub is_authorization_error: bool,
}

impl BuyResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status) && !self.is_authorization_error
    }

    /// `(payout address, amount)` when the order requires a payment
    pub fn payment_due(&self) -> Option<(&str, u64)> {
        match (&self.payout_address, self.total_amount, &self.order_id) {
            (Some(address), Some(amount), Some(_)) if !address.is_empty() && amount > 0 => {
                Some((address.as_str(), amount))
            }
            _ => None,
        }
    }
}

/// Places orders
#[async_trait]
pub trait PurchaseApi: Send + Sync {
    async fn buy(
        &self,
        credential: &str,
        target: &PurchaseTarget,
        currency: &str,
        count: u32,
    ) -> Result<BuyResponse, ApiError>;
}

/// Top-level catalog entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: u64,
    #[serde(default)]
    pub title: String,
}

/// Purchasable sub-item of a catalog entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubItem {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub supply: u64,
    /// Price in nano
    #[serde(default)]
    pub price: u64,
    #[serde(default)]
    pub left: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemDetail {
    pub item: CatalogItem,
    pub sub_items: Vec<SubItem>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// The bearer was rejected
    #[error("credential rejected (status {status})")]
    Unauthorized { status: u16 },

    #[error("catalog request failed: {0}")]
    Http(String),

    #[error("unexpected catalog response: {0}")]
    Decode(String),
}

/// Catalog reads used by the change detector
#[async_trait]
pub trait CatalogApi: Send + Sync {
    async fn list_items(&self, credential: &str) -> Result<Vec<CatalogItem>, CatalogError>;
    async fn item_detail(&self, credential: &str, id: u64) -> Result<ItemDetail, CatalogError>;
}

/// Hands out API clients per network profile
pub trait ApiProvider: Send + Sync {
    fn purchase(&self, profile: &NetworkProfile) -> Result<Arc<dyn PurchaseApi>, ApiError>;
    fn catalog(&self, profile: &NetworkProfile) -> Result<Arc<dyn CatalogApi>, ApiError>;
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    ok: bool,
    #[serde(default, rename = "errorCode")]
    error_code: Option<String>,
}

/// True when a store response means "bearer rejected"
///
/// 401/403, a body mentioning `invalid_auth_token`/`unauthorized`, or
/// `{ok:false, errorCode:"invalid_auth_token"}` even on HTTP 200.
pub fn is_token_error(status: u16, body: &str) -> bool {
    if status == 401 || status == 403 {
        return true;
    }
    if body.contains("invalid_auth_token") || body.contains("unauthorized") {
        return true;
    }
    matches!(
        serde_json::from_str::<ErrorEnvelope>(body),
        Ok(ErrorEnvelope { ok: false, error_code: Some(code) }) if code == "invalid_auth_token"
    )
}
