//! HTTP client for the signing gateway
//!
//! The gateway holds the wallet code: it derives keys from mnemonics, signs
//! transfers and proxies liteserver reads.
//!
//! - `POST /wallets {mnemonic}` -> `{address, wallet_id}`
//! - `GET /accounts/{address}/seqno` -> `{seqno}`
//! - `GET /accounts/{address}/balance` -> `{balance}`
//! - `POST /transfers {wallet_id, to, amount, memo}` -> `{ok}`
//!
//! Errors come back as non-2xx with `{error}`.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::{ChainClient, ChainConnector, ChainError, WalletHandle};
use crate::models::NetworkProfile;

#[derive(Serialize)]
struct OpenWalletRequest<'a> {
    mnemonic: &'a str,
}

#[derive(Deserialize)]
struct OpenWalletResponse {
    address: String,
    wallet_id: String,
}

#[derive(Deserialize)]
struct SeqnoResponse {
    seqno: u64,
}

#[derive(Deserialize)]
struct BalanceResponse {
    balance: u64,
}

#[derive(Serialize)]
struct TransferRequest<'a> {
    wallet_id: &'a str,
    to: &'a str,
    amount: u64,
    memo: &'a str,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
}

/// Gateway client bound to one network profile
pub struct GatewayChainClient {
    client: reqwest::Client,
    base_url: String,
}

impl GatewayChainClient {
    pub fn new(base_url: &str, profile: &NetworkProfile, timeout: Duration) -> Result<Self, ChainError> {
        let mut builder = reqwest::Client::builder().timeout(timeout);
        if let Some(url) = profile.proxy_url() {
            let proxy = reqwest::Proxy::all(url).map_err(|e| ChainError::Setup(e.to_string()))?;
            builder = builder.proxy(proxy);
        }
        let client = builder.build().map_err(|e| ChainError::Setup(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ChainError> {
        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| ChainError::Rpc(format!("malformed gateway response: {}", e)));
        }

        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .ok()
            .and_then(|b| b.error)
            .unwrap_or_else(|| format!("gateway status {}: {}", status, text));
        Err(ChainError::classify(&message))
    }
}

#[async_trait]
impl ChainClient for GatewayChainClient {
    async fn open_wallet(&self, secret: &SecretString) -> Result<WalletHandle, ChainError> {
        let response = self
            .client
            .post(format!("{}/wallets", self.base_url))
            .json(&OpenWalletRequest {
                mnemonic: secret.expose_secret(),
            })
            .send()
            .await
            .map_err(|e| ChainError::Setup(e.to_string()))?;

        let opened: OpenWalletResponse = Self::decode(response)
            .await
            .map_err(|e| ChainError::Setup(e.to_string()))?;

        Ok(WalletHandle {
            address: opened.address,
            wallet_id: opened.wallet_id,
        })
    }

    async fn read_sequence(&self, address: &str) -> Result<u64, ChainError> {
        let response = self
            .client
            .get(format!("{}/accounts/{}/seqno", self.base_url, address))
            .send()
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?;
        let body: SeqnoResponse = Self::decode(response).await?;
        Ok(body.seqno)
    }

    async fn broadcast(
        &self,
        wallet: &WalletHandle,
        to: &str,
        amount: u64,
        memo: &str,
    ) -> Result<(), ChainError> {
        let response = self
            .client
            .post(format!("{}/transfers", self.base_url))
            .json(&TransferRequest {
                wallet_id: &wallet.wallet_id,
                to,
                amount,
                memo,
            })
            .send()
            .await
            .map_err(|e| ChainError::Broadcast(e.to_string()))?;

        match Self::decode::<serde_json::Value>(response).await {
            Ok(_) => Ok(()),
            Err(ChainError::Rpc(message)) => Err(ChainError::Broadcast(message)),
            Err(e) => Err(e),
        }
    }

    async fn read_balance(&self, address: &str) -> Result<u64, ChainError> {
        let response = self
            .client
            .get(format!("{}/accounts/{}/balance", self.base_url, address))
            .send()
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?;
        let body: BalanceResponse = Self::decode(response).await?;
        Ok(body.balance)
    }
}

/// Connects gateway clients, one per network profile
pub struct GatewayConnector {
    base_url: String,
    timeout: Duration,
}

impl GatewayConnector {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ChainConnector for GatewayConnector {
    async fn connect(&self, profile: &NetworkProfile) -> Result<Arc<dyn ChainClient>, ChainError> {
        tracing::info!(gateway = %self.base_url, profile = %profile, "Connecting chain client");
        let client = GatewayChainClient::new(&self.base_url, profile, self.timeout)?;
        Ok(Arc::new(client))
    }
}
