//! reqwest client for the store REST API

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CACHE_CONTROL};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::{
    is_token_error, ApiError, ApiProvider, BuyResponse, CatalogApi, CatalogError, CatalogItem,
    ItemDetail, PurchaseApi, SubItem,
};
use crate::constants::store::BUY_PATH;
use crate::models::{NetworkProfile, PurchaseTarget};

#[derive(Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    ok: bool,
    data: Option<T>,
}

#[derive(Deserialize)]
struct OrderData {
    #[serde(default)]
    order_id: Option<String>,
    #[serde(default)]
    total_amount: Option<u64>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    wallet: Option<String>,
}

#[derive(Deserialize)]
struct CollectionDetails {
    collection: CatalogItem,
    #[serde(default)]
    characters: Vec<SubItem>,
}

/// Store API client bound to one network profile
pub struct StoreClient {
    client: reqwest::Client,
    base_url: String,
}

impl StoreClient {
    pub fn new(base_url: &str, profile: &NetworkProfile, timeout: Duration) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        let mut builder = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers);
        if let Some(url) = profile.proxy_url() {
            let proxy = reqwest::Proxy::all(url).map_err(|e| ApiError::Setup(e.to_string()))?;
            builder = builder.proxy(proxy);
        }

        Ok(Self {
            client: builder.build().map_err(|e| ApiError::Setup(e.to_string()))?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_catalog(&self, credential: &str, url: String) -> Result<String, CatalogError> {
        let response = self
            .client
            .get(url)
            .bearer_auth(credential)
            .send()
            .await
            .map_err(|e| CatalogError::Http(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| CatalogError::Http(e.to_string()))?;

        if is_token_error(status, &body) {
            return Err(CatalogError::Unauthorized { status });
        }
        if status != 200 {
            return Err(CatalogError::Http(format!("unsuccessful status code: {}", status)));
        }
        Ok(body)
    }
}

fn map_send_error(e: reqwest::Error) -> ApiError {
    if e.is_timeout() {
        ApiError::Timeout
    } else {
        ApiError::Http(e.to_string())
    }
}

#[async_trait]
impl PurchaseApi for StoreClient {
    async fn buy(
        &self,
        credential: &str,
        target: &PurchaseTarget,
        currency: &str,
        count: u32,
    ) -> Result<BuyResponse, ApiError> {
        let url = format!("{}{}", self.base_url, BUY_PATH);
        let response = self
            .client
            .post(url)
            .query(&[
                ("collection", target.collection().to_string()),
                ("character", target.character().to_string()),
                ("currency", currency.to_string()),
                ("count", count.to_string()),
            ])
            .bearer_auth(credential)
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(map_send_error)?;

        let mut result = BuyResponse {
            status,
            is_authorization_error: is_token_error(status, &body),
            ..Default::default()
        };

        if (200..300).contains(&status) {
            if let Ok(Envelope { ok: true, data: Some(order) }) =
                serde_json::from_str::<Envelope<OrderData>>(&body)
            {
                result.order_id = order.order_id.filter(|id| !id.is_empty());
                result.total_amount = order.total_amount;
                result.currency = order.currency;
                result.payout_address = order.wallet;
            }
        }
        result.body = body;

        Ok(result)
    }
}

#[async_trait]
impl CatalogApi for StoreClient {
    async fn list_items(&self, credential: &str) -> Result<Vec<CatalogItem>, CatalogError> {
        let body = self
            .get_catalog(credential, format!("{}/collections", self.base_url))
            .await?;
        let envelope: Envelope<Vec<CatalogItem>> =
            serde_json::from_str(&body).map_err(|e| CatalogError::Decode(e.to_string()))?;
        if !envelope.ok {
            return Err(CatalogError::Decode("ok=false in collections response".to_string()));
        }
        Ok(envelope.data.unwrap_or_default())
    }

    async fn item_detail(&self, credential: &str, id: u64) -> Result<ItemDetail, CatalogError> {
        let body = self
            .get_catalog(credential, format!("{}/collection/{}", self.base_url, id))
            .await?;
        let envelope: Envelope<CollectionDetails> =
            serde_json::from_str(&body).map_err(|e| CatalogError::Decode(e.to_string()))?;
        match envelope {
            Envelope { ok: true, data: Some(details) } => Ok(ItemDetail {
                item: details.collection,
                sub_items: details.characters,
            }),
            _ => Err(CatalogError::Decode(format!("no details for collection {}", id))),
        }
    }
}

/// `ApiProvider` that builds one `StoreClient` per network profile
pub struct StoreClients {
    base_url: String,
    timeout: Duration,
    clients: Mutex<HashMap<NetworkProfile, Arc<StoreClient>>>,
}

impl StoreClients {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            timeout,
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn client(&self, profile: &NetworkProfile) -> Result<Arc<StoreClient>, ApiError> {
        let mut clients = self.clients.lock();
        if let Some(client) = clients.get(profile) {
            return Ok(client.clone());
        }
        let client = Arc::new(StoreClient::new(&self.base_url, profile, self.timeout)?);
        clients.insert(profile.clone(), client.clone());
        Ok(client)
    }
}

impl ApiProvider for StoreClients {
    fn purchase(&self, profile: &NetworkProfile) -> Result<Arc<dyn PurchaseApi>, ApiError> {
        let client: Arc<dyn PurchaseApi> = self.client(profile)?;
        Ok(client)
    }

    fn catalog(&self, profile: &NetworkProfile) -> Result<Arc<dyn CatalogApi>, ApiError> {
        let client: Arc<dyn CatalogApi> = self.client(profile)?;
        Ok(client)
    }
}
