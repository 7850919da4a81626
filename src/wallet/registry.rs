//! Wallet registry: one queue per `(wallet secret, network profile)`
//!
//! The registry is an explicit instance owned by the orchestrator. Both the
//! chain client of a profile and the queue of a key are built exactly once,
//! even when many workers ask concurrently; a failed build leaves the slot
//! empty so a later call can retry.

use parking_lot::RwLock;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use super::{ChainClient, ChainConnector, ChainError, WalletQueue, WalletQueueSettings};
use crate::models::NetworkProfile;
use crate::utils::mask;

/// Registry key. Holds a fingerprint of the secret, never the secret.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WalletKey {
    fingerprint: String,
    profile: NetworkProfile,
}

impl WalletKey {
    pub fn new(secret: &SecretString, profile: &NetworkProfile) -> Self {
        // Normalize whitespace so formatting differences map to one wallet
        let normalized = secret
            .expose_secret()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        let digest = Sha256::digest(normalized.as_bytes());

        Self {
            fingerprint: hex::encode(digest),
            profile: profile.clone(),
        }
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

type Slot<T> = Arc<OnceCell<T>>;

/// Slot for `key`; the write lock is only taken the first time a key is seen
fn slot_for<K: Eq + Hash + Clone, T>(map: &RwLock<HashMap<K, Slot<T>>>, key: &K) -> Slot<T> {
    if let Some(slot) = map.read().get(key) {
        return slot.clone();
    }
    map.write().entry(key.clone()).or_default().clone()
}

pub struct WalletRegistry {
    connector: Arc<dyn ChainConnector>,
    settings: WalletQueueSettings,
    clients: RwLock<HashMap<NetworkProfile, Slot<Arc<dyn ChainClient>>>>,
    queues: RwLock<HashMap<WalletKey, Slot<Arc<WalletQueue>>>>,
    cancel_token: CancellationToken,
}

impl WalletRegistry {
    pub fn new(connector: Arc<dyn ChainConnector>, settings: WalletQueueSettings) -> Self {
        Self {
            connector,
            settings,
            clients: RwLock::new(HashMap::new()),
            queues: RwLock::new(HashMap::new()),
            cancel_token: CancellationToken::new(),
        }
    }

    /// Queue for this wallet on this network path, created on first use
    pub async fn get_or_create(
        &self,
        secret: &SecretString,
        profile: &NetworkProfile,
    ) -> Result<Arc<WalletQueue>, ChainError> {
        let key = WalletKey::new(secret, profile);
        let slot = slot_for(&self.queues, &key);

        let queue = slot
            .get_or_try_init(|| async {
                let client = self.client_for(profile).await?;
                let wallet = client.open_wallet(secret).await?;
                tracing::info!(
                    wallet = %wallet.address,
                    key = %mask(key.fingerprint()),
                    profile = %profile,
                    "Wallet queue created"
                );
                Ok::<_, ChainError>(WalletQueue::spawn(
                    client,
                    wallet,
                    self.settings.clone(),
                    self.cancel_token.child_token(),
                ))
            })
            .await?;

        Ok(queue.clone())
    }

    async fn client_for(&self, profile: &NetworkProfile) -> Result<Arc<dyn ChainClient>, ChainError> {
        let slot = slot_for(&self.clients, profile);
        let client = slot
            .get_or_try_init(|| self.connector.connect(profile))
            .await?;
        Ok(client.clone())
    }

    /// Number of wallet queues built so far
    pub fn wallet_count(&self) -> usize {
        self.queues
            .read()
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    /// Stop every consumer. In-flight transfers finish; queued ones fail.
    pub fn shutdown(&self) {
        tracing::info!(wallets = self.wallet_count(), "Shutting down wallet queues");
        self.cancel_token.cancel();
    }
}
