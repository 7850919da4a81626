//! In-memory fakes of every external seam
//!
//! Shared by the unit and integration suites through `#[path]` includes.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use secrecy::{ExposeSecret, SecretString};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use sniper_operator::api::{
    ApiError, ApiProvider, BuyResponse, CatalogApi, CatalogError, CatalogItem, ItemDetail,
    PurchaseApi, SubItem,
};
use sniper_operator::config::AccountConfig;
use sniper_operator::credentials::{AuthError, Authenticator, CredentialCache, CredentialSettings, MemoryStore};
use sniper_operator::engine::{Orchestrator, OrchestratorDeps, OrchestratorSettings, PurchaseSettings};
use sniper_operator::events::EventBus;
use sniper_operator::models::{NetworkProfile, PurchaseIntent, PurchaseTarget};
use sniper_operator::monitoring::IntentSink;
use sniper_operator::wallet::{
    ChainClient, ChainConnector, ChainError, WalletHandle, WalletQueueSettings, WalletRegistry,
};

pub const MNEMONIC: &str =
    "abandon ability able about above absent absorb abstract absurd abuse access accident";

pub fn secret(words: &str) -> SecretString {
    SecretString::new(words.to_string())
}

// =============================================================================
// CHAIN
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub from: String,
    pub to: String,
    pub amount: u64,
    pub memo: String,
}

#[derive(Default)]
struct WalletState {
    seqno: u64,
    confirmed: u64,
    /// Broadcast and not yet observed through `read_sequence`
    unconfirmed: usize,
}

/// How the fake chain treats broadcasts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainMode {
    /// Every broadcast lands after the broadcast delay
    Landing,
    /// Broadcasts are accepted but the counter never advances
    NeverLands,
    /// Broadcasts are refused
    Rejecting,
    /// Broadcasts never return
    Hanging,
    /// The wallet is never deployed; counter reads fail as not active
    Undeployed,
}

/// Chain that records every transfer and the overlap between them
///
/// A transfer counts as in flight from the start of its broadcast until a
/// sequence read observes it.
pub struct RecordingChain {
    mode: Mutex<ChainMode>,
    wallets: Mutex<HashMap<String, WalletState>>,
    transfers: Mutex<Vec<Transfer>>,
    intervals: Mutex<Vec<(Instant, Instant)>>,
    max_in_flight: AtomicUsize,
    broadcast_delay: Duration,
    balance: u64,
}

impl RecordingChain {
    pub fn new(broadcast_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            mode: Mutex::new(ChainMode::Landing),
            wallets: Mutex::new(HashMap::new()),
            transfers: Mutex::new(Vec::new()),
            intervals: Mutex::new(Vec::new()),
            max_in_flight: AtomicUsize::new(0),
            broadcast_delay,
            balance: 100_000_000_000,
        })
    }

    pub fn set_mode(&self, mode: ChainMode) {
        *self.mode.lock() = mode;
    }

    fn mode(&self) -> ChainMode {
        *self.mode.lock()
    }

    pub fn transfers(&self) -> Vec<Transfer> {
        self.transfers.lock().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Broadcast windows, sorted by start
    pub fn intervals(&self) -> Vec<(Instant, Instant)> {
        let mut intervals = self.intervals.lock().clone();
        intervals.sort_by_key(|(start, _)| *start);
        intervals
    }
}

#[async_trait]
impl ChainClient for RecordingChain {
    async fn open_wallet(&self, secret: &SecretString) -> Result<WalletHandle, ChainError> {
        let first = secret
            .expose_secret()
            .split_whitespace()
            .next()
            .unwrap_or("empty")
            .to_string();
        let address = format!("EQ{}", first);
        self.wallets.lock().entry(address.clone()).or_default();
        Ok(WalletHandle {
            address,
            wallet_id: first,
        })
    }

    async fn read_sequence(&self, address: &str) -> Result<u64, ChainError> {
        if self.mode() == ChainMode::Undeployed {
            return Err(ChainError::NotActive("account not found".to_string()));
        }
        let mut wallets = self.wallets.lock();
        let state = wallets.entry(address.to_string()).or_default();
        if state.seqno > state.confirmed {
            let landed = (state.seqno - state.confirmed) as usize;
            state.unconfirmed = state.unconfirmed.saturating_sub(landed);
            state.confirmed = state.seqno;
        }
        Ok(state.seqno)
    }

    async fn broadcast(&self, wallet: &WalletHandle, to: &str, amount: u64, memo: &str) -> Result<(), ChainError> {
        let mode = self.mode();
        match mode {
            ChainMode::Rejecting => return Err(ChainError::Broadcast("exit code 35".to_string())),
            ChainMode::Hanging => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                return Ok(());
            }
            _ => {}
        }
        let started = Instant::now();
        {
            let mut wallets = self.wallets.lock();
            let state = wallets.entry(wallet.address.clone()).or_default();
            state.unconfirmed += 1;
            self.max_in_flight.fetch_max(state.unconfirmed, Ordering::SeqCst);
        }

        tokio::time::sleep(self.broadcast_delay).await;

        if mode == ChainMode::Landing {
            let mut wallets = self.wallets.lock();
            let state = wallets.entry(wallet.address.clone()).or_default();
            state.seqno += 1;
        }
        self.transfers.lock().push(Transfer {
            from: wallet.address.clone(),
            to: to.to_string(),
            amount,
            memo: memo.to_string(),
        });
        self.intervals.lock().push((started, Instant::now()));
        Ok(())
    }

    async fn read_balance(&self, _address: &str) -> Result<u64, ChainError> {
        Ok(self.balance)
    }
}

/// Hands out the same chain for every profile and counts connections
pub struct StaticConnector {
    pub chain: Arc<RecordingChain>,
    pub connects: AtomicU32,
    pub fail: bool,
    /// Connections over this profile take the given time
    slow: Option<(NetworkProfile, Duration)>,
}

impl StaticConnector {
    pub fn new(chain: Arc<RecordingChain>) -> Arc<Self> {
        Arc::new(Self {
            chain,
            connects: AtomicU32::new(0),
            fail: false,
            slow: None,
        })
    }

    pub fn failing(chain: Arc<RecordingChain>) -> Arc<Self> {
        Arc::new(Self {
            chain,
            connects: AtomicU32::new(0),
            fail: true,
            slow: None,
        })
    }

    pub fn slow_for(chain: Arc<RecordingChain>, profile: NetworkProfile, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            chain,
            connects: AtomicU32::new(0),
            fail: false,
            slow: Some((profile, delay)),
        })
    }
}

#[async_trait]
impl ChainConnector for StaticConnector {
    async fn connect(&self, profile: &NetworkProfile) -> Result<Arc<dyn ChainClient>, ChainError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some((slow, delay)) = &self.slow {
            if slow == profile {
                tokio::time::sleep(*delay).await;
            }
        }
        if self.fail {
            return Err(ChainError::Setup("gateway unreachable".to_string()));
        }
        Ok(self.chain.clone())
    }
}

pub fn fast_wallet_settings() -> WalletQueueSettings {
    WalletQueueSettings {
        capacity: 16,
        submit_timeout: Duration::from_millis(500),
        broadcast_timeout: Duration::from_secs(2),
        confirm_interval: Duration::from_millis(5),
        confirm_max_polls: 50,
        activation_broadcast_timeout: Duration::from_secs(1),
        activation_wait: Duration::from_millis(200),
    }
}

pub fn registry(chain: Arc<RecordingChain>) -> Arc<WalletRegistry> {
    Arc::new(WalletRegistry::new(StaticConnector::new(chain), fast_wallet_settings()))
}

// =============================================================================
// STORE
// =============================================================================

pub fn order(order_id: &str, amount: u64, address: &str) -> BuyResponse {
    BuyResponse {
        status: 200,
        body: format!(r#"{{"ok":true,"data":{{"order_id":"{}"}}}}"#, order_id),
        order_id: Some(order_id.to_string()),
        total_amount: Some(amount),
        currency: Some("TON".to_string()),
        payout_address: Some(address.to_string()),
        is_authorization_error: false,
    }
}

pub fn unauthorized(status: u16) -> BuyResponse {
    BuyResponse {
        status,
        body: r#"{"ok":false,"errorCode":"invalid_auth_token"}"#.to_string(),
        is_authorization_error: true,
        ..Default::default()
    }
}

/// Purchase endpoint answering from a script, then with a default order
pub struct ScriptedStore {
    script: Mutex<VecDeque<BuyResponse>>,
    fallback: BuyResponse,
    calls: Mutex<Vec<(String, PurchaseTarget)>>,
    order_seq: AtomicU32,
}

impl ScriptedStore {
    pub fn new(script: Vec<BuyResponse>, fallback: BuyResponse) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: Mutex::new(Vec::new()),
            order_seq: AtomicU32::new(0),
        })
    }

    /// Every call answers with a fresh order for `amount`
    pub fn always_orders(amount: u64) -> Arc<Self> {
        Self::new(Vec::new(), order("order", amount, "EQpayout"))
    }

    pub fn calls(&self) -> Vec<(String, PurchaseTarget)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl PurchaseApi for ScriptedStore {
    async fn buy(
        &self,
        credential: &str,
        target: &PurchaseTarget,
        _currency: &str,
        _count: u32,
    ) -> Result<BuyResponse, ApiError> {
        self.calls.lock().push((credential.to_string(), *target));
        let scripted = self.script.lock().pop_front();
        Ok(scripted.unwrap_or_else(|| {
            let n = self.order_seq.fetch_add(1, Ordering::SeqCst) + 1;
            let mut response = self.fallback.clone();
            if let Some(id) = response.order_id.as_mut() {
                *id = format!("{}-{}", id, n);
            }
            response
        }))
    }
}

/// Catalog whose content tests mutate between polls
pub struct FakeCatalog {
    items: Mutex<Vec<(CatalogItem, Vec<SubItem>)>>,
    /// Credentials answered with `Unauthorized`
    rejected: Mutex<Vec<String>>,
    /// Items whose detail fetch fails
    broken_details: Mutex<Vec<u64>>,
    pub list_calls: AtomicU32,
}

impl FakeCatalog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            items: Mutex::new(Vec::new()),
            rejected: Mutex::new(Vec::new()),
            broken_details: Mutex::new(Vec::new()),
            list_calls: AtomicU32::new(0),
        })
    }

    pub fn add_item(&self, id: u64, title: &str) {
        self.items.lock().push((
            CatalogItem {
                id,
                title: title.to_string(),
            },
            Vec::new(),
        ));
    }

    pub fn add_sub_item(&self, item_id: u64, sub_id: u64, supply: u64, price: u64) {
        let mut items = self.items.lock();
        if let Some((_, subs)) = items.iter_mut().find(|(item, _)| item.id == item_id) {
            subs.push(SubItem {
                id: sub_id,
                name: format!("character-{}", sub_id),
                supply,
                price,
                left: Some(supply),
            });
        }
    }

    pub fn reject(&self, credential: &str) {
        self.rejected.lock().push(credential.to_string());
    }

    pub fn break_detail(&self, item_id: u64) {
        self.broken_details.lock().push(item_id);
    }

    fn check(&self, credential: &str) -> Result<(), CatalogError> {
        if self.rejected.lock().iter().any(|c| c == credential) {
            return Err(CatalogError::Unauthorized { status: 401 });
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogApi for FakeCatalog {
    async fn list_items(&self, credential: &str) -> Result<Vec<CatalogItem>, CatalogError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.check(credential)?;
        Ok(self.items.lock().iter().map(|(item, _)| item.clone()).collect())
    }

    async fn item_detail(&self, credential: &str, id: u64) -> Result<ItemDetail, CatalogError> {
        self.check(credential)?;
        if self.broken_details.lock().contains(&id) {
            return Err(CatalogError::Http(format!("collection {} unavailable", id)));
        }
        self.items
            .lock()
            .iter()
            .find(|(item, _)| item.id == id)
            .map(|(item, subs)| ItemDetail {
                item: item.clone(),
                sub_items: subs.clone(),
            })
            .ok_or_else(|| CatalogError::Http(format!("no collection {}", id)))
    }
}

pub struct FakeApis {
    pub store: Arc<ScriptedStore>,
    pub catalog: Arc<FakeCatalog>,
}

impl FakeApis {
    pub fn new(store: Arc<ScriptedStore>, catalog: Arc<FakeCatalog>) -> Arc<Self> {
        Arc::new(Self { store, catalog })
    }
}

impl ApiProvider for FakeApis {
    fn purchase(&self, _profile: &NetworkProfile) -> Result<Arc<dyn PurchaseApi>, ApiError> {
        Ok(self.store.clone())
    }

    fn catalog(&self, _profile: &NetworkProfile) -> Result<Arc<dyn CatalogApi>, ApiError> {
        Ok(self.catalog.clone())
    }
}

// =============================================================================
// CREDENTIALS
// =============================================================================

/// Authenticator minting `fresh-1`, `fresh-2`, ...
pub struct CountingAuth {
    pub calls: AtomicU32,
    delay: Duration,
}

impl CountingAuth {
    pub fn new() -> Arc<Self> {
        Self::with_delay(Duration::ZERO)
    }

    /// Each handshake takes `delay`
    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            delay,
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Authenticator for CountingAuth {
    async fn authorize(&self, _account: &AccountConfig) -> Result<String, AuthError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(format!("fresh-{}", n))
    }
}

pub fn credentials(accounts: &[AccountConfig], auth: Arc<CountingAuth>) -> Arc<CredentialCache> {
    Arc::new(CredentialCache::new(
        accounts,
        auth,
        Arc::new(MemoryStore::new()),
        CredentialSettings::default(),
    ))
}

// =============================================================================
// ACCOUNTS & SINKS
// =============================================================================

pub fn direct_account(name: &str) -> AccountConfig {
    AccountConfig {
        name: name.to_string(),
        auth_token: Some("seed".to_string()),
        wallet_secret: Some(secret(MNEMONIC)),
        collection: 12,
        character: 3,
        purchase_delay_ms: 5,
        ..Default::default()
    }
}

#[derive(Default)]
pub struct CollectingSink {
    pub intents: Mutex<Vec<PurchaseIntent>>,
}

impl CollectingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn intents(&self) -> Vec<PurchaseIntent> {
        self.intents.lock().clone()
    }
}

#[async_trait]
impl IntentSink for CollectingSink {
    async fn on_intent(&self, intent: PurchaseIntent) {
        self.intents.lock().push(intent);
    }
}

/// Poll `condition` every 10 ms until it holds or `limit` passes
pub async fn eventually(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

// =============================================================================
// ORCHESTRATOR
// =============================================================================

pub fn fast_orchestrator_settings() -> OrchestratorSettings {
    OrchestratorSettings {
        grace_period: Duration::from_millis(50),
        stats_interval: Duration::from_millis(50),
        detector_interval: Duration::from_millis(20),
        purchase: PurchaseSettings {
            test_mode: false,
            test_address: String::new(),
            request_ttl: Duration::from_secs(30),
        },
    }
}

/// Orchestrator wired to fakes, with handles on every fake
pub struct Rig {
    pub orchestrator: Orchestrator,
    pub chain: Arc<RecordingChain>,
    pub store: Arc<ScriptedStore>,
    pub catalog: Arc<FakeCatalog>,
    pub auth: Arc<CountingAuth>,
}

impl Rig {
    pub fn new(accounts: Vec<AccountConfig>, store: Arc<ScriptedStore>) -> Self {
        let chain = RecordingChain::new(Duration::from_millis(10));
        Self::with_connector(accounts, store, chain.clone(), StaticConnector::new(chain))
    }

    pub fn with_connector(
        accounts: Vec<AccountConfig>,
        store: Arc<ScriptedStore>,
        chain: Arc<RecordingChain>,
        connector: Arc<StaticConnector>,
    ) -> Self {
        let catalog = FakeCatalog::new();
        let auth = CountingAuth::new();
        let orchestrator = Orchestrator::new(
            accounts.clone(),
            OrchestratorDeps {
                credentials: credentials(&accounts, auth.clone()),
                registry: Arc::new(WalletRegistry::new(connector, fast_wallet_settings())),
                apis: FakeApis::new(store.clone(), catalog.clone()),
                events: Arc::new(EventBus::new()),
                metrics: None,
                payment_log: None,
                discovery_log: None,
            },
            fast_orchestrator_settings(),
        );
        Self {
            orchestrator,
            chain,
            store,
            catalog,
            auth,
        }
    }
}
