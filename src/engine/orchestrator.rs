//! Run orchestration
//!
//! Starts per-account workers (direct mode) or change detectors (discovery
//! mode), enforces per-account transaction ceilings and stops the run in two
//! phases: `signal_stopping` (no new attempts) then, after a grace period,
//! `force_cancel`.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::purchaser::{AccountContext, PurchaseOutcome, PurchaseSettings, Purchaser};
use super::run_state::{PaymentOutcome, RunStates};
use super::stats::Statistics;
use crate::api::{ApiProvider, CatalogApi};
use crate::audit::{DiscoveryLog, PaymentAuditLog};
use crate::config::{AccountConfig, AppConfig};
use crate::credentials::{CredentialCache, CredentialStatus};
use crate::error::{AppError, AppResult};
use crate::events::{EventBus, LogEvent, RunPhase, RunStateData};
use crate::metrics::MetricsState;
use crate::models::{AccountMode, AccountStatus, PurchaseIntent, StatisticsSnapshot};
use crate::monitoring::{ChangeDetector, IntentSink, SnipeFilter};
use crate::utils::{format_nano, mask};
use crate::wallet::WalletRegistry;

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Window between `signal_stopping` and `force_cancel`
    pub grace_period: Duration,
    pub stats_interval: Duration,
    pub detector_interval: Duration,
    pub purchase: PurchaseSettings,
}

impl From<&AppConfig> for OrchestratorSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            grace_period: Duration::from_millis(config.orchestrator.grace_period_ms),
            stats_interval: Duration::from_millis(config.orchestrator.stats_interval_ms),
            detector_interval: Duration::from_millis(config.detector.poll_interval_ms),
            purchase: PurchaseSettings {
                test_mode: config.test_mode,
                test_address: config.test_address.clone(),
                request_ttl: Duration::from_millis(config.wallet.request_ttl_ms),
            },
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

/// Shared services the orchestrator runs on
pub struct OrchestratorDeps {
    pub credentials: Arc<CredentialCache>,
    pub registry: Arc<WalletRegistry>,
    pub apis: Arc<dyn ApiProvider>,
    pub events: Arc<EventBus>,
    pub metrics: Option<Arc<MetricsState>>,
    pub payment_log: Option<Arc<PaymentAuditLog>>,
    pub discovery_log: Option<Arc<DiscoveryLog>>,
}

/// Balance line of the wallet report
#[derive(Debug, Clone, Serialize)]
pub struct WalletBalance {
    pub account: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance_nano: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WalletBalance {
    fn failed(account: &str, error: impl ToString) -> Self {
        Self {
            account: account.to_string(),
            address: None,
            balance_nano: None,
            balance: None,
            error: Some(error.to_string()),
        }
    }
}

/// A validated account whose wallet is open
struct PreparedAccount {
    context: AccountContext,
    /// Set for discovery accounts
    catalog: Option<Arc<dyn CatalogApi>>,
}

struct Run {
    /// Correlates the log lines of one run
    id: Uuid,
    cancel_token: CancellationToken,
    account_tokens: HashMap<String, CancellationToken>,
    detectors: Vec<Arc<ChangeDetector>>,
}

struct Inner {
    accounts: Vec<Arc<AccountConfig>>,
    credentials: Arc<CredentialCache>,
    registry: Arc<WalletRegistry>,
    apis: Arc<dyn ApiProvider>,
    events: Arc<EventBus>,
    metrics: Option<Arc<MetricsState>>,
    discovery_log: Option<Arc<DiscoveryLog>>,
    stats: Arc<Statistics>,
    run_states: RunStates,
    purchaser: Purchaser,
    settings: OrchestratorSettings,
    /// Serializes operator start/stop
    control: tokio::sync::Mutex<()>,
    run: Mutex<Option<Run>>,
    stopping: AtomicBool,
}

/// Handle to the purchasing run. Cheap to clone.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(accounts: Vec<AccountConfig>, deps: OrchestratorDeps, settings: OrchestratorSettings) -> Self {
        let stats = Arc::new(Statistics::new(deps.metrics.clone()));
        let purchaser = Purchaser::new(
            deps.credentials.clone(),
            deps.registry.clone(),
            stats.clone(),
            deps.events.clone(),
            deps.payment_log,
            settings.purchase.clone(),
        );

        Self {
            inner: Arc::new(Inner {
                accounts: accounts.into_iter().map(Arc::new).collect(),
                credentials: deps.credentials,
                registry: deps.registry,
                apis: deps.apis,
                events: deps.events,
                metrics: deps.metrics,
                discovery_log: deps.discovery_log,
                stats,
                run_states: RunStates::new(),
                purchaser,
                settings,
                control: tokio::sync::Mutex::new(()),
                run: Mutex::new(None),
                stopping: AtomicBool::new(false),
            }),
        }
    }

    /// Start a run. Misconfigured accounts are skipped; starting while a run
    /// is in progress is an error.
    pub async fn start(&self) -> AppResult<()> {
        let _control = self.inner.control.lock().await;
        if self.is_running() {
            return Err(AppError::Conflict("a run is already in progress".to_string()));
        }
        self.inner.begin_run().await
    }

    /// Operator stop: same two-phase path as an exhausted run
    pub async fn stop(&self) -> AppResult<()> {
        let _control = self.inner.control.lock().await;
        if !self.is_running() {
            return Err(AppError::Conflict("no run in progress".to_string()));
        }
        if self.inner.stopping.load(Ordering::Acquire) {
            return Err(AppError::Conflict("run is already stopping".to_string()));
        }
        self.inner.clone().shutdown("operator request").await;
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .run
            .lock()
            .as_ref()
            .map(|run| !run.cancel_token.is_cancelled())
            .unwrap_or(false)
    }

    pub fn is_stopping(&self) -> bool {
        self.inner.stopping.load(Ordering::Acquire)
    }

    pub fn statistics(&self) -> StatisticsSnapshot {
        self.inner.stats.snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        self.inner.events.subscribe()
    }

    /// `(active, total)` accounts of the current or last run
    pub fn account_activity(&self) -> (usize, usize) {
        self.inner.run_states.activity()
    }

    pub fn account_statuses(&self) -> Vec<AccountStatus> {
        self.inner.run_states.statuses()
    }

    /// Cached bearer per account, masked
    pub fn credential_status(&self) -> Vec<CredentialStatus> {
        self.inner.credentials.status()
    }

    pub fn configured_accounts(&self) -> usize {
        self.inner.accounts.len()
    }

    pub fn wallet_count(&self) -> usize {
        self.inner.registry.wallet_count()
    }

    /// Address and balance of every configured wallet
    pub async fn wallet_report(&self) -> Vec<WalletBalance> {
        let mut report = Vec::new();
        for account in &self.inner.accounts {
            let Some(secret) = account.wallet_secret.as_ref() else {
                continue;
            };
            let profile = match account.network_profile() {
                Ok(profile) => profile,
                Err(e) => {
                    report.push(WalletBalance::failed(&account.name, e));
                    continue;
                }
            };
            let queue = match self.inner.registry.get_or_create(secret, &profile).await {
                Ok(queue) => queue,
                Err(e) => {
                    report.push(WalletBalance::failed(&account.name, e));
                    continue;
                }
            };
            let entry = match queue.balance().await {
                Ok(nano) => WalletBalance {
                    account: account.name.clone(),
                    address: Some(mask(queue.address())),
                    balance_nano: Some(nano),
                    balance: Some(format_nano(nano)),
                    error: None,
                },
                Err(e) => WalletBalance {
                    address: Some(mask(queue.address())),
                    ..WalletBalance::failed(&account.name, e)
                },
            };
            report.push(entry);
        }
        report
    }
}

impl Inner {
    async fn begin_run(self: &Arc<Self>) -> AppResult<()> {
        self.stats.reset();
        self.run_states.clear();
        self.stopping.store(false, Ordering::Release);

        let run_id = Uuid::new_v4();
        let cancel_token = CancellationToken::new();
        *self.run.lock() = Some(Run {
            id: run_id,
            cancel_token: cancel_token.clone(),
            account_tokens: HashMap::new(),
            detectors: Vec::new(),
        });

        let warmed = self.credentials.warm_up().await;
        tracing::info!(%run_id, accounts = self.accounts.len(), warmed, "Starting run");

        // Wallet setup awaits the network, so every account is prepared
        // before any of them starts purchasing
        let mut prepared = Vec::with_capacity(self.accounts.len());
        for account in &self.accounts {
            match self.prepare_account(account).await {
                Ok(ready) => prepared.push(ready),
                Err(reason) => {
                    tracing::error!(account = %account.name, reason = %reason, "Account skipped");
                    self.events.error(Some(&account.name), format!("Account skipped: {}", reason));
                }
            }
        }

        if prepared.is_empty() {
            cancel_token.cancel();
            *self.run.lock() = None;
            self.stats.finish();
            return Err(AppError::Validation("no account could be started".to_string()));
        }

        // All accounts are active before the first one can reach its ceiling
        for ready in &prepared {
            let config = &ready.context.config;
            self.run_states
                .register(&config.name, config.mode(), config.max_transactions);
        }
        let started = prepared.len();
        for ready in prepared {
            self.launch_account(ready, &cancel_token);
        }

        self.credentials.clone().spawn_sweeper(cancel_token.child_token());
        self.spawn_stats_ticker(cancel_token.child_token());
        self.update_gauges();

        let (active, total) = self.run_states.activity();
        self.events.info(None, format!("Run started with {} of {} accounts", started, self.accounts.len()));
        self.events.publish(LogEvent::RunState(RunStateData {
            state: RunPhase::Running,
            active_accounts: active,
            total_accounts: total,
        }));
        Ok(())
    }

    /// Validate an account and build everything it needs to run
    async fn prepare_account(&self, account: &Arc<AccountConfig>) -> Result<PreparedAccount, String> {
        let problems = account.problems();
        if !problems.is_empty() {
            return Err(problems.join("; "));
        }
        let profile = account.network_profile()?;

        if let Some(secret) = account.wallet_secret.as_ref() {
            let queue = self
                .registry
                .get_or_create(secret, &profile)
                .await
                .map_err(|e| format!("wallet unavailable: {}", e))?;
            tracing::info!(account = %account.name, wallet = %mask(queue.address()), "Wallet ready");
        }

        let api = self.apis.purchase(&profile).map_err(|e| e.to_string())?;
        let catalog = match account.mode() {
            AccountMode::Direct => None,
            AccountMode::Discovery => Some(self.apis.catalog(&profile).map_err(|e| e.to_string())?),
        };

        Ok(PreparedAccount {
            context: AccountContext {
                config: account.clone(),
                profile,
                api,
            },
            catalog,
        })
    }

    /// Spawn the workers or the detector of a registered account
    fn launch_account(self: &Arc<Self>, ready: PreparedAccount, cancel_token: &CancellationToken) {
        let PreparedAccount { context, catalog } = ready;
        let account = context.config.clone();
        let account_token = cancel_token.child_token();

        match catalog {
            None => {
                self.track_account(&account.name, &account_token, None);
                for worker_id in 0..account.threads {
                    let inner = self.clone();
                    let context = context.clone();
                    let token = account_token.clone();
                    tokio::spawn(async move { inner.worker_loop(context, worker_id, token).await });
                }
                tracing::info!(account = %account.name, threads = account.threads, "Direct workers started");
            }
            Some(catalog) => {
                let filter = account
                    .snipe
                    .as_ref()
                    .map(SnipeFilter::from)
                    .unwrap_or_default();
                let sink = Arc::new(IntentRouter {
                    inner: Arc::downgrade(self),
                    context,
                    token: account_token.clone(),
                });

                let mut detector = ChangeDetector::new(
                    account.name.clone(),
                    catalog,
                    self.credentials.clone(),
                    filter,
                    self.settings.detector_interval,
                    sink,
                )
                .with_cancel_token(account_token.child_token());
                if let Some(log) = &self.discovery_log {
                    detector = detector.with_discovery_log(log.clone());
                }
                let detector = Arc::new(detector);
                self.track_account(&account.name, &account_token, Some(detector.clone()));

                tokio::spawn(async move {
                    if let Err(e) = detector.start().await {
                        tracing::error!(account = %detector.account(), error = %e, "Change detector failed to start");
                    }
                });
                tracing::info!(account = %account.name, "Change detector started");
            }
        }
    }

    fn track_account(&self, name: &str, token: &CancellationToken, detector: Option<Arc<ChangeDetector>>) {
        if let Some(run) = self.run.lock().as_mut() {
            run.account_tokens.insert(name.to_string(), token.clone());
            if let Some(detector) = detector {
                run.detectors.push(detector);
            }
        }
    }

    async fn worker_loop(self: Arc<Self>, context: AccountContext, worker_id: usize, token: CancellationToken) {
        let name = context.name().to_string();
        let target = context.config.direct_target();
        let delay = context.config.purchase_delay();
        tracing::debug!(account = %name, worker_id, "Worker started");

        loop {
            if token.is_cancelled()
                || self.stopping.load(Ordering::Acquire)
                || !self.run_states.is_active(&name)
            {
                break;
            }

            if self.run_states.begin_attempt(&name) {
                let outcome = self.purchaser.execute(&context, target).await;
                self.settle(&name, &outcome);
            }

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        tracing::debug!(account = %name, worker_id, "Worker stopped");
    }

    /// Book a finished attempt; retires the account at its ceiling and ends
    /// the run when no account is left
    fn settle(self: &Arc<Self>, account: &str, outcome: &PurchaseOutcome) {
        let PaymentOutcome::Exhausted { last } = self.run_states.record_payment(account, outcome.is_paid())
        else {
            return;
        };

        tracing::info!(account = %account, "Account reached its transaction limit");
        self.events.info(Some(account), "Transaction limit reached, account finished");
        self.retire_account(account);

        if last {
            let inner = self.clone();
            tokio::spawn(async move { inner.shutdown("all accounts finished").await });
        }
    }

    fn retire_account(&self, account: &str) {
        let (token, detector) = match self.run.lock().as_ref() {
            Some(run) => (
                run.account_tokens.get(account).cloned(),
                run.detectors.iter().find(|d| d.account() == account).cloned(),
            ),
            None => (None, None),
        };
        if let Some(detector) = detector {
            detector.stop();
        }
        if let Some(token) = token {
            token.cancel();
        }
        self.update_gauges();
    }

    async fn shutdown(self: Arc<Self>, reason: &str) {
        if self.stopping.swap(true, Ordering::AcqRel) {
            return;
        }
        self.signal_stopping(reason);
        tokio::time::sleep(self.settings.grace_period).await;
        for detector in self.force_cancel() {
            detector.join().await;
        }
    }

    /// Phase one: no new attempts start, in-flight ones finish
    fn signal_stopping(&self, reason: &str) {
        let (active, total) = self.run_states.activity();
        tracing::info!(
            reason = %reason,
            grace_ms = self.settings.grace_period.as_millis() as u64,
            "Run stopping"
        );
        self.events.info(None, format!("Stopping: {}", reason));
        self.events.publish(LogEvent::RunState(RunStateData {
            state: RunPhase::Stopping,
            active_accounts: active,
            total_accounts: total,
        }));
    }

    /// Phase two: cancel every task of the run; returns the detectors so
    /// the caller can wait for their poll loops
    fn force_cancel(&self) -> Vec<Arc<ChangeDetector>> {
        let run = self.run.lock().take();
        let run_id = run.as_ref().map(|run| run.id.to_string()).unwrap_or_default();
        let mut detectors = Vec::new();
        if let Some(run) = run {
            for detector in &run.detectors {
                detector.stop();
            }
            run.cancel_token.cancel();
            detectors = run.detectors;
        }
        self.stats.finish();

        let snapshot = self.stats.snapshot();
        tracing::info!(
            run_id = %run_id,
            total = snapshot.total_requests,
            success = snapshot.success_requests,
            failed = snapshot.failed_requests,
            invalid_tokens = snapshot.invalid_tokens,
            sent = snapshot.sent_transactions,
            duration_secs = snapshot.duration_secs,
            "Run stopped"
        );
        let (active, total) = self.run_states.activity();
        self.events.publish(LogEvent::Statistics(snapshot));
        self.events.publish(LogEvent::RunState(RunStateData {
            state: RunPhase::Stopped,
            active_accounts: active,
            total_accounts: total,
        }));
        if let Some(m) = &self.metrics {
            m.active_accounts.set(0);
        }
        detectors
    }

    fn spawn_stats_ticker(self: &Arc<Self>, token: CancellationToken) {
        let inner = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(inner.settings.stats_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        inner.events.publish(LogEvent::Statistics(inner.stats.snapshot()));
                    }
                }
            }
        });
    }

    fn update_gauges(&self) {
        if let Some(m) = &self.metrics {
            let (active, _) = self.run_states.activity();
            m.active_accounts.set(active as i64);
            m.wallet_queues.set(self.registry.wallet_count() as i64);
        }
    }
}

/// Routes a detector's intents into the purchase path of its account
struct IntentRouter {
    inner: Weak<Inner>,
    context: AccountContext,
    token: CancellationToken,
}

#[async_trait]
impl IntentSink for IntentRouter {
    async fn on_intent(&self, intent: PurchaseIntent) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        inner.stats.record_discovery();
        inner.events.publish(LogEvent::Discovery(intent.clone()));

        let name = self.context.name().to_string();
        if self.token.is_cancelled() || inner.stopping.load(Ordering::Acquire) {
            return;
        }
        if !inner.run_states.begin_attempt(&name) {
            tracing::warn!(account = %name, target = %intent.target, "Discovery not purchased, no transactions left");
            inner.events.warn(Some(&name), format!("Skipped {}: no transactions left", intent.target));
            return;
        }

        let context = self.context.clone();
        tokio::spawn(async move {
            let outcome = inner.purchaser.execute(&context, intent.target).await;
            inner.settle(&name, &outcome);
        });
    }
}
