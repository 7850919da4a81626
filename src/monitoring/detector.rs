//! Catalog change detector
//!
//! Polls the catalog for one discovery account and raises a `PurchaseIntent`
//! for every sub-item that is new since the baseline and passes the
//! account's filters.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::filters::SnipeFilter;
use super::known::{Admission, KnownItemSet};
use crate::api::{CatalogApi, CatalogError, CatalogItem};
use crate::audit::DiscoveryLog;
use crate::credentials::{CredentialCache, CredentialError, RefreshReason};
use crate::models::{PurchaseIntent, PurchaseTarget};
use crate::utils::format_nano;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("detector already started")]
    AlreadyStarted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorPhase {
    Idle,
    Initializing,
    Polling,
    Reauthorizing,
    Stopped,
}

/// Receives intents raised by a detector. Must not block.
#[async_trait]
pub trait IntentSink: Send + Sync {
    async fn on_intent(&self, intent: PurchaseIntent);
}

pub struct ChangeDetector {
    account: String,
    catalog: Arc<dyn CatalogApi>,
    credentials: Arc<CredentialCache>,
    filter: SnipeFilter,
    known: KnownItemSet,
    phase: RwLock<DetectorPhase>,
    interval: Duration,
    sink: Arc<dyn IntentSink>,
    discovery_log: Option<Arc<DiscoveryLog>>,
    cancel_token: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ChangeDetector {
    pub fn new(
        account: impl Into<String>,
        catalog: Arc<dyn CatalogApi>,
        credentials: Arc<CredentialCache>,
        filter: SnipeFilter,
        interval: Duration,
        sink: Arc<dyn IntentSink>,
    ) -> Self {
        Self {
            account: account.into(),
            catalog,
            credentials,
            filter,
            known: KnownItemSet::new(),
            phase: RwLock::new(DetectorPhase::Idle),
            interval,
            sink,
            discovery_log: None,
            cancel_token: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    pub fn with_discovery_log(mut self, log: Arc<DiscoveryLog>) -> Self {
        self.discovery_log = Some(log);
        self
    }

    /// Tie the detector's lifetime to a parent token
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn phase(&self) -> DetectorPhase {
        *self.phase.read()
    }

    pub fn known(&self) -> &KnownItemSet {
        &self.known
    }

    fn set_phase(&self, phase: DetectorPhase) {
        *self.phase.write() = phase;
    }

    /// Seed the baseline and spawn the poll loop
    pub async fn start(self: &Arc<Self>) -> Result<(), DetectorError> {
        if self.phase() != DetectorPhase::Idle {
            return Err(DetectorError::AlreadyStarted);
        }
        self.set_phase(DetectorPhase::Initializing);

        match self.seed().await {
            Ok((items, sub_items)) => {
                tracing::info!(
                    account = %self.account,
                    items,
                    sub_items,
                    "Catalog baseline captured"
                );
            }
            Err(e) => {
                tracing::warn!(
                    account = %self.account,
                    error = %e,
                    "Catalog baseline failed, polling from empty state"
                );
            }
        }

        if self.cancel_token.is_cancelled() {
            self.set_phase(DetectorPhase::Stopped);
            return Ok(());
        }
        self.set_phase(DetectorPhase::Polling);

        let detector = self.clone();
        let handle = tokio::spawn(async move { detector.run().await });
        *self.task.lock() = Some(handle);
        Ok(())
    }

    /// Stop polling. A cycle in progress finishes its current call but
    /// raises nothing further.
    pub fn stop(&self) {
        self.cancel_token.cancel();
        self.set_phase(DetectorPhase::Stopped);
    }

    /// Wait for the poll loop to exit
    pub async fn join(&self) {
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately; the baseline was just taken
        interval.tick().await;

        let mut cycles = 0u64;
        loop {
            tokio::select! {
                biased;
                _ = self.cancel_token.cancelled() => {
                    tracing::info!(account = %self.account, cycles, "Change detector shutting down");
                    break;
                }
                _ = interval.tick() => {
                    cycles += 1;
                    match self.poll_once().await {
                        Ok(0) => {}
                        Ok(raised) => {
                            tracing::debug!(account = %self.account, raised, "Poll cycle raised intents");
                        }
                        Err(e) => {
                            tracing::warn!(account = %self.account, error = %e, "Poll cycle failed");
                        }
                    }
                }
            }
        }
        self.set_phase(DetectorPhase::Stopped);
    }

    /// Mark everything currently listed as known without raising intents
    pub async fn seed(&self) -> Result<(usize, usize), DetectorError> {
        let credential = self.credentials.get(&self.account).await?;
        let items = self.catalog.list_items(&credential).await?;
        self.absorb(&credential, &items).await;
        Ok(self.known.counts())
    }

    async fn absorb(&self, credential: &str, items: &[CatalogItem]) {
        for item in items {
            self.known.mark_item(item.id);
            match self.catalog.item_detail(credential, item.id).await {
                Ok(detail) => {
                    for sub_item in &detail.sub_items {
                        self.known.mark_sub_item_if_new(item.id, sub_item.id);
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        account = %self.account,
                        item = item.id,
                        error = %e,
                        "Detail fetch failed while seeding"
                    );
                }
            }
        }
    }

    /// One poll cycle; returns the number of intents raised
    pub async fn poll_once(&self) -> Result<usize, DetectorError> {
        let credential = self.credentials.get(&self.account).await?;

        let (credential, items) = match self.catalog.list_items(&credential).await {
            Ok(items) => (credential, items),
            Err(CatalogError::Unauthorized { status }) => {
                self.set_phase(DetectorPhase::Reauthorizing);
                let reason = if status == 200 {
                    RefreshReason::InvalidTokenPayload
                } else {
                    RefreshReason::HttpStatus(status)
                };
                tracing::warn!(account = %self.account, status, "Catalog rejected credential, refreshing");

                let result = self.reauthorize(reason).await;
                if !self.cancel_token.is_cancelled() {
                    self.set_phase(DetectorPhase::Polling);
                }
                let (credential, items) = result?;

                if self.known.is_empty() {
                    self.absorb(&credential, &items).await;
                    let (items, sub_items) = self.known.counts();
                    tracing::info!(
                        account = %self.account,
                        items,
                        sub_items,
                        "Baseline captured after reauthorization"
                    );
                    return Ok(0);
                }
                (credential, items)
            }
            Err(e) => return Err(e.into()),
        };

        let mut raised = 0;
        for item in &items {
            if self.cancel_token.is_cancelled() {
                break;
            }
            if self.known.mark_item(item.id) {
                tracing::info!(account = %self.account, item = item.id, title = %item.title, "New collection listed");
            }

            let detail = match self.catalog.item_detail(&credential, item.id).await {
                Ok(detail) => detail,
                Err(e) => {
                    tracing::warn!(account = %self.account, item = item.id, error = %e, "Detail fetch failed while polling");
                    continue;
                }
            };
            let title = if detail.item.title.is_empty() {
                item.title.as_str()
            } else {
                detail.item.title.as_str()
            };

            for sub_item in &detail.sub_items {
                match self
                    .known
                    .admit(item.id, sub_item.id, || self.filter.matches(title, sub_item))
                {
                    Admission::AlreadyKnown => {}
                    Admission::Rejected => {
                        tracing::debug!(
                            account = %self.account,
                            item = item.id,
                            sub_item = sub_item.id,
                            reason = self.filter.rejection(title, sub_item).unwrap_or("filter"),
                            "New sub-item filtered out"
                        );
                    }
                    Admission::Matched => {
                        if self.cancel_token.is_cancelled() {
                            return Ok(raised);
                        }
                        let intent = PurchaseIntent {
                            account: self.account.clone(),
                            target: PurchaseTarget::Discovered {
                                collection: item.id,
                                character: sub_item.id,
                            },
                            parent_title: title.to_string(),
                            character_name: sub_item.name.clone(),
                            supply: sub_item.supply,
                            price_nano: sub_item.price,
                            detected_at: Utc::now(),
                        };
                        tracing::info!(
                            account = %self.account,
                            target = %intent.target,
                            title = %intent.parent_title,
                            price = %format_nano(intent.price_nano),
                            supply = intent.supply,
                            "Discovered sub-item matches filters"
                        );
                        if let Some(log) = &self.discovery_log {
                            if let Err(e) = log.record(&intent) {
                                tracing::error!(account = %self.account, error = %e, "Failed to write discovery log");
                            }
                        }
                        self.sink.on_intent(intent).await;
                        raised += 1;
                    }
                }
            }
        }
        Ok(raised)
    }

    async fn reauthorize(&self, reason: RefreshReason) -> Result<(String, Vec<CatalogItem>), DetectorError> {
        let credential = self.credentials.force_refresh(&self.account, reason).await?;
        let items = self.catalog.list_items(&credential).await?;
        Ok((credential, items))
    }
}
