//! Per-account bearer cache with soft TTL
//!
//! - `get` never touches the network: a live entry is returned as is, an
//!   expired or missing one is re-seeded from the credential store or the
//!   account configuration
//! - `force_refresh` calls the authenticator, limited by a cooldown unless
//!   the upstream just rejected the bearer
//! - `preventive_sweep` refreshes entries about to expire, each in its own task

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{Authenticator, CredentialError, CredentialStore};
use crate::config::{AccountConfig, CredentialsConfig};
use crate::constants::store::INVALID_TEMP_TOKEN_MARKER;
use crate::utils::mask;

/// Why a refresh was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshReason {
    /// Upstream answered with this HTTP status
    HttpStatus(u16),
    /// HTTP 200 with a structured invalid-token payload
    InvalidTokenPayload,
    /// Background sweep, entry about to expire
    Preventive,
    /// Any other caller (operator, transient failure)
    Manual,
}

impl RefreshReason {
    /// Authorization failures always refresh, regardless of cooldown
    pub fn bypasses_cooldown(&self) -> bool {
        matches!(
            self,
            RefreshReason::HttpStatus(401)
                | RefreshReason::HttpStatus(403)
                | RefreshReason::InvalidTokenPayload
                | RefreshReason::Preventive
        )
    }
}

impl fmt::Display for RefreshReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshReason::HttpStatus(code) => write!(f, "http {}", code),
            RefreshReason::InvalidTokenPayload => write!(f, "invalid token payload"),
            RefreshReason::Preventive => write!(f, "preventive"),
            RefreshReason::Manual => write!(f, "manual"),
        }
    }
}

/// Cache timings
#[derive(Debug, Clone)]
pub struct CredentialSettings {
    pub ttl: Duration,
    pub cooldown: Duration,
    pub lookahead: Duration,
    pub sweep_interval: Duration,
    pub auth_timeout: Duration,
}

impl From<&CredentialsConfig> for CredentialSettings {
    fn from(config: &CredentialsConfig) -> Self {
        Self {
            ttl: Duration::from_secs(config.ttl_secs),
            cooldown: Duration::from_secs(config.cooldown_secs),
            lookahead: Duration::from_secs(config.lookahead_secs),
            sweep_interval: Duration::from_secs(config.sweep_interval_secs),
            auth_timeout: Duration::from_secs(config.auth_timeout_secs),
        }
    }
}

impl Default for CredentialSettings {
    fn default() -> Self {
        Self::from(&CredentialsConfig::default())
    }
}

#[derive(Debug, Clone)]
struct CachedCredential {
    value: String,
    expires_at: DateTime<Utc>,
    last_refreshed: DateTime<Utc>,
    /// Bumped on every authenticator-backed refresh
    generation: u64,
}

/// Cache entry view for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct CredentialStatus {
    pub account: String,
    pub preview: String,
    pub expires_at: DateTime<Utc>,
    pub last_refreshed: DateTime<Utc>,
}

fn chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(d.as_millis().min(i64::MAX as u128) as i64)
}

/// Bearer cache shared by every worker and detector
pub struct CredentialCache {
    accounts: HashMap<String, AccountConfig>,
    entries: RwLock<HashMap<String, CachedCredential>>,
    /// One async lock per account so refreshes for an account never overlap
    refresh_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    authenticator: Arc<dyn Authenticator>,
    store: Arc<dyn CredentialStore>,
    settings: CredentialSettings,
}

impl CredentialCache {
    pub fn new(
        accounts: &[AccountConfig],
        authenticator: Arc<dyn Authenticator>,
        store: Arc<dyn CredentialStore>,
        settings: CredentialSettings,
    ) -> Self {
        Self {
            accounts: accounts
                .iter()
                .map(|a| (a.name.clone(), a.clone()))
                .collect(),
            entries: RwLock::new(HashMap::new()),
            refresh_locks: Mutex::new(HashMap::new()),
            authenticator,
            store,
            settings,
        }
    }

    pub fn settings(&self) -> &CredentialSettings {
        &self.settings
    }

    fn account(&self, name: &str) -> Result<&AccountConfig, CredentialError> {
        self.accounts
            .get(name)
            .ok_or_else(|| CredentialError::UnknownAccount(name.to_string()))
    }

    /// Cached bearer, re-seeded from store/config when soft-expired
    pub async fn get(&self, account: &str) -> Result<String, CredentialError> {
        self.account(account)?;

        let live = self
            .entries
            .read()
            .get(account)
            .filter(|e| Utc::now() < e.expires_at)
            .map(|e| e.value.clone());
        if let Some(value) = live {
            return Ok(value);
        }

        let seed = self
            .seed_value(account)
            .await
            .ok_or_else(|| CredentialError::Missing(account.to_string()))?;

        let now = Utc::now();
        let mut entries = self.entries.write();
        // A refresh may have landed while the store was read
        if let Some(entry) = entries.get(account) {
            if now < entry.expires_at {
                return Ok(entry.value.clone());
            }
        }
        let generation = entries.get(account).map(|e| e.generation).unwrap_or(0);
        entries.insert(
            account.to_string(),
            CachedCredential {
                value: seed.clone(),
                expires_at: now + chrono_duration(self.settings.ttl),
                last_refreshed: now,
                generation,
            },
        );

        tracing::debug!(account = %account, token = %mask(&seed), "Credential seeded");
        Ok(seed)
    }

    /// Persisted bearer first, then the configured seed
    async fn seed_value(&self, account: &str) -> Option<String> {
        if let Some(stored) = self.store.get(account).await {
            if !stored.trim().is_empty() {
                return Some(stored);
            }
        }
        self.accounts
            .get(account)
            .and_then(|a| a.auth_token.clone())
            .filter(|t| !t.trim().is_empty())
    }

    fn generation(&self, account: &str) -> u64 {
        self.entries
            .read()
            .get(account)
            .map(|e| e.generation)
            .unwrap_or(0)
    }

    fn refresh_lock(&self, account: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.refresh_locks
            .lock()
            .entry(account.to_string())
            .or_default()
            .clone()
    }

    /// Refresh the bearer through the authenticator
    ///
    /// Falls back to the previous bearer (or the seed) when the refresh fails.
    pub async fn force_refresh(
        &self,
        account: &str,
        reason: RefreshReason,
    ) -> Result<String, CredentialError> {
        let account_config = self.account(account)?;
        let observed = self.generation(account);

        if !reason.bypasses_cooldown() {
            let cooled = self
                .entries
                .read()
                .get(account)
                .filter(|e| Utc::now() - e.last_refreshed < chrono_duration(self.settings.cooldown))
                .map(|e| e.value.clone());
            if let Some(value) = cooled {
                tracing::debug!(
                    account = %account,
                    reason = %reason,
                    "Refresh within cooldown, using cached credential"
                );
                return Ok(value);
            }
        }

        let lock = self.refresh_lock(account);
        let _guard = lock.lock().await;

        // Someone else refreshed while we waited for the lock
        if self.generation(account) != observed {
            let current = self.entries.read().get(account).map(|e| e.value.clone());
            if let Some(value) = current {
                tracing::debug!(account = %account, "Reusing concurrent refresh result");
                return Ok(value);
            }
        }

        tracing::info!(account = %account, reason = %reason, "Refreshing credential");

        let outcome = tokio::time::timeout(
            self.settings.auth_timeout,
            self.authenticator.authorize(account_config),
        )
        .await;

        let failure = match outcome {
            Ok(Ok(token)) if token.contains(INVALID_TEMP_TOKEN_MARKER) => {
                "authenticator returned a temporary invalid token".to_string()
            }
            Ok(Ok(token)) if token.trim().is_empty() => "authenticator returned an empty token".to_string(),
            Ok(Ok(token)) => {
                self.install(account, &token);
                return Ok(token);
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("authenticator timed out after {:?}", self.settings.auth_timeout),
        };

        tracing::warn!(account = %account, reason = %reason, error = %failure, "Credential refresh failed");
        self.fallback(account, failure).await
    }

    fn install(&self, account: &str, token: &str) {
        let now = Utc::now();
        {
            let mut entries = self.entries.write();
            let previous = entries.get(account);
            if previous.is_some_and(|p| p.value == token) {
                tracing::warn!(account = %account, "Refreshed credential is identical to the previous one");
            }
            let generation = previous.map(|p| p.generation).unwrap_or(0) + 1;
            entries.insert(
                account.to_string(),
                CachedCredential {
                    value: token.to_string(),
                    expires_at: now + chrono_duration(self.settings.ttl),
                    last_refreshed: now,
                    generation,
                },
            );
        }

        tracing::info!(account = %account, token = %mask(token), "Credential refreshed");

        let store = self.store.clone();
        let account = account.to_string();
        let token = token.to_string();
        tokio::spawn(async move {
            if let Err(e) = store.set(&account, &token).await {
                tracing::warn!(account = %account, error = %e, "Failed to persist credential");
            }
        });
    }

    async fn fallback(&self, account: &str, reason: String) -> Result<String, CredentialError> {
        let previous = self.entries.read().get(account).map(|e| e.value.clone());
        if let Some(value) = previous {
            tracing::info!(account = %account, "Using previous credential after failed refresh");
            return Ok(value);
        }
        match self.seed_value(account).await {
            Some(seed) => Ok(seed),
            None => Err(CredentialError::RefreshFailed {
                account: account.to_string(),
                reason,
            }),
        }
    }

    /// Drop the cached entry; the next `get` re-seeds
    pub fn invalidate(&self, account: &str) {
        self.entries.write().remove(account);
    }

    /// Replace the cached bearer with the stored or configured seed
    pub async fn reload_from_seed(&self, account: &str) -> Result<String, CredentialError> {
        self.invalidate(account);
        self.get(account).await
    }

    /// Seed every configured account up front
    pub async fn warm_up(&self) -> usize {
        let mut seeded = 0;
        let mut names: Vec<&String> = self.accounts.keys().collect();
        names.sort();
        for name in names {
            match self.get(name).await {
                Ok(_) => seeded += 1,
                Err(e) => tracing::warn!(account = %name, error = %e, "No seed credential"),
            }
        }
        seeded
    }

    /// Refresh every entry expiring within the lookahead, independently
    pub fn preventive_sweep(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let horizon = Utc::now() + chrono_duration(self.settings.lookahead);
        let due: Vec<String> = self
            .entries
            .read()
            .iter()
            .filter(|(_, e)| e.expires_at <= horizon)
            .map(|(name, _)| name.clone())
            .collect();

        if !due.is_empty() {
            tracing::info!(count = due.len(), "Preventive credential sweep");
        }

        due.into_iter()
            .map(|name| {
                let cache = Arc::clone(self);
                tokio::spawn(async move {
                    if let Err(e) = cache.force_refresh(&name, RefreshReason::Preventive).await {
                        tracing::warn!(account = %name, error = %e, "Preventive refresh failed");
                    }
                })
            })
            .collect()
    }

    /// Run `preventive_sweep` on the configured interval until cancelled
    pub fn spawn_sweeper(self: Arc<Self>, cancel_token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.settings.sweep_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // First tick completes immediately
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        tracing::info!("Credential sweeper shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        self.preventive_sweep();
                    }
                }
            }
        })
    }

    /// Current entries, bearer masked
    pub fn status(&self) -> Vec<CredentialStatus> {
        let mut status: Vec<CredentialStatus> = self
            .entries
            .read()
            .iter()
            .map(|(name, e)| CredentialStatus {
                account: name.clone(),
                preview: mask(&e.value),
                expires_at: e.expires_at,
                last_refreshed: e.last_refreshed,
            })
            .collect();
        status.sort_by(|a, b| a.account.cmp(&b.account));
        status
    }
}
