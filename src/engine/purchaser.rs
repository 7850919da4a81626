//! Buy-then-pay
//!
//! The single purchase path for direct and discovered targets: place the
//! order with the account's credential (one forced refresh and one retry on
//! an authorization failure), then settle the quoted price through the
//! account's wallet queue.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::api::{ApiError, BuyResponse, PurchaseApi};
use crate::audit::{PaymentAuditEntry, PaymentAuditLog};
use crate::config::AccountConfig;
use crate::constants::chain::FEE_BUFFER_NANO;
use crate::credentials::{CredentialCache, CredentialError, RefreshReason};
use crate::events::{EventBus, LogEvent, PaymentEventData};
use crate::models::{NetworkProfile, PaymentRequest, PaymentResult, PurchaseTarget};
use crate::utils::{format_nano, mask};
use crate::wallet::WalletRegistry;

use super::stats::Statistics;

#[derive(Debug, Clone)]
pub struct PurchaseSettings {
    /// Send every payment to `test_address` instead of the store's address
    pub test_mode: bool,
    pub test_address: String,
    /// Validity of a queued payment request
    pub request_ttl: Duration,
}

impl Default for PurchaseSettings {
    fn default() -> Self {
        Self {
            test_mode: false,
            test_address: String::new(),
            request_ttl: Duration::from_secs(300),
        }
    }
}

/// Everything a purchase needs to know about its account
#[derive(Clone)]
pub struct AccountContext {
    pub config: Arc<AccountConfig>,
    pub profile: NetworkProfile,
    pub api: Arc<dyn PurchaseApi>,
}

impl AccountContext {
    pub fn name(&self) -> &str {
        &self.config.name
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurchaseOutcome {
    /// Order not placed
    Failed(String),
    /// Order placed, nothing to pay (no payment due or no wallet configured)
    Ordered { order_id: String },
    Paid(PaymentResult),
    PaymentFailed(PaymentResult),
}

impl PurchaseOutcome {
    pub fn is_paid(&self) -> bool {
        matches!(self, PurchaseOutcome::Paid(_))
    }
}

#[derive(Debug)]
enum BuyFailure {
    Credential(CredentialError),
    Api(ApiError),
    /// Still rejected after a refresh and retry
    Unauthorized(u16),
}

impl std::fmt::Display for BuyFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuyFailure::Credential(e) => write!(f, "{}", e),
            BuyFailure::Api(e) => write!(f, "{}", e),
            BuyFailure::Unauthorized(status) => {
                write!(f, "credential rejected after refresh (status {})", status)
            }
        }
    }
}

pub struct Purchaser {
    credentials: Arc<CredentialCache>,
    registry: Arc<WalletRegistry>,
    stats: Arc<Statistics>,
    events: Arc<EventBus>,
    audit: Option<Arc<PaymentAuditLog>>,
    settings: PurchaseSettings,
}

impl Purchaser {
    pub fn new(
        credentials: Arc<CredentialCache>,
        registry: Arc<WalletRegistry>,
        stats: Arc<Statistics>,
        events: Arc<EventBus>,
        audit: Option<Arc<PaymentAuditLog>>,
        settings: PurchaseSettings,
    ) -> Self {
        Self {
            credentials,
            registry,
            stats,
            events,
            audit,
            settings,
        }
    }

    /// One purchase attempt for `target`, payment included
    pub async fn execute(&self, account: &AccountContext, target: PurchaseTarget) -> PurchaseOutcome {
        let name = account.name();
        self.stats.record_attempt();

        let response = match self.place_order(account, &target).await {
            Ok(response) => response,
            Err(e) => {
                self.stats.record_failure();
                tracing::warn!(account = %name, target = %target, error = %e, "Purchase failed");
                self.events.warn(Some(name), format!("Purchase {} failed: {}", target, e));
                return PurchaseOutcome::Failed(e.to_string());
            }
        };

        let order_id = match (&response.order_id, response.is_success()) {
            (Some(order_id), true) => order_id.clone(),
            _ => {
                self.stats.record_failure();
                tracing::warn!(
                    account = %name,
                    target = %target,
                    status = response.status,
                    body = %truncate(&response.body, 200),
                    "Order rejected"
                );
                self.events.warn(
                    Some(name),
                    format!("Order for {} rejected with status {}", target, response.status),
                );
                return PurchaseOutcome::Failed(format!("order rejected with status {}", response.status));
            }
        };

        self.stats.record_success();
        tracing::info!(account = %name, target = %target, order_id = %order_id, "Order placed");

        let Some((payout_address, quoted)) = response.payment_due() else {
            self.events.info(Some(name), format!("Order {} placed, no payment due", order_id));
            return PurchaseOutcome::Ordered { order_id };
        };

        let Some(secret) = account.config.wallet_secret.as_ref() else {
            tracing::warn!(account = %name, order_id = %order_id, "No wallet configured, order left unpaid");
            self.events.warn(
                Some(name),
                format!("Order {} placed but no wallet is configured", order_id),
            );
            return PurchaseOutcome::Ordered { order_id };
        };

        let destination = if self.settings.test_mode {
            self.settings.test_address.clone()
        } else {
            payout_address.to_string()
        };
        let amount = quoted.saturating_add(FEE_BUFFER_NANO);
        let request = PaymentRequest::new(destination, amount, order_id.clone(), self.settings.request_ttl);
        let currency = response
            .currency
            .clone()
            .unwrap_or_else(|| account.config.currency.clone());

        let submitted = Instant::now();
        let result = match self.registry.get_or_create(secret, &account.profile).await {
            Ok(queue) => queue.submit(request).await,
            Err(e) => PaymentResult::failed("", &request, format!("wallet unavailable: {}", e)),
        };
        self.stats
            .record_payment(result.success, submitted.elapsed().as_secs_f64() * 1000.0);

        self.audit_payment(name, &currency, &result);
        self.report_payment(name, &order_id, &currency, &result);

        if result.success {
            PurchaseOutcome::Paid(result)
        } else {
            PurchaseOutcome::PaymentFailed(result)
        }
    }

    async fn place_order(
        &self,
        account: &AccountContext,
        target: &PurchaseTarget,
    ) -> Result<BuyResponse, BuyFailure> {
        let name = account.name();
        let credential = self.credentials.get(name).await.map_err(BuyFailure::Credential)?;
        let response = self.buy(account, &credential, target).await?;
        if !response.is_authorization_error {
            return Ok(response);
        }

        self.stats.record_invalid_token();
        let reason = if response.status == 200 {
            RefreshReason::InvalidTokenPayload
        } else {
            RefreshReason::HttpStatus(response.status)
        };
        tracing::warn!(account = %name, status = response.status, "Store rejected credential, refreshing");
        self.events.warn(Some(name), format!("Credential rejected ({}), refreshing", reason));

        let credential = self
            .credentials
            .force_refresh(name, reason)
            .await
            .map_err(BuyFailure::Credential)?;
        let retried = self.buy(account, &credential, target).await?;
        if retried.is_authorization_error {
            self.stats.record_invalid_token();
            return Err(BuyFailure::Unauthorized(retried.status));
        }
        Ok(retried)
    }

    async fn buy(
        &self,
        account: &AccountContext,
        credential: &str,
        target: &PurchaseTarget,
    ) -> Result<BuyResponse, BuyFailure> {
        account
            .api
            .buy(credential, target, &account.config.currency, account.config.count)
            .await
            .map_err(BuyFailure::Api)
    }

    fn audit_payment(&self, account: &str, currency: &str, result: &PaymentResult) {
        let Some(audit) = &self.audit else {
            return;
        };
        let entry = PaymentAuditEntry::from_result(account, currency, result, self.settings.test_mode);
        if let Err(e) = audit.record(&entry) {
            tracing::error!(account = %account, error = %e, "Failed to write payment audit entry");
        }
    }

    fn report_payment(&self, account: &str, order_id: &str, currency: &str, result: &PaymentResult) {
        if result.success {
            tracing::info!(
                account = %account,
                order_id = %order_id,
                from = %mask(&result.source_address),
                to = %mask(&result.destination_address),
                amount = %format_nano(result.amount),
                chain_tx_id = result.chain_tx_id.as_deref().unwrap_or_default(),
                test_mode = self.settings.test_mode,
                "Payment sent"
            );
            self.events.info(
                Some(account),
                format!(
                    "Paid {} {} for order {} to {}",
                    format_nano(result.amount),
                    currency,
                    order_id,
                    mask(&result.destination_address)
                ),
            );
        } else {
            let reason = result.failure.as_deref().unwrap_or("unknown");
            tracing::error!(account = %account, order_id = %order_id, reason = %reason, "Payment failed");
            self.events.error(
                Some(account),
                format!("Payment for order {} failed: {}", order_id, reason),
            );
        }
        self.events.publish(LogEvent::Payment(PaymentEventData {
            account: account.to_string(),
            order_id: order_id.to_string(),
            result: result.clone(),
        }));
    }
}

fn truncate(body: &str, max: usize) -> &str {
    match body.char_indices().nth(max) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}
