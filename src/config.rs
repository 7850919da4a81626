//! Configuration management for Sniper Operator
//!
//! Loads configuration from YAML/JSON/TOML files and environment variables.
//! Environment variables override file values.

use config::{Config, ConfigError, Environment, File};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::store::API_BASE_URL;
use crate::models::{AccountMode, NetworkProfile, PurchaseTarget};

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// Control surface (HTTP + WebSocket)
    #[serde(default)]
    pub server: ServerConfig,
    /// Credential cache timings and persistent store
    #[serde(default)]
    pub credentials: CredentialsConfig,
    /// Wallet queue timings
    #[serde(default)]
    pub wallet: WalletConfig,
    /// Change detector cadence
    #[serde(default)]
    pub detector: DetectorConfig,
    /// Orchestrator behaviour
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    /// Store API endpoint
    #[serde(default)]
    pub store_api: StoreApiConfig,
    /// Chain signing gateway
    #[serde(default)]
    pub chain: ChainConfig,
    /// Authorization helper
    #[serde(default)]
    pub auth: AuthConfig,
    /// Output files
    #[serde(default)]
    pub output: OutputConfig,
    /// Redirect every payment to `test_address`
    #[serde(default)]
    pub test_mode: bool,
    #[serde(default)]
    pub test_address: String,
    /// Purchasing accounts
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Credential cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CredentialsConfig {
    /// Soft TTL of a cached credential (real lifetime is ~45 minutes)
    #[serde(default = "default_credential_ttl")]
    pub ttl_secs: u64,
    /// Minimum time between two non-authorization refreshes
    #[serde(default = "default_refresh_cooldown")]
    pub cooldown_secs: u64,
    /// How often the preventive sweep runs
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Entries expiring within this window are refreshed by the sweep
    #[serde(default = "default_sweep_lookahead")]
    pub lookahead_secs: u64,
    /// Upper bound for one authenticator call
    #[serde(default = "default_auth_timeout")]
    pub auth_timeout_secs: u64,
    /// JSON file holding the last known credential per account
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,
}

fn default_credential_ttl() -> u64 {
    40 * 60
}

fn default_refresh_cooldown() -> u64 {
    60
}

fn default_sweep_interval() -> u64 {
    30 * 60
}

fn default_sweep_lookahead() -> u64 {
    5 * 60
}

fn default_auth_timeout() -> u64 {
    30
}

fn default_store_path() -> PathBuf {
    PathBuf::from("data/tokens.json")
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_credential_ttl(),
            cooldown_secs: default_refresh_cooldown(),
            sweep_interval_secs: default_sweep_interval(),
            lookahead_secs: default_sweep_lookahead(),
            auth_timeout_secs: default_auth_timeout(),
            store_path: default_store_path(),
        }
    }
}

/// Wallet queue configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    /// Buffered requests per wallet
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// How long `submit` waits for room in a saturated queue
    #[serde(default = "default_submit_timeout")]
    pub submit_timeout_ms: u64,
    /// How long a queued request stays valid
    #[serde(default = "default_request_ttl")]
    pub request_ttl_ms: u64,
    /// Upper bound for one broadcast call
    #[serde(default = "default_broadcast_timeout")]
    pub broadcast_timeout_ms: u64,
    /// Interval between sequence counter polls
    #[serde(default = "default_confirm_interval")]
    pub confirm_poll_interval_ms: u64,
    /// Polls before a payment is reported as unconfirmed
    #[serde(default = "default_confirm_polls")]
    pub confirm_max_polls: u32,
    /// Upper bound for the activation self-transfer broadcast
    #[serde(default = "default_activation_broadcast_timeout")]
    pub activation_broadcast_timeout_ms: u64,
    /// How long to wait for an activated wallet to become readable
    #[serde(default = "default_activation_wait")]
    pub activation_wait_ms: u64,
}

fn default_queue_capacity() -> usize {
    100
}

fn default_submit_timeout() -> u64 {
    5_000
}

fn default_request_ttl() -> u64 {
    5 * 60 * 1000
}

fn default_broadcast_timeout() -> u64 {
    10_000
}

fn default_confirm_interval() -> u64 {
    1_000
}

fn default_confirm_polls() -> u32 {
    60
}

fn default_activation_broadcast_timeout() -> u64 {
    30_000
}

fn default_activation_wait() -> u64 {
    60_000
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            submit_timeout_ms: default_submit_timeout(),
            request_ttl_ms: default_request_ttl(),
            broadcast_timeout_ms: default_broadcast_timeout(),
            confirm_poll_interval_ms: default_confirm_interval(),
            confirm_max_polls: default_confirm_polls(),
            activation_broadcast_timeout_ms: default_activation_broadcast_timeout(),
            activation_wait_ms: default_activation_wait(),
        }
    }
}

/// Change detector configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    /// Poll interval
    #[serde(default = "default_detector_interval")]
    pub poll_interval_ms: u64,
}

fn default_detector_interval() -> u64 {
    1_000
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_detector_interval(),
        }
    }
}

/// Orchestrator configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    /// Grace window between "stopping" and hard cancellation
    #[serde(default = "default_grace_period")]
    pub grace_period_ms: u64,
    /// Interval of the periodic statistics event
    #[serde(default = "default_stats_interval")]
    pub stats_interval_ms: u64,
    /// Start purchasing as soon as the process is up
    #[serde(default)]
    pub auto_start: bool,
}

fn default_grace_period() -> u64 {
    3_000
}

fn default_stats_interval() -> u64 {
    1_000
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: default_grace_period(),
            stats_interval_ms: default_stats_interval(),
            auto_start: false,
        }
    }
}

/// Store API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreApiConfig {
    #[serde(default = "default_store_base_url")]
    pub base_url: String,
    /// Request timeout in milliseconds
    #[serde(default = "default_store_timeout")]
    pub timeout_ms: u64,
}

fn default_store_base_url() -> String {
    API_BASE_URL.to_string()
}

fn default_store_timeout() -> u64 {
    30_000
}

impl Default for StoreApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_store_base_url(),
            timeout_ms: default_store_timeout(),
        }
    }
}

/// Chain gateway configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    /// Signing gateway that derives wallets and broadcasts transfers
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,
    /// Request timeout in milliseconds
    #[serde(default = "default_gateway_timeout")]
    pub timeout_ms: u64,
}

fn default_gateway_url() -> String {
    "http://127.0.0.1:8787".to_string()
}

fn default_gateway_timeout() -> u64 {
    15_000
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            gateway_url: default_gateway_url(),
            timeout_ms: default_gateway_timeout(),
        }
    }
}

/// Authorization helper configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    /// Helper service that performs the messenger handshake.
    /// Without it, refreshes fail and cached/seed credentials are used.
    #[serde(default)]
    pub helper_url: Option<String>,
    /// Bearer sent to the helper
    #[serde(default)]
    pub helper_token: Option<SecretString>,
}

/// Output file configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Payment audit log (JSON lines)
    #[serde(default = "default_transactions_log")]
    pub transactions_log: PathBuf,
    /// Discovery log (JSON lines)
    #[serde(default = "default_discoveries_log")]
    pub discoveries_log: PathBuf,
}

fn default_transactions_log() -> PathBuf {
    PathBuf::from("logs/transactions.jsonl")
}

fn default_discoveries_log() -> PathBuf {
    PathBuf::from("logs/discoveries.jsonl")
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            transactions_log: default_transactions_log(),
            discoveries_log: default_discoveries_log(),
        }
    }
}

/// One purchasing account
#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    /// Unique account name
    pub name: String,
    /// Seed bearer credential
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Phone number passed to the authorization helper (must start with '+')
    #[serde(default)]
    pub phone_number: Option<String>,
    /// Mnemonic of the paying wallet (12 or 24 words)
    #[serde(default)]
    pub wallet_secret: Option<SecretString>,
    /// Concurrent workers in direct mode
    #[serde(default = "default_threads")]
    pub threads: usize,
    #[serde(default)]
    pub collection: u64,
    #[serde(default)]
    pub character: u64,
    #[serde(default = "default_currency")]
    pub currency: String,
    /// Items per order
    #[serde(default = "default_count")]
    pub count: u32,
    /// Successful payments before the account stops; 0 = unlimited
    #[serde(default)]
    pub max_transactions: u32,
    /// Delay between two purchase attempts of one worker
    #[serde(default = "default_purchase_delay")]
    pub purchase_delay_ms: u64,
    /// `host:port` or `host:port:user:pass`
    #[serde(default)]
    pub proxy: Option<String>,
    /// Discovery mode settings
    #[serde(default)]
    pub snipe: Option<SnipeConfig>,
}

fn default_threads() -> usize {
    1
}

fn default_currency() -> String {
    "TON".to_string()
}

fn default_count() -> u32 {
    1
}

fn default_purchase_delay() -> u64 {
    100
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            auth_token: None,
            phone_number: None,
            wallet_secret: None,
            threads: default_threads(),
            collection: 0,
            character: 0,
            currency: default_currency(),
            count: default_count(),
            max_transactions: 0,
            purchase_delay_ms: default_purchase_delay(),
            proxy: None,
            snipe: None,
        }
    }
}

/// Discovery filters. Prices are in nano units.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SnipeConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub supply_range: Option<Range>,
    #[serde(default)]
    pub price_range: Option<Range>,
    /// Keywords matched against the collection title
    #[serde(default)]
    pub word_filter: Vec<String>,
}

/// Inclusive numeric range
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct Range {
    pub min: u64,
    pub max: u64,
}

impl Range {
    pub fn new(min: u64, max: u64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: u64) -> bool {
        value >= self.min && value <= self.max
    }
}

impl AccountConfig {
    /// Discovery when `snipe.enabled`, otherwise direct purchase
    pub fn mode(&self) -> AccountMode {
        match &self.snipe {
            Some(snipe) if snipe.enabled => AccountMode::Discovery,
            _ => AccountMode::Direct,
        }
    }

    /// Configured direct target
    pub fn direct_target(&self) -> PurchaseTarget {
        PurchaseTarget::Direct {
            collection: self.collection,
            character: self.character,
        }
    }

    pub fn network_profile(&self) -> Result<NetworkProfile, String> {
        NetworkProfile::from_proxy(self.proxy.as_deref())
    }

    pub fn purchase_delay(&self) -> Duration {
        Duration::from_millis(self.purchase_delay_ms)
    }

    /// Every problem that prevents this account from starting
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.name.trim().is_empty() {
            problems.push("account name is required".to_string());
        }

        let has_token = self.auth_token.as_deref().is_some_and(|t| !t.trim().is_empty());
        let phone = self.phone_number.as_deref().map(str::trim).unwrap_or("");
        if !has_token && phone.is_empty() {
            problems.push("either auth_token or phone_number is required".to_string());
        }
        if !phone.is_empty() && !phone.starts_with('+') {
            problems.push("phone_number must start with '+'".to_string());
        }

        if let Some(secret) = &self.wallet_secret {
            let words = secret.expose_secret().split_whitespace().count();
            if words != 12 && words != 24 {
                problems.push(format!("wallet_secret must have 12 or 24 words, got {}", words));
            }
        }

        if self.currency.trim().is_empty() {
            problems.push("currency is required".to_string());
        }
        if self.count == 0 {
            problems.push("count must be greater than 0".to_string());
        }

        match self.mode() {
            AccountMode::Direct => {
                if self.threads == 0 {
                    problems.push("threads must be greater than 0".to_string());
                }
                if self.collection == 0 {
                    problems.push("collection must be greater than 0".to_string());
                }
            }
            AccountMode::Discovery => {
                if let Some(snipe) = &self.snipe {
                    for (label, range) in [("supply_range", snipe.supply_range), ("price_range", snipe.price_range)] {
                        if let Some(range) = range {
                            if range.min > range.max {
                                problems.push(format!(
                                    "{} min ({}) exceeds max ({})",
                                    label, range.min, range.max
                                ));
                            }
                        }
                    }
                }
            }
        }

        if let Err(e) = self.network_profile() {
            problems.push(e);
        }

        problems
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let problems = self.problems();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Message(format!(
                "account '{}': {}",
                self.name,
                problems.join("; ")
            )))
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (SNIPER_*)
    /// 2. config/config.{yaml,json,toml} (if exists)
    /// 3. config.{yaml,json,toml} (if exists)
    /// 4. Default values
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("store_api.base_url", API_BASE_URL)?
            .set_default("test_mode", false)?
            .add_source(File::with_name("config").required(false))
            .add_source(File::with_name("config/config").required(false))
            // SNIPER_SERVER__PORT=9090 -> server.port = 9090
            // SNIPER_TEST_MODE=true -> test_mode = true
            .add_source(
                Environment::with_prefix("SNIPER")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(","),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Validate global settings. Per-account problems are not fatal here;
    /// the orchestrator skips misconfigured accounts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.test_mode && self.test_address.trim().is_empty() {
            return Err(ConfigError::Message(
                "test_address must be set when test_mode is enabled".to_string(),
            ));
        }

        if self.wallet.queue_capacity == 0 {
            return Err(ConfigError::Message(
                "wallet.queue_capacity must be greater than 0".to_string(),
            ));
        }

        if self.wallet.confirm_max_polls == 0 {
            return Err(ConfigError::Message(
                "wallet.confirm_max_polls must be greater than 0".to_string(),
            ));
        }

        if self.credentials.lookahead_secs >= self.credentials.ttl_secs {
            return Err(ConfigError::Message(
                "credentials.lookahead_secs must be shorter than credentials.ttl_secs".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for account in &self.accounts {
            if !account.name.is_empty() && !seen.insert(account.name.as_str()) {
                return Err(ConfigError::Message(format!(
                    "duplicate account name '{}'",
                    account.name
                )));
            }
        }

        Ok(())
    }
}
