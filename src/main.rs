//! Sniper Operator - multi-account collectibles purchasing service
//!
//! This is the main entry point for the Operator service.
//! It wires the store, chain and auth adapters into the orchestrator and
//! serves the control surface.

use chrono::Utc;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sniper_operator::api::{ApiProvider, StoreClients};
use sniper_operator::audit::{DiscoveryLog, PaymentAuditLog};
use sniper_operator::config::AppConfig;
use sniper_operator::credentials::{
    Authenticator, CredentialCache, CredentialSettings, CredentialStore, HttpAuthenticator,
    JsonFileStore,
};
use sniper_operator::engine::{Orchestrator, OrchestratorDeps, OrchestratorSettings};
use sniper_operator::events::EventBus;
use sniper_operator::handlers::{build_router, AppState};
use sniper_operator::metrics::MetricsState;
use sniper_operator::wallet::{ChainConnector, GatewayConnector, WalletQueueSettings, WalletRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    init_tracing();

    tracing::info!("Starting Sniper Operator v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = load_config()?;
    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        accounts = config.accounts.len(),
        test_mode = config.test_mode,
        "Configuration loaded"
    );
    if config.test_mode {
        tracing::warn!(test_address = %config.test_address, "Test mode: every payment goes to the test address");
    }

    let metrics = Arc::new(MetricsState::new());
    let events = Arc::new(EventBus::new());

    // Credential cache
    let store: Arc<dyn CredentialStore> =
        Arc::new(JsonFileStore::open(&config.credentials.store_path).await?);
    let authenticator: Arc<dyn Authenticator> = Arc::new(HttpAuthenticator::new(
        config.auth.helper_url.clone(),
        config.auth.helper_token.clone(),
        Duration::from_secs(config.credentials.auth_timeout_secs),
    )?);
    if config.auth.helper_url.is_none() {
        tracing::warn!("No authorization helper configured, refreshes will fall back to stored credentials");
    }
    let credentials = Arc::new(CredentialCache::new(
        &config.accounts,
        authenticator,
        store,
        CredentialSettings::from(&config.credentials),
    ));
    tracing::info!(path = %config.credentials.store_path.display(), "Credential cache initialized");

    // Wallet registry
    let connector: Arc<dyn ChainConnector> = Arc::new(GatewayConnector::new(
        config.chain.gateway_url.clone(),
        Duration::from_millis(config.chain.timeout_ms),
    ));
    let registry = Arc::new(WalletRegistry::new(
        connector,
        WalletQueueSettings::from(&config.wallet),
    ));
    tracing::info!(gateway = %config.chain.gateway_url, "Wallet registry initialized");

    // Store API
    let apis: Arc<dyn ApiProvider> = Arc::new(StoreClients::new(
        config.store_api.base_url.clone(),
        Duration::from_millis(config.store_api.timeout_ms),
    ));

    let orchestrator = Orchestrator::new(
        config.accounts.clone(),
        OrchestratorDeps {
            credentials,
            registry: registry.clone(),
            apis,
            events,
            metrics: Some(metrics.clone()),
            payment_log: Some(Arc::new(PaymentAuditLog::new(&config.output.transactions_log))),
            discovery_log: Some(Arc::new(DiscoveryLog::new(&config.output.discoveries_log))),
        },
        OrchestratorSettings::from(&config),
    );

    if config.orchestrator.auto_start {
        match orchestrator.start().await {
            Ok(()) => tracing::info!("Run started automatically"),
            Err(e) => tracing::error!(error = %e, "Automatic start failed"),
        }
    }

    let app_state = Arc::new(AppState {
        orchestrator: orchestrator.clone(),
        started_at: Utc::now(),
        test_mode: config.test_mode,
    });
    let app = build_router(app_state, metrics);

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid server address: {}", e))?;

    tracing::info!(%addr, "Server listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if orchestrator.is_running() {
        if let Err(e) = orchestrator.stop().await {
            tracing::warn!(error = %e, "Run did not stop cleanly");
        }
    }
    registry.shutdown();
    tracing::info!("Sniper Operator stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

/// Initialize tracing/logging
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sniper_operator=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Load and validate configuration
fn load_config() -> anyhow::Result<AppConfig> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let config = AppConfig::load().map_err(|e| {
        tracing::error!(error = %e, "Failed to load configuration");
        anyhow::anyhow!("Configuration error: {}", e)
    })?;

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Configuration validation failed: {}", e))?;

    for account in &config.accounts {
        let problems = account.problems();
        if !problems.is_empty() {
            tracing::warn!(
                account = %account.name,
                problems = %problems.join("; "),
                "Account is misconfigured and will be skipped"
            );
        }
    }

    Ok(config)
}
