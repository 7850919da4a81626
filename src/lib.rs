//! Sniper Operator Library
//!
//! Multi-account purchasing service for a digital-collectibles store.
//! This library exposes core modules for testing.

pub mod api;
pub mod audit;
pub mod config;
pub mod constants;
pub mod credentials;
pub mod engine;
pub mod error;
pub mod events;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod monitoring;
pub mod utils;
pub mod wallet;

// Re-export commonly used types for tests
pub use config::{AccountConfig, AppConfig, Range, SnipeConfig};
pub use credentials::{CredentialCache, CredentialSettings, RefreshReason};
pub use engine::{Orchestrator, OrchestratorDeps, OrchestratorSettings};
pub use error::{AppError, AppResult};
pub use events::{EventBus, LogEvent};
pub use models::{NetworkProfile, PaymentRequest, PaymentResult, PurchaseIntent, PurchaseTarget};
pub use monitoring::{ChangeDetector, IntentSink, SnipeFilter};
pub use wallet::{WalletQueue, WalletRegistry};
