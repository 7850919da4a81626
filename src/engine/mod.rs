//! Purchasing engine for Sniper Operator
//!
//! Buy-then-pay path, run statistics, per-account run state and the
//! orchestrator that ties workers and detectors together.

mod orchestrator;
mod purchaser;
mod run_state;
mod stats;

pub use orchestrator::{Orchestrator, OrchestratorDeps, OrchestratorSettings, WalletBalance};
pub use purchaser::{AccountContext, PurchaseOutcome, PurchaseSettings, Purchaser};
pub use run_state::{PaymentOutcome, RunStates};
pub use stats::Statistics;
