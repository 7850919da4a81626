//! Wallets: chain access, per-wallet serialized payment queues and the
//! registry that hands them out

mod chain;
mod gateway;
mod queue;
mod registry;

pub use chain::*;
pub use gateway::{GatewayChainClient, GatewayConnector};
pub use queue::{WalletQueue, WalletQueueSettings};
pub use registry::{WalletKey, WalletRegistry};
