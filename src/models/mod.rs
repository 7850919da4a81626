//! Domain models shared by the purchase path, the wallet queues and the API

mod network;
mod payment;
mod stats;
mod target;

pub use network::*;
pub use payment::*;
pub use stats::*;
pub use target::*;
