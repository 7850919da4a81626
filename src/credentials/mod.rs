//! Bearer credential management
//!
//! - `CredentialCache`: one cached bearer per account with a soft TTL,
//!   cooldown-limited refreshes and a background preventive sweep
//! - `Authenticator`: mints fresh bearers (external handshake)
//! - `CredentialStore`: persists the last good bearer per account

mod authenticator;
mod cache;
mod store;

pub use authenticator::*;
pub use cache::*;
pub use store::*;

use thiserror::Error;

/// Credential cache errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("account '{0}' is not configured")]
    UnknownAccount(String),

    #[error("no credential available for account '{0}'")]
    Missing(String),

    #[error("refresh failed for account '{account}' and no previous credential exists: {reason}")]
    RefreshFailed { account: String, reason: String },
}
