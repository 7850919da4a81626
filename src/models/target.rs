//! Purchase targets and discovery intents

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// What to buy: a `(collection, character)` pair and where it came from
///
/// Direct targets come from account configuration; discovered targets come
/// from the change detector. Both flow through the same buy-then-pay path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum PurchaseTarget {
    Direct { collection: u64, character: u64 },
    Discovered { collection: u64, character: u64 },
}

impl PurchaseTarget {
    pub fn collection(&self) -> u64 {
        match self {
            PurchaseTarget::Direct { collection, .. }
            | PurchaseTarget::Discovered { collection, .. } => *collection,
        }
    }

    pub fn character(&self) -> u64 {
        match self {
            PurchaseTarget::Direct { character, .. }
            | PurchaseTarget::Discovered { character, .. } => *character,
        }
    }

    pub fn is_discovered(&self) -> bool {
        matches!(self, PurchaseTarget::Discovered { .. })
    }
}

impl fmt::Display for PurchaseTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = if self.is_discovered() { "discovered" } else { "direct" };
        write!(f, "{}:{} ({})", self.collection(), self.character(), source)
    }
}

/// A newly discovered sub-item that passed every configured filter
#[derive(Debug, Clone, Serialize)]
pub struct PurchaseIntent {
    /// Account whose detector raised the intent
    pub account: String,
    pub target: PurchaseTarget,
    /// Title of the parent collection
    pub parent_title: String,
    pub character_name: String,
    pub supply: u64,
    pub price_nano: u64,
    pub detected_at: DateTime<Utc>,
}
