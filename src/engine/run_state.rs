//! Per-account run state: transaction ceiling and activity
//!
//! A worker reserves a slot before each purchase so concurrent workers of an
//! account can never overshoot `max_transactions`.

use parking_lot::RwLock;
use std::collections::HashMap;

use crate::models::{AccountMode, AccountStatus};

#[derive(Debug, Clone)]
struct AccountRunState {
    mode: AccountMode,
    active: bool,
    transactions_completed: u32,
    max_transactions: u32,
    /// Purchases started and not yet settled
    in_flight: u32,
}

impl AccountRunState {
    fn has_budget(&self) -> bool {
        self.max_transactions == 0 || self.transactions_completed + self.in_flight < self.max_transactions
    }
}

/// What finishing an attempt did to the account
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// Nothing changed activity-wise
    Continue,
    /// The account just reached its ceiling; `last` when no account is left active
    Exhausted { last: bool },
}

#[derive(Default)]
pub struct RunStates {
    accounts: RwLock<HashMap<String, AccountRunState>>,
}

impl RunStates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&self) {
        self.accounts.write().clear();
    }

    pub fn register(&self, name: &str, mode: AccountMode, max_transactions: u32) {
        self.accounts.write().insert(
            name.to_string(),
            AccountRunState {
                mode,
                active: true,
                transactions_completed: 0,
                max_transactions,
                in_flight: 0,
            },
        );
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.accounts.read().get(name).map(|s| s.active).unwrap_or(false)
    }

    /// Reserve a purchase slot; false when inactive or the ceiling is covered
    /// by completed plus in-flight purchases
    pub fn begin_attempt(&self, name: &str) -> bool {
        let mut accounts = self.accounts.write();
        match accounts.get_mut(name) {
            Some(state) if state.active && state.has_budget() => {
                state.in_flight += 1;
                true
            }
            _ => false,
        }
    }

    /// Release a slot reserved by `begin_attempt`
    ///
    /// A successful payment counts toward the ceiling; the account flips to
    /// inactive exactly once, when the ceiling is reached.
    pub fn record_payment(&self, name: &str, paid: bool) -> PaymentOutcome {
        let mut accounts = self.accounts.write();
        let exhausted = match accounts.get_mut(name) {
            Some(state) => {
                state.in_flight = state.in_flight.saturating_sub(1);
                if !paid {
                    return PaymentOutcome::Continue;
                }
                state.transactions_completed += 1;
                if state.active
                    && state.max_transactions > 0
                    && state.transactions_completed >= state.max_transactions
                {
                    state.active = false;
                    true
                } else {
                    false
                }
            }
            None => false,
        };

        if exhausted {
            let last = !accounts.values().any(|s| s.active);
            PaymentOutcome::Exhausted { last }
        } else {
            PaymentOutcome::Continue
        }
    }

    /// `(active, total)`
    pub fn activity(&self) -> (usize, usize) {
        let accounts = self.accounts.read();
        let active = accounts.values().filter(|s| s.active).count();
        (active, accounts.len())
    }

    pub fn statuses(&self) -> Vec<AccountStatus> {
        let accounts = self.accounts.read();
        let mut statuses: Vec<AccountStatus> = accounts
            .iter()
            .map(|(name, s)| AccountStatus {
                name: name.clone(),
                mode: s.mode,
                active: s.active,
                transactions_completed: s.transactions_completed,
                max_transactions: s.max_transactions,
            })
            .collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }
}
