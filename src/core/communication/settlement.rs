use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::core::communication::message::DeliveryToken;
use crate::domain::error::SettlementError;

/// Terminal settlement outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettlementOutcome {
    Completed,
    Rejected,
    Abandoned,
}

impl std::fmt::Display for SettlementOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettlementOutcome::Completed => write!(f, "completed"),
            SettlementOutcome::Rejected => write!(f, "rejected"),
            SettlementOutcome::Abandoned => write!(f, "abandoned"),
        }
    }
}

/// Per-token settlement state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    Pending,
    /// A settlement request is in flight
    Settling,
    Settled(SettlementOutcome),
}

/// Settled lock tokens remembered for duplicate detection
pub const SETTLED_HISTORY: usize = 1024;

/// Tracks the delivery tokens a receiver has handed out.
///
/// Claiming is atomic: the first settlement for a token wins and every
/// later attempt fails with `AlreadySettled`, whether the first one is
/// still in flight or already done.
///
/// A token's record is dropped once it settles. Tags are issued in
/// increasing order, so a forgotten tag at or below the highest one seen
/// is known to be settled. Lock tokens have no order; the most recent
/// [`SETTLED_HISTORY`] of them are remembered instead.
#[derive(Debug, Default)]
pub struct SettlementLedger {
    book: Mutex<LedgerBook>,
}

#[derive(Debug, Default)]
struct LedgerBook {
    open: HashMap<DeliveryToken, TokenState>,
    settled_locks: HashMap<String, SettlementOutcome>,
    settled_order: VecDeque<String>,
    highest_tag: u64,
}

impl LedgerBook {
    fn was_settled(&self, token: &DeliveryToken) -> bool {
        match token {
            DeliveryToken::Tag(tag) => *tag <= self.highest_tag,
            DeliveryToken::Lock(lock) => self.settled_locks.contains_key(lock),
        }
    }

    fn remember_lock(&mut self, lock: String, outcome: SettlementOutcome) {
        if self.settled_locks.insert(lock.clone(), outcome).is_none() {
            self.settled_order.push_back(lock);
        }
        while self.settled_order.len() > SETTLED_HISTORY {
            if let Some(oldest) = self.settled_order.pop_front() {
                self.settled_locks.remove(&oldest);
            }
        }
    }
}

impl SettlementLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a token surfaced to the caller
    pub fn register(&self, token: DeliveryToken) {
        let mut book = self.lock();
        if let DeliveryToken::Tag(tag) = token {
            book.highest_tag = book.highest_tag.max(tag);
        }
        book.open.insert(token, TokenState::Pending);
    }

    /// Move a pending token to settling
    pub fn claim(&self, token: &DeliveryToken) -> Result<(), SettlementError> {
        let mut book = self.lock();
        match book.open.get_mut(token) {
            Some(state @ TokenState::Pending) => {
                *state = TokenState::Settling;
                Ok(())
            }
            Some(_) => Err(SettlementError::AlreadySettled { token: token.to_string() }),
            None => {
                if book.was_settled(token) {
                    Err(SettlementError::AlreadySettled { token: token.to_string() })
                } else {
                    Err(SettlementError::UnknownToken { token: token.to_string() })
                }
            }
        }
    }

    /// Drop a claimed token once its settlement went through
    pub fn finish(&self, token: &DeliveryToken, outcome: SettlementOutcome) {
        let mut book = self.lock();
        if book.open.remove(token).is_none() {
            return;
        }
        if let DeliveryToken::Lock(lock) = token {
            book.remember_lock(lock.clone(), outcome);
        }
    }

    /// Hand a claimed token back after a failed settlement request
    pub fn release(&self, token: &DeliveryToken) {
        if let Some(state) = self.lock().open.get_mut(token) {
            if *state == TokenState::Settling {
                *state = TokenState::Pending;
            }
        }
    }

    pub fn state(&self, token: &DeliveryToken) -> Option<TokenState> {
        let book = self.lock();
        if let Some(state) = book.open.get(token) {
            return Some(*state);
        }
        match token {
            DeliveryToken::Lock(lock) => {
                book.settled_locks.get(lock).copied().map(TokenState::Settled)
            }
            DeliveryToken::Tag(_) => None,
        }
    }

    /// Number of tokens still awaiting settlement
    pub fn pending_count(&self) -> usize {
        self.lock().open.len()
    }

    /// Entries held in memory, open and remembered
    pub fn tracked(&self) -> usize {
        let book = self.lock();
        book.open.len() + book.settled_locks.len()
    }

    /// Forget every token; the hub redelivers whatever was left unsettled
    pub fn clear(&self) {
        *self.lock() = LedgerBook::default();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LedgerBook> {
        self.book.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
