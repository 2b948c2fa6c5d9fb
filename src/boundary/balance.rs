//! Balance Collaborator
//!
//! Single debit/credit calls per wager event. Calls are at-least-once:
//! the engine may retry after a partial failure, so every call carries an
//! idempotency key and implementations must treat a repeated key as a no-op.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::game::round::PlayerId;

/// Outcome of a debit attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DebitOutcome {
    /// Stake reserved.
    Ok,
    /// Player cannot cover the stake; no mutation happened.
    Insufficient,
}

/// Balance store failures (transport, backend).
#[derive(Debug, Error)]
pub enum BalanceError {
    /// The store could not be reached or errored internally.
    #[error("balance store unavailable: {0}")]
    Unavailable(String),
}

/// External balance ledger.
#[async_trait]
pub trait BalanceStore: Send + Sync {
    /// Debit `amount` from the player. Repeating an `idem_key` that already
    /// succeeded must return `Ok` without debiting again.
    async fn debit(
        &self,
        player: &PlayerId,
        amount: u64,
        currency: &str,
        idem_key: &str,
    ) -> Result<DebitOutcome, BalanceError>;

    /// Credit `amount` to the player, idempotent on `idem_key`.
    async fn credit(
        &self,
        player: &PlayerId,
        amount: u64,
        currency: &str,
        idem_key: &str,
    ) -> Result<(), BalanceError>;
}

// =============================================================================
// IN-MEMORY IMPLEMENTATION
// =============================================================================

#[derive(Default)]
struct Accounts {
    /// (player, currency) -> balance in minor units.
    balances: HashMap<(PlayerId, String), u64>,
    /// Idempotency keys already applied.
    applied: HashSet<String>,
}

/// In-memory balance store for tests and the dev binary.
#[derive(Default)]
pub struct InMemoryBalances {
    accounts: Mutex<Accounts>,
}

impl InMemoryBalances {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a player balance (test/dev setup).
    pub async fn deposit(&self, player: &PlayerId, currency: &str, amount: u64) {
        let mut accounts = self.accounts.lock().await;
        *accounts
            .balances
            .entry((player.clone(), currency.to_string()))
            .or_insert(0) += amount;
    }

    /// Current balance for a player/currency pair.
    pub async fn balance_of(&self, player: &PlayerId, currency: &str) -> u64 {
        let accounts = self.accounts.lock().await;
        accounts
            .balances
            .get(&(player.clone(), currency.to_string()))
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl BalanceStore for InMemoryBalances {
    async fn debit(
        &self,
        player: &PlayerId,
        amount: u64,
        currency: &str,
        idem_key: &str,
    ) -> Result<DebitOutcome, BalanceError> {
        let mut accounts = self.accounts.lock().await;
        if accounts.applied.contains(idem_key) {
            return Ok(DebitOutcome::Ok);
        }

        let balance = accounts
            .balances
            .entry((player.clone(), currency.to_string()))
            .or_insert(0);
        if *balance < amount {
            return Ok(DebitOutcome::Insufficient);
        }

        *balance -= amount;
        accounts.applied.insert(idem_key.to_string());
        Ok(DebitOutcome::Ok)
    }

    async fn credit(
        &self,
        player: &PlayerId,
        amount: u64,
        currency: &str,
        idem_key: &str,
    ) -> Result<(), BalanceError> {
        let mut accounts = self.accounts.lock().await;
        if accounts.applied.contains(idem_key) {
            return Ok(());
        }

        *accounts
            .balances
            .entry((player.clone(), currency.to_string()))
            .or_insert(0) += amount;
        accounts.applied.insert(idem_key.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn debit_and_credit_move_funds() {
        let store = InMemoryBalances::new();
        let p = PlayerId::new("p1");
        store.deposit(&p, "usd", 1_000).await;

        assert_eq!(store.debit(&p, 400, "usd", "k1").await.unwrap(), DebitOutcome::Ok);
        assert_eq!(store.balance_of(&p, "usd").await, 600);

        store.credit(&p, 100, "usd", "k2").await.unwrap();
        assert_eq!(store.balance_of(&p, "usd").await, 700);
    }

    #[tokio::test]
    async fn insufficient_leaves_balance_untouched() {
        let store = InMemoryBalances::new();
        let p = PlayerId::new("p1");
        store.deposit(&p, "usd", 100).await;

        assert_eq!(
            store.debit(&p, 500, "usd", "k1").await.unwrap(),
            DebitOutcome::Insufficient
        );
        assert_eq!(store.balance_of(&p, "usd").await, 100);
    }

    #[tokio::test]
    async fn repeated_idempotency_key_is_a_no_op() {
        let store = InMemoryBalances::new();
        let p = PlayerId::new("p1");
        store.deposit(&p, "usd", 1_000).await;

        for _ in 0..3 {
            assert_eq!(store.debit(&p, 400, "usd", "same").await.unwrap(), DebitOutcome::Ok);
        }
        assert_eq!(store.balance_of(&p, "usd").await, 600);

        for _ in 0..3 {
            store.credit(&p, 250, "usd", "same-credit").await.unwrap();
        }
        assert_eq!(store.balance_of(&p, "usd").await, 850);
    }

    #[tokio::test]
    async fn currencies_are_isolated() {
        let store = InMemoryBalances::new();
        let p = PlayerId::new("p1");
        store.deposit(&p, "usd", 100).await;

        assert_eq!(
            store.debit(&p, 50, "eur", "k").await.unwrap(),
            DebitOutcome::Insufficient
        );
        assert_eq!(store.balance_of(&p, "usd").await, 100);
    }
}
