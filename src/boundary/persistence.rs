//! Round Persistence
//!
//! Stores the fairness audit trail and serves the read-only history
//! surface. Settled rounds are only queryable once their status is
//! terminal; in-flight rounds never leak their private seed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::game::round::{RoundId, RoundRecord, RoundStatus, Wager};

/// Persistence failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend unavailable or write rejected.
    #[error("round store unavailable: {0}")]
    Unavailable(String),

    /// Update target does not exist.
    #[error("round {0} not found")]
    NotFound(RoundId),
}

/// Partial update applied to a stored round. `None` fields are untouched.
#[derive(Clone, Debug, Default)]
pub struct RoundPatch {
    /// Reveal the public seed.
    pub public_seed: Option<String>,
    /// Record the derived crash point (hundredths).
    pub crash_point: Option<u64>,
    /// Status transition.
    pub status: Option<RoundStatus>,
    /// Replace the wager set (settlement outcomes).
    pub wagers: Option<Vec<Wager>>,
    /// Playing start time.
    pub started_at: Option<DateTime<Utc>>,
}

/// External round persistence collaborator.
#[async_trait]
pub trait RoundStore: Send + Sync {
    /// Persist a newly created round.
    async fn save_round(&self, record: RoundRecord) -> Result<(), StoreError>;

    /// Apply a partial update to a stored round.
    async fn update_round(&self, id: RoundId, patch: RoundPatch) -> Result<(), StoreError>;

    /// Rounds left in a non-terminal status (startup recovery).
    async fn find_unfinished_rounds(&self) -> Result<Vec<RoundRecord>, StoreError>;

    /// Fetch one round by id, terminal or not. Callers gate exposure.
    async fn find_round(&self, id: RoundId) -> Result<Option<RoundRecord>, StoreError>;

    /// Settled rounds, newest first.
    async fn list_settled(&self, skip: usize, limit: usize) -> Result<Vec<RoundRecord>, StoreError>;
}

// =============================================================================
// IN-MEMORY IMPLEMENTATION
// =============================================================================

/// In-memory round store for tests and the dev binary.
///
/// Keeps insertion order so `list_settled` can serve newest-first pages.
#[derive(Default)]
pub struct InMemoryRoundStore {
    rounds: Mutex<Vec<RoundRecord>>,
}

impl InMemoryRoundStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-load a record (test setup, e.g. orphan-round recovery).
    pub async fn preload(&self, record: RoundRecord) {
        self.rounds.lock().await.push(record);
    }
}

#[async_trait]
impl RoundStore for InMemoryRoundStore {
    async fn save_round(&self, record: RoundRecord) -> Result<(), StoreError> {
        self.rounds.lock().await.push(record);
        Ok(())
    }

    async fn update_round(&self, id: RoundId, patch: RoundPatch) -> Result<(), StoreError> {
        let mut rounds = self.rounds.lock().await;
        let record = rounds
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(StoreError::NotFound(id))?;

        if let Some(seed) = patch.public_seed {
            record.public_seed = Some(seed);
        }
        if let Some(point) = patch.crash_point {
            record.crash_point = Some(point);
        }
        if let Some(status) = patch.status {
            record.status = status;
        }
        if let Some(wagers) = patch.wagers {
            record.wagers = wagers;
        }
        if let Some(started_at) = patch.started_at {
            record.started_at = started_at;
        }
        Ok(())
    }

    async fn find_unfinished_rounds(&self) -> Result<Vec<RoundRecord>, StoreError> {
        let rounds = self.rounds.lock().await;
        Ok(rounds
            .iter()
            .filter(|r| !r.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn find_round(&self, id: RoundId) -> Result<Option<RoundRecord>, StoreError> {
        let rounds = self.rounds.lock().await;
        Ok(rounds.iter().find(|r| r.id == id).cloned())
    }

    async fn list_settled(&self, skip: usize, limit: usize) -> Result<Vec<RoundRecord>, StoreError> {
        let rounds = self.rounds.lock().await;
        Ok(rounds
            .iter()
            .rev()
            .filter(|r| r.status.is_terminal())
            .skip(skip)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fairness::seed::commit;
    use crate::game::round::Round;

    fn record(status: RoundStatus) -> RoundRecord {
        Round::new(commit()).to_record(status, Vec::new())
    }

    #[tokio::test]
    async fn save_then_find() {
        let store = InMemoryRoundStore::new();
        let rec = record(RoundStatus::Bet);
        let id = rec.id;
        store.save_round(rec).await.unwrap();

        assert!(store.find_round(id).await.unwrap().is_some());
        assert!(store.find_round(RoundId::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn patch_applies_only_given_fields() {
        let store = InMemoryRoundStore::new();
        let rec = record(RoundStatus::Bet);
        let id = rec.id;
        let original_hash = rec.private_hash.clone();
        store.save_round(rec).await.unwrap();

        store
            .update_round(
                id,
                RoundPatch {
                    crash_point: Some(250),
                    status: Some(RoundStatus::End),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let stored = store.find_round(id).await.unwrap().unwrap();
        assert_eq!(stored.crash_point, Some(250));
        assert_eq!(stored.status, RoundStatus::End);
        assert_eq!(stored.private_hash, original_hash);
        assert!(stored.public_seed.is_none());
    }

    #[tokio::test]
    async fn update_of_unknown_round_errors() {
        let store = InMemoryRoundStore::new();
        let err = store
            .update_round(RoundId::new_v4(), RoundPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn history_lists_only_terminal_rounds_newest_first() {
        let store = InMemoryRoundStore::new();
        let first = record(RoundStatus::End);
        let in_flight = record(RoundStatus::Bet);
        let second = record(RoundStatus::Refund);
        let (first_id, second_id) = (first.id, second.id);

        store.save_round(first).await.unwrap();
        store.save_round(in_flight).await.unwrap();
        store.save_round(second).await.unwrap();

        let page = store.list_settled(0, 10).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].id, second_id);
        assert_eq!(page[1].id, first_id);

        let paged = store.list_settled(1, 10).await.unwrap();
        assert_eq!(paged.len(), 1);
        assert_eq!(paged[0].id, first_id);
    }

    #[tokio::test]
    async fn unfinished_rounds_are_the_bet_status_ones() {
        let store = InMemoryRoundStore::new();
        store.save_round(record(RoundStatus::End)).await.unwrap();
        let orphan = record(RoundStatus::Bet);
        let orphan_id = orphan.id;
        store.save_round(orphan).await.unwrap();

        let unfinished = store.find_unfinished_rounds().await.unwrap();
        assert_eq!(unfinished.len(), 1);
        assert_eq!(unfinished[0].id, orphan_id);
    }
}
