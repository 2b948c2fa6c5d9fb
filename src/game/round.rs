//! Round and Wager State
//!
//! State types for one play of the multiplier game, plus the persisted
//! record shape that forms the fairness audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::fairness::seed::SeedCommit;

/// Unique round identifier.
pub type RoundId = Uuid;

// =============================================================================
// PLAYER ID
// =============================================================================

/// Opaque player identifier.
///
/// Identity resolution (sessions, wallets, accounts) is an external
/// concern; the engine only needs a stable, orderable key.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub String);

impl PlayerId {
    /// Create from any string-like identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PlayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// GAME MODE
// =============================================================================

/// The two multiplier game variants served by this process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameMode {
    /// Live-ticking multiplier; players exit any time below the crash point.
    Crash,
    /// Delayed reveal; targets are locked during betting, the crash point is
    /// announced only at the end of a fixed window.
    Slide,
}

impl std::fmt::Display for GameMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GameMode::Crash => f.write_str("crash"),
            GameMode::Slide => f.write_str("slide"),
        }
    }
}

// =============================================================================
// PHASES AND STATUSES
// =============================================================================

/// Round lifecycle phase.
///
/// Crash mode walks Waiting -> Starting -> Betting -> Playing -> Settling
/// and back to Starting. Slide mode uses the same phases with Playing as
/// its reveal window. Transitions are timer-driven except Betting ->
/// Playing, which additionally requires the public seed (fail-closed).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// No round object exists.
    Waiting,
    /// Fairness committed, pre-bet pause.
    Starting,
    /// Accepting wagers.
    Betting,
    /// Multiplier running (crash) or result window (slide).
    Playing,
    /// Payouts resolved, result published, pausing before the next round.
    Settling,
}

/// Persisted round status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundStatus {
    /// Round in flight; wagers at risk.
    #[serde(rename = "BET")]
    Bet,
    /// Round settled normally.
    #[serde(rename = "END")]
    End,
    /// Round aborted; every wager refunded.
    #[serde(rename = "REFUND")]
    Refund,
}

impl RoundStatus {
    /// Terminal statuses are the only ones exposed on the history surface.
    pub fn is_terminal(self) -> bool {
        !matches!(self, RoundStatus::Bet)
    }
}

/// Wager status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WagerStatus {
    /// Placed, round has not started playing yet (cancellable).
    #[serde(rename = "PENDING")]
    Pending,
    /// Round is playing; wager at risk.
    #[serde(rename = "BET")]
    Active,
    /// Exited below the crash point; paid out.
    #[serde(rename = "WIN")]
    CashedOut,
    /// Round crashed first.
    #[serde(rename = "LOSS")]
    Lost,
    /// Stake returned (cancel or round abort).
    #[serde(rename = "REFUND")]
    Refunded,
}

impl WagerStatus {
    /// Whether the wager can still change state.
    pub fn is_open(self) -> bool {
        matches!(self, WagerStatus::Pending | WagerStatus::Active)
    }
}

// =============================================================================
// WAGER
// =============================================================================

/// A player's stake in exactly one round.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Wager {
    /// Wager identifier; keys idempotent balance calls made before the
    /// owning round exists.
    pub id: Uuid,
    /// Owning player. At most one wager per player per round.
    pub player: PlayerId,
    /// Stake in minor currency units.
    pub stake: u64,
    /// Currency identifier (opaque to the engine).
    pub currency: String,
    /// Auto-cash-out target in hundredths; armed when >= 101.
    pub target: Option<u64>,
    /// Current status.
    pub status: WagerStatus,
    /// Multiplier the wager stopped at (cash-out or slide win), hundredths.
    pub stopped_at: Option<u64>,
}

impl Wager {
    /// Create a freshly placed wager.
    pub fn new(player: PlayerId, stake: u64, currency: String, target: Option<u64>) -> Self {
        Self {
            id: Uuid::new_v4(),
            player,
            stake,
            currency,
            target,
            status: WagerStatus::Pending,
            stopped_at: None,
        }
    }

    /// Payout for this wager at `multiplier` hundredths.
    pub fn payout_at(&self, multiplier: u64) -> u64 {
        (u128::from(self.stake) * u128::from(multiplier) / 100) as u64
    }
}

// =============================================================================
// ROUND
// =============================================================================

/// One instance of the game lifecycle, owned by a single engine task.
#[derive(Clone, Debug)]
pub struct Round {
    /// Round identifier.
    pub id: RoundId,
    /// Seed commitment. The private half is never exposed before the crash
    /// point has been derived and betting has closed.
    pub commit: SeedCommit,
    /// Public seed, set when betting closes.
    pub public_seed: Option<String>,
    /// Derived crash multiplier in hundredths, set with the public seed.
    pub crash_point: Option<u64>,
    /// Current phase.
    pub phase: Phase,
    /// Wall-clock start of the round (persisted).
    pub started_at: DateTime<Utc>,
}

impl Round {
    /// Create a round at phase entry (Starting) from a fresh commit.
    pub fn new(commit: SeedCommit) -> Self {
        Self {
            id: Uuid::new_v4(),
            commit,
            public_seed: None,
            crash_point: None,
            phase: Phase::Starting,
            started_at: Utc::now(),
        }
    }

    /// Snapshot the round into its persisted record shape.
    pub fn to_record(&self, status: RoundStatus, wagers: Vec<Wager>) -> RoundRecord {
        RoundRecord {
            id: self.id,
            private_seed: self.commit.private_seed.clone(),
            private_hash: self.commit.private_hash.clone(),
            public_seed: self.public_seed.clone(),
            crash_point: self.crash_point,
            status,
            started_at: self.started_at,
            wagers,
        }
    }
}

/// Persisted shape of a round.
///
/// Once status is terminal this record is the complete fairness proof:
/// `private_hash` was published before `public_seed` existed, and anyone
/// can re-derive `crash_point` from the revealed pair.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoundRecord {
    /// Round identifier.
    pub id: RoundId,
    /// Private seed. Only meaningful to consumers once status is terminal.
    pub private_seed: String,
    /// Commit hash published during betting.
    pub private_hash: String,
    /// Public seed, if betting closed.
    pub public_seed: Option<String>,
    /// Crash multiplier in hundredths, if derived.
    pub crash_point: Option<u64>,
    /// Round status.
    pub status: RoundStatus,
    /// Wall-clock round start.
    pub started_at: DateTime<Utc>,
    /// All wagers with their outcomes.
    pub wagers: Vec<Wager>,
}
