//! Broadcast Events
//!
//! Events published by the engine tasks and relayed verbatim to every
//! connected client. Payload fields are the wire contract; the private
//! seed appears only in `RoundEnd`, after the round has settled.

use serde::{Deserialize, Serialize};

use crate::game::round::{GameMode, PlayerId, RoundId, Wager, WagerStatus};

/// Public view of a wager (no internal ids).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WagerPublic {
    /// Owning player.
    pub player: PlayerId,
    /// Stake in minor units.
    pub stake: u64,
    /// Currency identifier.
    pub currency: String,
    /// Auto-cash-out target (crash) or locked target (slide), hundredths.
    pub target: Option<u64>,
}

impl From<&Wager> for WagerPublic {
    fn from(wager: &Wager) -> Self {
        Self {
            player: wager.player.clone(),
            stake: wager.stake,
            currency: wager.currency.clone(),
            target: wager.target,
        }
    }
}

/// Settled view of a wager, published with the round result.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WagerOutcome {
    /// Owning player.
    pub player: PlayerId,
    /// Stake in minor units.
    pub stake: u64,
    /// Currency identifier.
    pub currency: String,
    /// Final status.
    pub status: WagerStatus,
    /// Multiplier the wager stopped at, if it won.
    pub stopped_at: Option<u64>,
}

impl From<&Wager> for WagerOutcome {
    fn from(wager: &Wager) -> Self {
        Self {
            player: wager.player.clone(),
            stake: wager.stake,
            currency: wager.currency.clone(),
            status: wager.status,
            stopped_at: wager.stopped_at,
        }
    }
}

/// Events broadcast by a round engine.
///
/// Tagged `event`, not `type`: events travel inside the `type`-tagged
/// server envelope, and the two tag keys must not collide in one JSON
/// object.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RoundEvent {
    /// New round committed; hash published, countdown until play begins.
    RoundStarting {
        /// Originating game mode.
        mode: GameMode,
        /// Round identifier.
        round_id: RoundId,
        /// Commit hash of the private seed.
        private_hash: String,
        /// Milliseconds until the round starts playing.
        countdown_ms: u64,
    },

    /// Betting window opened; current wager set.
    RoundBets {
        /// Originating game mode.
        mode: GameMode,
        /// Wagers riding this round.
        players: Vec<WagerPublic>,
    },

    /// Public seed revealed (betting closed; outcome now derivable offline
    /// once the private seed is published).
    SeedRevealed {
        /// Originating game mode.
        mode: GameMode,
        /// Round identifier.
        round_id: RoundId,
        /// The external public seed.
        public_seed: String,
    },

    /// A wager was accepted into the current betting window.
    WagerPlaced {
        /// Originating game mode.
        mode: GameMode,
        /// The accepted wager.
        wager: WagerPublic,
    },

    /// Multiplier tick (crash mode only), fixed cadence.
    RoundTick {
        /// Originating game mode.
        mode: GameMode,
        /// Current multiplier in hundredths.
        multiplier: u64,
    },

    /// A wager exited below the crash point.
    WagerCashedOut {
        /// Originating game mode.
        mode: GameMode,
        /// Exiting player.
        player: PlayerId,
        /// Multiplier locked in, hundredths.
        multiplier: u64,
        /// Amount credited, minor units.
        payout: u64,
    },

    /// Round settled; both seeds revealed, proof checkable.
    RoundEnd {
        /// Originating game mode.
        mode: GameMode,
        /// Round identifier.
        round_id: RoundId,
        /// Crash multiplier in hundredths.
        crash_point: u64,
        /// Revealed private seed.
        private_seed: String,
        /// Public seed used for derivation.
        public_seed: String,
        /// Wager outcomes for this round.
        results: Vec<WagerOutcome>,
    },

    /// Round aborted; every open wager was refunded.
    RoundAborted {
        /// Originating game mode.
        mode: GameMode,
        /// Round identifier.
        round_id: RoundId,
        /// Stable reason code.
        reason: String,
    },
}

impl RoundEvent {
    /// Game mode that produced this event.
    pub fn mode(&self) -> GameMode {
        match self {
            RoundEvent::RoundStarting { mode, .. }
            | RoundEvent::RoundBets { mode, .. }
            | RoundEvent::SeedRevealed { mode, .. }
            | RoundEvent::WagerPlaced { mode, .. }
            | RoundEvent::RoundTick { mode, .. }
            | RoundEvent::WagerCashedOut { mode, .. }
            | RoundEvent::RoundEnd { mode, .. }
            | RoundEvent::RoundAborted { mode, .. } => *mode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_tagged_snake_case() {
        let event = RoundEvent::RoundTick {
            mode: GameMode::Crash,
            multiplier: 142,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"round_tick\""));
        assert!(json.contains("\"mode\":\"crash\""));
        assert!(json.contains("\"multiplier\":142"));
    }

    #[test]
    fn round_end_carries_the_proof_material() {
        let event = RoundEvent::RoundEnd {
            mode: GameMode::Slide,
            round_id: RoundId::new_v4(),
            crash_point: 250,
            private_seed: "aa".into(),
            public_seed: "bb".into(),
            results: Vec::new(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("private_seed"));
        assert!(json.contains("public_seed"));
        assert!(json.contains("crash_point"));
        assert_eq!(event.mode(), GameMode::Slide);
    }
}
