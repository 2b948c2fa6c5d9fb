//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! All messages are serialized as JSON; the tagged enums keep the
//! format self-describing for clients and for round-proof archives.

use serde::{Deserialize, Serialize};

use crate::game::engine::EngineSnapshot;
use crate::game::events::RoundEvent;
use crate::game::round::{GameMode, RoundId, RoundRecord};

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Introduce the player behind this connection. Required before any
    /// wager command; identity verification is an upstream concern.
    Identify { player_id: String },

    /// Place a wager in the given mode. Outside a betting window the
    /// wager queues for the next round.
    Join {
        mode: GameMode,
        /// Stake in minor currency units.
        stake: u64,
        /// Currency identifier.
        currency: String,
        /// Auto-cash-out target (crash) or locked target (slide),
        /// hundredths. Mandatory for slide.
        target: Option<u64>,
    },

    /// Cancel an unstarted wager in the given mode.
    Cancel { mode: GameMode },

    /// Cash out at the live multiplier (crash mode only).
    CashOut { mode: GameMode },

    /// Request the state of both engines (for reconnection).
    Sync,

    /// Fetch one settled round with its fairness proof.
    GetRound { round_id: RoundId },

    /// Page through settled rounds, newest first.
    ListRounds { skip: usize, limit: usize },

    /// Ping for latency measurement.
    Ping { timestamp: u64 },
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Identification accepted.
    Identified {
        player_id: String,
        server_version: String,
    },

    /// A round engine event, relayed to every connection.
    Event(RoundEvent),

    /// Result of a join request.
    JoinResult(JoinResult),

    /// Result of a cancel request.
    CancelResult(CancelResult),

    /// Result of a cash-out request.
    CashOutResult(CashOutResult),

    /// Both engines' current state.
    State {
        crash: EngineSnapshot,
        slide: EngineSnapshot,
    },

    /// One settled round, or nothing if unknown / still in flight.
    Round { round: Option<RoundRecord> },

    /// A page of settled rounds.
    Rounds { rounds: Vec<RoundRecord> },

    /// Pong response.
    Pong { timestamp: u64, server_time: u64 },

    /// Error message.
    Error(ServerError),

    /// Server is shutting down.
    Shutdown { reason: String },
}

/// Outcome of a join request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinResult {
    /// Mode the wager was aimed at.
    pub mode: GameMode,
    /// Whether the stake was taken.
    pub success: bool,
    /// True if the wager queued for the next round instead of riding the
    /// current one.
    pub queued: bool,
    /// Stable rejection code on failure.
    pub reason: Option<String>,
}

/// Outcome of a cancel request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelResult {
    /// Mode the cancel was aimed at.
    pub mode: GameMode,
    /// Whether the stake was returned.
    pub success: bool,
    /// Refunded stake in minor units.
    pub refunded: Option<u64>,
    /// Stable rejection code on failure.
    pub reason: Option<String>,
}

/// Outcome of a cash-out request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CashOutResult {
    /// Mode the cash-out was aimed at.
    pub mode: GameMode,
    /// Whether the wager exited.
    pub success: bool,
    /// Locked multiplier in hundredths.
    pub multiplier: Option<u64>,
    /// Credited payout in minor units.
    pub payout: Option<u64>,
    /// Stable rejection code on failure.
    pub reason: Option<String>,
}

/// Server error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Connection has not sent Identify.
    NotIdentified,
    /// Malformed or out-of-range message.
    InvalidInput,
    /// The engine for the requested mode is unavailable.
    EngineUnavailable,
    /// History backend unavailable.
    HistoryUnavailable,
    /// Internal error.
    InternalError,
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_message_json_roundtrip() {
        let msg = ClientMessage::Join {
            mode: GameMode::Crash,
            stake: 2_500,
            currency: "usd".to_string(),
            target: Some(200),
        };

        let json = msg.to_json().unwrap();
        let parsed = ClientMessage::from_json(&json).unwrap();

        if let ClientMessage::Join { mode, stake, target, .. } = parsed {
            assert_eq!(mode, GameMode::Crash);
            assert_eq!(stake, 2_500);
            assert_eq!(target, Some(200));
        } else {
            panic!("Wrong message type");
        }
    }

    #[test]
    fn join_is_tagged_with_mode() {
        let msg = ClientMessage::Join {
            mode: GameMode::Slide,
            stake: 100,
            currency: "usd".to_string(),
            target: Some(150),
        };
        let json = msg.to_json().unwrap();
        assert!(json.contains("\"type\":\"join\""));
        assert!(json.contains("\"mode\":\"slide\""));
    }

    #[test]
    fn server_event_wraps_round_event() {
        let msg = ServerMessage::Event(RoundEvent::RoundTick {
            mode: GameMode::Crash,
            multiplier: 137,
        });
        let json = msg.to_json().unwrap();
        // Envelope and event carry distinct tag keys.
        assert!(json.contains("\"type\":\"event\""));
        assert!(json.contains("\"event\":\"round_tick\""));

        let parsed = ServerMessage::from_json(&json).unwrap();
        if let ServerMessage::Event(RoundEvent::RoundTick { multiplier, .. }) = parsed {
            assert_eq!(multiplier, 137);
        } else {
            panic!("Wrong message type");
        }
    }

    #[test]
    fn rejection_carries_stable_reason() {
        let msg = ServerMessage::JoinResult(JoinResult {
            mode: GameMode::Crash,
            success: false,
            queued: false,
            reason: Some("insufficient_balance".to_string()),
        });
        let json = msg.to_json().unwrap();
        assert!(json.contains("insufficient_balance"));
    }

    #[test]
    fn error_codes_are_snake_case() {
        let msg = ServerMessage::Error(ServerError {
            code: ErrorCode::NotIdentified,
            message: "Identify first".to_string(),
        });
        let json = msg.to_json().unwrap();
        assert!(json.contains("not_identified"));
    }
}
