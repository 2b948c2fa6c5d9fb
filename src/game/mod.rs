//! Game Engine Module
//!
//! Round lifecycle, wager bookkeeping and the per-mode engine tasks.
//!
//! ## Module Structure
//!
//! - `round`: Round and wager state, persisted round records
//! - `ledger`: Player ledger - pending queue, join/cancel/cash-out
//! - `engine`: Crash-mode state machine (ticking multiplier)
//! - `slide`: Delayed-reveal variant (crash point announced at window end)
//! - `events`: Broadcast events consumed by the network layer

pub mod engine;
pub mod events;
pub mod ledger;
pub mod round;
pub mod slide;

// Re-export key types
pub use engine::{CrashEngine, EngineConfig, EngineDeps, EngineError, EngineHandle};
pub use events::RoundEvent;
pub use ledger::{JoinOutcome, Ledger, LedgerError};
pub use round::{GameMode, Phase, PlayerId, Round, RoundId, RoundRecord, RoundStatus, Wager, WagerStatus};
pub use slide::SlideEngine;
