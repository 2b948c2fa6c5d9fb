//! # Crashpoint Game Server
//!
//! Provably-fair multiplier game server: a live-ticking crash mode and a
//! delayed-reveal slide mode, both settled by the same commit/reveal scheme.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    CRASHPOINT SERVER                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Multiplier math                           │
//! │  └── growth.rs   - Exponential curve and its exact inverse   │
//! │                                                              │
//! │  fairness/       - Commit/reveal proof of fairness           │
//! │  ├── seed.rs     - Private seed commitment                   │
//! │  ├── crash_point.rs - HMAC-SHA256 outcome derivation         │
//! │  └── verify.rs   - Offline proof checking                    │
//! │                                                              │
//! │  game/           - Round engines (single-writer tasks)       │
//! │  ├── round.rs    - Round and wager state                     │
//! │  ├── ledger.rs   - Wager bookkeeping and settlement          │
//! │  ├── engine.rs   - Crash-mode state machine                  │
//! │  ├── slide.rs    - Delayed-reveal variant                    │
//! │  └── events.rs   - Broadcast events                          │
//! │                                                              │
//! │  boundary/       - External collaborators (traits)           │
//! │  ├── entropy.rs  - Public seed oracle (fail-closed)          │
//! │  ├── balance.rs  - Idempotent player balances                │
//! │  └── persistence.rs - Round records and recovery             │
//! │                                                              │
//! │  network/        - WebSocket front end (stateless)           │
//! │  ├── server.rs   - Connection handling and event relay       │
//! │  └── protocol.rs - Message types                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Fairness Guarantee
//!
//! Every round's outcome is fixed before the first wager is taken:
//! - The private seed is committed by its SHA-256 hash, published at
//!   round creation
//! - The public seed comes from an external oracle the operator does
//!   not control
//! - The crash point is HMAC-SHA256(private, public) - deterministic,
//!   re-derivable offline by anyone from the published pair
//!
//! If the oracle cannot be reached, the round aborts and every stake is
//! refunded. There is no local fallback.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod boundary;
pub mod core;
pub mod fairness;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use core::{growth_multiplier, duration_ms, DEFAULT_GROWTH_K, MIN_MULTIPLIER};
pub use fairness::{derive_crash_point, RoundProof, SeedCommit, DEFAULT_HOUSE_EDGE_PERCENT};
pub use game::{
    CrashEngine, EngineConfig, EngineDeps, EngineHandle, GameMode, Phase, PlayerId, RoundEvent,
    SlideEngine,
};
pub use network::{GameServer, ServerConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
