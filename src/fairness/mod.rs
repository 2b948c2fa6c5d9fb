//! Provable Fairness
//!
//! Commit/reveal protocol for round outcomes:
//! 1. Before betting opens the engine generates a private seed and publishes
//!    only its SHA-256 hash (`seed.rs`).
//! 2. Once betting closes, a public seed from an external entropy source is
//!    combined with the private seed to derive the crash point
//!    (`crash_point.rs`). The keyed hash makes the outcome fixed at commit
//!    time yet unpredictable until the public seed exists.
//! 3. After settlement both seeds are revealed and anyone can re-run the
//!    derivation (`verify.rs`).

pub mod crash_point;
pub mod seed;
pub mod verify;

pub use crash_point::{derive_crash_point, DEFAULT_HOUSE_EDGE_PERCENT};
pub use seed::{commit, hash_seed, SeedCommit};
pub use verify::{RoundProof, VerifyError};
