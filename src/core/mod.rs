//! Core deterministic primitives.
//!
//! The multiplier curve lives here so that a round's payout at any elapsed
//! time is reproducible from the growth constant alone.

pub mod growth;

// Re-export core types
pub use growth::{growth_multiplier, duration_ms, MIN_MULTIPLIER, DEFAULT_GROWTH_K};
