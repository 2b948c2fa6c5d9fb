//! External Collaborator Boundary
//!
//! The engine core never talks to the outside world directly; it goes
//! through these trait seams. Production deployments plug real backends in,
//! tests and the dev binary use the in-memory implementations.
//!
//! - `entropy`: public seed oracle (fail-closed; no silent local fallback)
//! - `balance`: debit/credit ledger with idempotency keys
//! - `persistence`: round records and the read-only history surface

pub mod balance;
pub mod entropy;
pub mod persistence;

pub use balance::{BalanceError, BalanceStore, DebitOutcome, InMemoryBalances};
pub use entropy::{EntropyError, EntropySource, LocalEntropy};
pub use persistence::{InMemoryRoundStore, RoundPatch, RoundStore, StoreError};
