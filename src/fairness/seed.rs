//! Seed Commitment
//!
//! Private seed generation and the publishable commit hash.
//! The hash is published while betting is open; the seed itself stays
//! secret until the round has settled.

use rand::RngCore;
use sha2::{Digest, Sha256};

/// Private seed length in raw bytes (hex-encoded on the wire).
const PRIVATE_SEED_BYTES: usize = 256;

/// A private seed together with its publishable hash.
#[derive(Clone, Debug)]
pub struct SeedCommit {
    /// Hex-encoded private seed. Secret until reveal.
    pub private_seed: String,
    /// SHA-256 of the hex seed string. Safe to publish immediately.
    pub private_hash: String,
}

/// Generate a fresh private seed and its commit hash.
pub fn commit() -> SeedCommit {
    let mut bytes = [0u8; PRIVATE_SEED_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    let private_seed = hex::encode(bytes);
    let private_hash = hash_seed(&private_seed);
    SeedCommit {
        private_seed,
        private_hash,
    }
}

/// Hash a private seed the way the commit does.
///
/// Exposed so verifiers can recompute the published hash from a revealed
/// seed.
pub fn hash_seed(seed: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    hex::encode(hasher.finalize())
}
