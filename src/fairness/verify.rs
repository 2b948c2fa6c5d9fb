//! Round Proof Verification
//!
//! Re-checks a settled round from its published data. This is exactly the
//! computation a client runs to audit the operator: recompute the commit
//! hash from the revealed private seed, then re-derive the crash point.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fairness::crash_point::derive_crash_point;
use crate::fairness::seed::hash_seed;

/// The published data of one settled round.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoundProof {
    /// Private seed, revealed at settlement.
    pub private_seed: String,
    /// Commit hash, published during betting.
    pub private_hash: String,
    /// Public seed, revealed once betting closed.
    pub public_seed: String,
    /// Claimed crash point in hundredths.
    pub crash_point: u64,
}

/// Reasons a round proof fails to verify.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerifyError {
    /// The revealed seed does not hash to the published commit.
    #[error("private seed does not hash to the published commit")]
    HashMismatch,

    /// Re-derivation produced a different crash point.
    #[error("crash point mismatch: derived {derived}, claimed {claimed}")]
    CrashPointMismatch {
        /// Crash point recomputed from the seed pair.
        derived: u64,
        /// Crash point the round claimed.
        claimed: u64,
    },
}

impl RoundProof {
    /// Verify the proof under the given house edge.
    ///
    /// Checks are ordered: the commitment must hold before the derivation
    /// is meaningful.
    pub fn verify(&self, house_edge_percent: f64) -> Result<(), VerifyError> {
        if hash_seed(&self.private_seed) != self.private_hash {
            return Err(VerifyError::HashMismatch);
        }

        let derived = derive_crash_point(&self.private_seed, &self.public_seed, house_edge_percent);
        if derived != self.crash_point {
            return Err(VerifyError::CrashPointMismatch {
                derived,
                claimed: self.crash_point,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fairness::crash_point::DEFAULT_HOUSE_EDGE_PERCENT;
    use crate::fairness::seed::commit;

    fn honest_proof() -> RoundProof {
        let commit = commit();
        let public_seed = "d3adb33f".to_string();
        let crash_point =
            derive_crash_point(&commit.private_seed, &public_seed, DEFAULT_HOUSE_EDGE_PERCENT);
        RoundProof {
            private_seed: commit.private_seed,
            private_hash: commit.private_hash,
            public_seed,
            crash_point,
        }
    }

    #[test]
    fn honest_round_verifies() {
        assert!(honest_proof().verify(DEFAULT_HOUSE_EDGE_PERCENT).is_ok());
    }

    #[test]
    fn swapped_seed_fails_commitment() {
        let mut proof = honest_proof();
        proof.private_seed = commit().private_seed;
        assert_eq!(
            proof.verify(DEFAULT_HOUSE_EDGE_PERCENT),
            Err(VerifyError::HashMismatch)
        );
    }

    #[test]
    fn inflated_crash_point_fails_derivation() {
        let mut proof = honest_proof();
        proof.crash_point += 50;
        assert!(matches!(
            proof.verify(DEFAULT_HOUSE_EDGE_PERCENT),
            Err(VerifyError::CrashPointMismatch { .. })
        ));
    }
}
