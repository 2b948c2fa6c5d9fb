//! Public Seed Oracle
//!
//! The public seed must originate from a source the engine cannot control
//! at commit time (a chain block hash, a randomness beacon). When the
//! source is down the engine pauses and eventually aborts the round with
//! refunds; it never substitutes guessable local randomness in production.

use async_trait::async_trait;
use rand::RngCore;
use thiserror::Error;

/// Entropy source failures.
#[derive(Debug, Error)]
pub enum EntropyError {
    /// The oracle could not be reached or returned garbage.
    #[error("entropy source unavailable: {0}")]
    Unavailable(String),

    /// The oracle did not answer in time.
    #[error("entropy request timed out")]
    Timeout,
}

/// External public seed oracle.
#[async_trait]
pub trait EntropySource: Send + Sync {
    /// Fetch a fresh public seed.
    async fn public_seed(&self) -> Result<String, EntropyError>;
}

/// Locally generated entropy. DEV AND TEST ONLY.
///
/// Using this in a fairness-sensitive deployment voids the commit/reveal
/// guarantee: the operator controls both seeds. The binary only constructs
/// it when the configuration explicitly asks for dev mode, and logs a
/// warning when it does.
pub struct LocalEntropy;

#[async_trait]
impl EntropySource for LocalEntropy {
    async fn public_seed(&self) -> Result<String, EntropyError> {
        let mut bytes = [0u8; 256];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Ok(hex::encode(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_entropy_yields_fresh_hex_seeds() {
        let source = LocalEntropy;
        let a = source.public_seed().await.unwrap();
        let b = source.public_seed().await.unwrap();
        assert_eq!(a.len(), 512);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
