//! Crash Point Derivation
//!
//! Maps a (private seed, public seed) pair to the round's crash multiplier.
//! The private seed keys an HMAC over the public seed, so the outcome is
//! fixed the moment the commit is published but cannot be computed until
//! the public seed exists.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::core::growth::MIN_MULTIPLIER;

type HmacSha256 = Hmac<Sha256>;

/// Default operator edge, in percent.
pub const DEFAULT_HOUSE_EDGE_PERCENT: f64 = 4.0;

/// Derive the crash multiplier (hundredths) for a seed pair.
///
/// The house edge is applied as a single non-continuous branch: whenever the
/// keyed hash is evenly divisible by `round(100 / house_edge_percent)` the
/// round is an instant crash at 1.00x. Otherwise the top 52 bits of the hash
/// map through `floor((100*e - h) / (e - h))` with `e = 2^52`, which is
/// always >= 100.
pub fn derive_crash_point(private_seed: &str, public_seed: &str, house_edge_percent: f64) -> u64 {
    let mut mac = HmacSha256::new_from_slice(private_seed.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(public_seed.as_bytes());
    let digest = mac.finalize().into_bytes();

    let modulus = (100.0 / house_edge_percent).round() as u64;
    if modulus > 0 && is_hash_divisible(&digest, modulus) {
        return MIN_MULTIPLIER;
    }

    let h = top_52_bits(&digest);
    let e = 1u64 << 52;
    // Integer division floors; h < e so the divisor is never zero.
    (100 * e - h) / (e - h)
}

/// Streaming divisibility test over the digest, 16 bits at a time.
///
/// Equivalent to interpreting the whole 256-bit digest as one big-endian
/// integer and taking it modulo `modulus`.
fn is_hash_divisible(digest: &[u8], modulus: u64) -> bool {
    let mut val: u64 = 0;
    for chunk in digest.chunks(2) {
        let word = u64::from(u16::from_be_bytes([chunk[0], chunk[1]]));
        val = ((val << 16) + word) % modulus;
    }
    val == 0
}

/// Top 52 bits of the digest as an integer (first 13 hex nibbles).
fn top_52_bits(digest: &[u8]) -> u64 {
    let mut h: u64 = 0;
    for byte in &digest[..7] {
        h = (h << 8) | u64::from(*byte);
    }
    h >> 4
}
