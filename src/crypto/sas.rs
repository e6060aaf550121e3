//! # Short Authentication String
//!
//! Derives the human-comparable digits both users read aloud to detect an
//! active man-in-the-middle.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        SAS DERIVATION                                   │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  1. Take both SPKI-base64 public key strings                           │
//! │  2. Sort them lexicographically (canonical order, both sides agree)    │
//! │  3. Concatenate and SHA-256                                            │
//! │  4. First 4 digest bytes as a big-endian unsigned integer              │
//! │  5. Reduce modulo 10^6, zero-pad to 6 decimal digits                   │
//! │                                                                         │
//! │  A MITM substituting either key changes the digits on one side.        │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use sha2::{Digest, Sha256};

use crate::config::SAS_DIGITS;

/// Derive the SAS digits from the two session public keys
///
/// The inputs are the base64 SPKI strings exactly as they appeared on the
/// wire. Ordering is canonicalized by lexicographic sort, so both
/// endpoints compute the identical string regardless of role.
pub fn derive_sas(local_spki_b64: &str, peer_spki_b64: &str) -> String {
    let (first, second) = if local_spki_b64 <= peer_spki_b64 {
        (local_spki_b64, peer_spki_b64)
    } else {
        (peer_spki_b64, local_spki_b64)
    };

    let mut hasher = Sha256::new();
    hasher.update(first.as_bytes());
    hasher.update(second.as_bytes());
    let digest = hasher.finalize();

    let value = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    format!("{:0width$}", value % 1_000_000, width = SAS_DIGITS)
}

// ============================================================================
// TESTS
// ============================================================================
