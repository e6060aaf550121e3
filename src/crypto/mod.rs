//! # Cryptography Module
//!
//! All cryptographic primitives used by HeliX Core.
//!
//! ## Security Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    CRYPTOGRAPHIC ARCHITECTURE                           │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    PER-SESSION KEY AGREEMENT                    │   │
//! │  ├─────────────────────────────────────────────────────────────────┤   │
//! │  │                                                                 │   │
//! │  │  Ephemeral ECDH keypair (P-256, one per session attempt)       │   │
//! │  │                          │                                      │   │
//! │  │                          ▼                                      │   │
//! │  │  Shared secret = own_private × peer_public                      │   │
//! │  │                          │                                      │   │
//! │  │                          ▼                                      │   │
//! │  │  HKDF-SHA256 (empty salt, fixed info)                           │   │
//! │  │                          │                                      │   │
//! │  │                          ▼                                      │   │
//! │  │  AES-256-GCM session key (zeroized at session end)              │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 MUTUAL AUTHENTICATION                           │   │
//! │  ├─────────────────────────────────────────────────────────────────┤   │
//! │  │                                                                 │   │
//! │  │  1. Key confirmation: random challenge encrypted under the     │   │
//! │  │     session key must round-trip byte-exactly                   │   │
//! │  │  2. SAS: 6 digits from SHA-256 over both public keys,          │   │
//! │  │     compared out-of-band by the users                          │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Algorithm Choices
//!
//! | Algorithm | Purpose | Notes |
//! |-----------|---------|-------|
//! | ECDH P-256 | Key agreement | SPKI DER on the wire for interop |
//! | HKDF-SHA256 | Key derivation | Empty salt, fixed application info |
//! | AES-256-GCM | Encryption | 96-bit IV, 128-bit tag, AAD for chunks |
//! | SHA-256 | SAS digest | First 4 bytes → 6 decimal digits |
//!
//! ## Security Considerations
//!
//! 1. **Key zeroization**: session keys and private scalars are zeroized on drop
//! 2. **Secure random**: `rand::rngs::OsRng` for keys, IVs, and challenges
//! 3. **No IV reuse**: a fresh random IV for every encryption operation
//! 4. **No long-term keys**: every session uses fresh ephemeral keys (PFS)

mod encryption;
mod kdf;
mod keys;
mod sas;

pub use encryption::{
    decrypt, decrypt_chunk, encrypt, encrypt_chunk, Iv, IV_SIZE, TAG_SIZE,
};
pub use kdf::{derive_session_key, SessionKey, SESSION_KEY_SIZE};
pub use keys::{EphemeralKeyPair, PeerPublicKey};
pub use sas::derive_sas;

/// Size of the random key-confirmation challenge in bytes
pub const CHALLENGE_SIZE: usize = 32;

/// Generate a fresh random key-confirmation challenge
pub fn random_challenge() -> Vec<u8> {
    use rand::RngCore;
    let mut bytes = vec![0u8; CHALLENGE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_challenge_length_and_uniqueness() {
        let c1 = random_challenge();
        let c2 = random_challenge();
        assert_eq!(c1.len(), CHALLENGE_SIZE);
        assert_ne!(c1, c2);
    }
}
