//! # Session Key Derivation
//!
//! Turns the raw ECDH shared secret into the per-session AES-256-GCM key.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    SESSION KEY DERIVATION                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 ECDH SHARED SECRET (P-256)                      │   │
//! │  │                                                                 │   │
//! │  │  own_private × peer_public  =  peer_private × own_public        │   │
//! │  │  → 32 bytes, not uniformly random                               │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │                                ▼                                        │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  HKDF-SHA256(                                                   │   │
//! │  │    ikm  = shared_secret,                                        │   │
//! │  │    salt = empty,                                                │   │
//! │  │    info = "helix-session-key-v1"                                │   │
//! │  │  )                                                              │   │
//! │  │  → 32-byte AES-256-GCM session key                              │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The session key has no export path: it exists only inside [`SessionKey`],
//! is used exclusively for AES-GCM, and is zeroized when the session ends.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::ZeroizeOnDrop;

use crate::crypto::keys::{EphemeralKeyPair, PeerPublicKey};
use crate::error::{Error, Result};

/// Size of the session key in bytes (256 bits)
pub const SESSION_KEY_SIZE: usize = 32;

/// HKDF info string binding derived keys to this application
const SESSION_KEY_INFO: &[u8] = b"helix-session-key-v1";

/// The symmetric session key shared by both endpoints
///
/// Zeroized when dropped. Never serialized, never persisted.
#[derive(ZeroizeOnDrop)]
pub struct SessionKey([u8; SESSION_KEY_SIZE]);

impl SessionKey {
    /// Create from raw bytes (used by tests and derivation only)
    pub fn from_bytes(bytes: [u8; SESSION_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes, visible only to the AEAD layer
    pub(crate) fn as_bytes(&self) -> &[u8; SESSION_KEY_SIZE] {
        &self.0
    }
}

/// Derive the session key from our ephemeral keypair and the peer's public key
///
/// Both sides call this with their own private key and the other's public
/// key and arrive at the identical session key.
pub fn derive_session_key(
    own: &EphemeralKeyPair,
    peer: &PeerPublicKey,
) -> Result<SessionKey> {
    let shared = own.diffie_hellman(peer);

    let hkdf = Hkdf::<Sha256>::new(None, shared.raw_secret_bytes().as_slice());
    let mut key = [0u8; SESSION_KEY_SIZE];
    hkdf.expand(SESSION_KEY_INFO, &mut key)
        .map_err(|_| Error::KeyDerivationFailed("HKDF expansion failed".into()))?;

    Ok(SessionKey(key))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_both_sides_derive_same_key() {
        let alice = EphemeralKeyPair::generate().unwrap();
        let bob = EphemeralKeyPair::generate().unwrap();

        let alice_view = PeerPublicKey::from_spki_b64(alice.public_spki_b64()).unwrap();
        let bob_view = PeerPublicKey::from_spki_b64(bob.public_spki_b64()).unwrap();

        let key_a = derive_session_key(&alice, &bob_view).unwrap();
        let key_b = derive_session_key(&bob, &alice_view).unwrap();

        assert_eq!(key_a.as_bytes(), key_b.as_bytes());
    }

    #[test]
    fn test_fresh_keypairs_give_independent_keys() {
        // Two separate session attempts with the same peer must not share a key
        let bob = EphemeralKeyPair::generate().unwrap();
        let bob_view = PeerPublicKey::from_spki_b64(bob.public_spki_b64()).unwrap();

        let alice_first = EphemeralKeyPair::generate().unwrap();
        let alice_second = EphemeralKeyPair::generate().unwrap();

        let key_first = derive_session_key(&alice_first, &bob_view).unwrap();
        let key_second = derive_session_key(&alice_second, &bob_view).unwrap();

        assert_ne!(key_first.as_bytes(), key_second.as_bytes());
    }
}
