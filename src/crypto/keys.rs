//! # Key Management
//!
//! Ephemeral ECDH keypairs on NIST P-256.
//!
//! ## Key Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         EPHEMERAL KEYS                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  One keypair per session attempt, generated at initiation (initiator)  │
//! │  or acceptance (responder). There are no long-term identity keys:      │
//! │  identity is asserted by the registered identifier plus SAS            │
//! │  verification, and key compromise never reaches past sessions (PFS).   │
//! │                                                                         │
//! │  Wire format:                                                          │
//! │  • Public key: SubjectPublicKeyInfo DER, base64-encoded (strict)       │
//! │  • Private key: never leaves this process, zeroized on drop            │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use p256::ecdh::{EphemeralSecret, SharedSecret};
use p256::pkcs8::{DecodePublicKey, EncodePublicKey};
use p256::PublicKey;
use rand::rngs::OsRng;
use zeroize::ZeroizeOnDrop;

use crate::error::{Error, Result};

/// An ephemeral ECDH P-256 keypair scoped to a single session
///
/// ## Security
///
/// - The private scalar is zeroized when this struct is dropped
/// - The keypair is never reused across sessions
#[derive(ZeroizeOnDrop)]
pub struct EphemeralKeyPair {
    /// Private scalar (secret)
    #[zeroize(skip)] // p256's EphemeralSecret handles its own zeroization
    secret: EphemeralSecret,
    /// SPKI DER of the public key, base64-encoded for the wire
    public_spki_b64: String,
}

impl EphemeralKeyPair {
    /// Generate a new random ephemeral keypair
    ///
    /// Uses the operating system's secure random number generator.
    pub fn generate() -> Result<Self> {
        let secret = EphemeralSecret::random(&mut OsRng);
        let public = secret.public_key();
        let der = public
            .to_public_key_der()
            .map_err(|e| Error::KeyGenerationFailed(format!("SPKI export failed: {}", e)))?;

        Ok(Self {
            secret,
            public_spki_b64: BASE64.encode(der.as_bytes()),
        })
    }

    /// The public key as base64-encoded SPKI DER (the wire representation)
    pub fn public_spki_b64(&self) -> &str {
        &self.public_spki_b64
    }

    /// Perform Diffie-Hellman key agreement with a peer's public key
    ///
    /// Both parties compute the same shared secret:
    /// - Initiator: initiator_secret × responder_public
    /// - Responder: responder_secret × initiator_public
    pub fn diffie_hellman(&self, their_public: &PeerPublicKey) -> SharedSecret {
        self.secret.diffie_hellman(&their_public.key)
    }
}

/// A peer's public key, imported from its wire representation
///
/// Import validates that the SPKI names the P-256 curve and that the
/// encoded point is on the curve; a key that fails either check is
/// rejected before any agreement is attempted.
#[derive(Clone)]
pub struct PeerPublicKey {
    /// The validated curve point
    key: PublicKey,
    /// The original base64 SPKI string (kept verbatim for SAS derivation)
    spki_b64: String,
}

impl PeerPublicKey {
    /// Import a peer public key from base64-encoded SPKI DER
    pub fn from_spki_b64(spki_b64: &str) -> Result<Self> {
        let der = BASE64
            .decode(spki_b64)
            .map_err(|e| Error::InvalidPublicKey(format!("Invalid base64: {}", e)))?;

        let key = PublicKey::from_public_key_der(&der)
            .map_err(|e| Error::InvalidPublicKey(format!("Invalid SPKI: {}", e)))?;

        Ok(Self {
            key,
            spki_b64: spki_b64.to_string(),
        })
    }

    /// The base64 SPKI string exactly as received
    pub fn spki_b64(&self) -> &str {
        &self.spki_b64
    }
}

// ============================================================================
// TESTS
// ============================================================================
