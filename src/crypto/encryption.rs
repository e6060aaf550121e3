//! # Encryption Module
//!
//! AES-256-GCM for message confidentiality and integrity.
//!
//! ## Encryption Flow
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      PAYLOAD ENCRYPTION FLOW                            │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  1. Fresh IV: 12 random bytes from the CSPRNG per invocation           │
//! │     (Never reuse an IV with the same key!)                             │
//! │                                                                         │
//! │  2. AES-256-GCM(                                                       │
//! │       key       = session_key,                                         │
//! │       iv        = random_iv,                                           │
//! │       plaintext = payload,                                             │
//! │       aad       = context  (empty for chat, bound for chunks)          │
//! │     )                                                                  │
//! │     → ciphertext + 16-byte auth tag                                    │
//! │                                                                         │
//! │  3. IV travels alongside the ciphertext, both base64 on the wire       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Properties
//!
//! | Property | Guarantee |
//! |----------|-----------|
//! | Confidentiality | Only the two session endpoints can read the payload |
//! | Integrity | Any modification is detected by the tag |
//! | Chunk binding | AAD ties each file chunk to its transfer and position |

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce as AesNonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::RngCore;

use crate::crypto::kdf::SessionKey;
use crate::error::{Error, Result};

/// Size of the AES-GCM IV in bytes (96 bits)
pub const IV_SIZE: usize = 12;

/// Size of the AES-GCM authentication tag in bytes (128 bits)
pub const TAG_SIZE: usize = 16;

/// An initialization vector for AES-GCM
///
/// ## Critical Security Requirement
///
/// **NEVER reuse an IV with the same key!**
///
/// IV reuse completely breaks AES-GCM security. Random 96-bit IVs are safe
/// for far more invocations than any session will ever perform.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Iv(pub [u8; IV_SIZE]);

impl Iv {
    /// Generate a cryptographically random IV
    pub fn random() -> Self {
        let mut bytes = [0u8; IV_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Create from existing bytes
    pub fn from_bytes(bytes: [u8; IV_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; IV_SIZE] {
        &self.0
    }

    /// Encode for the wire
    pub fn to_b64(&self) -> String {
        BASE64.encode(self.0)
    }

    /// Decode from the wire
    pub fn from_b64(s: &str) -> Result<Self> {
        let bytes = BASE64
            .decode(s)
            .map_err(|e| Error::MalformedMessage(format!("Invalid IV base64: {}", e)))?;
        let arr: [u8; IV_SIZE] = bytes
            .try_into()
            .map_err(|_| Error::MalformedMessage("IV must be 12 bytes".into()))?;
        Ok(Self(arr))
    }
}

/// Encrypt a payload under the session key
///
/// Returns the fresh IV and the ciphertext (tag appended). Ciphertext
/// length is always plaintext length + 16.
pub fn encrypt(key: &SessionKey, plaintext: &[u8], aad: &[u8]) -> Result<(Iv, Vec<u8>)> {
    let iv = Iv::random();
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| Error::EncryptionFailed(format!("Invalid key: {}", e)))?;

    let payload = Payload {
        msg: plaintext,
        aad,
    };

    let ciphertext = cipher
        .encrypt(AesNonce::from_slice(&iv.0), payload)
        .map_err(|e| Error::EncryptionFailed(format!("Encryption failed: {}", e)))?;

    Ok((iv, ciphertext))
}

/// Decrypt a payload under the session key
///
/// ## Errors
///
/// Returns `DecryptionFailed` if the ciphertext was tampered with, the AAD
/// does not match, or the key or IV is wrong.
pub fn decrypt(key: &SessionKey, iv: &Iv, ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| Error::DecryptionFailed(format!("Invalid key: {}", e)))?;

    let payload = Payload {
        msg: ciphertext,
        aad,
    };

    cipher.decrypt(AesNonce::from_slice(&iv.0), payload).map_err(|_| {
        Error::DecryptionFailed("authentication tag mismatch".into())
    })
}

// ============================================================================
// FILE CHUNK ENCRYPTION
// ============================================================================

/// Build the AAD binding a chunk to its transfer and position.
///
/// `transfer_id || chunk_index` (little-endian) prevents chunk reordering
/// and cross-transfer chunk substitution.
fn chunk_aad(transfer_id: &str, chunk_index: u32) -> Vec<u8> {
    let mut aad = Vec::with_capacity(transfer_id.len() + 4);
    aad.extend_from_slice(transfer_id.as_bytes());
    aad.extend_from_slice(&chunk_index.to_le_bytes());
    aad
}

/// Encrypt a single file chunk with AES-256-GCM.
///
/// The transfer id and chunk index are bound as Additional Authenticated
/// Data, so a relocated or substituted chunk fails authentication.
pub fn encrypt_chunk(
    key: &SessionKey,
    chunk_data: &[u8],
    transfer_id: &str,
    chunk_index: u32,
) -> Result<(Iv, Vec<u8>)> {
    encrypt(key, chunk_data, &chunk_aad(transfer_id, chunk_index))
}

/// Decrypt a single file chunk with AES-256-GCM.
///
/// ## Errors
///
/// Returns `DecryptionFailed` if the chunk was tampered with, belongs to a
/// different transfer, or has been relocated to a different index.
pub fn decrypt_chunk(
    key: &SessionKey,
    iv: &Iv,
    encrypted_data: &[u8],
    transfer_id: &str,
    chunk_index: u32,
) -> Result<Vec<u8>> {
    decrypt(key, iv, encrypted_data, &chunk_aad(transfer_id, chunk_index))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;

    fn test_key() -> SessionKey {
        SessionKey::from_bytes([42u8; 32])
    }

    #[test]
    fn test_encrypt_decrypt_basic() {
        let key = test_key();
        let plaintext = b"Hello, World!";
        let aad = b"";

        let (iv, ciphertext) = encrypt(&key, plaintext, aad).unwrap();
        let decrypted = decrypt(&key, &iv, &ciphertext, aad).unwrap();

        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_ciphertext_length_is_plaintext_plus_tag() {
        let key = test_key();
        let plaintext = b"sixteen bytes!!!";

        let (_, ciphertext) = encrypt(&key, plaintext, b"").unwrap();
        assert_eq!(ciphertext.len(), plaintext.len() + TAG_SIZE);
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = test_key();
        let (iv, mut ciphertext) = encrypt(&key, b"Hello, World!", b"").unwrap();

        ciphertext[0] ^= 0xFF;

        let result = decrypt(&key, &iv, &ciphertext, b"");
        assert!(result.is_err());
    }

    #[test]
    fn test_wrong_key_fails() {
        let key = test_key();
        let other = SessionKey::from_bytes([99u8; 32]);

        let (iv, ciphertext) = encrypt(&key, b"secret", b"").unwrap();
        let result = decrypt(&other, &iv, &ciphertext, b"");
        assert!(result.is_err());
    }

    #[test]
    fn test_different_ivs_produce_different_ciphertext() {
        let key = test_key();
        let plaintext = b"Hello, World!";

        let (iv1, ct1) = encrypt(&key, plaintext, b"").unwrap();
        let (iv2, ct2) = encrypt(&key, plaintext, b"").unwrap();

        assert_ne!(iv1, iv2);
        assert_ne!(ct1, ct2);
    }

    #[test]
    fn test_iv_b64_round_trip() {
        let iv = Iv::random();
        let restored = Iv::from_b64(&iv.to_b64()).unwrap();
        assert_eq!(iv, restored);
    }

    #[test]
    fn test_iv_wrong_length_rejected() {
        let short = BASE64.encode([0u8; 8]);
        assert!(Iv::from_b64(&short).is_err());
    }

    #[test]
    fn test_chunk_encrypt_decrypt_round_trip() {
        let key = test_key();
        let chunk_data = b"Hello, this is chunk data!";

        let (iv, encrypted) = encrypt_chunk(&key, chunk_data, "transfer-abc", 0).unwrap();
        let decrypted = decrypt_chunk(&key, &iv, &encrypted, "transfer-abc", 0).unwrap();

        assert_eq!(decrypted, chunk_data);
    }

    #[test]
    fn test_chunk_wrong_transfer_fails() {
        let key = test_key();
        let (iv, encrypted) = encrypt_chunk(&key, b"secret chunk", "transfer-a", 0).unwrap();

        let result = decrypt_chunk(&key, &iv, &encrypted, "transfer-b", 0);
        assert!(result.is_err());
    }

    #[test]
    fn test_chunk_relocated_index_fails() {
        let key = test_key();
        let (iv, encrypted) = encrypt_chunk(&key, b"secret chunk", "transfer-a", 0).unwrap();

        let result = decrypt_chunk(&key, &iv, &encrypted, "transfer-a", 1);
        assert!(result.is_err());
    }
}
