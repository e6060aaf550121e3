//! # Error Handling
//!
//! This module provides the error types for HeliX Core.
//!
//! ## Error Hierarchy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           ERROR HIERARCHY                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Error (top-level)                                                     │
//! │  │                                                                      │
//! │  ├── Registration Errors                                               │
//! │  │   ├── NotRegistered          - No identifier registered yet         │
//! │  │   ├── RegistrationRejected   - Identifier taken or server error     │
//! │  │   └── RegistrationTimedOut   - No server reply within the window    │
//! │  │                                                                      │
//! │  ├── Crypto Errors                                                     │
//! │  │   ├── KeyGenerationFailed    - ECDH keypair generation failed       │
//! │  │   ├── InvalidPublicKey       - SPKI import/validation failed        │
//! │  │   ├── KeyDerivationFailed    - HKDF expansion failed                │
//! │  │   ├── EncryptionFailed       - AES-GCM seal failed                  │
//! │  │   └── DecryptionFailed       - Tag mismatch / tampered data         │
//! │  │                                                                      │
//! │  ├── Session Errors                                                    │
//! │  │   ├── SessionNotFound        - No session for that peer             │
//! │  │   ├── SessionExists          - A session for that peer exists       │
//! │  │   ├── InvalidSessionState    - Operation not valid in this state    │
//! │  │   ├── InitiationInProgress   - Another initiation is pending        │
//! │  │   └── HandshakeFailed        - Challenge mismatch or crypto error   │
//! │  │                                                                      │
//! │  ├── Transfer Errors                                                   │
//! │  │   ├── TransferNotFound       - No transfer with that id             │
//! │  │   ├── FileTooLarge           - Above MAX_FILE_SIZE                  │
//! │  │   ├── EmptyFile              - Zero-byte file rejected              │
//! │  │   └── AssemblyFailed         - Reassembled size mismatch            │
//! │  │                                                                      │
//! │  ├── Storage Errors                                                    │
//! │  │   └── ChunkStore             - Durable chunk store failure          │
//! │  │                                                                      │
//! │  └── Protocol / Transport Errors                                       │
//! │      ├── ProtocolViolation      - Message for wrong state / bad field  │
//! │      ├── MalformedMessage       - Envelope or payload failed to parse  │
//! │      └── TransportClosed        - Send attempted on a dead transport   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Recoverable errors (timeouts, transient transport loss) stay within their
//! session and surface through the UI adapter; anything failing during
//! handshake crypto terminates the session it belongs to.

use thiserror::Error;

/// Result type alias for HeliX Core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for HeliX Core
///
/// Errors are categorized by module/domain so handlers can tell
/// session-scoped failures apart from process-wide ones.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Registration Errors (100-199)
    // ========================================================================

    /// No identifier has been registered with the relay
    #[error("Not registered with the relay. Register an identifier first.")]
    NotRegistered,

    /// The relay rejected the registration
    #[error("Registration rejected: {0}")]
    RegistrationRejected(String),

    /// Registration timed out waiting for the relay
    #[error("Registration timed out waiting for the relay.")]
    RegistrationTimedOut,

    // ========================================================================
    // Crypto Errors (200-299)
    // ========================================================================

    /// Ephemeral keypair generation failed
    #[error("Key generation failed: {0}")]
    KeyGenerationFailed(String),

    /// A peer public key failed SPKI import or validation
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    /// Session key derivation failed
    #[error("Failed to derive session key: {0}")]
    KeyDerivationFailed(String),

    /// Encryption failed
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Decryption failed
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    // ========================================================================
    // Session Errors (300-399)
    // ========================================================================

    /// No session exists for the given peer
    #[error("No session with peer: {0}")]
    SessionNotFound(String),

    /// A session already exists for the given peer
    #[error("A session with peer {0} already exists.")]
    SessionExists(String),

    /// The operation is not valid in the session's current state
    #[error("Operation not valid in session state {state}: {operation}")]
    InvalidSessionState {
        /// The state the session was in
        state: String,
        /// The operation that was attempted
        operation: String,
    },

    /// Another outgoing session request is already awaiting a reply
    #[error("Another session initiation is already in progress.")]
    InitiationInProgress,

    /// Cannot open a session with our own identifier
    #[error("Cannot start a session with yourself.")]
    SelfSession,

    /// The handshake failed (challenge mismatch or crypto error)
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    // ========================================================================
    // Transfer Errors (400-499)
    // ========================================================================

    /// No transfer with the given id
    #[error("Transfer not found: {0}")]
    TransferNotFound(String),

    /// The file exceeds the transfer size limit
    #[error("File too large: {size} bytes (max {max})")]
    FileTooLarge {
        /// Actual file size in bytes
        size: u64,
        /// Maximum permitted size in bytes
        max: u64,
    },

    /// Zero-byte files are rejected before any message is sent
    #[error("Cannot send an empty file.")]
    EmptyFile,

    /// Reassembly produced the wrong number of bytes
    #[error("File assembly failed: {0}")]
    AssemblyFailed(String),

    // ========================================================================
    // Storage Errors (500-599)
    // ========================================================================

    /// Durable chunk store failure
    #[error("Chunk store error: {0}")]
    ChunkStore(String),

    // ========================================================================
    // Protocol / Transport Errors (600-699)
    // ========================================================================

    /// A message arrived for the wrong state or with missing fields
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// The envelope or payload failed to parse
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// The transport is closed
    #[error("Transport is closed.")]
    TransportClosed,

    // ========================================================================
    // Internal Errors (900-999)
    // ========================================================================

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl Error {
    /// Get the numeric error code
    ///
    /// Codes are organized by category:
    /// - 100-199: Registration
    /// - 200-299: Crypto
    /// - 300-399: Session
    /// - 400-499: Transfer
    /// - 500-599: Storage
    /// - 600-699: Protocol / transport
    /// - 900-999: Internal
    pub fn code(&self) -> i32 {
        match self {
            // Registration (100-199)
            Error::NotRegistered => 100,
            Error::RegistrationRejected(_) => 101,
            Error::RegistrationTimedOut => 102,

            // Crypto (200-299)
            Error::KeyGenerationFailed(_) => 200,
            Error::InvalidPublicKey(_) => 201,
            Error::KeyDerivationFailed(_) => 202,
            Error::EncryptionFailed(_) => 203,
            Error::DecryptionFailed(_) => 204,

            // Session (300-399)
            Error::SessionNotFound(_) => 300,
            Error::SessionExists(_) => 301,
            Error::InvalidSessionState { .. } => 302,
            Error::InitiationInProgress => 303,
            Error::SelfSession => 304,
            Error::HandshakeFailed(_) => 305,

            // Transfer (400-499)
            Error::TransferNotFound(_) => 400,
            Error::FileTooLarge { .. } => 401,
            Error::EmptyFile => 402,
            Error::AssemblyFailed(_) => 403,

            // Storage (500-599)
            Error::ChunkStore(_) => 500,

            // Protocol / transport (600-699)
            Error::ProtocolViolation(_) => 600,
            Error::MalformedMessage(_) => 601,
            Error::TransportClosed => 602,

            // Internal (900-999)
            Error::Internal(_) => 900,
            Error::SerializationError(_) => 901,
        }
    }

    /// Check if this error is recoverable
    ///
    /// Recoverable errors can potentially be resolved by retrying or by
    /// user action; the UI offers a retry control only for these.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::RegistrationTimedOut
                | Error::RegistrationRejected(_)
                | Error::TransportClosed
        )
    }

    /// Whether the error terminates the session it occurred in
    ///
    /// Handshake crypto failures are fatal for that session; chat decryption
    /// failures and single-chunk corruption are not.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Error::HandshakeFailed(_) | Error::KeyDerivationFailed(_) | Error::InvalidPublicKey(_)
        )
    }
}

// ============================================================================
// ERROR CONVERSIONS
// ============================================================================

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::ChunkStore(err.to_string())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::NotRegistered.code(), 100);
        assert_eq!(Error::KeyGenerationFailed("test".into()).code(), 200);
        assert_eq!(Error::SessionNotFound("bob".into()).code(), 300);
        assert_eq!(Error::TransferNotFound("t1".into()).code(), 400);
        assert_eq!(Error::ChunkStore("io".into()).code(), 500);
        assert_eq!(Error::ProtocolViolation("test".into()).code(), 600);
        assert_eq!(Error::Internal("test".into()).code(), 900);
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(Error::RegistrationTimedOut.is_recoverable());
        assert!(Error::TransportClosed.is_recoverable());
        assert!(!Error::DecryptionFailed("tag".into()).is_recoverable());
        assert!(!Error::SelfSession.is_recoverable());
    }

    #[test]
    fn test_session_fatal_errors() {
        assert!(Error::HandshakeFailed("challenge mismatch".into()).is_session_fatal());
        assert!(Error::InvalidPublicKey("bad spki".into()).is_session_fatal());
        assert!(!Error::DecryptionFailed("chat line".into()).is_session_fatal());
    }

    #[test]
    fn test_invalid_state_message() {
        let err = Error::InvalidSessionState {
            state: "InitiatingSession".into(),
            operation: "send_chat".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("InitiatingSession"));
        assert!(msg.contains("send_chat"));
    }
}
