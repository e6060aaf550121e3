//! # HeliX Core
//!
//! The client-side session and secure-channel engine of the HeliX
//! peer-to-peer encrypted chat system.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         HELIX CORE MODULES                              │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐  ┌──────────────┐   │
//! │  │  Protocol   │  │   Session   │  │  Transfer   │  │   Adapters   │   │
//! │  │             │  │             │  │             │  │              │   │
//! │  │ - Envelope  │  │ - Handshake │  │ - Chunking  │  │ - Transport  │   │
//! │  │ - Types     │  │ - SAS       │  │ - Staging   │  │ - UiCommand  │   │
//! │  │ - Payloads  │  │ - Coord.    │  │ - Assembly  │  │              │   │
//! │  └──────┬──────┘  └──────┬──────┘  └──────┬──────┘  └──────┬───────┘   │
//! │         │                │                │                │           │
//! │         └────────────────┴────────────────┴────────────────┘           │
//! │                                   │                                     │
//! │  ┌─────────────┐  ┌─────────────┐ │                                     │
//! │  │   Crypto    │  │   Config    │ │                                     │
//! │  │             │  │             │◄┘                                     │
//! │  │ - P-256 DH  │  │ - Timeouts  │                                       │
//! │  │ - AES-GCM   │  │ - Limits    │                                       │
//! │  │ - HKDF/SAS  │  │             │                                       │
//! │  └─────────────┘  └─────────────┘                                       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Hierarchy
//!
//! - [`error`] - Error types for the entire library
//! - [`config`] - Engine timeouts and transfer limits
//! - [`crypto`] - Cryptographic primitives (ECDH, AES-GCM, HKDF, SAS)
//! - [`protocol`] - The relay wire format and typed payloads
//! - [`session`] - Per-peer sessions, the handshake engine, the coordinator
//! - [`transfer`] - Chunked file transfer and the durable chunk store
//! - [`adapters`] - Transport and UI boundary contracts
//!
//! ## Security Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          SECURITY LAYERS                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Layer 1: End-to-End Encryption (ephemeral ECDH + AES-256-GCM)         │
//! │  ──────────────────────────────────────────────────────────────         │
//! │  Each session derives a fresh AES-256-GCM key from an ephemeral        │
//! │  P-256 key agreement. The relay only ever forwards ciphertext.         │
//! │                                                                         │
//! │  Layer 2: Key Confirmation (encrypted challenge/response)               │
//! │  ────────────────────────────────────────────────────────               │
//! │  A random challenge must round-trip byte-exactly under the derived     │
//! │  key before the session is considered established.                     │
//! │                                                                         │
//! │  Layer 3: Mutual Authentication (Short Authentication String)          │
//! │  ─────────────────────────────────────────────────────────────          │
//! │  Six digits derived from both public keys are compared by the users    │
//! │  out-of-band, defeating an active man-in-the-middle at the relay.      │
//! │                                                                         │
//! │  Layer 4: Perfect Forward Secrecy                                       │
//! │  ─────────────────────────────────                                      │
//! │  Keys are ephemeral per session and zeroized on reset; there are no    │
//! │  long-term identity keys to compromise.                                │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

pub mod adapters;
pub mod config;
pub mod crypto;
pub mod error;
pub mod protocol;
pub mod session;
pub mod transfer;
/// Time utilities for stamping history entries.
pub mod time;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use adapters::{TransportAdapter, TransportStatus, UiCommand};
pub use config::EngineConfig;
pub use error::{Error, Result};
pub use session::{RegistrationState, SessionCoordinator, SessionState, TransportEvent};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Returns the version of HeliX Core
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Returns build information for debugging
pub fn build_info() -> BuildInfo {
    BuildInfo {
        version: env!("CARGO_PKG_VERSION"),
        profile: if cfg!(debug_assertions) {
            "debug"
        } else {
            "release"
        },
    }
}

/// Build information for debugging
#[derive(Debug, Clone)]
pub struct BuildInfo {
    /// Crate version
    pub version: &'static str,
    /// Build profile (debug/release)
    pub profile: &'static str,
}

// ============================================================================
// TESTS
// ============================================================================
