//! # Engine Configuration
//!
//! Tunables for the session engine: protocol timeouts and transfer limits.
//! Production code uses [`EngineConfig::default`]; tests shrink the durations
//! instead of pausing the clock.

use std::time::Duration;

/// Size of a single file-transfer chunk: 256 KiB
pub const CHUNK_SIZE: usize = 256 * 1024;

/// Maximum transferable file size: 100 MiB
pub const MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Maximum outgoing chat message size (64 KiB)
pub const MAX_CHAT_MESSAGE_SIZE: usize = 64 * 1024;

/// Number of SAS digits shown to the user
pub const SAS_DIGITS: usize = 6;

/// Engine configuration
///
/// All timeouts follow the protocol defaults; every field can be overridden
/// before the coordinator is constructed.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long an outgoing session request may wait for any reply (Type 2/3/−1)
    pub request_timeout: Duration,
    /// Per-step handshake deadline, restarted on each transition
    pub handshake_timeout: Duration,
    /// How long registration may wait for the relay's reply
    pub registration_timeout: Duration,
    /// Local typing inactivity before a typing-stop is sent
    pub typing_stop_delay: Duration,
    /// Auto-hide deadline for the peer's typing indicator
    pub peer_typing_timeout: Duration,
    /// Receiver inaction deadline after a file offer
    pub file_accept_timeout: Duration,
    /// Path for the durable chunk store; `None` keeps it in memory
    pub chunk_store_path: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
            handshake_timeout: Duration::from_secs(30),
            registration_timeout: Duration::from_secs(15),
            typing_stop_delay: Duration::from_secs(3),
            peer_typing_timeout: Duration::from_secs(5),
            file_accept_timeout: Duration::from_secs(60),
            chunk_store_path: None,
        }
    }
}

impl EngineConfig {
    /// A configuration with all timeouts shrunk for fast tests.
    #[cfg(test)]
    pub(crate) fn short() -> Self {
        Self {
            request_timeout: Duration::from_millis(50),
            handshake_timeout: Duration::from_millis(50),
            registration_timeout: Duration::from_millis(50),
            typing_stop_delay: Duration::from_millis(20),
            peer_typing_timeout: Duration::from_millis(30),
            file_accept_timeout: Duration::from_millis(50),
            chunk_store_path: None,
        }
    }
}
