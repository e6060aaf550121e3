//! # Adapter Contracts
//!
//! The narrow interfaces the engine consumes: a transport that moves opaque
//! envelopes, and a UI that renders panes and notices.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        ADAPTER BOUNDARIES                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │   WebSocket/TLS ──► TransportAdapter ──► SessionCoordinator            │
//! │   (out of scope)     send / close          │                            │
//! │                                            ▼                            │
//! │                      UiCommand stream ──► UI layer (out of scope)      │
//! │                                                                         │
//! │  The engine never blocks on either side: send() is best-effort and     │
//! │  UI commands go through an unbounded channel.                          │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};

use crate::protocol::Envelope;
use crate::transfer::{TransferDirection, TransferStatus};

// ============================================================================
// TRANSPORT
// ============================================================================

/// Connection lifecycle as reported by the transport layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportStatus {
    /// Dialing the relay
    Connecting,
    /// Connected, registration possible
    Connected,
    /// Transient loss, the transport is retrying
    Reconnecting,
    /// Final disconnect; every session is torn down
    Closed,
}

impl TransportStatus {
    /// Whether this status ends the process's conversation with the relay.
    pub fn is_final(&self) -> bool {
        matches!(self, TransportStatus::Closed)
    }
}

/// The message transport consumed by the coordinator.
///
/// Implementations wrap the WebSocket (or an in-memory pair in tests).
/// `send` is best-effort: a `false` return means the frame was not written,
/// and the engine treats that as a transfer-level failure where it matters.
pub trait TransportAdapter: Send + Sync {
    /// Serialize and send one envelope. Returns whether the write succeeded.
    fn send(&self, envelope: &Envelope) -> bool;

    /// Close the connection. Used only at process teardown.
    fn close(&self, code: u16, reason: &str);
}

// ============================================================================
// UI COMMANDS
// ============================================================================

/// Session-list indicator states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionIndicator {
    /// This session is the one on screen
    Active,
    /// Activity since the user last looked
    Unread,
    /// No indicator
    Clear,
}

/// Named sounds the UI may play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SoundId {
    /// A chat message arrived
    MessageReceived,
    /// An incoming session request arrived
    RequestReceived,
    /// A session reached the Active state
    SessionEstablished,
    /// A session ended
    SessionEnded,
    /// Something went wrong
    Error,
}

/// Commands the engine issues to the UI layer.
///
/// The UI consumes these from an unbounded channel; the engine never waits
/// for rendering. Every command is self-contained so the UI needs no
/// engine state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UiCommand {
    /// Show the registration form
    ShowRegistration,
    /// Hide the registration form
    HideRegistration,
    /// Show the main application with the registered identifier
    ShowMainApp {
        /// The identifier the relay confirmed
        identifier: String,
    },
    /// Show the default (no session selected) view
    ShowDefaultView,
    /// Add a peer to the session list
    AddSessionEntry {
        /// Peer identifier
        peer_id: String,
    },
    /// Remove a peer from the session list
    RemoveSessionEntry {
        /// Peer identifier
        peer_id: String,
    },
    /// Set the list indicator for a peer
    SetSessionIndicator {
        /// Peer identifier
        peer_id: String,
        /// New indicator state
        indicator: SessionIndicator,
    },
    /// Show the incoming-request pane with accept/deny controls
    ShowIncomingRequestPane {
        /// Peer identifier
        peer_id: String,
    },
    /// Show the waiting-for-response pane with a cancel control
    ShowWaitingPane {
        /// Peer identifier
        peer_id: String,
    },
    /// Show the per-session info pane
    ShowInfoPane {
        /// Peer identifier
        peer_id: String,
        /// Why the pane is shown
        reason: String,
        /// Whether a retry control is offered
        can_retry: bool,
    },
    /// Show the SAS verification pane with confirm/deny/cancel controls
    ShowSasPane {
        /// Peer identifier
        peer_id: String,
        /// The decimal digits both users compare
        sas_digits: String,
    },
    /// Show the active chat pane for a peer
    ShowActiveChatPane {
        /// Peer identifier
        peer_id: String,
    },
    /// Append a chat line
    AddChatMessage {
        /// Peer the conversation belongs to
        peer_id: String,
        /// Display name of the author
        sender: String,
        /// Message text
        text: String,
        /// Whether the local user authored it
        own: bool,
    },
    /// Append an action-style ("/me") line
    AddActionMessage {
        /// Peer the conversation belongs to
        peer_id: String,
        /// Display name of the author
        sender: String,
        /// Action text
        text: String,
    },
    /// Append a system notice to a conversation
    AddSystemMessage {
        /// Peer the conversation belongs to
        peer_id: String,
        /// Notice text
        text: String,
    },
    /// Show the peer's typing indicator
    ShowTypingIndicator {
        /// Peer identifier
        peer_id: String,
    },
    /// Hide the peer's typing indicator
    HideTypingIndicator {
        /// Peer identifier
        peer_id: String,
    },
    /// Add a file-transfer message to the conversation
    AddFileTransferMessage {
        /// Peer the conversation belongs to
        peer_id: String,
        /// UUID of the transfer
        transfer_id: String,
        /// Original file name
        file_name: String,
        /// Total size in bytes
        file_size: u64,
        /// Upload or download
        direction: TransferDirection,
    },
    /// Update a file-transfer message in place
    UpdateFileTransferMessage {
        /// Peer the conversation belongs to
        peer_id: String,
        /// UUID of the transfer
        transfer_id: String,
        /// Current status
        status: TransferStatus,
        /// Progress percentage, 0-100
        progress: u8,
    },
    /// Remove a file-transfer message
    RemoveFileTransferMessage {
        /// Peer the conversation belongs to
        peer_id: String,
        /// UUID of the transfer
        transfer_id: String,
    },
    /// Hand the assembled file to the UI for download
    SurfaceArtifact {
        /// Peer the transfer belongs to
        peer_id: String,
        /// UUID of the transfer
        transfer_id: String,
        /// Original file name
        file_name: String,
        /// MIME type
        file_type: String,
        /// The assembled bytes
        data: Vec<u8>,
    },
    /// Release a previously surfaced artifact handle
    ReleaseArtifact {
        /// UUID of the transfer whose artifact is released
        transfer_id: String,
    },
    /// Play a named sound
    PlaySound(SoundId),
    /// Update the status-bar text
    UpdateStatusBar {
        /// New status text
        text: String,
    },
    /// Process-wide modal alert (registration failure, server disconnect)
    ShowAlert {
        /// Alert text
        message: String,
    },
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_final_status() {
        assert!(TransportStatus::Closed.is_final());
        assert!(!TransportStatus::Reconnecting.is_final());
        assert!(!TransportStatus::Connected.is_final());
    }

    #[test]
    fn test_ui_command_serializes() {
        let cmd = UiCommand::ShowSasPane {
            peer_id: "bob".into(),
            sas_digits: "427193".into(),
        };
        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.contains("427193"));
    }
}
