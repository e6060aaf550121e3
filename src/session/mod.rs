//! # Session Module
//!
//! Per-peer session state: the handshake state machine, chat history, and
//! in-flight transfers.
//!
//! ## Session Lifecycle
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      SESSION LIFECYCLE                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Initiator                              Responder                      │
//! │  ─────────                              ─────────                      │
//! │                                                                         │
//! │  InitiatingSession ──── Type 1 ───────► RequestReceived                │
//! │         │                                    │ (user accepts)          │
//! │         │ ◄─────────── Type 2 ───────  GeneratingAcceptKeys            │
//! │  DerivingKeyInitiator                   AwaitingInitiatorKey           │
//! │         │ ──────────── Type 4 ───────►      │                          │
//! │  AwaitingChallengeResponse              DerivingKeyResponder           │
//! │         │ ◄─────────── Type 5 ───────  AwaitingChallengeResponse       │
//! │  ReceivedChallenge                           │                          │
//! │         │ ──────────── Type 6 ───────►      │ (byte-exact check)       │
//! │  AwaitingFinalConfirmation              HandshakeCompleteResponder     │
//! │         │ ◄─────────── Type 7 ───────       │                          │
//! │  AwaitingSasVerification                AwaitingSasVerification        │
//! │         │  (both users compare digits and confirm, Type 7.1 each)     │
//! │         ▼                                    ▼                          │
//! │       Active ◄──────────────────────────► Active                       │
//! │                                                                         │
//! │  Terminal: Denied, RequestTimedOut, HandshakeTimedOut,                 │
//! │            SasDenied, Cancelled                                        │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

mod handshake;
mod coordinator;

pub use coordinator::{InternalEvent, RegistrationState, SessionCoordinator, TransportEvent};
pub use handshake::HandshakeAction;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::crypto::{EphemeralKeyPair, PeerPublicKey, SessionKey};
use crate::transfer::Transfer;

// ============================================================================
// STATES & ROLES
// ============================================================================

/// Which side of the handshake this endpoint plays for a given session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// We sent the session request
    Initiator,
    /// We received the session request
    Responder,
}

/// The per-session state machine.
///
/// The DerivingKey* and other transient states are entered and left within
/// a single coordinator turn (all crypto here is synchronous), but they are
/// part of the protocol's state table and appear in transition logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Initiator: Type 1 sent, awaiting Type 2
    InitiatingSession,
    /// Responder: Type 1 received, awaiting the local accept/deny decision
    RequestReceived,
    /// Responder: generating the ephemeral keypair after local accept
    GeneratingAcceptKeys,
    /// Responder: Type 2 sent, awaiting Type 4
    AwaitingInitiatorKey,
    /// Initiator: Type 2 received, deriving the session key
    DerivingKeyInitiator,
    /// Responder: Type 4 received, deriving the session key
    DerivingKeyResponder,
    /// Challenge (Type 5) or initiator key (Type 4) sent; awaiting the reply
    AwaitingChallengeResponse,
    /// Initiator: Type 5 decrypted, preparing Type 6
    ReceivedChallenge,
    /// Initiator: Type 6 sent, awaiting Type 7
    AwaitingFinalConfirmation,
    /// Responder: Type 6 verified, Type 7 sent, about to compute the SAS
    HandshakeCompleteResponder,
    /// SAS derived and shown; neither side has confirmed yet
    AwaitingSasVerification,
    /// Local user confirmed; awaiting the peer's Type 7.1
    SasConfirmedLocal,
    /// Peer confirmed via Type 7.1; awaiting the local user
    SasConfirmedPeer,
    /// Fully verified; messaging and file transfer enabled
    Active,
    /// Peer denied the request, or the relay reported the user unknown
    Denied,
    /// The outgoing request went unanswered
    RequestTimedOut,
    /// A handshake step missed its deadline
    HandshakeTimedOut,
    /// SAS verification was rejected
    SasDenied,
    /// Cancelled locally before completion
    Cancelled,
}

impl SessionState {
    /// Whether this state is terminal (the session is only waiting to be
    /// dismissed or has already been torn down).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Denied
                | Self::RequestTimedOut
                | Self::HandshakeTimedOut
                | Self::SasDenied
                | Self::Cancelled
        )
    }

    /// Whether the session has completed SAS verification on both sides.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Whether the per-step handshake deadline applies in this state.
    ///
    /// The SAS-verification wait reuses the same deadline: the timer armed
    /// on entering AwaitingSasVerification fires if neither side finishes.
    pub fn is_handshake_phase(&self) -> bool {
        !self.is_terminal() && !matches!(self, Self::Active | Self::RequestReceived)
    }

    /// Short name for logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::InitiatingSession => "InitiatingSession",
            Self::RequestReceived => "RequestReceived",
            Self::GeneratingAcceptKeys => "GeneratingAcceptKeys",
            Self::AwaitingInitiatorKey => "AwaitingInitiatorKey",
            Self::DerivingKeyInitiator => "DerivingKeyInitiator",
            Self::DerivingKeyResponder => "DerivingKeyResponder",
            Self::AwaitingChallengeResponse => "AwaitingChallengeResponse",
            Self::ReceivedChallenge => "ReceivedChallenge",
            Self::AwaitingFinalConfirmation => "AwaitingFinalConfirmation",
            Self::HandshakeCompleteResponder => "HandshakeCompleteResponder",
            Self::AwaitingSasVerification => "AwaitingSasVerification",
            Self::SasConfirmedLocal => "SasConfirmedLocal",
            Self::SasConfirmedPeer => "SasConfirmedPeer",
            Self::Active => "Active",
            Self::Denied => "Denied",
            Self::RequestTimedOut => "RequestTimedOut",
            Self::HandshakeTimedOut => "HandshakeTimedOut",
            Self::SasDenied => "SasDenied",
            Self::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// CHAT HISTORY
// ============================================================================

/// What kind of line a history entry renders as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatKind {
    /// Written by the local user
    Own,
    /// Written by the peer
    Peer,
    /// Engine-generated notice
    System,
    /// Action-style "/me" line
    MeAction,
}

/// One entry in a session's message history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEntry {
    /// Display name of the author (identifier, or "system")
    pub sender: String,
    /// The text
    pub text: String,
    /// How the entry renders
    pub kind: ChatKind,
    /// Unix milliseconds when the entry was recorded
    pub timestamp: i64,
}

impl ChatEntry {
    /// Build an entry stamped with the current time.
    pub fn new(sender: impl Into<String>, text: impl Into<String>, kind: ChatKind) -> Self {
        Self {
            sender: sender.into(),
            text: text.into(),
            kind,
            timestamp: crate::time::now_timestamp_millis(),
        }
    }
}

// ============================================================================
// TIMERS
// ============================================================================

/// The deadlines scoped to one session.
///
/// A timer is a spawned sleep task that posts `{peer_id, kind}` back into
/// the coordinator's queue; firing for a session that no longer exists is a
/// no-op, and every handle is aborted on reset.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SessionTimerKind {
    /// Outgoing request unanswered (Type 1 without Type 2/3/−1)
    Request,
    /// Per-step handshake deadline (also covers the SAS wait)
    Handshake,
    /// Auto-hide for the peer's typing indicator
    PeerTyping,
    /// Local typing inactivity → send typing-stop
    TypingStop,
    /// Receiver inaction after a file offer
    FileAccept(String),
}

// ============================================================================
// SESSION
// ============================================================================

/// Per-peer session state.
///
/// Owned exclusively by the coordinator; nothing here is shared across
/// tasks. The session key is zeroized when the session is dropped.
pub struct Session {
    /// The peer's registered identifier (immutable after creation)
    pub peer_id: String,
    /// Which side of the handshake we are
    pub role: Role,
    /// Current state-machine position
    pub state: SessionState,
    /// Our ephemeral keypair (generated at initiation or acceptance)
    pub keys: Option<EphemeralKeyPair>,
    /// The peer's imported public key
    pub peer_public_key: Option<PeerPublicKey>,
    /// The derived AES-256-GCM session key
    pub session_key: Option<SessionKey>,
    /// The challenge we issued, kept for the byte-exact equality check
    pub challenge_sent: Option<Vec<u8>>,
    /// The derived SAS digits, once computed
    pub sas_digits: Option<String>,
    /// The local user confirmed the SAS
    pub local_sas_confirmed: bool,
    /// The peer confirmed the SAS (Type 7.1 received)
    pub peer_sas_confirmed: bool,
    /// Ordered message history
    pub messages: Vec<ChatEntry>,
    /// In-flight transfers by transfer id
    pub transfers: HashMap<String, Transfer>,
    /// Armed timers by kind
    timers: HashMap<SessionTimerKind, JoinHandle<()>>,
    /// The peer's typing indicator is currently shown
    pub peer_is_typing: bool,
    /// We have sent a typing-start without a matching stop
    pub local_is_typing: bool,
}

impl Session {
    /// Create a fresh session for a peer.
    pub fn new(peer_id: impl Into<String>, role: Role, state: SessionState) -> Self {
        let peer_id = peer_id.into();
        tracing::debug!(peer = %peer_id, ?role, state = %state, "session created");
        Self {
            peer_id,
            role,
            state,
            keys: None,
            peer_public_key: None,
            session_key: None,
            challenge_sent: None,
            sas_digits: None,
            local_sas_confirmed: false,
            peer_sas_confirmed: false,
            messages: Vec::new(),
            transfers: HashMap::new(),
            timers: HashMap::new(),
            peer_is_typing: false,
            local_is_typing: false,
        }
    }

    /// Transition to a new state, logging the edge.
    pub fn set_state(&mut self, next: SessionState) {
        tracing::debug!(
            peer = %self.peer_id,
            from = %self.state,
            to = %next,
            "session state transition"
        );
        self.state = next;
    }

    /// Append a history entry.
    pub fn push_history(&mut self, entry: ChatEntry) {
        self.messages.push(entry);
    }

    /// Arm a timer, replacing (and aborting) any previous timer of the
    /// same kind.
    pub fn arm_timer(&mut self, kind: SessionTimerKind, handle: JoinHandle<()>) {
        if let Some(previous) = self.timers.insert(kind, handle) {
            previous.abort();
        }
    }

    /// Cancel one timer if armed.
    pub fn cancel_timer(&mut self, kind: &SessionTimerKind) {
        if let Some(handle) = self.timers.remove(kind) {
            handle.abort();
        }
    }

    /// Cancel every timer scoped to this session.
    pub fn cancel_all_timers(&mut self) {
        for (_, handle) in self.timers.drain() {
            handle.abort();
        }
    }

    /// Whether any timer of the given kind is armed (used by tests).
    pub fn has_timer(&self, kind: &SessionTimerKind) -> bool {
        self.timers.contains_key(kind)
    }

    /// Number of armed timers (used by tests).
    pub fn timer_count(&self) -> usize {
        self.timers.len()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Timers must not outlive the session they reference.
        self.cancel_all_timers();
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(SessionState::Denied.is_terminal());
        assert!(SessionState::RequestTimedOut.is_terminal());
        assert!(SessionState::HandshakeTimedOut.is_terminal());
        assert!(SessionState::SasDenied.is_terminal());
        assert!(SessionState::Cancelled.is_terminal());
        assert!(!SessionState::Active.is_terminal());
        assert!(!SessionState::AwaitingSasVerification.is_terminal());
    }

    #[test]
    fn test_handshake_phase_classification() {
        assert!(SessionState::InitiatingSession.is_handshake_phase());
        assert!(SessionState::AwaitingChallengeResponse.is_handshake_phase());
        assert!(SessionState::AwaitingSasVerification.is_handshake_phase());
        assert!(!SessionState::RequestReceived.is_handshake_phase());
        assert!(!SessionState::Active.is_handshake_phase());
        assert!(!SessionState::Denied.is_handshake_phase());
    }

    #[test]
    fn test_session_starts_bare() {
        let session = Session::new("bob", Role::Initiator, SessionState::InitiatingSession);
        assert_eq!(session.peer_id, "bob");
        assert!(session.session_key.is_none());
        assert!(session.messages.is_empty());
        assert!(!session.local_sas_confirmed);
        assert!(!session.peer_sas_confirmed);
        assert_eq!(session.timer_count(), 0);
    }

    #[tokio::test]
    async fn test_arm_timer_replaces_same_kind() {
        let mut session = Session::new("bob", Role::Initiator, SessionState::InitiatingSession);

        let first = tokio::spawn(async {
            tokio::time::sleep(std::time::Duration::from_secs(600)).await;
        });
        let second = tokio::spawn(async {
            tokio::time::sleep(std::time::Duration::from_secs(600)).await;
        });

        session.arm_timer(SessionTimerKind::Handshake, first);
        session.arm_timer(SessionTimerKind::Handshake, second);
        assert_eq!(session.timer_count(), 1);

        session.cancel_all_timers();
        assert_eq!(session.timer_count(), 0);
    }

    #[test]
    fn test_chat_entry_timestamped() {
        let entry = ChatEntry::new("alice", "hi", ChatKind::Own);
        assert!(entry.timestamp > 0);
        assert_eq!(entry.kind, ChatKind::Own);
    }
}
