//! # Session Coordinator
//!
//! The process-wide hub: owns the sessions map and the registration state,
//! routes every inbound envelope to the right handler, enforces the global
//! invariants, and executes the action records produced by the handshake
//! engine.
//!
//! ## Event Flow
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      COORDINATOR EVENT FLOW                             │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────┐                   ┌──────────────────────────┐    │
//! │  │ Transport frames│──────────────────►│                          │    │
//! │  │ + status        │                   │   SessionCoordinator     │    │
//! │  └─────────────────┘                   │                          │    │
//! │                                        │   • parse + validate     │    │
//! │  ┌─────────────────┐                   │   • locate session       │    │
//! │  │ User operations │──────────────────►│   • run handler          │    │
//! │  │ (UI layer)      │                   │   • execute actions      │    │
//! │  └─────────────────┘                   └──────┬──────────┬────────┘    │
//! │                                               │          │             │
//! │  ┌─────────────────┐      fires               ▼          ▼             │
//! │  │ Timer tasks     │────────────────►  internal      UiCommand        │
//! │  │ (sleep + post)  │◄────────────────  queue         channel          │
//! │  └─────────────────┘      arms                                         │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything runs on one logical task: handlers are synchronous, crypto is
//! synchronous, and long-lived waits exist only as spawned sleep tasks that
//! post `{peer_id, kind}` back into the internal queue. A timer that fires
//! after its session was reset finds no session and is a no-op.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::adapters::{
    SessionIndicator, SoundId, TransportAdapter, TransportStatus, UiCommand,
};
use crate::config::{EngineConfig, MAX_CHAT_MESSAGE_SIZE, MAX_FILE_SIZE};
use crate::crypto::{decrypt, decrypt_chunk, encrypt, encrypt_chunk, Iv};
use crate::error::{Error, Result};
use crate::protocol::{
    ChatMessagePayload, ChatPlaintext, Envelope, FileChunkPayload, FileCompletePayload,
    FileDecisionPayload, FileErrorPayload, FileOfferPayload, InitiatorKeyPayload,
    KeyChallengePayload, KeyResponsePayload, MessageType, RegisterPayload, RegisteredPayload,
    RegistrationErrorPayload, RoutingHeader, SasConfirmPayload, ServerDisconnectPayload,
    SessionAcceptPayload, SessionDenyPayload, SessionEndPayload, SessionEstablishedPayload,
    SessionRequestPayload, TypingPayload, UserNotFoundPayload,
};
use crate::session::handshake::{self, HandshakeAction};
use crate::session::{ChatEntry, ChatKind, Role, Session, SessionState, SessionTimerKind};
use crate::transfer::{
    chunk_range, ChunkStore, FileSource, Transfer, TransferDirection, TransferStatus,
};

// ============================================================================
// REGISTRATION STATE
// ============================================================================

/// Process-wide registration lifecycle.
///
/// Transitions are linear until `Registered`; `Disconnected` is absorbing
/// except via full reinitialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationState {
    /// Engine constructed, transport not yet up
    Initializing,
    /// Transport is dialing the relay
    Connecting,
    /// Connected; no identifier claimed yet
    ConnectedUnregistered,
    /// Type 0 sent, awaiting Type 0.1 / 0.2
    Registering,
    /// Identifier accepted by the relay
    Registered(String),
    /// The relay rejected the identifier, or registration timed out
    FailedRegistration,
    /// Final disconnect
    Disconnected,
}

impl RegistrationState {
    /// The registered identifier, if any.
    pub fn identifier(&self) -> Option<&str> {
        match self {
            RegistrationState::Registered(id) => Some(id),
            _ => None,
        }
    }
}

// ============================================================================
// EVENTS
// ============================================================================

/// Input delivered by the transport layer.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A raw inbound frame
    Message(String),
    /// A connection lifecycle change
    Status(TransportStatus),
}

/// Events the coordinator posts to itself: timer fires and the transfer
/// pump. Carrying only ids (never references) keeps sessions free of
/// back-pointers; a stale event simply finds nothing to act on.
#[derive(Debug, Clone)]
pub enum InternalEvent {
    /// A session-scoped timer elapsed
    SessionTimer {
        /// The peer whose session armed the timer
        peer_id: String,
        /// Which deadline fired
        timer: SessionTimerKind,
    },
    /// The registration deadline elapsed
    RegistrationTimer,
    /// Send the next chunk of an outgoing transfer
    PumpTransfer {
        /// The peer the transfer belongs to
        peer_id: String,
        /// The transfer to pump
        transfer_id: String,
    },
}

// ============================================================================
// COORDINATOR
// ============================================================================

/// The central session coordinator.
///
/// Constructed once at startup with its collaborators injected; there are
/// no globals. All state mutation happens on the task that calls into it.
pub struct SessionCoordinator {
    config: EngineConfig,
    registration: RegistrationState,
    sessions: HashMap<String, Session>,
    /// The inbound request currently surfaced for accept/deny (at most one)
    pending_peer: Option<String>,
    /// The session currently on screen
    displayed_peer: Option<String>,
    transport: Arc<dyn TransportAdapter>,
    ui: UnboundedSender<UiCommand>,
    chunk_store: ChunkStore,
    internal_tx: UnboundedSender<InternalEvent>,
    internal_rx: UnboundedReceiver<InternalEvent>,
    registration_timer: Option<JoinHandle<()>>,
}

impl SessionCoordinator {
    /// Build a coordinator with injected collaborators.
    pub fn new(
        config: EngineConfig,
        transport: Arc<dyn TransportAdapter>,
        ui: UnboundedSender<UiCommand>,
    ) -> Result<Self> {
        let chunk_store = ChunkStore::open(config.chunk_store_path.as_deref())?;
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        Ok(Self {
            config,
            registration: RegistrationState::Initializing,
            sessions: HashMap::new(),
            pending_peer: None,
            displayed_peer: None,
            transport,
            ui,
            chunk_store,
            internal_tx,
            internal_rx,
            registration_timer: None,
        })
    }

    /// Drive the coordinator until the transport channel closes.
    ///
    /// Internal events (timers, the transfer pump) are drained before the
    /// next transport frame so self-posted work never starves.
    pub async fn run(mut self, mut transport_rx: UnboundedReceiver<TransportEvent>) {
        tracing::info!("session coordinator starting");
        loop {
            tokio::select! {
                biased;
                Some(event) = self.internal_rx.recv() => self.handle_internal_event(event),
                maybe = transport_rx.recv() => match maybe {
                    Some(TransportEvent::Message(raw)) => self.on_transport_message(&raw),
                    Some(TransportEvent::Status(status)) => self.on_transport_status(status),
                    None => break,
                },
            }
        }
        tracing::info!("session coordinator stopped");
    }

    /// Await the next self-posted event (used by embedders driving the
    /// coordinator manually, and by tests).
    pub async fn next_internal(&mut self) -> Option<InternalEvent> {
        self.internal_rx.recv().await
    }

    /// Pop a self-posted event without waiting.
    pub fn try_next_internal(&mut self) -> Option<InternalEvent> {
        self.internal_rx.try_recv().ok()
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    /// Current registration state.
    pub fn registration_state(&self) -> &RegistrationState {
        &self.registration
    }

    /// Our registered identifier, if registration completed.
    pub fn local_identifier(&self) -> Option<&str> {
        self.registration.identifier()
    }

    /// Read-only view of a session (used by embedders and tests).
    pub fn session(&self, peer_id: &str) -> Option<&Session> {
        self.sessions.get(peer_id)
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// The peer whose inbound request is awaiting a decision.
    pub fn pending_peer(&self) -> Option<&str> {
        self.pending_peer.as_deref()
    }

    /// The durable chunk store (used by tests to verify cleanup).
    pub fn chunk_store(&self) -> &ChunkStore {
        &self.chunk_store
    }

    // ========================================================================
    // TRANSPORT LIFECYCLE
    // ========================================================================

    /// React to a connection lifecycle change.
    pub fn on_transport_status(&mut self, status: TransportStatus) {
        tracing::info!(?status, "transport status changed");
        match status {
            TransportStatus::Connecting => {
                self.registration = RegistrationState::Connecting;
                self.ui(UiCommand::UpdateStatusBar {
                    text: "Connecting…".into(),
                });
            }
            TransportStatus::Connected => {
                self.registration = RegistrationState::ConnectedUnregistered;
                self.ui(UiCommand::ShowRegistration);
                self.ui(UiCommand::UpdateStatusBar {
                    text: "Connected".into(),
                });
            }
            TransportStatus::Reconnecting => {
                self.ui(UiCommand::UpdateStatusBar {
                    text: "Reconnecting…".into(),
                });
            }
            TransportStatus::Closed => {
                self.reset_all_sessions("connection lost");
                self.registration = RegistrationState::Disconnected;
                self.cancel_registration_timer();
                self.ui(UiCommand::ShowAlert {
                    message: "Connection to the relay was lost.".into(),
                });
            }
        }
    }

    /// Parse and route one inbound frame.
    ///
    /// Malformed frames, unknown types, and payloads missing fields are
    /// ignored (and logged); they never terminate the connection.
    pub fn on_transport_message(&mut self, raw: &str) {
        let envelope = match Envelope::from_json(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::debug!(error = %e, "ignoring unparseable frame");
                return;
            }
        };

        let message_type = envelope.message_type;
        let result = match message_type {
            MessageType::Registered => self.on_registered(&envelope),
            MessageType::RegistrationError => self.on_registration_error(&envelope),
            MessageType::UserNotFound => self.on_user_not_found(&envelope),
            MessageType::ServerDisconnect => self.on_server_disconnect(&envelope),
            MessageType::Register => {
                // Client→server only; a relay echoing it is misbehaving.
                Err(Error::ProtocolViolation("Type 0 received from relay".into()))
            }
            _ => self.route_session_message(&envelope),
        };

        if let Err(e) = result {
            tracing::debug!(?message_type, error = %e, "inbound message ignored");
        }
    }

    fn route_session_message(&mut self, envelope: &Envelope) -> Result<()> {
        let header: RoutingHeader = envelope.payload_as()?;
        let peer_id = header.sender_id;

        match envelope.message_type {
            MessageType::SessionRequest => self.on_session_request(&peer_id),
            MessageType::SessionAccept => {
                let payload: SessionAcceptPayload = envelope.payload_as()?;
                self.on_session_accept(&peer_id, &payload.public_key)
            }
            MessageType::SessionDeny => self.on_session_deny(&peer_id),
            MessageType::InitiatorKey => {
                let payload: InitiatorKeyPayload = envelope.payload_as()?;
                self.on_initiator_key(&peer_id, &payload.public_key)
            }
            MessageType::KeyChallenge => {
                let payload: KeyChallengePayload = envelope.payload_as()?;
                self.on_handshake_crypto(&peer_id, |session| {
                    handshake::on_key_challenge(session, &payload.iv, &payload.encrypted_challenge)
                })
            }
            MessageType::KeyResponse => {
                let payload: KeyResponsePayload = envelope.payload_as()?;
                self.on_handshake_crypto(&peer_id, |session| {
                    handshake::on_key_response(session, &payload.iv, &payload.encrypted_response)
                })
            }
            MessageType::SessionEstablished => {
                self.on_handshake_crypto(&peer_id, handshake::on_established)
            }
            MessageType::SasConfirm => {
                self.on_handshake_crypto(&peer_id, handshake::on_sas_confirm)
            }
            MessageType::ChatMessage => {
                let payload: ChatMessagePayload = envelope.payload_as()?;
                self.on_chat_message(&peer_id, &payload)
            }
            MessageType::SessionEnd => self.on_session_end(&peer_id),
            MessageType::TypingStart => self.on_typing_start(&peer_id),
            MessageType::TypingStop => self.on_typing_stop(&peer_id),
            MessageType::FileOffer => {
                let payload: FileOfferPayload = envelope.payload_as()?;
                self.on_file_offer(&peer_id, payload)
            }
            MessageType::FileAccept => {
                let payload: FileDecisionPayload = envelope.payload_as()?;
                self.on_file_accept(&peer_id, &payload.transfer_id)
            }
            MessageType::FileReject => {
                let payload: FileDecisionPayload = envelope.payload_as()?;
                self.on_file_reject(&peer_id, &payload.transfer_id)
            }
            MessageType::FileChunk => {
                let payload: FileChunkPayload = envelope.payload_as()?;
                self.on_file_chunk(&peer_id, payload)
            }
            MessageType::FileComplete => {
                let payload: FileCompletePayload = envelope.payload_as()?;
                self.on_file_complete(&peer_id, &payload.transfer_id)
            }
            MessageType::FileError => {
                let payload: FileErrorPayload = envelope.payload_as()?;
                self.on_file_error(&peer_id, &payload.transfer_id, &payload.error)
            }
            _ => Ok(()),
        }
    }

    // ========================================================================
    // REGISTRATION
    // ========================================================================

    /// Claim an identifier with the relay.
    pub fn register(&mut self, identifier: &str) {
        match self.registration {
            RegistrationState::ConnectedUnregistered | RegistrationState::FailedRegistration => {}
            _ => {
                self.notify_error("Cannot register right now.");
                return;
            }
        }
        if identifier.trim().is_empty() {
            self.notify_error("Identifier must not be empty.");
            return;
        }

        self.registration = RegistrationState::Registering;
        self.send(
            MessageType::Register,
            &RegisterPayload {
                identifier: identifier.to_string(),
            },
        );
        self.arm_registration_timer();
        self.ui(UiCommand::UpdateStatusBar {
            text: format!("Registering \"{}\"…", identifier),
        });
    }

    fn on_registered(&mut self, envelope: &Envelope) -> Result<()> {
        let payload: RegisteredPayload = envelope.payload_as()?;
        if self.registration != RegistrationState::Registering {
            return Err(Error::ProtocolViolation(
                "Type 0.1 while not registering".into(),
            ));
        }

        // The relay's echo of the identifier is authoritative.
        tracing::info!(identifier = %payload.identifier, "registered");
        self.registration = RegistrationState::Registered(payload.identifier.clone());
        self.cancel_registration_timer();
        self.ui(UiCommand::HideRegistration);
        self.ui(UiCommand::ShowMainApp {
            identifier: payload.identifier.clone(),
        });
        self.ui(UiCommand::ShowDefaultView);
        self.ui(UiCommand::UpdateStatusBar {
            text: format!("Registered as \"{}\"", payload.identifier),
        });
        Ok(())
    }

    fn on_registration_error(&mut self, envelope: &Envelope) -> Result<()> {
        let payload: RegistrationErrorPayload = envelope.payload_as()?;
        if self.registration != RegistrationState::Registering {
            return Err(Error::ProtocolViolation(
                "Type 0.2 while not registering".into(),
            ));
        }

        tracing::warn!(error = %payload.error, "registration rejected");
        self.registration = RegistrationState::FailedRegistration;
        self.cancel_registration_timer();
        self.ui(UiCommand::ShowAlert {
            message: format!("Registration failed: {}", payload.error),
        });
        Ok(())
    }

    fn on_user_not_found(&mut self, envelope: &Envelope) -> Result<()> {
        let payload: UserNotFoundPayload = envelope.payload_as()?;
        let peer_id = payload.target_id;

        let Some(session) = self.sessions.get_mut(&peer_id) else {
            return Err(Error::SessionNotFound(peer_id));
        };
        if session.state != SessionState::InitiatingSession {
            return Err(Error::InvalidSessionState {
                state: session.state.name().into(),
                operation: "Type -1".into(),
            });
        }

        session.cancel_timer(&SessionTimerKind::Request);
        session.set_state(SessionState::Denied);
        let reason = payload
            .message
            .unwrap_or_else(|| format!("\"{}\" was not found", peer_id));
        self.ui(UiCommand::ShowInfoPane {
            peer_id,
            reason,
            can_retry: false,
        });
        Ok(())
    }

    fn on_server_disconnect(&mut self, envelope: &Envelope) -> Result<()> {
        let payload: ServerDisconnectPayload = envelope.payload_as()?;
        tracing::warn!(error = %payload.error, "server-initiated disconnect");

        self.reset_all_sessions("server disconnected");
        self.registration = RegistrationState::Disconnected;
        self.cancel_registration_timer();
        self.ui(UiCommand::ShowAlert {
            message: format!("Disconnected by the server: {}", payload.error),
        });
        Ok(())
    }

    fn arm_registration_timer(&mut self) {
        self.cancel_registration_timer();
        let tx = self.internal_tx.clone();
        let deadline = self.config.registration_timeout;
        self.registration_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            let _ = tx.send(InternalEvent::RegistrationTimer);
        }));
    }

    fn cancel_registration_timer(&mut self) {
        if let Some(handle) = self.registration_timer.take() {
            handle.abort();
        }
    }

    // ========================================================================
    // SESSION LIFECYCLE OPERATIONS
    // ========================================================================

    /// Start a session with a peer.
    ///
    /// Preconditions: registered, not ourselves, no existing session with
    /// the peer, and no other initiation in flight anywhere.
    pub fn initiate(&mut self, peer_id: &str) {
        let Some(local_id) = self.registration.identifier().map(String::from) else {
            self.notify_error("Register an identifier before starting a chat.");
            return;
        };
        if peer_id == local_id {
            self.notify_error("You cannot start a chat with yourself.");
            return;
        }
        if self.sessions.contains_key(peer_id) {
            self.notify_error(&format!("A session with \"{}\" already exists.", peer_id));
            return;
        }
        if self
            .sessions
            .values()
            .any(|s| s.state == SessionState::InitiatingSession)
        {
            self.notify_error("Another chat request is already waiting for a reply.");
            return;
        }

        let mut session = Session::new(peer_id, Role::Initiator, SessionState::InitiatingSession);
        if let Err(e) = handshake::begin_initiation(&mut session) {
            tracing::error!(error = %e, "key generation failed");
            self.notify_error("Could not generate session keys.");
            return;
        }
        self.sessions.insert(peer_id.to_string(), session);

        self.send(
            MessageType::SessionRequest,
            &SessionRequestPayload {
                target_id: peer_id.to_string(),
                sender_id: local_id,
            },
        );
        self.arm_session_timer(peer_id, SessionTimerKind::Request, self.config.request_timeout);

        self.displayed_peer = Some(peer_id.to_string());
        self.ui(UiCommand::AddSessionEntry {
            peer_id: peer_id.to_string(),
        });
        self.ui(UiCommand::ShowWaitingPane {
            peer_id: peer_id.to_string(),
        });
    }

    fn on_session_request(&mut self, peer_id: &str) -> Result<()> {
        if self.sessions.contains_key(peer_id) {
            // Duplicate Type 1 for an existing session, whatever its state.
            tracing::debug!(peer = %peer_id, "duplicate session request ignored");
            return Ok(());
        }

        let session = Session::new(peer_id, Role::Responder, SessionState::RequestReceived);
        self.sessions.insert(peer_id.to_string(), session);

        self.ui(UiCommand::AddSessionEntry {
            peer_id: peer_id.to_string(),
        });
        self.ui(UiCommand::PlaySound(SoundId::RequestReceived));

        if self.pending_peer.is_none() {
            self.pending_peer = Some(peer_id.to_string());
            self.ui(UiCommand::ShowIncomingRequestPane {
                peer_id: peer_id.to_string(),
            });
        } else {
            // Only one request pane at a time; the rest wait in the list.
            self.ui(UiCommand::SetSessionIndicator {
                peer_id: peer_id.to_string(),
                indicator: SessionIndicator::Unread,
            });
        }
        Ok(())
    }

    /// Accept the inbound request from `peer_id`.
    pub fn accept(&mut self, peer_id: &str) {
        let actions = {
            let Some(session) = self.sessions.get_mut(peer_id) else {
                self.notify_error("No request from that peer.");
                return;
            };
            match handshake::local_accept(session) {
                Ok(actions) => actions,
                Err(e) => {
                    tracing::debug!(peer = %peer_id, error = %e, "accept ignored");
                    self.notify_error("Nothing to accept for that peer.");
                    return;
                }
            }
        };

        self.clear_pending(peer_id);
        self.displayed_peer = Some(peer_id.to_string());
        self.ui(UiCommand::SetSessionIndicator {
            peer_id: peer_id.to_string(),
            indicator: SessionIndicator::Active,
        });
        self.execute_handshake_actions(peer_id, actions);
    }

    /// Deny the inbound request from `peer_id`.
    pub fn deny(&mut self, peer_id: &str) {
        let Some(session) = self.sessions.get(peer_id) else {
            self.notify_error("No request from that peer.");
            return;
        };
        if session.state != SessionState::RequestReceived {
            self.notify_error("Nothing to deny for that peer.");
            return;
        }

        let payload = self.routed(peer_id, |target_id, sender_id| SessionDenyPayload {
            target_id,
            sender_id,
        });
        self.send(MessageType::SessionDeny, &payload);
        self.remove_session(peer_id);
    }

    /// Cancel our own outgoing request.
    pub fn cancel_request(&mut self, peer_id: &str) {
        let Some(session) = self.sessions.get(peer_id) else {
            self.notify_error("No outgoing request to cancel.");
            return;
        };
        if session.state != SessionState::InitiatingSession {
            self.notify_error("No outgoing request to cancel.");
            return;
        }

        self.send_session_end(peer_id);
        self.remove_session(peer_id);
    }

    /// Re-send a timed-out request.
    pub fn retry(&mut self, peer_id: &str) {
        {
            let Some(session) = self.sessions.get_mut(peer_id) else {
                self.notify_error("Nothing to retry.");
                return;
            };
            if session.state != SessionState::RequestTimedOut {
                self.notify_error("Nothing to retry.");
                return;
            }
            session.set_state(SessionState::InitiatingSession);
        }

        let payload = self.routed(peer_id, |target_id, sender_id| SessionRequestPayload {
            target_id,
            sender_id,
        });
        self.send(MessageType::SessionRequest, &payload);
        self.arm_session_timer(peer_id, SessionTimerKind::Request, self.config.request_timeout);
        self.ui(UiCommand::ShowWaitingPane {
            peer_id: peer_id.to_string(),
        });
    }

    /// End an established session (or tear down mid-handshake).
    pub fn end_session(&mut self, peer_id: &str) {
        if !self.sessions.contains_key(peer_id) {
            self.notify_error("No session with that peer.");
            return;
        }
        self.reset_session(peer_id, "session ended", true);
        self.ui(UiCommand::PlaySound(SoundId::SessionEnded));
    }

    /// Dismiss a session that reached a terminal state.
    pub fn dismiss(&mut self, peer_id: &str) {
        let Some(session) = self.sessions.get(peer_id) else {
            return;
        };
        if !session.state.is_terminal() {
            self.notify_error("That session is still active.");
            return;
        }
        self.remove_session(peer_id);
    }

    /// Bring a session's pane to the front.
    pub fn select_session(&mut self, peer_id: &str) {
        let Some(session) = self.sessions.get(peer_id) else {
            self.notify_error("No session with that peer.");
            return;
        };

        let state = session.state;
        let sas = session.sas_digits.clone();
        self.displayed_peer = Some(peer_id.to_string());
        self.ui(UiCommand::SetSessionIndicator {
            peer_id: peer_id.to_string(),
            indicator: SessionIndicator::Active,
        });

        match state {
            SessionState::Active => self.ui(UiCommand::ShowActiveChatPane {
                peer_id: peer_id.to_string(),
            }),
            SessionState::RequestReceived => self.ui(UiCommand::ShowIncomingRequestPane {
                peer_id: peer_id.to_string(),
            }),
            SessionState::InitiatingSession => self.ui(UiCommand::ShowWaitingPane {
                peer_id: peer_id.to_string(),
            }),
            SessionState::AwaitingSasVerification
            | SessionState::SasConfirmedLocal
            | SessionState::SasConfirmedPeer => {
                if let Some(sas_digits) = sas {
                    self.ui(UiCommand::ShowSasPane {
                        peer_id: peer_id.to_string(),
                        sas_digits,
                    });
                }
            }
            state if state.is_terminal() => self.ui(UiCommand::ShowInfoPane {
                peer_id: peer_id.to_string(),
                reason: terminal_reason(state).into(),
                can_retry: state == SessionState::RequestTimedOut,
            }),
            _ => self.ui(UiCommand::UpdateStatusBar {
                text: format!("Securing session with \"{}\"…", peer_id),
            }),
        }
    }

    // ========================================================================
    // SAS OPERATIONS
    // ========================================================================

    /// The local user confirmed the SAS digits.
    pub fn confirm_sas(&mut self, peer_id: &str) {
        let actions = {
            let Some(session) = self.sessions.get_mut(peer_id) else {
                self.notify_error("No session with that peer.");
                return;
            };
            match handshake::local_confirm_sas(session) {
                Ok(actions) => actions,
                Err(e) => {
                    tracing::debug!(peer = %peer_id, error = %e, "confirm_sas ignored");
                    return;
                }
            }
        };
        self.execute_handshake_actions(peer_id, actions);
    }

    /// The local user rejected the SAS digits.
    pub fn deny_sas(&mut self, peer_id: &str) {
        let Some(session) = self.sessions.get_mut(peer_id) else {
            self.notify_error("No session with that peer.");
            return;
        };
        match session.state {
            SessionState::AwaitingSasVerification
            | SessionState::SasConfirmedLocal
            | SessionState::SasConfirmedPeer => {}
            _ => {
                self.notify_error("No verification pending for that peer.");
                return;
            }
        }

        session.cancel_all_timers();
        session.set_state(SessionState::SasDenied);
        // Terminal states keep no key material around while they wait to
        // be dismissed; dropping zeroizes.
        session.session_key = None;
        session.challenge_sent = None;
        self.send_session_end(peer_id);
        self.ui(UiCommand::ShowInfoPane {
            peer_id: peer_id.to_string(),
            reason: "Verification code rejected. The session was not established.".into(),
            can_retry: false,
        });
    }

    /// Back out of SAS verification without branding it a mismatch.
    pub fn cancel_pending_sas(&mut self, peer_id: &str) {
        let Some(session) = self.sessions.get(peer_id) else {
            return;
        };
        match session.state {
            SessionState::AwaitingSasVerification
            | SessionState::SasConfirmedLocal
            | SessionState::SasConfirmedPeer => {}
            _ => return,
        }

        self.send_session_end(peer_id);
        self.remove_session(peer_id);
    }

    // ========================================================================
    // HANDSHAKE MESSAGE HANDLERS
    // ========================================================================

    fn on_session_accept(&mut self, peer_id: &str, public_key: &str) -> Result<()> {
        let actions = {
            let session = self
                .sessions
                .get_mut(peer_id)
                .ok_or_else(|| Error::SessionNotFound(peer_id.into()))?;
            session.cancel_timer(&SessionTimerKind::Request);
            handshake::on_session_accept(session, public_key)?
        };
        self.execute_handshake_actions(peer_id, actions);
        Ok(())
    }

    fn on_session_deny(&mut self, peer_id: &str) -> Result<()> {
        let session = self
            .sessions
            .get_mut(peer_id)
            .ok_or_else(|| Error::SessionNotFound(peer_id.into()))?;
        if session.state != SessionState::InitiatingSession {
            return Err(Error::InvalidSessionState {
                state: session.state.name().into(),
                operation: "Type 3".into(),
            });
        }

        session.cancel_timer(&SessionTimerKind::Request);
        session.set_state(SessionState::Denied);
        self.ui(UiCommand::ShowInfoPane {
            peer_id: peer_id.to_string(),
            reason: format!("\"{}\" declined the chat request.", peer_id),
            can_retry: false,
        });
        Ok(())
    }

    fn on_initiator_key(&mut self, peer_id: &str, public_key: &str) -> Result<()> {
        let actions = {
            let session = self
                .sessions
                .get_mut(peer_id)
                .ok_or_else(|| Error::SessionNotFound(peer_id.into()))?;
            handshake::on_initiator_key(session, public_key)?
        };
        self.execute_handshake_actions(peer_id, actions);
        Ok(())
    }

    /// Shared wrapper for handshake handlers that take only the session.
    fn on_handshake_crypto<F>(&mut self, peer_id: &str, handler: F) -> Result<()>
    where
        F: FnOnce(&mut Session) -> Result<Vec<HandshakeAction>>,
    {
        let actions = {
            let session = self
                .sessions
                .get_mut(peer_id)
                .ok_or_else(|| Error::SessionNotFound(peer_id.into()))?;
            handler(session)?
        };
        self.execute_handshake_actions(peer_id, actions);
        Ok(())
    }

    fn on_session_end(&mut self, peer_id: &str) -> Result<()> {
        let session = self
            .sessions
            .get(peer_id)
            .ok_or_else(|| Error::SessionNotFound(peer_id.into()))?;
        if session.state.is_terminal() {
            // Already waiting for dismissal; nothing left to tear down.
            return Ok(());
        }
        self.reset_session(peer_id, "ended by peer", false);
        self.ui(UiCommand::PlaySound(SoundId::SessionEnded));
        Ok(())
    }

    /// Execute the action records returned by the handshake engine.
    ///
    /// The match is exhaustive: a new action variant will not compile until
    /// the executor handles it.
    fn execute_handshake_actions(&mut self, peer_id: &str, actions: Vec<HandshakeAction>) {
        for action in actions {
            match action {
                HandshakeAction::SendAccept { public_key } => {
                    let payload = self.routed(peer_id, |target_id, sender_id| {
                        SessionAcceptPayload {
                            target_id,
                            sender_id,
                            public_key,
                        }
                    });
                    self.send(MessageType::SessionAccept, &payload);
                }
                HandshakeAction::SendInitiatorKey { public_key } => {
                    let payload = self.routed(peer_id, |target_id, sender_id| {
                        InitiatorKeyPayload {
                            target_id,
                            sender_id,
                            public_key,
                        }
                    });
                    self.send(MessageType::InitiatorKey, &payload);
                }
                HandshakeAction::SendChallenge {
                    iv,
                    encrypted_challenge,
                } => {
                    let payload = self.routed(peer_id, |target_id, sender_id| {
                        KeyChallengePayload {
                            target_id,
                            sender_id,
                            iv,
                            encrypted_challenge,
                        }
                    });
                    self.send(MessageType::KeyChallenge, &payload);
                }
                HandshakeAction::SendChallengeResponse {
                    iv,
                    encrypted_response,
                } => {
                    let payload = self.routed(peer_id, |target_id, sender_id| {
                        KeyResponsePayload {
                            target_id,
                            sender_id,
                            iv,
                            encrypted_response,
                        }
                    });
                    self.send(MessageType::KeyResponse, &payload);
                }
                HandshakeAction::SendEstablished => {
                    let payload = self.routed(peer_id, |target_id, sender_id| {
                        SessionEstablishedPayload {
                            target_id,
                            sender_id,
                            message: Some("session established".into()),
                        }
                    });
                    self.send(MessageType::SessionEstablished, &payload);
                }
                HandshakeAction::SendSasConfirm => {
                    let payload = self.routed(peer_id, |target_id, sender_id| SasConfirmPayload {
                        target_id,
                        sender_id,
                    });
                    self.send(MessageType::SasConfirm, &payload);
                }
                HandshakeAction::ShowSas { sas_digits } => {
                    self.ui(UiCommand::ShowSasPane {
                        peer_id: peer_id.to_string(),
                        sas_digits,
                    });
                }
                HandshakeAction::PeerSasConfirmed => {
                    self.push_system_message(peer_id, "Peer confirmed the verification code.");
                }
                HandshakeAction::Activated => {
                    self.push_system_message(
                        peer_id,
                        "Verification complete. This conversation is end-to-end encrypted.",
                    );
                    self.ui(UiCommand::ShowActiveChatPane {
                        peer_id: peer_id.to_string(),
                    });
                    self.ui(UiCommand::PlaySound(SoundId::SessionEstablished));
                }
                HandshakeAction::Reset { reason, notify_peer } => {
                    self.reset_session(peer_id, &reason, notify_peer);
                }
                HandshakeAction::RestartHandshakeTimer => {
                    self.arm_session_timer(
                        peer_id,
                        SessionTimerKind::Handshake,
                        self.config.handshake_timeout,
                    );
                }
                HandshakeAction::CancelHandshakeTimer => {
                    if let Some(session) = self.sessions.get_mut(peer_id) {
                        session.cancel_timer(&SessionTimerKind::Handshake);
                    }
                }
            }
        }
    }

    // ========================================================================
    // CHAT PATH
    // ========================================================================

    /// Send a chat line (or execute a local `/command`).
    pub fn send_chat(&mut self, peer_id: &str, text: &str) {
        // Empty input is dropped silently.
        if text.trim().is_empty() {
            return;
        }

        let Some(session) = self.sessions.get(peer_id) else {
            self.notify_error("No session with that peer.");
            return;
        };
        if session.state != SessionState::Active {
            self.notify_error("The session is not established yet.");
            return;
        }

        let (is_action, body) = match parse_command(text) {
            ParsedInput::Plain => (false, text.to_string()),
            ParsedInput::MeAction(action) => (true, action),
            ParsedInput::End => {
                self.end_session(peer_id);
                return;
            }
            ParsedInput::Version => {
                self.push_system_message(peer_id, &format!("HeliX Core v{}", crate::version()));
                return;
            }
            ParsedInput::Info => {
                let info = self.session_info_line(peer_id);
                self.push_system_message(peer_id, &info);
                return;
            }
            ParsedInput::Help => {
                self.push_system_message(
                    peer_id,
                    "Commands: /me <action>, /end, /version, /info, /help",
                );
                return;
            }
            ParsedInput::Unknown(cmd) => {
                self.push_system_message(peer_id, &format!("Unknown command: /{}", cmd));
                return;
            }
        };

        if body.len() > MAX_CHAT_MESSAGE_SIZE {
            self.push_system_message(peer_id, "Message too long to send.");
            return;
        }

        // An explicit stop precedes the message if a typing-start is live.
        self.stop_local_typing(peer_id);

        let local_id = self.registration.identifier().unwrap_or_default().to_string();
        let sealed = {
            let Some(session) = self.sessions.get_mut(peer_id) else {
                return;
            };
            let Some(key) = session.session_key.as_ref() else {
                return;
            };
            let plaintext = ChatPlaintext {
                is_action,
                text: body.clone(),
            };
            let bytes = match serde_json::to_vec(&plaintext) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::error!(error = %e, "chat serialization failed");
                    return;
                }
            };
            match encrypt(key, &bytes, b"") {
                Ok((iv, ciphertext)) => {
                    let kind = if is_action { ChatKind::MeAction } else { ChatKind::Own };
                    session.push_history(ChatEntry::new(local_id.clone(), body.clone(), kind));
                    Some((iv, ciphertext))
                }
                Err(e) => {
                    tracing::error!(error = %e, "chat encryption failed");
                    None
                }
            }
        };

        let Some((iv, ciphertext)) = sealed else {
            self.push_system_message(peer_id, "Message could not be encrypted.");
            return;
        };

        let payload = self.routed(peer_id, |target_id, sender_id| ChatMessagePayload {
            target_id,
            sender_id,
            iv: iv.to_b64(),
            data: BASE64.encode(&ciphertext),
        });
        self.send(MessageType::ChatMessage, &payload);

        if is_action {
            self.ui(UiCommand::AddActionMessage {
                peer_id: peer_id.to_string(),
                sender: local_id,
                text: body,
            });
        } else {
            self.ui(UiCommand::AddChatMessage {
                peer_id: peer_id.to_string(),
                sender: local_id,
                text: body,
                own: true,
            });
        }
    }

    fn on_chat_message(&mut self, peer_id: &str, payload: &ChatMessagePayload) -> Result<()> {
        let decrypted = {
            let session = self
                .sessions
                .get_mut(peer_id)
                .ok_or_else(|| Error::SessionNotFound(peer_id.into()))?;
            if session.state != SessionState::Active {
                return Err(Error::InvalidSessionState {
                    state: session.state.name().into(),
                    operation: "Type 8".into(),
                });
            }

            // A chat line always supersedes the typing indicator.
            session.peer_is_typing = false;
            session.cancel_timer(&SessionTimerKind::PeerTyping);

            let key = session
                .session_key
                .as_ref()
                .ok_or_else(|| Error::Internal("active session without key".into()))?;
            decode_chat(key, &payload.iv, &payload.data)
        };
        self.ui(UiCommand::HideTypingIndicator {
            peer_id: peer_id.to_string(),
        });

        let plain = match decrypted {
            Ok(plain) => plain,
            Err(e) => {
                // A failed chat line stays inside the session.
                tracing::warn!(peer = %peer_id, error = %e, "chat decryption failed");
                self.push_system_message(peer_id, "A message could not be decrypted.");
                return Ok(());
            }
        };

        let kind = if plain.is_action { ChatKind::MeAction } else { ChatKind::Peer };
        if let Some(session) = self.sessions.get_mut(peer_id) {
            session.push_history(ChatEntry::new(peer_id, plain.text.clone(), kind));
        }

        if plain.is_action {
            self.ui(UiCommand::AddActionMessage {
                peer_id: peer_id.to_string(),
                sender: peer_id.to_string(),
                text: plain.text,
            });
        } else {
            self.ui(UiCommand::AddChatMessage {
                peer_id: peer_id.to_string(),
                sender: peer_id.to_string(),
                text: plain.text,
                own: false,
            });
        }

        if self.displayed_peer.as_deref() != Some(peer_id) {
            self.ui(UiCommand::SetSessionIndicator {
                peer_id: peer_id.to_string(),
                indicator: SessionIndicator::Unread,
            });
        }
        self.ui(UiCommand::PlaySound(SoundId::MessageReceived));
        Ok(())
    }

    // ========================================================================
    // TYPING INDICATORS
    // ========================================================================

    /// Called on every local keystroke in an active conversation.
    pub fn notify_typing(&mut self, peer_id: &str) {
        let send_start = {
            let Some(session) = self.sessions.get_mut(peer_id) else {
                return;
            };
            if session.state != SessionState::Active {
                return;
            }
            let first = !session.local_is_typing;
            session.local_is_typing = true;
            first
        };

        if send_start {
            let payload = self.routed(peer_id, |target_id, sender_id| TypingPayload {
                target_id,
                sender_id,
            });
            self.send(MessageType::TypingStart, &payload);
        }
        self.arm_session_timer(
            peer_id,
            SessionTimerKind::TypingStop,
            self.config.typing_stop_delay,
        );
    }

    fn stop_local_typing(&mut self, peer_id: &str) {
        let was_typing = {
            let Some(session) = self.sessions.get_mut(peer_id) else {
                return;
            };
            let was = session.local_is_typing;
            session.local_is_typing = false;
            session.cancel_timer(&SessionTimerKind::TypingStop);
            was
        };
        if was_typing {
            let payload = self.routed(peer_id, |target_id, sender_id| TypingPayload {
                target_id,
                sender_id,
            });
            self.send(MessageType::TypingStop, &payload);
        }
    }

    fn on_typing_start(&mut self, peer_id: &str) -> Result<()> {
        let session = self
            .sessions
            .get_mut(peer_id)
            .ok_or_else(|| Error::SessionNotFound(peer_id.into()))?;
        if session.state != SessionState::Active {
            return Err(Error::InvalidSessionState {
                state: session.state.name().into(),
                operation: "Type 10".into(),
            });
        }

        session.peer_is_typing = true;
        self.ui(UiCommand::ShowTypingIndicator {
            peer_id: peer_id.to_string(),
        });
        // The indicator auto-hides if the peer goes quiet.
        self.arm_session_timer(
            peer_id,
            SessionTimerKind::PeerTyping,
            self.config.peer_typing_timeout,
        );
        Ok(())
    }

    fn on_typing_stop(&mut self, peer_id: &str) -> Result<()> {
        let session = self
            .sessions
            .get_mut(peer_id)
            .ok_or_else(|| Error::SessionNotFound(peer_id.into()))?;
        session.peer_is_typing = false;
        session.cancel_timer(&SessionTimerKind::PeerTyping);
        self.ui(UiCommand::HideTypingIndicator {
            peer_id: peer_id.to_string(),
        });
        Ok(())
    }

    // ========================================================================
    // FILE TRANSFER — SENDER
    // ========================================================================

    /// Offer a file to the peer. Returns the transfer id on success.
    pub fn select_file(&mut self, peer_id: &str, source: FileSource) -> Option<String> {
        {
            let Some(session) = self.sessions.get(peer_id) else {
                self.notify_error("No session with that peer.");
                return None;
            };
            if session.state != SessionState::Active {
                self.notify_error("The session is not established yet.");
                return None;
            }
        }
        if let Err(e) = source.validate() {
            self.notify_error(&e.to_string());
            return None;
        }

        let mut transfer = Transfer::new_outgoing(source);
        transfer.status = TransferStatus::PendingAcceptance;
        let transfer_id = transfer.transfer_id.clone();
        let (file_name, file_size, file_type) = (
            transfer.file_name.clone(),
            transfer.file_size,
            transfer.file_type.clone(),
        );

        if let Some(session) = self.sessions.get_mut(peer_id) {
            session.transfers.insert(transfer_id.clone(), transfer);
        }

        let offer = self.routed(peer_id, |target_id, sender_id| FileOfferPayload {
            target_id,
            sender_id,
            transfer_id: transfer_id.clone(),
            file_name: file_name.clone(),
            file_size,
            file_type: file_type.clone(),
        });
        self.send(MessageType::FileOffer, &offer);

        self.ui(UiCommand::AddFileTransferMessage {
            peer_id: peer_id.to_string(),
            transfer_id: transfer_id.clone(),
            file_name,
            file_size,
            direction: TransferDirection::Sending,
        });
        Some(transfer_id)
    }

    fn on_file_accept(&mut self, peer_id: &str, transfer_id: &str) -> Result<()> {
        {
            let session = self
                .sessions
                .get_mut(peer_id)
                .ok_or_else(|| Error::SessionNotFound(peer_id.into()))?;
            let transfer = session
                .transfers
                .get_mut(transfer_id)
                .ok_or_else(|| Error::TransferNotFound(transfer_id.into()))?;
            if transfer.direction != TransferDirection::Sending
                || transfer.status != TransferStatus::PendingAcceptance
            {
                return Err(Error::ProtocolViolation("unexpected Type 13".into()));
            }
            transfer.status = TransferStatus::Uploading;
        }

        self.update_transfer_ui(peer_id, transfer_id);
        let _ = self.internal_tx.send(InternalEvent::PumpTransfer {
            peer_id: peer_id.to_string(),
            transfer_id: transfer_id.to_string(),
        });
        Ok(())
    }

    fn on_file_reject(&mut self, peer_id: &str, transfer_id: &str) -> Result<()> {
        {
            let session = self
                .sessions
                .get_mut(peer_id)
                .ok_or_else(|| Error::SessionNotFound(peer_id.into()))?;
            let transfer = session
                .transfers
                .get_mut(transfer_id)
                .ok_or_else(|| Error::TransferNotFound(transfer_id.into()))?;
            if transfer.direction != TransferDirection::Sending {
                return Err(Error::ProtocolViolation("unexpected Type 14".into()));
            }
            transfer.status = TransferStatus::Rejected;
        }

        self.update_transfer_ui(peer_id, transfer_id);
        self.drop_transfer(peer_id, transfer_id);
        self.push_system_message(peer_id, "File transfer was declined.");
        Ok(())
    }

    /// One turn of the sender chunk loop: encrypt and send a single chunk,
    /// then re-post. Cancellation and inbound messages interleave between
    /// turns.
    fn pump_transfer(&mut self, peer_id: &str, transfer_id: &str) {
        enum Step {
            Send {
                payload_iv: String,
                payload_data: String,
                chunk_index: u32,
                finished: bool,
            },
            Stop,
        }

        let step = {
            let Some(session) = self.sessions.get_mut(peer_id) else {
                return; // session reset mid-transfer; nothing to do
            };
            if session.state != SessionState::Active {
                return;
            }
            let Some(key) = session.session_key.as_ref() else {
                return;
            };
            let Some(transfer) = session.transfers.get_mut(transfer_id) else {
                return;
            };
            if transfer.status != TransferStatus::Uploading {
                return;
            }
            let Some(source) = transfer.source.as_ref() else {
                return;
            };

            let index = transfer.next_chunk;
            let range = chunk_range(index, transfer.file_size);
            let bytes = &source.data[range];

            match encrypt_chunk(key, bytes, transfer_id, index) {
                Ok((iv, ciphertext)) => {
                    transfer.next_chunk += 1;
                    Step::Send {
                        payload_iv: iv.to_b64(),
                        payload_data: BASE64.encode(&ciphertext),
                        chunk_index: index,
                        finished: transfer.next_chunk == transfer.total_chunks,
                    }
                }
                Err(e) => {
                    tracing::error!(transfer = %transfer_id, error = %e, "chunk encryption failed");
                    Step::Stop
                }
            }
        };

        match step {
            Step::Send {
                payload_iv,
                payload_data,
                chunk_index,
                finished,
            } => {
                let chunk = self.routed(peer_id, |target_id, sender_id| FileChunkPayload {
                    target_id,
                    sender_id,
                    transfer_id: transfer_id.to_string(),
                    chunk_index,
                    iv: payload_iv,
                    data: payload_data,
                });
                if !self.send(MessageType::FileChunk, &chunk) {
                    self.fail_transfer(peer_id, transfer_id, "chunk send failed");
                    return;
                }
                self.update_transfer_ui(peer_id, transfer_id);

                if finished {
                    let done = self.routed(peer_id, |target_id, sender_id| FileCompletePayload {
                        target_id,
                        sender_id,
                        transfer_id: transfer_id.to_string(),
                    });
                    self.send(MessageType::FileComplete, &done);
                    if let Some(transfer) = self.transfer_mut(peer_id, transfer_id) {
                        transfer.status = TransferStatus::Complete;
                    }
                    self.update_transfer_ui(peer_id, transfer_id);
                    self.drop_transfer(peer_id, transfer_id);
                } else {
                    let _ = self.internal_tx.send(InternalEvent::PumpTransfer {
                        peer_id: peer_id.to_string(),
                        transfer_id: transfer_id.to_string(),
                    });
                }
            }
            Step::Stop => self.fail_transfer(peer_id, transfer_id, "chunk encryption failed"),
        }
    }

    /// Cancel an in-flight transfer in either direction.
    pub fn cancel_transfer(&mut self, peer_id: &str, transfer_id: &str) {
        let direction = {
            let Some(transfer) = self.transfer_mut(peer_id, transfer_id) else {
                return;
            };
            if transfer.status.is_terminal() {
                return;
            }
            transfer.status = TransferStatus::Cancelled;
            transfer.direction
        };

        let payload = self.routed(peer_id, |target_id, sender_id| FileErrorPayload {
            target_id,
            sender_id,
            transfer_id: transfer_id.to_string(),
            error: "transfer cancelled".into(),
        });
        self.send(MessageType::FileError, &payload);

        if direction == TransferDirection::Receiving {
            let _ = self.chunk_store.delete_transfer(transfer_id);
        }
        self.update_transfer_ui(peer_id, transfer_id);
        self.drop_transfer(peer_id, transfer_id);
    }

    // ========================================================================
    // FILE TRANSFER — RECEIVER
    // ========================================================================

    fn on_file_offer(&mut self, peer_id: &str, payload: FileOfferPayload) -> Result<()> {
        {
            let session = self
                .sessions
                .get_mut(peer_id)
                .ok_or_else(|| Error::SessionNotFound(peer_id.into()))?;
            if session.state != SessionState::Active {
                return Err(Error::InvalidSessionState {
                    state: session.state.name().into(),
                    operation: "Type 12".into(),
                });
            }
            if payload.file_size == 0 || payload.file_size > MAX_FILE_SIZE {
                return Err(Error::ProtocolViolation(format!(
                    "offered file size {} out of range",
                    payload.file_size
                )));
            }
            if session.transfers.contains_key(&payload.transfer_id) {
                return Err(Error::ProtocolViolation("duplicate transfer id".into()));
            }

            let transfer = Transfer::new_incoming(
                payload.transfer_id.clone(),
                payload.file_name.clone(),
                payload.file_size,
                payload.file_type.clone(),
            );
            session.transfers.insert(payload.transfer_id.clone(), transfer);
        }

        self.arm_session_timer(
            peer_id,
            SessionTimerKind::FileAccept(payload.transfer_id.clone()),
            self.config.file_accept_timeout,
        );
        self.ui(UiCommand::AddFileTransferMessage {
            peer_id: peer_id.to_string(),
            transfer_id: payload.transfer_id,
            file_name: payload.file_name,
            file_size: payload.file_size,
            direction: TransferDirection::Receiving,
        });
        self.ui(UiCommand::PlaySound(SoundId::RequestReceived));
        Ok(())
    }

    /// Accept an offered file.
    pub fn accept_file(&mut self, peer_id: &str, transfer_id: &str) {
        {
            let Some(session) = self.sessions.get_mut(peer_id) else {
                return;
            };
            let Some(transfer) = session.transfers.get_mut(transfer_id) else {
                return;
            };
            if transfer.direction != TransferDirection::Receiving
                || transfer.status != TransferStatus::PendingAcceptance
            {
                return;
            }
            transfer.status = TransferStatus::Receiving;
            session.cancel_timer(&SessionTimerKind::FileAccept(transfer_id.to_string()));
        }

        let payload = self.routed(peer_id, |target_id, sender_id| FileDecisionPayload {
            target_id,
            sender_id,
            transfer_id: transfer_id.to_string(),
        });
        self.send(MessageType::FileAccept, &payload);
        self.update_transfer_ui(peer_id, transfer_id);
    }

    /// Reject an offered file (also used when the accept deadline lapses).
    pub fn reject_file(&mut self, peer_id: &str, transfer_id: &str) {
        {
            let Some(session) = self.sessions.get_mut(peer_id) else {
                return;
            };
            let Some(transfer) = session.transfers.get(transfer_id) else {
                return;
            };
            if transfer.direction != TransferDirection::Receiving
                || transfer.status != TransferStatus::PendingAcceptance
            {
                return;
            }
            session.cancel_timer(&SessionTimerKind::FileAccept(transfer_id.to_string()));
        }

        let payload = self.routed(peer_id, |target_id, sender_id| FileDecisionPayload {
            target_id,
            sender_id,
            transfer_id: transfer_id.to_string(),
        });
        self.send(MessageType::FileReject, &payload);

        let _ = self.chunk_store.delete_transfer(transfer_id);
        self.ui(UiCommand::RemoveFileTransferMessage {
            peer_id: peer_id.to_string(),
            transfer_id: transfer_id.to_string(),
        });
        if let Some(session) = self.sessions.get_mut(peer_id) {
            session.transfers.remove(transfer_id);
        }
    }

    fn on_file_chunk(&mut self, peer_id: &str, payload: FileChunkPayload) -> Result<()> {
        let transfer_id = payload.transfer_id.clone();
        let decrypted = {
            let session = self
                .sessions
                .get_mut(peer_id)
                .ok_or_else(|| Error::SessionNotFound(peer_id.into()))?;
            let transfer = session
                .transfers
                .get(&transfer_id)
                .ok_or_else(|| Error::TransferNotFound(transfer_id.clone()))?;
            if transfer.direction != TransferDirection::Receiving
                || transfer.status != TransferStatus::Receiving
            {
                return Err(Error::ProtocolViolation("unexpected Type 15".into()));
            }
            let key = session
                .session_key
                .as_ref()
                .ok_or_else(|| Error::Internal("active session without key".into()))?;

            let iv = Iv::from_b64(&payload.iv)?;
            let ciphertext = BASE64
                .decode(&payload.data)
                .map_err(|e| Error::MalformedMessage(format!("chunk base64: {}", e)))?;
            decrypt_chunk(key, &iv, &ciphertext, &transfer_id, payload.chunk_index)
        };

        let bytes = match decrypted {
            Ok(bytes) => bytes,
            Err(e) => {
                // AEAD failure: the chunk is unrecoverable, so the transfer
                // errors out while the chat session itself stays up.
                tracing::warn!(transfer = %transfer_id, error = %e, "chunk rejected");
                self.fail_transfer(peer_id, &transfer_id, "chunk failed authentication");
                return Ok(());
            }
        };

        if let Err(e) = self
            .chunk_store
            .put_chunk(&transfer_id, payload.chunk_index, &bytes)
        {
            tracing::error!(transfer = %transfer_id, error = %e, "chunk staging failed");
            self.fail_transfer(peer_id, &transfer_id, "chunk staging failed");
            return Ok(());
        }

        // The store is authoritative for the distinct-chunk count, which
        // makes duplicate delivery naturally idempotent.
        let staged = self.chunk_store.chunk_count(&transfer_id).unwrap_or(0);
        if let Some(transfer) = self.transfer_mut(peer_id, &transfer_id) {
            transfer.received_chunks = staged;
        }
        self.update_transfer_ui(peer_id, &transfer_id);
        self.try_assemble(peer_id, &transfer_id);
        Ok(())
    }

    fn on_file_complete(&mut self, peer_id: &str, transfer_id: &str) -> Result<()> {
        {
            let session = self
                .sessions
                .get_mut(peer_id)
                .ok_or_else(|| Error::SessionNotFound(peer_id.into()))?;
            let transfer = session
                .transfers
                .get_mut(transfer_id)
                .ok_or_else(|| Error::TransferNotFound(transfer_id.into()))?;
            if transfer.direction != TransferDirection::Receiving {
                return Err(Error::ProtocolViolation("unexpected Type 16".into()));
            }
            transfer.completion_signal_received = true;
        }
        self.try_assemble(peer_id, transfer_id);
        Ok(())
    }

    fn on_file_error(&mut self, peer_id: &str, transfer_id: &str, error: &str) -> Result<()> {
        let direction = {
            let session = self
                .sessions
                .get_mut(peer_id)
                .ok_or_else(|| Error::SessionNotFound(peer_id.into()))?;
            let transfer = session
                .transfers
                .get_mut(transfer_id)
                .ok_or_else(|| Error::TransferNotFound(transfer_id.into()))?;
            transfer.status = TransferStatus::Errored;
            let direction = transfer.direction;
            session.cancel_timer(&SessionTimerKind::FileAccept(transfer_id.to_string()));
            direction
        };

        if direction == TransferDirection::Receiving {
            let _ = self.chunk_store.delete_transfer(transfer_id);
        }
        self.push_system_message(peer_id, &format!("File transfer failed: {}", error));
        self.update_transfer_ui(peer_id, transfer_id);
        self.drop_transfer(peer_id, transfer_id);
        Ok(())
    }

    /// Attempt assembly after each staged chunk and after the completion
    /// signal. Runs only when the signal has arrived and every chunk is
    /// staged.
    fn try_assemble(&mut self, peer_id: &str, transfer_id: &str) {
        let ready = self
            .transfer_mut(peer_id, transfer_id)
            .map(|t| t.ready_for_assembly())
            .unwrap_or(false);
        if !ready {
            return;
        }

        if let Some(transfer) = self.transfer_mut(peer_id, transfer_id) {
            transfer.status = TransferStatus::AssemblyPending;
        }

        let assembled = {
            let Some(session) = self.sessions.get(peer_id) else {
                return;
            };
            let Some(transfer) = session.transfers.get(transfer_id) else {
                return;
            };
            transfer.assemble(&self.chunk_store)
        };

        match assembled {
            Ok(data) => {
                let _ = self.chunk_store.delete_transfer(transfer_id);
                let (file_name, file_type) = {
                    let Some(transfer) = self.transfer_mut(peer_id, transfer_id) else {
                        return;
                    };
                    transfer.status = TransferStatus::Complete;
                    transfer.artifact_surfaced = true;
                    (transfer.file_name.clone(), transfer.file_type.clone())
                };

                self.ui(UiCommand::SurfaceArtifact {
                    peer_id: peer_id.to_string(),
                    transfer_id: transfer_id.to_string(),
                    file_name: file_name.clone(),
                    file_type,
                    data,
                });
                self.update_transfer_ui(peer_id, transfer_id);
                self.push_system_message(peer_id, &format!("Received \"{}\".", file_name));
                self.ui(UiCommand::PlaySound(SoundId::MessageReceived));
                // The record stays until reset so the surfaced artifact
                // handle can be released.
            }
            Err(e) => {
                tracing::error!(transfer = %transfer_id, error = %e, "assembly failed");
                self.fail_transfer(peer_id, transfer_id, "assembled size mismatch");
            }
        }
    }

    /// Shared failure path: notify the peer, purge staging, surface, drop.
    fn fail_transfer(&mut self, peer_id: &str, transfer_id: &str, reason: &str) {
        let payload = self.routed(peer_id, |target_id, sender_id| FileErrorPayload {
            target_id,
            sender_id,
            transfer_id: transfer_id.to_string(),
            error: reason.to_string(),
        });
        self.send(MessageType::FileError, &payload);

        let _ = self.chunk_store.delete_transfer(transfer_id);
        if let Some(transfer) = self.transfer_mut(peer_id, transfer_id) {
            transfer.status = TransferStatus::Errored;
        }
        self.push_system_message(peer_id, &format!("File transfer failed: {}", reason));
        self.update_transfer_ui(peer_id, transfer_id);
        self.drop_transfer(peer_id, transfer_id);
    }

    // ========================================================================
    // INTERNAL EVENTS (timers, pump)
    // ========================================================================

    /// Dispatch one self-posted event. A timer whose session has been reset
    /// finds nothing and does nothing.
    pub fn handle_internal_event(&mut self, event: InternalEvent) {
        match event {
            InternalEvent::RegistrationTimer => {
                if self.registration == RegistrationState::Registering {
                    tracing::warn!("registration timed out");
                    self.registration = RegistrationState::FailedRegistration;
                    self.ui(UiCommand::ShowAlert {
                        message: "Registration timed out. Try again.".into(),
                    });
                }
            }
            InternalEvent::PumpTransfer {
                peer_id,
                transfer_id,
            } => self.pump_transfer(&peer_id, &transfer_id),
            InternalEvent::SessionTimer { peer_id, timer } => {
                self.on_session_timer(&peer_id, timer)
            }
        }
    }

    fn on_session_timer(&mut self, peer_id: &str, timer: SessionTimerKind) {
        if !self.sessions.contains_key(peer_id) {
            tracing::debug!(peer = %peer_id, ?timer, "timer fired for reset session");
            return;
        }

        match timer {
            SessionTimerKind::Request => {
                let Some(session) = self.sessions.get_mut(peer_id) else {
                    return;
                };
                if session.state != SessionState::InitiatingSession {
                    return;
                }
                session.set_state(SessionState::RequestTimedOut);
                self.ui(UiCommand::ShowInfoPane {
                    peer_id: peer_id.to_string(),
                    reason: format!("\"{}\" did not answer.", peer_id),
                    can_retry: true,
                });
            }
            SessionTimerKind::Handshake => {
                let Some(session) = self.sessions.get_mut(peer_id) else {
                    return;
                };
                if !session.state.is_handshake_phase() {
                    return;
                }
                session.cancel_all_timers();
                session.set_state(SessionState::HandshakeTimedOut);
                session.session_key = None;
                session.challenge_sent = None;
                self.ui(UiCommand::ShowInfoPane {
                    peer_id: peer_id.to_string(),
                    reason: "Secure session setup timed out.".into(),
                    can_retry: false,
                });
            }
            SessionTimerKind::PeerTyping => {
                if let Some(session) = self.sessions.get_mut(peer_id) {
                    session.peer_is_typing = false;
                }
                self.ui(UiCommand::HideTypingIndicator {
                    peer_id: peer_id.to_string(),
                });
            }
            SessionTimerKind::TypingStop => {
                self.stop_local_typing(peer_id);
            }
            SessionTimerKind::FileAccept(transfer_id) => {
                // Receiver sat on the offer; treat as an explicit reject.
                self.reject_file(peer_id, &transfer_id);
            }
        }
    }

    // ========================================================================
    // RESET & CLEANUP
    // ========================================================================

    /// Tear down one session: cancel timers, purge staged chunks, release
    /// artifact handles, zeroize the key, drop the state, tell the UI.
    fn reset_session(&mut self, peer_id: &str, reason: &str, notify_peer: bool) {
        let Some(mut session) = self.sessions.remove(peer_id) else {
            return;
        };
        tracing::info!(peer = %peer_id, reason, "session reset");

        if notify_peer {
            self.send_session_end(peer_id);
        }

        session.cancel_all_timers();
        for transfer in session.transfers.values() {
            if transfer.direction == TransferDirection::Receiving {
                let _ = self.chunk_store.delete_transfer(&transfer.transfer_id);
            }
            if transfer.artifact_surfaced {
                self.ui(UiCommand::ReleaseArtifact {
                    transfer_id: transfer.transfer_id.clone(),
                });
            }
        }
        // The session key is zeroized when the session drops here.
        drop(session);

        if self.pending_peer.as_deref() == Some(peer_id) {
            self.pending_peer = None;
            self.promote_next_pending();
        }
        self.ui(UiCommand::RemoveSessionEntry {
            peer_id: peer_id.to_string(),
        });
        self.ui(UiCommand::ShowInfoPane {
            peer_id: peer_id.to_string(),
            reason: reason.to_string(),
            can_retry: false,
        });
        if self.displayed_peer.as_deref() == Some(peer_id) {
            self.displayed_peer = None;
            self.ui(UiCommand::ShowDefaultView);
        }
    }

    fn reset_all_sessions(&mut self, reason: &str) {
        let peers: Vec<String> = self.sessions.keys().cloned().collect();
        for peer_id in peers {
            self.reset_session(&peer_id, reason, false);
        }
    }

    /// Remove a session without the info pane (local decisions: deny,
    /// cancel, dismiss). Cleanup is identical to a reset.
    fn remove_session(&mut self, peer_id: &str) {
        let Some(mut session) = self.sessions.remove(peer_id) else {
            return;
        };
        session.cancel_all_timers();
        for transfer in session.transfers.values() {
            if transfer.direction == TransferDirection::Receiving {
                let _ = self.chunk_store.delete_transfer(&transfer.transfer_id);
            }
            if transfer.artifact_surfaced {
                self.ui(UiCommand::ReleaseArtifact {
                    transfer_id: transfer.transfer_id.clone(),
                });
            }
        }
        drop(session);

        if self.pending_peer.as_deref() == Some(peer_id) {
            self.pending_peer = None;
            self.promote_next_pending();
        }
        self.ui(UiCommand::RemoveSessionEntry {
            peer_id: peer_id.to_string(),
        });
        if self.displayed_peer.as_deref() == Some(peer_id) {
            self.displayed_peer = None;
            self.ui(UiCommand::ShowDefaultView);
        }
    }

    /// Surface the oldest waiting inbound request, if any.
    fn promote_next_pending(&mut self) {
        let next = self
            .sessions
            .values()
            .find(|s| s.state == SessionState::RequestReceived)
            .map(|s| s.peer_id.clone());
        if let Some(peer_id) = next {
            self.pending_peer = Some(peer_id.clone());
            self.ui(UiCommand::ShowIncomingRequestPane { peer_id });
        }
    }

    fn clear_pending(&mut self, peer_id: &str) {
        if self.pending_peer.as_deref() == Some(peer_id) {
            self.pending_peer = None;
            self.promote_next_pending();
        }
    }

    // ========================================================================
    // SMALL HELPERS
    // ========================================================================

    fn send<T: Serialize>(&self, message_type: MessageType, payload: &T) -> bool {
        match Envelope::new(message_type, payload) {
            Ok(envelope) => {
                let delivered = self.transport.send(&envelope);
                if !delivered {
                    tracing::warn!(?message_type, "transport refused frame");
                }
                delivered
            }
            Err(e) => {
                tracing::error!(?message_type, error = %e, "envelope serialization failed");
                false
            }
        }
    }

    fn send_session_end(&self, peer_id: &str) {
        let payload = self.routed(peer_id, |target_id, sender_id| SessionEndPayload {
            target_id,
            sender_id,
        });
        self.send(MessageType::SessionEnd, &payload);
    }

    /// Build a routed payload with `targetId` = peer and `senderId` = us.
    fn routed<T>(&self, peer_id: &str, build: impl FnOnce(String, String) -> T) -> T {
        let sender = self
            .registration
            .identifier()
            .unwrap_or_default()
            .to_string();
        build(peer_id.to_string(), sender)
    }

    fn transfer_mut(&mut self, peer_id: &str, transfer_id: &str) -> Option<&mut Transfer> {
        self.sessions
            .get_mut(peer_id)
            .and_then(|s| s.transfers.get_mut(transfer_id))
    }

    fn update_transfer_ui(&mut self, peer_id: &str, transfer_id: &str) {
        let update = self
            .sessions
            .get(peer_id)
            .and_then(|s| s.transfers.get(transfer_id))
            .map(|t| (t.status, t.progress_percent()));
        if let Some((status, progress)) = update {
            self.ui(UiCommand::UpdateFileTransferMessage {
                peer_id: peer_id.to_string(),
                transfer_id: transfer_id.to_string(),
                status,
                progress,
            });
        }
    }

    fn drop_transfer(&mut self, peer_id: &str, transfer_id: &str) {
        if let Some(session) = self.sessions.get_mut(peer_id) {
            session.transfers.remove(transfer_id);
        }
    }

    fn arm_session_timer(&mut self, peer_id: &str, kind: SessionTimerKind, deadline: Duration) {
        let tx = self.internal_tx.clone();
        let peer = peer_id.to_string();
        let fired_kind = kind.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            let _ = tx.send(InternalEvent::SessionTimer {
                peer_id: peer,
                timer: fired_kind,
            });
        });
        match self.sessions.get_mut(peer_id) {
            Some(session) => session.arm_timer(kind, handle),
            None => handle.abort(),
        }
    }

    fn push_system_message(&mut self, peer_id: &str, text: &str) {
        if let Some(session) = self.sessions.get_mut(peer_id) {
            session.push_history(ChatEntry::new("system", text, ChatKind::System));
        }
        self.ui(UiCommand::AddSystemMessage {
            peer_id: peer_id.to_string(),
            text: text.to_string(),
        });
    }

    fn session_info_line(&self, peer_id: &str) -> String {
        match self.sessions.get(peer_id) {
            Some(session) => format!(
                "Peer: {} | state: {} | verification code: {}",
                peer_id,
                session.state,
                session.sas_digits.as_deref().unwrap_or("n/a")
            ),
            None => "No session.".into(),
        }
    }

    fn notify_error(&self, text: &str) {
        self.ui(UiCommand::UpdateStatusBar {
            text: text.to_string(),
        });
    }

    fn ui(&self, command: UiCommand) {
        let _ = self.ui.send(command);
    }
}

// ============================================================================
// SLASH COMMANDS
// ============================================================================

enum ParsedInput {
    Plain,
    MeAction(String),
    End,
    Version,
    Info,
    Help,
    Unknown(String),
}

fn parse_command(text: &str) -> ParsedInput {
    let Some(rest) = text.strip_prefix('/') else {
        return ParsedInput::Plain;
    };
    let (command, args) = match rest.split_once(' ') {
        Some((command, args)) => (command, args.trim()),
        None => (rest, ""),
    };
    match command {
        "me" if !args.is_empty() => ParsedInput::MeAction(args.to_string()),
        "me" => ParsedInput::Unknown("me (usage: /me <action>)".into()),
        "end" => ParsedInput::End,
        "version" => ParsedInput::Version,
        "info" => ParsedInput::Info,
        "help" => ParsedInput::Help,
        other => ParsedInput::Unknown(other.to_string()),
    }
}

fn decode_chat(
    key: &crate::crypto::SessionKey,
    iv_b64: &str,
    data_b64: &str,
) -> Result<ChatPlaintext> {
    let iv = Iv::from_b64(iv_b64)?;
    let ciphertext = BASE64
        .decode(data_b64)
        .map_err(|e| Error::MalformedMessage(format!("chat base64: {}", e)))?;
    let plain = decrypt(key, &iv, &ciphertext, b"")?;
    serde_json::from_slice(&plain)
        .map_err(|e| Error::MalformedMessage(format!("chat payload: {}", e)))
}

fn terminal_reason(state: SessionState) -> &'static str {
    match state {
        SessionState::Denied => "The request was declined.",
        SessionState::RequestTimedOut => "The request went unanswered.",
        SessionState::HandshakeTimedOut => "Secure session setup timed out.",
        SessionState::SasDenied => "Verification code rejected.",
        SessionState::Cancelled => "The session was cancelled.",
        _ => "Session ended.",
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Transport stub that records every envelope it is asked to send.
    struct CaptureTransport {
        sent: Mutex<Vec<Envelope>>,
    }

    impl CaptureTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
            })
        }

        fn sent_types(&self) -> Vec<MessageType> {
            self.sent.lock().iter().map(|e| e.message_type).collect()
        }
    }

    impl TransportAdapter for CaptureTransport {
        fn send(&self, envelope: &Envelope) -> bool {
            self.sent.lock().push(envelope.clone());
            true
        }

        fn close(&self, _code: u16, _reason: &str) {}
    }

    fn registered_coordinator() -> (
        SessionCoordinator,
        Arc<CaptureTransport>,
        UnboundedReceiver<UiCommand>,
    ) {
        let transport = CaptureTransport::new();
        let (ui_tx, ui_rx) = mpsc::unbounded_channel();
        let mut coordinator = SessionCoordinator::new(
            EngineConfig::short(),
            transport.clone(),
            ui_tx,
        )
        .unwrap();

        coordinator.on_transport_status(TransportStatus::Connected);
        coordinator.register("alice");
        let confirm = Envelope::new(
            MessageType::Registered,
            &RegisteredPayload {
                identifier: "alice".into(),
                message: None,
            },
        )
        .unwrap();
        coordinator.on_transport_message(&confirm.to_json().unwrap());
        (coordinator, transport, ui_rx)
    }

    #[tokio::test]
    async fn test_registration_flow() {
        let (coordinator, transport, _ui) = registered_coordinator();
        assert_eq!(coordinator.local_identifier(), Some("alice"));
        assert_eq!(transport.sent_types(), vec![MessageType::Register]);
    }

    #[tokio::test]
    async fn test_registration_timeout_fails() {
        let transport = CaptureTransport::new();
        let (ui_tx, _ui_rx) = mpsc::unbounded_channel();
        let mut coordinator =
            SessionCoordinator::new(EngineConfig::short(), transport, ui_tx).unwrap();

        coordinator.on_transport_status(TransportStatus::Connected);
        coordinator.register("alice");

        let event = tokio::time::timeout(Duration::from_secs(1), coordinator.next_internal())
            .await
            .expect("timer should fire")
            .unwrap();
        coordinator.handle_internal_event(event);

        assert_eq!(
            *coordinator.registration_state(),
            RegistrationState::FailedRegistration
        );
    }

    #[tokio::test]
    async fn test_initiate_requires_registration() {
        let transport = CaptureTransport::new();
        let (ui_tx, _ui_rx) = mpsc::unbounded_channel();
        let mut coordinator =
            SessionCoordinator::new(EngineConfig::short(), transport.clone(), ui_tx).unwrap();

        coordinator.initiate("bob");
        assert_eq!(coordinator.session_count(), 0);
        assert!(transport.sent_types().is_empty());
    }

    #[tokio::test]
    async fn test_initiate_rejects_self() {
        let (mut coordinator, transport, _ui) = registered_coordinator();
        coordinator.initiate("alice");
        assert_eq!(coordinator.session_count(), 0);
        // Only the Type 0 registration frame was sent.
        assert_eq!(transport.sent_types(), vec![MessageType::Register]);
    }

    #[tokio::test]
    async fn test_concurrent_initiations_rejected() {
        let (mut coordinator, transport, _ui) = registered_coordinator();

        coordinator.initiate("bob");
        assert_eq!(coordinator.session_count(), 1);

        // Second initiation while the first is in flight fails locally.
        coordinator.initiate("dave");
        assert_eq!(coordinator.session_count(), 1);
        assert!(coordinator.session("dave").is_none());

        let request_frames = transport
            .sent_types()
            .into_iter()
            .filter(|t| *t == MessageType::SessionRequest)
            .count();
        assert_eq!(request_frames, 1);
    }

    #[tokio::test]
    async fn test_duplicate_inbound_request_ignored() {
        let (mut coordinator, _transport, _ui) = registered_coordinator();

        let request = Envelope::new(
            MessageType::SessionRequest,
            &SessionRequestPayload {
                target_id: "alice".into(),
                sender_id: "bob".into(),
            },
        )
        .unwrap()
        .to_json()
        .unwrap();

        coordinator.on_transport_message(&request);
        assert_eq!(coordinator.session_count(), 1);
        assert_eq!(coordinator.pending_peer(), Some("bob"));

        coordinator.on_transport_message(&request);
        assert_eq!(coordinator.session_count(), 1);
    }

    #[tokio::test]
    async fn test_second_request_waits_for_first_decision() {
        let (mut coordinator, _transport, _ui) = registered_coordinator();

        for peer in ["bob", "carol"] {
            let request = Envelope::new(
                MessageType::SessionRequest,
                &SessionRequestPayload {
                    target_id: "alice".into(),
                    sender_id: peer.into(),
                },
            )
            .unwrap()
            .to_json()
            .unwrap();
            coordinator.on_transport_message(&request);
        }

        assert_eq!(coordinator.session_count(), 2);
        assert_eq!(coordinator.pending_peer(), Some("bob"));

        // Denying the surfaced request promotes the waiting one.
        coordinator.deny("bob");
        assert_eq!(coordinator.pending_peer(), Some("carol"));
    }

    #[tokio::test]
    async fn test_request_timeout_then_retry() {
        let (mut coordinator, transport, _ui) = registered_coordinator();

        coordinator.initiate("carol");
        let event = tokio::time::timeout(Duration::from_secs(1), coordinator.next_internal())
            .await
            .expect("request timer should fire")
            .unwrap();
        coordinator.handle_internal_event(event);

        assert_eq!(
            coordinator.session("carol").unwrap().state,
            SessionState::RequestTimedOut
        );

        coordinator.retry("carol");
        assert_eq!(
            coordinator.session("carol").unwrap().state,
            SessionState::InitiatingSession
        );
        let requests = transport
            .sent_types()
            .into_iter()
            .filter(|t| *t == MessageType::SessionRequest)
            .count();
        assert_eq!(requests, 2);
    }

    #[tokio::test]
    async fn test_user_not_found_marks_denied() {
        let (mut coordinator, _transport, _ui) = registered_coordinator();
        coordinator.initiate("ghost");

        let notice = Envelope::new(
            MessageType::UserNotFound,
            &UserNotFoundPayload {
                target_id: "ghost".into(),
                message: Some("User not found".into()),
            },
        )
        .unwrap()
        .to_json()
        .unwrap();
        coordinator.on_transport_message(&notice);

        let session = coordinator.session("ghost").unwrap();
        assert_eq!(session.state, SessionState::Denied);
        assert!(!session.has_timer(&SessionTimerKind::Request));
    }

    #[tokio::test]
    async fn test_empty_chat_dropped_silently() {
        let (mut coordinator, transport, _ui) = registered_coordinator();
        coordinator.send_chat("bob", "   ");
        assert_eq!(transport.sent_types(), vec![MessageType::Register]);
    }

    #[tokio::test]
    async fn test_chat_requires_active_session() {
        let (mut coordinator, transport, _ui) = registered_coordinator();
        coordinator.initiate("bob");
        coordinator.send_chat("bob", "hello");
        // No Type 8 left the building.
        assert!(!transport.sent_types().contains(&MessageType::ChatMessage));
    }

    #[tokio::test]
    async fn test_cancel_request_sends_end_and_removes() {
        let (mut coordinator, transport, _ui) = registered_coordinator();
        coordinator.initiate("bob");
        coordinator.cancel_request("bob");

        assert_eq!(coordinator.session_count(), 0);
        assert!(transport.sent_types().contains(&MessageType::SessionEnd));
    }

    #[tokio::test]
    async fn test_server_disconnect_resets_everything() {
        let (mut coordinator, _transport, _ui) = registered_coordinator();
        coordinator.initiate("bob");

        let disconnect = Envelope::new(
            MessageType::ServerDisconnect,
            &ServerDisconnectPayload {
                error: "rate limit exceeded".into(),
            },
        )
        .unwrap()
        .to_json()
        .unwrap();
        coordinator.on_transport_message(&disconnect);

        assert_eq!(coordinator.session_count(), 0);
        assert_eq!(
            *coordinator.registration_state(),
            RegistrationState::Disconnected
        );
    }

    #[tokio::test]
    async fn test_select_file_requires_active_session() {
        let (mut coordinator, transport, _ui) = registered_coordinator();
        let source = FileSource {
            name: "f.bin".into(),
            mime_type: "application/octet-stream".into(),
            data: vec![1, 2, 3],
        };
        assert!(coordinator.select_file("bob", source).is_none());
        assert!(!transport.sent_types().contains(&MessageType::FileOffer));
    }

    #[tokio::test]
    async fn test_unparseable_frames_ignored() {
        let (mut coordinator, _transport, _ui) = registered_coordinator();
        coordinator.on_transport_message("not json at all");
        coordinator.on_transport_message(r#"{"type":42,"payload":{}}"#);
        coordinator.on_transport_message(r#"{"type":8,"payload":{"missing":"fields"}}"#);
        // Still alive and registered.
        assert_eq!(coordinator.local_identifier(), Some("alice"));
    }

    #[test]
    fn test_parse_command_table() {
        assert!(matches!(parse_command("hello"), ParsedInput::Plain));
        assert!(matches!(parse_command("/end"), ParsedInput::End));
        assert!(matches!(parse_command("/version"), ParsedInput::Version));
        assert!(matches!(parse_command("/help"), ParsedInput::Help));
        assert!(matches!(parse_command("/info"), ParsedInput::Info));
        match parse_command("/me waves") {
            ParsedInput::MeAction(action) => assert_eq!(action, "waves"),
            _ => panic!("expected MeAction"),
        }
        assert!(matches!(parse_command("/bogus"), ParsedInput::Unknown(_)));
    }
}
