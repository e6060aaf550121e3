//! # Protocol Module
//!
//! The wire protocol spoken through the relay: the `{type, payload}` envelope,
//! the numeric message-type table, and the typed camelCase payloads.
//!
//! The relay is an opaque best-effort forwarder; it routes envelopes between
//! registered identifiers and never inspects payload contents.

mod payloads;
mod wire;

pub use payloads::{
    ChatMessagePayload, ChatPlaintext, FileChunkPayload, FileCompletePayload,
    FileDecisionPayload, FileErrorPayload, FileOfferPayload, InitiatorKeyPayload,
    KeyChallengePayload, KeyResponsePayload, RegisterPayload, RegisteredPayload,
    RegistrationErrorPayload, RoutingHeader, SasConfirmPayload, ServerDisconnectPayload,
    SessionAcceptPayload, SessionDenyPayload, SessionEndPayload, SessionEstablishedPayload,
    SessionRequestPayload, TypingPayload, UserNotFoundPayload,
};
pub use wire::{Envelope, MessageType};
