//! # Wire Protocol
//!
//! The relay envelope format and the numeric message-type table.
//!
//! ## Envelope
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      RELAY ENVELOPE FORMAT                              │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  { "type": <number>, "payload": { ... } }                               │
//! │                                                                         │
//! │  • type is numeric on the wire; 0.1, 0.2 and 7.1 are fractional        │
//! │  • payload fields are camelCase (targetId, senderId, publicKey, ...)   │
//! │  • all binary fields are strict base64                                 │
//! │  • unknown types and missing fields are ignored, never a disconnect    │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The relay never sees plaintext: every payload it routes between peers is
//! either handshake material or an opaque AES-GCM ciphertext.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// Every message type in the protocol, identified by its numeric wire code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// 0 — client registers an identifier
    Register,
    /// 0.1 — relay confirms registration
    Registered,
    /// 0.2 — relay rejects registration
    RegistrationError,
    /// −1 — relay reports the target identifier is unknown
    UserNotFound,
    /// −2 — relay is disconnecting this client
    ServerDisconnect,
    /// 1 — session request
    SessionRequest,
    /// 2 — session accept, carries the responder's public key
    SessionAccept,
    /// 3 — session deny
    SessionDeny,
    /// 4 — initiator's public key
    InitiatorKey,
    /// 5 — encrypted key-confirmation challenge
    KeyChallenge,
    /// 6 — encrypted challenge response
    KeyResponse,
    /// 7 — handshake established
    SessionEstablished,
    /// 7.1 — SAS confirmed by the sender
    SasConfirm,
    /// 8 — encrypted chat message
    ChatMessage,
    /// 9 — session end / cancel
    SessionEnd,
    /// 10 — typing started
    TypingStart,
    /// 11 — typing stopped
    TypingStop,
    /// 12 — file transfer offer
    FileOffer,
    /// 13 — file transfer accepted
    FileAccept,
    /// 14 — file transfer rejected
    FileReject,
    /// 15 — encrypted file chunk
    FileChunk,
    /// 16 — all chunks sent
    FileComplete,
    /// 17 — transfer failed / cancelled
    FileError,
}

impl MessageType {
    /// Every type, in wire-code order.
    pub const ALL: [MessageType; 23] = [
        MessageType::ServerDisconnect,
        MessageType::UserNotFound,
        MessageType::Register,
        MessageType::Registered,
        MessageType::RegistrationError,
        MessageType::SessionRequest,
        MessageType::SessionAccept,
        MessageType::SessionDeny,
        MessageType::InitiatorKey,
        MessageType::KeyChallenge,
        MessageType::KeyResponse,
        MessageType::SessionEstablished,
        MessageType::SasConfirm,
        MessageType::ChatMessage,
        MessageType::SessionEnd,
        MessageType::TypingStart,
        MessageType::TypingStop,
        MessageType::FileOffer,
        MessageType::FileAccept,
        MessageType::FileReject,
        MessageType::FileChunk,
        MessageType::FileComplete,
        MessageType::FileError,
    ];

    /// The numeric wire code for this type.
    pub fn as_wire(&self) -> f64 {
        match self {
            MessageType::Register => 0.0,
            MessageType::Registered => 0.1,
            MessageType::RegistrationError => 0.2,
            MessageType::UserNotFound => -1.0,
            MessageType::ServerDisconnect => -2.0,
            MessageType::SessionRequest => 1.0,
            MessageType::SessionAccept => 2.0,
            MessageType::SessionDeny => 3.0,
            MessageType::InitiatorKey => 4.0,
            MessageType::KeyChallenge => 5.0,
            MessageType::KeyResponse => 6.0,
            MessageType::SessionEstablished => 7.0,
            MessageType::SasConfirm => 7.1,
            MessageType::ChatMessage => 8.0,
            MessageType::SessionEnd => 9.0,
            MessageType::TypingStart => 10.0,
            MessageType::TypingStop => 11.0,
            MessageType::FileOffer => 12.0,
            MessageType::FileAccept => 13.0,
            MessageType::FileReject => 14.0,
            MessageType::FileChunk => 15.0,
            MessageType::FileComplete => 16.0,
            MessageType::FileError => 17.0,
        }
    }

    /// Parse a numeric wire code.
    ///
    /// Exact comparison is intentional: fractional codes originate from the
    /// same JSON literals on both ends and parse to identical doubles.
    pub fn from_wire(code: f64) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_wire() == code)
    }

    /// Whether the type is routed to a per-peer session
    /// (as opposed to manager-level registration/relay control).
    pub fn is_session_scoped(&self) -> bool {
        !matches!(
            self,
            MessageType::Register
                | MessageType::Registered
                | MessageType::RegistrationError
                | MessageType::UserNotFound
                | MessageType::ServerDisconnect
        )
    }

    /// Whether the type belongs to the file-transfer sub-protocol.
    pub fn is_file_transfer(&self) -> bool {
        matches!(
            self,
            MessageType::FileOffer
                | MessageType::FileAccept
                | MessageType::FileReject
                | MessageType::FileChunk
                | MessageType::FileComplete
                | MessageType::FileError
        )
    }
}

impl Serialize for MessageType {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let code = self.as_wire();
        // Integral codes go out as JSON integers, matching the wire table.
        if code.fract() == 0.0 {
            serializer.serialize_i64(code as i64)
        } else {
            serializer.serialize_f64(code)
        }
    }
}

impl<'de> Deserialize<'de> for MessageType {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let code = f64::deserialize(deserializer)?;
        MessageType::from_wire(code)
            .ok_or_else(|| de::Error::custom(format!("unknown message type {}", code)))
    }
}

/// A wire envelope: numeric type plus an untyped payload object.
///
/// The payload stays as raw JSON until the handler for the specific type
/// extracts its typed form; a payload that fails extraction is ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Numeric message type
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// Type-specific payload object
    pub payload: serde_json::Value,
}

impl Envelope {
    /// Build an envelope from a typed payload.
    pub fn new<T: Serialize>(message_type: MessageType, payload: &T) -> Result<Self> {
        Ok(Self {
            message_type,
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Extract the typed payload for this envelope's message type.
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| Error::MalformedMessage(format!("payload: {}", e)))
    }

    /// Serialize for the transport.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse an inbound frame.
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| Error::MalformedMessage(e.to_string()))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_integral_codes_serialize_as_integers() {
        let envelope = Envelope::new(
            MessageType::SessionRequest,
            &json!({"targetId": "bob", "senderId": "alice"}),
        )
        .unwrap();
        let raw = envelope.to_json().unwrap();
        assert!(raw.contains("\"type\":1"), "raw: {}", raw);
        assert!(!raw.contains("\"type\":1.0"), "raw: {}", raw);
    }

    #[test]
    fn test_fractional_codes_survive_round_trip() {
        for t in [
            MessageType::Registered,
            MessageType::RegistrationError,
            MessageType::SasConfirm,
        ] {
            let envelope = Envelope::new(t, &json!({})).unwrap();
            let raw = envelope.to_json().unwrap();
            let parsed = Envelope::from_json(&raw).unwrap();
            assert_eq!(parsed.message_type, t, "raw: {}", raw);
        }
    }

    #[test]
    fn test_sas_confirm_wire_code() {
        let envelope = Envelope::new(MessageType::SasConfirm, &json!({})).unwrap();
        let raw = envelope.to_json().unwrap();
        assert!(raw.contains("\"type\":7.1"), "raw: {}", raw);
    }

    #[test]
    fn test_negative_codes() {
        let raw = r#"{"type":-1,"payload":{"targetId":"carol","message":"not found"}}"#;
        let envelope = Envelope::from_json(raw).unwrap();
        assert_eq!(envelope.message_type, MessageType::UserNotFound);

        let raw = r#"{"type":-2,"payload":{"error":"rate limit exceeded"}}"#;
        let envelope = Envelope::from_json(raw).unwrap();
        assert_eq!(envelope.message_type, MessageType::ServerDisconnect);
    }

    #[test]
    fn test_all_codes_round_trip() {
        for t in MessageType::ALL {
            assert_eq!(MessageType::from_wire(t.as_wire()), Some(t));
        }
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(MessageType::from_wire(42.0).is_none());
        assert!(Envelope::from_json(r#"{"type":42,"payload":{}}"#).is_err());
    }

    #[test]
    fn test_session_scoping() {
        assert!(MessageType::SessionRequest.is_session_scoped());
        assert!(MessageType::FileChunk.is_session_scoped());
        assert!(!MessageType::Register.is_session_scoped());
        assert!(!MessageType::ServerDisconnect.is_session_scoped());
    }

    #[test]
    fn test_file_transfer_classification() {
        assert!(MessageType::FileOffer.is_file_transfer());
        assert!(MessageType::FileError.is_file_transfer());
        assert!(!MessageType::ChatMessage.is_file_transfer());
    }

    #[test]
    fn test_malformed_frame_rejected() {
        assert!(Envelope::from_json("not json").is_err());
        assert!(Envelope::from_json(r#"{"payload":{}}"#).is_err());
    }
}
