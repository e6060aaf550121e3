//! # Typed Payloads
//!
//! One struct per wire message type, with field names exactly as they appear
//! on the wire (camelCase). Deserialization failure of any payload causes the
//! coordinator to ignore that message; it never tears down the connection.

use serde::{Deserialize, Serialize};

// ============================================================================
// MANAGER-LEVEL PAYLOADS (registration / relay control)
// ============================================================================

/// Type 0 — register an identifier with the relay
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterPayload {
    /// The identifier the user wants to claim
    pub identifier: String,
}

/// Type 0.1 — relay confirms registration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredPayload {
    /// The identifier as the relay recorded it (authoritative)
    pub identifier: String,
    /// Human-readable confirmation
    #[serde(default)]
    pub message: Option<String>,
}

/// Type 0.2 — relay rejected registration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationErrorPayload {
    /// The identifier that was rejected, when the relay echoes it
    #[serde(default)]
    pub identifier: Option<String>,
    /// Why registration failed
    pub error: String,
}

/// Type −1 — the relay could not find the target identifier
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserNotFoundPayload {
    /// The identifier that was not found
    pub target_id: String,
    /// Human-readable explanation
    #[serde(default)]
    pub message: Option<String>,
}

/// Type −2 — the relay is disconnecting this client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerDisconnectPayload {
    /// Why the relay is closing the connection
    pub error: String,
}

// ============================================================================
// SESSION-ROUTED PAYLOADS
// ============================================================================

/// The routing fields shared by every session-scoped payload.
///
/// Parsed first so the coordinator can locate the session before the
/// type-specific handler extracts the full payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingHeader {
    /// The recipient's registered identifier
    pub target_id: String,
    /// The sender's registered identifier
    pub sender_id: String,
}

/// Type 1 — session request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequestPayload {
    /// The recipient's registered identifier
    pub target_id: String,
    /// The sender's registered identifier
    pub sender_id: String,
}

/// Type 2 — accept, carrying the responder's SPKI public key
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionAcceptPayload {
    /// The recipient's registered identifier
    pub target_id: String,
    /// The sender's registered identifier
    pub sender_id: String,
    /// Responder's public key, SPKI DER base64
    pub public_key: String,
}

/// Type 3 — deny a session request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDenyPayload {
    /// The recipient's registered identifier
    pub target_id: String,
    /// The sender's registered identifier
    pub sender_id: String,
}

/// Type 4 — initiator's SPKI public key
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiatorKeyPayload {
    /// The recipient's registered identifier
    pub target_id: String,
    /// The sender's registered identifier
    pub sender_id: String,
    /// Initiator's public key, SPKI DER base64
    pub public_key: String,
}

/// Type 5 — encrypted key-confirmation challenge
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyChallengePayload {
    /// The recipient's registered identifier
    pub target_id: String,
    /// The sender's registered identifier
    pub sender_id: String,
    /// AES-GCM IV, base64
    pub iv: String,
    /// Encrypted challenge bytes, base64
    pub encrypted_challenge: String,
}

/// Type 6 — encrypted challenge response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyResponsePayload {
    /// The recipient's registered identifier
    pub target_id: String,
    /// The sender's registered identifier
    pub sender_id: String,
    /// AES-GCM IV, base64
    pub iv: String,
    /// Re-encrypted challenge bytes, base64
    pub encrypted_response: String,
}

/// Type 7 — handshake established
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEstablishedPayload {
    /// The recipient's registered identifier
    pub target_id: String,
    /// The sender's registered identifier
    pub sender_id: String,
    /// Optional human-readable note
    #[serde(default)]
    pub message: Option<String>,
}

/// Type 7.1 — SAS confirmed by the sender
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SasConfirmPayload {
    /// The recipient's registered identifier
    pub target_id: String,
    /// The sender's registered identifier
    pub sender_id: String,
}

/// Type 8 — encrypted chat message
///
/// `data` decrypts to the JSON [`ChatPlaintext`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessagePayload {
    /// The recipient's registered identifier
    pub target_id: String,
    /// The sender's registered identifier
    pub sender_id: String,
    /// AES-GCM IV, base64
    pub iv: String,
    /// Ciphertext, base64
    pub data: String,
}

/// Type 9 — end or cancel the session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEndPayload {
    /// The recipient's registered identifier
    pub target_id: String,
    /// The sender's registered identifier
    pub sender_id: String,
}

/// Types 10 and 11 — typing start / stop
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    /// The recipient's registered identifier
    pub target_id: String,
    /// The sender's registered identifier
    pub sender_id: String,
}

/// The plaintext carried inside Type 8 ciphertext
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPlaintext {
    /// Whether this is an action-style ("/me") message
    pub is_action: bool,
    /// The message text
    pub text: String,
}

// ============================================================================
// FILE-TRANSFER PAYLOADS
// ============================================================================

/// Type 12 — offer a file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileOfferPayload {
    /// The recipient's registered identifier
    pub target_id: String,
    /// The sender's registered identifier
    pub sender_id: String,
    /// UUID of the transfer
    pub transfer_id: String,
    /// Original file name
    pub file_name: String,
    /// Total size in bytes
    pub file_size: u64,
    /// MIME type as reported by the sender
    pub file_type: String,
}

/// Types 13 and 14 — accept / reject an offer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDecisionPayload {
    /// The recipient's registered identifier
    pub target_id: String,
    /// The sender's registered identifier
    pub sender_id: String,
    /// UUID of the transfer
    pub transfer_id: String,
}

/// Type 15 — one encrypted chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChunkPayload {
    /// The recipient's registered identifier
    pub target_id: String,
    /// The sender's registered identifier
    pub sender_id: String,
    /// UUID of the transfer
    pub transfer_id: String,
    /// Zero-based chunk position
    pub chunk_index: u32,
    /// AES-GCM IV, base64
    pub iv: String,
    /// Ciphertext, base64
    pub data: String,
}

/// Type 16 — all chunks have been sent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileCompletePayload {
    /// The recipient's registered identifier
    pub target_id: String,
    /// The sender's registered identifier
    pub sender_id: String,
    /// UUID of the transfer
    pub transfer_id: String,
}

/// Type 17 — the transfer failed or was cancelled
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileErrorPayload {
    /// The recipient's registered identifier
    pub target_id: String,
    /// The sender's registered identifier
    pub sender_id: String,
    /// UUID of the transfer
    pub transfer_id: String,
    /// What went wrong
    pub error: String,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routing_fields_are_camel_case() {
        let payload = SessionRequestPayload {
            target_id: "bob".into(),
            sender_id: "alice".into(),
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("\"targetId\":\"bob\""));
        assert!(json.contains("\"senderId\":\"alice\""));
    }

    #[test]
    fn test_accept_carries_public_key() {
        let json = r#"{"targetId":"alice","senderId":"bob","publicKey":"MFkw..."}"#;
        let payload: SessionAcceptPayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.public_key, "MFkw...");
    }

    #[test]
    fn test_challenge_field_names() {
        let payload = KeyChallengePayload {
            target_id: "alice".into(),
            sender_id: "bob".into(),
            iv: "aXY=".into(),
            encrypted_challenge: "Y3Q=".into(),
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("\"encryptedChallenge\""));
        assert!(json.contains("\"iv\""));
    }

    #[test]
    fn test_routing_header_extracts_from_any_session_payload() {
        let json = r#"{"targetId":"alice","senderId":"bob","transferId":"t-1","chunkIndex":3,"iv":"aXY=","data":"ZGF0YQ=="}"#;
        let header: RoutingHeader = serde_json::from_str(json).unwrap();
        assert_eq!(header.sender_id, "bob");
        assert_eq!(header.target_id, "alice");
    }

    #[test]
    fn test_missing_field_is_an_error() {
        let json = r#"{"targetId":"alice"}"#;
        let result: Result<SessionRequestPayload, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn test_chat_plaintext_shape() {
        let plain = ChatPlaintext {
            is_action: true,
            text: "waves".into(),
        };
        let json = serde_json::to_string(&plain).unwrap();
        assert!(json.contains("\"isAction\":true"));

        let parsed: ChatPlaintext = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, plain);
    }

    #[test]
    fn test_file_offer_field_names() {
        let payload = FileOfferPayload {
            target_id: "bob".into(),
            sender_id: "alice".into(),
            transfer_id: "uuid-1".into(),
            file_name: "photo.png".into(),
            file_size: 700 * 1024,
            file_type: "image/png".into(),
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("\"transferId\""));
        assert!(json.contains("\"fileName\""));
        assert!(json.contains("\"fileSize\""));
        assert!(json.contains("\"fileType\""));
    }

    #[test]
    fn test_registration_error_identifier_is_optional() {
        let json = r#"{"error":"identifier taken"}"#;
        let payload: RegistrationErrorPayload = serde_json::from_str(json).unwrap();
        assert!(payload.identifier.is_none());
        assert_eq!(payload.error, "identifier taken");
    }
}
