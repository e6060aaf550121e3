//! # Handshake Engine
//!
//! The deterministic transition table for the handshake and SAS states.
//!
//! Every handler consumes the session plus one inbound message or local
//! event, performs the crypto for that step, advances the state machine,
//! and returns a list of [`HandshakeAction`] records. The coordinator's
//! executor is exhaustive over the action set; nothing here touches the
//! transport, the UI, or timers directly.
//!
//! ## Contract
//!
//! - A message arriving in the wrong state or for the wrong role returns
//!   `Err(InvalidSessionState)`; the coordinator logs and ignores it.
//! - A cryptographic failure (bad key, tag mismatch, challenge mismatch)
//!   returns `Ok` with a single `Reset` action: the session terminates,
//!   the connection does not.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use crate::crypto::{
    decrypt, derive_sas, derive_session_key, encrypt, random_challenge, EphemeralKeyPair, Iv,
    PeerPublicKey,
};
use crate::error::{Error, Result};
use crate::session::{Role, Session, SessionState};

/// The action records produced by handshake handlers.
///
/// Send* variants carry only the step-specific fields; the coordinator
/// wraps them with routing ids and builds the wire envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum HandshakeAction {
    /// Send Type 2 with our public key (responder accepted)
    SendAccept {
        /// Our SPKI public key, base64
        public_key: String,
    },
    /// Send Type 4 with our public key (initiator)
    SendInitiatorKey {
        /// Our SPKI public key, base64
        public_key: String,
    },
    /// Send Type 5, the encrypted key-confirmation challenge
    SendChallenge {
        /// Fresh IV, base64
        iv: String,
        /// Encrypted challenge, base64
        encrypted_challenge: String,
    },
    /// Send Type 6, the re-encrypted challenge
    SendChallengeResponse {
        /// Fresh IV, base64
        iv: String,
        /// Encrypted response, base64
        encrypted_response: String,
    },
    /// Send Type 7 (handshake established)
    SendEstablished,
    /// Send Type 7.1 (we confirmed the SAS)
    SendSasConfirm,
    /// Present the SAS digits to the user
    ShowSas {
        /// The derived decimal digits
        sas_digits: String,
    },
    /// The peer confirmed the SAS; surface it
    PeerSasConfirmed,
    /// Both sides confirmed; the session is now Active
    Activated,
    /// Terminate the session
    Reset {
        /// Human-readable reason
        reason: String,
        /// Whether to send Type 9 to the peer
        notify_peer: bool,
    },
    /// (Re)arm the per-step handshake deadline
    RestartHandshakeTimer,
    /// Disarm the handshake deadline (session went Active)
    CancelHandshakeTimer,
}

fn wrong_state(session: &Session, operation: &str) -> Error {
    Error::InvalidSessionState {
        state: session.state.name().into(),
        operation: operation.into(),
    }
}

fn reset(reason: impl Into<String>) -> Vec<HandshakeAction> {
    vec![HandshakeAction::Reset {
        reason: reason.into(),
        notify_peer: false,
    }]
}

/// Compute and record the SAS once both public keys are known.
fn compute_sas(session: &mut Session) -> Result<String> {
    let own = session
        .keys
        .as_ref()
        .ok_or_else(|| Error::Internal("SAS requested before key generation".into()))?;
    let peer = session
        .peer_public_key
        .as_ref()
        .ok_or_else(|| Error::Internal("SAS requested before peer key import".into()))?;

    let digits = derive_sas(own.public_spki_b64(), peer.spki_b64());
    session.sas_digits = Some(digits.clone());
    Ok(digits)
}

// ============================================================================
// LOCAL EVENTS
// ============================================================================

/// Local initiation: generate our ephemeral keypair.
///
/// The caller has created the session in `InitiatingSession`; the request
/// message itself carries no key, so the only work here is key generation.
pub fn begin_initiation(session: &mut Session) -> Result<()> {
    if session.role != Role::Initiator || session.state != SessionState::InitiatingSession {
        return Err(wrong_state(session, "begin_initiation"));
    }
    session.keys = Some(EphemeralKeyPair::generate()?);
    Ok(())
}

/// The local user accepted an inbound request.
///
/// `RequestReceived → GeneratingAcceptKeys → AwaitingInitiatorKey`,
/// sending Type 2 with our fresh public key.
pub fn local_accept(session: &mut Session) -> Result<Vec<HandshakeAction>> {
    if session.role != Role::Responder || session.state != SessionState::RequestReceived {
        return Err(wrong_state(session, "accept"));
    }

    session.set_state(SessionState::GeneratingAcceptKeys);
    let keys = match EphemeralKeyPair::generate() {
        Ok(keys) => keys,
        Err(e) => return Ok(reset(format!("key generation failed: {}", e))),
    };
    let public_key = keys.public_spki_b64().to_string();
    session.keys = Some(keys);
    session.set_state(SessionState::AwaitingInitiatorKey);

    Ok(vec![
        HandshakeAction::SendAccept { public_key },
        HandshakeAction::RestartHandshakeTimer,
    ])
}

/// The local user confirmed the SAS digits.
///
/// Sends Type 7.1; goes Active if the peer already confirmed.
pub fn local_confirm_sas(session: &mut Session) -> Result<Vec<HandshakeAction>> {
    match session.state {
        SessionState::AwaitingSasVerification | SessionState::SasConfirmedPeer => {}
        _ => return Err(wrong_state(session, "confirm_sas")),
    }

    session.local_sas_confirmed = true;

    if session.peer_sas_confirmed {
        session.set_state(SessionState::Active);
        Ok(vec![
            HandshakeAction::SendSasConfirm,
            HandshakeAction::CancelHandshakeTimer,
            HandshakeAction::Activated,
        ])
    } else {
        session.set_state(SessionState::SasConfirmedLocal);
        Ok(vec![HandshakeAction::SendSasConfirm])
    }
}

// ============================================================================
// INBOUND MESSAGES
// ============================================================================

/// Type 2: the responder accepted and sent its public key.
///
/// Initiator only. Imports the key, derives the session key, and replies
/// with Type 4.
pub fn on_session_accept(
    session: &mut Session,
    peer_public_key_b64: &str,
) -> Result<Vec<HandshakeAction>> {
    if session.role != Role::Initiator || session.state != SessionState::InitiatingSession {
        return Err(wrong_state(session, "Type 2"));
    }

    session.set_state(SessionState::DerivingKeyInitiator);

    let peer_key = match PeerPublicKey::from_spki_b64(peer_public_key_b64) {
        Ok(key) => key,
        Err(e) => return Ok(reset(format!("peer key rejected: {}", e))),
    };

    let own = session
        .keys
        .as_ref()
        .ok_or_else(|| Error::Internal("initiator has no keypair".into()))?;
    let session_key = match derive_session_key(own, &peer_key) {
        Ok(key) => key,
        Err(e) => return Ok(reset(format!("key derivation failed: {}", e))),
    };

    let public_key = own.public_spki_b64().to_string();
    session.peer_public_key = Some(peer_key);
    session.session_key = Some(session_key);
    session.set_state(SessionState::AwaitingChallengeResponse);

    Ok(vec![
        HandshakeAction::SendInitiatorKey { public_key },
        HandshakeAction::RestartHandshakeTimer,
    ])
}

/// Type 4: the initiator's public key arrived.
///
/// Responder only. Derives the session key, then issues the encrypted
/// key-confirmation challenge (Type 5).
pub fn on_initiator_key(
    session: &mut Session,
    peer_public_key_b64: &str,
) -> Result<Vec<HandshakeAction>> {
    if session.role != Role::Responder || session.state != SessionState::AwaitingInitiatorKey {
        return Err(wrong_state(session, "Type 4"));
    }

    session.set_state(SessionState::DerivingKeyResponder);

    let peer_key = match PeerPublicKey::from_spki_b64(peer_public_key_b64) {
        Ok(key) => key,
        Err(e) => return Ok(reset(format!("peer key rejected: {}", e))),
    };

    let own = session
        .keys
        .as_ref()
        .ok_or_else(|| Error::Internal("responder has no keypair".into()))?;
    let session_key = match derive_session_key(own, &peer_key) {
        Ok(key) => key,
        Err(e) => return Ok(reset(format!("key derivation failed: {}", e))),
    };

    let challenge = random_challenge();
    let (iv, ciphertext) = match encrypt(&session_key, &challenge, b"") {
        Ok(sealed) => sealed,
        Err(e) => return Ok(reset(format!("challenge encryption failed: {}", e))),
    };

    session.peer_public_key = Some(peer_key);
    session.session_key = Some(session_key);
    session.challenge_sent = Some(challenge);
    session.set_state(SessionState::AwaitingChallengeResponse);

    Ok(vec![
        HandshakeAction::SendChallenge {
            iv: iv.to_b64(),
            encrypted_challenge: BASE64.encode(&ciphertext),
        },
        HandshakeAction::RestartHandshakeTimer,
    ])
}

/// Type 5: the encrypted challenge arrived.
///
/// Initiator only. Decrypts and echoes the challenge back under a fresh IV
/// (Type 6), proving we hold the same session key.
pub fn on_key_challenge(
    session: &mut Session,
    iv_b64: &str,
    encrypted_challenge_b64: &str,
) -> Result<Vec<HandshakeAction>> {
    if session.role != Role::Initiator || session.state != SessionState::AwaitingChallengeResponse {
        return Err(wrong_state(session, "Type 5"));
    }

    let key = session
        .session_key
        .as_ref()
        .ok_or_else(|| Error::Internal("challenge before key derivation".into()))?;

    let challenge = match decode_and_decrypt(key, iv_b64, encrypted_challenge_b64) {
        Ok(plain) => plain,
        Err(e) => return Ok(reset(format!("challenge decryption failed: {}", e))),
    };

    session.set_state(SessionState::ReceivedChallenge);

    let key = session
        .session_key
        .as_ref()
        .ok_or_else(|| Error::Internal("challenge before key derivation".into()))?;
    let (iv, ciphertext) = match encrypt(key, &challenge, b"") {
        Ok(sealed) => sealed,
        Err(e) => return Ok(reset(format!("response encryption failed: {}", e))),
    };

    session.set_state(SessionState::AwaitingFinalConfirmation);

    Ok(vec![
        HandshakeAction::SendChallengeResponse {
            iv: iv.to_b64(),
            encrypted_response: BASE64.encode(&ciphertext),
        },
        HandshakeAction::RestartHandshakeTimer,
    ])
}

/// Type 6: the challenge echo arrived.
///
/// Responder only. The decrypted response must equal the issued challenge
/// byte-exactly; any difference terminates the session. On success, Type 7
/// goes out and the SAS is derived and shown.
pub fn on_key_response(
    session: &mut Session,
    iv_b64: &str,
    encrypted_response_b64: &str,
) -> Result<Vec<HandshakeAction>> {
    if session.role != Role::Responder || session.state != SessionState::AwaitingChallengeResponse {
        return Err(wrong_state(session, "Type 6"));
    }

    let key = session
        .session_key
        .as_ref()
        .ok_or_else(|| Error::Internal("response before key derivation".into()))?;

    let response = match decode_and_decrypt(key, iv_b64, encrypted_response_b64) {
        Ok(plain) => plain,
        Err(e) => return Ok(reset(format!("response decryption failed: {}", e))),
    };

    let expected = session
        .challenge_sent
        .as_ref()
        .ok_or_else(|| Error::Internal("no challenge outstanding".into()))?;
    if &response != expected {
        return Ok(reset("key confirmation challenge mismatch"));
    }

    session.set_state(SessionState::HandshakeCompleteResponder);
    let sas_digits = compute_sas(session)?;
    session.set_state(SessionState::AwaitingSasVerification);

    Ok(vec![
        HandshakeAction::SendEstablished,
        HandshakeAction::ShowSas { sas_digits },
        HandshakeAction::RestartHandshakeTimer,
    ])
}

/// Type 7: handshake established.
///
/// Initiator only. Derives and shows the SAS.
pub fn on_established(session: &mut Session) -> Result<Vec<HandshakeAction>> {
    if session.role != Role::Initiator || session.state != SessionState::AwaitingFinalConfirmation {
        return Err(wrong_state(session, "Type 7"));
    }

    let sas_digits = compute_sas(session)?;
    session.set_state(SessionState::AwaitingSasVerification);

    Ok(vec![
        HandshakeAction::ShowSas { sas_digits },
        HandshakeAction::RestartHandshakeTimer,
    ])
}

/// Type 7.1: the peer confirmed the SAS.
pub fn on_sas_confirm(session: &mut Session) -> Result<Vec<HandshakeAction>> {
    match session.state {
        SessionState::AwaitingSasVerification => {
            session.peer_sas_confirmed = true;
            session.set_state(SessionState::SasConfirmedPeer);
            Ok(vec![HandshakeAction::PeerSasConfirmed])
        }
        SessionState::SasConfirmedLocal => {
            session.peer_sas_confirmed = true;
            session.set_state(SessionState::Active);
            Ok(vec![
                HandshakeAction::PeerSasConfirmed,
                HandshakeAction::CancelHandshakeTimer,
                HandshakeAction::Activated,
            ])
        }
        _ => Err(wrong_state(session, "Type 7.1")),
    }
}

fn decode_and_decrypt(
    key: &crate::crypto::SessionKey,
    iv_b64: &str,
    ciphertext_b64: &str,
) -> Result<Vec<u8>> {
    let iv = Iv::from_b64(iv_b64)?;
    let ciphertext = BASE64
        .decode(ciphertext_b64)
        .map_err(|e| Error::MalformedMessage(format!("Invalid ciphertext base64: {}", e)))?;
    decrypt(key, &iv, &ciphertext, b"")
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;

    fn initiator() -> Session {
        let mut session = Session::new("bob", Role::Initiator, SessionState::InitiatingSession);
        begin_initiation(&mut session).unwrap();
        session
    }

    fn responder() -> Session {
        Session::new("alice", Role::Responder, SessionState::RequestReceived)
    }

    /// Drive both sessions through the complete handshake, returning the
    /// SAS each side displayed.
    fn run_handshake(alice: &mut Session, bob: &mut Session) -> (String, String) {
        // Bob accepts → Type 2
        let actions = local_accept(bob).unwrap();
        let bob_pk = match &actions[0] {
            HandshakeAction::SendAccept { public_key } => public_key.clone(),
            other => panic!("expected SendAccept, got {:?}", other),
        };

        // Alice receives Type 2 → Type 4
        let actions = on_session_accept(alice, &bob_pk).unwrap();
        let alice_pk = match &actions[0] {
            HandshakeAction::SendInitiatorKey { public_key } => public_key.clone(),
            other => panic!("expected SendInitiatorKey, got {:?}", other),
        };

        // Bob receives Type 4 → Type 5
        let actions = on_initiator_key(bob, &alice_pk).unwrap();
        let (c_iv, c_ct) = match &actions[0] {
            HandshakeAction::SendChallenge {
                iv,
                encrypted_challenge,
            } => (iv.clone(), encrypted_challenge.clone()),
            other => panic!("expected SendChallenge, got {:?}", other),
        };

        // Alice receives Type 5 → Type 6
        let actions = on_key_challenge(alice, &c_iv, &c_ct).unwrap();
        let (r_iv, r_ct) = match &actions[0] {
            HandshakeAction::SendChallengeResponse {
                iv,
                encrypted_response,
            } => (iv.clone(), encrypted_response.clone()),
            other => panic!("expected SendChallengeResponse, got {:?}", other),
        };

        // Bob receives Type 6 → Type 7 + SAS
        let actions = on_key_response(bob, &r_iv, &r_ct).unwrap();
        assert_eq!(actions[0], HandshakeAction::SendEstablished);
        let bob_sas = match &actions[1] {
            HandshakeAction::ShowSas { sas_digits } => sas_digits.clone(),
            other => panic!("expected ShowSas, got {:?}", other),
        };

        // Alice receives Type 7 → SAS
        let actions = on_established(alice).unwrap();
        let alice_sas = match &actions[0] {
            HandshakeAction::ShowSas { sas_digits } => sas_digits.clone(),
            other => panic!("expected ShowSas, got {:?}", other),
        };

        (alice_sas, bob_sas)
    }

    #[test]
    fn test_full_handshake_reaches_sas() {
        let mut alice = initiator();
        let mut bob = responder();

        let (alice_sas, bob_sas) = run_handshake(&mut alice, &mut bob);

        assert_eq!(alice.state, SessionState::AwaitingSasVerification);
        assert_eq!(bob.state, SessionState::AwaitingSasVerification);
        assert_eq!(alice_sas, bob_sas);
        assert_eq!(alice_sas.len(), 6);
        assert!(alice.session_key.is_some());
        assert!(bob.session_key.is_some());
    }

    #[test]
    fn test_sas_confirmation_order_local_first() {
        let mut alice = initiator();
        let mut bob = responder();
        run_handshake(&mut alice, &mut bob);

        // Alice confirms first
        let actions = local_confirm_sas(&mut alice).unwrap();
        assert_eq!(actions, vec![HandshakeAction::SendSasConfirm]);
        assert_eq!(alice.state, SessionState::SasConfirmedLocal);

        // Bob receives her 7.1
        let actions = on_sas_confirm(&mut bob).unwrap();
        assert_eq!(actions, vec![HandshakeAction::PeerSasConfirmed]);
        assert_eq!(bob.state, SessionState::SasConfirmedPeer);

        // Bob confirms → Active
        let actions = local_confirm_sas(&mut bob).unwrap();
        assert!(actions.contains(&HandshakeAction::Activated));
        assert_eq!(bob.state, SessionState::Active);

        // Alice receives his 7.1 → Active
        let actions = on_sas_confirm(&mut alice).unwrap();
        assert!(actions.contains(&HandshakeAction::Activated));
        assert_eq!(alice.state, SessionState::Active);

        assert!(alice.local_sas_confirmed && alice.peer_sas_confirmed);
        assert!(bob.local_sas_confirmed && bob.peer_sas_confirmed);
    }

    #[test]
    fn test_tampered_challenge_response_resets() {
        let mut alice = initiator();
        let mut bob = responder();

        let actions = local_accept(&mut bob).unwrap();
        let bob_pk = match &actions[0] {
            HandshakeAction::SendAccept { public_key } => public_key.clone(),
            _ => unreachable!(),
        };
        let actions = on_session_accept(&mut alice, &bob_pk).unwrap();
        let alice_pk = match &actions[0] {
            HandshakeAction::SendInitiatorKey { public_key } => public_key.clone(),
            _ => unreachable!(),
        };
        let actions = on_initiator_key(&mut bob, &alice_pk).unwrap();
        let (c_iv, _) = match &actions[0] {
            HandshakeAction::SendChallenge {
                iv,
                encrypted_challenge,
            } => (iv.clone(), encrypted_challenge.clone()),
            _ => unreachable!(),
        };

        // Deliver garbage ciphertext as the Type 6 response
        let garbage = BASE64.encode([0u8; 48]);
        let actions = on_key_response(&mut bob, &c_iv, &garbage).unwrap();
        assert!(matches!(
            actions[0],
            HandshakeAction::Reset { .. }
        ));
    }

    #[test]
    fn test_wrong_state_is_protocol_violation() {
        let mut session = initiator();
        // Initiator can never receive a Type 4
        let result = on_initiator_key(&mut session, "irrelevant");
        assert!(matches!(
            result,
            Err(Error::InvalidSessionState { .. })
        ));
    }

    #[test]
    fn test_invalid_peer_key_resets() {
        let mut alice = initiator();
        let actions = on_session_accept(&mut alice, "AAAA").unwrap();
        assert!(matches!(actions[0], HandshakeAction::Reset { .. }));
    }

    #[test]
    fn test_fresh_handshakes_have_independent_keys() {
        let mut alice1 = initiator();
        let mut bob1 = responder();
        let (sas1, _) = run_handshake(&mut alice1, &mut bob1);

        let mut alice2 = initiator();
        let mut bob2 = responder();
        let (sas2, _) = run_handshake(&mut alice2, &mut bob2);

        // Ephemeral keys differ per session attempt, so the SAS differs too
        // (collision probability 10^-6; acceptable for a unit test).
        assert_ne!(sas1, sas2);
    }
}
