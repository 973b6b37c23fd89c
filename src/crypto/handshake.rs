//! Session key handshake.
//!
//! ```text
//! client                                           server
//!   -> {route:"handshake", request_id, session_id:0, key, wrapped}
//!   <- {route:"handshake", request_id, session_id:"<u64>"}
//! ```
//!
//! The client generates a random AES-128 key. On a confidential transport the
//! key travels as plain base64 inside the request; otherwise it is wrapped with
//! ECIES for the server's P-256 key. The server answers with the session id it
//! assigned, after which both sides seal every frame.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use p256::SecretKey;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::Value;

use crate::core::{HandshakeError, HANDSHAKE_ROUTE};

use super::{
    ecies::{unwrap_key, wrap_key, PeerPublicKey},
    Session, SessionId, SessionKey,
};

/// How the session key is delivered to the server.
#[derive(Debug, Clone)]
pub enum KeyTransport {
    /// Plain base64; the transport already encrypts and authenticates.
    Clear,
    /// ECIES-wrapped for the server's public key.
    Wrapped(PeerPublicKey),
}

impl KeyTransport {
    /// Pick the key transport for a connection.
    ///
    /// A confidential transport always sends the key in the clear, even when a
    /// peer key is known. A non-confidential one requires the peer key.
    pub fn select(
        transport_confidential: bool,
        peer_key: Option<&PeerPublicKey>,
    ) -> Result<Self, HandshakeError> {
        match (transport_confidential, peer_key) {
            (true, _) => Ok(KeyTransport::Clear),
            (false, Some(key)) => Ok(KeyTransport::Wrapped(key.clone())),
            (false, None) => Err(HandshakeError::MissingPeerKey),
        }
    }
}

/// Handshake request message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    /// Always [`HANDSHAKE_ROUTE`].
    pub route: String,
    /// Request id the response is correlated with.
    pub request_id: u8,
    /// Placeholder, always zero.
    pub session_id: u64,
    /// Base64 of the raw key or of the ECIES output.
    pub key: String,
    /// Whether `key` is ECIES-wrapped.
    pub wrapped: bool,
}

impl HandshakeRequest {
    /// Serialize to JSON bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Client side of an in-flight handshake.
#[derive(Debug)]
pub struct HandshakeInitiator {
    key: SessionKey,
    request_id: u8,
}

impl HandshakeInitiator {
    /// Generate a session key and build the key-exchange message.
    pub fn begin(
        request_id: u8,
        transport: &KeyTransport,
    ) -> Result<(Self, HandshakeRequest), HandshakeError> {
        let key = SessionKey::generate();
        let (encoded, wrapped) = match transport {
            KeyTransport::Clear => (key.to_base64(), false),
            KeyTransport::Wrapped(peer) => (BASE64.encode(wrap_key(peer, key.as_bytes())?), true),
        };

        let request = HandshakeRequest {
            route: HANDSHAKE_ROUTE.to_string(),
            request_id,
            session_id: 0,
            key: encoded,
            wrapped,
        };
        Ok((Self { key, request_id }, request))
    }

    /// Request id used for this handshake.
    pub fn request_id(&self) -> u8 {
        self.request_id
    }

    /// Finish with the id the server assigned.
    pub fn complete(self, session_id: SessionId) -> Session {
        let mut session = Session::with_key(self.key);
        session.complete_handshake(session_id);
        session
    }
}

/// Top-level `session_id` of a handshake response, kept as raw JSON text.
#[derive(Deserialize)]
struct RawResponse<'a> {
    #[serde(borrow, default)]
    session_id: Option<&'a RawValue>,
}

/// Extract `session_id` from a handshake response.
///
/// Only the top-level key counts. Its raw text is read first so ids above
/// 2^53 survive regardless of whether the server quoted them; structured
/// parsing is the fallback.
pub fn parse_session_id(raw: &[u8]) -> Result<SessionId, HandshakeError> {
    let response: RawResponse<'_> = serde_json::from_slice(raw)
        .map_err(|e| HandshakeError::MalformedResponse(e.to_string()))?;
    let field = response
        .session_id
        .ok_or_else(|| HandshakeError::MalformedResponse("missing session_id".into()))?;

    session_id_from_text(field.get())
        .or_else(|| {
            serde_json::from_str::<Value>(field.get())
                .ok()
                .as_ref()
                .and_then(session_id_from_value)
        })
        .map(SessionId)
        .ok_or_else(|| {
            HandshakeError::MalformedResponse(format!("invalid session_id {}", field.get()))
        })
}

/// Lossless text path: the raw value is a bare or quoted run of digits.
pub(crate) fn session_id_from_text(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    let digits = raw
        .strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .unwrap_or(raw);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Structured fallback: a JSON string of digits or an exact unsigned integer.
pub(crate) fn session_id_from_value(value: &Value) -> Option<u64> {
    match value {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

/// Server side of the handshake, used by peers and tests.
#[derive(Debug)]
pub struct HandshakeResponder;

impl HandshakeResponder {
    /// Recover the client's session key from a handshake request.
    pub fn accept(
        request: &HandshakeRequest,
        secret: Option<&SecretKey>,
    ) -> Result<SessionKey, HandshakeError> {
        let decoded = BASE64
            .decode(&request.key)
            .map_err(|e| HandshakeError::MalformedResponse(e.to_string()))?;

        if request.wrapped {
            let secret = secret.ok_or(HandshakeError::MissingPeerKey)?;
            let key = unwrap_key(secret, &decoded)?;
            Ok(SessionKey::from_slice(key.as_slice())?)
        } else {
            Ok(SessionKey::from_slice(&decoded)?)
        }
    }

    /// Build the response message, quoting the id as a string.
    pub fn response(request_id: u8, session_id: SessionId) -> Vec<u8> {
        serde_json::json!({
            "route": HANDSHAKE_ROUTE,
            "request_id": request_id,
            "session_id": session_id.0.to_string(),
        })
        .to_string()
        .into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn test_confidential_transport_sends_key_in_clear() {
        let secret = SecretKey::random(&mut OsRng);
        let peer = PeerPublicKey::from(secret.public_key());

        let transport = KeyTransport::select(true, Some(&peer)).unwrap();
        assert!(matches!(transport, KeyTransport::Clear));

        let (initiator, request) = HandshakeInitiator::begin(3, &transport).unwrap();
        assert!(!request.wrapped);
        assert_eq!(request.session_id, 0);
        assert_eq!(request.route, HANDSHAKE_ROUTE);
        assert_eq!(request.key, initiator.key.to_base64());
        assert_eq!(BASE64.decode(&request.key).unwrap().len(), 16);
    }

    #[test]
    fn test_plain_transport_wraps_key() {
        let secret = SecretKey::random(&mut OsRng);
        let peer = PeerPublicKey::from(secret.public_key());

        let transport = KeyTransport::select(false, Some(&peer)).unwrap();
        let (initiator, request) = HandshakeInitiator::begin(9, &transport).unwrap();
        assert!(request.wrapped);
        assert_ne!(request.key, initiator.key.to_base64());

        let recovered = HandshakeResponder::accept(&request, Some(&secret)).unwrap();
        assert_eq!(recovered.as_bytes(), initiator.key.as_bytes());
    }

    #[test]
    fn test_plain_transport_without_peer_key_is_refused() {
        assert!(matches!(
            KeyTransport::select(false, None),
            Err(HandshakeError::MissingPeerKey)
        ));
    }

    #[test]
    fn test_request_json_shape() {
        let (_, request) = HandshakeInitiator::begin(1, &KeyTransport::Clear).unwrap();
        let value: Value = serde_json::from_slice(&request.to_bytes().unwrap()).unwrap();
        assert_eq!(value["route"], "handshake");
        assert_eq!(value["request_id"], 1);
        assert_eq!(value["session_id"], 0);
        assert!(value["key"].is_string());
    }

    #[test]
    fn test_session_id_text_path_keeps_precision() {
        // 2^63 + 1 is not representable as f64
        let raw = br#"{"route":"handshake","session_id":9223372036854775809}"#;
        assert_eq!(parse_session_id(raw).unwrap(), SessionId(9_223_372_036_854_775_809));

        let quoted = br#"{"route":"handshake", "session_id" : "18446744073709551615"}"#;
        assert_eq!(parse_session_id(quoted).unwrap(), SessionId(u64::MAX));
    }

    #[test]
    fn test_session_id_only_reads_top_level_key() {
        let raw = br#"{"route":"handshake","request_id":1,"data":{"session_id":"1"},"session_id":"2"}"#;
        assert_eq!(parse_session_id(raw).unwrap(), SessionId(2));

        let in_string = br#"{"route":"handshake","data":"\"session_id\":5","session_id":6}"#;
        assert_eq!(parse_session_id(in_string).unwrap(), SessionId(6));

        let nested_only = br#"{"route":"handshake","data":{"session_id":"3"}}"#;
        assert!(parse_session_id(nested_only).is_err());

        let duplicated = br#"{"route":"handshake","session_id":"1","session_id":"2"}"#;
        assert!(parse_session_id(duplicated).is_err());
    }

    #[test]
    fn test_session_id_structured_fallback() {
        // padded string defeats the digit scanner
        let raw = br#"{"route":"handshake","session_id":" 77 "}"#;
        assert_eq!(parse_session_id(raw).unwrap(), SessionId(77));
    }

    #[test]
    fn test_session_id_rejects_garbage() {
        assert!(parse_session_id(br#"{"session_id":"abc"}"#).is_err());
        assert!(parse_session_id(br#"{"session_id":-4}"#).is_err());
        assert!(parse_session_id(b"\xff\xfe").is_err());
        assert!(parse_session_id(br#"{"route":"handshake"}"#).is_err());
    }

    #[test]
    fn test_responder_completes_matching_session() {
        let (initiator, request) = HandshakeInitiator::begin(4, &KeyTransport::Clear).unwrap();
        let key = HandshakeResponder::accept(&request, None).unwrap();
        let mut server = Session::responder(key, SessionId(500));

        let response = HandshakeResponder::response(request.request_id, SessionId(500));
        let client = initiator.complete(parse_session_id(&response).unwrap());
        assert!(client.is_ready());

        let sealed = server.encrypt(b"welcome").unwrap();
        assert_eq!(client.decrypt(&sealed).unwrap().unwrap(), b"welcome");
    }
}
