//! JSON envelope carried in every frame payload.
//!
//! ```text
//! {"route": "...", "request_id": 0..255, "session_id": "...", "data": ...}
//! ```
//!
//! Inbound envelopes are decoded once into [`Inbound`] and matched
//! exhaustively by the connection.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{BROADCAST_ROUTE, HANDSHAKE_ROUTE};
use crate::crypto::{parse_session_id, SessionId};

use super::error::{TransportError, TransportResult};

/// Wire form of an envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Routing marker; `None` for plain responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    /// Correlation id; absent on broadcasts and notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u8>,
    /// Session id, only meaningful on the handshake route.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Value>,
    /// Application data.
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    /// Outbound request correlated by `request_id`.
    pub fn request(route: &str, request_id: u8, data: Value) -> Self {
        Self {
            route: Some(route.to_string()),
            request_id: Some(request_id),
            session_id: None,
            data,
        }
    }

    /// Outbound message that expects no reply.
    pub fn notify(route: &str, data: Value) -> Self {
        Self {
            route: Some(route.to_string()),
            data,
            ..Self::default()
        }
    }

    /// Serialize to JSON bytes.
    pub fn to_bytes(&self) -> TransportResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| TransportError::MalformedEnvelope(e.to_string()))
    }
}

/// A decoded inbound envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Handshake response naming the server-assigned session id.
    Handshake {
        /// Id of the handshake request, if echoed.
        request_id: Option<u8>,
        /// Server-assigned session id.
        session_id: SessionId,
    },
    /// Server push not tied to a request.
    Broadcast(Value),
    /// Reply to a multiplexed request.
    Response {
        /// Id the reply is addressed to.
        request_id: u8,
        /// Reply data.
        data: Value,
    },
}

impl Inbound {
    /// Decode a plaintext payload.
    ///
    /// Handshake responses take the session id from the raw text so large ids
    /// keep full precision.
    pub fn decode(raw: &[u8]) -> TransportResult<Self> {
        let envelope: Envelope = serde_json::from_slice(raw)
            .map_err(|e| TransportError::MalformedEnvelope(e.to_string()))?;

        match envelope.route.as_deref() {
            Some(HANDSHAKE_ROUTE) => Ok(Inbound::Handshake {
                request_id: envelope.request_id,
                session_id: parse_session_id(raw)?,
            }),
            Some(BROADCAST_ROUTE) => Ok(Inbound::Broadcast(envelope.data)),
            _ => match envelope.request_id {
                Some(request_id) => Ok(Inbound::Response {
                    request_id,
                    data: envelope.data,
                }),
                None => Err(TransportError::MalformedEnvelope(
                    "response without request_id".into(),
                )),
            },
        }
    }
}
