//! Push channel messages.
//!
//! Every message is a JSON object tagged by `"type"`.
//!
//! Outbound:
//! ```text
//! {"type":"auth","api_version":1,"access_token":"..","device_id":"..","resume":{"last_event_id":"42"}}
//! {"type":"reauth","access_token":".."}
//! {"type":"ping"}
//! ```
//!
//! Inbound: `event`, `auth.ok`, `reauth.ok`, `pong`, `resume.failed`,
//! `<command>.err` and any other `<command>.ok` ack.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::error::{StreamError, StreamResult};

/// Opaque, ordered event identifier.
///
/// Two ids made only of ASCII digits compare as unbounded decimal integers,
/// two other ids compare bytewise, and a numeric id sorts before any
/// non-numeric one. Equality follows the same rule, so `"007"` equals `"7"`.
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    /// Create an id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn numeric(&self) -> Option<&str> {
        if !self.0.is_empty() && self.0.bytes().all(|b| b.is_ascii_digit()) {
            let trimmed = self.0.trim_start_matches('0');
            Some(if trimmed.is_empty() { "0" } else { trimmed })
        } else {
            None
        }
    }
}

impl Ord for EventId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.numeric(), other.numeric()) {
            (Some(a), Some(b)) => a.len().cmp(&b.len()).then_with(|| a.cmp(b)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.0.as_bytes().cmp(other.0.as_bytes()),
        }
    }
}

impl PartialOrd for EventId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for EventId {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for EventId {}

impl Hash for EventId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.numeric().unwrap_or(&self.0).hash(state);
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl<'de> Deserialize<'de> for EventId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(u64),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(s) => EventId(s),
            Raw::Number(n) => EventId(n.to_string()),
        })
    }
}

/// Resume request carried by `auth`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resume {
    /// Last event applied locally.
    pub last_event_id: EventId,
}

/// Commands sent to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Command {
    /// Authenticate, optionally resuming after a cursor.
    Auth {
        /// Push protocol version.
        api_version: u32,
        /// Access credential.
        access_token: String,
        /// Stable device identifier.
        device_id: String,
        /// Resume point, if a cursor exists.
        #[serde(skip_serializing_if = "Option::is_none")]
        resume: Option<Resume>,
    },
    /// Replace the credential of a live session.
    Reauth {
        /// New access credential.
        access_token: String,
    },
    /// Heartbeat.
    Ping,
}

impl Command {
    /// Serialize to a JSON string.
    pub fn to_json(&self) -> StreamResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// A pushed event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PushEvent {
    /// Ordered id, the resume cursor.
    pub event_id: EventId,
    /// Event kind, e.g. `message.created`.
    pub event_type: String,
    /// Server timestamp, as sent.
    #[serde(default)]
    pub server_time: Value,
    /// Event body.
    #[serde(default)]
    pub payload: Value,
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Pushed event.
    Event(PushEvent),
    /// Authentication accepted.
    AuthOk,
    /// Credential refresh accepted.
    ReauthOk,
    /// Heartbeat answer.
    Pong,
    /// The server cannot resume from the requested cursor.
    ResumeFailed {
        /// Why, if given.
        reason: Option<String>,
    },
    /// A command was rejected.
    CommandError {
        /// Command name, e.g. `auth`.
        command: String,
        /// `reason` or `message`, if given.
        reason: Option<String>,
    },
    /// Any other command ack.
    Ack {
        /// Command name.
        command: String,
    },
    /// Unrecognized message type.
    Unknown(String),
}

impl ServerMessage {
    /// Decode one inbound message.
    pub fn parse(text: &str) -> StreamResult<Self> {
        let value: Value = serde_json::from_str(text)?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| StreamError::Protocol("missing type".into()))?
            .to_string();
        let text_field = |name: &str| value.get(name).and_then(Value::as_str).map(str::to_string);

        Ok(match kind.as_str() {
            "event" => ServerMessage::Event(serde_json::from_value(value.clone())?),
            "auth.ok" => ServerMessage::AuthOk,
            "reauth.ok" => ServerMessage::ReauthOk,
            "pong" => ServerMessage::Pong,
            "resume.failed" => ServerMessage::ResumeFailed {
                reason: text_field("reason"),
            },
            other => {
                if let Some(command) = other.strip_suffix(".err") {
                    ServerMessage::CommandError {
                        command: command.to_string(),
                        reason: text_field("reason").or_else(|| text_field("message")),
                    }
                } else if let Some(command) = other.strip_suffix(".ok") {
                    ServerMessage::Ack {
                        command: command.to_string(),
                    }
                } else {
                    ServerMessage::Unknown(other.to_string())
                }
            }
        })
    }

    /// Whether this rejects the credential.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, ServerMessage::CommandError { command, .. } if Self::is_auth_command(command))
    }

    /// Whether `command` carries the credential, so its `.err` rejects it.
    pub fn is_auth_command(command: &str) -> bool {
        command == "auth" || command == "reauth"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_id_numeric_ordering() {
        assert!(EventId::from("9") < EventId::from("10"));
        assert!(EventId::from("100") > EventId::from("99"));
        assert_eq!(EventId::from("007"), EventId::from("7"));
        assert!(
            EventId::from("340282366920938463463374607431768211456")
                > EventId::from("340282366920938463463374607431768211455")
        );
    }

    #[test]
    fn test_event_id_lexical_fallback() {
        assert!(EventId::from("evt-b") > EventId::from("evt-a"));
        assert!(EventId::from("10a") < EventId::from("9a"));
    }

    #[test]
    fn test_event_id_mixed_formats_stay_transitive() {
        let (padded, plain, mixed) = (EventId::from("07"), EventId::from("7"), EventId::from("08a"));
        assert_eq!(padded, plain);
        assert!(padded < mixed);
        assert!(plain < mixed);
        assert!(EventId::from("99999") < EventId::from(""));

        let mut ids: Vec<EventId> = ["b", "10", "a", "9", "010"].into_iter().map(EventId::from).collect();
        ids.sort();
        let sorted: Vec<&str> = ids.iter().map(EventId::as_str).collect();
        assert_eq!(sorted, ["9", "10", "010", "a", "b"]);
    }

    #[test]
    fn test_event_id_from_number() {
        let id: EventId = serde_json::from_value(json!(42)).unwrap();
        assert_eq!(id, EventId::from("42"));
    }

    #[test]
    fn test_auth_command_shape() {
        let auth = Command::Auth {
            api_version: 1,
            access_token: "tok".into(),
            device_id: "dev-1".into(),
            resume: Some(Resume {
                last_event_id: "42".into(),
            }),
        };
        let value: Value = serde_json::from_str(&auth.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "auth",
                "api_version": 1,
                "access_token": "tok",
                "device_id": "dev-1",
                "resume": {"last_event_id": "42"},
            })
        );

        let fresh = Command::Auth {
            api_version: 1,
            access_token: "tok".into(),
            device_id: "dev-1".into(),
            resume: None,
        };
        let value: Value = serde_json::from_str(&fresh.to_json().unwrap()).unwrap();
        assert!(value.get("resume").is_none());

        assert_eq!(Command::Ping.to_json().unwrap(), r#"{"type":"ping"}"#);
        let reauth = Command::Reauth {
            access_token: "t2".into(),
        };
        assert_eq!(reauth.to_json().unwrap(), r#"{"type":"reauth","access_token":"t2"}"#);
    }

    #[test]
    fn test_parse_inbound() {
        let event = ServerMessage::parse(
            r#"{"type":"event","event_id":"43","event_type":"message.created","server_time":"2024-01-01T00:00:00Z","payload":{"id":1}}"#,
        )
        .unwrap();
        match event {
            ServerMessage::Event(ev) => {
                assert_eq!(ev.event_id, EventId::from("43"));
                assert_eq!(ev.event_type, "message.created");
                assert_eq!(ev.payload, json!({"id": 1}));
            }
            other => panic!("unexpected {other:?}"),
        }

        assert_eq!(ServerMessage::parse(r#"{"type":"auth.ok"}"#).unwrap(), ServerMessage::AuthOk);
        assert_eq!(ServerMessage::parse(r#"{"type":"pong"}"#).unwrap(), ServerMessage::Pong);
        assert_eq!(
            ServerMessage::parse(r#"{"type":"resume.failed","reason":"gap"}"#).unwrap(),
            ServerMessage::ResumeFailed {
                reason: Some("gap".into())
            }
        );
        assert_eq!(
            ServerMessage::parse(r#"{"type":"subscribe.ok"}"#).unwrap(),
            ServerMessage::Ack {
                command: "subscribe".into()
            }
        );
        assert_eq!(
            ServerMessage::parse(r#"{"type":"mystery"}"#).unwrap(),
            ServerMessage::Unknown("mystery".into())
        );
    }

    #[test]
    fn test_parse_errors() {
        let err = ServerMessage::parse(r#"{"type":"reauth.err","message":"expired"}"#).unwrap();
        assert_eq!(
            err,
            ServerMessage::CommandError {
                command: "reauth".into(),
                reason: Some("expired".into())
            }
        );
        assert!(err.is_auth_failure());

        let other = ServerMessage::parse(r#"{"type":"subscribe.err","reason":"nope"}"#).unwrap();
        assert!(!other.is_auth_failure());

        assert!(ServerMessage::parse(r#"{"event_id":"1"}"#).is_err());
        assert!(ServerMessage::parse(r#"{"type":"event"}"#).is_err());
        assert!(ServerMessage::parse("[]").is_err());
    }
}
