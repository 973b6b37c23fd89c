//! Server identity and per-identity connection state.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable logical key for a configured server.
///
/// Distinct from the literal transport address, which may be rewritten with a
/// TLS policy prefix. Every per-server registry and cache is keyed by this.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerIdentity(String);

impl ServerIdentity {
    /// Create an identity from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ServerIdentity {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ServerIdentity {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Lifecycle state of one subsystem for one server identity.
///
/// The connection registry and the event stream client track this
/// independently; they may disagree for the same server at the same time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Nothing open.
    #[default]
    Idle,
    /// Transport open, key exchange in flight.
    Handshaking,
    /// Session established.
    Ready,
    /// Push channel unusable; refreshing by polling.
    DegradedPolling,
    /// Explicitly closed.
    Closed,
}

impl ConnectionState {
    /// Short user-facing summary.
    pub fn status_line(self) -> &'static str {
        match self {
            ConnectionState::Idle => "Not connected",
            ConnectionState::Handshaking => "Connecting…",
            ConnectionState::Ready => "Connected",
            ConnectionState::DegradedPolling => "Connected (polling)",
            ConnectionState::Closed => "Disconnected",
        }
    }

    /// Whether application traffic can flow.
    pub fn is_usable(self) -> bool {
        matches!(self, ConnectionState::Ready | ConnectionState::DegradedPolling)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.status_line())
    }
}
