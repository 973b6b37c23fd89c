//! Per-identity connection registry.
//!
//! ```text
//! Idle ──connect──▶ Handshaking ──ok──▶ Ready
//!   ▲                   │                 │
//!   └─────── failure ───┘                 │
//!   └──────────────── disconnect ─────────┘
//! ```
//!
//! A failed handshake removes the entry so a retry starts clean. Connecting
//! an identity that is already ready returns the existing connection.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::core::{ConnectionState, ServerIdentity};

use super::connection::{Connection, ConnectionConfig, EndpointConfig};
use super::error::{TransportError, TransportResult};
use super::host::TransportConnector;

enum Entry {
    Handshaking,
    Ready(Arc<Connection>),
}

/// Owns at most one connection per [`ServerIdentity`].
pub struct ConnectionRegistry {
    connector: Arc<dyn TransportConnector>,
    config: ConnectionConfig,
    entries: Mutex<HashMap<ServerIdentity, Entry>>,
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ConnectionRegistry {
    /// Create a registry opening transports through `connector`.
    pub fn new(connector: Arc<dyn TransportConnector>, config: ConnectionConfig) -> Self {
        Self {
            connector,
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Connect `endpoint`, or return its connection if already ready.
    ///
    /// Fails with [`TransportError::HandshakeInProgress`] if another connect
    /// for the same identity has not finished.
    pub async fn connect(&self, endpoint: &EndpointConfig) -> TransportResult<Arc<Connection>> {
        let identity = endpoint.identity.clone();
        let stale = {
            let mut entries = self.entries.lock().await;
            let stale = match entries.get(&identity) {
                Some(Entry::Ready(existing)) if existing.state() == ConnectionState::Ready => {
                    return Ok(existing.clone());
                }
                Some(Entry::Handshaking) => {
                    return Err(TransportError::HandshakeInProgress(identity.to_string()));
                }
                Some(Entry::Ready(closed)) => Some(closed.clone()),
                None => None,
            };
            entries.insert(identity.clone(), Entry::Handshaking);
            stale
        };
        if let Some(stale) = stale {
            stale.close().await;
        }

        info!(identity = %identity, "connecting");
        let result =
            Connection::establish(endpoint, self.config.clone(), self.connector.as_ref()).await;

        let mut entries = self.entries.lock().await;
        match result {
            Ok(connection) => {
                if !matches!(entries.get(&identity), Some(Entry::Handshaking)) {
                    drop(entries);
                    info!(identity = %identity, "disconnected during handshake");
                    connection.close().await;
                    return Err(TransportError::ConnectionClosed);
                }
                let connection = Arc::new(connection);
                entries.insert(identity, Entry::Ready(connection.clone()));
                Ok(connection)
            }
            Err(err) => {
                if matches!(entries.get(&identity), Some(Entry::Handshaking)) {
                    entries.remove(&identity);
                }
                warn!(identity = %identity, error = %err, "connect failed");
                Err(err)
            }
        }
    }

    /// Close and forget the connection for `identity`. Idempotent.
    pub async fn disconnect(&self, identity: &ServerIdentity) {
        let removed = self.entries.lock().await.remove(identity);
        if let Some(Entry::Ready(connection)) = removed {
            connection.close().await;
        }
    }

    /// Close `from`, then connect `to`.
    pub async fn switch(
        &self,
        from: &ServerIdentity,
        to: &EndpointConfig,
    ) -> TransportResult<Arc<Connection>> {
        self.disconnect(from).await;
        self.connect(to).await
    }

    /// Ready connection for `identity`, if any.
    pub async fn get(&self, identity: &ServerIdentity) -> Option<Arc<Connection>> {
        match self.entries.lock().await.get(identity) {
            Some(Entry::Ready(connection)) if connection.state() == ConnectionState::Ready => {
                Some(connection.clone())
            }
            _ => None,
        }
    }

    /// Registry state for `identity`.
    pub async fn state(&self, identity: &ServerIdentity) -> ConnectionState {
        match self.entries.lock().await.get(identity) {
            None => ConnectionState::Idle,
            Some(Entry::Handshaking) => ConnectionState::Handshaking,
            Some(Entry::Ready(connection)) => match connection.state() {
                ConnectionState::Closed => ConnectionState::Idle,
                state => state,
            },
        }
    }

    /// Close every connection.
    pub async fn close_all(&self) {
        let drained: Vec<Entry> = self.entries.lock().await.drain().map(|(_, e)| e).collect();
        for entry in drained {
            if let Entry::Ready(connection) = entry {
                connection.close().await;
            }
        }
    }
}
