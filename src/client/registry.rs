//! Per-identity context registry.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};
use tracing::info;

use crate::core::{ReadModel, ServerIdentity};
use crate::stream::{
    AuthFailure, CursorStore, EventHandler, EventStreamClient, EventStreamHandle, PushConnector,
    StreamConfig, StreamState,
};
use crate::transport::{Connection, ConnectionRegistry, EndpointConfig};

use super::error::{ClientError, ClientResult};

/// Owns the connection, event stream and cursor of every identity.
///
/// # Example
///
/// ```ignore
/// let registry = IdentityRegistry::new(
///     ConnectionRegistry::new(Arc::new(TcpConnector::default()), ConnectionConfig::default()),
///     Arc::new(MyPushConnector::new()),
///     Arc::new(FileCursorStore::new("cursors.json")),
///     Arc::new(MyReadModel::new()),
///     Arc::new(MyEventHandler::new()),
/// );
///
/// let connection = registry.open(&endpoint, stream_config).await?;
/// let channels = connection.request("channel.list", Value::Null).await?;
///
/// // user picked another server
/// registry.switch_identity(&endpoint.identity, &other, other_stream).await?;
/// ```
pub struct IdentityRegistry {
    connections: ConnectionRegistry,
    push_connector: Arc<dyn PushConnector>,
    cursors: Arc<dyn CursorStore>,
    read_model: Arc<dyn ReadModel>,
    handler: Arc<dyn EventHandler>,
    streams: Mutex<HashMap<ServerIdentity, EventStreamHandle>>,
}

impl std::fmt::Debug for IdentityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityRegistry")
            .field("connections", &self.connections)
            .finish_non_exhaustive()
    }
}

impl IdentityRegistry {
    /// Create a registry.
    pub fn new(
        connections: ConnectionRegistry,
        push_connector: Arc<dyn PushConnector>,
        cursors: Arc<dyn CursorStore>,
        read_model: Arc<dyn ReadModel>,
        handler: Arc<dyn EventHandler>,
    ) -> Self {
        Self {
            connections,
            push_connector,
            cursors,
            read_model,
            handler,
            streams: Mutex::new(HashMap::new()),
        }
    }

    /// The underlying connection registry.
    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    /// Connect `endpoint`'s secure connection only.
    pub async fn connect(&self, endpoint: &EndpointConfig) -> ClientResult<Arc<Connection>> {
        Ok(self.connections.connect(endpoint).await?)
    }

    /// Start the event stream for `identity` unless one is running.
    pub async fn start_stream(
        &self,
        identity: &ServerIdentity,
        config: StreamConfig,
    ) -> watch::Receiver<StreamState> {
        let mut streams = self.streams.lock().await;
        if let Some(existing) = streams.get(identity) {
            if !existing.is_closed() {
                return existing.state_changes();
            }
        }

        let handle = EventStreamClient::new(
            identity.clone(),
            config,
            self.push_connector.clone(),
            self.cursors.clone(),
            self.read_model.clone(),
            self.handler.clone(),
        )
        .spawn();
        let states = handle.state_changes();
        streams.insert(identity.clone(), handle);
        states
    }

    /// Connect `endpoint` and start its event stream.
    pub async fn open(
        &self,
        endpoint: &EndpointConfig,
        stream: StreamConfig,
    ) -> ClientResult<Arc<Connection>> {
        let connection = self.connect(endpoint).await?;
        self.start_stream(&endpoint.identity, stream).await;
        Ok(connection)
    }

    /// Ready connection for `identity`.
    pub async fn connection(&self, identity: &ServerIdentity) -> Option<Arc<Connection>> {
        self.connections.get(identity).await
    }

    /// Event stream state for `identity`.
    pub async fn stream_state(&self, identity: &ServerIdentity) -> Option<StreamState> {
        self.streams.lock().await.get(identity).map(EventStreamHandle::state)
    }

    /// Hand a refreshed credential to `identity`'s event stream.
    pub async fn update_credential(
        &self,
        identity: &ServerIdentity,
        token: impl Into<String>,
    ) -> ClientResult<()> {
        let streams = self.streams.lock().await;
        let handle = streams
            .get(identity)
            .ok_or_else(|| ClientError::NoStream(identity.to_string()))?;
        Ok(handle.update_credential(token)?)
    }

    /// Take the auth-failure receiver of `identity`'s event stream.
    pub async fn auth_failures(
        &self,
        identity: &ServerIdentity,
    ) -> Option<mpsc::UnboundedReceiver<AuthFailure>> {
        self.streams
            .lock()
            .await
            .get_mut(identity)
            .and_then(EventStreamHandle::auth_failures)
    }

    /// Tear down everything held for `identity`: event stream, connection
    /// (releasing its pending requests) and persisted cursor.
    ///
    /// Safe to call for an identity with nothing open.
    pub async fn reset_for_identity(&self, identity: &ServerIdentity) -> ClientResult<()> {
        let mut streams = self.streams.lock().await;
        if let Some(stream) = streams.remove(identity) {
            stream.close().await;
        }
        self.connections.disconnect(identity).await;
        self.cursors.clear(identity).await?;
        info!(identity = %identity, "identity reset");
        Ok(())
    }

    /// Reset `from` completely, then open `to`.
    pub async fn switch_identity(
        &self,
        from: &ServerIdentity,
        to: &EndpointConfig,
        stream: StreamConfig,
    ) -> ClientResult<Arc<Connection>> {
        self.reset_for_identity(from).await?;
        self.open(to, stream).await
    }

    /// Close every stream and connection. Cursors are kept.
    pub async fn close_all(&self) {
        let streams: Vec<EventStreamHandle> =
            self.streams.lock().await.drain().map(|(_, s)| s).collect();
        for stream in &streams {
            stream.close().await;
        }
        self.connections.close_all().await;
    }
}
