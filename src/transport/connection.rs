//! Secure connection to one server identity.
//!
//! A [`Connection`] owns the session, the request multiplexer and a reader
//! task that processes inbound payloads in arrival order:
//!
//! 1. before the handshake completes, payloads are plaintext envelopes and
//!    only the handshake response is acted on
//! 2. afterwards every payload is opened with the session, decoded once into
//!    an [`Inbound`] and routed to the multiplexer or the broadcast sink
//!
//! Any protocol violation tears the connection down and releases every
//! pending request.
//!
//! Frames are sealed under the connection lock, so sequence numbers follow
//! queue order, and handed to a writer task. The lock is never held across a
//! transport write, so a stalled write cannot hold up inbound processing.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::core::{
    duration_ms, ConnectionState, HandshakeError, ServerIdentity, DEFAULT_MAX_FRAME_SIZE,
    HANDSHAKE_TIMEOUT, REQUEST_TIMEOUT,
};
use crate::crypto::{HandshakeInitiator, KeyTransport, PeerPublicKey, Session, SessionId};

use super::envelope::{Envelope, Inbound};
use super::error::{TransportError, TransportResult};
use super::frame::{encode, FrameConfig};
use super::host::{ConnectTarget, Transport, TransportConnector, TransportLink};
use super::mux::RequestMultiplexer;
use super::policy::TlsPolicy;

/// Per-connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Frame header layout, shared with the server.
    pub frame: FrameConfig,

    /// Time allowed for the handshake.
    #[serde(with = "duration_ms")]
    pub handshake_timeout: Duration,

    /// Time allowed for a request's reply.
    #[serde(with = "duration_ms")]
    pub request_timeout: Duration,

    /// Largest inbound payload the host decoder accepts. Handed to the
    /// connector in [`ConnectTarget`] together with `frame`.
    pub max_frame_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            frame: FrameConfig::default(),
            handshake_timeout: HANDSHAKE_TIMEOUT,
            request_timeout: REQUEST_TIMEOUT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl ConnectionConfig {
    /// Start a builder from the defaults.
    pub fn builder() -> ConnectionConfigBuilder {
        ConnectionConfigBuilder::new()
    }
}

/// Builder for [`ConnectionConfig`].
#[derive(Debug)]
pub struct ConnectionConfigBuilder {
    config: ConnectionConfig,
}

impl ConnectionConfigBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            config: ConnectionConfig::default(),
        }
    }

    /// Set the frame header layout.
    pub fn frame(mut self, frame: FrameConfig) -> Self {
        self.config.frame = frame;
        self
    }

    /// Set the handshake timeout.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    /// Set the request timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Set the inbound frame size limit.
    pub fn max_frame_size(mut self, max: usize) -> Self {
        self.config.max_frame_size = max;
        self
    }

    /// Build the config.
    pub fn build(self) -> ConnectionConfig {
        self.config
    }
}

impl Default for ConnectionConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A configured server endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Logical server key.
    pub identity: ServerIdentity,
    /// Bare `host:port`.
    pub address: String,
    /// Transport security policy.
    #[serde(default)]
    pub tls_policy: TlsPolicy,
    /// Server's P-256 public key, base64 SEC1. Required unless the policy is
    /// confidential.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_public_key: Option<String>,
}

impl EndpointConfig {
    /// Create an endpoint with the default (strict) policy.
    pub fn new(identity: impl Into<ServerIdentity>, address: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            address: address.into(),
            tls_policy: TlsPolicy::default(),
            peer_public_key: None,
        }
    }

    /// Set the TLS policy.
    pub fn with_tls_policy(mut self, policy: TlsPolicy) -> Self {
        self.tls_policy = policy;
        self
    }

    /// Set the server public key (base64 SEC1).
    pub fn with_peer_public_key(mut self, key: impl Into<String>) -> Self {
        self.peer_public_key = Some(key.into());
        self
    }

    /// Parse the configured server public key.
    pub fn peer_key(&self) -> TransportResult<Option<PeerPublicKey>> {
        self.peer_public_key
            .as_deref()
            .map(PeerPublicKey::from_base64)
            .transpose()
            .map_err(TransportError::from)
    }

    /// Resolve the policy-rewritten connect target, carrying the frame
    /// layout of `config` so both directions agree on it.
    pub fn target(&self, config: &ConnectionConfig) -> TransportResult<ConnectTarget> {
        Ok(ConnectTarget {
            identity: self.identity.clone(),
            address: self.tls_policy.rewrite_address(&self.address)?,
            tls_policy: self.tls_policy.clone(),
            frame: config.frame,
            max_frame_size: config.max_frame_size,
        })
    }
}

/// State guarded by the connection lock.
struct Shared {
    session: Session,
    mux: RequestMultiplexer<Value>,
    initiator: Option<HandshakeInitiator>,
    handshake_done: Option<oneshot::Sender<TransportResult<SessionId>>>,
    broadcasts: Option<mpsc::UnboundedSender<Value>>,
    state: watch::Sender<ConnectionState>,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

impl Shared {
    fn handle_payload(&mut self, payload: &[u8], identity: &ServerIdentity) -> TransportResult<()> {
        if !self.session.is_ready() {
            return self.handle_handshake(payload, identity);
        }

        let Some(plaintext) = self.session.decrypt(payload)? else {
            debug!(identity = %identity, "keepalive");
            return Ok(());
        };

        match Inbound::decode(&plaintext)? {
            Inbound::Response { request_id, data } => {
                self.mux.dispatch(request_id, data);
            }
            Inbound::Broadcast(data) => match &self.broadcasts {
                Some(sink) if sink.send(data).is_ok() => {}
                _ => debug!(identity = %identity, "no broadcast receiver, dropping"),
            },
            Inbound::Handshake { .. } => {
                warn!(identity = %identity, "ignoring handshake response on an established session");
            }
        }
        Ok(())
    }

    fn handle_handshake(&mut self, payload: &[u8], identity: &ServerIdentity) -> TransportResult<()> {
        let (request_id, session_id) = match Inbound::decode(payload)? {
            Inbound::Handshake {
                request_id,
                session_id,
            } => (request_id, session_id),
            other => {
                debug!(identity = %identity, ?other, "ignoring message before handshake");
                return Ok(());
            }
        };

        let initiator = self
            .initiator
            .take()
            .ok_or_else(|| HandshakeError::MalformedResponse("no handshake pending".into()))?;
        if let Some(id) = request_id {
            if id != initiator.request_id() {
                return Err(HandshakeError::MalformedResponse(format!(
                    "response for request {id}, expected {}",
                    initiator.request_id()
                ))
                .into());
            }
        }

        self.session = initiator.complete(session_id);
        self.state.send_replace(ConnectionState::Ready);
        if let Some(done) = self.handshake_done.take() {
            let _ = done.send(Ok(session_id));
        }
        Ok(())
    }

    /// Mark closed and release everything waiting on this connection.
    fn teardown(&mut self) -> usize {
        self.state.send_replace(ConnectionState::Closed);
        self.initiator = None;
        self.broadcasts = None;
        if let Some(done) = self.handshake_done.take() {
            let _ = done.send(Err(HandshakeError::TransportClosed.into()));
        }
        self.mux.release_all()
    }
}

async fn read_loop(
    identity: ServerIdentity,
    shared: Arc<Mutex<Shared>>,
    transport: Arc<dyn Transport>,
    mut inbound: mpsc::Receiver<Vec<u8>>,
) {
    while let Some(payload) = inbound.recv().await {
        let mut guard = shared.lock().await;
        if let Err(err) = guard.handle_payload(&payload, &identity) {
            match guard.handshake_done.take() {
                Some(done) => {
                    let _ = done.send(Err(err));
                }
                None => {
                    error!(identity = %identity, error = %err, "protocol violation, closing connection");
                }
            }
            let released = guard.teardown();
            drop(guard);
            debug!(identity = %identity, released, "pending requests released");
            transport.close().await;
            return;
        }
    }

    info!(identity = %identity, "transport closed by peer");
    let released = shared.lock().await.teardown();
    debug!(identity = %identity, released, "pending requests released");
}

/// A sealed frame and where to report the write result.
type Outbound = (Vec<u8>, oneshot::Sender<TransportResult<()>>);

async fn write_loop(
    identity: ServerIdentity,
    transport: Arc<dyn Transport>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some((frame, done)) = outbound.recv().await {
        let result = transport.send(frame).await;
        if let Err(err) = &result {
            debug!(identity = %identity, error = %err, "frame write failed");
        }
        let _ = done.send(result);
    }
}

/// Wait for the writer task to report on a queued frame.
async fn written(done: oneshot::Receiver<TransportResult<()>>) -> TransportResult<()> {
    done.await.unwrap_or(Err(TransportError::ConnectionClosed))
}

/// An established, authenticated connection.
pub struct Connection {
    identity: ServerIdentity,
    config: ConnectionConfig,
    shared: Arc<Mutex<Shared>>,
    transport: Arc<dyn Transport>,
    outbound: mpsc::UnboundedSender<Outbound>,
    state: watch::Receiver<ConnectionState>,
    broadcasts: Mutex<Option<mpsc::UnboundedReceiver<Value>>>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("identity", &self.identity)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Open a transport to `endpoint` and run the handshake.
    ///
    /// Fails if the handshake does not complete within the configured
    /// timeout. On failure the transport is closed.
    pub async fn establish(
        endpoint: &EndpointConfig,
        config: ConnectionConfig,
        connector: &dyn TransportConnector,
    ) -> TransportResult<Self> {
        let target = endpoint.target(&config)?;
        let key_transport = KeyTransport::select(
            target.tls_policy.is_confidential(),
            endpoint.peer_key()?.as_ref(),
        )?;
        let (initiator, request) = HandshakeInitiator::begin(rand::random(), &key_transport)?;
        let request = encode(
            &serde_json::to_vec(&request)
                .map_err(|e| TransportError::MalformedEnvelope(e.to_string()))?,
            &config.frame,
        )?;

        let TransportLink { transport, inbound } = connector.open(&target).await?;
        info!(
            identity = %target.identity,
            address = %target.address,
            wrapped = matches!(key_transport, KeyTransport::Wrapped(_)),
            "starting handshake"
        );

        let (state_tx, state_rx) = watch::channel(ConnectionState::Handshaking);
        let (done_tx, done_rx) = oneshot::channel();
        let (broadcast_tx, broadcast_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Mutex::new(Shared {
            session: Session::new(),
            mux: RequestMultiplexer::new(),
            initiator: Some(initiator),
            handshake_done: Some(done_tx),
            broadcasts: Some(broadcast_tx),
            state: state_tx,
            reader: None,
            writer: None,
        }));

        let reader = tokio::spawn(read_loop(
            target.identity.clone(),
            shared.clone(),
            transport.clone(),
            inbound,
        ));
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_loop(
            target.identity.clone(),
            transport.clone(),
            outbound_rx,
        ));
        {
            let mut guard = shared.lock().await;
            guard.reader = Some(reader);
            guard.writer = Some(writer);
        }

        let handshake_timeout = config.handshake_timeout;
        let connection = Self {
            identity: target.identity,
            config,
            shared,
            transport,
            outbound: outbound_tx,
            state: state_rx,
            broadcasts: Mutex::new(Some(broadcast_rx)),
        };

        let result: TransportResult<SessionId> = async {
            connection.transport.send(request).await?;
            match timeout(handshake_timeout, done_rx).await {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(HandshakeError::TransportClosed.into()),
                Err(_) => Err(HandshakeError::Timeout(handshake_timeout).into()),
            }
        }
        .await;

        match result {
            Ok(session_id) => {
                info!(identity = %connection.identity, session_id = %session_id, "session established");
                Ok(connection)
            }
            Err(err) => {
                warn!(identity = %connection.identity, error = %err, "handshake failed");
                connection.close().await;
                Err(err)
            }
        }
    }

    /// Server identity of this connection.
    pub fn identity(&self) -> &ServerIdentity {
        &self.identity
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver of state changes.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Server-assigned session id.
    pub async fn session_id(&self) -> SessionId {
        self.shared.lock().await.session.session_id()
    }

    /// Number of requests and subscriptions awaiting replies.
    pub async fn pending_requests(&self) -> usize {
        self.shared.lock().await.mux.len()
    }

    /// Take the broadcast stream. Returns `None` after the first call.
    pub async fn take_broadcasts(&self) -> Option<mpsc::UnboundedReceiver<Value>> {
        self.broadcasts.lock().await.take()
    }

    /// Seal `envelope` and queue it for the writer task.
    fn queue_envelope(
        &self,
        shared: &mut Shared,
        envelope: &Envelope,
    ) -> TransportResult<oneshot::Receiver<TransportResult<()>>> {
        if self.state() == ConnectionState::Closed {
            return Err(TransportError::ConnectionClosed);
        }
        let sealed = shared.session.encrypt(&envelope.to_bytes()?)?;
        let frame = encode(&sealed, &self.config.frame)?;
        let (done, written) = oneshot::channel();
        self.outbound
            .send((frame, done))
            .map_err(|_| TransportError::ConnectionClosed)?;
        Ok(written)
    }

    /// Queue a request for the id just registered, releasing it on failure.
    fn queue_request(
        &self,
        shared: &mut Shared,
        request_id: u8,
        route: &str,
        data: Value,
    ) -> TransportResult<oneshot::Receiver<TransportResult<()>>> {
        let queued = self.queue_envelope(shared, &Envelope::request(route, request_id, data));
        if queued.is_err() {
            shared.mux.release(request_id);
        }
        queued
    }

    /// Wait for a queued request to be written, releasing its id on failure.
    async fn request_written(
        &self,
        request_id: u8,
        queued: oneshot::Receiver<TransportResult<()>>,
    ) -> TransportResult<()> {
        let result = written(queued).await;
        if result.is_err() {
            self.shared.lock().await.mux.release(request_id);
        }
        result
    }

    /// Send a request and wait for its reply.
    pub async fn request(&self, route: &str, data: Value) -> TransportResult<Value> {
        let (request_id, reply, queued) = {
            let mut shared = self.shared.lock().await;
            let (request_id, reply) = shared.mux.register_once();
            let queued = self.queue_request(&mut shared, request_id, route, data)?;
            (request_id, reply, queued)
        };
        self.request_written(request_id, queued).await?;
        debug!(identity = %self.identity, request_id, route, "request sent");

        match timeout(self.config.request_timeout, reply).await {
            Ok(Ok(data)) => Ok(data),
            Ok(Err(_)) => Err(TransportError::RequestCancelled { request_id }),
            Err(_) => {
                self.shared.lock().await.mux.release(request_id);
                Err(TransportError::RequestTimeout { request_id })
            }
        }
    }

    /// Send a request whose id stays registered, receiving every reply to it
    /// until [`unsubscribe`](Self::unsubscribe).
    pub async fn subscribe(
        &self,
        route: &str,
        data: Value,
    ) -> TransportResult<(u8, mpsc::UnboundedReceiver<Value>)> {
        let (request_id, replies, queued) = {
            let mut shared = self.shared.lock().await;
            let (request_id, replies) = shared.mux.register_persistent();
            let queued = self.queue_request(&mut shared, request_id, route, data)?;
            (request_id, replies, queued)
        };
        self.request_written(request_id, queued).await?;
        debug!(identity = %self.identity, request_id, route, "subscribed");
        Ok((request_id, replies))
    }

    /// Release a subscription id.
    pub async fn unsubscribe(&self, request_id: u8) -> bool {
        self.shared.lock().await.mux.release(request_id)
    }

    /// Send a message that expects no reply.
    pub async fn notify(&self, route: &str, data: Value) -> TransportResult<()> {
        let queued = {
            let mut shared = self.shared.lock().await;
            self.queue_envelope(&mut shared, &Envelope::notify(route, data))?
        };
        written(queued).await
    }

    /// Close the connection, releasing every pending request.
    ///
    /// Idempotent.
    pub async fn close(&self) {
        let (reader, writer) = {
            let mut shared = self.shared.lock().await;
            if self.state() == ConnectionState::Closed
                && shared.reader.is_none()
                && shared.writer.is_none()
            {
                return;
            }
            let released = shared.teardown();
            debug!(identity = %self.identity, released, "pending requests released");
            (shared.reader.take(), shared.writer.take())
        };
        for task in [reader, writer].into_iter().flatten() {
            task.abort();
        }
        self.transport.close().await;
        info!(identity = %self.identity, "connection closed");
    }
}
