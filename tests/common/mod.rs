//! In-memory peers for integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Once};
use std::time::Duration;

use async_trait::async_trait;
use chatlink::core::{ApplyError, CatchUpError, ReadModel, ResourceId, ServerIdentity};
use chatlink::crypto::{HandshakeRequest, HandshakeResponder, Session, SessionId};
use chatlink::stream::{
    EventHandler, PushChannel, PushConnector, PushEvent, PushLink, PushTarget, StreamError,
    StreamResult,
};
use chatlink::transport::{
    ConnectTarget, Envelope, FrameDecoder, Transport, TransportConnector,
    TransportError, TransportLink, TransportResult,
};
use p256::SecretKey;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::Instant;

static TRACING: Once = Once::new();

/// Install a test subscriber once per process. `RUST_LOG` controls verbosity.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

// =============================================================================
// SECURE TRANSPORT
// =============================================================================

struct MemoryTransport {
    frames: mpsc::UnboundedSender<Vec<u8>>,
    closed: Arc<StdMutex<bool>>,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, frame: Vec<u8>) -> TransportResult<()> {
        if *self.closed.lock().unwrap() {
            return Err(TransportError::ConnectionClosed);
        }
        self.frames
            .send(frame)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn close(&self) {
        *self.closed.lock().unwrap() = true;
    }
}

/// Connector handing the server end of every opened transport to the test.
pub struct MemoryConnector {
    accepted: mpsc::UnboundedSender<ServerEnd>,
    refuse: StdMutex<HashSet<ServerIdentity>>,
    opened: StdMutex<Vec<ConnectTarget>>,
}

impl MemoryConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            accepted: tx,
            refuse: StdMutex::new(HashSet::new()),
            opened: StdMutex::new(Vec::new()),
        });
        (connector, rx)
    }

    /// Make opens for `identity` fail.
    pub fn refuse(&self, identity: &str) {
        self.refuse.lock().unwrap().insert(identity.into());
    }

    pub fn allow(&self, identity: &str) {
        self.refuse.lock().unwrap().remove(&ServerIdentity::from(identity));
    }

    /// Targets passed to `open`, in call order.
    pub fn opened(&self) -> Vec<ConnectTarget> {
        self.opened.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransportConnector for MemoryConnector {
    async fn open(&self, target: &ConnectTarget) -> TransportResult<TransportLink> {
        self.opened.lock().unwrap().push(target.clone());
        if self.refuse.lock().unwrap().contains(&target.identity) {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "refused",
            )));
        }

        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::channel(64);
        let closed = Arc::new(StdMutex::new(false));
        let transport = Arc::new(MemoryTransport {
            frames: frames_tx,
            closed: closed.clone(),
        });
        let _ = self.accepted.send(ServerEnd {
            target: target.clone(),
            frames: frames_rx,
            inbound: inbound_tx,
            decoder: FrameDecoder::new(target.frame).with_max_frame_size(target.max_frame_size),
            session: None,
            closed,
        });
        Ok(TransportLink {
            transport,
            inbound: inbound_rx,
        })
    }
}

/// Server side of one in-memory transport.
pub struct ServerEnd {
    pub target: ConnectTarget,
    frames: mpsc::UnboundedReceiver<Vec<u8>>,
    inbound: mpsc::Sender<Vec<u8>>,
    decoder: FrameDecoder,
    session: Option<Session>,
    closed: Arc<StdMutex<bool>>,
}

impl ServerEnd {
    /// Next complete payload written by the client, `None` once it hung up.
    pub async fn next_payload(&mut self) -> Option<Vec<u8>> {
        loop {
            if let Some(payload) = self.decoder.next_frame().unwrap() {
                return Some(payload);
            }
            let frame = self.frames.recv().await?;
            self.decoder.push(&frame);
        }
    }

    /// Run the server half of the handshake.
    pub async fn accept(&mut self, session_id: u64, secret: Option<&SecretKey>) -> HandshakeRequest {
        let request: HandshakeRequest =
            serde_json::from_slice(&self.next_payload().await.unwrap()).unwrap();
        let key = HandshakeResponder::accept(&request, secret).unwrap();
        self.session = Some(Session::responder(key, SessionId(session_id)));
        self.send_raw(HandshakeResponder::response(request.request_id, SessionId(session_id)))
            .await;
        request
    }

    /// Decrypt the next client envelope.
    pub async fn recv_envelope(&mut self) -> Envelope {
        let sealed = self.next_payload().await.unwrap();
        let plaintext = self
            .session
            .as_ref()
            .unwrap()
            .decrypt(&sealed)
            .unwrap()
            .unwrap();
        serde_json::from_slice(&plaintext).unwrap()
    }

    /// Seal and send an envelope.
    pub async fn send(&mut self, envelope: Value) {
        let sealed = self
            .session
            .as_mut()
            .unwrap()
            .encrypt(envelope.to_string().as_bytes())
            .unwrap();
        self.send_raw(sealed).await;
    }

    /// Reply to `request_id`.
    pub async fn reply(&mut self, request_id: u8, data: Value) {
        self.send(json!({"request_id": request_id, "data": data}))
            .await;
    }

    /// Send an unsealed payload.
    pub async fn send_raw(&self, payload: Vec<u8>) {
        let _ = self.inbound.send(payload).await;
    }

    /// Whether the client closed its transport.
    pub fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap()
    }

    /// Hang up from the server side.
    pub fn hang_up(self) {}
}

// =============================================================================
// PUSH CHANNEL
// =============================================================================

struct ScriptedChannel {
    sent: mpsc::UnboundedSender<String>,
    closed: Arc<StdMutex<bool>>,
}

#[async_trait]
impl PushChannel for ScriptedChannel {
    async fn send(&self, message: String) -> StreamResult<()> {
        if *self.closed.lock().unwrap() {
            return Err(StreamError::Closed);
        }
        self.sent
            .send(message)
            .map_err(|_| StreamError::Send("peer gone".into()))
    }

    async fn close(&self) {
        *self.closed.lock().unwrap() = true;
    }
}

/// Push connector that refuses the first `refusals` opens and hands the
/// server end of every later one to the test.
pub struct ScriptedPush {
    refusals: usize,
    opens: StdMutex<Vec<Instant>>,
    attempts: AtomicUsize,
    accepted: mpsc::UnboundedSender<PushServer>,
}

impl ScriptedPush {
    pub fn new(refusals: usize) -> (Arc<Self>, mpsc::UnboundedReceiver<PushServer>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            refusals,
            opens: StdMutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
            accepted: tx,
        });
        (connector, rx)
    }

    /// Instants of every `open` call.
    pub fn opens(&self) -> Vec<Instant> {
        self.opens.lock().unwrap().clone()
    }
}

#[async_trait]
impl PushConnector for ScriptedPush {
    async fn open(&self, target: &PushTarget) -> StreamResult<PushLink> {
        self.opens.lock().unwrap().push(Instant::now());
        if self.attempts.fetch_add(1, Ordering::SeqCst) < self.refusals {
            return Err(StreamError::Connect(format!("{} unreachable", target.url)));
        }

        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::channel(64);
        let closed = Arc::new(StdMutex::new(false));
        let _ = self.accepted.send(PushServer {
            commands: sent_rx,
            inbound: inbound_tx,
            closed: closed.clone(),
        });
        Ok(PushLink {
            channel: Arc::new(ScriptedChannel {
                sent: sent_tx,
                closed,
            }),
            inbound: inbound_rx,
        })
    }
}

/// Server side of one push channel.
pub struct PushServer {
    commands: mpsc::UnboundedReceiver<String>,
    inbound: mpsc::Sender<String>,
    closed: Arc<StdMutex<bool>>,
}

impl PushServer {
    /// Next command from the client, parsed.
    pub async fn next_command(&mut self) -> Value {
        let text = self.commands.recv().await.unwrap();
        serde_json::from_str(&text).unwrap()
    }

    /// Next command other than `ping`.
    pub async fn next_non_ping(&mut self) -> Value {
        loop {
            let command = self.next_command().await;
            if command["type"] != "ping" {
                return command;
            }
        }
    }

    pub async fn push(&self, message: Value) {
        let _ = self.inbound.send(message.to_string()).await;
    }

    pub async fn event(&self, event_id: &str, resource: &str) {
        self.push(json!({
            "type": "event",
            "event_id": event_id,
            "event_type": "message.created",
            "server_time": "2026-10-18T09:00:00Z",
            "payload": {"channel": resource},
        }))
        .await;
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap()
    }
}

// =============================================================================
// READ MODEL AND HANDLER
// =============================================================================

/// Read model recording every refresh.
#[derive(Default)]
pub struct RecordingModel {
    pub active: StdMutex<Option<ResourceId>>,
    pub pending: StdMutex<Vec<ResourceId>>,
    pub calls: StdMutex<Vec<String>>,
}

impl RecordingModel {
    pub fn with(active: Option<&str>, pending: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            active: StdMutex::new(active.map(ResourceId::new)),
            pending: StdMutex::new(pending.iter().map(|p| ResourceId::new(*p)).collect()),
            calls: StdMutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReadModel for RecordingModel {
    async fn refresh_list(&self, _identity: &ServerIdentity) -> Result<(), CatchUpError> {
        self.calls.lock().unwrap().push("list".into());
        Ok(())
    }

    async fn pending_resources(
        &self,
        _identity: &ServerIdentity,
    ) -> Result<Vec<ResourceId>, CatchUpError> {
        Ok(self.pending.lock().unwrap().clone())
    }

    async fn refresh_resource(
        &self,
        _identity: &ServerIdentity,
        resource: &ResourceId,
    ) -> Result<(), CatchUpError> {
        self.calls.lock().unwrap().push(resource.to_string());
        Ok(())
    }

    fn active_resource(&self, _identity: &ServerIdentity) -> Option<ResourceId> {
        self.active.lock().unwrap().clone()
    }
}

/// Handler recording applied event ids; ids listed in `failing` fail once
/// each.
#[derive(Default)]
pub struct RecordingHandler {
    pub applied: StdMutex<Vec<String>>,
    pub attempts: StdMutex<Vec<String>>,
    pub failing: StdMutex<Vec<String>>,
    notify: tokio::sync::Notify,
}

impl RecordingHandler {
    pub fn failing_once(ids: &[&str]) -> Arc<Self> {
        let handler = Self::default();
        *handler.failing.lock().unwrap() = ids.iter().map(|s| s.to_string()).collect();
        Arc::new(handler)
    }

    pub fn applied(&self) -> Vec<String> {
        self.applied.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }

    /// Wait until `count` apply attempts were made.
    pub async fn wait_attempts(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(60), async {
            loop {
                let notified = self.notify.notified();
                if self.attempts.lock().unwrap().len() >= count {
                    return;
                }
                notified.await;
            }
        })
        .await
        .expect("handler attempts");
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn apply(&self, _identity: &ServerIdentity, event: &PushEvent) -> Result<(), ApplyError> {
        let id = event.event_id.to_string();
        self.attempts.lock().unwrap().push(id.clone());
        let fail = {
            let mut failing = self.failing.lock().unwrap();
            match failing.iter().position(|f| *f == id) {
                Some(index) => {
                    failing.remove(index);
                    true
                }
                None => false,
            }
        };
        let result = if fail {
            Err(ApplyError::Failed(format!("storage busy for {id}")))
        } else {
            self.applied.lock().unwrap().push(id);
            Ok(())
        };
        self.notify.notify_waiters();
        result
    }
}

/// Wait until `rx` reports `state`.
pub async fn wait_for<T: PartialEq + Clone>(rx: &mut tokio::sync::watch::Receiver<T>, state: T) {
    tokio::time::timeout(Duration::from_secs(60), rx.wait_for(|s| *s == state))
        .await
        .expect("state not reached")
        .expect("sender dropped");
}

/// Poll `condition` until it holds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(60), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never held");
}

/// Wait until `store` holds `expected` for `identity`.
pub async fn wait_cursor(
    store: &dyn chatlink::stream::CursorStore,
    identity: &ServerIdentity,
    expected: Option<&str>,
) {
    let expected = expected.map(chatlink::stream::EventId::new);
    tokio::time::timeout(Duration::from_secs(60), async {
        while store.load(identity).await.unwrap() != expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("cursor never reached");
}
