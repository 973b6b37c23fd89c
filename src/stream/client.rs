//! Event stream client.
//!
//! ```text
//! AwaitingCredential ──token──▶ Connecting ──open──▶ Authenticating ──auth.ok──▶ Live
//!                                   ▲                      │                       │
//!                                   └──── Reconnecting ◀───┴──── close/error ──────┘
//! ```
//!
//! `auth.err` / `reauth.err` go to [`EventStreamHandle::auth_failures`] and park
//! the client in `AwaitingCredential`; the rejected credential is never
//! retried. [`EventStreamHandle::close`] is terminal.
//!
//! Events are applied in increasing id order. An event at or behind the cursor
//! is dropped. The cursor only advances after the handler returns `Ok`.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::core::{
    duration_ms, ApplyError, ConnectionState, ReadModel, ServerIdentity, CATCH_UP_LIMIT,
    HEARTBEAT_INTERVAL, POLL_INTERVAL, PUSH_API_VERSION,
};
use crate::transport::TlsPolicy;

use super::backoff::{BackoffConfig, ReconnectBackoff};
use super::catchup::{catch_up, CatchUpReport};
use super::channel::{PushChannel, PushConnector, PushLink, PushTarget};
use super::cursor::{CursorStore, EventCursor};
use super::error::{StreamError, StreamResult};
use super::poll::Poller;
use super::protocol::{Command, PushEvent, Resume, ServerMessage};

/// Push client settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Push endpoint URL.
    pub url: String,

    /// Push protocol version sent with `auth`.
    pub api_version: u32,

    /// Access credential. Never serialized.
    #[serde(skip_serializing)]
    pub access_token: Option<String>,

    /// Stable device identifier.
    pub device_id: String,

    /// Heartbeat interval once live.
    #[serde(with = "duration_ms")]
    pub heartbeat_interval: Duration,

    /// Reconnect backoff.
    pub backoff: BackoffConfig,

    /// Poll interval when the push channel cannot be used.
    #[serde(with = "duration_ms")]
    pub poll_interval: Duration,

    /// Extra resources refreshed per catch-up.
    pub catch_up_limit: usize,

    /// Transport policy of the identity.
    pub tls_policy: TlsPolicy,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_version: PUSH_API_VERSION,
            access_token: None,
            device_id: String::new(),
            heartbeat_interval: HEARTBEAT_INTERVAL,
            backoff: BackoffConfig::default(),
            poll_interval: POLL_INTERVAL,
            catch_up_limit: CATCH_UP_LIMIT,
            tls_policy: TlsPolicy::default(),
        }
    }
}

impl StreamConfig {
    /// Start a builder.
    pub fn builder(url: impl Into<String>, device_id: impl Into<String>) -> StreamConfigBuilder {
        StreamConfigBuilder::new(url, device_id)
    }
}

/// Builder for [`StreamConfig`].
#[derive(Debug)]
pub struct StreamConfigBuilder {
    config: StreamConfig,
}

impl StreamConfigBuilder {
    /// Create a builder for `url` and `device_id`.
    pub fn new(url: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            config: StreamConfig {
                url: url.into(),
                device_id: device_id.into(),
                ..StreamConfig::default()
            },
        }
    }

    /// Set the access credential.
    pub fn access_token(mut self, token: impl Into<String>) -> Self {
        self.config.access_token = Some(token.into());
        self
    }

    /// Set the heartbeat interval.
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval = interval;
        self
    }

    /// Set the reconnect backoff.
    pub fn backoff(mut self, backoff: BackoffConfig) -> Self {
        self.config.backoff = backoff;
        self
    }

    /// Set the poll interval.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Set the catch-up bound.
    pub fn catch_up_limit(mut self, limit: usize) -> Self {
        self.config.catch_up_limit = limit;
        self
    }

    /// Set the identity's TLS policy.
    pub fn tls_policy(mut self, policy: TlsPolicy) -> Self {
        self.config.tls_policy = policy;
        self
    }

    /// Build the config.
    pub fn build(self) -> StreamConfig {
        self.config
    }
}

/// Push client state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamState {
    /// Opening the push channel.
    Connecting,
    /// `auth` sent, waiting for `auth.ok`.
    Authenticating,
    /// Authenticated and receiving events.
    Live,
    /// Waiting out the backoff before the next connect.
    Reconnecting,
    /// Push channel unusable for this policy; polling.
    Polling,
    /// Credential missing or rejected.
    AwaitingCredential,
    /// Closed by the caller.
    Closed,
}

impl StreamState {
    /// Short user-facing summary.
    pub fn status_line(self) -> &'static str {
        match self {
            StreamState::Connecting => "Connecting…",
            StreamState::Authenticating => "Signing in…",
            StreamState::Live => "Live",
            StreamState::Reconnecting => "Reconnecting…",
            StreamState::Polling => "Live (polling)",
            StreamState::AwaitingCredential => "Sign-in required",
            StreamState::Closed => "Offline",
        }
    }

    /// Equivalent coarse connection state.
    pub fn connection_state(self) -> ConnectionState {
        match self {
            StreamState::Connecting | StreamState::Authenticating | StreamState::Reconnecting => {
                ConnectionState::Handshaking
            }
            StreamState::Live => ConnectionState::Ready,
            StreamState::Polling => ConnectionState::DegradedPolling,
            StreamState::AwaitingCredential => ConnectionState::Idle,
            StreamState::Closed => ConnectionState::Closed,
        }
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.status_line())
    }
}

/// A rejected credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthFailure {
    /// Identity whose credential was rejected.
    pub identity: ServerIdentity,
    /// `auth` or `reauth`.
    pub command: String,
    /// Server-provided reason.
    pub reason: Option<String>,
}

/// Applies pushed events to local state.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// Apply one event. An error keeps the cursor where it is.
    async fn apply(&self, identity: &ServerIdentity, event: &PushEvent) -> Result<(), ApplyError>;
}

enum Control {
    Credential(String),
}

/// Configured push client, not yet running.
pub struct EventStreamClient {
    identity: ServerIdentity,
    config: StreamConfig,
    connector: Arc<dyn PushConnector>,
    cursors: Arc<dyn CursorStore>,
    read_model: Arc<dyn ReadModel>,
    handler: Arc<dyn EventHandler>,
}

impl fmt::Debug for EventStreamClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStreamClient")
            .field("identity", &self.identity)
            .field("url", &self.config.url)
            .finish_non_exhaustive()
    }
}

impl EventStreamClient {
    /// Create a client for `identity`.
    pub fn new(
        identity: ServerIdentity,
        config: StreamConfig,
        connector: Arc<dyn PushConnector>,
        cursors: Arc<dyn CursorStore>,
        read_model: Arc<dyn ReadModel>,
        handler: Arc<dyn EventHandler>,
    ) -> Self {
        Self {
            identity,
            config,
            connector,
            cursors,
            read_model,
            handler,
        }
    }

    /// Start the client task.
    pub fn spawn(self) -> EventStreamHandle {
        let initial = if self.config.tls_policy.supports_push_channel() {
            StreamState::Connecting
        } else {
            StreamState::Polling
        };
        let (state_tx, state_rx) = watch::channel(initial);
        let state_tx = Arc::new(state_tx);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (auth_tx, auth_rx) = mpsc::unbounded_channel();
        let current = Arc::new(Mutex::new(None));
        let shutdown = Arc::new(AtomicBool::new(false));

        let worker = Worker {
            backoff: ReconnectBackoff::new(self.config.backoff),
            token: self.config.access_token.clone(),
            identity: self.identity.clone(),
            config: self.config,
            connector: self.connector,
            cursors: self.cursors,
            read_model: self.read_model,
            handler: self.handler,
            state: state_tx.clone(),
            auth_failures: auth_tx,
            control: control_rx,
            current: current.clone(),
            shutdown: shutdown.clone(),
            cursor: EventCursor::default(),
            sent_token: None,
            reconciled: false,
        };
        let task = tokio::spawn(worker.run());

        EventStreamHandle {
            identity: self.identity,
            state: state_rx,
            state_tx,
            control: control_tx,
            auth_failures: Some(auth_rx),
            current,
            shutdown,
            task,
        }
    }
}

/// Handle to a running push client.
///
/// Dropping the handle stops the client.
pub struct EventStreamHandle {
    identity: ServerIdentity,
    state: watch::Receiver<StreamState>,
    state_tx: Arc<watch::Sender<StreamState>>,
    control: mpsc::UnboundedSender<Control>,
    auth_failures: Option<mpsc::UnboundedReceiver<AuthFailure>>,
    current: Arc<Mutex<Option<Arc<dyn PushChannel>>>>,
    shutdown: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl fmt::Debug for EventStreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStreamHandle")
            .field("identity", &self.identity)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl EventStreamHandle {
    /// Identity this client serves.
    pub fn identity(&self) -> &ServerIdentity {
        &self.identity
    }

    /// Current state.
    pub fn state(&self) -> StreamState {
        *self.state.borrow()
    }

    /// Receiver of state changes.
    pub fn state_changes(&self) -> watch::Receiver<StreamState> {
        self.state.clone()
    }

    /// Take the receiver of rejected credentials. Returns `None` after the
    /// first call.
    pub fn auth_failures(&mut self) -> Option<mpsc::UnboundedReceiver<AuthFailure>> {
        self.auth_failures.take()
    }

    /// Supply a new credential: sent as `reauth` when live, otherwise used for
    /// the next connect.
    pub fn update_credential(&self, token: impl Into<String>) -> StreamResult<()> {
        if self.is_closed() {
            return Err(StreamError::Closed);
        }
        self.control
            .send(Control::Credential(token.into()))
            .map_err(|_| StreamError::Closed)
    }

    /// Whether [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Stop the client: no further reconnects, heartbeats or polls.
    ///
    /// Idempotent.
    pub async fn close(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        self.task.abort();
        let channel = self.current.lock().await.take();
        if let Some(channel) = channel {
            channel.close().await;
        }
        self.state_tx.send_replace(StreamState::Closed);
        info!(identity = %self.identity, "event stream closed");
    }
}

impl Drop for EventStreamHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        self.task.abort();
    }
}

enum SessionExit {
    /// Channel lost; reconnect after backoff.
    Disconnected,
    /// Credential rejected; wait for a new one.
    AuthRejected,
    /// Handle gone.
    Shutdown,
}

enum Flow {
    Continue,
    Authenticated,
    AuthRejected,
    /// An event failed to apply; later events on this channel would skip it.
    Resync,
}

struct Worker {
    identity: ServerIdentity,
    config: StreamConfig,
    connector: Arc<dyn PushConnector>,
    cursors: Arc<dyn CursorStore>,
    read_model: Arc<dyn ReadModel>,
    handler: Arc<dyn EventHandler>,
    state: Arc<watch::Sender<StreamState>>,
    auth_failures: mpsc::UnboundedSender<AuthFailure>,
    control: mpsc::UnboundedReceiver<Control>,
    current: Arc<Mutex<Option<Arc<dyn PushChannel>>>>,
    shutdown: Arc<AtomicBool>,
    cursor: EventCursor,
    backoff: ReconnectBackoff,
    token: Option<String>,
    /// Credential most recently sent with `auth` or `reauth`.
    sent_token: Option<String>,
    /// Whether a catch-up already ran on the current channel.
    reconciled: bool,
}

impl Worker {
    async fn run(mut self) {
        if !self.config.tls_policy.supports_push_channel() {
            info!(
                identity = %self.identity,
                policy = ?self.config.tls_policy,
                "push channel cannot honour tls policy, polling instead"
            );
            self.set_state(StreamState::Polling);
            Poller::new(
                self.identity.clone(),
                self.read_model.clone(),
                self.config.poll_interval,
            )
            .run()
            .await;
            return;
        }

        let stored = match self.cursors.load(&self.identity).await {
            Ok(stored) => stored,
            Err(err) => {
                warn!(identity = %self.identity, error = %err, "cursor load failed, starting without one");
                None
            }
        };
        self.cursor = EventCursor::new(stored);

        loop {
            let Some(token) = self.token.clone() else {
                self.set_state(StreamState::AwaitingCredential);
                match self.control.recv().await {
                    Some(Control::Credential(token)) => {
                        self.token = Some(token);
                        continue;
                    }
                    None => return,
                }
            };

            self.set_state(StreamState::Connecting);
            let target = PushTarget {
                identity: self.identity.clone(),
                url: self.config.url.clone(),
                tls_policy: self.config.tls_policy.clone(),
            };
            let exit = match self.connector.open(&target).await {
                Ok(link) => self.run_session(link, &token).await,
                Err(err) => {
                    warn!(identity = %self.identity, error = %err, "push channel connect failed");
                    SessionExit::Disconnected
                }
            };

            match exit {
                SessionExit::Shutdown => return,
                SessionExit::AuthRejected => {
                    if self.token == self.sent_token {
                        self.token = None;
                    }
                    continue;
                }
                SessionExit::Disconnected => {}
            }

            let delay = self.backoff.next_delay();
            self.set_state(StreamState::Reconnecting);
            info!(
                identity = %self.identity,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                attempt = self.backoff.attempt(),
                "reconnect scheduled"
            );
            if !self.wait(delay).await {
                return;
            }
        }
    }

    /// Sleep out a backoff delay, still accepting credentials.
    async fn wait(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                control = self.control.recv() => match control {
                    Some(Control::Credential(token)) => self.token = Some(token),
                    None => return false,
                },
            }
        }
    }

    async fn run_session(&mut self, link: PushLink, token: &str) -> SessionExit {
        let PushLink {
            channel,
            mut inbound,
        } = link;
        *self.current.lock().await = Some(channel.clone());
        self.reconciled = false;

        let exit = self.session_loop(&channel, &mut inbound, token).await;

        self.current.lock().await.take();
        channel.close().await;
        exit
    }

    async fn session_loop(
        &mut self,
        channel: &Arc<dyn PushChannel>,
        inbound: &mut mpsc::Receiver<String>,
        token: &str,
    ) -> SessionExit {
        self.set_state(StreamState::Authenticating);
        let auth = Command::Auth {
            api_version: self.config.api_version,
            access_token: token.to_string(),
            device_id: self.config.device_id.clone(),
            resume: self.cursor.last_applied().map(|id| Resume {
                last_event_id: id.clone(),
            }),
        };
        if let Err(err) = send(channel, &auth).await {
            warn!(identity = %self.identity, error = %err, "auth send failed");
            return SessionExit::Disconnected;
        }
        self.sent_token = Some(token.to_string());

        let period = self.config.heartbeat_interval;
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut authenticated = false;

        loop {
            tokio::select! {
                message = inbound.recv() => {
                    let Some(text) = message else {
                        info!(identity = %self.identity, "push channel closed");
                        return SessionExit::Disconnected;
                    };
                    match self.handle_message(&text).await {
                        Flow::Continue => {}
                        Flow::Authenticated => {
                            authenticated = true;
                            heartbeat.reset();
                        }
                        Flow::AuthRejected => return SessionExit::AuthRejected,
                        Flow::Resync => {
                            info!(identity = %self.identity, "dropping channel to resume from cursor");
                            return SessionExit::Disconnected;
                        }
                    }
                }
                _ = heartbeat.tick(), if authenticated => {
                    if let Err(err) = send(channel, &Command::Ping).await {
                        debug!(identity = %self.identity, error = %err, "heartbeat failed, ignoring");
                    }
                }
                control = self.control.recv() => match control {
                    Some(Control::Credential(token)) => {
                        self.token = Some(token.clone());
                        if authenticated {
                            let reauth = Command::Reauth { access_token: token.clone() };
                            match send(channel, &reauth).await {
                                Ok(()) => self.sent_token = Some(token),
                                Err(err) => {
                                    warn!(identity = %self.identity, error = %err, "reauth send failed");
                                }
                            }
                        }
                    }
                    None => return SessionExit::Shutdown,
                },
            }
        }
    }

    async fn handle_message(&mut self, text: &str) -> Flow {
        let message = match ServerMessage::parse(text) {
            Ok(message) => message,
            Err(err) => {
                warn!(identity = %self.identity, error = %err, "ignoring unreadable push message");
                return Flow::Continue;
            }
        };

        match message {
            ServerMessage::Event(event) => {
                if self.apply(event).await {
                    Flow::Continue
                } else {
                    Flow::Resync
                }
            }
            ServerMessage::AuthOk => {
                self.backoff.reset();
                self.set_state(StreamState::Live);
                if self.cursor.last_applied().is_none() && !self.reconciled {
                    self.reconcile().await;
                }
                Flow::Authenticated
            }
            ServerMessage::ResumeFailed { reason } => {
                warn!(
                    identity = %self.identity,
                    reason = reason.as_deref().unwrap_or("unspecified"),
                    "resume failed, clearing cursor"
                );
                self.cursor.clear();
                if let Err(err) = self.cursors.clear(&self.identity).await {
                    warn!(identity = %self.identity, error = %err, "cursor clear failed");
                }
                self.reconcile().await;
                Flow::Continue
            }
            ServerMessage::CommandError { command, reason }
                if ServerMessage::is_auth_command(&command) =>
            {
                warn!(identity = %self.identity, command = %command, "credential rejected");
                self.set_state(StreamState::AwaitingCredential);
                let _ = self.auth_failures.send(AuthFailure {
                    identity: self.identity.clone(),
                    command,
                    reason,
                });
                Flow::AuthRejected
            }
            ServerMessage::CommandError { command, reason } => {
                warn!(
                    identity = %self.identity,
                    command = %command,
                    reason = reason.as_deref().unwrap_or("unspecified"),
                    "command rejected"
                );
                Flow::Continue
            }
            ServerMessage::ReauthOk => {
                debug!(identity = %self.identity, "credential refreshed");
                Flow::Continue
            }
            ServerMessage::Pong | ServerMessage::Ack { .. } => Flow::Continue,
            ServerMessage::Unknown(kind) => {
                debug!(identity = %self.identity, kind = %kind, "ignoring unknown push message");
                Flow::Continue
            }
        }
    }

    /// Apply one event. Returns `false` if the handler failed, in which case
    /// the cursor is left where it was.
    async fn apply(&mut self, event: PushEvent) -> bool {
        if !self.cursor.is_new(&event.event_id) {
            debug!(identity = %self.identity, event_id = %event.event_id, "dropping duplicate event");
            return true;
        }

        match self.handler.apply(&self.identity, &event).await {
            Ok(()) => {
                self.cursor.advance(&event.event_id);
                if let Err(err) = self.cursors.save(&self.identity, &event.event_id).await {
                    warn!(identity = %self.identity, error = %err, "cursor persist failed");
                }
                true
            }
            Err(err) => {
                warn!(
                    identity = %self.identity,
                    event_id = %event.event_id,
                    error = %err,
                    "event apply failed, cursor not advanced"
                );
                false
            }
        }
    }

    async fn reconcile(&mut self) -> CatchUpReport {
        self.reconciled = true;
        catch_up(
            self.read_model.as_ref(),
            &self.identity,
            self.config.catch_up_limit,
        )
        .await
    }

    fn set_state(&self, state: StreamState) {
        if self.shutdown.load(Ordering::Acquire) {
            return;
        }
        let previous = self.state.send_replace(state);
        if previous != state {
            info!(identity = %self.identity, from = ?previous, to = ?state, "stream state");
        }
    }
}

async fn send(channel: &Arc<dyn PushChannel>, command: &Command) -> StreamResult<()> {
    channel.send(command.to_json()?).await
}
