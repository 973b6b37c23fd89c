//! Boundary to the host's push channel (typically a WebSocket).

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::core::ServerIdentity;
use crate::transport::TlsPolicy;

use super::error::StreamResult;

/// Where to open the push channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushTarget {
    /// Logical server.
    pub identity: ServerIdentity,
    /// Push endpoint URL.
    pub url: String,
    /// Policy the channel must honour. Only `Strict` and `Plaintext` reach a
    /// connector.
    pub tls_policy: TlsPolicy,
}

/// Outbound half of an open push channel.
#[async_trait]
pub trait PushChannel: Send + Sync + 'static {
    /// Send one text message.
    async fn send(&self, message: String) -> StreamResult<()>;

    /// Close the channel. Must be safe to call more than once.
    async fn close(&self);
}

/// An open push channel and its inbound messages.
///
/// The receiver ending means the channel closed.
pub struct PushLink {
    /// Outbound half.
    pub channel: Arc<dyn PushChannel>,
    /// Inbound text messages, in arrival order.
    pub inbound: mpsc::Receiver<String>,
}

impl std::fmt::Debug for PushLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushLink").finish_non_exhaustive()
    }
}

/// Opens push channels.
#[async_trait]
pub trait PushConnector: Send + Sync + 'static {
    /// Open a channel to `target`.
    async fn open(&self, target: &PushTarget) -> StreamResult<PushLink>;
}
