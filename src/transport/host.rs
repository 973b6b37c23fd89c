//! Boundary to the host's socket I/O.
//!
//! The host opens sockets, terminates TLS according to the address scheme and
//! splits the inbound byte stream into frame payloads. This crate frames
//! outbound payloads itself and hands the host complete frames.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::core::ServerIdentity;

use super::error::TransportResult;
use super::frame::FrameConfig;
use super::policy::TlsPolicy;

/// Where and how to open a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    /// Logical server the transport is for.
    pub identity: ServerIdentity,
    /// Address rewritten with the policy scheme, e.g. `tls://host:443`.
    pub address: String,
    /// Policy the address was rewritten for.
    pub tls_policy: TlsPolicy,
    /// Frame header layout; the host decoder must use the one the
    /// connection encodes with.
    pub frame: FrameConfig,
    /// Largest inbound payload the host decoder accepts.
    pub max_frame_size: usize,
}

/// Outbound half of an open transport.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Write one complete frame.
    async fn send(&self, frame: Vec<u8>) -> TransportResult<()>;

    /// Close the transport. Must be safe to call more than once.
    async fn close(&self);
}

/// An open transport and its inbound payload stream.
///
/// The stream ending means the transport closed.
pub struct TransportLink {
    /// Outbound half.
    pub transport: Arc<dyn Transport>,
    /// Demarcated inbound payloads, in arrival order.
    pub inbound: mpsc::Receiver<Vec<u8>>,
}

impl std::fmt::Debug for TransportLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportLink").finish_non_exhaustive()
    }
}

/// Opens transports for the connection registry.
#[async_trait]
pub trait TransportConnector: Send + Sync + 'static {
    /// Open a transport to `target`.
    async fn open(&self, target: &ConnectTarget) -> TransportResult<TransportLink>;
}
