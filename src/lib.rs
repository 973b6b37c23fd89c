//! # chatlink
//!
//! Secure transport and resilient push-event core for chat clients.
//!
//! chatlink sits between a chat application and its servers. It provides:
//!
//! - **Session security**: a handshake that installs an AES-128-GCM session
//!   key, wrapped with P-256 ECIES when the transport is not confidential
//! - **Framing**: length-prefixed frames with configurable header width,
//!   byte order and length semantics
//! - **Multiplexing**: up to 256 concurrent requests over one connection,
//!   plus long-lived subscriptions and server broadcasts
//! - **Per-server connections**: a registry enforcing one connection per
//!   server identity, with policy-driven TLS address rewriting
//! - **Push events**: an authenticated event stream with heartbeats,
//!   jittered reconnects, resume from the last applied event and a bounded
//!   catch-up when resume is impossible
//!
//! ## Feature Flags
//!
//! - `crypto` (default): AES-GCM session cipher and ECIES key wrap
//! - `transport` (default): frames, envelopes, multiplexer, connections
//! - `tcp` (default): tokio TCP adapter for the host transport boundary
//! - `stream` (default): push-event stream client
//! - `client` (default): [`client::IdentityRegistry`] over both
//!
//! ## Modules
//!
//! - [`core`]: constants, errors, identities and host interfaces (always included)
//! - [`crypto`]: security layer (requires `crypto` feature)
//! - [`transport`]: transport layer (requires `transport` feature)
//! - [`stream`]: push-event stream (requires `stream` feature)
//! - [`client`]: per-identity registry (requires `client` feature)
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use chatlink::prelude::*;
//! use std::sync::Arc;
//!
//! let connections = ConnectionRegistry::new(
//!     Arc::new(TcpConnector::default()),
//!     ConnectionConfig::default(),
//! );
//! let registry = IdentityRegistry::new(
//!     connections,
//!     Arc::new(push_connector),
//!     Arc::new(FileCursorStore::new("cursors.json")),
//!     Arc::new(read_model),
//!     Arc::new(event_handler),
//! );
//!
//! let endpoint = EndpointConfig::new("work", "chat.example:7000")
//!     .with_tls_policy(TlsPolicy::Plaintext)
//!     .with_peer_public_key(server_key_base64);
//! let stream = StreamConfig::builder("ws://chat.example:7001/push", device_id)
//!     .access_token(token)
//!     .tls_policy(TlsPolicy::Plaintext)
//!     .build();
//!
//! let connection = registry.open(&endpoint, stream).await?;
//! let me = connection.request("user.me", serde_json::Value::Null).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

// Crypto layer (feature-gated)
#[cfg(feature = "crypto")]
#[cfg_attr(docsrs, doc(cfg(feature = "crypto")))]
pub mod crypto;

// Transport layer (feature-gated)
#[cfg(feature = "transport")]
#[cfg_attr(docsrs, doc(cfg(feature = "transport")))]
pub mod transport;

// Push event stream (feature-gated)
#[cfg(feature = "stream")]
#[cfg_attr(docsrs, doc(cfg(feature = "stream")))]
pub mod stream;

// Client API (feature-gated)
#[cfg(feature = "client")]
#[cfg_attr(docsrs, doc(cfg(feature = "client")))]
pub mod client;

/// Prelude module for convenient imports.
pub mod prelude {
    // Core traits and types
    pub use crate::core::*;

    // Crypto types (when enabled)
    #[cfg(feature = "crypto")]
    pub use crate::crypto::{PeerPublicKey, Session, SessionId, SessionKey};

    // Transport types (when enabled)
    #[cfg(feature = "transport")]
    pub use crate::transport::{
        Connection, ConnectionConfig, ConnectionRegistry, EndpointConfig, FrameConfig, TlsPolicy,
        Transport, TransportConnector, TransportError, TransportLink, TransportResult,
    };

    #[cfg(feature = "tcp")]
    pub use crate::transport::TcpConnector;

    // Stream types (when enabled)
    #[cfg(feature = "stream")]
    pub use crate::stream::{
        CursorStore, EventHandler, EventId, EventStreamClient, EventStreamHandle,
        FileCursorStore, MemoryCursorStore, PushChannel, PushConnector, PushEvent, PushLink,
        PushTarget, StreamConfig, StreamError, StreamState,
    };

    // Client types (when enabled)
    #[cfg(feature = "client")]
    pub use crate::client::{ClientError, ClientResult, IdentityRegistry};
}

// Re-export commonly used items at crate root
pub use crate::core::{ApplyError, ChatlinkError, ConnectionState, ReadModel, ResourceId, ServerIdentity};

#[cfg(feature = "crypto")]
pub use crate::crypto::{SessionId, SessionKey};

#[cfg(feature = "transport")]
pub use crate::transport::{Connection, ConnectionRegistry, TlsPolicy};

#[cfg(feature = "stream")]
pub use crate::stream::{EventStreamClient, StreamState};

#[cfg(feature = "client")]
pub use crate::client::IdentityRegistry;
