//! Transport layer.
//!
//! - **Framing**: [`encode`], [`decode`] and the streaming [`FrameDecoder`]
//! - **Envelopes**: [`Envelope`] out, [`Inbound`] in
//! - **Multiplexing**: [`RequestMultiplexer`] over the 8-bit request id space
//! - **Policy**: [`TlsPolicy`] and connect-address rewriting
//! - **Connections**: [`Connection`] and the per-identity [`ConnectionRegistry`]
//! - **Host boundary**: [`Transport`] / [`TransportConnector`], with a tokio
//!   TCP adapter behind the `tcp` feature
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        ConnectionRegistry               │
//! ├─────────────────────────────────────────┤
//! │   Connection: envelopes, multiplexer    │  ← This module
//! ├─────────────────────────────────────────┤
//! │   Session: handshake, AES-GCM sealing   │
//! ├─────────────────────────────────────────┤
//! │   Frames over the host transport        │
//! └─────────────────────────────────────────┘
//! ```

mod connection;
mod envelope;
mod error;
mod frame;
mod host;
mod mux;
mod policy;
mod registry;
#[cfg(feature = "tcp")]
#[cfg_attr(docsrs, doc(cfg(feature = "tcp")))]
mod socket;

pub use connection::{Connection, ConnectionConfig, ConnectionConfigBuilder, EndpointConfig};
pub use envelope::{Envelope, Inbound};
pub use error::{TransportError, TransportResult};
pub use frame::{decode, encode, Endianness, FrameConfig, FrameDecoder, FrameError, HeaderWidth};
pub use host::{ConnectTarget, Transport, TransportConnector, TransportLink};
pub use mux::RequestMultiplexer;
pub use policy::{parse_fingerprint, TlsPolicy, FINGERPRINT_SIZE};
pub use registry::ConnectionRegistry;
#[cfg(feature = "tcp")]
pub use socket::{TcpConnector, TcpTransport, DEFAULT_INBOUND_CAPACITY, DEFAULT_READ_BUFFER_SIZE};
