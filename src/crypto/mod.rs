//! Security layer.
//!
//! - [`SessionKey`] / [`SessionId`]: key material and server-assigned ids
//! - [`aead`]: AES-128-GCM sealing with the 20-byte AAD
//! - [`ecies`]: P-256 ECIES wrap of the session key
//! - [`Session`]: sequence-tracked sealing for one connection attempt
//! - [`handshake`]: key-exchange messages for both ends

pub mod aead;
pub mod ecies;
pub mod handshake;
mod keys;
mod session;

pub use aead::{Aad, EncryptedPayload};
pub use ecies::PeerPublicKey;
pub use handshake::{
    parse_session_id, HandshakeInitiator, HandshakeRequest, HandshakeResponder, KeyTransport,
};
pub use keys::{SessionId, SessionKey};
pub use session::Session;
