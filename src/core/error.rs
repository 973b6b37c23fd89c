//! Error types shared across layers.

use thiserror::Error;

/// Errors raised by a consumer while applying a pushed event.
///
/// Returning any of these from an event handler keeps the cursor where it is,
/// so the event is applied again when it is redelivered.
#[derive(Debug, Error, Clone)]
pub enum ApplyError {
    /// The event payload did not have the expected shape.
    #[error("invalid event payload: {0}")]
    InvalidPayload(String),

    /// Local state could not be updated.
    #[error("apply failed: {0}")]
    Failed(String),
}

/// Errors in the crypto layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// An application frame was sealed before the handshake completed.
    #[error("session not ready: handshake has not completed")]
    NotReady,

    /// No key material exists for this session.
    #[error("no session key")]
    NoKey,

    /// AEAD encryption failed.
    #[error("AEAD encryption failed")]
    EncryptionFailed,

    /// AEAD decryption failed (invalid tag or corrupted).
    #[error("AEAD decryption failed (invalid tag or corrupted)")]
    DecryptionFailed,

    /// The AAD names a different session than the local one.
    #[error("session mismatch: expected {expected}, frame carries {actual}")]
    SessionMismatch {
        /// Local session id.
        expected: u64,
        /// Session id embedded in the frame AAD.
        actual: u64,
    },

    /// Send sequence counter exhausted - session must be re-established.
    #[error("send sequence exhausted - session must be re-established")]
    SequenceExhausted,

    /// Sealed payload too short to hold nonce, AAD and tag.
    #[error("malformed sealed payload: {len} bytes")]
    MalformedPayload {
        /// Length of the rejected payload.
        len: usize,
    },

    /// Peer public key is not a valid P-256 point.
    #[error("invalid peer public key")]
    InvalidPublicKey,

    /// Wrapped key is malformed or its tag does not verify.
    #[error("key unwrap failed")]
    KeyUnwrapFailed,

    /// Key derivation failed.
    #[error("key derivation failed")]
    KeyDerivationFailed,
}

/// Errors while establishing a session.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// No handshake response arrived in time.
    #[error("handshake timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The handshake response could not be parsed.
    #[error("malformed handshake response: {0}")]
    MalformedResponse(String),

    /// The transport is not confidential and no peer key is known to wrap the
    /// session key with.
    #[error("peer public key required on a non-confidential transport")]
    MissingPeerKey,

    /// The transport closed before the handshake completed.
    #[error("transport closed during handshake")]
    TransportClosed,

    /// Crypto failure while building or completing the handshake.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

/// Top-level chatlink errors.
#[derive(Debug, Error)]
pub enum ChatlinkError {
    /// Crypto error.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Handshake error.
    #[error("handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// JSON encoding or decoding error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport error.
    #[cfg(feature = "transport")]
    #[error("transport error: {0}")]
    Transport(#[from] crate::transport::TransportError),

    /// Event stream error.
    #[cfg(feature = "stream")]
    #[error("event stream error: {0}")]
    Stream(#[from] crate::stream::StreamError),

    /// Cursor store error.
    #[cfg(feature = "stream")]
    #[error("cursor error: {0}")]
    Cursor(#[from] crate::stream::CursorError),

    /// Identity registry error.
    #[cfg(feature = "client")]
    #[error(transparent)]
    Client(#[from] crate::client::ClientError),
}

/// Failure of one external read-model refresh during catch-up or polling.
///
/// Catch-up logs these per item and carries on with the rest of the batch.
#[derive(Debug, Error, Clone)]
pub enum CatchUpError {
    /// The read API returned an error.
    #[error("read api error: {0}")]
    Api(String),

    /// The request did not complete.
    #[error("network error: {0}")]
    Network(String),
}
