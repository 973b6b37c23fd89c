//! Transport layer error types.
//!
//! Protocol violations are fatal for the connection they occur on and are
//! never masked; see [`TransportError::is_protocol_violation`].

use std::io;

use thiserror::Error;

use crate::core::{CryptoError, HandshakeError};

use super::frame::FrameError;

/// Transport layer errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Frame encoding or decoding error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Sealing or opening a frame failed.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Session establishment failed.
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    /// I/O error from the host transport.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// Envelope was not valid JSON or had the wrong shape.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// A connect address could not be rewritten for its TLS policy.
    #[error("invalid address {address:?}: {reason}")]
    InvalidAddress {
        /// The rejected address.
        address: String,
        /// What was wrong with it.
        reason: String,
    },

    /// Pinned-certificate fingerprint is not 32 hex-encoded bytes.
    #[error("invalid certificate fingerprint: {0}")]
    InvalidFingerprint(String),

    /// No reply arrived for a request in time.
    #[error("request {request_id} timed out")]
    RequestTimeout {
        /// Id the request was registered under.
        request_id: u8,
    },

    /// The pending request was released before a reply arrived.
    #[error("request {request_id} was cancelled")]
    RequestCancelled {
        /// Id the request was registered under.
        request_id: u8,
    },

    /// A connect is already in progress for this identity.
    #[error("handshake already in progress for {0}")]
    HandshakeInProgress(String),

    /// Connection is closed.
    #[error("connection closed")]
    ConnectionClosed,
}

impl TransportError {
    /// Check if this error is a protocol violation: malformed framing, session
    /// confusion or a frame that failed authentication.
    pub fn is_protocol_violation(&self) -> bool {
        match self {
            TransportError::Frame(_) | TransportError::MalformedEnvelope(_) => true,
            TransportError::Crypto(err) => matches!(
                err,
                CryptoError::DecryptionFailed
                    | CryptoError::SessionMismatch { .. }
                    | CryptoError::MalformedPayload { .. }
            ),
            _ => false,
        }
    }

    /// Check if this error is fatal to the connection.
    pub fn is_fatal(&self) -> bool {
        self.is_protocol_violation()
            || matches!(
                self,
                TransportError::Io(_)
                    | TransportError::Handshake(_)
                    | TransportError::ConnectionClosed
                    | TransportError::Crypto(CryptoError::SequenceExhausted)
            )
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_violations_are_fatal() {
        let errors = [
            TransportError::Crypto(CryptoError::SessionMismatch {
                expected: 1,
                actual: 2,
            }),
            TransportError::Crypto(CryptoError::DecryptionFailed),
            TransportError::Frame(FrameError::LengthBelowHeader {
                length: 1,
                header: 4,
            }),
        ];
        for err in errors {
            assert!(err.is_protocol_violation(), "{err}");
            assert!(err.is_fatal(), "{err}");
        }
    }

    #[test]
    fn test_request_errors_are_not_fatal() {
        assert!(!TransportError::RequestTimeout { request_id: 7 }.is_fatal());
        assert!(!TransportError::RequestCancelled { request_id: 7 }.is_fatal());
        assert!(!TransportError::Crypto(CryptoError::NotReady).is_protocol_violation());
    }

    #[test]
    fn test_handshake_failure_is_fatal_not_violation() {
        let err = TransportError::from(HandshakeError::Timeout(std::time::Duration::from_secs(15)));
        assert!(err.is_fatal());
        assert!(!err.is_protocol_violation());
    }
}
