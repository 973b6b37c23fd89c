//! Client layer errors.

use thiserror::Error;

use crate::stream::{CursorError, StreamError};
use crate::transport::TransportError;

/// Errors from [`IdentityRegistry`](super::IdentityRegistry) operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Connection or handshake failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Event stream failure.
    #[error("event stream error: {0}")]
    Stream(#[from] StreamError),

    /// Cursor could not be cleared during a reset.
    #[error("cursor error: {0}")]
    Cursor(#[from] CursorError),

    /// No event stream runs for this identity.
    #[error("no event stream for {0}")]
    NoStream(String),
}

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;
