//! Event stream error types.
//!
//! Only configuration and store errors ever reach the caller. Everything that
//! goes wrong on the wire is handled by the reconnect state machine.

use std::io;

use thiserror::Error;

/// Errors persisting or loading an event cursor.
#[derive(Debug, Error)]
pub enum CursorError {
    /// Cursor file could not be read or written.
    #[error("cursor store i/o error: {0}")]
    Io(#[from] io::Error),

    /// Cursor file is not a JSON object of identity to event id.
    #[error("cursor store is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Push channel errors.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The push channel could not be opened.
    #[error("push channel connect failed: {0}")]
    Connect(String),

    /// A command could not be written to the push channel.
    #[error("push channel send failed: {0}")]
    Send(String),

    /// The push channel is closed.
    #[error("push channel closed")]
    Closed,

    /// A message could not be encoded or decoded.
    #[error("push message error: {0}")]
    Json(#[from] serde_json::Error),

    /// Inbound message was valid JSON but not a known message shape.
    #[error("unexpected push message: {0}")]
    Protocol(String),

    /// Cursor persistence failed.
    #[error(transparent)]
    Cursor(#[from] CursorError),
}

/// Result type for event stream operations.
pub type StreamResult<T> = Result<T, StreamError>;
