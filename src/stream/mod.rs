//! Push event stream.
//!
//! - [`protocol`]: `auth` / `reauth` / `ping` commands and inbound messages
//! - [`EventCursor`] and [`CursorStore`]: last applied event per identity
//! - [`ReconnectBackoff`]: 1s, 2s, 4s … capped at 30s, plus jitter
//! - [`catch_up`]: bounded reconciliation after a failed resume
//! - [`Poller`]: fixed-interval fallback when the push channel is unusable
//! - [`EventStreamClient`]: the state machine tying these together

mod backoff;
mod catchup;
mod channel;
mod client;
mod cursor;
mod error;
mod poll;
pub mod protocol;

pub use backoff::{BackoffConfig, ReconnectBackoff};
pub use catchup::{catch_up, refresh_current, CatchUpReport};
pub use channel::{PushChannel, PushConnector, PushLink, PushTarget};
pub use client::{
    AuthFailure, EventHandler, EventStreamClient, EventStreamHandle, StreamConfig,
    StreamConfigBuilder, StreamState,
};
pub use cursor::{CursorStore, EventCursor, FileCursorStore, MemoryCursorStore};
pub use error::{CursorError, StreamError, StreamResult};
pub use poll::{PollGate, PollGuard, Poller};
pub use protocol::{Command, EventId, PushEvent, ServerMessage};
