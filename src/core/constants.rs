//! Protocol constants.
//!
//! Wire sizes are fixed by the frame layout and MUST NOT be changed without a
//! coordinated server release. Timing values are defaults; the config structs
//! allow overriding them.

use std::time::Duration;

// =============================================================================
// CRYPTOGRAPHIC CONSTANTS
// =============================================================================

/// AES-128 session key size.
pub const SESSION_KEY_SIZE: usize = 16;

/// AES-GCM nonce size.
pub const AEAD_NONCE_SIZE: usize = 12;

/// AES-GCM authentication tag size.
pub const AEAD_TAG_SIZE: usize = 16;

/// AAD size: sequence (4) + session id (8) + timestamp ms (8).
pub const AAD_SIZE: usize = 20;

/// Sealed payload prefix: nonce + AAD.
pub const SEALED_HEADER_SIZE: usize = AEAD_NONCE_SIZE + AAD_SIZE;

/// Uncompressed SEC1 P-256 public key size.
pub const P256_PUBLIC_KEY_SIZE: usize = 65;

/// HMAC-SHA256 tag size used by the ECIES key wrap.
pub const ECIES_TAG_SIZE: usize = 32;

/// HKDF info string for the ECIES key wrap.
pub const ECIES_KDF_INFO: &[u8] = b"chatlink-ecies-v1";

// =============================================================================
// FRAMING
// =============================================================================

/// Default upper bound for a single decoded frame (16 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

// =============================================================================
// ENVELOPE ROUTES
// =============================================================================

/// Route marker of the handshake request and response.
pub const HANDSHAKE_ROUTE: &str = "handshake";

/// Reserved route marker for server broadcasts (not tied to a request id).
pub const BROADCAST_ROUTE: &str = "broadcast";

/// Size of the request id space (ids are `0..=255`).
pub const REQUEST_ID_SPACE: usize = 256;

// =============================================================================
// TIMING - CONNECTION
// =============================================================================

/// A handshake that has not completed after this long fails the connect.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);

/// Default time to wait for a response to a multiplexed request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// =============================================================================
// TIMING - PUSH CHANNEL
// =============================================================================

/// Heartbeat (`ping`) interval once authenticated.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// First reconnect delay.
pub const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Reconnect delay ceiling.
pub const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Upper bound of the random jitter added to each reconnect delay.
pub const RECONNECT_MAX_JITTER: Duration = Duration::from_millis(250);

/// Interval of the poll fallback when the push channel cannot be used.
pub const POLL_INTERVAL: Duration = Duration::from_secs(8);

/// Max number of extra resources refreshed during one catch-up.
pub const CATCH_UP_LIMIT: usize = 5;

// =============================================================================
// PUSH PROTOCOL
// =============================================================================

/// Push protocol version sent with `auth`.
pub const PUSH_API_VERSION: u32 = 1;
