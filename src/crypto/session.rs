//! Per-connection symmetric session.
//!
//! A [`Session`] owns the key material, the server-assigned session id and the
//! send sequence. It enforces:
//! - no application frame is sealed before the handshake completes
//! - the sequence increments exactly once per successfully sealed frame and
//!   only resets on a fresh handshake
//! - once ready, a frame whose AAD names another session is rejected

use std::time::{SystemTime, UNIX_EPOCH};

use crate::core::CryptoError;

use super::{
    aead::{decrypt, encrypt, random_nonce, Aad, EncryptedPayload},
    SessionId, SessionKey,
};

/// Symmetric state of one connection attempt.
#[derive(Debug)]
pub struct Session {
    /// Local key; `None` until a handshake starts.
    key: Option<SessionKey>,
    /// Server-assigned id; zero until the handshake completes.
    session_id: SessionId,
    /// Sequence number for the next sealed frame.
    send_sequence: u32,
    /// Set once the server acknowledged the key.
    handshake_complete: bool,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// Create an empty session with no key.
    pub fn new() -> Self {
        Self {
            key: None,
            session_id: SessionId::ZERO,
            send_sequence: 0,
            handshake_complete: false,
        }
    }

    /// Start a handshake with a freshly generated key.
    pub fn with_key(key: SessionKey) -> Self {
        Self {
            key: Some(key),
            ..Self::new()
        }
    }

    /// Create the server side of an established session.
    pub fn responder(key: SessionKey, session_id: SessionId) -> Self {
        let mut session = Self::with_key(key);
        session.complete_handshake(session_id);
        session
    }

    /// Mark the handshake complete under the server-assigned id.
    ///
    /// Resets the send sequence; this is the only place it is reset.
    pub fn complete_handshake(&mut self, session_id: SessionId) {
        self.session_id = session_id;
        self.send_sequence = 0;
        self.handshake_complete = true;
    }

    /// Whether application frames may be sealed.
    pub fn is_ready(&self) -> bool {
        self.handshake_complete && self.key.is_some()
    }

    /// Get the session id (zero before completion).
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Sequence number the next sealed frame will carry.
    pub fn send_sequence(&self) -> u32 {
        self.send_sequence
    }

    /// Seal an application frame.
    ///
    /// Returns the wire bytes of an [`EncryptedPayload`].
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if !self.handshake_complete {
            return Err(CryptoError::NotReady);
        }
        let key = self.key.as_ref().ok_or(CryptoError::NoKey)?;
        if self.send_sequence == u32::MAX {
            return Err(CryptoError::SequenceExhausted);
        }

        let aad = Aad {
            sequence: self.send_sequence,
            session_id: self.session_id,
            timestamp_ms: now_ms(),
        };
        let nonce = random_nonce();
        let ciphertext = encrypt(key, &nonce, &aad.to_bytes(), plaintext)?;

        self.send_sequence += 1;
        Ok(EncryptedPayload {
            nonce,
            aad,
            ciphertext,
        }
        .to_bytes())
    }

    /// Open a received frame payload.
    ///
    /// Returns `Ok(None)` for the keepalive sentinel. Every other failure is
    /// fatal for the frame.
    pub fn decrypt(&self, payload: &[u8]) -> Result<Option<Vec<u8>>, CryptoError> {
        let key = self.key.as_ref().ok_or(CryptoError::NoKey)?;
        let sealed = EncryptedPayload::from_bytes(payload)?;
        if sealed.is_keepalive() {
            return Ok(None);
        }

        if self.handshake_complete && sealed.aad.session_id != self.session_id {
            return Err(CryptoError::SessionMismatch {
                expected: self.session_id.0,
                actual: sealed.aad.session_id.0,
            });
        }

        decrypt(key, &sealed.nonce, &sealed.aad.to_bytes(), &sealed.ciphertext).map(Some)
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
