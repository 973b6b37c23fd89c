//! AES-128-GCM sealing of application frames.
//!
//! Every frame after handshake completion is carried as an
//! [`EncryptedPayload`]:
//!
//! ```text
//! +--------------+---------------------------------------+------------------+
//! | Nonce        | AAD                                   | Ciphertext + tag |
//! | 12 bytes     | seq (BE32) | session (BE64) | ts (BE64) | n + 16 bytes    |
//! +--------------+---------------------------------------+------------------+
//! ```
//!
//! A payload with an all-zero nonce and no ciphertext is the keepalive
//! sentinel.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes128Gcm, Nonce,
};
use rand::{rngs::OsRng, RngCore};

use crate::core::{CryptoError, AAD_SIZE, AEAD_NONCE_SIZE, AEAD_TAG_SIZE, SEALED_HEADER_SIZE};

use super::{SessionId, SessionKey};

/// Additional authenticated data bound into every sealed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aad {
    /// Per-session send sequence.
    pub sequence: u32,
    /// Session the frame belongs to.
    pub session_id: SessionId,
    /// Sender wall clock, milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
}

impl Aad {
    /// Serialize to the 20-byte wire layout.
    pub fn to_bytes(&self) -> [u8; AAD_SIZE] {
        let mut buf = [0u8; AAD_SIZE];
        buf[0..4].copy_from_slice(&self.sequence.to_be_bytes());
        buf[4..12].copy_from_slice(&self.session_id.to_be_bytes());
        buf[12..20].copy_from_slice(&self.timestamp_ms.to_be_bytes());
        buf
    }

    /// Parse from the 20-byte wire layout.
    pub fn from_bytes(bytes: &[u8; AAD_SIZE]) -> Self {
        let sequence = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let mut session = [0u8; 8];
        session.copy_from_slice(&bytes[4..12]);
        let mut ts = [0u8; 8];
        ts.copy_from_slice(&bytes[12..20]);
        Self {
            sequence,
            session_id: SessionId::from_be_bytes(session),
            timestamp_ms: u64::from_be_bytes(ts),
        }
    }
}

/// A sealed frame payload: nonce, AAD and ciphertext with appended tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedPayload {
    /// Random 96-bit nonce.
    pub nonce: [u8; AEAD_NONCE_SIZE],
    /// Authenticated header.
    pub aad: Aad,
    /// Ciphertext followed by the 16-byte tag. Empty for keepalives.
    pub ciphertext: Vec<u8>,
}

impl EncryptedPayload {
    /// The keepalive sentinel for a session.
    pub fn keepalive(session_id: SessionId) -> Self {
        Self {
            nonce: [0u8; AEAD_NONCE_SIZE],
            aad: Aad {
                sequence: 0,
                session_id,
                timestamp_ms: 0,
            },
            ciphertext: Vec::new(),
        }
    }

    /// Whether this is the keepalive sentinel.
    pub fn is_keepalive(&self) -> bool {
        self.ciphertext.is_empty() && self.nonce.iter().all(|b| *b == 0)
    }

    /// Serialize to wire bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(SEALED_HEADER_SIZE + self.ciphertext.len());
        buf.extend_from_slice(&self.nonce);
        buf.extend_from_slice(&self.aad.to_bytes());
        buf.extend_from_slice(&self.ciphertext);
        buf
    }

    /// Parse wire bytes.
    ///
    /// Anything other than the keepalive sentinel must carry at least a tag.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() < SEALED_HEADER_SIZE {
            return Err(CryptoError::MalformedPayload { len: bytes.len() });
        }

        let mut nonce = [0u8; AEAD_NONCE_SIZE];
        nonce.copy_from_slice(&bytes[..AEAD_NONCE_SIZE]);
        let mut aad = [0u8; AAD_SIZE];
        aad.copy_from_slice(&bytes[AEAD_NONCE_SIZE..SEALED_HEADER_SIZE]);

        let payload = Self {
            nonce,
            aad: Aad::from_bytes(&aad),
            ciphertext: bytes[SEALED_HEADER_SIZE..].to_vec(),
        };

        if !payload.is_keepalive() && payload.ciphertext.len() < AEAD_TAG_SIZE {
            return Err(CryptoError::MalformedPayload { len: bytes.len() });
        }
        Ok(payload)
    }
}

/// Generate a random nonce.
pub fn random_nonce() -> [u8; AEAD_NONCE_SIZE] {
    let mut nonce = [0u8; AEAD_NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Encrypt plaintext using AES-128-GCM.
///
/// # Returns
/// Ciphertext with appended 16-byte tag
pub fn encrypt(
    key: &SessionKey,
    nonce: &[u8; AEAD_NONCE_SIZE],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes128Gcm::new(key.as_bytes().into());

    cipher
        .encrypt(Nonce::from_slice(nonce), Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::EncryptionFailed)
}

/// Decrypt ciphertext using AES-128-GCM.
///
/// # Returns
/// Decrypted plaintext, or error if authentication fails
pub fn decrypt(
    key: &SessionKey,
    nonce: &[u8; AEAD_NONCE_SIZE],
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.len() < AEAD_TAG_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }

    let cipher = Aes128Gcm::new(key.as_bytes().into());

    cipher
        .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad })
        .map_err(|_| CryptoError::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SESSION_KEY_SIZE;

    fn aad() -> Aad {
        Aad {
            sequence: 7,
            session_id: SessionId(0x1122_3344_5566_7788),
            timestamp_ms: 1_700_000_000_000,
        }
    }

    #[test]
    fn test_aad_layout() {
        let bytes = aad().to_bytes();
        assert_eq!(&bytes[0..4], &[0, 0, 0, 7]);
        assert_eq!(hex::encode(&bytes[4..12]), "1122334455667788");
        assert_eq!(&bytes[12..20], &1_700_000_000_000u64.to_be_bytes());
        assert_eq!(Aad::from_bytes(&bytes), aad());
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = SessionKey::from_bytes([0x42; SESSION_KEY_SIZE]);
        let nonce = random_nonce();
        let aad = aad().to_bytes();

        let ciphertext = encrypt(&key, &nonce, &aad, b"hello").unwrap();
        assert_eq!(ciphertext.len(), 5 + AEAD_TAG_SIZE);
        assert_eq!(decrypt(&key, &nonce, &aad, &ciphertext).unwrap(), b"hello");
    }

    #[test]
    fn test_decrypt_wrong_aad_fails() {
        let key = SessionKey::from_bytes([0x42; SESSION_KEY_SIZE]);
        let nonce = random_nonce();
        let ciphertext = encrypt(&key, &nonce, &aad().to_bytes(), b"secret").unwrap();

        let mut other = aad();
        other.sequence += 1;
        let result = decrypt(&key, &nonce, &other.to_bytes(), &ciphertext);
        assert_eq!(result, Err(CryptoError::DecryptionFailed));
    }

    #[test]
    fn test_decrypt_corrupted_ciphertext_fails() {
        let key = SessionKey::from_bytes([0x42; SESSION_KEY_SIZE]);
        let nonce = random_nonce();
        let aad = aad().to_bytes();
        let mut ciphertext = encrypt(&key, &nonce, &aad, b"secret").unwrap();
        ciphertext[0] ^= 0xFF;

        assert_eq!(
            decrypt(&key, &nonce, &aad, &ciphertext),
            Err(CryptoError::DecryptionFailed)
        );
    }

    #[test]
    fn test_keepalive_sentinel_parses() {
        let bytes = EncryptedPayload::keepalive(SessionId(9)).to_bytes();
        assert_eq!(bytes.len(), SEALED_HEADER_SIZE);

        let parsed = EncryptedPayload::from_bytes(&bytes).unwrap();
        assert!(parsed.is_keepalive());
    }

    #[test]
    fn test_empty_ciphertext_with_nonzero_nonce_is_malformed() {
        let mut payload = EncryptedPayload::keepalive(SessionId(9));
        payload.nonce[3] = 1;
        let result = EncryptedPayload::from_bytes(&payload.to_bytes());
        assert!(matches!(result, Err(CryptoError::MalformedPayload { .. })));
    }

    #[test]
    fn test_too_short_is_malformed() {
        let result = EncryptedPayload::from_bytes(&[0u8; SEALED_HEADER_SIZE - 1]);
        assert_eq!(
            result,
            Err(CryptoError::MalformedPayload {
                len: SEALED_HEADER_SIZE - 1
            })
        );
    }
}
