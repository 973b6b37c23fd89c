//! ECIES key wrap over P-256.
//!
//! Used to deliver the session key when the transport itself is not
//! confidential:
//!
//! 1. ephemeral P-256 key pair, ECDH with the server's public key
//! 2. HKDF-SHA256 over the shared x-coordinate, expanded to
//!    `len(key) + 32` bytes
//! 3. the first `len(key)` bytes are XORed into the key, the last 32 key an
//!    HMAC-SHA256 tag over the resulting ciphertext
//!
//! Output: `ephemeral_public (65, SEC1 uncompressed) | ciphertext | tag (32)`.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use p256::{
    ecdh::{diffie_hellman, EphemeralSecret},
    elliptic_curve::sec1::ToEncodedPoint,
    PublicKey, SecretKey,
};
use rand::rngs::OsRng;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::core::{CryptoError, ECIES_KDF_INFO, ECIES_TAG_SIZE, P256_PUBLIC_KEY_SIZE};

type HmacSha256 = Hmac<Sha256>;

/// The server's long-term P-256 public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerPublicKey(PublicKey);

impl PeerPublicKey {
    /// Parse a SEC1-encoded (compressed or uncompressed) point.
    pub fn from_sec1_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        PublicKey::from_sec1_bytes(bytes)
            .map(Self)
            .map_err(|_| CryptoError::InvalidPublicKey)
    }

    /// Parse a standard-base64 SEC1 point, as found in server configuration.
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|_| CryptoError::InvalidPublicKey)?;
        Self::from_sec1_bytes(&bytes)
    }

    /// Uncompressed SEC1 encoding.
    pub fn to_sec1_bytes(&self) -> Vec<u8> {
        self.0.to_encoded_point(false).as_bytes().to_vec()
    }
}

impl From<PublicKey> for PeerPublicKey {
    fn from(key: PublicKey) -> Self {
        Self(key)
    }
}

/// Derive the XOR stream and MAC key from an ECDH shared secret.
fn derive_keys(
    shared: &[u8],
    stream_len: usize,
) -> Result<(Zeroizing<Vec<u8>>, Zeroizing<Vec<u8>>), CryptoError> {
    let hk = Hkdf::<Sha256>::new(None, shared);
    let mut okm = Zeroizing::new(vec![0u8; stream_len + ECIES_TAG_SIZE]);
    hk.expand(ECIES_KDF_INFO, &mut okm)
        .map_err(|_| CryptoError::KeyDerivationFailed)?;

    let stream = Zeroizing::new(okm[..stream_len].to_vec());
    let mac_key = Zeroizing::new(okm[stream_len..].to_vec());
    Ok((stream, mac_key))
}

fn tag(mac_key: &[u8], ciphertext: &[u8]) -> Result<HmacSha256, CryptoError> {
    let mut mac =
        HmacSha256::new_from_slice(mac_key).map_err(|_| CryptoError::KeyDerivationFailed)?;
    mac.update(ciphertext);
    Ok(mac)
}

/// Wrap `key` for the holder of `peer`'s private key.
pub fn wrap_key(peer: &PeerPublicKey, key: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let ephemeral = EphemeralSecret::random(&mut OsRng);
    let ephemeral_public = ephemeral.public_key().to_encoded_point(false);
    let shared = ephemeral.diffie_hellman(&peer.0);

    let (stream, mac_key) = derive_keys(shared.raw_secret_bytes().as_slice(), key.len())?;
    let ciphertext: Vec<u8> = key.iter().zip(stream.iter()).map(|(k, s)| k ^ s).collect();
    let tag = tag(&mac_key, &ciphertext)?.finalize().into_bytes();

    let mut out = Vec::with_capacity(P256_PUBLIC_KEY_SIZE + ciphertext.len() + ECIES_TAG_SIZE);
    out.extend_from_slice(ephemeral_public.as_bytes());
    out.extend_from_slice(&ciphertext);
    out.extend_from_slice(&tag);
    Ok(out)
}

/// Recover a key wrapped with [`wrap_key`]. Server side of the handshake.
pub fn unwrap_key(secret: &SecretKey, wrapped: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if wrapped.len() <= P256_PUBLIC_KEY_SIZE + ECIES_TAG_SIZE {
        return Err(CryptoError::KeyUnwrapFailed);
    }

    let (ephemeral, rest) = wrapped.split_at(P256_PUBLIC_KEY_SIZE);
    let (ciphertext, expected_tag) = rest.split_at(rest.len() - ECIES_TAG_SIZE);

    let ephemeral = PublicKey::from_sec1_bytes(ephemeral).map_err(|_| CryptoError::KeyUnwrapFailed)?;
    let shared = diffie_hellman(secret.to_nonzero_scalar(), ephemeral.as_affine());

    let (stream, mac_key) = derive_keys(shared.raw_secret_bytes().as_slice(), ciphertext.len())?;
    tag(&mac_key, ciphertext)?
        .verify_slice(expected_tag)
        .map_err(|_| CryptoError::KeyUnwrapFailed)?;

    Ok(Zeroizing::new(
        ciphertext.iter().zip(stream.iter()).map(|(c, s)| c ^ s).collect(),
    ))
}
