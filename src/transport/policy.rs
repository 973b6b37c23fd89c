//! TLS policy and connect-address rewriting.
//!
//! The host transport reads the policy off the address scheme:
//!
//! | Policy      | Address                                   |
//! |-------------|-------------------------------------------|
//! | `Plaintext` | `tcp://host:port`                         |
//! | `Strict`    | `tls://host:port`                         |
//! | `Insecure`  | `tls+insecure://host:port`                |
//! | `Pinned`    | `tls+pinned://host:port?sha256=<hex>`     |
//!
//! A policy never degrades to a weaker one. An address that already carries a
//! scheme is rejected rather than overridden.

use serde::{Deserialize, Serialize};

use super::error::{TransportError, TransportResult};

/// SHA-256 certificate fingerprint length.
pub const FINGERPRINT_SIZE: usize = 32;

/// How the transport to a server is secured.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum TlsPolicy {
    /// Plain TCP.
    Plaintext,
    /// TLS with normal certificate validation.
    #[default]
    Strict,
    /// TLS without certificate validation.
    Insecure,
    /// TLS accepting exactly one certificate, by SHA-256 fingerprint.
    Pinned {
        /// Hex fingerprint; `:` separators are allowed.
        fingerprint: String,
    },
}

impl TlsPolicy {
    /// Whether the transport authenticates the server and encrypts traffic.
    ///
    /// `Insecure` encrypts but does not authenticate, so it counts as
    /// non-confidential.
    pub fn is_confidential(&self) -> bool {
        matches!(self, TlsPolicy::Strict | TlsPolicy::Pinned { .. })
    }

    /// Whether the push channel can honour this policy.
    pub fn supports_push_channel(&self) -> bool {
        matches!(self, TlsPolicy::Strict | TlsPolicy::Plaintext)
    }

    /// Address scheme for this policy.
    pub fn scheme(&self) -> &'static str {
        match self {
            TlsPolicy::Plaintext => "tcp",
            TlsPolicy::Strict => "tls",
            TlsPolicy::Insecure => "tls+insecure",
            TlsPolicy::Pinned { .. } => "tls+pinned",
        }
    }

    /// Rewrite a bare `host:port` into the address handed to the host
    /// transport.
    pub fn rewrite_address(&self, address: &str) -> TransportResult<String> {
        let address = address.trim();
        if address.is_empty() {
            return Err(invalid(address, "empty address"));
        }
        if address.contains("://") {
            return Err(invalid(address, "address must not carry a scheme"));
        }

        match self {
            TlsPolicy::Pinned { fingerprint } => {
                let digest = parse_fingerprint(fingerprint)?;
                Ok(format!(
                    "{}://{}?sha256={}",
                    self.scheme(),
                    address,
                    hex::encode(digest)
                ))
            }
            _ => Ok(format!("{}://{}", self.scheme(), address)),
        }
    }
}

fn invalid(address: &str, reason: &str) -> TransportError {
    TransportError::InvalidAddress {
        address: address.to_string(),
        reason: reason.to_string(),
    }
}

/// Parse a hex SHA-256 fingerprint, with or without `:` separators.
pub fn parse_fingerprint(fingerprint: &str) -> TransportResult<[u8; FINGERPRINT_SIZE]> {
    let compact: String = fingerprint
        .trim()
        .chars()
        .filter(|c| *c != ':')
        .collect();
    let bytes = hex::decode(&compact)
        .map_err(|e| TransportError::InvalidFingerprint(e.to_string()))?;
    bytes.try_into().map_err(|bytes: Vec<u8>| {
        TransportError::InvalidFingerprint(format!(
            "expected {FINGERPRINT_SIZE} bytes, got {}",
            bytes.len()
        ))
    })
}
