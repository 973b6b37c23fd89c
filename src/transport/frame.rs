//! Length-prefixed framing.
//!
//! Wire format:
//! ```text
//! +----------------------+------------------------------+
//! | Length               | Payload                      |
//! | 2 or 4 bytes, BE/LE  | plaintext JSON or sealed     |
//! +----------------------+------------------------------+
//! ```
//!
//! The length covers the payload only, or payload plus header when
//! `length_includes_header` is set. Encoder and decoder must share all three
//! header parameters.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::DEFAULT_MAX_FRAME_SIZE;

/// Width of the length field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeaderWidth {
    /// 2-byte length.
    U16,
    /// 4-byte length.
    #[default]
    U32,
}

impl HeaderWidth {
    /// Size of the header in bytes.
    pub fn len(self) -> usize {
        match self {
            HeaderWidth::U16 => 2,
            HeaderWidth::U32 => 4,
        }
    }

    /// Largest value the length field can carry.
    pub fn max_value(self) -> u64 {
        match self {
            HeaderWidth::U16 => u64::from(u16::MAX),
            HeaderWidth::U32 => u64::from(u32::MAX),
        }
    }
}

/// Byte order of the length field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endianness {
    /// Network byte order.
    #[default]
    Big,
    /// Little-endian.
    Little,
}

/// Frame header parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FrameConfig {
    /// Width of the length field.
    #[serde(default)]
    pub header_width: HeaderWidth,
    /// Byte order of the length field.
    #[serde(default)]
    pub endianness: Endianness,
    /// Whether the length counts the header bytes too.
    #[serde(default)]
    pub length_includes_header: bool,
}

impl FrameConfig {
    /// Create a frame config.
    pub fn new(header_width: HeaderWidth, endianness: Endianness, length_includes_header: bool) -> Self {
        Self {
            header_width,
            endianness,
            length_includes_header,
        }
    }

    /// Size of the header in bytes.
    pub fn header_len(&self) -> usize {
        self.header_width.len()
    }

    /// Largest payload this configuration can address.
    pub fn max_payload_len(&self) -> u64 {
        let max = self.header_width.max_value();
        if self.length_includes_header {
            max - self.header_len() as u64
        } else {
            max
        }
    }

    fn write_length(&self, length: u64, out: &mut Vec<u8>) {
        match (self.header_width, self.endianness) {
            (HeaderWidth::U16, Endianness::Big) => out.extend_from_slice(&(length as u16).to_be_bytes()),
            (HeaderWidth::U16, Endianness::Little) => out.extend_from_slice(&(length as u16).to_le_bytes()),
            (HeaderWidth::U32, Endianness::Big) => out.extend_from_slice(&(length as u32).to_be_bytes()),
            (HeaderWidth::U32, Endianness::Little) => out.extend_from_slice(&(length as u32).to_le_bytes()),
        }
    }

    fn read_length(&self, header: &[u8]) -> u64 {
        match (self.header_width, self.endianness) {
            (HeaderWidth::U16, Endianness::Big) => u64::from(u16::from_be_bytes([header[0], header[1]])),
            (HeaderWidth::U16, Endianness::Little) => u64::from(u16::from_le_bytes([header[0], header[1]])),
            (HeaderWidth::U32, Endianness::Big) => {
                u64::from(u32::from_be_bytes([header[0], header[1], header[2], header[3]]))
            }
            (HeaderWidth::U32, Endianness::Little) => {
                u64::from(u32::from_le_bytes([header[0], header[1], header[2], header[3]]))
            }
        }
    }
}

/// Errors that can occur while framing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Payload does not fit in the configured length field.
    #[error("payload of {len} bytes exceeds the {max}-byte limit of the length header")]
    PayloadTooLarge {
        /// Payload length.
        len: usize,
        /// Largest addressable payload.
        max: u64,
    },

    /// Length field smaller than the header it is supposed to include.
    #[error("length {length} is smaller than the {header}-byte header it includes")]
    LengthBelowHeader {
        /// Declared length.
        length: u64,
        /// Header size.
        header: usize,
    },

    /// Declared frame larger than the decoder accepts.
    #[error("frame of {length} bytes exceeds the {max}-byte decoder limit")]
    FrameTooLarge {
        /// Declared payload length.
        length: u64,
        /// Decoder limit.
        max: usize,
    },
}

/// Encode a payload into a frame.
///
/// Payloads that do not fit the header are rejected, never truncated.
pub fn encode(payload: &[u8], config: &FrameConfig) -> Result<Vec<u8>, FrameError> {
    let max = config.max_payload_len();
    if payload.len() as u64 > max {
        return Err(FrameError::PayloadTooLarge {
            len: payload.len(),
            max,
        });
    }

    let header_len = config.header_len();
    let length = if config.length_includes_header {
        (payload.len() + header_len) as u64
    } else {
        payload.len() as u64
    };

    let mut out = Vec::with_capacity(header_len + payload.len());
    config.write_length(length, &mut out);
    out.extend_from_slice(payload);
    Ok(out)
}

/// Decode one frame from the front of `bytes`.
///
/// Returns the payload and the number of bytes consumed, or `None` if more
/// bytes are needed.
pub fn decode<'a>(bytes: &'a [u8], config: &FrameConfig) -> Result<Option<(&'a [u8], usize)>, FrameError> {
    let header_len = config.header_len();
    if bytes.len() < header_len {
        return Ok(None);
    }

    let payload_len = payload_len(config, config.read_length(&bytes[..header_len]))?;
    let total = header_len + payload_len;
    if bytes.len() < total {
        return Ok(None);
    }
    Ok(Some((&bytes[header_len..total], total)))
}

fn payload_len(config: &FrameConfig, length: u64) -> Result<usize, FrameError> {
    let header_len = config.header_len();
    let payload = if config.length_includes_header {
        length
            .checked_sub(header_len as u64)
            .ok_or(FrameError::LengthBelowHeader {
                length,
                header: header_len,
            })?
    } else {
        length
    };
    usize::try_from(payload).map_err(|_| FrameError::FrameTooLarge {
        length: payload,
        max: usize::MAX,
    })
}

/// Incremental decoder for a byte stream.
///
/// Feed arbitrary chunks with [`push`](Self::push), then drain complete
/// payloads with [`next_frame`](Self::next_frame).
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    config: FrameConfig,
    buffer: Vec<u8>,
    max_frame_size: usize,
}

impl FrameDecoder {
    /// Create a decoder with the default frame size limit.
    pub fn new(config: FrameConfig) -> Self {
        Self {
            config,
            buffer: Vec::new(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Set the largest payload accepted.
    pub fn with_max_frame_size(mut self, max: usize) -> Self {
        self.max_frame_size = max;
        self
    }

    /// Append received bytes.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Bytes buffered but not yet returned.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Pop the next complete payload.
    ///
    /// An error leaves the stream unrecoverable; the connection must be closed.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        let header_len = self.config.header_len();
        if self.buffer.len() < header_len {
            return Ok(None);
        }

        let declared = self.config.read_length(&self.buffer[..header_len]);
        let payload_len = payload_len(&self.config, declared)?;
        if payload_len > self.max_frame_size {
            return Err(FrameError::FrameTooLarge {
                length: payload_len as u64,
                max: self.max_frame_size,
            });
        }

        let total = header_len + payload_len;
        if self.buffer.len() < total {
            return Ok(None);
        }

        let payload = self.buffer[header_len..total].to_vec();
        self.buffer.drain(..total);
        Ok(Some(payload))
    }
}
