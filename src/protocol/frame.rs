//! Frame encoding and decoding for the client side of a connection.
//!
//! Outgoing frames are always masked (RFC 6455 requires it of clients);
//! incoming frames must never be (servers are forbidden to mask). Frames
//! with reserved bits set are rejected since no extension is ever
//! negotiated.

use bytes::{BufMut, BytesMut};

use crate::error::{Error, Result};
use crate::protocol::OpCode;

/// Maximum payload size for control frames (RFC 6455).
pub const MAX_CONTROL_FRAME_PAYLOAD: usize = 125;

/// XOR the payload with the 4-byte masking key.
fn apply_mask(data: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

/// Source of masking keys for outgoing frames.
///
/// Seeded once from the OS and stepped through an integer hash per frame;
/// keys need to be unpredictable to intermediaries, not cryptographic.
#[derive(Debug, Clone)]
pub struct MaskSource {
    counter: u32,
}

impl MaskSource {
    /// Create a source with a fresh random seed.
    ///
    /// Falls back to system time if OS randomness is unavailable.
    #[must_use]
    pub fn new() -> Self {
        let mut buf = [0u8; 4];
        let counter = if getrandom::getrandom(&mut buf).is_ok() {
            u32::from_le_bytes(buf)
        } else {
            use std::time::{SystemTime, UNIX_EPOCH};
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as u32)
                .unwrap_or(0xA5A5_5A5A)
        };
        Self { counter }
    }

    /// Next masking key.
    pub fn next_key(&mut self) -> [u8; 4] {
        self.counter = self.counter.wrapping_add(0x9E37_79B9);
        let mut x = self.counter;
        x = x.wrapping_mul(0x85EB_CA6B);
        x ^= x >> 13;
        x = x.wrapping_mul(0xC2B2_AE35);
        x.to_le_bytes()
    }
}

impl Default for MaskSource {
    fn default() -> Self {
        Self::new()
    }
}

/// One WebSocket frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment flag.
    pub fin: bool,
    /// Frame opcode.
    pub opcode: OpCode,
    payload: Vec<u8>,
}

impl Frame {
    /// Create a final frame with the given opcode and payload.
    #[must_use]
    pub fn new(opcode: OpCode, payload: Vec<u8>) -> Self {
        Self {
            fin: true,
            opcode,
            payload,
        }
    }

    /// Create a text frame.
    #[must_use]
    pub fn text(data: impl Into<Vec<u8>>) -> Self {
        Self::new(OpCode::Text, data.into())
    }

    /// Create a close frame with status code and reason.
    #[must_use]
    pub fn close(code: u16, reason: &str) -> Self {
        let mut payload = code.to_be_bytes().to_vec();
        payload.extend_from_slice(reason.as_bytes());
        Self::new(OpCode::Close, payload)
    }

    /// Create a pong frame echoing the given ping payload.
    #[must_use]
    pub fn pong(data: impl Into<Vec<u8>>) -> Self {
        Self::new(OpCode::Pong, data.into())
    }

    /// Payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Close status code carried by a close frame, if present.
    #[must_use]
    pub fn close_code(&self) -> Option<u16> {
        if self.opcode != OpCode::Close || self.payload.len() < 2 {
            return None;
        }
        Some(u16::from_be_bytes([self.payload[0], self.payload[1]]))
    }

    /// Decode one server frame from the front of `buf`.
    ///
    /// Returns the frame and the number of bytes consumed.
    ///
    /// # Errors
    ///
    /// - [`Error::IncompleteFrame`] if more bytes are needed
    /// - [`Error::MaskedServerFrame`] if the mask bit is set
    /// - [`Error::InvalidFrame`] for reserved bits or a fragmented control
    ///   frame
    /// - [`Error::ControlFrameTooLarge`] for oversized control payloads
    /// - Opcode errors from [`OpCode::from_u8`]
    pub fn parse(buf: &[u8]) -> Result<(Self, usize)> {
        if buf.len() < 2 {
            return Err(Error::IncompleteFrame {
                needed: 2 - buf.len(),
            });
        }

        let fin = (buf[0] & 0x80) != 0;
        if buf[0] & 0x70 != 0 {
            return Err(Error::InvalidFrame(
                "Reserved bits set without negotiated extension".into(),
            ));
        }
        let opcode = OpCode::from_u8(buf[0] & 0x0F)?;

        if buf[1] & 0x80 != 0 {
            return Err(Error::MaskedServerFrame);
        }

        let (payload_len, header_len): (usize, usize) = match buf[1] & 0x7F {
            len @ 0..=125 => (len as usize, 2),
            126 => {
                if buf.len() < 4 {
                    return Err(Error::IncompleteFrame {
                        needed: 4 - buf.len(),
                    });
                }
                (u16::from_be_bytes([buf[2], buf[3]]) as usize, 4)
            }
            _ => {
                if buf.len() < 10 {
                    return Err(Error::IncompleteFrame {
                        needed: 10 - buf.len(),
                    });
                }
                let len = u64::from_be_bytes([
                    buf[2], buf[3], buf[4], buf[5], buf[6], buf[7], buf[8], buf[9],
                ]);
                let len = usize::try_from(len)
                    .map_err(|_| Error::InvalidFrame(format!("Payload length {len} overflows")))?;
                (len, 10)
            }
        };

        if opcode.is_control() {
            if !fin {
                return Err(Error::InvalidFrame(
                    "Control frames cannot be fragmented".into(),
                ));
            }
            if payload_len > MAX_CONTROL_FRAME_PAYLOAD {
                return Err(Error::ControlFrameTooLarge(payload_len));
            }
        }

        let total = header_len
            .checked_add(payload_len)
            .ok_or_else(|| Error::InvalidFrame("Frame length overflows".into()))?;
        if buf.len() < total {
            return Err(Error::IncompleteFrame {
                needed: total - buf.len(),
            });
        }

        let frame = Frame {
            fin,
            opcode,
            payload: buf[header_len..total].to_vec(),
        };
        Ok((frame, total))
    }

    /// Append this frame to `out`, masked with `mask`.
    pub fn encode(&self, mask: [u8; 4], out: &mut BytesMut) {
        let len = self.payload.len();

        let mut byte0 = self.opcode.as_u8();
        if self.fin {
            byte0 |= 0x80;
        }
        out.put_u8(byte0);

        // Second byte carries the mask bit plus the short length.
        if len <= 125 {
            out.put_u8(0x80 | len as u8);
        } else if len <= u16::MAX as usize {
            out.put_u8(0x80 | 126);
            out.put_u16(len as u16);
        } else {
            out.put_u8(0x80 | 127);
            out.put_u64(len as u64);
        }

        out.put_slice(&mask);
        let start = out.len();
        out.put_slice(&self.payload);
        apply_mask(&mut out[start..], mask);
    }
}
