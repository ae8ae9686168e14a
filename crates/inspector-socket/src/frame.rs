//! WebSocket frames as defined in [RFC 6455 Section 5.2].
//!
//! A frame is the atomic unit on the wire: a 2-byte header, an optional
//! 2- or 8-byte extended length, an optional 4-byte masking key, then the
//! payload. This endpoint only ever emits single-fragment text frames and
//! the empty close frame, but the decoder must recognize every opcode in
//! order to reject the unsupported ones.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |         (16 or 64 bits)       |
//! |N|V|V|V|       |S|             |                               |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! ```
//!
//! [RFC 6455 Section 5.2]: https://datatracker.ietf.org/doc/html/rfc6455#section-5.2

use bytes::Bytes;

use crate::SocketError;

/// WebSocket operation code identifying the frame type.
///
/// The numeric values are defined in [RFC 6455, Section 11.8]. Only `Text`
/// and `Close` are accepted by this endpoint; the other variants exist so
/// the decoder can name what it rejects.
///
/// [RFC 6455, Section 11.8]: https://datatracker.ietf.org/doc/html/rfc6455#section-11.8
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    /// Returns `true` if the `OpCode` represents a control frame.
    pub fn is_control(&self) -> bool {
        matches!(*self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

impl TryFrom<u8> for OpCode {
    type Error = SocketError;

    /// Interprets the opcode nibble of a frame header. The reserved ranges
    /// 0x3-0x7 and 0xB-0xF are rejected per RFC 6455.
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            _ => Err(SocketError::UnsupportedOpCode(value)),
        }
    }
}

impl From<OpCode> for u8 {
    fn from(val: OpCode) -> Self {
        match val {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }
}

/// Largest possible frame header: 2 base bytes, 8 extended-length bytes,
/// 4 masking-key bytes.
pub(crate) const MAX_HEAD_SIZE: usize = 14;

/// A single WebSocket frame.
///
/// # Fields
/// - `fin`: final fragment flag; always set on frames this endpoint emits.
/// - `opcode`: frame type.
/// - `mask`: optional 4-byte XOR masking key. The key is written to the
///   wire in array order (index 0 first), so `[0x12, 0x34, 0x56, 0x78]`
///   appears on the wire as exactly those bytes. Servers never mask; the
///   masked path exists for the client role and for tests.
/// - `payload`: frame data, unmasked.
#[derive(Debug, Clone)]
pub struct Frame {
    pub(crate) fin: bool,
    pub(crate) opcode: OpCode,
    /// RSV1 flag; set only by a peer speaking permessage-deflate, which
    /// this endpoint never negotiates.
    pub(crate) is_compressed: bool,
    pub(crate) mask: Option<[u8; 4]>,
    pub(crate) payload: Bytes,
}

impl Frame {
    /// Creates a final text frame with the given payload.
    ///
    /// # Example
    /// ```rust
    /// use inspector_socket::Frame;
    ///
    /// let frame = Frame::text("{\"id\":1}");
    /// ```
    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self {
            fin: true,
            opcode: OpCode::Text,
            is_compressed: false,
            mask: None,
            payload: payload.into(),
        }
    }

    /// Creates a close frame with a raw payload.
    ///
    /// The server's close frame carries no status code or reason:
    /// `Frame::close_raw(bytes::Bytes::new())` encodes to exactly
    /// `88 00`.
    pub fn close_raw(payload: impl Into<Bytes>) -> Self {
        Self {
            fin: true,
            opcode: OpCode::Close,
            is_compressed: false,
            mask: None,
            payload: payload.into(),
        }
    }

    /// Low-level constructor used by the decoder.
    pub(crate) fn new(fin: bool, opcode: OpCode, mask: Option<[u8; 4]>, payload: Bytes) -> Self {
        Self {
            fin,
            opcode,
            is_compressed: false,
            mask,
            payload,
        }
    }

    /// Sets a masking key (builder pattern).
    ///
    /// Required on frames encoded in the client role; RFC 6455 obliges
    /// clients to mask every frame.
    pub fn with_mask(mut self, mask: [u8; 4]) -> Self {
        self.mask = Some(mask);
        self
    }

    /// Returns the frame's opcode.
    #[inline(always)]
    pub fn opcode(&self) -> OpCode {
        self.opcode
    }

    /// Returns a reference to the frame's payload.
    #[inline(always)]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Consumes the frame and returns its payload.
    #[inline(always)]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Returns whether this is the final frame in a message.
    #[inline(always)]
    pub fn is_fin(&self) -> bool {
        self.fin
    }

    /// Writes the frame header directly into `dst`.
    pub(crate) fn write_head(&self, dst: &mut bytes::BytesMut) {
        use bytes::BufMut;

        let compression = u8::from(self.is_compressed);
        let first_byte = (self.fin as u8) << 7 | compression << 6 | u8::from(self.opcode);
        let mask_bit = if self.mask.is_some() { 0x80 } else { 0 };

        let len = self.payload.len();
        dst.put_u8(first_byte);
        if len < 126 {
            dst.put_u8(len as u8 | mask_bit);
        } else if len < 65536 {
            dst.put_u8(126 | mask_bit);
            dst.put_u16(len as u16);
        } else {
            dst.put_u8(127 | mask_bit);
            dst.put_u64(len as u64);
        }

        if let Some(mask) = self.mask {
            dst.put_slice(&mask);
        }
    }
}
