//! Frame encoding and decoding on top of [`tokio_util::codec`].
//!
//! [`FrameCodec`] is the lowest layer of the connection: raw bytes in a
//! [`BytesMut`] in, [`Frame`] values out, and the reverse for writes. It is
//! driven through [`tokio_util::codec::Framed`] by the connection object,
//! which owns the protocol behavior (close handshake, error teardown).
//!
//! The decoder enforces the subset this endpoint speaks:
//!
//! - final, unfragmented frames only (no continuation, RSV2/RSV3 clear),
//! - no compression (RSV1 clear; permessage-deflate is never negotiated),
//! - text and close opcodes only,
//! - mandatory masking on client frames when decoding in the server role.
//!
//! Everything else is a protocol violation surfaced as [`SocketError`];
//! the connection drops the transport without a close frame.

use bytes::{Buf, BytesMut};
use tokio_util::codec;

use crate::{
    SocketError,
    frame::{Frame, MAX_HEAD_SIZE, OpCode},
};

/// Declared payload lengths above this are rejected outright.
const MAX_PAYLOAD_LEN: u64 = 0x7FFF_FFFF_FFFF_FFFF;

/// Which side of the connection the codec decodes for.
///
/// The server role requires inbound frames to be masked; the client role
/// requires them unmasked. The encoder writes whatever masking the frame
/// itself carries.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

/// Header fields of a frame whose payload has not fully arrived yet.
///
/// Only well-formed headers are saved: fin is known set and rsv bits known
/// clear, so the remaining work is collecting and unmasking the payload.
struct PartialFrame {
    opcode: OpCode,
    mask: Option<[u8; 4]>,
    payload_len: usize,
}

impl PartialFrame {
    /// Consumes the payload from `src` and produces the finished frame.
    /// Callers must have checked that `src` holds `payload_len` bytes.
    fn complete(self, src: &mut BytesMut) -> Frame {
        if let Some(mask) = self.mask {
            crate::mask::apply_mask(&mut src[..self.payload_len], mask);
        }
        let payload = src.split_to(self.payload_len).freeze();
        Frame::new(true, self.opcode, self.mask, payload)
    }
}

/// Combined encoder/decoder for WebSocket frames.
pub struct FrameCodec {
    role: Role,
    /// Saved state between `decode` calls when a header has been consumed
    /// but its payload has not fully arrived.
    partial: Option<PartialFrame>,
}

impl FrameCodec {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            partial: None,
        }
    }
}

impl codec::Decoder for FrameCodec {
    type Item = Frame;
    type Error = SocketError;

    /// Decodes one frame from `src`, maintaining state across calls.
    ///
    /// Returns `Ok(None)` when more bytes are needed; the caller re-invokes
    /// after the next transport read. Splitting the input at any byte
    /// boundary yields the same frame sequence as delivering it at once.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(partial) = self.partial.take() {
            if src.remaining() < partial.payload_len {
                self.partial = Some(partial);
                return Ok(None);
            }
            return Ok(Some(partial.complete(src)));
        }

        if src.remaining() < 2 {
            return Ok(None);
        }

        let fin = src[0] & 0x80 != 0;
        let rsv1 = src[0] & 0x40 != 0;
        if src[0] & 0x30 != 0 {
            return Err(SocketError::ReservedBitsNotZero);
        }
        if !fin {
            return Err(SocketError::FragmentedFrame);
        }
        if rsv1 {
            // No extension is ever negotiated, so a compressed frame means
            // the peer ignored the handshake.
            return Err(SocketError::CompressionUnsupported);
        }

        let masked = src[1] & 0x80 != 0;
        if self.role == Role::Server && !masked {
            return Err(SocketError::UnmaskedClientFrame);
        }

        let opcode = OpCode::try_from(src[0] & 0x0F)?;
        if !matches!(opcode, OpCode::Text | OpCode::Close) {
            return Err(SocketError::UnsupportedOpCode(u8::from(opcode)));
        }

        let length_code = src[1] & 0x7F;
        let extra = match length_code {
            126 => 2,
            127 => 8,
            _ => 0,
        };
        let header_size = 2 + extra + (masked as usize * 4);
        if src.remaining() < header_size {
            return Ok(None);
        }

        src.advance(2);
        let payload_len64 = match extra {
            0 => u64::from(length_code),
            2 => u64::from(src.get_u16()),
            _ => src.get_u64(),
        };
        if payload_len64 > MAX_PAYLOAD_LEN {
            return Err(SocketError::FrameTooLarge);
        }
        let Ok(payload_len) = usize::try_from(payload_len64) else {
            return Err(SocketError::FrameTooLarge);
        };

        let mask = if masked {
            Some(src.get_u32().to_be_bytes())
        } else {
            None
        };

        let frame = PartialFrame {
            opcode,
            mask,
            payload_len,
        };
        if src.remaining() < payload_len {
            self.partial = Some(frame);
            return Ok(None);
        }
        Ok(Some(frame.complete(src)))
    }
}

impl codec::Encoder<Frame> for FrameCodec {
    type Error = SocketError;

    /// Serializes `frame` into `dst`: header, optional masking key, then
    /// the payload (XORed with the key when one is set).
    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(MAX_HEAD_SIZE + frame.payload.len());
        frame.write_head(dst);

        let index = dst.len();
        dst.extend_from_slice(&frame.payload);
        if let Some(mask) = frame.mask {
            crate::mask::apply_mask(&mut dst[index..], mask);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use tokio_util::codec::{Decoder, Encoder};

    use super::*;

    fn encode(role: Role, frame: Frame) -> BytesMut {
        let mut dst = BytesMut::new();
        FrameCodec::new(role).encode(frame, &mut dst).unwrap();
        dst
    }

    fn decode_all(role: Role, bytes: &[u8]) -> Vec<Result<Frame, SocketError>> {
        let mut codec = FrameCodec::new(role);
        let mut src = BytesMut::from(bytes);
        let mut out = Vec::new();
        loop {
            match codec.decode(&mut src) {
                Ok(Some(frame)) => out.push(Ok(frame)),
                Ok(None) => break,
                Err(e) => {
                    out.push(Err(e));
                    break;
                }
            }
        }
        out
    }

    #[test]
    fn test_encode_unmasked_text() {
        let dst = encode(Role::Server, Frame::text("abcd"));
        assert_eq!(&dst[..], &[0x81, 0x04, 0x61, 0x62, 0x63, 0x64]);
    }

    #[test]
    fn test_encode_empty_close() {
        let dst = encode(Role::Server, Frame::close_raw(Bytes::new()));
        assert_eq!(&dst[..], &[0x88, 0x00]);
    }

    #[test]
    fn test_encode_masked_text() {
        // Captured client frame carrying "1234".
        let frame = Frame::text("1234").with_mask([0x7F, 0xC2, 0x66, 0x31]);
        let dst = encode(Role::Client, frame);
        assert_eq!(
            &dst[..],
            &[0x81, 0x84, 0x7F, 0xC2, 0x66, 0x31, 0x4E, 0xF0, 0x55, 0x05]
        );
    }

    #[test]
    fn test_decode_masked_text() {
        let frames = decode_all(
            Role::Server,
            &[0x81, 0x84, 0x7F, 0xC2, 0x66, 0x31, 0x4E, 0xF0, 0x55, 0x05],
        );
        assert_eq!(frames.len(), 1);
        let frame = frames[0].as_ref().unwrap();
        assert_eq!(frame.opcode(), OpCode::Text);
        assert_eq!(frame.payload().as_ref(), b"1234");
    }

    #[test]
    fn test_decode_masked_close() {
        let frames = decode_all(Role::Server, &[0x88, 0x80, 0x2D, 0x0E, 0x1E, 0xFA]);
        assert_eq!(frames.len(), 1);
        let frame = frames[0].as_ref().unwrap();
        assert_eq!(frame.opcode(), OpCode::Close);
        assert!(frame.payload().is_empty());
    }

    #[test]
    fn test_server_rejects_unmasked_frame() {
        let frames = decode_all(Role::Server, &[0x81, 0x04, 0x61, 0x62, 0x63, 0x64]);
        assert!(matches!(frames[0], Err(SocketError::UnmaskedClientFrame)));
    }

    #[test]
    fn test_rejects_fragmented_frame() {
        // fin clear on a masked text frame
        let frames = decode_all(Role::Server, &[0x01, 0x80, 0, 0, 0, 0]);
        assert!(matches!(frames[0], Err(SocketError::FragmentedFrame)));
    }

    #[test]
    fn test_rejects_rsv2_rsv3() {
        for first in [0xA1u8, 0x91, 0xB1] {
            let frames = decode_all(Role::Server, &[first, 0x80, 0, 0, 0, 0]);
            assert!(
                matches!(frames[0], Err(SocketError::ReservedBitsNotZero)),
                "byte {first:#x}"
            );
        }
    }

    #[test]
    fn test_rejects_compressed_frame() {
        let frames = decode_all(Role::Server, &[0xC1, 0x80, 0, 0, 0, 0]);
        assert!(matches!(
            frames[0],
            Err(SocketError::CompressionUnsupported)
        ));
    }

    #[test]
    fn test_rejects_unsupported_opcodes() {
        // continuation, binary, ping, pong, then a reserved opcode
        for (first, code) in [
            (0x80u8, 0x0u8),
            (0x82, 0x2),
            (0x89, 0x9),
            (0x8A, 0xA),
            (0x83, 0x3),
        ] {
            let frames = decode_all(Role::Server, &[first, 0x80, 0, 0, 0, 0]);
            assert!(
                matches!(frames[0], Err(SocketError::UnsupportedOpCode(c)) if c == code),
                "byte {first:#x}"
            );
        }
    }

    #[test]
    fn test_encode_compressed_sets_rsv1_and_is_rejected_back() {
        let mut frame = Frame::text("x");
        frame.is_compressed = true;
        let dst = encode(Role::Server, frame);
        assert_eq!(&dst[..], &[0xC1, 0x01, b'x']);

        // A server that never negotiates the extension treats it as a
        // peer bug on the way back in.
        let frames = decode_all(Role::Client, &dst);
        assert!(matches!(
            frames[0],
            Err(SocketError::CompressionUnsupported)
        ));
    }

    #[test]
    fn test_rejects_overlong_payload() {
        let mut bytes = vec![0x81, 0xFF];
        bytes.extend_from_slice(&(MAX_PAYLOAD_LEN + 1).to_be_bytes());
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        let frames = decode_all(Role::Server, &bytes);
        assert!(matches!(frames[0], Err(SocketError::FrameTooLarge)));
    }

    #[test]
    fn test_incomplete_returns_none_without_consuming() {
        let full = [0x81u8, 0x84, 0x7F, 0xC2, 0x66, 0x31, 0x4E, 0xF0, 0x55, 0x05];
        // Any proper prefix decodes to "need more".
        for cut in 0..full.len() {
            let mut codec = FrameCodec::new(Role::Server);
            let mut src = BytesMut::from(&full[..cut]);
            assert!(codec.decode(&mut src).unwrap().is_none(), "cut {cut}");
        }
    }

    #[test]
    fn test_byte_at_a_time_delivery_matches_at_once() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&encode(
            Role::Client,
            Frame::text("1234").with_mask([0x7F, 0xC2, 0x66, 0x31]),
        ));
        stream.extend_from_slice(&encode(
            Role::Client,
            Frame::text(vec![b'z'; 300]).with_mask([0x01, 0x02, 0x03, 0x04]),
        ));
        stream.extend_from_slice(&encode(
            Role::Client,
            Frame::text("").with_mask([0xAA, 0xBB, 0xCC, 0xDD]),
        ));

        let at_once: Vec<Bytes> = decode_all(Role::Server, &stream)
            .into_iter()
            .map(|f| f.unwrap().into_payload())
            .collect();

        let mut chunked = Vec::new();
        let mut codec = FrameCodec::new(Role::Server);
        let mut src = BytesMut::new();
        for byte in &stream {
            src.extend_from_slice(std::slice::from_ref(byte));
            while let Some(frame) = codec.decode(&mut src).unwrap() {
                chunked.push(frame.into_payload());
            }
        }

        assert_eq!(at_once, chunked);
        assert_eq!(at_once[0].as_ref(), b"1234");
        assert_eq!(at_once[1].len(), 300);
        assert_eq!(at_once[2].len(), 0);
    }

    #[test]
    fn test_round_trip_masked_and_unmasked() {
        for len in [0usize, 1, 4, 125, 126, 300, 65_535, 65_536, 70_000] {
            let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();

            // Client to server: masked.
            let wire = encode(
                Role::Client,
                Frame::text(payload.clone()).with_mask([0x5A, 0x12, 0xF0, 0x0D]),
            );
            let frames = decode_all(Role::Server, &wire);
            assert_eq!(frames[0].as_ref().unwrap().payload().as_ref(), &payload[..]);

            // Server to client: unmasked.
            let wire = encode(Role::Server, Frame::text(payload.clone()));
            let frames = decode_all(Role::Client, &wire);
            assert_eq!(frames[0].as_ref().unwrap().payload().as_ref(), &payload[..]);
        }
    }

    #[test]
    fn test_pipelined_frames_consume_exactly_complete_portion() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&[0x88, 0x80, 0x2D, 0x0E, 0x1E, 0xFA]);
        // trailing prefix of another frame
        stream.extend_from_slice(&[0x81, 0x84, 0x7F]);

        let mut codec = FrameCodec::new(Role::Server);
        let mut src = BytesMut::from(&stream[..]);
        let frame = codec.decode(&mut src).unwrap().unwrap();
        assert_eq!(frame.opcode(), OpCode::Close);
        assert!(codec.decode(&mut src).unwrap().is_none());
        // the partial tail is still buffered, untouched
        assert_eq!(&src[..], &[0x81, 0x84, 0x7F]);
    }
}
