//! WebSocket frame parsing and serialization
//!
//! [`Frame`] is a single RFC 6455 frame. [`FrameCodec`] plugs frames into
//! `tokio_util::codec` so a socket half can be read as a stream of frames and
//! written as a sink of frames.

use crate::{
    error::{Error, FrameError, Result},
    protocol::{frame::*, Opcode},
};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Represents a WebSocket frame according to RFC 6455
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Indicates if this is the final frame in a message
    pub fin: bool,
    /// Frame opcode
    pub opcode: Opcode,
    /// Payload data, always stored unmasked
    pub payload: Bytes,
}

impl Frame {
    /// Create a new final frame with the given opcode and payload
    pub fn new(opcode: Opcode, payload: impl Into<Bytes>) -> Self {
        Self {
            fin: true,
            opcode,
            payload: payload.into(),
        }
    }

    /// Create a binary frame
    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Binary, payload)
    }

    /// Create a text frame
    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Text, payload)
    }

    /// Create a close frame with optional code and reason
    pub fn close(code: Option<u16>, reason: &str) -> Self {
        let mut payload = BytesMut::new();
        if let Some(code) = code {
            payload.put_u16(code);
            payload.put_slice(reason.as_bytes());
        }
        Self::new(Opcode::Close, payload.freeze())
    }

    /// Create a ping frame
    pub fn ping(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Ping, payload)
    }

    /// Create a pong frame
    pub fn pong(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Pong, payload)
    }

    /// Set the FIN bit
    pub fn fin(mut self, fin: bool) -> Self {
        self.fin = fin;
        self
    }

    /// Write the frame to a buffer, masking the payload with `mask` if given
    pub fn write_to(&self, buf: &mut BytesMut, mask: Option<[u8; 4]>) {
        let fin_bit = if self.fin { FIN_BIT } else { 0 };
        buf.put_u8(fin_bit | self.opcode.value());

        let payload_len = self.payload.len();
        let mask_bit = if mask.is_some() { MASK_BIT } else { 0 };

        if payload_len < PAYLOAD_LEN_16 as usize {
            buf.put_u8(mask_bit | payload_len as u8);
        } else if payload_len <= u16::MAX as usize {
            buf.put_u8(mask_bit | PAYLOAD_LEN_16);
            buf.put_u16(payload_len as u16);
        } else {
            buf.put_u8(mask_bit | PAYLOAD_LEN_64);
            buf.put_u64(payload_len as u64);
        }

        match mask {
            Some(mask) => {
                buf.put_slice(&mask);
                let start = buf.len();
                buf.put_slice(&self.payload);
                apply_mask(&mut buf[start..], &mask);
            }
            None => buf.put_slice(&self.payload),
        }
    }

    /// Serialize the frame without a mask
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.payload.len() + 14);
        self.write_to(&mut buf, None);
        buf.freeze()
    }

    /// Parse one frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` when `buf` does not yet hold a complete frame; the
    /// buffer is left untouched in that case.
    pub fn parse(buf: &mut BytesMut, max_size: usize) -> Result<Option<Self>> {
        if buf.len() < 2 {
            return Ok(None);
        }

        let first_byte = buf[0];
        let second_byte = buf[1];

        if first_byte & RSV_BITS != 0 {
            return Err(FrameError::ReservedBitsSet.into());
        }
        let fin = first_byte & FIN_BIT != 0;
        let opcode = Opcode::from(first_byte & OPCODE_MASK)
            .ok_or(FrameError::InvalidOpcode(first_byte & OPCODE_MASK))?;
        if opcode.is_control() && !fin {
            return Err(FrameError::FragmentedControlFrame.into());
        }

        let masked = second_byte & MASK_BIT != 0;
        let mut header_len = 2;
        let payload_len = match second_byte & PAYLOAD_LEN_MASK {
            PAYLOAD_LEN_16 => {
                if buf.len() < 4 {
                    return Ok(None);
                }
                header_len += 2;
                u16::from_be_bytes([buf[2], buf[3]]) as usize
            }
            PAYLOAD_LEN_64 => {
                if buf.len() < 10 {
                    return Ok(None);
                }
                header_len += 8;
                let mut len = [0u8; 8];
                len.copy_from_slice(&buf[2..10]);
                u64::from_be_bytes(len) as usize
            }
            len => len as usize,
        };

        if payload_len > max_size {
            return Err(FrameError::TooLarge {
                size: payload_len,
                max: max_size,
            }
            .into());
        }
        if opcode.is_control() && payload_len > MAX_CONTROL_PAYLOAD {
            return Err(FrameError::TooLarge {
                size: payload_len,
                max: MAX_CONTROL_PAYLOAD,
            }
            .into());
        }

        let mask_len = if masked { MASKING_KEY_LEN } else { 0 };
        if buf.len() < header_len + mask_len + payload_len {
            buf.reserve(header_len + mask_len + payload_len - buf.len());
            return Ok(None);
        }

        let mask = if masked {
            let mut mask = [0u8; MASKING_KEY_LEN];
            mask.copy_from_slice(&buf[header_len..header_len + MASKING_KEY_LEN]);
            Some(mask)
        } else {
            None
        };

        buf.advance(header_len + mask_len);
        let mut payload = buf.split_to(payload_len);
        if let Some(mask) = mask {
            apply_mask(&mut payload, &mask);
        }

        Ok(Some(Frame {
            fin,
            opcode,
            payload: payload.freeze(),
        }))
    }

    /// Check if this is a control frame
    pub fn is_control(&self) -> bool {
        self.opcode.is_control()
    }

    /// Decode the status code and reason of a close frame
    pub fn close_reason(&self) -> Option<(u16, String)> {
        if self.opcode != Opcode::Close || self.payload.len() < 2 {
            return None;
        }
        let code = u16::from_be_bytes([self.payload[0], self.payload[1]]);
        let reason = String::from_utf8_lossy(&self.payload[2..]).into_owned();
        Some((code, reason))
    }
}

/// XOR `data` in place with the 4-byte masking key
fn apply_mask(data: &mut [u8], mask: &[u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

/// Which end of the connection a codec serves.
///
/// Clients must mask every frame they send; servers never mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Connecting side
    Client,
    /// Accepting side
    Server,
}

/// `tokio_util` codec for WebSocket frames
#[derive(Debug, Clone)]
pub struct FrameCodec {
    role: Role,
    max_frame_size: usize,
}

impl FrameCodec {
    /// Create a codec for the given role
    pub fn new(role: Role, max_frame_size: usize) -> Self {
        Self {
            role,
            max_frame_size,
        }
    }

    /// The role this codec writes for
    pub fn role(&self) -> Role {
        self.role
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        Frame::parse(src, self.max_frame_size)
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        let mask = match self.role {
            Role::Client => Some(rand::random::<[u8; 4]>()),
            Role::Server => None,
        };
        dst.reserve(frame.payload.len() + 14);
        frame.write_to(dst, mask);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: usize = 1 << 20;

    #[test]
    fn test_frame_serialization() {
        let frame = Frame::binary(&b"Hello"[..]);
        let bytes = frame.to_bytes();

        assert_eq!(bytes[0], 0x82);
        assert_eq!(bytes[1], 0x05);
        assert_eq!(&bytes[2..], b"Hello");
    }

    #[test]
    fn test_masked_frame_parse() {
        let mut buf = BytesMut::new();
        Frame::text(&b"masked"[..]).write_to(&mut buf, Some([1, 2, 3, 4]));
        assert_eq!(buf[1] & MASK_BIT, MASK_BIT);

        let parsed = Frame::parse(&mut buf, MAX).unwrap().unwrap();
        assert_eq!(parsed.opcode, Opcode::Text);
        assert_eq!(&parsed.payload[..], b"masked");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_frame_waits_for_more() {
        let bytes = Frame::binary(vec![7u8; 300]).to_bytes();
        let mut buf = BytesMut::from(&bytes[..3]);
        assert!(Frame::parse(&mut buf, MAX).unwrap().is_none());
        assert_eq!(buf.len(), 3);

        buf.extend_from_slice(&bytes[3..]);
        let parsed = Frame::parse(&mut buf, MAX).unwrap().unwrap();
        assert_eq!(parsed.payload.len(), 300);
    }

    #[test]
    fn test_extended_lengths() {
        for len in [125usize, 126, 65535, 65536] {
            let bytes = Frame::binary(vec![0u8; len]).to_bytes();
            let mut buf = BytesMut::from(&bytes[..]);
            let parsed = Frame::parse(&mut buf, MAX).unwrap().unwrap();
            assert_eq!(parsed.payload.len(), len);
        }
    }

    #[test]
    fn test_rejects_oversized_and_reserved() {
        let bytes = Frame::binary(vec![0u8; 64]).to_bytes();
        let mut buf = BytesMut::from(&bytes[..]);
        assert!(matches!(
            Frame::parse(&mut buf, 16),
            Err(Error::Frame(FrameError::TooLarge { size: 64, max: 16 }))
        ));

        let mut buf = BytesMut::from(&[0xC2u8, 0x00][..]);
        assert!(matches!(
            Frame::parse(&mut buf, MAX),
            Err(Error::Frame(FrameError::ReservedBitsSet))
        ));
    }

    #[test]
    fn test_fragmented_control_rejected() {
        let mut buf = BytesMut::from(&[0x09u8, 0x00][..]);
        assert!(matches!(
            Frame::parse(&mut buf, MAX),
            Err(Error::Frame(FrameError::FragmentedControlFrame))
        ));
    }

    #[test]
    fn test_close_reason() {
        let frame = Frame::close(Some(1000), "bye");
        assert_eq!(frame.close_reason(), Some((1000, "bye".to_string())));
        assert_eq!(Frame::close(None, "").close_reason(), None);
    }

    #[test]
    fn test_codec_masks_client_frames() {
        let mut client = FrameCodec::new(Role::Client, MAX);
        let mut server = FrameCodec::new(Role::Server, MAX);

        let mut wire = BytesMut::new();
        client
            .encode(Frame::binary(&b"abc"[..]), &mut wire)
            .unwrap();
        assert_eq!(wire[1] & MASK_BIT, MASK_BIT);

        let frame = server.decode(&mut wire).unwrap().unwrap();
        assert_eq!(&frame.payload[..], b"abc");

        server.encode(Frame::pong(Bytes::new()), &mut wire).unwrap();
        assert_eq!(wire[1] & MASK_BIT, 0);
    }
}
