//! Carrier-level WebSocket messages
//!
//! A [`Message`] is what remains of one or more frames after fragment
//! reassembly. Packets ride inside `Binary` messages.

use crate::frame::Frame;
use crate::protocol::Opcode;
use bytes::Bytes;

/// Represents a complete WebSocket message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Text message
    Text(String),
    /// Binary message
    Binary(Bytes),
    /// Ping message
    Ping(Bytes),
    /// Pong message
    Pong(Bytes),
    /// Close message with optional code and reason
    Close(Option<(u16, String)>),
}

impl Message {
    /// Create a binary message
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self::Binary(data.into())
    }

    /// Create a text message
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Create a close message
    pub fn close(code: u16, reason: impl Into<String>) -> Self {
        Self::Close(Some((code, reason.into())))
    }

    /// Check if this is a control message
    pub fn is_control(&self) -> bool {
        matches!(self, Message::Ping(_) | Message::Pong(_) | Message::Close(_))
    }

    /// Raw payload bytes of the message
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Message::Text(text) => text.as_bytes(),
            Message::Binary(data) | Message::Ping(data) | Message::Pong(data) => data,
            Message::Close(_) => &[],
        }
    }

    /// Convert the message into a single final frame
    pub fn into_frame(self) -> Frame {
        match self {
            Message::Text(text) => Frame::new(Opcode::Text, Bytes::from(text)),
            Message::Binary(data) => Frame::binary(data),
            Message::Ping(data) => Frame::ping(data),
            Message::Pong(data) => Frame::pong(data),
            Message::Close(Some((code, reason))) => Frame::close(Some(code), &reason),
            Message::Close(None) => Frame::close(None, ""),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_into_frame() {
        let frame = Message::binary(&b"abc"[..]).into_frame();
        assert_eq!(frame.opcode, Opcode::Binary);
        assert!(frame.fin);

        let frame = Message::close(1000, "bye").into_frame();
        assert_eq!(frame.close_reason(), Some((1000, "bye".into())));
    }

    #[test]
    fn test_message_kinds() {
        assert!(Message::Ping(Bytes::new()).is_control());
        assert!(!Message::text("hi").is_control());
        assert_eq!(Message::text("hi").as_bytes(), b"hi");
    }
}
