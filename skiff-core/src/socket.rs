//! Message-level reading and writing over a split stream
//!
//! A connected stream is split into a [`MessageReader`], owned by the read
//! loop, and a [`MessageWriter`], shared behind the peer's write lock.

use crate::error::{Error, FrameError, Result};
use crate::frame::{Frame, FrameCodec, Role};
use crate::message::Message;
use crate::protocol::{constants, Opcode};
use crate::transport::TransportStream;
use bytes::{Bytes, BytesMut};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, BufWriter};
use tokio_util::codec::{Decoder, FramedRead, FramedWrite};

/// Read half of a connection
pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;

/// Write half of a connection
pub type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Buffer and size limits for one connection
#[derive(Debug, Clone, Copy)]
pub struct SocketConfig {
    /// Initial capacity of the read buffer
    pub read_buffer_size: usize,
    /// Capacity of the write buffer
    pub write_buffer_size: usize,
    /// Largest frame or reassembled message accepted
    pub max_frame_size: usize,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: constants::DEFAULT_READ_BUFFER_SIZE,
            write_buffer_size: constants::DEFAULT_WRITE_BUFFER_SIZE,
            max_frame_size: constants::DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

/// Split an upgraded stream into its message halves.
///
/// `leftover` holds bytes that arrived together with the handshake head.
pub fn split<S>(
    stream: S,
    role: Role,
    config: SocketConfig,
    leftover: BytesMut,
) -> (MessageReader, MessageWriter)
where
    S: TransportStream,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let reader = MessageReader::new(Box::new(read_half), role, config, leftover);
    let writer = MessageWriter::new(Box::new(write_half), role, config);
    (reader, writer)
}

/// Reads whole messages, reassembling fragments
pub struct MessageReader {
    frames: FramedRead<BoxReader, FrameCodec>,
    leftover: BytesMut,
    partial: Option<(Opcode, BytesMut)>,
    max_message_size: usize,
}

impl std::fmt::Debug for MessageReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageReader")
            .field("buffered", &(self.leftover.len() + self.frames.read_buffer().len()))
            .field("partial", &self.partial.as_ref().map(|(op, buf)| (op, buf.len())))
            .finish()
    }
}

impl MessageReader {
    /// Create a reader over `reader`, seeded with `leftover` bytes
    pub fn new(reader: BoxReader, role: Role, config: SocketConfig, leftover: BytesMut) -> Self {
        let codec = FrameCodec::new(role, config.max_frame_size);
        let frames = FramedRead::with_capacity(reader, codec, config.read_buffer_size);
        Self {
            frames,
            leftover,
            partial: None,
            max_message_size: config.max_frame_size,
        }
    }

    /// Read the next message. `Ok(None)` means the peer closed the stream.
    pub async fn next_message(&mut self) -> Result<Option<Message>> {
        loop {
            let frame = match self.buffered_frame()? {
                Some(frame) => frame,
                None => match self.frames.next().await {
                    Some(frame) => frame?,
                    None => return Ok(None),
                },
            };

            if let Some(message) = self.assemble(frame)? {
                return Ok(Some(message));
            }
        }
    }

    /// Decode frames that arrived with the handshake before touching the
    /// socket. An incomplete tail moves into the framed buffer.
    fn buffered_frame(&mut self) -> Result<Option<Frame>> {
        if self.leftover.is_empty() {
            return Ok(None);
        }
        if let Some(frame) = self.frames.decoder_mut().decode(&mut self.leftover)? {
            return Ok(Some(frame));
        }
        let rest = self.leftover.split();
        self.frames.read_buffer_mut().extend_from_slice(&rest);
        Ok(None)
    }

    fn assemble(&mut self, frame: Frame) -> Result<Option<Message>> {
        match frame.opcode {
            Opcode::Ping => Ok(Some(Message::Ping(frame.payload))),
            Opcode::Pong => Ok(Some(Message::Pong(frame.payload))),
            Opcode::Close => Ok(Some(Message::Close(frame.close_reason()))),
            Opcode::Text | Opcode::Binary => {
                if self.partial.is_some() {
                    return Err(FrameError::UnexpectedContinuation.into());
                }
                if frame.fin {
                    return finish(frame.opcode, frame.payload).map(Some);
                }
                self.partial = Some((frame.opcode, BytesMut::from(&frame.payload[..])));
                Ok(None)
            }
            Opcode::Continuation => {
                let (opcode, mut buf) = self
                    .partial
                    .take()
                    .ok_or(FrameError::UnexpectedContinuation)?;
                if buf.len() + frame.payload.len() > self.max_message_size {
                    return Err(FrameError::TooLarge {
                        size: buf.len() + frame.payload.len(),
                        max: self.max_message_size,
                    }
                    .into());
                }
                buf.extend_from_slice(&frame.payload);
                if frame.fin {
                    finish(opcode, buf.freeze()).map(Some)
                } else {
                    self.partial = Some((opcode, buf));
                    Ok(None)
                }
            }
        }
    }
}

fn finish(opcode: Opcode, payload: Bytes) -> Result<Message> {
    match opcode {
        Opcode::Text => String::from_utf8(payload.to_vec())
            .map(Message::Text)
            .map_err(|_| Error::Frame(FrameError::InvalidUtf8)),
        _ => Ok(Message::Binary(payload)),
    }
}

/// Writes whole messages as single frames
pub struct MessageWriter {
    frames: FramedWrite<BufWriter<BoxWriter>, FrameCodec>,
}

impl std::fmt::Debug for MessageWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageWriter")
            .field("role", &self.frames.encoder().role())
            .finish()
    }
}

impl MessageWriter {
    /// Create a writer over `writer`
    pub fn new(writer: BoxWriter, role: Role, config: SocketConfig) -> Self {
        let codec = FrameCodec::new(role, config.max_frame_size);
        let buffered = BufWriter::with_capacity(config.write_buffer_size, writer);
        Self {
            frames: FramedWrite::new(buffered, codec),
        }
    }

    /// Write and flush one message
    pub async fn send(&mut self, message: Message) -> Result<()> {
        self.frames.send(message.into_frame()).await
    }

    /// Flush and shut down the write side of the stream
    pub async fn shutdown(&mut self) -> Result<()> {
        <_ as SinkExt<Frame>>::close(&mut self.frames).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (MessageReader, MessageWriter, MessageReader, MessageWriter) {
        let (a, b) = tokio::io::duplex(4096);
        let config = SocketConfig::default();
        let (client_rx, client_tx) = split(a, Role::Client, config, BytesMut::new());
        let (server_rx, server_tx) = split(b, Role::Server, config, BytesMut::new());
        (client_rx, client_tx, server_rx, server_tx)
    }

    #[tokio::test]
    async fn test_send_and_receive() {
        let (mut client_rx, mut client_tx, mut server_rx, mut server_tx) = pair();

        client_tx.send(Message::binary(&b"up"[..])).await.unwrap();
        assert_eq!(
            server_rx.next_message().await.unwrap(),
            Some(Message::binary(&b"up"[..]))
        );

        server_tx.send(Message::text("down")).await.unwrap();
        assert_eq!(
            client_rx.next_message().await.unwrap(),
            Some(Message::text("down"))
        );
    }

    #[tokio::test]
    async fn test_fragments_reassembled_around_control_frames() {
        let (a, b) = tokio::io::duplex(4096);
        let (mut reader, _writer) = split(b, Role::Server, SocketConfig::default(), BytesMut::new());

        let mut wire = BytesMut::new();
        Frame::binary(&b"he"[..]).fin(false).write_to(&mut wire, None);
        Frame::ping(&b"p"[..]).write_to(&mut wire, None);
        Frame::new(Opcode::Continuation, &b"llo"[..]).write_to(&mut wire, None);

        let (_, mut raw_tx) = tokio::io::split(a);
        tokio::io::AsyncWriteExt::write_all(&mut raw_tx, &wire)
            .await
            .unwrap();

        assert_eq!(
            reader.next_message().await.unwrap(),
            Some(Message::Ping(Bytes::from_static(b"p")))
        );
        assert_eq!(
            reader.next_message().await.unwrap(),
            Some(Message::binary(&b"hello"[..]))
        );
    }

    #[tokio::test]
    async fn test_leftover_bytes_are_read_first() {
        let (_a, b) = tokio::io::duplex(64);
        let leftover = BytesMut::from(&Frame::binary(&b"early"[..]).to_bytes()[..]);
        let (mut reader, _writer) = split(b, Role::Client, SocketConfig::default(), leftover);
        assert_eq!(
            reader.next_message().await.unwrap(),
            Some(Message::binary(&b"early"[..]))
        );
    }

    #[tokio::test]
    async fn test_leftover_frames_and_partial_tail() {
        let (a, b) = tokio::io::duplex(64);
        let mut leftover = BytesMut::new();
        leftover.extend_from_slice(&Frame::binary(&b"one"[..]).to_bytes());
        leftover.extend_from_slice(&Frame::binary(&b"two"[..]).to_bytes());
        let third = Frame::binary(&b"three"[..]).to_bytes();
        leftover.extend_from_slice(&third[..3]);
        let (mut reader, _writer) = split(b, Role::Client, SocketConfig::default(), leftover);

        assert_eq!(reader.next_message().await.unwrap(), Some(Message::binary(&b"one"[..])));
        assert_eq!(reader.next_message().await.unwrap(), Some(Message::binary(&b"two"[..])));

        let (_, mut raw_tx) = tokio::io::split(a);
        tokio::io::AsyncWriteExt::write_all(&mut raw_tx, &third[3..])
            .await
            .unwrap();
        assert_eq!(reader.next_message().await.unwrap(), Some(Message::binary(&b"three"[..])));
    }

    #[tokio::test]
    async fn test_eof_yields_none() {
        let (mut client_rx, mut client_tx, _server_rx, server_tx) = pair();
        drop(server_tx);
        drop(_server_rx);
        client_tx.shutdown().await.ok();
        assert!(client_rx.next_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stray_continuation_is_error() {
        let (a, b) = tokio::io::duplex(64);
        let (mut reader, _writer) = split(b, Role::Server, SocketConfig::default(), BytesMut::new());
        let (_, mut raw_tx) = tokio::io::split(a);
        let bytes = Frame::new(Opcode::Continuation, &b"x"[..]).to_bytes();
        tokio::io::AsyncWriteExt::write_all(&mut raw_tx, &bytes)
            .await
            .unwrap();
        assert!(matches!(
            reader.next_message().await,
            Err(Error::Frame(FrameError::UnexpectedContinuation))
        ));
    }
}
