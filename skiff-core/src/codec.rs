//! Application packet codec
//!
//! Every carrier `Binary` message holds exactly one packet:
//!
//! ```text
//! [kind: u8][id: u64 BE][event_len: u32 BE][event: event_len bytes][payload: rest]
//! ```
//!
//! Decoding never fails. Input that cannot be read as a packet comes back
//! with [`PacketKind::Unknown`] and empty fields so the caller can hand it to
//! its unknown-message callback without dropping the connection.

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Bytes before the event name
pub const HEADER_LEN: usize = 1 + 8 + 4;

/// What a packet carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    /// Routed application data
    Binary,
    /// Application-level heartbeat
    Ping,
    /// Heartbeat answer
    Pong,
    /// Request to end the connection
    Close,
    /// Undecodable input. Never sent.
    Unknown,
}

impl PacketKind {
    /// Wire value of the kind
    pub fn value(&self) -> u8 {
        match self {
            PacketKind::Unknown => 0x0,
            PacketKind::Binary => 0x2,
            PacketKind::Close => 0x8,
            PacketKind::Ping => 0x9,
            PacketKind::Pong => 0xA,
        }
    }

    /// Kind for a wire value; unrecognised values map to `Unknown`
    pub fn from(value: u8) -> Self {
        match value {
            0x2 => PacketKind::Binary,
            0x8 => PacketKind::Close,
            0x9 => PacketKind::Ping,
            0xA => PacketKind::Pong,
            _ => PacketKind::Unknown,
        }
    }

    /// Whether the kind carries an event and payload
    pub fn is_control(&self) -> bool {
        matches!(self, PacketKind::Ping | PacketKind::Pong | PacketKind::Close)
    }
}

/// A decoded packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Packet kind
    pub kind: PacketKind,
    /// Request correlation id; 0 means fire-and-forget
    pub id: u64,
    /// Route-matching event name
    pub event: String,
    /// Opaque payload
    pub payload: Bytes,
}

impl Packet {
    /// A routable packet
    pub fn new(id: u64, event: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            kind: PacketKind::Binary,
            id,
            event: event.into(),
            payload: payload.into(),
        }
    }

    /// A packet with no event or payload
    pub fn control(kind: PacketKind, id: u64) -> Self {
        Self {
            kind,
            id,
            event: String::new(),
            payload: Bytes::new(),
        }
    }

    /// The undecodable-input sentinel
    pub fn unknown() -> Self {
        Self::control(PacketKind::Unknown, 0)
    }
}

/// Encodes and decodes packets.
///
/// Peers only depend on this capability, so a different wire layout can be
/// swapped in per client or server.
pub trait Protocol: Send + Sync + 'static {
    /// Serialize one packet. Control kinds drop `event` and `payload`.
    fn encode(&self, kind: PacketKind, id: u64, event: &str, payload: &[u8]) -> Bytes;

    /// Parse one packet. Must not fail; bad input yields `PacketKind::Unknown`.
    fn decode(&self, data: Bytes) -> Packet;
}

/// The built-in binary layout
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultProtocol;

impl Protocol for DefaultProtocol {
    fn encode(&self, kind: PacketKind, id: u64, event: &str, payload: &[u8]) -> Bytes {
        let (event, payload) = if kind.is_control() {
            (&[][..], &[][..])
        } else {
            (event.as_bytes(), payload)
        };

        let mut buf = BytesMut::with_capacity(HEADER_LEN + event.len() + payload.len());
        buf.put_u8(kind.value());
        buf.put_u64(id);
        buf.put_u32(event.len() as u32);
        buf.put_slice(event);
        buf.put_slice(payload);
        buf.freeze()
    }

    fn decode(&self, mut data: Bytes) -> Packet {
        if data.is_empty() {
            return Packet::unknown();
        }

        let kind = PacketKind::from(data[0]);
        match kind {
            PacketKind::Unknown => Packet::unknown(),
            PacketKind::Ping | PacketKind::Pong | PacketKind::Close => {
                let id = if data.len() >= 9 {
                    (&data[1..9]).get_u64()
                } else {
                    0
                };
                Packet::control(kind, id)
            }
            PacketKind::Binary => {
                if data.len() < HEADER_LEN {
                    return Packet::unknown();
                }
                data.advance(1);
                let id = data.get_u64();
                let event_len = data.get_u32() as usize;
                if event_len > data.len() {
                    return Packet::unknown();
                }
                let event = data.split_to(event_len);
                match std::str::from_utf8(&event) {
                    Ok(event) => Packet {
                        kind,
                        id,
                        event: event.to_string(),
                        payload: data,
                    },
                    Err(_) => Packet::unknown(),
                }
            }
        }
    }
}
