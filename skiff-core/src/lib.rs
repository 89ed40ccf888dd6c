//! # Skiff Core
//!
//! Protocol and dispatch foundation shared by the Skiff client and server:
//!
//! - Error taxonomy
//! - WebSocket frames, opening handshake and message framing
//! - The packet codec carried inside binary messages
//! - Route trie, socket and HTTP routers with before/after hooks
//! - Onion middleware chains
//! - Connection lifecycle: stop signal, heartbeat, pong watchdog, read loop
//! - Tagged request values and field mapping

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]
#![doc(html_root_url = "https://docs.rs/skiff-core/")]

// Wire layers
pub mod codec;
pub mod frame;
pub mod handshake;
pub mod message;
pub mod protocol;
pub mod socket;
pub mod transport;

// Dispatch
pub mod middleware;
pub mod router;
pub mod stream;
pub mod value;

// Connection runtime
pub mod lifecycle;
pub mod peer;

pub mod error;

// Prelude module with common imports
pub mod prelude;

// Re-export key types for convenience
pub use codec::{DefaultProtocol, Packet, PacketKind, Protocol};
pub use error::{Error, Result};
pub use frame::{Frame, Role};
pub use lifecycle::{StopReason, StopSignal};
pub use message::Message;
pub use middleware::{Chain, Middleware, Next};
pub use peer::{Dispatch, Peer, Timing};
pub use protocol::Opcode;
pub use router::{HttpRouter, SocketRouter};
pub use stream::SocketStream;
pub use transport::{Connector, Transport, TransportStream};
