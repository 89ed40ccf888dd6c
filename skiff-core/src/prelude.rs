//! Prelude module for Skiff Core
//!
//! Re-exports the types most applications touch when wiring routers,
//! middleware and peers.

pub use crate::codec::{DefaultProtocol, Packet, PacketKind, Protocol};
pub use crate::error::{Error, Result};
pub use crate::message::Message;
pub use crate::middleware::{from_fn, Chain, Middleware, Next};
pub use crate::peer::Peer;
pub use crate::router::{Hooks, HttpRouter, Params, SocketRouter};
pub use crate::stream::{Context, SocketStream};
pub use crate::value::{FieldMap, Store, Value};

pub use bytes::{Bytes, BytesMut};

#[cfg(feature = "json")]
pub use serde::{Deserialize, Serialize};
