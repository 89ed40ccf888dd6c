//! Server-side socket connections

use crate::manager::ConnectionManager;
use bytes::Bytes;
use http::HeaderName;
use skiff_core::handshake::HandshakeRequest;
use skiff_core::value::Store;
use skiff_core::{Packet, Peer, Result};
use std::net::SocketAddr;
use std::sync::{Arc, Weak};

/// One upgraded peer of the server. Clones share the connection.
#[derive(Clone)]
pub struct ServerConnection {
    id: u64,
    peer: Arc<Peer>,
    request: Arc<HandshakeRequest>,
    manager: Weak<ConnectionManager>,
}

impl std::fmt::Debug for ServerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConnection")
            .field("id", &self.id)
            .field("remote_addr", &self.peer.remote_addr())
            .field("path", &self.request.path())
            .finish()
    }
}

impl ServerConnection {
    pub(crate) fn new(
        id: u64,
        peer: Arc<Peer>,
        request: Arc<HandshakeRequest>,
        manager: Weak<ConnectionManager>,
    ) -> Self {
        Self {
            id,
            peer,
            request,
            manager,
        }
    }

    /// Connection id, unique for the lifetime of the server
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The underlying peer
    pub fn peer(&self) -> &Arc<Peer> {
        &self.peer
    }

    /// The upgrade request
    pub fn request(&self) -> &HandshakeRequest {
        &self.request
    }

    /// Upgrade request header as a string
    pub fn header(&self, name: &HeaderName) -> Option<&str> {
        self.request.header(name)
    }

    /// Query values of the upgrade request. Malformed queries yield an
    /// empty store.
    pub fn query(&self) -> Store {
        self.request
            .query()
            .and_then(|query| Store::parse(query).ok())
            .unwrap_or_default()
    }

    /// Remote socket address
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.peer.remote_addr()
    }

    /// Local socket address
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.peer.local_addr()
    }

    /// The manager tracking every connection of the server
    pub fn manager(&self) -> Option<Arc<ConnectionManager>> {
        self.manager.upgrade()
    }

    /// Send already-encoded packet bytes
    pub async fn push(&self, data: impl Into<Bytes>) -> Result<()> {
        self.peer.push(data.into()).await
    }

    /// Send a routable packet
    pub async fn emit(&self, id: u64, event: &str, payload: impl AsRef<[u8]>) -> Result<()> {
        self.peer.emit(id, event, payload.as_ref()).await
    }

    /// Send a packet
    pub async fn emit_packet(&self, packet: &Packet) -> Result<()> {
        self.peer.emit_packet(packet).await
    }

    /// Send `value` as a JSON payload
    #[cfg(feature = "json")]
    pub async fn emit_json<T: serde::Serialize + ?Sized>(
        &self,
        id: u64,
        event: &str,
        value: &T,
    ) -> Result<()> {
        self.peer.emit_json(id, event, value).await
    }

    /// Close the connection. Returns `false` if it was already closing.
    pub fn close(&self) -> bool {
        self.peer.close()
    }

    /// Whether the connection has stopped
    pub fn is_closed(&self) -> bool {
        self.peer.is_closed()
    }
}
