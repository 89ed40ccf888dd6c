//! Connection manager for the server
//!
//! Tracks open socket connections by id for targeted sends, broadcasts and
//! shutdown.

use crate::connection::ServerConnection;
use bytes::Bytes;
use skiff_core::error::DispatchError;
use skiff_core::handshake::HandshakeRequest;
use skiff_core::{Peer, Result, StopReason};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::trace;

/// Connection manager statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagerStats {
    /// Number of open connections
    pub active_connections: usize,
    /// Connections accepted since start
    pub total_connections: u64,
    /// Highest number of concurrent connections
    pub peak_connections: usize,
    /// Connections dropped by the pong watchdog
    pub timeout_closures: u64,
    /// Connections ended by a read error
    pub error_closures: u64,
    /// Connections closed by either side or by shutdown
    pub normal_closures: u64,
}

/// Reason a connection left the manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Pong timeout
    Timeout,
    /// Read failure
    Error,
    /// Orderly close
    Normal,
}

impl From<&StopReason> for CloseReason {
    fn from(reason: &StopReason) -> Self {
        match reason {
            StopReason::PongTimeout => CloseReason::Timeout,
            StopReason::ReadError(_) => CloseReason::Error,
            StopReason::PeerClosed | StopReason::Closed | StopReason::Shutdown => CloseReason::Normal,
        }
    }
}

/// Connection manager
#[derive(Debug, Default)]
pub struct ConnectionManager {
    connections: Mutex<HashMap<u64, ServerConnection>>,
    stats: Mutex<ManagerStats>,
    next_id: AtomicU64,
    slots: AtomicUsize,
}

/// A reserved connection slot, released on drop
#[derive(Debug)]
pub(crate) struct Slot<'a>(&'a AtomicUsize);

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl ConnectionManager {
    /// Create an empty manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim one of `max` connection slots before the handshake is answered.
    ///
    /// Slots are counted atomically, so concurrent upgrades can not overshoot
    /// the limit. `None` means the server is full.
    pub(crate) fn try_reserve(&self, max: usize) -> Option<Slot<'_>> {
        self.slots
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |taken| {
                (taken < max).then_some(taken + 1)
            })
            .ok()
            .map(|_| Slot(&self.slots))
    }

    /// Track a freshly upgraded peer and assign its id
    pub(crate) async fn add_connection(
        self: &Arc<Self>,
        peer: Arc<Peer>,
        request: HandshakeRequest,
    ) -> ServerConnection {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let conn = ServerConnection::new(id, peer, Arc::new(request), Arc::downgrade(self));

        let mut connections = self.connections.lock().await;
        connections.insert(id, conn.clone());

        let mut stats = self.stats.lock().await;
        stats.active_connections = connections.len();
        stats.total_connections += 1;
        stats.peak_connections = stats.peak_connections.max(stats.active_connections);

        conn
    }

    /// Stop tracking a connection
    pub(crate) async fn remove_connection(&self, id: u64, reason: &StopReason) {
        let mut connections = self.connections.lock().await;
        if connections.remove(&id).is_some() {
            let mut stats = self.stats.lock().await;
            stats.active_connections = connections.len();
            match CloseReason::from(reason) {
                CloseReason::Timeout => stats.timeout_closures += 1,
                CloseReason::Error => stats.error_closures += 1,
                CloseReason::Normal => stats.normal_closures += 1,
            }
        }
    }

    /// Get connection by id
    pub async fn get_connection(&self, id: u64) -> Option<ServerConnection> {
        self.connections.lock().await.get(&id).cloned()
    }

    /// Every open connection
    pub async fn get_all_connections(&self) -> Vec<ServerConnection> {
        self.connections.lock().await.values().cloned().collect()
    }

    /// Number of open connections
    pub async fn connection_count(&self) -> usize {
        self.connections.lock().await.len()
    }

    /// Snapshot of the statistics
    pub async fn get_stats(&self) -> ManagerStats {
        self.stats.lock().await.clone()
    }

    async fn require(&self, id: u64) -> Result<ServerConnection> {
        self.get_connection(id).await.ok_or_else(|| {
            DispatchError::NotFound {
                target: format!("connection {id}"),
            }
            .into()
        })
    }

    /// Send encoded packet bytes to one connection
    pub async fn push(&self, id: u64, data: impl Into<Bytes>) -> Result<()> {
        self.require(id).await?.push(data).await
    }

    /// Send a routable packet to one connection
    pub async fn emit(&self, id: u64, request_id: u64, event: &str, payload: &[u8]) -> Result<()> {
        self.require(id).await?.emit(request_id, event, payload).await
    }

    /// Send a routable packet to every connection. Returns how many sends
    /// succeeded.
    pub async fn broadcast(&self, request_id: u64, event: &str, payload: &[u8]) -> usize {
        self.broadcast_filtered(request_id, event, payload, |_| true)
            .await
    }

    /// Send a routable packet to every connection except `except_id`
    pub async fn broadcast_except(
        &self,
        except_id: u64,
        request_id: u64,
        event: &str,
        payload: &[u8],
    ) -> usize {
        self.broadcast_filtered(request_id, event, payload, |conn| conn.id() != except_id)
            .await
    }

    async fn broadcast_filtered<F>(&self, request_id: u64, event: &str, payload: &[u8], keep: F) -> usize
    where
        F: Fn(&ServerConnection) -> bool,
    {
        let mut delivered = 0;
        for conn in self.get_all_connections().await {
            if !keep(&conn) {
                continue;
            }
            match conn.emit(request_id, event, payload).await {
                Ok(()) => delivered += 1,
                Err(e) => trace!(id = conn.id(), error = %e, "broadcast skipped connection"),
            }
        }
        delivered
    }

    /// Close every open connection. Returns how many were closing.
    pub async fn close_all(&self) -> usize {
        self.get_all_connections()
            .await
            .iter()
            .filter(|conn| conn.close())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use skiff_core::codec::{DefaultProtocol, PacketKind, Protocol};
    use skiff_core::socket::{split, MessageReader, SocketConfig};
    use skiff_core::{Message, Role};

    fn request() -> HandshakeRequest {
        HandshakeRequest {
            method: "GET".to_string(),
            uri: "/?room=1".to_string(),
            headers: http::HeaderMap::new(),
        }
    }

    fn pair() -> (Arc<Peer>, MessageReader) {
        let (server, client) = tokio::io::duplex(4096);
        let (_, tx) = split(server, Role::Server, SocketConfig::default(), BytesMut::new());
        let (client_rx, _) = split(client, Role::Client, SocketConfig::default(), BytesMut::new());
        (
            Arc::new(Peer::new(tx, Arc::new(DefaultProtocol), None, None)),
            client_rx,
        )
    }

    #[test]
    fn test_slots_are_bounded_and_released() {
        let manager = ConnectionManager::new();
        let first = manager.try_reserve(2).unwrap();
        let _second = manager.try_reserve(2).unwrap();
        assert!(manager.try_reserve(2).is_none());

        drop(first);
        assert!(manager.try_reserve(2).is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reservations_never_exceed_the_limit() {
        let manager = Arc::new(ConnectionManager::new());
        let barrier = Arc::new(tokio::sync::Barrier::new(16));
        let claims: Vec<_> = (0..16)
            .map(|_| {
                let manager = Arc::clone(&manager);
                let barrier = Arc::clone(&barrier);
                tokio::spawn(async move {
                    barrier.wait().await;
                    let slot = manager.try_reserve(3);
                    let won = slot.is_some();
                    // hold the slot until every task has tried
                    barrier.wait().await;
                    won
                })
            })
            .collect();

        let mut won = 0;
        for claim in claims {
            won += usize::from(claim.await.unwrap());
        }
        assert_eq!(won, 3);
    }

    #[tokio::test]
    async fn test_add_and_remove() {
        let manager = Arc::new(ConnectionManager::new());
        let (peer, _rx) = pair();
        let conn = manager.add_connection(peer, request()).await;

        assert_eq!(conn.id(), 1);
        assert_eq!(conn.query().get_str("room"), Some("1"));
        assert_eq!(manager.connection_count().await, 1);
        assert!(conn.manager().is_some());

        manager.remove_connection(conn.id(), &StopReason::PongTimeout).await;
        let stats = manager.get_stats().await;
        assert_eq!(stats.active_connections, 0);
        assert_eq!(stats.total_connections, 1);
        assert_eq!(stats.peak_connections, 1);
        assert_eq!(stats.timeout_closures, 1);
    }

    #[tokio::test]
    async fn test_broadcast_except() {
        let manager = Arc::new(ConnectionManager::new());
        let (a, mut a_rx) = pair();
        let (b, _b_rx) = pair();
        let a = manager.add_connection(a, request()).await;
        let b = manager.add_connection(b, request()).await;

        assert_eq!(manager.broadcast_except(b.id(), 0, "/news", b"hi").await, 1);

        let Some(Message::Binary(data)) = a_rx.next_message().await.unwrap() else {
            panic!("expected a binary message");
        };
        let packet = DefaultProtocol.decode(data);
        assert_eq!(packet.kind, PacketKind::Binary);
        assert_eq!(packet.event, "/news");

        assert_eq!(manager.close_all().await, 2);
        assert!(a.is_closed());
        assert_eq!(manager.broadcast(0, "/news", b"").await, 0);
    }

    #[tokio::test]
    async fn test_push_to_missing_connection() {
        let manager = ConnectionManager::new();
        let err = manager.push(42, Bytes::new()).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
