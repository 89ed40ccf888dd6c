//! The runtime of one upgraded connection
//!
//! Client sessions and server-side connections run the same machinery:
//!
//! * a [`Peer`] owning the write half behind a FIFO lock plus the stop signal
//! * a read loop decoding packets and feeding them through [`Dispatch`]
//! * heartbeat and pong watchdog timers
//!
//! [`drive`] starts all three, waits for the single stop transition, then
//! cancels the timers and closes the socket before returning.

use crate::codec::{Packet, PacketKind, Protocol};
use crate::error::{DispatchError, Error, Result};
use crate::lifecycle::{spawn_heartbeat, spawn_watchdog, Keepalive, StopReason, StopSignal};
use crate::message::Message;
use crate::middleware::{next_fn, Next};
use crate::protocol::constants::CLOSE_NORMAL;
use crate::router::SocketRouter;
use crate::socket::{MessageReader, MessageWriter};
use crate::stream::SocketStream;
use bytes::Bytes;
use futures_util::future::BoxFuture;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Time allowed for the closing handshake before the socket is dropped
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Callback receiving the connection
pub type ConnFn<C> = Arc<dyn Fn(&C) + Send + Sync>;

/// Callback receiving an error
pub type ErrorFn = Arc<dyn Fn(&Error) + Send + Sync>;

/// Callback receiving the connection and a raw inbound message
pub type RawFn<C> = Arc<dyn Fn(&C, &Bytes) + Send + Sync>;

/// Async action on a connection, such as a heartbeat or ping handler
pub type ActionFn<C> = Arc<dyn Fn(C) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Box an async function as an [`ActionFn`]
pub fn action_fn<C, F, Fut>(f: F) -> ActionFn<C>
where
    C: 'static,
    F: Fn(C) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |conn: C| -> BoxFuture<'static, Result<()>> { Box::pin(f(conn)) })
}

/// Write half and stop state of one connection
pub struct Peer {
    writer: Mutex<MessageWriter>,
    stop: Arc<StopSignal>,
    keepalive: Keepalive,
    protocol: Arc<dyn Protocol>,
    remote_addr: Option<SocketAddr>,
    local_addr: Option<SocketAddr>,
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("remote_addr", &self.remote_addr)
            .field("local_addr", &self.local_addr)
            .field("stopped", &self.stop.is_stopped())
            .finish()
    }
}

impl Peer {
    /// Wrap the write half of an upgraded connection
    pub fn new(
        writer: MessageWriter,
        protocol: Arc<dyn Protocol>,
        remote_addr: Option<SocketAddr>,
        local_addr: Option<SocketAddr>,
    ) -> Self {
        Self {
            writer: Mutex::new(writer),
            stop: Arc::new(StopSignal::new()),
            keepalive: Keepalive::new(),
            protocol,
            remote_addr,
            local_addr,
        }
    }

    /// Send one carrier message. Writers are served in FIFO order.
    pub async fn send(&self, message: Message) -> Result<()> {
        if self.stop.is_stopped() {
            return Err(Error::Closed);
        }
        let mut writer = self.writer.lock().await;
        writer.send(message).await
    }

    /// Send already-encoded packet bytes
    pub async fn push(&self, data: Bytes) -> Result<()> {
        #[cfg(feature = "metrics")]
        {
            metrics::counter!("skiff_packets_sent_total").increment(1);
            metrics::counter!("skiff_bytes_sent_total").increment(data.len() as u64);
        }

        self.send(Message::Binary(data)).await
    }

    /// Encode and send a routable packet
    pub async fn emit(&self, id: u64, event: &str, payload: &[u8]) -> Result<()> {
        let data = self.protocol.encode(PacketKind::Binary, id, event, payload);
        self.push(data).await
    }

    /// Encode and send a packet
    pub async fn emit_packet(&self, packet: &Packet) -> Result<()> {
        let data = self
            .protocol
            .encode(packet.kind, packet.id, &packet.event, &packet.payload);
        self.push(data).await
    }

    /// Encode `value` as JSON and send it as a routable packet
    #[cfg(feature = "json")]
    pub async fn emit_json<T: serde::Serialize + ?Sized>(
        &self,
        id: u64,
        event: &str,
        value: &T,
    ) -> Result<()> {
        let payload = serde_json::to_vec(value)?;
        self.emit(id, event, &payload).await
    }

    /// Send a packet with no event or payload
    pub async fn emit_control(&self, kind: PacketKind) -> Result<()> {
        let data = self.protocol.encode(kind, 0, "", &[]);
        self.push(data).await
    }

    /// Stop the connection. Returns `false` if it was already stopping.
    pub fn close(&self) -> bool {
        self.stop.trigger(StopReason::Closed)
    }

    /// Whether the connection has stopped or is stopping
    pub fn is_closed(&self) -> bool {
        self.stop.is_stopped()
    }

    /// The connection's stop signal
    pub fn stop_signal(&self) -> &Arc<StopSignal> {
        &self.stop
    }

    /// Handle resetting the pong watchdog
    pub fn keepalive(&self) -> &Keepalive {
        &self.keepalive
    }

    /// Packet codec of the connection
    pub fn protocol(&self) -> &Arc<dyn Protocol> {
        &self.protocol
    }

    /// Remote socket address
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Local socket address
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    async fn close_socket(&self) {
        let closing = async {
            let mut writer = self.writer.lock().await;
            if let Err(e) = writer.send(Message::close(CLOSE_NORMAL, "")).await {
                trace!(error = %e, "close frame not sent");
            }
            if let Err(e) = writer.shutdown().await {
                trace!(error = %e, "socket shutdown failed");
            }
        };
        if time::timeout(CLOSE_TIMEOUT, closing).await.is_err() {
            debug!("closing handshake timed out");
        }
    }
}

/// How inbound packets are handled on one kind of connection
pub struct Dispatch<C> {
    protocol: Arc<dyn Protocol>,
    on_error: ErrorFn,
    on_message: Option<RawFn<C>>,
    on_unknown: Option<RawFn<C>>,
    ping: Option<ActionFn<C>>,
    pong: Option<ActionFn<C>>,
    pipeline: Next<C, SocketStream>,
}

impl<C> std::fmt::Debug for Dispatch<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatch")
            .field("on_message", &self.on_message.is_some())
            .field("on_unknown", &self.on_unknown.is_some())
            .field("ping", &self.ping.is_some())
            .field("pong", &self.pong.is_some())
            .finish()
    }
}

impl<C: Clone + Send + Sync + 'static> Dispatch<C> {
    /// Dispatch through `pipeline`, reporting failures to `on_error`
    pub fn new(protocol: Arc<dyn Protocol>, on_error: ErrorFn, pipeline: Next<C, SocketStream>) -> Self {
        Self {
            protocol,
            on_error,
            on_message: None,
            on_unknown: None,
            ping: None,
            pong: None,
            pipeline,
        }
    }

    /// Observe every raw inbound message before decoding
    pub fn on_message(mut self, f: Option<RawFn<C>>) -> Self {
        self.on_message = f;
        self
    }

    /// Receive messages that decode as `Unknown`
    pub fn on_unknown(mut self, f: Option<RawFn<C>>) -> Self {
        self.on_unknown = f;
        self
    }

    /// Replace the default ping answer (a `Pong` packet)
    pub fn ping_handler(mut self, f: Option<ActionFn<C>>) -> Self {
        self.ping = f;
        self
    }

    /// Replace the default pong handling (resetting the watchdog)
    pub fn pong_handler(mut self, f: Option<ActionFn<C>>) -> Self {
        self.pong = f;
        self
    }

    /// Report an error to the error callback
    pub fn report(&self, err: &Error) {
        (self.on_error)(err);
    }

    /// Handle one inbound packet message
    pub async fn handle(&self, conn: &C, peer: &Peer, raw: Bytes) {
        #[cfg(feature = "metrics")]
        metrics::counter!("skiff_packets_received_total").increment(1);

        if let Some(on_message) = &self.on_message {
            on_message(conn, &raw);
        }

        let packet = self.protocol.decode(raw.clone());
        match packet.kind {
            PacketKind::Unknown => {
                debug!(len = raw.len(), "undecodable packet");
                if let Some(on_unknown) = &self.on_unknown {
                    on_unknown(conn, &raw);
                }
            }
            PacketKind::Ping => {
                let answered = match &self.ping {
                    Some(handler) => handler(conn.clone()).await,
                    None => peer.emit_control(PacketKind::Pong).await,
                };
                if let Err(e) = answered {
                    self.report(&e);
                }
            }
            PacketKind::Pong => match &self.pong {
                Some(handler) => {
                    if let Err(e) = handler(conn.clone()).await {
                        self.report(&e);
                    }
                }
                None => peer.keepalive().touch(),
            },
            PacketKind::Close => {
                debug!("close packet received");
                peer.stop_signal().trigger(StopReason::PeerClosed);
            }
            PacketKind::Binary => {
                trace!(event = %packet.event, id = packet.id, "dispatching packet");
                (self.pipeline)(conn.clone(), SocketStream::new(packet)).await;
            }
        }
    }
}

/// The terminal pipeline step: resolve the event and run the route.
///
/// Unmatched events, a missing router, and route errors go to `on_error`.
pub fn endpoint<C>(router: Option<Arc<SocketRouter<C>>>, on_error: ErrorFn) -> Next<C, SocketStream>
where
    C: Clone + Send + Sync + 'static,
{
    next_fn(move |conn: C, stream: SocketStream| {
        let router = router.clone();
        let on_error = Arc::clone(&on_error);
        async move {
            let resolved = router
                .as_deref()
                .and_then(|router| router.resolve(stream.event()));
            match resolved {
                Some((route, params)) => {
                    if let Err(e) = route.run(conn, stream.with_params(params)).await {
                        on_error(&e);
                    }
                }
                None => on_error(&Error::from(DispatchError::NotFound {
                    target: stream.event().to_string(),
                })),
            }
        }
    })
}

/// Read messages until the connection stops
pub async fn read_loop<C>(conn: C, peer: Arc<Peer>, mut reader: MessageReader, dispatch: Arc<Dispatch<C>>)
where
    C: Clone + Send + Sync + 'static,
{
    let stop = Arc::clone(peer.stop_signal());
    loop {
        let next = tokio::select! {
            biased;
            _ = stop.stopped() => break,
            next = reader.next_message() => next,
        };

        match next {
            Ok(Some(message)) => {
                peer.keepalive().touch();
                match message {
                    Message::Binary(data) => dispatch.handle(&conn, &peer, data).await,
                    Message::Text(text) => dispatch.handle(&conn, &peer, Bytes::from(text)).await,
                    Message::Ping(data) => {
                        if let Err(e) = peer.send(Message::Pong(data)).await {
                            trace!(error = %e, "pong frame not sent");
                        }
                    }
                    Message::Pong(_) => {}
                    Message::Close(frame) => {
                        debug!(?frame, "close frame received");
                        stop.trigger(StopReason::PeerClosed);
                        break;
                    }
                }
            }
            Ok(None) => {
                stop.trigger(StopReason::PeerClosed);
                break;
            }
            Err(e) => {
                if stop.trigger(StopReason::ReadError(e.to_string())) {
                    warn!(error = %e, "read failed");
                    dispatch.report(&e);
                }
                break;
            }
        }
    }
}

/// Keepalive timing of a connection; zero disables a timer
#[derive(Debug, Clone, Copy, Default)]
pub struct Timing {
    /// Period between heartbeats
    pub heartbeat_interval: Duration,
    /// Silence tolerated before the connection is considered dead
    pub heartbeat_timeout: Duration,
}

/// Run an open connection until it stops, then close it.
///
/// Starts the heartbeat (default: a `Ping` packet), the pong watchdog and
/// the read loop. Returns once the stop signal has fired, both timers have
/// ended and the socket is closed. `teardown` stops the connection with
/// [`StopReason::Shutdown`].
pub async fn drive<C>(
    conn: C,
    peer: Arc<Peer>,
    reader: MessageReader,
    dispatch: Arc<Dispatch<C>>,
    timing: Timing,
    heartbeat: Option<ActionFn<C>>,
    teardown: CancellationToken,
) -> StopReason
where
    C: Clone + Send + Sync + 'static,
{
    let stop = Arc::clone(peer.stop_signal());

    let beat = {
        let conn = conn.clone();
        let peer = Arc::clone(&peer);
        let dispatch = Arc::clone(&dispatch);
        move || {
            let conn = conn.clone();
            let peer = Arc::clone(&peer);
            let dispatch = Arc::clone(&dispatch);
            let heartbeat = heartbeat.clone();
            async move {
                let sent = match heartbeat {
                    Some(heartbeat) => heartbeat(conn).await,
                    None => peer.emit_control(PacketKind::Ping).await,
                };
                if let Err(e) = sent {
                    if !peer.is_closed() {
                        dispatch.report(&e);
                    }
                }
            }
        }
    };
    let heartbeat_task = spawn_heartbeat(timing.heartbeat_interval, stop.token().clone(), beat);
    let watchdog_task = spawn_watchdog(timing.heartbeat_timeout, peer.keepalive(), Arc::clone(&stop));
    let read_task = tokio::spawn(read_loop(conn, Arc::clone(&peer), reader, dispatch));

    tokio::select! {
        _ = stop.stopped() => {}
        _ = teardown.cancelled() => {
            stop.trigger(StopReason::Shutdown);
        }
    }

    for task in [heartbeat_task, watchdog_task].into_iter().flatten() {
        join_or_abort(task, "timer").await;
    }
    // the read loop may be parked in a handler or a pong write; it goes
    // before the socket so it can not hold the write lock past the close
    join_or_abort(read_task, "read").await;
    peer.close_socket().await;

    let reason = stop.reason().cloned().unwrap_or(StopReason::Shutdown);
    debug!(%reason, "connection stopped");
    reason
}

/// Wait up to [`CLOSE_TIMEOUT`] for a stopped task, then abort it
async fn join_or_abort(mut task: JoinHandle<()>, name: &str) {
    match time::timeout(CLOSE_TIMEOUT, &mut task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) if e.is_cancelled() => {}
        Ok(Err(e)) => warn!(error = %e, "{name} task failed"),
        Err(_) => {
            debug!("{name} task did not stop in time, aborting");
            task.abort();
        }
    }
}
