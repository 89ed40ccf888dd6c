//! Packet and HTTP server
//!
//! One listener serves both protocols: requests carrying a WebSocket
//! upgrade on the configured path become socket peers, everything else is
//! answered as plain HTTP.

use crate::config::ServerConfig;
use crate::connection::ServerConnection;
use crate::http::{HttpService, Router as HttpRouter};
use crate::manager::ConnectionManager;
use bytes::{Bytes, BytesMut};
use skiff_core::handshake::{parse_request, read_head, reject_to_string, response_to_string, validate_client_handshake, HandshakeRequest};
use skiff_core::middleware::{Chain, Middleware};
use skiff_core::peer::{action_fn, drive, endpoint, ActionFn, ConnFn, Dispatch, ErrorFn, RawFn};
use skiff_core::router::SocketRouter;
use skiff_core::socket::split;
use skiff_core::stream::SocketStream;
use skiff_core::transport::{Transport, TransportStream};
use skiff_core::{DefaultProtocol, Error, Peer, Protocol, Result, Role};
use skiff_transport_tcp::TcpTransport;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

/// Pause after a failed accept before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Cheap handle to a running server, passed to HTTP handlers
#[derive(Debug, Clone)]
pub struct ServerHandle {
    manager: Arc<ConnectionManager>,
    shutdown: CancellationToken,
}

impl ServerHandle {
    pub(crate) fn new(manager: Arc<ConnectionManager>, shutdown: CancellationToken) -> Self {
        Self { manager, shutdown }
    }

    /// The socket connection manager
    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Stop accepting and close every connection
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Whether shutdown has been requested
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

struct Callbacks {
    on_open: Option<ConnFn<ServerConnection>>,
    on_close: Option<ConnFn<ServerConnection>>,
    on_error: ErrorFn,
    heartbeat: Option<ActionFn<ServerConnection>>,
}

struct ServerInner {
    config: ServerConfig,
    callbacks: Callbacks,
    dispatch: Arc<Dispatch<ServerConnection>>,
    http: HttpService,
    protocol: Arc<dyn Protocol>,
    handle: ServerHandle,
}

/// Packet and HTTP server
pub struct Server {
    inner: Arc<ServerInner>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.inner.config)
            .field("dispatch", &self.inner.dispatch)
            .field("manager", &self.inner.handle.manager)
            .finish()
    }
}

impl Server {
    /// Create a server builder
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// The server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Handle for shutting down and reaching connections
    pub fn handle(&self) -> ServerHandle {
        self.inner.handle.clone()
    }

    /// Bind the configured address over TCP
    pub async fn listen(self) -> Result<Listener<TcpTransport>> {
        let transport = TcpTransport::bind(self.inner.config.bind_address.as_str()).await?;
        Ok(self.with_transport(transport))
    }

    /// Serve on an already bound transport
    pub fn with_transport<T: Transport>(self, transport: T) -> Listener<T> {
        Listener {
            server: self,
            transport,
        }
    }

    /// Bind and serve until [`ServerHandle::shutdown`]
    pub async fn serve(self) -> Result<()> {
        self.listen().await?.serve().await
    }

    /// Bind and serve until `shutdown_signal` resolves
    pub async fn serve_with_graceful_shutdown<F>(self, shutdown_signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        self.listen()
            .await?
            .serve_with_graceful_shutdown(shutdown_signal)
            .await
    }
}

/// A server bound to a transport
#[derive(Debug)]
pub struct Listener<T> {
    server: Server,
    transport: T,
}

impl<T: Transport> Listener<T> {
    /// Address the transport is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.transport.local_addr()
    }

    /// Handle for shutting down and reaching connections
    pub fn handle(&self) -> ServerHandle {
        self.server.handle()
    }

    /// Serve until `shutdown_signal` resolves, then close every connection
    pub async fn serve_with_graceful_shutdown<F>(self, shutdown_signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let handle = self.handle();
        let serving = self.serve();
        tokio::pin!(serving);
        tokio::select! {
            result = &mut serving => return result,
            _ = shutdown_signal => handle.shutdown(),
        }
        serving.await
    }

    /// Accept connections until [`ServerHandle::shutdown`], then wait for
    /// every connection to close
    pub async fn serve(self) -> Result<()> {
        let inner = self.server.inner;
        let shutdown = inner.handle.shutdown.clone();
        let mut tasks = JoinSet::new();
        info!(addr = ?self.transport.local_addr().ok(), "server listening");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "connection task failed");
                    }
                }
                accepted = self.transport.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let inner = Arc::clone(&inner);
                        let span = tracing::debug_span!("conn", %addr);
                        tasks.spawn(async move { inner.handle_stream(stream, addr).await }.instrument(span));
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }

        info!(open = tasks.len(), "server shutting down");
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "connection task failed");
            }
        }
        Ok(())
    }
}

async fn reject<S: AsyncWrite + Unpin>(stream: &mut S, status: u16, reason: &str) {
    let answer = reject_to_string(status, reason);
    if stream.write_all(answer.as_bytes()).await.is_ok() {
        let _ = stream.shutdown().await;
    }
}

impl ServerInner {
    async fn handle_stream<S: TransportStream>(self: Arc<Self>, mut stream: S, addr: SocketAddr) {
        let mut buf = BytesMut::with_capacity(self.config.read_buffer_size);
        let head = match tokio::time::timeout(self.config.handshake_timeout, read_head(&mut stream, &mut buf)).await {
            Ok(Ok(head)) => head,
            Ok(Err(e)) => {
                debug!(error = %e, "request head not read");
                return;
            }
            Err(_) => {
                debug!("request head timed out");
                return;
            }
        };

        let request = match parse_request(&head) {
            Ok(request) => request,
            Err(e) => {
                debug!(error = %e, "malformed request");
                reject(&mut stream, 400, "Bad Request").await;
                return;
            }
        };

        if request.is_upgrade() {
            self.upgrade(stream, request, buf, addr).await;
        } else {
            self.http.respond(stream, request, buf, addr).await;
        }
    }

    async fn upgrade<S: TransportStream>(&self, mut stream: S, request: HandshakeRequest, buf: BytesMut, addr: SocketAddr) {
        if request.path() != self.config.ws_path {
            debug!(path = request.path(), "upgrade on unknown path");
            reject(&mut stream, 404, "Not Found").await;
            return;
        }

        let key = match validate_client_handshake(&request) {
            Ok(key) => key.to_string(),
            Err(e) => {
                (self.callbacks.on_error)(&e);
                reject(&mut stream, 400, "Bad Request").await;
                return;
            }
        };

        let manager = &self.handle.manager;
        let Some(_slot) = manager.try_reserve(self.config.max_connections) else {
            warn!(max = self.config.max_connections, "connection limit reached");
            reject(&mut stream, 503, "Service Unavailable").await;
            return;
        };

        let accepted = async {
            stream.write_all(response_to_string(&key).as_bytes()).await?;
            stream.flush().await
        };
        if let Err(e) = accepted.await {
            (self.callbacks.on_error)(&Error::Io(e));
            return;
        }

        let remote_addr = stream.remote_addr().or(Some(addr));
        let local_addr = stream.local_addr();
        let (reader, writer) = split(stream, Role::Server, self.config.socket(), buf);
        let peer = Arc::new(Peer::new(writer, Arc::clone(&self.protocol), remote_addr, local_addr));
        let conn = manager.add_connection(Arc::clone(&peer), request).await;
        info!(id = conn.id(), "peer connected");
        #[cfg(feature = "metrics")]
        metrics::counter!("skiff_server_connections_opened_total").increment(1);

        if let Some(on_open) = &self.callbacks.on_open {
            on_open(&conn);
        }

        let reason = drive(
            conn.clone(),
            peer,
            reader,
            Arc::clone(&self.dispatch),
            self.config.timing(),
            self.callbacks.heartbeat.clone(),
            self.handle.shutdown.child_token(),
        )
        .await;

        manager.remove_connection(conn.id(), &reason).await;
        if let Some(on_close) = &self.callbacks.on_close {
            on_close(&conn);
        }
        info!(id = conn.id(), %reason, "peer disconnected");
        #[cfg(feature = "metrics")]
        metrics::counter!("skiff_server_connections_closed_total").increment(1);
    }
}

/// Server builder
pub struct ServerBuilder {
    config: ServerConfig,
    on_open: Option<ConnFn<ServerConnection>>,
    on_close: Option<ConnFn<ServerConnection>>,
    on_error: Option<ErrorFn>,
    on_message: Option<RawFn<ServerConnection>>,
    on_unknown: Option<RawFn<ServerConnection>>,
    heartbeat: Option<ActionFn<ServerConnection>>,
    ping: Option<ActionFn<ServerConnection>>,
    pong: Option<ActionFn<ServerConnection>>,
    middleware: Chain<ServerConnection, SocketStream>,
    router: Option<Arc<SocketRouter<ServerConnection>>>,
    http_router: Option<Arc<HttpRouter>>,
    protocol: Arc<dyn Protocol>,
}

impl std::fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("config", &self.config)
            .field("middleware", &self.middleware.len())
            .field("router", &self.router)
            .field("http_router", &self.http_router)
            .finish()
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    /// Create a new server builder
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            on_open: None,
            on_close: None,
            on_error: None,
            on_message: None,
            on_unknown: None,
            heartbeat: None,
            ping: None,
            pong: None,
            middleware: Chain::new(),
            router: None,
            http_router: None,
            protocol: Arc::new(DefaultProtocol),
        }
    }

    /// Replace the configuration
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the bind address
    pub fn bind(mut self, addr: impl Into<String>) -> Self {
        self.config.bind_address = addr.into();
        self
    }

    /// Set the upgrade path
    pub fn ws_path(mut self, path: impl Into<String>) -> Self {
        self.config.ws_path = path.into();
        self
    }

    /// Set the maximum number of socket connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.config.max_connections = max;
        self
    }

    /// Set the request head timeout
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    /// Set the heartbeat interval
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval = interval;
        self
    }

    /// Set the pong timeout
    pub fn heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.config.heartbeat_timeout = timeout;
        self
    }

    /// Set the maximum HTTP body size
    pub fn max_body_size(mut self, size: usize) -> Self {
        self.config.max_body_size = size;
        self
    }

    /// Called when a peer connects
    pub fn on_open(mut self, f: impl Fn(&ServerConnection) + Send + Sync + 'static) -> Self {
        self.on_open = Some(Arc::new(f));
        self
    }

    /// Called once after a peer disconnects
    pub fn on_close(mut self, f: impl Fn(&ServerConnection) + Send + Sync + 'static) -> Self {
        self.on_close = Some(Arc::new(f));
        self
    }

    /// Called with upgrade, read and dispatch errors (default: log them)
    pub fn on_error(mut self, f: impl Fn(&Error) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Called with every raw inbound packet message
    pub fn on_message(mut self, f: impl Fn(&ServerConnection, &Bytes) + Send + Sync + 'static) -> Self {
        self.on_message = Some(Arc::new(f));
        self
    }

    /// Called with messages that do not decode
    pub fn on_unknown(mut self, f: impl Fn(&ServerConnection, &Bytes) + Send + Sync + 'static) -> Self {
        self.on_unknown = Some(Arc::new(f));
        self
    }

    /// Replace the heartbeat (default: send a `Ping` packet)
    pub fn heartbeat<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ServerConnection) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.heartbeat = Some(action_fn(f));
        self
    }

    /// Replace the `Ping` packet handler (default: answer with `Pong`)
    pub fn ping_handler<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ServerConnection) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.ping = Some(action_fn(f));
        self
    }

    /// Replace the `Pong` packet handler (default: reset the pong watchdog)
    pub fn pong_handler<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ServerConnection) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.pong = Some(action_fn(f));
        self
    }

    /// Add a middleware layer inside the ones already added
    pub fn with_middleware(mut self, layer: Middleware<ServerConnection, SocketStream>) -> Self {
        self.middleware.push(layer);
        self
    }

    /// Route socket packets through `router`
    pub fn router(mut self, router: SocketRouter<ServerConnection>) -> Self {
        self.router = Some(Arc::new(router));
        self
    }

    /// Answer plain HTTP requests through `router`
    pub fn http_router(mut self, router: HttpRouter) -> Self {
        self.http_router = Some(Arc::new(router));
        self
    }

    /// Use a different packet codec
    pub fn protocol(mut self, protocol: impl Protocol) -> Self {
        self.protocol = Arc::new(protocol);
        self
    }

    /// Validate everything and build the server
    pub fn build(self) -> Result<Server> {
        self.config.validate()?;

        let on_error: ErrorFn = self.on_error.unwrap_or_else(|| {
            Arc::new(|e: &Error| warn!(error = %e, "server error"))
        });
        let pipeline = self
            .middleware
            .then(endpoint(self.router, Arc::clone(&on_error)));
        let dispatch = Dispatch::new(Arc::clone(&self.protocol), Arc::clone(&on_error), pipeline)
            .on_message(self.on_message)
            .on_unknown(self.on_unknown)
            .ping_handler(self.ping)
            .pong_handler(self.pong);

        let handle = ServerHandle::new(Arc::new(ConnectionManager::new()), CancellationToken::new());
        let http = HttpService {
            router: self.http_router,
            handle: handle.clone(),
            on_error: Arc::clone(&on_error),
            max_body_size: self.config.max_body_size,
        };

        Ok(Server {
            inner: Arc::new(ServerInner {
                config: self.config,
                callbacks: Callbacks {
                    on_open: self.on_open,
                    on_close: self.on_close,
                    on_error,
                    heartbeat: self.heartbeat,
                },
                dispatch: Arc::new(dispatch),
                http,
                protocol: self.protocol,
                handle,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skiff_core::handshake::{client_handshake, generate_key, request_to_string};
    use skiff_core::socket::SocketConfig;
    use skiff_core::{Message, PacketKind};
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpStream;

    async fn start(builder: ServerBuilder) -> (SocketAddr, ServerHandle, tokio::task::JoinHandle<Result<()>>) {
        let listener = builder.bind("127.0.0.1:0").build().unwrap().listen().await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = listener.handle();
        (addr, handle, tokio::spawn(listener.serve()))
    }

    #[test]
    fn test_build_validates_config() {
        assert!(Server::builder().max_connections(0).build().is_err());
        assert!(Server::builder().ws_path("chat").build().is_err());
    }

    #[tokio::test]
    async fn test_upgrade_on_wrong_path_rejected() {
        let (addr, handle, serving) = start(Server::builder().ws_path("/ws")).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let err = client_handshake(&mut stream, &addr.to_string(), "/other").await;
        assert!(err.is_err());

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = request_to_string(&addr.to_string(), "/other", &generate_key());
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut out = String::new();
        stream.read_to_string(&mut out).await.unwrap();
        assert!(out.starts_with("HTTP/1.1 404 Not Found\r\n"), "{out}");
        assert_eq!(handle.manager().get_stats().await.total_connections, 0);

        handle.shutdown();
        serving.await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_simultaneous_upgrades_respect_the_limit() {
        let (addr, handle, serving) = start(Server::builder().max_connections(2)).await;

        let attempts: Vec<_> = (0..10)
            .map(|_| {
                tokio::spawn(async move {
                    let mut stream = TcpStream::connect(addr).await.unwrap();
                    let accepted = client_handshake(&mut stream, &addr.to_string(), "/").await.is_ok();
                    (accepted, stream)
                })
            })
            .collect();

        let mut open = Vec::new();
        for attempt in attempts {
            let (accepted, stream) = attempt.await.unwrap();
            if accepted {
                open.push(stream);
            }
        }
        assert_eq!(open.len(), 2);
        assert!(handle.manager().connection_count().await <= 2);

        handle.shutdown();
        serving.await.unwrap().unwrap();
        assert_eq!(handle.manager().get_stats().await.peak_connections, 2);
    }

    #[tokio::test]
    async fn test_http_without_router_is_404() {
        let (addr, handle, serving) = start(Server::builder()).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"GET /x HTTP/1.1\r\nHost: a\r\n\r\n").await.unwrap();
        let mut out = String::new();
        stream.read_to_string(&mut out).await.unwrap();
        assert!(out.starts_with("HTTP/1.1 404 Not Found\r\n"));

        handle.shutdown();
        serving.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_closes_peers() {
        let (addr, handle, serving) = start(Server::builder()).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let leftover = client_handshake(&mut stream, &addr.to_string(), "/").await.unwrap();
        let (mut reader, _writer) = split(stream, Role::Client, SocketConfig::default(), leftover);

        while handle.manager().connection_count().await == 0 {
            tokio::task::yield_now().await;
        }
        handle.shutdown();
        serving.await.unwrap().unwrap();

        assert!(matches!(reader.next_message().await.unwrap(), Some(Message::Close(_))));
        assert_eq!(handle.manager().connection_count().await, 0);
        assert_eq!(handle.manager().get_stats().await.normal_closures, 1);
    }

    #[tokio::test]
    async fn test_packet_sent_with_the_upgrade_request_is_answered() {
        use skiff_core::frame::{Frame, FrameCodec};
        use tokio_util::codec::Encoder;

        let (addr, handle, serving) = start(Server::builder()).await;

        let mut wire = BytesMut::from(request_to_string(&addr.to_string(), "/", &generate_key()).as_bytes());
        let ping = DefaultProtocol.encode(PacketKind::Ping, 0, "", b"");
        FrameCodec::new(Role::Client, 1 << 16)
            .encode(Frame::binary(ping), &mut wire)
            .unwrap();

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(&wire).await.unwrap();
        let mut buf = BytesMut::new();
        let head = read_head(&mut stream, &mut buf).await.unwrap();
        assert!(head.starts_with(b"HTTP/1.1 101"));

        let (mut reader, _writer) = split(stream, Role::Client, SocketConfig::default(), buf);
        let answer = tokio::time::timeout(Duration::from_secs(5), reader.next_message())
            .await
            .expect("no answer to the early packet")
            .unwrap();
        let Some(Message::Binary(data)) = answer else {
            panic!("expected a pong packet");
        };
        assert_eq!(DefaultProtocol.decode(data).kind, PacketKind::Pong);

        handle.shutdown();
        serving.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_ping_packet_answered() {
        let (addr, handle, serving) = start(Server::builder()).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let leftover = client_handshake(&mut stream, &addr.to_string(), "/").await.unwrap();
        let (mut reader, mut writer) = split(stream, Role::Client, SocketConfig::default(), leftover);

        let ping = DefaultProtocol.encode(PacketKind::Ping, 0, "", b"");
        writer.send(Message::Binary(ping)).await.unwrap();
        let Some(Message::Binary(data)) = reader.next_message().await.unwrap() else {
            panic!("expected a pong packet");
        };
        assert_eq!(DefaultProtocol.decode(data).kind, PacketKind::Pong);

        handle.shutdown();
        serving.await.unwrap().unwrap();
    }
}
