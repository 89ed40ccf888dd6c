//! The reconnecting client
//!
//! [`Client::run`] drives the connection state machine:
//!
//! ```text
//! Connecting -> Open -> Closed -> (Reconnecting -> Connecting)...
//! ```
//!
//! Every open connection ends through one stop transition, after which
//! `on_close` fires exactly once and, if a reconnect interval is set, one
//! reconnect attempt follows.

use crate::config::ClientConfig;
use crate::connection::{self, Dial};
use bytes::Bytes;
use skiff_core::error::ConfigError;
use skiff_core::middleware::{Chain, Middleware};
use skiff_core::peer::{action_fn, drive, endpoint, ActionFn, ConnFn, Dispatch, ErrorFn, RawFn};
use skiff_core::router::SocketRouter;
use skiff_core::stream::SocketStream;
use skiff_core::{DefaultProtocol, Error, Packet, Peer, Protocol, Result, StopReason};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Where the client is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not started
    Idle,
    /// Dialing and handshaking
    Connecting,
    /// Connected
    Open,
    /// Waiting to reconnect
    Reconnecting,
    /// Stopped
    Closed,
}

struct Callbacks {
    on_open: ConnFn<Client>,
    on_close: ConnFn<Client>,
    on_error: ErrorFn,
    on_success: Option<ConnFn<Client>>,
    on_reconnecting: Option<ConnFn<Client>>,
    heartbeat: Option<ActionFn<Client>>,
}

struct Inner {
    config: ClientConfig,
    callbacks: Callbacks,
    dispatch: Arc<Dispatch<Client>>,
    protocol: Arc<dyn Protocol>,
    dialer: Box<dyn Dial>,
    session: Mutex<Option<Arc<Peer>>>,
    state: Mutex<ConnectionState>,
    running: AtomicBool,
    shutdown: CancellationToken,
}

/// Handle to a reconnecting packet client. Clones share the connection.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("url", &self.inner.config.url())
            .field("state", &self.state())
            .finish()
    }
}

impl Client {
    /// Start building a client for `addr` (`host:port`)
    pub fn builder(addr: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(ClientConfig::new(addr))
    }

    /// The client's configuration
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        *self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ConnectionState) {
        *self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// The open connection, if any
    pub fn peer(&self) -> Option<Arc<Peer>> {
        self.inner
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_peer(&self, peer: Option<Arc<Peer>>) {
        *self
            .inner
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = peer;
    }

    fn open_peer(&self) -> Result<Arc<Peer>> {
        self.peer().ok_or(Error::Closed)
    }

    /// Whether a connection is open
    pub fn is_connected(&self) -> bool {
        self.peer().is_some_and(|peer| !peer.is_closed())
    }

    /// Remote address of the open connection
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.peer().and_then(|peer| peer.remote_addr())
    }

    /// Local address of the open connection
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.peer().and_then(|peer| peer.local_addr())
    }

    /// Packet codec in use
    pub fn protocol(&self) -> &Arc<dyn Protocol> {
        &self.inner.protocol
    }

    /// Send already-encoded packet bytes
    pub async fn push(&self, data: impl Into<Bytes>) -> Result<()> {
        self.open_peer()?.push(data.into()).await
    }

    /// Send a routable packet
    pub async fn emit(&self, id: u64, event: &str, payload: impl AsRef<[u8]>) -> Result<()> {
        self.open_peer()?.emit(id, event, payload.as_ref()).await
    }

    /// Send a packet
    pub async fn emit_packet(&self, packet: &Packet) -> Result<()> {
        self.open_peer()?.emit_packet(packet).await
    }

    /// Send `value` as a JSON payload
    #[cfg(feature = "json")]
    pub async fn emit_json<T: serde::Serialize + ?Sized>(
        &self,
        id: u64,
        event: &str,
        value: &T,
    ) -> Result<()> {
        self.open_peer()?.emit_json(id, event, value).await
    }

    /// Close the open connection. The reconnect policy still applies.
    ///
    /// Returns `false` if there was no open connection to close.
    pub fn close(&self) -> bool {
        self.peer().is_some_and(|peer| peer.close())
    }

    /// Close the connection and stop reconnecting; [`Client::run`] returns
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    /// Run the client on a new task
    pub fn start(&self) -> JoinHandle<Result<()>> {
        let client = self.clone();
        tokio::spawn(async move { client.run().await })
    }

    /// Connect and keep the connection up until shut down.
    ///
    /// Returns when the connection ends with no reconnect interval set, or
    /// after [`Client::shutdown`]. A failed handshake is reported to
    /// `on_error`; with reconnecting disabled its error is also returned.
    #[tracing::instrument(name = "client", skip(self), fields(url = %self.inner.config.url()))]
    pub async fn run(&self) -> Result<()> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Err(Error::other("client is already running"));
        }
        let result = self.run_loop().await;
        self.set_state(ConnectionState::Closed);
        self.inner.running.store(false, Ordering::SeqCst);
        result
    }

    async fn run_loop(&self) -> Result<()> {
        let inner = &self.inner;
        let callbacks = &inner.callbacks;
        let reconnect = inner.config.reconnect_interval;

        loop {
            if inner.shutdown.is_cancelled() {
                return Ok(());
            }

            self.set_state(ConnectionState::Connecting);
            let opened = tokio::select! {
                opened = connection::open(inner.dialer.as_ref(), &inner.config, Arc::clone(&inner.protocol)) => opened,
                _ = inner.shutdown.cancelled() => return Ok(()),
            };

            match opened {
                Ok(opened) => {
                    info!("connected");
                    #[cfg(feature = "metrics")]
                    metrics::counter!("skiff_client_connections_opened_total").increment(1);

                    self.set_peer(Some(Arc::clone(&opened.peer)));
                    self.set_state(ConnectionState::Open);
                    if let Some(on_success) = &callbacks.on_success {
                        on_success(self);
                    }
                    (callbacks.on_open)(self);

                    let reason = drive(
                        self.clone(),
                        opened.peer,
                        opened.reader,
                        Arc::clone(&inner.dispatch),
                        inner.config.timing(),
                        callbacks.heartbeat.clone(),
                        inner.shutdown.child_token(),
                    )
                    .await;

                    self.set_peer(None);
                    self.set_state(ConnectionState::Closed);
                    (callbacks.on_close)(self);
                    info!(%reason, "disconnected");
                    if reason == StopReason::Shutdown {
                        return Ok(());
                    }
                }
                Err(e) => {
                    warn!(error = %e, "connect failed");
                    self.set_state(ConnectionState::Closed);
                    (callbacks.on_error)(&e);
                    if reconnect.is_zero() {
                        return Err(e);
                    }
                }
            }

            if reconnect.is_zero() {
                return Ok(());
            }

            self.set_state(ConnectionState::Reconnecting);
            debug!(?reconnect, "reconnecting");
            tokio::select! {
                _ = tokio::time::sleep(reconnect) => {}
                _ = inner.shutdown.cancelled() => return Ok(()),
            }
            #[cfg(feature = "metrics")]
            metrics::counter!("skiff_client_reconnects_total").increment(1);
            if let Some(on_reconnecting) = &callbacks.on_reconnecting {
                on_reconnecting(self);
            }
        }
    }
}

/// Client builder
///
/// `on_open`, `on_close` and `on_error` are mandatory; [`ClientBuilder::build`]
/// fails without them.
pub struct ClientBuilder {
    config: ClientConfig,
    on_open: Option<ConnFn<Client>>,
    on_close: Option<ConnFn<Client>>,
    on_error: Option<ErrorFn>,
    on_success: Option<ConnFn<Client>>,
    on_reconnecting: Option<ConnFn<Client>>,
    on_message: Option<RawFn<Client>>,
    on_unknown: Option<RawFn<Client>>,
    heartbeat: Option<ActionFn<Client>>,
    ping: Option<ActionFn<Client>>,
    pong: Option<ActionFn<Client>>,
    middleware: Chain<Client, SocketStream>,
    router: Option<Arc<SocketRouter<Client>>>,
    protocol: Arc<dyn Protocol>,
    dialer: Option<Box<dyn Dial>>,
}

impl std::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("config", &self.config)
            .field("middleware", &self.middleware.len())
            .field("router", &self.router)
            .finish()
    }
}

impl ClientBuilder {
    /// Create a builder from a configuration
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            on_open: None,
            on_close: None,
            on_error: None,
            on_success: None,
            on_reconnecting: None,
            on_message: None,
            on_unknown: None,
            heartbeat: None,
            ping: None,
            pong: None,
            middleware: Chain::new(),
            router: None,
            protocol: Arc::new(DefaultProtocol),
            dialer: None,
        }
    }

    /// Replace the configuration
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Edit the configuration in place
    pub fn configure(mut self, f: impl FnOnce(ClientConfig) -> ClientConfig) -> Self {
        self.config = f(self.config);
        self
    }

    /// Called when a connection opens
    pub fn on_open(mut self, f: impl Fn(&Client) + Send + Sync + 'static) -> Self {
        self.on_open = Some(Arc::new(f));
        self
    }

    /// Called once after each connection closes
    pub fn on_close(mut self, f: impl Fn(&Client) + Send + Sync + 'static) -> Self {
        self.on_close = Some(Arc::new(f));
        self
    }

    /// Called with handshake, read and dispatch errors
    pub fn on_error(mut self, f: impl Fn(&Error) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Called when the handshake succeeds, before `on_open`
    pub fn on_success(mut self, f: impl Fn(&Client) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(f));
        self
    }

    /// Called before each reconnect attempt
    pub fn on_reconnecting(mut self, f: impl Fn(&Client) + Send + Sync + 'static) -> Self {
        self.on_reconnecting = Some(Arc::new(f));
        self
    }

    /// Called with every raw inbound packet message
    pub fn on_message(mut self, f: impl Fn(&Client, &Bytes) + Send + Sync + 'static) -> Self {
        self.on_message = Some(Arc::new(f));
        self
    }

    /// Called with messages that do not decode
    pub fn on_unknown(mut self, f: impl Fn(&Client, &Bytes) + Send + Sync + 'static) -> Self {
        self.on_unknown = Some(Arc::new(f));
        self
    }

    /// Replace the heartbeat (default: send a `Ping` packet)
    pub fn heartbeat<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Client) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.heartbeat = Some(action_fn(f));
        self
    }

    /// Replace the `Ping` packet handler (default: answer with `Pong`)
    pub fn ping_handler<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Client) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.ping = Some(action_fn(f));
        self
    }

    /// Replace the `Pong` packet handler (default: reset the pong watchdog)
    pub fn pong_handler<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Client) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.pong = Some(action_fn(f));
        self
    }

    /// Add a middleware layer inside the ones already added
    pub fn with_middleware(mut self, layer: Middleware<Client, SocketStream>) -> Self {
        self.middleware.push(layer);
        self
    }

    /// Route inbound packets through `router`
    pub fn router(mut self, router: SocketRouter<Client>) -> Self {
        self.router = Some(Arc::new(router));
        self
    }

    /// Use a different packet codec
    pub fn protocol(mut self, protocol: impl Protocol) -> Self {
        self.protocol = Arc::new(protocol);
        self
    }

    /// Use a different transport
    pub fn connector<T>(mut self, connector: T) -> Self
    where
        T: skiff_core::Connector,
    {
        self.dialer = Some(Box::new(connector));
        self
    }

    fn missing(field: &str) -> Error {
        Error::Config(ConfigError::MissingField {
            field: field.to_string(),
        })
    }

    /// Validate everything and build the client
    pub fn build(self) -> Result<Client> {
        self.config.validate()?;
        let on_open = self.on_open.ok_or_else(|| Self::missing("on_open"))?;
        let on_close = self.on_close.ok_or_else(|| Self::missing("on_close"))?;
        let on_error = self.on_error.ok_or_else(|| Self::missing("on_error"))?;

        let dialer: Box<dyn Dial> = match self.dialer {
            Some(dialer) => dialer,
            #[cfg(feature = "transport-tcp")]
            None => Box::new(skiff_transport_tcp::TcpConnector::new()),
            #[cfg(not(feature = "transport-tcp"))]
            None => return Err(Self::missing("connector")),
        };

        let pipeline = self
            .middleware
            .then(endpoint(self.router, Arc::clone(&on_error)));
        let dispatch = Dispatch::new(Arc::clone(&self.protocol), Arc::clone(&on_error), pipeline)
            .on_message(self.on_message)
            .on_unknown(self.on_unknown)
            .ping_handler(self.ping)
            .pong_handler(self.pong);

        Ok(Client {
            inner: Arc::new(Inner {
                config: self.config,
                callbacks: Callbacks {
                    on_open,
                    on_close,
                    on_error,
                    on_success: self.on_success,
                    on_reconnecting: self.on_reconnecting,
                    heartbeat: self.heartbeat,
                },
                dispatch: Arc::new(dispatch),
                protocol: self.protocol,
                dialer,
                session: Mutex::new(None),
                state: Mutex::new(ConnectionState::Idle),
                running: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
            }),
        })
    }
}
