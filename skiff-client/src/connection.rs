//! Dialing and the opening handshake

use crate::config::ClientConfig;
use futures_util::future::BoxFuture;
use skiff_core::error::TimeoutError;
use skiff_core::handshake::client_handshake;
use skiff_core::socket::{split, MessageReader};
use skiff_core::transport::{Connector, TransportStream};
use skiff_core::{Peer, Protocol, Result, Role};
use std::sync::Arc;

/// An upgraded connection ready to be driven
pub(crate) struct Opened {
    pub(crate) reader: MessageReader,
    pub(crate) peer: Arc<Peer>,
}

/// Object-safe view of a [`Connector`] that also runs the handshake
pub(crate) trait Dial: Send + Sync + 'static {
    fn open<'a>(
        &'a self,
        config: &'a ClientConfig,
        protocol: Arc<dyn Protocol>,
    ) -> BoxFuture<'a, Result<Opened>>;
}

impl<T: Connector> Dial for T {
    fn open<'a>(
        &'a self,
        config: &'a ClientConfig,
        protocol: Arc<dyn Protocol>,
    ) -> BoxFuture<'a, Result<Opened>> {
        Box::pin(async move {
            let mut stream = self.connect(&config.addr).await?;
            let remote_addr = stream.remote_addr();
            let local_addr = stream.local_addr();

            let leftover = client_handshake(&mut stream, &config.addr, &config.path).await?;
            let (reader, writer) = split(stream, Role::Client, config.socket(), leftover);
            Ok(Opened {
                reader,
                peer: Arc::new(Peer::new(writer, protocol, remote_addr, local_addr)),
            })
        })
    }
}

/// Dial and upgrade within the configured handshake timeout
pub(crate) async fn open(
    dialer: &dyn Dial,
    config: &ClientConfig,
    protocol: Arc<dyn Protocol>,
) -> Result<Opened> {
    let timeout = config.handshake_timeout;
    match tokio::time::timeout(timeout, dialer.open(config, protocol)).await {
        Ok(opened) => opened,
        Err(_) => Err(TimeoutError::Handshake { timeout }.into()),
    }
}
