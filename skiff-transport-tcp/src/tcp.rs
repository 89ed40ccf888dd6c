//! TCP listener and dialer

use async_trait::async_trait;
use skiff_core::transport::{Connector, Transport};
use skiff_core::Result;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};

/// Accepts TCP connections
#[derive(Debug)]
pub struct TcpTransport {
    listener: TcpListener,
    local_addr: SocketAddr,
    nodelay: bool,
}

impl TcpTransport {
    /// Bind a listener to `addr`
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::debug!(%local_addr, "tcp listener bound");

        Ok(Self {
            listener,
            local_addr,
            nodelay: true,
        })
    }

    /// Set `TCP_NODELAY` on accepted streams (on by default)
    pub fn nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }
}

#[async_trait]
impl Transport for TcpTransport {
    type Stream = TcpStream;

    async fn accept(&self) -> Result<(TcpStream, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await?;
        if let Err(e) = stream.set_nodelay(self.nodelay) {
            tracing::trace!(error = %e, %addr, "set_nodelay failed");
        }
        Ok((stream, addr))
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.local_addr)
    }
}

/// Dials TCP connections
#[derive(Debug, Clone, Copy)]
pub struct TcpConnector {
    nodelay: bool,
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self { nodelay: true }
    }
}

impl TcpConnector {
    /// Create a dialer with `TCP_NODELAY` enabled
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `TCP_NODELAY` on dialed streams
    pub fn nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }
}

#[async_trait]
impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self, addr: &str) -> Result<TcpStream> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(self.nodelay)?;
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skiff_core::transport::TransportStream;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_accept_and_connect() {
        let transport = TcpTransport::bind("127.0.0.1:0").await.unwrap();
        let addr = transport.local_addr().unwrap();

        let dial = tokio::spawn(async move {
            let mut stream = TcpConnector::new().connect(&addr.to_string()).await.unwrap();
            stream.write_all(b"hi").await.unwrap();
            stream
        });

        let (mut accepted, from) = transport.accept().await.unwrap();
        let mut buf = [0u8; 2];
        accepted.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");

        let dialed = dial.await.unwrap();
        assert_eq!(TransportStream::local_addr(&dialed), Some(from));
        assert_eq!(TransportStream::remote_addr(&dialed), Some(addr));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let transport = TcpTransport::bind("127.0.0.1:0").await.unwrap();
        let addr = transport.local_addr().unwrap();
        drop(transport);

        tokio_test::assert_err!(TcpConnector::new().connect(&addr.to_string()).await);
    }
}
