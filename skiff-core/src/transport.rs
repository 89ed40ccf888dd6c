//! Transport layer abstraction
//!
//! Peers speak over any byte stream that implements [`TransportStream`].
//! Listening and dialing sit behind [`Transport`] and [`Connector`] so the
//! server and client never name a concrete socket type.

use crate::error::Result;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};

/// A connected, bidirectional byte stream
pub trait TransportStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    /// Address of the remote end, if the stream has one
    fn remote_addr(&self) -> Option<SocketAddr>;

    /// Address of the local end, if the stream has one
    fn local_addr(&self) -> Option<SocketAddr>;
}

impl TransportStream for tokio::net::TcpStream {
    fn remote_addr(&self) -> Option<SocketAddr> {
        self.peer_addr().ok()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        tokio::net::TcpStream::local_addr(self).ok()
    }
}

impl TransportStream for tokio::io::DuplexStream {
    fn remote_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }
}

/// Accepts inbound streams
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// The stream type produced by this transport
    type Stream: TransportStream;

    /// Accept an incoming connection
    async fn accept(&self) -> Result<(Self::Stream, SocketAddr)>;

    /// Get the local address
    fn local_addr(&self) -> Result<SocketAddr>;
}

/// Opens outbound streams
#[async_trait::async_trait]
pub trait Connector: Send + Sync + 'static {
    /// The stream type produced by this connector
    type Stream: TransportStream;

    /// Dial `addr` (a `host:port` string)
    async fn connect(&self, addr: &str) -> Result<Self::Stream>;
}
