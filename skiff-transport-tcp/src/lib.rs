//! TCP Transport for Skiff
//!
//! Listener and dialer producing tokio TCP streams for the client and server.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]
#![doc(html_root_url = "https://docs.rs/skiff-transport-tcp/")]

pub mod tcp;

// Re-export TCP transport types
pub use tcp::{TcpConnector, TcpTransport};

/// Prelude module
pub mod prelude {
    pub use crate::tcp::{TcpConnector, TcpTransport};
    pub use skiff_core::transport::{Connector, Transport, TransportStream};
}
