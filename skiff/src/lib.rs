//! # Skiff
//!
//! Routed binary packets over WebSocket, for both ends of the wire.
//!
//! Every message is a small binary packet carrying a kind, a request id,
//! an event name and a payload. Events are routed through a path trie with
//! `:param` segments, wrapped by before/after hooks and an onion middleware
//! chain. Connections keep themselves alive with heartbeats and a pong
//! watchdog; clients reconnect on their own.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use skiff::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//!     let mut router = SocketRouter::new();
//!     router.route("/echo/:name").handler(|conn: ServerConnection, stream: SocketStream| async move {
//!         let name = stream.param("name").unwrap_or("anon").to_string();
//!         conn.emit(stream.id(), &format!("/echo/{name}"), stream.payload()).await
//!     });
//!
//!     Server::builder()
//!         .bind("127.0.0.1:8080")
//!         .router(router)
//!         .build()?
//!         .serve()
//!         .await?;
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]
#![doc(html_root_url = "https://docs.rs/skiff/")]

// Re-export core components
pub use skiff_core::*;

#[cfg(feature = "transport-tcp")]
pub use skiff_transport_tcp as transport_tcp;

#[cfg(feature = "server")]
pub use skiff_server as server;

#[cfg(feature = "client")]
pub use skiff_client as client;

/// Prelude module with common imports
pub mod prelude {
    pub use skiff_core::prelude::*;

    #[cfg(feature = "server")]
    pub use skiff_server::prelude::*;

    #[cfg(feature = "client")]
    pub use skiff_client::prelude::*;

    #[cfg(feature = "transport-tcp")]
    pub use skiff_transport_tcp::prelude::*;
}
