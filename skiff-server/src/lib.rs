//! Skiff Server
//!
//! Packet server over WebSocket with event routing, middleware, heartbeats
//! and connection management, plus plain HTTP routes and static files on
//! the same listener.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use skiff_server::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//!     let mut router = SocketRouter::new();
//!     router.route("/chat/say").handler(|conn: ServerConnection, stream: SocketStream| async move {
//!         conn.emit(stream.id(), "/chat/reply", stream.payload()).await
//!     });
//!
//!     let mut http = HttpRoutes::new();
//!     http.get("/health").handler(|_server: ServerHandle, stream: HttpStream| async move {
//!         stream.end("ok");
//!         Ok(())
//!     });
//!
//!     let server = Server::builder()
//!         .bind("0.0.0.0:8080")
//!         .ws_path("/ws")
//!         .on_open(|conn| println!("peer {} connected", conn.id()))
//!         .router(router)
//!         .http_router(http)
//!         .build()?;
//!
//!     server.serve_with_graceful_shutdown(async {
//!         tokio::signal::ctrl_c().await.ok();
//!     })
//!     .await?;
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]
#![doc(html_root_url = "https://docs.rs/skiff-server/")]

// Public modules
pub mod config;
pub mod connection;
pub mod http;
pub mod logging;
pub mod manager;
pub mod server;

// Prelude module with common imports
pub mod prelude;

// Re-export key types for convenience
pub use config::ServerConfig;
pub use connection::ServerConnection;
pub use crate::http::{HttpRequest, HttpStream, Router as HttpRoutes};
pub use logging::init_logging;
pub use manager::{CloseReason, ConnectionManager, ManagerStats};
pub use server::{Listener, Server, ServerBuilder, ServerHandle};
