//! Skiff Client
//!
//! Reconnecting packet client over WebSocket with heartbeats, a pong
//! watchdog, middleware and event routing.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use skiff_client::prelude::*;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//!     let mut router = SocketRouter::new();
//!     router.route("/chat/reply").handler(|_client: Client, stream: SocketStream| async move {
//!         println!("reply: {:?}", stream.payload());
//!         Ok(())
//!     });
//!
//!     let client = Client::builder("127.0.0.1:8080")
//!         .configure(|c| c.heartbeat_interval(Duration::from_secs(15)))
//!         .on_open(|_| println!("open"))
//!         .on_close(|_| println!("closed"))
//!         .on_error(|e| eprintln!("error: {e}"))
//!         .router(router)
//!         .build()?;
//!
//!     let running = client.start();
//!     client.emit(1, "/chat/say", "hello").await.ok();
//!     running.await??;
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]
#![doc(html_root_url = "https://docs.rs/skiff-client/")]

// Public modules
pub mod client;
pub mod config;

mod connection;

// Prelude module
pub mod prelude;

// Re-export key types for convenience
pub use client::{Client, ClientBuilder, ConnectionState};
pub use config::ClientConfig;
