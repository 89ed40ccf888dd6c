//! Prelude module with common imports

pub use crate::config::ServerConfig;
pub use crate::connection::ServerConnection;
pub use crate::http::{HttpStream, Router as HttpRoutes};
pub use crate::manager::{ConnectionManager, ManagerStats};
pub use crate::server::{Listener, Server, ServerBuilder, ServerHandle};

// Re-export core types
pub use skiff_core::prelude::*;
