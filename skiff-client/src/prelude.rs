//! Prelude module for Skiff Client

pub use crate::client::{Client, ClientBuilder, ConnectionState};
pub use crate::config::ClientConfig;
pub use skiff_core::prelude::*;
