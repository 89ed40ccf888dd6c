//! Per-packet request state handed to socket handlers

use crate::codec::Packet;
use crate::router::Params;
use bytes::Bytes;
use std::sync::{Arc, Mutex, MutexGuard};

/// Typed values shared by the hooks and handler of one request.
///
/// Clones share storage, so a `before` hook can leave something for the
/// handler to pick up.
#[derive(Debug, Clone, Default)]
pub struct Context {
    inner: Arc<Mutex<http::Extensions>>,
}

impl Context {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, http::Extensions> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Store a value, returning the previous value of the same type
    pub fn insert<T: Clone + Send + Sync + 'static>(&self, value: T) -> Option<T> {
        self.lock().insert(value)
    }

    /// A copy of the stored value of type `T`
    pub fn get<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.lock().get::<T>().cloned()
    }

    /// Remove and return the stored value of type `T`
    pub fn remove<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.lock().remove::<T>()
    }

    /// Whether a value of type `T` is stored
    pub fn contains<T: Clone + Send + Sync + 'static>(&self) -> bool {
        self.lock().get::<T>().is_some()
    }
}

/// A routed packet with its captured parameters
#[derive(Debug, Clone)]
pub struct SocketStream {
    packet: Packet,
    params: Params,
    context: Context,
}

impl SocketStream {
    /// Wrap a decoded packet
    pub fn new(packet: Packet) -> Self {
        Self {
            packet,
            params: Params::new(),
            context: Context::new(),
        }
    }

    /// Replace the captured parameters
    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// The decoded packet
    pub fn packet(&self) -> &Packet {
        &self.packet
    }

    /// Event name the packet was routed by
    pub fn event(&self) -> &str {
        &self.packet.event
    }

    /// Request correlation id
    pub fn id(&self) -> u64 {
        self.packet.id
    }

    /// Packet payload
    pub fn payload(&self) -> &Bytes {
        &self.packet.payload
    }

    /// All captured parameters
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// One captured parameter
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    /// Shared per-request values
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Deserialize the payload as JSON
    #[cfg(feature = "json")]
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> crate::Result<T> {
        Ok(serde_json::from_slice(&self.packet.payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct User(u32);

    #[test]
    fn test_context_is_shared_between_clones() {
        let stream = SocketStream::new(Packet::new(1, "/a", &b"x"[..]));
        let copy = stream.clone();
        copy.context().insert(User(7));

        assert_eq!(stream.context().get::<User>(), Some(User(7)));
        assert!(stream.context().contains::<User>());
        assert_eq!(stream.context().remove::<User>(), Some(User(7)));
        assert!(!copy.context().contains::<User>());
    }

    #[test]
    fn test_accessors() {
        let stream = SocketStream::new(Packet::new(9, "/room/1", &b"hi"[..])).with_params(
            Params::from_parts(vec!["id".into()], vec!["1".into()]),
        );
        assert_eq!(stream.event(), "/room/1");
        assert_eq!(stream.id(), 9);
        assert_eq!(&stream.payload()[..], b"hi");
        assert_eq!(stream.param("id"), Some("1"));
    }
}
