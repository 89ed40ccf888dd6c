//! Onion middleware around packet dispatch
//!
//! A [`Middleware`] receives the next step of the pipeline and returns a new
//! step wrapping it. Middleware registered first ends up outermost, so it
//! sees each packet first and gets control back last. A layer that never
//! calls `next` ends the pipeline for that packet.

use futures_util::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

/// One step of the dispatch pipeline
pub type Next<C, S> = Arc<dyn Fn(C, S) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wraps a step of the pipeline
pub type Middleware<C, S> = Arc<dyn Fn(Next<C, S>) -> Next<C, S> + Send + Sync>;

/// Build a pipeline step from an async function
pub fn next_fn<C, S, F, Fut>(f: F) -> Next<C, S>
where
    C: 'static,
    S: 'static,
    F: Fn(C, S) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |conn: C, stream: S| -> BoxFuture<'static, ()> { Box::pin(f(conn, stream)) })
}

/// Build a middleware from an async function taking the next step.
///
/// ```
/// use skiff_core::middleware::{from_fn, Next};
///
/// let logger = from_fn(|next: Next<u32, String>, conn: u32, stream: String| async move {
///     tracing::debug!(conn, %stream, "packet in");
///     next(conn, stream).await;
/// });
/// # let _ = logger;
/// ```
pub fn from_fn<C, S, F, Fut>(f: F) -> Middleware<C, S>
where
    C: 'static,
    S: 'static,
    F: Fn(Next<C, S>, C, S) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let f = Arc::new(f);
    Arc::new(move |next: Next<C, S>| -> Next<C, S> {
        let f = Arc::clone(&f);
        Arc::new(move |conn: C, stream: S| -> BoxFuture<'static, ()> {
            Box::pin(f(Arc::clone(&next), conn, stream))
        })
    })
}

/// Ordered middleware list
pub struct Chain<C, S> {
    layers: Vec<Middleware<C, S>>,
}

impl<C, S> Clone for Chain<C, S> {
    fn clone(&self) -> Self {
        Self {
            layers: self.layers.clone(),
        }
    }
}

impl<C, S> Default for Chain<C, S> {
    fn default() -> Self {
        Self { layers: Vec::new() }
    }
}

impl<C, S> std::fmt::Debug for Chain<C, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("layers", &self.layers.len())
            .finish()
    }
}

impl<C, S> Chain<C, S> {
    /// Create an empty chain
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a layer inside the ones already registered
    pub fn push(&mut self, layer: Middleware<C, S>) {
        self.layers.push(layer);
    }

    /// Number of layers
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Whether no layer is registered
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Wrap `terminal` in every layer, first registered outermost
    pub fn then(&self, terminal: Next<C, S>) -> Next<C, S> {
        self.layers
            .iter()
            .rev()
            .fold(terminal, |next, layer| layer(next))
    }
}
