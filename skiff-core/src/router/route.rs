//! Route records and the group/route builders shared by both routers
//!
//! Registration is a chain of builders:
//!
//! ```text
//! router.group("/chat").before(auth).handler(|h| {
//!     h.route("/join").after(audit).handler(join);
//!     h.route("/leave").pass_before().handler(leave);
//! });
//! ```
//!
//! Hooks are composed once, when `handler` is called, and frozen into the
//! [`Route`]. Composition for each side (before and after) is:
//!
//! * default: group hooks, then route hooks, then router-wide hooks
//! * `pass_*`: route hooks, then router-wide hooks
//! * `force_*`: route hooks only

use crate::error::Result;
use futures_util::future::BoxFuture;
use std::future::Future;
use std::panic::Location;
use std::sync::Arc;

/// A handler or hook: receives the connection and the request stream
pub type HandlerFn<C, S> = Arc<dyn Fn(C, S) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Box an async function as a [`HandlerFn`]
pub fn handler_fn<C, S, F, Fut>(f: F) -> HandlerFn<C, S>
where
    C: 'static,
    S: 'static,
    F: Fn(C, S) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |conn: C, stream: S| -> BoxFuture<'static, Result<()>> {
        Box::pin(f(conn, stream))
    })
}

/// A registered route with its composed hooks
pub struct Route<C, S> {
    pub(crate) method: String,
    pub(crate) path: String,
    pub(crate) keys: Vec<String>,
    pub(crate) handler: HandlerFn<C, S>,
    pub(crate) before: Vec<HandlerFn<C, S>>,
    pub(crate) after: Vec<HandlerFn<C, S>>,
    pub(crate) location: &'static Location<'static>,
}

impl<C, S> std::fmt::Debug for Route<C, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("keys", &self.keys)
            .field("before", &self.before.len())
            .field("after", &self.after.len())
            .field("location", &format_args!("{}", self.location))
            .finish()
    }
}

impl<C, S> Route<C, S> {
    /// Upper-cased method, or the event marker for socket routes
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Normalized path pattern
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Parameter names of the pattern, in order
    pub fn param_names(&self) -> &[String] {
        &self.keys
    }

    /// Number of composed before hooks
    pub fn before_len(&self) -> usize {
        self.before.len()
    }

    /// Number of composed after hooks
    pub fn after_len(&self) -> usize {
        self.after.len()
    }

    /// Where in the source the route was registered
    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }
}

impl<C: Clone, S: Clone> Route<C, S> {
    /// Run before hooks, the handler, then after hooks.
    ///
    /// The first error stops the sequence and is returned.
    pub async fn run(&self, conn: C, stream: S) -> Result<()> {
        for hook in &self.before {
            hook(conn.clone(), stream.clone()).await?;
        }
        (self.handler)(conn.clone(), stream.clone()).await?;
        for hook in &self.after {
            hook(conn.clone(), stream.clone()).await?;
        }
        Ok(())
    }
}

/// Router-wide hooks appended to every route that does not force its own
pub struct Hooks<C, S> {
    pub(crate) before: Vec<HandlerFn<C, S>>,
    pub(crate) after: Vec<HandlerFn<C, S>>,
}

impl<C, S> Default for Hooks<C, S> {
    fn default() -> Self {
        Self {
            before: Vec::new(),
            after: Vec::new(),
        }
    }
}

impl<C, S> Clone for Hooks<C, S> {
    fn clone(&self) -> Self {
        Self {
            before: self.before.clone(),
            after: self.after.clone(),
        }
    }
}

impl<C, S> std::fmt::Debug for Hooks<C, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("before", &self.before.len())
            .field("after", &self.after.len())
            .finish()
    }
}

impl<C: 'static, S: 'static> Hooks<C, S> {
    /// Create an empty hook set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a hook run before every handler
    pub fn before<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(C, S) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.before.push(handler_fn(f));
        self
    }

    /// Add a hook run after every handler
    pub fn after<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(C, S) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.after.push(handler_fn(f));
        self
    }
}

/// A router that accepts composed routes
pub trait Registry {
    /// Connection type handed to handlers
    type Conn: Clone + Send + Sync + 'static;
    /// Request type handed to handlers
    type Stream: Clone + Send + Sync + 'static;

    /// Router-wide hooks
    fn hooks(&self) -> &Hooks<Self::Conn, Self::Stream>;

    /// Store a route. Implementations normalize `method` and `path` and
    /// panic on duplicates.
    fn register(&mut self, route: Route<Self::Conn, Self::Stream>);
}

type Hook<R> = HandlerFn<<R as Registry>::Conn, <R as Registry>::Stream>;

pub(crate) fn join_path(prefix: &str, path: &str) -> String {
    if prefix.is_empty() {
        return path.to_string();
    }
    format!(
        "{}/{}",
        prefix.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Hooks shared by the routes of a path prefix
pub struct Group<'r, R: Registry> {
    registry: &'r mut R,
    prefix: String,
    before: Vec<Hook<R>>,
    after: Vec<Hook<R>>,
}

impl<'r, R: Registry> std::fmt::Debug for Group<'r, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group")
            .field("prefix", &self.prefix)
            .field("before", &self.before.len())
            .field("after", &self.after.len())
            .finish()
    }
}

impl<'r, R: Registry> Group<'r, R> {
    /// Start a group. Panics if `prefix` is empty.
    #[track_caller]
    pub fn new(registry: &'r mut R, prefix: &str) -> Self {
        if prefix.is_empty() {
            panic!("group path can not be empty");
        }
        Self {
            registry,
            prefix: prefix.to_string(),
            before: Vec::new(),
            after: Vec::new(),
        }
    }

    /// Add a hook inherited by every route of the group
    pub fn before<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(R::Conn, R::Stream) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.before.push(handler_fn(f));
        self
    }

    /// Add an after hook inherited by every route of the group
    pub fn after<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(R::Conn, R::Stream) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.after.push(handler_fn(f));
        self
    }

    /// Register the group's routes
    pub fn handler(self, f: impl FnOnce(&mut RouteHandler<'_, R>)) {
        let mut routes = RouteHandler {
            registry: self.registry,
            prefix: self.prefix,
            before: self.before,
            after: self.after,
        };
        f(&mut routes);
    }
}

/// Registers routes under a group prefix
pub struct RouteHandler<'r, R: Registry> {
    registry: &'r mut R,
    prefix: String,
    before: Vec<Hook<R>>,
    after: Vec<Hook<R>>,
}

impl<'r, R: Registry> std::fmt::Debug for RouteHandler<'r, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteHandler")
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl<'r, R: Registry> RouteHandler<'r, R> {
    /// Start a route for `method` at `path`, relative to the group prefix
    pub fn route_with(&mut self, method: &str, path: &str) -> RouteBuilder<'_, R> {
        RouteBuilder::new(
            &mut *self.registry,
            method,
            join_path(&self.prefix, path),
            path.is_empty(),
            self.before.clone(),
            self.after.clone(),
        )
    }
}

/// Configures one route
pub struct RouteBuilder<'r, R: Registry> {
    registry: &'r mut R,
    method: String,
    path: String,
    empty_path: bool,
    inherited_before: Vec<Hook<R>>,
    inherited_after: Vec<Hook<R>>,
    before: Vec<Hook<R>>,
    after: Vec<Hook<R>>,
    pass_before: bool,
    force_before: bool,
    pass_after: bool,
    force_after: bool,
}

impl<'r, R: Registry> std::fmt::Debug for RouteBuilder<'r, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteBuilder")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("pass_before", &self.pass_before)
            .field("force_before", &self.force_before)
            .field("pass_after", &self.pass_after)
            .field("force_after", &self.force_after)
            .finish()
    }
}

fn compose<T: Clone>(inherited: Vec<T>, own: Vec<T>, global: &[T], pass: bool, force: bool) -> Vec<T> {
    if force {
        return own;
    }
    let mut hooks = if pass { Vec::new() } else { inherited };
    hooks.extend(own);
    hooks.extend_from_slice(global);
    hooks
}

impl<'r, R: Registry> RouteBuilder<'r, R> {
    pub(crate) fn new(
        registry: &'r mut R,
        method: &str,
        path: String,
        empty_path: bool,
        inherited_before: Vec<Hook<R>>,
        inherited_after: Vec<Hook<R>>,
    ) -> Self {
        Self {
            registry,
            method: method.to_string(),
            path,
            empty_path,
            inherited_before,
            inherited_after,
            before: Vec::new(),
            after: Vec::new(),
            pass_before: false,
            force_before: false,
            pass_after: false,
            force_after: false,
        }
    }

    /// Add a hook run before this route's handler
    pub fn before<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(R::Conn, R::Stream) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.before.push(handler_fn(f));
        self
    }

    /// Add a hook run after this route's handler
    pub fn after<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(R::Conn, R::Stream) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.after.push(handler_fn(f));
        self
    }

    /// Drop the group's before hooks for this route
    pub fn pass_before(mut self) -> Self {
        self.pass_before = true;
        self
    }

    /// Run only this route's own before hooks
    pub fn force_before(mut self) -> Self {
        self.force_before = true;
        self
    }

    /// Drop the group's after hooks for this route
    pub fn pass_after(mut self) -> Self {
        self.pass_after = true;
        self
    }

    /// Run only this route's own after hooks
    pub fn force_after(mut self) -> Self {
        self.force_after = true;
        self
    }

    /// Compose hooks and register the route.
    ///
    /// Panics if the path or method is empty, or if the route is already
    /// registered.
    #[track_caller]
    pub fn handler<F, Fut>(self, f: F)
    where
        F: Fn(R::Conn, R::Stream) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        if self.empty_path || self.path.is_empty() || self.method.is_empty() {
            panic!("route path or method can not be empty");
        }

        let hooks = self.registry.hooks();
        let before = compose(
            self.inherited_before,
            self.before,
            &hooks.before,
            self.pass_before,
            self.force_before,
        );
        let after = compose(
            self.inherited_after,
            self.after,
            &hooks.after,
            self.pass_after,
            self.force_after,
        );

        self.registry.register(Route {
            method: self.method,
            path: self.path,
            keys: Vec::new(),
            handler: handler_fn(f),
            before,
            after,
            location: Location::caller(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_default_order() {
        assert_eq!(compose(vec![1], vec![2], &[3], false, false), vec![1, 2, 3]);
    }

    #[test]
    fn test_compose_pass_drops_group_hooks() {
        assert_eq!(compose(vec![1], vec![2], &[3], true, false), vec![2, 3]);
    }

    #[test]
    fn test_compose_force_keeps_only_own() {
        assert_eq!(compose(vec![1], vec![2], &[3], false, true), vec![2]);
        assert_eq!(compose(vec![1], vec![2], &[3], true, true), vec![2]);
    }

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("", "/a"), "/a");
        assert_eq!(join_path("/chat/", "/join"), "/chat/join");
        assert_eq!(join_path("/chat", "join"), "/chat/join");
    }

    #[tokio::test]
    async fn test_run_stops_at_first_error() {
        use std::sync::{Arc, Mutex};
        type Log = Arc<Mutex<Vec<&'static str>>>;

        fn step(name: &'static str, fail: bool) -> HandlerFn<Log, ()> {
            handler_fn(move |log: Log, _: ()| async move {
                log.lock().unwrap().push(name);
                if fail {
                    Err(crate::Error::other(name))
                } else {
                    Ok(())
                }
            })
        }

        let route = Route {
            method: "GET".into(),
            path: "/x".into(),
            keys: Vec::new(),
            handler: step("handler", false),
            before: vec![step("b1", false), step("b2", true)],
            after: vec![step("a1", false)],
            location: Location::caller(),
        };

        let log: Log = Arc::default();
        assert!(route.run(log.clone(), ()).await.is_err());
        assert_eq!(*log.lock().unwrap(), vec!["b1", "b2"]);
    }
}
