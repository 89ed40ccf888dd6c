//! Event router for socket peers

use super::params::Params;
use super::route::{Group, Hooks, Registry, Route, RouteBuilder, RouteHandler};
use super::trie::{param_names, Trie};
use crate::stream::SocketStream;

/// Method recorded on socket routes, which are matched by event only
pub const EVENT_METHOD: &str = "EVENT";

/// Routes packet events to handlers
pub struct SocketRouter<C> {
    trie: Trie<Route<C, SocketStream>>,
    hooks: Hooks<C, SocketStream>,
    ignore_case: bool,
}

impl<C> std::fmt::Debug for SocketRouter<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketRouter")
            .field("routes", &self.trie.len())
            .field("hooks", &self.hooks)
            .field("ignore_case", &self.ignore_case)
            .finish()
    }
}

impl<C> Default for SocketRouter<C> {
    fn default() -> Self {
        Self {
            trie: Trie::new(),
            hooks: Hooks::default(),
            ignore_case: false,
        }
    }
}

impl<C: Clone + Send + Sync + 'static> SocketRouter<C> {
    /// Create an empty router
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a router whose routes all carry `hooks`
    pub fn with_hooks(hooks: Hooks<C, SocketStream>) -> Self {
        Self {
            hooks,
            ..Self::default()
        }
    }

    /// Match events case-insensitively. Set before registering routes.
    pub fn ignore_case(mut self, ignore_case: bool) -> Self {
        self.ignore_case = ignore_case;
        self
    }

    fn format_path(&self, path: &str) -> String {
        if self.ignore_case {
            path.to_lowercase()
        } else {
            path.to_string()
        }
    }

    /// Start a group of routes under `prefix`
    #[track_caller]
    pub fn group(&mut self, prefix: &str) -> Group<'_, Self> {
        Group::new(self, prefix)
    }

    /// Start a route outside any group
    pub fn route(&mut self, event: &str) -> RouteBuilder<'_, Self> {
        RouteBuilder::new(
            self,
            EVENT_METHOD,
            event.to_string(),
            event.is_empty(),
            Vec::new(),
            Vec::new(),
        )
    }

    /// Find the route for `event` and its captured parameters
    pub fn resolve(&self, event: &str) -> Option<(&Route<C, SocketStream>, Params)> {
        let found = self.trie.get(&self.format_path(event))?;
        let params = Params::from_parts(found.keys.to_vec(), found.values);
        Some((found.value, params))
    }

    /// Every registered route
    pub fn routes(&self) -> Vec<&Route<C, SocketStream>> {
        self.trie.values()
    }

    /// Number of registered routes
    pub fn len(&self) -> usize {
        self.trie.len()
    }

    /// Whether no route is registered
    pub fn is_empty(&self) -> bool {
        self.trie.is_empty()
    }
}

impl<C: Clone + Send + Sync + 'static> Registry for SocketRouter<C> {
    type Conn = C;
    type Stream = SocketStream;

    fn hooks(&self) -> &Hooks<C, SocketStream> {
        &self.hooks
    }

    fn register(&mut self, mut route: Route<C, SocketStream>) {
        route.path = self.format_path(&route.path);
        route.keys = param_names(&route.path);
        let path = route.path.clone();
        let location = route.location;
        if let Some(existing) = self.trie.insert(&path, route) {
            panic!(
                "duplicate route {path}: registered at {} and {location}",
                existing.location
            );
        }
    }
}

impl<'r, C: Clone + Send + Sync + 'static> RouteHandler<'r, SocketRouter<C>> {
    /// Start a route for `event`, relative to the group prefix
    pub fn route(&mut self, event: &str) -> RouteBuilder<'_, SocketRouter<C>> {
        self.route_with(EVENT_METHOD, event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Packet;
    use crate::Error;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<String>>>;

    fn push(log: &Log, entry: &str) {
        log.lock().unwrap().push(entry.to_string());
    }

    fn stream(event: &str) -> SocketStream {
        SocketStream::new(Packet::new(1, event, &b""[..]))
    }

    async fn dispatch(router: &SocketRouter<Log>, log: &Log, event: &str) -> crate::Result<()> {
        let (route, params) = router.resolve(event).ok_or_else(|| Error::other("404"))?;
        route.run(log.clone(), stream(event).with_params(params)).await
    }

    #[tokio::test]
    async fn test_hook_order_with_group_and_globals() {
        let hooks = Hooks::new()
            .before(|log: Log, _s: SocketStream| async move {
                push(&log, "global before");
                Ok(())
            })
            .after(|log: Log, _s: SocketStream| async move {
                push(&log, "global after");
                Ok(())
            });
        let mut router = SocketRouter::with_hooks(hooks);

        router
            .group("/chat")
            .before(|log: Log, _s: SocketStream| async move {
                push(&log, "group before");
                Ok(())
            })
            .handler(|h| {
                h.route("/join")
                    .before(|log: Log, _s: SocketStream| async move {
                        push(&log, "route before");
                        Ok(())
                    })
                    .handler(|log: Log, _s: SocketStream| async move {
                        push(&log, "handler");
                        Ok(())
                    });
                h.route("/pass")
                    .pass_before()
                    .handler(|log: Log, _s: SocketStream| async move {
                        push(&log, "handler");
                        Ok(())
                    });
                h.route("/force")
                    .force_before()
                    .force_after()
                    .handler(|log: Log, _s: SocketStream| async move {
                        push(&log, "handler");
                        Ok(())
                    });
            });

        let log: Log = Arc::default();
        dispatch(&router, &log, "/chat/join").await.unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec!["group before", "route before", "global before", "handler", "global after"]
        );

        let log: Log = Arc::default();
        dispatch(&router, &log, "/chat/pass").await.unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec!["global before", "handler", "global after"]
        );

        let log: Log = Arc::default();
        dispatch(&router, &log, "/chat/force").await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["handler"]);
    }

    #[tokio::test]
    async fn test_before_error_short_circuits() {
        let mut router = SocketRouter::new();
        router
            .route("/secure")
            .before(|_log: Log, _s: SocketStream| async move { Err(Error::other("denied")) })
            .after(|log: Log, _s: SocketStream| async move {
                push(&log, "after");
                Ok(())
            })
            .handler(|log: Log, _s: SocketStream| async move {
                push(&log, "handler");
                Ok(())
            });

        let log: Log = Arc::default();
        assert!(dispatch(&router, &log, "/secure").await.is_err());
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_params_reach_handler() {
        let mut router = SocketRouter::new();
        router
            .route("/room/:room/say")
            .handler(|log: Log, s: SocketStream| async move {
                push(&log, s.param("room").unwrap_or("?"));
                Ok(())
            });

        let log: Log = Arc::default();
        dispatch(&router, &log, "/room/lobby/say").await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["lobby"]);
    }

    #[test]
    fn test_ignore_case() {
        let mut router: SocketRouter<Log> = SocketRouter::new().ignore_case(true);
        router
            .route("/Chat/Send")
            .handler(|_log: Log, _s: SocketStream| async move { Ok(()) });

        assert!(router.resolve("/CHAT/send").is_some());
        assert_eq!(router.routes()[0].path(), "/chat/send");
    }

    #[test]
    fn test_case_sensitive_by_default() {
        let mut router: SocketRouter<Log> = SocketRouter::new();
        router
            .route("/Chat")
            .handler(|_log: Log, _s: SocketStream| async move { Ok(()) });
        assert!(router.resolve("/chat").is_none());
        assert!(router.resolve("/Chat").is_some());
    }

    #[test]
    fn test_routes_introspection() {
        let mut router: SocketRouter<Log> = SocketRouter::new();
        router
            .route("/a/:id")
            .handler(|_log: Log, _s: SocketStream| async move { Ok(()) });
        let routes = router.routes();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].method(), EVENT_METHOD);
        assert_eq!(routes[0].param_names(), ["id".to_string()]);
        assert!(routes[0].location().file().ends_with("socket.rs"));
    }

    #[test]
    #[should_panic(expected = "duplicate route")]
    fn test_duplicate_route_panics() {
        let mut router: SocketRouter<Log> = SocketRouter::new();
        router
            .route("/a")
            .handler(|_log: Log, _s: SocketStream| async move { Ok(()) });
        router
            .route("/a/")
            .handler(|_log: Log, _s: SocketStream| async move { Ok(()) });
    }

    #[test]
    #[should_panic(expected = "can not be empty")]
    fn test_empty_route_panics() {
        let mut router: SocketRouter<Log> = SocketRouter::new();
        router
            .route("")
            .handler(|_log: Log, _s: SocketStream| async move { Ok(()) });
    }

    #[test]
    #[should_panic(expected = "group path can not be empty")]
    fn test_empty_group_panics() {
        let mut router: SocketRouter<Log> = SocketRouter::new();
        router.group("").handler(|_h| {});
    }
}
