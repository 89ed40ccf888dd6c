//! Method-aware router for the HTTP side of a server
//!
//! Every method gets its own trie, so a path resolves against the routes of
//! the requested method alone. Methods are upper-cased at registration and
//! lookup, so `"get"` and `"GET"` are the same route.

use super::params::Params;
use super::route::{Group, Hooks, Registry, Route, RouteBuilder, RouteHandler};
use super::statics::{StaticLookup, StaticMount};
use super::trie::{param_names, Trie};
use crate::error::Result;
use std::collections::BTreeMap;
use std::path::Path;

/// Routes HTTP requests by method and path
pub struct HttpRouter<C, S> {
    methods: BTreeMap<String, Trie<Route<C, S>>>,
    hooks: Hooks<C, S>,
    ignore_case: bool,
    statics: Option<StaticMount>,
}

impl<C, S> std::fmt::Debug for HttpRouter<C, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRouter")
            .field("routes", &self.methods.values().map(Trie::len).sum::<usize>())
            .field("hooks", &self.hooks)
            .field("ignore_case", &self.ignore_case)
            .field("statics", &self.statics)
            .finish()
    }
}

impl<C, S> Default for HttpRouter<C, S> {
    fn default() -> Self {
        Self {
            methods: BTreeMap::new(),
            hooks: Hooks::default(),
            ignore_case: false,
            statics: None,
        }
    }
}

macro_rules! method_helpers {
    ($($name:ident => $method:literal),* $(,)?) => {
        impl<C, S> HttpRouter<C, S>
        where
            C: Clone + Send + Sync + 'static,
            S: Clone + Send + Sync + 'static,
        {
            $(
                #[doc = concat!("Start a `", $method, "` route outside any group")]
                pub fn $name(&mut self, path: &str) -> RouteBuilder<'_, Self> {
                    self.route($method, path)
                }
            )*
        }

        impl<'r, C, S> RouteHandler<'r, HttpRouter<C, S>>
        where
            C: Clone + Send + Sync + 'static,
            S: Clone + Send + Sync + 'static,
        {
            $(
                #[doc = concat!("Start a `", $method, "` route relative to the group prefix")]
                pub fn $name(&mut self, path: &str) -> RouteBuilder<'_, HttpRouter<C, S>> {
                    self.route($method, path)
                }
            )*
        }
    };
}

method_helpers! {
    get => "GET",
    post => "POST",
    put => "PUT",
    patch => "PATCH",
    delete => "DELETE",
    head => "HEAD",
    options => "OPTIONS",
}

impl<C, S> HttpRouter<C, S>
where
    C: Clone + Send + Sync + 'static,
    S: Clone + Send + Sync + 'static,
{
    /// Create an empty router
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a router whose routes all carry `hooks`
    pub fn with_hooks(hooks: Hooks<C, S>) -> Self {
        Self {
            hooks,
            ..Self::default()
        }
    }

    /// Match paths case-insensitively. Set before registering routes.
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

    /// Serve files from `dir` under `prefix`.
    ///
    /// Fails unless `dir` is an existing directory. Requests for a directory
    /// get its `index.html`.
    pub fn set_static_path(&mut self, prefix: &str, dir: impl AsRef<Path>) -> Result<()> {
        let mount = StaticMount::new(prefix, dir)?;
        tracing::debug!(prefix = mount.prefix(), root = %mount.root().display(), "static path mounted");
        self.statics = Some(mount);
        Ok(())
    }

    /// The static mount, if any
    pub fn static_mount(&self) -> Option<&StaticMount> {
        self.statics.as_ref()
    }

    /// Map a request path onto the static mount
    pub async fn lookup_static(&self, path: &str) -> StaticLookup {
        match &self.statics {
            Some(mount) => mount.lookup(path).await,
            None => StaticLookup::Unmatched,
        }
    }

    /// Start a group of routes under `prefix`
    #[track_caller]
    pub fn group(&mut self, prefix: &str) -> Group<'_, Self> {
        Group::new(self, prefix)
    }

    /// Start a route outside any group
    pub fn route(&mut self, method: &str, path: &str) -> RouteBuilder<'_, Self> {
        RouteBuilder::new(
            self,
            method,
            path.to_string(),
            path.is_empty(),
            Vec::new(),
            Vec::new(),
        )
    }

    /// Find the route for `method` and `path` and its captured parameters
    pub fn resolve(&self, method: &str, path: &str) -> Option<(&Route<C, S>, Params)> {
        let found = self
            .methods
            .get(&method.to_uppercase())?
            .get(&self.format_path(path))?;
        let route = found.value;
        Some((route, Params::from_parts(route.keys.clone(), found.values)))
    }

    /// Methods registered for a concrete path
    pub fn allowed_methods(&self, path: &str) -> Vec<&str> {
        let path = self.format_path(path);
        self.methods
            .iter()
            .filter(|(_, trie)| trie.get(&path).is_some())
            .map(|(method, _)| method.as_str())
            .collect()
    }

    /// Every registered route
    pub fn routes(&self) -> Vec<&Route<C, S>> {
        self.methods.values().flat_map(|trie| trie.values()).collect()
    }
}

impl<C, S> Registry for HttpRouter<C, S>
where
    C: Clone + Send + Sync + 'static,
    S: Clone + Send + Sync + 'static,
{
    type Conn = C;
    type Stream = S;

    fn hooks(&self) -> &Hooks<C, S> {
        &self.hooks
    }

    fn register(&mut self, mut route: Route<C, S>) {
        route.method = route.method.to_uppercase();
        route.path = self.format_path(&route.path);
        route.keys = param_names(&route.path);

        let path = route.path.clone();
        let method = route.method.clone();
        let location = route.location;
        let trie = self.methods.entry(method.clone()).or_insert_with(Trie::new);
        if let Some(existing) = trie.insert(&path, route) {
            panic!(
                "duplicate route {method} {path}: registered at {} and {location}",
                existing.location
            );
        }
    }
}

impl<'r, C, S> RouteHandler<'r, HttpRouter<C, S>>
where
    C: Clone + Send + Sync + 'static,
    S: Clone + Send + Sync + 'static,
{
    /// Start a route for `method` at `path`, relative to the group prefix
    pub fn route(&mut self, method: &str, path: &str) -> RouteBuilder<'_, HttpRouter<C, S>> {
        self.route_with(method, path)
    }
}
