//! Routing: the path trie, route records with hooks, and the two routers
//! built on them.

mod http;
mod params;
mod route;
mod socket;
mod statics;
mod trie;

pub use self::http::HttpRouter;
pub use params::Params;
pub use route::{handler_fn, Group, HandlerFn, Hooks, Registry, Route, RouteBuilder, RouteHandler};
pub use socket::{SocketRouter, EVENT_METHOD};
pub use statics::{StaticLookup, StaticMount, DEFAULT_INDEX};
pub use trie::{param_names, Match, Trie};
