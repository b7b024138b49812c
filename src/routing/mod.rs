//! Request Routing
//!
//! - `handler`: The [`Handler`] trait and its boxed future type
//! - `router`: Segment trie with trailing-slash wildcards

pub mod handler;
pub mod router;

pub use handler::{Handler, HandlerFuture, HandlerResult};
pub use router::{RouteNode, Router};
