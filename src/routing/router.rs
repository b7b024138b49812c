//! Path Trie
//!
//! Routes are stored in a trie keyed by `/`-separated segments:
//!
//! ```text
//!   register("/")             -> root (wildcard)
//!   register("/static/")      -> root -> "static" (wildcard)
//!   register("/api/users")    -> root -> "api" -> "users"
//!
//!              (root)*
//!              /     \
//!         static*    api
//!                      \
//!                      users
//! ```
//!
//! A pattern ending in `/` marks its terminal node as a wildcard: the node
//! also answers for any deeper path that has no more specific route.
//!
//! Resolution walks the request segments from the root. When a segment has no
//! matching child, the walk stops and only the node reached so far is
//! consulted: if it is a wildcard, its handler wins, otherwise nothing
//! matches. Wildcard ancestors further up the walk are not revisited.

use crate::routing::handler::Handler;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// One segment of a registered path.
#[derive(Default)]
pub struct RouteNode {
    segment: String,
    children: HashMap<String, RouteNode>,
    wildcard: bool,
    handler: Option<Arc<dyn Handler>>,
}

impl RouteNode {
    fn named(segment: &str) -> Self {
        Self {
            segment: segment.to_string(),
            ..Self::default()
        }
    }

    pub fn segment(&self) -> &str {
        &self.segment
    }

    pub fn is_wildcard(&self) -> bool {
        self.wildcard
    }

    pub fn has_handler(&self) -> bool {
        self.handler.is_some()
    }
}

impl fmt::Debug for RouteNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteNode")
            .field("segment", &self.segment)
            .field("wildcard", &self.wildcard)
            .field("has_handler", &self.handler.is_some())
            .field("children", &self.children.values().collect::<Vec<_>>())
            .finish()
    }
}

/// Maps request paths to handlers.
#[derive(Debug, Default)]
pub struct Router {
    root: RouteNode,
    routes: usize,
}

/// Splits a path into its segments, reporting whether it ended in `/`.
fn split_path(path: &str) -> (Vec<&str>, bool) {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    if trimmed.is_empty() {
        return (Vec::new(), true);
    }
    let trailing = trimmed.ends_with('/');
    let body = trimmed.strip_suffix('/').unwrap_or(trimmed);
    (body.split('/').collect(), trailing)
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `handler` to `pattern`, replacing any handler already there.
    ///
    /// # Arguments
    ///
    /// * `pattern` - Slash-separated path; a trailing `/` makes it a wildcard
    /// * `handler` - The callback to run for matching requests
    pub fn register(&mut self, pattern: &str, handler: Arc<dyn Handler>) {
        let (segments, wildcard) = split_path(pattern);
        let mut node = &mut self.root;
        for segment in segments {
            node = node
                .children
                .entry(segment.to_string())
                .or_insert_with(|| RouteNode::named(segment));
        }
        if node.handler.is_none() {
            self.routes += 1;
        }
        node.wildcard = wildcard;
        node.handler = Some(handler);
    }

    /// Finds the handler responsible for `path`.
    ///
    /// A trailing `/` on the request path is ignored.
    pub fn resolve(&self, path: &str) -> Option<&Arc<dyn Handler>> {
        if path == "/" {
            return self.root.handler.as_ref();
        }
        let (segments, _) = split_path(path);
        let mut node = &self.root;
        for segment in segments {
            match node.children.get(segment) {
                Some(child) => node = child,
                None if node.wildcard => return node.handler.as_ref(),
                None => return None,
            }
        }
        node.handler.as_ref()
    }

    /// Number of distinct patterns with a handler.
    pub fn len(&self) -> usize {
        self.routes
    }

    pub fn is_empty(&self) -> bool {
        self.routes == 0
    }

    pub fn root(&self) -> &RouteNode {
        &self.root
    }
}
