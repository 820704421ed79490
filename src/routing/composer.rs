//! Route composition from nested specifications.
//!
//! # Responsibilities
//! - Accept a handler, a chain, or a nested `RouteNode`
//! - Resolve method keys and sub-path keys into (method, path, chain) triples
//! - Join base paths and sub-paths without duplicate separators
//! - Register the triples on the pipeline
//!
//! # Design Decisions
//! - All-or-nothing: the whole specification is validated and compiled
//!   before the first route is registered
//! - A bare handler (at the top or under a sub-path) means GET
//! - Keys keep their insertion order, so registration order is predictable

use std::fmt;

use crate::http::handler::{into_layer_handler, Handler, HandlerSpec};
use crate::routing::error::RouteError;
use crate::routing::matcher::{MethodFilter, PathPattern};
use crate::routing::pipeline::Pipeline;

use axum::http::Method;

/// Anything that can be composed at a path.
#[derive(Clone, Debug)]
pub enum RouteSpec {
    Single(Handler),
    Chain(Vec<Handler>),
    Node(RouteNode),
}

impl From<Handler> for RouteSpec {
    fn from(handler: Handler) -> Self {
        RouteSpec::Single(handler)
    }
}

impl From<Vec<Handler>> for RouteSpec {
    fn from(handlers: Vec<Handler>) -> Self {
        RouteSpec::Chain(handlers)
    }
}

impl<const N: usize> From<[Handler; N]> for RouteSpec {
    fn from(handlers: [Handler; N]) -> Self {
        RouteSpec::Chain(handlers.into())
    }
}

impl From<HandlerSpec> for RouteSpec {
    fn from(spec: HandlerSpec) -> Self {
        match spec {
            HandlerSpec::Single(handler) => RouteSpec::Single(handler),
            HandlerSpec::Chain(handlers) => RouteSpec::Chain(handlers),
        }
    }
}

impl From<RouteNode> for RouteSpec {
    fn from(node: RouteNode) -> Self {
        RouteSpec::Node(node)
    }
}

/// Nested route specification.
///
/// Keys are method tokens (`get`, `POST`, `all`, ...) or sub-paths starting
/// with `/`. Setting a key twice replaces the earlier value.
#[derive(Clone, Debug, Default)]
pub struct RouteNode {
    entries: Vec<(String, RouteSpec)>,
}

impl RouteNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind any key. Keys are validated when the node is composed.
    pub fn entry(mut self, key: impl Into<String>, value: impl Into<RouteSpec>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(existing) => existing.1 = value,
            None => self.entries.push((key, value)),
        }
        self
    }

    pub fn get(self, handlers: impl Into<HandlerSpec>) -> Self {
        self.entry("get", handlers.into())
    }

    pub fn post(self, handlers: impl Into<HandlerSpec>) -> Self {
        self.entry("post", handlers.into())
    }

    pub fn put(self, handlers: impl Into<HandlerSpec>) -> Self {
        self.entry("put", handlers.into())
    }

    pub fn delete(self, handlers: impl Into<HandlerSpec>) -> Self {
        self.entry("delete", handlers.into())
    }

    pub fn patch(self, handlers: impl Into<HandlerSpec>) -> Self {
        self.entry("patch", handlers.into())
    }

    pub fn all(self, handlers: impl Into<HandlerSpec>) -> Self {
        self.entry("all", handlers.into())
    }

    /// Bind a sub-path (e.g. `/:id`) to a handler, chain, or nested node.
    pub fn at(self, sub_path: impl Into<String>, value: impl Into<RouteSpec>) -> Self {
        self.entry(sub_path, value)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &RouteSpec)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A route registered by `compose`.
#[derive(Clone, Debug)]
pub struct RegisteredRoute {
    pub methods: MethodFilter,
    pub path: String,
    pub handler: Handler,
}

impl fmt::Display for RegisteredRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.methods, self.path)
    }
}

struct PlannedRoute {
    methods: MethodFilter,
    pattern: PathPattern,
    chain: Vec<Handler>,
}

/// Register every route described by `spec` under `base_path`.
///
/// Fails without registering anything if any part of the specification is
/// invalid.
pub fn compose(
    pipeline: &Pipeline,
    base_path: &str,
    spec: impl Into<RouteSpec>,
) -> Result<Vec<RegisteredRoute>, RouteError> {
    let mut planned = Vec::new();
    plan(base_path, spec.into(), &mut planned)?;

    let registered: Vec<RegisteredRoute> = planned
        .into_iter()
        .map(|p| {
            let handler = into_layer_handler(p.chain);
            let route = RegisteredRoute {
                methods: p.methods.clone(),
                path: p.pattern.as_str().to_string(),
                handler: handler.clone(),
            };
            pipeline.push_route(p.methods, p.pattern, handler);
            route
        })
        .collect();

    tracing::info!(base_path = %base_path, routes = registered.len(), "Routes composed");
    Ok(registered)
}

fn plan(base: &str, spec: RouteSpec, out: &mut Vec<PlannedRoute>) -> Result<(), RouteError> {
    match spec {
        RouteSpec::Single(handler) => plan_leaf(Method::GET.into(), base, HandlerSpec::Single(handler), out),
        RouteSpec::Chain(handlers) => plan_leaf(Method::GET.into(), base, HandlerSpec::Chain(handlers), out),
        RouteSpec::Node(node) => {
            for (key, value) in node.entries {
                if key.starts_with('/') {
                    let path = join_paths(base, &key);
                    plan(&path, value, out)?;
                    continue;
                }

                let methods: MethodFilter = key.parse().map_err(|_| RouteError::UnsupportedMethod {
                    key: key.clone(),
                    path: base.to_string(),
                })?;
                let handlers = match value {
                    RouteSpec::Single(handler) => HandlerSpec::Single(handler),
                    RouteSpec::Chain(handlers) => HandlerSpec::Chain(handlers),
                    RouteSpec::Node(_) => {
                        return Err(RouteError::InvalidHandler {
                            key,
                            path: base.to_string(),
                        })
                    }
                };
                plan_leaf(methods, base, handlers, out)?;
            }
            Ok(())
        }
    }
}

fn plan_leaf(
    methods: MethodFilter,
    path: &str,
    handlers: HandlerSpec,
    out: &mut Vec<PlannedRoute>,
) -> Result<(), RouteError> {
    let pattern = PathPattern::parse(path)?;
    let chain = handlers.normalize(pattern.as_str())?;
    out.push(PlannedRoute {
        methods,
        pattern,
        chain,
    });
    Ok(())
}

/// Join a base path and a sub-path with exactly one separator between them.
pub fn join_paths(base: &str, sub: &str) -> String {
    let base = if base.len() > 1 {
        base.trim_end_matches('/')
    } else {
        base
    };
    let sub = sub.trim_start_matches('/');
    if base.is_empty() || base == "/" {
        format!("/{}", sub)
    } else {
        format!("{}/{}", base, sub)
    }
}
