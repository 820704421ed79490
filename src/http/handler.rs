//! Request handler model.
//!
//! # Responsibilities
//! - Define the `Middleware` contract every pipeline entry implements
//! - Give handlers a stable identity (`Handler`) that survives install/list/remove
//! - Normalize single handlers and chains into one ordered chain
//! - Guard every invocation so panics and errors reach the error stage
//!
//! # Design Decisions
//! - Identity is `Arc` pointer equality, never structural equality
//! - Guarding happens at call time rather than by wrapping, so identity is untouched
//! - `Next` is a linked cursor: remaining chain elements first, then the pipeline

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use axum::body::Body;
use axum::response::{IntoResponse, Response};
use futures_util::FutureExt;

use crate::http::response::HandlerError;
use crate::routing::error::RouteError;
use crate::routing::pipeline::{self, PipelineLayer};

/// Request type flowing through the pipeline.
///
/// The body parameter defaults to `Body`; in expression position it is
/// inferred, so `Request::builder()` works as on `http::Request`.
pub type Request<T = Body> = axum::http::Request<T>;

/// Boxed, sendable future returned by middleware.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Outcome of one handler invocation.
pub type HandlerResult = Result<Response, HandlerError>;

/// A pipeline entry: receives the request and the continuation.
///
/// Terminal handlers ignore `next`; middleware calls `next.run(req)` to
/// continue with the rest of the chain and pipeline.
pub trait Middleware: Send + Sync + 'static {
    fn call(&self, req: Request, next: Next) -> BoxFuture<HandlerResult>;
}

impl<F, Fut> Middleware for F
where
    F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, req: Request, next: Next) -> BoxFuture<HandlerResult> {
        Box::pin(self(req, next))
    }
}

/// Shared reference to a middleware.
///
/// Cloning is cheap and keeps identity: two `Handler`s are equal only when
/// they point at the same middleware instance.
#[derive(Clone)]
pub struct Handler {
    inner: Arc<dyn Middleware>,
    name: Arc<str>,
}

impl Handler {
    /// Wrap any middleware.
    pub fn new<M: Middleware>(middleware: M) -> Self {
        Self {
            inner: Arc::new(middleware),
            name: Arc::from(std::any::type_name::<M>()),
        }
    }

    /// Middleware from an async closure taking the request and continuation.
    pub fn from_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self::new(f).named("middleware")
    }

    /// Terminal handler from an async closure taking only the request.
    pub fn endpoint<F, Fut, R>(f: F) -> Self
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
        R: IntoResponse,
    {
        Self::new(move |req: Request, _next: Next| {
            let fut = f(req);
            async move { fut.await.map(IntoResponse::into_response) }
        })
        .named("endpoint")
    }

    /// Replace the diagnostic name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Arc::from(name.into());
        self
    }

    /// Diagnostic name used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &Handler) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Invoke the middleware, converting panics into a `HandlerError`.
    pub(crate) fn invoke(&self, req: Request, next: Next) -> BoxFuture<HandlerResult> {
        let name = self.name.clone();
        match std::panic::catch_unwind(AssertUnwindSafe(|| self.inner.call(req, next))) {
            Ok(fut) => Box::pin(async move {
                match AssertUnwindSafe(fut).catch_unwind().await {
                    Ok(result) => result,
                    Err(payload) => Err(panic_error(&name, payload)),
                }
            }),
            Err(payload) => {
                let err = panic_error(&name, payload);
                Box::pin(async move { Err(err) })
            }
        }
    }
}

impl PartialEq for Handler {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Handler {}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handler").field(&self.name).finish()
    }
}

fn panic_error(name: &str, payload: Box<dyn Any + Send>) -> HandlerError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    tracing::error!(handler = %name, panic = %message, "Handler panicked");
    HandlerError::internal(format!("handler panicked: {}", message))
}

/// One handler or an ordered chain of handlers for a single route.
#[derive(Clone, Debug)]
pub enum HandlerSpec {
    Single(Handler),
    Chain(Vec<Handler>),
}

impl HandlerSpec {
    /// Canonical ordered chain. An empty chain is a configuration error.
    pub fn normalize(self, path: &str) -> Result<Vec<Handler>, RouteError> {
        let chain = match self {
            HandlerSpec::Single(handler) => vec![handler],
            HandlerSpec::Chain(handlers) => handlers,
        };
        if chain.is_empty() {
            return Err(RouteError::EmptyChain {
                path: path.to_string(),
            });
        }
        Ok(chain)
    }
}

impl From<Handler> for HandlerSpec {
    fn from(handler: Handler) -> Self {
        HandlerSpec::Single(handler)
    }
}

impl From<Vec<Handler>> for HandlerSpec {
    fn from(handlers: Vec<Handler>) -> Self {
        HandlerSpec::Chain(handlers)
    }
}

impl<const N: usize> From<[Handler; N]> for HandlerSpec {
    fn from(handlers: [Handler; N]) -> Self {
        HandlerSpec::Chain(handlers.into())
    }
}

/// Runs a route's chain, then hands over to whatever follows the route.
struct ChainHandler {
    handlers: Arc<[Handler]>,
}

impl Middleware for ChainHandler {
    fn call(&self, req: Request, next: Next) -> BoxFuture<HandlerResult> {
        Next::chain(self.handlers.clone(), next).run(req)
    }
}

/// Collapse a normalized chain into the single handler stored on a layer.
///
/// A one-element chain is stored as-is so the caller's handler identity is
/// the layer's identity.
pub(crate) fn into_layer_handler(mut chain: Vec<Handler>) -> Handler {
    if chain.len() == 1 {
        return chain.remove(0);
    }
    let name = format!(
        "chain[{}]",
        chain.iter().map(Handler::name).collect::<Vec<_>>().join(", ")
    );
    Handler::new(ChainHandler {
        handlers: chain.into(),
    })
    .named(name)
}

/// Continuation handed to each middleware.
#[derive(Clone)]
pub struct Next {
    cursor: Cursor,
}

#[derive(Clone)]
enum Cursor {
    Pipeline {
        layers: Arc<Vec<PipelineLayer>>,
        index: usize,
    },
    Chain {
        handlers: Arc<[Handler]>,
        index: usize,
        then: Box<Next>,
    },
    End,
}

impl Next {
    pub(crate) fn pipeline(layers: Arc<Vec<PipelineLayer>>, index: usize) -> Self {
        Self {
            cursor: Cursor::Pipeline { layers, index },
        }
    }

    pub(crate) fn chain(handlers: Arc<[Handler]>, then: Next) -> Self {
        Self {
            cursor: Cursor::Chain {
                handlers,
                index: 0,
                then: Box::new(then),
            },
        }
    }

    /// A continuation with nothing after it; running it yields the 404 fallback.
    pub fn end() -> Self {
        Self { cursor: Cursor::End }
    }

    /// Continue with the next matching handler.
    pub fn run(self, req: Request) -> BoxFuture<HandlerResult> {
        Box::pin(async move {
            let mut cursor = self.cursor;
            loop {
                match cursor {
                    Cursor::Chain {
                        handlers,
                        index,
                        then,
                    } => {
                        if let Some(handler) = handlers.get(index).cloned() {
                            let next = Next {
                                cursor: Cursor::Chain {
                                    handlers,
                                    index: index + 1,
                                    then,
                                },
                            };
                            return handler.invoke(req, next).await;
                        }
                        let then = *then;
                        cursor = then.cursor;
                    }
                    Cursor::Pipeline { layers, index } => {
                        return pipeline::resume(layers, index, req).await;
                    }
                    Cursor::End => return Ok(pipeline::not_found(&req)),
                }
            }
        })
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cursor {
            Cursor::Pipeline { index, .. } => write!(f, "Next::Pipeline({})", index),
            Cursor::Chain { index, .. } => write!(f, "Next::Chain({})", index),
            Cursor::End => write!(f, "Next::End"),
        }
    }
}
