//! Health endpoint registrar.
//!
//! # Data Flow
//! ```text
//! register_health(options)
//!     → skip if a route already answers method+path (unless replace)
//!     → replace: drop only the registrar's own tracked route
//!     → install tracked route `health:<METHOD> <path>`
//!
//! Request:
//!     readiness check (optional)
//!     → ok:          200 { status: "OK", uptime, pid, env, timestamp }
//!     → not ok/err:  503 { status: "FAIL", ..., details }
//! ```
//!
//! # Design Decisions
//! - Liveness is implied by answering at all; readiness is the caller's check
//! - A readiness error is reported as 503, never as a pipeline error

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use axum::http::{Method, StatusCode};
use serde_json::{json, Map, Value};

use crate::http::handler::{BoxFuture, Handler};
use crate::http::response::{json_response, HandlerError};
use crate::middleware::registry::MiddlewareRegistry;
use crate::routing::error::RouteError;
use crate::routing::matcher::{normalize_path, MethodFilter};
use crate::routing::pipeline::{LayerId, Pipeline};

pub const DEFAULT_HEALTH_PATH: &str = "/health";

/// Environment variable reported as `env`.
pub const ENV_VAR: &str = "APP_ENV";

/// Outcome of a readiness check.
#[derive(Debug, Clone, PartialEq)]
pub struct Readiness {
    pub ok: bool,
    pub details: Option<Value>,
}

impl Readiness {
    pub fn ready() -> Self {
        Self {
            ok: true,
            details: None,
        }
    }

    pub fn not_ready() -> Self {
        Self {
            ok: false,
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl From<bool> for Readiness {
    fn from(ok: bool) -> Self {
        Self { ok, details: None }
    }
}

/// Asynchronous readiness predicate.
pub trait ReadinessCheck: Send + Sync + 'static {
    fn check(&self) -> BoxFuture<Result<Readiness, HandlerError>>;
}

impl<F, Fut> ReadinessCheck for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Readiness, HandlerError>> + Send + 'static,
{
    fn check(&self) -> BoxFuture<Result<Readiness, HandlerError>> {
        Box::pin(self())
    }
}

/// Fields included in the payload besides `status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthInclude {
    pub uptime: bool,
    pub pid: bool,
    pub env: bool,
    pub timestamp: bool,
}

impl Default for HealthInclude {
    fn default() -> Self {
        Self {
            uptime: true,
            pid: true,
            env: true,
            timestamp: true,
        }
    }
}

#[derive(Clone)]
pub struct HealthOptions {
    path: String,
    method: Method,
    replace: bool,
    readiness: Option<Arc<dyn ReadinessCheck>>,
    include: HealthInclude,
}

impl Default for HealthOptions {
    fn default() -> Self {
        Self {
            path: DEFAULT_HEALTH_PATH.to_string(),
            method: Method::GET,
            replace: false,
            readiness: None,
            include: HealthInclude::default(),
        }
    }
}

impl HealthOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Replace a health route this registrar installed earlier.
    pub fn replace(mut self, replace: bool) -> Self {
        self.replace = replace;
        self
    }

    pub fn readiness<C: ReadinessCheck>(mut self, check: C) -> Self {
        self.readiness = Some(Arc::new(check));
        self
    }

    pub fn include(mut self, include: HealthInclude) -> Self {
        self.include = include;
        self
    }
}

impl From<&str> for HealthOptions {
    fn from(path: &str) -> Self {
        Self::default().path(path)
    }
}

impl fmt::Debug for HealthOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthOptions")
            .field("path", &self.path)
            .field("method", &self.method)
            .field("replace", &self.replace)
            .field("readiness", &self.readiness.is_some())
            .field("include", &self.include)
            .finish()
    }
}

/// Registry key of a health route.
pub fn health_key(method: &Method, path: &str) -> String {
    format!("health:{} {}", method, path)
}

/// Register a health endpoint.
///
/// Returns `Ok(None)` when a route already answers the same method and path
/// and `replace` is off.
pub fn register_health(
    pipeline: &Pipeline,
    registry: &mut MiddlewareRegistry,
    started_at: Instant,
    options: impl Into<HealthOptions>,
) -> Result<Option<Handler>, RouteError> {
    let options = options.into();
    let path = normalize_path(&options.path);
    let filter = MethodFilter::Only(options.method.clone());
    let key = health_key(&options.method, &path);

    if !options.replace && pipeline.has_route(&filter, &path) {
        tracing::debug!(method = %options.method, path = %path, "Health route already present, skipping");
        return Ok(None);
    }

    let handler = health_handler(started_at, options.include, options.readiness.clone());
    let entry = registry.install_route(pipeline, &key, filter.clone(), &path, vec![handler.clone()])?;
    if shadowed(pipeline, entry.layer(), &filter, &path) {
        tracing::warn!(path = %path, "Another route on the health path runs before the health handler");
    }
    tracing::info!(method = %options.method, path = %path, "Health endpoint registered");
    Ok(Some(handler))
}

/// Whether a route on the same path and method is dispatched before `layer`.
fn shadowed(pipeline: &Pipeline, layer: LayerId, filter: &MethodFilter, path: &str) -> bool {
    let layers = pipeline.layers();
    let Some(own) = layers.iter().position(|l| l.id() == layer) else {
        return false;
    };
    layers[..own].iter().any(|l| {
        l.path() == Some(path) && l.methods().map(|m| m.overlaps(filter)).unwrap_or(false)
    })
}

fn health_handler(
    started_at: Instant,
    include: HealthInclude,
    readiness: Option<Arc<dyn ReadinessCheck>>,
) -> Handler {
    Handler::endpoint(move |_req| {
        let readiness = readiness.clone();
        async move {
            let mut payload = base_payload(started_at, include);
            let failure = match readiness {
                None => None,
                Some(check) => match check.check().await {
                    Ok(result) if result.ok => None,
                    Ok(result) => Some(result.details),
                    Err(err) => Some(Some(json!({ "message": err.message() }))),
                },
            };

            let status = match failure {
                None => StatusCode::OK,
                Some(details) => {
                    payload.insert("status".into(), json!("FAIL"));
                    if let Some(details) = details {
                        payload.insert("details".into(), details);
                    }
                    StatusCode::SERVICE_UNAVAILABLE
                }
            };
            Ok::<_, HandlerError>(json_response(status, &Value::Object(payload)))
        }
    })
    .named("health")
}

fn base_payload(started_at: Instant, include: HealthInclude) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert("status".into(), json!("OK"));
    if include.uptime {
        payload.insert("uptime".into(), json!(started_at.elapsed().as_secs_f64()));
    }
    if include.pid {
        payload.insert("pid".into(), json!(std::process::id()));
    }
    if include.env {
        let env = std::env::var(ENV_VAR).unwrap_or_else(|_| "development".to_string());
        payload.insert("env".into(), json!(env));
    }
    if include.timestamp {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        payload.insert("timestamp".into(), json!(millis));
    }
    payload
}
