//! The live request pipeline.
//!
//! # Responsibilities
//! - Store the ordered layer list (`use` middleware and routes)
//! - Expose the list for inspection and allow removing individual layers
//! - Dispatch each request through matching layers in install order
//! - Hand failures to the error stage, unmatched requests to the 404 fallback
//! - Hold named application settings
//!
//! # Design Decisions
//! - Layers live behind `ArcSwap`: edits copy the list and swap it in,
//!   each request works on the snapshot it loaded at entry
//! - The exact `Handler` given at install time is stored on the layer, so
//!   reference-equality removal works across install/list/remove
//! - Every layer also gets its own `LayerId`: one handler may be installed
//!   several times and each installation is removable on its own
//! - No internal ordering: a layer runs where it was appended

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::body::Body;
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::Response;
use dashmap::DashMap;
use serde_json::Value;

use crate::http::handler::{into_layer_handler, BoxFuture, Handler, HandlerResult, Next, Request};
use crate::http::request::{ensure_request_id, MountedAt, X_REQUEST_ID};
use crate::http::response::{ErrorContext, ErrorHandler};
use crate::routing::error::RouteError;
use crate::routing::matcher::{MethodFilter, MountMatcher, PathPattern};

/// What a layer responds to.
#[derive(Debug, Clone)]
pub enum LayerKind {
    /// Middleware, global or scoped to a mount prefix.
    Use { mount: Option<MountMatcher> },
    /// Route with a method filter and an exact path pattern.
    Route {
        methods: MethodFilter,
        pattern: PathPattern,
    },
}

/// Identity of one installed layer, unique within its pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LayerId(u64);

/// One entry of the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineLayer {
    id: LayerId,
    kind: LayerKind,
    handler: Handler,
}

impl PipelineLayer {
    pub fn id(&self) -> LayerId {
        self.id
    }

    pub fn kind(&self) -> &LayerKind {
        &self.kind
    }

    /// The exact handler reference installed for this layer.
    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    pub fn is_route(&self) -> bool {
        matches!(self.kind, LayerKind::Route { .. })
    }

    /// Route path, for route layers.
    pub fn path(&self) -> Option<&str> {
        match &self.kind {
            LayerKind::Route { pattern, .. } => Some(pattern.as_str()),
            LayerKind::Use { .. } => None,
        }
    }

    /// Method filter, for route layers.
    pub fn methods(&self) -> Option<&MethodFilter> {
        match &self.kind {
            LayerKind::Route { methods, .. } => Some(methods),
            LayerKind::Use { .. } => None,
        }
    }

    /// Mount prefix, for scoped middleware layers.
    pub fn mount_path(&self) -> Option<&str> {
        match &self.kind {
            LayerKind::Use { mount } => mount.as_ref().map(MountMatcher::as_str),
            LayerKind::Route { .. } => None,
        }
    }

    fn apply_match(&self, req: &mut Request, path: &str) -> bool {
        match &self.kind {
            LayerKind::Use { mount: None } => true,
            LayerKind::Use { mount: Some(mount) } => {
                if !mount.matches(path) {
                    return false;
                }
                req.extensions_mut()
                    .insert(MountedAt(mount.as_str().to_string()));
                true
            }
            LayerKind::Route { methods, pattern } => {
                if !methods.matches(req.method()) {
                    return false;
                }
                match pattern.matches(path) {
                    Some(params) => {
                        req.extensions_mut().insert(params);
                        true
                    }
                    None => false,
                }
            }
        }
    }
}

/// Ordered, inspectable, editable list of layers plus application settings.
pub struct Pipeline {
    layers: ArcSwap<Vec<PipelineLayer>>,
    settings: DashMap<String, Value>,
    error_handler: ArcSwap<ErrorHandler>,
    next_id: AtomicU64,
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            layers: ArcSwap::from_pointee(Vec::new()),
            settings: DashMap::new(),
            error_handler: ArcSwap::from_pointee(ErrorHandler::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a route. Returns the handler stored on the layer.
    pub fn route(
        &self,
        methods: MethodFilter,
        path: &str,
        chain: Vec<Handler>,
    ) -> Result<Handler, RouteError> {
        let pattern = PathPattern::parse(path)?;
        if chain.is_empty() {
            return Err(RouteError::EmptyChain {
                path: pattern.as_str().to_string(),
            });
        }
        let handler = into_layer_handler(chain);
        self.push_route(methods, pattern, handler.clone());
        Ok(handler)
    }

    pub(crate) fn push_route(&self, methods: MethodFilter, pattern: PathPattern, handler: Handler) -> LayerId {
        tracing::debug!(method = %methods, path = %pattern, handler = handler.name(), "Route registered");
        self.push(LayerKind::Route { methods, pattern }, handler)
    }

    /// Attach middleware globally or under a mount prefix.
    pub fn attach(&self, mount: Option<&str>, handler: Handler) -> LayerId {
        let mount = mount.map(MountMatcher::new);
        tracing::debug!(
            mount = mount.as_ref().map(MountMatcher::as_str).unwrap_or("*"),
            handler = handler.name(),
            "Middleware attached"
        );
        self.push(LayerKind::Use { mount }, handler)
    }

    fn push(&self, kind: LayerKind, handler: Handler) -> LayerId {
        let id = LayerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let layer = PipelineLayer { id, kind, handler };
        self.layers.rcu(|current| {
            let mut next = Vec::with_capacity(current.len() + 1);
            next.extend(current.iter().cloned());
            next.push(layer.clone());
            next
        });
        id
    }

    /// Snapshot of the current layers.
    pub fn layers(&self) -> Arc<Vec<PipelineLayer>> {
        self.layers.load_full()
    }

    pub fn len(&self) -> usize {
        self.layers.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if any layer carries exactly this handler.
    pub fn contains(&self, handler: &Handler) -> bool {
        self.layers.load().iter().any(|l| l.handler.ptr_eq(handler))
    }

    /// Returns true if a route layer would accept `methods` on exactly `path`.
    pub fn has_route(&self, methods: &MethodFilter, path: &str) -> bool {
        let wanted = crate::routing::matcher::normalize_path(path);
        self.layers.load().iter().any(|l| match &l.kind {
            LayerKind::Route { methods: m, pattern } => pattern.as_str() == wanted && m.overlaps(methods),
            LayerKind::Use { .. } => false,
        })
    }

    /// Keep only layers for which `keep` returns true. Returns the number removed.
    pub fn retain<F>(&self, keep: F) -> usize
    where
        F: Fn(&PipelineLayer) -> bool,
    {
        let previous = self
            .layers
            .rcu(|current| current.iter().filter(|l| keep(l)).cloned().collect::<Vec<_>>());
        previous.iter().filter(|l| !keep(l)).count()
    }

    /// Remove every layer carrying exactly this handler.
    pub fn remove_handler(&self, handler: &Handler) -> usize {
        self.retain(|l| !l.handler.ptr_eq(handler))
    }

    /// Remove one installed layer. Returns false if it is already gone.
    pub fn remove_layer(&self, id: LayerId) -> bool {
        self.retain(|l| l.id != id) > 0
    }

    pub fn contains_layer(&self, id: LayerId) -> bool {
        self.position(id).is_some()
    }

    /// Current index of a layer in dispatch order.
    pub fn position(&self, id: LayerId) -> Option<usize> {
        self.layers.load().iter().position(|l| l.id == id)
    }

    pub fn set_setting(&self, name: impl Into<String>, value: Value) {
        self.settings.insert(name.into(), value);
    }

    pub fn setting(&self, name: &str) -> Option<Value> {
        self.settings.get(name).map(|v| v.value().clone())
    }

    pub fn set_error_handler(&self, handler: ErrorHandler) {
        self.error_handler.store(Arc::new(handler));
    }

    /// Run one request through the pipeline.
    pub async fn dispatch(&self, mut req: Request) -> Response {
        let request_id = ensure_request_id(&mut req);
        let ctx = ErrorContext {
            method: req.method().clone(),
            path: req.uri().path().to_string(),
            request_id: Some(request_id.to_string()),
            accept: req
                .headers()
                .get(header::ACCEPT)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        };

        let layers = self.layers.load_full();
        let mut response = match resume(layers, 0, req).await {
            Ok(response) => response,
            Err(err) => self.error_handler.load().render(err, &ctx),
        };

        if let Some(value) = request_id.header_value() {
            response.headers_mut().entry(X_REQUEST_ID).or_insert(value);
        }
        response
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("layers", &self.layers.load().len())
            .field("settings", &self.settings.len())
            .finish()
    }
}

/// Continue dispatch from layer `start` of a snapshot.
pub(crate) fn resume(
    layers: Arc<Vec<PipelineLayer>>,
    start: usize,
    mut req: Request,
) -> BoxFuture<HandlerResult> {
    Box::pin(async move {
        let path = req.uri().path().to_string();
        for index in start..layers.len() {
            if !layers[index].apply_match(&mut req, &path) {
                continue;
            }
            let handler = layers[index].handler.clone();
            let next = Next::pipeline(layers.clone(), index + 1);
            return handler.invoke(req, next).await;
        }
        Ok(not_found(&req))
    })
}

/// Fallback when no layer produced a response.
pub(crate) fn not_found(req: &Request) -> Response {
    let method = if req.method() == Method::HEAD {
        &Method::GET
    } else {
        req.method()
    };
    let mut response = Response::new(Body::from(format!(
        "Cannot {} {}",
        method,
        req.uri().path()
    )));
    *response.status_mut() = StatusCode::NOT_FOUND;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::RequestExt;
    use crate::http::response::HandlerError;

    fn text(body: &'static str) -> Handler {
        Handler::endpoint(move |_req| async move { Ok::<_, HandlerError>(body) })
    }

    fn req(method: Method, uri: &str) -> Request {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn body_of(res: Response) -> String {
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_dispatch_in_install_order() {
        let pipeline = Pipeline::new();
        pipeline
            .route(MethodFilter::Only(Method::GET), "/a", vec![text("first")])
            .unwrap();
        pipeline
            .route(MethodFilter::Only(Method::GET), "/a", vec![text("second")])
            .unwrap();
        let res = pipeline.dispatch(req(Method::GET, "/a")).await;
        assert_eq!(body_of(res).await, "first");
    }

    #[tokio::test]
    async fn test_not_found_fallback() {
        let pipeline = Pipeline::new();
        let res = pipeline.dispatch(req(Method::POST, "/missing")).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert!(res.headers().contains_key(&X_REQUEST_ID));
        assert_eq!(body_of(res).await, "Cannot POST /missing");
    }

    #[tokio::test]
    async fn test_route_params_visible() {
        let pipeline = Pipeline::new();
        let show = Handler::endpoint(|req: Request| async move {
            Ok::<_, HandlerError>(format!("user {}", req.param("id").unwrap_or("?")))
        });
        pipeline
            .route(MethodFilter::Only(Method::GET), "/users/:id", vec![show])
            .unwrap();
        let res = pipeline.dispatch(req(Method::GET, "/users/42")).await;
        assert_eq!(body_of(res).await, "user 42");
    }

    #[tokio::test]
    async fn test_mounted_middleware_scoped() {
        let pipeline = Pipeline::new();
        let guard = Handler::endpoint(|_req| async move {
            Ok::<_, HandlerError>((StatusCode::FORBIDDEN, "blocked"))
        });
        pipeline.attach(Some("/admin"), guard);
        pipeline
            .route(MethodFilter::Any, "/admin/panel", vec![text("panel")])
            .unwrap();
        pipeline
            .route(MethodFilter::Any, "/public", vec![text("public")])
            .unwrap();

        let res = pipeline.dispatch(req(Method::GET, "/admin/panel")).await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        let res = pipeline.dispatch(req(Method::GET, "/public")).await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_error_reaches_error_stage() {
        let pipeline = Pipeline::new();
        let failing = Handler::endpoint(|_req| async move {
            Err::<&'static str, _>(HandlerError::bad_request("nope"))
        });
        pipeline
            .route(MethodFilter::Only(Method::GET), "/fail", vec![failing])
            .unwrap();
        let res = pipeline.dispatch(req(Method::GET, "/fail")).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let body: Value = serde_json::from_str(&body_of(res).await).unwrap();
        assert_eq!(body["error"]["message"], "nope");
    }

    #[test]
    fn test_remove_by_reference_only() {
        let pipeline = Pipeline::new();
        let a = text("a");
        let b = text("b");
        pipeline.attach(Some("/static"), a.clone());
        pipeline.attach(Some("/static"), b.clone());
        assert_eq!(pipeline.remove_handler(&a), 1);
        assert_eq!(pipeline.len(), 1);
        assert!(pipeline.contains(&b));
        assert!(!pipeline.contains(&a));
        assert_eq!(pipeline.remove_handler(&a), 0);
    }

    #[test]
    fn test_remove_single_layer_of_shared_handler() {
        let pipeline = Pipeline::new();
        let shared = text("shared");
        let global = pipeline.attach(None, shared.clone());
        let scoped = pipeline.attach(Some("/api"), shared.clone());
        assert_ne!(global, scoped);
        assert_eq!(pipeline.position(scoped), Some(1));

        assert!(pipeline.remove_layer(scoped));
        assert!(!pipeline.remove_layer(scoped));
        assert!(pipeline.contains_layer(global));
        assert!(pipeline.contains(&shared));
        assert_eq!(pipeline.len(), 1);
    }

    #[test]
    fn test_has_route_and_settings() {
        let pipeline = Pipeline::new();
        pipeline
            .route(MethodFilter::Only(Method::GET), "/health/", vec![text("ok")])
            .unwrap();
        assert!(pipeline.has_route(&MethodFilter::Only(Method::GET), "/health"));
        assert!(!pipeline.has_route(&MethodFilter::Only(Method::POST), "/health"));

        pipeline.set_setting("view engine", Value::String("tera".into()));
        assert_eq!(pipeline.setting("view engine"), Some(Value::String("tera".into())));
        assert_eq!(pipeline.setting("views"), None);
    }
}
