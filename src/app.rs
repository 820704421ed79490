//! Application instance.
//!
//! # Responsibilities
//! - Own one pipeline, one middleware registry, one configuration snapshot
//! - Expose route composition, configuration, middleware and registrars
//! - Start serving
//!
//! # Design Decisions
//! - Nothing is process-global: two `App`s in one process never share state
//! - Registration takes `&mut self`, so configuration calls are serialized by
//!   the borrow checker; serving only needs the shared pipeline

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::config::loader::ConfigError;
use crate::config::merger::{self, MergeTarget};
use crate::config::schema::{ConfigPatch, ConfigSnapshot};
use crate::health::{self, HealthOptions};
use crate::http::handler::{Handler, HandlerSpec};
use crate::http::response::ErrorHandler;
use crate::http::server::HttpServer;
use crate::lifecycle::startup;
use crate::middleware::providers::ProviderSet;
use crate::middleware::registry::{MiddlewareRegistry, RegistryEntry};
use crate::routing::composer::{self, RegisteredRoute, RouteSpec};
use crate::routing::error::RouteError;
use crate::routing::matcher::normalize_path;
use crate::routing::pipeline::Pipeline;
use crate::routing::redirect::{self, RedirectSpec};
use crate::routing::resource::{self, ResourceSpec};

/// Key prefix of middleware installed through `use_middleware`/`use_at`.
pub const MIDDLEWARE_KEY_PREFIX: &str = "middleware";

pub struct App {
    pipeline: Arc<Pipeline>,
    registry: MiddlewareRegistry,
    config: ConfigSnapshot,
    providers: ProviderSet,
    root_dir: PathBuf,
    started_at: Instant,
}

impl App {
    /// An application with the default providers and body parsers installed.
    pub fn new() -> Self {
        Self::with_providers(ProviderSet::default())
    }

    pub fn with_providers(providers: ProviderSet) -> Self {
        let mut app = Self {
            pipeline: Arc::new(Pipeline::new()),
            registry: MiddlewareRegistry::new(),
            config: ConfigSnapshot::default(),
            providers,
            root_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            started_at: Instant::now(),
        };
        merger::install_body_parsers(&mut app.merge_target(), &Value::Null, false);
        app
    }

    /// Directory relative `static` and `views` paths are resolved against.
    /// Defaults to the working directory.
    pub fn with_root_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.root_dir = dir.into();
        self
    }

    /// Register routes described by `spec` under `base_path`.
    pub fn compose(
        &self,
        base_path: &str,
        spec: impl Into<RouteSpec>,
    ) -> Result<Vec<RegisteredRoute>, RouteError> {
        composer::compose(&self.pipeline, base_path, spec)
    }

    /// Register a resource's collection and member routes.
    pub fn compose_resource(
        &self,
        resource: &str,
        spec: impl Into<ResourceSpec>,
    ) -> Result<Vec<RegisteredRoute>, RouteError> {
        resource::compose_resource(&self.pipeline, resource, spec)
    }

    /// Merge `patch` into the configuration and apply its side effects.
    pub fn apply_config(&mut self, patch: ConfigPatch) -> Result<ConfigSnapshot, ConfigError> {
        merger::apply_config(self, patch)
    }

    /// Install global middleware, one tracked entry per handler.
    pub fn use_middleware(
        &mut self,
        spec: impl Into<HandlerSpec>,
    ) -> Result<Vec<RegistryEntry>, RouteError> {
        self.install_generic(None, spec.into())
    }

    /// Install middleware scoped to `path`.
    pub fn use_at(
        &mut self,
        path: &str,
        spec: impl Into<HandlerSpec>,
    ) -> Result<Vec<RegistryEntry>, RouteError> {
        self.install_generic(Some(path), spec.into())
    }

    fn install_generic(
        &mut self,
        mount: Option<&str>,
        spec: HandlerSpec,
    ) -> Result<Vec<RegistryEntry>, RouteError> {
        let path = normalize_path(mount.unwrap_or("/"));
        let chain = spec.normalize(&path)?;
        let entries = chain
            .into_iter()
            .map(|handler| {
                let key = self.registry.generate_key(MIDDLEWARE_KEY_PREFIX);
                self.registry.install(&self.pipeline, &key, handler, mount)
            })
            .collect();
        Ok(entries)
    }

    /// Remove middleware installed through `use_middleware`/`use_at`: all of
    /// it, or only what is mounted at `path`. Returns the number removed.
    pub fn remove_middleware(&mut self, path: Option<&str>) -> usize {
        let prefix = format!("{}#", MIDDLEWARE_KEY_PREFIX);
        let Some(mount) = path.map(normalize_path) else {
            return self.registry.remove_prefixed(&self.pipeline, &prefix);
        };
        let keys: Vec<String> = self
            .registry
            .entries()
            .iter()
            .filter(|e| e.key().starts_with(&prefix) && e.mount_path() == Some(mount.as_str()))
            .map(|e| e.key().to_string())
            .collect();
        let mut removed = 0;
        for key in &keys {
            if self.registry.remove(&self.pipeline, key) {
                removed += 1;
            }
        }
        removed
    }

    /// Register one or more redirects.
    pub fn redirect(&mut self, spec: impl Into<RedirectSpec>) -> Result<Vec<RegistryEntry>, RouteError> {
        redirect::register_redirects(&self.pipeline, &mut self.registry, spec)
    }

    /// Register a health endpoint. `Ok(None)` when the route already exists.
    pub fn register_health(
        &mut self,
        options: impl Into<HealthOptions>,
    ) -> Result<Option<Handler>, RouteError> {
        health::register_health(&self.pipeline, &mut self.registry, self.started_at, options)
    }

    pub fn set_error_handler(&self, handler: ErrorHandler) {
        self.pipeline.set_error_handler(handler);
    }

    pub fn config(&self) -> &ConfigSnapshot {
        &self.config
    }

    pub fn registry(&self) -> &MiddlewareRegistry {
        &self.registry
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Axum router serving this application's pipeline.
    pub fn router(&self) -> Router {
        HttpServer::new(self.pipeline.clone()).into_router()
    }

    /// Bind and serve until `shutdown` fires. The port is `port`, else the
    /// configured port, else 3000.
    pub async fn start(
        &self,
        port: Option<u16>,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let port = startup::resolve_port(port, &self.config);
        let listener = startup::bind(port).await?;
        HttpServer::new(self.pipeline.clone())
            .run(listener, shutdown)
            .await
    }

    pub(crate) fn merge_target(&mut self) -> MergeTarget<'_> {
        MergeTarget {
            pipeline: &self.pipeline,
            registry: &mut self.registry,
            providers: &self.providers,
            snapshot: &mut self.config,
            root_dir: &self.root_dir,
        }
    }
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("pipeline", &self.pipeline)
            .field("registry", &self.registry.len())
            .field("config", &self.config)
            .finish()
    }
}
