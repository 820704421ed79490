//! Lifecycle registry for installed middleware.
//!
//! # Responsibilities
//! - Track, per logical key, the exact handler this registry installed
//! - Install with replace-if-present semantics
//! - Remove by key, by mount path, or by key group
//!
//! # Design Decisions
//! - Removal targets the exact layer an entry installed, never paths:
//!   unrelated handlers may share a mount path, and one handler may be
//!   installed under several keys
//! - Layers the registry did not install are never touched
//! - Replacing an entry appends the new layer, so its position in the
//!   pipeline moves to the end

use crate::http::handler::{into_layer_handler, Handler};
use crate::routing::error::RouteError;
use crate::routing::matcher::{normalize_path, MethodFilter, PathPattern};
use crate::routing::pipeline::{LayerId, Pipeline};

/// One installation owned by the registry.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    key: String,
    mount_path: Option<String>,
    handler: Handler,
    layer: LayerId,
    route: Option<(MethodFilter, String)>,
}

impl RegistryEntry {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Mount prefix, for scoped middleware.
    pub fn mount_path(&self) -> Option<&str> {
        self.mount_path.as_deref()
    }

    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    /// The pipeline layer this entry installed.
    pub fn layer(&self) -> LayerId {
        self.layer
    }

    /// Method filter and path, for tracked routes.
    pub fn route(&self) -> Option<(&MethodFilter, &str)> {
        self.route.as_ref().map(|(m, p)| (m, p.as_str()))
    }
}

/// Key → installed handler table, scoped to one application.
#[derive(Debug, Default)]
pub struct MiddlewareRegistry {
    entries: Vec<RegistryEntry>,
    generated: u64,
}

impl MiddlewareRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `handler` under `key`, replacing whatever the key held before.
    pub fn install(
        &mut self,
        pipeline: &Pipeline,
        key: &str,
        handler: Handler,
        mount_path: Option<&str>,
    ) -> RegistryEntry {
        let replaced = self.remove(pipeline, key);
        let mount_path = mount_path.map(normalize_path);
        let layer = pipeline.attach(mount_path.as_deref(), handler.clone());

        let entry = RegistryEntry {
            key: key.to_string(),
            mount_path,
            handler,
            layer,
            route: None,
        };
        self.entries.push(entry.clone());
        tracing::debug!(
            key = %key,
            mount = entry.mount_path().unwrap_or("*"),
            replaced,
            "Middleware installed"
        );
        entry
    }

    /// Install a route under `key`, replacing whatever the key held before.
    ///
    /// The route is validated before the previous entry is removed.
    pub fn install_route(
        &mut self,
        pipeline: &Pipeline,
        key: &str,
        methods: MethodFilter,
        path: &str,
        chain: Vec<Handler>,
    ) -> Result<RegistryEntry, RouteError> {
        let pattern = PathPattern::parse(path)?;
        if chain.is_empty() {
            return Err(RouteError::EmptyChain {
                path: pattern.as_str().to_string(),
            });
        }

        let replaced = self.remove(pipeline, key);
        let handler = into_layer_handler(chain);
        let route = Some((methods.clone(), pattern.as_str().to_string()));
        let layer = pipeline.push_route(methods, pattern, handler.clone());
        let entry = RegistryEntry {
            key: key.to_string(),
            mount_path: None,
            handler,
            layer,
            route,
        };
        self.entries.push(entry.clone());
        tracing::debug!(key = %key, replaced, "Route installed");
        Ok(entry)
    }

    /// Remove the entry for `key`. Unknown keys are a no-op.
    pub fn remove(&mut self, pipeline: &Pipeline, key: &str) -> bool {
        self.remove_where(pipeline, |e| e.key == key) > 0
    }

    /// Remove every tracked middleware mounted at `mount_path`.
    pub fn remove_by_mount_path(&mut self, pipeline: &Pipeline, mount_path: &str) -> usize {
        let mount_path = normalize_path(mount_path);
        self.remove_where(pipeline, |e| e.mount_path.as_deref() == Some(mount_path.as_str()))
    }

    /// Remove `group` and every key of the form `group.<name>`.
    pub fn remove_group(&mut self, pipeline: &Pipeline, group: &str) -> usize {
        let prefix = format!("{}.", group);
        self.remove_where(pipeline, |e| e.key == group || e.key.starts_with(&prefix))
    }

    /// Remove every entry whose key starts with `prefix`.
    pub fn remove_prefixed(&mut self, pipeline: &Pipeline, prefix: &str) -> usize {
        self.remove_where(pipeline, |e| e.key.starts_with(prefix))
    }

    fn remove_where<F>(&mut self, pipeline: &Pipeline, matches: F) -> usize
    where
        F: Fn(&RegistryEntry) -> bool,
    {
        let (removed, kept): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.entries).into_iter().partition(|e| matches(e));
        self.entries = kept;

        for entry in &removed {
            let present = pipeline.remove_layer(entry.layer);
            tracing::debug!(key = %entry.key, present, "Middleware removed");
        }
        removed.len()
    }

    pub fn get(&self, key: &str) -> Option<&RegistryEntry> {
        self.entries.iter().find(|e| e.key == key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Tracked and still present in the pipeline.
    pub fn is_live(&self, pipeline: &Pipeline, key: &str) -> bool {
        self.get(key)
            .map(|e| pipeline.contains_layer(e.layer))
            .unwrap_or(false)
    }

    pub fn entries(&self) -> &[RegistryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// A fresh key of the form `<prefix>#<n>`.
    pub fn generate_key(&mut self, prefix: &str) -> String {
        self.generated += 1;
        format!("{}#{}", prefix, self.generated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::handler::{Next, Request};
    use axum::http::Method;

    fn passthrough() -> Handler {
        Handler::from_fn(|req: Request, next: Next| next.run(req))
    }

    fn count(pipeline: &Pipeline, handler: &Handler) -> usize {
        pipeline
            .layers()
            .iter()
            .filter(|l| l.handler().ptr_eq(handler))
            .count()
    }

    #[test]
    fn test_install_twice_is_idempotent() {
        let pipeline = Pipeline::new();
        let mut registry = MiddlewareRegistry::new();
        let cors = passthrough();

        registry.install(&pipeline, "cors", cors.clone(), None);
        registry.install(&pipeline, "cors", cors.clone(), None);

        assert_eq!(registry.entries().iter().filter(|e| e.key() == "cors").count(), 1);
        assert_eq!(count(&pipeline, &cors), 1);
    }

    #[test]
    fn test_replace_removes_old_handler() {
        let pipeline = Pipeline::new();
        let mut registry = MiddlewareRegistry::new();
        let old = passthrough();
        let new = passthrough();

        registry.install(&pipeline, "logger", old.clone(), None);
        registry.install(&pipeline, "other", passthrough(), None);
        registry.install(&pipeline, "logger", new.clone(), None);

        assert!(!pipeline.contains(&old));
        assert!(pipeline.contains(&new));
        // Replacement lands at the end of the pipeline.
        assert!(pipeline.layers().last().unwrap().handler().ptr_eq(&new));
    }

    #[test]
    fn test_remove_never_touches_foreign_layers() {
        let pipeline = Pipeline::new();
        let mut registry = MiddlewareRegistry::new();
        let ours = passthrough();
        let theirs = passthrough();
        let neighbour = passthrough();

        pipeline.attach(Some("/public"), theirs.clone());
        registry.install(&pipeline, "static", ours.clone(), Some("/public"));
        registry.install(&pipeline, "assets", neighbour.clone(), Some("/public"));

        assert!(registry.remove(&pipeline, "static"));
        assert!(!pipeline.contains(&ours));
        assert!(pipeline.contains(&theirs));
        assert!(pipeline.contains(&neighbour));

        // Second removal is a no-op.
        assert!(!registry.remove(&pipeline, "static"));
        assert!(!registry.remove(&pipeline, "never-installed"));
        assert_eq!(pipeline.len(), 2);
    }

    #[test]
    fn test_shared_handler_removed_per_key() {
        let pipeline = Pipeline::new();
        let mut registry = MiddlewareRegistry::new();
        let shared = passthrough();
        registry.install(&pipeline, "a", shared.clone(), None);
        registry.install(&pipeline, "b", shared.clone(), Some("/api"));
        assert_eq!(count(&pipeline, &shared), 2);

        assert!(registry.remove(&pipeline, "b"));
        assert_eq!(count(&pipeline, &shared), 1);
        assert!(registry.is_live(&pipeline, "a"));
        assert!(!registry.is_live(&pipeline, "b"));
        let remaining = registry.get("a").unwrap().layer();
        assert_eq!(pipeline.position(remaining), Some(0));
    }

    #[test]
    fn test_remove_by_mount_path() {
        let pipeline = Pipeline::new();
        let mut registry = MiddlewareRegistry::new();
        let foreign = passthrough();
        pipeline.attach(Some("/api"), foreign.clone());
        registry.install(&pipeline, "a", passthrough(), Some("/api/"));
        registry.install(&pipeline, "b", passthrough(), Some("/api"));
        registry.install(&pipeline, "c", passthrough(), None);

        assert_eq!(registry.remove_by_mount_path(&pipeline, "/api"), 2);
        assert_eq!(registry.len(), 1);
        assert!(registry.contains("c"));
        assert!(pipeline.contains(&foreign));
    }

    #[test]
    fn test_remove_group() {
        let pipeline = Pipeline::new();
        let mut registry = MiddlewareRegistry::new();
        registry.install(&pipeline, "bodyParser.json", passthrough(), None);
        registry.install(&pipeline, "bodyParser.urlencoded", passthrough(), None);
        registry.install(&pipeline, "bodyParserExtra", passthrough(), None);

        assert_eq!(registry.remove_group(&pipeline, "bodyParser"), 2);
        assert!(registry.contains("bodyParserExtra"));
        assert_eq!(pipeline.len(), 1);
    }

    #[test]
    fn test_install_route_validates_before_replacing() {
        let pipeline = Pipeline::new();
        let mut registry = MiddlewareRegistry::new();
        let filter = MethodFilter::Only(Method::GET);
        registry
            .install_route(&pipeline, "health", filter.clone(), "/health", vec![passthrough()])
            .unwrap();

        let err = registry
            .install_route(&pipeline, "health", filter.clone(), "/bad/:", vec![passthrough()])
            .unwrap_err();
        assert!(matches!(err, RouteError::InvalidPath { .. }));
        assert!(registry.is_live(&pipeline, "health"));
        assert_eq!(registry.get("health").unwrap().route().unwrap().1, "/health");
    }

    #[test]
    fn test_generated_keys_unique() {
        let mut registry = MiddlewareRegistry::new();
        assert_eq!(registry.generate_key("middleware"), "middleware#1");
        assert_eq!(registry.generate_key("middleware"), "middleware#2");
    }
}
