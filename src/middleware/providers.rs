//! Middleware providers.
//!
//! A provider turns option values into a ready-to-install `Handler`. The
//! configuration merger looks providers up by feature; a missing provider is
//! how "this optional middleware is not installed" is expressed.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::http::handler::Handler;
use crate::middleware::{body_parser, logger, security, static_files};

/// Failure to build a middleware. Reported as a warning, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("middleware provider `{0}` is not available")]
    Unavailable(String),

    #[error("invalid options for `{feature}`: {reason}")]
    InvalidOptions { feature: String, reason: String },
}

impl ProviderError {
    pub(crate) fn invalid(feature: Feature, reason: impl fmt::Display) -> Self {
        ProviderError::InvalidOptions {
            feature: feature.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Middleware families the configuration merger can build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    Cors,
    Helmet,
    Static,
    JsonParser,
    FormParser,
    Logger,
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Feature::Cors => "cors",
            Feature::Helmet => "helmet",
            Feature::Static => "static",
            Feature::JsonParser => "json",
            Feature::FormParser => "urlencoded",
            Feature::Logger => "logger",
        };
        f.write_str(name)
    }
}

/// Builds a handler from option values.
pub trait MiddlewareProvider: Send + Sync {
    fn build(&self, options: &Value) -> Result<Handler, ProviderError>;
}

impl<F> MiddlewareProvider for F
where
    F: Fn(&Value) -> Result<Handler, ProviderError> + Send + Sync,
{
    fn build(&self, options: &Value) -> Result<Handler, ProviderError> {
        self(options)
    }
}

/// Providers available to one application.
#[derive(Clone)]
pub struct ProviderSet {
    providers: HashMap<Feature, Arc<dyn MiddlewareProvider>>,
}

impl ProviderSet {
    /// No providers at all.
    pub fn empty() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    pub fn with<P>(mut self, feature: Feature, provider: P) -> Self
    where
        P: MiddlewareProvider + 'static,
    {
        self.providers.insert(feature, Arc::new(provider));
        self
    }

    pub fn without(mut self, feature: Feature) -> Self {
        self.providers.remove(&feature);
        self
    }

    pub fn has(&self, feature: Feature) -> bool {
        self.providers.contains_key(&feature)
    }

    pub fn build(&self, feature: Feature, options: &Value) -> Result<Handler, ProviderError> {
        let provider = self
            .providers
            .get(&feature)
            .ok_or_else(|| ProviderError::Unavailable(feature.to_string()))?;
        provider.build(options)
    }
}

impl Default for ProviderSet {
    fn default() -> Self {
        Self::empty()
            .with(Feature::Cors, security::cors)
            .with(Feature::Helmet, security::helmet)
            .with(Feature::Static, static_files::serve_static)
            .with(Feature::JsonParser, body_parser::json)
            .with(Feature::FormParser, body_parser::urlencoded)
            .with(Feature::Logger, logger::request_logger)
    }
}

impl fmt::Debug for ProviderSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.providers.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_provider_is_unavailable() {
        let set = ProviderSet::default().without(Feature::Logger);
        assert!(!set.has(Feature::Logger));
        let err = set.build(Feature::Logger, &json!({})).unwrap_err();
        assert_eq!(err, ProviderError::Unavailable("logger".into()));
    }

    #[test]
    fn test_custom_provider() {
        let marker = Handler::from_fn(|req, next: crate::http::handler::Next| next.run(req));
        let expected = marker.clone();
        let set = ProviderSet::empty().with(Feature::Cors, move |_: &Value| Ok(marker.clone()));
        let built = set.build(Feature::Cors, &json!({})).unwrap();
        assert!(built.ptr_eq(&expected));
    }

    #[test]
    fn test_defaults_cover_every_feature() {
        let set = ProviderSet::default();
        for feature in [
            Feature::Cors,
            Feature::Helmet,
            Feature::Static,
            Feature::JsonParser,
            Feature::FormParser,
            Feature::Logger,
        ] {
            assert!(set.has(feature), "missing {}", feature);
        }
    }
}
