//! Redirect registrar.
//!
//! Each redirect is a tracked `GET` route keyed `redirect:<from>`, so
//! registering the same source twice replaces the earlier redirect without
//! touching any other route on that path.

use std::collections::BTreeMap;

use axum::body::Body;
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::Response;

use crate::http::handler::Handler;
use crate::http::response::HandlerError;
use crate::middleware::registry::{MiddlewareRegistry, RegistryEntry};
use crate::routing::error::RouteError;
use crate::routing::matcher::{MethodFilter, PathPattern};
use crate::routing::pipeline::Pipeline;

/// One redirect rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub from: String,
    pub to: String,
    pub status: Option<u16>,
}

impl Redirect {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            status: None,
        }
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
}

/// A single rule, a from → to map (default status), or a list of rules.
#[derive(Debug, Clone)]
pub enum RedirectSpec {
    Single(Redirect),
    Map(BTreeMap<String, String>),
    List(Vec<Redirect>),
}

impl RedirectSpec {
    fn into_rules(self) -> Vec<Redirect> {
        match self {
            RedirectSpec::Single(rule) => vec![rule],
            RedirectSpec::Map(map) => map.into_iter().map(|(from, to)| Redirect::new(from, to)).collect(),
            RedirectSpec::List(rules) => rules,
        }
    }
}

impl From<Redirect> for RedirectSpec {
    fn from(rule: Redirect) -> Self {
        RedirectSpec::Single(rule)
    }
}

impl From<Vec<Redirect>> for RedirectSpec {
    fn from(rules: Vec<Redirect>) -> Self {
        RedirectSpec::List(rules)
    }
}

impl From<BTreeMap<String, String>> for RedirectSpec {
    fn from(map: BTreeMap<String, String>) -> Self {
        RedirectSpec::Map(map)
    }
}

impl<const N: usize> From<[(&str, &str); N]> for RedirectSpec {
    fn from(pairs: [(&str, &str); N]) -> Self {
        RedirectSpec::Map(
            pairs
                .into_iter()
                .map(|(from, to)| (from.to_string(), to.to_string()))
                .collect(),
        )
    }
}

/// Redirect status: anything outside 300-399, or absent, becomes 302.
pub fn redirect_status(status: Option<u16>) -> StatusCode {
    status
        .filter(|s| (300..=399).contains(s))
        .and_then(|s| StatusCode::from_u16(s).ok())
        .unwrap_or(StatusCode::FOUND)
}

/// Registry key of the redirect for `from`.
pub fn redirect_key(from: &str) -> String {
    format!("redirect:{}", from)
}

struct PlannedRedirect {
    key: String,
    from: String,
    handler: Handler,
}

/// Register redirects. All rules are validated before any is installed.
pub fn register_redirects(
    pipeline: &Pipeline,
    registry: &mut MiddlewareRegistry,
    spec: impl Into<RedirectSpec>,
) -> Result<Vec<RegistryEntry>, RouteError> {
    let mut planned = Vec::new();
    for rule in spec.into().into_rules() {
        let from = if rule.from.starts_with('/') {
            rule.from.clone()
        } else {
            format!("/{}", rule.from)
        };
        let pattern = PathPattern::parse(&from)?;
        let location = HeaderValue::from_str(&rule.to).map_err(|_| RouteError::InvalidPath {
            path: rule.to.clone(),
            reason: "redirect target is not a valid header value".to_string(),
        })?;
        let status = redirect_status(rule.status);
        planned.push(PlannedRedirect {
            key: redirect_key(pattern.as_str()),
            from: pattern.as_str().to_string(),
            handler: redirect_handler(status, location, rule.to),
        });
    }

    let mut entries = Vec::with_capacity(planned.len());
    for redirect in planned {
        let entry = registry.install_route(
            pipeline,
            &redirect.key,
            MethodFilter::Only(Method::GET),
            &redirect.from,
            vec![redirect.handler],
        )?;
        tracing::info!(from = %redirect.from, "Redirect registered");
        entries.push(entry);
    }
    Ok(entries)
}

fn redirect_handler(status: StatusCode, location: HeaderValue, target: String) -> Handler {
    let body = format!(
        "{}. Redirecting to {}",
        status.canonical_reason().unwrap_or("Redirect"),
        target
    );
    Handler::endpoint(move |_req| {
        let mut response = Response::new(Body::from(body.clone()));
        *response.status_mut() = status;
        response.headers_mut().insert(header::LOCATION, location.clone());
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        async move { Ok::<_, HandlerError>(response) }
    })
    .named(format!("redirect:{}", target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::handler::Request;

    async fn get(pipeline: &Pipeline, uri: &str) -> Response {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        pipeline.dispatch(req).await
    }

    #[test]
    fn test_status_clamping() {
        assert_eq!(redirect_status(None), StatusCode::FOUND);
        assert_eq!(redirect_status(Some(301)), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(redirect_status(Some(308)), StatusCode::PERMANENT_REDIRECT);
        assert_eq!(redirect_status(Some(200)), StatusCode::FOUND);
        assert_eq!(redirect_status(Some(404)), StatusCode::FOUND);
    }

    #[tokio::test]
    async fn test_single_redirect() {
        let pipeline = Pipeline::new();
        let mut registry = MiddlewareRegistry::new();
        register_redirects(&pipeline, &mut registry, Redirect::new("old", "/new").status(301))
            .unwrap();

        let res = get(&pipeline, "/old").await;
        assert_eq!(res.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(res.headers()[header::LOCATION], "/new");
    }

    #[tokio::test]
    async fn test_map_and_replace() {
        let pipeline = Pipeline::new();
        let mut registry = MiddlewareRegistry::new();
        register_redirects(&pipeline, &mut registry, [("/a", "/x"), ("/b", "/y")]).unwrap();
        register_redirects(&pipeline, &mut registry, Redirect::new("/a", "/z").status(307))
            .unwrap();

        assert_eq!(pipeline.len(), 2);
        let res = get(&pipeline, "/a").await;
        assert_eq!(res.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(res.headers()[header::LOCATION], "/z");
        let res = get(&pipeline, "/b").await;
        assert_eq!(res.status(), StatusCode::FOUND);
    }

    #[tokio::test]
    async fn test_user_route_on_same_path_survives() {
        let pipeline = Pipeline::new();
        let mut registry = MiddlewareRegistry::new();
        let user = Handler::endpoint(|_req| async move { Ok::<_, HandlerError>("user") });
        pipeline
            .route(MethodFilter::Only(Method::POST), "/old", vec![user.clone()])
            .unwrap();
        register_redirects(&pipeline, &mut registry, Redirect::new("/old", "/new")).unwrap();
        register_redirects(&pipeline, &mut registry, Redirect::new("/old", "/newer")).unwrap();
        assert!(pipeline.contains(&user));
        assert_eq!(pipeline.len(), 2);
    }

    #[test]
    fn test_invalid_rule_registers_nothing() {
        let pipeline = Pipeline::new();
        let mut registry = MiddlewareRegistry::new();
        let err = register_redirects(
            &pipeline,
            &mut registry,
            vec![Redirect::new("/ok", "/fine"), Redirect::new("/bad/:", "/x")],
        )
        .unwrap_err();
        assert!(matches!(err, RouteError::InvalidPath { .. }));
        assert!(pipeline.is_empty());
    }
}
