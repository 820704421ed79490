//! CORS and security headers.
//!
//! Both middlewares decorate failures too: a `HandlerError` raised further
//! down the pipeline carries their headers to the error stage.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method};
use axum::response::Response;
use serde::Deserialize;
use serde_json::Value;
use tower::{Layer, ServiceExt};
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};

use crate::http::handler::{BoxFuture, Handler, HandlerResult, Middleware, Next, Request};
use crate::http::response::HandlerError;
use crate::middleware::providers::{Feature, ProviderError};

const DEFAULT_METHODS: [Method; 6] = [
    Method::GET,
    Method::HEAD,
    Method::PUT,
    Method::PATCH,
    Method::POST,
    Method::DELETE,
];

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    /// Comma-separated strings are split, matching header syntax.
    fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => s
                .split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect(),
            OneOrMany::Many(v) => v,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OriginOption {
    Reflect(bool),
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
struct CorsOptions {
    origin: Option<OriginOption>,
    methods: Option<OneOrMany>,
    allowed_headers: Option<OneOrMany>,
    exposed_headers: Option<OneOrMany>,
    credentials: bool,
    max_age: Option<u64>,
}

/// CORS provider backed by `tower_http::cors`.
pub fn cors(options: &Value) -> Result<Handler, ProviderError> {
    let opts: CorsOptions = if options.is_null() {
        CorsOptions::default()
    } else {
        serde_json::from_value(options.clone()).map_err(|e| ProviderError::invalid(Feature::Cors, e))?
    };
    let layer = cors_layer(opts)?;
    Ok(Handler::new(Cors { layer }).named("cors"))
}

fn cors_layer(opts: CorsOptions) -> Result<CorsLayer, ProviderError> {
    let invalid = |reason: String| ProviderError::invalid(Feature::Cors, reason);

    let (origin, wildcard) = match opts.origin {
        None => (AllowOrigin::any(), true),
        Some(OriginOption::Reflect(true)) => (AllowOrigin::mirror_request(), false),
        Some(OriginOption::Reflect(false)) => {
            return Err(invalid("origin `false`; disable cors instead".into()))
        }
        Some(OriginOption::One(o)) if o == "*" => (AllowOrigin::any(), true),
        Some(OriginOption::One(o)) => (AllowOrigin::exact(header_value(&o).map_err(invalid)?), false),
        Some(OriginOption::Many(list)) => {
            let values = list
                .iter()
                .map(|o| header_value(o))
                .collect::<Result<Vec<_>, _>>()
                .map_err(invalid)?;
            (AllowOrigin::list(values), false)
        }
    };
    if opts.credentials && wildcard {
        return Err(invalid("credentials cannot be combined with origin `*`".into()));
    }

    let methods = match opts.methods {
        None => DEFAULT_METHODS.to_vec(),
        Some(list) => list
            .into_vec()
            .iter()
            .map(|m| {
                Method::from_bytes(m.to_ascii_uppercase().as_bytes())
                    .map_err(|_| format!("invalid method `{}`", m))
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(invalid)?,
    };

    let allow_headers = match opts.allowed_headers {
        None => AllowHeaders::mirror_request(),
        Some(list) => AllowHeaders::list(header_names(list).map_err(invalid)?),
    };

    let mut layer = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(methods)
        .allow_headers(allow_headers)
        .allow_credentials(opts.credentials);
    if let Some(exposed) = opts.exposed_headers {
        layer = layer.expose_headers(header_names(exposed).map_err(invalid)?);
    }
    if let Some(secs) = opts.max_age {
        layer = layer.max_age(Duration::from_secs(secs));
    }
    Ok(layer)
}

fn header_value(value: &str) -> Result<HeaderValue, String> {
    HeaderValue::from_str(value).map_err(|_| format!("invalid header value `{}`", value))
}

fn header_names(list: OneOrMany) -> Result<Vec<HeaderName>, String> {
    list.into_vec()
        .iter()
        .map(|h| HeaderName::from_bytes(h.as_bytes()).map_err(|_| format!("invalid header `{}`", h)))
        .collect()
}

struct Cors {
    layer: CorsLayer,
}

impl Middleware for Cors {
    fn call(&self, req: Request, next: Next) -> BoxFuture<HandlerResult> {
        // Preflight requests are answered by the layer without reaching `next`.
        // A failure from `next` is parked so the layer still decorates a
        // response, whose headers then travel with the error.
        let failed: Arc<Mutex<Option<HandlerError>>> = Arc::new(Mutex::new(None));
        let slot = failed.clone();
        let service = self.layer.layer(tower::service_fn(move |req: Request| {
            let next = next.clone();
            let slot = slot.clone();
            async move {
                match next.run(req).await {
                    Ok(res) => Ok::<_, HandlerError>(res),
                    Err(err) => {
                        *slot.lock().unwrap_or_else(|p| p.into_inner()) = Some(err);
                        Ok(Response::new(Body::empty()))
                    }
                }
            }
        }));
        Box::pin(async move {
            let res = service.oneshot(req).await?;
            let parked = failed.lock().unwrap_or_else(|p| p.into_inner()).take();
            match parked {
                Some(err) => Err(err.with_response_headers(res.headers())),
                None => Ok(res),
            }
        })
    }
}

/// A header toggle: `false` disables it, `true` keeps the default, anything
/// else replaces the default value.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Setting<T> {
    Toggle(bool),
    Value(T),
}

impl<T> Default for Setting<T> {
    fn default() -> Self {
        Setting::Toggle(true)
    }
}

impl<T> Setting<T> {
    fn resolve(self, default: T) -> Option<T> {
        match self {
            Setting::Toggle(true) => Some(default),
            Setting::Toggle(false) => None,
            Setting::Value(v) => Some(v),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
struct HelmetOptions {
    content_security_policy: Setting<String>,
    strict_transport_security: Setting<u64>,
    frame_options: Setting<String>,
    referrer_policy: Setting<String>,
}

const DEFAULT_CSP: &str = "default-src 'self';base-uri 'self';font-src 'self' https: data:;\
form-action 'self';frame-ancestors 'self';img-src 'self' data:;object-src 'none';\
script-src 'self';script-src-attr 'none';style-src 'self' https: 'unsafe-inline';\
upgrade-insecure-requests";

/// 180 days.
const DEFAULT_HSTS_MAX_AGE: u64 = 15_552_000;

/// Security header provider.
pub fn helmet(options: &Value) -> Result<Handler, ProviderError> {
    let opts: HelmetOptions = if options.is_null() {
        HelmetOptions::default()
    } else {
        serde_json::from_value(options.clone())
            .map_err(|e| ProviderError::invalid(Feature::Helmet, e))?
    };

    let mut headers: Vec<(&'static str, String)> = Vec::new();
    if let Some(csp) = opts.content_security_policy.resolve(DEFAULT_CSP.to_string()) {
        headers.push(("content-security-policy", csp));
    }
    headers.push(("cross-origin-opener-policy", "same-origin".into()));
    headers.push(("cross-origin-resource-policy", "same-origin".into()));
    headers.push(("origin-agent-cluster", "?1".into()));
    if let Some(policy) = opts.referrer_policy.resolve("no-referrer".into()) {
        headers.push(("referrer-policy", policy));
    }
    if let Some(max_age) = opts.strict_transport_security.resolve(DEFAULT_HSTS_MAX_AGE) {
        headers.push((
            "strict-transport-security",
            format!("max-age={}; includeSubDomains", max_age),
        ));
    }
    headers.push(("x-content-type-options", "nosniff".into()));
    headers.push(("x-dns-prefetch-control", "off".into()));
    headers.push(("x-download-options", "noopen".into()));
    if let Some(frame) = opts.frame_options.resolve("SAMEORIGIN".into()) {
        headers.push(("x-frame-options", frame.to_ascii_uppercase()));
    }
    headers.push(("x-permitted-cross-domain-policies", "none".into()));
    headers.push(("x-xss-protection", "0".into()));

    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let value = header_value(&value)
            .map_err(|reason| ProviderError::invalid(Feature::Helmet, reason))?;
        map.insert(HeaderName::from_static(name), value);
    }

    Ok(Handler::new(Helmet {
        headers: Arc::new(map),
    })
    .named("helmet"))
}

struct Helmet {
    headers: Arc<HeaderMap>,
}

impl Middleware for Helmet {
    fn call(&self, req: Request, next: Next) -> BoxFuture<HandlerResult> {
        let headers = self.headers.clone();
        Box::pin(async move {
            match next.run(req).await {
                Ok(mut response) => {
                    for (name, value) in headers.iter() {
                        response.headers_mut().entry(name).or_insert_with(|| value.clone());
                    }
                    Ok(response)
                }
                Err(err) => Err(err.with_response_headers(&headers)),
            }
        })
    }
}
