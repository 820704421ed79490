//! JSON and urlencoded body parsers.
//!
//! A parser only consumes bodies whose content type it understands; every
//! other request passes through untouched. The decoded value is stored as
//! `ParsedBody` and the raw bytes are put back on the request.

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::http::handler::{BoxFuture, Handler, HandlerResult, Middleware, Next, Request};
use crate::http::request::ParsedBody;
use crate::http::response::HandlerError;
use crate::middleware::providers::{Feature, ProviderError};

/// Default body size limit: 100 KiB.
pub const DEFAULT_LIMIT: usize = 100 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyKind {
    Json,
    Form,
}

impl BodyKind {
    fn feature(self) -> Feature {
        match self {
            BodyKind::Json => Feature::JsonParser,
            BodyKind::Form => Feature::FormParser,
        }
    }

    fn accepts(self, headers: &HeaderMap) -> bool {
        let Some(essence) = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(|v| v.trim().to_ascii_lowercase())
        else {
            return false;
        };
        match self {
            BodyKind::Json => essence == "application/json" || essence.ends_with("+json"),
            BodyKind::Form => essence == "application/x-www-form-urlencoded",
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ParserOptions {
    limit: usize,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
        }
    }
}

fn parse_options(kind: BodyKind, options: &Value) -> Result<ParserOptions, ProviderError> {
    if options.is_null() {
        return Ok(ParserOptions::default());
    }
    serde_json::from_value(options.clone()).map_err(|e| ProviderError::invalid(kind.feature(), e))
}

/// JSON body parser provider.
pub fn json(options: &Value) -> Result<Handler, ProviderError> {
    let opts = parse_options(BodyKind::Json, options)?;
    Ok(Handler::new(BodyParser {
        kind: BodyKind::Json,
        limit: opts.limit,
    })
    .named("json_parser"))
}

/// `application/x-www-form-urlencoded` body parser provider.
pub fn urlencoded(options: &Value) -> Result<Handler, ProviderError> {
    let opts = parse_options(BodyKind::Form, options)?;
    Ok(Handler::new(BodyParser {
        kind: BodyKind::Form,
        limit: opts.limit,
    })
    .named("urlencoded_parser"))
}

struct BodyParser {
    kind: BodyKind,
    limit: usize,
}

impl Middleware for BodyParser {
    fn call(&self, req: Request, next: Next) -> BoxFuture<HandlerResult> {
        let kind = self.kind;
        let limit = self.limit;
        Box::pin(async move {
            if req.extensions().get::<ParsedBody>().is_some() || !kind.accepts(req.headers()) {
                return next.run(req).await;
            }

            let declared = req
                .headers()
                .get(header::CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<usize>().ok());
            if declared.is_some_and(|len| len > limit) {
                return Err(too_large(limit));
            }

            let (parts, body) = req.into_parts();
            let bytes = axum::body::to_bytes(body, limit)
                .await
                .map_err(|_| too_large(limit))?;

            let value = match kind {
                BodyKind::Json => decode_json(&bytes)?,
                BodyKind::Form => decode_form(&bytes)?,
            };

            let mut req = Request::from_parts(parts, Body::from(bytes));
            req.extensions_mut().insert(ParsedBody(value));
            next.run(req).await
        })
    }
}

fn too_large(limit: usize) -> HandlerError {
    HandlerError::new(
        StatusCode::PAYLOAD_TOO_LARGE,
        format!("request body exceeds {} bytes", limit),
    )
}

fn decode_json(bytes: &Bytes) -> Result<Value, HandlerError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_slice(bytes).map_err(|e| {
        HandlerError::bad_request(format!("invalid JSON body: {}", e)).with_code("INVALID_JSON")
    })
}

/// Repeated keys collect into an array, in arrival order.
fn decode_form(bytes: &Bytes) -> Result<Value, HandlerError> {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(bytes).map_err(|e| {
        HandlerError::bad_request(format!("invalid form body: {}", e)).with_code("INVALID_FORM")
    })?;

    let mut map = Map::new();
    for (key, value) in pairs {
        match map.get_mut(&key) {
            None => {
                map.insert(key, Value::String(value));
            }
            Some(Value::Array(items)) => items.push(Value::String(value)),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, Value::String(value)]);
            }
        }
    }
    Ok(Value::Object(map))
}
