//! Request-scoped data.
//!
//! # Responsibilities
//! - Generate a unique request ID (UUID v4) unless the client sent one
//! - Expose matched route parameters and the mount point of the current layer
//! - Expose bodies decoded by the body parsers
//!
//! # Design Decisions
//! - Request ID added at pipeline entry so every layer and the error stage see it
//! - Everything request-scoped lives in the request extensions

use std::collections::HashMap;

use axum::http::{HeaderName, HeaderValue};
use serde_json::Value;
use uuid::Uuid;

use crate::http::handler::Request;

/// Header carrying the request ID.
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Unique identifier of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(String);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn header_value(&self) -> Option<HeaderValue> {
        HeaderValue::from_str(&self.0).ok()
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Make sure the request carries an ID, reusing the client's header if present.
pub(crate) fn ensure_request_id(req: &mut Request) -> RequestId {
    if let Some(existing) = req.extensions().get::<RequestId>() {
        return existing.clone();
    }
    let id = req
        .headers()
        .get(&X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(|v| RequestId(v.to_string()))
        .unwrap_or_default();
    if let Some(value) = id.header_value() {
        req.headers_mut().insert(X_REQUEST_ID, value);
    }
    req.extensions_mut().insert(id.clone());
    id
}

/// Parameters captured by the matched route pattern.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams(pub HashMap<String, String>);

impl PathParams {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }
}

/// Mount path of the `use` layer currently handling the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountedAt(pub String);

/// Body decoded by one of the body parsers.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedBody(pub Value);

/// Accessors for request-scoped data.
pub trait RequestExt {
    /// The request ID assigned at pipeline entry.
    fn request_id(&self) -> Option<&RequestId>;
    /// A named route parameter, e.g. `id` for `/users/:id`.
    fn param(&self, name: &str) -> Option<&str>;
    /// The decoded body, if a parser consumed it.
    fn parsed_body(&self) -> Option<&Value>;
}

impl RequestExt for Request {
    fn request_id(&self) -> Option<&RequestId> {
        self.extensions().get::<RequestId>()
    }

    fn param(&self, name: &str) -> Option<&str> {
        self.extensions().get::<PathParams>()?.get(name)
    }

    fn parsed_body(&self) -> Option<&Value> {
        self.extensions().get::<ParsedBody>().map(|b| &b.0)
    }
}
