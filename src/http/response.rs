//! Response handling and the pipeline error stage.
//!
//! # Responsibilities
//! - Carry runtime handler failures (`HandlerError`) with an HTTP status
//! - Turn a failure that escaped the pipeline into a client response
//! - Log failures by severity and notify an optional hook
//!
//! # Design Decisions
//! - 5xx are logged at error level, everything else at warn
//! - Headers middleware attached to a failure (`with_response_headers`) are
//!   written on the rendered response unless the renderer set them itself
//! - Internal details (error source, details payload) are hidden unless enabled
//! - JSON by default; HTML only for clients that accept HTML but not JSON

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::{json, Value};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failure raised by a handler at request time.
#[derive(Debug)]
pub struct HandlerError {
    status: StatusCode,
    code: String,
    message: String,
    details: Option<Value>,
    source: Option<BoxError>,
    headers: HeaderMap,
}

impl HandlerError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            code: default_code(status),
            message: message.into(),
            details: None,
            source: None,
            headers: HeaderMap::new(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// Override the machine-readable code.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    /// Attach structured details (only rendered when the error stage exposes details).
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Carry headers onto the error response. Names already attached win.
    pub fn with_response_headers(mut self, headers: &HeaderMap) -> Self {
        merge_missing(&mut self.headers, headers);
        self
    }

    pub fn response_headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> Option<&Value> {
        self.details.as_ref()
    }

    pub fn source(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.source.as_deref()
    }
}

impl<E> From<E> for HandlerError
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(err: E) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: default_code(StatusCode::INTERNAL_SERVER_ERROR),
            message: err.to_string(),
            details: None,
            source: Some(Box::new(err)),
            headers: HeaderMap::new(),
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.status.as_u16(), self.code, self.message)
    }
}

fn default_code(status: StatusCode) -> String {
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        return "INTERNAL_ERROR".to_string();
    }
    status
        .canonical_reason()
        .map(|reason| reason.to_uppercase().replace([' ', '-'], "_"))
        .unwrap_or_else(|| "ERROR".to_string())
}

/// Request facts captured before dispatch, available to the error stage.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub method: Method,
    pub path: String,
    pub request_id: Option<String>,
    pub accept: Option<String>,
}

/// Hook invoked for every failure before the response is written.
pub type ErrorHook = Arc<dyn Fn(&HandlerError, &ErrorContext) + Send + Sync>;

/// Terminal error stage of the pipeline.
#[derive(Clone, Default)]
pub struct ErrorHandler {
    expose_details: bool,
    on_error: Option<ErrorHook>,
}

impl ErrorHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Include details and the error source in responses.
    pub fn expose_details(mut self, expose: bool) -> Self {
        self.expose_details = expose;
        self
    }

    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&HandlerError, &ErrorContext) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(hook));
        self
    }

    /// Render a failure that escaped the pipeline.
    pub fn render(&self, mut err: HandlerError, ctx: &ErrorContext) -> Response {
        let status = err.status();
        if status.is_server_error() {
            tracing::error!(
                request_id = ctx.request_id.as_deref().unwrap_or("unknown"),
                method = %ctx.method,
                path = %ctx.path,
                status = status.as_u16(),
                error = %err,
                "Request failed"
            );
        } else {
            tracing::warn!(
                request_id = ctx.request_id.as_deref().unwrap_or("unknown"),
                method = %ctx.method,
                path = %ctx.path,
                status = status.as_u16(),
                error = %err,
                "Request rejected"
            );
        }

        if let Some(hook) = &self.on_error {
            if std::panic::catch_unwind(AssertUnwindSafe(|| hook(&err, ctx))).is_err() {
                tracing::error!("Error hook panicked");
            }
        }

        let carried = std::mem::take(&mut err.headers);
        let mut body = json!({
            "message": err.message(),
            "code": err.code(),
        });
        if self.expose_details {
            if let Some(details) = err.details() {
                body["details"] = details.clone();
            }
            if let Some(source) = err.source() {
                body["source"] = Value::String(source.to_string());
            }
        }

        let mut response = if prefers_html(ctx.accept.as_deref()) {
            html_error(status, &body)
        } else {
            json_response(status, &json!({ "error": body }))
        };
        merge_missing(response.headers_mut(), &carried);
        response
    }
}

impl fmt::Debug for ErrorHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorHandler")
            .field("expose_details", &self.expose_details)
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Copy every header of `from` whose name `into` does not have yet.
fn merge_missing(into: &mut HeaderMap, from: &HeaderMap) {
    for name in from.keys() {
        if into.contains_key(name) {
            continue;
        }
        for value in from.get_all(name) {
            into.append(name.clone(), value.clone());
        }
    }
}

fn prefers_html(accept: Option<&str>) -> bool {
    match accept {
        Some(accept) => {
            accept.contains("text/html")
                && !accept.contains("application/json")
                && !accept.contains("*/*")
        }
        None => false,
    }
}

fn html_error(status: StatusCode, body: &Value) -> Response {
    let title = format!("Error {}", status.as_u16());
    let message = body["message"].as_str().unwrap_or_default();
    let mut page = format!(
        "<!doctype html><html><head><meta charset=\"utf-8\"/><title>{}</title></head><body><h1>{}</h1><p>{}</p>",
        title,
        title,
        escape_html(message)
    );
    if let Some(source) = body.get("source").and_then(Value::as_str) {
        page.push_str(&format!("<pre>{}</pre>", escape_html(source)));
    }
    page.push_str("</body></html>");

    let mut response = Response::new(Body::from(page));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    response
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// JSON response with the given status.
pub fn json_response(status: StatusCode, value: &Value) -> Response {
    (status, axum::Json(value.clone())).into_response()
}
