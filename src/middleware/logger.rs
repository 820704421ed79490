//! Request access logging.
//!
//! One `tracing` event per request on the `routekit::access` target, shaped
//! by the selected format.

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use axum::http::{header, HeaderMap, Version};
use serde::Deserialize;
use serde_json::Value;

use crate::http::handler::{BoxFuture, Handler, HandlerResult, Middleware, Next, Request};
use crate::http::request::RequestExt;
use crate::middleware::providers::{Feature, ProviderError};

/// Access log layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Dev,
    Combined,
    Common,
    Short,
    Tiny,
}

impl FromStr for LogFormat {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dev" => Ok(LogFormat::Dev),
            "combined" => Ok(LogFormat::Combined),
            "common" => Ok(LogFormat::Common),
            "short" => Ok(LogFormat::Short),
            "tiny" => Ok(LogFormat::Tiny),
            _ => Err(ProviderError::Unavailable(format!("{} format `{}`", Feature::Logger, s))),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogFormat::Dev => "dev",
            LogFormat::Combined => "combined",
            LogFormat::Common => "common",
            LogFormat::Short => "short",
            LogFormat::Tiny => "tiny",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct LoggerOptions {
    format: Option<String>,
}

/// Request logger provider. Accepts `{ "format": <name> }`.
pub fn request_logger(options: &Value) -> Result<Handler, ProviderError> {
    let opts: LoggerOptions = if options.is_null() {
        LoggerOptions::default()
    } else {
        serde_json::from_value(options.clone())
            .map_err(|e| ProviderError::invalid(Feature::Logger, e))?
    };
    let format = match opts.format {
        Some(name) => name.parse()?,
        None => LogFormat::default(),
    };
    Ok(Handler::new(RequestLogger { format }).named(format!("logger:{}", format)))
}

struct RequestLogger {
    format: LogFormat,
}

struct RequestLine {
    method: String,
    url: String,
    version: &'static str,
    request_id: String,
    referrer: String,
    user_agent: String,
}

impl Middleware for RequestLogger {
    fn call(&self, req: Request, next: Next) -> BoxFuture<HandlerResult> {
        let format = self.format;
        let line = RequestLine {
            method: req.method().to_string(),
            url: req
                .uri()
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_else(|| "/".to_string()),
            version: http_version(req.version()),
            request_id: req.request_id().map(|id| id.to_string()).unwrap_or_default(),
            referrer: header_or_dash(req.headers(), header::REFERER),
            user_agent: header_or_dash(req.headers(), header::USER_AGENT),
        };
        let start = Instant::now();

        Box::pin(async move {
            let result = next.run(req).await;
            let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
            let (status, length) = match &result {
                Ok(res) => (
                    res.status().as_u16(),
                    header_or_dash(res.headers(), header::CONTENT_LENGTH),
                ),
                Err(err) => (err.status().as_u16(), "-".to_string()),
            };
            emit(format, &line, status, &length, elapsed_ms);
            result
        })
    }
}

fn emit(format: LogFormat, line: &RequestLine, status: u16, length: &str, elapsed_ms: f64) {
    match format {
        LogFormat::Dev => tracing::info!(
            target: "routekit::access",
            "{} {} {} {:.3} ms - {}",
            line.method, line.url, status, elapsed_ms, length
        ),
        LogFormat::Tiny => tracing::info!(
            target: "routekit::access",
            "{} {} {} {} - {:.3} ms",
            line.method, line.url, status, length, elapsed_ms
        ),
        LogFormat::Short => tracing::info!(
            target: "routekit::access",
            request_id = %line.request_id,
            "{} {} HTTP/{} {} {} - {:.3} ms",
            line.method, line.url, line.version, status, length, elapsed_ms
        ),
        LogFormat::Common => tracing::info!(
            target: "routekit::access",
            request_id = %line.request_id,
            "\"{} {} HTTP/{}\" {} {}",
            line.method, line.url, line.version, status, length
        ),
        LogFormat::Combined => tracing::info!(
            target: "routekit::access",
            request_id = %line.request_id,
            "\"{} {} HTTP/{}\" {} {} \"{}\" \"{}\"",
            line.method, line.url, line.version, status, length, line.referrer, line.user_agent
        ),
    }
}

fn http_version(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "0.9",
        Version::HTTP_10 => "1.0",
        Version::HTTP_2 => "2.0",
        Version::HTTP_3 => "3.0",
        _ => "1.1",
    }
}

fn header_or_dash(headers: &HeaderMap, name: header::HeaderName) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::response::HandlerError;
    use axum::body::Body;
    use axum::http::StatusCode;
    use serde_json::json;

    #[test]
    fn test_format_parsing() {
        assert_eq!("COMBINED".parse::<LogFormat>().unwrap(), LogFormat::Combined);
        assert!(matches!(
            "fancy".parse::<LogFormat>(),
            Err(ProviderError::Unavailable(_))
        ));
    }

    #[test]
    fn test_unknown_format_is_unavailable() {
        let err = request_logger(&json!({"format": "fancy"})).unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(_)));
        assert!(request_logger(&Value::Null).is_ok());
    }

    #[tokio::test]
    async fn test_logger_passes_result_through() {
        let logger = request_logger(&json!({"format": "tiny"})).unwrap();
        let failing = Handler::endpoint(|_req| async move {
            Err::<&'static str, _>(HandlerError::new(StatusCode::CONFLICT, "taken"))
        });
        let next = Next::chain(vec![failing].into(), Next::end());
        let req = Request::builder().uri("/x").body(Body::empty()).unwrap();
        let err = logger.invoke(req, next).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }
}
