//! Static file serving on top of `tower_http::services::ServeDir`.

use std::path::PathBuf;

use axum::body::Body;
use axum::http::{Method, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tower::ServiceExt;
use tower_http::services::ServeDir;

use crate::http::handler::{BoxFuture, Handler, HandlerResult, Middleware, Next, Request};
use crate::http::request::MountedAt;
use crate::http::response::HandlerError;
use crate::middleware::providers::{Feature, ProviderError};
use crate::routing::matcher::MountMatcher;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StaticOptions {
    dir: PathBuf,
}

/// Static directory provider. Expects `{ "dir": <absolute path> }`.
pub fn serve_static(options: &Value) -> Result<Handler, ProviderError> {
    let opts: StaticOptions = serde_json::from_value(options.clone())
        .map_err(|e| ProviderError::invalid(Feature::Static, e))?;
    if !opts.dir.is_dir() {
        tracing::warn!(dir = %opts.dir.display(), "Static directory not found; requests will fall through");
    }
    let name = format!("static:{}", opts.dir.display());
    Ok(Handler::new(StaticFiles {
        service: ServeDir::new(&opts.dir),
    })
    .named(name))
}

struct StaticFiles {
    service: ServeDir,
}

impl Middleware for StaticFiles {
    fn call(&self, req: Request, next: Next) -> BoxFuture<HandlerResult> {
        let service = self.service.clone();
        Box::pin(async move {
            if req.method() != Method::GET && req.method() != Method::HEAD {
                return next.run(req).await;
            }

            let path = req.uri().path();
            let relative = match req.extensions().get::<MountedAt>() {
                Some(MountedAt(mount)) => MountMatcher::new(mount).strip(path).to_string(),
                None => path.to_string(),
            };
            let uri = match req.uri().query() {
                Some(query) => format!("{}?{}", relative, query),
                None => relative,
            };

            let mut lookup = Request::builder().method(req.method().clone()).uri(uri);
            if let Some(headers) = lookup.headers_mut() {
                headers.extend(req.headers().clone());
            }
            let lookup = lookup.body(Body::empty()).map_err(HandlerError::from)?;

            let response = match service.oneshot(lookup).await {
                Ok(response) => response,
                Err(never) => match never {},
            };
            if response.status() == StatusCode::NOT_FOUND {
                return next.run(req).await;
            }
            Ok(response.map(Body::new))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::response::HandlerError;
    use serde_json::json;

    fn fallback() -> Next {
        let miss = Handler::endpoint(|_req| async move {
            Ok::<_, HandlerError>((StatusCode::IM_A_TEAPOT, "fallthrough"))
        });
        Next::chain(vec![miss].into(), Next::end())
    }

    fn temp_site() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("routekit-static-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("hello.txt"), "hello world").unwrap();
        dir
    }

    async fn get(handler: &Handler, uri: &str, mount: Option<&str>) -> (StatusCode, String) {
        let mut req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        if let Some(mount) = mount {
            req.extensions_mut().insert(MountedAt(mount.to_string()));
        }
        let res = handler.invoke(req, fallback()).await.unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    #[tokio::test]
    async fn test_serves_existing_file() {
        let dir = temp_site();
        let handler = serve_static(&json!({ "dir": dir })).unwrap();
        let (status, body) = get(&handler, "/hello.txt", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "hello world");
        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn test_mount_prefix_is_stripped() {
        let dir = temp_site();
        let handler = serve_static(&json!({ "dir": dir })).unwrap();
        let (status, body) = get(&handler, "/assets/hello.txt", Some("/assets")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "hello world");
        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn test_missing_file_falls_through() {
        let dir = temp_site();
        let handler = serve_static(&json!({ "dir": dir })).unwrap();
        let (status, body) = get(&handler, "/nope.txt", None).await;
        assert_eq!(status, StatusCode::IM_A_TEAPOT);
        assert_eq!(body, "fallthrough");
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_requires_dir() {
        assert!(serve_static(&json!({})).is_err());
    }
}
