//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::response::Response;
use routekit::{App, Handler, HandlerError, RequestExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceExt;

/// Send one request through the app's router in-process.
pub async fn send(app: &App, method: Method, uri: &str, body: Body) -> Response {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .body(body)
        .unwrap();
    app.router().oneshot(req).await.unwrap()
}

pub async fn get(app: &App, uri: &str) -> Response {
    send(app, Method::GET, uri, Body::empty()).await
}

pub async fn body_text(res: Response) -> String {
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json(res: Response) -> (StatusCode, Value) {
    let status = res.status();
    let text = body_text(res).await;
    (status, serde_json::from_str(&text).unwrap())
}

/// Endpoint answering with a fixed text body.
pub fn text(body: &'static str) -> Handler {
    Handler::endpoint(move |_req| async move { Ok::<_, HandlerError>(body) })
}

/// Endpoint echoing what the body parsers left on the request.
pub fn echo_body() -> Handler {
    Handler::endpoint(|req| async move {
        let parsed = req.parsed_body().cloned();
        Ok::<_, HandlerError>(axum::Json(json!({ "parsed": parsed })))
    })
}

/// Serve the app on an ephemeral port. Returns the address and a sender
/// that stops the server.
pub async fn spawn_server(app: &App) -> (SocketAddr, broadcast::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = broadcast::channel(1);
    let server = routekit::HttpServer::new(app.pipeline().clone());
    tokio::spawn(server.run(listener, rx));
    (addr, tx)
}
