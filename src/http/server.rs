//! HTTP server setup.
//!
//! # Responsibilities
//! - Mount the live pipeline as the single Axum fallback service
//! - Wire up HTTP tracing
//! - Bind to a listener and serve until shutdown
//!
//! # Design Decisions
//! - Axum only carries connections; every routing decision is the pipeline's,
//!   so layers can be inspected and removed at runtime
//! - The pipeline is shared through `Arc`, edits made after the server starts
//!   are visible to the next request

use std::sync::Arc;

use axum::{extract::State, response::Response, Router};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

use crate::http::handler::Request;
use crate::routing::pipeline::Pipeline;

/// HTTP server around one application pipeline.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            router: Self::build_router(pipeline),
        }
    }

    fn build_router(pipeline: Arc<Pipeline>) -> Router {
        Router::new()
            .fallback(dispatch)
            .with_state(pipeline)
            .layer(TraceLayer::new_for_http())
    }

    /// The Axum router, for in-process use (tests, embedding).
    pub fn into_router(self) -> Router {
        self.router
    }

    /// Serve on `listener` until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn dispatch(State(pipeline): State<Arc<Pipeline>>, request: Request) -> Response {
    pipeline.dispatch(request).await
}
