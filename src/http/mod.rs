//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum, tracing, graceful shutdown)
//!     → request.rs (request ID, route params, parsed body)
//!     → [pipeline runs handler.rs middleware in install order]
//!     → response.rs (error stage, JSON/HTML rendering)
//!     → Send to client
//! ```

pub mod handler;
pub mod request;
pub mod response;
pub mod server;

pub use handler::{Handler, HandlerSpec, Middleware, Next, Request};
pub use request::{RequestExt, RequestId, X_REQUEST_ID};
pub use response::{ErrorHandler, HandlerError};
pub use server::HttpServer;
