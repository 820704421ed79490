//! Declarative routing and middleware composition on Tokio and Axum.
//!
//! An [`App`] owns one request pipeline. Routes are described as nested
//! specifications and registered in order; middleware is installed under
//! stable keys so later configuration can replace or remove it; a
//! configuration patch toggles the common middleware set in a fixed order.

pub mod app;
pub mod config;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod middleware;
pub mod observability;
pub mod routing;

pub use app::App;
pub use config::{ConfigError, ConfigPatch, ConfigSnapshot};
pub use health::{HealthInclude, HealthOptions, Readiness};
pub use http::{ErrorHandler, Handler, HandlerError, HandlerSpec, HttpServer, Next, RequestExt};
pub use lifecycle::Shutdown;
pub use middleware::{Feature, MiddlewareRegistry, ProviderError, ProviderSet};
pub use routing::{
    CrudActions, MethodFilter, Pipeline, Redirect, RedirectSpec, ResourceSpec, RouteError,
    RouteNode, RouteSpec,
};
