//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Registration (bootstrap, or later by the App owner):
//!     RouteSpec / ResourceSpec
//!     → composer.rs (walk nodes, join paths, normalize chains)
//!     → matcher.rs (compile path patterns, method filters)
//!     → pipeline.rs (append route layers)
//!
//! Incoming Request:
//!     → pipeline.rs (scan layers in install order)
//!     → matcher.rs (mount prefix / method + pattern)
//!     → handler chain, `next` continues the scan
//!     → 404 fallback or error stage
//! ```
//!
//! # Design Decisions
//! - A whole spec is validated before its first route is added
//! - First matching layer runs first; there is no priority ordering
//! - Paths are case-sensitive, one trailing slash is ignored

pub mod composer;
pub mod error;
pub mod matcher;
pub mod pipeline;
pub mod redirect;
pub mod resource;

pub use composer::{compose, join_paths, RegisteredRoute, RouteNode, RouteSpec};
pub use error::RouteError;
pub use matcher::{MethodFilter, PathPattern};
pub use pipeline::{LayerId, Pipeline, PipelineLayer};
pub use redirect::{Redirect, RedirectSpec};
pub use resource::{compose_resource, CrudActions, ResourceSpec};
