//! Configuration errors raised while registering routes and middleware.

use thiserror::Error;

/// Registration-time failure. Never raised while serving requests.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    /// A node key that is neither a method token nor a sub-path.
    #[error("unsupported method key `{key}` at path `{path}`")]
    UnsupportedMethod { key: String, path: String },

    /// A method key bound to something other than a handler or chain.
    #[error("invalid handler for `{key}` at path `{path}`: expected a handler or a chain of handlers")]
    InvalidHandler { key: String, path: String },

    /// A chain with no handlers.
    #[error("empty handler chain at path `{path}`")]
    EmptyChain { path: String },

    /// A path or pattern that cannot be compiled.
    #[error("invalid path `{path}`: {reason}")]
    InvalidPath { path: String, reason: String },
}
