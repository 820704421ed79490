//! Middleware lifecycle management and the built-in middleware providers.
//!
//! # Data Flow
//! ```text
//! ConfigPatch ──▶ merger ──▶ ProviderSet::build ──▶ Handler
//!                                                     │
//!                   MiddlewareRegistry::install ◀─────┘
//!                                │
//!                                ▼
//!                         Pipeline (live layers)
//! ```
//!
//! # Design Decisions
//! - The registry is a plain value owned by one `App`, never a global
//! - Providers are a trait seam; a missing provider downgrades to a warning

pub mod body_parser;
pub mod logger;
pub mod providers;
pub mod registry;
pub mod security;
pub mod static_files;

pub use providers::{Feature, MiddlewareProvider, ProviderError, ProviderSet};
pub use registry::{MiddlewareRegistry, RegistryEntry};
