//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML) or builder
//!     → loader.rs (parse into ConfigPatch)
//!     → merger.rs (validate every recognized option)
//!     → registry install/remove, view settings
//!     → merged ConfigSnapshot stored on the App
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads the new patch
//!     → patch sent to the App owner, applied serially
//! ```
//!
//! # Design Decisions
//! - A patch that fails validation has no effect at all
//! - Unknown options are kept, never rejected
//! - Missing middleware providers are warnings, not errors

pub mod loader;
pub mod merger;
pub mod schema;
pub mod watcher;

pub use loader::{load_patch, ConfigError};
pub use merger::apply_config;
pub use schema::{ConfigPatch, ConfigSnapshot};
