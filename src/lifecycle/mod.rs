//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     explicit port → configured port → default → bind → serve
//!
//! Shutdown (shutdown.rs):
//!     Ctrl+C or trigger() → broadcast → server drains and exits
//! ```
//!
//! # Design Decisions
//! - Registration completes before the listener is bound
//! - Shutdown is a broadcast so several tasks can observe it

pub mod shutdown;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{resolve_port, DEFAULT_PORT};
