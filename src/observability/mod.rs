//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → tracing events (registration, config changes, request failures)
//!     → access log events on `routekit::access` (when `logs` is enabled)
//!
//! Consumers:
//!     → logging.rs subscriber (stdout, filtered by RUST_LOG)
//! ```
//!
//! # Design Decisions
//! - Structured fields over formatted strings where a field is useful
//! - Request ID flows through every layer and the error stage

pub mod logging;
