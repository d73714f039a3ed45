//! flowguard-daemon library surface.
//!
//! The binary in `main.rs` wires these modules together; they are exposed
//! as a library so integration tests can drive the real API router and
//! processor.

pub mod api;
pub mod cli;
pub mod logging;
pub mod metrics_server;
pub mod processor;
