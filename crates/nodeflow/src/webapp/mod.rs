//! HTTP API for starting programs, answering their inputs and reading their
//! message ledgers.
//!
//! The API is disabled by default and can be enabled via environment variables:
//! - `NODEFLOW_WEBAPP_ENABLED`: Set to "true" or "1" to enable
//! - `NODEFLOW_WEBAPP_ADDR`: Address to bind to (default: 0.0.0.0:24219)

mod server;
mod types;

pub use server::WebappServer;
pub use types::*;
