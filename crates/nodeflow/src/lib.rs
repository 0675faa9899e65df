//! Nodeflow - durable interpreter for tree-shaped visual programs.

pub mod client;
pub mod config;
pub mod runloop;
pub mod runner;
pub mod webapp;

pub use client::{ClientError, ProgramClient};
pub use config::RuntimeConfig;
pub use runloop::{RunLoop, RunLoopError, RunLoopSupervisorConfig, runloop_supervisor};
pub use webapp::{WebappConfig, WebappServer};

pub use nodeflow_backend_memory::MemoryBackend;
pub use nodeflow_core_backend::{BackendError, CoreBackend};
