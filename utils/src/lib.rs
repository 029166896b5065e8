//! Shared utilities for the election coordinator.

pub mod logging;

pub use logging::{init_logging, init_tracing, LogFormat};
