//! logpump - live log fan-out with coordinated shutdown
//!
//! This crate provides:
//! - A broadcast pump that writes sequential output to a changing set of
//!   live endpoints, usable as a `tracing` sink
//! - A revivable shutdown signal that tracks in-flight workers
//! - A TCP console server feeding connected consumers from the pump
//! - Prometheus metrics for the pump

pub mod config;
pub mod metrics;
pub mod pump;
pub mod server;
pub mod shutdown;
pub mod util;

pub use config::Config;
pub use pump::ConsolePump;
pub use shutdown::DeadSignal;
