//! Metrics collection and exposition.

mod collector;
mod server;

pub use collector::{MetricsCollector, SendLabels, SendResult};
pub use server::MetricsServer;
