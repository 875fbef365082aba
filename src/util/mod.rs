//! Utility functions and helpers.

mod logging;
mod ttl_cache;

pub use logging::{ConsoleLayer, console_layer, init_logging};
pub use ttl_cache::TtlCache;
