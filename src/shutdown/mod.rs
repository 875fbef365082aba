//! Coordinated shutdown of background workers.

mod signal;

pub use signal::{DeadChannel, DeadSignal, InFlight, ShutdownError, SignalState};
