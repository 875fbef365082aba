//! Console server for live log consumers.

mod listener;

pub use listener::{ConsoleListener, Disconnect};
