//! Broadcast of sequential output to live endpoints.

mod console;
mod endpoint;
mod message;

pub use console::{ConsolePump, FanOut};
pub use endpoint::{ChannelEndpoint, DEFAULT_QUEUE_CAPACITY, Endpoint, EndpointError, EndpointId};
pub use message::{MessageKind, PreparedMessage, PumpError};
