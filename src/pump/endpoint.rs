//! Endpoints that a [`ConsolePump`](super::ConsolePump) fans out to.

use super::PreparedMessage;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Counter for endpoint IDs. Starts at 1 so 0 is never handed out.
static ENDPOINT_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Messages a [`ChannelEndpoint`] queues before it detaches its consumer.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Errors an endpoint can report for a single send.
#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("endpoint is closed")]
    Closed,

    #[error("endpoint queue is full")]
    Lagged,

    #[error("endpoint I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Process-unique handle for a registered endpoint.
///
/// IDs are strictly increasing and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId(u64);

impl EndpointId {
    /// Draw the next ID.
    pub(crate) fn next() -> Self {
        Self(ENDPOINT_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ep-{}", self.0)
    }
}

/// A sendable connection owned outside the pump.
///
/// The pump serializes calls to `send` per endpoint, so implementations
/// need not guard against concurrent sends to themselves. `send` runs while
/// the pump's registry is read-locked: it must not register or deregister
/// endpoints on the same pump, and it must not emit log events if the pump
/// is installed as a log sink.
pub trait Endpoint: Send + Sync {
    /// Deliver one message.
    fn send(&self, message: &PreparedMessage) -> Result<(), EndpointError>;
}

/// Endpoint that hands messages to the task owning the real connection.
///
/// Sending never blocks. The queue is bounded: once a consumer falls
/// [`DEFAULT_QUEUE_CAPACITY`] (or the capacity given to
/// [`bounded`](Self::bounded)) messages behind, the send fails with
/// [`EndpointError::Lagged`] and the endpoint drops its sender. The
/// receiver then yields what was already queued followed by `None`, which
/// tells the connection task to disconnect and deregister.
#[derive(Debug)]
pub struct ChannelEndpoint {
    sender: Mutex<Option<mpsc::Sender<PreparedMessage>>>,
}

impl ChannelEndpoint {
    /// Create an endpoint with the default queue capacity and the receiver
    /// its connection task drains.
    pub fn channel() -> (Self, mpsc::Receiver<PreparedMessage>) {
        Self::bounded(DEFAULT_QUEUE_CAPACITY)
    }

    /// Create an endpoint that queues at most `capacity` messages.
    ///
    /// A capacity of zero is treated as one.
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<PreparedMessage>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let endpoint = Self {
            sender: Mutex::new(Some(sender)),
        };
        (endpoint, receiver)
    }

    /// Whether the endpoint has given up on its consumer.
    pub fn is_detached(&self) -> bool {
        self.sender.lock().is_none()
    }
}

impl Endpoint for ChannelEndpoint {
    fn send(&self, message: &PreparedMessage) -> Result<(), EndpointError> {
        let mut sender = self.sender.lock();
        let Some(queue) = sender.as_ref() else {
            return Err(EndpointError::Closed);
        };

        match queue.try_send(message.clone()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                *sender = None;
                Err(EndpointError::Lagged)
            }
            Err(TrySendError::Closed(_)) => {
                *sender = None;
                Err(EndpointError::Closed)
            }
        }
    }
}
