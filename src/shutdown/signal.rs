//! Revivable shutdown signal with in-flight worker tracking.
//!
//! A [`DeadSignal`] hands out [`DeadChannel`] observers that resolve once
//! shutdown is requested, and counts workers that have announced themselves
//! with [`DeadSignal::started`] so [`DeadSignal::close`] can wait until every
//! one of them has acknowledged with [`DeadSignal::done`].
//!
//! Contract violations (a `done` without a `started`, calling `started` after
//! `close` has begun and expecting to be waited for, reviving while the old
//! generation is still being relied upon) are programmer errors. Only the
//! first is detected, and only so the counter cannot underflow.

use parking_lot::Mutex;
use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Notify, watch};
use tracing::{debug, error, info, warn};

/// Errors returned by bounded shutdown.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShutdownError {
    #[error("{in_flight} worker(s) still in flight after {grace:?}")]
    GracePeriodElapsed { in_flight: usize, grace: Duration },
}

/// Observable state of the current generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalState {
    Open,
    Closed,
}

/// One open/closed lifecycle of the signal.
struct Generation {
    number: u64,
    sender: watch::Sender<bool>,
    closed: bool,
}

impl Generation {
    fn new(number: u64) -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            number,
            sender,
            closed: false,
        }
    }
}

/// Shutdown orchestrator for long running workers.
pub struct DeadSignal {
    generation: Mutex<Generation>,
    in_flight: AtomicUsize,
    drained: Notify,
}

impl DeadSignal {
    /// Create a signal with an open first generation.
    pub fn new() -> Self {
        Self {
            generation: Mutex::new(Generation::new(1)),
            in_flight: AtomicUsize::new(0),
            drained: Notify::new(),
        }
    }

    /// Observer for the current generation.
    ///
    /// The returned channel stays bound to the generation that was current
    /// at call time; fetch a new one after [`revive`](Self::revive).
    pub fn dead_channel(&self) -> DeadChannel {
        let generation = self.generation.lock();
        DeadChannel {
            generation: generation.number,
            receiver: generation.sender.subscribe(),
        }
    }

    /// Announce a worker that must be waited for by `close`.
    ///
    /// Must be paired with exactly one later [`done`](Self::done).
    pub fn started(&self) {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
    }

    /// Acknowledge a prior [`started`](Self::started).
    pub fn done(&self) {
        let previous = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));

        match previous {
            Ok(1) => {
                self.drained.notify_waiters();
            }
            Ok(_) => {}
            Err(_) => {
                error!("dead signal done() called without a matching started()");
            }
        }
    }

    /// Announce a worker and get a guard that acknowledges on drop.
    pub fn enter(self: &Arc<Self>) -> InFlight {
        self.started();
        InFlight {
            signal: Arc::clone(self),
        }
    }

    /// Number of workers between `started` and `done`.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// State of the current generation.
    pub fn state(&self) -> SignalState {
        if self.generation.lock().closed {
            SignalState::Closed
        } else {
            SignalState::Open
        }
    }

    /// Close the current generation and wait for in-flight workers.
    ///
    /// When this returns, every worker that called `started` before the
    /// close began has called `done`. There is no built-in timeout; see
    /// [`close_within`](Self::close_within).
    pub async fn close(&self, reason: &str) {
        if self.shut() {
            info!(reason, in_flight = self.in_flight(), "dead signal closed");
        }
        self.wait_drained().await;
        debug!(reason, "all in-flight workers acknowledged shutdown");
    }

    /// Close the current generation and wait at most `grace` for workers.
    ///
    /// The channel is closed immediately either way, so on timeout this has
    /// the same effect as [`kill`](Self::kill).
    pub async fn close_within(&self, reason: &str, grace: Duration) -> Result<(), ShutdownError> {
        match tokio::time::timeout(grace, self.close(reason)).await {
            Ok(()) => Ok(()),
            Err(_) => {
                let in_flight = self.in_flight();
                warn!(reason, in_flight, grace = ?grace, "shutdown grace period elapsed");
                Err(ShutdownError::GracePeriodElapsed { in_flight, grace })
            }
        }
    }

    /// Close the current generation without waiting for workers.
    ///
    /// Not meant to be combined with `close` on the same generation.
    pub fn kill(&self) {
        if self.shut() {
            info!(in_flight = self.in_flight(), "dead signal killed");
        }
    }

    /// Start a fresh, open generation so the signal can be reused.
    ///
    /// Does not wait for observers of the previous generation; they see it
    /// as closed. The in-flight count carries over.
    pub fn revive(&self) {
        let number = {
            let mut generation = self.generation.lock();
            // Replacing the sender drops the old one, which ends any observer
            // still waiting on a generation that was never closed.
            *generation = Generation::new(generation.number + 1);
            generation.number
        };
        debug!(generation = number, "dead signal revived");
    }

    /// Close the current generation once. Returns whether this call closed it.
    fn shut(&self) -> bool {
        let mut generation = self.generation.lock();
        if generation.closed {
            return false;
        }
        generation.closed = true;
        generation.sender.send_replace(true);
        true
    }

    async fn wait_drained(&self) {
        loop {
            let mut notified = pin!(self.drained.notified());
            // Register before checking so a concurrent final done() is not missed.
            notified.as_mut().enable();
            if self.in_flight.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl Default for DeadSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DeadSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let generation = self.generation.lock();
        f.debug_struct("DeadSignal")
            .field("generation", &generation.number)
            .field("closed", &generation.closed)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

/// Observer of one shutdown generation.
#[derive(Clone, Debug)]
pub struct DeadChannel {
    generation: u64,
    receiver: watch::Receiver<bool>,
}

impl DeadChannel {
    /// Generation this channel belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether shutdown has been requested for this generation.
    pub fn is_closed(&self) -> bool {
        *self.receiver.borrow() || self.receiver.has_changed().is_err()
    }

    /// Resolve once this generation is closed or replaced.
    pub async fn closed(&self) {
        let mut receiver = self.receiver.clone();
        // An Err means the generation was replaced by revive().
        let _ = receiver.wait_for(|dead| *dead).await;
    }
}

/// Channels are equal when they observe the same generation of the same
/// signal.
impl PartialEq for DeadChannel {
    fn eq(&self, other: &Self) -> bool {
        self.generation == other.generation && self.receiver.same_channel(&other.receiver)
    }
}

impl Eq for DeadChannel {}

/// Guard for an in-flight worker. Calls [`DeadSignal::done`] on drop.
#[derive(Debug)]
pub struct InFlight {
    signal: Arc<DeadSignal>,
}

impl InFlight {
    /// The signal this worker is registered with.
    pub fn signal(&self) -> &Arc<DeadSignal> {
        &self.signal
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.signal.done();
    }
}
