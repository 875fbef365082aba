//! Fan-out of written bytes to every registered endpoint.
//!
//! Locking is two-level: the registry is behind a reader/writer lock, and
//! each endpoint slot carries its own mutex. Writers share the registry
//! lock and serialize per endpoint; registration changes take the registry
//! lock exclusively. Lock order is always registry, then slot.

use super::{Endpoint, EndpointId, MessageKind, PreparedMessage, PumpError};
use crate::metrics::MetricsCollector;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::fmt::MakeWriter;

/// Broadcasts sequential output to a changing set of live endpoints.
///
/// Cloning yields another handle to the same registry.
#[derive(Clone)]
pub struct ConsolePump {
    inner: Arc<PumpInner>,
}

struct PumpInner {
    /// Frame type for every message.
    kind: MessageKind,
    /// Registered endpoints, each with its own send lock.
    slots: RwLock<HashMap<EndpointId, Slot>>,
    /// Optional metrics sink.
    metrics: Option<MetricsCollector>,
}

/// An endpoint and the lock serializing sends to it.
///
/// Keeping both in one entry means they are inserted and removed together.
struct Slot {
    endpoint: Arc<dyn Endpoint>,
    send_lock: Mutex<()>,
}

/// Result of fanning one message out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanOut {
    /// Endpoints that accepted the message.
    pub delivered: usize,
    /// Endpoints whose send failed. The pump keeps them registered.
    pub failed: Vec<EndpointId>,
}

impl FanOut {
    /// Number of endpoints the message was offered to.
    pub fn attempted(&self) -> usize {
        self.delivered + self.failed.len()
    }
}

impl ConsolePump {
    /// Create a pump framing every write as `kind`.
    pub fn new(kind: MessageKind) -> Self {
        Self::build(kind, None)
    }

    /// Create a pump that reports to `metrics`.
    pub fn with_metrics(kind: MessageKind, metrics: MetricsCollector) -> Self {
        Self::build(kind, Some(metrics))
    }

    fn build(kind: MessageKind, metrics: Option<MetricsCollector>) -> Self {
        Self {
            inner: Arc::new(PumpInner {
                kind,
                slots: RwLock::new(HashMap::new()),
                metrics,
            }),
        }
    }

    /// Frame type used for writes.
    pub fn kind(&self) -> MessageKind {
        self.inner.kind
    }

    /// Add an already established endpoint and return its handle.
    pub fn register(&self, endpoint: Arc<dyn Endpoint>) -> EndpointId {
        let id = EndpointId::next();
        let mut slots = self.inner.slots.write();
        slots.insert(
            id,
            Slot {
                endpoint,
                send_lock: Mutex::new(()),
            },
        );
        self.report_endpoints(slots.len());
        id
    }

    /// Remove an endpoint. Returns whether it was registered.
    ///
    /// The endpoint itself is left untouched; closing it is up to its owner.
    pub fn deregister(&self, id: EndpointId) -> bool {
        let mut slots = self.inner.slots.write();
        let found = slots.remove(&id).is_some();
        self.report_endpoints(slots.len());
        found
    }

    /// Whether `id` is currently registered.
    pub fn contains(&self, id: EndpointId) -> bool {
        self.inner.slots.read().contains_key(&id)
    }

    /// IDs of the registered endpoints, oldest first.
    pub fn ids(&self) -> Vec<EndpointId> {
        let mut ids: Vec<EndpointId> = self.inner.slots.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Number of registered endpoints.
    pub fn len(&self) -> usize {
        self.inner.slots.read().len()
    }

    /// Whether no endpoints are registered.
    pub fn is_empty(&self) -> bool {
        self.inner.slots.read().is_empty()
    }

    /// Frame `payload` once and send it to every registered endpoint.
    ///
    /// Only framing can fail. Endpoint send failures are collected in the
    /// returned [`FanOut`] and never stop delivery to the others.
    pub fn broadcast(&self, payload: &[u8]) -> Result<FanOut, PumpError> {
        let message = match PreparedMessage::prepare(self.inner.kind, payload) {
            Ok(message) => message,
            Err(e) => {
                if let Some(metrics) = &self.inner.metrics {
                    metrics.record_rejected_write();
                }
                return Err(e);
            }
        };
        Ok(self.send_prepared(&message))
    }

    /// Send an already framed message to every registered endpoint.
    pub fn send_prepared(&self, message: &PreparedMessage) -> FanOut {
        let start = Instant::now();
        let mut fan_out = FanOut::default();

        {
            let slots = self.inner.slots.read();
            for (id, slot) in slots.iter() {
                let _serial = slot.send_lock.lock();
                match slot.endpoint.send(message) {
                    Ok(()) => fan_out.delivered += 1,
                    Err(_) => fan_out.failed.push(*id),
                }
            }
        }

        if let Some(metrics) = &self.inner.metrics {
            metrics.record_broadcast(
                message.len(),
                fan_out.delivered,
                fan_out.failed.len(),
                start.elapsed(),
            );
        }

        fan_out
    }

    fn report_endpoints(&self, count: usize) {
        if let Some(metrics) = &self.inner.metrics {
            metrics.set_endpoints(count);
        }
    }
}

impl Default for ConsolePump {
    fn default() -> Self {
        Self::new(MessageKind::default())
    }
}

impl std::fmt::Debug for ConsolePump {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsolePump")
            .field("kind", &self.inner.kind)
            .field("endpoints", &self.len())
            .finish()
    }
}

// Writing never reports endpoint failures: the whole payload is always
// consumed unless it cannot be framed.
impl io::Write for &ConsolePump {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.broadcast(buf)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Write for ConsolePump {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::Write::write(&mut &*self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for ConsolePump {
    type Writer = &'a ConsolePump;

    fn make_writer(&'a self) -> Self::Writer {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pump::EndpointError;
    use std::io::Write;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Records every message it receives.
    #[derive(Default)]
    struct Recorder {
        received: Mutex<Vec<PreparedMessage>>,
        broken: AtomicBool,
    }

    impl Recorder {
        fn texts(&self) -> Vec<String> {
            self.received
                .lock()
                .iter()
                .map(|m| m.as_text().unwrap_or_default().to_string())
                .collect()
        }
    }

    impl Endpoint for Recorder {
        fn send(&self, message: &PreparedMessage) -> Result<(), EndpointError> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(EndpointError::Closed);
            }
            self.received.lock().push(message.clone());
            Ok(())
        }
    }

    #[test]
    fn test_register_and_deregister() {
        let pump = ConsolePump::default();
        assert!(pump.is_empty());

        let id = pump.register(Arc::new(Recorder::default()));
        assert!(pump.contains(id));
        assert_eq!(pump.len(), 1);

        assert!(pump.deregister(id));
        assert!(!pump.contains(id));
        assert!(pump.is_empty());
    }

    #[test]
    fn test_ids_are_unique() {
        let pump = ConsolePump::default();
        let a = pump.register(Arc::new(Recorder::default()));
        let b = pump.register(Arc::new(Recorder::default()));
        assert!(b > a);
        assert_eq!(pump.ids(), vec![a, b]);

        pump.deregister(a);
        assert_eq!(pump.ids(), vec![b]);
    }

    #[test]
    fn test_deregister_unknown_id() {
        let pump = ConsolePump::default();
        let recorder = Arc::new(Recorder::default());
        let id = pump.register(recorder.clone());
        let other = ConsolePump::default().register(Arc::new(Recorder::default()));

        assert!(!pump.deregister(other));
        assert!(pump.contains(id));

        pump.broadcast(b"still here").unwrap();
        assert_eq!(recorder.texts(), vec!["still here"]);
    }

    #[test]
    fn test_double_deregister() {
        let pump = ConsolePump::default();
        let id = pump.register(Arc::new(Recorder::default()));
        assert!(pump.deregister(id));
        assert!(!pump.deregister(id));
    }

    #[test]
    fn test_broadcast_reaches_all() {
        let pump = ConsolePump::default();
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());
        pump.register(a.clone());
        pump.register(b.clone());

        let fan_out = pump.broadcast(b"hello").unwrap();

        assert_eq!(fan_out.delivered, 2);
        assert!(fan_out.failed.is_empty());
        assert_eq!(a.texts(), vec!["hello"]);
        assert_eq!(b.texts(), vec!["hello"]);
    }

    #[test]
    fn test_deregistered_endpoint_not_reached() {
        let pump = ConsolePump::default();
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());
        let id_a = pump.register(a.clone());
        pump.register(b.clone());

        pump.deregister(id_a);
        let fan_out = pump.broadcast(b"after").unwrap();

        assert_eq!(fan_out.attempted(), 1);
        assert!(a.texts().is_empty());
        assert_eq!(b.texts(), vec!["after"]);
    }

    #[test]
    fn test_failed_endpoint_does_not_stop_others() {
        let pump = ConsolePump::default();
        let broken = Arc::new(Recorder::default());
        broken.broken.store(true, Ordering::SeqCst);
        let healthy = Arc::new(Recorder::default());
        let broken_id = pump.register(broken.clone());
        pump.register(healthy.clone());

        let fan_out = pump.broadcast(b"line").unwrap();

        assert_eq!(fan_out.delivered, 1);
        assert_eq!(fan_out.failed, vec![broken_id]);
        assert_eq!(healthy.texts(), vec!["line"]);
        // Failing endpoints stay registered until their owner removes them.
        assert!(pump.contains(broken_id));
    }

    #[test]
    fn test_broadcast_with_no_endpoints() {
        let pump = ConsolePump::default();
        let fan_out = pump.broadcast(b"nobody listening").unwrap();
        assert_eq!(fan_out, FanOut::default());
    }

    #[test]
    fn test_invalid_text_rejected() {
        let pump = ConsolePump::new(MessageKind::Text);
        let recorder = Arc::new(Recorder::default());
        pump.register(recorder.clone());

        assert!(pump.broadcast(&[0xc3, 0x28]).is_err());
        assert!(recorder.received.lock().is_empty());
    }

    #[test]
    fn test_io_write_consumes_everything() {
        let mut pump = ConsolePump::default();
        let broken = Arc::new(Recorder::default());
        broken.broken.store(true, Ordering::SeqCst);
        pump.register(broken);

        let written = pump.write(b"fire and forget").unwrap();
        assert_eq!(written, 15);
    }

    #[test]
    fn test_io_write_reports_framing_error() {
        let mut pump = ConsolePump::new(MessageKind::Text);
        let err = pump.write(&[0xff]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_metrics_follow_registry() {
        let metrics = MetricsCollector::new();
        let pump = ConsolePump::with_metrics(MessageKind::Text, metrics.clone());

        let id = pump.register(Arc::new(Recorder::default()));
        pump.register(Arc::new(Recorder::default()));
        assert_eq!(metrics.endpoints(), 2);

        pump.broadcast(b"x").unwrap();
        assert_eq!(metrics.writes(), 1);

        pump.deregister(id);
        assert_eq!(metrics.endpoints(), 1);
    }

    #[test]
    fn test_concurrent_writes_do_not_interleave() {
        let pump = ConsolePump::default();
        let recorder = Arc::new(Recorder::default());
        pump.register(recorder.clone());

        let handles: Vec<_> = ["hello", "world"]
            .into_iter()
            .map(|word| {
                let pump = pump.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        pump.broadcast(word.as_bytes()).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let texts = recorder.texts();
        assert_eq!(texts.len(), 200);
        assert!(texts.iter().all(|t| t == "hello" || t == "world"));
        assert_eq!(texts.iter().filter(|t| *t == "hello").count(), 100);
    }

    #[test]
    fn test_sequential_writes_keep_order() {
        let pump = ConsolePump::default();
        let recorder = Arc::new(Recorder::default());
        pump.register(recorder.clone());

        for i in 0..50 {
            pump.broadcast(format!("{i}").as_bytes()).unwrap();
        }

        let expected: Vec<String> = (0..50).map(|i| i.to_string()).collect();
        assert_eq!(recorder.texts(), expected);
    }
}
