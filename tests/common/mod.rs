//! Scripted platform driver for exercising the bridges without an OS
//! discovery stack.

#![allow(dead_code)]

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dnssd_streams::{
    AcceptEvent, BrowseEvent, DiscoveryDriver, DiscoveryError, ErrorInfo, EventSink, MetadataEvent,
    NetworkEntity, OperationHandle, RawByteStream, RawStreamPair, ResolveEvent, StreamEvent,
};

/// One operation the mock has been asked to start: its event sink plus a
/// flag flipped when the bridge stops it.
pub struct MockOp<E> {
    pub sink: EventSink<E>,
    pub stopped: Arc<AtomicBool>,
    pub target: String,
}

impl<E> Clone for MockOp<E> {
    fn clone(&self) -> Self {
        Self {
            sink: self.sink.clone(),
            stopped: Arc::clone(&self.stopped),
            target: self.target.clone(),
        }
    }
}

impl<E> MockOp<E> {
    pub fn send(&self, event: E) {
        let _ = self.sink.send(event);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

fn record<E>(ops: &Mutex<Vec<MockOp<E>>>, target: String, sink: EventSink<E>) -> OperationHandle {
    let stopped = Arc::new(AtomicBool::new(false));
    ops.lock().unwrap().push(MockOp {
        sink,
        stopped: Arc::clone(&stopped),
        target,
    });
    OperationHandle::new(move || stopped.store(true, Ordering::SeqCst))
}

/// Scripted [`DiscoveryDriver`]: records every started operation and lets
/// the test deliver platform notifications by hand.
#[derive(Default)]
pub struct MockDriver {
    browses: Mutex<Vec<MockOp<BrowseEvent>>>,
    resolves: Mutex<Vec<MockOp<ResolveEvent>>>,
    monitors: Mutex<Vec<MockOp<MetadataEvent>>>,
    publishes: Mutex<Vec<MockOp<AcceptEvent>>>,
    streams: Mutex<Option<RawStreamPair>>,
    resolve_fail_once: AtomicBool,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn browse_count(&self) -> usize {
        self.browses.lock().unwrap().len()
    }

    pub fn resolve_count(&self) -> usize {
        self.resolves.lock().unwrap().len()
    }

    pub fn monitor_count(&self) -> usize {
        self.monitors.lock().unwrap().len()
    }

    pub fn publish_count(&self) -> usize {
        self.publishes.lock().unwrap().len()
    }

    pub fn browse_op(&self, index: usize) -> MockOp<BrowseEvent> {
        self.browses.lock().unwrap()[index].clone()
    }

    pub fn resolve_op(&self, index: usize) -> MockOp<ResolveEvent> {
        self.resolves.lock().unwrap()[index].clone()
    }

    pub fn monitor_op(&self, index: usize) -> MockOp<MetadataEvent> {
        self.monitors.lock().unwrap()[index].clone()
    }

    pub fn publish_op(&self, index: usize) -> MockOp<AcceptEvent> {
        self.publishes.lock().unwrap()[index].clone()
    }

    /// Make the next `start_resolve` call fail before recording an
    /// operation, as a driver does when the platform refuses to start.
    pub fn fail_next_resolve(&self) {
        self.resolve_fail_once.store(true, Ordering::SeqCst);
    }

    /// Drop every recorded monitor sink, simulating a driver that goes
    /// away without a terminal notification.
    pub fn close_monitor_ops(&self) {
        self.monitors.lock().unwrap().clear();
    }

    /// Same as [`close_monitor_ops`](Self::close_monitor_ops) for
    /// published listeners.
    pub fn close_publish_ops(&self) {
        self.publishes.lock().unwrap().clear();
    }

    /// Stream pair the next `open_streams` call hands out.
    pub fn set_stream_pair(&self, read: MockByteStream, write: MockByteStream) {
        *self.streams.lock().unwrap() = Some(RawStreamPair {
            read: Some(Box::new(read)),
            write: Some(Box::new(write)),
        });
    }
}

impl DiscoveryDriver for MockDriver {
    fn start_browse(
        &self,
        service_type: &str,
        domain: &str,
        events: EventSink<BrowseEvent>,
    ) -> Result<OperationHandle, DiscoveryError> {
        Ok(record(
            &self.browses,
            format!("{service_type}.{domain}"),
            events,
        ))
    }

    fn start_resolve(
        &self,
        entity: &NetworkEntity,
        _timeout: Duration,
        events: EventSink<ResolveEvent>,
    ) -> Result<OperationHandle, DiscoveryError> {
        if self.resolve_fail_once.swap(false, Ordering::SeqCst) {
            return Err(DiscoveryError::Resolution(ErrorInfo::new("dnssd", -72004)));
        }
        Ok(record(&self.resolves, entity.name().to_owned(), events))
    }

    fn start_metadata_monitor(
        &self,
        entity: &NetworkEntity,
        events: EventSink<MetadataEvent>,
    ) -> Result<OperationHandle, DiscoveryError> {
        Ok(record(&self.monitors, entity.name().to_owned(), events))
    }

    fn publish(
        &self,
        entity: &NetworkEntity,
        events: EventSink<AcceptEvent>,
    ) -> Result<OperationHandle, DiscoveryError> {
        Ok(record(&self.publishes, entity.name().to_owned(), events))
    }

    fn open_streams(&self, _entity: &NetworkEntity) -> Result<RawStreamPair, DiscoveryError> {
        Ok(self
            .streams
            .lock()
            .unwrap()
            .take()
            .unwrap_or(RawStreamPair {
                read: None,
                write: None,
            }))
    }
}

struct MockStreamState {
    data: Arc<Mutex<Vec<u8>>>,
    sink: Mutex<Option<EventSink<StreamEvent>>>,
    opens: AtomicUsize,
    closed: AtomicBool,
}

/// In-memory platform stream half. Halves built by [`MockByteStream::pipe`]
/// share one buffer: writes on one side become reads on the other.
#[derive(Clone)]
pub struct MockByteStream {
    inner: Arc<MockStreamState>,
}

impl MockByteStream {
    pub fn new() -> Self {
        Self::with_buffer(Arc::new(Mutex::new(Vec::new())))
    }

    /// Bound pair sharing a buffer, read half first.
    pub fn pipe() -> (Self, Self) {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        (
            Self::with_buffer(Arc::clone(&buffer)),
            Self::with_buffer(buffer),
        )
    }

    fn with_buffer(data: Arc<Mutex<Vec<u8>>>) -> Self {
        Self {
            inner: Arc::new(MockStreamState {
                data,
                sink: Mutex::new(None),
                opens: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Deliver a delegate event to whoever opened this stream.
    pub fn push(&self, event: StreamEvent) {
        if let Some(sink) = &*self.inner.sink.lock().unwrap() {
            let _ = sink.send(event);
        }
    }

    pub fn open_count(&self) -> usize {
        self.inner.opens.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl RawByteStream for MockByteStream {
    fn open(&self, events: EventSink<StreamEvent>) -> OperationHandle {
        *self.inner.sink.lock().unwrap() = Some(events);
        self.inner.opens.fetch_add(1, Ordering::SeqCst);
        let inner = Arc::clone(&self.inner);
        OperationHandle::new(move || inner.closed.store(true, Ordering::SeqCst))
    }

    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut data = self.inner.data.lock().unwrap();
        let n = buf.len().min(data.len());
        buf[..n].copy_from_slice(&data[..n]);
        data.drain(..n);
        Ok(n)
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        self.inner.data.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
}

/// Spin until `cond` holds, yielding to the runtime between checks.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("condition not met in time");
}

pub fn entity(name: &str) -> NetworkEntity {
    NetworkEntity::new(name, "_test._tcp", "local.")
}

pub fn platform_error(code: i64) -> ErrorInfo {
    ErrorInfo::new("dnssd", code)
}
