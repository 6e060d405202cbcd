//! Byte-stream bridging: platform stream delegate events as producers.

use std::io;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::driver::{DiscoveryDriver, RawByteStream, StreamEvent};
use crate::entity::NetworkEntity;
use crate::error::{DiscoveryError, Result};
use crate::flight::{FlightMsg, SharedFlight, StartFn};
use crate::producer::Producer;

/// Consumer-visible stream readiness signal.
///
/// `Opened` and empty events carry nothing a consumer needs and are
/// consumed internally; errors and end-of-stream terminate the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSignal {
    /// Bytes can be read without blocking.
    Readable,
    /// Bytes can be written without blocking.
    Writable,
}

struct ByteStreamInner {
    raw: Box<dyn RawByteStream>,
    flight: Mutex<Weak<SharedFlight<StreamSignal>>>,
}

/// One half-duplex channel of a connection.
///
/// Clonable handle; all clones share the underlying platform stream and its
/// cached event producer. The stream is opened when the first subscriber
/// polls [`events`](Self::events) and closed when the last subscriber is
/// dropped or a terminal event arrives.
#[derive(Clone)]
pub struct ByteStream {
    inner: Arc<ByteStreamInner>,
}

impl ByteStream {
    pub(crate) fn new(raw: Box<dyn RawByteStream>) -> Self {
        Self {
            inner: Arc::new(ByteStreamInner {
                raw,
                flight: Mutex::new(Weak::new()),
            }),
        }
    }

    /// Readiness events for this stream.
    ///
    /// Single-flight: concurrent subscribers share one open stream and one
    /// event delegate. On first poll the stream is scheduled for event
    /// delivery and opened; dropping the last subscriber closes it.
    pub fn events(&self) -> Producer<StreamSignal> {
        let mut slot = self.inner.flight.lock().unwrap();
        if let Some(flight) = slot.upgrade() {
            return Producer::from_stream(flight.stream());
        }
        let inner = Arc::clone(&self.inner);
        let flight = SharedFlight::new("stream-events", move |tx, weak| {
            let evict_inner = Arc::clone(&inner);
            let evict_weak = weak.clone();
            let evict = move || {
                let mut slot = evict_inner.flight.lock().unwrap();
                if slot.ptr_eq(&evict_weak) {
                    *slot = Weak::new();
                }
            };
            Box::new(move || {
                let (events_tx, events_rx) = mpsc::unbounded_channel();
                let op = inner.raw.open(events_tx);
                let pump = tokio::spawn(stream_pump(events_rx, tx, weak, evict));
                Ok((op, pump))
            }) as StartFn
        });
        *slot = Arc::downgrade(&flight);
        Producer::from_stream(flight.stream())
    }

    /// Read available bytes; intended after a [`StreamSignal::Readable`].
    pub fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.raw.read(buf)
    }

    /// Write bytes; intended after a [`StreamSignal::Writable`].
    pub fn write(&self, buf: &[u8]) -> io::Result<usize> {
        self.inner.raw.write(buf)
    }
}

impl std::fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ByteStream")
    }
}

/// Two independent half-duplex channels of one connection.
#[derive(Debug, Clone)]
pub struct StreamPair {
    /// The side the local peer reads from.
    pub read: ByteStream,
    /// The side the local peer writes to.
    pub write: ByteStream,
}

/// Translate delegate events into producer events until a terminal event.
async fn stream_pump(
    mut events: mpsc::UnboundedReceiver<StreamEvent>,
    tx: tokio::sync::broadcast::Sender<FlightMsg<StreamSignal>>,
    weak: Weak<SharedFlight<StreamSignal>>,
    evict: impl Fn() + Send,
) {
    while let Some(event) = events.recv().await {
        match event {
            StreamEvent::None | StreamEvent::Opened => {
                trace!(?event, "consumed internally");
            }
            StreamEvent::BytesAvailable => {
                let _ = tx.send(FlightMsg::Item(StreamSignal::Readable));
            }
            StreamEvent::SpaceAvailable => {
                let _ = tx.send(FlightMsg::Item(StreamSignal::Writable));
            }
            StreamEvent::ErrorOccurred(info) => {
                debug!(%info, "stream error");
                evict();
                SharedFlight::finish(&weak, Some(DiscoveryError::StreamIo(info)));
                return;
            }
            StreamEvent::EndEncountered => {
                debug!("stream end");
                evict();
                SharedFlight::finish(&weak, None);
                return;
            }
        }
    }
    evict();
    SharedFlight::finish(&weak, None);
}

/// Request a connected stream pair to `entity`.
///
/// Fails with [`DiscoveryError::StreamSetup`] when the platform produced
/// neither or only one half.
pub(crate) fn connect(
    driver: &Arc<dyn DiscoveryDriver>,
    entity: &NetworkEntity,
) -> Result<StreamPair> {
    let pair = driver.open_streams(entity)?;
    match (pair.read, pair.write) {
        (Some(read), Some(write)) => {
            debug!(name = %entity.name(), "connected stream pair");
            Ok(StreamPair {
                read: ByteStream::new(read),
                write: ByteStream::new(write),
            })
        }
        _ => Err(DiscoveryError::StreamSetup),
    }
}
