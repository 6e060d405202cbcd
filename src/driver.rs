//! Platform boundary: the callback contract the bridges are built against.
//!
//! A [`DiscoveryDriver`] is the seam between this crate and the OS-level
//! DNS-SD machinery. Each `start_*` call hands the driver an event sink and
//! gets back an [`OperationHandle`]; the driver delivers its callbacks for
//! one session serially through the sink, and dropping the handle must stop
//! the underlying platform operation before the drop returns.

use std::io;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::entity::NetworkEntity;
use crate::error::{ErrorInfo, Result};

/// Channel a driver delivers one session's events through.
pub type EventSink<E> = mpsc::UnboundedSender<E>;

/// Handle to one in-flight platform operation.
///
/// Dropping the handle stops the operation synchronously. Stop must be
/// idempotent and callable from any thread.
pub struct OperationHandle {
    stop: Option<Box<dyn FnOnce() + Send>>,
}

impl OperationHandle {
    /// Wrap a stop action.
    pub fn new(stop: impl FnOnce() + Send + 'static) -> Self {
        Self {
            stop: Some(Box::new(stop)),
        }
    }

    /// Handle for operations with nothing to stop.
    pub fn noop() -> Self {
        Self { stop: None }
    }
}

impl Drop for OperationHandle {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop();
        }
    }
}

impl std::fmt::Debug for OperationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationHandle")
            .field("armed", &self.stop.is_some())
            .finish()
    }
}

/// Browse session notifications.
#[derive(Debug)]
pub enum BrowseEvent {
    /// The platform is about to start searching.
    WillSearch,
    /// An entity appeared. `more_coming` marks a burst in progress.
    Found {
        /// The discovered entity.
        entity: NetworkEntity,
        /// True while further notifications of the same burst are pending.
        more_coming: bool,
    },
    /// An entity disappeared. Same burst semantics as `Found`.
    Removed {
        /// The removed entity.
        entity: NetworkEntity,
        /// True while further notifications of the same burst are pending.
        more_coming: bool,
    },
    /// The search could not run; terminal for the session.
    SearchFailed(ErrorInfo),
    /// Searching stopped; the session may resume later.
    StoppedSearching,
}

/// Resolve notifications; exactly one is delivered per attempt.
#[derive(Debug)]
pub enum ResolveEvent {
    /// The entity's addresses were resolved.
    Resolved {
        /// Reachable socket addresses for the entity.
        addresses: Vec<std::net::SocketAddr>,
    },
    /// The platform could not resolve the entity.
    Failed(ErrorInfo),
}

/// Metadata-record monitor notifications.
#[derive(Debug)]
pub enum MetadataEvent {
    /// A fresh raw metadata record was observed.
    Updated(Vec<u8>),
    /// Monitoring failed; terminal.
    Failed(ErrorInfo),
}

/// Inbound-connection notifications for a published entity.
pub enum AcceptEvent {
    /// A remote peer connected; carries the raw half-duplex pair.
    Accepted {
        /// Stream the local side reads from.
        read: Box<dyn RawByteStream>,
        /// Stream the local side writes to.
        write: Box<dyn RawByteStream>,
    },
    /// Publishing failed; terminal.
    Failed(ErrorInfo),
}

impl std::fmt::Debug for AcceptEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accepted { .. } => f.write_str("Accepted"),
            Self::Failed(info) => f.debug_tuple("Failed").field(info).finish(),
        }
    }
}

/// Event codes a platform byte stream reports to its delegate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// No event; ignored.
    None,
    /// The stream finished opening; consumed internally.
    Opened,
    /// Bytes can be read without blocking.
    BytesAvailable,
    /// Bytes can be written without blocking.
    SpaceAvailable,
    /// The stream failed; terminal.
    ErrorOccurred(ErrorInfo),
    /// The remote side closed the stream; terminal.
    EndEncountered,
}

/// One half-duplex platform stream.
///
/// `open` registers the sink as the stream's delegate, schedules it for
/// event delivery, and opens it; dropping the returned handle closes the
/// stream. `read`/`write` are non-blocking and intended to be called after
/// the corresponding availability event.
pub trait RawByteStream: Send + Sync + 'static {
    /// Open the stream and route its events into `events`.
    fn open(&self, events: EventSink<StreamEvent>) -> OperationHandle;

    /// Read available bytes into `buf`.
    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write bytes from `buf` while space is available.
    fn write(&self, buf: &[u8]) -> io::Result<usize>;
}

/// Read/write stream halves as handed out by the platform.
///
/// Either half may be absent when connection setup fails partway.
pub struct RawStreamPair {
    /// Read half, if the platform produced one.
    pub read: Option<Box<dyn RawByteStream>>,
    /// Write half, if the platform produced one.
    pub write: Option<Box<dyn RawByteStream>>,
}

impl std::fmt::Debug for RawStreamPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawStreamPair")
            .field("read", &self.read.is_some())
            .field("write", &self.write.is_some())
            .finish()
    }
}

/// The discovery platform itself.
///
/// Implementations wrap the OS discovery and stream primitives. All
/// `start_*` operations are callback-driven: events arrive through the
/// provided sink, in order, from a single notification context per session.
pub trait DiscoveryDriver: Send + Sync + 'static {
    /// Start browsing for services of `service_type` in `domain`.
    fn start_browse(
        &self,
        service_type: &str,
        domain: &str,
        events: EventSink<BrowseEvent>,
    ) -> Result<OperationHandle>;

    /// Start resolving `entity`, giving up after `timeout` platform-side
    /// where supported. The bridge enforces the timeout regardless.
    fn start_resolve(
        &self,
        entity: &NetworkEntity,
        timeout: Duration,
        events: EventSink<ResolveEvent>,
    ) -> Result<OperationHandle>;

    /// Start monitoring `entity`'s metadata record.
    fn start_metadata_monitor(
        &self,
        entity: &NetworkEntity,
        events: EventSink<MetadataEvent>,
    ) -> Result<OperationHandle>;

    /// Publish `entity` and listen for inbound connections.
    ///
    /// Must be idempotent when the entity is already published.
    fn publish(
        &self,
        entity: &NetworkEntity,
        events: EventSink<AcceptEvent>,
    ) -> Result<OperationHandle>;

    /// Request a connected read/write stream pair to `entity`.
    fn open_streams(&self, entity: &NetworkEntity) -> Result<RawStreamPair>;
}
