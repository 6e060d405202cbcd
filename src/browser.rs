//! Browse sessions: incremental add/remove notifications folded into a
//! replay-of-1 stream of the current entity set.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::Stream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, trace};

use crate::driver::{BrowseEvent, DiscoveryDriver, OperationHandle};
use crate::entity::EntitySet;
use crate::error::{DiscoveryError, Result};

/// Caller-tunable knobs for a browse session.
#[derive(Debug, Clone, Default)]
pub struct BrowseOptions {
    /// Flush a pending coalesced update after this quiet period even if the
    /// platform never closed the burst with a final `more_coming == false`
    /// notification. `None` (the default) preserves the platform's exact
    /// coalescing: an unterminated burst stays suppressed.
    pub flush_after: Option<Duration>,
}

type BrowseValue = Result<EntitySet>;

type BrowseStartFn = Box<dyn FnOnce() -> Result<(OperationHandle, JoinHandle<()>)> + Send>;

enum SessionState {
    Pending(Option<BrowseStartFn>),
    Running {
        _op: OperationHandle,
        pump: JoinHandle<()>,
    },
    Finished,
}

struct BrowseShared {
    tx: Arc<watch::Sender<BrowseValue>>,
    state: Mutex<SessionState>,
    searching: Arc<AtomicBool>,
}

impl BrowseShared {
    fn ensure_started(&self) {
        let mut state = self.state.lock().unwrap();
        if let SessionState::Pending(start) = &mut *state {
            let start = start.take().expect("browse start runs once");
            match start() {
                Ok((op, pump)) => *state = SessionState::Running { _op: op, pump },
                Err(err) => {
                    *state = SessionState::Finished;
                    let _ = self.tx.send_replace(Err(err));
                }
            }
        }
    }

    fn finish(&self) {
        let mut state = self.state.lock().unwrap();
        if !matches!(*state, SessionState::Finished) {
            *state = SessionState::Finished;
        }
    }
}

impl Drop for BrowseShared {
    fn drop(&mut self) {
        if let SessionState::Running { pump, .. } = &*self.state.lock().unwrap() {
            debug!("last browse subscriber gone, stopping search");
            pump.abort();
        }
    }
}

/// Replay-of-1 stream of the current [`EntitySet`] of one browse session.
///
/// Cold: browsing starts when any clone is first polled. Every clone is an
/// independent subscriber to the same session and immediately observes the
/// latest known set (the empty set before the first burst lands). Dropping
/// the last clone stops the platform browse synchronously. A terminal
/// browse failure is the only way the stream fails; `didStopSearching`
/// merely clears [`is_searching`](Self::is_searching) and leaves the
/// session open for the platform to resume.
pub struct BrowseProducer {
    shared: Arc<BrowseShared>,
    updates: WatchStream<BrowseValue>,
    done: bool,
}

impl BrowseProducer {
    /// True while the platform reports the session as actively searching.
    pub fn is_searching(&self) -> bool {
        self.shared.searching.load(Ordering::SeqCst)
    }
}

impl Clone for BrowseProducer {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            updates: WatchStream::new(self.shared.tx.subscribe()),
            done: false,
        }
    }
}

impl Stream for BrowseProducer {
    type Item = Result<EntitySet>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        this.shared.ensure_started();
        match Pin::new(&mut this.updates).poll_next(cx) {
            Poll::Ready(Some(Ok(set))) => Poll::Ready(Some(Ok(set))),
            Poll::Ready(Some(Err(err))) => {
                this.done = true;
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl std::fmt::Debug for BrowseProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowseProducer")
            .field("searching", &self.is_searching())
            .field("done", &self.done)
            .finish()
    }
}

/// Create a cold browse session for `service_type` in `domain`.
pub(crate) fn browse(
    driver: Arc<dyn DiscoveryDriver>,
    service_type: &str,
    domain: &str,
    options: BrowseOptions,
) -> BrowseProducer {
    let (tx, _rx) = watch::channel(Ok(EntitySet::new()));
    let tx = Arc::new(tx);
    let searching = Arc::new(AtomicBool::new(false));

    let service_type = service_type.to_owned();
    let domain = domain.to_owned();
    let shared = Arc::new_cyclic(|weak: &Weak<BrowseShared>| {
        let weak = weak.clone();
        let pump_tx = Arc::clone(&tx);
        let pump_searching = Arc::clone(&searching);
        let start: BrowseStartFn = Box::new(move || {
            let (events_tx, events_rx) = mpsc::unbounded_channel();
            debug!(%service_type, %domain, "starting browse");
            let op = driver.start_browse(&service_type, &domain, events_tx)?;
            let pump = tokio::spawn(browse_pump(
                events_rx,
                pump_tx,
                pump_searching,
                weak,
                options.flush_after,
            ));
            Ok((op, pump))
        });
        BrowseShared {
            tx: Arc::clone(&tx),
            state: Mutex::new(SessionState::Pending(Some(start))),
            searching,
        }
    });

    BrowseProducer {
        updates: WatchStream::new(shared.tx.subscribe()),
        shared,
        done: false,
    }
}

/// Serial consumer of one session's platform notifications.
///
/// Maintains the entity set and publishes it to the watch channel only when
/// a burst ends (or the optional watchdog fires), so a flood of adds and
/// removes tagged `more_coming` reaches subscribers as one update.
async fn browse_pump(
    mut events: mpsc::UnboundedReceiver<BrowseEvent>,
    tx: Arc<watch::Sender<BrowseValue>>,
    searching: Arc<AtomicBool>,
    shared: Weak<BrowseShared>,
    flush_after: Option<Duration>,
) {
    let mut set = EntitySet::new();
    let mut dirty = false;
    loop {
        let event = match (dirty, flush_after) {
            (true, Some(quiet)) => match tokio::time::timeout(quiet, events.recv()).await {
                Ok(event) => event,
                Err(_) => {
                    trace!("flushing unterminated notification burst");
                    let _ = tx.send_replace(Ok(set.clone()));
                    dirty = false;
                    continue;
                }
            },
            _ => events.recv().await,
        };
        let Some(event) = event else {
            // Driver dropped the sink without a terminal notification; the
            // session keeps its last published set.
            break;
        };
        match event {
            BrowseEvent::WillSearch => searching.store(true, Ordering::SeqCst),
            BrowseEvent::StoppedSearching => searching.store(false, Ordering::SeqCst),
            BrowseEvent::Found {
                entity,
                more_coming,
            } => {
                trace!(name = %entity.name(), more_coming, "service found");
                set.insert(entity);
                if more_coming {
                    dirty = true;
                } else {
                    dirty = false;
                    let _ = tx.send_replace(Ok(set.clone()));
                }
            }
            BrowseEvent::Removed {
                entity,
                more_coming,
            } => {
                trace!(name = %entity.name(), more_coming, "service removed");
                set.remove(&entity);
                if more_coming {
                    dirty = true;
                } else {
                    dirty = false;
                    let _ = tx.send_replace(Ok(set.clone()));
                }
            }
            BrowseEvent::SearchFailed(info) => {
                debug!(%info, "browse failed");
                searching.store(false, Ordering::SeqCst);
                let _ = tx.send_replace(Err(DiscoveryError::Browse(info)));
                if let Some(shared) = shared.upgrade() {
                    shared.finish();
                }
                return;
            }
        }
    }
}
