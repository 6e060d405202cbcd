//! Single-flight producer memoization.
//!
//! A [`SharedFlight`] is one memoized platform operation: cold until the
//! first subscriber polls, shared by every subsequent subscriber, and torn
//! down synchronously when the last subscriber goes away. The per-entity
//! caches in the service and stream bridges hold `Weak` references so a
//! flight lives exactly as long as someone is listening.

use std::sync::{Arc, Mutex, Weak};

use futures_util::Stream;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::driver::OperationHandle;
use crate::error::{DiscoveryError, Result};

/// Broadcast buffer per flight. Subscribers that fall further behind than
/// this observe a lag warning and skip ahead.
const EVENT_BUFFER: usize = 64;

/// One message on a flight's fan-out channel. Subscribers observe items
/// followed by at most one terminal message.
#[derive(Debug, Clone)]
pub(crate) enum FlightMsg<T> {
    Item(T),
    Failed(DiscoveryError),
    Complete,
}

/// Start action run at first subscription: begins the platform operation
/// and spawns the pump that forwards its callbacks.
pub(crate) type StartFn = Box<dyn FnOnce() -> Result<(OperationHandle, JoinHandle<()>)> + Send>;

enum FlightState {
    Pending(Option<StartFn>),
    Running {
        // Held so the platform operation is stopped when the flight ends.
        _op: OperationHandle,
        pump: JoinHandle<()>,
    },
    Finished(Option<DiscoveryError>),
}

/// A memoized, lazily started, reference-counted platform operation.
pub(crate) struct SharedFlight<T> {
    label: &'static str,
    tx: broadcast::Sender<FlightMsg<T>>,
    state: Mutex<FlightState>,
}

impl<T: Clone + Send + 'static> SharedFlight<T> {
    /// Build a flight. `build` receives the fan-out sender for the pump and
    /// a weak self-reference for terminal state transitions, and returns
    /// the deferred start action.
    pub fn new<F>(label: &'static str, build: F) -> Arc<Self>
    where
        F: FnOnce(broadcast::Sender<FlightMsg<T>>, Weak<SharedFlight<T>>) -> StartFn,
    {
        Arc::new_cyclic(|weak| {
            let (tx, _) = broadcast::channel(EVENT_BUFFER);
            let start = build(tx.clone(), weak.clone());
            SharedFlight {
                label,
                tx,
                state: Mutex::new(FlightState::Pending(Some(start))),
            }
        })
    }

    /// Start the platform operation if it has not started yet.
    fn ensure_started(&self) {
        let mut state = self.state.lock().unwrap();
        if let FlightState::Pending(start) = &mut *state {
            let start = start.take().expect("flight start runs once");
            debug!(op = self.label, "starting platform operation");
            match start() {
                Ok((op, pump)) => *state = FlightState::Running { _op: op, pump },
                Err(err) => {
                    *state = FlightState::Finished(Some(err.clone()));
                    let _ = self.tx.send(FlightMsg::Failed(err));
                }
            }
        }
    }

    /// Terminal transition: stop the platform operation and broadcast the
    /// outcome. Idempotent.
    pub fn complete(&self, err: Option<DiscoveryError>) {
        {
            let mut state = self.state.lock().unwrap();
            if matches!(*state, FlightState::Finished(_)) {
                return;
            }
            debug!(op = self.label, failed = err.is_some(), "flight finished");
            *state = FlightState::Finished(err.clone());
        }
        let _ = self.tx.send(match err {
            Some(e) => FlightMsg::Failed(e),
            None => FlightMsg::Complete,
        });
    }

    /// Terminal transition through a pump's weak self-reference. A failed
    /// upgrade means every subscriber is gone and teardown already ran.
    pub fn finish(weak: &Weak<SharedFlight<T>>, err: Option<DiscoveryError>) {
        if let Some(flight) = weak.upgrade() {
            flight.complete(err);
        }
    }

    fn terminal(&self) -> Option<Option<DiscoveryError>> {
        match &*self.state.lock().unwrap() {
            FlightState::Finished(err) => Some(err.clone()),
            _ => None,
        }
    }

    /// Subscribe to this flight. The returned stream is cold: the platform
    /// operation starts when any subscriber first polls, and the flight is
    /// torn down when the last subscriber (stream) is dropped.
    pub fn stream(self: &Arc<Self>) -> impl Stream<Item = Result<T>> + Send {
        let flight = Arc::clone(self);
        let mut rx = flight.tx.subscribe();
        async_stream::stream! {
            flight.ensure_started();
            // A flight that terminated before this receiver existed never
            // replays the terminal message, so consult the state directly.
            match flight.terminal() {
                Some(Some(err)) => {
                    yield Err(err);
                    return;
                }
                Some(None) => return,
                None => {}
            }
            loop {
                match rx.recv().await {
                    Ok(FlightMsg::Item(item)) => yield Ok(item),
                    Ok(FlightMsg::Failed(err)) => {
                        yield Err(err);
                        return;
                    }
                    Ok(FlightMsg::Complete) => return,
                    Err(broadcast::error::RecvError::Closed) => return,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(op = flight.label, skipped, "subscriber lagging");
                    }
                }
            }
        }
    }
}

impl<T> Drop for SharedFlight<T> {
    fn drop(&mut self) {
        if let FlightState::Running { pump, .. } = &*self.state.lock().unwrap() {
            debug!(op = self.label, "last subscriber gone, stopping operation");
            pump.abort();
        }
        // The OperationHandle in `Running` drops with the state, stopping
        // the platform operation before this drop returns.
    }
}
