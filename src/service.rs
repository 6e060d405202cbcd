//! Per-entity bridges: resolve, metadata monitoring, and inbound
//! connection acceptance, all single-flight per entity.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::driver::{AcceptEvent, DiscoveryDriver, MetadataEvent, ResolveEvent};
use crate::entity::{EntityId, NetworkEntity};
use crate::error::DiscoveryError;
use crate::flight::{FlightMsg, SharedFlight, StartFn};
use crate::producer::Producer;
use crate::store::EntityStateStore;
use crate::stream::{ByteStream, StreamPair};

type FlightCache<T> = Arc<EntityStateStore<Weak<SharedFlight<T>>>>;

/// Converts the platform's per-entity callbacks into memoized producers.
///
/// One cache per operation kind; get-or-create is atomic, so two callers
/// racing to resolve the same entity share one platform operation and one
/// eventual outcome. A terminal failure evicts its cache entry so the next
/// call is a fresh attempt.
pub(crate) struct ServiceBridge {
    driver: Arc<dyn DiscoveryDriver>,
    resolves: FlightCache<NetworkEntity>,
    monitors: FlightCache<NetworkEntity>,
    accepts: FlightCache<StreamPair>,
}

impl ServiceBridge {
    pub fn new(driver: Arc<dyn DiscoveryDriver>) -> Self {
        Self {
            driver,
            resolves: Arc::new(EntityStateStore::new()),
            monitors: Arc::new(EntityStateStore::new()),
            accepts: Arc::new(EntityStateStore::new()),
        }
    }

    /// Resolve `entity`, sharing any in-flight attempt.
    ///
    /// An already-resolved entity yields an already-completed producer
    /// without touching the platform.
    pub fn resolve(&self, entity: &NetworkEntity, timeout: Duration) -> Producer<NetworkEntity> {
        if entity.is_resolved() {
            trace!(name = %entity.name(), "already resolved");
            return Producer::ready(entity.clone());
        }
        let flight = cached_flight(&self.resolves, entity.id(), || {
            let driver = Arc::clone(&self.driver);
            let store = Arc::clone(&self.resolves);
            let entity = entity.clone();
            SharedFlight::new("resolve", move |tx, weak| {
                let evict = evictor(store, entity.id(), weak.clone());
                Box::new(move || {
                    let (events_tx, events_rx) = mpsc::unbounded_channel();
                    let op = match driver.start_resolve(&entity, timeout, events_tx) {
                        Ok(op) => op,
                        Err(err) => {
                            // Never started: uncache so a retry is a fresh attempt.
                            evict();
                            return Err(err);
                        }
                    };
                    let pump =
                        tokio::spawn(resolve_pump(entity, timeout, events_rx, tx, weak, evict));
                    Ok((op, pump))
                }) as StartFn
            })
        });
        Producer::from_stream(flight.stream())
    }

    /// Monitor `entity`'s metadata record; emits the entity on every
    /// update and never completes on its own.
    pub fn monitor_metadata(&self, entity: &NetworkEntity) -> Producer<NetworkEntity> {
        let flight = cached_flight(&self.monitors, entity.id(), || {
            let driver = Arc::clone(&self.driver);
            let store = Arc::clone(&self.monitors);
            let entity = entity.clone();
            SharedFlight::new("metadata-monitor", move |tx, weak| {
                let evict = evictor(store, entity.id(), weak.clone());
                Box::new(move || {
                    let (events_tx, events_rx) = mpsc::unbounded_channel();
                    let op = match driver.start_metadata_monitor(&entity, events_tx) {
                        Ok(op) => op,
                        Err(err) => {
                            evict();
                            return Err(err);
                        }
                    };
                    let pump = tokio::spawn(monitor_pump(entity, events_rx, tx, weak, evict));
                    Ok((op, pump))
                }) as StartFn
            })
        });
        Producer::from_stream(flight.stream())
    }

    /// First value of the metadata monitor: completes after one emission
    /// even though the underlying monitor keeps firing.
    pub fn lookup_metadata(&self, entity: &NetworkEntity) -> Producer<NetworkEntity> {
        self.monitor_metadata(entity).first()
    }

    /// Publish `entity` for inbound connections and emit one [`StreamPair`]
    /// per accepted connection; never completes on its own.
    pub fn accept_connections(&self, entity: &NetworkEntity) -> Producer<StreamPair> {
        let flight = cached_flight(&self.accepts, entity.id(), || {
            let driver = Arc::clone(&self.driver);
            let store = Arc::clone(&self.accepts);
            let entity = entity.clone();
            SharedFlight::new("accept-connections", move |tx, weak| {
                let evict = evictor(store, entity.id(), weak.clone());
                Box::new(move || {
                    let (events_tx, events_rx) = mpsc::unbounded_channel();
                    let op = match driver.publish(&entity, events_tx) {
                        Ok(op) => op,
                        Err(err) => {
                            evict();
                            return Err(err);
                        }
                    };
                    let pump = tokio::spawn(accept_pump(entity, events_rx, tx, weak, evict));
                    Ok((op, pump))
                }) as StartFn
            })
        });
        Producer::from_stream(flight.stream())
    }
}

/// Atomic get-or-create against one operation-kind cache.
fn cached_flight<T: Clone + Send + 'static>(
    cache: &FlightCache<T>,
    id: EntityId,
    make: impl FnOnce() -> Arc<SharedFlight<T>>,
) -> Arc<SharedFlight<T>> {
    // Entries for entities that vanished mid-flight die as dead weaks;
    // sweep them on the next access of any entity.
    cache.purge(|cached| cached.strong_count() == 0);
    cache.get_or_insert_with(
        id,
        |weak| weak.upgrade(),
        || {
            let flight = make();
            (Arc::downgrade(&flight), flight)
        },
    )
}

/// Eviction action a pump runs on terminal failure so a retry creates a
/// fresh flight. Compares pointers so it never clobbers a replacement.
fn evictor<T: Send + 'static>(
    cache: FlightCache<T>,
    id: EntityId,
    weak: Weak<SharedFlight<T>>,
) -> impl FnOnce() + Send + 'static {
    move || {
        cache.remove_if(id, |cached| cached.ptr_eq(&weak));
    }
}

async fn resolve_pump(
    entity: NetworkEntity,
    timeout: Duration,
    mut events: mpsc::UnboundedReceiver<ResolveEvent>,
    tx: tokio::sync::broadcast::Sender<FlightMsg<NetworkEntity>>,
    weak: Weak<SharedFlight<NetworkEntity>>,
    evict: impl FnOnce() + Send,
) {
    let err = match tokio::time::timeout(timeout, events.recv()).await {
        Err(_) => Some(DiscoveryError::resolve_timeout(timeout)),
        Ok(None) => Some(DiscoveryError::Unknown),
        Ok(Some(ResolveEvent::Failed(info))) => {
            debug!(name = %entity.name(), %info, "resolve failed");
            Some(DiscoveryError::Resolution(info))
        }
        Ok(Some(ResolveEvent::Resolved { addresses })) => {
            debug!(name = %entity.name(), count = addresses.len(), "resolved");
            entity.mark_resolved(addresses);
            let _ = tx.send(FlightMsg::Item(entity.clone()));
            None
        }
    };
    if err.is_some() {
        evict();
    }
    SharedFlight::finish(&weak, err);
}

async fn monitor_pump(
    entity: NetworkEntity,
    mut events: mpsc::UnboundedReceiver<MetadataEvent>,
    tx: tokio::sync::broadcast::Sender<FlightMsg<NetworkEntity>>,
    weak: Weak<SharedFlight<NetworkEntity>>,
    evict: impl FnOnce() + Send,
) {
    while let Some(event) = events.recv().await {
        match event {
            MetadataEvent::Updated(blob) => {
                trace!(name = %entity.name(), len = blob.len(), "metadata updated");
                entity.set_metadata(blob);
                let _ = tx.send(FlightMsg::Item(entity.clone()));
            }
            MetadataEvent::Failed(info) => {
                debug!(name = %entity.name(), %info, "metadata monitor failed");
                evict();
                SharedFlight::finish(&weak, Some(DiscoveryError::Resolution(info)));
                return;
            }
        }
    }
    // Sink dropped without a terminal event.
    evict();
    SharedFlight::finish(&weak, Some(DiscoveryError::Unknown));
}

async fn accept_pump(
    entity: NetworkEntity,
    mut events: mpsc::UnboundedReceiver<AcceptEvent>,
    tx: tokio::sync::broadcast::Sender<FlightMsg<StreamPair>>,
    weak: Weak<SharedFlight<StreamPair>>,
    evict: impl FnOnce() + Send,
) {
    while let Some(event) = events.recv().await {
        match event {
            AcceptEvent::Accepted { read, write } => {
                debug!(name = %entity.name(), "accepted inbound connection");
                let pair = StreamPair {
                    read: ByteStream::new(read),
                    write: ByteStream::new(write),
                };
                let _ = tx.send(FlightMsg::Item(pair));
            }
            AcceptEvent::Failed(info) => {
                debug!(name = %entity.name(), %info, "publish failed");
                evict();
                SharedFlight::finish(&weak, Some(DiscoveryError::Publish(info)));
                return;
            }
        }
    }
    // Sink dropped without a terminal event.
    evict();
    SharedFlight::finish(&weak, Some(DiscoveryError::Unknown));
}
