//! Public facade: end-to-end discovery flows over one platform driver.

use std::sync::Arc;
use std::time::Duration;

use crate::browser::{self, BrowseOptions, BrowseProducer};
use crate::driver::DiscoveryDriver;
use crate::entity::{EntitySet, NetworkEntity};
use crate::error::Result;
use crate::pipeline::{combine_latest, switch_map};
use crate::producer::Producer;
use crate::service::ServiceBridge;
use crate::stream::{self, StreamPair};

/// Entry point for browsing, resolving, metadata lookup, publishing, and
/// connecting, all expressed as cold producers over one platform driver.
///
/// Cheap to clone; clones share the per-entity single-flight caches, so the
/// at-most-one-operation-per-entity guarantee holds across clones.
#[derive(Clone)]
pub struct Discovery {
    driver: Arc<dyn DiscoveryDriver>,
    services: Arc<ServiceBridge>,
}

impl Discovery {
    /// Wrap a platform driver.
    pub fn new(driver: impl DiscoveryDriver) -> Self {
        Self::from_arc(Arc::new(driver))
    }

    /// Wrap an already-shared platform driver.
    pub fn from_arc(driver: Arc<dyn DiscoveryDriver>) -> Self {
        let services = Arc::new(ServiceBridge::new(Arc::clone(&driver)));
        Self { driver, services }
    }

    /// Browse for services of `service_type` in `domain`.
    ///
    /// The returned producer replays the latest entity set to every new
    /// subscriber (clone); see [`BrowseProducer`].
    pub fn browse_services(&self, service_type: &str, domain: &str) -> BrowseProducer {
        self.browse_services_with_options(service_type, domain, BrowseOptions::default())
    }

    /// Browse with explicit [`BrowseOptions`].
    pub fn browse_services_with_options(
        &self,
        service_type: &str,
        domain: &str,
        options: BrowseOptions,
    ) -> BrowseProducer {
        browser::browse(Arc::clone(&self.driver), service_type, domain, options)
    }

    /// Browse and resolve every discovered entity.
    ///
    /// Re-emits the full set whenever membership changes or any member's
    /// resolution completes; a membership change cancels resolution work
    /// started for the previous set (latest-wins).
    pub fn resolve_services(
        &self,
        service_type: &str,
        domain: &str,
        timeout: Duration,
    ) -> Producer<EntitySet> {
        let services = Arc::clone(&self.services);
        let browse = self.browse_services(service_type, domain);
        Producer::from_stream(switch_map(browse, move |set: EntitySet| {
            combine_latest(
                set.iter()
                    .map(|entity| services.resolve(entity, timeout))
                    .collect(),
            )
        }))
    }

    /// Browse, resolve, and look up the metadata record of every
    /// discovered entity.
    pub fn resolve_services_with_metadata(
        &self,
        service_type: &str,
        domain: &str,
        timeout: Duration,
    ) -> Producer<EntitySet> {
        let services = Arc::clone(&self.services);
        let resolved = self.resolve_services(service_type, domain, timeout);
        Producer::from_stream(switch_map(resolved, move |set: EntitySet| {
            combine_latest(
                set.iter()
                    .map(|entity| services.lookup_metadata(entity))
                    .collect(),
            )
        }))
    }

    /// Resolve one entity: single-flight per entity, the timeout surfaces
    /// as a resolution failure, and a failure evicts the cached attempt so
    /// a retry is fresh.
    pub fn resolve(&self, entity: &NetworkEntity, timeout: Duration) -> Producer<NetworkEntity> {
        self.services.resolve(entity, timeout)
    }

    /// First metadata record observed for `entity`.
    pub fn lookup_metadata(&self, entity: &NetworkEntity) -> Producer<NetworkEntity> {
        self.services.lookup_metadata(entity)
    }

    /// Every metadata record update for `entity`; never completes on its
    /// own.
    pub fn monitor_metadata(&self, entity: &NetworkEntity) -> Producer<NetworkEntity> {
        self.services.monitor_metadata(entity)
    }

    /// Publish `entity` and emit a [`StreamPair`] per inbound connection.
    pub fn accept_connections(&self, entity: &NetworkEntity) -> Producer<StreamPair> {
        self.services.accept_connections(entity)
    }

    /// Synchronously request a connected stream pair to `entity`.
    pub fn connect(&self, entity: &NetworkEntity) -> Result<StreamPair> {
        stream::connect(&self.driver, entity)
    }
}

impl std::fmt::Debug for Discovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Discovery")
    }
}
