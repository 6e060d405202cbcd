//! Discovered service entities and identity-keyed sets.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

static NEXT_ENTITY_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identity of one discovered service.
///
/// Two `NetworkEntity` clones compare equal exactly when they wrap the same
/// underlying handle, mirroring the reference-identity the platform uses for
/// its own service objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(u64);

#[derive(Debug, Default)]
struct EntityData {
    addresses: Option<Vec<SocketAddr>>,
    metadata: Option<Vec<u8>>,
    resolved: bool,
}

#[derive(Debug)]
struct EntityInner {
    id: EntityId,
    name: String,
    service_type: String,
    domain: String,
    data: Mutex<EntityData>,
}

/// One discovered network service instance.
///
/// Cheaply clonable handle; all clones share the same identity and resolved
/// state. Entities are created by the platform driver when a browse session
/// finds them and observed gone via a remove notification.
#[derive(Clone)]
pub struct NetworkEntity {
    inner: Arc<EntityInner>,
}

impl NetworkEntity {
    /// Create a new entity handle with a fresh identity.
    pub fn new(
        name: impl Into<String>,
        service_type: impl Into<String>,
        domain: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(EntityInner {
                id: EntityId(NEXT_ENTITY_ID.fetch_add(1, Ordering::Relaxed)),
                name: name.into(),
                service_type: service_type.into(),
                domain: domain.into(),
                data: Mutex::new(EntityData::default()),
            }),
        }
    }

    /// Stable identity of the underlying handle.
    pub fn id(&self) -> EntityId {
        self.inner.id
    }

    /// Instance name, e.g. `"Living Room Printer"`.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Service type, e.g. `"_ipp._tcp"`.
    pub fn service_type(&self) -> &str {
        &self.inner.service_type
    }

    /// Search domain, e.g. `"local."`.
    pub fn domain(&self) -> &str {
        &self.inner.domain
    }

    /// Resolved socket addresses, if resolution has completed.
    pub fn addresses(&self) -> Option<Vec<SocketAddr>> {
        self.inner.data.lock().unwrap().addresses.clone()
    }

    /// Raw metadata record blob, if one has been observed.
    pub fn metadata(&self) -> Option<Vec<u8>> {
        self.inner.data.lock().unwrap().metadata.clone()
    }

    /// True once a resolve attempt has succeeded for this entity.
    pub fn is_resolved(&self) -> bool {
        self.inner.data.lock().unwrap().resolved
    }

    pub(crate) fn mark_resolved(&self, addresses: Vec<SocketAddr>) {
        let mut data = self.inner.data.lock().unwrap();
        data.addresses = Some(addresses);
        data.resolved = true;
    }

    pub(crate) fn set_metadata(&self, blob: Vec<u8>) {
        self.inner.data.lock().unwrap().metadata = Some(blob);
    }
}

impl PartialEq for NetworkEntity {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for NetworkEntity {}

impl std::hash::Hash for NetworkEntity {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for NetworkEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkEntity")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("service_type", &self.inner.service_type)
            .field("domain", &self.inner.domain)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

/// The live membership of one browse session: unique by identity, order
/// irrelevant.
#[derive(Debug, Clone, Default)]
pub struct EntitySet {
    entities: Vec<NetworkEntity>,
}

impl EntitySet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entities in the set.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// True if the set holds no entities.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// True if an entity with the same identity is present.
    pub fn contains(&self, entity: &NetworkEntity) -> bool {
        self.entities.iter().any(|e| e == entity)
    }

    /// Insert by identity. Returns false if already present.
    pub fn insert(&mut self, entity: NetworkEntity) -> bool {
        if self.contains(&entity) {
            return false;
        }
        self.entities.push(entity);
        true
    }

    /// Remove by identity. Returns false if absent.
    pub fn remove(&mut self, entity: &NetworkEntity) -> bool {
        let before = self.entities.len();
        self.entities.retain(|e| e != entity);
        self.entities.len() != before
    }

    /// Iterate the member entities.
    pub fn iter(&self) -> impl Iterator<Item = &NetworkEntity> {
        self.entities.iter()
    }
}

impl PartialEq for EntitySet {
    fn eq(&self, other: &Self) -> bool {
        self.entities.len() == other.entities.len()
            && self.entities.iter().all(|e| other.contains(e))
    }
}

impl Eq for EntitySet {}

impl FromIterator<NetworkEntity> for EntitySet {
    fn from_iter<I: IntoIterator<Item = NetworkEntity>>(iter: I) -> Self {
        let mut set = Self::new();
        for entity in iter {
            set.insert(entity);
        }
        set
    }
}

impl IntoIterator for EntitySet {
    type Item = NetworkEntity;
    type IntoIter = std::vec::IntoIter<NetworkEntity>;

    fn into_iter(self) -> Self::IntoIter {
        self.entities.into_iter()
    }
}
