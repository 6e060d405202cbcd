//! Reactive stream bridge for callback-driven DNS-SD service discovery.
//!
//! Wraps a delegate/callback-shaped discovery platform (browse, resolve,
//! metadata records, publish, byte streams) behind cold, cancelable,
//! replayable async producers, with strict lifecycle guarantees: at most
//! one in-flight platform operation per entity per operation kind, ordered
//! delivery, and synchronous teardown when the last subscriber goes away.
//!
//! # Example
//!
//! ```ignore
//! use dnssd_streams::Discovery;
//! use futures_util::StreamExt;
//! use std::time::Duration;
//!
//! let discovery = Discovery::new(platform_driver);
//! let mut services = discovery.resolve_services("_ipp._tcp", "local.", Duration::from_secs(5));
//! while let Some(set) = services.next().await.transpose()? {
//!     for entity in set.iter() {
//!         println!("{} -> {:?}", entity.name(), entity.addresses());
//!     }
//! }
//! ```

#![deny(missing_docs)]

pub mod browser;
mod discovery;
pub mod driver;
pub mod entity;
pub mod error;
mod flight;
mod pipeline;
mod producer;
mod service;
mod store;
pub mod stream;

// Re-export key types
pub use browser::{BrowseOptions, BrowseProducer};
pub use discovery::Discovery;
pub use driver::{
    AcceptEvent, BrowseEvent, DiscoveryDriver, EventSink, MetadataEvent, OperationHandle,
    RawByteStream, RawStreamPair, ResolveEvent, StreamEvent,
};
pub use entity::{EntityId, EntitySet, NetworkEntity};
pub use error::{DiscoveryError, ErrorInfo, Result, TIMEOUT_CODE};
pub use producer::Producer;
pub use stream::{ByteStream, StreamPair, StreamSignal};
