//! Live filtered views over the document store.
//!
//! A subscription registers a filter plus projection and receives an
//! initial snapshot as `Added` deltas followed by an ordered stream of
//! incremental deltas as the store mutates, until it unsubscribes.
//!
//! Subscriptions support:
//! - Field projection (the identifier is always retained)
//! - Diff or full-document delivery on change
//! - Bounded buffers with automatic snapshot resynchronization on overflow
//!
//! # Example
//!
//! ```ignore
//! let store = Arc::new(DocumentStore::new());
//! let manager = SubscriptionManager::new(Arc::clone(&store));
//!
//! let handle = manager.subscribe_channel(SubscriptionConfig {
//!     filter: Filter::where_eq("a", json!("a")),
//!     projection: Projection::fields(["a"]),
//!     ..Default::default()
//! });
//!
//! loop {
//!     match handle.recv() {
//!         Ok(Delta::Added { document }) => println!("added {:?}", document),
//!         Ok(delta) => println!("{:?}", delta),
//!         Err(_) => break,
//!     }
//! }
//! ```

mod dispatcher;
mod manager;
mod types;

pub use manager::SubscriptionManager;
pub use types::{
    ChannelObserver, DeliveryMode, Delta, Observer, SubscriptionConfig, SubscriptionHandle,
    SubscriptionId,
};
