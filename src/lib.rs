//! # Filtered Publication Engine
//!
//! A process-local component that holds a mutable collection of
//! documents, lets callers register live queries (filter plus field
//! projection) against it, and delivers an initial snapshot plus an
//! ordered stream of incremental deltas to each observer as the
//! collection mutates.
//!
//! ## Core Concepts
//!
//! - **Documents**: field/value records with opaque, structurally
//!   compared identifiers
//! - **Change feed**: every committed mutation, sequence-numbered, fanned
//!   out to bounded per-consumer queues
//! - **Subscriptions**: live filtered views kept exactly consistent with
//!   the store via Added/Changed/Removed deltas
//!
//! ## Example
//!
//! ```ignore
//! use docfeed::{Document, DocumentStore, Filter, SubscriptionConfig, SubscriptionManager};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let store = Arc::new(DocumentStore::new());
//! let manager = SubscriptionManager::new(Arc::clone(&store));
//!
//! let handle = manager.subscribe_channel(SubscriptionConfig::filtered(Filter::all()));
//!
//! store.insert(Document::from_json("t1", json!({
//!     "text": "a",
//!     "checked": false,
//! }))?)?;
//!
//! let delta = handle.recv()?; // Added {id: "t1", ...}
//! ```

pub mod error;
pub mod feed;
pub mod query;
pub mod store;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use error::{Result, StoreError};
pub use feed::{ChangeFeed, ConsumerId, FeedReceiver};
pub use query::{FieldConstraint, FieldDiff, Filter, Projection};
pub use store::DocumentStore;
pub use subscriptions::{
    ChannelObserver, DeliveryMode, Delta, Observer, SubscriptionConfig, SubscriptionHandle,
    SubscriptionId, SubscriptionManager,
};
pub use types::{Change, ChangeRecord, Document, DocumentId, Mutation, ObjectId, Sequence};
