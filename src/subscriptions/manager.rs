//! Subscription manager: registry plus per-subscription view state.

use crate::feed::ConsumerId;
use crate::query::{self, Filter, Projection};
use crate::store::DocumentStore;
use crate::types::{Change, Document, DocumentId};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use super::dispatcher::{self, WorkerCtx};
use super::types::{
    ChannelObserver, DeliveryMode, Delta, Observer, SubscriptionConfig, SubscriptionHandle,
    SubscriptionId,
};

/// What one subscription can currently see, and how to update it.
///
/// The `visible` map is the core invariant: at every quiescent point it
/// must hold exactly the projected views of the documents in the store
/// that satisfy the filter. `apply` and `reconcile` emit the deltas that
/// keep a subscriber's mirror in lockstep with it.
pub(crate) struct SubscriptionView {
    filter: Filter,
    projection: Projection,
    mode: DeliveryMode,
    /// Projected document as last delivered, by id.
    visible: HashMap<DocumentId, Document>,
}

impl SubscriptionView {
    pub(crate) fn new(filter: Filter, projection: Projection, mode: DeliveryMode) -> Self {
        Self {
            filter,
            projection,
            mode,
            visible: HashMap::new(),
        }
    }

    pub(crate) fn filter(&self) -> &Filter {
        &self.filter
    }

    /// Identifiers currently visible, in identifier order.
    pub(crate) fn visible_ids(&self) -> Vec<DocumentId> {
        let mut ids: Vec<DocumentId> = self.visible.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Convert one committed change into at most one delta.
    ///
    /// Whether the document was in the visible set before, combined with
    /// whether its new version matches the filter, decides between
    /// Added / Changed / Removed / nothing. Using the visible set rather
    /// than re-matching the old version keeps the state machine correct
    /// across snapshot resynchronization.
    pub(crate) fn apply(&mut self, change: &Change) -> Option<Delta> {
        let (id, current) = match change {
            Change::Inserted { document } => (&document.id, Some(document)),
            Change::Updated { new, .. } => (&new.id, Some(new)),
            Change::Removed { document } => (&document.id, None),
        };

        let was_visible = self.visible.contains_key(id);
        let now_matches = current.is_some_and(|doc| self.filter.matches(doc));

        match (was_visible, now_matches) {
            (false, false) => None,

            (false, true) => {
                let projected = self.projection.project(current.expect("matched"));
                self.visible.insert(id.clone(), projected.clone());
                Some(Delta::Added {
                    document: projected,
                })
            }

            (true, false) => {
                self.visible.remove(id);
                Some(Delta::Removed { id: id.clone() })
            }

            (true, true) => {
                let projected = self.projection.project(current.expect("matched"));
                let known = self.visible.get(id).expect("visible");
                let delta = match self.mode {
                    DeliveryMode::Diff => diff_delta(known, &projected),
                    DeliveryMode::FullDocument => Some(full_delta(known, &projected)),
                };
                self.visible.insert(id.clone(), projected);
                delta
            }
        }
    }

    /// Bring the visible set in line with a fresh snapshot of matching
    /// documents, emitting the deltas a subscriber needs to catch up.
    ///
    /// From an empty visible set this is the initial snapshot delivery;
    /// after a feed overflow it reconciles across the gap.
    pub(crate) fn reconcile(&mut self, matching: Vec<Document>) -> Vec<Delta> {
        let mut deltas = Vec::new();
        let mut seen: HashSet<DocumentId> = HashSet::with_capacity(matching.len());

        for doc in matching {
            seen.insert(doc.id.clone());
            let projected = self.projection.project(&doc);
            match self.visible.get(&doc.id) {
                None => {
                    deltas.push(Delta::Added {
                        document: projected.clone(),
                    });
                    self.visible.insert(doc.id, projected);
                }
                Some(known) => {
                    let changed = match self.mode {
                        DeliveryMode::Diff => diff_delta(known, &projected),
                        DeliveryMode::FullDocument => {
                            // Across a gap there is no per-update event to
                            // echo; resend only when the view drifted.
                            if known == &projected {
                                None
                            } else {
                                Some(full_delta(known, &projected))
                            }
                        }
                    };
                    if let Some(delta) = changed {
                        deltas.push(delta);
                        self.visible.insert(doc.id, projected);
                    }
                }
            }
        }

        let vanished: Vec<DocumentId> = self
            .visible
            .keys()
            .filter(|id| !seen.contains(id))
            .cloned()
            .collect();
        for id in vanished {
            self.visible.remove(&id);
            deltas.push(Delta::Removed { id });
        }

        deltas
    }
}

/// Changed delta carrying only the fields that differ, or nothing.
fn diff_delta(known: &Document, projected: &Document) -> Option<Delta> {
    let diff = query::diff(known, projected);
    if diff.is_empty() {
        return None;
    }
    Some(Delta::Changed {
        id: projected.id.clone(),
        fields: diff.changed,
        cleared: diff.cleared,
    })
}

/// Changed delta carrying the entire projected document.
fn full_delta(known: &Document, projected: &Document) -> Delta {
    let cleared = known
        .fields
        .keys()
        .filter(|name| !projected.fields.contains_key(*name))
        .cloned()
        .collect();
    Delta::Changed {
        id: projected.id.clone(),
        fields: projected.fields.clone(),
        cleared,
    }
}

/// Registry entry shared with the subscription's dispatch worker.
struct Registered {
    active: Arc<AtomicBool>,
    /// Current feed consumer; replaced by the worker on resync.
    consumer: Arc<Mutex<Option<ConsumerId>>>,
    view: Arc<RwLock<SubscriptionView>>,
}

/// Tracks registered observers and their live views.
pub struct SubscriptionManager {
    store: Arc<DocumentStore>,
    subscriptions: RwLock<HashMap<SubscriptionId, Registered>>,
    next_id: AtomicU64,
}

impl SubscriptionManager {
    pub fn new(store: Arc<DocumentStore>) -> Arc<Self> {
        Arc::new(Self {
            store,
            subscriptions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    pub(crate) fn store(&self) -> &Arc<DocumentStore> {
        &self.store
    }

    /// Register an observer for a live filtered view.
    ///
    /// The observer first receives `Added` deltas for every document
    /// currently matching the filter, then incremental deltas in mutation
    /// order. Registration with the change feed happens before the
    /// snapshot is taken, so no concurrent mutation can fall between the
    /// two; records already reflected in the snapshot are de-duplicated
    /// by sequence number.
    pub fn subscribe(
        self: &Arc<Self>,
        config: SubscriptionConfig,
        observer: Arc<dyn Observer>,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));

        let receiver = self.store.feed().register(config.buffer_size);
        let active = Arc::new(AtomicBool::new(true));
        let consumer = Arc::new(Mutex::new(Some(receiver.id())));
        let view = Arc::new(RwLock::new(SubscriptionView::new(
            config.filter,
            config.projection,
            config.mode,
        )));

        self.subscriptions.write().insert(
            id,
            Registered {
                active: Arc::clone(&active),
                consumer: Arc::clone(&consumer),
                view: Arc::clone(&view),
            },
        );

        debug!(subscription = id.0, "subscribed");

        dispatcher::spawn(
            WorkerCtx {
                manager: Arc::downgrade(self),
                id,
                observer,
                active,
                consumer,
                view,
                buffer_size: config.buffer_size,
            },
            receiver,
        );

        id
    }

    /// Subscribe with a channel-backed observer and get the receiving
    /// handle directly.
    pub fn subscribe_channel(self: &Arc<Self>, config: SubscriptionConfig) -> SubscriptionHandle {
        let (observer, receiver) = ChannelObserver::unbounded();
        let id = self.subscribe(config, Arc::new(observer));
        SubscriptionHandle { id, receiver }
    }

    /// Tear down a subscription. Idempotent: unknown or already-removed
    /// ids are a no-op. After this returns no further deltas are
    /// dispatched, though one already in flight may still land.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let entry = self.subscriptions.write().remove(&id);
        if let Some(entry) = entry {
            entry.active.store(false, Ordering::Release);
            if let Some(consumer_id) = entry.consumer.lock().take() {
                self.store.feed().unregister(consumer_id);
            }
            debug!(subscription = id.0, "unsubscribed");
        }
    }

    /// The identifiers a subscription can currently see, in identifier
    /// order. At quiescence this equals the ids of `find(filter)`.
    pub fn visible_ids(&self, id: SubscriptionId) -> Option<Vec<DocumentId>> {
        self.subscriptions
            .read()
            .get(&id)
            .map(|entry| entry.view.read().visible_ids())
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }
}

impl Drop for SubscriptionManager {
    /// Tear down every live subscription so parked dispatch workers wake
    /// up and exit instead of blocking on the feed indefinitely.
    fn drop(&mut self) {
        let mut subscriptions = self.subscriptions.write();
        for (_, entry) in subscriptions.drain() {
            entry.active.store(false, Ordering::Release);
            if let Some(consumer_id) = entry.consumer.lock().take() {
                self.store.feed().unregister(consumer_id);
            }
        }
    }
}
