//! Change feed: ordered fan-out of committed mutations.
//!
//! The store publishes every committed mutation to the feed exactly once,
//! in sequence order. Each registered consumer gets its own bounded queue
//! so a slow consumer never blocks the writer or other consumers. When a
//! consumer's queue overflows it is failed with
//! [`StoreError::BackpressureExceeded`](crate::StoreError::BackpressureExceeded)
//! and must resynchronize from a fresh snapshot; records are never
//! silently dropped for a live consumer.

use crate::error::{Result, StoreError};
use crate::types::ChangeRecord;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{trace, warn};

/// Unique identifier for a feed consumer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConsumerId(pub u64);

/// Sender side of one consumer's queue.
struct Consumer {
    sender: Sender<Arc<ChangeRecord>>,
    lagged: Arc<AtomicBool>,
}

/// Receiving end of a feed registration.
pub struct FeedReceiver {
    id: ConsumerId,
    receiver: Receiver<Arc<ChangeRecord>>,
    lagged: Arc<AtomicBool>,
}

impl FeedReceiver {
    pub fn id(&self) -> ConsumerId {
        self.id
    }

    /// Receive the next change record, blocking.
    ///
    /// Returns `Ok(None)` once the consumer has been unregistered or the
    /// feed dropped; that is a normal end of stream, not a failure.
    /// Returns `BackpressureExceeded` if this consumer's queue overflowed,
    /// in which case any buffered records are discarded and the consumer
    /// must resynchronize from a fresh snapshot.
    pub fn recv(&self) -> Result<Option<Arc<ChangeRecord>>> {
        if self.lagged.load(Ordering::Acquire) {
            return Err(StoreError::BackpressureExceeded);
        }
        match self.receiver.recv() {
            Ok(record) => Ok(Some(record)),
            Err(_) => {
                if self.lagged.load(Ordering::Acquire) {
                    Err(StoreError::BackpressureExceeded)
                } else {
                    Ok(None)
                }
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv). `Ok(None)` here means
    /// no record is currently queued.
    pub fn try_recv(&self) -> Result<Option<Arc<ChangeRecord>>> {
        if self.lagged.load(Ordering::Acquire) {
            return Err(StoreError::BackpressureExceeded);
        }
        match self.receiver.try_recv() {
            Ok(record) => Ok(Some(record)),
            Err(crossbeam_channel::TryRecvError::Empty) => Ok(None),
            Err(crossbeam_channel::TryRecvError::Disconnected) => {
                if self.lagged.load(Ordering::Acquire) {
                    Err(StoreError::BackpressureExceeded)
                } else {
                    Ok(None)
                }
            }
        }
    }
}

/// Fan-out of change records to registered consumers.
pub struct ChangeFeed {
    consumers: RwLock<HashMap<ConsumerId, Consumer>>,
    next_id: AtomicU64,
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self {
            consumers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a consumer with a bounded queue of `buffer_size` records.
    pub fn register(&self, buffer_size: usize) -> FeedReceiver {
        let id = ConsumerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(buffer_size);
        let lagged = Arc::new(AtomicBool::new(false));

        self.consumers.write().insert(
            id,
            Consumer {
                sender,
                lagged: Arc::clone(&lagged),
            },
        );

        FeedReceiver {
            id,
            receiver,
            lagged,
        }
    }

    /// Remove a consumer. Unknown ids are a no-op.
    pub fn unregister(&self, id: ConsumerId) {
        self.consumers.write().remove(&id);
    }

    /// Deliver a record to every consumer, in publish order.
    ///
    /// Called by the store inside its write critical section, so delivery
    /// order matches global mutation order. Never blocks: a consumer whose
    /// queue is full is marked lagged and disconnected.
    pub fn publish(&self, record: Arc<ChangeRecord>) {
        trace!(sequence = record.sequence.0, "publishing change record");

        let mut overflowed = Vec::new();
        {
            let consumers = self.consumers.read();
            for (id, consumer) in consumers.iter() {
                match consumer.sender.try_send(Arc::clone(&record)) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        consumer.lagged.store(true, Ordering::Release);
                        overflowed.push(*id);
                    }
                    // Receiver already gone; reap it below.
                    Err(TrySendError::Disconnected(_)) => overflowed.push(*id),
                }
            }
        }

        if !overflowed.is_empty() {
            let mut consumers = self.consumers.write();
            for id in overflowed {
                if consumers.remove(&id).is_some() {
                    warn!(consumer = id.0, "feed consumer overflowed or disconnected");
                }
            }
        }
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.read().len()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}
