//! Per-subscription dispatch worker.
//!
//! Each subscription gets one worker thread that turns the change feed
//! into observer deliveries. Delivery to a given observer is strictly
//! serial and in mutation order; different subscriptions run on
//! independent threads and queues, so one slow observer cannot stall
//! another or the writer.

use crate::error::StoreError;
use crate::feed::{ConsumerId, FeedReceiver};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use tracing::{debug, warn};

use super::manager::{SubscriptionManager, SubscriptionView};
use super::types::{Observer, SubscriptionId};

/// Everything a dispatch worker shares with the manager.
///
/// The manager reference is weak so a parked worker never keeps the
/// engine alive after its owner drops it.
pub(crate) struct WorkerCtx {
    pub manager: Weak<SubscriptionManager>,
    pub id: SubscriptionId,
    pub observer: Arc<dyn Observer>,
    pub active: Arc<AtomicBool>,
    pub consumer: Arc<Mutex<Option<ConsumerId>>>,
    pub view: Arc<RwLock<SubscriptionView>>,
    pub buffer_size: usize,
}

pub(crate) fn spawn(ctx: WorkerCtx, receiver: FeedReceiver) {
    thread::spawn(move || run(ctx, receiver));
}

/// Outcome of one snapshot-then-stream pass.
enum Pass {
    /// Feed queue overflowed; take a fresh snapshot on a new consumer.
    Resync,
    /// Unsubscribed, feed closed, or observer disconnected.
    Done,
}

fn run(ctx: WorkerCtx, mut receiver: FeedReceiver) {
    loop {
        match pass(&ctx, &receiver) {
            Pass::Done => return,
            Pass::Resync => {
                warn!(
                    subscription = ctx.id.0,
                    "subscriber fell behind; resynchronizing from snapshot"
                );
                match reregister(&ctx) {
                    Some(fresh) => receiver = fresh,
                    None => return,
                }
            }
        }
    }
}

/// Deliver a snapshot, then stream deltas until the feed ends.
///
/// The feed consumer is registered before the snapshot is taken, so any
/// mutation committed in between is both queued and reflected in the
/// snapshot; such records are skipped by sequence number.
fn pass(ctx: &WorkerCtx, receiver: &FeedReceiver) -> Pass {
    let (matching, snapshot_seq) = {
        let Some(manager) = ctx.manager.upgrade() else {
            return Pass::Done;
        };
        let filter = ctx.view.read().filter().clone();
        manager.store().snapshot(&filter)
    };

    let deltas = ctx.view.write().reconcile(matching);
    for delta in deltas {
        if !ctx.active.load(Ordering::Acquire) {
            return Pass::Done;
        }
        if !ctx.observer.deliver(delta) {
            disconnect(ctx);
            return Pass::Done;
        }
    }

    loop {
        match receiver.recv() {
            Ok(Some(record)) => {
                if record.sequence <= snapshot_seq {
                    continue;
                }
                let delta = ctx.view.write().apply(&record.change);
                if let Some(delta) = delta {
                    if !ctx.active.load(Ordering::Acquire) {
                        return Pass::Done;
                    }
                    if !ctx.observer.deliver(delta) {
                        disconnect(ctx);
                        return Pass::Done;
                    }
                }
            }
            // Unsubscribed or the store went away.
            Ok(None) => return Pass::Done,
            Err(StoreError::BackpressureExceeded) => return Pass::Resync,
            Err(_) => return Pass::Done,
        }
    }
}

/// Register a replacement feed consumer after an overflow.
fn reregister(ctx: &WorkerCtx) -> Option<FeedReceiver> {
    let manager = ctx.manager.upgrade()?;
    let feed = manager.store().feed();
    let receiver = feed.register(ctx.buffer_size);

    let mut slot = ctx.consumer.lock();
    if !ctx.active.load(Ordering::Acquire) {
        // Unsubscribed while we were between consumers.
        feed.unregister(receiver.id());
        return None;
    }
    *slot = Some(receiver.id());
    Some(receiver)
}

/// Observer-side delivery failure degrades to a silent unsubscribe.
fn disconnect(ctx: &WorkerCtx) {
    debug!(
        subscription = ctx.id.0,
        "observer disconnected; removing subscription"
    );
    if let Some(manager) = ctx.manager.upgrade() {
        manager.unsubscribe(ctx.id);
    }
}
