//! Subscription-facing types: deltas, configuration, observer handles.

use crate::query::{Filter, Projection};
use crate::types::{Document, DocumentId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Unique identifier for a subscription.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

impl fmt::Debug for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubscriptionId({})", self.0)
    }
}

/// An incremental change to a subscriber's visible view.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Delta {
    /// A document entered the visible set. Carries the projected view.
    Added { document: Document },

    /// A visible document changed. In diff mode `fields` holds only the
    /// projected fields whose value changed; in full-document mode it
    /// holds the entire projected document. `cleared` names projected
    /// fields that disappeared.
    Changed {
        id: DocumentId,
        fields: Map<String, Value>,
        cleared: Vec<String>,
    },

    /// A document left the visible set.
    Removed { id: DocumentId },
}

impl Delta {
    /// The identifier of the affected document.
    pub fn id(&self) -> &DocumentId {
        match self {
            Delta::Added { document } => &document.id,
            Delta::Changed { id, .. } => id,
            Delta::Removed { id } => id,
        }
    }
}

/// How changes to a still-matching document are delivered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Diff against the subscriber's known state; suppress updates whose
    /// projected view is unchanged.
    #[default]
    Diff,

    /// Resend the full projected document on every update of a matching
    /// document, even when the projected fields are identical.
    FullDocument,
}

/// Configuration for a subscription.
#[derive(Clone, Debug)]
pub struct SubscriptionConfig {
    pub filter: Filter,

    pub projection: Projection,

    pub mode: DeliveryMode,

    /// Max change records buffered for this subscription before it is
    /// forced to resynchronize from a fresh snapshot.
    /// Default: 1024
    pub buffer_size: usize,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            filter: Filter::all(),
            projection: Projection::All,
            mode: DeliveryMode::Diff,
            buffer_size: 1024,
        }
    }
}

impl SubscriptionConfig {
    /// Subscribe to every document matching the filter, all fields.
    pub fn filtered(filter: Filter) -> Self {
        Self {
            filter,
            ..Default::default()
        }
    }
}

/// Delivery sink supplied by the transport/session layer.
///
/// `deliver` is called serially per subscription, in mutation order. It
/// may block; back-pressure then accumulates in the subscription's
/// bounded feed queue. Returning `false` signals that the receiving side
/// is gone and is treated as an implicit unsubscribe.
pub trait Observer: Send + Sync {
    fn deliver(&self, delta: Delta) -> bool;
}

/// [`Observer`] backed by a crossbeam channel.
pub struct ChannelObserver {
    sender: crossbeam_channel::Sender<Delta>,
}

impl ChannelObserver {
    /// Channel without capacity limit; the subscriber's feed buffer is
    /// then the only back-pressure bound.
    pub fn unbounded() -> (Self, crossbeam_channel::Receiver<Delta>) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (Self { sender }, receiver)
    }

    /// Channel holding at most `capacity` undelivered deltas; delivery
    /// blocks the subscription's dispatch thread once full.
    pub fn bounded(capacity: usize) -> (Self, crossbeam_channel::Receiver<Delta>) {
        let (sender, receiver) = crossbeam_channel::bounded(capacity);
        (Self { sender }, receiver)
    }
}

impl Observer for ChannelObserver {
    fn deliver(&self, delta: Delta) -> bool {
        self.sender.send(delta).is_ok()
    }
}

/// Handle to a channel-backed subscription.
pub struct SubscriptionHandle {
    pub id: SubscriptionId,

    /// Channel to receive deltas.
    pub receiver: crossbeam_channel::Receiver<Delta>,
}

impl SubscriptionHandle {
    /// Receive the next delta (blocking).
    pub fn recv(&self) -> Result<Delta, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a delta (non-blocking).
    pub fn try_recv(&self) -> Result<Delta, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<Delta, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}
