//! Subscription records and their delivery sinks.

use crate::queue::{CloseReason, DeliveryQueue, Offer, QueueStats};
use opertree_core::CompiledExtPath;
use opertree_proto::{
    DeltaValue, OperDelta, OperProtocol, OperState, Patch, SubscriberId, SubscriptionKey,
    TaggedItem,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// What a subscription receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionKind {
    /// Old and new state of each matching path
    Path,
    /// One delta per committed write
    Delta,
    /// One patch tree per committed write
    Patch,
}

impl SubscriptionKind {
    /// Lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Path => "path",
            Self::Delta => "delta",
            Self::Patch => "patch",
        }
    }
}

impl std::fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Waiting for initial sync
    PendingInitialSync,
    /// Registered in the path store and served on every write
    Active,
    /// Terminal
    Cancelled,
}

/// A unit handed to a subscription's sink.
#[derive(Debug, Clone)]
pub(crate) enum Delivery {
    State {
        key: SubscriptionKey,
        path: Vec<String>,
        value: DeltaValue<OperState>,
    },
    Delta {
        key: SubscriptionKey,
        path: Vec<String>,
        delta: OperDelta,
    },
    Patch {
        key: SubscriptionKey,
        patch: Patch,
    },
}

/// Type-erased writer side of a subscription's queue.
pub(crate) trait Sink: Send + Sync {
    fn offer(&self, delivery: Delivery) -> Offer;
    fn close(&self, reason: CloseReason);
    fn is_consumer_gone(&self) -> bool;
    fn stats(&self) -> QueueStats;
}

/// Sink converting deliveries into the stream's item type.
pub(crate) struct QueueSink<T> {
    queue: Arc<DeliveryQueue<T>>,
    convert: fn(Delivery) -> Option<T>,
}

impl<T> QueueSink<T> {
    pub(crate) fn new(queue: Arc<DeliveryQueue<T>>, convert: fn(Delivery) -> Option<T>) -> Self {
        Self { queue, convert }
    }
}

impl<T: Send + 'static> Sink for QueueSink<T> {
    fn offer(&self, delivery: Delivery) -> Offer {
        match (self.convert)(delivery) {
            Some(item) => self.queue.offer(item),
            None => Offer::Queued,
        }
    }

    fn close(&self, reason: CloseReason) {
        self.queue.close(reason);
    }

    fn is_consumer_gone(&self) -> bool {
        self.queue.is_consumer_gone()
    }

    fn stats(&self) -> QueueStats {
        self.queue.stats()
    }
}

pub(crate) fn state_item(delivery: Delivery) -> Option<DeltaValue<OperState>> {
    match delivery {
        Delivery::State { value, .. } => Some(value),
        _ => None,
    }
}

pub(crate) fn tagged_state_item(delivery: Delivery) -> Option<TaggedItem<DeltaValue<OperState>>> {
    match delivery {
        Delivery::State { key, path, value } => Some(TaggedItem { key, path, value }),
        _ => None,
    }
}

pub(crate) fn delta_item(delivery: Delivery) -> Option<OperDelta> {
    match delivery {
        Delivery::Delta { delta, .. } => Some(delta),
        _ => None,
    }
}

pub(crate) fn tagged_delta_item(delivery: Delivery) -> Option<TaggedItem<OperDelta>> {
    match delivery {
        Delivery::Delta { key, path, delta } => Some(TaggedItem {
            key,
            path,
            value: delta,
        }),
        _ => None,
    }
}

pub(crate) fn patch_item(delivery: Delivery) -> Option<Patch> {
    match delivery {
        Delivery::Patch { patch, .. } => Some(patch),
        _ => None,
    }
}

pub(crate) fn tagged_patch_item(delivery: Delivery) -> Option<TaggedItem<Patch>> {
    match delivery {
        Delivery::Patch { key, patch } => Some(TaggedItem {
            key,
            path: patch.base_path.clone(),
            value: patch,
        }),
        _ => None,
    }
}

/// A registered subscription.
pub(crate) struct Subscription {
    pub id: u64,
    pub subscriber: SubscriberId,
    pub kind: SubscriptionKind,
    pub protocol: OperProtocol,
    pub publisher_root: Option<String>,
    pub paths: BTreeMap<SubscriptionKey, CompiledExtPath>,
    pub state: SubscriptionState,
    pub sink: Box<dyn Sink>,
}

impl Subscription {
    /// Literal prefix of the path under `key`, where it is registered.
    pub fn prefix(&self, key: SubscriptionKey) -> Vec<String> {
        self.paths
            .get(&key)
            .map(|path| {
                path.path.elems[..path.path.literal_prefix_len()]
                    .iter()
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn info(&self) -> SubscriptionInfo {
        SubscriptionInfo {
            id: self.id,
            subscriber: self.subscriber.clone(),
            kind: self.kind,
            protocol: self.protocol,
            state: self.state,
            paths: self.paths.values().map(|p| p.path.to_string()).collect(),
            stats: self.sink.stats(),
        }
    }
}

/// Diagnostic view of a subscription.
#[derive(Debug, Clone)]
pub struct SubscriptionInfo {
    /// Subscription id
    pub id: u64,
    /// Owner
    pub subscriber: SubscriberId,
    /// Delivery kind
    pub kind: SubscriptionKind,
    /// Encoding of delivered payloads
    pub protocol: OperProtocol,
    /// Lifecycle state
    pub state: SubscriptionState,
    /// Subscribed paths, in key order
    pub paths: Vec<String>,
    /// Queue statistics
    pub stats: QueueStats,
}
