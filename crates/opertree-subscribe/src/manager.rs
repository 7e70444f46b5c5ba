//! Subscription manager.
//!
//! Owns every subscription and the path store indexing the active ones.
//! New subscriptions start pending; [`SubscriptionManager::initial_sync`]
//! sends each ready one the current state of its paths and then activates
//! it. [`SubscriptionManager::serve`] diffs two committed roots and delivers
//! the changes to every active subscription whose paths match.
//!
//! Both run under the storage's writer lock, so a subscription activated
//! against root R sees exactly the writes committed after R.

use crate::error::SubscribeError;
use crate::metadata::MetadataTracker;
use crate::path_store::{Registration, SubscriptionPathStore};
use crate::queue::{CloseReason, Offer};
use crate::subscription::{Delivery, Subscription, SubscriptionInfo, SubscriptionKind, SubscriptionState};
use opertree_core::codec;
use opertree_core::{
    visit_delta, visit_extended, CompiledExtPath, DeltaElemTag, DeltaEvent, DeltaVisitMode,
    DeltaVisitOptions, DeltaVisitOrder, ExtPathVisitOptions, NodeRef, SchemaRef, StorageError,
};
use opertree_proto::{
    DeltaValue, OperDelta, OperDeltaUnit, OperMetadata, OperProtocol, OperState, Patch, PatchNode,
    SubscriptionKey,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// Counters of one serve pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServeStats {
    /// Delta events visited
    pub events: usize,
    /// Items queued
    pub delivered: usize,
    /// Items dropped by backpressure
    pub dropped: usize,
}

type Encoded = (Option<Vec<u8>>, Option<Vec<u8>>);

/// Encoded old and new payloads of one event, at most once per protocol.
struct EncodeCache<'a> {
    schema: &'a SchemaRef,
    old: Option<&'a NodeRef>,
    new: Option<&'a NodeRef>,
    entries: HashMap<OperProtocol, Option<Encoded>>,
}

impl<'a> EncodeCache<'a> {
    fn new(event: &DeltaEvent<'a>) -> Self {
        Self {
            schema: event.schema,
            old: event.old,
            new: event.new,
            entries: HashMap::new(),
        }
    }

    fn get(&mut self, protocol: OperProtocol) -> Option<&Encoded> {
        let (schema, old, new) = (self.schema, self.old, self.new);
        self.entries
            .entry(protocol)
            .or_insert_with(|| {
                let encode = |node: &NodeRef| codec::encode(schema, node, protocol);
                match (old.map(encode).transpose(), new.map(encode).transpose()) {
                    (Ok(old), Ok(new)) => Some((old, new)),
                    (Err(err), _) | (_, Err(err)) => {
                        tracing::warn!(error = %err, protocol = %protocol, "Failed to encode change");
                        None
                    }
                }
            })
            .as_ref()
    }
}

/// Accumulated per-pass output of a delta or patch subscription.
enum Batch {
    Delta { path: Vec<String>, delta: OperDelta },
    Patch(Patch),
}

/// Registry of subscriptions.
#[derive(Default)]
pub struct SubscriptionManager {
    next_id: u64,
    subscriptions: HashMap<u64, Subscription>,
    pending: BTreeSet<u64>,
    path_store: SubscriptionPathStore,
    metadata: MetadataTracker,
}

impl SubscriptionManager {
    /// Create an empty manager.
    #[must_use]
    pub fn new(track_metadata: bool) -> Self {
        Self {
            next_id: 1,
            metadata: MetadataTracker::new(track_metadata),
            ..Self::default()
        }
    }

    pub(crate) fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub(crate) fn insert(&mut self, subscription: Subscription) {
        tracing::debug!(
            subscription = subscription.id,
            subscriber = %subscription.subscriber,
            kind = %subscription.kind,
            paths = subscription.paths.len(),
            "Added subscription"
        );
        self.pending.insert(subscription.id);
        self.subscriptions.insert(subscription.id, subscription);
    }

    /// Remove a subscription, unregistering it from the path store.
    /// Returns whether it existed.
    pub fn remove(&mut self, id: u64) -> bool {
        let Some(mut subscription) = self.subscriptions.remove(&id) else {
            return false;
        };
        if subscription.state == SubscriptionState::Active {
            for key in subscription.paths.keys() {
                let registration = Registration { id, key: *key };
                self.path_store.remove(&subscription.prefix(*key), registration);
            }
        }
        self.pending.remove(&id);
        subscription.state = SubscriptionState::Cancelled;
        tracing::debug!(subscription = id, subscriber = %subscription.subscriber, "Removed subscription");
        true
    }

    /// Publisher metadata.
    #[must_use]
    pub fn metadata(&self) -> &MetadataTracker {
        &self.metadata
    }

    /// Publisher metadata, mutably.
    pub fn metadata_mut(&mut self) -> &mut MetadataTracker {
        &mut self.metadata
    }

    /// Path store of active subscriptions.
    #[must_use]
    pub fn path_store(&self) -> &SubscriptionPathStore {
        &self.path_store
    }

    /// Number of subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    /// Whether no subscriptions exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Number of subscriptions waiting for initial sync.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// State of one subscription.
    #[must_use]
    pub fn state(&self, id: u64) -> Option<SubscriptionState> {
        self.subscriptions.get(&id).map(|s| s.state)
    }

    /// Diagnostic view of every subscription, by id.
    #[must_use]
    pub fn infos(&self) -> Vec<SubscriptionInfo> {
        let mut infos: Vec<_> = self.subscriptions.values().map(Subscription::info).collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    /// Whether initial sync may run for subscription `id` now.
    ///
    /// # Errors
    ///
    /// Returns `UnknownSubscription` for unknown ids and `PublisherNotReady`
    /// while its publisher has not confirmed.
    pub fn check_ready(&self, id: u64) -> Result<(), SubscribeError> {
        let subscription = self
            .subscriptions
            .get(&id)
            .ok_or(SubscribeError::UnknownSubscription(id))?;
        let root = subscription.publisher_root.as_deref();
        if self.metadata.is_ready(root) {
            Ok(())
        } else {
            Err(SubscribeError::PublisherNotReady(root.unwrap_or("/").to_string()))
        }
    }

    /// Run initial sync against `root` for every pending subscription whose
    /// publisher is ready, in registration order. Returns how many were
    /// activated.
    pub fn initial_sync(&mut self, schema: &SchemaRef, root: &NodeRef) -> usize {
        let pending: Vec<u64> = self.pending.iter().copied().collect();
        let mut activated = 0;

        for id in pending {
            if let Err(err) = self.check_ready(id) {
                tracing::debug!(subscription = id, reason = %err, "Deferring initial sync");
                continue;
            }
            let Some(subscription) = self.subscriptions.get(&id) else {
                continue;
            };

            let meta = self.metadata.metadata(subscription.publisher_root.as_deref());
            match sync_deliveries(subscription, schema, root, meta) {
                Ok(deliveries) => {
                    let count = deliveries.len();
                    let mut closed = false;
                    for delivery in deliveries {
                        match subscription.sink.offer(delivery) {
                            Offer::Closed => closed = true,
                            Offer::Rejected => {
                                tracing::warn!(subscription = id, "Delivery queue full during initial sync");
                            }
                            Offer::Queued | Offer::DroppedOldest => {}
                        }
                    }
                    if closed {
                        self.remove(id);
                        continue;
                    }
                    self.activate(id);
                    activated += 1;
                    tracing::debug!(subscription = id, items = count, "Initial sync complete");
                }
                Err(err) => {
                    tracing::warn!(subscription = id, error = %err, "Initial sync failed");
                    subscription
                        .sink
                        .close(CloseReason::InitialSyncFailed(err.to_string()));
                    self.remove(id);
                }
            }
        }
        activated
    }

    fn activate(&mut self, id: u64) {
        let Some(subscription) = self.subscriptions.get_mut(&id) else {
            return;
        };
        for key in subscription.paths.keys() {
            self.path_store
                .add(&subscription.prefix(*key), Registration { id, key: *key });
        }
        subscription.state = SubscriptionState::Active;
        self.pending.remove(&id);
    }

    /// Deliver the changes between two committed roots to every matching
    /// active subscription.
    pub fn serve(&mut self, schema: &SchemaRef, old: &NodeRef, new: &NodeRef) -> ServeStats {
        let mut stats = ServeStats::default();
        if self.path_store.is_empty() || Arc::ptr_eq(old, new) {
            return stats;
        }

        let mut batches: BTreeMap<(u64, SubscriptionKey), Batch> = BTreeMap::new();
        let mut closed = Vec::new();
        let options = DeltaVisitOptions {
            mode: DeltaVisitMode::Full,
            order: DeltaVisitOrder::ParentsFirst,
            output_id_paths: false,
        };

        {
            let subscriptions = &self.subscriptions;
            let path_store = &self.path_store;
            let metadata = &self.metadata;

            visit_delta(schema, old, new, options, |event| {
                stats.events += 1;
                let registrations = path_store.along(event.path);
                if registrations.is_empty() {
                    return;
                }
                let mut cache = EncodeCache::new(event);

                for (depth, registration) in registrations {
                    let Some(subscription) = subscriptions.get(&registration.id) else {
                        continue;
                    };
                    let Some(path) = subscription.paths.get(&registration.key) else {
                        continue;
                    };
                    if subscription.state != SubscriptionState::Active
                        || !matches_event(subscription.kind, path, depth, event)
                    {
                        continue;
                    }
                    let Some((old_bytes, new_bytes)) = cache.get(subscription.protocol) else {
                        continue;
                    };
                    let protocol = subscription.protocol;

                    match subscription.kind {
                        SubscriptionKind::Path => {
                            let meta = metadata.metadata(subscription.publisher_root.as_deref());
                            let value = DeltaValue::new(
                                old_bytes.clone().map(|b| OperState::new(protocol, b)),
                                new_bytes.clone().map(|b| stamped(OperState::new(protocol, b), meta)),
                            );
                            let delivery = Delivery::State {
                                key: registration.key,
                                path: event.path.to_vec(),
                                value,
                            };
                            offer(subscription, delivery, &mut stats, &mut closed);
                        }
                        SubscriptionKind::Delta => {
                            let batch = batches
                                .entry((registration.id, registration.key))
                                .or_insert_with(|| Batch::Delta {
                                    path: event.path[..depth].to_vec(),
                                    delta: OperDelta::new(protocol),
                                });
                            if let Batch::Delta { delta, .. } = batch {
                                delta.changes.push(OperDeltaUnit {
                                    path: event.path.to_vec(),
                                    old_state: old_bytes.clone(),
                                    new_state: new_bytes.clone(),
                                });
                            }
                        }
                        SubscriptionKind::Patch => {
                            let batch = batches
                                .entry((registration.id, registration.key))
                                .or_insert_with(|| {
                                    Batch::Patch(Patch::new(event.path[..depth].to_vec(), protocol))
                                });
                            if let Batch::Patch(patch) = batch {
                                let change = new_bytes.clone().map_or(PatchNode::Del, PatchNode::Val);
                                patch.root.insert(&event.path[depth..], change);
                            }
                        }
                    }
                }
            });
        }

        for ((id, key), batch) in batches {
            let Some(subscription) = self.subscriptions.get(&id) else {
                continue;
            };
            let meta = self.metadata.metadata(subscription.publisher_root.as_deref());
            let delivery = match batch {
                Batch::Delta { path, mut delta } => {
                    delta.metadata = meta;
                    Delivery::Delta { key, path, delta }
                }
                Batch::Patch(mut patch) => {
                    patch.metadata = meta;
                    Delivery::Patch { key, patch }
                }
            };
            offer(subscription, delivery, &mut stats, &mut closed);
        }

        for id in closed {
            self.remove(id);
        }
        self.path_store.prune();

        tracing::debug!(
            events = stats.events,
            delivered = stats.delivered,
            dropped = stats.dropped,
            "Served changes"
        );
        stats
    }

    /// Queue a heartbeat on every active subscription.
    pub fn heartbeat(&mut self) -> usize {
        let mut stats = ServeStats::default();
        let mut closed = Vec::new();

        for subscription in self.subscriptions.values() {
            if subscription.state != SubscriptionState::Active {
                continue;
            }
            let Some(key) = subscription.paths.keys().next().copied() else {
                continue;
            };
            let path = subscription.prefix(key);
            let meta = self.metadata.metadata(subscription.publisher_root.as_deref());
            let protocol = subscription.protocol;
            let delivery = match subscription.kind {
                SubscriptionKind::Path => Delivery::State {
                    key,
                    path,
                    value: DeltaValue::new(None, Some(OperState::heartbeat(protocol, meta))),
                },
                SubscriptionKind::Delta => Delivery::Delta {
                    key,
                    path,
                    delta: OperDelta {
                        metadata: meta,
                        ..OperDelta::new(protocol)
                    },
                },
                SubscriptionKind::Patch => Delivery::Patch {
                    key,
                    patch: Patch {
                        metadata: meta,
                        ..Patch::new(path, protocol)
                    },
                },
            };
            offer(subscription, delivery, &mut stats, &mut closed);
        }

        for id in closed {
            self.remove(id);
        }
        stats.delivered
    }

    /// Close and remove every subscription under the publisher `root`.
    /// Returns how many were closed.
    pub fn close_publisher(&mut self, root: &str) -> usize {
        let ids: Vec<u64> = self
            .subscriptions
            .values()
            .filter(|s| s.publisher_root.as_deref() == Some(root))
            .map(|s| s.id)
            .collect();
        for id in &ids {
            if let Some(subscription) = self.subscriptions.get(id) {
                subscription
                    .sink
                    .close(CloseReason::AllPublishersGone(root.to_string()));
            }
            self.remove(*id);
        }
        ids.len()
    }

    /// Remove subscriptions whose consumer is gone. Returns how many.
    pub fn reap(&mut self) -> usize {
        let gone: Vec<u64> = self
            .subscriptions
            .values()
            .filter(|s| s.sink.is_consumer_gone())
            .map(|s| s.id)
            .collect();
        for id in &gone {
            self.remove(*id);
        }
        gone.len()
    }

    /// Close every subscription.
    pub fn shutdown(&mut self) {
        for subscription in self.subscriptions.values() {
            subscription.sink.close(CloseReason::Shutdown);
        }
        let ids: Vec<u64> = self.subscriptions.keys().copied().collect();
        for id in ids {
            self.remove(id);
        }
    }
}

fn stamped(state: OperState, meta: Option<OperMetadata>) -> OperState {
    match meta {
        Some(meta) => state.with_metadata(meta),
        None => state,
    }
}

fn offer(subscription: &Subscription, delivery: Delivery, stats: &mut ServeStats, closed: &mut Vec<u64>) {
    match subscription.sink.offer(delivery) {
        Offer::Queued => stats.delivered += 1,
        Offer::DroppedOldest => {
            stats.delivered += 1;
            stats.dropped += 1;
            tracing::warn!(subscription = subscription.id, "Delivery queue full, dropped oldest item");
        }
        Offer::Rejected => {
            stats.dropped += 1;
            tracing::warn!(subscription = subscription.id, "Delivery queue full, rejected item");
        }
        Offer::Closed => closed.push(subscription.id),
    }
}

/// Whether an event at `event.path` concerns a registration at `depth` of
/// `path`.
///
/// Path subscriptions take every event whose path matches exactly. Delta
/// and patch subscriptions take minimal events at or below their paths,
/// plus whole additions and removals exactly at them.
fn matches_event(kind: SubscriptionKind, path: &CompiledExtPath, depth: usize, event: &DeltaEvent<'_>) -> bool {
    let (Some(suffix), Some(relative)) = (path.matchers.get(depth..), event.path.get(depth..)) else {
        return false;
    };
    if relative.len() < suffix.len() {
        return false;
    }
    let (head, rest) = relative.split_at(suffix.len());
    if !head.iter().zip(suffix).all(|(token, matcher)| matcher.matches(token)) {
        return false;
    }
    let minimal = event.tag == DeltaElemTag::Minimal;
    match kind {
        SubscriptionKind::Path => rest.is_empty(),
        SubscriptionKind::Delta | SubscriptionKind::Patch if rest.is_empty() => {
            minimal || event.is_add_or_remove()
        }
        SubscriptionKind::Delta | SubscriptionKind::Patch => minimal,
    }
}

/// The items initial sync sends: the current value of every match, as an
/// addition.
fn sync_deliveries(
    subscription: &Subscription,
    schema: &SchemaRef,
    root: &NodeRef,
    meta: Option<OperMetadata>,
) -> Result<Vec<Delivery>, SubscribeError> {
    let protocol = subscription.protocol;
    let mut deliveries = Vec::new();

    for (key, path) in &subscription.paths {
        let mut matches = Vec::new();
        visit_extended(
            schema,
            root,
            path,
            ExtPathVisitOptions::default(),
            |matched, schema, node| {
                let bytes = codec::encode(schema, node, protocol)?;
                matches.push((matched.to_vec(), bytes));
                Ok::<_, opertree_core::CodecError>(())
            },
        )
        .map_err(StorageError::from)?;

        let prefix = subscription.prefix(*key);
        match subscription.kind {
            SubscriptionKind::Path => {
                deliveries.extend(matches.into_iter().map(|(matched, bytes)| Delivery::State {
                    key: *key,
                    path: matched,
                    value: DeltaValue::new(None, Some(stamped(OperState::new(protocol, bytes), meta))),
                }));
            }
            SubscriptionKind::Delta if !matches.is_empty() => {
                let delta = OperDelta {
                    changes: matches
                        .into_iter()
                        .map(|(matched, bytes)| OperDeltaUnit {
                            path: matched,
                            old_state: None,
                            new_state: Some(bytes),
                        })
                        .collect(),
                    protocol,
                    metadata: meta,
                };
                deliveries.push(Delivery::Delta {
                    key: *key,
                    path: prefix,
                    delta,
                });
            }
            SubscriptionKind::Patch => {
                if let Some((_, bytes)) = matches.pop() {
                    let patch = Patch {
                        root: PatchNode::Val(bytes),
                        metadata: meta,
                        ..Patch::new(prefix, protocol)
                    };
                    deliveries.push(Delivery::Patch { key: *key, patch });
                }
            }
            SubscriptionKind::Delta => {}
        }
    }
    Ok(deliveries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackpressurePolicy;
    use crate::queue::DeliveryQueue;
    use crate::subscription::{delta_item, state_item, QueueSink};
    use opertree_core::{compile_extended, CowStorage, Field, PrimitiveType, Schema};
    use opertree_proto::{ExtendedPath, SubscriberId};
    use serde_json::json;

    fn schema() -> SchemaRef {
        let i32_ty = Schema::primitive(PrimitiveType::I32);
        Schema::structure(
            "Root",
            vec![
                Field::new(1, "a", Arc::clone(&i32_ty)),
                Field::new(
                    2,
                    "b",
                    Schema::map(Schema::primitive(PrimitiveType::String), i32_ty).unwrap(),
                ),
            ],
        )
        .unwrap()
    }

    fn subscription<T: Send + 'static>(
        manager: &mut SubscriptionManager,
        schema: &SchemaRef,
        kind: SubscriptionKind,
        path: &str,
        convert: fn(Delivery) -> Option<T>,
    ) -> (u64, Arc<DeliveryQueue<T>>) {
        let queue = Arc::new(DeliveryQueue::new(16, BackpressurePolicy::RejectNew));
        let path = ExtendedPath::parse(path).unwrap();
        let id = manager.allocate_id();
        manager.insert(Subscription {
            id,
            subscriber: SubscriberId::new("test"),
            kind,
            protocol: OperProtocol::Json,
            publisher_root: opertree_proto::publisher_root(&path),
            paths: BTreeMap::from([(0, compile_extended(schema, &path).unwrap())]),
            state: SubscriptionState::PendingInitialSync,
            sink: Box::new(QueueSink::new(Arc::clone(&queue), convert)),
        });
        (id, queue)
    }

    fn drain<T>(queue: &DeliveryQueue<T>) -> Vec<T> {
        std::iter::from_fn(|| queue.try_pop()).collect()
    }

    fn event<'a>(
        path: &'a [String],
        schema: &'a SchemaRef,
        old: Option<&'a NodeRef>,
        new: &'a NodeRef,
        tag: DeltaElemTag,
    ) -> DeltaEvent<'a> {
        DeltaEvent {
            path,
            schema,
            old,
            new: Some(new),
            tag,
        }
    }

    #[test]
    fn initial_sync_then_serve() {
        let s = schema();
        let mut storage = CowStorage::from_json(Arc::clone(&s), &json!({ "a": 1, "b": { "x": 5 } })).unwrap();
        let mut manager = SubscriptionManager::new(false);
        let (id, queue) = subscription(&mut manager, &s, SubscriptionKind::Delta, "/b", delta_item);

        assert_eq!(manager.initial_sync(&s, storage.root()), 1);
        assert_eq!(manager.state(id), Some(SubscriptionState::Active));
        let initial = drain(&queue);
        assert_eq!(initial.len(), 1);
        assert_eq!(initial[0].changes[0].path, vec!["b"]);

        let old = Arc::clone(storage.root());
        storage.set(&["b", "x"], &6).unwrap();
        storage.set(&["a"], &2).unwrap();
        manager.serve(&s, &old, storage.root());

        let served = drain(&queue);
        assert_eq!(served.len(), 1);
        let unit = &served[0].changes[..];
        assert_eq!(unit.len(), 1);
        assert_eq!(unit[0].path, vec!["b", "x"]);
        assert_eq!(unit[0].old_state.as_deref(), Some(&b"5"[..]));
        assert_eq!(unit[0].new_state.as_deref(), Some(&b"6"[..]));
    }

    #[test]
    fn wildcard_path_subscription_gets_one_item_per_match() {
        let s = schema();
        let mut storage =
            CowStorage::from_json(Arc::clone(&s), &json!({ "a": 1, "b": { "x": 5, "y": 9 } })).unwrap();
        let mut manager = SubscriptionManager::new(false);
        let (_, queue) = subscription(&mut manager, &s, SubscriptionKind::Path, "/b/*", state_item);

        manager.initial_sync(&s, storage.root());
        assert_eq!(drain(&queue).len(), 2);

        let old = Arc::clone(storage.root());
        storage.remove(&["b", "y"]).unwrap();
        storage.set(&["b", "z"], &1).unwrap();
        manager.serve(&s, &old, storage.root());

        let served = drain(&queue);
        assert_eq!(served.len(), 2);
        assert!(served.iter().any(|v| v.old_val.is_some() && v.new_val.is_none()));
        assert!(served.iter().any(|v| v.old_val.is_none() && v.new_val.is_some()));
    }

    #[test]
    fn not_ready_publisher_defers_sync() {
        let s = schema();
        let storage = CowStorage::from_json(Arc::clone(&s), &json!({ "a": 1, "b": {} })).unwrap();
        let mut manager = SubscriptionManager::new(true);
        let (id, _queue) = subscription(&mut manager, &s, SubscriptionKind::Path, "/a", state_item);

        assert_eq!(manager.initial_sync(&s, storage.root()), 0);
        assert!(matches!(
            manager.check_ready(id),
            Err(SubscribeError::PublisherNotReady(ref root)) if root == "a"
        ));

        manager.metadata_mut().register("a");
        manager.metadata_mut().confirm("a", 1);
        assert_eq!(manager.initial_sync(&s, storage.root()), 1);
        assert_eq!(manager.pending_len(), 0);
    }

    #[test]
    fn remove_prunes_path_store() {
        let s = schema();
        let storage = CowStorage::new(Arc::clone(&s));
        let mut manager = SubscriptionManager::new(false);
        let (id, _queue) = subscription(&mut manager, &s, SubscriptionKind::Path, "/b/x", state_item);
        manager.initial_sync(&s, storage.root());
        assert!(manager.path_store().contains_node(&["b", "x"]));

        assert!(manager.remove(id));
        assert!(manager.path_store().is_empty());
        assert!(!manager.path_store().contains_node(&["b"]));
        assert!(!manager.remove(id));
    }

    #[test]
    fn matching_rules() {
        let s = schema();
        let path = compile_extended(&s, &ExtendedPath::parse("/b").unwrap()).unwrap();
        let i32_ty = Schema::primitive(PrimitiveType::I32);
        let node: NodeRef = Arc::new(opertree_core::Node::Primitive(opertree_core::Value::Int(1)));
        let tokens = vec!["b".to_string(), "x".to_string()];

        let below_minimal = event(&tokens, &i32_ty, Some(&node), &node, DeltaElemTag::Minimal);
        assert!(matches_event(SubscriptionKind::Delta, &path, 1, &below_minimal));
        assert!(!matches_event(SubscriptionKind::Path, &path, 1, &below_minimal));

        let below_full = event(&tokens, &i32_ty, None, &node, DeltaElemTag::NotMinimal);
        assert!(!matches_event(SubscriptionKind::Delta, &path, 1, &below_full));

        let exact = compile_extended(&s, &ExtendedPath::parse("/b/x").unwrap()).unwrap();
        assert!(matches_event(SubscriptionKind::Delta, &exact, 2, &below_full));
        assert!(matches_event(SubscriptionKind::Path, &exact, 2, &below_full));
    }
}
