//! Subscribable storage.
//!
//! Wraps a [`CowStorage`] behind a single writer lock. Every committed write
//! is diffed against the previous root and served to active subscriptions
//! before the new root is published to readers, all under the lock. Readers
//! load the published root from an [`ArcSwap`] and never take the lock.

use crate::config::SubscribeConfig;
use crate::error::SubscribeError;
use crate::manager::SubscriptionManager;
use crate::queue::{DeliveryQueue, SubscriptionStream, Unsubscribe};
use crate::subscription::{
    delta_item, patch_item, state_item, tagged_delta_item, tagged_patch_item, tagged_state_item,
    Delivery, QueueSink, Subscription, SubscriptionInfo, SubscriptionKind, SubscriptionState,
};
use arc_swap::ArcSwap;
use futures::{Stream, StreamExt};
use opertree_core::codec;
use opertree_core::{
    canonicalize, compile_extended, resolve, CompiledExtPath, CowStorage, Node, NodeRef,
    SchemaRef, Snapshot, StatePatch, StorageError,
};
use opertree_proto::{
    publisher_root, DeltaValue, ExtendedPath, OperDelta, OperProtocol, OperState, Patch,
    SubscriberId, SubscriptionKey, TaggedItem, TaggedOperState,
};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{ready, Context, Poll};
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

struct Writer {
    storage: CowStorage,
    manager: SubscriptionManager,
}

struct Shared {
    schema: SchemaRef,
    config: SubscribeConfig,
    current: ArcSwap<Node>,
    writer: Mutex<Writer>,
}

impl Unsubscribe for Shared {
    fn unsubscribe(&self, id: u64) {
        self.writer.lock().manager.remove(id);
    }
}

impl Shared {
    /// One serve loop iteration: drop abandoned subscriptions, retry
    /// pending initial syncs and send heartbeats when due.
    fn tick(&self, last_heartbeat: &mut Instant) {
        let mut writer = self.writer.lock();
        let Writer { storage, manager } = &mut *writer;

        let reaped = manager.reap();
        if reaped > 0 {
            tracing::debug!(count = reaped, "Reaped abandoned subscriptions");
        }
        if manager.pending_len() > 0 {
            manager.initial_sync(storage.schema(), storage.root());
        }
        if let Some(interval) = self.config.heartbeat_interval {
            if last_heartbeat.elapsed() >= interval {
                let sent = manager.heartbeat();
                tracing::trace!(count = sent, "Sent heartbeats");
                *last_heartbeat = Instant::now();
            }
        }
    }
}

/// Copy-on-write storage with change subscriptions.
///
/// Cloning is cheap; clones share the same tree and subscriptions.
#[derive(Clone)]
pub struct SubscribableStorage {
    shared: Arc<Shared>,
}

impl SubscribableStorage {
    /// Create a storage holding the schema's default tree.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid.
    pub fn new(schema: SchemaRef, config: SubscribeConfig) -> Result<Self, SubscribeError> {
        Self::from_storage(CowStorage::new(schema), config)
    }

    /// Wrap an existing storage.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid.
    pub fn from_storage(mut storage: CowStorage, config: SubscribeConfig) -> Result<Self, SubscribeError> {
        config.validate()?;
        storage.publish();
        let schema = Arc::clone(storage.schema());
        let current = ArcSwap::new(Arc::clone(storage.root()));
        let manager = SubscriptionManager::new(config.track_metadata);

        tracing::info!(
            schema = %schema.name,
            queue_capacity = config.queue_capacity,
            backpressure = %config.backpressure,
            track_metadata = config.track_metadata,
            "Created subscribable storage"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                schema,
                config,
                current,
                writer: Mutex::new(Writer { storage, manager }),
            }),
        })
    }

    /// Schema of the tree.
    #[must_use]
    pub fn schema(&self) -> &SchemaRef {
        &self.shared.schema
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &SubscribeConfig {
        &self.shared.config
    }

    /// The most recently published version. Lock-free.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        Snapshot::new(Arc::clone(&self.shared.schema), self.root())
    }

    /// The most recently published root. Lock-free.
    #[must_use]
    pub fn root(&self) -> NodeRef {
        self.shared.current.load_full()
    }

    /// Read the value at `path` as a native type.
    ///
    /// # Errors
    ///
    /// Same as [`Snapshot::get`].
    pub fn get<T: DeserializeOwned, S: AsRef<str>>(&self, path: &[S]) -> Result<T, SubscribeError> {
        Ok(self.snapshot().get(path)?)
    }

    /// Read the value at `path` encoded with `protocol`.
    ///
    /// # Errors
    ///
    /// Same as [`Snapshot::get_encoded`].
    pub fn get_encoded<S: AsRef<str>>(
        &self,
        path: &[S],
        protocol: OperProtocol,
    ) -> Result<OperState, SubscribeError> {
        Ok(self.snapshot().get_encoded(path, protocol)?)
    }

    /// Read every value matching an extended path.
    ///
    /// # Errors
    ///
    /// Same as [`Snapshot::get_encoded_extended`].
    pub fn get_encoded_extended(
        &self,
        path: &ExtendedPath,
        protocol: OperProtocol,
    ) -> Result<Vec<TaggedOperState>, SubscribeError> {
        Ok(self.snapshot().get_encoded_extended(path, protocol)?)
    }

    /// Write a native value at `path`.
    ///
    /// # Errors
    ///
    /// Same as [`CowStorage::set`]; the tree is left unchanged on error.
    pub fn set<T: Serialize + ?Sized, S: AsRef<str>>(&self, path: &[S], value: &T) -> Result<(), SubscribeError> {
        self.write(first_token(&self.shared.schema, path), |storage| storage.set(path, value))
    }

    /// Decode an encoded state and write it at `path`.
    ///
    /// # Errors
    ///
    /// Same as [`CowStorage::set_encoded`].
    pub fn set_encoded<S: AsRef<str>>(&self, path: &[S], state: &OperState) -> Result<(), SubscribeError> {
        self.write(first_token(&self.shared.schema, path), |storage| storage.set_encoded(path, state))
    }

    /// Insert into the list, map or set holding `path`.
    ///
    /// # Errors
    ///
    /// Same as [`CowStorage::add`].
    pub fn add<T: Serialize + ?Sized, S: AsRef<str>>(&self, path: &[S], value: &T) -> Result<(), SubscribeError> {
        self.write(first_token(&self.shared.schema, path), |storage| storage.add(path, value))
    }

    /// Remove the node at `path`.
    ///
    /// # Errors
    ///
    /// Same as [`CowStorage::remove`].
    pub fn remove<S: AsRef<str>>(&self, path: &[S]) -> Result<(), SubscribeError> {
        self.write(first_token(&self.shared.schema, path), |storage| storage.remove(path))
    }

    /// Apply a change unit. Units applied before a failing one stay
    /// committed and are served.
    ///
    /// # Errors
    ///
    /// Same as [`CowStorage::patch`].
    pub fn patch(&self, patch: &StatePatch) -> Result<(), SubscribeError> {
        self.write(patch_roots(&self.shared.schema, patch), |storage| storage.patch(patch))
    }

    fn write<R>(
        &self,
        roots: Vec<String>,
        f: impl FnOnce(&mut CowStorage) -> Result<R, StorageError>,
    ) -> Result<R, SubscribeError> {
        let mut writer = self.shared.writer.lock();
        let Writer { storage, manager } = &mut *writer;

        let old = Arc::clone(storage.root());
        let result = f(storage);

        if !Arc::ptr_eq(&old, storage.root()) {
            let now = chrono::Utc::now().timestamp_millis();
            for root in &roots {
                manager.metadata_mut().published(root, now);
            }
            manager.serve(storage.schema(), &old, storage.root());
            storage.publish();
            self.shared.current.store(Arc::clone(storage.root()));
        }
        if manager.pending_len() > 0 {
            manager.initial_sync(storage.schema(), storage.root());
        }
        Ok(result?)
    }

    /// Register a publisher root.
    pub fn register_publisher(&self, root: &str) {
        self.shared.writer.lock().manager.metadata_mut().register(root);
        tracing::info!(root = %root, "Registered publisher");
    }

    /// Mark a publisher as having confirmed its state, releasing pending
    /// subscriptions that wait for it.
    ///
    /// # Errors
    ///
    /// Returns `UnknownPublisher` if the root is not registered.
    pub fn confirm_publisher(&self, root: &str) -> Result<(), SubscribeError> {
        let mut writer = self.shared.writer.lock();
        let Writer { storage, manager } = &mut *writer;
        let now = chrono::Utc::now().timestamp_millis();
        if !manager.metadata_mut().confirm(root, now) {
            return Err(SubscribeError::UnknownPublisher(root.to_string()));
        }
        let activated = manager.initial_sync(storage.schema(), storage.root());
        tracing::debug!(root = %root, activated, "Publisher confirmed");
        Ok(())
    }

    /// Unregister a publisher root and close every subscription under it.
    /// Returns how many subscriptions were closed.
    ///
    /// # Errors
    ///
    /// Returns `UnknownPublisher` if the root is not registered.
    pub fn unregister_publisher(&self, root: &str) -> Result<usize, SubscribeError> {
        let mut writer = self.shared.writer.lock();
        if !writer.manager.metadata_mut().unregister(root) {
            return Err(SubscribeError::UnknownPublisher(root.to_string()));
        }
        let closed = writer.manager.close_publisher(root);
        tracing::info!(root = %root, closed, "Unregistered publisher");
        Ok(closed)
    }

    /// Subscribe to a typed value. Items are decoded into `T`; heartbeats
    /// are skipped.
    ///
    /// # Errors
    ///
    /// Returns error if the path is invalid for the schema.
    pub fn subscribe<T: DeserializeOwned, S: AsRef<str>>(
        &self,
        subscriber: impl Into<SubscriberId>,
        path: &[S],
    ) -> Result<TypedSubscription<T>, SubscribeError> {
        let schema = resolve(&self.shared.schema, path)?.schema;
        let inner = self.subscribe_encoded(subscriber, path, OperProtocol::Json)?;
        Ok(TypedSubscription {
            inner,
            schema,
            _marker: PhantomData,
        })
    }

    /// Subscribe to the encoded old and new state of `path`.
    ///
    /// # Errors
    ///
    /// Returns error if the path is invalid for the schema.
    pub fn subscribe_encoded<S: AsRef<str>>(
        &self,
        subscriber: impl Into<SubscriberId>,
        path: &[S],
        protocol: OperProtocol,
    ) -> Result<SubscriptionStream<DeltaValue<OperState>>, SubscribeError> {
        self.register(
            subscriber.into(),
            SubscriptionKind::Path,
            protocol,
            vec![ExtendedPath::exact(path)],
            state_item,
        )
    }

    /// Subscribe to one delta per write touching `path` or below.
    ///
    /// # Errors
    ///
    /// Returns error if the path is invalid for the schema.
    pub fn subscribe_delta<S: AsRef<str>>(
        &self,
        subscriber: impl Into<SubscriberId>,
        path: &[S],
        protocol: OperProtocol,
    ) -> Result<SubscriptionStream<OperDelta>, SubscribeError> {
        self.register(
            subscriber.into(),
            SubscriptionKind::Delta,
            protocol,
            vec![ExtendedPath::exact(path)],
            delta_item,
        )
    }

    /// Subscribe to one patch per write touching `path` or below.
    ///
    /// # Errors
    ///
    /// Returns error if the path is invalid for the schema.
    pub fn subscribe_patch<S: AsRef<str>>(
        &self,
        subscriber: impl Into<SubscriberId>,
        path: &[S],
        protocol: OperProtocol,
    ) -> Result<SubscriptionStream<Patch>, SubscribeError> {
        self.register(
            subscriber.into(),
            SubscriptionKind::Patch,
            protocol,
            vec![ExtendedPath::exact(path)],
            patch_item,
        )
    }

    /// Subscribe to the encoded state of every path matching any of
    /// `paths`. Items are tagged with the index of the matching path.
    ///
    /// # Errors
    ///
    /// Returns error if `paths` is empty or any path is invalid.
    pub fn subscribe_encoded_extended(
        &self,
        subscriber: impl Into<SubscriberId>,
        paths: Vec<ExtendedPath>,
        protocol: OperProtocol,
    ) -> Result<SubscriptionStream<TaggedItem<DeltaValue<OperState>>>, SubscribeError> {
        self.register(
            subscriber.into(),
            SubscriptionKind::Path,
            protocol,
            paths,
            tagged_state_item,
        )
    }

    /// Subscribe to deltas below any of `paths`, one item per path and
    /// write.
    ///
    /// # Errors
    ///
    /// Returns error if `paths` is empty or any path is invalid.
    pub fn subscribe_delta_extended(
        &self,
        subscriber: impl Into<SubscriberId>,
        paths: Vec<ExtendedPath>,
        protocol: OperProtocol,
    ) -> Result<SubscriptionStream<TaggedItem<OperDelta>>, SubscribeError> {
        self.register(
            subscriber.into(),
            SubscriptionKind::Delta,
            protocol,
            paths,
            tagged_delta_item,
        )
    }

    /// Subscribe to patches below several exact paths, one item per path
    /// and write.
    ///
    /// # Errors
    ///
    /// Returns `ExactPathRequired` for wildcard paths, or error if `paths`
    /// is empty or any path is invalid.
    pub fn subscribe_patch_extended(
        &self,
        subscriber: impl Into<SubscriberId>,
        paths: Vec<ExtendedPath>,
        protocol: OperProtocol,
    ) -> Result<SubscriptionStream<TaggedItem<Patch>>, SubscribeError> {
        self.register(
            subscriber.into(),
            SubscriptionKind::Patch,
            protocol,
            paths,
            tagged_patch_item,
        )
    }

    fn register<T: Send + 'static>(
        &self,
        subscriber: SubscriberId,
        kind: SubscriptionKind,
        protocol: OperProtocol,
        paths: Vec<ExtendedPath>,
        convert: fn(Delivery) -> Option<T>,
    ) -> Result<SubscriptionStream<T>, SubscribeError> {
        if paths.is_empty() {
            return Err(SubscribeError::NoPaths);
        }
        let mut compiled: BTreeMap<SubscriptionKey, CompiledExtPath> = BTreeMap::new();
        for (key, path) in (0..).zip(paths) {
            if kind == SubscriptionKind::Patch && !path.is_exact() {
                return Err(SubscribeError::ExactPathRequired {
                    kind: kind.as_str(),
                    path: path.to_string(),
                });
            }
            compiled.insert(key, compile_extended(&self.shared.schema, &path)?);
        }
        let publisher = common_root(compiled.values().map(|c| &c.path));

        let config = &self.shared.config;
        let queue = Arc::new(DeliveryQueue::new(config.queue_capacity, config.backpressure));

        let mut writer = self.shared.writer.lock();
        let Writer { storage, manager } = &mut *writer;
        let id = manager.allocate_id();
        manager.insert(Subscription {
            id,
            subscriber,
            kind,
            protocol,
            publisher_root: publisher,
            paths: compiled,
            state: SubscriptionState::PendingInitialSync,
            sink: Box::new(QueueSink::new(Arc::clone(&queue), convert)),
        });
        manager.initial_sync(storage.schema(), storage.root());
        drop(writer);

        let owner: Weak<dyn Unsubscribe> = Arc::downgrade(&self.shared) as Weak<Shared>;
        Ok(SubscriptionStream::new(id, queue, owner))
    }

    /// Remove a subscription. Dropping its stream does the same.
    pub fn unsubscribe(&self, id: u64) -> bool {
        self.shared.writer.lock().manager.remove(id)
    }

    /// Retry initial sync for pending subscriptions. Returns how many were
    /// activated.
    pub fn sync_pending(&self) -> usize {
        let mut writer = self.shared.writer.lock();
        let Writer { storage, manager } = &mut *writer;
        manager.initial_sync(storage.schema(), storage.root())
    }

    /// Queue a heartbeat on every active subscription.
    pub fn heartbeat(&self) -> usize {
        self.shared.writer.lock().manager.heartbeat()
    }

    /// Lifecycle state of a subscription.
    #[must_use]
    pub fn subscription_state(&self, id: u64) -> Option<SubscriptionState> {
        self.shared.writer.lock().manager.state(id)
    }

    /// Diagnostic view of every subscription.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        self.shared.writer.lock().manager.infos()
    }

    /// Number of registrations in the path store and of lookup nodes.
    #[must_use]
    pub fn path_store_size(&self) -> (usize, usize) {
        let writer = self.shared.writer.lock();
        let store = writer.manager.path_store();
        (store.len(), store.node_count())
    }

    /// Close every subscription.
    pub fn shutdown(&self) {
        self.shared.writer.lock().manager.shutdown();
        tracing::info!("Subscribable storage shut down");
    }

    /// Spawn the background loop retrying pending initial syncs, reaping
    /// abandoned subscriptions and sending heartbeats. The loop stops once
    /// every handle to the storage is dropped.
    #[must_use]
    pub fn spawn_serve_loop(&self) -> JoinHandle<()> {
        let shared = Arc::downgrade(&self.shared);
        let period = self.shared.config.serve_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut last_heartbeat = Instant::now();

            loop {
                ticker.tick().await;
                let Some(shared) = shared.upgrade() else {
                    break;
                };
                shared.tick(&mut last_heartbeat);
            }
            tracing::debug!("Serve loop stopped");
        })
    }
}

impl std::fmt::Debug for SubscribableStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscribableStorage")
            .field("schema", &self.shared.schema.name)
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

/// Canonical first token of `path`, naming its publisher root.
fn first_token<S: AsRef<str>>(schema: &SchemaRef, path: &[S]) -> Vec<String> {
    path.first()
        .and_then(|token| canonicalize(schema, std::slice::from_ref(token)).ok())
        .unwrap_or_default()
}

fn patch_roots(schema: &SchemaRef, patch: &StatePatch) -> Vec<String> {
    let mut roots: Vec<String> = match patch {
        StatePatch::Delta(delta) => delta
            .changes
            .iter()
            .flat_map(|u| first_token(schema, &u.path))
            .collect(),
        StatePatch::State(tagged) => first_token(schema, &tagged.path),
        StatePatch::Tree(tree) => match (tree.base_path.is_empty(), &tree.root) {
            (false, _) => first_token(schema, &tree.base_path),
            (true, opertree_proto::PatchNode::Children(children)) => children
                .keys()
                .flat_map(|key| first_token(schema, std::slice::from_ref(key)))
                .collect(),
            (true, _) => Vec::new(),
        },
    };
    roots.sort();
    roots.dedup();
    roots
}

/// The publisher root shared by every path, if any.
fn common_root<'a>(paths: impl IntoIterator<Item = &'a ExtendedPath>) -> Option<String> {
    let mut roots = paths.into_iter().map(publisher_root);
    let first = roots.next()??;
    roots.all(|root| root.as_deref() == Some(first.as_str())).then_some(first)
}

/// Stream of typed values at one path.
pub struct TypedSubscription<T> {
    inner: SubscriptionStream<DeltaValue<OperState>>,
    schema: SchemaRef,
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypedSubscription<T> {
    /// Subscription id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id()
    }

    /// The underlying encoded stream.
    #[must_use]
    pub fn inner(&self) -> &SubscriptionStream<DeltaValue<OperState>> {
        &self.inner
    }
}

impl<T: DeserializeOwned> Stream for TypedSubscription<T> {
    type Item = DeltaValue<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            let Some(value) = ready!(this.inner.poll_next_unpin(cx)) else {
                return Poll::Ready(None);
            };
            if value.new_val.as_ref().is_some_and(|state| state.is_heartbeat) {
                continue;
            }
            let schema = &this.schema;
            let decoded = value.try_map(|state| {
                let node = codec::decode_state(schema, &state, Some(OperProtocol::Json))?;
                codec::to_native::<T>(schema, &node)
            });
            match decoded {
                Ok(value) => return Poll::Ready(Some(value)),
                Err(err) => {
                    tracing::warn!(subscription = this.inner.id(), error = %err, "Dropping undecodable item");
                }
            }
        }
    }
}

impl<T> std::fmt::Debug for TypedSubscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypedSubscription")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opertree_core::{Field, PrimitiveType, Schema};
    use serde_json::json;

    fn storage() -> SubscribableStorage {
        let i32_ty = Schema::primitive(PrimitiveType::I32);
        let schema = Schema::structure(
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
        .unwrap();
        let inner = CowStorage::from_json(schema, &json!({ "a": 1, "b": {} })).unwrap();
        SubscribableStorage::from_storage(inner, SubscribeConfig::default()).unwrap()
    }

    #[test]
    fn readers_see_committed_writes() {
        let storage = storage();
        let before = storage.snapshot();
        storage.set(&["a"], &2).unwrap();
        assert_eq!(storage.get::<i32, _>(&["a"]).unwrap(), 2);
        assert_eq!(before.get::<i32, _>(&["a"]).unwrap(), 1);
    }

    #[test]
    fn failed_write_publishes_nothing() {
        let storage = storage();
        let root = storage.root();
        assert!(storage.set(&["a"], "text").is_err());
        assert!(Arc::ptr_eq(&root, &storage.root()));
    }

    #[test]
    fn malformed_request_rejected_up_front() {
        let storage = storage();
        assert!(matches!(
            storage.subscribe_encoded_extended("s", Vec::new(), OperProtocol::Json),
            Err(SubscribeError::NoPaths)
        ));
        assert!(storage
            .subscribe_delta("s", &["zz"], OperProtocol::Json)
            .is_err());
        let wildcard = ExtendedPath::parse("/b/*").unwrap();
        assert!(matches!(
            storage.subscribe_patch_extended("s", vec![wildcard], OperProtocol::Json),
            Err(SubscribeError::ExactPathRequired { .. })
        ));
        assert!(storage.subscriptions().is_empty());
    }

    #[test]
    fn dropping_stream_unsubscribes() {
        let storage = storage();
        let stream = storage
            .subscribe_delta("s", &["b", "x"], OperProtocol::Compact)
            .unwrap();
        assert_eq!(storage.subscription_state(stream.id()), Some(SubscriptionState::Active));
        assert_eq!(storage.path_store_size(), (1, 3));

        drop(stream);
        assert!(storage.subscriptions().is_empty());
        assert_eq!(storage.path_store_size(), (0, 1));
    }

    #[test]
    fn common_publisher_root() {
        let paths = |raw: &[&str]| -> Vec<ExtendedPath> {
            raw.iter().map(|p| ExtendedPath::parse(p).unwrap()).collect()
        };
        assert_eq!(common_root(&paths(&["/b/x", "/b/*"])), Some("b".to_string()));
        assert_eq!(common_root(&paths(&["/b/x", "/a"])), None);
        assert_eq!(common_root(&paths(&["/*"])), None);
    }
}
