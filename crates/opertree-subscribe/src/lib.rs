//! # opertree Subscribe
//!
//! Change subscriptions over the opertree copy-on-write state tree.
//!
//! This crate provides:
//! - `SubscriptionPathStore`, an index of subscriptions by path prefix
//! - `SubscriptionManager`, which runs initial sync and serves each committed
//!   write to matching subscriptions as states, deltas or patches
//! - `SubscribableStorage`, single-writer storage with lock-free readers
//!   and bounded, non-blocking delivery queues exposed as streams
//!
//! ## Delivery guarantee
//!
//! Initial sync and serving both happen under the writer lock. A
//! subscription activated against root R receives every write committed
//! after R exactly once, in commit order.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod manager;
pub mod metadata;
pub mod path_store;
pub mod queue;
pub mod storage;
pub mod subscription;

pub use config::{BackpressurePolicy, ConfigError, SubscribeConfig};
pub use error::SubscribeError;
pub use manager::{ServeStats, SubscriptionManager};
pub use metadata::MetadataTracker;
pub use path_store::{Registration, SubscriptionPathStore};
pub use queue::{CloseReason, DeliveryQueue, Offer, QueueStats, SubscriptionStream, Unsubscribe};
pub use storage::{SubscribableStorage, TypedSubscription};
pub use subscription::{SubscriptionInfo, SubscriptionKind, SubscriptionState};
