//! Subscription layer errors.

use crate::config::ConfigError;
use opertree_core::{PathError, StorageError};
use thiserror::Error;

/// Errors returned by subscribable storage and the subscription manager.
#[derive(Debug, Error)]
pub enum SubscribeError {
    /// Storage operation failed
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Subscription request carried no paths
    #[error("subscription has no paths")]
    NoPaths,

    /// Subscription kind does not accept wildcard paths
    #[error("{kind} subscriptions require exact paths: {path}")]
    ExactPathRequired {
        /// Subscription kind
        kind: &'static str,
        /// Offending path
        path: String,
    },

    /// Initial sync deferred until the publisher is ready
    #[error("publisher not ready: {0}")]
    PublisherNotReady(String),

    /// Every publisher the subscription depends on went away
    #[error("all publishers gone: {0}")]
    AllPublishersGone(String),

    /// Publisher root was never registered
    #[error("unknown publisher: {0}")]
    UnknownPublisher(String),

    /// Subscription id is not registered
    #[error("unknown subscription: {0}")]
    UnknownSubscription(u64),

    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<PathError> for SubscribeError {
    fn from(err: PathError) -> Self {
        Self::Storage(err.into())
    }
}
