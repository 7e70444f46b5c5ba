//! Publisher metadata and the readiness gate.

use opertree_proto::OperMetadata;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Default)]
struct PublisherState {
    metadata: OperMetadata,
    confirmed: bool,
}

/// Tracks registered publisher roots and their timestamps.
///
/// A root is ready once it is registered and has confirmed its state. With
/// tracking disabled every root is ready and no metadata is attached.
#[derive(Debug, Default)]
pub struct MetadataTracker {
    enabled: bool,
    publishers: HashMap<String, PublisherState>,
}

impl MetadataTracker {
    /// Create a tracker.
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            publishers: HashMap::new(),
        }
    }

    /// Whether readiness is enforced.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Register a publisher root. Re-registering keeps existing metadata.
    pub fn register(&mut self, root: &str) {
        self.publishers.entry(root.to_string()).or_default();
    }

    /// Unregister a publisher root. Returns whether it was registered.
    pub fn unregister(&mut self, root: &str) -> bool {
        self.publishers.remove(root).is_some()
    }

    /// Whether `root` is registered.
    #[must_use]
    pub fn is_registered(&self, root: &str) -> bool {
        self.publishers.contains_key(root)
    }

    /// Mark `root` as having confirmed its state at `now_ms`. Returns false
    /// for unregistered roots.
    pub fn confirm(&mut self, root: &str, now_ms: i64) -> bool {
        let Some(publisher) = self.publishers.get_mut(root) else {
            return false;
        };
        publisher.confirmed = true;
        publisher.metadata.last_confirmed_at = Some(now_ms);
        true
    }

    /// Record a write below `root`.
    pub fn published(&mut self, root: &str, now_ms: i64) {
        if let Some(publisher) = self.publishers.get_mut(root) {
            publisher.metadata.last_published_at = Some(now_ms);
        }
    }

    /// Whether subscriptions under `root` may run initial sync. Paths
    /// without a literal root are always ready.
    #[must_use]
    pub fn is_ready(&self, root: Option<&str>) -> bool {
        if !self.enabled {
            return true;
        }
        root.map_or(true, |root| {
            self.publishers.get(root).is_some_and(|p| p.confirmed)
        })
    }

    /// Metadata to attach to items served under `root`.
    #[must_use]
    pub fn metadata(&self, root: Option<&str>) -> Option<OperMetadata> {
        if !self.enabled {
            return None;
        }
        let publisher = self.publishers.get(root?)?;
        Some(publisher.metadata.served_now())
    }

    /// Registered roots.
    pub fn roots(&self) -> impl Iterator<Item = &str> {
        self.publishers.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_tracker_is_always_ready() {
        let tracker = MetadataTracker::new(false);
        assert!(tracker.is_ready(Some("agent")));
        assert!(tracker.metadata(Some("agent")).is_none());
    }

    #[test]
    fn ready_after_register_and_confirm() {
        let mut tracker = MetadataTracker::new(true);
        assert!(!tracker.is_ready(Some("agent")));
        assert!(!tracker.confirm("agent", 1));

        tracker.register("agent");
        assert!(!tracker.is_ready(Some("agent")));
        assert!(tracker.confirm("agent", 10));
        assert!(tracker.is_ready(Some("agent")));
        assert!(tracker.is_ready(None));

        tracker.published("agent", 20);
        let meta = tracker.metadata(Some("agent")).unwrap();
        assert_eq!(meta.last_confirmed_at, Some(10));
        assert_eq!(meta.last_published_at, Some(20));
        assert!(meta.last_served_at.is_some());
    }

    #[test]
    fn unregister_revokes_readiness() {
        let mut tracker = MetadataTracker::new(true);
        tracker.register("agent");
        tracker.confirm("agent", 1);
        assert!(tracker.unregister("agent"));
        assert!(!tracker.unregister("agent"));
        assert!(!tracker.is_ready(Some("agent")));
    }
}
