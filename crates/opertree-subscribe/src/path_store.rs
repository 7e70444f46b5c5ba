//! Subscription path store.
//!
//! A lookup tree shadowing the data tree. Each node holds the registrations
//! whose literal path prefix ends there, and a count of registrations in its
//! whole subtree. Nodes exist only while that count is non-zero; removing
//! the last registration below a node prunes it.
//!
//! The store holds subscription ids only, never the subscriptions.

use opertree_proto::SubscriptionKey;
use std::collections::HashMap;

/// One registration: a keyed path of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Registration {
    /// Subscription id
    pub id: u64,
    /// Which of the subscription's paths
    pub key: SubscriptionKey,
}

#[derive(Debug, Default)]
struct LookupNode {
    registrations: Vec<Registration>,
    children: HashMap<String, LookupNode>,
    recursive_count: usize,
}

impl LookupNode {
    fn remove(&mut self, path: &[String], registration: Registration) -> bool {
        let removed = match path.split_first() {
            None => {
                let before = self.registrations.len();
                self.registrations.retain(|r| *r != registration);
                before != self.registrations.len()
            }
            Some((head, rest)) => {
                let Some(child) = self.children.get_mut(head) else {
                    return false;
                };
                let removed = child.remove(rest, registration);
                if child.recursive_count == 0 {
                    self.children.remove(head);
                }
                removed
            }
        };
        if removed {
            self.recursive_count -= 1;
        }
        removed
    }

    fn prune(&mut self) {
        self.children.retain(|_, child| {
            child.prune();
            child.recursive_count > 0
        });
    }

    fn count_nodes(&self) -> usize {
        1 + self.children.values().map(LookupNode::count_nodes).sum::<usize>()
    }
}

/// Index of subscriptions by path.
#[derive(Debug, Default)]
pub struct SubscriptionPathStore {
    root: LookupNode,
}

impl SubscriptionPathStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `registration` at `prefix`, creating lookup nodes on the way.
    pub fn add(&mut self, prefix: &[String], registration: Registration) {
        let mut node = &mut self.root;
        node.recursive_count += 1;
        for token in prefix {
            node = node.children.entry(token.clone()).or_default();
            node.recursive_count += 1;
        }
        node.registrations.push(registration);
    }

    /// Unregister `registration` from `prefix`, pruning nodes left empty.
    /// Returns whether it was registered.
    pub fn remove(&mut self, prefix: &[String], registration: Registration) -> bool {
        self.root.remove(prefix, registration)
    }

    /// Registrations at `path` and at each of its ancestors, with the depth
    /// of the node they are registered at. Shallowest first.
    #[must_use]
    pub fn along<S: AsRef<str>>(&self, path: &[S]) -> Vec<(usize, Registration)> {
        let mut found = Vec::new();
        let mut node = &self.root;
        for depth in 0..=path.len() {
            found.extend(node.registrations.iter().map(|r| (depth, *r)));
            let Some(token) = path.get(depth) else {
                break;
            };
            match node.children.get(token.as_ref()) {
                Some(child) => node = child,
                None => break,
            }
        }
        found
    }

    /// Number of registrations at or below `path`.
    #[must_use]
    pub fn count_at_or_below<S: AsRef<str>>(&self, path: &[S]) -> usize {
        let mut node = &self.root;
        for token in path {
            match node.children.get(token.as_ref()) {
                Some(child) => node = child,
                None => return 0,
            }
        }
        node.recursive_count
    }

    /// Whether a lookup node exists for `path`.
    #[must_use]
    pub fn contains_node<S: AsRef<str>>(&self, path: &[S]) -> bool {
        let mut node = &self.root;
        for token in path {
            match node.children.get(token.as_ref()) {
                Some(child) => node = child,
                None => return false,
            }
        }
        true
    }

    /// Drop every node without registrations in its subtree.
    pub fn prune(&mut self) {
        self.root.prune();
    }

    /// Total number of registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.root.recursive_count
    }

    /// Whether the store holds no registrations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.root.recursive_count == 0
    }

    /// Number of lookup nodes, the root included.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.root.count_nodes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(ToString::to_string).collect()
    }

    fn reg(id: u64) -> Registration {
        Registration { id, key: 0 }
    }

    #[test]
    fn along_reports_ancestors_with_depth() {
        let mut store = SubscriptionPathStore::new();
        store.add(&[], reg(1));
        store.add(&path(&["b"]), reg(2));
        store.add(&path(&["b", "x"]), reg(3));
        store.add(&path(&["a"]), reg(4));

        let found = store.along(&["b", "x", "deeper"]);
        assert_eq!(found, vec![(0, reg(1)), (1, reg(2)), (2, reg(3))]);
        assert_eq!(store.along(&["a"]), vec![(0, reg(1)), (1, reg(4))]);
        assert_eq!(store.count_at_or_below(&["b"]), 2);
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn remove_prunes_empty_ancestors() {
        let mut store = SubscriptionPathStore::new();
        store.add(&path(&["b"]), reg(1));
        store.add(&path(&["b", "x", "y"]), reg(2));
        assert_eq!(store.node_count(), 4);

        assert!(store.remove(&path(&["b", "x", "y"]), reg(2)));
        assert!(!store.contains_node(&["b", "x"]));
        assert!(store.contains_node(&["b"]));
        assert_eq!(store.node_count(), 2);

        assert!(store.remove(&path(&["b"]), reg(1)));
        assert!(store.is_empty());
        assert_eq!(store.node_count(), 1);
    }

    #[test]
    fn remove_unknown_is_noop() {
        let mut store = SubscriptionPathStore::new();
        store.add(&path(&["b"]), reg(1));
        assert!(!store.remove(&path(&["b"]), reg(9)));
        assert!(!store.remove(&path(&["c"]), reg(1)));
        assert_eq!(store.len(), 1);
        assert!(store.contains_node(&["b"]));
    }

    #[test]
    fn same_subscription_under_several_keys() {
        let mut store = SubscriptionPathStore::new();
        let first = Registration { id: 5, key: 0 };
        let second = Registration { id: 5, key: 1 };
        store.add(&path(&["b"]), first);
        store.add(&path(&["b"]), second);
        assert!(store.remove(&path(&["b"]), first));
        assert_eq!(store.along(&["b"]), vec![(1, second)]);
    }
}
