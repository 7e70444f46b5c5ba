//! Patch trees.
//!
//! A patch describes a set of changes below a base path as a tree that
//! mirrors the shape of the changed region. Leaves either carry a new
//! encoded value or mark a deletion.

use crate::messages::{OperMetadata, OperProtocol};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One node of a patch tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchNode {
    /// Replace the node with this encoded value
    Val(Vec<u8>),
    /// Remove the node
    Del,
    /// Descend into children, keyed by path token
    Children(BTreeMap<String, PatchNode>),
}

impl Default for PatchNode {
    fn default() -> Self {
        PatchNode::Children(BTreeMap::new())
    }
}

impl PatchNode {
    /// Check if the node carries no change.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, PatchNode::Children(children) if children.is_empty())
    }

    /// Record `change` at `path` relative to this node.
    ///
    /// A change recorded on an ancestor of an earlier change replaces it, and
    /// a change below an existing `Val`/`Del` leaf converts that leaf into a
    /// `Children` node.
    pub fn insert(&mut self, path: &[String], change: PatchNode) {
        let Some((head, rest)) = path.split_first() else {
            *self = change;
            return;
        };
        if !matches!(self, PatchNode::Children(_)) {
            *self = PatchNode::default();
        }
        if let PatchNode::Children(children) = self {
            children
                .entry(head.clone())
                .or_default()
                .insert(rest, change);
        }
    }

    /// Visit every leaf with its path relative to this node.
    pub fn for_each_leaf(&self, mut f: impl FnMut(&[String], &PatchNode)) {
        let mut path = Vec::new();
        self.walk(&mut path, &mut f);
    }

    fn walk(&self, path: &mut Vec<String>, f: &mut impl FnMut(&[String], &PatchNode)) {
        match self {
            PatchNode::Children(children) => {
                for (token, child) in children {
                    path.push(token.clone());
                    child.walk(path, f);
                    path.pop();
                }
            }
            leaf => f(path, leaf),
        }
    }
}

/// A patch rooted at `base_path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    /// Path the patch tree is rooted at
    pub base_path: Vec<String>,
    /// The protocol every `Val` payload is encoded with
    pub protocol: OperProtocol,
    /// Root of the patch tree
    pub root: PatchNode,
    /// Delivery metadata
    pub metadata: Option<OperMetadata>,
}

impl Patch {
    /// Create an empty patch.
    #[must_use]
    pub fn new(base_path: Vec<String>, protocol: OperProtocol) -> Self {
        Self {
            base_path,
            protocol,
            root: PatchNode::default(),
            metadata: None,
        }
    }

    /// Check if the patch carries no change.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }
}
