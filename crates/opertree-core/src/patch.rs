//! Building and ordering patch trees from delta events.

use crate::codec;
use crate::delta::{visit_delta_at, DeltaElemTag, DeltaEvent, DeltaVisitMode, DeltaVisitOptions};
use crate::error::CodecError;
use crate::node::NodeRef;
use crate::schema::SchemaRef;
use opertree_proto::{OperProtocol, Patch, PatchNode};
use std::cmp::Ordering;

/// Collects minimal delta events below a base path into a [`Patch`].
#[derive(Debug)]
pub struct PatchBuilder {
    patch: Patch,
}

impl PatchBuilder {
    /// Start an empty patch rooted at `base_path`.
    #[must_use]
    pub fn new(base_path: Vec<String>, protocol: OperProtocol) -> Self {
        Self {
            patch: Patch::new(base_path, protocol),
        }
    }

    /// Record an event. Events that are not minimal or that lie outside the
    /// base path are ignored. Returns whether the event was recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if the new value cannot be encoded.
    pub fn add_event(&mut self, event: &DeltaEvent<'_>) -> Result<bool, CodecError> {
        if event.tag != DeltaElemTag::Minimal {
            return Ok(false);
        }
        let Some(relative) = event.path.strip_prefix(self.patch.base_path.as_slice()) else {
            return Ok(false);
        };
        let change = match event.new {
            Some(node) => PatchNode::Val(codec::encode(event.schema, node, self.patch.protocol)?),
            None => PatchNode::Del,
        };
        self.patch.root.insert(relative, change);
        Ok(true)
    }

    /// Whether nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patch.is_empty()
    }

    /// Finish the patch.
    #[must_use]
    pub fn finish(self) -> Patch {
        self.patch
    }
}

/// Build the patch turning `old` into `new`, both being versions of the
/// subtree at `base_path`.
///
/// # Errors
///
/// Returns the first encoding error.
pub fn build_patch(
    schema: &SchemaRef,
    old: Option<&NodeRef>,
    new: Option<&NodeRef>,
    base_path: Vec<String>,
    protocol: OperProtocol,
) -> Result<Patch, CodecError> {
    let mut builder = PatchBuilder::new(base_path.clone(), protocol);
    let mut result = Ok(());
    visit_delta_at(
        schema,
        old,
        new,
        base_path,
        DeltaVisitOptions::with_mode(DeltaVisitMode::Minimal),
        |event| {
            if result.is_ok() {
                result = builder.add_event(event).map(|_| ());
            }
        },
    );
    result?;
    Ok(builder.finish())
}

/// Leaves of a patch in application order: every value first in tree
/// order, then every deletion with list indices descending so earlier
/// removals never shift later ones.
#[must_use]
pub fn ordered_leaves(root: &PatchNode) -> Vec<(Vec<String>, &PatchNode)> {
    let mut values = Vec::new();
    let mut deletions = Vec::new();
    collect(root, &mut Vec::new(), &mut values, &mut deletions);
    deletions.sort_by(|(a, _), (b, _)| compare_paths(b, a));
    values.extend(deletions);
    values
}

fn collect<'p>(
    node: &'p PatchNode,
    path: &mut Vec<String>,
    values: &mut Vec<(Vec<String>, &'p PatchNode)>,
    deletions: &mut Vec<(Vec<String>, &'p PatchNode)>,
) {
    match node {
        PatchNode::Children(children) => {
            for (token, child) in children {
                path.push(token.clone());
                collect(child, path, values, deletions);
                path.pop();
            }
        }
        PatchNode::Val(_) => values.push((path.clone(), node)),
        PatchNode::Del => deletions.push((path.clone(), node)),
    }
}

fn compare_paths(a: &[String], b: &[String]) -> Ordering {
    for (x, y) in a.iter().zip(b) {
        let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            _ => x.cmp(y),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Node, Value};
    use crate::schema::{Field, PrimitiveType, Schema};
    use std::sync::Arc;

    fn p(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn deletions_ordered_numerically_descending() {
        let mut root = PatchNode::default();
        root.insert(&p(&["l", "2"]), PatchNode::Del);
        root.insert(&p(&["l", "10"]), PatchNode::Del);
        root.insert(&p(&["l", "0"]), PatchNode::Val(vec![1]));

        let order: Vec<_> = ordered_leaves(&root)
            .into_iter()
            .map(|(path, _)| path.join("/"))
            .collect();
        assert_eq!(order, vec!["l/0", "l/10", "l/2"]);
    }

    #[test]
    fn builder_records_minimal_events_only() {
        let i32_ty = Schema::primitive(PrimitiveType::I32);
        let schema = Schema::structure(
            "Root",
            vec![
                Field::new(1, "a", Arc::clone(&i32_ty)),
                Field::optional(2, "o", i32_ty),
            ],
        )
        .unwrap();
        let old = Arc::new(Node::Struct(vec![
            Some(Arc::new(Node::Primitive(Value::Int(1)))),
            Some(Arc::new(Node::Primitive(Value::Int(2)))),
        ]));
        let new = Arc::new(Node::Struct(vec![
            Some(Arc::new(Node::Primitive(Value::Int(5)))),
            None,
        ]));

        let patch = build_patch(&schema, Some(&old), Some(&new), Vec::new(), OperProtocol::Json).unwrap();
        let PatchNode::Children(children) = &patch.root else {
            panic!("expected children");
        };
        assert_eq!(children.get("a"), Some(&PatchNode::Val(b"5".to_vec())));
        assert_eq!(children.get("o"), Some(&PatchNode::Del));
        assert_eq!(children.len(), 2);
    }
}
