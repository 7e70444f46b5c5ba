//! Structural diff of two tree versions.
//!
//! The delta visitor walks an old and a new tree side by side following the
//! schema and reports every path whose contents differ. Subtrees shared by
//! both versions (pointer-equal) are skipped without descending, so the cost
//! of a diff is proportional to the region that changed.
//!
//! Events are tagged [`DeltaElemTag::Minimal`] for the precise changed leaf
//! or the root of an added or removed subtree, and
//! [`DeltaElemTag::NotMinimal`] for ancestors of a change and descendants of
//! an added or removed subtree.

use crate::node::{Key, Node, NodeRef};
use crate::recurse::{visit_descendants, RecurseVisitOptions, RecurseVisitOrder};
use crate::schema::{Members, SchemaKind, SchemaRef};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Tag of a delta event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeltaElemTag {
    /// Changed leaf, or root of an added/removed subtree
    Minimal,
    /// Ancestor of a change, or descendant of an added/removed subtree
    NotMinimal,
}

/// Which events the delta visitor reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeltaVisitMode {
    /// Minimal events plus every ancestor of a change
    #[default]
    Parents,
    /// Minimal events only
    Minimal,
    /// Parents, plus every descendant of added or removed subtrees
    Full,
}

/// Where added and removed subtrees are reported relative to their
/// descendants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeltaVisitOrder {
    /// Subtree root before its descendants
    #[default]
    ParentsFirst,
    /// Descendants before the subtree root
    ChildrenFirst,
}

/// Options for [`visit_delta`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DeltaVisitOptions {
    /// Which events to report
    pub mode: DeltaVisitMode,
    /// Report order for added and removed subtrees.
    ///
    /// Modified ancestors (`NotMinimal` events in `Parents` and `Full`
    /// mode) are always reported after the changes below them, whatever
    /// the order: a container is known to have changed only once its
    /// children were compared.
    pub order: DeltaVisitOrder,
    /// Report struct and union members by id instead of name
    pub output_id_paths: bool,
}

impl DeltaVisitOptions {
    /// Options with the given mode and defaults otherwise.
    #[must_use]
    pub fn with_mode(mode: DeltaVisitMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }
}

/// A single reported difference.
#[derive(Debug, Clone, Copy)]
pub struct DeltaEvent<'a> {
    /// Path of the node
    pub path: &'a [String],
    /// Schema of the node
    pub schema: &'a SchemaRef,
    /// Node in the old tree, absent if added
    pub old: Option<&'a NodeRef>,
    /// Node in the new tree, absent if removed
    pub new: Option<&'a NodeRef>,
    /// Event tag
    pub tag: DeltaElemTag,
}

impl DeltaEvent<'_> {
    /// Whether the node exists in only one of the two trees.
    #[must_use]
    pub fn is_add_or_remove(&self) -> bool {
        self.old.is_none() != self.new.is_none()
    }
}

/// Diff two versions of a tree. Returns whether anything differed.
pub fn visit_delta<F>(
    schema: &SchemaRef,
    old: &NodeRef,
    new: &NodeRef,
    options: DeltaVisitOptions,
    f: F,
) -> bool
where
    F: FnMut(&DeltaEvent<'_>),
{
    visit_delta_at(schema, Some(old), Some(new), Vec::new(), options, f)
}

/// Diff two versions of the subtree at `path`, either of which may be
/// absent. Events are reported with `path` as their prefix.
pub fn visit_delta_at<F>(
    schema: &SchemaRef,
    old: Option<&NodeRef>,
    new: Option<&NodeRef>,
    path: Vec<String>,
    options: DeltaVisitOptions,
    mut f: F,
) -> bool
where
    F: FnMut(&DeltaEvent<'_>),
{
    let mut walker = DeltaWalker {
        options,
        path,
        f: &mut f,
    };
    walker.visit_optional(schema, old, new)
}

struct DeltaWalker<'f, F> {
    options: DeltaVisitOptions,
    path: Vec<String>,
    f: &'f mut F,
}

impl<F> DeltaWalker<'_, F>
where
    F: FnMut(&DeltaEvent<'_>),
{
    fn emit(
        &mut self,
        schema: &SchemaRef,
        old: Option<&NodeRef>,
        new: Option<&NodeRef>,
        tag: DeltaElemTag,
    ) {
        (self.f)(&DeltaEvent {
            path: &self.path,
            schema,
            old,
            new,
            tag,
        });
    }

    fn visit_optional(
        &mut self,
        schema: &SchemaRef,
        old: Option<&NodeRef>,
        new: Option<&NodeRef>,
    ) -> bool {
        match (old, new) {
            (Some(old), Some(new)) => self.visit_node(schema, old, new),
            (None, None) => false,
            _ => {
                self.added_or_removed(schema, old, new);
                true
            }
        }
    }

    fn visit_node(&mut self, schema: &SchemaRef, old: &NodeRef, new: &NodeRef) -> bool {
        if Arc::ptr_eq(old, new) {
            return false;
        }

        let changed = match (&schema.kind, old.as_ref(), new.as_ref()) {
            (SchemaKind::Primitive { .. }, _, _) => {
                if old == new {
                    return false;
                }
                self.emit(schema, Some(old), Some(new), DeltaElemTag::Minimal);
                return true;
            }
            (SchemaKind::Struct(members), Node::Struct(o), Node::Struct(n)) => {
                self.visit_struct(members, o, n)
            }
            (SchemaKind::Union(members), Node::Union(o), Node::Union(n)) => {
                self.visit_union(members, o.as_ref(), n.as_ref())
            }
            (SchemaKind::List { element }, Node::List(o), Node::List(n)) => {
                self.visit_list(element, o, n)
            }
            (SchemaKind::Map { value, key }, Node::Map(o), Node::Map(n)) => {
                self.visit_map(key, value, o, n)
            }
            (SchemaKind::Set { element }, Node::Set(o), Node::Set(n)) => {
                self.visit_set(element, o, n)
            }
            _ => {
                if old == new {
                    return false;
                }
                self.emit(schema, Some(old), Some(new), DeltaElemTag::Minimal);
                return true;
            }
        };

        if changed && self.options.mode != DeltaVisitMode::Minimal {
            self.emit(schema, Some(old), Some(new), DeltaElemTag::NotMinimal);
        }
        changed
    }

    fn visit_struct(
        &mut self,
        members: &Members,
        old: &[Option<NodeRef>],
        new: &[Option<NodeRef>],
    ) -> bool {
        let mut changed = false;
        for (idx, field) in members.fields().iter().enumerate() {
            let o = old.get(idx).and_then(Option::as_ref);
            let n = new.get(idx).and_then(Option::as_ref);
            if o.is_none() && n.is_none() {
                continue;
            }
            self.path.push(members.token(idx, self.options.output_id_paths));
            changed |= self.visit_optional(&field.schema, o, n);
            self.path.pop();
        }
        changed
    }

    fn visit_union(
        &mut self,
        members: &Members,
        old: Option<&(usize, NodeRef)>,
        new: Option<&(usize, NodeRef)>,
    ) -> bool {
        match (old, new) {
            (None, None) => false,
            (Some((o_idx, o)), Some((n_idx, n))) if o_idx == n_idx => {
                let Some(field) = members.get(*o_idx) else {
                    return false;
                };
                self.path.push(members.token(*o_idx, self.options.output_id_paths));
                let changed = self.visit_node(&field.schema, o, n);
                self.path.pop();
                changed
            }
            _ => {
                // A different arm is a removal of the old value and an
                // addition of the new one, never a recursive diff.
                for (arm, is_old) in [(old, true), (new, false)] {
                    let Some((idx, node)) = arm else {
                        continue;
                    };
                    let Some(field) = members.get(*idx) else {
                        continue;
                    };
                    self.path.push(members.token(*idx, self.options.output_id_paths));
                    if is_old {
                        self.added_or_removed(&field.schema, Some(node), None);
                    } else {
                        self.added_or_removed(&field.schema, None, Some(node));
                    }
                    self.path.pop();
                }
                true
            }
        }
    }

    fn visit_list(&mut self, element: &SchemaRef, old: &[NodeRef], new: &[NodeRef]) -> bool {
        let common = old.len().min(new.len());
        let mut changed = false;

        for idx in (common..old.len()).rev() {
            self.path.push(idx.to_string());
            self.added_or_removed(element, Some(&old[idx]), None);
            self.path.pop();
            changed = true;
        }
        for (idx, node) in new.iter().enumerate().skip(common) {
            self.path.push(idx.to_string());
            self.added_or_removed(element, None, Some(node));
            self.path.pop();
            changed = true;
        }
        for (idx, (o, n)) in old.iter().zip(new).enumerate() {
            if Arc::ptr_eq(o, n) {
                continue;
            }
            self.path.push(idx.to_string());
            changed |= self.visit_node(element, o, n);
            self.path.pop();
        }
        changed
    }

    fn visit_map(
        &mut self,
        key: &SchemaRef,
        value: &SchemaRef,
        old: &BTreeMap<Key, NodeRef>,
        new: &BTreeMap<Key, NodeRef>,
    ) -> bool {
        let Some(key_type) = key.as_primitive() else {
            return false;
        };
        let mut changed = false;

        for (k, o) in old {
            self.path.push(k.to_token(key_type));
            changed |= self.visit_optional(value, Some(o), new.get(k));
            self.path.pop();
        }
        for (k, n) in new {
            if old.contains_key(k) {
                continue;
            }
            self.path.push(k.to_token(key_type));
            self.added_or_removed(value, None, Some(n));
            self.path.pop();
            changed = true;
        }
        changed
    }

    fn visit_set(&mut self, element: &SchemaRef, old: &BTreeSet<Key>, new: &BTreeSet<Key>) -> bool {
        let Some(element_type) = element.as_primitive() else {
            return false;
        };
        let mut changed = false;

        for k in old.difference(new) {
            let node = Arc::new(Node::Primitive(k.to_value(element_type)));
            self.path.push(k.to_token(element_type));
            self.added_or_removed(element, Some(&node), None);
            self.path.pop();
            changed = true;
        }
        for k in new.difference(old) {
            let node = Arc::new(Node::Primitive(k.to_value(element_type)));
            self.path.push(k.to_token(element_type));
            self.added_or_removed(element, None, Some(&node));
            self.path.pop();
            changed = true;
        }
        changed
    }

    fn added_or_removed(
        &mut self,
        schema: &SchemaRef,
        old: Option<&NodeRef>,
        new: Option<&NodeRef>,
    ) {
        let parents_first = self.options.order == DeltaVisitOrder::ParentsFirst;
        if parents_first {
            self.emit(schema, old, new, DeltaElemTag::Minimal);
        }

        if self.options.mode == DeltaVisitMode::Full {
            if let Some(subtree) = old.or(new) {
                let removed = old.is_some();
                let recurse_options = RecurseVisitOptions {
                    order: if parents_first {
                        RecurseVisitOrder::ParentsFirst
                    } else {
                        RecurseVisitOrder::ChildrenFirst
                    },
                    output_id_paths: self.options.output_id_paths,
                };
                let f = &mut *self.f;
                visit_descendants(
                    schema,
                    subtree,
                    &mut self.path,
                    recurse_options,
                    &mut |path, schema, node| {
                        let (old, new) = if removed {
                            (Some(node), None)
                        } else {
                            (None, Some(node))
                        };
                        f(&DeltaEvent {
                            path,
                            schema,
                            old,
                            new,
                            tag: DeltaElemTag::NotMinimal,
                        });
                    },
                );
            }
        }

        if !parents_first {
            self.emit(schema, old, new, DeltaElemTag::Minimal);
        }
    }
}
