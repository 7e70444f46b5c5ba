//! Path visitors.
//!
//! Walk a tree along a concrete path, resolving each token against the
//! current schema, and invoke a callback at the target (and optionally at
//! every node on the way). The mutating visitor copies the nodes on the path
//! and installs the new root only if the whole walk succeeds.

use crate::error::{PathError, TraverseError};
use crate::node::{Key, Node, NodeRef};
use crate::resolver::{resolve_step, Step};
use crate::schema::SchemaRef;
use opertree_proto::join_path;
use std::fmt::Display;
use std::sync::Arc;

/// Which nodes on the path receive the callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PathVisitMode {
    /// Only the target
    #[default]
    Leaf,
    /// The root, every intermediate node and the target
    Full,
}

/// Options for [`visit_path_mut`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PathVisitOptions {
    /// Which nodes receive the callback
    pub mode: PathVisitMode,
    /// Create absent nodes on the way instead of failing
    pub create_missing: bool,
}

impl PathVisitOptions {
    /// Visit the target only, creating absent nodes.
    #[must_use]
    pub fn create() -> Self {
        Self {
            mode: PathVisitMode::Leaf,
            create_missing: true,
        }
    }
}

/// Visit the node at `path`.
///
/// The callback receives the visited path, the node's schema and the node.
///
/// # Errors
///
/// Returns a path error if a token cannot be resolved or a node is absent,
/// and `VisitorException` if the callback fails. Nothing is visited past the
/// first failure.
pub fn visit_path<S, E, F>(
    schema: &SchemaRef,
    root: &NodeRef,
    path: &[S],
    mode: PathVisitMode,
    mut f: F,
) -> Result<(), TraverseError>
where
    S: AsRef<str>,
    E: Display,
    F: FnMut(&[String], &SchemaRef, &NodeRef) -> Result<(), E>,
{
    let mut visited: Vec<String> = Vec::with_capacity(path.len());
    let mut schema = Arc::clone(schema);
    let mut node = Arc::clone(root);

    for token in path {
        if mode == PathVisitMode::Full {
            f(&visited, &schema, &node).map_err(exception)?;
        }
        let token = token.as_ref();
        let (step, child_schema) = resolve_step(&schema, token, &visited)?;
        visited.push(token.to_string());
        let child = node
            .child(&schema, &step)
            .ok_or_else(|| PathError::NotPresent {
                path: join_path(&visited),
            })?;
        schema = child_schema;
        node = child;
    }

    f(&visited, &schema, &node).map_err(exception)
}

/// Visit the node at `path` with mutable access.
///
/// The walk happens on a working copy of the root: nodes on the path are
/// copied only if shared, and `root` is replaced only when the walk and the
/// callback succeed. On failure `root` is left untouched.
///
/// Set members are presented to the callback as a leaf node; if the callback
/// changes it, the set is re-keyed.
///
/// # Errors
///
/// Same as [`visit_path`]. With `create_missing` absent nodes are created
/// with default contents instead of failing; lists are padded with default
/// elements up to the requested index.
pub fn visit_path_mut<S, E, F>(
    schema: &SchemaRef,
    root: &mut NodeRef,
    path: &[S],
    options: PathVisitOptions,
    mut f: F,
) -> Result<(), TraverseError>
where
    S: AsRef<str>,
    E: Display,
    F: FnMut(&[String], &SchemaRef, &mut NodeRef) -> Result<(), E>,
{
    let mut working = Arc::clone(root);
    let mut walker = MutWalker {
        tokens: path,
        options,
        visited: Vec::with_capacity(path.len()),
        f: &mut f,
    };
    walker.walk(schema, &mut working)?;
    *root = working;
    Ok(())
}

fn exception<E: Display>(err: E) -> TraverseError {
    TraverseError::VisitorException(err.to_string())
}

struct MutWalker<'a, S, F> {
    tokens: &'a [S],
    options: PathVisitOptions,
    visited: Vec<String>,
    f: &'a mut F,
}

impl<S, E, F> MutWalker<'_, S, F>
where
    S: AsRef<str>,
    E: Display,
    F: FnMut(&[String], &SchemaRef, &mut NodeRef) -> Result<(), E>,
{
    fn walk(&mut self, schema: &SchemaRef, node: &mut NodeRef) -> Result<(), TraverseError> {
        let tokens = self.tokens;
        let Some(token) = tokens.get(self.visited.len()) else {
            return (self.f)(&self.visited, schema, node).map_err(exception);
        };
        if self.options.mode == PathVisitMode::Full {
            (self.f)(&self.visited, schema, node).map_err(exception)?;
        }

        let token = token.as_ref();
        let (step, child_schema) = resolve_step(schema, token, &self.visited)?;
        self.visited.push(token.to_string());
        let create = self.options.create_missing;

        match (Arc::make_mut(node), step) {
            (Node::Struct(fields), Step::Field(idx)) => {
                let Some(slot) = fields.get_mut(idx) else {
                    return Err(self.mismatch(schema));
                };
                if slot.is_none() {
                    if !create {
                        return Err(self.not_present());
                    }
                    *slot = Some(Arc::new(Node::default_for(&child_schema)));
                }
                match slot {
                    Some(child) => self.walk(&child_schema, child),
                    None => Err(self.not_present()),
                }
            }
            (Node::Union(active), Step::Member(idx)) => {
                if active.as_ref().map(|(current, _)| *current) != Some(idx) {
                    if !create {
                        return Err(self.not_present());
                    }
                    *active = Some((idx, Arc::new(Node::default_for(&child_schema))));
                }
                match active {
                    Some((_, child)) => self.walk(&child_schema, child),
                    None => Err(self.not_present()),
                }
            }
            (Node::List(items), Step::Index(idx)) => {
                if idx >= items.len() {
                    if !create {
                        return Err(self.not_present());
                    }
                    items.resize_with(idx + 1, || Arc::new(Node::default_for(&child_schema)));
                }
                match items.get_mut(idx) {
                    Some(child) => self.walk(&child_schema, child),
                    None => Err(self.not_present()),
                }
            }
            (Node::Map(entries), Step::Key(key)) => {
                if !entries.contains_key(&key) {
                    if !create {
                        return Err(self.not_present());
                    }
                    entries.insert(key.clone(), Arc::new(Node::default_for(&child_schema)));
                }
                match entries.get_mut(&key) {
                    Some(child) => self.walk(&child_schema, child),
                    None => Err(self.not_present()),
                }
            }
            (Node::Set(members), Step::Key(key)) => {
                if !members.contains(&key) {
                    if !create {
                        return Err(self.not_present());
                    }
                    members.insert(key.clone());
                }
                let Some(primitive) = child_schema.as_primitive() else {
                    return Err(self.mismatch(&child_schema));
                };
                let mut member = Arc::new(Node::Primitive(key.to_value(primitive)));
                self.walk(&child_schema, &mut member)?;
                let rekeyed = member
                    .as_value()
                    .filter(|value| value.conforms(primitive))
                    .and_then(Key::from_value)
                    .ok_or_else(|| {
                        TraverseError::VisitorException(format!(
                            "set member at {} must remain a {}",
                            join_path(&self.visited),
                            primitive.type_name()
                        ))
                    })?;
                if rekeyed != key {
                    members.remove(&key);
                    members.insert(rekeyed);
                }
                Ok(())
            }
            _ => Err(self.mismatch(schema)),
        }
    }

    fn not_present(&self) -> TraverseError {
        PathError::NotPresent {
            path: join_path(&self.visited),
        }
        .into()
    }

    fn mismatch(&self, schema: &SchemaRef) -> TraverseError {
        TraverseError::NodeMismatch {
            path: join_path(&self.visited),
            expected: schema.kind_name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Value;
    use crate::schema::{Field, PrimitiveType, Schema};

    fn schema() -> SchemaRef {
        let i32_ty = Schema::primitive(PrimitiveType::I32);
        let string_ty = Schema::primitive(PrimitiveType::String);
        Schema::structure(
            "Root",
            vec![
                Field::new(1, "a", Arc::clone(&i32_ty)),
                Field::new(
                    2,
                    "b",
                    Schema::map(Arc::clone(&string_ty), Arc::clone(&i32_ty)).unwrap(),
                ),
                Field::new(3, "l", Schema::list(Arc::clone(&i32_ty))),
                Field::new(4, "s", Schema::set(string_ty).unwrap()),
            ],
        )
        .unwrap()
    }

    fn set_int(value: i64) -> impl FnMut(&[String], &SchemaRef, &mut NodeRef) -> Result<(), String> {
        move |_, _, node| {
            *node = Arc::new(Node::Primitive(Value::Int(value)));
            Ok(())
        }
    }

    #[test]
    fn full_mode_visits_every_node() {
        let s = schema();
        let mut root = Arc::new(Node::default_for(&s));
        visit_path_mut(&s, &mut root, &["b", "x"], PathVisitOptions::create(), set_int(3)).unwrap();

        let mut seen = Vec::new();
        visit_path(&s, &root, &["b", "x"], PathVisitMode::Full, |path, _, _| {
            seen.push(join_path(path));
            Ok::<_, String>(())
        })
        .unwrap();
        assert_eq!(seen, vec!["/", "/b", "/b/x"]);
    }

    #[test]
    fn absent_key_is_not_present() {
        let s = schema();
        let root = Arc::new(Node::default_for(&s));
        let err = visit_path(&s, &root, &["b", "z"], PathVisitMode::Leaf, |_, _, _| {
            Ok::<_, String>(())
        })
        .unwrap_err();
        assert_eq!(
            err,
            TraverseError::Path(PathError::NotPresent {
                path: "/b/z".into()
            })
        );
    }

    #[test]
    fn failed_callback_leaves_root_untouched() {
        let s = schema();
        let mut root = Arc::new(Node::default_for(&s));
        let before = Arc::clone(&root);

        let err = visit_path_mut(
            &s,
            &mut root,
            &["b", "new"],
            PathVisitOptions::create(),
            |_, _, _| Err("rejected"),
        )
        .unwrap_err();
        assert!(matches!(err, TraverseError::VisitorException(_)));
        assert!(Arc::ptr_eq(&root, &before));
    }

    #[test]
    fn list_padded_with_defaults() {
        let s = schema();
        let mut root = Arc::new(Node::default_for(&s));
        visit_path_mut(&s, &mut root, &["l", "2"], PathVisitOptions::create(), set_int(7)).unwrap();

        let Node::Struct(fields) = root.as_ref() else {
            panic!("expected struct");
        };
        let Some(Node::List(items)) = fields[2].as_deref() else {
            panic!("expected list");
        };
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_value(), Some(&Value::Int(0)));
        assert_eq!(items[2].as_value(), Some(&Value::Int(7)));
    }

    #[test]
    fn set_member_rekeyed() {
        let s = schema();
        let mut root = Arc::new(Node::default_for(&s));
        visit_path_mut(&s, &mut root, &["s", "x"], PathVisitOptions::create(), |_, _, _| {
            Ok::<_, String>(())
        })
        .unwrap();
        visit_path_mut(
            &s,
            &mut root,
            &["s", "x"],
            PathVisitOptions::default(),
            |_, _, node| {
                *node = Arc::new(Node::Primitive(Value::String("y".into())));
                Ok::<_, String>(())
            },
        )
        .unwrap();

        let Node::Struct(fields) = root.as_ref() else {
            panic!("expected struct");
        };
        let Some(Node::Set(members)) = fields[3].as_deref() else {
            panic!("expected set");
        };
        assert_eq!(members.len(), 1);
        assert!(members.contains(&Key::String("y".into())));
    }

    #[test]
    fn untouched_subtrees_shared() {
        let s = schema();
        let mut root = Arc::new(Node::default_for(&s));
        let before = Arc::clone(&root);
        visit_path_mut(&s, &mut root, &["a"], PathVisitOptions::default(), set_int(1)).unwrap();

        let (Node::Struct(old), Node::Struct(new)) = (before.as_ref(), root.as_ref()) else {
            panic!("expected structs");
        };
        assert!(!Arc::ptr_eq(&before, &root));
        assert!(Arc::ptr_eq(
            old[1].as_ref().unwrap(),
            new[1].as_ref().unwrap()
        ));
    }
}
