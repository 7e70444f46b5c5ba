//! Copy-on-write storage.
//!
//! `CowStorage` owns the current root of a tree and exposes path-addressed
//! typed and encoded reads and writes. Every write copies the nodes on the
//! path to the change and installs a new root; untouched subtrees are shared
//! with every earlier version, so a [`Snapshot`] is just a pointer copy.

use crate::codec;
use crate::error::{PathError, StorageError};
use crate::ext_visitor::{visit_extended, ExtPathVisitOptions};
use crate::node::{Key, Node, NodeRef};
use crate::patch::ordered_leaves;
use crate::resolver::{compile_extended, resolve, Step, TypedPath};
use crate::schema::{SchemaKind, SchemaRef};
use crate::visitor::{visit_path, visit_path_mut, PathVisitMode, PathVisitOptions};
use opertree_proto::{
    join_path, ExtendedPath, OperDelta, OperProtocol, OperState, Patch, PatchNode, TaggedOperState,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

/// List position token meaning "append".
pub const APPEND_TOKEN: &str = "-1";

/// An immutable view of one tree version.
#[derive(Debug, Clone)]
pub struct Snapshot {
    schema: SchemaRef,
    root: NodeRef,
}

impl Snapshot {
    /// Wrap a root.
    #[must_use]
    pub fn new(schema: SchemaRef, root: NodeRef) -> Self {
        Self { schema, root }
    }

    /// Schema of the tree.
    #[must_use]
    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    /// Root node.
    #[must_use]
    pub fn root(&self) -> &NodeRef {
        &self.root
    }

    /// Node and schema at `path`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPath` if the path is invalid or absent.
    pub fn get_node<S: AsRef<str>>(&self, path: &[S]) -> Result<(SchemaRef, NodeRef), StorageError> {
        let mut found = None;
        visit_path(&self.schema, &self.root, path, PathVisitMode::Leaf, |_, schema, node| {
            found = Some((Arc::clone(schema), Arc::clone(node)));
            Ok::<_, std::convert::Infallible>(())
        })?;
        found.ok_or_else(|| {
            PathError::NotPresent {
                path: join_path(path),
            }
            .into()
        })
    }

    /// Read the value at `path` as a native type.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPath` if the path is invalid or absent, `TypeMismatch`
    /// if `T` cannot represent the value.
    pub fn get<T: DeserializeOwned, S: AsRef<str>>(&self, path: &[S]) -> Result<T, StorageError> {
        let (schema, node) = self.get_node(path)?;
        Ok(codec::to_native(&schema, &node)?)
    }

    /// Read the value at a pre-resolved path as a native type.
    ///
    /// # Errors
    ///
    /// Same as [`Snapshot::get`].
    pub fn get_typed<T: DeserializeOwned>(&self, path: &TypedPath) -> Result<T, StorageError> {
        let node = self.node_at(path)?;
        Ok(codec::to_native(&path.schema, &node)?)
    }

    /// Read the value at `path` encoded with `protocol`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPath` if the path is invalid or absent, or a codec
    /// error.
    pub fn get_encoded<S: AsRef<str>>(
        &self,
        path: &[S],
        protocol: OperProtocol,
    ) -> Result<OperState, StorageError> {
        let (schema, node) = self.get_node(path)?;
        Ok(codec::encode_state(&schema, &node, protocol)?)
    }

    /// Read every value matching an extended path, encoded with `protocol`.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedWildcardPath` or `InvalidPath` for paths invalid
    /// for the schema, or a codec error.
    pub fn get_encoded_extended(
        &self,
        path: &ExtendedPath,
        protocol: OperProtocol,
    ) -> Result<Vec<TaggedOperState>, StorageError> {
        let compiled = compile_extended(&self.schema, path)?;
        let mut states = Vec::new();
        visit_extended(
            &self.schema,
            &self.root,
            &compiled,
            ExtPathVisitOptions::default(),
            |matched, schema, node| {
                let state = codec::encode_state(schema, node, protocol)?;
                states.push(TaggedOperState {
                    path: matched.to_vec(),
                    state,
                });
                Ok::<_, crate::error::CodecError>(())
            },
        )?;
        Ok(states)
    }

    fn node_at(&self, path: &TypedPath) -> Result<NodeRef, StorageError> {
        let mut schema = Arc::clone(&self.schema);
        let mut node = Arc::clone(&self.root);
        for (depth, step) in path.steps.iter().enumerate() {
            let absent = || PathError::NotPresent {
                path: join_path(&path.tokens[..=depth]),
            };
            let child = node.child(&schema, step).ok_or_else(absent)?;
            let (_, child_schema) = crate::resolver::resolve_step(
                &schema,
                &path.tokens[depth],
                &path.tokens[..depth],
            )?;
            schema = child_schema;
            node = child;
        }
        Ok(node)
    }
}

/// A unit of change accepted by [`CowStorage::patch`].
#[derive(Debug, Clone)]
pub enum StatePatch {
    /// Apply each unit: set its new state, or remove if absent
    Delta(OperDelta),
    /// Set one encoded value
    State(TaggedOperState),
    /// Apply a patch tree
    Tree(Patch),
}

impl From<OperDelta> for StatePatch {
    fn from(delta: OperDelta) -> Self {
        Self::Delta(delta)
    }
}

impl From<TaggedOperState> for StatePatch {
    fn from(state: TaggedOperState) -> Self {
        Self::State(state)
    }
}

impl From<Patch> for StatePatch {
    fn from(patch: Patch) -> Self {
        Self::Tree(patch)
    }
}

/// Copy-on-write tree storage.
#[derive(Debug, Clone)]
pub struct CowStorage {
    schema: SchemaRef,
    root: NodeRef,
    published: Option<NodeRef>,
}

impl CowStorage {
    /// Create a storage holding the schema's default tree.
    #[must_use]
    pub fn new(schema: SchemaRef) -> Self {
        let root = Arc::new(Node::default_for(&schema));
        Self::with_root(schema, root)
    }

    /// Create a storage holding `root`.
    #[must_use]
    pub fn with_root(schema: SchemaRef, root: NodeRef) -> Self {
        Self {
            schema,
            root,
            published: None,
        }
    }

    /// Create a storage from the JSON form of a whole tree.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if the JSON does not fit the schema.
    pub fn from_json(schema: SchemaRef, json: &serde_json::Value) -> Result<Self, StorageError> {
        let root = codec::from_json(&schema, json)?;
        Ok(Self::with_root(schema, Arc::new(root)))
    }

    /// Schema of the tree.
    #[must_use]
    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    /// Current root.
    #[must_use]
    pub fn root(&self) -> &NodeRef {
        &self.root
    }

    /// Immutable view of the current version.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        Snapshot::new(Arc::clone(&self.schema), Arc::clone(&self.root))
    }

    /// Freeze the current root. The frozen version stays alive and is never
    /// changed by later writes.
    pub fn publish(&mut self) {
        self.published = Some(Arc::clone(&self.root));
    }

    /// Whether the current root is the published one.
    #[must_use]
    pub fn is_published(&self) -> bool {
        self.published
            .as_ref()
            .is_some_and(|published| Arc::ptr_eq(published, &self.root))
    }

    /// See [`Snapshot::get`].
    ///
    /// # Errors
    ///
    /// Same as [`Snapshot::get`].
    pub fn get<T: DeserializeOwned, S: AsRef<str>>(&self, path: &[S]) -> Result<T, StorageError> {
        self.snapshot().get(path)
    }

    /// See [`Snapshot::get_typed`].
    ///
    /// # Errors
    ///
    /// Same as [`Snapshot::get_typed`].
    pub fn get_typed<T: DeserializeOwned>(&self, path: &TypedPath) -> Result<T, StorageError> {
        self.snapshot().get_typed(path)
    }

    /// See [`Snapshot::get_node`].
    ///
    /// # Errors
    ///
    /// Same as [`Snapshot::get_node`].
    pub fn get_node<S: AsRef<str>>(&self, path: &[S]) -> Result<NodeRef, StorageError> {
        self.snapshot().get_node(path).map(|(_, node)| node)
    }

    /// See [`Snapshot::get_encoded`].
    ///
    /// # Errors
    ///
    /// Same as [`Snapshot::get_encoded`].
    pub fn get_encoded<S: AsRef<str>>(
        &self,
        path: &[S],
        protocol: OperProtocol,
    ) -> Result<OperState, StorageError> {
        self.snapshot().get_encoded(path, protocol)
    }

    /// See [`Snapshot::get_encoded_extended`].
    ///
    /// # Errors
    ///
    /// Same as [`Snapshot::get_encoded_extended`].
    pub fn get_encoded_extended(
        &self,
        path: &ExtendedPath,
        protocol: OperProtocol,
    ) -> Result<Vec<TaggedOperState>, StorageError> {
        self.snapshot().get_encoded_extended(path, protocol)
    }

    /// Write a native value at `path`, creating absent nodes on the way.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPath` for paths invalid for the schema and
    /// `TypeMismatch` if the value does not fit the target schema.
    pub fn set<T: Serialize + ?Sized, S: AsRef<str>>(
        &mut self,
        path: &[S],
        value: &T,
    ) -> Result<(), StorageError> {
        let typed = resolve(&self.schema, path)?;
        self.set_typed(&typed, value)
    }

    /// Write a native value at a pre-resolved path.
    ///
    /// # Errors
    ///
    /// Same as [`CowStorage::set`].
    pub fn set_typed<T: Serialize + ?Sized>(
        &mut self,
        path: &TypedPath,
        value: &T,
    ) -> Result<(), StorageError> {
        let node = codec::from_native(&path.schema, value)?;
        self.replace(&path.tokens, Arc::new(node))
    }

    /// Write a node at `path`. The node is checked against the schema at
    /// the path by rendering and re-reading it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPath` for paths invalid for the schema and
    /// `TypeMismatch` if the node does not fit the target schema.
    pub fn set_node<S: AsRef<str>>(&mut self, path: &[S], node: NodeRef) -> Result<(), StorageError> {
        let typed = resolve(&self.schema, path)?;
        let rendered = codec::to_json(&typed.schema, &node)?;
        if codec::from_json(&typed.schema, &rendered)? != *node {
            return Err(StorageError::TypeMismatch(format!(
                "node does not fit the {} at {}",
                typed.schema.kind_name(),
                join_path(path)
            )));
        }
        self.replace(path, node)
    }

    /// Decode an encoded state and write it at `path`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPath` for paths invalid for the schema, and a codec
    /// or protocol error if the payload cannot be decoded.
    pub fn set_encoded<S: AsRef<str>>(&mut self, path: &[S], state: &OperState) -> Result<(), StorageError> {
        let typed = resolve(&self.schema, path)?;
        let node = codec::decode_state(&typed.schema, state, None)?;
        self.replace(path, Arc::new(node))
    }

    /// Insert a value into the container that holds `path`.
    ///
    /// - list parent: the last token is the insert position, or `-1` to append
    /// - map parent: inserts the key, failing if it already exists
    /// - set parent: inserts the member, whose token must equal the value
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` for existing map keys, `TypeMismatch` if the
    /// parent is not a container or the value does not fit, and
    /// `InvalidPath` for invalid paths or out-of-range positions.
    pub fn add<T: Serialize + ?Sized, S: AsRef<str>>(
        &mut self,
        path: &[S],
        value: &T,
    ) -> Result<(), StorageError> {
        let Some((last, parent)) = path.split_last() else {
            return Err(StorageError::TypeMismatch("cannot add at the root".to_string()));
        };
        let last = last.as_ref();
        let parent_schema = resolve(&self.schema, parent)?.schema;
        let full_path = join_path(path);

        match &parent_schema.kind {
            SchemaKind::List { element } => {
                let node = Arc::new(codec::from_native(element, value)?);
                let position = if last == APPEND_TOKEN {
                    None
                } else {
                    Some(last.parse::<usize>().map_err(|_| PathError::InvalidIndex {
                        path: join_path(parent),
                        token: last.to_string(),
                    })?)
                };
                self.mutate(parent, true, |_, parent_node| {
                    let Node::List(items) = Arc::make_mut(parent_node) else {
                        return Err(StorageError::TypeMismatch(format!("{full_path} is not in a list")));
                    };
                    match position {
                        None => items.push(node.clone()),
                        Some(idx) if idx <= items.len() => items.insert(idx, node.clone()),
                        Some(_) => {
                            return Err(PathError::InvalidIndex {
                                path: full_path.clone(),
                                token: last.to_string(),
                            }
                            .into())
                        }
                    }
                    Ok(())
                })
            }
            SchemaKind::Map { key, value: value_schema } => {
                let key = parse_key(key, last, parent)?;
                let node = Arc::new(codec::from_native(value_schema, value)?);
                self.mutate(parent, true, |_, parent_node| {
                    let Node::Map(entries) = Arc::make_mut(parent_node) else {
                        return Err(StorageError::TypeMismatch(format!("{full_path} is not in a map")));
                    };
                    if entries.contains_key(&key) {
                        return Err(StorageError::AlreadyExists(full_path.clone()));
                    }
                    entries.insert(key.clone(), node.clone());
                    Ok(())
                })
            }
            SchemaKind::Set { element } => {
                let key = parse_key(element, last, parent)?;
                let member = codec::from_native(element, value)?;
                let matches = member
                    .as_value()
                    .and_then(Key::from_value)
                    .is_some_and(|k| k == key);
                if !matches {
                    return Err(StorageError::TypeMismatch(format!(
                        "set member {full_path} does not match its value"
                    )));
                }
                self.mutate(parent, true, |_, parent_node| {
                    let Node::Set(members) = Arc::make_mut(parent_node) else {
                        return Err(StorageError::TypeMismatch(format!("{full_path} is not in a set")));
                    };
                    members.insert(key.clone());
                    Ok(())
                })
            }
            _ => Err(StorageError::TypeMismatch(format!(
                "cannot add below {}: not a list, map or set",
                join_path(parent)
            ))),
        }
    }

    /// Remove the node at `path`.
    ///
    /// Optional struct members and union arms become absent, required
    /// members are reset to their default, container entries are removed.
    /// Removing an absent node is a no-op; removing the root resets the tree.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPath` for paths invalid for the schema.
    pub fn remove<S: AsRef<str>>(&mut self, path: &[S]) -> Result<(), StorageError> {
        let typed = resolve(&self.schema, path)?;
        let Some((last_step, parent)) = typed.steps.split_last() else {
            self.root = Arc::new(Node::default_for(&self.schema));
            tracing::debug!("Reset root");
            return Ok(());
        };
        match self.snapshot().get_node(path) {
            Err(err) if err.is_not_present() => return Ok(()),
            Err(err) => return Err(err),
            Ok(_) => {}
        }

        let parent_tokens = &path[..parent.len()];
        let target_schema = Arc::clone(&typed.schema);
        self.mutate(parent_tokens, false, |parent_schema, parent_node| {
            match (Arc::make_mut(parent_node), last_step, &parent_schema.kind) {
                (Node::Struct(fields), Step::Field(idx), SchemaKind::Struct(members)) => {
                    let optional = members.get(*idx).is_some_and(|f| f.optional);
                    if let Some(slot) = fields.get_mut(*idx) {
                        *slot = (!optional).then(|| Arc::new(Node::default_for(&target_schema)));
                    }
                }
                (Node::Union(active), Step::Member(idx), _) => {
                    if active.as_ref().is_some_and(|(current, _)| current == idx) {
                        *active = None;
                    }
                }
                (Node::List(items), Step::Index(idx), _) => {
                    if *idx < items.len() {
                        items.remove(*idx);
                    }
                }
                (Node::Map(entries), Step::Key(key), _) => {
                    entries.remove(key);
                }
                (Node::Set(members), Step::Key(key), _) => {
                    members.remove(key);
                }
                (node, _, _) => {
                    return Err(StorageError::TypeMismatch(format!(
                        "node at {} is a {}",
                        join_path(parent_tokens),
                        node.kind_name()
                    )))
                }
            }
            Ok(())
        })?;
        tracing::debug!(path = %join_path(path), "Removed value");
        Ok(())
    }

    /// Run `f` on the node at `path` with mutable access. Absent nodes are
    /// created when `create_missing` is set.
    ///
    /// # Errors
    ///
    /// Returns `VisitorException` if `f` fails, leaving the tree unchanged,
    /// and `InvalidPath` for invalid or absent paths.
    pub fn modify<S, E, F>(&mut self, path: &[S], create_missing: bool, f: F) -> Result<(), StorageError>
    where
        S: AsRef<str>,
        E: std::fmt::Display,
        F: FnMut(&[String], &SchemaRef, &mut NodeRef) -> Result<(), E>,
    {
        let options = PathVisitOptions {
            mode: PathVisitMode::Leaf,
            create_missing,
        };
        visit_path_mut(&self.schema, &mut self.root, path, options, f)?;
        Ok(())
    }

    /// Apply a change unit. Each unit is atomic; a delta or patch with
    /// several units stops at the first failing one, keeping the units
    /// applied before it.
    ///
    /// # Errors
    ///
    /// Returns the first failure.
    pub fn patch(&mut self, patch: &StatePatch) -> Result<(), StorageError> {
        match patch {
            StatePatch::Delta(delta) => {
                for unit in &delta.changes {
                    match &unit.new_state {
                        Some(contents) => {
                            let state = OperState::new(delta.protocol, contents.clone());
                            self.set_encoded(&unit.path, &state)?;
                        }
                        None => self.remove(&unit.path)?,
                    }
                }
                tracing::debug!(units = delta.changes.len(), "Applied delta");
            }
            StatePatch::State(tagged) => self.set_encoded(&tagged.path, &tagged.state)?,
            StatePatch::Tree(tree) => {
                for (relative, leaf) in ordered_leaves(&tree.root) {
                    let mut path = tree.base_path.clone();
                    path.extend(relative);
                    match leaf {
                        PatchNode::Val(contents) => {
                            let state = OperState::new(tree.protocol, contents.clone());
                            self.set_encoded(&path, &state)?;
                        }
                        PatchNode::Del => self.remove(&path)?,
                        PatchNode::Children(_) => {}
                    }
                }
            }
        }
        Ok(())
    }

    fn replace<S: AsRef<str>>(&mut self, path: &[S], node: NodeRef) -> Result<(), StorageError> {
        if path.is_empty() {
            self.root = node;
        } else {
            visit_path_mut(
                &self.schema,
                &mut self.root,
                path,
                PathVisitOptions::create(),
                |_, _, target| {
                    *target = Arc::clone(&node);
                    Ok::<_, std::convert::Infallible>(())
                },
            )?;
        }
        tracing::debug!(path = %join_path(path), "Set value");
        Ok(())
    }

    /// Mutate the node at `path` with a callback whose typed error is
    /// returned as is.
    fn mutate<S, F>(&mut self, path: &[S], create_missing: bool, mut f: F) -> Result<(), StorageError>
    where
        S: AsRef<str>,
        F: FnMut(&SchemaRef, &mut NodeRef) -> Result<(), StorageError>,
    {
        let mut failure = None;
        let options = PathVisitOptions {
            mode: PathVisitMode::Leaf,
            create_missing,
        };
        let result = visit_path_mut(&self.schema, &mut self.root, path, options, |_, schema, node| {
            f(schema, node).map_err(|err| {
                let msg = err.to_string();
                failure = Some(err);
                msg
            })
        });
        match (result, failure) {
            (_, Some(err)) => Err(err),
            (Err(err), None) => Err(err.into()),
            (Ok(()), None) => Ok(()),
        }
    }
}

fn parse_key<S: AsRef<str>>(key_schema: &SchemaRef, token: &str, parent: &[S]) -> Result<Key, StorageError> {
    let primitive = key_schema
        .as_primitive()
        .ok_or_else(|| StorageError::TypeMismatch(format!("{} is not a key type", key_schema.name)))?;
    Key::parse(primitive, token).map_err(|reason| {
        PathError::InvalidKey {
            path: join_path(parent),
            token: token.to_string(),
            reason,
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Value;
    use crate::schema::{Field, PrimitiveType, Schema};
    use opertree_proto::OperDeltaUnit;
    use serde_json::json;
    use std::collections::BTreeMap;

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
                Field::optional(5, "o", i32_ty),
            ],
        )
        .unwrap()
    }

    fn storage() -> CowStorage {
        CowStorage::from_json(schema(), &json!({ "a": 1, "b": {} })).unwrap()
    }

    #[test]
    fn set_and_get() {
        let mut s = storage();
        s.set(&["b", "x"], &5).unwrap();
        assert_eq!(s.get::<i32, _>(&["b", "x"]).unwrap(), 5);
        assert_eq!(s.get::<i32, _>(&["a"]).unwrap(), 1);

        let b: BTreeMap<String, i32> = s.get(&["b"]).unwrap();
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn absent_key_is_invalid_path_not_type_mismatch() {
        let s = storage();
        assert!(resolve(s.schema(), &["b", "z"]).is_ok());
        let err = s.get::<i32, _>(&["b", "z"]).unwrap_err();
        assert!(err.is_not_present(), "{err}");
    }

    #[test]
    fn wrong_native_type_is_type_mismatch() {
        let mut s = storage();
        assert!(matches!(
            s.get::<String, _>(&["a"]),
            Err(StorageError::TypeMismatch(_))
        ));
        assert!(matches!(
            s.set(&["a"], "text"),
            Err(StorageError::TypeMismatch(_))
        ));
        assert!(matches!(
            s.set(&["zz"], &1),
            Err(StorageError::InvalidPath(PathError::UnknownMember { .. }))
        ));
    }

    #[test]
    fn set_node_checks_the_target_schema() {
        let mut s = storage();
        let text = Arc::new(Node::Primitive(Value::String("x".to_string())));
        assert!(matches!(
            s.set_node(&["a"], Arc::clone(&text)),
            Err(StorageError::TypeMismatch(_))
        ));
        let too_wide = Arc::new(Node::Primitive(Value::Int(i64::MAX)));
        assert!(matches!(
            s.set_node(&["b", "x"], too_wide),
            Err(StorageError::TypeMismatch(_))
        ));
        assert!(matches!(
            s.set_node(&["l"], Arc::new(Node::List(vec![text]))),
            Err(StorageError::TypeMismatch(_))
        ));
        assert_eq!(s.get::<i32, _>(&["a"]).unwrap(), 1);

        let list = Arc::new(Node::List(vec![Arc::new(Node::Primitive(Value::Int(4)))]));
        s.set_node(&["l"], Arc::clone(&list)).unwrap();
        assert!(Arc::ptr_eq(&s.get_node(&["l"]).unwrap(), &list));
    }

    #[test]
    fn snapshots_are_isolated() {
        let mut s = storage();
        let before = s.snapshot();
        s.set(&["a"], &2).unwrap();
        assert_eq!(before.get::<i32, _>(&["a"]).unwrap(), 1);
        assert_eq!(s.get::<i32, _>(&["a"]).unwrap(), 2);
    }

    #[test]
    fn publish_freezes_root() {
        let mut s = storage();
        s.publish();
        assert!(s.is_published());
        let frozen = Arc::clone(s.root());
        s.set(&["a"], &3).unwrap();
        assert!(!s.is_published());
        assert!(!Arc::ptr_eq(&frozen, s.root()));
        assert_eq!(
            Snapshot::new(Arc::clone(s.schema()), frozen)
                .get::<i32, _>(&["a"])
                .unwrap(),
            1
        );
    }

    #[test]
    fn encoded_roundtrip_both_protocols() {
        for protocol in OperProtocol::ALL {
            let mut s = storage();
            s.set(&["b", "x"], &7).unwrap();
            let state = s.get_encoded(&["b"], protocol).unwrap();

            let mut other = storage();
            other.set_encoded(&["b"], &state).unwrap();
            assert_eq!(other.get::<i32, _>(&["b", "x"]).unwrap(), 7);
        }
    }

    #[test]
    fn add_semantics() {
        let mut s = storage();
        s.add(&["l", "-1"], &1).unwrap();
        s.add(&["l", "-1"], &3).unwrap();
        s.add(&["l", "1"], &2).unwrap();
        assert_eq!(s.get::<Vec<i32>, _>(&["l"]).unwrap(), vec![1, 2, 3]);
        assert!(s.add(&["l", "9"], &0).is_err());

        s.add(&["b", "k"], &1).unwrap();
        assert!(matches!(
            s.add(&["b", "k"], &2),
            Err(StorageError::AlreadyExists(_))
        ));

        s.add(&["s", "m"], "m").unwrap();
        assert!(matches!(
            s.add(&["s", "m"], "n"),
            Err(StorageError::TypeMismatch(_))
        ));
        assert_eq!(s.get::<Vec<String>, _>(&["s"]).unwrap(), vec!["m"]);
    }

    #[test]
    fn remove_semantics() {
        let mut s = storage();
        s.set(&["b", "x"], &1).unwrap();
        s.set(&["o"], &4).unwrap();
        s.set(&["a"], &9).unwrap();

        s.remove(&["b", "x"]).unwrap();
        s.remove(&["o"]).unwrap();
        s.remove(&["a"]).unwrap();
        s.remove(&["b", "missing"]).unwrap();

        assert!(s.get::<i32, _>(&["b", "x"]).unwrap_err().is_not_present());
        assert!(s.get::<i32, _>(&["o"]).unwrap_err().is_not_present());
        assert_eq!(s.get::<i32, _>(&["a"]).unwrap(), 0);
        assert!(s.remove(&["nope"]).is_err());
    }

    #[test]
    fn failed_modify_leaves_tree_unchanged() {
        let mut s = storage();
        let before = Arc::clone(s.root());
        let err = s
            .modify(&["b", "x"], true, |_, _, _| Err("refused"))
            .unwrap_err();
        assert!(matches!(err, StorageError::VisitorException(_)));
        assert!(Arc::ptr_eq(&before, s.root()));
    }

    #[test]
    fn delta_patch_stops_at_first_failure() {
        let mut s = storage();
        let good = s.snapshot();
        let mut source = storage();
        source.set(&["b", "x"], &5).unwrap();
        let payload = source.get_encoded(&["b", "x"], OperProtocol::Json).unwrap();

        let delta = OperDelta {
            changes: vec![
                OperDeltaUnit {
                    path: vec!["b".into(), "x".into()],
                    old_state: None,
                    new_state: payload.contents.clone(),
                },
                OperDeltaUnit {
                    path: vec!["a".into()],
                    old_state: None,
                    new_state: Some(b"\"not a number\"".to_vec()),
                },
            ],
            protocol: OperProtocol::Json,
            metadata: None,
        };
        assert!(s.patch(&delta.into()).is_err());
        assert_eq!(s.get::<i32, _>(&["b", "x"]).unwrap(), 5);
        assert_eq!(s.get::<i32, _>(&["a"]).unwrap(), good.get::<i32, _>(&["a"]).unwrap());
    }

    #[test]
    fn extended_get() {
        let mut s = storage();
        s.set(&["b", "x"], &5).unwrap();
        s.set(&["b", "y"], &9).unwrap();
        let states = s
            .get_encoded_extended(&ExtendedPath::parse("/b/*").unwrap(), OperProtocol::Json)
            .unwrap();
        let paths: Vec<_> = states.iter().map(|t| join_path(&t.path)).collect();
        assert_eq!(paths, vec!["/b/x", "/b/y"]);
        assert_eq!(states[1].state.contents.as_deref(), Some(&b"9"[..]));
    }
}
