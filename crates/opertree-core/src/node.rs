//! Immutable, structurally shared tree nodes.
//!
//! A tree is a [`NodeRef`] (an `Arc<Node>`). Writers never mutate a shared
//! node in place: they copy the nodes on the path to the change and share
//! every untouched subtree with the previous version.

use crate::resolver::Step;
use crate::schema::{PrimitiveType, Schema, SchemaKind, SchemaRef};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Shared handle to a node.
pub type NodeRef = Arc<Node>;

/// A node of the state tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// One slot per schema member, in declaration order; `None` if absent
    Struct(Vec<Option<NodeRef>>),
    /// Active member index and value, if any
    Union(Option<(usize, NodeRef)>),
    /// Elements in order
    List(Vec<NodeRef>),
    /// Entries ordered by key
    Map(BTreeMap<Key, NodeRef>),
    /// Members ordered by key
    Set(BTreeSet<Key>),
    /// Scalar leaf
    Primitive(Value),
}

/// A scalar value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Boolean
    Bool(bool),
    /// Any integer width, range checked against the schema
    Int(i64),
    /// Either float width
    Float(f64),
    /// UTF-8 string
    String(String),
    /// Raw bytes
    Binary(Vec<u8>),
    /// Enumeration value
    Enum(i32),
}

/// A map key or set member.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Key {
    /// Integer or enum key
    Int(i64),
    /// String key
    String(String),
}

/// A child of a composite node, as produced by [`Node::children`].
#[derive(Debug, Clone)]
pub struct Child {
    /// Path token addressing the child
    pub token: String,
    /// Child schema
    pub schema: SchemaRef,
    /// Child node
    pub node: NodeRef,
}

impl Value {
    /// Default value of a primitive type.
    #[must_use]
    pub fn default_for(primitive: &PrimitiveType) -> Self {
        match primitive {
            PrimitiveType::Bool => Self::Bool(false),
            PrimitiveType::Byte | PrimitiveType::I16 | PrimitiveType::I32 | PrimitiveType::I64 => {
                Self::Int(0)
            }
            PrimitiveType::Float | PrimitiveType::Double => Self::Float(0.0),
            PrimitiveType::String => Self::String(String::new()),
            PrimitiveType::Binary => Self::Binary(Vec::new()),
            PrimitiveType::Enum(e) => Self::Enum(e.values.first().map_or(0, |v| v.value)),
        }
    }

    /// Whether this value is valid for `primitive`.
    #[must_use]
    pub fn conforms(&self, primitive: &PrimitiveType) -> bool {
        match (self, primitive) {
            (Self::Bool(_), PrimitiveType::Bool)
            | (Self::Float(_), PrimitiveType::Float | PrimitiveType::Double)
            | (Self::String(_), PrimitiveType::String)
            | (Self::Binary(_), PrimitiveType::Binary)
            | (Self::Enum(_), PrimitiveType::Enum(_)) => true,
            (Self::Int(v), ty) => ty
                .int_range()
                .is_some_and(|(min, max)| (min..=max).contains(v)),
            _ => false,
        }
    }

    /// Short lowercase name of the value's variant.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "integer",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Binary(_) => "binary",
            Self::Enum(_) => "enum",
        }
    }
}

impl Key {
    /// Parse a path token as a key of type `primitive`.
    ///
    /// Integer tokens are range checked. Enum tokens may be the enumerator
    /// name or its decimal value.
    ///
    /// # Errors
    ///
    /// Returns a description of why the token is not a valid key.
    pub fn parse(primitive: &PrimitiveType, token: &str) -> Result<Self, String> {
        match primitive {
            PrimitiveType::String => Ok(Self::String(token.to_string())),
            PrimitiveType::Enum(e) => {
                if let Some(value) = e.value_of(token) {
                    return Ok(Self::Int(i64::from(value)));
                }
                token
                    .parse::<i32>()
                    .map(|v| Self::Int(i64::from(v)))
                    .map_err(|_| format!("not an enumerator: {token}"))
            }
            ty => {
                let (min, max) = ty
                    .int_range()
                    .ok_or_else(|| format!("{} cannot be a key", ty.type_name()))?;
                let value = token
                    .parse::<i64>()
                    .map_err(|e| format!("not an integer: {e}"))?;
                if (min..=max).contains(&value) {
                    Ok(Self::Int(value))
                } else {
                    Err(format!("{value} out of range for {}", ty.type_name()))
                }
            }
        }
    }

    /// Path token for this key.
    #[must_use]
    pub fn to_token(&self, primitive: &PrimitiveType) -> String {
        match (self, primitive) {
            (Self::Int(v), PrimitiveType::Enum(e)) => i32::try_from(*v)
                .ok()
                .and_then(|v| e.name_of(v))
                .map_or_else(|| v.to_string(), str::to_string),
            (Self::Int(v), _) => v.to_string(),
            (Self::String(s), _) => s.clone(),
        }
    }

    /// The value this key represents as a leaf of type `primitive`.
    #[must_use]
    pub fn to_value(&self, primitive: &PrimitiveType) -> Value {
        match (self, primitive) {
            (Self::Int(v), PrimitiveType::Enum(_)) => {
                Value::Enum(i32::try_from(*v).unwrap_or_default())
            }
            (Self::Int(v), _) => Value::Int(*v),
            (Self::String(s), _) => Value::String(s.clone()),
        }
    }

    /// The key for a leaf value, if the value can be a key.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Int(v) => Some(Self::Int(*v)),
            Value::Enum(v) => Some(Self::Int(i64::from(*v))),
            Value::String(s) => Some(Self::String(s.clone())),
            _ => None,
        }
    }
}

impl Node {
    /// Default node for a schema: required struct members are populated,
    /// optional members and union arms are absent, containers are empty.
    #[must_use]
    pub fn default_for(schema: &Schema) -> Self {
        match &schema.kind {
            SchemaKind::Struct(members) => Self::Struct(
                members
                    .fields()
                    .iter()
                    .map(|field| {
                        (!field.optional).then(|| Arc::new(Self::default_for(&field.schema)))
                    })
                    .collect(),
            ),
            SchemaKind::Union(_) => Self::Union(None),
            SchemaKind::List { .. } => Self::List(Vec::new()),
            SchemaKind::Map { .. } => Self::Map(BTreeMap::new()),
            SchemaKind::Set { .. } => Self::Set(BTreeSet::new()),
            SchemaKind::Primitive { primitive } => Self::Primitive(Value::default_for(primitive)),
        }
    }

    /// Short lowercase name of the node's shape.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Struct(_) => "struct",
            Self::Union(_) => "union",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Set(_) => "set",
            Self::Primitive(_) => "primitive",
        }
    }

    /// The scalar of a leaf node.
    #[must_use]
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Primitive(value) => Some(value),
            _ => None,
        }
    }

    /// The child addressed by a resolved step, if present.
    ///
    /// Set members have no node of their own; a leaf node holding the member
    /// is materialized for them.
    #[must_use]
    pub fn child(&self, schema: &Schema, step: &Step) -> Option<NodeRef> {
        match (self, step, &schema.kind) {
            (Self::Struct(fields), Step::Field(idx), _) => fields.get(*idx).cloned().flatten(),
            (Self::Union(Some((active, node))), Step::Member(idx), _) if active == idx => {
                Some(Arc::clone(node))
            }
            (Self::List(items), Step::Index(idx), _) => items.get(*idx).cloned(),
            (Self::Map(entries), Step::Key(key), _) => entries.get(key).cloned(),
            (Self::Set(members), Step::Key(key), SchemaKind::Set { element }) => {
                let primitive = element.as_primitive()?;
                members
                    .contains(key)
                    .then(|| Arc::new(Self::Primitive(key.to_value(primitive))))
            }
            _ => None,
        }
    }

    /// Present children with their tokens and schemas, in traversal order:
    /// declaration order for structs, index order for lists, key order for
    /// maps and sets.
    #[must_use]
    pub fn children(&self, schema: &Schema, use_ids: bool) -> Vec<Child> {
        match (self, &schema.kind) {
            (Self::Struct(fields), SchemaKind::Struct(members)) => fields
                .iter()
                .enumerate()
                .filter_map(|(idx, slot)| {
                    let node = slot.as_ref()?;
                    let field = members.get(idx)?;
                    Some(Child {
                        token: members.token(idx, use_ids),
                        schema: Arc::clone(&field.schema),
                        node: Arc::clone(node),
                    })
                })
                .collect(),
            (Self::Union(Some((idx, node))), SchemaKind::Union(members)) => members
                .get(*idx)
                .map(|field| Child {
                    token: members.token(*idx, use_ids),
                    schema: Arc::clone(&field.schema),
                    node: Arc::clone(node),
                })
                .into_iter()
                .collect(),
            (Self::List(items), SchemaKind::List { element }) => items
                .iter()
                .enumerate()
                .map(|(idx, node)| Child {
                    token: idx.to_string(),
                    schema: Arc::clone(element),
                    node: Arc::clone(node),
                })
                .collect(),
            (Self::Map(entries), SchemaKind::Map { key, value }) => {
                let Some(key_type) = key.as_primitive() else {
                    return Vec::new();
                };
                entries
                    .iter()
                    .map(|(k, node)| Child {
                        token: k.to_token(key_type),
                        schema: Arc::clone(value),
                        node: Arc::clone(node),
                    })
                    .collect()
            }
            (Self::Set(members), SchemaKind::Set { element }) => {
                let Some(element_type) = element.as_primitive() else {
                    return Vec::new();
                };
                members
                    .iter()
                    .map(|k| Child {
                        token: k.to_token(element_type),
                        schema: Arc::clone(element),
                        node: Arc::new(Self::Primitive(k.to_value(element_type))),
                    })
                    .collect()
            }
            _ => Vec::new(),
        }
    }
}

impl From<Value> for Node {
    fn from(value: Value) -> Self {
        Self::Primitive(value)
    }
}
