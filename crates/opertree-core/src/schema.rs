//! Runtime schema descriptors.
//!
//! A schema describes the shape of a state tree: structs and unions with
//! numbered, named members, lists, maps keyed by primitives, sets of
//! primitives and primitive leaves. Nodes carry no type information of their
//! own, so every traversal walks a schema alongside the node it visits.
//!
//! Schemas are usually built once at startup, either programmatically or from
//! a JSON descriptor:
//!
//! ```json
//! {
//!   "name": "Root",
//!   "kind": "struct",
//!   "members": [
//!     { "id": 1, "name": "a", "schema": { "name": "i32", "kind": "primitive", "type": "i32" } }
//!   ]
//! }
//! ```

use crate::error::SchemaError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Shared handle to a schema descriptor.
pub type SchemaRef = Arc<Schema>;

/// A named schema descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    /// Human readable type name
    pub name: String,
    /// Shape of values of this type
    #[serde(flatten)]
    pub kind: SchemaKind,
}

/// The shape of a schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchemaKind {
    /// Record with a fixed set of members
    Struct(Members),
    /// Tagged alternative: at most one member is active
    Union(Members),
    /// Ordered sequence of elements
    List {
        /// Element schema
        element: SchemaRef,
    },
    /// Mapping from primitive keys to values
    Map {
        /// Key schema; must be a primitive key type
        key: SchemaRef,
        /// Value schema
        value: SchemaRef,
    },
    /// Unordered collection of distinct primitives
    Set {
        /// Element schema; must be a primitive key type
        element: SchemaRef,
    },
    /// Scalar leaf
    Primitive {
        /// Scalar type
        #[serde(rename = "type")]
        primitive: PrimitiveType,
    },
}

/// Scalar leaf types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimitiveType {
    /// Boolean
    Bool,
    /// 8-bit signed integer
    Byte,
    /// 16-bit signed integer
    I16,
    /// 32-bit signed integer
    I32,
    /// 64-bit signed integer
    I64,
    /// 32-bit float
    Float,
    /// 64-bit float
    Double,
    /// UTF-8 string
    String,
    /// Raw bytes
    Binary,
    /// Enumeration with named values
    Enum(EnumSchema),
}

impl PrimitiveType {
    /// Whether values of this type can key a map or populate a set.
    #[must_use]
    pub fn is_key_type(&self) -> bool {
        matches!(
            self,
            Self::Byte | Self::I16 | Self::I32 | Self::I64 | Self::String | Self::Enum(_)
        )
    }

    /// Inclusive range of integer types, `None` for non-integers.
    #[must_use]
    pub fn int_range(&self) -> Option<(i64, i64)> {
        match self {
            Self::Byte => Some((i64::from(i8::MIN), i64::from(i8::MAX))),
            Self::I16 => Some((i64::from(i16::MIN), i64::from(i16::MAX))),
            Self::I32 => Some((i64::from(i32::MIN), i64::from(i32::MAX))),
            Self::I64 => Some((i64::MIN, i64::MAX)),
            _ => None,
        }
    }

    /// Short lowercase name used in error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Byte => "byte",
            Self::I16 => "i16",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::Float => "float",
            Self::Double => "double",
            Self::String => "string",
            Self::Binary => "binary",
            Self::Enum(_) => "enum",
        }
    }
}

/// Named values of an enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumSchema {
    /// Enumerators in declaration order
    pub values: Vec<EnumValue>,
}

/// A single enumerator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumValue {
    /// Symbolic name
    pub name: String,
    /// Numeric value
    pub value: i32,
}

impl EnumSchema {
    /// Build an enumeration from `(name, value)` pairs.
    #[must_use]
    pub fn new<S: Into<String>>(values: impl IntoIterator<Item = (S, i32)>) -> Self {
        Self {
            values: values
                .into_iter()
                .map(|(name, value)| EnumValue {
                    name: name.into(),
                    value,
                })
                .collect(),
        }
    }

    /// Numeric value of the enumerator called `name`.
    #[must_use]
    pub fn value_of(&self, name: &str) -> Option<i32> {
        self.values.iter().find(|v| v.name == name).map(|v| v.value)
    }

    /// Name of the enumerator with numeric `value`.
    #[must_use]
    pub fn name_of(&self, value: i32) -> Option<&str> {
        self.values
            .iter()
            .find(|v| v.value == value)
            .map(|v| v.name.as_str())
    }
}

/// A member of a struct or union.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    /// Numeric member id
    pub id: i16,
    /// Member name
    pub name: String,
    /// Member schema
    pub schema: SchemaRef,
    /// Whether the member may be absent
    #[serde(default)]
    pub optional: bool,
}

impl Field {
    /// Create a required member.
    #[must_use]
    pub fn new(id: i16, name: impl Into<String>, schema: SchemaRef) -> Self {
        Self {
            id,
            name: name.into(),
            schema,
            optional: false,
        }
    }

    /// Create an optional member.
    #[must_use]
    pub fn optional(id: i16, name: impl Into<String>, schema: SchemaRef) -> Self {
        Self {
            optional: true,
            ..Self::new(id, name, schema)
        }
    }
}

/// Member table of a struct or union with name and id lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "MemberTable", into = "MemberTable")]
pub struct Members {
    fields: Vec<Field>,
    by_name: HashMap<String, usize>,
    by_id: HashMap<i16, usize>,
}

#[derive(Serialize, Deserialize)]
struct MemberTable {
    members: Vec<Field>,
}

impl TryFrom<MemberTable> for Members {
    type Error = SchemaError;

    fn try_from(table: MemberTable) -> Result<Self, Self::Error> {
        Members::new(table.members)
    }
}

impl From<Members> for MemberTable {
    fn from(members: Members) -> Self {
        Self {
            members: members.fields,
        }
    }
}

impl PartialEq for Members {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}

impl Members {
    /// Build a member table, rejecting duplicate names or ids.
    ///
    /// # Errors
    ///
    /// Returns an error if two members share a name or an id.
    pub fn new(fields: Vec<Field>) -> Result<Self, SchemaError> {
        let mut by_name = HashMap::with_capacity(fields.len());
        let mut by_id = HashMap::with_capacity(fields.len());
        for (idx, field) in fields.iter().enumerate() {
            if by_name.insert(field.name.clone(), idx).is_some() {
                return Err(SchemaError::DuplicateMemberName(field.name.clone()));
            }
            if by_id.insert(field.id, idx).is_some() {
                return Err(SchemaError::DuplicateMemberId(field.id));
            }
        }
        Ok(Self {
            fields,
            by_name,
            by_id,
        })
    }

    /// Members in declaration order.
    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the table has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Member at declaration index `idx`.
    #[must_use]
    pub fn get(&self, idx: usize) -> Option<&Field> {
        self.fields.get(idx)
    }

    /// Look up a member by name or by its decimal id.
    #[must_use]
    pub fn lookup(&self, token: &str) -> Option<usize> {
        if let Some(idx) = self.by_name.get(token) {
            return Some(*idx);
        }
        token
            .parse::<i16>()
            .ok()
            .and_then(|id| self.by_id.get(&id).copied())
    }

    /// Look up a member by id.
    #[must_use]
    pub fn by_id(&self, id: i16) -> Option<usize> {
        self.by_id.get(&id).copied()
    }

    /// Path token for the member at `idx`.
    #[must_use]
    pub fn token(&self, idx: usize, use_ids: bool) -> String {
        match self.fields.get(idx) {
            Some(field) if use_ids => field.id.to_string(),
            Some(field) => field.name.clone(),
            None => idx.to_string(),
        }
    }
}

impl Schema {
    /// A primitive leaf schema named after its type.
    #[must_use]
    pub fn primitive(primitive: PrimitiveType) -> SchemaRef {
        Arc::new(Self {
            name: primitive.type_name().to_string(),
            kind: SchemaKind::Primitive { primitive },
        })
    }

    /// A list schema.
    #[must_use]
    pub fn list(element: SchemaRef) -> SchemaRef {
        Arc::new(Self {
            name: format!("list<{}>", element.name),
            kind: SchemaKind::List { element },
        })
    }

    /// A map schema.
    ///
    /// # Errors
    ///
    /// Returns an error if `key` is not a primitive key type.
    pub fn map(key: SchemaRef, value: SchemaRef) -> Result<SchemaRef, SchemaError> {
        check_key_type(&key)?;
        Ok(Arc::new(Self {
            name: format!("map<{},{}>", key.name, value.name),
            kind: SchemaKind::Map { key, value },
        }))
    }

    /// A set schema.
    ///
    /// # Errors
    ///
    /// Returns an error if `element` is not a primitive key type.
    pub fn set(element: SchemaRef) -> Result<SchemaRef, SchemaError> {
        check_key_type(&element)?;
        Ok(Arc::new(Self {
            name: format!("set<{}>", element.name),
            kind: SchemaKind::Set { element },
        }))
    }

    /// A struct schema.
    ///
    /// # Errors
    ///
    /// Returns an error if member names or ids collide.
    pub fn structure(name: impl Into<String>, fields: Vec<Field>) -> Result<SchemaRef, SchemaError> {
        Ok(Arc::new(Self {
            name: name.into(),
            kind: SchemaKind::Struct(Members::new(fields)?),
        }))
    }

    /// A union schema.
    ///
    /// # Errors
    ///
    /// Returns an error if member names or ids collide.
    pub fn union(name: impl Into<String>, fields: Vec<Field>) -> Result<SchemaRef, SchemaError> {
        Ok(Arc::new(Self {
            name: name.into(),
            kind: SchemaKind::Union(Members::new(fields)?),
        }))
    }

    /// Load a schema from its JSON descriptor and validate it.
    ///
    /// # Errors
    ///
    /// Returns an error if the descriptor is malformed or invalid.
    pub fn from_json(json: &str) -> Result<SchemaRef, SchemaError> {
        let schema: Schema =
            serde_json::from_str(json).map_err(|e| SchemaError::Descriptor(e.to_string()))?;
        schema.validate()?;
        Ok(Arc::new(schema))
    }

    /// Check nested key types, which deserialization cannot enforce.
    ///
    /// # Errors
    ///
    /// Returns the first invalid map key or set element type found.
    pub fn validate(&self) -> Result<(), SchemaError> {
        match &self.kind {
            SchemaKind::Struct(members) | SchemaKind::Union(members) => members
                .fields()
                .iter()
                .try_for_each(|field| field.schema.validate()),
            SchemaKind::List { element } => element.validate(),
            SchemaKind::Map { key, value } => {
                check_key_type(key)?;
                value.validate()
            }
            SchemaKind::Set { element } => check_key_type(element),
            SchemaKind::Primitive { .. } => Ok(()),
        }
    }

    /// The primitive type of a leaf schema.
    #[must_use]
    pub fn as_primitive(&self) -> Option<&PrimitiveType> {
        match &self.kind {
            SchemaKind::Primitive { primitive } => Some(primitive),
            _ => None,
        }
    }

    /// Whether this schema is a primitive leaf.
    #[must_use]
    pub fn is_primitive(&self) -> bool {
        matches!(self.kind, SchemaKind::Primitive { .. })
    }

    /// Short lowercase name of the schema's shape.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            SchemaKind::Struct(_) => "struct",
            SchemaKind::Union(_) => "union",
            SchemaKind::List { .. } => "list",
            SchemaKind::Map { .. } => "map",
            SchemaKind::Set { .. } => "set",
            SchemaKind::Primitive { .. } => "primitive",
        }
    }
}

fn check_key_type(schema: &Schema) -> Result<(), SchemaError> {
    match schema.as_primitive() {
        Some(primitive) if primitive.is_key_type() => Ok(()),
        _ => Err(SchemaError::InvalidKeyType(schema.name.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_lookup_by_name_and_id() {
        let members = Members::new(vec![
            Field::new(1, "a", Schema::primitive(PrimitiveType::I32)),
            Field::optional(7, "b", Schema::primitive(PrimitiveType::String)),
        ])
        .unwrap();

        assert_eq!(members.lookup("a"), Some(0));
        assert_eq!(members.lookup("7"), Some(1));
        assert_eq!(members.lookup("2"), None);
        assert_eq!(members.token(1, true), "7");
        assert_eq!(members.token(1, false), "b");
    }

    #[test]
    fn duplicate_members_rejected() {
        let err = Members::new(vec![
            Field::new(1, "a", Schema::primitive(PrimitiveType::I32)),
            Field::new(1, "b", Schema::primitive(PrimitiveType::I32)),
        ])
        .unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateMemberId(1)));
    }

    #[test]
    fn map_key_must_be_primitive() {
        let err = Schema::map(
            Schema::list(Schema::primitive(PrimitiveType::I32)),
            Schema::primitive(PrimitiveType::I32),
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::InvalidKeyType(_)));

        assert!(Schema::set(Schema::primitive(PrimitiveType::Double)).is_err());
        assert!(Schema::set(Schema::primitive(PrimitiveType::String)).is_ok());
    }

    #[test]
    fn load_from_json_descriptor() {
        let json = r#"{
            "name": "Root",
            "kind": "struct",
            "members": [
                { "id": 1, "name": "a", "schema": { "name": "i32", "kind": "primitive", "type": "i32" } },
                { "id": 2, "name": "b", "schema": {
                    "name": "map<i32,i32>", "kind": "map",
                    "key": { "name": "i32", "kind": "primitive", "type": "i32" },
                    "value": { "name": "i32", "kind": "primitive", "type": "i32" }
                } },
                { "id": 3, "name": "c", "optional": true, "schema": {
                    "name": "Color", "kind": "primitive",
                    "type": { "enum": { "values": [ { "name": "RED", "value": 1 } ] } }
                } }
            ]
        }"#;

        let schema = Schema::from_json(json).unwrap();
        let SchemaKind::Struct(members) = &schema.kind else {
            panic!("expected struct");
        };
        assert_eq!(members.len(), 3);
        assert!(members.get(2).unwrap().optional);
        assert_eq!(members.get(1).unwrap().schema.kind_name(), "map");
    }

    #[test]
    fn invalid_descriptor_key_rejected() {
        let json = r#"{
            "name": "Bad", "kind": "set",
            "element": { "name": "f", "kind": "primitive", "type": "double" }
        }"#;
        assert!(matches!(
            Schema::from_json(json),
            Err(SchemaError::InvalidKeyType(_))
        ));
    }

    #[test]
    fn enum_lookup() {
        let e = EnumSchema::new([("RED", 1), ("GREEN", 2)]);
        assert_eq!(e.value_of("GREEN"), Some(2));
        assert_eq!(e.name_of(1), Some("RED"));
        assert_eq!(e.name_of(3), None);
    }
}
