//! Protocol codecs.
//!
//! - `Compact`: CBOR with members keyed by numeric id, prefixed with the
//!   self-describe tag so it can never be mistaken for JSON.
//! - `Json`: JSON with members keyed by name, unions as a single-entry
//!   object, map keys as path tokens and enums by name.
//!
//! Native Rust values are converted through their serde JSON form, so any
//! `Serialize`/`Deserialize` type whose JSON shape matches the schema can be
//! read and written directly.

use crate::error::CodecError;
use crate::node::{Key, Node, NodeRef, Value};
use crate::schema::{Members, PrimitiveType, SchemaKind, SchemaRef};
use ciborium::value::{Integer, Value as Cbor};
use opertree_proto::{OperProtocol, OperState};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map as JsonMap, Value as Json};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Leading bytes of every compact payload (CBOR self-describe tag 55799).
pub const COMPACT_HEADER: [u8; 3] = [0xd9, 0xd9, 0xf7];

/// Encode `node` with `protocol`.
///
/// # Errors
///
/// Returns an error if the node does not fit the schema or cannot be
/// represented in the protocol (e.g. a NaN float in JSON).
pub fn encode(schema: &SchemaRef, node: &Node, protocol: OperProtocol) -> Result<Vec<u8>, CodecError> {
    match protocol {
        OperProtocol::Compact => {
            let value = to_cbor(schema, node)?;
            let mut buf = COMPACT_HEADER.to_vec();
            ciborium::into_writer(&value, &mut buf).map_err(|e| CodecError::Cbor(e.to_string()))?;
            Ok(buf)
        }
        OperProtocol::Json => {
            let value = to_json(schema, node)?;
            serde_json::to_vec(&value).map_err(|e| CodecError::Json(e.to_string()))
        }
    }
}

/// Decode a `protocol` payload into a node.
///
/// # Errors
///
/// Returns an error if the bytes are malformed, were produced by the other
/// protocol, or do not fit the schema.
pub fn decode(schema: &SchemaRef, protocol: OperProtocol, bytes: &[u8]) -> Result<Node, CodecError> {
    let compact_payload = bytes.strip_prefix(&COMPACT_HEADER[..]);
    match (protocol, compact_payload) {
        (OperProtocol::Compact, Some(rest)) => {
            let value: Cbor =
                ciborium::from_reader(rest).map_err(|e| CodecError::Cbor(e.to_string()))?;
            from_cbor(schema, &value)
        }
        (OperProtocol::Compact, None) => Err(CodecError::MissingHeader),
        (OperProtocol::Json, Some(_)) => Err(CodecError::ProtocolMismatch {
            expected: OperProtocol::Json,
            actual: OperProtocol::Compact,
        }),
        (OperProtocol::Json, None) => {
            let value: Json =
                serde_json::from_slice(bytes).map_err(|e| CodecError::Json(e.to_string()))?;
            from_json(schema, &value)
        }
    }
}

/// Encode `node` into a protocol-tagged state.
///
/// # Errors
///
/// Same as [`encode`].
pub fn encode_state(schema: &SchemaRef, node: &Node, protocol: OperProtocol) -> Result<OperState, CodecError> {
    Ok(OperState::new(protocol, encode(schema, node, protocol)?))
}

/// Decode a state, optionally requiring a specific protocol tag.
///
/// # Errors
///
/// Returns `ProtocolMismatch` if the tag differs from `expected`,
/// `MissingContents` for heartbeats, and any [`decode`] error.
pub fn decode_state(
    schema: &SchemaRef,
    state: &OperState,
    expected: Option<OperProtocol>,
) -> Result<Node, CodecError> {
    if let Some(expected) = expected {
        if expected != state.protocol {
            return Err(CodecError::ProtocolMismatch {
                expected,
                actual: state.protocol,
            });
        }
    }
    let contents = state.contents.as_deref().ok_or(CodecError::MissingContents)?;
    decode(schema, state.protocol, contents)
}

/// Convert a node into a native value through its JSON form.
///
/// # Errors
///
/// Returns `TypeMismatch` if `T` cannot represent the node.
pub fn to_native<T: DeserializeOwned>(schema: &SchemaRef, node: &Node) -> Result<T, CodecError> {
    let json = to_json(schema, node)?;
    serde_json::from_value(json)
        .map_err(|e| CodecError::mismatch(&[], std::any::type_name::<T>(), e.to_string()))
}

/// Convert a native value into a node through its JSON form.
///
/// # Errors
///
/// Returns `TypeMismatch` if the value does not fit the schema.
pub fn from_native<T: Serialize + ?Sized>(schema: &SchemaRef, value: &T) -> Result<Node, CodecError> {
    let json = serde_json::to_value(value).map_err(|e| CodecError::Json(e.to_string()))?;
    from_json(schema, &json)
}

/// Render a node as JSON.
///
/// # Errors
///
/// Returns an error if the node does not fit the schema or holds a
/// non-finite float.
pub fn to_json(schema: &SchemaRef, node: &Node) -> Result<Json, CodecError> {
    JsonCodec { path: Vec::new() }.encode(schema, node)
}

/// Build a node from JSON.
///
/// Missing required struct members take their default; `null` marks an
/// optional member absent.
///
/// # Errors
///
/// Returns `TypeMismatch` for any value that does not fit the schema.
pub fn from_json(schema: &SchemaRef, value: &Json) -> Result<Node, CodecError> {
    JsonCodec { path: Vec::new() }.decode(schema, value)
}

/// Render a node as a CBOR value.
///
/// # Errors
///
/// Returns an error if the node does not fit the schema.
pub fn to_cbor(schema: &SchemaRef, node: &Node) -> Result<Cbor, CodecError> {
    CborCodec { path: Vec::new() }.encode(schema, node)
}

/// Build a node from a CBOR value.
///
/// # Errors
///
/// Returns `TypeMismatch` for any value that does not fit the schema.
pub fn from_cbor(schema: &SchemaRef, value: &Cbor) -> Result<Node, CodecError> {
    CborCodec { path: Vec::new() }.decode(schema, value)
}

fn shape_mismatch(path: &[String], schema: &SchemaRef, node: &Node) -> CodecError {
    CodecError::mismatch(path, schema.kind_name(), node.kind_name())
}

fn key_type(schema: &SchemaRef) -> &PrimitiveType {
    // Key schemas are validated as primitives when the schema is built.
    schema.as_primitive().unwrap_or(&PrimitiveType::String)
}

/// Fill absent required members with defaults.
fn finish_struct(members: &Members, mut fields: Vec<Option<NodeRef>>) -> Node {
    for (slot, field) in fields.iter_mut().zip(members.fields()) {
        if slot.is_none() && !field.optional {
            *slot = Some(Arc::new(Node::default_for(&field.schema)));
        }
    }
    Node::Struct(fields)
}

fn check_primitive(path: &[String], primitive: &PrimitiveType, value: Value) -> Result<Value, CodecError> {
    if value.conforms(primitive) {
        Ok(value)
    } else {
        Err(CodecError::mismatch(path, primitive.type_name(), format!("{value:?}")))
    }
}

struct JsonCodec {
    path: Vec<String>,
}

impl JsonCodec {
    fn encode(&mut self, schema: &SchemaRef, node: &Node) -> Result<Json, CodecError> {
        match (&schema.kind, node) {
            (SchemaKind::Struct(members), Node::Struct(fields)) => {
                let mut object = JsonMap::new();
                for (idx, slot) in fields.iter().enumerate() {
                    let (Some(child), Some(field)) = (slot, members.get(idx)) else {
                        continue;
                    };
                    self.path.push(field.name.clone());
                    let value = self.encode(&field.schema, child)?;
                    self.path.pop();
                    object.insert(field.name.clone(), value);
                }
                Ok(Json::Object(object))
            }
            (SchemaKind::Union(members), Node::Union(active)) => {
                let mut object = JsonMap::new();
                if let Some((idx, child)) = active {
                    let field = members
                        .get(*idx)
                        .ok_or_else(|| CodecError::mismatch(&self.path, "union member", idx.to_string()))?;
                    self.path.push(field.name.clone());
                    let value = self.encode(&field.schema, child)?;
                    self.path.pop();
                    object.insert(field.name.clone(), value);
                }
                Ok(Json::Object(object))
            }
            (SchemaKind::List { element }, Node::List(items)) => {
                let mut array = Vec::with_capacity(items.len());
                for (idx, child) in items.iter().enumerate() {
                    self.path.push(idx.to_string());
                    array.push(self.encode(element, child)?);
                    self.path.pop();
                }
                Ok(Json::Array(array))
            }
            (SchemaKind::Map { key, value }, Node::Map(entries)) => {
                let key_type = key_type(key);
                let mut object = JsonMap::new();
                for (k, child) in entries {
                    let token = k.to_token(key_type);
                    self.path.push(token.clone());
                    let encoded = self.encode(value, child)?;
                    self.path.pop();
                    object.insert(token, encoded);
                }
                Ok(Json::Object(object))
            }
            (SchemaKind::Set { element }, Node::Set(keys)) => {
                let element_type = key_type(element);
                keys.iter()
                    .map(|k| self.encode_value(element_type, &k.to_value(element_type)))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Json::Array)
            }
            (SchemaKind::Primitive { primitive }, Node::Primitive(value)) => {
                self.encode_value(primitive, value)
            }
            _ => Err(shape_mismatch(&self.path, schema, node)),
        }
    }

    fn encode_value(&self, primitive: &PrimitiveType, value: &Value) -> Result<Json, CodecError> {
        Ok(match value {
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .ok_or_else(|| CodecError::Json(format!("non-finite float at {}", opertree_proto::join_path(&self.path))))?,
            Value::String(s) => Json::String(s.clone()),
            Value::Binary(bytes) => Json::Array(bytes.iter().map(|b| Json::from(*b)).collect()),
            Value::Enum(v) => match primitive {
                PrimitiveType::Enum(e) => e
                    .name_of(*v)
                    .map_or_else(|| Json::from(*v), |name| Json::String(name.to_string())),
                _ => Json::from(*v),
            },
        })
    }

    fn decode(&mut self, schema: &SchemaRef, value: &Json) -> Result<Node, CodecError> {
        match &schema.kind {
            SchemaKind::Struct(members) => {
                let object = self.object(value, "object")?;
                let mut fields: Vec<Option<NodeRef>> = vec![None; members.len()];
                for (name, child) in object {
                    let idx = members
                        .lookup(name)
                        .ok_or_else(|| CodecError::mismatch(&self.path, "known member", name.clone()))?;
                    let Some(field) = members.get(idx) else {
                        continue;
                    };
                    if child.is_null() && field.optional {
                        continue;
                    }
                    self.path.push(name.clone());
                    fields[idx] = Some(Arc::new(self.decode(&field.schema, child)?));
                    self.path.pop();
                }
                Ok(finish_struct(members, fields))
            }
            SchemaKind::Union(members) => {
                let object = self.object(value, "single-member object")?;
                let mut entries = object.iter().filter(|(_, v)| !v.is_null());
                let Some((name, child)) = entries.next() else {
                    return Ok(Node::Union(None));
                };
                if entries.next().is_some() {
                    return Err(CodecError::mismatch(&self.path, "single-member object", "several members"));
                }
                let idx = members
                    .lookup(name)
                    .ok_or_else(|| CodecError::mismatch(&self.path, "known member", name.clone()))?;
                let field = members
                    .get(idx)
                    .ok_or_else(|| CodecError::mismatch(&self.path, "known member", name.clone()))?;
                self.path.push(name.clone());
                let node = self.decode(&field.schema, child)?;
                self.path.pop();
                Ok(Node::Union(Some((idx, Arc::new(node)))))
            }
            SchemaKind::List { element } => {
                let array = value
                    .as_array()
                    .ok_or_else(|| CodecError::mismatch(&self.path, "array", json_kind(value)))?;
                let mut items = Vec::with_capacity(array.len());
                for (idx, child) in array.iter().enumerate() {
                    self.path.push(idx.to_string());
                    items.push(Arc::new(self.decode(element, child)?));
                    self.path.pop();
                }
                Ok(Node::List(items))
            }
            SchemaKind::Map { key, value: value_schema } => {
                let key_type = key_type(key);
                let object = self.object(value, "object")?;
                let mut entries = BTreeMap::new();
                for (token, child) in object {
                    let k = Key::parse(key_type, token)
                        .map_err(|reason| CodecError::mismatch(&self.path, key_type.type_name(), reason))?;
                    self.path.push(token.clone());
                    entries.insert(k, Arc::new(self.decode(value_schema, child)?));
                    self.path.pop();
                }
                Ok(Node::Map(entries))
            }
            SchemaKind::Set { element } => {
                let element_type = key_type(element);
                let array = value
                    .as_array()
                    .ok_or_else(|| CodecError::mismatch(&self.path, "array", json_kind(value)))?;
                let mut keys = BTreeSet::new();
                for child in array {
                    let v = self.decode_value(element_type, child)?;
                    let k = Key::from_value(&v)
                        .ok_or_else(|| CodecError::mismatch(&self.path, "set key", v.type_name()))?;
                    keys.insert(k);
                }
                Ok(Node::Set(keys))
            }
            SchemaKind::Primitive { primitive } => {
                Ok(Node::Primitive(self.decode_value(primitive, value)?))
            }
        }
    }

    fn object<'v>(&self, value: &'v Json, expected: &str) -> Result<&'v JsonMap<String, Json>, CodecError> {
        value
            .as_object()
            .ok_or_else(|| CodecError::mismatch(&self.path, expected, json_kind(value)))
    }

    fn decode_value(&self, primitive: &PrimitiveType, value: &Json) -> Result<Value, CodecError> {
        let mismatch = || CodecError::mismatch(&self.path, primitive.type_name(), json_kind(value));
        let decoded = match primitive {
            PrimitiveType::Bool => Value::Bool(value.as_bool().ok_or_else(mismatch)?),
            PrimitiveType::Byte | PrimitiveType::I16 | PrimitiveType::I32 | PrimitiveType::I64 => {
                Value::Int(value.as_i64().ok_or_else(mismatch)?)
            }
            PrimitiveType::Float | PrimitiveType::Double => {
                Value::Float(value.as_f64().ok_or_else(mismatch)?)
            }
            PrimitiveType::String => Value::String(value.as_str().ok_or_else(mismatch)?.to_string()),
            PrimitiveType::Binary => {
                let array = value.as_array().ok_or_else(mismatch)?;
                let bytes = array
                    .iter()
                    .map(|b| b.as_u64().and_then(|b| u8::try_from(b).ok()))
                    .collect::<Option<Vec<u8>>>()
                    .ok_or_else(mismatch)?;
                Value::Binary(bytes)
            }
            PrimitiveType::Enum(e) => match value {
                Json::String(name) => Value::Enum(e.value_of(name).ok_or_else(mismatch)?),
                other => Value::Enum(
                    other
                        .as_i64()
                        .and_then(|v| i32::try_from(v).ok())
                        .ok_or_else(mismatch)?,
                ),
            },
        };
        check_primitive(&self.path, primitive, decoded)
    }
}

fn json_kind(value: &Json) -> &'static str {
    match value {
        Json::Null => "null",
        Json::Bool(_) => "bool",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

struct CborCodec {
    path: Vec<String>,
}

impl CborCodec {
    fn encode(&mut self, schema: &SchemaRef, node: &Node) -> Result<Cbor, CodecError> {
        match (&schema.kind, node) {
            (SchemaKind::Struct(members), Node::Struct(fields)) => {
                let mut entries = Vec::with_capacity(fields.len());
                for (idx, slot) in fields.iter().enumerate() {
                    let (Some(child), Some(field)) = (slot, members.get(idx)) else {
                        continue;
                    };
                    self.path.push(field.id.to_string());
                    entries.push((Cbor::Integer(field.id.into()), self.encode(&field.schema, child)?));
                    self.path.pop();
                }
                Ok(Cbor::Map(entries))
            }
            (SchemaKind::Union(members), Node::Union(active)) => {
                let mut entries = Vec::with_capacity(1);
                if let Some((idx, child)) = active {
                    let field = members
                        .get(*idx)
                        .ok_or_else(|| CodecError::mismatch(&self.path, "union member", idx.to_string()))?;
                    self.path.push(field.id.to_string());
                    entries.push((Cbor::Integer(field.id.into()), self.encode(&field.schema, child)?));
                    self.path.pop();
                }
                Ok(Cbor::Map(entries))
            }
            (SchemaKind::List { element }, Node::List(items)) => {
                let mut array = Vec::with_capacity(items.len());
                for (idx, child) in items.iter().enumerate() {
                    self.path.push(idx.to_string());
                    array.push(self.encode(element, child)?);
                    self.path.pop();
                }
                Ok(Cbor::Array(array))
            }
            (SchemaKind::Map { value, .. }, Node::Map(entries)) => {
                let mut out = Vec::with_capacity(entries.len());
                for (k, child) in entries {
                    self.path.push(format!("{k:?}"));
                    out.push((key_to_cbor(k), self.encode(value, child)?));
                    self.path.pop();
                }
                Ok(Cbor::Map(out))
            }
            (SchemaKind::Set { .. }, Node::Set(keys)) => {
                Ok(Cbor::Array(keys.iter().map(key_to_cbor).collect()))
            }
            (SchemaKind::Primitive { .. }, Node::Primitive(value)) => Ok(match value {
                Value::Bool(b) => Cbor::Bool(*b),
                Value::Int(i) => Cbor::Integer((*i).into()),
                Value::Float(f) => Cbor::Float(*f),
                Value::String(s) => Cbor::Text(s.clone()),
                Value::Binary(bytes) => Cbor::Bytes(bytes.clone()),
                Value::Enum(v) => Cbor::Integer((*v).into()),
            }),
            _ => Err(shape_mismatch(&self.path, schema, node)),
        }
    }

    fn decode(&mut self, schema: &SchemaRef, value: &Cbor) -> Result<Node, CodecError> {
        match &schema.kind {
            SchemaKind::Struct(members) => {
                let entries = self.map(value)?;
                let mut fields: Vec<Option<NodeRef>> = vec![None; members.len()];
                for (k, child) in entries {
                    let idx = self.member(members, k)?;
                    let Some(field) = members.get(idx) else {
                        continue;
                    };
                    if child.is_null() && field.optional {
                        continue;
                    }
                    self.path.push(field.id.to_string());
                    fields[idx] = Some(Arc::new(self.decode(&field.schema, child)?));
                    self.path.pop();
                }
                Ok(finish_struct(members, fields))
            }
            SchemaKind::Union(members) => {
                let entries = self.map(value)?;
                match entries.as_slice() {
                    [] => Ok(Node::Union(None)),
                    [(k, child)] => {
                        let idx = self.member(members, k)?;
                        let field = members
                            .get(idx)
                            .ok_or_else(|| CodecError::mismatch(&self.path, "known member", format!("{k:?}")))?;
                        self.path.push(field.id.to_string());
                        let node = self.decode(&field.schema, child)?;
                        self.path.pop();
                        Ok(Node::Union(Some((idx, Arc::new(node)))))
                    }
                    _ => Err(CodecError::mismatch(&self.path, "single-member map", "several members")),
                }
            }
            SchemaKind::List { element } => {
                let array = self.array(value)?;
                let mut items = Vec::with_capacity(array.len());
                for (idx, child) in array.iter().enumerate() {
                    self.path.push(idx.to_string());
                    items.push(Arc::new(self.decode(element, child)?));
                    self.path.pop();
                }
                Ok(Node::List(items))
            }
            SchemaKind::Map { key, value: value_schema } => {
                let key_type = key_type(key);
                let entries = self.map(value)?;
                let mut out = BTreeMap::new();
                for (k, child) in entries {
                    let k = self.decode_key(key_type, k)?;
                    self.path.push(k.to_token(key_type));
                    out.insert(k, Arc::new(self.decode(value_schema, child)?));
                    self.path.pop();
                }
                Ok(Node::Map(out))
            }
            SchemaKind::Set { element } => {
                let element_type = key_type(element);
                let keys = self
                    .array(value)?
                    .iter()
                    .map(|k| self.decode_key(element_type, k))
                    .collect::<Result<BTreeSet<_>, _>>()?;
                Ok(Node::Set(keys))
            }
            SchemaKind::Primitive { primitive } => {
                Ok(Node::Primitive(self.decode_value(primitive, value)?))
            }
        }
    }

    fn map<'v>(&self, value: &'v Cbor) -> Result<&'v Vec<(Cbor, Cbor)>, CodecError> {
        value
            .as_map()
            .ok_or_else(|| CodecError::mismatch(&self.path, "map", cbor_kind(value)))
    }

    fn array<'v>(&self, value: &'v Cbor) -> Result<&'v Vec<Cbor>, CodecError> {
        value
            .as_array()
            .ok_or_else(|| CodecError::mismatch(&self.path, "array", cbor_kind(value)))
    }

    fn member(&self, members: &Members, key: &Cbor) -> Result<usize, CodecError> {
        let found = match key {
            Cbor::Integer(id) => i16::try_from(*id).ok().and_then(|id| members.by_id(id)),
            Cbor::Text(name) => members.lookup(name),
            _ => None,
        };
        found.ok_or_else(|| CodecError::mismatch(&self.path, "known member", format!("{key:?}")))
    }

    fn decode_key(&self, key_type: &PrimitiveType, value: &Cbor) -> Result<Key, CodecError> {
        let v = self.decode_value(key_type, value)?;
        Key::from_value(&v).ok_or_else(|| CodecError::mismatch(&self.path, "key", v.type_name()))
    }

    fn decode_value(&self, primitive: &PrimitiveType, value: &Cbor) -> Result<Value, CodecError> {
        let mismatch = || CodecError::mismatch(&self.path, primitive.type_name(), cbor_kind(value));
        let int = || match value {
            Cbor::Integer(i) => i64::try_from(*i).ok(),
            _ => None,
        };
        let decoded = match (primitive, value) {
            (PrimitiveType::Bool, Cbor::Bool(b)) => Value::Bool(*b),
            (PrimitiveType::Byte | PrimitiveType::I16 | PrimitiveType::I32 | PrimitiveType::I64, _) => {
                Value::Int(int().ok_or_else(mismatch)?)
            }
            (PrimitiveType::Float | PrimitiveType::Double, Cbor::Float(f)) => Value::Float(*f),
            (PrimitiveType::Float | PrimitiveType::Double, Cbor::Integer(_)) => {
                #[allow(clippy::cast_precision_loss)]
                let f = int().ok_or_else(mismatch)? as f64;
                Value::Float(f)
            }
            (PrimitiveType::String, Cbor::Text(s)) => Value::String(s.clone()),
            (PrimitiveType::Binary, Cbor::Bytes(bytes)) => Value::Binary(bytes.clone()),
            (PrimitiveType::Enum(_), _) => Value::Enum(
                int()
                    .and_then(|v| i32::try_from(v).ok())
                    .ok_or_else(mismatch)?,
            ),
            _ => return Err(mismatch()),
        };
        check_primitive(&self.path, primitive, decoded)
    }
}

fn key_to_cbor(key: &Key) -> Cbor {
    match key {
        Key::Int(i) => Cbor::Integer(Integer::from(*i)),
        Key::String(s) => Cbor::Text(s.clone()),
    }
}

fn cbor_kind(value: &Cbor) -> &'static str {
    match value {
        Cbor::Integer(_) => "integer",
        Cbor::Bytes(_) => "bytes",
        Cbor::Float(_) => "float",
        Cbor::Text(_) => "text",
        Cbor::Bool(_) => "bool",
        Cbor::Null => "null",
        Cbor::Tag(..) => "tag",
        Cbor::Array(_) => "array",
        Cbor::Map(_) => "map",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{EnumSchema, Field, Schema};
    use serde::Deserialize;
    use serde_json::json;

    fn schema() -> SchemaRef {
        let i32_ty = Schema::primitive(PrimitiveType::I32);
        let color = Schema::primitive(PrimitiveType::Enum(EnumSchema::new([
            ("RED", 1),
            ("GREEN", 2),
        ])));
        let choice = Schema::union(
            "Choice",
            vec![
                Field::new(1, "num", Arc::clone(&i32_ty)),
                Field::new(2, "text", Schema::primitive(PrimitiveType::String)),
            ],
        )
        .unwrap();
        Schema::structure(
            "Root",
            vec![
                Field::new(1, "a", Arc::clone(&i32_ty)),
                Field::new(
                    2,
                    "b",
                    Schema::map(Schema::primitive(PrimitiveType::String), Arc::clone(&i32_ty))
                        .unwrap(),
                ),
                Field::new(3, "color", color),
                Field::new(4, "choice", choice),
                Field::optional(5, "note", Schema::primitive(PrimitiveType::String)),
                Field::new(6, "small", Schema::primitive(PrimitiveType::Byte)),
            ],
        )
        .unwrap()
    }

    fn sample() -> Json {
        json!({
            "a": 1,
            "b": { "x": 5, "y": 9 },
            "color": "GREEN",
            "choice": { "text": "hi" },
            "small": 3
        })
    }

    #[test]
    fn json_roundtrip_preserves_shape() {
        let s = schema();
        let node = from_json(&s, &sample()).unwrap();
        assert_eq!(to_json(&s, &node).unwrap(), sample());
    }

    #[test]
    fn compact_roundtrip_and_header() {
        let s = schema();
        let node = from_json(&s, &sample()).unwrap();
        let bytes = encode(&s, &node, OperProtocol::Compact).unwrap();
        assert_eq!(&bytes[..3], &COMPACT_HEADER);
        assert_eq!(decode(&s, OperProtocol::Compact, &bytes).unwrap(), node);
    }

    #[test]
    fn cross_protocol_decode_fails() {
        let s = schema();
        let node = from_json(&s, &sample()).unwrap();
        let compact = encode(&s, &node, OperProtocol::Compact).unwrap();
        let json = encode(&s, &node, OperProtocol::Json).unwrap();

        assert!(matches!(
            decode(&s, OperProtocol::Json, &compact),
            Err(CodecError::ProtocolMismatch { .. })
        ));
        assert!(matches!(
            decode(&s, OperProtocol::Compact, &json),
            Err(CodecError::MissingHeader)
        ));
    }

    #[test]
    fn state_tag_checked() {
        let s = schema();
        let node = from_json(&s, &sample()).unwrap();
        let state = encode_state(&s, &node, OperProtocol::Json).unwrap();
        assert!(matches!(
            decode_state(&s, &state, Some(OperProtocol::Compact)),
            Err(CodecError::ProtocolMismatch { .. })
        ));
        assert!(decode_state(&s, &state, Some(OperProtocol::Json)).is_ok());
    }

    #[test]
    fn out_of_range_integer_rejected() {
        let s = schema();
        let err = from_json(&s, &json!({ "small": 300 })).unwrap_err();
        assert!(matches!(err, CodecError::TypeMismatch { .. }));
    }

    #[test]
    fn missing_required_members_defaulted() {
        let s = schema();
        let node = from_json(&s, &json!({ "a": 4 })).unwrap();
        let Node::Struct(fields) = &node else {
            panic!("expected struct");
        };
        assert!(fields[1].is_some());
        assert!(fields[4].is_none());
    }

    #[test]
    fn native_conversion() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Partial {
            a: i32,
            b: std::collections::BTreeMap<String, i32>,
            note: Option<String>,
        }

        let s = schema();
        let node = from_json(&s, &sample()).unwrap();
        let native: Partial = to_native(&s, &node).unwrap();
        assert_eq!(native.a, 1);
        assert_eq!(native.b.get("y"), Some(&9));
        assert_eq!(native.note, None);

        let i32_ty = Schema::primitive(PrimitiveType::I32);
        assert!(matches!(
            from_native(&i32_ty, "text"),
            Err(CodecError::TypeMismatch { .. })
        ));
    }
}
