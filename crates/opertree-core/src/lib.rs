//! # opertree Core
//!
//! Schema-driven copy-on-write state tree for opertree.
//!
//! This crate provides:
//! - Runtime schema descriptors and an immutable, structurally shared node model
//! - Name-to-path resolution of string tokens into typed steps
//! - Path, extended (wildcard/regex) path and whole-subtree visitors
//! - A structural delta visitor between two tree versions
//! - Compact (CBOR) and JSON codecs, plus serde-native typed access
//! - `CowStorage`, path-addressed storage with cheap snapshots

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod delta;
pub mod error;
pub mod ext_visitor;
pub mod node;
pub mod patch;
pub mod recurse;
pub mod resolver;
pub mod schema;
pub mod storage;
pub mod visitor;

pub use delta::{
    visit_delta, visit_delta_at, DeltaElemTag, DeltaEvent, DeltaVisitMode, DeltaVisitOptions,
    DeltaVisitOrder,
};
pub use error::{CodecError, PathError, SchemaError, StorageError, TraverseError};
pub use ext_visitor::{matching_paths, visit_extended, ExtPathVisitOptions};
pub use node::{Key, Node, NodeRef, Value};
pub use patch::{build_patch, PatchBuilder};
pub use recurse::{visit_recursive, RecurseVisitOptions, RecurseVisitOrder};
pub use resolver::{canonicalize, compile_extended, resolve, CompiledExtPath, ExtMatcher, Step, TypedPath};
pub use schema::{EnumSchema, Field, Members, PrimitiveType, Schema, SchemaKind, SchemaRef};
pub use storage::{CowStorage, Snapshot, StatePatch};
pub use visitor::{visit_path, visit_path_mut, PathVisitMode, PathVisitOptions};
