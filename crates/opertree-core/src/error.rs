//! Error types for schema loading, path resolution, traversal, encoding and
//! storage operations.

use opertree_proto::OperProtocol;
use thiserror::Error;

/// Errors building or loading a schema.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// Two members share a name
    #[error("duplicate member name: {0}")]
    DuplicateMemberName(String),

    /// Two members share an id
    #[error("duplicate member id: {0}")]
    DuplicateMemberId(i16),

    /// Map key or set element is not a primitive key type
    #[error("invalid key type: {0}")]
    InvalidKeyType(String),

    /// Descriptor could not be parsed
    #[error("invalid schema descriptor: {0}")]
    Descriptor(String),
}

/// Errors resolving a path against a schema or a tree.
///
/// `path` fields hold the prefix that was successfully resolved before the
/// failing token.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    /// Token names no member of a struct or union
    #[error("unknown member {token:?} at {path}")]
    UnknownMember {
        /// Resolved prefix
        path: String,
        /// Offending token
        token: String,
    },

    /// Token is not a valid list index
    #[error("invalid list index {token:?} at {path}")]
    InvalidIndex {
        /// Resolved prefix
        path: String,
        /// Offending token
        token: String,
    },

    /// Token cannot be parsed as the container's key type
    #[error("invalid key {token:?} at {path}: {reason}")]
    InvalidKey {
        /// Resolved prefix
        path: String,
        /// Offending token
        token: String,
        /// Why parsing failed
        reason: String,
    },

    /// Path continues below a primitive
    #[error("path continues past leaf at {path}")]
    PastLeaf {
        /// Path of the leaf
        path: String,
    },

    /// Schema-valid path whose target is absent from the tree
    #[error("path not present: {path}")]
    NotPresent {
        /// Path of the first absent node
        path: String,
    },

    /// Wildcard or regex applied to a struct or union member
    #[error("wildcard not supported at {path}")]
    UnsupportedWildcardPath {
        /// Resolved prefix
        path: String,
    },

    /// Regex element failed to compile
    #[error("invalid regex {pattern:?}: {reason}")]
    InvalidRegex {
        /// Pattern as given
        pattern: String,
        /// Compiler message
        reason: String,
    },
}

impl PathError {
    /// Whether the path is invalid for the schema, as opposed to valid but
    /// absent from the current tree.
    #[must_use]
    pub fn is_invalid_path(&self) -> bool {
        !matches!(self, Self::NotPresent { .. })
    }
}

/// Errors raised while traversing a tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TraverseError {
    /// Path could not be resolved
    #[error(transparent)]
    Path(#[from] PathError),

    /// Node shape disagrees with its schema
    #[error("node at {path} is not a {expected}")]
    NodeMismatch {
        /// Path of the node
        path: String,
        /// Shape the schema requires
        expected: &'static str,
    },

    /// Visitor callback failed
    #[error("visitor failed: {0}")]
    VisitorException(String),
}

/// Errors converting between nodes and encoded payloads.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Value does not fit the schema
    #[error("type mismatch at {path}: expected {expected}, found {found}")]
    TypeMismatch {
        /// Path inside the value
        path: String,
        /// What the schema requires
        expected: String,
        /// What was found
        found: String,
    },

    /// JSON text could not be produced or parsed
    #[error("JSON error: {0}")]
    Json(String),

    /// CBOR bytes could not be produced or parsed
    #[error("CBOR error: {0}")]
    Cbor(String),

    /// Compact payload lacks its self-describe header
    #[error("compact payload is missing its header")]
    MissingHeader,

    /// State carries no payload
    #[error("state has no contents")]
    MissingContents,

    /// Payload was encoded with a different protocol than requested
    #[error("protocol mismatch: expected {expected}, got {actual}")]
    ProtocolMismatch {
        /// Protocol the caller asked for
        expected: OperProtocol,
        /// Protocol the payload carries
        actual: OperProtocol,
    },
}

impl CodecError {
    pub(crate) fn mismatch(path: &[String], expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::TypeMismatch {
            path: opertree_proto::join_path(path),
            expected: expected.into(),
            found: found.into(),
        }
    }
}

/// Errors returned by storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Path is invalid for the schema or absent from the tree
    #[error("invalid path: {0}")]
    InvalidPath(PathError),

    /// Wildcard or regex used where a literal member is required
    #[error("unsupported wildcard path: {0}")]
    UnsupportedWildcardPath(String),

    /// Typed value does not match the schema at the path
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// Visitor callback failed
    #[error("visitor exception: {0}")]
    VisitorException(String),

    /// Map entry targeted by an insert already exists
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Encoded payload could not be decoded
    #[error("codec error: {0}")]
    Codec(CodecError),

    /// Payload protocol differs from the one requested
    #[error("protocol mismatch: expected {expected}, got {actual}")]
    ProtocolMismatch {
        /// Protocol the caller asked for
        expected: OperProtocol,
        /// Protocol the payload carries
        actual: OperProtocol,
    },
}

impl StorageError {
    /// Whether the failure is an absent-but-valid path.
    #[must_use]
    pub fn is_not_present(&self) -> bool {
        matches!(self, Self::InvalidPath(PathError::NotPresent { .. }))
    }
}

impl From<PathError> for StorageError {
    fn from(err: PathError) -> Self {
        match err {
            PathError::UnsupportedWildcardPath { path } => Self::UnsupportedWildcardPath(path),
            other => Self::InvalidPath(other),
        }
    }
}

impl From<TraverseError> for StorageError {
    fn from(err: TraverseError) -> Self {
        match err {
            TraverseError::Path(path) => path.into(),
            TraverseError::NodeMismatch { .. } => Self::TypeMismatch(err.to_string()),
            TraverseError::VisitorException(msg) => Self::VisitorException(msg),
        }
    }
}

impl From<CodecError> for StorageError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::ProtocolMismatch { expected, actual } => {
                Self::ProtocolMismatch { expected, actual }
            }
            CodecError::TypeMismatch { .. } => Self::TypeMismatch(err.to_string()),
            other => Self::Codec(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_present_is_not_invalid() {
        let absent = PathError::NotPresent { path: "/b/z".into() };
        assert!(!absent.is_invalid_path());

        let unknown = PathError::UnknownMember {
            path: "/".into(),
            token: "zz".into(),
        };
        assert!(unknown.is_invalid_path());
    }

    #[test]
    fn wildcard_error_maps_to_own_kind() {
        let err: StorageError = PathError::UnsupportedWildcardPath { path: "/".into() }.into();
        assert!(matches!(err, StorageError::UnsupportedWildcardPath(_)));

        let err: StorageError = TraverseError::VisitorException("boom".into()).into();
        assert!(matches!(err, StorageError::VisitorException(ref m) if m == "boom"));
    }
}
