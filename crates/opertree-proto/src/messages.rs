//! Protocol messages for state access and subscription delivery.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Identifies one input path of a (possibly multi-path) subscription.
pub type SubscriptionKey = u32;

/// Encoding used for an encoded payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OperProtocol {
    /// Compact binary form (CBOR, members keyed by numeric id)
    #[default]
    Compact,
    /// Human-readable form (JSON, members keyed by name)
    Json,
}

impl OperProtocol {
    /// Every supported protocol, in a fixed order.
    pub const ALL: [OperProtocol; 2] = [OperProtocol::Compact, OperProtocol::Json];
}

impl std::fmt::Display for OperProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperProtocol::Compact => write!(f, "compact"),
            OperProtocol::Json => write!(f, "json"),
        }
    }
}

impl FromStr for OperProtocol {
    type Err = MessageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "compact" | "cbor" | "binary" => Ok(OperProtocol::Compact),
            "json" | "simple_json" => Ok(OperProtocol::Json),
            other => Err(MessageError::UnknownProtocol(other.to_string())),
        }
    }
}

/// Identity of a subscribing client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriberId(pub String);

impl SubscriberId {
    /// Create a subscriber id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubscriberId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Delivery metadata attached to served states.
///
/// All timestamps are milliseconds since the UNIX epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OperMetadata {
    /// Last time the publisher confirmed its state
    pub last_confirmed_at: Option<i64>,
    /// Last time the publisher pushed an update
    pub last_published_at: Option<i64>,
    /// Time this item was handed to the subscriber
    pub last_served_at: Option<i64>,
}

impl OperMetadata {
    /// Copy of this metadata stamped with the current serve time.
    #[must_use]
    pub fn served_now(mut self) -> Self {
        self.last_served_at = Some(chrono::Utc::now().timestamp_millis());
        self
    }
}

/// A protocol-tagged encoded value.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OperState {
    /// Encoded payload; `None` for heartbeats
    pub contents: Option<Vec<u8>>,
    /// The protocol `contents` is encoded with
    pub protocol: OperProtocol,
    /// Delivery metadata
    pub metadata: Option<OperMetadata>,
    /// Whether this state is a liveness heartbeat rather than data
    pub is_heartbeat: bool,
}

impl OperState {
    /// Create a state carrying `contents` encoded with `protocol`.
    #[must_use]
    pub fn new(protocol: OperProtocol, contents: Vec<u8>) -> Self {
        Self {
            contents: Some(contents),
            protocol,
            metadata: None,
            is_heartbeat: false,
        }
    }

    /// Create a heartbeat state.
    #[must_use]
    pub fn heartbeat(protocol: OperProtocol, metadata: Option<OperMetadata>) -> Self {
        Self {
            contents: None,
            protocol,
            metadata,
            is_heartbeat: true,
        }
    }

    /// Attach delivery metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: OperMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// The change of a single path between two tree versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperDeltaUnit {
    /// Concrete path of the changed node
    pub path: Vec<String>,
    /// Encoded value before the change, absent if the node was added
    pub old_state: Option<Vec<u8>>,
    /// Encoded value after the change, absent if the node was removed
    pub new_state: Option<Vec<u8>>,
}

/// A batch of changes, all encoded with one protocol.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OperDelta {
    /// Changed paths, in traversal order
    pub changes: Vec<OperDeltaUnit>,
    /// The protocol every payload in `changes` is encoded with
    pub protocol: OperProtocol,
    /// Delivery metadata
    pub metadata: Option<OperMetadata>,
}

impl OperDelta {
    /// Create an empty delta for `protocol`.
    #[must_use]
    pub fn new(protocol: OperProtocol) -> Self {
        Self {
            changes: Vec::new(),
            protocol,
            metadata: None,
        }
    }

    /// Check if the delta carries no changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// An encoded state addressed by path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggedOperState {
    /// Path of the state
    pub path: Vec<String>,
    /// The encoded state
    pub state: OperState,
}

/// An old/new pair delivered to path subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeltaValue<T> {
    /// Previous value, absent for additions and initial sync
    pub old_val: Option<T>,
    /// Current value, absent for removals
    pub new_val: Option<T>,
}

impl<T> DeltaValue<T> {
    /// Create a delta value.
    #[must_use]
    pub fn new(old_val: Option<T>, new_val: Option<T>) -> Self {
        Self { old_val, new_val }
    }

    /// Convert both sides with a fallible function.
    ///
    /// # Errors
    ///
    /// Returns the first error produced by `f`.
    pub fn try_map<U, E>(self, mut f: impl FnMut(T) -> Result<U, E>) -> Result<DeltaValue<U>, E> {
        Ok(DeltaValue {
            old_val: self.old_val.map(&mut f).transpose()?,
            new_val: self.new_val.map(&mut f).transpose()?,
        })
    }
}

/// A stream item of an extended subscription, tagged with the input path
/// that matched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggedItem<T> {
    /// Key of the subscription path that matched
    pub key: SubscriptionKey,
    /// Concrete path the match resolved to
    pub path: Vec<String>,
    /// The delivered value
    pub value: T,
}

/// CBOR envelope shared by every message type.
pub trait CborMessage: Serialize + DeserializeOwned {
    /// Serialize to CBOR bytes.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    fn to_cbor(&self) -> Result<Vec<u8>, MessageError> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes)
            .map_err(|e| MessageError::Serialize(e.to_string()))?;
        Ok(bytes)
    }

    /// Deserialize from CBOR bytes.
    ///
    /// # Errors
    ///
    /// Returns error if deserialization fails.
    fn from_cbor(bytes: &[u8]) -> Result<Self, MessageError> {
        ciborium::from_reader(bytes).map_err(|e| MessageError::Deserialize(e.to_string()))
    }
}

impl CborMessage for OperState {}
impl CborMessage for OperDelta {}
impl CborMessage for TaggedOperState {}
impl CborMessage for crate::patch::Patch {}

/// Errors for message serialization/deserialization.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MessageError {
    /// Serialization failed
    #[error("serialization failed: {0}")]
    Serialize(String),
    /// Deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialize(String),
    /// Unknown protocol name
    #[error("unknown protocol: {0}")]
    UnknownProtocol(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oper_delta_cbor_roundtrip() {
        let delta = OperDelta {
            changes: vec![OperDeltaUnit {
                path: vec!["b".to_string(), "x".to_string()],
                old_state: Some(vec![5]),
                new_state: Some(vec![6]),
            }],
            protocol: OperProtocol::Compact,
            metadata: Some(OperMetadata::default().served_now()),
        };

        let bytes = delta.to_cbor().unwrap();
        let decoded = OperDelta::from_cbor(&bytes).unwrap();

        assert_eq!(delta, decoded);
    }

    #[test]
    fn protocol_parsing() {
        assert_eq!("json".parse::<OperProtocol>().unwrap(), OperProtocol::Json);
        assert_eq!("CBOR".parse::<OperProtocol>().unwrap(), OperProtocol::Compact);
        assert!("thrift".parse::<OperProtocol>().is_err());
    }

    #[test]
    fn heartbeat_has_no_contents() {
        let hb = OperState::heartbeat(OperProtocol::Json, None);
        assert!(hb.is_heartbeat);
        assert!(hb.contents.is_none());
    }

    #[test]
    fn delta_value_try_map() {
        let value = DeltaValue::new(Some("1"), Some("2"));
        let mapped: DeltaValue<i32> = value.try_map(str::parse).unwrap();
        assert_eq!(mapped, DeltaValue::new(Some(1), Some(2)));

        let bad = DeltaValue::new(None, Some("x"));
        assert!(bad.try_map(str::parse::<i32>).is_err());
    }
}
