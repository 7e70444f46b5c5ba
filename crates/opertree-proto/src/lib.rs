//! # opertree Protocol
//!
//! Wire-level value types shared by the state tree, the subscription layer
//! and any transport built on top of them.
//!
//! ## Messages
//!
//! - `OperState`: a protocol-tagged encoded value
//! - `OperDelta` / `OperDeltaUnit`: per-path old/new encoded changes
//! - `TaggedOperState`: an encoded value addressed by path
//! - `Patch`: a tree of encoded changes relative to a base path
//! - `DeltaValue<T>` / `TaggedItem<T>`: subscription stream items
//!
//! ## Paths
//!
//! Paths are sequences of string tokens. Extended paths generalize each token
//! to a literal, a match-anything wildcard, or a regular expression.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod messages;
pub mod patch;
pub mod paths;

pub use messages::{
    CborMessage, DeltaValue, MessageError, OperDelta, OperDeltaUnit, OperMetadata, OperProtocol,
    OperState, SubscriberId, SubscriptionKey, TaggedItem, TaggedOperState,
};
pub use patch::{Patch, PatchNode};
pub use paths::{join_path, publisher_root, split_path, ExtPathElem, ExtendedPath, PathParseError};
