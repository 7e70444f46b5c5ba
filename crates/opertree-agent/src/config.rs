//! Agent configuration.

use anyhow::{Context, Result};
use opertree_core::{CowStorage, Schema, SchemaRef};
use opertree_subscribe::SubscribeConfig;
use std::path::{Path, PathBuf};

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Path of the JSON schema descriptor
    pub schema_path: PathBuf,

    /// Optional JSON document holding the initial tree
    pub state_path: Option<PathBuf>,

    /// Publisher roots registered and confirmed at start-up
    pub publishers: Vec<String>,

    /// Subscription layer configuration
    pub subscribe: SubscribeConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            schema_path: PathBuf::from("./schema.json"),
            state_path: None,
            publishers: Vec::new(),
            subscribe: SubscribeConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `OPERTREE_SCHEMA_PATH`: JSON schema descriptor
    /// - `OPERTREE_STATE_PATH`: JSON initial state
    /// - `OPERTREE_PUBLISHERS`: comma-separated publisher roots
    /// - every variable read by [`SubscribeConfig::from_env`]
    ///
    /// # Errors
    ///
    /// Returns error if a variable holds an invalid value.
    pub fn from_env() -> Result<Self> {
        let mut config = Self {
            subscribe: SubscribeConfig::from_env().context("Invalid subscription settings")?,
            ..Self::default()
        };

        if let Ok(path) = std::env::var("OPERTREE_SCHEMA_PATH") {
            config.schema_path = PathBuf::from(path);
        }

        if let Ok(path) = std::env::var("OPERTREE_STATE_PATH") {
            config.state_path = Some(PathBuf::from(path));
        }

        if let Ok(publishers) = std::env::var("OPERTREE_PUBLISHERS") {
            config.publishers = parse_publishers(&publishers);
        }

        Ok(config)
    }
}

/// Split a comma-separated publisher list, skipping blanks.
pub fn parse_publishers(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|root| !root.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Read and validate a schema descriptor.
///
/// # Errors
///
/// Returns error if the file cannot be read or is not a valid descriptor.
pub fn load_schema(path: &Path) -> Result<SchemaRef> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read schema {}", path.display()))?;
    Schema::from_json(&json).with_context(|| format!("Invalid schema {}", path.display()))
}

/// Build the initial tree, from `state_path` if given.
///
/// # Errors
///
/// Returns error if the state file cannot be read or does not fit the schema.
pub fn load_state(schema: SchemaRef, state_path: Option<&Path>) -> Result<CowStorage> {
    let Some(path) = state_path else {
        return Ok(CowStorage::new(schema));
    };
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read state {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&json)
        .with_context(|| format!("Invalid JSON in {}", path.display()))?;
    CowStorage::from_json(schema, &value)
        .with_context(|| format!("State {} does not fit the schema", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const DESCRIPTOR: &str = r#"{
        "name": "Root",
        "kind": "struct",
        "members": [
            { "id": 1, "name": "a", "schema": { "name": "i32", "kind": "primitive", "type": "i32" } }
        ]
    }"#;

    fn file_with(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn publishers_are_trimmed() {
        assert_eq!(parse_publishers(" a, b ,,c"), vec!["a", "b", "c"]);
        assert!(parse_publishers("").is_empty());
    }

    #[test]
    fn loads_schema_and_state() {
        let schema_file = file_with(DESCRIPTOR);
        let schema = load_schema(schema_file.path()).unwrap();
        assert_eq!(schema.name, "Root");

        let state_file = file_with(r#"{ "a": 42 }"#);
        let storage = load_state(schema, Some(state_file.path())).unwrap();
        assert_eq!(storage.get::<i32, _>(&["a"]).unwrap(), 42);
    }

    #[test]
    fn missing_state_gives_default_tree() {
        let schema_file = file_with(DESCRIPTOR);
        let schema = load_schema(schema_file.path()).unwrap();
        let storage = load_state(schema, None).unwrap();
        assert_eq!(storage.get::<i32, _>(&["a"]).unwrap(), 0);
    }

    #[test]
    fn bad_descriptor_is_reported() {
        let schema_file = file_with("{ not json");
        let err = load_schema(schema_file.path()).unwrap_err();
        assert!(err.to_string().starts_with("Invalid schema"));
        assert!(load_schema(Path::new("/nonexistent/schema.json")).is_err());
    }
}
