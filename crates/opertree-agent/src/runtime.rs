//! Agent runtime orchestration.

use crate::config::{load_schema, load_state, AgentConfig};
use anyhow::{Context, Result};
use opertree_subscribe::SubscribableStorage;

/// The main agent runtime.
pub struct Agent {
    config: AgentConfig,
    storage: SubscribableStorage,
}

impl Agent {
    /// Create a new agent: load the schema and initial state, then register
    /// and confirm the configured publishers.
    ///
    /// # Errors
    ///
    /// Returns error if initialization fails.
    pub fn new(config: AgentConfig) -> Result<Self> {
        let schema = load_schema(&config.schema_path)?;
        let initial = load_state(schema, config.state_path.as_deref())?;
        let storage = SubscribableStorage::from_storage(initial, config.subscribe.clone())
            .context("Failed to create storage")?;

        for root in &config.publishers {
            storage.register_publisher(root);
            storage
                .confirm_publisher(root)
                .with_context(|| format!("Failed to confirm publisher {root}"))?;
        }

        Ok(Self { config, storage })
    }

    /// Handle to the agent's storage.
    #[must_use]
    pub fn storage(&self) -> &SubscribableStorage {
        &self.storage
    }

    /// Run the serve loop until Ctrl+C, then close every subscription.
    ///
    /// # Errors
    ///
    /// Returns error if the serve loop dies.
    pub async fn run(self) -> Result<()> {
        tracing::info!(
            schema = %self.config.schema_path.display(),
            publishers = self.config.publishers.len(),
            "Starting agent runtime"
        );

        let mut serve = self.storage.spawn_serve_loop();

        tracing::info!("Agent running, press Ctrl+C to stop");

        let outcome = tokio::select! {
            joined = &mut serve => joined.context("Serve loop failed"),
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received");
                serve.abort();
                Ok(())
            }
        };

        self.storage.shutdown();
        tracing::info!(
            subscriptions = self.storage.subscriptions().len(),
            "Agent stopped"
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opertree_proto::OperProtocol;
    use opertree_subscribe::{CloseReason, SubscribeConfig};
    use std::io::Write;
    use tempfile::NamedTempFile;

    const DESCRIPTOR: &str = r#"{
        "name": "Root",
        "kind": "struct",
        "members": [
            { "id": 1, "name": "ifaces", "schema": {
                "name": "map<string,i32>", "kind": "map",
                "key": { "name": "string", "kind": "primitive", "type": "string" },
                "value": { "name": "i32", "kind": "primitive", "type": "i32" }
            } }
        ]
    }"#;

    fn agent(publishers: &[&str]) -> (Agent, NamedTempFile) {
        let mut schema = NamedTempFile::new().unwrap();
        schema.write_all(DESCRIPTOR.as_bytes()).unwrap();
        let config = AgentConfig {
            schema_path: schema.path().to_path_buf(),
            publishers: publishers.iter().map(ToString::to_string).collect(),
            subscribe: SubscribeConfig {
                track_metadata: true,
                ..SubscribeConfig::default()
            },
            ..AgentConfig::default()
        };
        (Agent::new(config).unwrap(), schema)
    }

    #[test]
    fn configured_publishers_release_subscriptions() {
        let (agent, _schema) = agent(&["ifaces"]);
        let mut sub = agent
            .storage()
            .subscribe_encoded("cli", &["ifaces"], OperProtocol::Json)
            .unwrap();
        assert_eq!(sub.drain().len(), 1);
    }

    #[test]
    fn unknown_publisher_roots_stay_pending() {
        let (agent, _schema) = agent(&[]);
        let mut sub = agent
            .storage()
            .subscribe_encoded("cli", &["ifaces"], OperProtocol::Json)
            .unwrap();
        assert!(sub.drain().is_empty());
        agent.storage().shutdown();
        assert_eq!(sub.close_reason(), Some(CloseReason::Shutdown));
    }

    #[test]
    fn missing_schema_fails() {
        let config = AgentConfig {
            schema_path: "/nonexistent/schema.json".into(),
            ..AgentConfig::default()
        };
        assert!(Agent::new(config).is_err());
    }
}
