//! # opertree Agent
//!
//! Standalone state server built on the opertree subscribable storage.
//!
//! Loads a JSON schema descriptor (and optionally an initial state),
//! registers the configured publisher roots, then runs the background serve
//! loop until Ctrl+C.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

mod config;
mod runtime;

pub use config::AgentConfig;
pub use runtime::Agent;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting opertree agent");

    let config = AgentConfig::from_env()?;
    let agent = Agent::new(config)?;

    agent.run().await
}
