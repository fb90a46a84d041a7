//! Node configuration.
//!
//! Every section has defaults, so a JSON file only needs the fields it
//! changes:
//!
//! ```json
//! {
//!   "node_id": "node-a",
//!   "listen_addr": "0.0.0.0:7400",
//!   "pool": { "workers": 4 },
//!   "transport": { "max_payload_size": 1048576 },
//!   "session": { "idle_timeout_ms": 60000 }
//! }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::node::SessionConfig;
use crate::pool::PoolConfig;
use crate::transport::TransportConfig;

/// Default node identifier.
pub const DEFAULT_NODE_ID: &str = "korra-node";

/// Default listen address.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:7400";

/// Top-level configuration of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub node_id: String,
    pub listen_addr: String,
    pub pool: PoolConfig,
    pub transport: TransportConfig,
    pub session: SessionConfig,
}

impl NodeConfig {
    /// Parse from a JSON string and validate.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON file and validate.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&contents)?;
        tracing::info!(path = %path.display(), node_id = %config.node_id, "Configuration loaded");
        Ok(config)
    }

    /// Check every section.
    pub fn validate(&self) -> Result<()> {
        self.pool.validate()?;
        self.transport.validate()?;
        self.session.validate()?;
        Ok(())
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: DEFAULT_NODE_ID.to_string(),
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            pool: PoolConfig::default(),
            transport: TransportConfig::default(),
            session: SessionConfig::default(),
        }
    }
}
