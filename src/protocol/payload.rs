//! Typed payload bodies.
//!
//! The codec treats payloads as opaque bytes. These structs are the bodies
//! nodes agree on for the defined message types, MsgPack-encoded through
//! [`Message::with_body`](super::Message::with_body).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Body of `NodeInfo` messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_id: String,
    pub hostname: String,
    pub port: u16,
    #[serde(default)]
    pub capabilities: HashMap<String, String>,
}

impl NodeInfo {
    /// Info with no capabilities.
    pub fn new(node_id: impl Into<String>, hostname: impl Into<String>, port: u16) -> Self {
        Self {
            node_id: node_id.into(),
            hostname: hostname.into(),
            port,
            capabilities: HashMap::new(),
        }
    }

    /// Add a capability entry.
    pub fn with_capability(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.capabilities.insert(key.into(), value.into());
        self
    }
}

/// Body of `AgentRegister` messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRegistration {
    pub agent_id: String,
    pub agent_type: String,
    /// Engine-specific configuration, usually JSON.
    #[serde(default)]
    pub config: String,
}

/// Lifecycle status reported in `AgentUpdate` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Ready,
    Busy,
    Failed,
    Retired,
}

/// Body of `AgentUpdate` messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentUpdate {
    pub agent_id: String,
    pub status: AgentStatus,
    #[serde(default)]
    pub detail: Option<String>,
}

/// Body of `JobSubmit` messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSubmit {
    pub job_id: String,
    pub agent_id: String,
    #[serde(with = "serde_bytes")]
    pub input: Vec<u8>,
}

/// Body of `JobResult` messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: String,
    pub success: bool,
    #[serde(default, with = "serde_bytes")]
    pub output: Vec<u8>,
    #[serde(default)]
    pub error: Option<String>,
}

impl JobResult {
    /// Successful result carrying `output`.
    pub fn completed(job_id: impl Into<String>, output: Vec<u8>) -> Self {
        Self {
            job_id: job_id.into(),
            success: true,
            output,
            error: None,
        }
    }

    /// Failed result with an error description and no output.
    pub fn failed(job_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            success: false,
            output: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// Body of `Error` messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    /// Message type code of the request that failed.
    pub request_type: u8,
    pub message: String,
}
