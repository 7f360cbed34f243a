//! Node identities and the JSON payloads exchanged between owners, workers
//! and the coordinator.
//!
//! Field names follow the established wire contract (`UUID`, `MasterUUID`,
//! `GenerateScript`, ...) so existing master and slave nodes interoperate.

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::error::FanoutError;

pub type SubtaskId = Uuid;

// ── Nodes ────────────────────────────────────────────────────────────

/// Opaque node identity chosen by the registering node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Accepts `8080`, `"8080"` and the legacy `":8080"` form.
fn de_port<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u16),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Num(n) => Ok(n),
        Raw::Text(s) => s
            .trim()
            .trim_start_matches(':')
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid port '{s}'"))),
    }
}

/// A registered participant: where to reach its API and its health endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    #[serde(rename = "UUID")]
    pub id: NodeId,
    /// Host name or address, optionally with a scheme.
    #[serde(rename = "Url")]
    pub url: String,
    #[serde(rename = "PublicPort", deserialize_with = "de_port")]
    pub public_port: u16,
    #[serde(rename = "PrivatePort", deserialize_with = "de_port")]
    pub private_port: u16,
}

impl Node {
    pub fn new(id: impl Into<NodeId>, url: impl Into<String>, public_port: u16, private_port: u16) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            public_port,
            private_port,
        }
    }

    pub fn validate(&self) -> Result<(), FanoutError> {
        if self.id.0.trim().is_empty() {
            return Err(FanoutError::InvalidNode("UUID must not be empty".into()));
        }
        if self.url.trim().is_empty() {
            return Err(FanoutError::InvalidNode(format!("node {} has no Url", self.id)));
        }
        if self.public_port == 0 || self.private_port == 0 {
            return Err(FanoutError::InvalidNode(format!("node {} has a zero port", self.id)));
        }
        Ok(())
    }

    fn base(&self, port: u16) -> String {
        let host = self.url.trim_end_matches('/');
        if host.contains("://") {
            format!("{}:{}", host, port)
        } else {
            format!("http://{}:{}", host, port)
        }
    }

    /// Base URL of the node-facing API, e.g. `http://10.0.0.4:8080`.
    pub fn public_base(&self) -> String {
        self.base(self.public_port)
    }

    /// Liveness endpoint on the private port.
    pub fn health_url(&self) -> String {
        format!("{}/health", self.base(self.private_port))
    }
}

/// Largest window a worker may ask for; larger declarations are clamped.
pub const MAX_POWER: u64 = u32::MAX as u64;

/// Worker registration payload: a node plus its declared capacity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerRegistration {
    #[serde(flatten)]
    pub node: Node,
    /// Window size this worker wants per subtask; 0 selects the default.
    #[serde(rename = "Power", default)]
    pub power: u64,
}

// ── Tasks ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptConfig {
    #[serde(rename = "Script")]
    pub script: String,
    #[serde(rename = "FuncName")]
    pub func_name: String,
}

/// Task submission from an owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    #[serde(rename = "MasterUUID")]
    pub owner_id: NodeId,
    #[serde(rename = "GeneratorScript")]
    pub generator: ScriptConfig,
    #[serde(rename = "ComputeScript")]
    pub compute: ScriptConfig,
    /// Seed payload, opaque to the coordinator.
    #[serde(rename = "Data", default)]
    pub data: serde_json::Value,
    #[serde(rename = "TaskName", default)]
    pub task_name: String,
}

/// Contiguous range of work units `[start, start + amount)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub start: u64,
    pub amount: u64,
}

impl Window {
    pub fn end(&self) -> u64 {
        self.start.saturating_add(self.amount)
    }

    pub fn overlaps(&self, other: &Window) -> bool {
        self.start < other.end() && other.start < self.end()
    }
}

impl std::fmt::Display for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end())
    }
}

/// Subtask sent to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeRequest {
    #[serde(rename = "UuidSubtask")]
    pub subtask_id: SubtaskId,
    #[serde(rename = "GenerateScript")]
    pub generate: ScriptConfig,
    #[serde(rename = "ComputeScript")]
    pub compute: ScriptConfig,
    #[serde(rename = "Data")]
    pub data: serde_json::Value,
    #[serde(rename = "Amount")]
    pub amount: u64,
    #[serde(rename = "Start")]
    pub start: u64,
}

impl ComputeRequest {
    pub fn window(&self) -> Window {
        Window {
            start: self.start,
            amount: self.amount,
        }
    }
}

// ── Worker reports ───────────────────────────────────────────────────

/// Outcome a worker attaches to a finished subtask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    /// No input remains from this window onward.
    Empty,
    Error,
    /// Partial result; also the reading of an absent or unrecognised status.
    #[default]
    #[serde(other)]
    Ok,
}

/// Result report. Workers also post their failure alert
/// (`SlaveUUID`, `SubtaskUUID`, `Error`) to the same route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompleteSubtaskRequest {
    #[serde(rename = "UUID", alias = "SlaveUUID")]
    pub worker_id: NodeId,
    #[serde(rename = "SubtaskUUID")]
    pub subtask_id: SubtaskId,
    #[serde(rename = "Status", default)]
    pub status: ReportStatus,
    #[serde(rename = "Data", default)]
    pub data: serde_json::Value,
    #[serde(rename = "Error", default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtaskErrorReport {
    #[serde(rename = "SlaveUUID")]
    pub worker_id: NodeId,
    #[serde(rename = "SubtaskUUID")]
    pub subtask_id: SubtaskId,
    #[serde(rename = "Error", default)]
    pub error: String,
}

/// Body relayed to an owner for each partial result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialResult {
    #[serde(rename = "Data")]
    pub data: serde_json::Value,
}

/// What a worker says it is doing when asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerActivity {
    #[serde(rename = "waiting task")]
    WaitingTask,
    #[serde(rename = "solving")]
    Solving,
    #[serde(rename = "error")]
    Error,
    #[serde(other)]
    Unknown,
}
