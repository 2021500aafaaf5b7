use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::NaiveDateTime;
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::error::{LibError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        i64::from_str(s).map(Self)
    }
}

impl From<i64> for UserId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct GraphId(pub i64);

impl fmt::Display for GraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GraphId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        i64::from_str(s).map(Self)
    }
}

impl From<i64> for GraphId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct SnapshotId(pub i64);

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for SnapshotId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// Directed flow between two equipment labels.
///
/// Serialized as a 2-element `[source, target]` array, both on the wire and
/// in the `edges_json` column. Duplicate edges are permitted to accumulate;
/// only node labels are deduplicated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(String, String)", into = "(String, String)")]
pub struct Edge {
    pub source: String,
    pub target: String,
}

impl Edge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

impl From<(String, String)> for Edge {
    fn from(value: (String, String)) -> Self {
        Self {
            source: value.0,
            target: value.1,
        }
    }
}

impl From<Edge> for (String, String) {
    fn from(value: Edge) -> Self {
        (value.source, value.target)
    }
}

/// A user's process-diagram project: the mutable "current" state plus a
/// linear snapshot history. The current fields mirror the latest snapshot
/// payload, except after `restore` and `update_description`, which mutate
/// current in place without appending history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PidGraph {
    pub id: GraphId,
    pub owner_user_id: UserId,
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instruction: Option<String>,
    pub nodes: Vec<String>,
    pub edges: Vec<Edge>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphSummary {
    pub id: GraphId,
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instruction: Option<String>,
    pub created_at: NaiveDateTime,
    pub version_count: i64,
}

/// One immutable historical payload of a graph. Only the instruction text of
/// a snapshot may be rewritten after the fact; the node/edge payload never
/// changes once committed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub id: SnapshotId,
    pub graph_id: GraphId,
    pub version_number: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instruction: Option<String>,
    pub nodes: Vec<String>,
    pub edges: Vec<Edge>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGraphPayload {
    pub filename: String,
    pub instruction: Option<String>,
    #[serde(default)]
    pub nodes: Vec<String>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateGraphPayload {
    pub filename: String,
    pub instruction: Option<String>,
    #[serde(default)]
    pub nodes: Vec<String>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    pub instruction: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDescriptionPayload {
    pub instruction: String,
}

#[derive(Debug, Clone)]
pub struct GraphDefinition {
    pub filename: String,
    pub instruction: Option<String>,
    pub nodes: Vec<String>,
    pub edges: Vec<Edge>,
}

impl CreateGraphPayload {
    pub fn normalize(self) -> Result<GraphDefinition> {
        normalize_graph_definition(self.filename, self.instruction, self.nodes, self.edges)
    }
}

impl UpdateGraphPayload {
    pub fn normalize(self) -> Result<GraphDefinition> {
        normalize_graph_definition(self.filename, self.instruction, self.nodes, self.edges)
    }
}

fn normalize_graph_definition(
    filename: String,
    instruction: Option<String>,
    nodes: Vec<String>,
    edges: Vec<Edge>,
) -> Result<GraphDefinition> {
    let filename = filename.trim().to_string();
    if filename.is_empty() {
        return Err(LibError::invalid(
            "Graph filename is required",
            anyhow!("empty graph filename"),
        ));
    }

    Ok(GraphDefinition {
        filename,
        instruction,
        nodes: dedup_node_labels(nodes),
        edges,
    })
}

/// Collapses exact-string duplicates while preserving first-seen order.
/// "Pump" and "pump" are distinct labels; no case folding is applied.
pub fn dedup_node_labels(nodes: Vec<String>) -> Vec<String> {
    let mut seen: IndexSet<String> = IndexSet::with_capacity(nodes.len());
    for node in nodes {
        let label = node.trim().to_string();
        if label.is_empty() {
            continue;
        }
        seen.insert(label);
    }
    seen.into_iter().collect()
}
