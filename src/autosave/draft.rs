//! Draft snapshot format

use crate::error::GraphError;
use crate::graph::{Edge, GraphDocument, GraphModel, Node};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Current draft schema version
pub const SCHEMA_VERSION: u32 = 1;

/// Locally persisted snapshot of unconfirmed edits.
///
/// Serialized as `{nodes, edges, timestamp, schemaVersion}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftSnapshot {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub timestamp: DateTime<Utc>,
    pub schema_version: u32,
}

impl DraftSnapshot {
    /// Capture the whole graph
    pub fn capture(graph: &GraphModel, timestamp: DateTime<Utc>, schema_version: u32) -> Self {
        let doc = graph.to_document();
        Self {
            nodes: doc.nodes,
            edges: doc.edges,
            timestamp,
            schema_version,
        }
    }

    /// Age relative to `now` (negative if the draft is from the future)
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.timestamp
    }

    /// A draft is offered for recovery only while strictly younger than `ttl`
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        self.age(now) >= ttl
    }

    /// Rebuild the graph model, validating ids and edge endpoints
    pub fn to_graph(&self) -> Result<GraphModel, GraphError> {
        GraphModel::from_document(GraphDocument {
            nodes: self.nodes.clone(),
            edges: self.edges.clone(),
        })
    }
}
