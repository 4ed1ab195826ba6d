//! Wire messages for the live channel
//!
//! Every frame is a JSON text frame `{type, data, timestamp}`. Inbound frames
//! are decoded into [`Inbound`] by the handler registry; outbound messages are
//! rendered from [`Outbound`].

use crate::graph::{Edge, EntityRef, GraphModel, Mutation, Node, Position};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Raw frame envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
}

impl Envelope {
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

// ============================================================================
// Outbound
// ============================================================================

/// Messages the session sends to the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    Init { client: String, version: String },
    Heartbeat { timestamp: i64 },
    /// Application-defined message, e.g. `run_pipeline`
    Custom { kind: String, data: Value },
}

impl Outbound {
    pub fn heartbeat(now: DateTime<Utc>) -> Self {
        Self::Heartbeat {
            timestamp: now.timestamp_millis(),
        }
    }

    pub fn custom(kind: impl Into<String>, data: Value) -> Self {
        Self::Custom {
            kind: kind.into(),
            data,
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            Self::Init { .. } => "init",
            Self::Heartbeat { .. } => "heartbeat",
            Self::Custom { kind, .. } => kind,
        }
    }

    /// Render as a text frame stamped with `now`
    pub fn to_frame(&self, now: DateTime<Utc>) -> String {
        let data = match self {
            Self::Init { client, version } => json!({ "client": client, "version": version }),
            Self::Heartbeat { timestamp } => json!({ "timestamp": timestamp }),
            Self::Custom { data, .. } => data.clone(),
        };
        json!({
            "type": self.kind(),
            "data": data,
            "timestamp": now.timestamp_millis(),
        })
        .to_string()
    }
}

// ============================================================================
// Inbound
// ============================================================================

/// Execution progress for one node of a running pipeline
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionProgress {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// 0.0 - 100.0
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// One log line produced by a running pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLog {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default = "default_log_level")]
    pub level: String,
    pub message: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

/// A decoded inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Delta(RemoteDelta),
    ExecutionProgress(ExecutionProgress),
    ExecutionLog(ExecutionLog),
    StatsUpdate(Value),
    HeartbeatAck,
}

// ============================================================================
// Remote deltas
// ============================================================================

/// A server-originated incremental change to the graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RemoteDelta {
    NodeStatus {
        node_id: String,
        status: Option<String>,
    },
    EdgeStatus {
        edge_id: String,
        status: Option<String>,
    },
    /// `null` values remove the key
    NodeProperties {
        node_id: String,
        properties: BTreeMap<String, Value>,
    },
    NodeMoved {
        node_id: String,
        position: Position,
    },
    NodeUpserted {
        node: Node,
    },
    /// Also removes every edge connected to the node
    NodeRemoved {
        node_id: String,
    },
    EdgeUpserted {
        edge: Edge,
    },
    EdgeRemoved {
        edge_id: String,
    },
}

/// Node property that carries the execution status
pub const STATUS_PROPERTY: &str = "status";

#[derive(Deserialize)]
struct StatusShorthand {
    node_id: Option<String>,
    edge_id: Option<String>,
    status: Option<String>,
}

impl RemoteDelta {
    /// Decode a `node_status` payload: either an `op`-tagged delta or the
    /// shorthand `{node_id | edge_id, status}`
    pub fn from_status_payload(data: &Value) -> anyhow::Result<Self> {
        if data.get("op").is_some() {
            return Ok(serde_json::from_value(data.clone())?);
        }
        let shorthand: StatusShorthand = serde_json::from_value(data.clone())?;
        match (shorthand.node_id, shorthand.edge_id) {
            (Some(node_id), _) => Ok(Self::NodeStatus {
                node_id,
                status: shorthand.status,
            }),
            (None, Some(edge_id)) => Ok(Self::EdgeStatus {
                edge_id,
                status: shorthand.status,
            }),
            (None, None) => anyhow::bail!("status payload names neither node_id nor edge_id"),
        }
    }

    /// The entity the delta is addressed to
    pub fn target(&self) -> EntityRef {
        match self {
            Self::NodeStatus { node_id, .. }
            | Self::NodeProperties { node_id, .. }
            | Self::NodeMoved { node_id, .. }
            | Self::NodeRemoved { node_id } => EntityRef::node(node_id),
            Self::NodeUpserted { node } => EntityRef::node(&node.id),
            Self::EdgeStatus { edge_id, .. } | Self::EdgeRemoved { edge_id } => {
                EntityRef::edge(edge_id)
            }
            Self::EdgeUpserted { edge } => EntityRef::edge(&edge.id),
        }
    }

    /// Every entity applying the delta to `graph` would change
    pub fn touched(&self, graph: &GraphModel) -> Vec<EntityRef> {
        let mut touched = vec![self.target()];
        if let Self::NodeRemoved { node_id } = self {
            touched.extend(
                graph
                    .edges_touching(node_id)
                    .into_iter()
                    .map(|edge| EntityRef::edge(edge.id)),
            );
        }
        touched
    }

    /// Primitive mutations for the gate; validation happens there
    pub fn to_mutations(&self, graph: &GraphModel) -> Vec<Mutation> {
        match self {
            Self::NodeStatus { node_id, status } => vec![Mutation::SetProperty {
                id: node_id.clone(),
                key: STATUS_PROPERTY.to_string(),
                value: status.clone().map(Value::String),
            }],
            Self::EdgeStatus { edge_id, status } => vec![Mutation::SetEdgeStatus {
                id: edge_id.clone(),
                status: status.clone(),
            }],
            Self::NodeProperties {
                node_id,
                properties,
            } => properties
                .iter()
                .map(|(key, value)| Mutation::SetProperty {
                    id: node_id.clone(),
                    key: key.clone(),
                    value: (!value.is_null()).then(|| value.clone()),
                })
                .collect(),
            Self::NodeMoved { node_id, position } => vec![Mutation::SetPosition {
                id: node_id.clone(),
                position: *position,
            }],
            Self::NodeUpserted { node } => {
                if graph.contains_node(&node.id) {
                    vec![Mutation::ReplaceNode(node.clone())]
                } else {
                    vec![Mutation::InsertNode(node.clone())]
                }
            }
            Self::NodeRemoved { node_id } => {
                let mut mutations: Vec<Mutation> = graph
                    .edges_touching(node_id)
                    .into_iter()
                    .map(|edge| Mutation::RemoveEdge { id: edge.id })
                    .collect();
                mutations.push(Mutation::RemoveNode {
                    id: node_id.clone(),
                });
                mutations
            }
            Self::EdgeUpserted { edge } => {
                if graph.contains_edge(&edge.id) {
                    vec![Mutation::ReplaceEdge(edge.clone())]
                } else {
                    vec![Mutation::InsertEdge(edge.clone())]
                }
            }
            Self::EdgeRemoved { edge_id } => vec![Mutation::RemoveEdge {
                id: edge_id.clone(),
            }],
        }
    }
}
