use crate::GraphError;
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Identifier for one run of a graph.
pub type RunId = Uuid;

/// Declarative graph definition produced by an editor: a flat list of node
/// instances plus the edges wiring them together.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphDefinition {
    pub nodes: Vec<NodeInstance>,
    pub edges: Vec<EdgeDefinition>,
}

impl GraphDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: NodeInstance) -> &mut Self {
        self.nodes.push(node);
        self
    }

    /// Wire `source -> target` with a generated edge id and no handles.
    pub fn connect(&mut self, source: impl Into<String>, target: impl Into<String>) -> &mut Self {
        let source = source.into();
        let target = target.into();
        let id = format!("{}->{}", source, target);
        self.edges.push(EdgeDefinition {
            id,
            source,
            target,
            source_handle: None,
            target_handle: None,
        });
        self
    }

    pub fn add_edge(&mut self, edge: EdgeDefinition) -> &mut Self {
        self.edges.push(edge);
        self
    }

    pub fn find_node(&self, id: &str) -> Option<&NodeInstance> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn incoming_edges<'a>(
        &'a self,
        node_id: &'a str,
    ) -> impl Iterator<Item = &'a EdgeDefinition> + 'a {
        self.edges.iter().filter(move |e| e.target == node_id)
    }

    pub fn outgoing_edges<'a>(
        &'a self,
        node_id: &'a str,
    ) -> impl Iterator<Item = &'a EdgeDefinition> + 'a {
        self.edges.iter().filter(move |e| e.source == node_id)
    }

    /// Structural validation: unique node and edge ids, no dangling edge
    /// endpoints, and no cycles. Looping subgraphs are rejected at load
    /// time. Edge ids key the runtime signal mailboxes, so two edges
    /// sharing an id would collapse into one slot.
    pub fn validate(&self) -> Result<(), GraphError> {
        let mut graph = DiGraph::<&str, ()>::new();
        let mut indices = HashMap::new();

        for node in &self.nodes {
            if indices.contains_key(node.id.as_str()) {
                return Err(GraphError::DuplicateNodeId(node.id.clone()));
            }
            let idx = graph.add_node(node.id.as_str());
            indices.insert(node.id.as_str(), idx);
        }

        let mut edge_ids = HashSet::new();
        for edge in &self.edges {
            if !edge_ids.insert(edge.id.as_str()) {
                return Err(GraphError::DuplicateEdgeId(edge.id.clone()));
            }
            let from = indices
                .get(edge.source.as_str())
                .ok_or_else(|| GraphError::UnknownEndpoint {
                    edge: edge.id.clone(),
                    node: edge.source.clone(),
                })?;
            let to = indices
                .get(edge.target.as_str())
                .ok_or_else(|| GraphError::UnknownEndpoint {
                    edge: edge.id.clone(),
                    node: edge.target.clone(),
                })?;
            graph.add_edge(*from, *to, ());
        }

        if toposort(&graph, None).is_err() {
            return Err(GraphError::CyclicDependency);
        }

        Ok(())
    }
}

/// One node placed on the canvas.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInstance {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

impl NodeInstance {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            config: Map::new(),
            position: None,
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn with_position(mut self, x: f32, y: f32) -> Self {
        self.position = Some(Position { x, y });
        self
    }
}

/// Directed connection between two nodes. Handles are optional port names:
/// `source_handle` selects which part of the producer's output travels the
/// edge, `target_handle` names the consumer input it lands in.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeDefinition {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
}

impl EdgeDefinition {
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            source_handle: None,
            target_handle: None,
        }
    }

    pub fn with_source_handle(mut self, handle: impl Into<String>) -> Self {
        self.source_handle = Some(handle.into());
        self
    }

    pub fn with_target_handle(mut self, handle: impl Into<String>) -> Self {
        self.target_handle = Some(handle.into());
        self
    }
}

/// Node position in the visual editor. Non-functional.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}
