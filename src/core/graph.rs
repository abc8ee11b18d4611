//! Graph builder for constructing dependency graphs

use std::collections::HashMap;

use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::Direction;
use tracing::debug;

use crate::core::models::{Confidence, GraphEdge, GraphNode};

/// A vertex of the dependency graph.
///
/// Edge targets outside the project (`typing`, `os.path.join`, unresolved
/// names) become vertices without node attributes.
#[derive(Debug, Clone)]
pub struct GraphVertex {
    pub id: String,
    pub node: Option<GraphNode>,
}

/// Directed graph with at most one edge per ordered pair of node ids
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    graph: DiGraph<GraphVertex, GraphEdge>,
    index: HashMap<String, NodeIndex>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node, replacing the attributes of an existing one
    pub fn add_node(&mut self, node: GraphNode) -> NodeIndex {
        let idx = self.ensure_vertex(&node.id);
        self.graph[idx].node = Some(node);
        idx
    }

    /// Insert an edge, replacing the attributes of an existing one for the
    /// same ordered pair
    pub fn add_edge(&mut self, edge: GraphEdge) -> EdgeIndex {
        let from = self.ensure_vertex(&edge.from_node);
        let to = self.ensure_vertex(&edge.to_node);
        self.graph.update_edge(from, to, edge)
    }

    fn ensure_vertex(&mut self, id: &str) -> NodeIndex {
        if let Some(&idx) = self.index.get(id) {
            return idx;
        }
        let idx = self.graph.add_node(GraphVertex {
            id: id.to_string(),
            node: None,
        });
        self.index.insert(id.to_string(), idx);
        idx
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn node_index(&self, id: &str) -> Option<NodeIndex> {
        self.index.get(id).copied()
    }

    /// Node attributes, if the id names a parsed symbol
    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.node_index(id)
            .and_then(|idx| self.graph[idx].node.as_ref())
    }

    pub fn id_of(&self, idx: NodeIndex) -> &str {
        &self.graph[idx].id
    }

    /// Number of vertices, external references included
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Parsed nodes in insertion order
    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.graph.node_weights().filter_map(|v| v.node.as_ref())
    }

    pub fn vertices(&self) -> impl Iterator<Item = &GraphVertex> {
        self.graph.node_weights()
    }

    pub fn edges(&self) -> impl Iterator<Item = &GraphEdge> {
        self.graph.edge_weights()
    }

    /// The edge between two ids, if any
    pub fn edge(&self, from: &str, to: &str) -> Option<&GraphEdge> {
        let from = self.node_index(from)?;
        let to = self.node_index(to)?;
        self.graph
            .find_edge(from, to)
            .map(|e| &self.graph[e])
    }

    /// Edges ending at `id`
    pub fn incoming(&self, id: &str) -> Vec<&GraphEdge> {
        self.edges_directed(id, Direction::Incoming)
    }

    /// Edges starting at `id`
    pub fn outgoing(&self, id: &str) -> Vec<&GraphEdge> {
        self.edges_directed(id, Direction::Outgoing)
    }

    fn edges_directed(&self, id: &str, direction: Direction) -> Vec<&GraphEdge> {
        match self.node_index(id) {
            Some(idx) => self
                .graph
                .edges_directed(idx, direction)
                .map(|e| e.weight())
                .collect(),
            None => Vec::new(),
        }
    }

    pub(crate) fn inner(&self) -> &DiGraph<GraphVertex, GraphEdge> {
        &self.graph
    }
}

/// Builds dependency graphs from parsed nodes and edges
pub struct GraphBuilder;

impl GraphBuilder {
    /// Build a graph where a repeated node or edge overwrites the earlier one
    pub fn build(nodes: &[GraphNode], edges: &[GraphEdge]) -> DependencyGraph {
        let mut graph = DependencyGraph::new();

        for node in nodes {
            graph.add_node(node.clone());
        }
        for edge in edges {
            graph.add_edge(edge.clone());
        }

        debug!(
            "Built graph: {} vertices, {} edges",
            graph.node_count(),
            graph.edge_count()
        );
        graph
    }

    /// Union of several graphs; the first occurrence of a node or edge wins
    pub fn merge_graphs<'a, I>(graphs: I) -> DependencyGraph
    where
        I: IntoIterator<Item = &'a DependencyGraph>,
    {
        let mut merged = DependencyGraph::new();

        for graph in graphs {
            for vertex in graph.vertices() {
                let idx = merged.ensure_vertex(&vertex.id);
                if merged.graph[idx].node.is_none() {
                    merged.graph[idx].node = vertex.node.clone();
                }
            }
            for edge in graph.edges() {
                if merged.edge(&edge.from_node, &edge.to_node).is_none() {
                    merged.add_edge(edge.clone());
                }
            }
        }

        merged
    }

    /// Copy of `graph` keeping every node but only edges at or above
    /// `min_confidence`
    pub fn filter_by_confidence(
        graph: &DependencyGraph,
        min_confidence: Confidence,
    ) -> DependencyGraph {
        let mut filtered = DependencyGraph::new();

        for vertex in graph.vertices() {
            let idx = filtered.ensure_vertex(&vertex.id);
            filtered.graph[idx].node = vertex.node.clone();
        }
        for edge in graph.edges().filter(|e| e.confidence >= min_confidence) {
            filtered.add_edge(edge.clone());
        }

        filtered
    }
}
