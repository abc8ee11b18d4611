//! Read-only queries over a dependency graph snapshot

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::path::Path;
use std::vec;

use petgraph::algo::{astar, is_cyclic_directed, tarjan_scc};
use petgraph::graph::NodeIndex;
use petgraph::graphmap::DiGraphMap;
use petgraph::visit::{Bfs, EdgeRef, Reversed, Walker};
use petgraph::Direction;
use serde::{Deserialize, Serialize};

use crate::core::graph::DependencyGraph;
use crate::core::models::{split_node_id, Confidence, GraphEdge, GraphNode, ImpactReport};

/// Direction of a reachability query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraversalDirection {
    /// Everything the node depends on
    #[default]
    Forward,
    /// Everything that depends on the node
    Backward,
}

/// Queries bound to one graph snapshot
pub struct GraphQueries<'g> {
    graph: &'g DependencyGraph,
}

impl<'g> GraphQueries<'g> {
    pub fn new(graph: &'g DependencyGraph) -> Self {
        Self { graph }
    }

    pub fn graph(&self) -> &'g DependencyGraph {
        self.graph
    }

    /// Direct predecessors of a node, sorted
    pub fn get_callers(&self, node_id: &str) -> Vec<String> {
        self.neighbours(node_id, Direction::Incoming)
    }

    /// Direct successors of a node, sorted
    pub fn get_callees(&self, node_id: &str) -> Vec<String> {
        self.neighbours(node_id, Direction::Outgoing)
    }

    fn neighbours(&self, node_id: &str, direction: Direction) -> Vec<String> {
        let Some(idx) = self.graph.node_index(node_id) else {
            return Vec::new();
        };
        let ids: BTreeSet<String> = self
            .graph
            .inner()
            .neighbors_directed(idx, direction)
            .map(|n| self.graph.id_of(n).to_string())
            .collect();
        ids.into_iter().collect()
    }

    pub fn node_info(&self, node_id: &str) -> Option<&'g GraphNode> {
        self.graph.node(node_id)
    }

    pub fn edge_info(&self, from: &str, to: &str) -> Option<&'g GraphEdge> {
        self.graph.edge(from, to)
    }

    /// All simple directed cycles
    pub fn find_cycles(&self) -> Vec<Vec<String>> {
        self.find_cycles_limited(None)
    }

    /// Simple directed cycles, stopping after `limit` have been found.
    ///
    /// Each cycle is listed once, starting at its lowest-indexed node.
    pub fn find_cycles_limited(&self, limit: Option<usize>) -> Vec<Vec<String>> {
        let graph = self.graph.inner();
        let mut cycles = Vec::new();

        for component in tarjan_scc(graph) {
            let is_trivial =
                component.len() == 1 && graph.find_edge(component[0], component[0]).is_none();
            if is_trivial {
                continue;
            }

            let members: HashSet<NodeIndex> = component.iter().copied().collect();
            let mut starts = component;
            starts.sort();

            for &start in &starts {
                let mut path = vec![start];
                let mut on_path: HashSet<NodeIndex> = HashSet::from([start]);
                let mut stack = vec![self.successors_within(start, start, &members)];

                while let Some(successors) = stack.last_mut() {
                    match successors.next() {
                        Some(next) if next == start => {
                            cycles.push(
                                path.iter()
                                    .map(|&n| self.graph.id_of(n).to_string())
                                    .collect(),
                            );
                            if limit.is_some_and(|l| cycles.len() >= l) {
                                return cycles;
                            }
                        }
                        Some(next) => {
                            if on_path.insert(next) {
                                path.push(next);
                                stack.push(self.successors_within(next, start, &members));
                            }
                        }
                        None => {
                            stack.pop();
                            if let Some(done) = path.pop() {
                                on_path.remove(&done);
                            }
                        }
                    }
                }
            }
        }

        cycles
    }

    /// Successors inside one strongly connected component that are not
    /// below the current start node
    fn successors_within(
        &self,
        node: NodeIndex,
        start: NodeIndex,
        members: &HashSet<NodeIndex>,
    ) -> vec::IntoIter<NodeIndex> {
        let mut successors: Vec<NodeIndex> = self
            .graph
            .inner()
            .neighbors(node)
            .filter(|n| *n >= start && members.contains(n))
            .collect();
        successors.sort();
        successors.dedup();
        successors.into_iter()
    }

    /// What is affected if `node_id` changes.
    ///
    /// Walks incoming edges breadth-first from `node_id`, following only
    /// edges at or above `min_confidence`. Nodes deeper than `max_depth`
    /// are reported but not expanded.
    pub fn get_impact(
        &self,
        node_id: &str,
        max_depth: Option<usize>,
        min_confidence: Confidence,
    ) -> ImpactReport {
        let Some(start) = self.graph.node_index(node_id) else {
            return ImpactReport::minimal(node_id);
        };
        let graph = self.graph.inner();

        let mut visited: HashSet<NodeIndex> = HashSet::new();
        let mut affected: HashSet<NodeIndex> = HashSet::new();
        let mut explored: DiGraphMap<NodeIndex, ()> = DiGraphMap::new();
        let mut confidence_breakdown: BTreeMap<Confidence, usize> = BTreeMap::new();
        let mut impact_depth = 0;
        let mut queue = VecDeque::from([(start, 0usize)]);

        while let Some((current, depth)) = queue.pop_front() {
            if !visited.insert(current) {
                continue;
            }
            if max_depth.is_some_and(|max| depth > max) {
                continue;
            }
            impact_depth = impact_depth.max(depth);

            for edge in graph.edges_directed(current, Direction::Incoming) {
                let confidence = edge.weight().confidence;
                if confidence < min_confidence {
                    continue;
                }
                let dependant = edge.source();

                *confidence_breakdown.entry(confidence).or_insert(0) += 1;
                explored.add_edge(dependant, current, ());

                if !visited.contains(&dependant) {
                    affected.insert(dependant);
                    queue.push_back((dependant, depth + 1));
                }
            }
        }

        let mut affected_files = BTreeSet::new();
        let mut affected_functions = BTreeSet::new();
        for idx in affected {
            let id = self.graph.id_of(idx);
            match split_node_id(id) {
                (file, Some(_)) => {
                    affected_functions.insert(id.to_string());
                    affected_files.insert(file.to_string());
                }
                (file, None) => {
                    affected_files.insert(file.to_string());
                }
            }
        }

        let suggested_tests = affected_files
            .iter()
            .filter(|f| looks_like_test(f))
            .cloned()
            .collect();

        let (changed_file, changed_function) = split_node_id(node_id);
        ImpactReport {
            changed_file: changed_file.to_string(),
            changed_function: changed_function.map(str::to_string),
            affected_files: affected_files.into_iter().collect(),
            affected_functions: affected_functions.into_iter().collect(),
            suggested_tests,
            confidence_breakdown,
            impact_depth,
            has_circular_dependencies: is_cyclic_directed(&explored),
        }
    }

    /// All descendants (forward) or ancestors (backward) of a node
    pub fn get_reachable_from(
        &self,
        node_id: &str,
        direction: TraversalDirection,
    ) -> BTreeSet<String> {
        let Some(start) = self.graph.node_index(node_id) else {
            return BTreeSet::new();
        };
        let graph = self.graph.inner();

        let reached: Vec<NodeIndex> = match direction {
            TraversalDirection::Forward => Bfs::new(graph, start).iter(graph).collect(),
            TraversalDirection::Backward => {
                let reversed = Reversed(graph);
                Bfs::new(reversed, start).iter(reversed).collect()
            }
        };

        reached
            .into_iter()
            .filter(|&n| n != start)
            .map(|n| self.graph.id_of(n).to_string())
            .collect()
    }

    /// Fewest-hop path between two nodes, if one exists
    pub fn get_shortest_path(&self, from: &str, to: &str) -> Option<Vec<String>> {
        let source = self.graph.node_index(from)?;
        let target = self.graph.node_index(to)?;

        let (_, path) = astar(
            self.graph.inner(),
            source,
            |n| n == target,
            |_| 1usize,
            |_| 0,
        )?;

        Some(
            path.into_iter()
                .map(|n| self.graph.id_of(n).to_string())
                .collect(),
        )
    }
}

/// Test files are recognised by name
fn looks_like_test(file: &str) -> bool {
    if file.to_lowercase().contains("test") {
        return true;
    }
    let stem = Path::new(file)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("");
    stem.starts_with("test_") || stem.ends_with("_test")
}
