//! Project analysis and incremental updates

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::core::config::{AnalysisConfig, Config};
use crate::core::graph::{DependencyGraph, GraphBuilder};
use crate::core::models::{
    split_node_id, AnalysisWarning, Confidence, FileAnalysis, GraphEdge, GraphNode, GraphSummary,
    ImpactReport, NodeType, ProjectGraph, ServiceStatus, Severity, WarningKind,
};
use crate::core::parser::{collect_files, fingerprint, path_key};
use crate::core::query::{GraphQueries, TraversalDirection};
use crate::core::resolve::{resolve_edges, ModuleIndex};
use crate::error::{Error, Result};
use crate::languages::{ParserRegistry, SourceParser};

/// Everything recorded for one analysed file
#[derive(Debug, Clone)]
struct FileEntry {
    /// `None` when the file could not be read
    content_hash: Option<String>,
    analysis: FileAnalysis,
    /// Set when parsing reported an error, so the next invalidation retries
    failed: bool,
}

/// Owns the cached project graph and the per-file data it is built from
pub struct ProjectAnalyser {
    config: AnalysisConfig,
    registry: ParserRegistry,
    files: BTreeMap<String, FileEntry>,
    cache: Option<ProjectGraph>,
    graph: Option<DependencyGraph>,
    last_error: Option<String>,
}

impl ProjectAnalyser {
    /// Create an analyser with the built-in parsers
    pub fn new(config: &Config) -> Self {
        Self::with_registry(config.analysis.clone(), ParserRegistry::new(config))
    }

    /// Create an analyser with a custom set of parsers
    pub fn with_registry(config: AnalysisConfig, registry: ParserRegistry) -> Self {
        Self {
            config,
            registry,
            files: BTreeMap::new(),
            cache: None,
            graph: None,
            last_error: None,
        }
    }

    /// Parse every supported file under `root` and replace the cache
    pub fn analyse_project(&mut self, root: &Path) -> Result<&ProjectGraph> {
        if !root.exists() {
            self.last_error = Some(format!("Project root not found: {}", root.display()));
            return Err(Error::FileNotFound(root.to_path_buf()));
        }

        info!("Starting project analysis: {:?}", root);
        let started = Instant::now();

        self.files.clear();
        for path in collect_files(root, &self.config, &self.registry) {
            let Some(parser) = self.registry.for_path(&path).cloned() else {
                continue;
            };
            let entry = self.parse_entry(&path, parser.as_ref(), read_fingerprint(&path));
            self.files.insert(path_key(&path), entry);
        }

        let elapsed = started.elapsed().as_millis() as u64;
        self.last_error = None;
        let project = self.assemble(path_key(root), elapsed);

        info!(
            "Analysis complete: {} files, {} nodes, {} edges, {} warnings in {}ms",
            project.summary.files,
            project.nodes.len(),
            project.edges.len(),
            project.warnings.len(),
            elapsed
        );
        Ok(project)
    }

    /// Parse a single file without touching the cache
    pub fn analyse_file(&self, path: &Path) -> Result<FileAnalysis> {
        if !path.exists() {
            return Err(Error::FileNotFound(path.to_path_buf()));
        }
        match self.registry.for_path(path) {
            Some(parser) => parser.parse_file(path),
            None => {
                debug!("No parser for {:?}", path);
                Ok(FileAnalysis::default())
            }
        }
    }

    /// Re-analyse one changed, added or deleted file and rebuild the graph.
    ///
    /// Returns `None` when no project has been analysed yet. Unsupported
    /// files leave the cache untouched.
    pub fn invalidate_file(&mut self, path: &Path) -> Option<&ProjectGraph> {
        info!("File invalidated: {:?}", path);

        let Some(root) = self.cache.as_ref().map(|c| c.project_root.clone()) else {
            warn!("No cached graph, cannot perform incremental update");
            return None;
        };

        let Some(parser) = self.registry.for_path(path).cloned() else {
            debug!("Unsupported file type, skipping: {:?}", path);
            return self.cache.as_ref();
        };

        let key = path_key(path);
        if path.is_file() {
            let content_hash = read_fingerprint(path);
            let reusable = content_hash.is_some()
                && self.files.get(&key).is_some_and(|e| {
                    !e.failed && e.content_hash.as_ref() == content_hash.as_ref()
                });

            if reusable {
                debug!("Content unchanged, reusing parse of {}", key);
            } else {
                let entry = self.parse_entry(path, parser.as_ref(), content_hash);
                self.files.insert(key, entry);
            }
        } else {
            debug!("File removed from project: {}", key);
            self.files.remove(&key);
        }

        Some(self.assemble(root, 0))
    }

    fn parse_entry(
        &self,
        path: &Path,
        parser: &dyn SourceParser,
        content_hash: Option<String>,
    ) -> FileEntry {
        let analysis = match parser.parse_file(path) {
            Ok(analysis) => {
                debug!(
                    "Parsed {:?} with {}: {} nodes, {} edges",
                    path,
                    parser.language_id(),
                    analysis.nodes.len(),
                    analysis.edges.len()
                );
                analysis
            }
            Err(e) => {
                warn!("Failed to parse {:?}: {}", path, e);
                FileAnalysis {
                    warnings: vec![AnalysisWarning::parse_error(&path_key(path), e.to_string())],
                    ..FileAnalysis::default()
                }
            }
        };

        let failed = analysis
            .warnings
            .iter()
            .any(|w| w.kind == WarningKind::ParseError);
        FileEntry {
            content_hash,
            analysis,
            failed,
        }
    }

    /// Rebuild the graph and the cached project from the per-file entries
    fn assemble(&mut self, project_root: String, analysis_time_ms: u64) -> &ProjectGraph {
        let mut nodes: Vec<GraphNode> = Vec::new();
        let mut raw_edges: Vec<GraphEdge> = Vec::new();
        let mut warnings: Vec<AnalysisWarning> = Vec::new();

        for entry in self.files.values() {
            nodes.extend(entry.analysis.nodes.iter().cloned());
            raw_edges.extend(entry.analysis.edges.iter().cloned());
            warnings.extend(entry.analysis.warnings.iter().cloned());
        }

        let modules = ModuleIndex::build(
            Path::new(&project_root),
            self.files.keys().map(String::as_str),
            &self.config.python_extensions,
            &self.config.source_roots,
        );
        let known: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
        let edges = resolve_edges(&raw_edges, &modules, &known);

        let graph = GraphBuilder::build(&nodes, &edges);
        let cycles =
            GraphQueries::new(&graph).find_cycles_limited(Some(self.config.max_cycle_warnings));
        if !cycles.is_empty() {
            info!("Found {} circular dependencies", cycles.len());
        }
        warnings.extend(
            cycles
                .iter()
                .map(|cycle| cycle_warning(cycle, self.config.cycle_display_len)),
        );

        let summary = GraphSummary::compute(self.files.len(), &nodes, &edges, analysis_time_ms);
        self.graph = Some(graph);
        self.cache
            .insert(ProjectGraph::new(project_root, nodes, edges, warnings, summary))
    }

    /// Queries bound to the current graph snapshot
    pub fn queries(&self) -> Option<GraphQueries<'_>> {
        self.graph.as_ref().map(GraphQueries::new)
    }

    /// Impact of a change to a file, or to one function in it
    pub fn get_impact(
        &self,
        file: &str,
        function: Option<&str>,
        max_depth: Option<usize>,
        min_confidence: Option<Confidence>,
    ) -> ImpactReport {
        let node_id = match function {
            Some(function) => format!("{}:{}", file, function),
            None => file.to_string(),
        };

        match self.queries() {
            Some(queries) => queries.get_impact(
                &node_id,
                max_depth,
                min_confidence.unwrap_or(Confidence::Unsafe),
            ),
            None => ImpactReport::minimal(&node_id),
        }
    }

    pub fn get_callers(&self, node_id: &str) -> Vec<String> {
        self.queries()
            .map(|q| q.get_callers(node_id))
            .unwrap_or_default()
    }

    pub fn get_callees(&self, node_id: &str) -> Vec<String> {
        self.queries()
            .map(|q| q.get_callees(node_id))
            .unwrap_or_default()
    }

    pub fn get_reachable(&self, node_id: &str, direction: TraversalDirection) -> Vec<String> {
        self.queries()
            .map(|q| q.get_reachable_from(node_id, direction).into_iter().collect())
            .unwrap_or_default()
    }

    pub fn get_shortest_path(&self, from: &str, to: &str) -> Option<Vec<String>> {
        self.queries()?.get_shortest_path(from, to)
    }

    pub fn find_cycles(&self, limit: Option<usize>) -> Vec<Vec<String>> {
        self.queries()
            .map(|q| q.find_cycles_limited(limit))
            .unwrap_or_default()
    }

    /// Cached nodes matching every given filter, and the total match count.
    ///
    /// `file_path` matches by substring, `name` by case-insensitive
    /// substring. At most `limit` nodes are returned.
    pub fn search_nodes(
        &self,
        file_path: Option<&str>,
        name: Option<&str>,
        node_type: Option<NodeType>,
        limit: usize,
    ) -> (Vec<GraphNode>, usize) {
        let Some(cache) = &self.cache else {
            return (Vec::new(), 0);
        };
        let name = name.map(str::to_lowercase);

        let matches: Vec<&GraphNode> = cache
            .nodes
            .iter()
            .filter(|n| file_path.map_or(true, |f| n.file_path.contains(f)))
            .filter(|n| {
                name.as_deref()
                    .map_or(true, |q| n.name.to_lowercase().contains(q))
            })
            .filter(|n| node_type.map_or(true, |t| n.node_type == t))
            .collect();

        let total = matches.len();
        (matches.into_iter().take(limit).cloned().collect(), total)
    }

    /// Cached edges ending at and starting from a node
    pub fn edges_for_node(&self, node_id: &str) -> (Vec<GraphEdge>, Vec<GraphEdge>) {
        let Some(cache) = &self.cache else {
            return (Vec::new(), Vec::new());
        };
        let incoming = cache
            .edges
            .iter()
            .filter(|e| e.to_node == node_id)
            .cloned()
            .collect();
        let outgoing = cache
            .edges
            .iter()
            .filter(|e| e.from_node == node_id)
            .cloned()
            .collect();
        (incoming, outgoing)
    }

    pub fn cached_graph(&self) -> Option<&ProjectGraph> {
        self.cache.as_ref()
    }

    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            running: true,
            version: env!("CARGO_PKG_VERSION").to_string(),
            has_cache: self.cache.is_some(),
            last_analysis: self.cache.as_ref().map(|c| c.analysis_timestamp.clone()),
            file_count: self.cache.as_ref().map(|c| c.summary.files),
            error: self.last_error.clone(),
        }
    }

    /// Drop the graph and every per-file entry
    pub fn clear_cache(&mut self) {
        self.cache = None;
        self.graph = None;
        self.files.clear();
        info!("Cache cleared");
    }

    /// Clear the cache and stop external parser processes
    pub fn shutdown(&mut self) {
        self.clear_cache();
        self.registry.shutdown();
        info!("Analyser shut down");
    }
}

fn read_fingerprint(path: &Path) -> Option<String> {
    match fs::read(path) {
        Ok(content) => Some(fingerprint(&content)),
        Err(e) => {
            debug!("Cannot fingerprint {:?}: {}", path, e);
            None
        }
    }
}

fn cycle_warning(cycle: &[String], display_len: usize) -> AnalysisWarning {
    let mut chain = cycle
        .iter()
        .take(display_len)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(" -> ");
    if cycle.len() > display_len {
        chain.push_str(&format!(" -> ... ({} nodes)", cycle.len()));
    }

    AnalysisWarning {
        kind: WarningKind::CircularDependency,
        file: cycle
            .first()
            .map(|id| split_node_id(id).0.to_string())
            .unwrap_or_default(),
        line: 0,
        description: format!("Circular dependency: {}", chain),
        severity: Severity::Medium,
    }
}
