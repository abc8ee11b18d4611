//! Data model shared by the parsers, graph layer and RPC server

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Kind of symbol a graph node represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    File,
    Class,
    Function,
    Method,
    Variable,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::File => "file",
            NodeType::Class => "class",
            NodeType::Function => "function",
            NodeType::Method => "method",
            NodeType::Variable => "variable",
        }
    }
}

/// Kind of relationship between two nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    Import,
    Call,
    Inherit,
    Reference,
}

impl EdgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::Import => "import",
            EdgeType::Call => "call",
            EdgeType::Inherit => "inherit",
            EdgeType::Reference => "reference",
        }
    }
}

/// How trustworthy a resolved reference is.
///
/// Variants are declared lowest first so the derived ordering gives
/// `High > Medium > Low > Unsafe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Unsafe,
    Low,
    Medium,
    High,
}

impl Confidence {
    pub const ALL: [Confidence; 4] = [
        Confidence::High,
        Confidence::Medium,
        Confidence::Low,
        Confidence::Unsafe,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
            Confidence::Unsafe => "unsafe",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Confidence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "high" => Ok(Confidence::High),
            "medium" => Ok(Confidence::Medium),
            "low" => Ok(Confidence::Low),
            "unsafe" => Ok(Confidence::Unsafe),
            other => Err(format!("unknown confidence level: {}", other)),
        }
    }
}

/// Severity of an analysis warning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// Category of an analysis warning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    CircularDependency,
    ParseError,
    DynamicImport,
    LateBinding,
    Reflection,
    #[serde(other)]
    Unknown,
}

/// A function parameter with its optional type annotation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<String>,
}

impl Parameter {
    pub fn new(name: impl Into<String>, annotation: Option<String>) -> Self {
        Self {
            name: name.into(),
            annotation,
        }
    }

    /// Parse the `name: annotation` shorthand used by external parsers
    pub fn from_descriptor(descriptor: &str) -> Self {
        match descriptor.split_once(':') {
            Some((name, annotation)) if !annotation.trim().is_empty() => {
                Self::new(name.trim(), Some(annotation.trim().to_string()))
            }
            _ => Self::new(descriptor.trim(), None),
        }
    }
}

/// A symbol in the dependency graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    /// `<file_path>` for files, `<file_path>:<qualified_name>` for symbols
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub file_path: String,
    pub line_number: u32,
    #[serde(default)]
    pub end_line_number: Option<u32>,
    pub name: String,
    #[serde(default)]
    pub docstring: Option<String>,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub return_type: Option<String>,
}

impl GraphNode {
    /// Node representing a whole source file
    pub fn file(file_path: &str, name: &str) -> Self {
        Self {
            id: file_path.to_string(),
            node_type: NodeType::File,
            file_path: file_path.to_string(),
            line_number: 1,
            end_line_number: None,
            name: name.to_string(),
            docstring: None,
            parameters: Vec::new(),
            return_type: None,
        }
    }

    pub fn is_function_like(&self) -> bool {
        matches!(self.node_type, NodeType::Function | NodeType::Method)
    }
}

/// A directed relationship between two nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from_node: String,
    /// May name a symbol that is not part of the graph (external reference)
    pub to_node: String,
    pub edge_type: EdgeType,
    pub confidence: Confidence,
    pub line_number: u32,
    pub label: String,
}

/// Non-fatal finding produced during analysis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisWarning {
    #[serde(rename = "type")]
    pub kind: WarningKind,
    pub file: String,
    pub line: u32,
    pub description: String,
    pub severity: Severity,
}

impl AnalysisWarning {
    pub fn parse_error(file: &str, description: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::ParseError,
            file: file.to_string(),
            line: 0,
            description: description.into(),
            severity: Severity::Medium,
        }
    }
}

/// Summary statistics for a project graph
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSummary {
    pub files: usize,
    pub functions: usize,
    pub classes: usize,
    pub edges: usize,
    pub high_confidence_edges: usize,
    pub medium_confidence_edges: usize,
    pub low_confidence_edges: usize,
    pub unsafe_edges: usize,
    /// 0 after an incremental update, which is not timed
    pub analysis_time_ms: u64,
}

impl GraphSummary {
    pub fn compute(
        files: usize,
        nodes: &[GraphNode],
        edges: &[GraphEdge],
        analysis_time_ms: u64,
    ) -> Self {
        let tier = |c: Confidence| edges.iter().filter(|e| e.confidence == c).count();

        Self {
            files,
            functions: nodes.iter().filter(|n| n.is_function_like()).count(),
            classes: nodes
                .iter()
                .filter(|n| n.node_type == NodeType::Class)
                .count(),
            edges: edges.len(),
            high_confidence_edges: tier(Confidence::High),
            medium_confidence_edges: tier(Confidence::Medium),
            low_confidence_edges: tier(Confidence::Low),
            unsafe_edges: tier(Confidence::Unsafe),
            analysis_time_ms,
        }
    }
}

/// The complete in-memory dependency graph of a project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectGraph {
    pub version: String,
    pub project_root: String,
    pub analysis_timestamp: String,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub warnings: Vec<AnalysisWarning>,
    pub summary: GraphSummary,
}

impl ProjectGraph {
    pub fn new(
        project_root: String,
        nodes: Vec<GraphNode>,
        edges: Vec<GraphEdge>,
        warnings: Vec<AnalysisWarning>,
        summary: GraphSummary,
    ) -> Self {
        Self {
            version: "1.0".to_string(),
            project_root,
            analysis_timestamp: Utc::now().to_rfc3339(),
            nodes,
            edges,
            warnings,
            summary,
        }
    }
}

/// Result of a change impact query
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpactReport {
    pub changed_file: String,
    pub changed_function: Option<String>,
    pub affected_files: Vec<String>,
    pub affected_functions: Vec<String>,
    pub suggested_tests: Vec<String>,
    pub confidence_breakdown: BTreeMap<Confidence, usize>,
    pub impact_depth: usize,
    pub has_circular_dependencies: bool,
}

impl ImpactReport {
    /// Report for a node that is not part of the graph
    pub fn minimal(node_id: &str) -> Self {
        let (changed_file, changed_function) = split_node_id(node_id);
        Self {
            changed_file: changed_file.to_string(),
            changed_function: changed_function.map(str::to_string),
            ..Default::default()
        }
    }
}

/// Split a node id into its file part and optional qualified symbol name
pub fn split_node_id(node_id: &str) -> (&str, Option<&str>) {
    match node_id.split_once(':') {
        Some((file, symbol)) => (file, Some(symbol)),
        None => (node_id, None),
    }
}

/// Nodes, edges and warnings extracted from a single file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileAnalysis {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub warnings: Vec<AnalysisWarning>,
}

/// Status of the analysis service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub running: bool,
    pub version: String,
    pub has_cache: bool,
    pub last_analysis: Option<String>,
    pub file_count: Option<usize>,
    pub error: Option<String>,
}
