//! JavaScript and TypeScript support through an external parser worker
//!
//! The worker is a long-lived child process. Each request is one JSON line
//! `{"id": N, "file": "<path>"}` on its stdin and each answer one JSON line
//! on its stdout, either `{"id": N, "result": {nodes, edges, warnings}}` or
//! `{"id": N, "error": "<message>"}`. The worker is started on first use and
//! restarted after it crashes, hangs or breaks the protocol.

mod worker;

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::core::config::WorkerConfig;
use crate::core::models::{
    AnalysisWarning, Confidence, EdgeType, FileAnalysis, GraphEdge, GraphNode, NodeType,
    Parameter, Severity, WarningKind,
};
use crate::core::parser::path_key;
use crate::error::{Error, Result};
use crate::languages::SourceParser;

use self::worker::WorkerProcess;

/// Parser that delegates to an external worker process
pub struct WorkerParser {
    config: WorkerConfig,
    extensions: Vec<String>,
    state: Mutex<WorkerState>,
}

struct WorkerState {
    process: Option<WorkerProcess>,
    next_id: u64,
}

impl WorkerParser {
    pub fn new(config: WorkerConfig, extensions: Vec<String>) -> Self {
        Self {
            config,
            extensions,
            state: Mutex::new(WorkerState {
                process: None,
                next_id: 0,
            }),
        }
    }

    /// Whether a worker process is currently attached
    pub fn is_running(&self) -> bool {
        self.lock_state().process.is_some()
    }

    fn lock_state(&self) -> MutexGuard<'_, WorkerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one request/response exchange, starting the worker if needed
    fn exchange(&self, state: &mut WorkerState, file_id: &str) -> Result<Value> {
        if state.process.is_none() {
            state.process = Some(WorkerProcess::spawn(&self.config)?);
        }
        state.next_id += 1;
        let id = state.next_id;

        let process = state.process.as_mut().ok_or(Error::WorkerClosed)?;
        let response = process.request(
            &json!({ "id": id, "file": file_id }),
            self.config.response_timeout(),
        )?;

        match response.get("id").and_then(Value::as_u64) {
            Some(answered) if answered == id => Ok(response),
            other => Err(Error::WorkerProtocol(format!(
                "expected response id {}, got {:?}",
                id, other
            ))),
        }
    }
}

impl SourceParser for WorkerParser {
    fn language_id(&self) -> &str {
        "javascript"
    }

    fn file_extensions(&self) -> &[String] {
        &self.extensions
    }

    fn parse_file(&self, path: &Path) -> Result<FileAnalysis> {
        let file_id = path_key(path);
        let mut state = self.lock_state();

        let response = match self.exchange(&mut state, &file_id) {
            Ok(response) => response,
            // A worker that cannot be started is reported to the caller
            Err(e @ Error::WorkerUnavailable(_)) => return Err(e),
            Err(e) => {
                warn!("Parser worker failed on {}: {}", file_id, e);
                if let Some(process) = state.process.take() {
                    process.stop(self.config.shutdown_grace());
                }
                return Ok(failed(&file_id, format!("Parser worker failed: {}", e)));
            }
        };
        drop(state);

        if let Some(error) = response.get("error") {
            let message = error
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            warn!("Parser worker rejected {}: {}", file_id, message);
            return Ok(failed(&file_id, message));
        }

        let result = response.get("result").cloned().unwrap_or(Value::Null);
        let wire: WireResult = match serde_json::from_value(result) {
            Ok(wire) => wire,
            Err(e) => {
                warn!("Malformed worker result for {}: {}", file_id, e);
                return Ok(failed(&file_id, format!("Malformed worker result: {}", e)));
            }
        };

        Ok(wire.into_analysis(&file_id))
    }

    fn shutdown(&self) {
        if let Some(process) = self.lock_state().process.take() {
            debug!("Stopping parser worker");
            process.stop(self.config.shutdown_grace());
        }
    }
}

impl Drop for WorkerParser {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn failed(file_id: &str, description: String) -> FileAnalysis {
    FileAnalysis {
        nodes: Vec::new(),
        edges: Vec::new(),
        warnings: vec![AnalysisWarning::parse_error(file_id, description)],
    }
}

// ==================== Wire format ====================

#[derive(Debug, Deserialize)]
struct WireResult {
    #[serde(default)]
    nodes: Vec<Value>,
    #[serde(default)]
    edges: Vec<Value>,
    #[serde(default)]
    warnings: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct WireNode {
    id: String,
    #[serde(rename = "type", default)]
    node_type: Option<String>,
    #[serde(default)]
    file_path: Option<String>,
    #[serde(default)]
    line_number: Option<u32>,
    #[serde(default)]
    end_line_number: Option<u32>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    docstring: Option<String>,
    #[serde(default)]
    parameters: Vec<WireParameter>,
    #[serde(default)]
    return_type: Option<String>,
}

/// Parameters arrive either as `"name: type"` strings or as objects
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireParameter {
    Descriptor(String),
    Named {
        name: String,
        #[serde(default, alias = "type")]
        annotation: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct WireEdge {
    from_node: String,
    to_node: String,
    #[serde(default)]
    edge_type: Option<String>,
    #[serde(default)]
    confidence: Option<String>,
    #[serde(default)]
    line_number: Option<u32>,
    #[serde(default)]
    label: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireWarning {
    #[serde(rename = "type", default)]
    kind: Option<WarningKind>,
    #[serde(default)]
    file: Option<String>,
    #[serde(default)]
    line: Option<u32>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    severity: Option<String>,
}

impl WireResult {
    fn into_analysis(self, file_id: &str) -> FileAnalysis {
        FileAnalysis {
            nodes: decode_all(self.nodes, "node", |n: WireNode| n.into_node(file_id)),
            edges: decode_all(self.edges, "edge", WireEdge::into_edge),
            warnings: decode_all(self.warnings, "warning", |w: WireWarning| {
                w.into_warning(file_id)
            }),
        }
    }
}

/// Decode each element independently so one bad entry does not drop the file
fn decode_all<W, T>(values: Vec<Value>, what: &str, convert: impl Fn(W) -> T) -> Vec<T>
where
    W: for<'de> Deserialize<'de>,
{
    values
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<W>(value) {
            Ok(wire) => Some(convert(wire)),
            Err(e) => {
                warn!("Skipping malformed worker {}: {}", what, e);
                None
            }
        })
        .collect()
}

impl WireNode {
    fn into_node(self, file_id: &str) -> GraphNode {
        let name = self.name.unwrap_or_else(|| {
            let symbol = self.id.rsplit(':').next().unwrap_or(&self.id);
            symbol.rsplit('.').next().unwrap_or(symbol).to_string()
        });

        GraphNode {
            node_type: self
                .node_type
                .as_deref()
                .map(node_type_from_wire)
                .unwrap_or(NodeType::Variable),
            file_path: self.file_path.unwrap_or_else(|| file_id.to_string()),
            line_number: self.line_number.unwrap_or(0),
            end_line_number: self.end_line_number,
            name,
            docstring: self.docstring,
            parameters: self
                .parameters
                .into_iter()
                .map(|p| match p {
                    WireParameter::Descriptor(d) => Parameter::from_descriptor(&d),
                    WireParameter::Named { name, annotation } => Parameter::new(name, annotation),
                })
                .collect(),
            return_type: self.return_type,
            id: self.id,
        }
    }
}

impl WireEdge {
    fn into_edge(self) -> GraphEdge {
        let edge_type = self
            .edge_type
            .as_deref()
            .map(edge_type_from_wire)
            .unwrap_or(EdgeType::Call);

        GraphEdge {
            label: self
                .label
                .unwrap_or_else(|| format!("{} {}", edge_type.as_str(), self.to_node)),
            from_node: self.from_node,
            to_node: self.to_node,
            edge_type,
            confidence: self
                .confidence
                .and_then(|c| c.parse().ok())
                .unwrap_or(Confidence::Medium),
            line_number: self.line_number.unwrap_or(0),
        }
    }
}

impl WireWarning {
    fn into_warning(self, file_id: &str) -> AnalysisWarning {
        AnalysisWarning {
            kind: self.kind.unwrap_or(WarningKind::Unknown),
            file: self.file.unwrap_or_else(|| file_id.to_string()),
            line: self.line.unwrap_or(0),
            description: self.description.unwrap_or_default(),
            severity: match self.severity.as_deref() {
                Some("low") => Severity::Low,
                Some("high") => Severity::High,
                _ => Severity::Medium,
            },
        }
    }
}

fn node_type_from_wire(value: &str) -> NodeType {
    match value {
        "file" => NodeType::File,
        "class" => NodeType::Class,
        "function" => NodeType::Function,
        "method" => NodeType::Method,
        _ => NodeType::Variable,
    }
}

fn edge_type_from_wire(value: &str) -> EdgeType {
    match value {
        "import" => EdgeType::Import,
        "inherit" => EdgeType::Inherit,
        "reference" => EdgeType::Reference,
        _ => EdgeType::Call,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_conversion_defaults() {
        let wire: WireResult = serde_json::from_value(json!({
            "nodes": [
                {"id": "/p/a.js:Widget.render", "type": "widget"},
                {"id": "/p/a.js:load", "type": "function", "name": "load",
                 "parameters": ["path: string", {"name": "opts", "type": "Options"}]},
                {"name": "no id"}
            ],
            "edges": [
                {"from_node": "/p/a.js:load", "to_node": "fs.readFile",
                 "edge_type": "invoke", "confidence": "certain", "line_number": 4},
                {"to_node": "missing from"}
            ],
            "warnings": [
                {"type": "dynamic_import", "line": 9, "description": "import()", "severity": "urgent"},
                {"type": "something_new"}
            ]
        }))
        .unwrap();

        let analysis = wire.into_analysis("/p/a.js");

        assert_eq!(analysis.nodes.len(), 2);
        assert_eq!(analysis.nodes[0].node_type, NodeType::Variable);
        assert_eq!(analysis.nodes[0].name, "render");
        assert_eq!(analysis.nodes[0].file_path, "/p/a.js");
        assert_eq!(
            analysis.nodes[1].parameters,
            vec![
                Parameter::new("path", Some("string".to_string())),
                Parameter::new("opts", Some("Options".to_string())),
            ]
        );

        assert_eq!(analysis.edges.len(), 1);
        assert_eq!(analysis.edges[0].edge_type, EdgeType::Call);
        assert_eq!(analysis.edges[0].confidence, Confidence::Medium);
        assert_eq!(analysis.edges[0].label, "call fs.readFile");

        assert_eq!(analysis.warnings.len(), 2);
        assert_eq!(analysis.warnings[0].kind, WarningKind::DynamicImport);
        assert_eq!(analysis.warnings[0].severity, Severity::Medium);
        assert_eq!(analysis.warnings[0].file, "/p/a.js");
        assert_eq!(analysis.warnings[1].kind, WarningKind::Unknown);
    }

    #[test]
    fn test_missing_worker_is_an_error() {
        let config = WorkerConfig {
            program: "/nonexistent/parser-worker".to_string(),
            args: Vec::new(),
            ..WorkerConfig::default()
        };
        let parser = WorkerParser::new(config, vec![".js".to_string()]);

        let result = parser.parse_file(Path::new("/p/a.js"));
        assert!(matches!(result, Err(Error::WorkerUnavailable(_))));
        assert!(!parser.is_running());
    }

    #[cfg(unix)]
    mod process {
        use super::*;

        const ECHO_ID: &str = r#"id=$(printf '%s' "$line" | sed 's/.*"id":\([0-9]*\).*/\1/')"#;

        fn shell_worker(script: &str, timeout_ms: u64) -> WorkerParser {
            let config = WorkerConfig {
                program: "sh".to_string(),
                args: vec!["-c".to_string(), script.to_string()],
                working_dir: None,
                response_timeout_ms: timeout_ms,
                shutdown_grace_ms: 200,
            };
            WorkerParser::new(config, vec![".js".to_string()])
        }

        fn serving(response: &str) -> String {
            format!(
                "while IFS= read -r line; do {}; printf '{}\\n' \"$id\"; done",
                ECHO_ID, response
            )
        }

        #[test]
        fn test_successful_exchange() {
            let parser = shell_worker(
                &serving(
                    r#"{"id":%s,"result":{"nodes":[{"id":"/p/a.js","type":"file","file_path":"/p/a.js","line_number":1,"name":"a.js"}],"edges":[{"from_node":"/p/a.js","to_node":"react","edge_type":"import","confidence":"certain","line_number":1,"label":"import react"}],"warnings":[]}}"#,
                ),
                5_000,
            );

            for _ in 0..2 {
                let analysis = parser.parse_file(Path::new("/p/a.js")).unwrap();
                assert_eq!(analysis.nodes.len(), 1);
                assert_eq!(analysis.nodes[0].node_type, NodeType::File);
                assert_eq!(analysis.edges[0].edge_type, EdgeType::Import);
                assert_eq!(analysis.edges[0].confidence, Confidence::Medium);
                assert!(analysis.warnings.is_empty());
            }
            assert!(parser.is_running());

            parser.shutdown();
            assert!(!parser.is_running());
        }

        #[test]
        fn test_relative_script_runs_in_working_dir() {
            let dir = tempfile::TempDir::new().unwrap();
            std::fs::write(
                dir.path().join("worker.sh"),
                serving(r#"{"id":%s,"error":"from script"}"#),
            )
            .unwrap();
            let config = WorkerConfig {
                program: "sh".to_string(),
                args: vec!["worker.sh".to_string()],
                working_dir: Some(dir.path().to_path_buf()),
                response_timeout_ms: 5_000,
                shutdown_grace_ms: 200,
            };
            let parser = WorkerParser::new(config, vec![".js".to_string()]);

            let analysis = parser.parse_file(Path::new("/p/a.js")).unwrap();
            assert_eq!(analysis.warnings[0].description, "from script");
            parser.shutdown();
        }

        #[test]
        fn test_error_response_keeps_worker() {
            let parser = shell_worker(&serving(r#"{"id":%s,"error":"Unexpected token"}"#), 5_000);

            let analysis = parser.parse_file(Path::new("/p/bad.js")).unwrap();
            assert!(analysis.nodes.is_empty());
            assert_eq!(analysis.warnings.len(), 1);
            assert_eq!(analysis.warnings[0].kind, WarningKind::ParseError);
            assert_eq!(analysis.warnings[0].description, "Unexpected token");
            assert!(parser.is_running());
        }

        #[test]
        fn test_worker_restarts_after_crash() {
            // Answers a single request and exits
            let script = format!(
                "read -r line; {}; printf '{{\"id\":%s,\"result\":{{}}}}\\n' \"$id\"",
                ECHO_ID
            );
            let parser = shell_worker(&script, 5_000);

            let first = parser.parse_file(Path::new("/p/a.js")).unwrap();
            assert!(first.warnings.is_empty());

            let second = parser.parse_file(Path::new("/p/a.js")).unwrap();
            assert_eq!(second.warnings.len(), 1);
            assert!(second.warnings[0].description.starts_with("Parser worker failed"));
            assert!(!parser.is_running());

            let third = parser.parse_file(Path::new("/p/a.js")).unwrap();
            assert!(third.warnings.is_empty());
        }

        #[test]
        fn test_unresponsive_worker_times_out() {
            let parser = shell_worker("read -r line; sleep 5", 200);

            let analysis = parser.parse_file(Path::new("/p/slow.js")).unwrap();
            assert!(analysis.nodes.is_empty());
            assert!(analysis.warnings[0].description.contains("did not respond"));
            assert!(!parser.is_running());
        }

        #[test]
        fn test_mismatched_id_is_a_protocol_error() {
            let parser = shell_worker(
                r#"while IFS= read -r line; do printf '{"id":999,"result":{}}\n'; done"#,
                5_000,
            );

            let analysis = parser.parse_file(Path::new("/p/a.js")).unwrap();
            assert!(analysis.warnings[0].description.contains("protocol"));
            assert!(!parser.is_running());
        }
    }
}
