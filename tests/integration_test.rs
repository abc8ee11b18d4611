//! Integration tests for DAG Engine
//!
//! These tests analyse small Python projects written to temporary
//! directories and check the resulting graph, queries and incremental
//! updates end to end.

use std::path::{Path, PathBuf};
use tempfile::TempDir;

use dag_engine::core::models::{EdgeType, GraphEdge, GraphNode, NodeType, WarningKind};
use dag_engine::core::parser::path_key;
use dag_engine::{Confidence, Config, GraphBuilder, ProjectAnalyser};

fn create_python_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    path
}

fn key(dir: &TempDir, name: &str) -> String {
    path_key(&dir.path().join(name))
}

fn analyser() -> ProjectAnalyser {
    ProjectAnalyser::new(&Config::default())
}

fn edges_of<'a>(edges: &'a [GraphEdge], edge_type: EdgeType) -> Vec<&'a GraphEdge> {
    edges.iter().filter(|e| e.edge_type == edge_type).collect()
}

#[test]
fn test_single_function_file() {
    let temp_dir = TempDir::new().unwrap();
    create_python_file(&temp_dir, "solo.py", "def solo():\n    return 42\n");

    let mut analyser = analyser();
    let project = analyser.analyse_project(temp_dir.path()).unwrap();

    assert_eq!(project.nodes.len(), 2);
    assert_eq!(project.edges.len(), 0);
    assert!(project.nodes.iter().any(|n| n.node_type == NodeType::File));

    let function = project
        .nodes
        .iter()
        .find(|n| n.node_type == NodeType::Function)
        .unwrap();
    assert_eq!(function.id, format!("{}:solo", key(&temp_dir, "solo.py")));
    assert!(project.warnings.is_empty());
}

#[test]
fn test_cross_file_import_and_call() {
    let temp_dir = TempDir::new().unwrap();
    create_python_file(
        &temp_dir,
        "a.py",
        "from b import helper\n\ndef main():\n    helper()\n",
    );
    create_python_file(&temp_dir, "b.py", "def helper():\n    return 1\n");

    let a = key(&temp_dir, "a.py");
    let b = key(&temp_dir, "b.py");

    let mut analyser = analyser();
    let project = analyser.analyse_project(temp_dir.path()).unwrap();

    let imports = edges_of(&project.edges, EdgeType::Import);
    assert_eq!(imports.len(), 1);
    assert_eq!(imports[0].from_node, a);
    assert_eq!(imports[0].to_node, b);
    assert_eq!(imports[0].confidence, Confidence::High);

    let calls = edges_of(&project.edges, EdgeType::Call);
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].from_node, format!("{}:main", a));
    assert_eq!(calls[0].to_node, format!("{}:helper", b));
    assert_eq!(calls[0].confidence, Confidence::High);

    assert_eq!(
        analyser.get_callers(&format!("{}:helper", b)),
        vec![format!("{}:main", a)]
    );
}

#[test]
fn test_inheritance_and_impact() {
    let temp_dir = TempDir::new().unwrap();
    create_python_file(
        &temp_dir,
        "models.py",
        r#"
class User:
    def save(self):
        pass


class Admin(User):
    def promote(self):
        self.save()
"#,
    );
    let file = key(&temp_dir, "models.py");

    let mut analyser = analyser();
    let project = analyser.analyse_project(temp_dir.path()).unwrap();

    let inherits = edges_of(&project.edges, EdgeType::Inherit);
    assert_eq!(inherits.len(), 1);
    assert_eq!(inherits[0].from_node, format!("{}:Admin", file));
    assert_eq!(inherits[0].to_node, format!("{}:User", file));
    assert_eq!(inherits[0].confidence, Confidence::High);

    let report = analyser.get_impact(&file, Some("User"), None, None);
    assert_eq!(report.changed_function.as_deref(), Some("User"));
    assert!(report
        .affected_functions
        .contains(&format!("{}:Admin", file)));
    assert_eq!(report.affected_files, vec![file]);
    assert!(!report.has_circular_dependencies);
}

#[test]
fn test_mutual_imports_form_cycle() {
    let temp_dir = TempDir::new().unwrap();
    create_python_file(&temp_dir, "a.py", "from b import g\n\ndef f():\n    g()\n");
    create_python_file(&temp_dir, "b.py", "from a import f\n\ndef g():\n    f()\n");

    let f = format!("{}:f", key(&temp_dir, "a.py"));
    let g = format!("{}:g", key(&temp_dir, "b.py"));

    let mut analyser = analyser();
    let project = analyser.analyse_project(temp_dir.path()).unwrap();

    let cycle_warnings: Vec<_> = project
        .warnings
        .iter()
        .filter(|w| w.kind == WarningKind::CircularDependency)
        .collect();
    assert!(!cycle_warnings.is_empty());
    assert!(cycle_warnings
        .iter()
        .all(|w| w.description.starts_with("Circular dependency: ")));

    let cycles = analyser.find_cycles(None);
    assert!(cycles
        .iter()
        .any(|cycle| cycle.contains(&f) && cycle.contains(&g)));

    // Impact terminates on the cycle and flags it
    let report = analyser.get_impact(&key(&temp_dir, "a.py"), Some("f"), None, None);
    assert!(report.has_circular_dependencies);
    assert_eq!(report.affected_functions, vec![g]);
}

#[test]
fn test_broken_file_among_valid_files() {
    let temp_dir = TempDir::new().unwrap();
    for i in 0..9 {
        create_python_file(
            &temp_dir,
            &format!("mod{}.py", i),
            &format!("def func{}():\n    return {}\n", i, i),
        );
    }
    create_python_file(&temp_dir, "broken.py", "def broken(:\n    return\n");

    let mut analyser = analyser();
    let project = analyser.analyse_project(temp_dir.path()).unwrap();

    assert_eq!(project.summary.files, 10);
    for i in 0..9 {
        let id = format!("{}:func{}", key(&temp_dir, &format!("mod{}.py", i)), i);
        assert!(project.nodes.iter().any(|n| n.id == id), "missing {}", id);
    }

    let parse_errors: Vec<_> = project
        .warnings
        .iter()
        .filter(|w| w.kind == WarningKind::ParseError)
        .collect();
    assert_eq!(parse_errors.len(), 1);
    assert_eq!(parse_errors[0].file, key(&temp_dir, "broken.py"));
}

#[test]
fn test_invalidate_removes_one_call() {
    let temp_dir = TempDir::new().unwrap();
    let app = create_python_file(
        &temp_dir,
        "app.py",
        "from util import helper, other\n\ndef main():\n    helper()\n    other()\n",
    );
    create_python_file(
        &temp_dir,
        "util.py",
        "def helper():\n    return 1\n\ndef other():\n    return helper()\n",
    );

    let mut analyser = analyser();
    let before = analyser.analyse_project(temp_dir.path()).unwrap().clone();

    std::fs::write(
        &app,
        "from util import helper, other\n\ndef main():\n    helper()\n",
    )
    .unwrap();
    let after = analyser.invalidate_file(&app).unwrap();

    assert_eq!(after.edges.len(), before.edges.len() - 1);
    let ids = |nodes: &[GraphNode]| -> Vec<String> {
        nodes.iter().map(|n| n.id.clone()).collect()
    };
    assert_eq!(ids(&after.nodes), ids(&before.nodes));

    let removed: Vec<_> = before
        .edges
        .iter()
        .filter(|e| !after.edges.contains(e))
        .collect();
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].edge_type, EdgeType::Call);
    assert_eq!(removed[0].to_node, format!("{}:other", key(&temp_dir, "util.py")));

    let util = key(&temp_dir, "util.py");
    let util_edges = |edges: &[GraphEdge]| -> Vec<GraphEdge> {
        edges
            .iter()
            .filter(|e| e.from_node.starts_with(&util))
            .cloned()
            .collect()
    };
    assert_eq!(util_edges(&after.edges), util_edges(&before.edges));
    assert_eq!(after.summary.analysis_time_ms, 0);
}

#[test]
fn test_determinism() {
    let temp_dir = TempDir::new().unwrap();
    create_python_file(
        &temp_dir,
        "service.py",
        r#"
import os
from repo import load


class Service:
    def run(self, key):
        data = load(key)
        return os.path.join(data, "out")


def handler(event):
    return Service().run(event["key"])
"#,
    );
    create_python_file(&temp_dir, "repo.py", "def load(key):\n    return key\n");

    let mut first = analyser();
    let mut second = analyser();
    let a = first.analyse_project(temp_dir.path()).unwrap();
    let b = second.analyse_project(temp_dir.path()).unwrap();

    assert_eq!(a.nodes, b.nodes);
    assert_eq!(a.edges, b.edges);
}

#[test]
fn test_invalidate_unchanged_file_is_idempotent() {
    let temp_dir = TempDir::new().unwrap();
    let path = create_python_file(
        &temp_dir,
        "app.py",
        "import json\n\ndef main():\n    return json.dumps({})\n",
    );

    let mut analyser = analyser();
    let before = analyser.analyse_project(temp_dir.path()).unwrap().clone();
    let after = analyser.invalidate_file(&path).unwrap();

    assert_eq!(after.nodes.len(), before.nodes.len());
    assert_eq!(after.edges.len(), before.edges.len());
}

#[test]
fn test_invalidate_deleted_file() {
    let temp_dir = TempDir::new().unwrap();
    create_python_file(&temp_dir, "keep.py", "def keep():\n    pass\n");
    let gone = create_python_file(&temp_dir, "gone.py", "def gone():\n    keep()\n");

    let mut analyser = analyser();
    analyser.analyse_project(temp_dir.path()).unwrap();

    std::fs::remove_file(&gone).unwrap();
    let project = analyser.invalidate_file(&gone).unwrap();

    let gone_key = key(&temp_dir, "gone.py");
    assert!(project.nodes.iter().all(|n| n.file_path != gone_key));
    assert!(project.edges.iter().all(|e| !e.from_node.starts_with(&gone_key)));
    assert_eq!(project.summary.files, 1);
}

#[test]
fn test_unresolved_call_is_medium() {
    let temp_dir = TempDir::new().unwrap();
    create_python_file(&temp_dir, "app.py", "def main():\n    mystery()\n");

    let mut analyser = analyser();
    let project = analyser.analyse_project(temp_dir.path()).unwrap();

    let calls = edges_of(&project.edges, EdgeType::Call);
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].to_node, "mystery");
    assert_eq!(calls[0].confidence, Confidence::Medium);
}

#[test]
fn test_confidence_filter_respects_ordering() {
    let temp_dir = TempDir::new().unwrap();
    create_python_file(
        &temp_dir,
        "app.py",
        r#"
import handlers


def local():
    pass


def main(name):
    local()
    mystery()
    getattr(handlers, name)()
    handlers.dispatch(name)
"#,
    );

    let mut analyser = analyser();
    analyser.analyse_project(temp_dir.path()).unwrap();
    let queries = analyser.queries().unwrap();
    let graph = queries.graph();

    for min in Confidence::ALL {
        let filtered = GraphBuilder::filter_by_confidence(graph, min);
        assert_eq!(filtered.node_count(), graph.node_count());
        assert!(filtered.edges().all(|e| e.confidence >= min));
        assert_eq!(
            filtered.edge_count(),
            graph.edges().filter(|e| e.confidence >= min).count()
        );
    }

    let high_only = GraphBuilder::filter_by_confidence(graph, Confidence::High);
    assert!(high_only.edge_count() < graph.edge_count());
}

#[test]
fn test_impact_respects_confidence_threshold() {
    let temp_dir = TempDir::new().unwrap();
    create_python_file(&temp_dir, "core.py", "def compute():\n    return 1\n");
    create_python_file(
        &temp_dir,
        "api.py",
        "from core import compute\n\ndef endpoint():\n    return compute()\n",
    );
    create_python_file(
        &temp_dir,
        "tests/test_api.py",
        "from api import endpoint\n\ndef test_endpoint():\n    assert endpoint() == 1\n",
    );

    let mut analyser = analyser();
    analyser.analyse_project(temp_dir.path()).unwrap();

    let core = key(&temp_dir, "core.py");
    let report = analyser.get_impact(&core, Some("compute"), None, Some(Confidence::High));

    assert!(!report.has_circular_dependencies);
    assert!(report
        .affected_functions
        .contains(&format!("{}:endpoint", key(&temp_dir, "api.py"))));
    assert!(report
        .affected_functions
        .contains(&format!("{}:test_endpoint", key(&temp_dir, "tests/test_api.py"))));
    assert_eq!(
        report.suggested_tests,
        vec![key(&temp_dir, "tests/test_api.py")]
    );
    assert_eq!(report.impact_depth, 2);

    let shallow = analyser.get_impact(&core, Some("compute"), Some(1), Some(Confidence::High));
    assert!(shallow.impact_depth <= 1);
}

#[test]
fn test_stdlib_import_is_not_a_project_module() {
    let temp_dir = TempDir::new().unwrap();
    create_python_file(
        &temp_dir,
        "app.py",
        "import logging\n\ndef main():\n    logging.info('x')\n",
    );
    create_python_file(&temp_dir, "util/logging.py", "def info(msg):\n    return msg\n");

    let mut analyser = analyser();
    let project = analyser.analyse_project(temp_dir.path()).unwrap();

    let util = key(&temp_dir, "util/logging.py");
    assert!(project.edges.iter().all(|e| !e.to_node.starts_with(&util)));

    let imports = edges_of(&project.edges, EdgeType::Import);
    assert_eq!(imports.len(), 1);
    assert_eq!(imports[0].to_node, "logging");

    let report = analyser.get_impact(&util, Some("info"), None, None);
    assert!(report.affected_functions.is_empty());
}

#[test]
fn test_relative_import_within_package() {
    let temp_dir = TempDir::new().unwrap();
    create_python_file(&temp_dir, "pkg/__init__.py", "");
    create_python_file(&temp_dir, "pkg/models.py", "def load():\n    return 1\n");
    create_python_file(
        &temp_dir,
        "pkg/views.py",
        "from .models import load\n\ndef show():\n    return load()\n",
    );
    // Same module name outside the package
    create_python_file(&temp_dir, "models.py", "def load():\n    return 2\n");

    let mut analyser = analyser();
    let project = analyser.analyse_project(temp_dir.path()).unwrap();

    let views = key(&temp_dir, "pkg/views.py");
    let models = key(&temp_dir, "pkg/models.py");
    let calls = edges_of(&project.edges, EdgeType::Call);
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].from_node, format!("{}:show", views));
    assert_eq!(calls[0].to_node, format!("{}:load", models));

    let imports = edges_of(&project.edges, EdgeType::Import);
    assert_eq!(imports.len(), 1);
    assert_eq!(imports[0].to_node, models);
}

#[test]
fn test_missing_paths() {
    let mut analyser = analyser();
    assert!(analyser
        .analyse_project(Path::new("/no/such/project"))
        .is_err());
    assert!(analyser.analyse_file(Path::new("/no/such/file.py")).is_err());
    assert!(analyser
        .invalidate_file(Path::new("/no/such/file.py"))
        .is_none());
}
