//! Python language support

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use tracing::{debug, warn};
use tree_sitter::Node;

use crate::core::config::PythonConfig;
use crate::core::models::{
    AnalysisWarning, Confidence, EdgeType, FileAnalysis, GraphEdge, GraphNode, NodeType, Parameter,
};
use crate::core::parser::path_key;
use crate::error::Result;
use crate::languages::SourceParser;

/// Python parser implementation backed by tree-sitter
pub struct PythonParser {
    config: PythonConfig,
    extensions: Vec<String>,
}

impl PythonParser {
    pub fn new(config: PythonConfig, extensions: Vec<String>) -> Self {
        Self { config, extensions }
    }

    /// Extract graph data from already loaded file content
    pub fn parse_source(&self, path: &Path, content: &[u8]) -> Result<FileAnalysis> {
        let file_id = path_key(path);
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| file_id.clone());
        let file_node = GraphNode::file(&file_id, &file_name);

        let source = match std::str::from_utf8(content) {
            Ok(source) => source,
            Err(e) => {
                warn!("Encoding error reading {:?}: {}", path, e);
                return Ok(rejected(
                    file_node,
                    AnalysisWarning::parse_error(&file_id, format!("Encoding error: {}", e)),
                ));
            }
        };

        let language: tree_sitter::Language = tree_sitter_python::LANGUAGE.into();
        let mut parser = tree_sitter::Parser::new();
        parser.set_language(&language)?;

        let Some(tree) = parser.parse(source, None) else {
            return Ok(rejected(
                file_node,
                AnalysisWarning::parse_error(&file_id, "Parser produced no syntax tree"),
            ));
        };

        let root = tree.root_node();
        if root.has_error() {
            let line = first_error_line(root).unwrap_or(0);
            warn!("Syntax error parsing {:?} near line {}", path, line);
            let mut warning = AnalysisWarning::parse_error(
                &file_id,
                format!("Syntax error near line {}", line),
            );
            warning.line = line;
            return Ok(rejected(file_node, warning));
        }

        let mut extractor = PythonExtractor::new(source, &file_id, &self.config);
        extractor.collect_imports(root);
        extractor.collect_module_symbols(root);
        extractor.visit(root);

        let mut nodes = Vec::with_capacity(extractor.nodes.len() + 1);
        nodes.push(file_node);
        nodes.extend(extractor.nodes);

        debug!(
            "Parsed {:?}: {} nodes, {} edges",
            path,
            nodes.len(),
            extractor.edges.len()
        );

        Ok(FileAnalysis {
            nodes,
            edges: extractor.edges,
            warnings: Vec::new(),
        })
    }
}

impl SourceParser for PythonParser {
    fn language_id(&self) -> &str {
        "python"
    }

    fn file_extensions(&self) -> &[String] {
        &self.extensions
    }

    fn parse_file(&self, path: &Path) -> Result<FileAnalysis> {
        let content = fs::read(path)?;
        self.parse_source(path, &content)
    }
}

/// A file that could not be parsed keeps only its file node
fn rejected(file_node: GraphNode, warning: AnalysisWarning) -> FileAnalysis {
    FileAnalysis {
        nodes: vec![file_node],
        edges: Vec::new(),
        warnings: vec![warning],
    }
}

fn first_error_line(node: Node) -> Option<u32> {
    if node.is_error() || node.is_missing() {
        return Some(line_of(node));
    }
    let mut cursor = node.walk();
    let children: Vec<Node> = node.children(&mut cursor).collect();
    children
        .into_iter()
        .filter(|c| c.has_error())
        .find_map(first_error_line)
}

fn line_of(node: Node) -> u32 {
    node.start_position().row as u32 + 1
}

fn end_line_of(node: Node) -> u32 {
    node.end_position().row as u32 + 1
}

/// Helper for extracting graph data from Python source
struct PythonExtractor<'a> {
    source: &'a str,
    file_id: &'a str,
    config: &'a PythonConfig,
    nodes: Vec<GraphNode>,
    edges: Vec<GraphEdge>,
    /// Local binding -> fully qualified import target
    imports: HashMap<String, String>,
    /// Names bound at module scope
    local_symbols: HashSet<String>,
    current_class: Option<String>,
    current_function: Option<String>,
}

impl<'a> PythonExtractor<'a> {
    fn new(source: &'a str, file_id: &'a str, config: &'a PythonConfig) -> Self {
        Self {
            source,
            file_id,
            config,
            nodes: Vec::new(),
            edges: Vec::new(),
            imports: HashMap::new(),
            local_symbols: HashSet::new(),
            current_class: None,
            current_function: None,
        }
    }

    // ==================== First pass ====================

    fn collect_imports(&mut self, node: Node) {
        match node.kind() {
            "import_statement" => self.extract_import(node),
            "import_from_statement" => self.extract_import_from(node),
            _ => {
                let mut cursor = node.walk();
                for child in node.named_children(&mut cursor) {
                    self.collect_imports(child);
                }
            }
        }
    }

    fn extract_import(&mut self, node: Node) {
        let mut cursor = node.walk();
        for spec in node.children_by_field_name("name", &mut cursor) {
            let (module, alias) = self.import_spec(spec);
            let Some(module) = module else { continue };

            match alias {
                Some(alias) => {
                    self.imports.insert(alias.to_string(), module.to_string());
                }
                None => {
                    self.imports.insert(module.to_string(), module.to_string());
                    // `import a.b` also binds `a`
                    if let Some((head, _)) = module.split_once('.') {
                        self.imports
                            .entry(head.to_string())
                            .or_insert_with(|| head.to_string());
                    }
                }
            }

            self.edges.push(GraphEdge {
                from_node: self.file_id.to_string(),
                to_node: module.to_string(),
                edge_type: EdgeType::Import,
                confidence: Confidence::High,
                line_number: line_of(node),
                label: format!("import {}", module),
            });
        }
    }

    fn extract_import_from(&mut self, node: Node) {
        // Relative imports keep their leading dots
        let module = node
            .child_by_field_name("module_name")
            .map(|m| self.text(m))
            .unwrap_or("");
        // `from . import x` names `.x`; `from pkg import x` names `pkg.x`
        let qualify = |name: &str| {
            if module.is_empty() {
                name.to_string()
            } else if module.ends_with('.') {
                format!("{}{}", module, name)
            } else {
                format!("{}.{}", module, name)
            }
        };

        let mut cursor = node.walk();
        let has_wildcard = node
            .named_children(&mut cursor)
            .any(|c| c.kind() == "wildcard_import");
        if has_wildcard && !module.is_empty() {
            self.edges.push(GraphEdge {
                from_node: self.file_id.to_string(),
                to_node: module.to_string(),
                edge_type: EdgeType::Import,
                confidence: Confidence::High,
                line_number: line_of(node),
                label: format!("from {} import *", module),
            });
        }

        let mut cursor = node.walk();
        for spec in node.children_by_field_name("name", &mut cursor) {
            let (name, alias) = self.import_spec(spec);
            let Some(name) = name else { continue };

            let full_path = qualify(name);
            let (to_node, label) = if module.is_empty() {
                (name.to_string(), format!("import {}", name))
            } else if module.trim_start_matches('.').is_empty() {
                // A package-relative import names a sibling module or a
                // symbol of the package itself
                (full_path.clone(), format!("from {} import {}", module, name))
            } else {
                (
                    module.to_string(),
                    format!("from {} import {}", module, name),
                )
            };
            self.imports
                .insert(alias.unwrap_or(name).to_string(), full_path);

            self.edges.push(GraphEdge {
                from_node: self.file_id.to_string(),
                to_node,
                edge_type: EdgeType::Import,
                confidence: Confidence::High,
                line_number: line_of(node),
                label,
            });
        }
    }

    /// Imported name and optional alias of a `dotted_name` or `aliased_import`
    fn import_spec(&self, spec: Node) -> (Option<&'a str>, Option<&'a str>) {
        match spec.kind() {
            "aliased_import" => (
                spec.child_by_field_name("name").map(|n| self.text(n)),
                spec.child_by_field_name("alias").map(|n| self.text(n)),
            ),
            "dotted_name" | "identifier" => (Some(self.text(spec)), None),
            _ => (None, None),
        }
    }

    fn collect_module_symbols(&mut self, root: Node) {
        let mut cursor = root.walk();
        for child in root.named_children(&mut cursor) {
            self.collect_symbol(child);
        }
    }

    fn collect_symbol(&mut self, node: Node) {
        match node.kind() {
            "class_definition" | "function_definition" => {
                if let Some(name) = node.child_by_field_name("name") {
                    self.local_symbols.insert(self.text(name).to_string());
                }
            }
            "decorated_definition" => {
                if let Some(definition) = node.child_by_field_name("definition") {
                    self.collect_symbol(definition);
                }
            }
            "expression_statement" => {
                let mut cursor = node.walk();
                for child in node.named_children(&mut cursor) {
                    if child.kind() == "assignment" {
                        self.collect_assignment_targets(child);
                    }
                }
            }
            _ => {}
        }
    }

    /// Handles chained assignments such as `a = b = 1`
    fn collect_assignment_targets(&mut self, assignment: Node) {
        if let Some(left) = assignment.child_by_field_name("left") {
            if left.kind() == "identifier" {
                self.local_symbols.insert(self.text(left).to_string());
            }
        }
        if let Some(right) = assignment.child_by_field_name("right") {
            if right.kind() == "assignment" {
                self.collect_assignment_targets(right);
            }
        }
    }

    // ==================== Second pass ====================

    fn visit(&mut self, node: Node) {
        match node.kind() {
            "class_definition" => self.handle_class(node),
            "function_definition" => self.handle_function(node),
            "call" => {
                self.handle_call(node);
                self.visit_children(node);
            }
            _ => self.visit_children(node),
        }
    }

    fn visit_children(&mut self, node: Node) {
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            self.visit(child);
        }
    }

    fn handle_class(&mut self, node: Node) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = self.text(name_node);
        let class_id = format!("{}:{}", self.file_id, name);
        let body = node.child_by_field_name("body");

        self.nodes.push(GraphNode {
            id: class_id.clone(),
            node_type: NodeType::Class,
            file_path: self.file_id.to_string(),
            line_number: line_of(node),
            end_line_number: Some(end_line_of(node)),
            name: name.to_string(),
            docstring: body.and_then(|b| self.docstring(b)),
            parameters: Vec::new(),
            return_type: None,
        });

        if let Some(bases) = node.child_by_field_name("superclasses") {
            let mut cursor = bases.walk();
            for base in bases.named_children(&mut cursor) {
                // Keyword arguments such as `metaclass=` are not bases
                if matches!(
                    base.kind(),
                    "keyword_argument" | "list_splat" | "dictionary_splat" | "comment"
                ) {
                    continue;
                }
                let Some(base_name) = self.expr_name(base) else {
                    continue;
                };
                let edge = GraphEdge {
                    from_node: class_id.clone(),
                    to_node: self.resolve_name(&base_name),
                    edge_type: EdgeType::Inherit,
                    confidence: self.confidence(&base_name, self.text(base)),
                    line_number: line_of(node),
                    label: format!("inherits from {}", base_name),
                };
                self.edges.push(edge);
            }
        }

        let previous_class = self.current_class.replace(name.to_string());
        let previous_function = self.current_function.take();
        if let Some(body) = body {
            self.visit_children(body);
        }
        self.current_class = previous_class;
        self.current_function = previous_function;
    }

    fn handle_function(&mut self, node: Node) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = self.text(name_node);

        let (func_id, node_type) = match &self.current_class {
            Some(class) => (
                format!("{}:{}.{}", self.file_id, class, name),
                NodeType::Method,
            ),
            None => (format!("{}:{}", self.file_id, name), NodeType::Function),
        };

        let body = node.child_by_field_name("body");
        let parameters = node
            .child_by_field_name("parameters")
            .map(|p| self.parameters(p))
            .unwrap_or_default();

        self.nodes.push(GraphNode {
            id: func_id,
            node_type,
            file_path: self.file_id.to_string(),
            line_number: line_of(node),
            end_line_number: Some(end_line_of(node)),
            name: name.to_string(),
            docstring: body.and_then(|b| self.docstring(b)),
            parameters,
            return_type: node
                .child_by_field_name("return_type")
                .map(|t| self.text(t).to_string()),
        });

        let previous = self.current_function.replace(name.to_string());
        if let Some(body) = body {
            self.visit_children(body);
        }
        self.current_function = previous;
    }

    fn handle_call(&mut self, node: Node) {
        let Some(caller_id) = self.scope_id() else {
            return;
        };
        let Some(func) = node.child_by_field_name("function") else {
            return;
        };
        let Some(callee) = self.expr_name(func) else {
            return;
        };

        // `getattr(o, "m")()` and `table[k]()` stay visible even though
        // their base name is a builtin
        let computed_target = matches!(func.kind(), "call" | "subscript");
        if !computed_target && self.config.builtin_denylist.iter().any(|b| *b == callee) {
            return;
        }

        let edge = GraphEdge {
            from_node: caller_id,
            to_node: self.resolve_name(&callee),
            edge_type: EdgeType::Call,
            confidence: self.confidence(&callee, self.text(func)),
            line_number: line_of(node),
            label: format!("calls {}", callee),
        };
        self.edges.push(edge);
    }

    fn parameters(&self, params: Node) -> Vec<Parameter> {
        let mut result = Vec::new();
        let mut cursor = params.walk();

        for param in params.named_children(&mut cursor) {
            let parameter = match param.kind() {
                "identifier" | "list_splat_pattern" | "dictionary_splat_pattern" => {
                    Parameter::new(self.text(param), None)
                }
                "typed_parameter" => {
                    let Some(name) = param.named_child(0) else {
                        continue;
                    };
                    Parameter::new(
                        self.text(name),
                        param
                            .child_by_field_name("type")
                            .map(|t| self.text(t).to_string()),
                    )
                }
                "default_parameter" | "typed_default_parameter" => {
                    let Some(name) = param.child_by_field_name("name") else {
                        continue;
                    };
                    Parameter::new(
                        self.text(name),
                        param
                            .child_by_field_name("type")
                            .map(|t| self.text(t).to_string()),
                    )
                }
                _ => continue,
            };
            result.push(parameter);
        }

        result
    }

    fn docstring(&self, body: Node) -> Option<String> {
        let mut cursor = body.walk();
        let first = body
            .named_children(&mut cursor)
            .find(|c| c.kind() != "comment")?;
        if first.kind() != "expression_statement" {
            return None;
        }
        let string = first.named_child(0)?;
        if string.kind() != "string" {
            return None;
        }

        let mut cursor = string.walk();
        let raw: String = string
            .named_children(&mut cursor)
            .filter(|c| matches!(c.kind(), "string_content" | "escape_sequence"))
            .map(|c| self.text(c))
            .collect();
        Some(clean_docstring(&raw))
    }

    /// Textual name of a callee or base class expression
    fn expr_name(&self, node: Node) -> Option<String> {
        match node.kind() {
            "identifier" => Some(self.text(node).to_string()),
            "attribute" => {
                let attr = self.text(node.child_by_field_name("attribute")?);
                match node
                    .child_by_field_name("object")
                    .and_then(|o| self.expr_name(o))
                {
                    Some(object) => Some(format!("{}.{}", object, attr)),
                    None => Some(attr.to_string()),
                }
            }
            "subscript" => node
                .child_by_field_name("value")
                .and_then(|v| self.expr_name(v)),
            "call" => node
                .child_by_field_name("function")
                .and_then(|f| self.expr_name(f)),
            "parenthesized_expression" => node.named_child(0).and_then(|n| self.expr_name(n)),
            _ => None,
        }
    }

    fn scope_id(&self) -> Option<String> {
        let function = self.current_function.as_ref()?;
        Some(match &self.current_class {
            Some(class) => format!("{}:{}.{}", self.file_id, class, function),
            None => format!("{}:{}", self.file_id, function),
        })
    }

    /// Resolve a name to its fully qualified form if possible
    fn resolve_name(&self, name: &str) -> String {
        if let Some(target) = self.imports.get(name) {
            return target.clone();
        }

        if let Some((head, rest)) = name.split_once('.') {
            if let Some(target) = self.imports.get(head) {
                return format!("{}.{}", target, rest);
            }
            if self.local_symbols.contains(head) {
                return format!("{}:{}", self.file_id, name);
            }
        }

        if self.local_symbols.contains(name) {
            return format!("{}:{}", self.file_id, name);
        }

        // External reference
        name.to_string()
    }

    fn confidence(&self, name: &str, raw_expression: &str) -> Confidence {
        let head = name.split('.').next().unwrap_or(name);
        let known = |n: &str| self.imports.contains_key(n) || self.local_symbols.contains(n);

        if known(name) || known(head) {
            return Confidence::High;
        }

        if self
            .config
            .unsafe_markers
            .iter()
            .any(|m| raw_expression.contains(m.as_str()))
        {
            return Confidence::Unsafe;
        }

        Confidence::Medium
    }

    fn text(&self, node: Node) -> &'a str {
        &self.source[node.byte_range()]
    }
}

/// Normalize docstring indentation the way Python's `inspect.cleandoc` does
fn clean_docstring(raw: &str) -> String {
    let lines: Vec<&str> = raw.lines().collect();
    let margin = lines
        .iter()
        .skip(1)
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);

    let cleaned: Vec<&str> = lines
        .iter()
        .enumerate()
        .map(|(i, line)| {
            if i == 0 {
                line.trim_start()
            } else {
                line.get(margin..).unwrap_or("").trim_end()
            }
        })
        .collect();

    let start = cleaned.iter().position(|l| !l.trim().is_empty());
    let end = cleaned.iter().rposition(|l| !l.trim().is_empty());
    match (start, end) {
        (Some(start), Some(end)) => cleaned[start..=end].join("\n"),
        _ => String::new(),
    }
}
