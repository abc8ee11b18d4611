//! Cross-file reference resolution
//!
//! Parsers only see one file at a time, so an import or call of another
//! project module arrives as a dotted name such as `pkg.models.User`, or
//! `.models.User` for a relative import. Once every file is parsed those
//! names are mapped back onto the project's own file and symbol nodes.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::core::models::{split_node_id, GraphEdge};

/// Maps dotted module names to the file keys that define them
#[derive(Debug, Default)]
pub struct ModuleIndex {
    root: PathBuf,
    /// Module paths from the project root and from each source root
    modules: HashMap<String, String>,
}

impl ModuleIndex {
    /// Index the files under `root` whose extension is in `extensions`.
    ///
    /// A file is importable by its path from the project root, and also by
    /// its path from any of `source_roots` that contains it.
    pub fn build<'a, I>(root: &Path, files: I, extensions: &[String], source_roots: &[String]) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut index = Self {
            root: root.to_path_buf(),
            modules: HashMap::new(),
        };

        for file in files {
            let path = Path::new(file);
            let has_extension = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| extensions.iter().any(|x| x.trim_start_matches('.') == e));
            if !has_extension {
                continue;
            }
            let Ok(relative) = path.strip_prefix(root) else {
                continue;
            };

            if let Some(name) = module_name(relative) {
                index.modules.insert(name, file.to_string());
            }
            for source_root in source_roots {
                let Ok(inner) = relative.strip_prefix(source_root) else {
                    continue;
                };
                // Root-relative names win over source-root ones
                if let Some(name) = module_name(inner) {
                    index.modules.entry(name).or_insert_with(|| file.to_string());
                }
            }
        }

        debug!("Indexed {} project modules", index.modules.len());
        index
    }

    /// File key defining an absolute dotted module name
    pub fn lookup(&self, module: &str) -> Option<&str> {
        self.modules.get(module).map(String::as_str)
    }

    /// Map a dotted reference made from `from_file` onto a project node id.
    ///
    /// The longest module prefix that names a project file wins. A bare
    /// module resolves to its file node; `module.rest` resolves to
    /// `<file>:rest` only if `exists` reports that node. References with
    /// leading dots are relative to the package of `from_file`.
    pub fn resolve(
        &self,
        target: &str,
        from_file: &str,
        exists: impl Fn(&str) -> bool,
    ) -> Option<String> {
        if target.is_empty() || target.contains([':', '/', '\\']) || exists(target) {
            return None;
        }

        let dotted = target.trim_start_matches('.');
        let level = target.len() - dotted.len();
        let mut parts: Vec<&str> = if dotted.is_empty() {
            Vec::new()
        } else {
            dotted.split('.').collect()
        };

        let package = if level == 0 {
            Vec::new()
        } else {
            self.package_of(from_file, level)?
        };
        let min_split = if package.is_empty() { 1 } else { 0 };
        let mut full: Vec<&str> = package.iter().map(String::as_str).collect();
        let base = full.len();
        full.append(&mut parts);

        for split in (base + min_split..=full.len()).rev() {
            let Some(file) = self.lookup(&full[..split].join(".")) else {
                continue;
            };
            if split == full.len() {
                return Some(file.to_string());
            }
            let candidate = format!("{}:{}", file, full[split..].join("."));
            if exists(&candidate) {
                return Some(candidate);
            }
        }

        None
    }

    /// Package reached by a relative import with `level` leading dots
    fn package_of(&self, from_file: &str, level: usize) -> Option<Vec<String>> {
        let relative = Path::new(from_file).strip_prefix(&self.root).ok()?;
        let mut package: Vec<String> = relative
            .parent()
            .into_iter()
            .flat_map(|p| p.components())
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        for _ in 1..level {
            package.pop()?;
        }
        Some(package)
    }
}

/// Dotted module name of a path relative to an import root
fn module_name(relative: &Path) -> Option<String> {
    let mut parts: Vec<String> = relative
        .parent()
        .into_iter()
        .flat_map(|p| p.components())
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if let Some(stem) = relative.file_stem().and_then(|s| s.to_str()) {
        if stem != "__init__" {
            parts.push(stem.to_string());
        }
    }
    (!parts.is_empty()).then(|| parts.join("."))
}

/// Rewrite edge targets that name project modules or their symbols
pub fn resolve_edges(
    edges: &[GraphEdge],
    index: &ModuleIndex,
    known: &HashSet<&str>,
) -> Vec<GraphEdge> {
    let mut resolved = 0usize;
    let edges = edges
        .iter()
        .map(|edge| {
            let mut edge = edge.clone();
            let from_file = split_node_id(&edge.from_node).0;
            if let Some(target) = index.resolve(&edge.to_node, from_file, |id| known.contains(id)) {
                edge.to_node = target;
                resolved += 1;
            }
            edge
        })
        .collect();

    debug!("Resolved {} cross-file references", resolved);
    edges
}
