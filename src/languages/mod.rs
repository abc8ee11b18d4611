//! Source parsers
//!
//! This module provides the trait implemented by every source parser and
//! the registry that dispatches files to a parser by extension. Python is
//! parsed in-process with tree-sitter; JavaScript and TypeScript go through
//! an external worker process.

pub mod bridge;
pub mod python;

use std::path::Path;
use std::sync::Arc;

use crate::core::config::Config;
use crate::core::models::FileAnalysis;
use crate::error::Result;

/// Trait for source parsers
pub trait SourceParser: Send + Sync {
    /// Get the language identifier (e.g., "python", "javascript")
    fn language_id(&self) -> &str;

    /// Get handled file extensions (e.g., [".py", ".pyi"])
    fn file_extensions(&self) -> &[String];

    /// Extract nodes, edges and warnings from one file.
    ///
    /// Malformed source is reported through warnings in the output. An
    /// `Err` is reserved for failures outside the source itself, such as
    /// an unreadable file or a worker that cannot be started.
    fn parse_file(&self, path: &Path) -> Result<FileAnalysis>;

    /// Release external resources held by the parser
    fn shutdown(&self) {}
}

/// Registry mapping file extensions to parsers
pub struct ParserRegistry {
    parsers: Vec<Arc<dyn SourceParser>>,
}

impl ParserRegistry {
    /// Create a registry with the built-in parsers
    pub fn new(config: &Config) -> Self {
        let mut registry = Self::empty();

        registry.register(Arc::new(python::PythonParser::new(
            config.python.clone(),
            config.analysis.python_extensions.clone(),
        )));
        registry.register(Arc::new(bridge::WorkerParser::new(
            config.worker.clone(),
            config.analysis.bridged_extensions.clone(),
        )));

        registry
    }

    /// Create a registry without any parser
    pub fn empty() -> Self {
        Self {
            parsers: Vec::new(),
        }
    }

    /// Register a parser
    pub fn register(&mut self, parser: Arc<dyn SourceParser>) {
        self.parsers.push(parser);
    }

    /// Get a parser by file extension, with or without the leading dot
    pub fn get_by_extension(&self, extension: &str) -> Option<&Arc<dyn SourceParser>> {
        let ext = if extension.starts_with('.') {
            extension.to_ascii_lowercase()
        } else {
            format!(".{}", extension.to_ascii_lowercase())
        };

        self.parsers
            .iter()
            .find(|p| p.file_extensions().iter().any(|e| *e == ext))
    }

    /// Get the parser responsible for a path
    pub fn for_path(&self, path: &Path) -> Option<&Arc<dyn SourceParser>> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(|e| self.get_by_extension(e))
    }

    /// Check if a path has a supported extension
    pub fn is_supported(&self, path: &Path) -> bool {
        self.for_path(path).is_some()
    }

    /// List all registered parsers
    pub fn list_parsers(&self) -> &[Arc<dyn SourceParser>] {
        &self.parsers
    }

    /// Stop every parser that owns external resources
    pub fn shutdown(&self) {
        for parser in &self.parsers {
            parser.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_registry() {
        let registry = ParserRegistry::empty();
        assert!(registry.list_parsers().is_empty());
        assert!(!registry.is_supported(Path::new("a.py")));
    }

    #[test]
    fn test_dispatch_by_extension() {
        let registry = ParserRegistry::new(&Config::default());

        assert_eq!(registry.get_by_extension("py").unwrap().language_id(), "python");
        assert_eq!(registry.get_by_extension(".PYI").unwrap().language_id(), "python");
        assert_eq!(
            registry.for_path(Path::new("src/app.tsx")).unwrap().language_id(),
            "javascript"
        );
        assert!(registry.for_path(Path::new("README.md")).is_none());
        assert!(registry.for_path(Path::new("Makefile")).is_none());
    }
}
