//! Configuration management for the analysis engine

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for the engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Project walking and graph assembly
    pub analysis: AnalysisConfig,

    /// In-process Python parser
    pub python: PythonConfig,

    /// Worker process for the bridged JavaScript/TypeScript parser
    pub worker: WorkerConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Project analysis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Directory names skipped while walking a project. Entries starting
    /// with `*` match by suffix.
    pub ignore_dirs: Vec<String>,

    /// Extensions handled by the Python parser
    pub python_extensions: Vec<String>,

    /// Extensions handled by the worker parser
    pub bridged_extensions: Vec<String>,

    /// Directories below the project root that Python imports resolve from,
    /// in addition to the root itself
    pub source_roots: Vec<String>,

    /// Circular dependencies reported as warnings
    pub max_cycle_warnings: usize,

    /// Nodes of a cycle shown in its warning text
    pub cycle_display_len: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            ignore_dirs: [
                "__pycache__",
                "node_modules",
                ".git",
                ".venv",
                "venv",
                ".tox",
                "dist",
                "build",
                ".mypy_cache",
                ".pytest_cache",
                ".ruff_cache",
                "env",
                ".env",
                "site-packages",
                ".idea",
                ".vscode",
                "coverage",
                ".coverage",
                "htmlcov",
                ".eggs",
                "*.egg-info",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            python_extensions: vec![".py".to_string(), ".pyi".to_string()],
            bridged_extensions: [".js", ".jsx", ".ts", ".tsx"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            source_roots: vec!["src".to_string()],
            max_cycle_warnings: 10,
            cycle_display_len: 5,
        }
    }
}

impl AnalysisConfig {
    /// Check whether a directory name is on the ignore list
    pub fn is_ignored_dir(&self, name: &str) -> bool {
        self.ignore_dirs.iter().any(|pattern| match pattern.strip_prefix('*') {
            Some(suffix) => name.ends_with(suffix),
            None => pattern == name,
        })
    }
}

/// Python parser configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PythonConfig {
    /// Callees that never produce a call edge
    pub builtin_denylist: Vec<String>,

    /// Substrings of a callee expression that mark it as dynamic dispatch
    pub unsafe_markers: Vec<String>,
}

impl Default for PythonConfig {
    fn default() -> Self {
        Self {
            builtin_denylist: [
                "print", "len", "str", "int", "float", "bool", "list", "dict", "set", "tuple",
                "range", "enumerate", "zip", "map", "filter", "sorted", "reversed", "min", "max",
                "sum", "any", "all", "isinstance", "issubclass", "hasattr", "getattr", "setattr",
                "delattr", "type", "id", "repr", "open", "super",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            unsafe_markers: ["getattr", "eval", "exec", "["]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Parser worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Executable used to run the worker
    pub program: String,

    /// Arguments passed to the executable
    pub args: Vec<String>,

    /// Directory the worker runs in, so relative script paths in `args`
    /// resolve against it. Relative values are taken from the directory of
    /// the config file; unset means the directory of the config file, or
    /// the current directory when no file was loaded.
    pub working_dir: Option<PathBuf>,

    /// Maximum wait for one response line
    pub response_timeout_ms: u64,

    /// Wait after the terminate signal before the worker is killed
    pub shutdown_grace_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            program: "node".to_string(),
            args: vec!["js-parser/parser.js".to_string()],
            working_dir: None,
            response_timeout_ms: 30_000,
            shutdown_grace_ms: 5_000,
        }
    }
}

impl WorkerConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (compact, pretty, full)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;

        // A bare file name has an empty parent: the current directory
        if let Some(base) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            config.worker.working_dir = Some(match config.worker.working_dir.take() {
                Some(dir) if dir.is_relative() => base.join(dir),
                Some(dir) => dir,
                None => base.to_path_buf(),
            });
        }
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
