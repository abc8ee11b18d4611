//! Source discovery and fingerprinting

use std::path::{Component, Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::core::config::AnalysisConfig;
use crate::languages::ParserRegistry;

/// Collect all parseable files below `root`, sorted by path
pub fn collect_files(
    root: &Path,
    config: &AnalysisConfig,
    registry: &ParserRegistry,
) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        // The root itself may live in a hidden directory (temp dirs do)
        .filter_entry(|e| e.depth() == 0 || !is_skipped(e, config));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry under {:?}: {}", root, e);
                continue;
            }
        };

        if entry.file_type().is_file() && registry.is_supported(entry.path()) {
            files.push(normalize_path(entry.path()));
        }
    }

    files.sort();
    debug!("Collected {} source files under {:?}", files.len(), root);
    files
}

/// Hidden entries and ignored directories are not walked
fn is_skipped(entry: &DirEntry, config: &AnalysisConfig) -> bool {
    let Some(name) = entry.file_name().to_str() else {
        return false;
    };
    if name.starts_with('.') {
        return true;
    }
    entry.file_type().is_dir() && config.is_ignored_dir(name)
}

/// Lexically normalize a path so the same file always maps to one key
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// Key under which a file's nodes and edges are tracked; also its node id
pub fn path_key(path: &Path) -> String {
    normalize_path(path).to_string_lossy().into_owned()
}

/// Compute the SHA-256 hex digest of file content
pub fn fingerprint(content: &[u8]) -> String {
    let digest = Sha256::digest(content);
    format!("{:x}", digest)
}
