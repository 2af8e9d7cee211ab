//! Error types for the pure data layer

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("unknown file in dependency graph: {}", .0.display())]
    UnknownNode(PathBuf),
    #[error("dependency cycle through {}", .node.display())]
    Cycle { node: PathBuf },
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cache serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProjectError {
    #[error("project root does not exist: {}", .0.display())]
    MissingRoot(PathBuf),
    #[error("no {manifest} found in {}", .root.display())]
    MissingManifest { root: PathBuf, manifest: String },
    #[error("source directory does not exist: {}", .0.display())]
    MissingSourceDir(PathBuf),
}
