//! Error types for the analysis pipeline

use std::path::PathBuf;
use thiserror::Error;
use trellis_core::{GraphError, ProjectError};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid exclude pattern: {0}")]
    Glob(#[from] globset::Error),
    #[error("invalid source pattern: {0}")]
    Regex(#[from] regex::Error),
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("cannot scan source directory {}: {message}", .root.display())]
    Scan { root: PathBuf, message: String },
}

/// A single file failed to resolve. Recovered locally by the orchestrator.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{} is not valid UTF-8", .path.display())]
    InvalidUtf8 { path: PathBuf },
    #[error("{}: {message}", .path.display())]
    Syntax { path: PathBuf, message: String },
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("cannot write report {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot serialize report: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Structural failures that abort a whole run.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Project(#[from] ProjectError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("cannot start resolver threads: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}
