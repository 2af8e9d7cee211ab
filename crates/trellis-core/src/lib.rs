//! Trellis Core — dependency graph, symbol table, cache records and project model

pub mod cache;
pub mod error;
pub mod graph;
pub mod model;
pub mod symbols;
pub mod workspace;


#[cfg(test)]
pub mod test_utils;

pub use cache::{
    cache_dir, clear_cache, CacheData, CacheEntry, CacheStore, JsonCacheStore, MemoryCacheStore,
    RunMetadata, CACHE_DIR, CACHE_FILE, CACHE_VERSION,
};
pub use error::{CacheError, GraphError, ProjectError};
pub use graph::{DependencyGraph, FileNode};
pub use model::{
    ContentHash, Declaration, DeclarationKind, Diagnostic, FileResult, ParseTree, RunStatistics,
    Severity,
};
pub use symbols::SymbolTable;
pub use workspace::{detect_project, ManifestKind, Project};
