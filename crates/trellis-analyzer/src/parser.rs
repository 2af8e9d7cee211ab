//! Parser collaborator contract

use crate::error::ParseError;
use std::path::Path;
use trellis_core::{Declaration, Diagnostic, ParseTree, SymbolTable};

/// What one successful resolve step produces.
#[derive(Debug, Clone, Default)]
pub struct ParsedFile {
    pub declarations: Vec<Declaration>,
    pub diagnostics: Vec<Diagnostic>,
    pub tree: Option<ParseTree>,
}

/// Resolves a single file.
///
/// `symbols` already holds the declarations of every file this one depends
/// on. Implementations must not insert into it; the orchestrator registers
/// the returned declarations itself.
pub trait SourceParser: Send + Sync {
    fn resolve(&self, path: &Path, symbols: &SymbolTable) -> Result<ParsedFile, ParseError>;
}

/// Read a source file as UTF-8.
pub fn read_source(path: &Path) -> Result<String, ParseError> {
    let bytes = std::fs::read(path).map_err(|source| ParseError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    String::from_utf8(bytes).map_err(|_| ParseError::InvalidUtf8 { path: path.to_path_buf() })
}
