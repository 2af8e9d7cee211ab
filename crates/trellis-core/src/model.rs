//! Core data structures shared by every pipeline phase

use std::any::Any;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Digest of a file's normalized bytes, stored as lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn from_hex(hex: impl Into<String>) -> Self {
        ContentHash(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// What kind of top-level entity a declaration introduces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeclarationKind {
    Class,
    Mixin,
    Enum,
    TypeAlias,
    Extension,
}

/// A top-level declaration extracted from one source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Declaration {
    /// Globally unique declared name (the symbol table key).
    pub name: String,
    pub kind: DeclarationKind,
    pub file_path: PathBuf,
    pub line: Option<u32>,
    pub is_abstract: bool,
    /// `extends` target, if any.
    pub supertype: Option<String>,
    pub mixins: Vec<String>,
    pub interfaces: Vec<String>,
    /// Field and method names declared directly in the body.
    pub members: Vec<String>,
}

impl Declaration {
    pub fn new(name: impl Into<String>, kind: DeclarationKind, file_path: impl Into<PathBuf>) -> Self {
        Declaration {
            name: name.into(),
            kind,
            file_path: file_path.into(),
            line: None,
            is_abstract: false,
            supertype: None,
            mixins: Vec::new(),
            interfaces: Vec::new(),
            members: Vec::new(),
        }
    }

    /// Every type this declaration inherits from, in `extends`, `with`, `implements` order.
    pub fn supertypes(&self) -> impl Iterator<Item = &str> {
        self.supertype
            .iter()
            .chain(self.mixins.iter())
            .chain(self.interfaces.iter())
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// A message attached to one file's result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub line: Option<u32>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Diagnostic { severity: Severity::Error, message: message.into(), line: None }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Diagnostic { severity: Severity::Warning, message: message.into(), line: None }
    }

    pub fn at_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }
}

/// Opaque parse-tree handle owned by the parser collaborator.
pub type ParseTree = Arc<dyn Any + Send + Sync>;

/// Outcome of resolving a single file.
#[derive(Debug, Clone)]
pub struct FileResult {
    pub path: PathBuf,
    pub declarations: Vec<Declaration>,
    pub diagnostics: Vec<Diagnostic>,
    pub tree: Option<ParseTree>,
    /// Whether the file is in this run's change set; drives downstream code generation.
    pub changed: bool,
}

impl FileResult {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(|d| d.severity == Severity::Error)
    }
}

/// Counters for one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatistics {
    pub total_files: usize,
    /// Files in the change set that resolved successfully.
    pub resolved_files: usize,
    /// Files outside the change set that resolved successfully.
    pub cached_files: usize,
    /// Files whose resolve step failed.
    pub error_files: usize,
    pub elapsed_ms: u64,
    pub hash_computations: usize,
    pub quick_skips: usize,
}

impl RunStatistics {
    /// Fraction of examined files that bypassed hashing, in `[0, 1]`.
    pub fn quick_skip_rate(&self) -> f64 {
        let examined = self.hash_computations + self.quick_skips;
        if examined == 0 {
            return 0.0;
        }
        self.quick_skips as f64 / examined as f64
    }
}
