//! Symbol table for cross-file resolution

use crate::model::Declaration;
use dashmap::DashMap;
use std::path::{Path, PathBuf};

/// Declarations keyed by globally unique name. Thread-safe for concurrent insertion.
///
/// Each pipeline run owns its own table; files are registered in dependency
/// order so a lookup made while resolving a file sees its dependencies.
#[derive(Debug, Default)]
pub struct SymbolTable {
    symbols: DashMap<String, Declaration>,
    /// For fast file lookup: file path -> names declared in that file
    file_symbols: DashMap<PathBuf, Vec<String>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable {
            symbols: DashMap::new(),
            file_symbols: DashMap::new(),
        }
    }

    /// Insert a declaration. Returns the file that previously owned the name,
    /// if it was declared in a different file.
    pub fn insert(&self, declaration: Declaration) -> Option<PathBuf> {
        let name = declaration.name.clone();
        let file_path = declaration.file_path.clone();
        let previous = self.symbols.insert(name.clone(), declaration);

        let mut names = self.file_symbols.entry(file_path.clone()).or_default();
        if !names.contains(&name) {
            names.push(name);
        }
        drop(names);

        previous
            .map(|prev| prev.file_path)
            .filter(|prev_path| *prev_path != file_path)
    }

    /// Register every declaration of one file. Returns `(name, previous owner)`
    /// for each name that shadowed a declaration from another file.
    pub fn register_file(&self, declarations: &[Declaration]) -> Vec<(String, PathBuf)> {
        declarations
            .iter()
            .filter_map(|decl| {
                self.insert(decl.clone())
                    .map(|previous| (decl.name.clone(), previous))
            })
            .collect()
    }

    /// Look up a declaration by name.
    pub fn lookup(&self, name: &str) -> Option<Declaration> {
        self.symbols.get(name).map(|r| r.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.symbols.contains_key(name)
    }

    /// Get all declarations made in a file.
    pub fn declarations_in_file(&self, file_path: &Path) -> Vec<Declaration> {
        self.file_symbols
            .get(file_path)
            .map(|r| {
                r.value()
                    .iter()
                    .filter_map(|name| self.symbols.get(name).map(|d| d.value().clone()))
                    .filter(|d| d.file_path == file_path)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Remove all declarations owned by a file.
    pub fn remove_file(&self, file_path: &Path) {
        if let Some((_, names)) = self.file_symbols.remove(file_path) {
            for name in names {
                self.symbols.remove_if(&name, |_, decl| decl.file_path == file_path);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}
