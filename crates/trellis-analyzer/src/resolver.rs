//! Dependency resolution: which source files a file needs declarations from

use crate::config::AnalysisConfig;
use crate::error::{ConfigError, ResolveError};
use globset::GlobSet;
use ignore::WalkBuilder;
use rayon::prelude::*;
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::path::{Component, Path, PathBuf};
use trellis_core::Project;

/// Everything the graph is built from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedProject {
    /// Every source file, canonical and sorted.
    pub files: Vec<PathBuf>,
    /// `(dependent, dependency)` pairs between files in `files`.
    pub edges: Vec<(PathBuf, PathBuf)>,
    /// References that do not map to a project file, per referencing file.
    pub external: BTreeMap<PathBuf, Vec<String>>,
    /// Project-internal references whose target file does not exist, per referencing file.
    pub missing: BTreeMap<PathBuf, Vec<PathBuf>>,
}

/// Emits the file-level dependency edges of a project.
pub trait DependencyResolver: Send + Sync {
    fn build_graph(&self, project: &Project) -> Result<ResolvedProject, ResolveError>;
}

/// Default resolver: walks the source directory and follows
/// `import`, `export` and `part` directives.
#[derive(Debug, Clone)]
pub struct ImportResolver {
    extensions: Vec<String>,
    excludes: GlobSet,
    directive: Regex,
}

/// Where a directive URI points.
#[derive(Debug, PartialEq, Eq)]
enum Reference {
    Internal(PathBuf),
    External,
}

impl ImportResolver {
    pub fn from_config(config: &AnalysisConfig) -> Result<Self, ConfigError> {
        Ok(ImportResolver {
            extensions: config.extensions.clone(),
            excludes: config.exclude_matcher()?,
            directive: Regex::new(r#"(?m)^\s*(?:import|export|part)\s+['"]([^'"]+)['"]"#)?,
        })
    }

    fn discover(&self, project: &Project) -> Result<Vec<PathBuf>, ResolveError> {
        if !project.source_dir.is_dir() {
            return Err(ResolveError::Scan {
                root: project.source_dir.clone(),
                message: "not a directory".to_string(),
            });
        }

        let walker = WalkBuilder::new(&project.source_dir)
            .git_ignore(true)
            .git_exclude(true)
            .require_git(false)
            .build();

        let mut files = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("Walker error: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            let path = entry.path();
            let matches_extension = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| self.extensions.iter().any(|allowed| allowed == ext));
            if !matches_extension {
                continue;
            }
            let relative = path.strip_prefix(&project.root).unwrap_or(path);
            if self.excludes.is_match(relative) {
                tracing::debug!("Excluded {}", relative.display());
                continue;
            }
            files.push(path.canonicalize().unwrap_or_else(|_| path.to_path_buf()));
        }

        files.sort();
        files.dedup();
        Ok(files)
    }

    /// Directive URIs in source order.
    fn directives<'a>(&self, source: &'a str) -> Vec<&'a str> {
        self.directive
            .captures_iter(source)
            .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
            .collect()
    }
}

impl DependencyResolver for ImportResolver {
    fn build_graph(&self, project: &Project) -> Result<ResolvedProject, ResolveError> {
        let files = self.discover(project)?;
        let known: HashSet<&Path> = files.iter().map(PathBuf::as_path).collect();

        let per_file: Vec<(Vec<PathBuf>, Vec<String>, Vec<PathBuf>)> = files
            .par_iter()
            .map(|file| {
                let source = match std::fs::read_to_string(file) {
                    Ok(source) => source,
                    Err(e) => {
                        tracing::warn!("Cannot scan {} for imports: {}", file.display(), e);
                        return (Vec::new(), Vec::new(), Vec::new());
                    }
                };
                let mut dependencies = Vec::new();
                let mut external = Vec::new();
                let mut missing = Vec::new();
                for uri in self.directives(&source) {
                    match classify(uri, file, project) {
                        Reference::Internal(target) if known.contains(target.as_path()) => {
                            if !dependencies.contains(&target) {
                                dependencies.push(target);
                            }
                        }
                        Reference::Internal(target) => {
                            tracing::debug!("{} references missing file {}", file.display(), uri);
                            external.push(uri.to_string());
                            missing.push(target);
                        }
                        Reference::External => external.push(uri.to_string()),
                    }
                }
                (dependencies, external, missing)
            })
            .collect();

        let mut resolved = ResolvedProject::default();
        for (file, (dependencies, external, missing)) in files.iter().zip(per_file) {
            resolved
                .edges
                .extend(dependencies.into_iter().map(|dep| (file.clone(), dep)));
            if !external.is_empty() {
                resolved.external.insert(file.clone(), external);
            }
            if !missing.is_empty() {
                resolved.missing.insert(file.clone(), missing);
            }
        }
        resolved.files = files;

        tracing::debug!(
            "Resolved {} files, {} edges, {} files with external references",
            resolved.files.len(),
            resolved.edges.len(),
            resolved.external.len()
        );
        Ok(resolved)
    }
}

fn classify(uri: &str, file: &Path, project: &Project) -> Reference {
    if let Some(rest) = uri.strip_prefix("package:") {
        return match rest
            .strip_prefix(project.package_name.as_str())
            .and_then(|r| r.strip_prefix('/'))
        {
            Some(relative) => Reference::Internal(normalize(&project.source_dir.join(relative))),
            None => Reference::External,
        };
    }
    if has_scheme(uri) {
        return Reference::External;
    }
    match file.parent() {
        Some(dir) => Reference::Internal(normalize(&dir.join(uri))),
        None => Reference::External,
    }
}

/// `dart:core`, `http://...`; a colon before any slash.
fn has_scheme(uri: &str) -> bool {
    match uri.find(':') {
        Some(colon) => !uri[..colon].contains('/'),
        None => false,
    }
}

/// Resolve `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
