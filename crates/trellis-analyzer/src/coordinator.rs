//! Orchestrates one analysis run
//!
//! Phases, in order: build the dependency graph, compute the change set,
//! resolve files layer by layer in dependency order, persist the cache.
//! Only structural failures abort a run; a file that fails to resolve is
//! logged, counted and skipped.

use crate::change::{prune_stale, ChangeDetector, ChangeReport};
use crate::config::AnalysisConfig;
use crate::error::{AnalysisError, ConfigError, ParseError};
use crate::parser::{ParsedFile, SourceParser};
use crate::report::{write_report, RunReport};
use crate::resolver::{DependencyResolver, ImportResolver};
use crate::scanner::DeclarationScanner;
use chrono::Utc;
use rayon::prelude::*;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use trellis_core::{
    detect_project, CacheStore, DependencyGraph, Diagnostic, FileResult, JsonCacheStore,
    MemoryCacheStore, Project, RunMetadata, RunStatistics, SymbolTable,
};

/// Stops a run between files. Clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear the flag so the next run can proceed.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Everything one run hands to output generation.
#[derive(Debug, Clone)]
pub struct AnalysisResult {
    pub project: Project,
    /// Resolution order: every file after the files it depends on.
    pub order: Vec<PathBuf>,
    pub change_set: HashSet<PathBuf>,
    /// Successfully resolved files.
    pub results: BTreeMap<PathBuf, FileResult>,
    /// Files whose resolve step failed, with the reason.
    pub failures: BTreeMap<PathBuf, String>,
    pub graph: Arc<DependencyGraph>,
    pub cycles: Vec<Vec<PathBuf>>,
    pub external: BTreeMap<PathBuf, Vec<String>>,
    pub symbols: Arc<SymbolTable>,
    pub statistics: RunStatistics,
    /// The run was stopped before every file was attempted.
    pub cancelled: bool,
}

impl AnalysisResult {
    /// Results that downstream code generation must process.
    pub fn changed_results(&self) -> impl Iterator<Item = &FileResult> {
        self.results.values().filter(|r| r.changed)
    }
}

enum Outcome {
    Skipped,
    Resolved {
        parsed: ParsedFile,
        shadowed: Vec<(String, PathBuf)>,
    },
    Failed(ParseError),
}

pub struct Orchestrator {
    config: AnalysisConfig,
    resolver: Arc<dyn DependencyResolver>,
    parser: Arc<dyn SourceParser>,
    write_reports: bool,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// Orchestrator with the default import resolver and declaration scanner.
    pub fn new(config: AnalysisConfig) -> Result<Self, ConfigError> {
        let resolver = Arc::new(ImportResolver::from_config(&config)?);
        let parser = Arc::new(DeclarationScanner::new()?);
        Ok(Orchestrator {
            config,
            resolver,
            parser,
            write_reports: false,
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn DependencyResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_parser(mut self, parser: Arc<dyn SourceParser>) -> Self {
        self.parser = parser;
        self
    }

    /// Write a JSON run report under the configured reports directory after each run.
    pub fn with_reports(mut self, enabled: bool) -> Self {
        self.write_reports = enabled;
        self
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Analyze the project at `root` against its persisted cache.
    pub fn run(&self, root: &Path) -> Result<AnalysisResult, AnalysisError> {
        let project = detect_project(root, &self.config.manifest, &self.config.source_dir)
            .inspect_err(|e| tracing::error!("Cannot analyze {}: {}", root.display(), e))?;

        let result = if self.config.enable_cache {
            let mut store = JsonCacheStore::open(&self.config.cache_path(&project.root));
            self.run_with_store(&project, &mut store)?
        } else {
            self.run_with_store(&project, &mut MemoryCacheStore::new())?
        };

        if self.write_reports {
            let dir = self.config.reports_path(&project.root);
            match write_report(&dir, &RunReport::from_result(&result)) {
                Ok(path) => tracing::info!("Report written to {}", path.display()),
                Err(e) => tracing::warn!("Failed to write report: {}", e),
            }
        }
        Ok(result)
    }

    /// Analyze an already validated project against `store`.
    pub fn run_with_store(
        &self,
        project: &Project,
        store: &mut dyn CacheStore,
    ) -> Result<AnalysisResult, AnalysisError> {
        let started = Instant::now();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.effective_parallelism())
            .build()?;

        // Phase 1: dependency graph and resolution order
        let phase = Instant::now();
        let resolved = pool.install(|| self.resolver.build_graph(project))?;
        let graph = DependencyGraph::from_edges(&resolved.files, &resolved.edges);
        let cycles = graph.detect_cycles();
        for cycle in &cycles {
            tracing::warn!("Dependency cycle: {}", display_cycle(cycle, &project.root));
        }
        let order = graph
            .topological_sort(self.config.strict_cycles)
            .inspect_err(|e| tracing::error!("Aborting analysis: {}", e))?;
        tracing::info!(
            "Built dependency graph: {} files, {} edges, {} cycles in {:?}",
            graph.len(),
            graph.edge_count(),
            cycles.len(),
            phase.elapsed()
        );

        // Phase 2: change set
        let phase = Instant::now();
        let changes = if self.config.enable_cache {
            let reader: &dyn CacheStore = &*store;
            pool.install(|| {
                ChangeDetector::new(&graph)
                    .with_missing(&resolved.missing)
                    .detect(&order, reader)
            })
        } else {
            ChangeReport::all_changed(&order)
        };
        tracing::info!(
            "Change set: {} of {} files in {:?}",
            changes.change_set.len(),
            order.len(),
            phase.elapsed()
        );

        // Phase 3: resolve in dependency order
        let phase = Instant::now();
        let symbols = Arc::new(SymbolTable::new());
        let mut statistics = RunStatistics {
            total_files: order.len(),
            hash_computations: changes.hash_computations,
            quick_skips: changes.quick_skips,
            ..RunStatistics::default()
        };
        let mut results = BTreeMap::new();
        let mut failures = BTreeMap::new();
        let mut cancelled = false;

        for layer in graph.layers(&order) {
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            let outcomes: Vec<(PathBuf, Outcome)> = pool.install(|| {
                layer
                    .into_par_iter()
                    .map(|path| {
                        let outcome = self.resolve_file(&path, &symbols);
                        (path, outcome)
                    })
                    .collect()
            });

            for (path, outcome) in outcomes {
                match outcome {
                    Outcome::Skipped => cancelled = true,
                    Outcome::Resolved { parsed, shadowed } => {
                        let changed = changes.contains(&path);
                        if changed {
                            statistics.resolved_files += 1;
                        } else {
                            statistics.cached_files += 1;
                        }
                        if self.config.enable_cache {
                            changes.commit(&path, store);
                        }

                        let mut diagnostics = parsed.diagnostics;
                        for (name, previous) in shadowed {
                            tracing::warn!(
                                "`{}` in {} shadows the declaration in {}",
                                name,
                                path.display(),
                                previous.display()
                            );
                            diagnostics.push(Diagnostic::warning(format!(
                                "`{}` is also declared in {}",
                                name,
                                previous.display()
                            )));
                        }
                        results.insert(
                            path.clone(),
                            FileResult {
                                path,
                                declarations: parsed.declarations,
                                diagnostics,
                                tree: parsed.tree,
                                changed,
                            },
                        );
                    }
                    Outcome::Failed(error) => {
                        tracing::warn!("Skipping {}: {}", path.display(), error);
                        statistics.error_files += 1;
                        // A fallback identity never matches real content, so it is safe to keep.
                        if self.config.enable_cache && changes.unreadable.contains(&path) {
                            changes.commit(&path, store);
                        }
                        failures.insert(path, error.to_string());
                    }
                }
            }
        }
        if cancelled {
            tracing::warn!(
                "Analysis cancelled after {} of {} files",
                results.len() + failures.len(),
                order.len()
            );
        }
        tracing::info!(
            "Resolved {} files ({} errors) in {:?}",
            results.len(),
            failures.len(),
            phase.elapsed()
        );

        // Phase 4: persist
        if self.config.enable_cache {
            let phase = Instant::now();
            let pending = changes.unfinished(|path| results.contains_key(path));
            if !pending.is_empty() {
                tracing::info!("{} files left for the next run", pending.len());
            }
            store.set_pending(pending);
            if !cancelled {
                let pruned = prune_stale(store, &order);
                if pruned > 0 {
                    tracing::debug!("Pruned {} stale cache records", pruned);
                }
            }
            store.save_metadata(RunMetadata {
                last_run_timestamp: Utc::now(),
                file_count: order.len(),
                symbol_count: symbols.len(),
            });
            match store.flush() {
                Ok(()) => tracing::info!("Cache persisted in {:?}", phase.elapsed()),
                Err(e) => tracing::warn!("Failed to persist cache: {}", e),
            }
        }

        statistics.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        tracing::info!(
            "Analysis complete: {} files, {} resolved, {} cached, {} errors, {} quick-skips, {} hashed in {}ms",
            statistics.total_files,
            statistics.resolved_files,
            statistics.cached_files,
            statistics.error_files,
            statistics.quick_skips,
            statistics.hash_computations,
            statistics.elapsed_ms
        );

        // Phase 5: hand off
        Ok(AnalysisResult {
            project: project.clone(),
            order,
            change_set: changes.change_set,
            results,
            failures,
            graph: Arc::new(graph),
            cycles,
            external: resolved.external,
            symbols,
            statistics,
            cancelled,
        })
    }

    fn resolve_file(&self, path: &Path, symbols: &SymbolTable) -> Outcome {
        if self.cancel.is_cancelled() {
            return Outcome::Skipped;
        }
        match self.parser.resolve(path, symbols) {
            Ok(parsed) => {
                tracing::debug!("Resolved {} ({} declarations)", path.display(), parsed.declarations.len());
                let shadowed = symbols.register_file(&parsed.declarations);
                Outcome::Resolved { parsed, shadowed }
            }
            Err(error) => Outcome::Failed(error),
        }
    }
}

fn display_cycle(cycle: &[PathBuf], root: &Path) -> String {
    cycle
        .iter()
        .map(|p| p.strip_prefix(root).unwrap_or(p).display().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}
