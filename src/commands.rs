//! CLI command implementations

use anyhow::{bail, Context};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use trellis_analyzer::{AnalysisConfig, AnalysisResult, Orchestrator};
use trellis_watcher::AnalysisWatcher;

pub async fn analyze(root: PathBuf, config: AnalysisConfig, report: bool) -> anyhow::Result<()> {
    tracing::info!("Analyzing project: {}", root.display());

    let orchestrator = Orchestrator::new(config)?.with_reports(report);
    let result = run_blocking(orchestrator, root).await?;
    print_summary(&result);
    Ok(())
}

/// Strict variant of `analyze` for CI: cycles abort, failures fail the command.
pub async fn check(root: PathBuf, mut config: AnalysisConfig) -> anyhow::Result<()> {
    config.strict_cycles = true;
    let orchestrator = Orchestrator::new(config)?;
    let result = run_blocking(orchestrator, root).await?;
    print_summary(&result);

    let errors = result.failures.len()
        + result
            .results
            .values()
            .filter(|r| r.has_errors())
            .count();
    if errors > 0 {
        bail!("{} files failed analysis", errors);
    }
    Ok(())
}

pub async fn watch(root: PathBuf, config: AnalysisConfig) -> anyhow::Result<()> {
    tracing::info!("Watching project: {}", root.display());

    let orchestrator = Arc::new(Orchestrator::new(config)?);
    let (tx, mut rx) = mpsc::channel(8);
    let watcher = tokio::spawn(AnalysisWatcher::new(&root, orchestrator).run(tx));

    while let Some(outcome) = rx.recv().await {
        match outcome {
            Ok(result) => print_summary(&result),
            Err(e) => tracing::error!("Analysis failed: {}", e),
        }
    }

    watcher.await.context("Watcher task panicked")?
}

pub fn clear(root: PathBuf, config: &AnalysisConfig) -> anyhow::Result<()> {
    tracing::info!("Clearing cache for: {}", root.display());

    let cache = config.cache_path(&root);
    trellis_core::clear_cache(&cache)
        .with_context(|| format!("Failed to remove {}", cache.display()))?;

    tracing::info!("Cache cleared");
    Ok(())
}

async fn run_blocking(orchestrator: Orchestrator, root: PathBuf) -> anyhow::Result<AnalysisResult> {
    let result = tokio::task::spawn_blocking(move || orchestrator.run(&root))
        .await
        .context("Analysis task panicked")??;
    Ok(result)
}

fn print_summary(result: &AnalysisResult) {
    let root = result.project.root.as_path();
    let stats = &result.statistics;
    println!(
        "{}: {} files, {} changed, {} resolved, {} cached, {} errors ({}ms)",
        result.project.package_name,
        stats.total_files,
        result.change_set.len(),
        stats.resolved_files,
        stats.cached_files,
        stats.error_files,
        stats.elapsed_ms
    );
    println!(
        "  quick-skips: {} ({:.0}%), hashed: {}",
        stats.quick_skips,
        stats.quick_skip_rate() * 100.0,
        stats.hash_computations
    );
    for cycle in &result.cycles {
        let names: Vec<_> = cycle.iter().map(|p| display(root, p)).collect();
        println!("  cycle: {}", names.join(" -> "));
    }
    for (path, reason) in &result.failures {
        println!("  failed: {}: {}", display(root, path), reason);
    }
    for file in result.changed_results() {
        for diagnostic in &file.diagnostics {
            let line = diagnostic.line.map(|l| format!(":{l}")).unwrap_or_default();
            println!(
                "  {:?} {}{}: {}",
                diagnostic.severity,
                display(root, &file.path),
                line,
                diagnostic.message
            );
        }
    }
    if result.cancelled {
        println!("  (cancelled)");
    }
}

fn display(root: &Path, path: &Path) -> String {
    path.strip_prefix(root).unwrap_or(path).display().to_string()
}
