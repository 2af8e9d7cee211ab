//! JSON run reports

use crate::coordinator::AnalysisResult;
use crate::error::ReportError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use trellis_core::{Diagnostic, RunStatistics, Severity};

#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub path: String,
    pub changed: bool,
    pub declarations: Vec<String>,
    pub errors: usize,
    pub warnings: usize,
    pub diagnostics: Vec<Diagnostic>,
}

/// Summary of one run. Paths are relative to the project root.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub generated_at: DateTime<Utc>,
    pub package: String,
    pub order: Vec<String>,
    pub changed: Vec<String>,
    pub files: Vec<FileReport>,
    pub failures: BTreeMap<String, String>,
    pub cycles: Vec<Vec<String>>,
    pub external: BTreeMap<String, Vec<String>>,
    pub statistics: RunStatistics,
    pub cancelled: bool,
}

impl RunReport {
    pub fn from_result(result: &AnalysisResult) -> Self {
        let root = result.project.root.as_path();
        let rel = |path: &Path| relative(root, path);

        let mut changed: Vec<String> = result.change_set.iter().map(|p| rel(p)).collect();
        changed.sort();

        let files = result
            .results
            .values()
            .map(|r| FileReport {
                path: rel(&r.path),
                changed: r.changed,
                declarations: r.declarations.iter().map(|d| d.name.clone()).collect(),
                errors: count(&r.diagnostics, Severity::Error),
                warnings: count(&r.diagnostics, Severity::Warning),
                diagnostics: r.diagnostics.clone(),
            })
            .collect();

        RunReport {
            generated_at: Utc::now(),
            package: result.project.package_name.clone(),
            order: result.order.iter().map(|p| rel(p)).collect(),
            changed,
            files,
            failures: result
                .failures
                .iter()
                .map(|(path, reason)| (rel(path), reason.clone()))
                .collect(),
            cycles: result
                .cycles
                .iter()
                .map(|cycle| cycle.iter().map(|p| rel(p)).collect())
                .collect(),
            external: result
                .external
                .iter()
                .map(|(path, refs)| (rel(path), refs.clone()))
                .collect(),
            statistics: result.statistics.clone(),
            cancelled: result.cancelled,
        }
    }
}

/// Write `report` to `<dir>/analysis-<timestamp>.json` and return the path.
pub fn write_report(dir: &Path, report: &RunReport) -> Result<PathBuf, ReportError> {
    std::fs::create_dir_all(dir).map_err(|source| ReportError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let name = format!("analysis-{}.json", report.generated_at.format("%Y%m%d-%H%M%S-%3f"));
    let path = dir.join(name);
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(&path, json).map_err(|source| ReportError::Io {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

fn relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

fn count(diagnostics: &[Diagnostic], severity: Severity) -> usize {
    diagnostics.iter().filter(|d| d.severity == severity).count()
}
