//! Incremental analysis: change detection, dependency resolution and ordered file resolution

pub mod change;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod hashing;
pub mod parser;
pub mod report;
pub mod resolver;
pub mod scanner;


#[cfg(test)]
pub mod test_utils;

pub use change::{prune_stale, ChangeDetector, ChangeReport};
pub use config::{AnalysisConfig, CONFIG_FILE, DEFAULT_EXCLUDES};
pub use coordinator::{AnalysisResult, CancellationToken, Orchestrator};
pub use error::{AnalysisError, ConfigError, ParseError, ReportError, ResolveError};
pub use parser::{ParsedFile, SourceParser};
pub use report::{write_report, FileReport, RunReport};
pub use resolver::{DependencyResolver, ImportResolver, ResolvedProject};
pub use scanner::{DeclarationScanner, LineIndex};
