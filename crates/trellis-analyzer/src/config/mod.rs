//! Analysis configuration: `trellis.toml` plus environment overrides

use crate::error::ConfigError;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Optional config file at the project root.
pub const CONFIG_FILE: &str = "trellis.toml";

/// Generated, build and test artifacts never enter the graph.
pub const DEFAULT_EXCLUDES: &[&str] = &[
    "**/*.g.dart",
    "**/*.freezed.dart",
    "**/generated/**",
    "**/build/**",
    "**/.dart_tool/**",
    "**/test/**",
    "**/*_test.dart",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Upper bound on concurrently resolved files; 0 uses available parallelism.
    pub max_parallelism: usize,
    pub enable_cache: bool,
    pub verbose_logging: bool,
    pub exclude_patterns: Vec<String>,
    pub source_dir: String,
    pub manifest: String,
    pub extensions: Vec<String>,
    /// Relative to the project root.
    pub cache_dir: PathBuf,
    /// Relative to the project root.
    pub reports_dir: PathBuf,
    /// Fail the run on any dependency cycle instead of ordering best-effort.
    pub strict_cycles: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        AnalysisConfig {
            max_parallelism: 0,
            enable_cache: true,
            verbose_logging: false,
            exclude_patterns: DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect(),
            source_dir: "lib".to_string(),
            manifest: "pubspec.yaml".to_string(),
            extensions: vec!["dart".to_string()],
            cache_dir: PathBuf::from(trellis_core::CACHE_DIR),
            reports_dir: Path::new(trellis_core::CACHE_DIR).join("reports"),
            strict_cycles: false,
        }
    }
}

impl AnalysisConfig {
    /// Load `trellis.toml` from `root` (defaults when absent), then apply
    /// `TRELLIS_*` environment overrides.
    pub fn load(root: &Path) -> Result<Self, ConfigError> {
        let path = root.join(CONFIG_FILE);
        let mut config = match std::fs::read_to_string(&path) {
            Ok(text) => toml::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => AnalysisConfig::default(),
            Err(source) => return Err(ConfigError::Read { path, source }),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply overrides from a key lookup (the environment, in production).
    /// Unparseable values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(value) = lookup("TRELLIS_MAX_PARALLELISM") {
            match value.trim().parse() {
                Ok(n) => self.max_parallelism = n,
                Err(_) => tracing::warn!("Ignoring TRELLIS_MAX_PARALLELISM={}", value),
            }
        }
        if let Some(value) = lookup("TRELLIS_ENABLE_CACHE") {
            match parse_bool(&value) {
                Some(b) => self.enable_cache = b,
                None => tracing::warn!("Ignoring TRELLIS_ENABLE_CACHE={}", value),
            }
        }
        if let Some(value) = lookup("TRELLIS_VERBOSE") {
            match parse_bool(&value) {
                Some(b) => self.verbose_logging = b,
                None => tracing::warn!("Ignoring TRELLIS_VERBOSE={}", value),
            }
        }
    }

    pub fn effective_parallelism(&self) -> usize {
        if self.max_parallelism == 0 {
            std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(1)
        } else {
            self.max_parallelism
        }
    }

    /// Compile `exclude_patterns`. Patterns match paths relative to the project root.
    pub fn exclude_matcher(&self) -> Result<GlobSet, ConfigError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.exclude_patterns {
            builder.add(Glob::new(pattern)?);
        }
        Ok(builder.build()?)
    }

    pub fn cache_path(&self, root: &Path) -> PathBuf {
        root.join(&self.cache_dir)
    }

    pub fn reports_path(&self, root: &Path) -> PathBuf {
        root.join(&self.reports_dir)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
