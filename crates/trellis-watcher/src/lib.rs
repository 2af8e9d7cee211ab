//! Watch mode: re-run analysis when source files change

pub mod watcher;

pub use watcher::{AnalysisWatcher, FileWatcher, PathFilter, WatchEvent, DEFAULT_DEBOUNCE};
