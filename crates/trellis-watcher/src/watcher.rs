//! Filesystem watcher driving re-entrant analysis runs

use anyhow::{Context, Result};
use globset::GlobSet;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use trellis_analyzer::{AnalysisConfig, AnalysisError, AnalysisResult, Orchestrator};

/// Quiet period after the last event before a run starts.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

/// Events emitted by the file watcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Created(PathBuf),
    Modified(PathBuf),
    Removed(PathBuf),
}

impl WatchEvent {
    pub fn path(&self) -> &Path {
        match self {
            WatchEvent::Created(p) | WatchEvent::Modified(p) | WatchEvent::Removed(p) => p,
        }
    }
}

/// Decides which paths can affect an analysis run.
#[derive(Debug, Clone)]
pub struct PathFilter {
    root: PathBuf,
    extensions: Vec<String>,
    excludes: GlobSet,
    cache_dir: PathBuf,
}

impl PathFilter {
    pub fn new(root: &Path, config: &AnalysisConfig) -> Result<Self> {
        Ok(PathFilter {
            root: root.to_path_buf(),
            extensions: config.extensions.clone(),
            excludes: config.exclude_matcher()?,
            cache_dir: config.cache_path(root),
        })
    }

    pub fn is_relevant(&self, path: &Path) -> bool {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        if path.starts_with(&self.cache_dir) || should_ignore_path(relative) {
            return false;
        }
        let matches_extension = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|allowed| allowed == ext));
        matches_extension && !self.excludes.is_match(relative)
    }
}

/// File system watcher for monitoring source changes
pub struct FileWatcher {
    watcher: RecommendedWatcher,
    event_rx: mpsc::UnboundedReceiver<WatchEvent>,
    watched_paths: HashSet<PathBuf>,
}

impl FileWatcher {
    /// Create a watcher that forwards events for paths `filter` accepts.
    pub fn new(filter: PathFilter) -> Result<Self> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let filter = Arc::new(filter);

        let watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
            Ok(event) => {
                debug!("File system event: {:?}", event);
                Self::handle_notify_event(event, &filter, &event_tx);
            }
            Err(e) => error!("File system watch error: {}", e),
        })?;

        Ok(Self {
            watcher,
            event_rx,
            watched_paths: HashSet::new(),
        })
    }

    fn handle_notify_event(event: notify::Event, filter: &PathFilter, event_tx: &mpsc::UnboundedSender<WatchEvent>) {
        let make: fn(PathBuf) -> WatchEvent = match event.kind {
            notify::EventKind::Create(_) => WatchEvent::Created,
            notify::EventKind::Modify(_) => WatchEvent::Modified,
            notify::EventKind::Remove(_) => WatchEvent::Removed,
            _ => return,
        };
        for path in event.paths {
            if !filter.is_relevant(&path) {
                continue;
            }
            if let Err(e) = event_tx.send(make(path)) {
                warn!("Failed to forward watch event: {}", e);
            }
        }
    }

    /// Watch a directory recursively
    pub fn watch_directory(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        info!("Watching directory: {}", path.display());

        self.watcher.watch(path, RecursiveMode::Recursive)?;
        self.watched_paths.insert(path.to_path_buf());
        Ok(())
    }

    pub fn unwatch(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.watcher.unwatch(path)?;
        self.watched_paths.remove(path);
        Ok(())
    }

    pub fn is_watching(&self, path: &Path) -> bool {
        self.watched_paths.contains(path)
    }

    /// Wait for the next event, then keep absorbing events until `quiet`
    /// passes without one. Returns `None` once the watcher is closed.
    pub async fn next_batch(&mut self, quiet: Duration) -> Option<Vec<WatchEvent>> {
        let mut batch = vec![self.event_rx.recv().await?];
        while let Ok(Some(event)) = tokio::time::timeout(quiet, self.event_rx.recv()).await {
            batch.push(event);
        }
        Some(batch)
    }
}

/// Re-runs the orchestrator against the persisted cache whenever sources change.
pub struct AnalysisWatcher {
    root: PathBuf,
    orchestrator: Arc<Orchestrator>,
    debounce: Duration,
}

impl AnalysisWatcher {
    pub fn new(root: impl AsRef<Path>, orchestrator: Arc<Orchestrator>) -> Self {
        AnalysisWatcher {
            root: root.as_ref().to_path_buf(),
            orchestrator,
            debounce: DEFAULT_DEBOUNCE,
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Run once immediately, then once per debounced batch of changes.
    /// Every run's outcome is sent on `results`; returns when the receiver is dropped.
    pub async fn run(self, results: mpsc::Sender<Result<AnalysisResult, AnalysisError>>) -> Result<()> {
        let root = self
            .root
            .canonicalize()
            .with_context(|| format!("Cannot watch {}", self.root.display()))?;
        let config = self.orchestrator.config();
        let filter = PathFilter::new(&root, config)?;
        let mut watcher = FileWatcher::new(filter)?;
        watcher.watch_directory(root.join(&config.source_dir))?;

        if !self.analyze(&root, &results).await? {
            return Ok(());
        }

        while let Some(batch) = watcher.next_batch(self.debounce).await {
            let changed: HashSet<&Path> = batch.iter().map(WatchEvent::path).collect();
            info!("{} files changed, re-running analysis", changed.len());
            if !self.analyze(&root, &results).await? {
                break;
            }
        }
        Ok(())
    }

    /// Returns false once nobody is listening.
    async fn analyze(&self, root: &Path, results: &mpsc::Sender<Result<AnalysisResult, AnalysisError>>) -> Result<bool> {
        let orchestrator = Arc::clone(&self.orchestrator);
        let root = root.to_path_buf();
        let outcome = tokio::task::spawn_blocking(move || orchestrator.run(&root))
            .await
            .context("Analysis task panicked")?;
        if let Err(e) = &outcome {
            warn!("Analysis failed: {}", e);
        }
        Ok(results.send(outcome).await.is_ok())
    }
}

/// Tooling and VCS directories never hold project sources.
fn should_ignore_path(path: &Path) -> bool {
    path.components().any(|component| {
        matches!(
            component.as_os_str().to_str(),
            Some(".git" | ".dart_tool" | "build" | "node_modules")
        )
    })
}
