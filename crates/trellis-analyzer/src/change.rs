//! Incremental change detection
//!
//! Each file is checked against its cached record on its own: a matching
//! modification time skips hashing, otherwise the normalized content hash
//! decides. Any changed file drags its transitive dependents into the change
//! set, as does importing a previously cached file that has since been
//! deleted. New cache records are staged in the report and only reach the store
//! when the caller commits them, so a file that later fails to resolve keeps
//! its previous record. Files an earlier run left unresolved are stored as
//! pending and rejoin the change set, dependents included.

use crate::hashing::{fallback_identity, hash_content, modified_millis};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use trellis_core::{CacheEntry, CacheStore, DependencyGraph};

/// Outcome of the local check for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
enum FileCheck {
    Missing,
    QuickSkip,
    /// Same content under a new modification time.
    Touched(CacheEntry),
    Modified(CacheEntry),
    Unreadable(CacheEntry),
}

impl FileCheck {
    fn is_changed(&self) -> bool {
        matches!(self, FileCheck::Missing | FileCheck::Modified(_) | FileCheck::Unreadable(_))
    }

    fn hashed(&self) -> bool {
        matches!(self, FileCheck::Touched(_) | FileCheck::Modified(_))
    }

    fn staged_entry(self) -> Option<CacheEntry> {
        match self {
            FileCheck::Touched(entry) | FileCheck::Modified(entry) | FileCheck::Unreadable(entry) => Some(entry),
            FileCheck::Missing | FileCheck::QuickSkip => None,
        }
    }
}

/// The change set for one run plus the cache records waiting to be committed.
#[derive(Debug, Clone, Default)]
pub struct ChangeReport {
    pub change_set: HashSet<PathBuf>,
    /// New records for files whose stored record is out of date.
    pub staged: HashMap<PathBuf, CacheEntry>,
    pub quick_skips: usize,
    pub hash_computations: usize,
    /// Files that could not be stat'ed or read; their staged record is a fallback identity.
    pub unreadable: HashSet<PathBuf>,
    /// Cached files that no longer exist but are still imported.
    pub deleted: HashSet<PathBuf>,
    /// Files carried over from the store's pending set.
    pub carried: HashSet<PathBuf>,
}

impl ChangeReport {
    /// Every file changed, nothing staged. Used when caching is disabled.
    pub fn all_changed(files: &[PathBuf]) -> Self {
        ChangeReport {
            change_set: files.iter().cloned().collect(),
            ..ChangeReport::default()
        }
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.change_set.contains(path)
    }

    /// Write the staged record for `path`, if any, into `store`.
    pub fn commit(&self, path: &Path, store: &mut dyn CacheStore) -> bool {
        match self.staged.get(path) {
            Some(entry) => {
                store.put(path, entry.clone());
                true
            }
            None => false,
        }
    }

    /// Write every staged record into `store`.
    pub fn commit_all(&self, store: &mut dyn CacheStore) {
        for (path, entry) in &self.staged {
            store.put(path, entry.clone());
        }
    }

    /// Members of the change set for which `done` is false, sorted.
    pub fn unfinished(&self, done: impl Fn(&Path) -> bool) -> Vec<PathBuf> {
        let mut pending: Vec<PathBuf> = self
            .change_set
            .iter()
            .filter(|path| !done(path.as_path()))
            .cloned()
            .collect();
        pending.sort();
        pending
    }

    fn invalidate(&mut self, path: &Path, graph: &DependencyGraph) {
        self.change_set.insert(path.to_path_buf());
        let dependents = graph.transitive_dependents(path);
        if !dependents.is_empty() {
            tracing::debug!(
                "{} changed, invalidating {} dependents",
                path.display(),
                dependents.len()
            );
        }
        self.change_set.extend(dependents);
    }
}

/// Drop every record whose path is not in `files`, the full file set of a
/// completed run. Returns how many records were removed.
pub fn prune_stale(store: &mut dyn CacheStore, files: &[PathBuf]) -> usize {
    let live: HashSet<&Path> = files.iter().map(PathBuf::as_path).collect();
    let stale: Vec<PathBuf> = store
        .paths()
        .into_iter()
        .filter(|path| !live.contains(path.as_path()))
        .collect();
    for path in &stale {
        tracing::debug!("Dropping cache record for {}", path.display());
        store.remove(path);
    }
    stale.len()
}

pub struct ChangeDetector<'g> {
    graph: &'g DependencyGraph,
    missing: Option<&'g BTreeMap<PathBuf, Vec<PathBuf>>>,
}

impl<'g> ChangeDetector<'g> {
    pub fn new(graph: &'g DependencyGraph) -> Self {
        ChangeDetector { graph, missing: None }
    }

    /// Imports that point at files absent from the project, per importing file.
    pub fn with_missing(mut self, missing: &'g BTreeMap<PathBuf, Vec<PathBuf>>) -> Self {
        self.missing = Some(missing);
        self
    }

    /// Compute the change set for `files` against `store`.
    ///
    /// The store is only read. File checks run on the current rayon pool.
    pub fn detect(&self, files: &[PathBuf], store: &dyn CacheStore) -> ChangeReport {
        let prior: Vec<Option<CacheEntry>> = files.iter().map(|path| store.get(path)).collect();

        let checks: Vec<FileCheck> = files
            .par_iter()
            .zip(prior.par_iter())
            .map(|(path, prior)| check_file(path, prior.as_ref()))
            .collect();

        let mut report = ChangeReport::default();
        for (path, check) in files.iter().zip(checks) {
            match &check {
                FileCheck::QuickSkip => report.quick_skips += 1,
                FileCheck::Unreadable(_) => {
                    report.unreadable.insert(path.clone());
                }
                _ => {}
            }
            if check.hashed() {
                report.hash_computations += 1;
            }
            if check.is_changed() {
                report.invalidate(path, self.graph);
            }
            if let Some(entry) = check.staged_entry() {
                report.staged.insert(path.clone(), entry);
            }
        }

        for (path, targets) in self.missing.into_iter().flatten() {
            let deleted: Vec<&PathBuf> = targets.iter().filter(|t| store.get(t).is_some()).collect();
            if deleted.is_empty() {
                continue;
            }
            tracing::debug!("{} imports deleted {}", path.display(), deleted[0].display());
            report.deleted.extend(deleted.into_iter().cloned());
            report.invalidate(path, self.graph);
        }

        for path in store.pending() {
            if !self.graph.contains(&path) {
                continue;
            }
            tracing::debug!("{} was left unresolved by the previous run", path.display());
            report.invalidate(&path, self.graph);
            report.carried.insert(path);
        }

        tracing::debug!(
            "Change detection: {} of {} files changed ({} quick-skips, {} hashed, {} I/O errors, {} carried over)",
            report.change_set.len(),
            files.len(),
            report.quick_skips,
            report.hash_computations,
            report.unreadable.len(),
            report.carried.len()
        );
        report
    }
}

fn check_file(path: &Path, prior: Option<&CacheEntry>) -> FileCheck {
    let metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::debug!("{} is missing", path.display());
            return FileCheck::Missing;
        }
        Err(e) => return unreadable(path, &e),
    };
    let modified_time_millis = modified_millis(&metadata);

    if prior.is_some_and(|entry| entry.modified_time_millis == modified_time_millis) {
        return FileCheck::QuickSkip;
    }

    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => return unreadable(path, &e),
    };
    let content_hash = hash_content(&bytes);
    let entry = CacheEntry { content_hash, modified_time_millis };

    match prior {
        Some(prior) if prior.content_hash == entry.content_hash => {
            tracing::debug!("{} touched without edit", path.display());
            FileCheck::Touched(entry)
        }
        Some(_) => {
            tracing::debug!("{} content changed", path.display());
            FileCheck::Modified(entry)
        }
        None => FileCheck::Modified(entry),
    }
}

fn unreadable(path: &Path, error: &std::io::Error) -> FileCheck {
    tracing::warn!("Cannot read {}: {}; treating as changed", path.display(), error);
    FileCheck::Unreadable(CacheEntry {
        content_hash: fallback_identity(path),
        modified_time_millis: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{create_project, set_mtime};
    use trellis_core::MemoryCacheStore;

    /// a -> b -> c, all pinned to the same modification time.
    fn chain() -> (tempfile::TempDir, Vec<PathBuf>, DependencyGraph) {
        let dir = create_project(&[
            ("lib/a.dart", "import 'b.dart';\nclass A extends B {}\n"),
            ("lib/b.dart", "import 'c.dart';\nclass B extends C {}\n"),
            ("lib/c.dart", "class C {}\n"),
        ]);
        let files: Vec<PathBuf> = ["a", "b", "c"]
            .iter()
            .map(|n| dir.path().join(format!("lib/{n}.dart")))
            .collect();
        for file in &files {
            set_mtime(file, 1_000);
        }
        let graph = DependencyGraph::from_edges(
            &files,
            &[(files[0].clone(), files[1].clone()), (files[1].clone(), files[2].clone())],
        );
        (dir, files, graph)
    }

    fn first_run(files: &[PathBuf], graph: &DependencyGraph) -> MemoryCacheStore {
        let mut store = MemoryCacheStore::new();
        let report = ChangeDetector::new(graph).detect(files, &store);
        assert_eq!(report.change_set.len(), files.len());
        report.commit_all(&mut store);
        store
    }

    #[test]
    fn test_first_run_marks_everything_changed() {
        let (_dir, files, graph) = chain();
        let store = MemoryCacheStore::new();
        let report = ChangeDetector::new(&graph).detect(&files, &store);

        assert_eq!(report.change_set.len(), 3);
        assert_eq!(report.hash_computations, 3);
        assert_eq!(report.quick_skips, 0);
        assert_eq!(report.staged.len(), 3);
        assert!(store.data().is_empty());
    }

    #[test]
    fn test_change_propagates_to_transitive_dependents() {
        let (_dir, files, graph) = chain();
        let store = first_run(&files, &graph);

        std::fs::write(&files[2], "class C { int x = 1; }\n").unwrap();
        set_mtime(&files[2], 2_000);
        let report = ChangeDetector::new(&graph).detect(&files, &store);

        let expected: HashSet<PathBuf> = files.iter().cloned().collect();
        assert_eq!(report.change_set, expected);
        assert_eq!(report.hash_computations, 1);
        assert_eq!(report.quick_skips, 2);
    }

    #[test]
    fn test_change_in_root_file_stays_local() {
        let (_dir, files, graph) = chain();
        let store = first_run(&files, &graph);

        std::fs::write(&files[0], "import 'b.dart';\nclass A extends B { }\n").unwrap();
        set_mtime(&files[0], 2_000);
        let report = ChangeDetector::new(&graph).detect(&files, &store);

        assert_eq!(report.change_set, HashSet::from([files[0].clone()]));
    }

    #[test]
    fn test_second_run_without_edits_is_all_quick_skips() {
        let (_dir, files, graph) = chain();
        let store = first_run(&files, &graph);

        let report = ChangeDetector::new(&graph).detect(&files, &store);
        assert!(report.change_set.is_empty());
        assert_eq!(report.quick_skips, 3);
        assert_eq!(report.hash_computations, 0);
        assert!(report.staged.is_empty());
    }

    #[test]
    fn test_touch_without_edit_refreshes_mod_time() {
        let (_dir, files, graph) = chain();
        let mut store = first_run(&files, &graph);

        set_mtime(&files[1], 5_000);
        let report = ChangeDetector::new(&graph).detect(&files, &store);
        assert!(report.change_set.is_empty());
        assert_eq!(report.hash_computations, 1);
        assert_eq!(report.staged[&files[1]].modified_time_millis, 5_000_000);

        report.commit_all(&mut store);
        assert_eq!(store.get_mod_time(&files[1]), Some(5_000_000));
        let again = ChangeDetector::new(&graph).detect(&files, &store);
        assert_eq!(again.quick_skips, 3);
    }

    #[test]
    fn test_whitespace_only_edit_is_not_a_change() {
        let (_dir, files, graph) = chain();
        let store = first_run(&files, &graph);

        std::fs::write(&files[2], "class C {}   \r\n\r\n").unwrap();
        set_mtime(&files[2], 3_000);
        let report = ChangeDetector::new(&graph).detect(&files, &store);
        assert!(report.change_set.is_empty());
    }

    #[test]
    fn test_missing_file_is_changed() {
        let (_dir, files, graph) = chain();
        let store = first_run(&files, &graph);

        std::fs::remove_file(&files[2]).unwrap();
        let report = ChangeDetector::new(&graph).detect(&files, &store);
        assert_eq!(report.change_set.len(), 3);
        assert!(!report.staged.contains_key(&files[2]));
    }

    #[test]
    fn test_importer_of_deleted_file_is_changed_once() {
        let (_dir, files, graph) = chain();
        let mut store = first_run(&files, &graph);

        std::fs::remove_file(&files[2]).unwrap();
        let remaining = files[..2].to_vec();
        let graph = DependencyGraph::from_edges(&remaining, &[(files[0].clone(), files[1].clone())]);
        let missing = BTreeMap::from([(files[1].clone(), vec![files[2].clone()])]);

        let report = ChangeDetector::new(&graph).with_missing(&missing).detect(&remaining, &store);
        assert_eq!(report.change_set, remaining.iter().cloned().collect::<HashSet<_>>());
        assert_eq!(report.deleted, HashSet::from([files[2].clone()]));
        assert_eq!(report.quick_skips, 2);

        report.commit_all(&mut store);
        assert_eq!(prune_stale(&mut store, &remaining), 1);
        assert!(store.get(&files[2]).is_none());
        let again = ChangeDetector::new(&graph).with_missing(&missing).detect(&remaining, &store);
        assert!(again.change_set.is_empty());
    }

    #[test]
    fn test_pending_file_rejoins_change_set_with_dependents() {
        let (_dir, files, graph) = chain();
        let mut store = first_run(&files, &graph);
        store.set_pending(vec![files[1].clone(), PathBuf::from("/gone/x.dart")]);

        let report = ChangeDetector::new(&graph).detect(&files, &store);
        assert_eq!(report.quick_skips, 3);
        assert_eq!(
            report.change_set,
            HashSet::from([files[0].clone(), files[1].clone()])
        );
        assert_eq!(report.carried, HashSet::from([files[1].clone()]));
    }

    #[test]
    fn test_unfinished_excludes_done_files() {
        let (_dir, files, graph) = chain();
        let report = ChangeDetector::new(&graph).detect(&files, &MemoryCacheStore::new());
        let pending = report.unfinished(|path| path == files[2]);
        assert_eq!(pending, vec![files[0].clone(), files[1].clone()]);
    }

    #[test]
    fn test_prune_stale_keeps_live_records() {
        let (_dir, files, graph) = chain();
        let mut store = first_run(&files, &graph);
        store.put(
            Path::new("/old/unused.dart"),
            CacheEntry {
                content_hash: trellis_core::ContentHash::from_hex("00"),
                modified_time_millis: 1,
            },
        );

        assert_eq!(prune_stale(&mut store, &files), 1);
        assert_eq!(store.paths().len(), 3);
        assert_eq!(prune_stale(&mut store, &files), 0);
    }

    #[test]
    fn test_rewrite_of_invalid_utf8_bytes_is_a_change() {
        let dir = create_project(&[]);
        let file = dir.path().join("lib/blob.dart");
        std::fs::write(&file, [b'a', 0xFF]).unwrap();
        set_mtime(&file, 1_000);
        let files = vec![file.clone()];
        let graph = DependencyGraph::from_edges(&files, &[]);
        let store = first_run(&files, &graph);

        std::fs::write(&file, [b'a', 0xFE]).unwrap();
        set_mtime(&file, 2_000);
        let report = ChangeDetector::new(&graph).detect(&files, &store);
        assert_eq!(report.hash_computations, 1);
        assert!(report.contains(&file));
    }

    #[test]
    fn test_unreadable_file_caches_fallback_identity() {
        let dir = create_project(&[("lib/ok.dart", "class Ok {}\n")]);
        let weird = dir.path().join("lib/weird.dart");
        std::fs::create_dir(&weird).unwrap();
        let files = vec![dir.path().join("lib/ok.dart"), weird.clone()];
        let graph = DependencyGraph::from_edges(&files, &[]);

        let store = MemoryCacheStore::new();
        let report = ChangeDetector::new(&graph).detect(&files, &store);

        assert!(report.contains(&weird));
        assert_eq!(report.unreadable.len(), 1);
        assert_eq!(report.staged[&weird].content_hash, fallback_identity(&weird));
        assert_eq!(report.staged[&weird].modified_time_millis, 0);
    }

    #[test]
    fn test_commit_single_file() {
        let (_dir, files, graph) = chain();
        let mut store = MemoryCacheStore::new();
        let report = ChangeDetector::new(&graph).detect(&files, &store);

        assert!(report.commit(&files[2], &mut store));
        assert!(store.get(&files[2]).is_some());
        assert!(store.get(&files[0]).is_none());
        assert!(!report.commit(Path::new("/nowhere.dart"), &mut store));
    }

    #[test]
    fn test_all_changed_passthrough() {
        let files = vec![PathBuf::from("a.dart"), PathBuf::from("b.dart")];
        let report = ChangeReport::all_changed(&files);
        assert_eq!(report.change_set.len(), 2);
        assert_eq!(report.quick_skips + report.hash_computations, 0);
        assert!(report.staged.is_empty());
    }
}
