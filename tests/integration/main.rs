//! Integration tests for Trellis
//!
//! These tests drive whole runs against on-disk projects and the persisted cache.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;
use trellis_analyzer::{AnalysisConfig, AnalysisResult, Orchestrator};
use trellis_core::{CacheStore, JsonCacheStore, CACHE_DIR};

fn create_project(files: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("pubspec.yaml"), "name: gallery\n").unwrap();
    fs::create_dir_all(dir.path().join("lib")).unwrap();
    for (path, content) in files {
        write_at(&dir.path().join(path), content, 1_000);
    }
    dir
}

/// Write `content` and pin the modification time so edits never share a timestamp.
fn write_at(path: &Path, content: &str, secs: u64) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
    touch(path, secs);
}

fn touch(path: &Path, secs: u64) {
    fs::File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(secs))
        .unwrap();
}

fn run(dir: &TempDir) -> AnalysisResult {
    Orchestrator::new(AnalysisConfig::default())
        .unwrap()
        .run(dir.path())
        .unwrap()
}

fn lib(result: &AnalysisResult, name: &str) -> PathBuf {
    result.project.source_dir.join(name)
}

fn index_of(order: &[PathBuf], path: &Path) -> usize {
    order.iter().position(|p| p == path).unwrap()
}

/// Chain a -> b -> c, where `x -> y` means x imports y.
fn chain() -> TempDir {
    create_project(&[
        ("lib/a.dart", "import 'b.dart';\nclass A extends B {}\n"),
        ("lib/b.dart", "import 'c.dart';\nclass B extends C {}\n"),
        ("lib/c.dart", "class C {}\n"),
    ])
}

#[test]
fn test_order_respects_every_import() {
    let dir = create_project(&[
        ("lib/main.dart", "import 'app.dart';\nimport 'theme.dart';\nclass Main {}\n"),
        ("lib/app.dart", "import 'screens/home.dart';\nimport 'theme.dart';\nclass App {}\n"),
        ("lib/screens/home.dart", "import '../widgets/tile.dart';\nimport 'package:gallery/theme.dart';\nclass Home {}\n"),
        ("lib/widgets/tile.dart", "import '../theme.dart';\nclass Tile {}\n"),
        ("lib/theme.dart", "class Theme {}\n"),
    ]);
    let result = run(&dir);

    assert_eq!(result.order.len(), 5);
    assert!(result.cycles.is_empty());
    for file in &result.order {
        for dependency in result.graph.dependencies(file) {
            assert!(
                index_of(&result.order, &dependency) < index_of(&result.order, file),
                "{} must precede {}",
                dependency.display(),
                file.display()
            );
        }
    }
}

#[test]
fn test_edit_propagates_to_dependents() {
    let dir = chain();
    let first = run(&dir);
    assert_eq!(first.change_set.len(), 3);

    let c = lib(&first, "c.dart");
    write_at(&c, "class C { final int size = 1; }\n", 2_000);

    let second = run(&dir);
    let expected: HashSet<PathBuf> = ["a.dart", "b.dart", "c.dart"]
        .iter()
        .map(|name| lib(&first, name))
        .collect();
    assert_eq!(second.change_set, expected);
    assert_eq!(second.statistics.hash_computations, 1);
    assert_eq!(second.statistics.quick_skips, 2);
    assert_eq!(second.changed_results().count(), 3);
}

#[test]
fn test_second_run_without_edits_is_all_quick_skips() {
    let dir = chain();
    run(&dir);
    let second = run(&dir);

    assert!(second.change_set.is_empty());
    assert_eq!(second.statistics.quick_skips, 3);
    assert_eq!(second.statistics.hash_computations, 0);
    assert_eq!(second.statistics.quick_skip_rate(), 1.0);
    assert_eq!(second.statistics.cached_files, 3);
}

#[test]
fn test_touch_without_edit_refreshes_cached_mtime() {
    let dir = chain();
    let first = run(&dir);
    let b = lib(&first, "b.dart");
    touch(&b, 5_000);

    let second = run(&dir);
    assert!(second.change_set.is_empty());
    assert_eq!(second.statistics.hash_computations, 1);

    let store = JsonCacheStore::open(&first.project.root.join(CACHE_DIR));
    assert_eq!(store.get(&b).unwrap().modified_time_millis, 5_000_000);

    let third = run(&dir);
    assert_eq!(third.statistics.quick_skips, 3);
}

#[test]
fn test_corrupt_cache_falls_back_to_first_run() {
    let dir = chain();
    run(&dir);
    fs::write(dir.path().join(CACHE_DIR).join("cache.json"), "{ not json").unwrap();

    let result = run(&dir);
    assert_eq!(result.change_set.len(), 3);
    assert_eq!(result.statistics.hash_computations, 3);
    assert_eq!(result.statistics.error_files, 0);
}

#[test]
fn test_deleted_dependency_invalidates_importers() {
    let dir = chain();
    let first = run(&dir);
    fs::remove_file(lib(&first, "c.dart")).unwrap();

    let second = run(&dir);
    assert_eq!(second.statistics.total_files, 2);
    assert!(second.change_set.contains(&lib(&first, "a.dart")));
    assert!(second.change_set.contains(&lib(&first, "b.dart")));
    let b = &second.results[&lib(&first, "b.dart")];
    assert!(b.diagnostics.iter().any(|d| d.message.contains("`C`")));

    let third = run(&dir);
    assert!(third.change_set.is_empty());
}

#[test]
fn test_cycle_is_reported_and_strict_mode_fails() {
    let dir = create_project(&[
        ("lib/a.dart", "import 'b.dart';\nclass A {}\n"),
        ("lib/b.dart", "import 'c.dart';\nclass B {}\n"),
        ("lib/c.dart", "import 'a.dart';\nclass C {}\n"),
    ]);
    let result = run(&dir);
    assert_eq!(result.order.len(), 3);
    assert_eq!(result.cycles.len(), 1);
    assert_eq!(result.cycles[0].len(), 4);
    assert_eq!(result.cycles[0].first(), result.cycles[0].last());

    let strict = Orchestrator::new(AnalysisConfig {
        strict_cycles: true,
        ..AnalysisConfig::default()
    })
    .unwrap();
    assert!(strict.run(dir.path()).is_err());
}

#[test]
fn test_project_config_file_is_honored() {
    let dir = create_project(&[
        ("lib/a.dart", "class A {}\n"),
        ("lib/legacy/old.dart", "class Old {}\n"),
    ]);
    fs::write(
        dir.path().join("trellis.toml"),
        "max_parallelism = 2\nexclude_patterns = [\"lib/legacy/**\"]\ncache_dir = \".cache/trellis\"\n",
    )
    .unwrap();

    let config = AnalysisConfig::load(dir.path()).unwrap();
    let result = Orchestrator::new(config).unwrap().run(dir.path()).unwrap();
    assert_eq!(result.order, vec![lib(&result, "a.dart")]);
    assert!(dir.path().join(".cache/trellis/cache.json").is_file());
}

#[test]
fn test_cli_invocation() {
    let output = Command::new(env!("CARGO_BIN_EXE_trellis"))
        .arg("--help")
        .output()
        .unwrap();

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success());
    assert!(stdout.contains("trellis"));
    assert!(stdout.contains("Incremental dependency-ordered analysis"));
}

#[test]
fn test_cli_check_fails_on_cycle() {
    let dir = create_project(&[
        ("lib/a.dart", "import 'b.dart';\nclass A {}\n"),
        ("lib/b.dart", "import 'a.dart';\nclass B {}\n"),
    ]);
    let bin = env!("CARGO_BIN_EXE_trellis");

    let analyze = Command::new(bin)
        .args(["--root", dir.path().to_str().unwrap(), "analyze"])
        .output()
        .unwrap();
    assert!(analyze.status.success());

    let check = Command::new(bin)
        .args(["--root", dir.path().to_str().unwrap(), "check"])
        .output()
        .unwrap();
    assert!(!check.status.success());
}

#[test]
fn test_cli_clear_removes_cache() {
    let dir = chain();
    run(&dir);
    assert!(dir.path().join(CACHE_DIR).exists());

    let status = Command::new(env!("CARGO_BIN_EXE_trellis"))
        .args(["--root", dir.path().to_str().unwrap(), "clear"])
        .status()
        .unwrap();
    assert!(status.success());
    assert!(!dir.path().join(CACHE_DIR).exists());
}

#[test]
fn test_cli_clear_honors_configured_cache_dir() {
    let dir = chain();
    fs::write(dir.path().join("trellis.toml"), "cache_dir = \".cache/trellis\"\n").unwrap();
    let bin = env!("CARGO_BIN_EXE_trellis");
    let root = dir.path().to_str().unwrap();

    assert!(Command::new(bin).args(["--root", root, "analyze"]).status().unwrap().success());
    assert!(dir.path().join(".cache/trellis").exists());

    assert!(Command::new(bin).args(["--root", root, "clear"]).status().unwrap().success());
    assert!(!dir.path().join(".cache/trellis").exists());
    assert!(dir.path().join(".cache").exists());

    // Clearing an absent cache is not an error.
    assert!(Command::new(bin).args(["--root", root, "clear"]).status().unwrap().success());
}

#[test]
fn test_removed_file_record_is_pruned_from_disk() {
    let dir = create_project(&[("lib/a.dart", "class A {}\n"), ("lib/old.dart", "class Old {}\n")]);
    let first = run(&dir);
    let old = lib(&first, "old.dart");
    fs::remove_file(&old).unwrap();

    let second = run(&dir);
    assert!(second.change_set.is_empty());
    let store = JsonCacheStore::open(&first.project.root.join(CACHE_DIR));
    assert!(store.get(&old).is_none());
    assert_eq!(store.paths(), vec![lib(&first, "a.dart")]);
}
