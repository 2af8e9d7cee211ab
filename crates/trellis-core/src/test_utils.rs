//! Test utilities for trellis-core

use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

/// Create a repository with a specific file structure
pub fn create_repo_with_structure(structure: &[(&str, &str)]) -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();

    for (path, content) in structure {
        let full_path = root.join(path);

        // Create parent directories if needed
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).unwrap();
        }

        fs::write(&full_path, content).unwrap();
    }

    temp_dir
}

/// Pin a file's modification time to `secs` after the epoch.
pub fn set_mtime(path: &Path, secs: u64) {
    let file = fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(secs))
        .unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_repo_with_structure() {
        let temp_dir = create_repo_with_structure(&[
            ("pubspec.yaml", "name: demo\n"),
            ("lib/src/widgets/button.dart", "class Button {}\n"),
        ]);
        let root = temp_dir.path();

        assert!(root.join("pubspec.yaml").exists());
        assert!(root.join("lib/src/widgets/button.dart").exists());
    }

    #[test]
    fn test_set_mtime() {
        let temp_dir = create_repo_with_structure(&[("a.dart", "")]);
        let path = temp_dir.path().join("a.dart");
        set_mtime(&path, 1_000);

        let modified = fs::metadata(&path).unwrap().modified().unwrap();
        assert_eq!(modified, SystemTime::UNIX_EPOCH + Duration::from_secs(1_000));
    }
}
