//! Project root detection and validation

use crate::error::ProjectError;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestKind {
    Pubspec,     // pubspec.yaml
    PackageJson, // package.json
    Other,
}

impl ManifestKind {
    pub fn from_file_name(name: &str) -> Self {
        match name {
            "pubspec.yaml" | "pubspec.yml" => ManifestKind::Pubspec,
            "package.json" => ManifestKind::PackageJson,
            _ => ManifestKind::Other,
        }
    }
}

/// A validated project: root, manifest and primary source directory all exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub root: PathBuf,
    pub manifest: PathBuf,
    pub manifest_kind: ManifestKind,
    pub source_dir: PathBuf,
    /// Package name from the manifest, or the root directory name.
    pub package_name: String,
}

/// Validate `root` and locate its manifest and source directory.
///
/// Paths are canonicalised so every later phase keys files the same way.
pub fn detect_project(root: &Path, manifest: &str, source_dir: &str) -> Result<Project, ProjectError> {
    let root = root
        .canonicalize()
        .map_err(|_| ProjectError::MissingRoot(root.to_path_buf()))?;
    if !root.is_dir() {
        return Err(ProjectError::MissingRoot(root));
    }

    let manifest_path = root.join(manifest);
    if !manifest_path.is_file() {
        return Err(ProjectError::MissingManifest {
            root,
            manifest: manifest.to_string(),
        });
    }

    let source = root.join(source_dir);
    if !source.is_dir() {
        return Err(ProjectError::MissingSourceDir(source));
    }

    let manifest_kind = ManifestKind::from_file_name(manifest);
    let package_name = read_package_name(&manifest_path, manifest_kind).unwrap_or_else(|| {
        root.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "root".to_string())
    });

    Ok(Project {
        root,
        manifest: manifest_path,
        manifest_kind,
        source_dir: source,
        package_name,
    })
}

fn read_package_name(manifest: &Path, kind: ManifestKind) -> Option<String> {
    let text = std::fs::read_to_string(manifest).ok()?;
    let name = match kind {
        ManifestKind::Pubspec => {
            let doc: serde_yaml::Value = serde_yaml::from_str(&text)
                .map_err(|e| tracing::warn!("Cannot parse {}: {}", manifest.display(), e))
                .ok()?;
            doc.get("name")?.as_str()?.to_string()
        }
        ManifestKind::PackageJson => {
            let doc: serde_json::Value = serde_json::from_str(&text)
                .map_err(|e| tracing::warn!("Cannot parse {}: {}", manifest.display(), e))
                .ok()?;
            doc.get("name")?.as_str()?.to_string()
        }
        ManifestKind::Other => return None,
    };
    Some(name)
}
