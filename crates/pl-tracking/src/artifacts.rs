//! Artifact URI parsing and local tree copies.

use pl_types::{PlResult, TrackingError};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Where an artifact URI points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactLocation {
    /// `file://` URI or bare filesystem path.
    Local(PathBuf),
    /// `mlflow-artifacts:` URI served by the tracking server's artifact proxy;
    /// holds the path below the proxy root.
    Proxied(String),
    /// `runs:/<run_id>/<path>`, relative to a run's artifact root.
    Run { run_id: String, path: String },
    /// `models:/<name>/<version>`, resolved through the registry.
    Model { name: String, version: String },
    /// `memory:` URI owned by [`crate::InMemoryTracking`].
    Memory(String),
}

impl ArtifactLocation {
    pub fn parse(uri: &str) -> PlResult<Self> {
        let unsupported = || TrackingError::UnsupportedUri {
            uri: uri.to_string(),
        };

        if let Some(rest) = uri.strip_prefix("file://") {
            return Ok(Self::Local(PathBuf::from(rest)));
        }
        if let Some(rest) = uri.strip_prefix("mlflow-artifacts:") {
            // mlflow-artifacts:/1/abc/artifacts or mlflow-artifacts://host:port/1/abc/artifacts
            let path = match rest.strip_prefix("//") {
                Some(with_authority) => with_authority
                    .split_once('/')
                    .map(|(_, path)| path)
                    .unwrap_or_default(),
                None => rest,
            };
            return Ok(Self::Proxied(path.trim_matches('/').to_string()));
        }
        if let Some(rest) = uri.strip_prefix("runs:/") {
            let rest = rest.trim_start_matches('/');
            let (run_id, path) = rest.split_once('/').unwrap_or((rest, ""));
            if run_id.is_empty() {
                return Err(unsupported().into());
            }
            return Ok(Self::Run {
                run_id: run_id.to_string(),
                path: path.trim_matches('/').to_string(),
            });
        }
        if let Some(rest) = uri.strip_prefix("models:/") {
            let rest = rest.trim_matches('/');
            return match rest.split_once('/') {
                Some((name, version)) if !name.is_empty() && !version.is_empty() => {
                    Ok(Self::Model {
                        name: name.to_string(),
                        version: version.to_string(),
                    })
                }
                _ => Err(unsupported().into()),
            };
        }
        if let Some(rest) = uri.strip_prefix("memory:") {
            return Ok(Self::Memory(rest.trim_matches('/').to_string()));
        }
        if uri.contains("://") {
            return Err(unsupported().into());
        }
        Ok(Self::Local(PathBuf::from(uri)))
    }
}

/// Join URI path segments with single forward slashes.
pub fn join_uri(base: &str, path: &str) -> String {
    let path = path.trim_matches('/');
    if path.is_empty() {
        return base.trim_end_matches('/').to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), path)
}

/// Forward-slash path of `path` relative to `root`.
pub fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

/// Recursively copy `src` into `dst`. Returns the number of files copied.
pub fn copy_tree(src: &Path, dst: &Path) -> PlResult<usize> {
    if !src.is_dir() {
        return Err(TrackingError::Download {
            source_uri: src.display().to_string(),
            message: "not a directory".to_string(),
        }
        .into());
    }
    std::fs::create_dir_all(dst)?;

    let mut copied = 0;
    for entry in WalkDir::new(src).follow_links(true) {
        let entry = entry.map_err(|e| TrackingError::Download {
            source_uri: src.display().to_string(),
            message: e.to_string(),
        })?;
        let relative = match entry.path().strip_prefix(src) {
            Ok(rel) if !rel.as_os_str().is_empty() => rel,
            _ => continue,
        };
        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parses_supported_schemes() {
        assert_eq!(
            ArtifactLocation::parse("mlflow-artifacts:/1/abc/artifacts/model").unwrap(),
            ArtifactLocation::Proxied("1/abc/artifacts/model".into())
        );
        assert_eq!(
            ArtifactLocation::parse("mlflow-artifacts://tracker:5000/1/abc/artifacts").unwrap(),
            ArtifactLocation::Proxied("1/abc/artifacts".into())
        );
        assert_eq!(
            ArtifactLocation::parse("runs:/abc123/model").unwrap(),
            ArtifactLocation::Run {
                run_id: "abc123".into(),
                path: "model".into()
            }
        );
        assert_eq!(
            ArtifactLocation::parse("models:/Iris Classification Model/3").unwrap(),
            ArtifactLocation::Model {
                name: "Iris Classification Model".into(),
                version: "3".into()
            }
        );
        assert_eq!(
            ArtifactLocation::parse("file:///tmp/mlruns/1").unwrap(),
            ArtifactLocation::Local(PathBuf::from("/tmp/mlruns/1"))
        );
        assert_eq!(
            ArtifactLocation::parse("./mlruns/1").unwrap(),
            ArtifactLocation::Local(PathBuf::from("./mlruns/1"))
        );
    }

    #[test]
    fn rejects_unknown_schemes() {
        assert!(ArtifactLocation::parse("s3://bucket/key").is_err());
        assert!(ArtifactLocation::parse("models:/only-name").is_err());
        assert!(ArtifactLocation::parse("runs:/").is_err());
    }

    #[test]
    fn join_uri_normalizes_slashes() {
        assert_eq!(join_uri("memory:/1/r/artifacts/", "/model"), "memory:/1/r/artifacts/model");
        assert_eq!(join_uri("memory:/1/r/artifacts", ""), "memory:/1/r/artifacts");
    }

    #[test]
    fn copy_tree_preserves_structure() {
        let src = tempdir().unwrap();
        std::fs::create_dir_all(src.path().join("nested/deeper")).unwrap();
        std::fs::write(src.path().join("MLmodel"), "flavor").unwrap();
        std::fs::write(src.path().join("nested/deeper/weights.json"), "{}").unwrap();

        let dst = tempdir().unwrap();
        let copied = copy_tree(src.path(), &dst.path().join("out")).unwrap();
        assert_eq!(copied, 2);
        assert!(dst.path().join("out/nested/deeper/weights.json").exists());
        assert_eq!(
            relative_key(src.path(), &src.path().join("nested/deeper/weights.json")).unwrap(),
            "nested/deeper/weights.json"
        );
    }
}
