//! Path safety checks and the permission modes used across the output tree.
//!
//! Artifact paths are assembled from operator-controlled inputs (router
//! hostnames, AS numbers), so every write first rejects paths that could
//! climb out of the output directory.

use std::fs::Permissions;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("path `{0}` is not valid unicode")]
    NotUnicode(String),

    #[error("parent-directory components disallowed in path `{0}`")]
    TraversalDisallowed(String),
}

/// Reject paths containing `..` components or non-unicode segments.
pub fn ensure_safe_path(path: &Path) -> Result<(), PathError> {
    if path.to_str().is_none() {
        return Err(PathError::NotUnicode(path.to_string_lossy().into_owned()));
    }
    if path
        .components()
        .any(|component| matches!(component, Component::ParentDir))
    {
        return Err(PathError::TraversalDisallowed(
            path.to_string_lossy().into_owned(),
        ));
    }
    Ok(())
}

/// Policy files, YAML mappings, and reports are read by operators and the
/// web UI, so they are world-readable.
pub fn artifact_permissions() -> Permissions {
    Permissions::from_mode(0o644)
}

pub fn directory_permissions() -> Permissions {
    Permissions::from_mode(0o755)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn plain_paths_are_safe() {
        assert!(ensure_safe_path(Path::new("/var/lib/otto-bgp/policies/routers/r1")).is_ok());
        assert!(ensure_safe_path(Path::new("relative/history/changes.yaml")).is_ok());
    }

    #[test]
    fn parent_dir_components_are_rejected() {
        let err = ensure_safe_path(Path::new("/var/lib/otto-bgp/../etc/passwd")).unwrap_err();
        assert!(matches!(err, PathError::TraversalDisallowed(_)));
    }

    #[test]
    fn hostname_with_embedded_dots_is_still_safe() {
        // `r1.example.net` contains dots but no `..` path component.
        let path = PathBuf::from("/out/routers/r1.example.net/AS13335_policy.txt");
        assert!(ensure_safe_path(&path).is_ok());
    }
}
