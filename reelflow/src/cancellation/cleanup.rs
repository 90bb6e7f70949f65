//! Scoped ownership of temporary workflow artifacts.

use parking_lot::Mutex;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A cleanup entry that failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupFailure {
    /// The path that could not be removed.
    pub path: PathBuf,
    /// Why removal failed.
    pub message: String,
}

/// Owns temporary artifacts for the lifetime of one workflow.
///
/// Artifacts are removed in LIFO order when the scope is released or
/// dropped, whichever comes first, so every exit path (success, stage
/// failure, cancellation, or the run future being dropped) cleans up.
#[derive(Debug, Default)]
pub struct ArtifactScope {
    /// Registered paths, in acquisition order.
    paths: Mutex<Vec<PathBuf>>,
    /// When set, artifacts are left on disk.
    keep: bool,
}

impl ArtifactScope {
    /// Creates an empty scope that removes its artifacts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a scope that leaves artifacts in place on release.
    #[must_use]
    pub fn keeping_artifacts() -> Self {
        Self {
            paths: Mutex::new(Vec::new()),
            keep: true,
        }
    }

    /// Creates a scratch directory owned by this scope.
    pub async fn create_dir(&self, path: impl Into<PathBuf>) -> io::Result<PathBuf> {
        let path = path.into();
        tokio::fs::create_dir_all(&path).await?;
        self.register(path.clone());
        Ok(path)
    }

    /// Registers an existing artifact for removal.
    pub fn register(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        debug!(path = %path.display(), "Registered temporary artifact");
        self.paths.lock().push(path);
    }

    /// Returns the number of artifacts still owned by the scope.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.paths.lock().len()
    }

    /// Removes every registered artifact in LIFO order.
    ///
    /// Failures are collected but don't stop other removals. Missing paths
    /// are not failures. The scope is empty afterwards.
    pub fn release(&self) -> Vec<CleanupFailure> {
        let paths = std::mem::take(&mut *self.paths.lock());
        if self.keep {
            if !paths.is_empty() {
                debug!(count = paths.len(), "Keeping temporary artifacts");
            }
            return Vec::new();
        }

        let mut failures = Vec::new();
        for path in paths.into_iter().rev() {
            if let Err(e) = remove_path(&path) {
                warn!(path = %path.display(), error = %e, "Failed to remove temporary artifact");
                failures.push(CleanupFailure {
                    path,
                    message: e.to_string(),
                });
            }
        }
        failures
    }
}

impl Drop for ArtifactScope {
    fn drop(&mut self) {
        self.release();
    }
}

fn remove_path(path: &Path) -> io::Result<()> {
    let result = if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_creation() {
        let scope = ArtifactScope::new();
        assert_eq!(scope.pending_count(), 0);
        assert!(scope.release().is_empty());
    }

    #[tokio::test]
    async fn test_release_removes_files_and_dirs() {
        let root = tempfile::tempdir().unwrap();
        let scope = ArtifactScope::new();

        let scratch = scope.create_dir(root.path().join("wf-1")).await.unwrap();
        let video = scratch.join("video.mp4");
        std::fs::write(&video, b"frames").unwrap();
        scope.register(&video);
        assert_eq!(scope.pending_count(), 2);

        let failures = scope.release();
        assert!(failures.is_empty());
        assert!(!video.exists());
        assert!(!scratch.exists());
        assert_eq!(scope.pending_count(), 0);
    }

    #[test]
    fn test_drop_releases() {
        let root = tempfile::tempdir().unwrap();
        let file = root.path().join("audio.mp3");
        std::fs::write(&file, b"samples").unwrap();

        {
            let scope = ArtifactScope::new();
            scope.register(&file);
        }

        assert!(!file.exists());
    }

    #[test]
    fn test_missing_path_is_not_a_failure() {
        let root = tempfile::tempdir().unwrap();
        let scope = ArtifactScope::new();
        scope.register(root.path().join("never-created.mp4"));
        assert!(scope.release().is_empty());
    }

    #[test]
    fn test_keeping_artifacts() {
        let root = tempfile::tempdir().unwrap();
        let file = root.path().join("video.mp4");
        std::fs::write(&file, b"frames").unwrap();

        let scope = ArtifactScope::keeping_artifacts();
        scope.register(&file);
        drop(scope);

        assert!(file.exists());
    }
}
