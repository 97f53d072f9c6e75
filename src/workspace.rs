//! Transient download area with retention-based pruning.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, warn};

/// Owns the scratch directory where in-flight audio downloads land before
/// separation. Cleanup here is always best-effort: a failed delete is logged
/// and swallowed, never surfaced to the caller.
#[derive(Clone, Debug)]
pub struct Workspace {
    downloads_dir: PathBuf,
}

impl Workspace {
    pub fn new(downloads_dir: impl Into<PathBuf>) -> Self {
        Self {
            downloads_dir: downloads_dir.into(),
        }
    }

    pub fn downloads_dir(&self) -> &Path {
        &self.downloads_dir
    }

    /// Create the download directory if it does not exist yet.
    pub fn init(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.downloads_dir)
    }

    /// Deterministic path for a track keyed by its media identifier.
    pub fn track_path(&self, id: &str, ext: &str) -> PathBuf {
        self.downloads_dir.join(format!("{}.{}", id, ext))
    }

    /// Keep only the `limit` most recently modified files, deleting the rest.
    ///
    /// Must run before a new download so the file about to be created does
    /// not count against its own limit. Files whose mtime cannot be read
    /// sort as oldest and are pruned first.
    pub fn retain(&self, limit: usize) {
        let entries = match fs::read_dir(&self.downloads_dir) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(
                    "Could not scan download dir {:?} for pruning: {}",
                    self.downloads_dir, err
                );
                return;
            }
        };

        let mut files: Vec<(SystemTime, PathBuf)> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_file())
            .map(|entry| {
                let mtime = entry
                    .metadata()
                    .and_then(|m| m.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                (mtime, entry.path())
            })
            .collect();

        // Newest first
        files.sort_by(|a, b| b.0.cmp(&a.0));

        for (_, path) in files.into_iter().skip(limit) {
            match fs::remove_file(&path) {
                Ok(()) => debug!("Pruned stale download {:?}", path),
                Err(err) => warn!("Failed to delete stale download {:?}: {}", path, err),
            }
        }
    }

    /// Best-effort removal of a consumed track file.
    pub fn remove(&self, path: &Path) {
        if let Err(err) = fs::remove_file(path) {
            warn!("Failed to delete consumed track {:?}: {}", path, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;
    use tempfile::TempDir;

    fn touch_sequence(workspace: &Workspace, names: &[&str]) {
        for name in names {
            fs::write(workspace.downloads_dir().join(name), b"x").unwrap();
            // Ensure distinct mtimes so retention ordering is deterministic
            sleep(Duration::from_millis(15));
        }
    }

    fn remaining_files(workspace: &Workspace) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(workspace.downloads_dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn retain_keeps_most_recent_files() {
        let dir = TempDir::new().unwrap();
        let workspace = Workspace::new(dir.path());
        touch_sequence(&workspace, &["a.mp3", "b.mp3", "c.mp3"]);

        workspace.retain(1);

        assert_eq!(remaining_files(&workspace), vec!["c.mp3"]);
    }

    #[test]
    fn retain_with_limit_above_count_deletes_nothing() {
        let dir = TempDir::new().unwrap();
        let workspace = Workspace::new(dir.path());
        touch_sequence(&workspace, &["a.mp3", "b.mp3"]);

        workspace.retain(5);

        assert_eq!(remaining_files(&workspace), vec!["a.mp3", "b.mp3"]);
    }

    #[test]
    fn retain_zero_empties_the_directory() {
        let dir = TempDir::new().unwrap();
        let workspace = Workspace::new(dir.path());
        touch_sequence(&workspace, &["a.mp3", "b.mp3"]);

        workspace.retain(0);

        assert!(remaining_files(&workspace).is_empty());
    }

    #[test]
    fn retain_on_missing_directory_does_not_panic() {
        let workspace = Workspace::new("/nonexistent/stembox-test");
        workspace.retain(1);
    }

    #[test]
    fn track_path_is_deterministic() {
        let workspace = Workspace::new("/tmp/downloads");
        assert_eq!(
            workspace.track_path("abc123", "mp3"),
            PathBuf::from("/tmp/downloads/abc123.mp3")
        );
    }
}
