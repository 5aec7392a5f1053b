use std::fs;
use std::io;
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Every job workspace directory name starts with this.
pub const WORKSPACE_PREFIX: &str = "job-";

/// Ensure the work root exists and is writable; create it if missing.
pub fn ensure_work_root(root: &Path) -> io::Result<()> {
    if !root.exists() {
        fs::create_dir_all(root)?;
    }
    check_work_root(root)
}

/// Check that the work root is an existing, writable directory.
///
/// Never creates the directory; the only write is a temporary file that is
/// removed again.
pub fn check_work_root(root: &Path) -> io::Result<()> {
    if !fs::metadata(root)?.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "work root is not a directory",
        ));
    }
    NamedTempFile::new_in(root)?;
    Ok(())
}

/// Remove job workspaces left behind under `root`, e.g. after a crash.
///
/// Only directories carrying [`WORKSPACE_PREFIX`] are touched. Must not run
/// while jobs are in flight.
pub fn sweep_stale_workspaces(root: &Path) -> io::Result<usize> {
    if !root.exists() {
        return Ok(0);
    }

    let mut removed = 0;
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let is_workspace = entry
            .file_name()
            .to_string_lossy()
            .starts_with(WORKSPACE_PREFIX);
        if !is_workspace || !entry.file_type()?.is_dir() {
            continue;
        }
        match fs::remove_dir_all(entry.path()) {
            Ok(()) => {
                debug!("Removed stale workspace {:?}", entry.file_name());
                removed += 1;
            }
            Err(e) => warn!("Failed to remove stale workspace {:?}: {:?}", entry.file_name(), e),
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_missing_root() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("nested").join("work");
        ensure_work_root(&root).unwrap();
        assert!(root.is_dir());
        assert_eq!(fs::read_dir(&root).unwrap().count(), 0);
    }

    #[test]
    fn rejects_file_as_root() {
        let temp = tempfile::tempdir().unwrap();
        let file = temp.path().join("plain");
        fs::write(&file, "x").unwrap();
        assert!(ensure_work_root(&file).is_err());
    }

    #[test]
    fn check_leaves_missing_root_alone() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("work");
        assert!(check_work_root(&root).is_err());
        assert!(!root.exists());

        fs::create_dir(&root).unwrap();
        check_work_root(&root).unwrap();
        assert_eq!(fs::read_dir(&root).unwrap().count(), 0);
    }

    #[test]
    fn sweeps_only_job_directories() {
        let temp = tempfile::tempdir().unwrap();
        fs::create_dir(temp.path().join("job-old-1")).unwrap();
        fs::write(temp.path().join("job-old-1").join("input.csv"), "a\n").unwrap();
        fs::create_dir(temp.path().join("job-old-2")).unwrap();
        fs::create_dir(temp.path().join("keep-me")).unwrap();
        fs::write(temp.path().join("job-note.txt"), "not a dir").unwrap();

        let removed = sweep_stale_workspaces(temp.path()).unwrap();

        assert_eq!(removed, 2);
        assert!(temp.path().join("keep-me").exists());
        assert!(temp.path().join("job-note.txt").exists());
    }

    #[test]
    fn sweeping_missing_root_is_a_noop() {
        let temp = tempfile::tempdir().unwrap();
        assert_eq!(sweep_stale_workspaces(&temp.path().join("absent")).unwrap(), 0);
    }
}
