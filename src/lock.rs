//! File locking and atomic writes.
//!
//! Two concerns share this module:
//! - Exclusive advisory locks (fs2/flock) guarding the forge state file and
//!   the per-ref merge critical section
//! - The write-temp-then-rename pattern for generated files (state, ACLs,
//!   authorized_keys), so readers never observe a half-written file

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;

use crate::error::{Error, Result};

/// Default lock timeout in milliseconds
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5000;

/// Retry interval when waiting for a contended lock
const LOCK_RETRY_INTERVAL_MS: u64 = 50;

fn is_lock_contended(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::WouldBlock {
        return true;
    }

    // Windows surfaces lock/sharing violations as "Other"; treat them as
    // contention so callers get Err(LockFailed) after the timeout.
    #[cfg(windows)]
    {
        matches!(err.raw_os_error(), Some(32) | Some(33))
    }
    #[cfg(not(windows))]
    {
        false
    }
}

/// An exclusive file lock released when dropped.
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Acquire an exclusive lock, creating the lock file if needed.
    ///
    /// Waits up to `timeout_ms` before giving up with `Error::LockFailed`.
    pub fn acquire(path: impl AsRef<Path>, timeout_ms: u64) -> Result<Self> {
        let path = path.as_ref();
        let file = Self::open_lock_file(path)?;

        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    return Ok(FileLock {
                        file,
                        path: path.to_path_buf(),
                    })
                }
                Err(e) if is_lock_contended(&e) => {
                    if Instant::now() >= deadline {
                        return Err(Error::LockFailed(path.to_path_buf()));
                    }
                    std::thread::sleep(Duration::from_millis(LOCK_RETRY_INTERVAL_MS));
                }
                Err(e) => return Err(Error::Io(e)),
            }
        }
    }

    /// Try to acquire without waiting. `Ok(None)` means the lock is held
    /// elsewhere.
    pub fn try_acquire(path: impl AsRef<Path>) -> Result<Option<Self>> {
        let path = path.as_ref();
        let file = Self::open_lock_file(path)?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(FileLock {
                file,
                path: path.to_path_buf(),
            })),
            Err(e) if is_lock_contended(&e) => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn open_lock_file(path: &Path) -> Result<File> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?)
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        // Unlock on drop; errors here are not actionable.
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

/// Lock file path guarding updates to one ref of one repository.
///
/// Branch names may contain separators; everything outside `[A-Za-z0-9_-]`
/// is flattened to `_` so the lock lands directly inside the bare repo
/// directory.
pub fn ref_lock_path(repo_path: &Path, branch: &str) -> PathBuf {
    let mut key = String::new();
    for ch in branch.chars() {
        if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
            key.push(ch);
        } else {
            key.push('_');
        }
    }
    if key.is_empty() {
        key.push('_');
    }
    repo_path.join(format!("forgekit-merge-{key}.lock"))
}

/// Atomically write data to a file.
///
/// Stages the bytes in a temporary sibling, fsyncs, then renames over the
/// target: either the file is fully replaced or it is untouched.
pub fn write_atomic(path: impl AsRef<Path>, data: &[u8]) -> Result<()> {
    let path = path.as_ref();
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    // Staged in the target's directory so the rename stays on one filesystem.
    let mut staged = tempfile::Builder::new()
        .prefix(".forgekit-write-")
        .tempfile_in(parent)?;
    staged.write_all(data)?;
    staged.as_file().sync_all()?;
    staged
        .persist(path)
        .map_err(|err| Error::Io(err.error))?;
    Ok(())
}

/// Atomically write string data to a file.
pub fn write_atomic_str(path: impl AsRef<Path>, data: &str) -> Result<()> {
    write_atomic(path, data.as_bytes())
}

/// Write atomically while holding a lock on `<path>.lock`.
///
/// This is the pattern for files read and written by concurrent forgekit
/// processes (the forge state file).
pub fn write_atomic_locked(path: impl AsRef<Path>, data: &[u8], timeout_ms: u64) -> Result<()> {
    let path = path.as_ref();
    let lock_path = PathBuf::from(format!("{}.lock", path.display()));

    let _lock = FileLock::acquire(&lock_path, timeout_ms)?;
    write_atomic(path, data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use tempfile::TempDir;

    #[test]
    fn acquire_then_contend_then_release() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("test.lock");

        let lock = FileLock::acquire(&lock_path, 1000).unwrap();
        assert!(lock_path.exists());
        assert!(FileLock::try_acquire(&lock_path).unwrap().is_none());

        drop(lock);
        assert!(FileLock::try_acquire(&lock_path).unwrap().is_some());
    }

    #[test]
    fn timeout_returns_lock_failed() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("timeout.lock");

        let _held = FileLock::acquire(&lock_path, 1000).unwrap();
        let result = FileLock::acquire(&lock_path, 50);
        assert!(matches!(result, Err(Error::LockFailed(_))));
    }

    #[test]
    fn contention_visible_across_threads() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("ref.lock");

        let lock = FileLock::acquire(&lock_path, 1000).unwrap();
        let probe_path = lock_path.clone();
        let blocked = thread::spawn(move || {
            FileLock::try_acquire(&probe_path).unwrap().is_none()
        })
        .join()
        .unwrap();
        assert!(blocked);
        drop(lock);
    }

    #[test]
    fn ref_lock_path_flattens_branch_names() {
        let repo = Path::new("/srv/git/demo.git");
        let path = ref_lock_path(repo, "feature/ui-rework");
        assert_eq!(
            path,
            Path::new("/srv/git/demo.git/forgekit-merge-feature_ui-rework.lock")
        );
        assert_eq!(
            ref_lock_path(repo, ""),
            Path::new("/srv/git/demo.git/forgekit-merge-_.lock")
        );
    }

    #[test]
    fn atomic_write_replaces_contents() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("acl.conf");

        write_atomic_str(&file_path, "repo demo\n").unwrap();
        assert_eq!(fs::read_to_string(&file_path).unwrap(), "repo demo\n");

        write_atomic_str(&file_path, "repo other\n").unwrap();
        assert_eq!(fs::read_to_string(&file_path).unwrap(), "repo other\n");
    }

    #[test]
    fn atomic_write_locked_round_trips() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("forge.json");

        write_atomic_locked(&file_path, b"{}", 1000).unwrap();
        assert_eq!(fs::read_to_string(&file_path).unwrap(), "{}");
    }
}
