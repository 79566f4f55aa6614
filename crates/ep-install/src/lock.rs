//! Cross-process advisory lock scoped to an install root.

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

pub const LOCK_FILE_NAME: &str = ".lock";

/// Exclusive lock on `<dir>/.lock`.
///
/// Released on drop; the OS releases it if the process dies.
#[derive(Debug)]
pub struct InstallLock {
    file: File,
    path: PathBuf,
}

impl InstallLock {
    fn open(dir: &Path) -> io::Result<(File, PathBuf)> {
        fs::create_dir_all(dir)?;
        let path = dir.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)?;
        Ok((file, path))
    }

    /// Block until the lock is held.
    pub fn acquire(dir: &Path) -> io::Result<Self> {
        let (file, path) = Self::open(dir)?;
        tracing::debug!(lock = %path.display(), "waiting for install lock");
        file.lock_exclusive()?;
        tracing::debug!(lock = %path.display(), "install lock acquired");
        Ok(Self { file, path })
    }

    /// Take the lock only if nobody else holds it.
    pub fn try_acquire(dir: &Path) -> io::Result<Option<Self>> {
        let (file, path) = Self::open(dir)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { file, path })),
            Err(err) if err.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstallLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            tracing::warn!(lock = %self.path.display(), error = %err, "failed to release install lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_is_exclusive_until_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let held = InstallLock::acquire(dir.path()).unwrap();
        assert!(held.path().ends_with(LOCK_FILE_NAME));
        assert!(InstallLock::try_acquire(dir.path()).unwrap().is_none());

        drop(held);
        assert!(InstallLock::try_acquire(dir.path()).unwrap().is_some());
    }
}
