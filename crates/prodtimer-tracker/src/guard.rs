use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Exclusive lock on a data file, held by whichever process is allowed to
/// rewrite it. Released on drop or when the process dies.
#[derive(Debug)]
pub struct DataFileGuard {
    file: File,
    lock_path: PathBuf,
}

impl DataFileGuard {
    /// `Ok(None)` when another process already holds the lock for `data_path`.
    pub fn acquire(data_path: &Path) -> Result<Option<Self>> {
        let lock_path = lock_path_for(data_path);
        if let Some(parent) = lock_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create data directory: {}", parent.display())
            })?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("failed to open lock file: {}", lock_path.display()))?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!(lock = %lock_path.display(), "data file lock acquired");
                Ok(Some(Self { file, lock_path }))
            }
            Err(err) if is_contended(&err) => Ok(None),
            Err(err) => Err(err)
                .with_context(|| format!("failed to lock: {}", lock_path.display())),
        }
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for DataFileGuard {
    fn drop(&mut self) {
        if let Err(err) = self.file.unlock() {
            warn!(lock = %self.lock_path.display(), "failed to release lock: {err}");
        }
    }
}

/// `<data file>.lock`, next to the data file.
pub fn lock_path_for(data_path: &Path) -> PathBuf {
    let mut name = data_path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    data_path.with_file_name(name)
}

fn is_contended(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn second_holder_is_refused_until_release() {
        let dir = tempdir().unwrap();
        let data = dir.path().join("data.json");

        let first = DataFileGuard::acquire(&data).unwrap().unwrap();
        assert!(DataFileGuard::acquire(&data).unwrap().is_none());

        drop(first);
        assert!(DataFileGuard::acquire(&data).unwrap().is_some());
    }

    #[test]
    fn separate_data_files_lock_independently() {
        let dir = tempdir().unwrap();
        let _a = DataFileGuard::acquire(&dir.path().join("a.json")).unwrap().unwrap();
        let b = DataFileGuard::acquire(&dir.path().join("nested").join("b.json"))
            .unwrap()
            .unwrap();
        assert_eq!(b.lock_path(), dir.path().join("nested").join("b.json.lock"));
    }

    #[test]
    fn lock_file_sits_beside_data_file() {
        assert_eq!(
            lock_path_for(Path::new("/home/u/.productivity_timer_data.json")),
            PathBuf::from("/home/u/.productivity_timer_data.json.lock")
        );
    }
}
