//! Exclusive ownership of a journal across processes.
//!
//! The lock is a file created with `create_new` next to the journal that
//! records the owner's pid. While it exists no other process may open the
//! journal, so compaction can never rename the file out from under a live
//! writer. A lock left behind by a process that no longer exists is taken
//! over.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};

/// Contents of a lock file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreLockMeta {
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
}

/// A held store lock. Released on drop.
#[derive(Debug)]
pub struct StoreLock {
    path: PathBuf,
    meta: StoreLockMeta,
    released: bool,
}

impl StoreLock {
    /// Lock the store whose journal lives at `journal`.
    ///
    /// Fails with [`StoreError::Locked`] while a live process holds it,
    /// including this one.
    pub fn acquire(journal: &Path) -> StoreResult<Self> {
        let path = Self::path_for(journal);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let meta = StoreLockMeta {
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };

        let mut file = match create_new(&path)? {
            Some(file) => file,
            None => {
                let holder = read_meta(&path).ok();
                match holder {
                    Some(stale) if !process_alive(stale.pid) => {
                        warn!(pid = stale.pid, path = %path.display(), "taking over stale store lock");
                        fs::remove_file(&path)?;
                        create_new(&path)?.ok_or_else(|| StoreError::Locked {
                            path: path.clone(),
                            pid: None,
                        })?
                    }
                    _ => {
                        return Err(StoreError::Locked {
                            path,
                            pid: holder.map(|h| h.pid),
                        })
                    }
                }
            }
        };

        serde_json::to_writer(&mut file, &meta)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        file.sync_all()?;
        debug!(path = %path.display(), pid = meta.pid, "store lock acquired");
        Ok(Self {
            path,
            meta,
            released: false,
        })
    }

    /// `<journal>.lock`, beside the journal.
    pub fn path_for(journal: &Path) -> PathBuf {
        let mut name = journal
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| OsString::from("store"));
        name.push(".lock");
        journal.with_file_name(name)
    }

    /// Who holds the lock of `journal`, if anyone.
    pub fn holder(journal: &Path) -> StoreResult<Option<StoreLockMeta>> {
        match read_meta(&Self::path_for(journal)) {
            Ok(meta) => Ok(Some(meta)),
            Err(StoreError::Io(e)) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn meta(&self) -> &StoreLockMeta {
        &self.meta
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release(mut self) -> StoreResult<()> {
        self.released = true;
        fs::remove_file(&self.path)?;
        Ok(())
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if !self.released {
            let _ = fs::remove_file(&self.path);
        }
    }
}

fn create_new(path: &Path) -> StoreResult<Option<File>> {
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => Ok(Some(file)),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn read_meta(path: &Path) -> StoreResult<StoreLockMeta> {
    let bytes = fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn process_alive(pid: u32) -> bool {
    if pid == std::process::id() {
        return true;
    }
    #[cfg(target_os = "linux")]
    {
        Path::new("/proc").join(pid.to_string()).exists()
    }
    #[cfg(not(target_os = "linux"))]
    {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_refused_until_drop() {
        let dir = tempfile::tempdir().unwrap();
        let journal = dir.path().join("events.journal");
        let lock = StoreLock::acquire(&journal).unwrap();
        assert_eq!(lock.path(), dir.path().join("events.journal.lock"));
        assert_eq!(StoreLock::holder(&journal).unwrap().unwrap().pid, std::process::id());

        match StoreLock::acquire(&journal) {
            Err(StoreError::Locked { pid, .. }) => assert_eq!(pid, Some(std::process::id())),
            other => panic!("expected Locked, got {other:?}"),
        }

        drop(lock);
        assert!(StoreLock::holder(&journal).unwrap().is_none());
        StoreLock::acquire(&journal).unwrap().release().unwrap();
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn lock_of_dead_process_is_taken_over() {
        let dir = tempfile::tempdir().unwrap();
        let journal = dir.path().join("events.journal");
        let dead = StoreLockMeta {
            pid: u32::MAX,
            acquired_at: Utc::now(),
        };
        fs::write(
            StoreLock::path_for(&journal),
            serde_json::to_vec(&dead).unwrap(),
        )
        .unwrap();

        let lock = StoreLock::acquire(&journal).unwrap();
        assert_eq!(lock.meta().pid, std::process::id());
    }

    #[test]
    fn unreadable_lock_is_not_stolen() {
        let dir = tempfile::tempdir().unwrap();
        let journal = dir.path().join("events.journal");
        fs::write(StoreLock::path_for(&journal), b"").unwrap();
        assert!(matches!(
            StoreLock::acquire(&journal),
            Err(StoreError::Locked { pid: None, .. })
        ));
    }
}
