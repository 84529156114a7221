//! Lock store implementations.
//!
//! `InMemoryLockStore` serializes callers inside one process.
//! `FileLockStore` serializes processes that share a directory: a lock is a
//! file holding its owner, guarded by an OS file lock on the directory.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::debug;

use crate::lock::{LockStore, LockStoreError};

/// Lock table held in memory, keyed by lock id.
#[derive(Debug, Default)]
pub struct InMemoryLockStore {
    held: Mutex<HashMap<String, String>>,
}

impl InMemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current owner of `id`, if held.
    pub fn holder(&self, id: &str) -> Option<String> {
        self.held.lock().ok()?.get(id).cloned()
    }

    fn table(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, LockStoreError> {
        self.held
            .lock()
            .map_err(|_| LockStoreError("lock table poisoned".to_string()))
    }
}

impl LockStore for InMemoryLockStore {
    fn lock(&self, id: &str, owner: &str) -> Result<bool, LockStoreError> {
        let mut table = self.table()?;
        if table.contains_key(id) {
            return Ok(false);
        }
        table.insert(id.to_string(), owner.to_string());
        Ok(true)
    }

    fn unlock(&self, id: &str, owner: &str) -> Result<(), LockStoreError> {
        let mut table = self.table()?;
        if table.get(id).is_some_and(|holder| holder == owner) {
            table.remove(id);
        }
        Ok(())
    }
}

/// Lock table kept as one file per lock in a shared directory.
///
/// The file holds the owner's name. Every `lock` and `unlock` runs under an
/// exclusive lock on `.table` in the same directory, so checking the holder
/// and creating or removing its file is one step for every process sharing
/// the directory. The OS drops that lock when a process dies.
///
/// A lock file is written under a staging name and renamed into place, so
/// it never exists without its owner. A lock file with no owner at all is
/// treated as free.
#[derive(Debug, Clone)]
pub struct FileLockStore {
    dir: PathBuf,
}

impl FileLockStore {
    /// Use `dir` as the lock table, creating it if needed.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, LockStoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| {
            LockStoreError(format!("cannot create lock directory {}: {e}", dir.display()))
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.lock", urlencoding::encode(id)))
    }

    /// Current owner of `id`, if held.
    pub fn holder(&self, id: &str) -> Option<String> {
        read_holder(&self.path_for(id)).ok().flatten()
    }

    /// Exclusive hold on the whole table, released when the file is dropped.
    fn table(&self) -> Result<File, LockStoreError> {
        let path = self.dir.join(".table");
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| LockStoreError(format!("cannot open {}: {e}", path.display())))?;
        file.lock()
            .map_err(|e| LockStoreError(format!("cannot lock {}: {e}", path.display())))?;
        Ok(file)
    }
}

/// Owner recorded in `path`; `None` when the file is missing or empty.
fn read_holder(path: &Path) -> Result<Option<String>, LockStoreError> {
    match fs::read_to_string(path) {
        Ok(holder) if holder.is_empty() => Ok(None),
        Ok(holder) => Ok(Some(holder)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(LockStoreError(format!("cannot read {}: {e}", path.display()))),
    }
}

fn write_staged(staged: &Path, owner: &str) -> std::io::Result<()> {
    let mut file = File::create(staged)?;
    file.write_all(owner.as_bytes())?;
    file.sync_all()
}

impl LockStore for FileLockStore {
    fn lock(&self, id: &str, owner: &str) -> Result<bool, LockStoreError> {
        if owner.is_empty() {
            return Err(LockStoreError("owner is required".to_string()));
        }
        let _table = self.table()?;
        let path = self.path_for(id);
        if read_holder(&path)?.is_some() {
            return Ok(false);
        }

        let staged = path.with_extension("lock.staged");
        if let Err(e) = write_staged(&staged, owner).and_then(|()| fs::rename(&staged, &path)) {
            let _ = fs::remove_file(&staged);
            return Err(LockStoreError(format!("cannot create {}: {e}", path.display())));
        }
        debug!(path = %path.display(), "lock file created");
        Ok(true)
    }

    fn unlock(&self, id: &str, owner: &str) -> Result<(), LockStoreError> {
        let _table = self.table()?;
        let path = self.path_for(id);
        if read_holder(&path)?.as_deref() != Some(owner) {
            return Ok(());
        }
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LockStoreError(format!("cannot remove {}: {e}", path.display()))),
        }
    }
}
