use std::{
    collections::HashSet,
    fs::OpenOptions,
    io,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use walkdir::WalkDir;

/// Lock files held by this process. A `<file>.lock` next to a recording
/// marks that broadcast as being recorded.
#[derive(Debug, Default)]
pub struct LockRegistry {
    active: Mutex<HashSet<PathBuf>>,
}

/// Removes its lock file when dropped.
#[derive(Debug)]
pub struct LockGuard<'a> {
    registry: &'a LockRegistry,
    path: PathBuf,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn active(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        // the set stays consistent even if a holder panicked
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Creates `path`. Returns `None` when the lock file already exists.
    pub fn acquire(&self, path: &Path) -> io::Result<Option<LockGuard<'_>>> {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(_) => {
                self.active().insert(path.to_path_buf());
                Ok(Some(LockGuard {
                    registry: self,
                    path: path.to_path_buf(),
                }))
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn len(&self) -> usize {
        self.active().len()
    }

    pub fn is_empty(&self) -> bool {
        self.active().is_empty()
    }

    fn release(&self, path: &Path) {
        self.active().remove(path);
        remove_lock(path);
    }

    /// Deletes every lock this process still holds.
    pub fn release_all(&self) {
        let paths = self.active().drain().collect::<Vec<_>>();
        if paths.is_empty() {
            return;
        }

        info!("Removing {} lock file(s)", paths.len());
        for path in paths {
            remove_lock(&path);
        }
    }
}

impl LockGuard<'_> {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.registry.release(&self.path);
    }
}

fn remove_lock(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("Removed lock file {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => (),
        Err(e) => warn!("Could not remove lock file {}: {}", path.display(), e),
    }
}

/// Deletes `*.lock` files left behind under `base` by an earlier run.
/// Returns how many were removed.
pub fn cleanup_stale(base: &Path) -> usize {
    debug!("Searching for stale lock files in {}", base.display());

    if !base.exists() {
        debug!("Recording directory does not exist: {}", base.display());
        return 0;
    }

    let locks = WalkDir::new(base)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().map(|ext| ext == "lock").unwrap_or(false))
        .map(|e| e.into_path())
        .collect::<Vec<_>>();
    debug!("Found {} lock file(s)", locks.len());

    let mut removed = 0;
    for lock in locks {
        match std::fs::remove_file(&lock) {
            Ok(()) => {
                removed += 1;
                debug!("Removed stale lock file {}", lock.display());
            }
            Err(e) => warn!("Could not remove lock file {}: {}", lock.display(), e),
        }
    }

    if removed > 0 {
        info!("Removed {} stale lock file(s)", removed);
    }

    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_and_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.ts.lock");
        let registry = LockRegistry::new();

        let guard = registry.acquire(&path).unwrap().expect("lock is free");
        assert!(path.exists());
        assert_eq!(guard.path(), path.as_path());
        assert_eq!(registry.len(), 1);

        assert!(registry.acquire(&path).unwrap().is_none(), "lock is held");

        drop(guard);
        assert!(!path.exists());
        assert!(registry.is_empty());
        assert!(registry.acquire(&path).unwrap().is_some());
    }

    #[test]
    fn held_by_someone_else() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.ts.lock");
        std::fs::write(&path, b"").unwrap();

        let registry = LockRegistry::new();
        assert!(registry.acquire(&path).unwrap().is_none());
        assert!(path.exists(), "foreign lock must not be removed");
        assert!(registry.is_empty());
    }

    #[test]
    fn missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let registry = LockRegistry::new();
        assert!(registry.acquire(&dir.path().join("nope/x.lock")).is_err());
        assert_eq!(cleanup_stale(&dir.path().join("nope")), 0);
    }

    #[test]
    fn release_all() {
        let dir = tempfile::tempdir().unwrap();
        let registry = LockRegistry::new();
        let a = dir.path().join("a.lock");
        let b = dir.path().join("b.lock");

        let guard_a = registry.acquire(&a).unwrap().unwrap();
        let guard_b = registry.acquire(&b).unwrap().unwrap();
        registry.release_all();

        assert!(!a.exists() && !b.exists());
        assert!(registry.is_empty());

        // guards dropping afterwards is harmless
        drop(guard_a);
        drop(guard_b);
    }

    #[test]
    fn stale_locks() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("author/sub");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join("top.ts.lock"), b"").unwrap();
        std::fs::write(nested.join("deep.ts.lock"), b"").unwrap();
        std::fs::write(nested.join("deep.ts"), b"video").unwrap();

        assert_eq!(cleanup_stale(dir.path()), 2);
        assert!(nested.join("deep.ts").exists());
        assert!(!nested.join("deep.ts.lock").exists());
        assert_eq!(cleanup_stale(dir.path()), 0);
    }
}
