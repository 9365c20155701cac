use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::op::Op;

/// The kind of filesystem object a watch was registered against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// A regular file.
    File,
    /// A directory.
    Directory,
}

/// Backend-specific identity of a native watch.
///
/// One variant per backend, exactly as `DESIGN.md` records: a single tagged
/// enum is enough dispatch for this crate, there is no need for a trait
/// object here. The inverse map in [`Registry`] keys off this type, the same
/// role `WatchDescriptor` plays for a single inotify instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Handle {
    Inotify(i32),
    Kqueue(i32),
    EventPort(i32, std::path::PathBuf),
    Windows(usize),
    Ahafs(std::path::PathBuf),
}

/// One entry in the registry: everything needed to normalize events for this
/// path and to tear the watch down again.
#[derive(Debug, Clone)]
pub struct Watch {
    pub path: PathBuf,
    pub handle: Handle,
    pub kind: Kind,
    /// `true` if a caller asked for this watch directly via `Watcher::add`;
    /// `false` if the backend registered it implicitly (a backend never does
    /// this on its own today — reserved for future directory auto-watches).
    pub by_user: bool,
    pub mask: Op,
}

#[derive(Default)]
struct RegistryInner {
    by_path: BTreeMap<PathBuf, Watch>,
    by_handle: HashMap<Handle, PathBuf>,
}

/// The watch registry: forward (path -> Watch) and inverse (handle -> path)
/// maps behind a single mutex.
///
/// The mutex is never held across a blocking backend call — callers build
/// the native handle first and only take the lock to publish or remove the
/// bookkeeping entry.
#[derive(Default)]
pub struct Registry {
    inner: Mutex<RegistryInner>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    /// Publishes a freshly created watch. Returns `false` without
    /// overwriting anything if `path` is already registered — the duplicate-
    /// add policy (idempotent success) is enforced by the caller checking
    /// this return value, not by this method silently merging masks.
    pub fn insert(&self, watch: Watch) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.by_path.contains_key(&watch.path) {
            return false;
        }
        inner.by_handle.insert(watch.handle.clone(), watch.path.clone());
        inner.by_path.insert(watch.path.clone(), watch);
        true
    }

    pub fn remove_by_path(&self, path: &Path) -> Option<Watch> {
        let mut inner = self.inner.lock().unwrap();
        let watch = inner.by_path.remove(path)?;
        inner.by_handle.remove(&watch.handle);
        Some(watch)
    }

    pub fn remove_by_handle(&self, handle: &Handle) -> Option<Watch> {
        let mut inner = self.inner.lock().unwrap();
        let path = inner.by_handle.remove(handle)?;
        inner.by_path.remove(&path)
    }

    pub fn path_for(&self, handle: &Handle) -> Option<PathBuf> {
        let inner = self.inner.lock().unwrap();
        inner.by_handle.get(handle).cloned()
    }

    pub fn contains_path(&self, path: &Path) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.by_path.contains_key(path)
    }

    pub fn get(&self, path: &Path) -> Option<Watch> {
        let inner = self.inner.lock().unwrap();
        inner.by_path.get(path).cloned()
    }

    /// Snapshot of every currently watched path, in sorted order. Backs
    /// `Watcher::watch_list()`.
    pub fn paths(&self) -> Vec<PathBuf> {
        let inner = self.inner.lock().unwrap();
        inner.by_path.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drains every entry, for use during `close()`. Returns them so the
    /// caller can release each native handle.
    pub fn drain(&self) -> Vec<Watch> {
        let mut inner = self.inner.lock().unwrap();
        inner.by_handle.clear();
        inner.by_path.drain().map(|(_, w)| w).collect()
    }
}
