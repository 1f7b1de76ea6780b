// ABOUTME: In-process registry of exclusive locks keyed by partition file path.
// ABOUTME: Serializes writers of the same log file while writers of different files run in parallel.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One mutex per partition path. Entries exist only while some caller holds
/// or waits on them.
#[derive(Debug, Default)]
pub struct PartitionLocks {
    entries: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl PartitionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the exclusive lock for `path`. The path's entry
    /// is released even if `f` panics.
    pub fn with_lock<T>(&self, path: &Path, f: impl FnOnce() -> T) -> T {
        let registration = Registration {
            locks: self,
            path,
            entry: self.acquire_entry(path),
        };
        // The guarded data is (), so a panic in another holder leaves
        // nothing inconsistent behind.
        let _guard = registration
            .entry
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f()
    }

    /// Number of paths with a live lock entry.
    pub fn len(&self) -> usize {
        self.registry().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<PathBuf, Arc<Mutex<()>>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn acquire_entry(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut entries = self.registry();
        Arc::clone(entries.entry(path.to_path_buf()).or_default())
    }

    fn release_entry(&self, path: &Path, entry: &Arc<Mutex<()>>) {
        let mut entries = self.registry();
        // Clones are only handed out under the registry lock, so a count of
        // two (the map's and ours) means nobody else holds or waits on it.
        if Arc::strong_count(entry) == 2 {
            entries.remove(path);
        }
    }
}

/// A caller's claim on a registry entry, released on drop.
struct Registration<'a> {
    locks: &'a PartitionLocks,
    path: &'a Path,
    entry: Arc<Mutex<()>>,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.locks.release_entry(self.path, &self.entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn same_path_is_exclusive() {
        let locks = PartitionLocks::new();
        let path = PathBuf::from("/data/ns/dev/2024-01-01/0/device_state_dev.avro");
        let inside = AtomicUsize::new(0);
        let max_inside = AtomicUsize::new(0);

        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..50 {
                        locks.with_lock(&path, || {
                            let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                            max_inside.fetch_max(now, Ordering::SeqCst);
                            thread::yield_now();
                            inside.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                });
            }
        });

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty(), "entries should be dropped after use");
    }

    #[test]
    fn different_paths_do_not_block_each_other() {
        let locks = PartitionLocks::new();
        let a = PathBuf::from("a.avro");
        let b = PathBuf::from("b.avro");
        let (tx, rx) = mpsc::channel();

        thread::scope(|s| {
            locks.with_lock(&a, || {
                s.spawn(|| {
                    locks.with_lock(&b, || tx.send(()).unwrap());
                });
                // Still holding `a` while `b` is taken on another thread.
                rx.recv_timeout(Duration::from_secs(5))
                    .expect("lock on b should not wait for a");
            });
        });

        assert!(locks.is_empty());
    }

    #[test]
    fn panicking_holder_releases_its_entry() {
        let locks = PartitionLocks::new();
        let path = Path::new("panics.avro");

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let _: () = locks.with_lock(path, || panic!("writer failed"));
        }));

        assert!(result.is_err());
        assert!(locks.is_empty(), "entry should be dropped on unwind");
        // The lock is usable again afterwards.
        assert_eq!(locks.with_lock(path, || 7), 7);
    }

    #[test]
    fn with_lock_returns_the_closure_result() {
        let locks = PartitionLocks::new();
        let value = locks.with_lock(Path::new("x"), || 41 + 1);
        assert_eq!(value, 42);
    }
}
