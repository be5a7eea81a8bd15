//! Mount-point coordinator shared by every worker in the process.
//!
//! When N workers on one host target the same remote filesystem, exactly one
//! of them performs the mount and exactly one performs the unmount; the rest
//! wait on the state and share the reference count. The caller that gets
//! `true` from `acquire`/`release` owns the actual mount/unmount syscall and
//! must report back with `mount_complete`/`unmount_complete`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, OnceLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MountState {
    Init,
    Mounting,
    Mounted,
    Unmounting,
}

#[derive(Debug)]
struct Entry {
    state: MountState,
    refcount: u64,
}

pub struct MountManager {
    entries: Mutex<HashMap<PathBuf, Entry>>,
    settled: Condvar,
}

impl MountManager {
    /// The process-global instance. All workers must go through this one.
    pub fn global() -> &'static MountManager {
        static GLOBAL: OnceLock<MountManager> = OnceLock::new();
        GLOBAL.get_or_init(MountManager::new)
    }

    /// Fresh instance for tests; production code uses `global`.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            settled: Condvar::new(),
        }
    }

    /// Take a reference on `path`. Returns `true` when this caller must
    /// perform the mount (and then call `mount_complete`); `false` when the
    /// mount already exists. Blocks while another caller is mid-transition.
    pub fn acquire(&self, path: &Path) -> bool {
        let mut entries = self.entries.lock().unwrap();
        loop {
            {
                let entry = entries
                    .entry(path.to_path_buf())
                    .or_insert(Entry { state: MountState::Init, refcount: 0 });
                match entry.state {
                    MountState::Init => {
                        entry.state = MountState::Mounting;
                        entry.refcount += 1;
                        return true;
                    }
                    MountState::Mounted => {
                        entry.refcount += 1;
                        return false;
                    }
                    // Someone is mid-transition; wait for the state to settle.
                    MountState::Mounting | MountState::Unmounting => {}
                }
            }
            entries = self.settled.wait(entries).unwrap();
        }
    }

    /// Report the outcome of the mount this caller performed.
    pub fn mount_complete(&self, path: &Path, success: bool) {
        let mut entries = self.entries.lock().unwrap();
        let entry = match entries.get_mut(path) {
            Some(e) if e.state == MountState::Mounting => e,
            other => {
                tracing::error!(
                    path = %path.display(),
                    "mount_complete outside Mounting state: {:?}",
                    other
                );
                std::process::abort();
            }
        };
        if success {
            entry.state = MountState::Mounted;
        } else {
            entry.state = MountState::Init;
            entry.refcount -= 1;
        }
        self.settled.notify_all();
    }

    /// Drop a reference. Returns `true` when this caller must perform the
    /// unmount (and then call `unmount_complete`).
    pub fn release(&self, path: &Path) -> bool {
        let mut entries = self.entries.lock().unwrap();
        let entry = match entries.get_mut(path) {
            Some(e) if e.state == MountState::Mounted => e,
            other => {
                tracing::error!(
                    path = %path.display(),
                    "release outside Mounted state: {:?}",
                    other
                );
                std::process::abort();
            }
        };
        entry.refcount -= 1;
        if entry.refcount == 0 {
            entry.state = MountState::Unmounting;
            return true;
        }
        false
    }

    /// Report that the unmount this caller performed is done.
    pub fn unmount_complete(&self, path: &Path) {
        let mut entries = self.entries.lock().unwrap();
        match entries.get_mut(path) {
            Some(e) if e.state == MountState::Unmounting => {
                e.state = MountState::Init;
            }
            other => {
                tracing::error!(
                    path = %path.display(),
                    "unmount_complete outside Unmounting state: {:?}",
                    other
                );
                std::process::abort();
            }
        }
        self.settled.notify_all();
    }
}

impl Default for MountManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn single_caller_full_lifecycle() {
        let m = MountManager::new();
        let path = Path::new("/bench/a");
        assert!(m.acquire(path), "first acquire performs the mount");
        m.mount_complete(path, true);
        assert!(!m.acquire(path), "second reference just uses it");
        assert!(!m.release(path));
        assert!(m.release(path), "last reference performs the unmount");
        m.unmount_complete(path);
        assert!(m.acquire(path), "after unmount the cycle restarts");
        m.mount_complete(path, true);
    }

    #[test]
    fn failed_mount_lets_a_waiter_retry() {
        let m = Arc::new(MountManager::new());
        let path = PathBuf::from("/bench/flaky");
        assert!(m.acquire(&path));

        let waiter = {
            let m = Arc::clone(&m);
            let path = path.clone();
            std::thread::spawn(move || m.acquire(&path))
        };
        // Give the waiter time to block on the Mounting state.
        std::thread::sleep(Duration::from_millis(50));
        m.mount_complete(&path, false);
        assert!(
            waiter.join().unwrap(),
            "after a failed mount the waiter becomes the mounter"
        );
    }

    #[test]
    fn n_concurrent_acquires_one_mounter() {
        let m = Arc::new(MountManager::new());
        let path = PathBuf::from("/bench/shared");
        let mounters = Arc::new(AtomicU64::new(0));
        let unmounters = Arc::new(AtomicU64::new(0));

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let m = Arc::clone(&m);
                let path = path.clone();
                let mounters = Arc::clone(&mounters);
                std::thread::spawn(move || {
                    if m.acquire(&path) {
                        mounters.fetch_add(1, Ordering::Relaxed);
                        std::thread::sleep(Duration::from_millis(20));
                        m.mount_complete(&path, true);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(mounters.load(Ordering::Relaxed), 1, "exactly one mounter");

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let m = Arc::clone(&m);
                let path = path.clone();
                let unmounters = Arc::clone(&unmounters);
                std::thread::spawn(move || {
                    if m.release(&path) {
                        unmounters.fetch_add(1, Ordering::Relaxed);
                        m.unmount_complete(&path);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(unmounters.load(Ordering::Relaxed), 1, "exactly one unmounter");
    }
}
