use super::tracked::{LockCore, ThreadSite};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, ThreadId};

/// Suspected deadlock: `waiter` is blocked on `lock`, which is held by `blocker`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadlockReport {
    pub lock: String,
    pub waiter: ThreadSite,
    pub blocker: ThreadSite,
}

impl fmt::Display for DeadlockReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} waits for lock '{}' held by {}",
            self.waiter, self.lock, self.blocker
        )
    }
}

/// One edge of the wait-for graph.
pub type WaitLink = DeadlockReport;

/// A closed chain of threads, each waiting for a lock held by the next one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadlockCycle {
    pub links: Vec<WaitLink>,
}

impl fmt::Display for DeadlockCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.links.iter().map(|l| l.to_string()).collect();
        write!(f, "{}", parts.join("; "))
    }
}

#[derive(Debug, Clone)]
pub struct LockSnapshot {
    pub name: String,
    pub blocker: Option<ThreadSite>,
    pub depth: usize,
    pub waiters: Vec<ThreadSite>,
}

/// Every live [`super::ReentrantTrackedLock`] created with this registry.
///
/// Built once by the application entry point and handed to whoever creates locks.
/// Only weak references are kept, a lock deregisters itself when dropped.
#[derive(Debug, Default)]
pub struct LockRegistry {
    next_key: AtomicU64,
    locks: Mutex<HashMap<u64, Weak<LockCore>>>,
}

pub type LockRegistryRef = Arc<LockRegistry>;

impl LockRegistry {
    pub fn new() -> LockRegistryRef {
        Arc::new(Self::default())
    }

    pub(super) fn register(&self, core: &Arc<LockCore>) -> u64 {
        let key = self.next_key.fetch_add(1, Ordering::SeqCst);
        self.locks
            .lock()
            .unwrap()
            .insert(key, Arc::downgrade(core));
        trace!("Registered lock '{}' with key {}", core.name, key);
        key
    }

    pub(super) fn deregister(&self, key: u64) {
        self.locks.lock().unwrap().remove(&key);
    }

    pub fn len(&self) -> usize {
        self.live_locks().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // The registry mutex is never held while a lock state is inspected.
    fn live_locks(&self) -> Vec<Arc<LockCore>> {
        let locks = self.locks.lock().unwrap();
        locks.values().filter_map(|w| w.upgrade()).collect()
    }

    /// Check whether `waiting` is blocked on a lock held by the calling thread.
    pub fn detect_deadlock(&self, waiting: ThreadId) -> Option<DeadlockReport> {
        self.detect_deadlock_as(thread::current().id(), waiting)
    }

    /// Same as [`Self::detect_deadlock`] but from the point of view of `observer`, so a
    /// watchdog thread can evaluate the threads it monitors.
    pub fn detect_deadlock_as(&self, observer: ThreadId, waiting: ThreadId) -> Option<DeadlockReport> {
        for core in self.live_locks() {
            let state = core.state.lock().unwrap();
            let Some(blocker) = &state.blocker else {
                continue;
            };
            if blocker.thread != observer {
                continue;
            }

            if let Some(waiter) = state.waiters.iter().find(|w| w.thread == waiting) {
                let report = DeadlockReport {
                    lock: core.name.clone(),
                    waiter: waiter.clone(),
                    blocker: blocker.clone(),
                };
                warn!("Suspected deadlock: {}", report);
                return Some(report);
            }
        }

        None
    }

    pub fn snapshot(&self) -> Vec<LockSnapshot> {
        let mut snapshots: Vec<LockSnapshot> = self
            .live_locks()
            .iter()
            .map(|core| {
                let state = core.state.lock().unwrap();
                LockSnapshot {
                    name: core.name.clone(),
                    blocker: state.blocker.clone(),
                    depth: state.depth,
                    waiters: state.waiters.clone(),
                }
            })
            .collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    /// Search the wait-for graph of all live locks for cycles.
    ///
    /// A thread waits for at most one lock at a time, so every thread has at most one
    /// outgoing edge and each cycle is found by following edges from any of its members.
    pub fn find_cycles(&self) -> Vec<DeadlockCycle> {
        let mut edges: HashMap<ThreadId, WaitLink> = HashMap::new();
        for snapshot in self.snapshot() {
            let Some(blocker) = snapshot.blocker else {
                continue;
            };
            for waiter in snapshot.waiters {
                edges.insert(
                    waiter.thread,
                    WaitLink {
                        lock: snapshot.name.clone(),
                        waiter,
                        blocker: blocker.clone(),
                    },
                );
            }
        }

        let mut cycles = Vec::new();
        let mut done: HashSet<ThreadId> = HashSet::new();
        let starts: Vec<ThreadId> = edges.keys().copied().collect();

        for start in starts {
            let mut path: Vec<ThreadId> = Vec::new();
            let mut current = start;

            loop {
                if done.contains(&current) {
                    break;
                }
                if let Some(pos) = path.iter().position(|t| *t == current) {
                    let links = path[pos..]
                        .iter()
                        .filter_map(|t| edges.get(t).cloned())
                        .collect();
                    cycles.push(DeadlockCycle { links });
                    break;
                }

                path.push(current);
                match edges.get(&current) {
                    Some(link) => current = link.blocker.thread,
                    None => break,
                }
            }

            done.extend(path);
        }

        cycles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::ReentrantTrackedLock;
    use std::sync::mpsc;
    use std::time::Duration;

    fn wait_for_waiters(registry: &LockRegistry, count: usize) {
        for _ in 0..1000 {
            let waiting: usize = registry.snapshot().iter().map(|s| s.waiters.len()).sum();
            if waiting >= count {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("threads did not start waiting");
    }

    #[test]
    fn test_registry_tracks_live_locks() {
        let registry = LockRegistry::new();
        assert!(registry.is_empty());

        let a = ReentrantTrackedLock::new(&registry, "a");
        {
            let _b = ReentrantTrackedLock::new(&registry, "b");
            assert_eq!(registry.len(), 2);
        }
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.snapshot()[0].name, "a");
        drop(a);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_no_deadlock_without_contention() {
        let registry = LockRegistry::new();
        let lock = ReentrantTrackedLock::new(&registry, "free");
        lock.acquire();
        assert!(registry.detect_deadlock(thread::current().id()).is_none());
        assert!(registry.find_cycles().is_empty());
        lock.release().unwrap();
    }

    #[test]
    fn test_detect_waiter_on_own_lock() {
        let registry = LockRegistry::new();
        let lock = Arc::new(ReentrantTrackedLock::new(&registry, "held"));
        lock.acquire();

        let other = lock.clone();
        let handle = thread::spawn(move || {
            other.acquire();
            other.release().unwrap();
        });
        let waiting = handle.thread().id();
        wait_for_waiters(&registry, 1);

        let report = registry.detect_deadlock(waiting).unwrap();
        assert_eq!(report.lock, "held");
        assert_eq!(report.waiter.thread, waiting);
        assert_eq!(report.blocker.thread, thread::current().id());

        // A chain without a cycle is not reported by the graph search
        assert!(registry.find_cycles().is_empty());

        lock.release().unwrap();
        handle.join().unwrap();
        assert!(registry.detect_deadlock(waiting).is_none());
    }

    // The two threads stay deadlocked until the test process exits.
    #[test]
    fn test_detect_cross_wait_cycle() {
        let registry = LockRegistry::new();
        let a = Arc::new(ReentrantTrackedLock::new(&registry, "A"));
        let b = Arc::new(ReentrantTrackedLock::new(&registry, "B"));

        let (held_tx, held_rx) = mpsc::channel();
        let (go_tx1, go_rx1) = mpsc::channel::<()>();
        let (go_tx2, go_rx2) = mpsc::channel::<()>();

        let (a1, b1, held1) = (a.clone(), b.clone(), held_tx.clone());
        let t1 = thread::Builder::new()
            .name("scan-1".to_string())
            .spawn(move || {
                a1.acquire();
                held1.send(()).unwrap();
                go_rx1.recv().unwrap();
                b1.acquire();
            })
            .unwrap();

        let (a2, b2, held2) = (a.clone(), b.clone(), held_tx);
        let t2 = thread::Builder::new()
            .name("hw-io".to_string())
            .spawn(move || {
                b2.acquire();
                held2.send(()).unwrap();
                go_rx2.recv().unwrap();
                a2.acquire();
            })
            .unwrap();

        held_rx.recv().unwrap();
        held_rx.recv().unwrap();
        go_tx1.send(()).unwrap();
        go_tx2.send(()).unwrap();
        wait_for_waiters(&registry, 2);

        let id1 = t1.thread().id();
        let id2 = t2.thread().id();

        // From thread 2's perspective: thread 1 waits on B, which thread 2 holds
        let report = registry.detect_deadlock_as(id2, id1).unwrap();
        assert_eq!(report.lock, "B");
        assert_eq!(report.waiter.thread, id1);
        assert_eq!(report.blocker.thread, id2);

        // And the other way round
        let report = registry.detect_deadlock_as(id1, id2).unwrap();
        assert_eq!(report.lock, "A");
        assert_eq!(report.waiter.thread_name.as_deref(), Some("hw-io"));

        let cycles = registry.find_cycles();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].links.len(), 2);
        let mut locks: Vec<&str> = cycles[0].links.iter().map(|l| l.lock.as_str()).collect();
        locks.sort();
        assert_eq!(locks, vec!["A", "B"]);
        assert!(cycles[0].to_string().contains("scan-1"));
    }
}
