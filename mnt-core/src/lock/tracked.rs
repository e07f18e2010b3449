use super::registry::LockRegistryRef;
use crate::error::LockError;
use std::fmt;
use std::marker::PhantomData;
use std::panic::Location;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, ThreadId};

/// Source position of an `acquire` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSite {
    pub file: &'static str,
    pub line: u32,
}

impl CallSite {
    #[track_caller]
    pub fn caller() -> Self {
        let location = Location::caller();
        Self {
            file: location.file(),
            line: location.line(),
        }
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// A thread together with the call-site it reached a lock from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadSite {
    pub thread: ThreadId,
    pub thread_name: Option<String>,
    pub site: CallSite,
}

impl ThreadSite {
    fn current(site: CallSite) -> Self {
        let current = thread::current();
        Self {
            thread: current.id(),
            thread_name: current.name().map(|s| s.to_string()),
            site,
        }
    }
}

impl fmt::Display for ThreadSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.thread_name {
            Some(name) => write!(f, "thread '{}' ({:?}) at {}", name, self.thread, self.site),
            None => write!(f, "thread {:?} at {}", self.thread, self.site),
        }
    }
}

#[derive(Debug, Default)]
pub(super) struct LockState {
    pub(super) blocker: Option<ThreadSite>,
    pub(super) depth: usize,
    pub(super) waiters: Vec<ThreadSite>,
}

/// Shared part of a lock, weakly referenced by the registry.
#[derive(Debug)]
pub(super) struct LockCore {
    pub(super) name: String,
    pub(super) state: Mutex<LockState>,
    released: Condvar,
}

/// Reentrant mutual exclusion that records who holds it and who is waiting for it, so the
/// [`super::LockRegistry`] can point at suspected deadlocks.
///
/// The lock does not own data, it guards a logical resource. Acquisition by the thread that
/// already holds it only increments the depth; every `acquire` must be paired with one
/// `release` from the same thread.
pub struct ReentrantTrackedLock {
    core: Arc<LockCore>,
    registry: LockRegistryRef,
    key: u64,
}

impl ReentrantTrackedLock {
    pub fn new(registry: &LockRegistryRef, name: &str) -> Self {
        let core = Arc::new(LockCore {
            name: name.to_string(),
            state: Mutex::new(LockState::default()),
            released: Condvar::new(),
        });
        let key = registry.register(&core);

        Self {
            core,
            registry: registry.clone(),
            key,
        }
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Block until the calling thread holds the lock.
    #[track_caller]
    pub fn acquire(&self) {
        let me = ThreadSite::current(CallSite::caller());
        let mut state = self.core.state.lock().unwrap();

        if let Some(blocker) = &state.blocker {
            if blocker.thread == me.thread {
                state.depth += 1;
                trace!("Lock '{}' re-entered at depth {} by {}", self.core.name, state.depth, me);
                return;
            }

            state.waiters.push(me.clone());
            while state.blocker.is_some() {
                state = self.core.released.wait(state).unwrap();
            }

            if let Some(pos) = state.waiters.iter().position(|w| w.thread == me.thread) {
                state.waiters.remove(pos);
            }
        }

        state.blocker = Some(me);
        state.depth = 1;
    }

    /// Acquire and return a guard that releases on drop.
    #[track_caller]
    pub fn lock(&self) -> TrackedLockGuard<'_> {
        self.acquire();
        TrackedLockGuard {
            lock: self,
            _not_send: PhantomData,
        }
    }

    pub fn release(&self) -> Result<(), LockError> {
        let current = thread::current().id();
        let mut state = self.core.state.lock().unwrap();

        match &state.blocker {
            Some(blocker) if blocker.thread == current => {}
            Some(blocker) => {
                let err = LockError::NotOwner {
                    lock: self.core.name.clone(),
                    holder: blocker.to_string(),
                };
                error!("{}", err);
                return Err(err);
            }
            None => {
                let err = LockError::NotHeld {
                    lock: self.core.name.clone(),
                };
                error!("{}", err);
                return Err(err);
            }
        }

        state.depth -= 1;
        if state.depth == 0 {
            state.blocker = None;
            drop(state);
            self.core.released.notify_all();
        }

        Ok(())
    }

    /// Depth of the current holder, 0 when free.
    pub fn depth(&self) -> usize {
        self.core.state.lock().unwrap().depth
    }

    pub fn is_held_by_current_thread(&self) -> bool {
        let current = thread::current().id();
        let state = self.core.state.lock().unwrap();
        state.blocker.as_ref().is_some_and(|b| b.thread == current)
    }

    pub fn blocker(&self) -> Option<ThreadSite> {
        self.core.state.lock().unwrap().blocker.clone()
    }

    pub fn waiters(&self) -> Vec<ThreadSite> {
        self.core.state.lock().unwrap().waiters.clone()
    }
}

impl Drop for ReentrantTrackedLock {
    fn drop(&mut self) {
        self.registry.deregister(self.key);
    }
}

impl fmt::Debug for ReentrantTrackedLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReentrantTrackedLock")
            .field("name", &self.core.name)
            .field("key", &self.key)
            .finish()
    }
}

/// Releases its [`ReentrantTrackedLock`] once when dropped. Must stay on the acquiring thread.
pub struct TrackedLockGuard<'a> {
    lock: &'a ReentrantTrackedLock,
    _not_send: PhantomData<*const ()>,
}

impl Drop for TrackedLockGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.lock.release() {
            error!("Failed to release guard of lock '{}': {}", self.lock.name(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::LockRegistry;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_depth_follows_acquire_release() {
        let registry = LockRegistry::new();
        let lock = ReentrantTrackedLock::new(&registry, "depth");

        assert_eq!(lock.depth(), 0);
        lock.acquire();
        lock.acquire();
        lock.acquire();
        assert_eq!(lock.depth(), 3);
        assert!(lock.is_held_by_current_thread());

        lock.release().unwrap();
        assert_eq!(lock.depth(), 2);
        lock.release().unwrap();
        lock.release().unwrap();
        assert_eq!(lock.depth(), 0);
        assert!(lock.blocker().is_none());

        // Release beyond zero depth is a usage error
        let err = lock.release().unwrap_err();
        assert!(matches!(err, LockError::NotHeld { .. }));
        assert_eq!(lock.depth(), 0);
    }

    #[test]
    fn test_blocker_records_call_site() {
        let registry = LockRegistry::new();
        let lock = ReentrantTrackedLock::new(&registry, "site");

        let line = line!() + 1;
        let guard = lock.lock();
        let blocker = lock.blocker().unwrap();
        assert_eq!(blocker.thread, thread::current().id());
        assert_eq!(blocker.site.line, line);
        assert!(blocker.site.file.ends_with("tracked.rs"));

        drop(guard);
        assert!(lock.blocker().is_none());
    }

    #[test]
    fn test_release_from_other_thread_fails() {
        let registry = LockRegistry::new();
        let lock = Arc::new(ReentrantTrackedLock::new(&registry, "owner"));
        lock.acquire();

        let other = lock.clone();
        let result = thread::spawn(move || other.release()).join().unwrap();
        assert!(matches!(result, Err(LockError::NotOwner { .. })));

        // Ownership and depth are untouched by the failed release
        assert_eq!(lock.depth(), 1);
        assert!(lock.is_held_by_current_thread());
        lock.release().unwrap();
    }

    #[test]
    fn test_waiter_is_recorded_while_blocked() {
        let registry = LockRegistry::new();
        let lock = Arc::new(ReentrantTrackedLock::new(&registry, "waiters"));
        lock.acquire();

        let (tx, rx) = mpsc::channel();
        let other = lock.clone();
        let handle = thread::Builder::new()
            .name("waiter".to_string())
            .spawn(move || {
                other.acquire();
                tx.send(()).unwrap();
                other.release().unwrap();
            })
            .unwrap();

        while lock.waiters().is_empty() {
            thread::sleep(Duration::from_millis(5));
        }
        let waiters = lock.waiters();
        assert_eq!(waiters.len(), 1);
        assert_eq!(waiters[0].thread_name.as_deref(), Some("waiter"));
        assert!(rx.try_recv().is_err());

        lock.release().unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        handle.join().unwrap();
        assert!(lock.waiters().is_empty());
        assert_eq!(lock.depth(), 0);
    }

    #[test]
    fn test_mutual_exclusion_stress() {
        let registry = LockRegistry::new();
        let lock = Arc::new(ReentrantTrackedLock::new(&registry, "stress"));
        let inside = Arc::new(AtomicUsize::new(0));
        let counter = Arc::new(AtomicUsize::new(0));

        let threads = 8;
        let rounds = 500;
        let mut handles = Vec::new();
        for _ in 0..threads {
            let lock = lock.clone();
            let inside = inside.clone();
            let counter = counter.clone();
            handles.push(thread::spawn(move || {
                for i in 0..rounds {
                    let _guard = lock.lock();
                    assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);

                    // Nested acquisition must not change who is inside
                    if i % 7 == 0 {
                        let _nested = lock.lock();
                        assert_eq!(inside.load(Ordering::SeqCst), 1);
                    }

                    // Non-atomic read-modify-write, only correct under mutual exclusion
                    let value = counter.load(Ordering::Relaxed);
                    thread::yield_now();
                    counter.store(value + 1, Ordering::Relaxed);

                    assert_eq!(inside.fetch_sub(1, Ordering::SeqCst), 1);
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(counter.load(Ordering::SeqCst), threads * rounds);
        assert_eq!(lock.depth(), 0);
    }
}
