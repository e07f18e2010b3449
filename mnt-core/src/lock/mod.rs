mod registry;
mod tracked;
mod watchdog;

pub use registry::{DeadlockCycle, DeadlockReport, LockRegistry, LockRegistryRef, LockSnapshot, WaitLink};
pub use tracked::{CallSite, ReentrantTrackedLock, ThreadSite, TrackedLockGuard};
pub use watchdog::DeadlockWatchdog;
