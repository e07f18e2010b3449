use std::any::Any;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, ThreadId};
use std::time::Duration;

/// Outcome of work run on the owning thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched<T> {
    Done(T),
    /// The user declined, e.g. closed a PIN dialog. Not an error.
    Cancelled,
    Failed(String),
}

impl<T> Dispatched<T> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Dispatched::Cancelled)
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Dispatched<U> {
        match self {
            Dispatched::Done(value) => Dispatched::Done(f(value)),
            Dispatched::Cancelled => Dispatched::Cancelled,
            Dispatched::Failed(e) => Dispatched::Failed(e),
        }
    }

    /// `Ok(None)` for a cancellation.
    pub fn into_result(self) -> Result<Option<T>, String> {
        match self {
            Dispatched::Done(value) => Ok(Some(value)),
            Dispatched::Cancelled => Ok(None),
            Dispatched::Failed(e) => Err(e),
        }
    }
}

impl<T> From<Option<T>> for Dispatched<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => Dispatched::Done(value),
            None => Dispatched::Cancelled,
        }
    }
}

type Job = Box<dyn FnOnce() + Send + 'static>;

struct DispatchShared {
    owner: ThreadId,
    owner_name: Option<String>,
    jobs: Sender<Job>,
}

/// Cloneable, `Send` entry point used by worker threads to run work on the owning thread.
#[derive(Clone)]
pub struct DispatcherHandle {
    shared: Arc<DispatchShared>,
}

/// Owning-thread side of the dispatcher.
///
/// Created on the thread that runs the interactive loop; that thread becomes the only
/// dispatch target for the lifetime of the dispatcher. The loop calls
/// [`Self::process_pending`] (or one of the blocking variants) to run queued requests.
pub struct MainThreadDispatcher {
    handle: DispatcherHandle,
    jobs: Receiver<Job>,
    _not_send: PhantomData<*const ()>,
}

impl MainThreadDispatcher {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        let current = thread::current();

        let shared = DispatchShared {
            owner: current.id(),
            owner_name: current.name().map(|s| s.to_string()),
            jobs: tx,
        };
        info!(
            "Dispatcher bound to owning thread {:?} ({:?})",
            shared.owner, shared.owner_name
        );

        Self {
            handle: DispatcherHandle {
                shared: Arc::new(shared),
            },
            jobs: rx,
            _not_send: PhantomData,
        }
    }

    pub fn handle(&self) -> DispatcherHandle {
        self.handle.clone()
    }

    pub fn owner(&self) -> ThreadId {
        self.handle.shared.owner
    }

    /// Run every request queued so far. Returns how many were run.
    pub fn process_pending(&self) -> usize {
        let mut count = 0;
        loop {
            match self.jobs.try_recv() {
                Ok(job) => {
                    job();
                    count += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        count
    }

    /// Wait up to `timeout` for one request and run it. Returns false if none arrived.
    pub fn process_next(&self, timeout: Duration) -> bool {
        match self.jobs.recv_timeout(timeout) {
            Ok(job) => {
                job();
                true
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    /// Serve requests until `done` returns true, checking it at least every `poll`.
    pub fn run_until(&self, mut done: impl FnMut() -> bool, poll: Duration) {
        while !done() {
            if self.process_next(poll) {
                self.process_pending();
            }
        }
    }
}

impl Default for MainThreadDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatcherHandle {
    pub fn is_owning_thread(&self) -> bool {
        thread::current().id() == self.shared.owner
    }

    /// Run `work` on the owning thread and return its outcome.
    ///
    /// On the owning thread `work` runs in place. From any other thread the caller blocks,
    /// without timeout, until the owning thread has run it. A panic inside `work` is returned
    /// as [`Dispatched::Failed`]. `work` must never wait for the calling thread.
    pub fn call_on_owning_thread<T, F>(&self, work: F) -> Dispatched<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Dispatched<T> + Send + 'static,
    {
        if self.is_owning_thread() {
            return run_guarded(work);
        }

        let (tx, rx) = mpsc::sync_channel(1);
        let job: Job = Box::new(move || {
            let outcome = run_guarded(work);
            if tx.send(outcome).is_err() {
                warn!("Dispatch caller went away before receiving its result");
            }
        });

        if self.shared.jobs.send(job).is_err() {
            let msg = "Owning thread no longer accepts work".to_string();
            error!("{}", msg);
            return Dispatched::Failed(msg);
        }
        debug!(
            "Thread {:?} waiting for work on owning thread {:?}",
            thread::current().id(),
            self.shared.owner
        );

        match rx.recv() {
            Ok(outcome) => outcome,
            Err(_) => {
                let msg = "Owning thread dropped the request without running it".to_string();
                error!("{}", msg);
                Dispatched::Failed(msg)
            }
        }
    }

    /// Run plain work on the owning thread, a panic becomes `Err`.
    pub fn run_on_owning_thread<T, F>(&self, work: F) -> Result<T, String>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        match self.call_on_owning_thread(move || Dispatched::Done(work())) {
            Dispatched::Done(value) => Ok(value),
            Dispatched::Cancelled => Err("work was cancelled".to_string()),
            Dispatched::Failed(e) => Err(e),
        }
    }
}

fn run_guarded<T>(work: impl FnOnce() -> Dispatched<T>) -> Dispatched<T> {
    match panic::catch_unwind(AssertUnwindSafe(work)) {
        Ok(outcome) => outcome,
        Err(payload) => {
            let msg = format!("Work on owning thread panicked: {}", panic_message(&payload));
            error!("{}", msg);
            Dispatched::Failed(msg)
        }
    }
}

fn panic_message(payload: &Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owning_thread_runs_in_place() {
        let dispatcher = MainThreadDispatcher::new();
        let handle = dispatcher.handle();
        assert!(handle.is_owning_thread());

        let outcome = handle.call_on_owning_thread(|| Dispatched::Done(thread::current().id()));
        assert_eq!(outcome, Dispatched::Done(thread::current().id()));

        // Nothing was queued
        assert_eq!(dispatcher.process_pending(), 0);
    }

    #[test]
    fn test_worker_blocks_until_owner_runs_work() {
        let dispatcher = MainThreadDispatcher::new();
        let handle = dispatcher.handle();
        let owner = dispatcher.owner();

        let worker = thread::spawn(move || {
            assert!(!handle.is_owning_thread());
            handle.call_on_owning_thread(move || {
                assert_eq!(thread::current().id(), owner);
                Dispatched::Done(6 * 7)
            })
        });

        let mut processed = 0;
        while !worker.is_finished() {
            if dispatcher.process_next(Duration::from_millis(10)) {
                processed += 1;
            }
        }

        assert_eq!(processed, 1);
        assert_eq!(worker.join().unwrap(), Dispatched::Done(42));
    }

    #[test]
    fn test_cancel_and_panic_are_distinct() {
        let dispatcher = MainThreadDispatcher::new();
        let handle = dispatcher.handle();

        let worker = thread::spawn(move || {
            let cancelled: Dispatched<String> = handle.call_on_owning_thread(|| None.into());
            let failed: Dispatched<String> =
                handle.call_on_owning_thread(|| panic!("device disconnected"));
            (cancelled, failed)
        });

        dispatcher.run_until(|| worker.is_finished(), Duration::from_millis(10));
        let (cancelled, failed) = worker.join().unwrap();

        assert!(cancelled.is_cancelled());
        assert_eq!(cancelled.into_result(), Ok(None));
        match failed {
            Dispatched::Failed(msg) => assert!(msg.contains("device disconnected")),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_dropped_dispatcher_fails_requests() {
        let dispatcher = MainThreadDispatcher::new();
        let handle = dispatcher.handle();
        drop(dispatcher);

        let outcome = thread::spawn(move || handle.run_on_owning_thread(|| 1))
            .join()
            .unwrap();
        assert!(outcome.is_err());
    }

    #[test]
    fn test_run_on_owning_thread_returns_value() {
        let dispatcher = MainThreadDispatcher::new();
        let handle = dispatcher.handle();

        let worker = thread::spawn(move || handle.run_on_owning_thread(|| "pin".to_string()));
        dispatcher.run_until(|| worker.is_finished(), Duration::from_millis(10));
        assert_eq!(worker.join().unwrap(), Ok("pin".to_string()));
    }
}
