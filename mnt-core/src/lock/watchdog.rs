use super::registry::{DeadlockCycle, LockRegistryRef};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

/// Background thread that periodically searches the lock registry for wait cycles and reports
/// them. It only reports, stuck threads are never interrupted.
pub struct DeadlockWatchdog {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl DeadlockWatchdog {
    /// Start a watchdog that logs every cycle found at `error!`.
    pub fn start(registry: LockRegistryRef, interval: Duration) -> Result<Self, String> {
        Self::start_with_reporter(registry, interval, |cycle| {
            error!("Deadlock detected: {}", cycle);
        })
    }

    /// Start a watchdog that hands every cycle found to `report`, once per check.
    pub fn start_with_reporter<F>(
        registry: LockRegistryRef,
        interval: Duration,
        report: F,
    ) -> Result<Self, String>
    where
        F: Fn(&DeadlockCycle) + Send + 'static,
    {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let handle = std::thread::Builder::new()
            .name("deadlock-watchdog".to_string())
            .spawn(move || {
                info!("Deadlock watchdog started, interval {:?}", interval);
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            for cycle in registry.find_cycles() {
                                report(&cycle);
                            }
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                info!("Deadlock watchdog stopped");
            })
            .map_err(|e| {
                let msg = format!("Failed to spawn deadlock watchdog thread: {}", e);
                error!("{}", msg);
                msg
            })?;

        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    pub fn stop(&mut self) {
        self.stop_tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Deadlock watchdog thread panicked");
            }
        }
    }
}

impl Drop for DeadlockWatchdog {
    fn drop(&mut self) {
        self.stop();
    }
}
