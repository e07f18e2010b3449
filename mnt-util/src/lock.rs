use named_lock::{NamedLock, NamedLockGuard};
use super::dirs::get_service_dir;

/// Make sure only one process works on the service directory (and its wallet cache) at a time.
pub fn init_process_lock(service_name: &str) -> Result<(NamedLock, NamedLockGuard), String> {
    let dir = get_service_dir(service_name);
    std::fs::create_dir_all(&dir).map_err(|e| {
        let msg = format!("Failed to create service directory {:?}: {}", dir, e);
        error!("{}", msg);
        msg
    })?;

    let lock_name = format!("{}_lock", service_name);
    let lock = NamedLock::create(&lock_name).map_err(|e| {
        let msg = format!("Failed to create application lock {}: {}", lock_name, e);
        error!("{}", msg);
        msg
    })?;

    let guard = lock.try_lock().map_err(|e| {
        let msg = format!("Another instance of {} is already running: {}", service_name, e);
        error!("{}", msg);
        msg
    })?;

    Ok((lock, guard))
}
