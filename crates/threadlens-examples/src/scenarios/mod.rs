pub mod idle_workers;
pub mod mutex_lock_order_inversion;
pub mod timed_lock_inversion;

use std::time::Duration;

/// Time given to scenario threads to reach their blocking call after the
/// last ready signal.
pub const SETTLE: Duration = Duration::from_millis(200);

pub fn spawn_worker(
    name: impl Into<String>,
    f: impl FnOnce() + Send + 'static,
) -> Result<(), String> {
    let name = name.into();
    threadlens_threads::spawn_registered(name.clone(), true, f)
        .map(drop)
        .map_err(|e| format!("failed to spawn {name}: {e}"))
}
