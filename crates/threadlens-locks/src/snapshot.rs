use threadlens_types::{BlockedWait, ResourceHold, WaitSnapshot};
use tracing::trace;

use crate::registry::LOCK_REGISTRY;

/// Copy every waiter and holder of every live tracked lock.
///
/// Each lock's bookkeeping is locked only long enough to clone it; the locks
/// themselves are never touched.
pub fn snapshot_locks() -> WaitSnapshot {
    let infos: Vec<_> = {
        let mut registry = LOCK_REGISTRY.lock();
        registry.retain(|weak| weak.strong_count() > 0);
        registry.iter().filter_map(|weak| weak.upgrade()).collect()
    };

    let mut snapshot = WaitSnapshot::default();
    for info in &infos {
        snapshot
            .waits
            .extend(info.waiters.lock().iter().map(|w| BlockedWait {
                thread: w.thread,
                resource: info.resource.clone(),
                kind: w.kind,
            }));
        snapshot
            .holds
            .extend(info.holders.lock().iter().map(|h| ResourceHold {
                resource: info.resource.clone(),
                holder: h.thread,
            }));
    }

    trace!(
        locks = infos.len(),
        waits = snapshot.waits.len(),
        holds = snapshot.holds.len(),
        "snapshotted tracked locks"
    );
    snapshot
}
