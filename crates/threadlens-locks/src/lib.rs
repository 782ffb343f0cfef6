//! Tracked wrappers around `parking_lot` locks.
//!
//! Every lock registers itself in a global registry and records, per
//! registered thread:
//!
//! - who is waiting to acquire it, and how (blocking, timed, polling)
//! - who currently holds it
//!
//! While a thread waits its registry state is [`ThreadState::Blocked`].
//! [`snapshot_locks`] turns all of this into the [`WaitSnapshot`] the wait
//! graph is built from. Threads that never registered with
//! `threadlens-threads` can use the locks but are not recorded.
//!
//! [`ThreadState::Blocked`]: threadlens_types::ThreadState::Blocked
//! [`WaitSnapshot`]: threadlens_types::WaitSnapshot

mod registry;
mod snapshot;
mod sync_locks;

pub use snapshot::snapshot_locks;
pub use sync_locks::{
    TrackedMutex, TrackedMutexGuard, TrackedRwLock, TrackedRwLockReadGuard,
    TrackedRwLockWriteGuard,
};
