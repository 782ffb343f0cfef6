// ── Lock registry ────────────────────────────────────────────────

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Weak};

use parking_lot::Mutex;
use threadlens_types::{ThreadId, WaitKind};

pub(crate) static LOCK_REGISTRY: LazyLock<Mutex<Vec<Weak<LockInfo>>>> =
    LazyLock::new(|| Mutex::new(Vec::new()));

static NEXT_LOCK_SERIAL: AtomicU64 = AtomicU64::new(1);

pub(crate) struct Waiter {
    pub(crate) id: u64,
    pub(crate) thread: ThreadId,
    pub(crate) kind: WaitKind,
}

pub(crate) struct Holder {
    pub(crate) id: u64,
    pub(crate) thread: ThreadId,
}

pub(crate) struct LockInfo {
    /// `name#serial`, unique for the lifetime of the process.
    pub(crate) resource: String,
    next_id: AtomicU64,
    pub(crate) waiters: Mutex<Vec<Waiter>>,
    pub(crate) holders: Mutex<Vec<Holder>>,
}

impl LockInfo {
    pub(crate) fn new(name: &str) -> Arc<Self> {
        let serial = NEXT_LOCK_SERIAL.fetch_add(1, Ordering::Relaxed);
        let info = Arc::new(Self {
            resource: format!("{name}#{serial}"),
            next_id: AtomicU64::new(0),
            waiters: Mutex::new(Vec::new()),
            holders: Mutex::new(Vec::new()),
        });
        let mut registry = LOCK_REGISTRY.lock();
        registry.retain(|weak| weak.strong_count() > 0);
        registry.push(Arc::downgrade(&info));
        info
    }

    /// Record the calling thread as waiting. Returns `None` for threads that
    /// never registered, which are invisible to the wait graph anyway.
    pub(crate) fn add_waiter(&self, kind: WaitKind) -> Option<u64> {
        let thread = threadlens_threads::current_thread_id()?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.waiters.lock().push(Waiter { id, thread, kind });
        Some(id)
    }

    pub(crate) fn remove_waiter(&self, id: Option<u64>) {
        if let Some(id) = id {
            self.waiters.lock().retain(|w| w.id != id);
        }
    }

    pub(crate) fn add_holder(&self) -> Option<u64> {
        let thread = threadlens_threads::current_thread_id()?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.holders.lock().push(Holder { id, thread });
        Some(id)
    }

    pub(crate) fn remove_holder(&self, id: Option<u64>) {
        if let Some(id) = id {
            self.holders.lock().retain(|h| h.id != id);
        }
    }

    pub(crate) fn promote_waiter_to_holder(&self, waiter_id: Option<u64>) -> Option<u64> {
        let waiter_id = waiter_id?;
        let holder_id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut waiters = self.waiters.lock();
        let mut holders = self.holders.lock();

        let thread = waiters.iter().find(|w| w.id == waiter_id)?.thread;
        waiters.retain(|w| w.id != waiter_id);
        holders.push(Holder {
            id: holder_id,
            thread,
        });
        Some(holder_id)
    }
}

// ── WaiterToken ──────────────────────────────────────────────────

/// Removes the waiter entry unless it was promoted to a holder.
pub(crate) struct WaiterToken<'a> {
    info: &'a LockInfo,
    pub(crate) id: Option<u64>,
    armed: bool,
}

impl<'a> WaiterToken<'a> {
    pub(crate) fn new(info: &'a LockInfo, kind: WaitKind) -> Self {
        Self {
            info,
            id: info.add_waiter(kind),
            armed: true,
        }
    }

    pub(crate) fn promote(mut self) -> Option<u64> {
        self.armed = false;
        self.info.promote_waiter_to_holder(self.id)
    }
}

impl Drop for WaiterToken<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.info.remove_waiter(self.id);
        }
    }
}
