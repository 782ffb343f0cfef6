use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use threadlens_types::{ThreadState, WaitKind};

use crate::registry::{LockInfo, WaiterToken};

// ── TrackedMutex ─────────────────────────────────────────────────

pub struct TrackedMutex<T> {
    inner: parking_lot::Mutex<T>,
    info: Arc<LockInfo>,
}

impl<T> TrackedMutex<T> {
    pub fn new(name: &str, value: T) -> Self {
        Self {
            inner: parking_lot::Mutex::new(value),
            info: LockInfo::new(name),
        }
    }

    /// Resource id this lock is reported under.
    pub fn resource(&self) -> &str {
        &self.info.resource
    }

    pub fn lock(&self) -> TrackedMutexGuard<'_, T> {
        let token = WaiterToken::new(&self.info, WaitKind::Mutex);
        let guard = {
            let _blocked = threadlens_threads::enter_state(ThreadState::Blocked);
            self.inner.lock()
        };
        TrackedMutexGuard {
            guard: ManuallyDrop::new(guard),
            info: &self.info,
            holder_id: token.promote(),
        }
    }

    pub fn try_lock(&self) -> Option<TrackedMutexGuard<'_, T>> {
        let guard = self.inner.try_lock()?;
        Some(TrackedMutexGuard {
            guard: ManuallyDrop::new(guard),
            info: &self.info,
            holder_id: self.info.add_holder(),
        })
    }

    /// Timed acquisition; reported as a [`WaitKind::Timed`] wait.
    pub fn try_lock_for(&self, timeout: Duration) -> Option<TrackedMutexGuard<'_, T>> {
        let token = WaiterToken::new(&self.info, WaitKind::Timed);
        let guard = {
            let _blocked = threadlens_threads::enter_state(ThreadState::Blocked);
            self.inner.try_lock_for(timeout)?
        };
        Some(TrackedMutexGuard {
            guard: ManuallyDrop::new(guard),
            info: &self.info,
            holder_id: token.promote(),
        })
    }

    /// Retry `try_lock` up to `attempts` times, sleeping `backoff` in between.
    /// Reported as a [`WaitKind::Poll`] wait.
    pub fn lock_polling(
        &self,
        backoff: Duration,
        attempts: usize,
    ) -> Option<TrackedMutexGuard<'_, T>> {
        let token = WaiterToken::new(&self.info, WaitKind::Poll);
        let guard = {
            let _blocked = threadlens_threads::enter_state(ThreadState::Blocked);
            let mut acquired = None;
            for attempt in 0..attempts {
                if let Some(guard) = self.inner.try_lock() {
                    acquired = Some(guard);
                    break;
                }
                if attempt + 1 < attempts {
                    std::thread::sleep(backoff);
                }
            }
            acquired?
        };
        Some(TrackedMutexGuard {
            guard: ManuallyDrop::new(guard),
            info: &self.info,
            holder_id: token.promote(),
        })
    }
}

pub struct TrackedMutexGuard<'a, T> {
    guard: ManuallyDrop<parking_lot::MutexGuard<'a, T>>,
    info: &'a LockInfo,
    holder_id: Option<u64>,
}

impl<T> Drop for TrackedMutexGuard<'_, T> {
    fn drop(&mut self) {
        unsafe { ManuallyDrop::drop(&mut self.guard) };
        self.info.remove_holder(self.holder_id);
    }
}

impl<T> Deref for TrackedMutexGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for TrackedMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

// ── TrackedRwLock ────────────────────────────────────────────────

pub struct TrackedRwLock<T> {
    inner: parking_lot::RwLock<T>,
    info: Arc<LockInfo>,
}

impl<T> TrackedRwLock<T> {
    pub fn new(name: &str, value: T) -> Self {
        Self {
            inner: parking_lot::RwLock::new(value),
            info: LockInfo::new(name),
        }
    }

    pub fn resource(&self) -> &str {
        &self.info.resource
    }

    pub fn read(&self) -> TrackedRwLockReadGuard<'_, T> {
        let token = WaiterToken::new(&self.info, WaitKind::RwRead);
        let guard = {
            let _blocked = threadlens_threads::enter_state(ThreadState::Blocked);
            self.inner.read()
        };
        TrackedRwLockReadGuard {
            guard: ManuallyDrop::new(guard),
            info: &self.info,
            holder_id: token.promote(),
        }
    }

    pub fn write(&self) -> TrackedRwLockWriteGuard<'_, T> {
        let token = WaiterToken::new(&self.info, WaitKind::RwWrite);
        let guard = {
            let _blocked = threadlens_threads::enter_state(ThreadState::Blocked);
            self.inner.write()
        };
        TrackedRwLockWriteGuard {
            guard: ManuallyDrop::new(guard),
            info: &self.info,
            holder_id: token.promote(),
        }
    }

    /// Timed exclusive acquisition; reported as a [`WaitKind::Timed`] wait.
    pub fn try_write_for(&self, timeout: Duration) -> Option<TrackedRwLockWriteGuard<'_, T>> {
        let token = WaiterToken::new(&self.info, WaitKind::Timed);
        let guard = {
            let _blocked = threadlens_threads::enter_state(ThreadState::Blocked);
            self.inner.try_write_for(timeout)?
        };
        Some(TrackedRwLockWriteGuard {
            guard: ManuallyDrop::new(guard),
            info: &self.info,
            holder_id: token.promote(),
        })
    }
}

pub struct TrackedRwLockReadGuard<'a, T> {
    guard: ManuallyDrop<parking_lot::RwLockReadGuard<'a, T>>,
    info: &'a LockInfo,
    holder_id: Option<u64>,
}

impl<T> Drop for TrackedRwLockReadGuard<'_, T> {
    fn drop(&mut self) {
        unsafe { ManuallyDrop::drop(&mut self.guard) };
        self.info.remove_holder(self.holder_id);
    }
}

impl<T> Deref for TrackedRwLockReadGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}

pub struct TrackedRwLockWriteGuard<'a, T> {
    guard: ManuallyDrop<parking_lot::RwLockWriteGuard<'a, T>>,
    info: &'a LockInfo,
    holder_id: Option<u64>,
}

impl<T> Drop for TrackedRwLockWriteGuard<'_, T> {
    fn drop(&mut self) {
        unsafe { ManuallyDrop::drop(&mut self.guard) };
        self.info.remove_holder(self.holder_id);
    }
}

impl<T> Deref for TrackedRwLockWriteGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for TrackedRwLockWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}
