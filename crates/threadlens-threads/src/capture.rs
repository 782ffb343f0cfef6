// ── Signal-driven capture (unix) ─────────────────────────────────

#[cfg(unix)]
mod imp {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{LazyLock, Once};
    use std::time::{Duration, Instant};

    use parking_lot::Mutex;

    use crate::CaptureError;

    const MAX_THREADS: usize = 256;
    const POLL_INTERVAL: Duration = Duration::from_millis(2);

    struct StackSlot {
        in_use: AtomicBool,
        requested: AtomicBool,
        pthread_id: AtomicUsize,
        backtrace: Mutex<Option<String>>,
    }

    static STACK_SLOTS: LazyLock<Vec<StackSlot>> = LazyLock::new(|| {
        (0..MAX_THREADS)
            .map(|_| StackSlot {
                in_use: AtomicBool::new(false),
                requested: AtomicBool::new(false),
                pthread_id: AtomicUsize::new(0),
                backtrace: Mutex::new(None),
            })
            .collect()
    });

    static INSTALL_HANDLER: Once = Once::new();

    fn pthread_eq(a: usize, b: usize) -> bool {
        unsafe { libc::pthread_equal(a as libc::pthread_t, b as libc::pthread_t) != 0 }
    }

    pub(crate) fn current_pthread() -> usize {
        unsafe { libc::pthread_self() as usize }
    }

    #[cfg(target_os = "linux")]
    pub(crate) fn current_os_tid() -> Option<u64> {
        let tid = unsafe { libc::syscall(libc::SYS_gettid) };
        (tid > 0).then_some(tid as u64)
    }

    #[cfg(not(target_os = "linux"))]
    pub(crate) fn current_os_tid() -> Option<u64> {
        None
    }

    pub(crate) fn is_process_main_thread() -> bool {
        let pid = unsafe { libc::getpid() };
        current_os_tid() == Some(pid as u64)
    }

    #[cfg(target_os = "linux")]
    pub(crate) fn os_thread_alive(tid: u64) -> bool {
        std::path::Path::new(&format!("/proc/self/task/{tid}")).exists()
    }

    #[cfg(not(target_os = "linux"))]
    pub(crate) fn os_thread_alive(_tid: u64) -> bool {
        true
    }

    /// Bind a free slot to the calling thread.
    pub(crate) fn claim_slot() -> Option<usize> {
        let self_id = current_pthread();
        for (i, slot) in STACK_SLOTS.iter().enumerate() {
            if slot
                .in_use
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                slot.requested.store(false, Ordering::Release);
                slot.pthread_id.store(self_id, Ordering::Release);
                *slot.backtrace.lock() = None;
                return Some(i);
            }
        }
        None
    }

    pub(crate) fn release_slot(index: usize) {
        let slot = &STACK_SLOTS[index];
        slot.requested.store(false, Ordering::Release);
        slot.pthread_id.store(0, Ordering::Release);
        slot.in_use.store(false, Ordering::Release);
    }

    fn install_sigprof_handler() {
        INSTALL_HANDLER.call_once(|| {
            LazyLock::force(&STACK_SLOTS);
            unsafe {
                let mut sa: libc::sigaction = std::mem::zeroed();
                sa.sa_sigaction = sigprof_handler as *const () as usize;
                sa.sa_flags = libc::SA_SIGINFO | libc::SA_RESTART;
                libc::sigemptyset(&mut sa.sa_mask);
                libc::sigaction(libc::SIGPROF, &sa, std::ptr::null_mut());
            }
        });
    }

    extern "C" fn sigprof_handler(
        _sig: libc::c_int,
        _info: *mut libc::siginfo_t,
        _ctx: *mut libc::c_void,
    ) {
        let self_id = current_pthread();
        for slot in STACK_SLOTS.iter() {
            if !slot.requested.load(Ordering::Acquire) {
                continue;
            }
            if pthread_eq(slot.pthread_id.load(Ordering::Acquire), self_id) {
                let bt = std::backtrace::Backtrace::force_capture();
                if let Some(mut guard) = slot.backtrace.try_lock() {
                    *guard = Some(format!("{bt}"));
                }
                return;
            }
        }
    }

    /// Clear the slot and interrupt its thread.
    pub(crate) fn request(index: usize, pthread: usize) -> Result<(), CaptureError> {
        install_sigprof_handler();
        let slot = &STACK_SLOTS[index];
        *slot.backtrace.lock() = None;
        slot.requested.store(true, Ordering::Release);

        let rc = unsafe { libc::pthread_kill(pthread as libc::pthread_t, libc::SIGPROF) };
        if rc != 0 {
            slot.requested.store(false, Ordering::Release);
            return Err(CaptureError::Signal(rc));
        }
        Ok(())
    }

    /// Poll the slot until its thread has written a backtrace.
    pub(crate) fn wait_for(index: usize, timeout: Duration) -> Result<String, CaptureError> {
        let slot = &STACK_SLOTS[index];
        let deadline = Instant::now() + timeout;
        let result = loop {
            if let Some(mut guard) = slot.backtrace.try_lock()
                && let Some(text) = guard.take()
            {
                break Ok(text);
            }
            if Instant::now() >= deadline {
                break Err(CaptureError::TimedOut(timeout));
            }
            std::thread::sleep(POLL_INTERVAL);
        };
        slot.requested.store(false, Ordering::Release);
        result
    }
}

// ── Fallback ─────────────────────────────────────────────────────

#[cfg(not(unix))]
mod imp {
    use std::time::Duration;

    use crate::CaptureError;

    pub(crate) fn current_pthread() -> usize {
        0
    }

    pub(crate) fn current_os_tid() -> Option<u64> {
        None
    }

    pub(crate) fn is_process_main_thread() -> bool {
        false
    }

    pub(crate) fn os_thread_alive(_tid: u64) -> bool {
        true
    }

    pub(crate) fn claim_slot() -> Option<usize> {
        None
    }

    pub(crate) fn release_slot(_index: usize) {}

    pub(crate) fn request(_index: usize, _pthread: usize) -> Result<(), CaptureError> {
        Err(CaptureError::Unsupported)
    }

    pub(crate) fn wait_for(_index: usize, _timeout: Duration) -> Result<String, CaptureError> {
        Err(CaptureError::Unsupported)
    }
}

pub(crate) use imp::*;
