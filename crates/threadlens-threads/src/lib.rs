//! Thread registry and on-demand stack capture via `pthread_kill(SIGPROF)`.
//!
//! Threads that want to be visible to diagnostics register themselves, either
//! explicitly ([`register_thread`], [`register_thread_guard`]) or by being
//! started through [`spawn_registered`]. Each registered thread carries an
//! atomic state cell that tracked locks and [`enter_state`] guards update, and
//! a signal slot that [`capture_stack`] uses to ask the thread for its own
//! backtrace.
//!
//! On non-unix targets the registry works but stack capture reports
//! [`CaptureError::Unsupported`].

use std::cell::RefCell;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use parking_lot::Mutex;
use threadlens_types::{RawFrame, ThreadId, ThreadState};
use tracing::debug;

mod backtrace;
mod capture;

pub use backtrace::parse_backtrace;

// ── Snapshot type ────────────────────────────────────────────────

/// Copy of one registry entry at the time of [`list_threads`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredThread {
    pub id: ThreadId,
    pub name: String,
    pub os_tid: Option<u64>,
    pub is_daemon: bool,
    pub is_main: bool,
    pub is_alive: bool,
    pub state: ThreadState,
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("thread {0} is not registered")]
    UnknownThread(ThreadId),
    #[error("stack capture is not supported on this platform")]
    Unsupported,
    #[error("no free signal slot for thread {0}")]
    NoSlot(ThreadId),
    #[error("pthread_kill failed with errno {0}")]
    Signal(i32),
    #[error("thread did not respond within {0:?}")]
    TimedOut(Duration),
}

// ── Registry ─────────────────────────────────────────────────────

pub(crate) struct ThreadEntry {
    pub(crate) id: ThreadId,
    name: String,
    os_tid: Option<u64>,
    is_daemon: bool,
    is_main: bool,
    state: AtomicU8,
    pub(crate) slot: Option<usize>,
    /// `pthread_t` of the registered thread, widened to `usize`.
    pub(crate) pthread: usize,
}

static REGISTRY: LazyLock<Mutex<Vec<Arc<ThreadEntry>>>> = LazyLock::new(|| Mutex::new(Vec::new()));
static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: RefCell<Option<Arc<ThreadEntry>>> = const { RefCell::new(None) };
}

fn encode_state(state: ThreadState) -> u8 {
    match state {
        ThreadState::Running => 0,
        ThreadState::Blocked => 1,
        ThreadState::Waiting => 2,
        ThreadState::Suspended => 3,
        ThreadState::Unknown => 4,
    }
}

fn decode_state(raw: u8) -> ThreadState {
    match raw {
        0 => ThreadState::Running,
        1 => ThreadState::Blocked,
        2 => ThreadState::Waiting,
        3 => ThreadState::Suspended,
        _ => ThreadState::Unknown,
    }
}

fn register(name: &str, is_daemon: bool) -> ThreadId {
    if let Some(id) = current_thread_id() {
        return id;
    }

    let id = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
    let os_tid = capture::current_os_tid();
    let is_main = std::thread::current().name() == Some("main") || capture::is_process_main_thread();
    let entry = Arc::new(ThreadEntry {
        id,
        name: name.to_string(),
        os_tid,
        is_daemon,
        is_main,
        state: AtomicU8::new(encode_state(ThreadState::Running)),
        slot: capture::claim_slot(),
        pthread: capture::current_pthread(),
    });
    if entry.slot.is_none() {
        debug!(thread_id = id, name, "signal slots exhausted; stacks for this thread will be unavailable");
    }

    REGISTRY.lock().push(Arc::clone(&entry));
    CURRENT.with(|current| *current.borrow_mut() = Some(entry));
    id
}

/// Register the calling thread. Registering twice returns the existing id.
pub fn register_thread(name: &str) -> ThreadId {
    register(name, false)
}

/// Register the calling thread as a background (daemon) thread.
pub fn register_daemon_thread(name: &str) -> ThreadId {
    register(name, true)
}

/// Remove the calling thread from the registry.
pub fn deregister_thread() {
    let Some(entry) = CURRENT.with(|current| current.borrow_mut().take()) else {
        return;
    };
    REGISTRY.lock().retain(|e| e.id != entry.id);
    if let Some(slot) = entry.slot {
        capture::release_slot(slot);
    }
}

/// RAII guard that deregisters the thread on drop.
pub struct ThreadGuard {
    id: ThreadId,
}

impl ThreadGuard {
    pub fn id(&self) -> ThreadId {
        self.id
    }
}

impl Drop for ThreadGuard {
    fn drop(&mut self) {
        deregister_thread();
    }
}

/// Register the calling thread and return a guard that deregisters on drop.
pub fn register_thread_guard(name: &str) -> ThreadGuard {
    ThreadGuard {
        id: register_thread(name),
    }
}

/// Spawn a named OS thread that is registered for its whole lifetime.
pub fn spawn_registered<F, T>(
    name: impl Into<String>,
    is_daemon: bool,
    f: F,
) -> std::io::Result<std::thread::JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let name = name.into();
    std::thread::Builder::new()
        .name(name.clone())
        .spawn(move || {
            let id = register(&name, is_daemon);
            let _guard = ThreadGuard { id };
            f()
        })
}

/// Registry id of the calling thread, if it registered.
pub fn current_thread_id() -> Option<ThreadId> {
    CURRENT.with(|current| current.borrow().as_ref().map(|e| e.id))
}

/// Update the calling thread's published state. No-op when unregistered.
pub fn set_current_state(state: ThreadState) {
    CURRENT.with(|current| {
        if let Some(entry) = current.borrow().as_ref() {
            entry.state.store(encode_state(state), Ordering::Release);
        }
    });
}

fn current_state() -> Option<ThreadState> {
    CURRENT.with(|current| {
        current
            .borrow()
            .as_ref()
            .map(|e| decode_state(e.state.load(Ordering::Acquire)))
    })
}

/// Restores the previous state of the calling thread on drop.
pub struct StateGuard {
    previous: Option<ThreadState>,
}

impl Drop for StateGuard {
    fn drop(&mut self) {
        if let Some(previous) = self.previous {
            set_current_state(previous);
        }
    }
}

/// Publish `state` for the calling thread until the guard is dropped.
pub fn enter_state(state: ThreadState) -> StateGuard {
    let previous = current_state();
    set_current_state(state);
    StateGuard { previous }
}

/// Copy every registry entry.
pub fn list_threads() -> Vec<RegisteredThread> {
    REGISTRY
        .lock()
        .iter()
        .map(|entry| RegisteredThread {
            id: entry.id,
            name: entry.name.clone(),
            os_tid: entry.os_tid,
            is_daemon: entry.is_daemon,
            is_main: entry.is_main,
            is_alive: entry.os_tid.is_none_or(capture::os_thread_alive),
            state: decode_state(entry.state.load(Ordering::Acquire)),
        })
        .collect()
}

/// Capture the current stack of a registered thread.
///
/// The target thread is interrupted with `SIGPROF` and records its own
/// backtrace; this waits at most `timeout` for it to do so. The calling
/// thread is captured directly.
pub fn capture_stack(id: ThreadId, timeout: Duration) -> Result<Vec<RawFrame>, CaptureError> {
    if current_thread_id() == Some(id) {
        let bt = std::backtrace::Backtrace::force_capture();
        return Ok(parse_backtrace(&format!("{bt}")));
    }

    let registry = REGISTRY.lock();
    let Some(entry) = registry.iter().find(|e| e.id == id).cloned() else {
        return Err(CaptureError::UnknownThread(id));
    };
    if !cfg!(unix) {
        return Err(CaptureError::Unsupported);
    }
    let slot = entry.slot.ok_or(CaptureError::NoSlot(id))?;
    // The registry lock is held while signalling so the target cannot
    // deregister and exit in between.
    capture::request(slot, entry.pthread)?;
    drop(registry);

    let text = capture::wait_for(slot, timeout)?;
    Ok(parse_backtrace(&text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn spawned_thread_is_listed_and_removed() {
        let (ready_tx, ready_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let handle = spawn_registered("registry-test-worker", true, move || {
            ready_tx.send(current_thread_id()).unwrap();
            done_rx.recv().unwrap();
        })
        .unwrap();

        let id = ready_rx.recv().unwrap().expect("worker registered");
        let listed = list_threads();
        let entry = listed.iter().find(|t| t.id == id).expect("listed");
        assert_eq!(entry.name, "registry-test-worker");
        assert!(entry.is_daemon);
        assert!(!entry.is_main);
        assert!(entry.is_alive);
        assert_eq!(entry.state, ThreadState::Running);

        done_tx.send(()).unwrap();
        handle.join().unwrap();
        assert!(list_threads().iter().all(|t| t.id != id));
    }

    #[test]
    fn registering_twice_keeps_one_entry() {
        let handle = std::thread::spawn(|| {
            let first = register_thread("twice");
            let second = register_thread("twice");
            let count = list_threads().iter().filter(|t| t.id == first).count();
            deregister_thread();
            (first, second, count)
        });
        let (first, second, count) = handle.join().unwrap();
        assert_eq!(first, second);
        assert_eq!(count, 1);
    }

    #[test]
    fn state_guard_restores_previous_state() {
        let handle = std::thread::spawn(|| {
            let _guard = register_thread_guard("state-guard");
            let id = current_thread_id().unwrap();
            let state_of = |id| list_threads().into_iter().find(|t| t.id == id).unwrap().state;

            {
                let _blocked = enter_state(ThreadState::Blocked);
                assert_eq!(state_of(id), ThreadState::Blocked);
            }
            assert_eq!(state_of(id), ThreadState::Running);
        });
        handle.join().unwrap();
    }

    #[test]
    fn unregistered_thread_has_no_id() {
        let id = std::thread::spawn(current_thread_id).join().unwrap();
        assert_eq!(id, None);
    }

    #[test]
    fn capture_unknown_thread_fails() {
        let err = capture_stack(u64::MAX, Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, CaptureError::UnknownThread(_)));
    }

    #[cfg(unix)]
    #[test]
    fn capture_own_stack_directly() {
        let handle = std::thread::spawn(|| {
            let guard = register_thread_guard("self-capture");
            capture_stack(guard.id(), Duration::from_millis(100)).unwrap()
        });
        let frames = handle.join().unwrap();
        assert!(!frames.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn capture_parked_thread_via_signal() {
        let (ready_tx, ready_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let handle = spawn_registered("signal-capture-target", false, move || {
            ready_tx.send(current_thread_id().unwrap()).unwrap();
            done_rx.recv().unwrap();
        })
        .unwrap();

        let id = ready_rx.recv().unwrap();
        let frames = capture_stack(id, Duration::from_secs(2)).unwrap();
        assert!(!frames.is_empty());
        assert!(
            frames
                .iter()
                .all(|f| !f.symbol.as_deref().unwrap_or("").contains("sigprof_handler"))
        );

        done_tx.send(()).unwrap();
        handle.join().unwrap();
    }
}
