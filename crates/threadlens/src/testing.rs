//! Synthetic host for engine tests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use threadlens_types::{
    CurrentThread, RawFrame, ThreadId, ThreadRecord, ThreadState, WaitSnapshot,
};

use crate::host::{
    Host, HostError, ProcessProbe, ProcessStats, StackSource, ThreadSource, WaitSource,
};

pub(crate) fn record(id: ThreadId, state: ThreadState) -> ThreadRecord {
    ThreadRecord {
        id,
        name: format!("t{id}"),
        os_tid: Some(1000 + id),
        is_daemon: id != 1,
        is_alive: true,
        is_main: id == 1,
        state,
        enumerated_at_unix_ms: 0,
    }
}

#[derive(Default)]
struct FakeState {
    threads: Vec<ThreadRecord>,
    stack_delays: HashMap<ThreadId, Duration>,
    failing_stacks: HashSet<ThreadId>,
    waits: WaitSnapshot,
    enumeration_error: Option<HostError>,
    enumeration_delay: Duration,
    probe_delay: Duration,
}

#[derive(Default)]
pub(crate) struct FakeHost {
    state: Mutex<FakeState>,
    enumerations: AtomicUsize,
}

impl FakeHost {
    pub(crate) fn with_threads(threads: impl IntoIterator<Item = ThreadRecord>) -> Arc<Self> {
        let fake = Self::default();
        fake.state.lock().threads = threads.into_iter().collect();
        Arc::new(fake)
    }

    pub(crate) fn host(self: &Arc<Self>) -> Host {
        Host::from_single(Arc::clone(self))
    }

    pub(crate) fn set_stack_delay(&self, id: ThreadId, delay: Duration) {
        self.state.lock().stack_delays.insert(id, delay);
    }

    pub(crate) fn fail_stack(&self, id: ThreadId) {
        self.state.lock().failing_stacks.insert(id);
    }

    pub(crate) fn set_waits(&self, waits: WaitSnapshot) {
        self.state.lock().waits = waits;
    }

    pub(crate) fn fail_enumeration(&self, error: HostError) {
        self.state.lock().enumeration_error = Some(error);
    }

    pub(crate) fn clear_enumeration_failure(&self) {
        self.state.lock().enumeration_error = None;
    }

    pub(crate) fn set_enumeration_delay(&self, delay: Duration) {
        self.state.lock().enumeration_delay = delay;
    }

    pub(crate) fn set_probe_delay(&self, delay: Duration) {
        self.state.lock().probe_delay = delay;
    }

    /// Number of times the thread list was requested.
    pub(crate) fn enumerations(&self) -> usize {
        self.enumerations.load(Ordering::SeqCst)
    }
}

impl ThreadSource for FakeHost {
    fn threads(&self) -> Result<Vec<ThreadRecord>, HostError> {
        self.enumerations.fetch_add(1, Ordering::SeqCst);
        let (delay, result) = {
            let state = self.state.lock();
            let result = match &state.enumeration_error {
                Some(err) => Err(err.clone()),
                None => Ok(state.threads.clone()),
            };
            (state.enumeration_delay, result)
        };
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        result
    }

    fn current_thread(&self) -> Option<CurrentThread> {
        Some(CurrentThread {
            id: None,
            name: "caller".to_string(),
            is_main: false,
        })
    }
}

impl StackSource for FakeHost {
    fn capture(&self, thread: &ThreadRecord, _timeout: Duration) -> Result<Vec<RawFrame>, HostError> {
        let (delay, failing) = {
            let state = self.state.lock();
            (
                state.stack_delays.get(&thread.id).copied(),
                state.failing_stacks.contains(&thread.id),
            )
        };
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        if failing {
            return Err(HostError::Denied(format!("thread {}", thread.id)));
        }
        Ok(vec![
            RawFrame {
                ip: Some(0x1000 + thread.id),
                symbol: Some(format!("worker_{}::run", thread.id)),
                location: Some("src/worker.rs:10:5".to_string()),
            },
            RawFrame {
                ip: Some(0x2000),
                symbol: None,
                location: None,
            },
        ])
    }
}

impl WaitSource for FakeHost {
    fn waits(&self) -> WaitSnapshot {
        self.state.lock().waits.clone()
    }
}

impl ProcessProbe for FakeHost {
    fn probe(&self) -> ProcessStats {
        let delay = self.state.lock().probe_delay;
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        ProcessStats {
            pid: 4242,
            process_name: "fake-host".to_string(),
            memory_bytes: 64 * 1024 * 1024,
            cpu_percent: 12.5,
        }
    }
}
