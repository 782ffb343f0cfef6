//! Host implementation for the current process.
//!
//! Threads come from the `threadlens-threads` registry, waits from the
//! `threadlens-locks` tracked locks, and process figures from `sysinfo`.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sysinfo::{Pid, System};
use threadlens_threads::CaptureError;
use threadlens_types::{CurrentThread, RawFrame, ThreadRecord, WaitSnapshot};
use tracing::debug;

use crate::host::{
    Host, HostError, ProcessProbe, ProcessStats, StackSource, ThreadSource, WaitSource,
};

pub struct LiveHost {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl LiveHost {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(err) => {
                debug!(error = err, "current pid unavailable; process figures disabled");
                None
            }
        };
        Self {
            system: Mutex::new(System::new()),
            pid,
        }
    }
}

impl Default for LiveHost {
    fn default() -> Self {
        Self::new()
    }
}

impl Host {
    /// Host for the current process.
    pub fn live() -> Self {
        Host::from_single(Arc::new(LiveHost::new()))
    }
}

impl ThreadSource for LiveHost {
    fn threads(&self) -> Result<Vec<ThreadRecord>, HostError> {
        Ok(threadlens_threads::list_threads()
            .into_iter()
            .map(|t| ThreadRecord {
                id: t.id,
                name: t.name,
                os_tid: t.os_tid,
                is_daemon: t.is_daemon,
                is_alive: t.is_alive,
                is_main: t.is_main,
                state: t.state,
                enumerated_at_unix_ms: 0,
            })
            .collect())
    }

    fn current_thread(&self) -> Option<CurrentThread> {
        let thread = std::thread::current();
        let id = threadlens_threads::current_thread_id();
        let is_main = match id {
            Some(id) => threadlens_threads::list_threads()
                .iter()
                .any(|t| t.id == id && t.is_main),
            None => thread.name() == Some("main"),
        };
        Some(CurrentThread {
            id,
            name: thread.name().unwrap_or("<unnamed>").to_string(),
            is_main,
        })
    }
}

impl StackSource for LiveHost {
    fn capture(&self, thread: &ThreadRecord, timeout: Duration) -> Result<Vec<RawFrame>, HostError> {
        threadlens_threads::capture_stack(thread.id, timeout).map_err(|err| match err {
            CaptureError::Unsupported | CaptureError::NoSlot(_) => {
                HostError::Unsupported(err.to_string())
            }
            other => HostError::Failed(other.to_string()),
        })
    }
}

impl WaitSource for LiveHost {
    fn waits(&self) -> WaitSnapshot {
        threadlens_locks::snapshot_locks()
    }
}

impl ProcessProbe for LiveHost {
    fn probe(&self) -> ProcessStats {
        let Some(pid) = self.pid else {
            return ProcessStats::default();
        };
        let mut system = self.system.lock();
        if !system.refresh_process(pid) {
            debug!(pid = pid.as_u32(), "process refresh failed");
        }
        match system.process(pid) {
            Some(process) => ProcessStats {
                pid: pid.as_u32(),
                process_name: process.name().to_string(),
                memory_bytes: process.memory(),
                cpu_percent: process.cpu_usage(),
            },
            None => ProcessStats {
                pid: pid.as_u32(),
                ..ProcessStats::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Barrier, mpsc};
    use std::time::Instant;

    use threadlens_locks::TrackedMutex;
    use threadlens_threads::{current_thread_id, spawn_registered};
    use threadlens_types::DeadlockSeverity;

    use crate::{DiagnosticEngine, EngineConfig};

    #[test]
    fn registered_threads_are_enumerated() {
        let (ready_tx, ready_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let handle = spawn_registered("live-enumeration", false, move || {
            ready_tx.send(current_thread_id().unwrap()).unwrap();
            done_rx.recv().unwrap();
        })
        .unwrap();
        let id = ready_rx.recv().unwrap();

        let threads = LiveHost::new().threads().unwrap();
        assert!(threads.iter().any(|t| t.id == id && t.name == "live-enumeration"));

        done_tx.send(()).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn probe_reports_this_process() {
        let stats = LiveHost::new().probe();
        assert_eq!(stats.pid, std::process::id());
        assert!(!stats.process_name.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn live_lock_inversion_is_detected() {
        let left = Arc::new(TrackedMutex::new("live.left", ()));
        let right = Arc::new(TrackedMutex::new("live.right", ()));
        let barrier = Arc::new(Barrier::new(2));
        let (id_tx, id_rx) = mpsc::channel();

        for (name, first, second) in [
            ("live-alpha", Arc::clone(&left), Arc::clone(&right)),
            ("live-beta", Arc::clone(&right), Arc::clone(&left)),
        ] {
            let barrier = Arc::clone(&barrier);
            let id_tx = id_tx.clone();
            // These threads stay deadlocked until the test process exits.
            spawn_registered(name, true, move || {
                let _first = first.lock();
                id_tx.send(current_thread_id().unwrap()).unwrap();
                barrier.wait();
                let _second = second.lock();
            })
            .unwrap();
        }
        let mut ids = vec![id_rx.recv().unwrap(), id_rx.recv().unwrap()];
        ids.sort();

        let engine = DiagnosticEngine::new(Host::live(), EngineConfig::default());
        let deadline = Instant::now() + Duration::from_secs(10);
        let finding = loop {
            let report = engine.get_thread_stack_info().await.unwrap();
            if let Some(finding) = report.findings.iter().find(|f| f.cycle == ids) {
                assert!(report.thread(ids[0]).unwrap().stack.is_some());
                break finding.clone();
            }
            assert!(Instant::now() < deadline, "deadlock not detected in time");
            tokio::time::sleep(Duration::from_millis(20)).await;
        };

        assert_eq!(finding.severity, DeadlockSeverity::Confirmed);
        let mut resources = finding.resources.clone();
        resources.sort();
        let mut expected = vec![left.resource().to_string(), right.resource().to_string()];
        expected.sort();
        assert_eq!(resources, expected);
    }
}
