//! Shared diagnostic snapshot types for threadlens.
//!
//! Everything that ends up in a report lives here so the host-side crates
//! (thread registry, tracked locks), the wait graph and the engine can agree
//! on one model without depending on each other.

use std::time::{SystemTime, UNIX_EPOCH};

use facet::Facet;

mod report;

pub use report::{
    CurrentThread, DiagnosticReport, PassKind, ProcessSummary, StateCounts, ThreadEntry,
    ThreadInfo,
};

/// Opaque thread identifier, unique among the threads of one sampling pass.
pub type ThreadId = u64;

/// Milliseconds since the unix epoch, saturating to 0 on a skewed clock.
pub fn unix_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ── Thread records ───────────────────────────────────────────────

/// Scheduling state of a thread as observed at sample time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Facet)]
#[repr(u8)]
#[facet(rename_all = "snake_case")]
pub enum ThreadState {
    Running,
    /// Waiting on a synchronization primitive another thread may hold.
    Blocked,
    /// Parked, sleeping or waiting without an identifiable resource.
    Waiting,
    Suspended,
    Unknown,
}

impl ThreadState {
    pub fn as_str(self) -> &'static str {
        match self {
            ThreadState::Running => "running",
            ThreadState::Blocked => "blocked",
            ThreadState::Waiting => "waiting",
            ThreadState::Suspended => "suspended",
            ThreadState::Unknown => "unknown",
        }
    }
}

/// One live thread of the host process.
#[derive(Debug, Clone, PartialEq, Eq, Facet)]
pub struct ThreadRecord {
    pub id: ThreadId,
    pub name: String,
    /// Kernel thread id, when the host exposes one.
    pub os_tid: Option<u64>,
    pub is_daemon: bool,
    pub is_alive: bool,
    pub is_main: bool,
    pub state: ThreadState,
    /// Shared by every record of the same enumeration.
    pub enumerated_at_unix_ms: u64,
}

// ── Stacks ───────────────────────────────────────────────────────

/// A single resolved stack frame.
#[derive(Debug, Clone, PartialEq, Eq, Facet)]
pub struct StackFrame {
    /// Best-effort symbol; empty when unresolved.
    pub function_symbol: String,
    pub location: Option<String>,
}

/// An unresolved frame as captured by the host, before symbolication.
#[derive(Debug, Clone, Default, PartialEq, Eq, Facet)]
pub struct RawFrame {
    pub ip: Option<u64>,
    pub symbol: Option<String>,
    pub location: Option<String>,
}

/// Call stack of one thread, innermost frame first.
#[derive(Debug, Clone, PartialEq, Eq, Facet)]
pub struct StackSnapshot {
    pub frames: Vec<StackFrame>,
    pub sampled_at_unix_ms: u64,
}

impl StackSnapshot {
    pub fn empty(sampled_at_unix_ms: u64) -> Self {
        Self {
            frames: Vec::new(),
            sampled_at_unix_ms,
        }
    }
}

// ── Waits ────────────────────────────────────────────────────────

/// How a blocked thread is waiting on its resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Facet)]
#[repr(u8)]
#[facet(rename_all = "snake_case")]
pub enum WaitKind {
    Mutex,
    RwWrite,
    RwRead,
    /// A wait with a timeout (`try_lock_for` and friends).
    Timed,
    /// A retry/backoff loop around a non-blocking attempt.
    Poll,
}

impl WaitKind {
    /// Hard waits are untimed mutual-exclusion waits that cannot give up.
    pub fn is_hard(self) -> bool {
        matches!(self, WaitKind::Mutex | WaitKind::RwWrite | WaitKind::RwRead)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WaitKind::Mutex => "mutex",
            WaitKind::RwWrite => "rw_write",
            WaitKind::RwRead => "rw_read",
            WaitKind::Timed => "timed",
            WaitKind::Poll => "poll",
        }
    }
}

/// `waiter` cannot proceed until `holder` releases `resource`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Facet)]
pub struct WaitEdge {
    pub waiter: ThreadId,
    pub holder: ThreadId,
    pub resource: String,
    pub kind: WaitKind,
}

/// A blocked thread whose resource has no known live holder.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Facet)]
pub struct UnresolvedWait {
    pub waiter: ThreadId,
    pub resource: String,
    pub kind: WaitKind,
}

/// A thread currently blocked on a named resource, as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq, Facet)]
pub struct BlockedWait {
    pub thread: ThreadId,
    pub resource: String,
    pub kind: WaitKind,
}

/// A thread currently holding a named resource, as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq, Facet)]
pub struct ResourceHold {
    pub resource: String,
    pub holder: ThreadId,
}

/// Point-in-time copy of every known wait and hold.
#[derive(Debug, Clone, Default, PartialEq, Eq, Facet)]
pub struct WaitSnapshot {
    pub waits: Vec<BlockedWait>,
    pub holds: Vec<ResourceHold>,
}

// ── Findings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Facet)]
#[repr(u8)]
#[facet(rename_all = "snake_case")]
pub enum DeadlockSeverity {
    /// Every edge of the cycle is a hard mutual-exclusion wait.
    Confirmed,
    /// At least one edge is a timed or polling wait.
    Suspected,
}

impl DeadlockSeverity {
    pub fn as_str(self) -> &'static str {
        match self {
            DeadlockSeverity::Confirmed => "confirmed",
            DeadlockSeverity::Suspected => "suspected",
        }
    }
}

/// One elementary cycle of the wait-for graph.
#[derive(Debug, Clone, PartialEq, Eq, Facet)]
pub struct DeadlockFinding {
    /// Starts at the smallest thread id; wraps from the last back to the first.
    pub cycle: Vec<ThreadId>,
    /// `resources[i]` is what `cycle[i]` waits on while `cycle[i + 1]` holds it.
    pub resources: Vec<String>,
    pub severity: DeadlockSeverity,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hard_waits() {
        assert!(WaitKind::Mutex.is_hard());
        assert!(WaitKind::RwRead.is_hard());
        assert!(WaitKind::RwWrite.is_hard());
        assert!(!WaitKind::Timed.is_hard());
        assert!(!WaitKind::Poll.is_hard());
    }

    #[test]
    fn enums_serialize_snake_case() {
        let edge = WaitEdge {
            waiter: 1,
            holder: 2,
            resource: "db_pool".to_string(),
            kind: WaitKind::RwWrite,
        };
        let json = facet_json::to_string(&edge).unwrap();
        assert!(json.contains("\"rw_write\""), "{json}");
        assert!(json.contains("\"waiter\":1"), "{json}");

        let finding = DeadlockFinding {
            cycle: vec![1, 2],
            resources: vec!["a".to_string(), "b".to_string()],
            severity: DeadlockSeverity::Suspected,
        };
        let json = facet_json::to_string(&finding).unwrap();
        assert!(json.contains("\"suspected\""), "{json}");
    }
}
