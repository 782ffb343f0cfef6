use facet::Facet;

use crate::{
    DeadlockFinding, StackSnapshot, ThreadId, ThreadRecord, ThreadState, UnresolvedWait, WaitEdge,
};

/// Which operation a sampling pass was run for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Facet)]
#[repr(u8)]
#[facet(rename_all = "snake_case")]
pub enum PassKind {
    /// Enumeration and process summary only.
    Info,
    /// Enumeration, stacks, wait graph and deadlock analysis.
    StackInfo,
}

impl PassKind {
    /// Whether a pass of this kind produces everything `other` needs.
    pub fn satisfies(self, other: PassKind) -> bool {
        self == PassKind::StackInfo || other == PassKind::Info
    }
}

/// Number of threads in each state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Facet)]
pub struct StateCounts {
    pub running: u32,
    pub blocked: u32,
    pub waiting: u32,
    pub suspended: u32,
    pub unknown: u32,
}

impl StateCounts {
    pub fn tally<'a>(states: impl IntoIterator<Item = &'a ThreadState>) -> Self {
        let mut counts = Self::default();
        for state in states {
            match state {
                ThreadState::Running => counts.running += 1,
                ThreadState::Blocked => counts.blocked += 1,
                ThreadState::Waiting => counts.waiting += 1,
                ThreadState::Suspended => counts.suspended += 1,
                ThreadState::Unknown => counts.unknown += 1,
            }
        }
        counts
    }
}

/// The thread that served the diagnostic request.
#[derive(Debug, Clone, PartialEq, Eq, Facet)]
pub struct CurrentThread {
    pub id: Option<ThreadId>,
    pub name: String,
    pub is_main: bool,
}

#[derive(Debug, Clone, PartialEq, Facet)]
pub struct ProcessSummary {
    pub pid: u32,
    pub process_name: String,
    pub thread_count: u32,
    pub main_thread_id: Option<ThreadId>,
    pub worker_thread_count: u32,
    pub current_thread: Option<CurrentThread>,
    /// Resident set size.
    pub memory_bytes: u64,
    /// CPU usage since the previous probe.
    pub cpu_percent: f32,
    pub state_counts: StateCounts,
}

/// One thread of a report with its optional stack.
#[derive(Debug, Clone, PartialEq, Eq, Facet)]
pub struct ThreadEntry {
    pub record: ThreadRecord,
    pub stack: Option<StackSnapshot>,
    /// Set when the stack capture timed out or failed.
    pub sample_degraded: bool,
}

/// Immutable result of one sampling pass.
#[derive(Debug, Clone, PartialEq, Facet)]
pub struct DiagnosticReport {
    pub generation: u64,
    pub kind: PassKind,
    pub sampled_at_unix_ms: u64,
    pub process: ProcessSummary,
    /// Sorted by thread id; ids are unique.
    pub threads: Vec<ThreadEntry>,
    pub edges: Vec<WaitEdge>,
    pub unresolved_waits: Vec<UnresolvedWait>,
    pub findings: Vec<DeadlockFinding>,
    pub advisories: Vec<String>,
    /// The pass deadline expired before every stack was captured or the
    /// process probe answered.
    pub truncated: bool,
}

impl DiagnosticReport {
    pub fn thread(&self, id: ThreadId) -> Option<&ThreadEntry> {
        self.threads
            .binary_search_by_key(&id, |entry| entry.record.id)
            .ok()
            .map(|idx| &self.threads[idx])
    }

    pub fn thread_ids(&self) -> Vec<ThreadId> {
        self.threads.iter().map(|entry| entry.record.id).collect()
    }

    /// Project onto the lightweight `get_thread_info` view.
    pub fn thread_info(&self) -> ThreadInfo {
        ThreadInfo {
            generation: self.generation,
            sampled_at_unix_ms: self.sampled_at_unix_ms,
            process: self.process.clone(),
            threads: self
                .threads
                .iter()
                .map(|entry| entry.record.clone())
                .collect(),
            advisories: self.advisories.clone(),
        }
    }
}

/// Process summary and thread records without stacks or findings.
#[derive(Debug, Clone, PartialEq, Facet)]
pub struct ThreadInfo {
    pub generation: u64,
    pub sampled_at_unix_ms: u64,
    pub process: ProcessSummary,
    pub threads: Vec<ThreadRecord>,
    pub advisories: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_info_satisfies_both() {
        assert!(PassKind::StackInfo.satisfies(PassKind::StackInfo));
        assert!(PassKind::StackInfo.satisfies(PassKind::Info));
        assert!(PassKind::Info.satisfies(PassKind::Info));
        assert!(!PassKind::Info.satisfies(PassKind::StackInfo));
    }

    #[test]
    fn tally_counts_each_state() {
        let states = [
            ThreadState::Running,
            ThreadState::Running,
            ThreadState::Blocked,
            ThreadState::Waiting,
            ThreadState::Unknown,
        ];
        let counts = StateCounts::tally(states.iter());
        assert_eq!(counts.running, 2);
        assert_eq!(counts.blocked, 1);
        assert_eq!(counts.waiting, 1);
        assert_eq!(counts.suspended, 0);
        assert_eq!(counts.unknown, 1);
    }
}
