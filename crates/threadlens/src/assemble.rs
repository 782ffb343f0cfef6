use std::collections::BTreeMap;

use threadlens_types::{
    CurrentThread, DiagnosticReport, PassKind, ProcessSummary, StateCounts, ThreadEntry, ThreadId,
    ThreadRecord,
};
use threadlens_waitgraph::{Analysis, WaitGraph};
use tracing::warn;

use crate::host::ProcessStats;
use crate::sample::StackSample;

/// Everything one pass collected, ready to be frozen into a report.
pub struct PassParts {
    pub generation: u64,
    pub kind: PassKind,
    pub sampled_at_unix_ms: u64,
    /// Sorted by id, unique.
    pub threads: Vec<ThreadRecord>,
    pub samples: BTreeMap<ThreadId, StackSample>,
    pub graph: WaitGraph,
    pub analysis: Analysis,
    pub process: ProcessStats,
    pub current_thread: Option<CurrentThread>,
    pub truncated: bool,
}

pub struct ReportAssembler;

impl ReportAssembler {
    pub fn assemble(parts: PassParts) -> DiagnosticReport {
        let PassParts {
            generation,
            kind,
            sampled_at_unix_ms,
            threads,
            mut samples,
            graph,
            analysis,
            process,
            current_thread,
            truncated,
        } = parts;

        debug_assert!(
            threads.windows(2).all(|w| w[0].id < w[1].id),
            "thread records must be sorted with unique ids"
        );

        let state_counts = StateCounts::tally(threads.iter().map(|t| &t.state));
        let main_thread_id = threads.iter().find(|t| t.is_main).map(|t| t.id);
        let worker_thread_count = threads.iter().filter(|t| !t.is_main).count() as u32;

        let mut degraded = 0usize;
        let entries: Vec<ThreadEntry> = threads
            .into_iter()
            .map(|record| {
                let sample = samples.remove(&record.id);
                let sample_degraded = sample.as_ref().is_some_and(|s| s.degraded);
                degraded += usize::from(sample_degraded);
                ThreadEntry {
                    stack: sample.map(|s| s.snapshot),
                    sample_degraded,
                    record,
                }
            })
            .collect();
        for id in samples.keys() {
            warn!(thread = id, "stack sample for unknown thread dropped");
        }

        let mut advisories = Vec::new();
        let waiting = state_counts.waiting + state_counts.blocked;
        if waiting > 0 && waiting > state_counts.running * 2 {
            advisories.push(format!(
                "{waiting} threads are waiting or blocked against {} running; possible deadlock or resource contention",
                state_counts.running
            ));
        }
        for wait in &graph.self_waits {
            advisories.push(format!(
                "thread {} waits on {} which it already holds",
                wait.thread, wait.resource
            ));
        }
        if !graph.unresolved.is_empty() {
            advisories.push(format!(
                "{} blocked waits have no known holder",
                graph.unresolved.len()
            ));
        }
        if analysis.capped {
            advisories.push(format!(
                "cycle search stopped after {} cycles; more may exist",
                analysis.findings.len()
            ));
        }
        if degraded > 0 {
            advisories.push(format!(
                "{degraded} stack samples failed or timed out"
            ));
        }
        if truncated {
            advisories.push("pass deadline expired before the pass finished; missing parts are empty".to_string());
        }

        DiagnosticReport {
            generation,
            kind,
            sampled_at_unix_ms,
            process: ProcessSummary {
                pid: process.pid,
                process_name: process.process_name,
                thread_count: entries.len() as u32,
                main_thread_id,
                worker_thread_count,
                current_thread,
                memory_bytes: process.memory_bytes,
                cpu_percent: process.cpu_percent,
                state_counts,
            },
            threads: entries,
            edges: graph.edges,
            unresolved_waits: graph.unresolved,
            findings: analysis.findings,
            advisories,
            truncated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::record;
    use threadlens_types::{StackSnapshot, ThreadState};

    fn parts(threads: Vec<ThreadRecord>) -> PassParts {
        PassParts {
            generation: 7,
            kind: PassKind::StackInfo,
            sampled_at_unix_ms: 1_000,
            threads,
            samples: BTreeMap::new(),
            graph: WaitGraph::default(),
            analysis: Analysis::default(),
            process: ProcessStats {
                pid: 1,
                process_name: "host".to_string(),
                memory_bytes: 0,
                cpu_percent: 0.0,
            },
            current_thread: None,
            truncated: false,
        }
    }

    #[test]
    fn summary_counts_states_and_main_thread() {
        let report = ReportAssembler::assemble(parts(vec![
            record(1, ThreadState::Running),
            record(2, ThreadState::Running),
            record(3, ThreadState::Waiting),
        ]));
        assert_eq!(report.generation, 7);
        assert_eq!(report.process.thread_count, 3);
        assert_eq!(report.process.main_thread_id, Some(1));
        assert_eq!(report.process.worker_thread_count, 2);
        assert_eq!(report.process.state_counts.running, 2);
        assert_eq!(report.process.state_counts.waiting, 1);
        assert!(report.advisories.is_empty());
    }

    #[test]
    fn many_waiting_threads_raise_advisory() {
        let report = ReportAssembler::assemble(parts(vec![
            record(1, ThreadState::Running),
            record(2, ThreadState::Waiting),
            record(3, ThreadState::Waiting),
            record(4, ThreadState::Blocked),
        ]));
        assert_eq!(report.advisories.len(), 1);
        assert!(report.advisories[0].contains("possible deadlock"));
    }

    #[test]
    fn samples_attach_to_their_threads() {
        let mut p = parts(vec![
            record(1, ThreadState::Running),
            record(2, ThreadState::Running),
        ]);
        p.samples.insert(
            2,
            StackSample {
                snapshot: StackSnapshot::empty(5),
                degraded: true,
            },
        );
        p.samples.insert(
            9,
            StackSample {
                snapshot: StackSnapshot::empty(5),
                degraded: false,
            },
        );
        let report = ReportAssembler::assemble(p);

        assert_eq!(report.thread_ids(), vec![1, 2]);
        assert!(report.thread(1).unwrap().stack.is_none());
        let second = report.thread(2).unwrap();
        assert!(second.sample_degraded);
        assert_eq!(second.stack.as_ref().unwrap().sampled_at_unix_ms, 5);
        assert!(report.advisories.iter().any(|a| a.contains("1 stack samples")));
    }
}
