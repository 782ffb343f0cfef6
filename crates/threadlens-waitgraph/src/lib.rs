//! Thread wait-for graph and deadlock detection for threadlens.
//!
//! [`build`] cross-references the blocked threads of one enumeration with the
//! wait/hold snapshot taken in the same pass and produces thread-to-thread
//! [`WaitEdge`]s. The graph is recomputed from scratch every pass; nothing
//! here survives between passes. [`detect`] searches the edges for cycles.

use std::collections::{BTreeMap, BTreeSet};

use threadlens_types::{
    BlockedWait, ThreadId, ThreadRecord, ThreadState, UnresolvedWait, WaitEdge, WaitSnapshot,
};
use tracing::{trace, warn};

pub mod detect;

pub use detect::{Analysis, DEFAULT_MAX_CYCLES, analyze, analyze_with_limit};

// ── The graph itself ────────────────────────────────────────────

/// Wait-for relationships among the threads of one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WaitGraph {
    /// Sorted by `(waiter, holder, resource)`, no duplicates, no self-loops.
    pub edges: Vec<WaitEdge>,
    /// Blocked waits on resources that have no live holder.
    pub unresolved: Vec<UnresolvedWait>,
    /// Waits on a resource the waiter itself holds. Never turned into edges.
    pub self_waits: Vec<BlockedWait>,
}

/// Build the wait graph for one enumeration.
///
/// Only threads in `threads` whose state is [`ThreadState::Blocked`] can be
/// waiters, and only threads in `threads` can be holders. A wait whose
/// resource has several holders (shared read locks) yields one edge per
/// holder.
pub fn build(threads: &[ThreadRecord], waits: &WaitSnapshot) -> WaitGraph {
    let live: BTreeMap<ThreadId, ThreadState> = threads.iter().map(|t| (t.id, t.state)).collect();

    let mut holders: BTreeMap<&str, BTreeSet<ThreadId>> = BTreeMap::new();
    for hold in &waits.holds {
        if live.contains_key(&hold.holder) {
            holders
                .entry(hold.resource.as_str())
                .or_default()
                .insert(hold.holder);
        }
    }

    let mut graph = WaitGraph::default();
    for wait in &waits.waits {
        match live.get(&wait.thread) {
            Some(ThreadState::Blocked) => {}
            Some(state) => {
                trace!(thread = wait.thread, state = state.as_str(), resource = %wait.resource, "wait ignored; thread not blocked");
                continue;
            }
            None => {
                trace!(thread = wait.thread, resource = %wait.resource, "wait ignored; thread not enumerated");
                continue;
            }
        }

        let Some(resource_holders) = holders.get(wait.resource.as_str()) else {
            graph.unresolved.push(UnresolvedWait {
                waiter: wait.thread,
                resource: wait.resource.clone(),
                kind: wait.kind,
            });
            continue;
        };

        if resource_holders.contains(&wait.thread) {
            warn!(
                thread = wait.thread,
                resource = %wait.resource,
                "thread waits on a resource it holds; no edge emitted"
            );
            graph.self_waits.push(wait.clone());
        }

        for &holder in resource_holders.iter().filter(|&&h| h != wait.thread) {
            graph.edges.push(WaitEdge {
                waiter: wait.thread,
                holder,
                resource: wait.resource.clone(),
                kind: wait.kind,
            });
        }
    }

    graph.edges.sort();
    graph.edges.dedup();
    graph.unresolved.sort();
    graph.unresolved.dedup();
    graph
}

// ── Tests ───────────────────────────────────────────────────────
