//! Deadlock detection over thread wait-for edges.
//!
//! Tarjan's SCC algorithm narrows the search to strongly connected thread
//! sets; inside each, a depth-first search rooted at every member enumerates
//! the elementary cycles. Each cycle is reported exactly once, rotated to
//! start at its smallest thread id.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use threadlens_types::{DeadlockFinding, DeadlockSeverity, ThreadId, WaitEdge};
use tracing::warn;

/// Upper bound on reported cycles unless the caller picks another one.
pub const DEFAULT_MAX_CYCLES: usize = 64;

/// Result of one analysis.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Analysis {
    /// Ordered by smallest thread id, then cycle length, then the cycle itself.
    pub findings: Vec<DeadlockFinding>,
    /// The cycle limit was reached and the search stopped early.
    pub capped: bool,
    /// Self-loop edges dropped before the search.
    pub discarded_self_loops: usize,
}

// ── Public API ──────────────────────────────────────────────────

/// Find every elementary wait cycle, up to [`DEFAULT_MAX_CYCLES`].
pub fn analyze(edges: &[WaitEdge]) -> Vec<DeadlockFinding> {
    analyze_with_limit(edges, DEFAULT_MAX_CYCLES).findings
}

pub fn analyze_with_limit(edges: &[WaitEdge], max_cycles: usize) -> Analysis {
    let mut analysis = Analysis::default();
    let adj = build_adjacency(edges, &mut analysis.discarded_self_loops);
    let successors: BTreeMap<ThreadId, Vec<ThreadId>> = adj
        .iter()
        .map(|(&from, targets)| (from, targets.keys().copied().collect()))
        .collect();

    let mut cycles: Vec<Vec<ThreadId>> = Vec::new();
    'sccs: for scc in tarjan_scc(&successors) {
        if scc.len() < 2 {
            continue;
        }
        let members: BTreeSet<ThreadId> = scc.into_iter().collect();
        for &root in &members {
            let mut search = CycleSearch {
                root,
                members: &members,
                successors: &successors,
                path: vec![root],
                on_path: HashSet::from([root]),
                limit: max_cycles,
                found: &mut cycles,
            };
            if !search.extend(root) {
                analysis.capped = true;
                break 'sccs;
            }
        }
    }

    if analysis.capped {
        warn!(max_cycles, "cycle limit reached; remaining cycles not reported");
    }

    cycles.sort_by(|a, b| a[0].cmp(&b[0]).then(a.len().cmp(&b.len())).then(a.cmp(b)));
    analysis.findings = cycles
        .into_iter()
        .map(|cycle| to_finding(cycle, &adj))
        .collect();
    analysis
}

// ── Adjacency ───────────────────────────────────────────────────

/// The edge chosen to represent all parallel edges between one pair.
struct PairEdge {
    resource: String,
    hard: bool,
}

/// Collapse edges to one per `(waiter, holder)` pair. A pair is hard when any
/// of its edges is; its resource is the smallest among the edges of that
/// hardness.
fn build_adjacency(
    edges: &[WaitEdge],
    discarded: &mut usize,
) -> BTreeMap<ThreadId, BTreeMap<ThreadId, PairEdge>> {
    let mut adj: BTreeMap<ThreadId, BTreeMap<ThreadId, PairEdge>> = BTreeMap::new();

    for edge in edges {
        if edge.waiter == edge.holder {
            warn!(
                thread = edge.waiter,
                resource = %edge.resource,
                "self-loop wait edge discarded"
            );
            *discarded += 1;
            continue;
        }

        let hard = edge.kind.is_hard();
        let targets = adj.entry(edge.waiter).or_default();
        match targets.get_mut(&edge.holder) {
            None => {
                targets.insert(
                    edge.holder,
                    PairEdge {
                        resource: edge.resource.clone(),
                        hard,
                    },
                );
            }
            Some(existing) => {
                let better = (hard && !existing.hard)
                    || (hard == existing.hard && edge.resource < existing.resource);
                if better {
                    existing.resource = edge.resource.clone();
                    existing.hard = hard;
                }
            }
        }
        adj.entry(edge.holder).or_default();
    }

    adj
}

// ── Tarjan's SCC ────────────────────────────────────────────────

struct TarjanState {
    index_counter: usize,
    stack: Vec<ThreadId>,
    on_stack: HashSet<ThreadId>,
    index: HashMap<ThreadId, usize>,
    lowlink: HashMap<ThreadId, usize>,
    sccs: Vec<Vec<ThreadId>>,
}

fn tarjan_scc(adj: &BTreeMap<ThreadId, Vec<ThreadId>>) -> Vec<Vec<ThreadId>> {
    let mut state = TarjanState {
        index_counter: 0,
        stack: Vec::new(),
        on_stack: HashSet::new(),
        index: HashMap::new(),
        lowlink: HashMap::new(),
        sccs: Vec::new(),
    };

    for &node in adj.keys() {
        if !state.index.contains_key(&node) {
            strongconnect(node, adj, &mut state);
        }
    }

    state.sccs
}

fn strongconnect(v: ThreadId, adj: &BTreeMap<ThreadId, Vec<ThreadId>>, state: &mut TarjanState) {
    let v_index = state.index_counter;
    state.index.insert(v, v_index);
    state.lowlink.insert(v, v_index);
    state.index_counter += 1;
    state.stack.push(v);
    state.on_stack.insert(v);

    let mut v_low = v_index;
    for &w in adj.get(&v).into_iter().flatten() {
        if !state.index.contains_key(&w) {
            strongconnect(w, adj, state);
            if let Some(&w_low) = state.lowlink.get(&w) {
                v_low = v_low.min(w_low);
            }
        } else if state.on_stack.contains(&w)
            && let Some(&w_idx) = state.index.get(&w)
        {
            v_low = v_low.min(w_idx);
        }
    }
    state.lowlink.insert(v, v_low);

    // v is the root of an SCC: pop it.
    if v_low == v_index {
        let mut scc = Vec::new();
        while let Some(w) = state.stack.pop() {
            state.on_stack.remove(&w);
            scc.push(w);
            if w == v {
                break;
            }
        }
        scc.reverse();
        state.sccs.push(scc);
    }
}

// ── Elementary cycles ───────────────────────────────────────────

struct CycleSearch<'a> {
    root: ThreadId,
    members: &'a BTreeSet<ThreadId>,
    successors: &'a BTreeMap<ThreadId, Vec<ThreadId>>,
    path: Vec<ThreadId>,
    on_path: HashSet<ThreadId>,
    limit: usize,
    found: &'a mut Vec<Vec<ThreadId>>,
}

impl CycleSearch<'_> {
    /// Returns `false` once the cycle limit is reached.
    fn extend(&mut self, current: ThreadId) -> bool {
        let successors = self.successors;
        for &next in successors.get(&current).into_iter().flatten() {
            if next == self.root {
                if self.found.len() >= self.limit {
                    return false;
                }
                self.found.push(self.path.clone());
                continue;
            }
            // Cycles through smaller ids were found from those roots already.
            if next < self.root || !self.members.contains(&next) || self.on_path.contains(&next) {
                continue;
            }
            self.path.push(next);
            self.on_path.insert(next);
            let keep_going = self.extend(next);
            self.on_path.remove(&next);
            self.path.pop();
            if !keep_going {
                return false;
            }
        }
        true
    }
}

fn to_finding(
    cycle: Vec<ThreadId>,
    adj: &BTreeMap<ThreadId, BTreeMap<ThreadId, PairEdge>>,
) -> DeadlockFinding {
    let n = cycle.len();
    let mut resources = Vec::with_capacity(n);
    let mut all_hard = true;
    for i in 0..n {
        let (from, to) = (cycle[i], cycle[(i + 1) % n]);
        // Every consecutive pair came from `adj`, so the lookup succeeds.
        if let Some(pair) = adj.get(&from).and_then(|targets| targets.get(&to)) {
            resources.push(pair.resource.clone());
            all_hard &= pair.hard;
        }
    }
    DeadlockFinding {
        cycle,
        resources,
        severity: if all_hard {
            DeadlockSeverity::Confirmed
        } else {
            DeadlockSeverity::Suspected
        },
    }
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use threadlens_types::WaitKind;

    fn edge(waiter: ThreadId, holder: ThreadId, resource: &str, kind: WaitKind) -> WaitEdge {
        WaitEdge {
            waiter,
            holder,
            resource: resource.to_string(),
            kind,
        }
    }

    fn cycles(findings: &[DeadlockFinding]) -> Vec<Vec<ThreadId>> {
        findings.iter().map(|f| f.cycle.clone()).collect()
    }

    #[test]
    fn no_cycles_in_chain() {
        let edges = vec![
            edge(1, 2, "a", WaitKind::Mutex),
            edge(2, 3, "b", WaitKind::Mutex),
        ];
        assert!(analyze(&edges).is_empty());
    }

    #[test]
    fn two_thread_inversion_is_confirmed() {
        let edges = vec![
            edge(1, 2, "L2", WaitKind::Mutex),
            edge(2, 1, "L1", WaitKind::Mutex),
        ];
        let findings = analyze(&edges);
        assert_eq!(
            findings,
            vec![DeadlockFinding {
                cycle: vec![1, 2],
                resources: vec!["L2".to_string(), "L1".to_string()],
                severity: DeadlockSeverity::Confirmed,
            }]
        );
    }

    #[test]
    fn timed_edge_makes_cycle_suspected() {
        let edges = vec![
            edge(1, 2, "L2", WaitKind::Timed),
            edge(2, 1, "L1", WaitKind::Mutex),
        ];
        let findings = analyze(&edges);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, DeadlockSeverity::Suspected);
    }

    #[test]
    fn cycle_starts_at_smallest_id() {
        let edges = vec![
            edge(5, 3, "x", WaitKind::Mutex),
            edge(3, 9, "y", WaitKind::Mutex),
            edge(9, 5, "z", WaitKind::RwWrite),
        ];
        let findings = analyze(&edges);
        assert_eq!(cycles(&findings), vec![vec![3, 9, 5]]);
        assert_eq!(findings[0].resources, vec!["y", "z", "x"]);
    }

    #[test]
    fn self_loops_are_discarded() {
        let edges = vec![
            edge(1, 1, "m", WaitKind::Mutex),
            edge(1, 2, "a", WaitKind::Mutex),
        ];
        let analysis = analyze_with_limit(&edges, DEFAULT_MAX_CYCLES);
        assert!(analysis.findings.is_empty());
        assert_eq!(analysis.discarded_self_loops, 1);
    }

    #[test]
    fn overlapping_cycles_each_reported_in_order() {
        let edges = vec![
            edge(1, 2, "a", WaitKind::Mutex),
            edge(2, 1, "b", WaitKind::Mutex),
            edge(2, 3, "c", WaitKind::Mutex),
            edge(3, 1, "d", WaitKind::Mutex),
            edge(4, 5, "e", WaitKind::Mutex),
            edge(5, 4, "f", WaitKind::Poll),
        ];
        let findings = analyze(&edges);
        assert_eq!(
            cycles(&findings),
            vec![vec![1, 2], vec![1, 2, 3], vec![4, 5]]
        );
        assert_eq!(findings[2].severity, DeadlockSeverity::Suspected);
    }

    #[test]
    fn parallel_edges_prefer_hard_wait() {
        let edges = vec![
            edge(1, 2, "a", WaitKind::Timed),
            edge(1, 2, "b", WaitKind::Mutex),
            edge(2, 1, "c", WaitKind::Mutex),
        ];
        let findings = analyze(&edges);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].resources, vec!["b", "c"]);
        assert_eq!(findings[0].severity, DeadlockSeverity::Confirmed);
    }

    #[test]
    fn cycle_limit_caps_results() {
        // Complete digraph on five threads: far more than three cycles.
        let mut edges = Vec::new();
        for a in 1..=5 {
            for b in 1..=5 {
                if a != b {
                    edges.push(edge(a, b, &format!("r{b}"), WaitKind::Mutex));
                }
            }
        }
        let analysis = analyze_with_limit(&edges, 3);
        assert!(analysis.capped);
        assert_eq!(analysis.findings.len(), 3);

        let all = analyze_with_limit(&edges, usize::MAX);
        assert!(!all.capped);
        // Elementary cycles of K5: sum over k of C(5,k)*(k-1)! = 10+20+30+24 = 84.
        assert_eq!(all.findings.len(), 84);
    }
}
