//! The diagnostic service facade.
//!
//! A [`DiagnosticEngine`] runs at most one sampling pass at a time. Passes run
//! on their own tokio task, so a caller that stops waiting does not strand
//! the callers sharing its pass. The phase flag, the generation counter and
//! the report cache live behind a single lock.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use threadlens_types::{CurrentThread, DiagnosticReport, PassKind, ThreadInfo, unix_now_ms};
use threadlens_waitgraph::{Analysis, WaitGraph};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::assemble::{PassParts, ReportAssembler};
use crate::config::{ConcurrencyPolicy, EngineConfig};
use crate::enumerate::Enumerator;
use crate::error::DiagnosticError;
use crate::host::{Host, ProcessStats};
use crate::sample::{SampleBatch, Sampler};

type PassOutcome = Result<Arc<DiagnosticReport>, DiagnosticError>;

enum Phase {
    Idle,
    Sampling {
        kind: PassKind,
        done: watch::Receiver<Option<PassOutcome>>,
    },
}

struct EngineState {
    phase: Phase,
    generation: u64,
    latest: Option<Arc<DiagnosticReport>>,
    history: VecDeque<Arc<DiagnosticReport>>,
    shut_down: bool,
}

struct EngineInner {
    host: Host,
    config: EngineConfig,
    state: Mutex<EngineState>,
}

#[derive(Clone)]
pub struct DiagnosticEngine {
    inner: Arc<EngineInner>,
}

impl DiagnosticEngine {
    pub fn new(host: Host, config: EngineConfig) -> Self {
        debug!(?config, "diagnostic engine created");
        Self {
            inner: Arc::new(EngineInner {
                host,
                config,
                state: Mutex::new(EngineState {
                    phase: Phase::Idle,
                    generation: 0,
                    latest: None,
                    history: VecDeque::new(),
                    shut_down: false,
                }),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Process summary and thread records. Does not sample stacks.
    pub async fn get_thread_info(&self) -> Result<ThreadInfo, DiagnosticError> {
        Ok(self.request(PassKind::Info).await?.thread_info())
    }

    /// Full report: stacks, wait edges and deadlock findings.
    pub async fn get_thread_stack_info(&self) -> Result<Arc<DiagnosticReport>, DiagnosticError> {
        self.request(PassKind::StackInfo).await
    }

    /// Run a pass of `kind`, or share one already running.
    pub async fn request(&self, kind: PassKind) -> PassOutcome {
        let current_thread = self.inner.host.threads.current_thread();

        loop {
            let (running, mut done) = {
                let mut state = self.inner.state.lock();
                if state.shut_down {
                    return Err(DiagnosticError::ShutDown);
                }
                let in_flight = match &state.phase {
                    Phase::Idle => None,
                    Phase::Sampling { kind, done } => Some((*kind, done.clone())),
                };
                match in_flight {
                    Some((running, done)) => {
                        if self.inner.config.concurrency == ConcurrencyPolicy::Reject {
                            debug!(requested = ?kind, running = ?running, "request rejected; pass in flight");
                            return Err(DiagnosticError::Busy);
                        }
                        (running, done)
                    }
                    None => {
                        let (tx, rx) = watch::channel(None);
                        state.phase = Phase::Sampling {
                            kind,
                            done: rx.clone(),
                        };
                        drop(state);
                        self.spawn_pass(kind, current_thread.clone(), tx);
                        (kind, rx)
                    }
                }
            };

            let outcome = match done.wait_for(Option::is_some).await {
                Ok(outcome) => outcome.clone(),
                Err(_) => Some(Err(DiagnosticError::Internal(
                    "diagnostic pass ended without a result".to_string(),
                ))),
            };
            if running.satisfies(kind) {
                return outcome.unwrap_or_else(|| {
                    Err(DiagnosticError::Internal("diagnostic pass result missing".to_string()))
                });
            }
            debug!(requested = ?kind, finished = ?running, "finished pass did not cover request; starting another");
        }
    }

    fn spawn_pass(
        &self,
        kind: PassKind,
        current_thread: Option<CurrentThread>,
        done: watch::Sender<Option<PassOutcome>>,
    ) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let started = Instant::now();
            let pass = tokio::spawn(run_pass(
                inner.host.clone(),
                inner.config.clone(),
                kind,
                current_thread,
            ));
            let result = match pass.await {
                Ok(result) => result,
                Err(err) => Err(DiagnosticError::Internal(format!("diagnostic pass failed: {err}"))),
            };

            let outcome: PassOutcome = {
                let mut state = inner.state.lock();
                // Only completed passes are numbered.
                let outcome = result.map(|mut report| {
                    state.generation += 1;
                    report.generation = state.generation;
                    Arc::new(report)
                });
                if let Ok(report) = &outcome {
                    info!(
                        generation = report.generation,
                        kind = ?kind,
                        threads = report.threads.len(),
                        edges = report.edges.len(),
                        findings = report.findings.len(),
                        truncated = report.truncated,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "diagnostic pass complete"
                    );
                    if let Some(previous) = state.latest.replace(Arc::clone(report))
                        && inner.config.history_len > 0
                    {
                        state.history.push_back(previous);
                        while state.history.len() > inner.config.history_len {
                            state.history.pop_front();
                        }
                    }
                }
                state.phase = Phase::Idle;
                outcome
            };
            let _ = done.send(Some(outcome));
        });
    }

    /// The most recent successful report.
    pub fn latest_report(&self) -> Option<Arc<DiagnosticReport>> {
        self.inner.state.lock().latest.clone()
    }

    /// Earlier reports, oldest first, excluding the latest.
    pub fn history(&self) -> Vec<Arc<DiagnosticReport>> {
        self.inner.state.lock().history.iter().cloned().collect()
    }

    /// Generation of the most recently completed pass; 0 before the first.
    /// Failed passes are not counted.
    pub fn generation(&self) -> u64 {
        self.inner.state.lock().generation
    }

    /// Wait for any pass in flight, then refuse new requests.
    pub async fn shutdown(&self) {
        let in_flight = {
            let mut state = self.inner.state.lock();
            state.shut_down = true;
            match &state.phase {
                Phase::Idle => None,
                Phase::Sampling { done, .. } => Some(done.clone()),
            }
        };
        if let Some(mut done) = in_flight {
            let _ = done.wait_for(Option::is_some).await;
        }
        info!("diagnostic engine shut down");
    }
}

async fn run_pass(
    host: Host,
    config: EngineConfig,
    kind: PassKind,
    current_thread: Option<CurrentThread>,
) -> Result<DiagnosticReport, DiagnosticError> {
    let deadline = tokio::time::Instant::now() + config.pass_deadline;
    let sampled_at_unix_ms = unix_now_ms();

    // The probe runs alongside enumeration and sampling; it only has to beat the deadline.
    let probe_host = host.clone();
    let probe = tokio::task::spawn_blocking(move || probe_host.process.probe());

    let enumerate_host = host.clone();
    let enumeration = tokio::task::spawn_blocking(move || {
        Enumerator::new(enumerate_host.threads.as_ref()).enumerate()
    });
    let threads = match tokio::time::timeout_at(deadline, enumeration).await {
        Ok(joined) => joined
            .map_err(|e| DiagnosticError::Internal(format!("enumeration worker failed: {e}")))??,
        Err(_) => {
            probe.abort();
            return Err(DiagnosticError::DeadlineExceeded(format!(
                "thread enumeration did not finish within {:?}",
                config.pass_deadline
            )));
        }
    };

    let (batch, graph, analysis) = match kind {
        PassKind::Info => (SampleBatch::default(), WaitGraph::default(), Analysis::default()),
        PassKind::StackInfo => {
            let waits = host.waits.waits();
            let graph = threadlens_waitgraph::build(&threads, &waits);
            let analysis = threadlens_waitgraph::analyze_with_limit(&graph.edges, config.max_cycles);
            let batch = Sampler::new(host.clone(), config.sample_timeout)
                .sample_all(&threads, config.max_sampling_workers, deadline)
                .await;
            (batch, graph, analysis)
        }
    };

    let (process, probe_expired) = match tokio::time::timeout_at(deadline, probe).await {
        Ok(Ok(process)) => (process, false),
        Ok(Err(e)) => return Err(DiagnosticError::Internal(format!("process probe failed: {e}"))),
        Err(_) => {
            warn!(
                deadline_ms = config.pass_deadline.as_millis() as u64,
                "process probe missed the pass deadline"
            );
            (ProcessStats::default(), true)
        }
    };

    Ok(ReportAssembler::assemble(PassParts {
        // Stamped once the pass has completed.
        generation: 0,
        kind,
        sampled_at_unix_ms,
        threads,
        samples: batch.samples,
        graph,
        analysis,
        process,
        current_thread,
        truncated: batch.truncated || probe_expired,
    }))
}
