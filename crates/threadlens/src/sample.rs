use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use threadlens_types::{StackSnapshot, ThreadId, ThreadRecord, unix_now_ms};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::debug;

use crate::host::Host;

/// One thread's stack, or an empty one marked degraded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackSample {
    pub snapshot: StackSnapshot,
    pub degraded: bool,
}

impl StackSample {
    fn degraded() -> Self {
        Self {
            snapshot: StackSnapshot::empty(unix_now_ms()),
            degraded: true,
        }
    }
}

#[derive(Debug, Default)]
pub struct SampleBatch {
    /// One entry per requested thread.
    pub samples: BTreeMap<ThreadId, StackSample>,
    /// The deadline expired; threads without a finished capture got degraded
    /// samples.
    pub truncated: bool,
}

#[derive(Clone)]
pub struct Sampler {
    host: Host,
    timeout: Duration,
}

impl Sampler {
    pub fn new(host: Host, timeout: Duration) -> Self {
        Self { host, timeout }
    }

    /// Capture one thread on a blocking worker. Never fails: timeouts and
    /// capture errors yield an empty degraded sample.
    pub async fn sample(&self, record: &ThreadRecord) -> StackSample {
        let host = self.host.clone();
        let timeout = self.timeout;
        let target = record.clone();
        let capture = tokio::task::spawn_blocking(move || {
            let raw = host.stacks.capture(&target, timeout)?;
            Ok::<_, crate::host::HostError>(raw.iter().map(|f| host.resolve(f)).collect::<Vec<_>>())
        });

        match tokio::time::timeout(self.timeout, capture).await {
            Ok(Ok(Ok(frames))) => StackSample {
                snapshot: StackSnapshot {
                    frames,
                    sampled_at_unix_ms: unix_now_ms(),
                },
                degraded: false,
            },
            Ok(Ok(Err(err))) => {
                debug!(thread = record.id, error = %err, "stack capture failed");
                StackSample::degraded()
            }
            Ok(Err(join_err)) => {
                debug!(thread = record.id, error = %join_err, "stack capture worker failed");
                StackSample::degraded()
            }
            Err(_) => {
                debug!(thread = record.id, timeout_ms = self.timeout.as_millis() as u64, "stack capture timed out");
                StackSample::degraded()
            }
        }
    }

    /// Sample every thread with at most `workers` captures in flight.
    pub async fn sample_all(
        &self,
        records: &[ThreadRecord],
        workers: usize,
        deadline: Instant,
    ) -> SampleBatch {
        let permits = Arc::new(Semaphore::new(workers.clamp(1, records.len().max(1))));
        let mut set = JoinSet::new();
        for record in records {
            let sampler = self.clone();
            let permits = Arc::clone(&permits);
            let record = record.clone();
            set.spawn(async move {
                let _permit = permits.acquire_owned().await;
                let sample = sampler.sample(&record).await;
                (record.id, sample)
            });
        }

        let mut batch = SampleBatch::default();
        loop {
            match tokio::time::timeout_at(deadline, set.join_next()).await {
                Ok(Some(Ok((id, sample)))) => {
                    batch.samples.insert(id, sample);
                }
                Ok(Some(Err(join_err))) => {
                    debug!(error = %join_err, "sampling task failed");
                }
                Ok(None) => break,
                Err(_) => {
                    set.abort_all();
                    batch.truncated = true;
                    break;
                }
            }
        }

        for record in records {
            if !batch.samples.contains_key(&record.id) {
                batch.samples.insert(record.id, StackSample::degraded());
            }
        }
        if batch.truncated {
            debug!(
                threads = records.len(),
                "pass deadline expired; outstanding stack captures abandoned"
            );
        }
        batch
    }
}
