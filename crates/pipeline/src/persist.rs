use crate::config::{PersistConfig, QueueFullPolicy};
use crate::counts::{FrameCounts, RemoteCounterSync, fold};
use crate::errors::PipelineError;
use crate::evidence::{EvidenceJob, EvidenceUploader};
use crate::metrics::PipelineMetrics;
use common::{Backoff, retry_with_backoff, span};
use crossbeam_channel::{
    Receiver, SendTimeoutError, Sender, TryRecvError, TrySendError, bounded,
};
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How long a blocked push waits before checking the consumer again.
const BLOCK_POLL: Duration = Duration::from_millis(50);

/// Network work handed from the pipeline thread to the persistence worker.
#[derive(Debug, Clone)]
pub enum PersistJob {
    SyncCounts(FrameCounts),
    UploadEvidence(EvidenceJob),
}

/// Consumer side of the persistence queue.
///
/// Dropping it, including while a panicking worker unwinds, closes the queue
/// for producers. The eviction clone inside [`PersistQueue`] keeps the
/// channel itself connected, so this flag is what tells them.
pub struct JobReceiver {
    rx: Receiver<PersistJob>,
    alive: Arc<AtomicBool>,
}

impl Deref for JobReceiver {
    type Target = Receiver<PersistJob>;

    fn deref(&self) -> &Self::Target {
        &self.rx
    }
}

impl Drop for JobReceiver {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Release);
    }
}

/// Producer side of the bounded persistence queue.
pub struct PersistQueue {
    tx: Sender<PersistJob>,
    /// Receiver clone used only to evict the oldest job.
    evict: Receiver<PersistJob>,
    consumer_alive: Arc<AtomicBool>,
    policy: QueueFullPolicy,
    /// Counts from evicted jobs, waiting for the next counts job.
    carry: Mutex<FrameCounts>,
    metrics: PipelineMetrics,
}

impl PersistQueue {
    pub fn bounded(
        capacity: usize,
        policy: QueueFullPolicy,
        metrics: PipelineMetrics,
    ) -> (Self, JobReceiver) {
        let (tx, rx) = bounded(capacity.max(1));
        let alive = Arc::new(AtomicBool::new(true));
        let queue = Self {
            tx,
            evict: rx.clone(),
            consumer_alive: alive.clone(),
            policy,
            carry: Mutex::new(FrameCounts::new()),
            metrics,
        };
        (queue, JobReceiver { rx, alive })
    }

    /// False once the [`JobReceiver`] is gone.
    pub fn consumer_alive(&self) -> bool {
        self.consumer_alive.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    /// Fails with [`PipelineError::QueueClosed`] once the consumer is gone,
    /// also while blocked on a full queue.
    pub fn push(&self, job: PersistJob) -> Result<(), PipelineError> {
        if !self.consumer_alive() {
            return Err(PipelineError::QueueClosed);
        }
        match self.policy {
            QueueFullPolicy::Block => self.push_blocking(self.with_carry(job)),
            QueueFullPolicy::DropOldest => self.push_evicting(job),
        }
    }

    fn push_blocking(&self, job: PersistJob) -> Result<(), PipelineError> {
        let mut job = job;
        loop {
            match self.tx.send_timeout(job, BLOCK_POLL) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(pending)) => {
                    if !self.consumer_alive() {
                        return Err(PipelineError::QueueClosed);
                    }
                    job = pending;
                }
                Err(SendTimeoutError::Disconnected(_)) => return Err(PipelineError::QueueClosed),
            }
        }
    }

    fn push_evicting(&self, job: PersistJob) -> Result<(), PipelineError> {
        let mut job = job;
        loop {
            if !self.consumer_alive() {
                return Err(PipelineError::QueueClosed);
            }
            job = self.with_carry(job);
            match self.tx.try_send(job) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Disconnected(_)) => return Err(PipelineError::QueueClosed),
                Err(TrySendError::Full(rejected)) => {
                    job = rejected;
                    self.evict_oldest();
                }
            }
        }
    }

    fn evict_oldest(&self) {
        match self.evict.try_recv() {
            Ok(PersistJob::SyncCounts(counts)) => {
                tracing::debug!(labels = counts.len(), "Queue full, folding evicted counts forward");
                fold(&mut self.lock_carry(), counts);
            }
            Ok(PersistJob::UploadEvidence(evidence)) => {
                self.metrics.jobs_dropped.add(1, &[]);
                tracing::warn!(
                    label = %evidence.label,
                    frame_number = evidence.frame.number(),
                    "Queue full, evidence dropped"
                );
            }
            // The worker emptied a slot in the meantime.
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => {}
        }
    }

    fn with_carry(&self, job: PersistJob) -> PersistJob {
        match job {
            PersistJob::SyncCounts(mut counts) => {
                fold(&mut counts, std::mem::take(&mut *self.lock_carry()));
                PersistJob::SyncCounts(counts)
            }
            other => other,
        }
    }

    fn lock_carry(&self) -> std::sync::MutexGuard<'_, FrameCounts> {
        self.carry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Flush carried counts and close the queue. The worker drains what is
    /// left and then exits.
    pub fn close(self) {
        let carry = std::mem::take(&mut *self.lock_carry());
        if carry.is_empty() {
            return;
        }
        if !self.consumer_alive() || self.push_blocking(PersistJob::SyncCounts(carry)).is_err() {
            tracing::error!("Persistence worker gone, carried counts lost");
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PersistStats {
    pub counts_synced: u64,
    pub evidence_uploaded: u64,
    pub failed: u64,
}

/// Single consumer of the persistence queue. Jobs run in FIFO order, each
/// with retry and exponential backoff.
pub struct PersistWorker {
    rx: JobReceiver,
    counter: RemoteCounterSync,
    evidence: EvidenceUploader,
    backoff: Backoff,
    metrics: PipelineMetrics,
    stats: PersistStats,
}

impl PersistWorker {
    pub fn new(
        rx: JobReceiver,
        counter: RemoteCounterSync,
        evidence: EvidenceUploader,
        config: &PersistConfig,
        metrics: PipelineMetrics,
    ) -> Self {
        Self {
            rx,
            counter,
            evidence,
            backoff: Backoff::new(config.max_retries.saturating_add(1), config.base_delay),
            metrics,
            stats: PersistStats::default(),
        }
    }

    pub fn spawn(self) -> std::io::Result<JoinHandle<PersistStats>> {
        thread::Builder::new()
            .name("persist".to_string())
            .spawn(move || self.run())
    }

    /// Runs until every queue sender is gone and the queue is empty.
    pub fn run(mut self) -> PersistStats {
        tracing::info!("Persistence worker started");

        while let Ok(job) = self.rx.recv() {
            self.process(job);
        }

        tracing::info!(
            counts_synced = self.stats.counts_synced,
            evidence_uploaded = self.stats.evidence_uploaded,
            failed = self.stats.failed,
            "Persistence worker drained"
        );
        self.stats
    }

    fn process(&mut self, job: PersistJob) {
        match job {
            PersistJob::SyncCounts(counts) => {
                let _s = span!("sync_counts", labels = counts.len());
                match self.counter.merge_with(&counts, &self.backoff) {
                    Ok(_) => self.stats.counts_synced += 1,
                    Err(e) => {
                        self.fail();
                        tracing::error!(error = %e, ?counts, "Counter update dropped");
                    }
                }
            }
            PersistJob::UploadEvidence(job) => {
                let _s = span!("upload_evidence", label = %job.label);
                let prepared = match self
                    .evidence
                    .prepare(&job.frame, &job.label, job.frame.captured_at())
                {
                    Ok(p) => p,
                    Err(e) => {
                        self.fail();
                        tracing::error!(error = %e, label = %job.label, "Evidence encoding failed, skipping");
                        return;
                    }
                };

                let result = retry_with_backoff(
                    || self.evidence.publish(&prepared),
                    &self.backoff,
                    "Evidence upload",
                );
                match result {
                    Ok(record) => {
                        self.stats.evidence_uploaded += 1;
                        tracing::info!(label = %record.label, key = %record.key, "Evidence uploaded");
                    }
                    Err(e) => {
                        self.fail();
                        tracing::error!(error = %e, label = %job.label, "Evidence upload dropped");
                    }
                }
            }
        }
    }

    fn fail(&mut self) {
        self.stats.failed += 1;
        self.metrics.jobs_failed.add(1, &[]);
    }
}
