//! Priority job queue
//!
//! Three lanes collapsed into one heap ordered by priority then FIFO
//! within a priority. A pipeline can hold at most one queued job at a
//! time; duplicates are rejected at enqueue.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{ImportJob, JobPriority};

struct QueuedJob {
    priority: JobPriority,
    seq: u64,
    job: ImportJob,
}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedJob {}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedJob {
    fn cmp(&self, other: &Self) -> Ordering {
        // max-heap: higher priority first, then lower sequence (FIFO)
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct QueueInner {
    heap: BinaryHeap<QueuedJob>,
    queued: HashSet<i64>,
    seq: u64,
}

#[derive(Default)]
pub struct JobQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the pipeline already has a queued job
    pub async fn enqueue(&self, job: ImportJob) -> bool {
        let mut inner = self.inner.lock().await;
        if !inner.queued.insert(job.pipeline_id) {
            debug!(pipeline_id = job.pipeline_id, "job already queued, skipping");
            return false;
        }
        inner.seq += 1;
        let seq = inner.seq;
        debug!(
            pipeline_id = job.pipeline_id,
            priority = ?job.priority,
            "job queued"
        );
        inner.heap.push(QueuedJob {
            priority: job.priority,
            seq,
            job,
        });
        drop(inner);
        self.notify.notify_one();
        true
    }

    /// Pop the highest-priority job without waiting
    pub async fn try_dequeue(&self) -> Option<ImportJob> {
        let mut inner = self.inner.lock().await;
        let queued = inner.heap.pop()?;
        inner.queued.remove(&queued.job.pipeline_id);
        Some(queued.job)
    }

    /// Wait for the next job; `None` means the token was cancelled
    pub async fn next(&self, cancel: &CancellationToken) -> Option<ImportJob> {
        loop {
            if let Some(job) = self.try_dequeue().await {
                return Some(job);
            }
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = self.notify.notified() => {}
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.heap.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.heap.is_empty()
    }
}
