//! Pending jobs and the worker capacity gauge.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};

use crate::error::PoolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum JobKind {
    Fresh = 0,
    /// Continues from a checkpoint
    Resume = 1,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub workflow_id: String,
    pub kind: JobKind,
    seq: u64,
}

impl Ord for Job {
    /// Resumed jobs first, then FIFO. `BinaryHeap` is a max-heap, so earlier
    /// submissions compare as greater.
    fn cmp(&self, other: &Self) -> Ordering {
        self.kind
            .cmp(&other.kind)
            .then_with(|| self.seq.cmp(&other.seq).reverse())
    }
}

impl PartialOrd for Job {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub struct JobQueue {
    heap: Mutex<BinaryHeap<Job>>,
    notify: Notify,
    next_seq: AtomicU64,
    max_size: usize,
}

impl JobQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            next_seq: AtomicU64::new(0),
            max_size,
        }
    }

    /// Fails with `QueueFull` once `max_size` jobs are pending.
    pub async fn push(&self, workflow_id: &str, kind: JobKind) -> Result<(), PoolError> {
        let mut heap = self.heap.lock().await;
        if heap.len() >= self.max_size {
            return Err(PoolError::QueueFull(heap.len()));
        }
        heap.push(Job {
            workflow_id: workflow_id.to_string(),
            kind,
            seq: self.next_seq.fetch_add(1, AtomicOrdering::Relaxed),
        });
        drop(heap);
        self.notify.notify_one();
        Ok(())
    }

    pub async fn pop(&self) -> Option<Job> {
        self.heap.lock().await.pop()
    }

    /// Drop a pending job. Returns whether it was queued.
    pub async fn remove(&self, workflow_id: &str) -> bool {
        let mut heap = self.heap.lock().await;
        let before = heap.len();
        heap.retain(|job| job.workflow_id != workflow_id);
        heap.len() != before
    }

    pub async fn contains(&self, workflow_id: &str) -> bool {
        self.heap
            .lock()
            .await
            .iter()
            .any(|job| job.workflow_id == workflow_id)
    }

    pub async fn len(&self) -> usize {
        self.heap.lock().await.len()
    }

    pub async fn is_full(&self) -> bool {
        self.len().await >= self.max_size
    }

    pub async fn notified(&self) {
        self.notify.notified().await
    }

    pub fn wake_all(&self) {
        self.notify.notify_waiters();
    }
}

/// Counts busy workers. Claims are compare-and-swap so the bound holds under
/// concurrent claims and releases.
#[derive(Debug)]
pub struct CapacityGauge {
    capacity: usize,
    in_use: AtomicUsize,
}

impl CapacityGauge {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity,
            in_use: AtomicUsize::new(0),
        })
    }

    pub fn try_claim(self: &Arc<Self>) -> Option<CapacityClaim> {
        let mut current = self.in_use.load(AtomicOrdering::Acquire);
        loop {
            if current >= self.capacity {
                return None;
            }
            match self.in_use.compare_exchange_weak(
                current,
                current + 1,
                AtomicOrdering::AcqRel,
                AtomicOrdering::Acquire,
            ) {
                Ok(_) => {
                    return Some(CapacityClaim {
                        gauge: Arc::clone(self),
                    })
                }
                Err(actual) => current = actual,
            }
        }
    }

    pub fn in_use(&self) -> usize {
        self.in_use.load(AtomicOrdering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Released on drop.
#[derive(Debug)]
pub struct CapacityClaim {
    gauge: Arc<CapacityGauge>,
}

impl Drop for CapacityClaim {
    fn drop(&mut self) {
        self.gauge.in_use.fetch_sub(1, AtomicOrdering::AcqRel);
    }
}
