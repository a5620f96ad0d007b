//! Worker Pool
//!
//! Accepts submissions, runs a bounded number of workflow state machines at once
//! and maps how each run ended onto registry status. At startup the pool classifies
//! every result directory before its workers start, so interrupted work is picked
//! up again instead of being lost across restarts.

mod limiter;
mod queue;

pub use limiter::SubmissionLimiter;
pub use queue::{CapacityClaim, CapacityGauge, Job, JobKind, JobQueue};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::checkpoint::{CompletionMarker, RecoveryClass, RecoveryEntry};
use crate::error::{PoolError, StorageError};
use crate::runtime::Services;
use crate::status::{new_workflow_id, now_millis};
use crate::workflow::{
    CancelFlag, Outcome, Workflow, WorkflowRequest, WorkflowStateMachine, WorkflowStatus,
};

const IDLE_POLL: Duration = Duration::from_millis(100);

/// Counters since the pool was created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub queued: usize,
    pub running: usize,
    pub capacity: usize,
    pub completed: usize,
    pub rejected: usize,
    pub failed: usize,
    pub interrupted: usize,
}

/// What a recovery scan found and did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecoveryReport {
    pub entries: Vec<RecoveryEntry>,
    /// Re-enqueued from their checkpoint
    pub resumed: Vec<String>,
    /// Orphans marked failed
    pub failed: Vec<String>,
    /// Registry caught up with a completion marker
    pub settled: Vec<String>,
}

/// State shared between the pool handle and its workers.
struct Shared {
    services: Arc<Services>,
    queue: JobQueue,
    gauge: Arc<CapacityGauge>,
    running: RwLock<bool>,
    cancels: Mutex<HashMap<String, CancelFlag>>,
    stats: RwLock<PoolStats>,
}

pub struct WorkerPool {
    shared: Arc<Shared>,
    limiter: SubmissionLimiter,
    workers: RwLock<Vec<JoinHandle<()>>>,
    worker_count: usize,
}

impl WorkerPool {
    pub fn new(services: Arc<Services>) -> Self {
        let config = services.config.pool.clone();
        let worker_count = config.workers.max(1);
        Self {
            shared: Arc::new(Shared {
                queue: JobQueue::new(config.max_queue_size),
                gauge: CapacityGauge::new(worker_count),
                running: RwLock::new(false),
                cancels: Mutex::new(HashMap::new()),
                stats: RwLock::new(PoolStats {
                    capacity: worker_count,
                    ..PoolStats::default()
                }),
                services,
            }),
            limiter: SubmissionLimiter::new(config.min_submit_interval_ms),
            workers: RwLock::new(Vec::new()),
            worker_count,
        }
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.shared.services
    }

    pub fn is_running(&self) -> bool {
        *self.shared.running.read()
    }

    /// Run recovery, then start the workers. Submissions are accepted only after this.
    pub async fn start(&self) -> Result<RecoveryReport, PoolError> {
        let resume = self.shared.services.config.pool.resume_on_start;
        self.start_with(resume).await
    }

    /// `start`, choosing whether recovery re-enqueues resumable workflows.
    pub async fn start_with(&self, resume: bool) -> Result<RecoveryReport, PoolError> {
        if self.is_running() {
            return Ok(RecoveryReport::default());
        }
        let report = self.recover(resume).await?;

        *self.shared.running.write() = true;
        let mut workers = self.workers.write();
        for worker_id in 0..self.worker_count {
            let shared = Arc::clone(&self.shared);
            workers.push(tokio::spawn(async move {
                worker_loop(worker_id, shared).await;
            }));
        }
        info!(
            workers = workers.len(),
            resumed = report.resumed.len(),
            failed = report.failed.len(),
            "Worker pool started"
        );
        Ok(report)
    }

    /// Stop taking jobs and wait for workers to finish their current workflow.
    pub async fn shutdown(&self) {
        {
            let mut running = self.shared.running.write();
            if !*running {
                return;
            }
            *running = false;
        }
        self.shared.queue.wake_all();
        let workers = std::mem::take(&mut *self.workers.write());
        for handle in workers {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker task ended abnormally");
            }
        }
        info!("Worker pool stopped");
    }

    /// Classify every result directory and bring the registry in line with it.
    ///
    /// Directories of workflows this pool currently holds are skipped.
    pub async fn recover(&self, resume: bool) -> Result<RecoveryReport, PoolError> {
        let services = &self.shared.services;
        let mut report = RecoveryReport::default();

        for entry in services.checkpoints.scan()? {
            let id = entry.workflow_id.clone();
            if self.is_active(&id).await {
                debug!(workflow_id = %id, "Skipping active workflow during recovery");
                continue;
            }
            let Some(workflow) = self.registry_record(&id)? else {
                report.entries.push(entry);
                continue;
            };

            match entry.class {
                RecoveryClass::Complete => {
                    if !workflow.status.is_terminal() {
                        if let Some(marker) = services.checkpoints.completion_marker(&id)? {
                            settle_from_marker(services, &workflow, &marker)?;
                            report.settled.push(id.clone());
                        }
                    }
                }
                RecoveryClass::Resumable => {
                    if matches!(workflow.status, WorkflowStatus::Queued | WorkflowStatus::Running) {
                        services.status.set_status(
                            &id,
                            WorkflowStatus::Interrupted,
                            Some("process stopped mid-run".to_string()),
                        )?;
                    }
                    let status = services.status.get(&id)?.status;
                    if resume && status == WorkflowStatus::Interrupted {
                        services.status.set_status(&id, WorkflowStatus::Queued, None)?;
                        self.shared.queue.push(&id, JobKind::Resume).await?;
                        report.resumed.push(id.clone());
                    }
                }
                RecoveryClass::Orphan => {
                    if !workflow.status.is_settled() {
                        services.status.set_status(
                            &id,
                            WorkflowStatus::Failed,
                            Some("crashed before first checkpoint".to_string()),
                        )?;
                        report.failed.push(id.clone());
                    }
                }
            }
            info!(
                workflow_id = %id,
                class = %entry.class,
                "Recovery classified workflow"
            );
            report.entries.push(entry);
        }
        Ok(report)
    }

    /// Registry record for a scanned directory, recreated from `request.json` when
    /// the registry lost it.
    fn registry_record(&self, workflow_id: &str) -> Result<Option<Workflow>, PoolError> {
        let services = &self.shared.services;
        match services.status.get(workflow_id) {
            Ok(workflow) => Ok(Some(workflow)),
            Err(StorageError::WorkflowNotFound(_)) => {
                let request = match services.checkpoints.read_request(workflow_id) {
                    Ok(request) => request,
                    Err(e) => {
                        warn!(workflow_id, error = %e, "Result directory without a readable request");
                        return Ok(None);
                    }
                };
                let workflow = Workflow::queued(workflow_id, request, now_millis());
                services.status.create(&workflow)?;
                Ok(Some(workflow))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn is_active(&self, workflow_id: &str) -> bool {
        let running = self.shared.cancels.lock().contains_key(workflow_id);
        running || self.shared.queue.contains(workflow_id).await
    }

    /// Accept a new workflow. Returns its id.
    pub async fn submit(&self, request: WorkflowRequest) -> Result<String, PoolError> {
        if !self.is_running() {
            return Err(PoolError::NotRunning);
        }
        request.validate().map_err(PoolError::InvalidRequest)?;
        if self.shared.queue.is_full().await {
            return Err(PoolError::QueueFull(self.shared.queue.len().await));
        }
        self.limiter.check(&request.caller)?;

        let services = &self.shared.services;
        let workflow_id = new_workflow_id();
        let workflow = Workflow::queued(&workflow_id, request.clone(), now_millis());
        let accepted = async {
            services.checkpoints.begin(&workflow_id, &request)?;
            services.status.create(&workflow)?;
            self.shared.queue.push(&workflow_id, JobKind::Fresh).await
        }
        .await;

        if let Err(e) = accepted {
            self.limiter.release(&request.caller);
            if services.status.get(&workflow_id).is_ok() {
                services
                    .status
                    .set_status(&workflow_id, WorkflowStatus::Failed, Some(e.to_string()))?;
            }
            return Err(e);
        }

        info!(
            workflow_id = %workflow_id,
            caller = %request.caller,
            topic = %request.topic,
            "Workflow submitted"
        );
        Ok(workflow_id)
    }

    /// Re-enqueue an interrupted workflow from its checkpoint.
    pub async fn resume(&self, workflow_id: &str) -> Result<(), PoolError> {
        let services = &self.shared.services;
        let workflow = services.status.get(workflow_id)?;
        if workflow.status != WorkflowStatus::Interrupted {
            return Err(invalid(workflow_id, "resume", workflow.status));
        }
        services.status.set_status(workflow_id, WorkflowStatus::Queued, None)?;
        self.shared.queue.push(workflow_id, JobKind::Resume).await?;
        info!(workflow_id, "Workflow resumed");
        Ok(())
    }

    /// Run a failed workflow again from scratch.
    pub async fn retry(&self, workflow_id: &str) -> Result<(), PoolError> {
        let services = &self.shared.services;
        let workflow = services.status.get(workflow_id)?;
        if workflow.status != WorkflowStatus::Failed {
            return Err(invalid(workflow_id, "retry", workflow.status));
        }
        services.checkpoints.reset(workflow_id)?;
        services.status.set_status(workflow_id, WorkflowStatus::Queued, None)?;
        self.shared.queue.push(workflow_id, JobKind::Fresh).await?;
        info!(workflow_id, "Workflow retried");
        Ok(())
    }

    /// Cancel a queued or running workflow. A running workflow stops before its next
    /// stage; its last checkpoint stays the resume point.
    pub async fn cancel(&self, workflow_id: &str) -> Result<(), PoolError> {
        let services = &self.shared.services;
        let workflow = services.status.get(workflow_id)?;
        match workflow.status {
            WorkflowStatus::Queued => {
                self.shared.queue.remove(workflow_id).await;
                let status = if services.checkpoints.has_checkpoint(workflow_id) {
                    WorkflowStatus::Interrupted
                } else {
                    WorkflowStatus::Failed
                };
                services
                    .status
                    .set_status(workflow_id, status, Some("cancelled".to_string()))?;
                info!(workflow_id, status = %status, "Queued workflow cancelled");
                Ok(())
            }
            WorkflowStatus::Running => {
                if let Some(flag) = self.shared.cancels.lock().get(workflow_id) {
                    flag.cancel();
                }
                info!(workflow_id, "Cancellation requested");
                Ok(())
            }
            status => Err(invalid(workflow_id, "cancel", status)),
        }
    }

    /// Remove a terminal workflow's record and result directory.
    pub fn delete(&self, workflow_id: &str) -> Result<(), PoolError> {
        let services = &self.shared.services;
        let workflow = services.status.get(workflow_id)?;
        if !workflow.status.is_terminal() {
            return Err(invalid(workflow_id, "delete", workflow.status));
        }
        services.status.delete(workflow_id)?;
        services.checkpoints.remove(workflow_id)?;
        info!(workflow_id, "Workflow deleted");
        Ok(())
    }

    /// Wait until the workflow settles (terminal or interrupted) and return its record.
    pub async fn wait_for(&self, workflow_id: &str) -> Result<Workflow, PoolError> {
        let services = &self.shared.services;
        let mut updates = services.status.subscribe(workflow_id)?;
        while let Some(snapshot) = updates.next().await {
            if snapshot.status.is_settled() {
                break;
            }
        }
        Ok(services.status.get(workflow_id)?)
    }

    pub async fn stats(&self) -> PoolStats {
        let mut stats = self.shared.stats.read().clone();
        stats.queued = self.shared.queue.len().await;
        stats.running = self.shared.gauge.in_use();
        stats
    }
}

fn invalid(workflow_id: &str, action: &'static str, status: WorkflowStatus) -> PoolError {
    PoolError::InvalidAction {
        workflow_id: workflow_id.to_string(),
        action,
        status: status.to_string(),
    }
}

/// Walk the registry through the allowed transitions to the marker's outcome.
fn settle_from_marker(
    services: &Services,
    workflow: &Workflow,
    marker: &CompletionMarker,
) -> Result<(), StorageError> {
    let id = workflow.id.as_str();
    let mut status = workflow.status;
    if matches!(status, WorkflowStatus::Interrupted | WorkflowStatus::Failed) {
        status = services.status.set_status(id, WorkflowStatus::Queued, None)?.status;
    }
    if status == WorkflowStatus::Queued {
        services.status.set_status(id, WorkflowStatus::Running, None)?;
    }
    services.status.finish(id, marker.outcome, marker.final_score)?;
    Ok(())
}

async fn worker_loop(worker_id: usize, shared: Arc<Shared>) {
    debug!(worker_id, "Worker started");

    while *shared.running.read() {
        let Some(claim) = shared.gauge.try_claim() else {
            sleep(IDLE_POLL).await;
            continue;
        };
        let Some(job) = shared.queue.pop().await else {
            drop(claim);
            tokio::select! {
                _ = shared.queue.notified() => {}
                _ = sleep(IDLE_POLL) => {}
            }
            continue;
        };

        run_job(worker_id, &shared, job).await;
        drop(claim);
    }

    debug!(worker_id, "Worker stopped");
}

async fn run_job(worker_id: usize, shared: &Shared, job: Job) {
    let services = &shared.services;
    let workflow_id = job.workflow_id;

    // Cancelled or deleted while queued
    match services.status.get(&workflow_id) {
        Ok(workflow) if workflow.status == WorkflowStatus::Queued => {}
        Ok(workflow) => {
            debug!(workflow_id = %workflow_id, status = %workflow.status, "Skipping stale job");
            return;
        }
        Err(e) => {
            warn!(workflow_id = %workflow_id, error = %e, "Skipping job without a registry record");
            return;
        }
    }

    let cancel = CancelFlag::new();
    shared
        .cancels
        .lock()
        .insert(workflow_id.clone(), cancel.clone());

    if let Err(e) = services
        .status
        .set_status(&workflow_id, WorkflowStatus::Running, None)
    {
        error!(workflow_id = %workflow_id, error = %e, "Could not mark workflow running");
        shared.cancels.lock().remove(&workflow_id);
        return;
    }
    info!(worker_id, workflow_id = %workflow_id, kind = ?job.kind, "Worker claimed workflow");

    // A panicking stage must not take the worker down with it.
    let task = {
        let services = Arc::clone(services);
        let workflow_id = workflow_id.clone();
        tokio::spawn(async move {
            let mut machine = WorkflowStateMachine::load(services, &workflow_id)?;
            machine.run(&cancel).await
        })
    };
    let result = match task.await {
        Ok(result) => result.map_err(|e| e.to_string()),
        Err(join_error) => Err(format!("worker task failed: {}", join_error)),
    };
    shared.cancels.lock().remove(&workflow_id);

    match result {
        Ok(outcome) => {
            let mut stats = shared.stats.write();
            match outcome {
                Outcome::Accepted => stats.completed += 1,
                Outcome::Rejected => stats.rejected += 1,
            }
        }
        Err(message) => {
            let status = if services.checkpoints.has_checkpoint(&workflow_id) {
                WorkflowStatus::Interrupted
            } else {
                WorkflowStatus::Failed
            };
            warn!(
                worker_id,
                workflow_id = %workflow_id,
                status = %status,
                error = %message,
                "Workflow stopped"
            );
            if let Err(e) = services
                .status
                .set_status(&workflow_id, status, Some(message))
            {
                error!(workflow_id = %workflow_id, error = %e, "Could not record workflow failure");
            }
            let mut stats = shared.stats.write();
            match status {
                WorkflowStatus::Interrupted => stats.interrupted += 1,
                _ => stats.failed += 1,
            }
        }
    }
}
