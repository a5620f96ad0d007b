//! Status queries and change subscriptions.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use futures::stream::{self, Stream};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::watch;
use tracing::debug;

use crate::error::StorageError;
use crate::status::now_millis;
use crate::status::store::{WorkflowEvent, WorkflowStore};
use crate::workflow::{Outcome, Stage, Workflow, WorkflowStatus};

/// Point-in-time view of one workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub workflow_id: String,
    pub stage: Stage,
    pub status: WorkflowStatus,
    pub round: u32,
    pub last_updated_ms: u64,
}

impl From<&Workflow> for StatusSnapshot {
    fn from(workflow: &Workflow) -> Self {
        Self {
            workflow_id: workflow.id.clone(),
            stage: workflow.stage,
            status: workflow.status,
            round: workflow.round,
            last_updated_ms: workflow.updated_at_ms,
        }
    }
}

pub type StatusStream = Pin<Box<dyn Stream<Item = StatusSnapshot> + Send>>;

/// Registry front end: every status and stage change goes through here, is
/// persisted with an event, and is published to subscribers.
pub struct StatusHub {
    store: Arc<WorkflowStore>,
    channels: Mutex<HashMap<String, watch::Sender<StatusSnapshot>>>,
    /// Serializes read-modify-write of registry records
    write_lock: Mutex<()>,
}

impl StatusHub {
    pub fn new(store: Arc<WorkflowStore>) -> Self {
        Self {
            store,
            channels: Mutex::new(HashMap::new()),
            write_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &WorkflowStore {
        &self.store
    }

    pub fn create(&self, workflow: &Workflow) -> Result<(), StorageError> {
        {
            let _guard = self.write_lock.lock();
            self.store.put_workflow(workflow)?;
            self.store.record_event(
                &workflow.id,
                workflow.status,
                "workflow_created",
                json!({
                    "topic": workflow.request.topic,
                    "mode": workflow.request.mode,
                    "caller": workflow.request.caller,
                }),
            )?;
            self.publish(workflow);
        }
        Ok(())
    }

    pub fn get(&self, workflow_id: &str) -> Result<Workflow, StorageError> {
        self.store
            .get_workflow(workflow_id)?
            .ok_or_else(|| StorageError::WorkflowNotFound(workflow_id.to_string()))
    }

    pub fn get_status(&self, workflow_id: &str) -> Result<StatusSnapshot, StorageError> {
        Ok(StatusSnapshot::from(&self.get(workflow_id)?))
    }

    pub fn list(&self) -> Result<Vec<Workflow>, StorageError> {
        self.store.list_workflows()
    }

    pub fn history(&self, workflow_id: &str) -> Result<Vec<WorkflowEvent>, StorageError> {
        self.store.read_events(workflow_id)
    }

    /// Move to `status`, rejecting transitions the status machine does not allow.
    pub fn set_status(
        &self,
        workflow_id: &str,
        status: WorkflowStatus,
        error: Option<String>,
    ) -> Result<Workflow, StorageError> {
        self.update(workflow_id, "status_changed", |workflow| {
            if !workflow.status.can_transition_to(status) {
                return Err(StorageError::InvalidTransition {
                    workflow_id: workflow.id.clone(),
                    from: workflow.status.to_string(),
                    to: status.to_string(),
                });
            }
            workflow.status = status;
            if error.is_some() || status == WorkflowStatus::Queued {
                workflow.last_error = error.clone();
            }
            Ok(json!({ "status": status, "error": error }))
        })
    }

    /// Record the stage the workflow is about to run. A settled workflow is not
    /// moved.
    pub fn record_progress(
        &self,
        workflow_id: &str,
        stage: Stage,
        round: u32,
    ) -> Result<Workflow, StorageError> {
        self.update(workflow_id, "stage_entered", |workflow| {
            if workflow.status.is_terminal() {
                return Err(StorageError::InvalidTransition {
                    workflow_id: workflow.id.clone(),
                    from: workflow.status.to_string(),
                    to: stage.to_string(),
                });
            }
            workflow.stage = stage;
            workflow.round = round;
            Ok(json!({ "stage": stage, "round": round }))
        })
    }

    /// Terminal stage reached: settle status and outcome in one update.
    pub fn finish(
        &self,
        workflow_id: &str,
        outcome: Outcome,
        final_score: Option<f64>,
    ) -> Result<Workflow, StorageError> {
        let status = match outcome {
            Outcome::Accepted => WorkflowStatus::Completed,
            Outcome::Rejected => WorkflowStatus::Rejected,
        };
        self.update(workflow_id, "workflow_finished", |workflow| {
            if !workflow.status.can_transition_to(status) {
                return Err(StorageError::InvalidTransition {
                    workflow_id: workflow.id.clone(),
                    from: workflow.status.to_string(),
                    to: status.to_string(),
                });
            }
            workflow.status = status;
            workflow.stage = match outcome {
                Outcome::Accepted => Stage::Completed,
                Outcome::Rejected => Stage::Rejected,
            };
            workflow.outcome = Some(outcome);
            workflow.final_score = final_score;
            workflow.last_error = None;
            Ok(json!({ "outcome": outcome, "final_score": final_score }))
        })
    }

    /// Status-change stream ending after a terminal status. Subscribing to a
    /// terminal workflow yields its current snapshot and ends.
    ///
    /// Changes are delivered latest-wins: a slow subscriber may skip intermediate
    /// snapshots but always observes the final one.
    pub fn subscribe(&self, workflow_id: &str) -> Result<StatusStream, StorageError> {
        let rx = {
            let _guard = self.write_lock.lock();
            let workflow = self.get(workflow_id)?;
            if workflow.status.is_terminal() {
                // Settled: one snapshot, no channel kept
                watch::channel(StatusSnapshot::from(&workflow)).1
            } else {
                self.sender_for(&workflow).subscribe()
            }
        };

        let stream = stream::unfold((rx, true, false), |(mut rx, first, done)| async move {
            if done {
                return None;
            }
            if !first && rx.changed().await.is_err() {
                return None;
            }
            let snapshot = rx.borrow_and_update().clone();
            let finished = snapshot.status.is_terminal();
            Some((snapshot, (rx, false, finished)))
        });
        Ok(Box::pin(stream))
    }

    /// Remove the record and its events. Open subscriptions end.
    pub fn delete(&self, workflow_id: &str) -> Result<(), StorageError> {
        {
            let _guard = self.write_lock.lock();
            self.store.delete_workflow(workflow_id)?;
            self.channels.lock().remove(workflow_id);
        }
        Ok(())
    }

    fn update<F>(&self, workflow_id: &str, event_type: &str, apply: F) -> Result<Workflow, StorageError>
    where
        F: FnOnce(&mut Workflow) -> Result<serde_json::Value, StorageError>,
    {
        let workflow = {
            let _guard = self.write_lock.lock();
            let mut workflow = self.get(workflow_id)?;
            let data = apply(&mut workflow)?;
            workflow.updated_at_ms = now_millis();
            self.store.put_workflow(&workflow)?;
            self.store
                .record_event(workflow_id, workflow.status, event_type, data)?;
            self.publish(&workflow);
            workflow
        };
        debug!(
            workflow_id,
            status = %workflow.status,
            stage = %workflow.stage,
            round = workflow.round,
            event_type,
            "Workflow updated"
        );
        Ok(workflow)
    }

    fn sender_for(&self, workflow: &Workflow) -> watch::Sender<StatusSnapshot> {
        self.channels
            .lock()
            .entry(workflow.id.clone())
            .or_insert_with(|| watch::channel(StatusSnapshot::from(workflow)).0)
            .clone()
    }

    /// Callers hold `write_lock`, so snapshots publish in commit order.
    ///
    /// A terminal snapshot is the last a channel carries: the channel is dropped
    /// once it is sent, and open streams end after reading it. A later retry opens
    /// a fresh channel.
    fn publish(&self, workflow: &Workflow) {
        let snapshot = StatusSnapshot::from(workflow);
        let mut channels = self.channels.lock();
        if snapshot.status.is_terminal() {
            if let Some(sender) = channels.remove(&workflow.id) {
                sender.send_replace(snapshot);
            }
        } else {
            channels
                .entry(workflow.id.clone())
                .or_insert_with(|| watch::channel(snapshot.clone()).0)
                .send_replace(snapshot);
        }
    }

    #[cfg(test)]
    fn open_channels(&self) -> usize {
        self.channels.lock().len()
    }
}
