//! Durable sled-backed workflow registry and event log.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sled::{Db, Tree};

use crate::error::StorageError;
use crate::status::now_millis;
use crate::workflow::{Workflow, WorkflowStatus};

const TREE_WORKFLOWS: &str = "workflows";
const TREE_EVENTS: &str = "workflow_events";
const TREE_META: &str = "workflow_meta";
const EVENT_KEY_PAD: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowEvent {
    pub ts_ms: u64,
    pub workflow_id: String,
    pub seq: u64,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowMeta {
    pub next_seq: u64,
    pub latest_status: WorkflowStatus,
    pub updated_at_ms: u64,
}

#[derive(Clone)]
pub struct WorkflowStore {
    db: Db,
    workflows: Tree,
    events: Tree,
    meta: Tree,
}

impl WorkflowStore {
    pub fn new(db: Db) -> Result<Self, StorageError> {
        let workflows = db.open_tree(TREE_WORKFLOWS)?;
        let events = db.open_tree(TREE_EVENTS)?;
        let meta = db.open_tree(TREE_META)?;
        Ok(Self {
            db,
            workflows,
            events,
            meta,
        })
    }

    pub fn open(path: &std::path::Path) -> Result<Self, StorageError> {
        std::fs::create_dir_all(path)?;
        Self::new(sled::open(path)?)
    }

    pub fn shared(db: Db) -> Result<Arc<Self>, StorageError> {
        Ok(Arc::new(Self::new(db)?))
    }

    pub fn put_workflow(&self, workflow: &Workflow) -> Result<(), StorageError> {
        let value = serde_json::to_vec(workflow)?;
        self.workflows.insert(workflow.id.as_bytes(), value)?;
        Ok(())
    }

    pub fn get_workflow(&self, workflow_id: &str) -> Result<Option<Workflow>, StorageError> {
        let Some(raw) = self.workflows.get(workflow_id.as_bytes())? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&raw)?))
    }

    /// Newest first.
    pub fn list_workflows(&self) -> Result<Vec<Workflow>, StorageError> {
        let mut out = Vec::new();
        for result in self.workflows.iter() {
            let (_, value) = result?;
            let workflow: Workflow = serde_json::from_slice(&value)?;
            out.push(workflow);
        }
        out.sort_by(|a, b| {
            b.created_at_ms
                .cmp(&a.created_at_ms)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(out)
    }

    pub fn put_meta(&self, workflow_id: &str, meta: &WorkflowMeta) -> Result<(), StorageError> {
        let value = serde_json::to_vec(meta)?;
        self.meta.insert(workflow_id.as_bytes(), value)?;
        Ok(())
    }

    pub fn get_meta(&self, workflow_id: &str) -> Result<Option<WorkflowMeta>, StorageError> {
        let Some(raw) = self.meta.get(workflow_id.as_bytes())? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&raw)?))
    }

    /// Append an event with the next sequence number for the workflow.
    pub fn record_event(
        &self,
        workflow_id: &str,
        status: WorkflowStatus,
        event_type: &str,
        data: Value,
    ) -> Result<WorkflowEvent, StorageError> {
        let now = now_millis();
        let mut meta = self.get_meta(workflow_id)?.unwrap_or(WorkflowMeta {
            next_seq: 1,
            latest_status: status,
            updated_at_ms: now,
        });
        let event = WorkflowEvent {
            ts_ms: now,
            workflow_id: workflow_id.to_string(),
            seq: meta.next_seq,
            event_type: event_type.to_string(),
            data,
        };
        self.append_event(&event)?;
        meta.next_seq += 1;
        meta.latest_status = status;
        meta.updated_at_ms = now;
        self.put_meta(workflow_id, &meta)?;
        Ok(event)
    }

    pub fn append_event(&self, event: &WorkflowEvent) -> Result<(), StorageError> {
        let key = encode_event_key(&event.workflow_id, event.seq);
        let value = serde_json::to_vec(event)?;
        self.events.insert(key.as_bytes(), value)?;
        Ok(())
    }

    pub fn read_events(&self, workflow_id: &str) -> Result<Vec<WorkflowEvent>, StorageError> {
        self.read_events_after(workflow_id, 0)
    }

    pub fn read_events_after(
        &self,
        workflow_id: &str,
        after_seq: u64,
    ) -> Result<Vec<WorkflowEvent>, StorageError> {
        let prefix = format!("{workflow_id}:");
        let mut out = Vec::new();
        for result in self.events.scan_prefix(prefix.as_bytes()) {
            let (_, value) = result?;
            let parsed: WorkflowEvent = serde_json::from_slice(&value)?;
            if parsed.seq > after_seq {
                out.push(parsed);
            }
        }
        out.sort_by_key(|e| e.seq);
        Ok(out)
    }

    pub fn delete_workflow(&self, workflow_id: &str) -> Result<(), StorageError> {
        self.workflows.remove(workflow_id.as_bytes())?;
        self.meta.remove(workflow_id.as_bytes())?;
        let prefix = format!("{workflow_id}:");
        let keys: Vec<Vec<u8>> = self
            .events
            .scan_prefix(prefix.as_bytes())
            .filter_map(|r| r.ok().map(|(k, _)| k.to_vec()))
            .collect();
        for key in keys {
            self.events.remove(key)?;
        }
        Ok(())
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }

    pub fn encode_event_key(workflow_id: &str, seq: u64) -> String {
        encode_event_key(workflow_id, seq)
    }
}

fn encode_event_key(workflow_id: &str, seq: u64) -> String {
    format!("{workflow_id}:{seq:0EVENT_KEY_PAD$}")
}
