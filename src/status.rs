//! Workflow Status
//!
//! Durable workflow registry (sled) plus the status hub that external consumers
//! query and subscribe to.

mod hub;
mod store;

pub use hub::{StatusHub, StatusSnapshot, StatusStream};
pub use store::{WorkflowEvent, WorkflowMeta, WorkflowStore};

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static WORKFLOW_COUNTER: AtomicU64 = AtomicU64::new(1);

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Process-unique workflow id: `wf-{ts}-{pid}-{seq}`.
pub fn new_workflow_id() -> String {
    let ts = now_millis();
    let pid = std::process::id();
    let seq = WORKFLOW_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("wf-{ts}-{pid}-{seq}")
}
