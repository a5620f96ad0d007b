//! Checkpoint Store
//!
//! One directory per workflow under the results root. The directory holds the
//! submission request, per-stage artifacts, the latest checkpoint and, once the run
//! ends, a completion marker that supersedes the checkpoint. Recovery classification
//! over those directories is a pure function of what they contain.

mod recovery;
mod store;

pub use recovery::{classify, DirState, RecoveryClass, RecoveryEntry};
pub use store::{
    draft_file, round_file, CheckpointStore, CompletionMarker, CHECKPOINT_FILE, COMPLETION_MARKER,
    DECISION_FILE, REQUEST_FILE, SCREENING_FILE, TEAM_FILE,
};

use crate::workflow::{Progress, WorkflowRequest, WorkflowState};
use serde::{Deserialize, Serialize};

/// Latest durable progress of one workflow. `progress` names the next stage to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub workflow_id: String,
    pub progress: Progress,
    pub request: WorkflowRequest,
    /// Artifact file of the current draft
    #[serde(default)]
    pub draft_ref: Option<String>,
    pub state: WorkflowState,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

impl Checkpoint {
    pub fn digest(&self) -> Result<String, serde_json::Error> {
        let value = serde_json::to_value(self)?;
        digest_value(&value)
    }
}

/// blake3 over the canonical (sorted-key) JSON encoding.
///
/// Reloaded floats must parse back bit-exact for the digest to match, hence
/// serde_json's `float_roundtrip` feature.
pub(crate) fn digest_value(value: &serde_json::Value) -> Result<String, serde_json::Error> {
    let bytes = serde_json::to_vec(value)?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}
