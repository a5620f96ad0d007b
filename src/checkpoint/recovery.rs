//! Recovery classification of workflow directories.

use crate::workflow::WorkflowStatus;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a workflow directory contains.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirState {
    /// A checkpoint that passed verification
    pub has_checkpoint: bool,
    pub has_completion_marker: bool,
    /// Every other file name in the directory
    pub artifact_files: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryClass {
    /// Checkpoint without completion marker
    Resumable,
    /// Crashed before its first checkpoint (or an empty directory)
    Orphan,
    /// Completion marker present; ignored by recovery
    Complete,
}

impl RecoveryClass {
    pub fn as_str(self) -> &'static str {
        match self {
            RecoveryClass::Resumable => "resumable",
            RecoveryClass::Orphan => "orphan",
            RecoveryClass::Complete => "complete",
        }
    }

    /// Status the registry should show for this class.
    pub fn status(self) -> WorkflowStatus {
        match self {
            RecoveryClass::Resumable => WorkflowStatus::Interrupted,
            RecoveryClass::Orphan => WorkflowStatus::Failed,
            RecoveryClass::Complete => WorkflowStatus::Completed,
        }
    }

    pub fn needs_recovery(self) -> bool {
        self != RecoveryClass::Complete
    }
}

impl fmt::Display for RecoveryClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify one directory. Total over every possible `DirState`.
pub fn classify(state: &DirState) -> RecoveryClass {
    if state.has_completion_marker {
        RecoveryClass::Complete
    } else if state.has_checkpoint {
        RecoveryClass::Resumable
    } else {
        RecoveryClass::Orphan
    }
}

/// One scanned directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryEntry {
    pub workflow_id: String,
    pub class: RecoveryClass,
    pub state: DirState,
}
