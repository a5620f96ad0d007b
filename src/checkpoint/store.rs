//! Filesystem checkpoint store.

use super::recovery::{classify, DirState, RecoveryEntry};
use super::{digest_value, Checkpoint};
use crate::error::StorageError;
use crate::workflow::{Outcome, WorkflowRequest};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

pub const REQUEST_FILE: &str = "request.json";
pub const TEAM_FILE: &str = "team.json";
pub const SCREENING_FILE: &str = "screening.json";
pub const DECISION_FILE: &str = "decision.json";
pub const CHECKPOINT_FILE: &str = "checkpoint.json";
pub const COMPLETION_MARKER: &str = "workflow_complete.json";

pub fn draft_file(version: u32) -> String {
    format!("draft_v{}.json", version)
}

pub fn round_file(round: u32) -> String {
    format!("round_{}.json", round)
}

#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    digest: String,
    checkpoint: T,
}

/// Summary written when a run reaches a terminal stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionMarker {
    pub workflow_id: String,
    pub topic: String,
    pub outcome: Outcome,
    pub rounds: u32,
    pub final_score: Option<f64>,
    pub passed: bool,
    pub input_units: u64,
    pub output_units: u64,
    pub estimated_cost: f64,
    pub completed_at_ms: u64,
}

/// Per-workflow result directories under one root.
///
/// Layout: `{root}/{workflow_id}/{artifact}.json`. Each workflow directory has a
/// single writer (the worker that owns the workflow), so writes are not locked.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    root: PathBuf,
}

impl CheckpointStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| {
            StorageError::IoError(std::io::Error::new(
                e.kind(),
                format!("Failed to create results directory at {:?}: {}", root, e),
            ))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn workflow_dir(&self, workflow_id: &str) -> PathBuf {
        self.root.join(workflow_id)
    }

    /// Create the workflow directory and record the submission.
    pub fn begin(&self, workflow_id: &str, request: &WorkflowRequest) -> Result<(), StorageError> {
        fs::create_dir_all(self.workflow_dir(workflow_id))?;
        self.write_artifact(workflow_id, REQUEST_FILE, request)
    }

    pub fn read_request(&self, workflow_id: &str) -> Result<WorkflowRequest, StorageError> {
        self.read_artifact(workflow_id, REQUEST_FILE)?
            .ok_or_else(|| StorageError::WorkflowNotFound(workflow_id.to_string()))
    }

    /// Write `value` as pretty JSON via a temp file and rename.
    pub fn write_artifact<T: Serialize + ?Sized>(
        &self,
        workflow_id: &str,
        name: &str,
        value: &T,
    ) -> Result<(), StorageError> {
        let dir = self.workflow_dir(workflow_id);
        fs::create_dir_all(&dir)?;
        let bytes = serde_json::to_vec_pretty(value)?;
        write_atomic(&dir.join(name), &bytes)
    }

    pub fn read_artifact<T: DeserializeOwned>(
        &self,
        workflow_id: &str,
        name: &str,
    ) -> Result<Option<T>, StorageError> {
        let path = self.workflow_dir(workflow_id).join(name);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path)?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Persist `checkpoint`, superseding the previous one.
    ///
    /// Fails with `CheckpointRegression` if the stored checkpoint is further along.
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<(), StorageError> {
        if let Some(current) = self.load(&checkpoint.workflow_id)? {
            if current.progress > checkpoint.progress {
                return Err(StorageError::CheckpointRegression {
                    workflow_id: checkpoint.workflow_id.clone(),
                    current: current.progress.to_string(),
                    attempted: checkpoint.progress.to_string(),
                });
            }
        }

        let value = serde_json::to_value(checkpoint)?;
        let envelope = Envelope {
            digest: digest_value(&value)?,
            checkpoint: value,
        };
        self.write_artifact(&checkpoint.workflow_id, CHECKPOINT_FILE, &envelope)?;
        debug!(
            workflow_id = %checkpoint.workflow_id,
            progress = %checkpoint.progress,
            "Checkpoint saved"
        );
        Ok(())
    }

    /// Latest verified checkpoint. An unreadable or tampered checkpoint counts as absent.
    pub fn load(&self, workflow_id: &str) -> Result<Option<Checkpoint>, StorageError> {
        let envelope: Envelope<serde_json::Value> =
            match self.read_artifact(workflow_id, CHECKPOINT_FILE) {
                Ok(Some(envelope)) => envelope,
                Ok(None) => return Ok(None),
                Err(StorageError::InvalidData(e)) => {
                    warn!(workflow_id, error = %e, "Unreadable checkpoint ignored");
                    return Ok(None);
                }
                Err(e) => return Err(e),
            };

        let actual = digest_value(&envelope.checkpoint)?;
        if actual != envelope.digest {
            warn!(
                workflow_id,
                expected = %envelope.digest,
                actual = %actual,
                "Checkpoint digest mismatch; ignoring checkpoint"
            );
            return Ok(None);
        }

        match serde_json::from_value(envelope.checkpoint) {
            Ok(checkpoint) => Ok(Some(checkpoint)),
            Err(e) => {
                warn!(workflow_id, error = %e, "Checkpoint schema mismatch; ignoring checkpoint");
                Ok(None)
            }
        }
    }

    pub fn has_checkpoint(&self, workflow_id: &str) -> bool {
        matches!(self.load(workflow_id), Ok(Some(_)))
    }

    /// Write the completion marker, then drop the checkpoint it supersedes.
    pub fn mark_complete(&self, marker: &CompletionMarker) -> Result<(), StorageError> {
        self.write_artifact(&marker.workflow_id, COMPLETION_MARKER, marker)?;
        let checkpoint = self.workflow_dir(&marker.workflow_id).join(CHECKPOINT_FILE);
        if checkpoint.exists() {
            fs::remove_file(checkpoint)?;
        }
        Ok(())
    }

    pub fn completion_marker(
        &self,
        workflow_id: &str,
    ) -> Result<Option<CompletionMarker>, StorageError> {
        self.read_artifact(workflow_id, COMPLETION_MARKER)
    }

    /// Remove everything but `request.json` so the run can start over.
    pub fn reset(&self, workflow_id: &str) -> Result<(), StorageError> {
        for name in self.list_files(workflow_id)? {
            if name != REQUEST_FILE {
                fs::remove_file(self.workflow_dir(workflow_id).join(name))?;
            }
        }
        Ok(())
    }

    pub fn remove(&self, workflow_id: &str) -> Result<(), StorageError> {
        let dir = self.workflow_dir(workflow_id);
        if dir.exists() {
            fs::remove_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn exists(&self, workflow_id: &str) -> bool {
        self.workflow_dir(workflow_id).is_dir()
    }

    /// Observe one workflow directory.
    pub fn inspect(&self, workflow_id: &str) -> Result<DirState, StorageError> {
        let mut state = DirState::default();
        for name in self.list_files(workflow_id)? {
            match name.as_str() {
                CHECKPOINT_FILE => {}
                COMPLETION_MARKER => state.has_completion_marker = true,
                _ => state.artifact_files.push(name),
            }
        }
        state.has_checkpoint = self.load(workflow_id)?.is_some();
        Ok(state)
    }

    /// Classify every workflow directory under the root, sorted by id.
    pub fn scan(&self) -> Result<Vec<RecoveryEntry>, StorageError> {
        let mut entries = Vec::new();
        for entry in WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| StorageError::IoError(e.into()))?;
            if !entry.file_type().is_dir() {
                continue;
            }
            let workflow_id = entry.file_name().to_string_lossy().to_string();
            let state = self.inspect(&workflow_id)?;
            entries.push(RecoveryEntry {
                class: classify(&state),
                workflow_id,
                state,
            });
        }
        Ok(entries)
    }

    /// File names in the workflow directory, skipping in-flight temp files.
    fn list_files(&self, workflow_id: &str) -> Result<Vec<String>, StorageError> {
        let dir = self.workflow_dir(workflow_id);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in WalkDir::new(&dir).min_depth(1).max_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|e| StorageError::IoError(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.ends_with(".tmp") {
                names.push(name);
            }
        }
        Ok(names)
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let temp_path = path.with_extension("json.tmp");
    fs::write(&temp_path, bytes).map_err(|e| {
        StorageError::IoError(std::io::Error::new(
            e.kind(),
            format!("Failed to write {:?}: {}", temp_path, e),
        ))
    })?;
    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        StorageError::IoError(std::io::Error::new(
            e.kind(),
            format!("Failed to rename temp file to {:?}: {}", path, e),
        ))
    })?;
    Ok(())
}
