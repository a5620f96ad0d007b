//! CLI presentation: text and json formatters per command family.

mod recovery;
mod workflow;

pub use recovery::{format_recovery_json, format_recovery_text};
pub use workflow::{
    format_outcome, format_snapshot_line, format_workflow_detail, format_workflow_json,
    format_workflow_list, format_workflow_list_json,
};

use crate::error::{ApiError, StorageError};
use serde::Serialize;

pub(crate) fn to_pretty_json<T: Serialize + ?Sized>(value: &T) -> Result<String, ApiError> {
    serde_json::to_string_pretty(value).map_err(|e| ApiError::StorageError(StorageError::from(e)))
}
