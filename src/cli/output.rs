//! CLI output: error mapping from domain errors to stable CLI surface.

use crate::error::{ApiError, PoolError};

/// Map domain/service errors to a string for CLI output.
pub fn map_error(e: &ApiError) -> String {
    match e {
        ApiError::Pool(PoolError::RateLimited { retry_after_ms, .. }) => {
            format!("Submitted too recently; try again in {}ms", retry_after_ms)
        }
        ApiError::Pool(PoolError::InvalidAction {
            workflow_id,
            action,
            status,
        }) => format!("Cannot {} {}: workflow is {}", action, workflow_id, status),
        _ => e.to_string(),
    }
}

/// Exit code for a failed command. Rate limiting is distinguishable from failure.
pub fn exit_code(e: &ApiError) -> i32 {
    match e {
        ApiError::Pool(PoolError::RateLimited { .. }) => 75,
        ApiError::ConfigError(_) => 78,
        _ => 1,
    }
}
