//! Integration tests for refereed

mod test_utils;

mod checkpoint_recovery;
mod config_integration;
mod malformed_fields;
mod reference_dedup;
mod state_machine_resume;
mod status_subscribe;
mod worker_pool;
