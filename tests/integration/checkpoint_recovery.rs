//! Integration tests for startup recovery of result directories

use refereed::checkpoint::{RecoveryClass, CHECKPOINT_FILE};
use refereed::pool::WorkerPool;
use refereed::provider::Role;
use refereed::runtime::Services;
use refereed::workflow::{
    CancelFlag, Outcome, WorkflowRequest, WorkflowStateMachine, WorkflowStatus,
};
use std::sync::Arc;
use tempfile::TempDir;

use crate::integration::test_utils::{register_running, test_config, test_services, ScriptedCapability};

fn request(topic: &str) -> WorkflowRequest {
    WorkflowRequest::new(topic, &test_config().pipeline)
}

/// Leaves three directories behind as a crashed process would:
/// one with a mid-run checkpoint, one with nothing past `request.json`, one finished.
async fn crashed_fixtures(services: &Arc<Services>, capability: &ScriptedCapability) {
    register_running(services, "wf-resumable", &request("Resumable"));
    capability.fail(Some(Role::DeskEditor));
    let mut machine = WorkflowStateMachine::fresh(services.clone(), "wf-resumable", request("Resumable"));
    assert!(machine.run(&CancelFlag::new()).await.is_err());
    capability.fail(None);

    register_running(services, "wf-orphan", &request("Orphan"));

    register_running(services, "wf-complete", &request("Complete"));
    let mut machine = WorkflowStateMachine::fresh(services.clone(), "wf-complete", request("Complete"));
    machine.run(&CancelFlag::new()).await.unwrap();
}

#[tokio::test]
async fn test_scan_classifies_fixture_directories() {
    let temp_dir = TempDir::new().unwrap();
    let capability = ScriptedCapability::new(vec![9.0]);
    let services = test_services(&temp_dir, test_config(), capability.clone());
    crashed_fixtures(&services, &capability).await;

    let classes: Vec<(String, RecoveryClass)> = services
        .checkpoints
        .scan()
        .unwrap()
        .into_iter()
        .map(|e| (e.workflow_id, e.class))
        .collect();
    assert_eq!(
        classes,
        vec![
            ("wf-complete".to_string(), RecoveryClass::Complete),
            ("wf-orphan".to_string(), RecoveryClass::Orphan),
            ("wf-resumable".to_string(), RecoveryClass::Resumable),
        ]
    );
}

#[tokio::test]
async fn test_recover_updates_registry_without_resuming() {
    let temp_dir = TempDir::new().unwrap();
    let capability = ScriptedCapability::new(vec![9.0]);
    let services = test_services(&temp_dir, test_config(), capability.clone());
    crashed_fixtures(&services, &capability).await;

    let pool = WorkerPool::new(services.clone());
    let report = pool.recover(false).await.unwrap();

    assert_eq!(report.entries.len(), 3);
    assert!(report.resumed.is_empty());
    assert_eq!(report.failed, vec!["wf-orphan".to_string()]);
    assert!(report.settled.is_empty());

    let status = |id: &str| services.status.get(id).unwrap().status;
    assert_eq!(status("wf-resumable"), WorkflowStatus::Interrupted);
    assert_eq!(status("wf-orphan"), WorkflowStatus::Failed);
    assert_eq!(status("wf-complete"), WorkflowStatus::Completed);

    // A second scan changes nothing
    let again = pool.recover(false).await.unwrap();
    assert!(again.failed.is_empty());
    assert_eq!(status("wf-resumable"), WorkflowStatus::Interrupted);
}

#[tokio::test]
async fn test_restart_resumes_from_checkpoint() {
    let temp_dir = TempDir::new().unwrap();
    let capability = ScriptedCapability::new(vec![9.0]);
    let services = test_services(&temp_dir, test_config(), capability.clone());
    crashed_fixtures(&services, &capability).await;
    let composer_calls = capability.calls(Role::TeamComposer);
    let author_calls = capability.calls(Role::Author);

    // A fresh pool knows nothing about the crashed run
    let pool = WorkerPool::new(services.clone());
    let report = pool.start_with(true).await.unwrap();
    assert_eq!(report.resumed, vec!["wf-resumable".to_string()]);

    let workflow = pool.wait_for("wf-resumable").await.unwrap();
    pool.shutdown().await;

    assert_eq!(workflow.status, WorkflowStatus::Completed);
    assert_eq!(workflow.outcome, Some(Outcome::Accepted));
    assert_eq!(capability.calls(Role::TeamComposer), composer_calls);
    assert_eq!(capability.calls(Role::Author), author_calls);
    assert_eq!(
        services.status.get("wf-orphan").unwrap().status,
        WorkflowStatus::Failed
    );
}

#[tokio::test]
async fn test_tampered_checkpoint_counts_as_orphan() {
    let temp_dir = TempDir::new().unwrap();
    let capability = ScriptedCapability::new(vec![9.0]);
    let services = test_services(&temp_dir, test_config(), capability.clone());
    crashed_fixtures(&services, &capability).await;

    let path = services
        .checkpoints
        .workflow_dir("wf-resumable")
        .join(CHECKPOINT_FILE);
    let tampered = std::fs::read_to_string(&path)
        .unwrap()
        .replace("desk_screening", "peer_review");
    std::fs::write(&path, tampered).unwrap();

    assert!(services.checkpoints.load("wf-resumable").unwrap().is_none());
    let pool = WorkerPool::new(services.clone());
    let report = pool.recover(true).await.unwrap();

    assert!(report.failed.contains(&"wf-resumable".to_string()));
    assert!(report.resumed.is_empty());
    assert_eq!(
        services.status.get("wf-resumable").unwrap().status,
        WorkflowStatus::Failed
    );
}

#[tokio::test]
async fn test_lost_registry_record_is_rebuilt_from_directory() {
    let temp_dir = TempDir::new().unwrap();
    let capability = ScriptedCapability::new(vec![9.0]);
    let services = test_services(&temp_dir, test_config(), capability.clone());
    crashed_fixtures(&services, &capability).await;

    services.status.delete("wf-complete").unwrap();
    services.status.delete("wf-resumable").unwrap();

    let pool = WorkerPool::new(services.clone());
    let report = pool.recover(false).await.unwrap();

    assert_eq!(report.settled, vec!["wf-complete".to_string()]);
    let complete = services.status.get("wf-complete").unwrap();
    assert_eq!(complete.status, WorkflowStatus::Completed);
    assert_eq!(complete.outcome, Some(Outcome::Accepted));
    assert_eq!(complete.request.topic, "Complete");

    assert_eq!(
        services.status.get("wf-resumable").unwrap().status,
        WorkflowStatus::Interrupted
    );
}
