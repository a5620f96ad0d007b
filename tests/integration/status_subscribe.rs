//! Integration tests for status queries, event history and subscriptions

use futures::StreamExt;
use refereed::status::StatusSnapshot;
use refereed::workflow::{
    CancelFlag, Stage, Workflow, WorkflowRequest, WorkflowStateMachine, WorkflowStatus,
};
use std::time::Duration;
use tempfile::TempDir;

use crate::integration::test_utils::{register_running, test_config, test_services, ScriptedCapability};

fn request() -> WorkflowRequest {
    WorkflowRequest::new("Protein structure prediction", &test_config().pipeline)
}

#[tokio::test]
async fn test_stream_ends_after_terminal_status() {
    let temp_dir = TempDir::new().unwrap();
    let capability = ScriptedCapability::new(vec![9.0]);
    let services = test_services(&temp_dir, test_config(), capability);
    register_running(&services, "wf-sub", &request());

    let stream = services.status.subscribe("wf-sub").unwrap();
    let mut machine = WorkflowStateMachine::fresh(services.clone(), "wf-sub", request());
    let cancel = CancelFlag::new();

    let (snapshots, outcome) = tokio::join!(
        tokio::time::timeout(Duration::from_secs(10), stream.collect::<Vec<StatusSnapshot>>()),
        machine.run(&cancel),
    );
    outcome.unwrap();
    let snapshots = snapshots.expect("stream should end once the workflow settles");

    assert_eq!(snapshots[0].status, WorkflowStatus::Running);
    let last = snapshots.last().unwrap();
    assert_eq!(last.status, WorkflowStatus::Completed);
    assert_eq!(last.stage, Stage::Completed);
    assert_eq!(
        snapshots.iter().filter(|s| s.status.is_terminal()).count(),
        1
    );
}

#[tokio::test]
async fn test_subscribing_to_finished_workflow_yields_one_snapshot() {
    let temp_dir = TempDir::new().unwrap();
    let capability = ScriptedCapability::new(vec![2.0]);
    let services = test_services(&temp_dir, test_config(), capability);
    let mut request = request();
    request.max_rounds = 1;
    register_running(&services, "wf-done", &request);

    let mut machine = WorkflowStateMachine::fresh(services.clone(), "wf-done", request);
    machine.run(&CancelFlag::new()).await.unwrap();

    let snapshots: Vec<_> = services.status.subscribe("wf-done").unwrap().collect().await;
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].status, WorkflowStatus::Rejected);
    assert_eq!(services.status.get_status("wf-done").unwrap(), snapshots[0]);
}

#[tokio::test]
async fn test_history_records_every_stage_in_order() {
    let temp_dir = TempDir::new().unwrap();
    let capability = ScriptedCapability::new(vec![9.0]);
    let services = test_services(&temp_dir, test_config(), capability);
    register_running(&services, "wf-hist", &request());

    let mut machine = WorkflowStateMachine::fresh(services.clone(), "wf-hist", request());
    machine.run(&CancelFlag::new()).await.unwrap();

    let history = services.status.history("wf-hist").unwrap();
    assert_eq!(history.first().unwrap().event_type, "workflow_created");
    assert_eq!(history.last().unwrap().event_type, "workflow_finished");
    assert!(history.windows(2).all(|w| w[0].seq < w[1].seq));

    let stages: Vec<String> = history
        .iter()
        .filter(|e| e.event_type == "stage_entered")
        .map(|e| e.data["stage"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(
        stages,
        vec![
            "composing_team",
            "drafting",
            "desk_screening",
            "peer_review",
            "moderator_decision"
        ]
    );
}

#[tokio::test]
async fn test_invalid_transition_is_refused() {
    let temp_dir = TempDir::new().unwrap();
    let capability = ScriptedCapability::new(vec![9.0]);
    let services = test_services(&temp_dir, test_config(), capability);
    services
        .status
        .create(&Workflow::queued("wf-q", request(), 0))
        .unwrap();

    assert!(services
        .status
        .set_status("wf-q", WorkflowStatus::Completed, None)
        .is_err());
    assert_eq!(
        services.status.get("wf-q").unwrap().status,
        WorkflowStatus::Queued
    );
    services
        .status
        .set_status("wf-q", WorkflowStatus::Failed, Some("boom".into()))
        .unwrap();
    let failed = services.status.get("wf-q").unwrap();
    assert_eq!(failed.last_error.as_deref(), Some("boom"));
}

#[tokio::test]
async fn test_deleting_a_workflow_ends_open_streams() {
    let temp_dir = TempDir::new().unwrap();
    let capability = ScriptedCapability::new(vec![9.0]);
    let services = test_services(&temp_dir, test_config(), capability);
    register_running(&services, "wf-del", &request());

    let stream = services.status.subscribe("wf-del").unwrap();
    services.status.delete("wf-del").unwrap();

    let snapshots = tokio::time::timeout(Duration::from_secs(5), stream.collect::<Vec<_>>())
        .await
        .unwrap();
    assert_eq!(snapshots.len(), 1);
    assert!(services.status.get("wf-del").is_err());
}
