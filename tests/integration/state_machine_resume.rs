//! Integration tests for checkpointed advancement and crash-and-resume

use refereed::checkpoint::Checkpoint;
use refereed::error::{PipelineError, StorageError};
use refereed::provider::Role;
use refereed::workflow::{
    CancelFlag, Outcome, Progress, Stage, WorkflowRequest, WorkflowStateMachine,
};
use tempfile::TempDir;

use crate::integration::test_utils::{register_running, test_config, test_services, ScriptedCapability};

fn request() -> WorkflowRequest {
    WorkflowRequest::new("Causal inference for A/B tests", &test_config().pipeline)
}

#[tokio::test]
async fn test_every_stage_leaves_a_later_checkpoint() {
    let temp_dir = TempDir::new().unwrap();
    let capability = ScriptedCapability::new(vec![9.0]);
    let services = test_services(&temp_dir, test_config(), capability);
    register_running(&services, "wf-steps", &request());

    let mut machine = WorkflowStateMachine::fresh(services.clone(), "wf-steps", request());
    assert_eq!(machine.progress(), Progress::new(0, Stage::ComposingTeam));

    let mut seen = vec![machine.progress()];
    while !machine.is_finished() {
        let next = machine.advance().await.unwrap();
        if !next.stage.is_terminal() {
            let checkpoint: Checkpoint = services.checkpoints.load("wf-steps").unwrap().unwrap();
            assert_eq!(checkpoint.progress, next);
            assert_eq!(checkpoint.state, *machine.state());
        }
        seen.push(next);
    }

    assert!(seen.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(
        seen,
        vec![
            Progress::new(0, Stage::ComposingTeam),
            Progress::new(0, Stage::Drafting),
            Progress::new(0, Stage::DeskScreening),
            Progress::new(1, Stage::PeerReview),
            Progress::new(1, Stage::ModeratorDecision),
            Progress::new(1, Stage::Completed),
        ]
    );
    // The completion marker supersedes the checkpoint
    assert!(!services.checkpoints.has_checkpoint("wf-steps"));
    assert!(machine.advance().await.is_err());
}

#[tokio::test]
async fn test_resume_after_crash_does_not_repeat_calls() {
    let temp_dir = TempDir::new().unwrap();
    let capability = ScriptedCapability::new(vec![9.0]);
    let services = test_services(&temp_dir, test_config(), capability.clone());
    register_running(&services, "wf-crash", &request());

    capability.fail(Some(Role::DeskEditor));
    let mut machine = WorkflowStateMachine::fresh(services.clone(), "wf-crash", request());
    let err = machine.run(&CancelFlag::new()).await.unwrap_err();
    assert!(matches!(err, PipelineError::StageFailed { ref stage, .. } if stage == "desk_screening"));
    drop(machine);

    let checkpoint = services.checkpoints.load("wf-crash").unwrap().unwrap();
    assert_eq!(checkpoint.progress, Progress::new(0, Stage::DeskScreening));
    assert_eq!(checkpoint.draft_ref.as_deref(), Some("draft_v1.json"));
    let composer_calls = capability.calls(Role::TeamComposer);
    let author_calls = capability.calls(Role::Author);
    assert_eq!((composer_calls, author_calls), (1, 1));

    // Simulated restart: a new machine from disk
    capability.fail(None);
    let mut resumed = WorkflowStateMachine::load(services.clone(), "wf-crash").unwrap();
    assert_eq!(resumed.progress(), Progress::new(0, Stage::DeskScreening));
    assert_eq!(resumed.run(&CancelFlag::new()).await.unwrap(), Outcome::Accepted);

    assert_eq!(capability.calls(Role::TeamComposer), composer_calls);
    assert_eq!(capability.calls(Role::Author), author_calls);
    assert_eq!(capability.calls(Role::DeskEditor), 2);
    assert_eq!(resumed.state().references.len(), 2);
}

#[tokio::test]
async fn test_failed_stage_keeps_previous_state() {
    let temp_dir = TempDir::new().unwrap();
    let capability = ScriptedCapability::new(vec![9.0]);
    let services = test_services(&temp_dir, test_config(), capability.clone());
    register_running(&services, "wf-keep", &request());

    let mut machine = WorkflowStateMachine::fresh(services, "wf-keep", request());
    machine.advance().await.unwrap();
    let before = machine.state().clone();

    capability.fail(Some(Role::Author));
    assert!(machine.advance().await.is_err());
    assert_eq!(machine.progress(), Progress::new(0, Stage::Drafting));
    assert_eq!(*machine.state(), before);
}

#[tokio::test]
async fn test_older_checkpoint_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let capability = ScriptedCapability::new(vec![9.0]);
    let services = test_services(&temp_dir, test_config(), capability);
    register_running(&services, "wf-mono", &request());

    let mut machine = WorkflowStateMachine::fresh(services.clone(), "wf-mono", request());
    machine.advance().await.unwrap();
    machine.advance().await.unwrap();

    let mut stale = services.checkpoints.load("wf-mono").unwrap().unwrap();
    stale.progress = Progress::new(0, Stage::Drafting);
    assert!(matches!(
        services.checkpoints.save(&stale),
        Err(StorageError::CheckpointRegression { .. })
    ));
}

#[tokio::test]
async fn test_cancelled_run_stops_before_next_stage() {
    let temp_dir = TempDir::new().unwrap();
    let capability = ScriptedCapability::new(vec![9.0]);
    let services = test_services(&temp_dir, test_config(), capability.clone());
    register_running(&services, "wf-cancel", &request());

    let cancel = CancelFlag::new();
    cancel.cancel();
    let mut machine = WorkflowStateMachine::fresh(services, "wf-cancel", request());
    assert!(matches!(
        machine.run(&cancel).await,
        Err(PipelineError::Cancelled(_))
    ));
    assert_eq!(capability.total_calls(), 0);
}
