//! Integration tests for reference canonicalization across authors and workflows

use refereed::checkpoint::draft_file;
use refereed::references::{ReferenceCanonicalizer, ReferenceCandidate};
use refereed::workflow::{
    CancelFlag, ExecutionMode, Manuscript, Stage, WorkflowRequest, WorkflowStateMachine,
};
use tempfile::TempDir;

use crate::integration::test_utils::{register_running, test_config, test_services, ScriptedCapability};

fn multi_author_request() -> WorkflowRequest {
    let mut request = WorkflowRequest::new("Transformers in vision", &test_config().pipeline);
    request.mode = ExecutionMode::MultiAuthor;
    request
}

async fn draft_only(machine: &mut WorkflowStateMachine) {
    while machine.progress().stage <= Stage::Drafting {
        machine.advance().await.unwrap();
    }
}

#[test]
fn test_doi_then_title_variant_share_one_id() {
    let mut canon = ReferenceCanonicalizer::new();
    let first = canon.add_reference(&ReferenceCandidate::new("Foo | ICML 2024").with_doi("10.48550/foo"));
    let second = canon.add_reference(&ReferenceCandidate::new("Foo"));
    let third = canon.add_reference(&ReferenceCandidate::new("FOO!").with_doi("doi:10.48550/FOO"));

    assert_eq!(first, 1);
    assert_eq!(second, first);
    assert_eq!(third, first);
    assert_eq!(canon.len(), 1);
    assert_eq!(canon.get(1).unwrap().doi.as_deref(), Some("10.48550/foo"));
}

#[tokio::test]
async fn test_authors_citations_are_renumbered_to_canonical_ids() {
    let temp_dir = TempDir::new().unwrap();
    let capability = ScriptedCapability::new(vec![9.0]);
    *capability.proposed_authors.lock() = 2;
    let services = test_services(&temp_dir, test_config(), capability);
    let request = multi_author_request();
    register_running(&services, "wf-refs", &request);

    let mut machine = WorkflowStateMachine::fresh(services.clone(), "wf-refs", request);
    draft_only(&mut machine).await;

    let state = machine.state();
    assert_eq!(state.authors().len(), 2);
    assert_eq!(state.references.len(), 2);
    assert_eq!(state.references[0].doi.as_deref(), Some("10.5555/3295222"));
    assert_eq!(
        state.references[1].variants,
        vec!["Deep Residual Learning", "Deep Residual Learning | CVPR 2016"]
    );

    let draft = state.draft.as_ref().unwrap();
    let results = draft.sections.iter().find(|s| s.id == "results").unwrap();
    assert_eq!(results.content, "Results [2] build on [1].");
    assert_eq!(results.author_id, "author-2");
    assert_eq!(draft.sections[0].content, "Background [1].");

    let stored: Manuscript = services
        .checkpoints
        .read_artifact("wf-refs", &draft_file(1))
        .unwrap()
        .unwrap();
    assert_eq!(&stored, draft);
}

#[tokio::test]
async fn test_each_workflow_numbers_references_independently() {
    let temp_dir = TempDir::new().unwrap();
    let capability = ScriptedCapability::new(vec![9.0]);
    let services = test_services(&temp_dir, test_config(), capability);
    let request = WorkflowRequest::new("Retrieval augmented generation", &test_config().pipeline);

    let mut ids = Vec::new();
    for workflow_id in ["wf-a", "wf-b"] {
        register_running(&services, workflow_id, &request);
        let mut machine = WorkflowStateMachine::fresh(services.clone(), workflow_id, request.clone());
        machine.run(&CancelFlag::new()).await.unwrap();
        ids.push(
            machine
                .state()
                .references
                .iter()
                .map(|r| r.id)
                .collect::<Vec<_>>(),
        );
    }

    assert_eq!(ids[0], vec![1, 2]);
    assert_eq!(ids[1], vec![1, 2]);
}
