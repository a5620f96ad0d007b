//! Integration tests for the worker pool: bounded concurrency, admission and control

use refereed::error::PoolError;
use refereed::pool::WorkerPool;
use refereed::provider::Role;
use refereed::runtime::Services;
use refereed::workflow::{Outcome, WorkflowRequest, WorkflowStatus};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Semaphore;

use crate::integration::test_utils::{test_config, test_services, ScriptedCapability};

fn request(topic: &str) -> WorkflowRequest {
    WorkflowRequest::new(topic, &test_config().pipeline)
}

fn count(services: &Services, ids: &[String], status: WorkflowStatus) -> usize {
    ids.iter()
        .filter(|id| services.status.get(id).unwrap().status == status)
        .count()
}

/// Poll until `condition` holds, failing the test after five seconds.
async fn eventually<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn gated_pool(temp_dir: &TempDir) -> (WorkerPool, Arc<ScriptedCapability>, Arc<Semaphore>) {
    let gate = Arc::new(Semaphore::new(0));
    let capability = ScriptedCapability::gated(vec![9.0], gate.clone());
    let services = test_services(temp_dir, test_config(), capability.clone());
    let pool = WorkerPool::new(services);
    pool.start().await.unwrap();
    (pool, capability, gate)
}

#[tokio::test]
async fn test_no_more_than_n_workflows_run_at_once() {
    let temp_dir = TempDir::new().unwrap();
    let (pool, capability, gate) = gated_pool(&temp_dir).await;
    let services = pool.services().clone();

    let mut ids = Vec::new();
    for i in 0..4 {
        ids.push(pool.submit(request(&format!("Topic {}", i))).await.unwrap());
    }

    eventually(|| {
        count(&services, &ids, WorkflowStatus::Running) == 2
            && count(&services, &ids, WorkflowStatus::Queued) == 2
    })
    .await;
    let stats = pool.stats().await;
    assert_eq!(stats.capacity, 2);
    assert_eq!(stats.queued, 2);
    assert!(stats.running <= 2);
    // Held workflows block in drafting; queued ones have not started
    eventually(|| capability.calls(Role::TeamComposer) == 2).await;
    assert_eq!(capability.calls(Role::Author), 0);

    gate.add_permits(1000);
    for id in &ids {
        let workflow = pool.wait_for(id).await.unwrap();
        assert_eq!(workflow.status, WorkflowStatus::Completed);
        assert_eq!(workflow.outcome, Some(Outcome::Accepted));
    }
    assert_eq!(capability.calls(Role::TeamComposer), 4);
    pool.shutdown().await;
}

#[tokio::test]
async fn test_submissions_are_rate_limited_per_caller() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = test_config();
    config.pool.min_submit_interval_ms = 60_000;
    let capability = ScriptedCapability::new(vec![9.0]);
    let pool = WorkerPool::new(test_services(&temp_dir, config, capability));

    assert!(matches!(
        pool.submit(request("Too early")).await,
        Err(PoolError::NotRunning)
    ));
    pool.start().await.unwrap();

    let first = pool.submit(request("First")).await.unwrap();
    match pool.submit(request("Second")).await {
        Err(PoolError::RateLimited {
            caller,
            retry_after_ms,
        }) => {
            assert_eq!(caller, "local");
            assert!(retry_after_ms > 0 && retry_after_ms <= 60_000);
        }
        other => panic!("expected rate limit, got {:?}", other.map(|_| ())),
    }

    let mut other_caller = request("Other caller");
    other_caller.caller = "ci".to_string();
    let second = pool.submit(other_caller).await.unwrap();
    assert_ne!(first, second);

    let mut empty = request("   ");
    empty.caller = "fresh".to_string();
    assert!(matches!(
        pool.submit(empty).await,
        Err(PoolError::InvalidRequest(_))
    ));

    pool.wait_for(&first).await.unwrap();
    pool.wait_for(&second).await.unwrap();
    pool.shutdown().await;
}

#[tokio::test]
async fn test_cancel_queued_then_retry() {
    let temp_dir = TempDir::new().unwrap();
    let (pool, _capability, gate) = gated_pool(&temp_dir).await;
    let services = pool.services().clone();

    let mut ids = Vec::new();
    for i in 0..3 {
        ids.push(pool.submit(request(&format!("Topic {}", i))).await.unwrap());
    }
    eventually(|| count(&services, &ids, WorkflowStatus::Running) == 2).await;

    let queued = ids
        .iter()
        .find(|id| services.status.get(id).unwrap().status == WorkflowStatus::Queued)
        .unwrap()
        .clone();
    pool.cancel(&queued).await.unwrap();
    let cancelled = services.status.get(&queued).unwrap();
    assert_eq!(cancelled.status, WorkflowStatus::Failed);
    assert_eq!(cancelled.last_error.as_deref(), Some("cancelled"));

    // Failed workflows start over; only interrupted ones resume
    assert!(matches!(
        pool.resume(&queued).await,
        Err(PoolError::InvalidAction { action: "resume", .. })
    ));

    gate.add_permits(1000);
    pool.retry(&queued).await.unwrap();
    for id in &ids {
        assert_eq!(
            pool.wait_for(id).await.unwrap().status,
            WorkflowStatus::Completed
        );
    }
    pool.shutdown().await;
}

#[tokio::test]
async fn test_cancel_running_interrupts_then_resume_finishes() {
    let temp_dir = TempDir::new().unwrap();
    let (pool, capability, gate) = gated_pool(&temp_dir).await;
    let services = pool.services().clone();

    let id = pool.submit(request("Cancel me")).await.unwrap();
    eventually(|| services.status.get(&id).unwrap().status == WorkflowStatus::Running).await;
    eventually(|| capability.calls(Role::TeamComposer) == 1).await;

    pool.cancel(&id).await.unwrap();
    gate.add_permits(1000);

    let interrupted = pool.wait_for(&id).await.unwrap();
    assert_eq!(interrupted.status, WorkflowStatus::Interrupted);
    assert!(services.checkpoints.has_checkpoint(&id));

    pool.resume(&id).await.unwrap();
    eventually(|| services.status.get(&id).unwrap().status == WorkflowStatus::Completed).await;
    assert_eq!(capability.calls(Role::TeamComposer), 1);
    assert_eq!(capability.calls(Role::Author), 1);
    pool.shutdown().await;
}

#[tokio::test]
async fn test_control_actions_respect_status() {
    let temp_dir = TempDir::new().unwrap();
    let capability = ScriptedCapability::new(vec![9.0]);
    let pool = WorkerPool::new(test_services(&temp_dir, test_config(), capability));
    pool.start().await.unwrap();
    let services = pool.services().clone();

    let id = pool.submit(request("Finished")).await.unwrap();
    assert_eq!(
        pool.wait_for(&id).await.unwrap().status,
        WorkflowStatus::Completed
    );

    for result in [
        pool.resume(&id).await,
        pool.retry(&id).await,
        pool.cancel(&id).await,
    ] {
        assert!(matches!(result, Err(PoolError::InvalidAction { .. })));
    }

    pool.delete(&id).unwrap();
    assert!(services.status.get(&id).is_err());
    assert!(!services.checkpoints.exists(&id));
    assert!(pool.delete(&id).is_err());
    pool.shutdown().await;
}

#[tokio::test]
async fn test_failed_run_without_checkpoint_is_failed() {
    let temp_dir = TempDir::new().unwrap();
    let capability = ScriptedCapability::new(vec![9.0]);
    capability.fail(Some(Role::TeamComposer));
    let pool = WorkerPool::new(test_services(&temp_dir, test_config(), capability.clone()));
    pool.start().await.unwrap();

    let id = pool.submit(request("Doomed")).await.unwrap();
    let failed = pool.wait_for(&id).await.unwrap();
    assert_eq!(failed.status, WorkflowStatus::Failed);
    assert!(failed.last_error.unwrap().contains("composing_team"));
    pool.delete(&id).unwrap();
    pool.shutdown().await;
}
