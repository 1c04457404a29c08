//! Job lifecycle integration tests (§3, §4.3): enqueue, claim, complete,
//! and the HITL park/respond round trip. Requires `TEST_DATABASE_URL`.

mod common;

use engine_core::kernel::credentials::Scope;
use engine_core::kernel::models::{HitlMode, JobStatus};

#[tokio::test]
async fn enqueue_claim_and_complete_round_trip() {
    let Some(harness) = common::TestHarness::new().await else {
        eprintln!("skipping: TEST_DATABASE_URL not set");
        return;
    };
    let (_, credential_id) = harness.issue_key(vec![Scope::JobsWrite]).await;

    let job = harness
        .kernel
        .queue
        .enqueue("summarize this PDF", credential_id, 0, 300, "gpt-4o-mini", HitlMode::AutoExecute, 3, None)
        .await
        .expect("enqueue should succeed");
    assert_eq!(job.status, JobStatus::Queued);

    let claimed = harness
        .kernel
        .queue
        .claim_next("worker-1")
        .await
        .expect("claim should succeed")
        .expect("a job should be claimable");
    assert_eq!(claimed.id, job.id);
    assert_eq!(claimed.status, JobStatus::Running);
    assert_eq!(claimed.worker_id.as_deref(), Some("worker-1"));

    assert!(harness.kernel.queue.claim_next("worker-2").await.unwrap().is_none());

    harness.kernel.queue.complete(job.id, "done").await.expect("complete should succeed");
    let finished = harness.kernel.queue.get(job.id).await.unwrap().unwrap();
    assert_eq!(finished.status, JobStatus::Completed);
    assert_eq!(finished.result.as_deref(), Some("done"));
}

#[tokio::test]
async fn idempotency_key_dedupes_enqueue() {
    let Some(harness) = common::TestHarness::new().await else {
        eprintln!("skipping: TEST_DATABASE_URL not set");
        return;
    };
    let (_, credential_id) = harness.issue_key(vec![Scope::JobsWrite]).await;

    let first = harness
        .kernel
        .queue
        .enqueue("run report", credential_id, 0, 300, "gpt-4o-mini", HitlMode::AutoExecute, 3, Some("report-2026-08"))
        .await
        .expect("first enqueue should succeed");

    let second = harness
        .kernel
        .queue
        .enqueue("run report", credential_id, 0, 300, "gpt-4o-mini", HitlMode::AutoExecute, 3, Some("report-2026-08"))
        .await
        .expect("second enqueue with same key should succeed");

    assert_eq!(first.id, second.id, "duplicate idempotency key must return the same job");
}

#[tokio::test]
async fn park_and_respond_round_trip() {
    let Some(harness) = common::TestHarness::new().await else {
        eprintln!("skipping: TEST_DATABASE_URL not set");
        return;
    };
    let (_, credential_id) = harness.issue_key(vec![Scope::JobsWrite]).await;

    let job = harness
        .kernel
        .queue
        .enqueue("delete all prod data", credential_id, 0, 300, "gpt-4o-mini", HitlMode::PlanApproval, 3, None)
        .await
        .unwrap();
    harness.kernel.queue.claim_next("worker-1").await.unwrap();

    harness
        .kernel
        .queue
        .park(job.id, "are you sure you want to delete prod data?", serde_json::json!({"conversation_history": [], "resumed_count": 0, "last_checkpoint_at": chrono::Utc::now()}))
        .await
        .expect("park should succeed");

    let parked = harness.kernel.queue.get(job.id).await.unwrap().unwrap();
    assert_eq!(parked.status, JobStatus::WaitingForUser);
    assert_eq!(parked.agent_question.as_deref(), Some("are you sure you want to delete prod data?"));

    let resumed = harness.kernel.queue.respond(job.id, "yes, proceed").await.expect("respond should succeed");
    assert_eq!(resumed.status, JobStatus::Queued);
    assert_eq!(resumed.user_answer.as_deref(), Some("yes, proceed"));
    assert!(resumed.agent_question.is_none());
}

#[tokio::test]
async fn respond_rejects_job_not_waiting() {
    let Some(harness) = common::TestHarness::new().await else {
        eprintln!("skipping: TEST_DATABASE_URL not set");
        return;
    };
    let (_, credential_id) = harness.issue_key(vec![Scope::JobsWrite]).await;

    let job = harness
        .kernel
        .queue
        .enqueue("noop task", credential_id, 0, 300, "gpt-4o-mini", HitlMode::AutoExecute, 3, None)
        .await
        .unwrap();

    let err = harness.kernel.queue.respond(job.id, "too soon").await.unwrap_err();
    assert!(matches!(err, engine_core::kernel::queue::QueueError::InvalidTransition));
}

#[tokio::test]
async fn cancel_only_allowed_from_queued_or_waiting() {
    let Some(harness) = common::TestHarness::new().await else {
        eprintln!("skipping: TEST_DATABASE_URL not set");
        return;
    };
    let (_, credential_id) = harness.issue_key(vec![Scope::JobsWrite]).await;

    let job = harness
        .kernel
        .queue
        .enqueue("long task", credential_id, 0, 300, "gpt-4o-mini", HitlMode::AutoExecute, 3, None)
        .await
        .unwrap();
    harness.kernel.queue.cancel(job.id).await.expect("cancelling a queued job should succeed");
    let cancelled = harness.kernel.queue.get(job.id).await.unwrap().unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);

    let err = harness.kernel.queue.cancel(job.id).await.unwrap_err();
    assert!(matches!(err, engine_core::kernel::queue::QueueError::InvalidTransition));
}

#[tokio::test]
async fn recover_stale_requeues_abandoned_running_jobs() {
    let Some(harness) = common::TestHarness::new().await else {
        eprintln!("skipping: TEST_DATABASE_URL not set");
        return;
    };
    let (_, credential_id) = harness.issue_key(vec![Scope::JobsWrite]).await;

    let job = harness
        .kernel
        .queue
        .enqueue("abandoned task", credential_id, 0, 300, "gpt-4o-mini", HitlMode::AutoExecute, 3, None)
        .await
        .unwrap();
    harness.kernel.queue.claim_next("worker-dead").await.unwrap();
    harness
        .kernel
        .queue
        .upsert_worker_heartbeat("worker-dead", "host-1", "0.1.0", 1, false)
        .await
        .unwrap();

    sqlx::query("UPDATE jobs SET started_at = NOW() - INTERVAL '1 hour' WHERE id = $1")
        .bind(job.id)
        .execute(&harness.kernel.db)
        .await
        .unwrap();
    sqlx::query("UPDATE workers SET last_heartbeat = NOW() - INTERVAL '10 minutes' WHERE id = 'worker-dead'")
        .execute(&harness.kernel.db)
        .await
        .unwrap();

    let recovered = harness.kernel.queue.recover_stale(60).await.expect("recover_stale should succeed");
    assert_eq!(recovered, 1);

    let job = harness.kernel.queue.get(job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Queued);
}
