//! Queue Store (§4.3): durable jobs, logs, artifacts, workers; atomic claim
//! and stale-lease recovery.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::kernel::models::{HitlMode, Job, JobArtifact, JobAttachment, JobLog, JobStatus, LogLevel, Worker};

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("job not found")]
    NotFound,
    #[error("invalid transition from current job status")]
    InvalidTransition,
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

pub type QueueResult<T> = Result<T, QueueError>;

/// Filters accepted by `list`.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub credential_id: Option<Uuid>,
    pub status: Option<JobStatus>,
    pub limit: i64,
    pub offset: i64,
}

/// Durable storage of Jobs, Logs, Artifacts, Workers, Attachments; atomic
/// claim; stale-lease recovery; §3 transition invariants.
#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn enqueue(
        &self,
        task: &str,
        credential_id: Uuid,
        priority: i32,
        timeout_seconds: i32,
        model: &str,
        hitl_mode: HitlMode,
        max_retries: i32,
        idempotency_key: Option<&str>,
    ) -> QueueResult<Job>;

    async fn claim_next(&self, worker_id: &str) -> QueueResult<Option<Job>>;
    async fn complete(&self, id: Uuid, result_text: &str) -> QueueResult<()>;
    async fn fail(&self, id: Uuid, error_text: &str) -> QueueResult<()>;
    async fn release(&self, id: Uuid) -> QueueResult<()>;
    async fn park(&self, id: Uuid, question: &str, execution_state: serde_json::Value) -> QueueResult<()>;
    async fn respond(&self, id: Uuid, user_answer: &str) -> QueueResult<Job>;
    async fn cancel(&self, id: Uuid) -> QueueResult<()>;
    async fn get(&self, id: Uuid) -> QueueResult<Option<Job>>;
    async fn list(&self, filter: JobFilter) -> QueueResult<Vec<Job>>;
    async fn append_log(&self, id: Uuid, level: LogLevel, message: &str, metadata: Option<serde_json::Value>);
    async fn list_logs(&self, id: Uuid, limit: i64, offset: i64) -> QueueResult<Vec<JobLog>>;
    async fn list_artifacts(&self, id: Uuid) -> QueueResult<Vec<JobArtifact>>;
    async fn add_artifact(
        &self,
        job_id: Uuid,
        filename: &str,
        mime_type: &str,
        storage_path: &str,
        public_url: &str,
        size_bytes: i64,
    ) -> QueueResult<JobArtifact>;
    async fn add_attachment(
        &self,
        job_id: Option<Uuid>,
        filename: &str,
        mime_type: &str,
        storage_path: &str,
        public_url: &str,
        size_bytes: i64,
    ) -> QueueResult<JobAttachment>;
    async fn list_attachments(&self, job_id: Uuid) -> QueueResult<Vec<JobAttachment>>;
    async fn link_attachments(&self, job_id: Uuid, attachment_ids: &[Uuid]) -> QueueResult<()>;
    async fn set_discovered_tools(&self, id: Uuid, names: &[String]) -> QueueResult<()>;
    async fn recover_stale(&self, stale_threshold_secs: i64) -> QueueResult<u64>;
    async fn upsert_worker_heartbeat(
        &self,
        id: &str,
        hostname: &str,
        version: &str,
        active_job_count: i32,
        draining: bool,
    ) -> QueueResult<()>;
    async fn mark_worker_dead(&self, id: &str) -> QueueResult<()>;
    async fn list_workers(&self, status: Option<&str>) -> QueueResult<Vec<Worker>>;
    async fn get_worker(&self, id: &str) -> QueueResult<Option<Worker>>;
}

const JOB_COLUMNS: &str = "id, credential_id, task, priority, timeout_seconds, model, hitl_mode, status, \
     worker_id, tools_discovered, execution_state, result, error, agent_question, user_answer, \
     retry_count, max_retries, created_at, started_at, completed_at, paused_at";

/// PostgreSQL-backed implementation. Claim uses `FOR UPDATE SKIP LOCKED`
/// under a `queued`-or-`stale` predicate, the way the teacher's
/// `Job::claim_jobs` folds claim and stale-recovery into one statement —
/// split here into two operations because §4.3 specifies `claimNext` and
/// `recoverStale` as distinct, independently-schedulable operations.
pub struct PostgresQueueStore {
    db: PgPool,
}

impl PostgresQueueStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    async fn find_by_idempotency_key(&self, credential_id: Uuid, key: &str) -> QueueResult<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE idempotency_key = $1 AND credential_id = $2"
        ))
        .bind(key)
        .bind(credential_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(job)
    }
}

#[async_trait]
impl QueueStore for PostgresQueueStore {
    async fn enqueue(
        &self,
        task: &str,
        credential_id: Uuid,
        priority: i32,
        timeout_seconds: i32,
        model: &str,
        hitl_mode: HitlMode,
        max_retries: i32,
        idempotency_key: Option<&str>,
    ) -> QueueResult<Job> {
        if let Some(key) = idempotency_key {
            if let Some(existing) = self.find_by_idempotency_key(credential_id, key).await? {
                return Ok(existing);
            }
        }

        let id = Uuid::new_v4();
        let job = sqlx::query_as::<_, Job>(&format!(
            r#"
            INSERT INTO jobs
                (id, credential_id, task, priority, timeout_seconds, model, hitl_mode, status,
                 tools_discovered, retry_count, max_retries, created_at, idempotency_key)
            VALUES ($1, $2, $3, $4, $5, $6, 'queued', '[]'::jsonb, 0, $7, NOW(), $8)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(credential_id)
        .bind(task)
        .bind(priority)
        .bind(timeout_seconds)
        .bind(model)
        .bind(hitl_mode)
        .bind(max_retries)
        .bind(idempotency_key)
        .fetch_one(&self.db)
        .await?;

        Ok(job)
    }

    async fn claim_next(&self, worker_id: &str) -> QueueResult<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(&format!(
            r#"
            WITH next_job AS (
                SELECT id FROM jobs
                WHERE status = 'queued'
                ORDER BY priority DESC, created_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs
            SET status = 'running', worker_id = $1, started_at = NOW()
            WHERE id IN (SELECT id FROM next_job)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(worker_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(job)
    }

    async fn complete(&self, id: Uuid, result_text: &str) -> QueueResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'completed', result = $2, completed_at = NOW()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(result_text)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            self.ensure_idempotent_or_conflict(id, JobStatus::Completed).await?;
        }
        Ok(())
    }

    async fn fail(&self, id: Uuid, error_text: &str) -> QueueResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'failed', error = $2, completed_at = NOW()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(error_text)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            self.ensure_idempotent_or_conflict(id, JobStatus::Failed).await?;
        }
        Ok(())
    }

    async fn release(&self, id: Uuid) -> QueueResult<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'queued', worker_id = NULL, started_at = NULL
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn park(&self, id: Uuid, question: &str, execution_state: serde_json::Value) -> QueueResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'waiting_for_user', agent_question = $2, execution_state = $3, paused_at = NOW()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(question)
        .bind(execution_state)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::InvalidTransition);
        }
        Ok(())
    }

    async fn respond(&self, id: Uuid, user_answer: &str) -> QueueResult<Job> {
        let current = self.get(id).await?.ok_or(QueueError::NotFound)?;
        if current.status != JobStatus::WaitingForUser {
            return Err(QueueError::InvalidTransition);
        }

        let mut state: crate::kernel::models::ExecutionState = current
            .execution_state
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_else(|| crate::kernel::models::ExecutionState::new(Vec::new()));

        state
            .conversation_history
            .push(crate::kernel::models::ConversationMessage::User {
                content: user_answer.to_string(),
            });
        state.resumed_count += 1;
        state.last_checkpoint_at = Utc::now();

        let state_json = serde_json::to_value(&state).map_err(|e| {
            QueueError::Db(sqlx::Error::Decode(Box::new(e)))
        })?;

        let job = sqlx::query_as::<_, Job>(&format!(
            r#"
            UPDATE jobs
            SET status = 'queued', user_answer = $2, execution_state = $3,
                agent_question = NULL, paused_at = NULL
            WHERE id = $1 AND status = 'waiting_for_user'
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(user_answer)
        .bind(state_json)
        .fetch_optional(&self.db)
        .await?
        .ok_or(QueueError::InvalidTransition)?;

        Ok(job)
    }

    async fn cancel(&self, id: Uuid) -> QueueResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'cancelled', completed_at = NOW()
            WHERE id = $1 AND status IN ('queued', 'waiting_for_user')
            "#,
        )
        .bind(id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::InvalidTransition);
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> QueueResult<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(job)
    }

    async fn list(&self, filter: JobFilter) -> QueueResult<Vec<Job>> {
        let jobs = sqlx::query_as::<_, Job>(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM jobs
            WHERE ($1::uuid IS NULL OR credential_id = $1)
              AND ($2::text IS NULL OR status = $2)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#
        ))
        .bind(filter.credential_id)
        .bind(filter.status.map(|s| serde_json::to_value(s).unwrap().as_str().unwrap().to_string()))
        .bind(filter.limit)
        .bind(filter.offset)
        .fetch_all(&self.db)
        .await?;
        Ok(jobs)
    }

    async fn append_log(&self, id: Uuid, level: LogLevel, message: &str, metadata: Option<serde_json::Value>) {
        // Best-effort: log failures must never fail the job (§4.3, §7).
        let result = sqlx::query(
            r#"
            INSERT INTO job_logs (id, job_id, sequence, level, message, metadata, created_at)
            VALUES ($1, $2, (SELECT COALESCE(MAX(sequence), 0) + 1 FROM job_logs WHERE job_id = $2), $3, $4, $5, NOW())
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(id)
        .bind(level)
        .bind(message)
        .bind(metadata)
        .execute(&self.db)
        .await;

        match level {
            LogLevel::Debug => tracing::debug!(job_id = %id, "{message}"),
            LogLevel::Info => tracing::info!(job_id = %id, "{message}"),
            LogLevel::Warn => tracing::warn!(job_id = %id, "{message}"),
            LogLevel::Error => tracing::error!(job_id = %id, "{message}"),
        }

        if let Err(e) = result {
            tracing::warn!(job_id = %id, error = %e, "failed to append job log");
        }
    }

    async fn list_logs(&self, id: Uuid, limit: i64, offset: i64) -> QueueResult<Vec<JobLog>> {
        let logs = sqlx::query_as::<_, JobLog>(
            r#"
            SELECT id, job_id, sequence, level, message, metadata, created_at
            FROM job_logs WHERE job_id = $1
            ORDER BY sequence ASC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await?;
        Ok(logs)
    }

    async fn list_artifacts(&self, id: Uuid) -> QueueResult<Vec<JobArtifact>> {
        let artifacts = sqlx::query_as::<_, JobArtifact>(
            "SELECT id, job_id, filename, mime_type, storage_path, public_url, size_bytes, created_at \
             FROM job_artifacts WHERE job_id = $1 ORDER BY created_at ASC",
        )
        .bind(id)
        .fetch_all(&self.db)
        .await?;
        Ok(artifacts)
    }

    async fn add_artifact(
        &self,
        job_id: Uuid,
        filename: &str,
        mime_type: &str,
        storage_path: &str,
        public_url: &str,
        size_bytes: i64,
    ) -> QueueResult<JobArtifact> {
        let artifact = sqlx::query_as::<_, JobArtifact>(
            r#"
            INSERT INTO job_artifacts (id, job_id, filename, mime_type, storage_path, public_url, size_bytes, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
            RETURNING id, job_id, filename, mime_type, storage_path, public_url, size_bytes, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(job_id)
        .bind(filename)
        .bind(mime_type)
        .bind(storage_path)
        .bind(public_url)
        .bind(size_bytes)
        .fetch_one(&self.db)
        .await?;
        Ok(artifact)
    }

    async fn add_attachment(
        &self,
        job_id: Option<Uuid>,
        filename: &str,
        mime_type: &str,
        storage_path: &str,
        public_url: &str,
        size_bytes: i64,
    ) -> QueueResult<JobAttachment> {
        let attachment = sqlx::query_as::<_, JobAttachment>(
            r#"
            INSERT INTO job_attachments (id, job_id, filename, mime_type, storage_path, public_url, size_bytes, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
            RETURNING id, job_id, filename, mime_type, storage_path, public_url, size_bytes, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(job_id)
        .bind(filename)
        .bind(mime_type)
        .bind(storage_path)
        .bind(public_url)
        .bind(size_bytes)
        .fetch_one(&self.db)
        .await?;
        Ok(attachment)
    }

    async fn list_attachments(&self, job_id: Uuid) -> QueueResult<Vec<JobAttachment>> {
        let attachments = sqlx::query_as::<_, JobAttachment>(
            "SELECT id, job_id, filename, mime_type, storage_path, public_url, size_bytes, created_at \
             FROM job_attachments WHERE job_id = $1 ORDER BY created_at ASC",
        )
        .bind(job_id)
        .fetch_all(&self.db)
        .await?;
        Ok(attachments)
    }

    async fn link_attachments(&self, job_id: Uuid, attachment_ids: &[Uuid]) -> QueueResult<()> {
        if attachment_ids.is_empty() {
            return Ok(());
        }
        sqlx::query("UPDATE job_attachments SET job_id = $1 WHERE id = ANY($2) AND job_id IS NULL")
            .bind(job_id)
            .bind(attachment_ids)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn set_discovered_tools(&self, id: Uuid, names: &[String]) -> QueueResult<()> {
        sqlx::query("UPDATE jobs SET tools_discovered = $2 WHERE id = $1")
            .bind(id)
            .bind(serde_json::to_value(names).unwrap())
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn recover_stale(&self, stale_threshold_secs: i64) -> QueueResult<u64> {
        // A running job is stale iff started too long ago AND its worker's
        // heartbeat is also stale (§4.3) — checking only started_at would
        // release jobs whose worker is alive and still making progress.
        let released = sqlx::query(
            r#"
            UPDATE jobs j
            SET status = 'queued', worker_id = NULL, started_at = NULL,
                retry_count = retry_count + 1
            WHERE j.status = 'running'
              AND j.started_at < NOW() - ($1 || ' seconds')::INTERVAL
              AND j.retry_count < j.max_retries
              AND EXISTS (
                  SELECT 1 FROM workers w
                  WHERE w.id = j.worker_id AND w.last_heartbeat < NOW() - INTERVAL '120 seconds'
              )
            "#,
        )
        .bind(stale_threshold_secs.to_string())
        .execute(&self.db)
        .await?;

        let failed = sqlx::query(
            r#"
            UPDATE jobs j
            SET status = 'failed', error = 'worker lost', completed_at = NOW()
            WHERE j.status = 'running'
              AND j.started_at < NOW() - ($1 || ' seconds')::INTERVAL
              AND j.retry_count >= j.max_retries
              AND EXISTS (
                  SELECT 1 FROM workers w
                  WHERE w.id = j.worker_id AND w.last_heartbeat < NOW() - INTERVAL '120 seconds'
              )
            "#,
        )
        .bind(stale_threshold_secs.to_string())
        .execute(&self.db)
        .await?;

        Ok(released.rows_affected() + failed.rows_affected())
    }

    async fn upsert_worker_heartbeat(
        &self,
        id: &str,
        hostname: &str,
        version: &str,
        active_job_count: i32,
        draining: bool,
    ) -> QueueResult<()> {
        let status = if draining { "draining" } else { "active" };
        sqlx::query(
            r#"
            INSERT INTO workers (id, hostname, version, status, active_job_count, last_heartbeat)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (id) DO UPDATE
            SET hostname = $2, version = $3, status = $4, active_job_count = $5, last_heartbeat = NOW()
            "#,
        )
        .bind(id)
        .bind(hostname)
        .bind(version)
        .bind(status)
        .bind(active_job_count)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn mark_worker_dead(&self, id: &str) -> QueueResult<()> {
        sqlx::query("UPDATE workers SET status = 'dead' WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn list_workers(&self, status: Option<&str>) -> QueueResult<Vec<Worker>> {
        let workers = sqlx::query_as::<_, Worker>(
            r#"
            SELECT id, hostname, version, status, active_job_count, last_heartbeat
            FROM workers
            WHERE ($1::text IS NULL OR status = $1)
            ORDER BY last_heartbeat DESC
            "#,
        )
        .bind(status)
        .fetch_all(&self.db)
        .await?;
        Ok(workers)
    }

    async fn get_worker(&self, id: &str) -> QueueResult<Option<Worker>> {
        let worker = sqlx::query_as::<_, Worker>(
            "SELECT id, hostname, version, status, active_job_count, last_heartbeat FROM workers WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(worker)
    }
}

impl PostgresQueueStore {
    async fn ensure_idempotent_or_conflict(&self, id: Uuid, expected: JobStatus) -> QueueResult<()> {
        let job = self.get(id).await?.ok_or(QueueError::NotFound)?;
        if job.status == expected {
            Ok(())
        } else {
            Err(QueueError::InvalidTransition)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_filter_defaults_are_unrestricted() {
        let filter = JobFilter::default();
        assert!(filter.credential_id.is_none());
        assert!(filter.status.is_none());
    }
}
