//! `/jobs` endpoints (§6.1): submit, list, inspect, cancel, respond, logs,
//! artifacts, upload.

use std::sync::Arc;

use axum::extract::{Multipart, Path, Query, State};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::kernel::credentials::Scope;
use crate::kernel::models::{HitlMode, Job, JobStatus};
use crate::kernel::queue::JobFilter;
use crate::kernel::EngineKernel;
use crate::server::middleware::{require_scope, AuthContext};

fn default_limit() -> i64 {
    50
}

fn clamp_pagination(limit: i64, offset: i64) -> (i64, i64) {
    (limit.clamp(1, 100), offset.max(0))
}

/// Resources scoped to a specific Job must 404 rather than 403 when the
/// caller does not own them and lacks `admin` (§4.4 ownership rule, §8 S5).
fn enforce_ownership(job: &Job, ctx: &AuthContext) -> ApiResult<()> {
    if job.credential_id == ctx.credential_id || ctx.scopes.contains(&Scope::Admin) {
        Ok(())
    } else {
        Err(ApiError::NotFound)
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub task: String,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub timeout_seconds: Option<i32>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub hitl_mode: Option<HitlMode>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct CreateJobResponse {
    pub id: Uuid,
    pub status: JobStatus,
    pub task: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

pub async fn create_job(
    State(kernel): State<Arc<EngineKernel>>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<CreateJobRequest>,
) -> ApiResult<(axum::http::StatusCode, Json<CreateJobResponse>)> {
    require_scope(&auth, &[Scope::JobsWrite])?;

    if body.task.is_empty() || body.task.chars().count() > 10_000 {
        return Err(ApiError::Validation("task must be 1..10000 chars".into()));
    }
    let priority = body.priority.unwrap_or(0);
    if !(0..=100).contains(&priority) {
        return Err(ApiError::Validation("priority must be 0..100".into()));
    }
    let timeout_seconds = body.timeout_seconds.unwrap_or(300);
    if !(30..=3600).contains(&timeout_seconds) {
        return Err(ApiError::Validation("timeout_seconds must be 30..3600".into()));
    }
    let model = body.model.unwrap_or_else(|| "gpt-4o-mini".to_string());
    let hitl_mode = body.hitl_mode.unwrap_or_default();

    let job = kernel
        .queue
        .enqueue(
            &body.task,
            auth.credential_id,
            priority,
            timeout_seconds,
            &model,
            hitl_mode,
            3,
            body.idempotency_key.as_deref(),
        )
        .await?;

    kernel.queue.link_attachments(job.id, &body.attachments).await?;

    Ok((
        axum::http::StatusCode::CREATED,
        Json(CreateJobResponse {
            id: job.id,
            status: job.status,
            task: job.task,
            created_at: job.created_at,
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub status: Option<JobStatus>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

#[derive(Debug, Serialize)]
pub struct ListJobsResponse {
    pub jobs: Vec<Job>,
    pub count: usize,
    pub offset: i64,
    pub limit: i64,
}

pub async fn list_jobs(
    State(kernel): State<Arc<EngineKernel>>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<ListJobsQuery>,
) -> ApiResult<Json<ListJobsResponse>> {
    require_scope(&auth, &[Scope::JobsRead])?;
    let (limit, offset) = clamp_pagination(query.limit, query.offset);

    // Non-admin credentials only ever see their own jobs (§4.4 ownership rule).
    let credential_id = if auth.scopes.contains(&Scope::Admin) {
        None
    } else {
        Some(auth.credential_id)
    };

    let jobs = kernel
        .queue
        .list(JobFilter {
            credential_id,
            status: query.status,
            limit,
            offset,
        })
        .await?;

    Ok(Json(ListJobsResponse {
        count: jobs.len(),
        jobs,
        offset,
        limit,
    }))
}

#[derive(Debug, Serialize)]
pub struct JobDetailResponse {
    #[serde(flatten)]
    pub job: Job,
    pub artifacts: Vec<crate::kernel::models::JobArtifact>,
}

pub async fn get_job(
    State(kernel): State<Arc<EngineKernel>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<JobDetailResponse>> {
    require_scope(&auth, &[Scope::JobsRead])?;
    let job = kernel.queue.get(id).await?.ok_or(ApiError::NotFound)?;
    enforce_ownership(&job, &auth)?;
    let artifacts = kernel.queue.list_artifacts(id).await?;
    Ok(Json(JobDetailResponse { job, artifacts }))
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelJobRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub id: Uuid,
    pub status: JobStatus,
}

pub async fn cancel_job(
    State(kernel): State<Arc<EngineKernel>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(body): Json<CancelJobRequest>,
) -> ApiResult<Json<JobStatusResponse>> {
    require_scope(&auth, &[Scope::JobsDelete])?;
    let job = kernel.queue.get(id).await?.ok_or(ApiError::NotFound)?;
    enforce_ownership(&job, &auth)?;

    let reason = body.reason;
    match kernel.queue.cancel(id).await {
        Ok(()) => {}
        Err(crate::kernel::queue::QueueError::InvalidTransition) => {
            return Err(ApiError::InvalidState(
                "job cannot be cancelled from its current status".into(),
            ))
        }
        Err(e) => return Err(e.into()),
    }

    kernel
        .queue
        .append_log(
            id,
            crate::kernel::models::LogLevel::Info,
            "job cancelled via API",
            reason.map(|r| serde_json::json!({"reason": r})),
        )
        .await;

    Ok(Json(JobStatusResponse {
        id,
        status: JobStatus::Cancelled,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RespondAction {
    Approve,
    Reject,
    Edit,
    Respond,
}

#[derive(Debug, Deserialize)]
pub struct RespondRequest {
    pub answer: String,
    #[serde(default)]
    pub action: Option<RespondAction>,
    #[serde(default)]
    pub edited_plan: Option<String>,
}

pub async fn respond_job(
    State(kernel): State<Arc<EngineKernel>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(body): Json<RespondRequest>,
) -> ApiResult<Json<JobStatusResponse>> {
    require_scope(&auth, &[Scope::JobsWrite])?;
    let job = kernel.queue.get(id).await?.ok_or(ApiError::NotFound)?;
    enforce_ownership(&job, &auth)?;

    if body.answer.is_empty() {
        return Err(ApiError::Validation("answer must not be empty".into()));
    }

    let answer = match (body.action, body.edited_plan) {
        (Some(RespondAction::Edit), Some(plan)) => format!("{}\n\nEdited plan:\n{plan}", body.answer),
        _ => body.answer,
    };

    let job = match kernel.queue.respond(id, &answer).await {
        Ok(job) => job,
        Err(crate::kernel::queue::QueueError::InvalidTransition) => {
            return Err(ApiError::InvalidState(
                "job is not waiting for a user response".into(),
            ))
        }
        Err(e) => return Err(e.into()),
    };

    Ok(Json(JobStatusResponse {
        id: job.id,
        status: job.status,
    }))
}

#[derive(Debug, Deserialize)]
pub struct PaginationQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub logs: Vec<crate::kernel::models::JobLog>,
    pub count: usize,
    pub offset: i64,
    pub limit: i64,
}

pub async fn list_job_logs(
    State(kernel): State<Arc<EngineKernel>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Query(query): Query<PaginationQuery>,
) -> ApiResult<Json<LogsResponse>> {
    require_scope(&auth, &[Scope::JobsRead])?;
    let job = kernel.queue.get(id).await?.ok_or(ApiError::NotFound)?;
    enforce_ownership(&job, &auth)?;

    let (limit, offset) = clamp_pagination(query.limit, query.offset);
    let logs = kernel.queue.list_logs(id, limit, offset).await?;
    Ok(Json(LogsResponse {
        count: logs.len(),
        logs,
        offset,
        limit,
    }))
}

#[derive(Debug, Serialize)]
pub struct ArtifactsResponse {
    pub artifacts: Vec<crate::kernel::models::JobArtifact>,
    pub count: usize,
}

pub async fn list_job_artifacts(
    State(kernel): State<Arc<EngineKernel>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ArtifactsResponse>> {
    require_scope(&auth, &[Scope::JobsRead])?;
    let job = kernel.queue.get(id).await?.ok_or(ApiError::NotFound)?;
    enforce_ownership(&job, &auth)?;

    let artifacts = kernel.queue.list_artifacts(id).await?;
    Ok(Json(ArtifactsResponse {
        count: artifacts.len(),
        artifacts,
    }))
}

const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub filename: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub storage_path: String,
    pub public_url: String,
}

pub async fn upload_attachment(
    State(kernel): State<Arc<EngineKernel>>,
    Extension(auth): Extension<AuthContext>,
    mut multipart: Multipart,
) -> ApiResult<(axum::http::StatusCode, Json<UploadResponse>)> {
    require_scope(&auth, &[Scope::JobsWrite])?;

    let mut job_id: Option<Uuid> = None;
    let mut file: Option<(String, String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::UploadError(e.to_string()))?
    {
        match field.name().unwrap_or_default() {
            "jobId" => {
                let text = field.text().await.map_err(|e| ApiError::UploadError(e.to_string()))?;
                job_id = Uuid::parse_str(&text).ok();
            }
            "file" => {
                let filename = field.file_name().unwrap_or("upload.bin").to_string();
                let mime_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field.bytes().await.map_err(|e| ApiError::UploadError(e.to_string()))?;
                if bytes.len() > MAX_UPLOAD_BYTES {
                    return Err(ApiError::FileTooLarge);
                }
                file = Some((filename, mime_type, bytes.to_vec()));
            }
            _ => {}
        }
    }

    let (filename, mime_type, bytes) = file.ok_or(ApiError::MissingFile)?;
    let size_bytes = bytes.len() as i64;
    let storage_path = format!("attachments/{}/{}", Uuid::new_v4(), filename);
    let public_url = kernel
        .object_store
        .upload(&storage_path, bytes, &mime_type)
        .await
        .map_err(|e| ApiError::UploadError(e.to_string()))?;

    let attachment = kernel
        .queue
        .add_attachment(job_id, &filename, &mime_type, &storage_path, &public_url, size_bytes)
        .await?;

    Ok((
        axum::http::StatusCode::CREATED,
        Json(UploadResponse {
            filename: attachment.filename,
            mime_type: attachment.mime_type,
            size_bytes: attachment.size_bytes,
            storage_path: attachment.storage_path,
            public_url: attachment.public_url,
        }),
    ))
}
