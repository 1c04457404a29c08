//! `/admin` endpoints (§6.1): reindexing, metrics, and worker introspection.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::kernel::credentials::Scope;
use crate::kernel::models::WorkerHealth;
use crate::kernel::EngineKernel;
use crate::server::middleware::{require_scope, AuthContext};

#[derive(Debug, Serialize)]
pub struct ReindexResponse {
    pub updated: u32,
    pub total: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<u32>,
}

pub async fn reindex_agents(
    State(kernel): State<Arc<EngineKernel>>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<ReindexResponse>> {
    require_scope(&auth, &[Scope::Admin])?;

    let descriptions = kernel.agents.list_all_descriptions().await?;
    let total = descriptions.len() as u32;
    let mut updated = 0u32;
    let mut errors = 0u32;

    for (id, description) in descriptions {
        match kernel.discovery.reindex(&description).await {
            Ok(_vector) => updated += 1,
            Err(e) => {
                errors += 1;
                tracing::warn!(agent_id = %id, error = %e, "failed to reindex agent");
            }
        }
    }

    Ok(Json(ReindexResponse {
        updated,
        total,
        errors: if errors > 0 { Some(errors) } else { None },
    }))
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub jobs: JobMetrics,
    pub workers: WorkerMetrics,
    pub agents: AgentMetrics,
    pub api_keys: ApiKeyMetrics,
    pub timestamp: chrono::DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct JobMetrics {
    pub by_status: HashMap<String, i64>,
    pub total: i64,
    pub last_hour: i64,
}

#[derive(Debug, Serialize)]
pub struct WorkerMetrics {
    pub by_status: HashMap<String, i64>,
    pub total: i64,
}

#[derive(Debug, Serialize)]
pub struct AgentMetrics {
    pub total: i64,
    pub verified: i64,
}

#[derive(Debug, Serialize)]
pub struct ApiKeyMetrics {
    pub total: i64,
    pub active: i64,
}

pub async fn get_metrics(
    State(kernel): State<Arc<EngineKernel>>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<MetricsResponse>> {
    require_scope(&auth, &[Scope::Admin])?;

    let job_rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT status, COUNT(*) FROM jobs GROUP BY status")
            .fetch_all(&kernel.db)
            .await?;
    let jobs_by_status: HashMap<String, i64> = job_rows.into_iter().collect();
    let jobs_total: i64 = jobs_by_status.values().sum();
    let (jobs_last_hour,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM jobs WHERE created_at > NOW() - INTERVAL '1 hour'")
            .fetch_one(&kernel.db)
            .await?;

    let worker_rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT status, COUNT(*) FROM workers GROUP BY status")
            .fetch_all(&kernel.db)
            .await?;
    let workers_by_status: HashMap<String, i64> = worker_rows.into_iter().collect();
    let workers_total: i64 = workers_by_status.values().sum();

    let (agents_total, agents_verified) = kernel.agents.count().await?;

    let (keys_total,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM credentials")
        .fetch_one(&kernel.db)
        .await?;
    let (keys_active,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM credentials WHERE is_active = true")
            .fetch_one(&kernel.db)
            .await?;

    Ok(Json(MetricsResponse {
        jobs: JobMetrics {
            by_status: jobs_by_status,
            total: jobs_total,
            last_hour: jobs_last_hour,
        },
        workers: WorkerMetrics {
            by_status: workers_by_status,
            total: workers_total,
        },
        agents: AgentMetrics {
            total: agents_total,
            verified: agents_verified,
        },
        api_keys: ApiKeyMetrics {
            total: keys_total,
            active: keys_active,
        },
        timestamp: Utc::now(),
    }))
}

#[derive(Debug, Serialize)]
pub struct WorkerView {
    #[serde(flatten)]
    pub worker: crate::kernel::models::Worker,
    pub health: WorkerHealth,
}

#[derive(Debug, Deserialize)]
pub struct ListWorkersQuery {
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct WorkersSummary {
    pub healthy: usize,
    pub warning: usize,
    pub dead: usize,
}

#[derive(Debug, Serialize)]
pub struct ListWorkersResponse {
    pub workers: Vec<WorkerView>,
    pub count: usize,
    pub summary: WorkersSummary,
}

pub async fn list_workers(
    State(kernel): State<Arc<EngineKernel>>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<ListWorkersQuery>,
) -> ApiResult<Json<ListWorkersResponse>> {
    require_scope(&auth, &[Scope::Admin])?;

    let now = Utc::now();
    let workers = kernel.queue.list_workers(query.status.as_deref()).await?;

    let mut summary = WorkersSummary { healthy: 0, warning: 0, dead: 0 };
    let views: Vec<WorkerView> = workers
        .into_iter()
        .map(|worker| {
            let health = worker.health(now);
            match health {
                WorkerHealth::Healthy => summary.healthy += 1,
                WorkerHealth::Warning => summary.warning += 1,
                WorkerHealth::Dead => summary.dead += 1,
            }
            WorkerView { worker, health }
        })
        .collect();

    Ok(Json(ListWorkersResponse {
        count: views.len(),
        workers: views,
        summary,
    }))
}

pub async fn get_worker(
    State(kernel): State<Arc<EngineKernel>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> ApiResult<Json<WorkerView>> {
    require_scope(&auth, &[Scope::Admin])?;
    let worker = kernel.queue.get_worker(&id).await?.ok_or(ApiError::NotFound)?;
    let health = worker.health(Utc::now());
    Ok(Json(WorkerView { worker, health }))
}
