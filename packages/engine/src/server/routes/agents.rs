//! `/agents` endpoints (§6.1): semantic discovery and the agent registry.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::kernel::agents::Agent;
use crate::kernel::credentials::Scope;
use crate::kernel::discovery::DiscoveredAgent;
use crate::kernel::EngineKernel;
use crate::server::middleware::{require_scope, AuthContext};

fn default_limit() -> i64 {
    50
}

fn default_threshold() -> f64 {
    0.7
}

fn default_discover_limit() -> u32 {
    10
}

#[derive(Debug, Deserialize)]
pub struct DiscoverRequest {
    pub task: String,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_discover_limit")]
    pub limit: u32,
}

#[derive(Debug, Serialize)]
pub struct DiscoverResponse {
    pub agents: Vec<DiscoveredAgent>,
    pub count: usize,
    pub threshold: f64,
}

pub async fn discover_agents(
    State(kernel): State<Arc<EngineKernel>>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<DiscoverRequest>,
) -> ApiResult<Json<DiscoverResponse>> {
    require_scope(&auth, &[Scope::AgentsRead])?;

    if !(0.0..=1.0).contains(&body.threshold) {
        return Err(ApiError::Validation("threshold must be 0..1".into()));
    }
    if !(1..=20).contains(&body.limit) {
        return Err(ApiError::Validation("limit must be 1..20".into()));
    }

    let agents = kernel
        .discovery
        .discover(&body.task, body.threshold, body.limit)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(DiscoverResponse {
        count: agents.len(),
        agents,
        threshold: body.threshold,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ListAgentsQuery {
    #[serde(default)]
    pub verified_only: bool,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

#[derive(Debug, Serialize)]
pub struct ListAgentsResponse {
    pub agents: Vec<Agent>,
    pub count: usize,
    pub offset: i64,
    pub limit: i64,
}

pub async fn list_agents(
    State(kernel): State<Arc<EngineKernel>>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<ListAgentsQuery>,
) -> ApiResult<Json<ListAgentsResponse>> {
    require_scope(&auth, &[Scope::AgentsRead])?;
    let limit = query.limit.clamp(1, 100);
    let offset = query.offset.max(0);

    let agents = kernel.agents.list(query.verified_only, limit, offset).await?;

    Ok(Json(ListAgentsResponse {
        count: agents.len(),
        agents,
        offset,
        limit,
    }))
}

static PACKAGE_NAME_RE: &str = "^[a-z0-9_-]+$";

fn is_valid_package_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 200
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

#[derive(Debug, Deserialize)]
pub struct CreateAgentRequest {
    pub name: String,
    pub description: String,
    pub package_name: String,
    #[serde(default)]
    pub version: Option<String>,
}

pub async fn create_agent(
    State(kernel): State<Arc<EngineKernel>>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<CreateAgentRequest>,
) -> ApiResult<(axum::http::StatusCode, Json<Agent>)> {
    require_scope(&auth, &[Scope::AgentsWrite])?;

    if body.name.is_empty() {
        return Err(ApiError::Validation("name must not be empty".into()));
    }
    if !(10..=5000).contains(&body.description.chars().count()) {
        return Err(ApiError::Validation("description must be 10..5000 chars".into()));
    }
    if !is_valid_package_name(&body.package_name) {
        return Err(ApiError::Validation(format!(
            "package_name must match {PACKAGE_NAME_RE} and be 1..200 chars"
        )));
    }
    let version = body.version.unwrap_or_else(|| "0.1.0".to_string());

    let agent = kernel
        .agents
        .create(&body.name, &body.description, &body.package_name, &version)
        .await?;

    Ok((axum::http::StatusCode::CREATED, Json(agent)))
}
