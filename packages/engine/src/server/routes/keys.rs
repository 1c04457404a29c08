//! `/admin/keys` endpoints (§6.1): issue, inspect, revoke credentials.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::kernel::credentials::{CredentialMeta, Scope};
use crate::kernel::EngineKernel;
use crate::server::middleware::{require_scope, AuthContext};

fn default_limit() -> i64 {
    50
}

#[derive(Debug, Deserialize)]
pub struct ListKeysQuery {
    #[serde(default)]
    pub active_only: bool,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

#[derive(Debug, Serialize)]
pub struct ListKeysResponse {
    pub keys: Vec<CredentialMeta>,
    pub count: usize,
    pub offset: i64,
    pub limit: i64,
}

pub async fn list_keys(
    State(kernel): State<Arc<EngineKernel>>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<ListKeysQuery>,
) -> ApiResult<Json<ListKeysResponse>> {
    require_scope(&auth, &[Scope::Admin])?;
    let limit = query.limit.clamp(1, 100);
    let offset = query.offset.max(0);

    let keys = kernel
        .credentials
        .list(limit, offset, query.active_only)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(ListKeysResponse {
        count: keys.len(),
        keys,
        offset,
        limit,
    }))
}

#[derive(Debug, Deserialize)]
pub struct CreateKeyRequest {
    pub name: String,
    #[serde(default)]
    pub owner_email: Option<String>,
    #[serde(default)]
    pub scopes: Option<Vec<String>>,
    #[serde(default)]
    pub rate_limit_rpm: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct CreateKeyResponse {
    pub id: Uuid,
    pub key: String,
    pub message: String,
}

pub async fn create_key(
    State(kernel): State<Arc<EngineKernel>>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<CreateKeyRequest>,
) -> ApiResult<(axum::http::StatusCode, Json<CreateKeyResponse>)> {
    require_scope(&auth, &[Scope::Admin])?;

    if body.name.is_empty() {
        return Err(ApiError::Validation("name must not be empty".into()));
    }

    let scopes = body
        .scopes
        .map(|raw| raw.iter().filter_map(|s| Scope::parse(s)).collect::<Vec<_>>());

    let (raw_key, id) = kernel
        .credentials
        .issue(&body.name, body.owner_email.as_deref(), scopes, body.rate_limit_rpm)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok((
        axum::http::StatusCode::CREATED,
        Json(CreateKeyResponse {
            id,
            key: raw_key,
            message: "store this key now; it will not be shown again".to_string(),
        }),
    ))
}

pub async fn get_key(
    State(kernel): State<Arc<EngineKernel>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<CredentialMeta>> {
    require_scope(&auth, &[Scope::Admin])?;
    let meta = kernel
        .credentials
        .get(id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(meta))
}

#[derive(Debug, Default, Deserialize)]
pub struct RevokeKeyRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RevokeKeyResponse {
    pub id: Uuid,
    pub status: &'static str,
}

pub async fn revoke_key(
    State(kernel): State<Arc<EngineKernel>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(body): Json<RevokeKeyRequest>,
) -> ApiResult<Json<RevokeKeyResponse>> {
    require_scope(&auth, &[Scope::Admin])?;
    kernel
        .credentials
        .get(id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or(ApiError::NotFound)?;

    kernel
        .credentials
        .revoke(id, body.reason.as_deref())
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(RevokeKeyResponse { id, status: "revoked" }))
}
