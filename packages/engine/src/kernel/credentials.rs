//! Credential Store (§4.1): issue, validate, revoke bearer API keys.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::config::DeployEnv;

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("invalid key")]
    Invalid,
    #[error("conflict generating a unique key, retry")]
    Conflict,
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// A scope a credential may hold. `Admin` is universal (§4.1 checkScope).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    JobsRead,
    JobsWrite,
    JobsDelete,
    AgentsRead,
    AgentsWrite,
    Admin,
}

impl Scope {
    pub fn as_str(self) -> &'static str {
        match self {
            Scope::JobsRead => "jobs:read",
            Scope::JobsWrite => "jobs:write",
            Scope::JobsDelete => "jobs:delete",
            Scope::AgentsRead => "agents:read",
            Scope::AgentsWrite => "agents:write",
            Scope::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "jobs:read" => Scope::JobsRead,
            "jobs:write" => Scope::JobsWrite,
            "jobs:delete" => Scope::JobsDelete,
            "agents:read" => Scope::AgentsRead,
            "agents:write" => Scope::AgentsWrite,
            "admin" => Scope::Admin,
            _ => return None,
        })
    }
}

fn scopes_to_json(scopes: &[Scope]) -> serde_json::Value {
    serde_json::Value::Array(
        scopes
            .iter()
            .map(|s| serde_json::Value::String(s.as_str().to_string()))
            .collect(),
    )
}

fn scopes_from_json(value: &serde_json::Value) -> Vec<Scope> {
    value
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str())
                .filter_map(Scope::parse)
                .collect()
        })
        .unwrap_or_default()
}

/// Credential metadata, never the raw key or hash (§4.1 list).
#[derive(Debug, Clone, Serialize)]
pub struct CredentialMeta {
    pub id: Uuid,
    pub name: String,
    pub owner_email: Option<String>,
    pub display_prefix: String,
    pub scopes: Vec<Scope>,
    pub rpm_limit: i32,
    pub is_active: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub total_requests: i64,
}

#[derive(FromRow)]
struct CredentialRow {
    id: Uuid,
    name: String,
    owner_email: Option<String>,
    display_prefix: String,
    scopes: serde_json::Value,
    rpm_limit: i32,
    is_active: bool,
    revoked_at: Option<DateTime<Utc>>,
    revoked_reason: Option<String>,
    created_at: DateTime<Utc>,
    last_used_at: Option<DateTime<Utc>>,
    total_requests: i64,
    key_hash: String,
}

impl From<CredentialRow> for CredentialMeta {
    fn from(row: CredentialRow) -> Self {
        CredentialMeta {
            id: row.id,
            name: row.name,
            owner_email: row.owner_email,
            display_prefix: row.display_prefix,
            scopes: scopes_from_json(&row.scopes),
            rpm_limit: row.rpm_limit,
            is_active: row.is_active,
            revoked_at: row.revoked_at,
            revoked_reason: row.revoked_reason,
            created_at: row.created_at,
            last_used_at: row.last_used_at,
            total_requests: row.total_requests,
        }
    }
}

/// The outcome of a successful `validate` call.
#[derive(Debug, Clone)]
pub struct ValidatedCredential {
    pub id: Uuid,
    pub scopes: Vec<Scope>,
    pub rpm_limit: i32,
}

/// Issues, validates, and revokes bearer credentials; enforces scope checks.
pub struct CredentialStore {
    db: PgPool,
    deploy_env: DeployEnv,
    live_prefix: String,
    test_prefix: String,
}

impl CredentialStore {
    /// `live_prefix`/`test_prefix` default to `DeployEnv::{Live,Test}::key_prefix()`
    /// but are configurable via `API_KEY_PREFIX_LIVE`/`API_KEY_PREFIX_TEST` (§6.5).
    pub fn new(db: PgPool, deploy_env: DeployEnv, live_prefix: String, test_prefix: String) -> Self {
        Self { db, deploy_env, live_prefix, test_prefix }
    }

    /// Generate a raw key, store its hash, and return the raw value exactly once.
    pub async fn issue(
        &self,
        name: &str,
        owner_email: Option<&str>,
        scopes: Option<Vec<Scope>>,
        rpm_limit: Option<i32>,
    ) -> Result<(String, Uuid), CredentialError> {
        let scopes = scopes.unwrap_or_else(|| vec![Scope::JobsWrite, Scope::JobsRead]);
        let rpm_limit = rpm_limit.unwrap_or(60);

        let mut raw_bytes = [0u8; 24];
        rand::thread_rng().fill_bytes(&mut raw_bytes);
        let prefix = match self.deploy_env {
            DeployEnv::Live => &self.live_prefix,
            DeployEnv::Test => &self.test_prefix,
        };
        let raw_key = format!("{prefix}{}", URL_SAFE_NO_PAD.encode(raw_bytes));
        let display_prefix: String = raw_key.chars().take(14).collect();
        let key_hash = hash_key(&raw_key);

        let id = Uuid::new_v4();
        let result = sqlx::query(
            r#"
            INSERT INTO credentials
                (id, name, owner_email, key_hash, display_prefix, scopes, rpm_limit, is_active, created_at, total_requests)
            VALUES ($1, $2, $3, $4, $5, $6, $7, true, NOW(), 0)
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(owner_email)
        .bind(&key_hash)
        .bind(&display_prefix)
        .bind(scopes_to_json(&scopes))
        .bind(rpm_limit)
        .execute(&self.db)
        .await;

        match result {
            Ok(_) => Ok((raw_key, id)),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(CredentialError::Conflict)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Validate a raw key. Unknown and revoked keys return the same
    /// indistinguishable `Invalid` error (§4.1, §8 property 5).
    pub async fn validate(&self, raw_key: &str) -> Result<ValidatedCredential, CredentialError> {
        if !raw_key.starts_with(self.live_prefix.as_str()) && !raw_key.starts_with(self.test_prefix.as_str()) {
            return Err(CredentialError::Invalid);
        }

        let key_hash = hash_key(raw_key);
        let row = sqlx::query_as::<_, CredentialRow>(
            r#"
            SELECT id, name, owner_email, display_prefix, scopes, rpm_limit, is_active,
                   revoked_at, revoked_reason, created_at, last_used_at, total_requests, key_hash
            FROM credentials
            WHERE key_hash = $1
            "#,
        )
        .bind(&key_hash)
        .fetch_optional(&self.db)
        .await?;

        let row = row.ok_or(CredentialError::Invalid)?;
        if !row.is_active {
            return Err(CredentialError::Invalid);
        }

        let id = row.id;
        let scopes = scopes_from_json(&row.scopes);
        let rpm_limit = row.rpm_limit;

        // Fire-and-forget usage bookkeeping: must never block admission (§4.1).
        let db = self.db.clone();
        tokio::spawn(async move {
            let _ = sqlx::query(
                "UPDATE credentials SET last_used_at = NOW(), total_requests = total_requests + 1 WHERE id = $1",
            )
            .bind(id)
            .execute(&db)
            .await;
        });

        Ok(ValidatedCredential { id, scopes, rpm_limit })
    }

    pub async fn revoke(&self, id: Uuid, reason: Option<&str>) -> Result<(), CredentialError> {
        sqlx::query(
            r#"
            UPDATE credentials
            SET is_active = false, revoked_at = NOW(), revoked_reason = $2
            WHERE id = $1 AND is_active = true
            "#,
        )
        .bind(id)
        .bind(reason)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<CredentialMeta>, CredentialError> {
        let row = sqlx::query_as::<_, CredentialRow>(
            r#"
            SELECT id, name, owner_email, display_prefix, scopes, rpm_limit, is_active,
                   revoked_at, revoked_reason, created_at, last_used_at, total_requests, key_hash
            FROM credentials WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(CredentialMeta::from))
    }

    pub async fn list(
        &self,
        limit: i64,
        offset: i64,
        active_only: bool,
    ) -> Result<Vec<CredentialMeta>, CredentialError> {
        let rows = sqlx::query_as::<_, CredentialRow>(
            r#"
            SELECT id, name, owner_email, display_prefix, scopes, rpm_limit, is_active,
                   revoked_at, revoked_reason, created_at, last_used_at, total_requests, key_hash
            FROM credentials
            WHERE ($3 = false OR is_active = true)
            ORDER BY created_at DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .bind(active_only)
        .fetch_all(&self.db)
        .await?;
        Ok(rows.into_iter().map(CredentialMeta::from).collect())
    }
}

fn hash_key(raw_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_key.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// `admin` is universal; otherwise `required` must be a subset of `granted`
/// (any-of semantics for endpoints declaring multiple acceptable scopes).
pub fn check_scope(required: &[Scope], granted: &[Scope]) -> bool {
    if granted.contains(&Scope::Admin) {
        return true;
    }
    required.iter().any(|r| granted.contains(r))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_scope_is_universal() {
        assert!(check_scope(&[Scope::JobsDelete], &[Scope::Admin]));
    }

    #[test]
    fn any_of_semantics_for_required_scopes() {
        assert!(check_scope(&[Scope::JobsRead, Scope::JobsWrite], &[Scope::JobsWrite]));
        assert!(!check_scope(&[Scope::JobsRead], &[Scope::JobsWrite]));
    }

    #[test]
    fn hash_key_is_deterministic_and_hex() {
        let h1 = hash_key("engine_test_abc");
        let h2 = hash_key("engine_test_abc");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }

    #[test]
    fn scopes_json_round_trip() {
        let scopes = vec![Scope::JobsRead, Scope::Admin];
        let json = scopes_to_json(&scopes);
        let parsed = scopes_from_json(&json);
        assert_eq!(parsed, scopes);
    }
}
