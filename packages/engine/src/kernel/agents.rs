//! Agent registry: the catalog of discoverable external capabilities that
//! `/agents` and `/admin/agents/reindex` operate on, and that the discovery
//! collaborator (§6.3) ranks against at `discover_tools` time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("agent package_name already registered")]
    Duplicate,
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

pub type AgentResult<T> = Result<T, AgentError>;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Agent {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub package_name: String,
    pub version: String,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait AgentStore: Send + Sync {
    async fn create(&self, name: &str, description: &str, package_name: &str, version: &str) -> AgentResult<Agent>;
    async fn list(&self, verified_only: bool, limit: i64, offset: i64) -> AgentResult<Vec<Agent>>;
    async fn list_all_descriptions(&self) -> AgentResult<Vec<(Uuid, String)>>;
    async fn count(&self) -> AgentResult<(i64, i64)>;
}

pub struct PostgresAgentStore {
    db: PgPool,
}

impl PostgresAgentStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AgentStore for PostgresAgentStore {
    async fn create(&self, name: &str, description: &str, package_name: &str, version: &str) -> AgentResult<Agent> {
        let result = sqlx::query_as::<_, Agent>(
            r#"
            INSERT INTO agents (id, name, description, package_name, version, verified, created_at)
            VALUES ($1, $2, $3, $4, $5, false, NOW())
            RETURNING id, name, description, package_name, version, verified, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(description)
        .bind(package_name)
        .bind(version)
        .fetch_one(&self.db)
        .await;

        match result {
            Ok(agent) => Ok(agent),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(AgentError::Duplicate),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, verified_only: bool, limit: i64, offset: i64) -> AgentResult<Vec<Agent>> {
        let agents = sqlx::query_as::<_, Agent>(
            r#"
            SELECT id, name, description, package_name, version, verified, created_at
            FROM agents
            WHERE ($1 = false OR verified = true)
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(verified_only)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await?;
        Ok(agents)
    }

    async fn list_all_descriptions(&self) -> AgentResult<Vec<(Uuid, String)>> {
        let rows: Vec<(Uuid, String)> = sqlx::query_as("SELECT id, description FROM agents")
            .fetch_all(&self.db)
            .await?;
        Ok(rows)
    }

    async fn count(&self) -> AgentResult<(i64, i64)> {
        let row: (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COUNT(*) FILTER (WHERE verified) FROM agents",
        )
        .fetch_one(&self.db)
        .await?;
        Ok(row)
    }
}
