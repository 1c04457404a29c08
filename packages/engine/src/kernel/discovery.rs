//! Embedding/discovery service contract (§6.3). Vector search and semantic
//! matching live entirely in this external collaborator (explicit Non-goal
//! here).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("discovery service unreachable: {0}")]
    Unreachable(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredAgent {
    pub id: String,
    pub name: String,
    pub package_name: String,
    pub similarity: f64,
}

#[async_trait]
pub trait DiscoveryService: Send + Sync {
    /// discover(task, threshold, limit) -> ranked candidates (§6.3).
    async fn discover(
        &self,
        task: &str,
        threshold: f64,
        limit: u32,
    ) -> Result<Vec<DiscoveredAgent>, DiscoveryError>;

    /// reindex(description) -> vector (§6.3); engine treats the vector opaquely.
    async fn reindex(&self, description: &str) -> Result<Vec<f32>, DiscoveryError>;
}

pub struct HttpDiscoveryService {
    http: reqwest::Client,
    base_url: String,
}

impl HttpDiscoveryService {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl DiscoveryService for HttpDiscoveryService {
    async fn discover(
        &self,
        task: &str,
        threshold: f64,
        limit: u32,
    ) -> Result<Vec<DiscoveredAgent>, DiscoveryError> {
        let response = self
            .http
            .post(format!("{}/discover", self.base_url))
            .json(&serde_json::json!({"task": task, "threshold": threshold, "limit": limit}))
            .send()
            .await
            .map_err(|e| DiscoveryError::Unreachable(e.to_string()))?;

        #[derive(Deserialize)]
        struct Response {
            agents: Vec<DiscoveredAgent>,
        }

        let body: Response = response
            .json()
            .await
            .map_err(|e| DiscoveryError::Unreachable(e.to_string()))?;

        Ok(body.agents)
    }

    async fn reindex(&self, description: &str) -> Result<Vec<f32>, DiscoveryError> {
        #[derive(Deserialize)]
        struct Response {
            vector: Vec<f32>,
        }

        let response = self
            .http
            .post(format!("{}/reindex", self.base_url))
            .json(&serde_json::json!({"description": description}))
            .send()
            .await
            .map_err(|e| DiscoveryError::Unreachable(e.to_string()))?;

        let body: Response = response
            .json()
            .await
            .map_err(|e| DiscoveryError::Unreachable(e.to_string()))?;

        Ok(body.vector)
    }
}
