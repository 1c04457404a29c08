//! Object store contract (§6.3). Artifacts and attachments are uploaded here;
//! the engine never implements storage itself.

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum ObjectStoreError {
    #[error("object store rejected the upload: {0}")]
    Rejected(String),
    #[error("object store unreachable: {0}")]
    Unreachable(String),
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// upload(path, bytes, contentType, upsert=true) -> public URL (§6.3).
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<String, ObjectStoreError>;
    fn public_url(&self, path: &str) -> String;
}

/// HTTP-backed object store client.
pub struct HttpObjectStore {
    http: reqwest::Client,
    base_url: String,
    admin_token: String,
}

impl HttpObjectStore {
    pub fn new(base_url: impl Into<String>, admin_token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            admin_token: admin_token.into(),
        }
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<String, ObjectStoreError> {
        let response = self
            .http
            .put(format!("{}/objects/{}", self.base_url, path))
            .bearer_auth(&self.admin_token)
            .header("Content-Type", content_type)
            .query(&[("upsert", "true")])
            .body(bytes)
            .send()
            .await
            .map_err(|e| ObjectStoreError::Unreachable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ObjectStoreError::Rejected(response.text().await.unwrap_or_default()));
        }

        Ok(self.public_url(path))
    }

    fn public_url(&self, path: &str) -> String {
        format!("{}/public/{}", self.base_url, path)
    }
}
