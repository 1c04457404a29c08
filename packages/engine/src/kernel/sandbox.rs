//! Sandbox provider contract (§6.3). The engine calls a remote collaborator
//! that runs untrusted Python; it does not implement a sandbox itself
//! (explicit Non-goal).

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("sandbox provider unavailable: {0}")]
    Unavailable(String),
    #[error("sandbox command timed out")]
    Timeout,
    #[error("sandbox provider returned an error: {0}")]
    Provider(String),
}

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// One sandbox instance, scoped to a single Job (§4.6: at most one sandbox
/// per Job, torn down on any loop exit).
#[async_trait]
pub trait Sandbox: Send + Sync {
    async fn run(&self, command: &str, timeout: Duration) -> Result<CommandOutput, SandboxError>;
    async fn write_file(&self, path: &str, content: &str) -> Result<(), SandboxError>;
    async fn kill(&self) -> Result<(), SandboxError>;
}

/// Creates sandbox instances. One call per Job, lazily, on first `run_python`.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    async fn create(&self, timeout: Duration) -> Result<Box<dyn Sandbox>, SandboxError>;
}

/// HTTP client for a remote sandbox provider exposing the contract in §6.3.
pub struct HttpSandboxProvider {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpSandboxProvider {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            token: token.into(),
        }
    }
}

#[async_trait]
impl SandboxProvider for HttpSandboxProvider {
    async fn create(&self, timeout: Duration) -> Result<Box<dyn Sandbox>, SandboxError> {
        #[derive(Deserialize)]
        struct CreateResponse {
            id: String,
        }

        let response = self
            .http
            .post(format!("{}/sandboxes", self.base_url))
            .bearer_auth(&self.token)
            .json(&serde_json::json!({"timeoutMs": timeout.as_millis()}))
            .send()
            .await
            .map_err(|e| SandboxError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SandboxError::Provider(response.text().await.unwrap_or_default()));
        }

        let body: CreateResponse = response
            .json()
            .await
            .map_err(|e| SandboxError::Provider(e.to_string()))?;

        Ok(Box::new(HttpSandbox {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            token: self.token.clone(),
            id: body.id,
        }))
    }
}

struct HttpSandbox {
    http: reqwest::Client,
    base_url: String,
    token: String,
    id: String,
}

#[async_trait]
impl Sandbox for HttpSandbox {
    async fn run(&self, command: &str, timeout: Duration) -> Result<CommandOutput, SandboxError> {
        #[derive(Deserialize)]
        struct RunResponse {
            stdout: String,
            stderr: String,
            exit_code: i32,
        }

        let response = tokio::time::timeout(
            timeout,
            self.http
                .post(format!("{}/sandboxes/{}/commands", self.base_url, self.id))
                .bearer_auth(&self.token)
                .json(&serde_json::json!({"cmd": command, "timeoutMs": timeout.as_millis()}))
                .send(),
        )
        .await
        .map_err(|_| SandboxError::Timeout)?
        .map_err(|e| SandboxError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SandboxError::Provider(response.text().await.unwrap_or_default()));
        }

        let body: RunResponse = response
            .json()
            .await
            .map_err(|e| SandboxError::Provider(e.to_string()))?;

        Ok(CommandOutput {
            stdout: body.stdout,
            stderr: body.stderr,
            exit_code: body.exit_code,
        })
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<(), SandboxError> {
        let response = self
            .http
            .post(format!("{}/sandboxes/{}/files", self.base_url, self.id))
            .bearer_auth(&self.token)
            .json(&serde_json::json!({"path": path, "content": content}))
            .send()
            .await
            .map_err(|e| SandboxError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SandboxError::Provider(response.text().await.unwrap_or_default()));
        }
        Ok(())
    }

    async fn kill(&self) -> Result<(), SandboxError> {
        let _ = self
            .http
            .delete(format!("{}/sandboxes/{}", self.base_url, self.id))
            .bearer_auth(&self.token)
            .send()
            .await;
        Ok(())
    }
}
