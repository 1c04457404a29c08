//! Worker Runtime (§4.5): bounded-concurrency job execution, heartbeats,
//! stale-lease sweep, and graceful shutdown.
//!
//! Shaped after the teacher's `JobWorker`: a poll loop that claims work and
//! spawns per-job tasks tracked by a cancellation-handle map, plus a
//! heartbeat side-task, generalized here to the queue's park/respond/release
//! vocabulary instead of seesaw's succeed/fail.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domains::jobs::{self, AgentLoopDeps, LoopOutcome};
use crate::kernel::models::{Job, LogLevel};
use crate::kernel::queue::QueueStore;

const STALE_SWEEP_THRESHOLD_SECS: i64 = 120;
const STALE_SWEEP_INTERVAL: Duration = Duration::from_secs(120);
const MAX_JOB_TIMEOUT_SECS: u64 = 3600;

#[derive(Debug, Clone)]
pub struct WorkerRuntimeConfig {
    pub worker_id: String,
    pub concurrency: usize,
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
    pub shutdown_timeout: Duration,
}

impl WorkerRuntimeConfig {
    pub fn from_env_defaults(worker_id: String) -> Self {
        Self {
            worker_id,
            concurrency: 3,
            poll_interval: Duration::from_millis(1000),
            heartbeat_interval: Duration::from_millis(30_000),
            shutdown_timeout: Duration::from_millis(30_000),
        }
    }

    /// Builds config from the loaded environment (§6.5's `WORKER_*` knobs).
    pub fn from_config(worker_id: String, config: &crate::config::Config) -> Self {
        Self {
            worker_id,
            concurrency: config.worker_concurrency,
            poll_interval: Duration::from_millis(config.worker_poll_interval_ms),
            heartbeat_interval: Duration::from_millis(config.worker_heartbeat_interval_ms),
            shutdown_timeout: Duration::from_millis(config.worker_shutdown_timeout_ms),
        }
    }

    /// `hostname-pid`, the default worker id shape (§4.5).
    pub fn default_worker_id() -> String {
        let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "worker".to_string());
        format!("{hostname}-{}", std::process::id())
    }
}

pub struct WorkerRuntime {
    queue: Arc<dyn QueueStore>,
    loop_deps: Arc<AgentLoopDeps>,
    config: WorkerRuntimeConfig,
    running_jobs: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
}

impl WorkerRuntime {
    pub fn new(queue: Arc<dyn QueueStore>, loop_deps: Arc<AgentLoopDeps>, config: WorkerRuntimeConfig) -> Self {
        Self {
            queue,
            loop_deps,
            config,
            running_jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(worker_id = %self.config.worker_id, concurrency = self.config.concurrency, "worker runtime starting");

        let heartbeat_handle = tokio::spawn(self.clone().heartbeat_loop(shutdown.clone()));
        let sweep_handle = tokio::spawn(self.clone().stale_sweep_loop(shutdown.clone()));

        self.clone().poll_loop(shutdown.clone()).await;
        self.drain().await;

        heartbeat_handle.abort();
        sweep_handle.abort();

        if let Err(e) = self.queue.mark_worker_dead(&self.config.worker_id).await {
            error!(worker_id = %self.config.worker_id, error = %e, "failed to mark worker dead");
        }
        info!(worker_id = %self.config.worker_id, "worker runtime stopped");
    }

    async fn poll_loop(self: Arc<Self>, shutdown: CancellationToken) {
        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let active = self.running_jobs.read().await.len();
            if active < self.config.concurrency {
                match self.queue.claim_next(&self.config.worker_id).await {
                    Ok(Some(job)) => {
                        let runtime = self.clone();
                        let job_shutdown = shutdown.clone();
                        tokio::spawn(async move { runtime.process_job(job, job_shutdown).await });
                    }
                    Ok(None) => {}
                    Err(e) => {
                        error!(error = %e, "failed to claim next job");
                    }
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }

    async fn process_job(self: Arc<Self>, job: Job, shutdown: CancellationToken) {
        let job_id = job.id;
        let job_cancel = shutdown.child_token();
        self.running_jobs.write().await.insert(job_id, job_cancel.clone());

        self.queue.append_log(job_id, LogLevel::Info, "worker started job", None).await;

        let timeout_secs = (job.timeout_seconds as u64).min(MAX_JOB_TIMEOUT_SECS);
        let outcome = tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            jobs::run(&job, &self.loop_deps, &job_cancel),
        )
        .await;

        match outcome {
            Err(_elapsed) => {
                if job_cancel.is_cancelled() {
                    self.release(job_id).await;
                } else if let Err(e) = self.queue.fail(job_id, "job timed out").await {
                    error!(job_id = %job_id, error = %e, "failed to mark timed-out job as failed");
                }
            }
            Ok(LoopOutcome::Final(text)) => {
                if let Err(e) = self.queue.complete(job_id, &text).await {
                    error!(job_id = %job_id, error = %e, "failed to mark job complete");
                }
            }
            Ok(LoopOutcome::AskUser { question, state }) => {
                if let Err(e) = self.queue.park(job_id, &question, state).await {
                    error!(job_id = %job_id, error = %e, "failed to park job");
                }
            }
            Ok(LoopOutcome::Failure(reason)) => {
                if job_cancel.is_cancelled() {
                    self.release(job_id).await;
                } else if let Err(e) = self.queue.fail(job_id, &reason).await {
                    error!(job_id = %job_id, error = %e, "failed to mark job failed");
                }
            }
        }

        self.running_jobs.write().await.remove(&job_id);
        self.emit_heartbeat(false).await;
    }

    async fn release(&self, job_id: Uuid) {
        if let Err(e) = self.queue.release(job_id).await {
            error!(job_id = %job_id, error = %e, "failed to release cancelled job");
        }
    }

    async fn heartbeat_loop(self: Arc<Self>, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.heartbeat_interval);
        interval.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => self.emit_heartbeat(false).await,
            }
        }
    }

    async fn stale_sweep_loop(self: Arc<Self>, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(STALE_SWEEP_INTERVAL);
        interval.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    match self.queue.recover_stale(STALE_SWEEP_THRESHOLD_SECS).await {
                        Ok(n) if n > 0 => debug!(recovered = n, "recovered stale jobs"),
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "stale-lease sweep failed"),
                    }
                }
            }
        }
    }

    async fn emit_heartbeat(&self, draining: bool) {
        let active = self.running_jobs.read().await.len() as i32;
        let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "worker".to_string());
        if let Err(e) = self
            .queue
            .upsert_worker_heartbeat(&self.config.worker_id, &hostname, env!("CARGO_PKG_VERSION"), active, draining)
            .await
        {
            warn!(worker_id = %self.config.worker_id, error = %e, "failed to emit heartbeat");
        }
    }

    async fn drain(&self) {
        if self.running_jobs.read().await.is_empty() {
            return;
        }

        self.emit_heartbeat(true).await;

        let start = std::time::Instant::now();
        while !self.running_jobs.read().await.is_empty() && start.elapsed() < self.config.shutdown_timeout {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let remaining = self.running_jobs.read().await.clone();
        if !remaining.is_empty() {
            info!(count = remaining.len(), "cancelling jobs still running past shutdown timeout");
            for token in remaining.values() {
                token.cancel();
            }
            let grace = std::time::Instant::now();
            while !self.running_jobs.read().await.is_empty() && grace.elapsed() < Duration::from_secs(5) {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_worker_id_embeds_process_id() {
        let id = WorkerRuntimeConfig::default_worker_id();
        assert!(id.contains(&std::process::id().to_string()));
    }

    #[test]
    fn from_env_defaults_match_spec_defaults() {
        let config = WorkerRuntimeConfig::from_env_defaults("w1".into());
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.poll_interval, Duration::from_millis(1000));
        assert_eq!(config.heartbeat_interval, Duration::from_millis(30_000));
    }
}
