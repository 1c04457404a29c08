//! Postgres-backed test harness.
//!
//! Mirrors the teacher's `TestHarness` shape (a bundle of ready-to-use
//! dependencies, fresh per test) but connects to an already-running
//! database named by `TEST_DATABASE_URL` instead of spinning up
//! testcontainers, so the rest of the suite has no hard dependency on a
//! live Postgres.

use std::sync::Arc;

use chat_client::ChatClient;
use engine_core::config::{Config, DeployEnv};
use engine_core::kernel::agents::PostgresAgentStore;
use engine_core::kernel::credentials::CredentialStore;
use engine_core::kernel::discovery::HttpDiscoveryService;
use engine_core::kernel::object_store::HttpObjectStore;
use engine_core::kernel::queue::PostgresQueueStore;
use engine_core::kernel::rate_limiter::RateLimiter;
use engine_core::kernel::sandbox::HttpSandboxProvider;
use engine_core::kernel::EngineKernel;
use sqlx::PgPool;

pub struct TestHarness {
    pub kernel: Arc<EngineKernel>,
}

impl TestHarness {
    /// Connects to `TEST_DATABASE_URL`, runs migrations, and assembles a
    /// full [`EngineKernel`]. Returns `None` (rather than panicking) when
    /// the env var is unset, so tests can skip cleanly in environments
    /// with no database available.
    pub async fn new() -> Option<Self> {
        let database_url = std::env::var("TEST_DATABASE_URL").ok()?;

        let db = PgPool::connect(&database_url)
            .await
            .expect("failed to connect to TEST_DATABASE_URL");

        sqlx::migrate!("./migrations")
            .run(&db)
            .await
            .expect("failed to run migrations against test database");

        // Each test truncates rather than drops, so the schema only pays
        // migration cost once per test binary run.
        sqlx::query(
            "TRUNCATE job_logs, job_artifacts, job_attachments, jobs, workers, agents, credentials CASCADE",
        )
        .execute(&db)
        .await
        .expect("failed to reset test database");

        let config = Config {
            database_url,
            object_store_url: None,
            object_store_admin_token: None,
            rate_limiter_store_url: Some("memory".to_string()),
            rate_limiter_store_token: None,
            chat_provider_api_key: "test-key".to_string(),
            chat_provider_base_url: None,
            sandbox_provider_token: None,
            sandbox_provider_url: None,
            discovery_service_url: None,
            worker_concurrency: 2,
            worker_poll_interval_ms: 50,
            worker_heartbeat_interval_ms: 1_000,
            worker_shutdown_timeout_ms: 1_000,
            deploy_env: DeployEnv::Test,
            port: 0,
            api_key_prefix_live: "engine_live_".to_string(),
            api_key_prefix_test: "engine_test_".to_string(),
        };

        let chat_client = Arc::new(
            ChatClient::new(config.chat_provider_api_key.clone())
                .with_base_url("http://127.0.0.1:0".to_string()),
        );
        let object_store = Arc::new(HttpObjectStore::new(String::new(), String::new()));
        let sandbox_provider = Arc::new(HttpSandboxProvider::new(String::new(), String::new()));
        let discovery = Arc::new(HttpDiscoveryService::new(String::new()));

        let kernel = Arc::new(EngineKernel {
            queue: Arc::new(PostgresQueueStore::new(db.clone())),
            agents: Arc::new(PostgresAgentStore::new(db.clone())),
            credentials: CredentialStore::new(
                db.clone(),
                config.deploy_env,
                config.api_key_prefix_live.clone(),
                config.api_key_prefix_test.clone(),
            ),
            rate_limiter: RateLimiter::new(true),
            db,
            config,
            chat_client,
            object_store,
            sandbox_provider,
            discovery,
        });

        Some(Self { kernel })
    }

    /// Issues a credential and returns `(raw_key, credential_id)`.
    pub async fn issue_key(
        &self,
        scopes: Vec<engine_core::kernel::credentials::Scope>,
    ) -> (String, uuid::Uuid) {
        self.kernel
            .credentials
            .issue("test credential", None, Some(scopes), None)
            .await
            .expect("failed to issue test credential")
    }
}
