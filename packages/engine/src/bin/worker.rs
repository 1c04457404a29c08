//! Worker runtime composition root.

use std::sync::Arc;
use std::time::Duration;

use chat_client::ChatClient;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;

use engine_core::config::Config;
use engine_core::domains::jobs::AgentLoopDeps;
use engine_core::domains::workers::{WorkerRuntime, WorkerRuntimeConfig};
use engine_core::kernel::discovery::{DiscoveryService, HttpDiscoveryService};
use engine_core::kernel::object_store::{HttpObjectStore, ObjectStore};
use engine_core::kernel::queue::{PostgresQueueStore, QueueStore};
use engine_core::kernel::sandbox::{HttpSandboxProvider, SandboxProvider};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;
    let db = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&config.database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&db).await?;

    let queue: Arc<dyn QueueStore> = Arc::new(PostgresQueueStore::new(db.clone()));

    let chat_client = Arc::new(
        ChatClient::new(config.chat_provider_api_key.clone()).with_base_url(
            config
                .chat_provider_base_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
        ),
    );
    let discovery: Arc<dyn DiscoveryService> = Arc::new(HttpDiscoveryService::new(
        config.discovery_service_url.clone().unwrap_or_default(),
    ));
    let object_store: Arc<dyn ObjectStore> = Arc::new(HttpObjectStore::new(
        config.object_store_url.clone().unwrap_or_default(),
        config.object_store_admin_token.clone().unwrap_or_default(),
    ));
    let sandbox_provider: Arc<dyn SandboxProvider> = Arc::new(HttpSandboxProvider::new(
        config.sandbox_provider_url.clone().unwrap_or_default(),
        config.sandbox_provider_token.clone().unwrap_or_default(),
    ));

    let loop_deps = Arc::new(AgentLoopDeps {
        chat_client,
        queue: queue.clone(),
        discovery,
        object_store,
        sandbox_provider,
    });

    let worker_id = WorkerRuntimeConfig::default_worker_id();
    let runtime_config = WorkerRuntimeConfig::from_config(worker_id, &config);
    let runtime = Arc::new(WorkerRuntime::new(queue, loop_deps, runtime_config));

    let shutdown = CancellationToken::new();
    let shutdown_for_signal = shutdown.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        shutdown_for_signal.cancel();
    });

    runtime.run(shutdown).await;
    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received, draining worker");
}
