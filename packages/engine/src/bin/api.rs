//! HTTP API composition root.

use std::sync::Arc;
use std::time::Duration;

use chat_client::ChatClient;
use sqlx::postgres::PgPoolOptions;

use engine_core::config::Config;
use engine_core::kernel::agents::PostgresAgentStore;
use engine_core::kernel::credentials::CredentialStore;
use engine_core::kernel::discovery::{DiscoveryService, HttpDiscoveryService};
use engine_core::kernel::object_store::{HttpObjectStore, ObjectStore};
use engine_core::kernel::queue::{PostgresQueueStore, QueueStore};
use engine_core::kernel::rate_limiter::RateLimiter;
use engine_core::kernel::sandbox::{HttpSandboxProvider, SandboxProvider};
use engine_core::kernel::EngineKernel;
use engine_core::server::build_app;

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

    let kernel = build_kernel(db, config).await?;
    let app = build_app(kernel.clone());

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", kernel.config.port)).await?;
    tracing::info!(port = kernel.config.port, "api listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn build_kernel(db: sqlx::PgPool, config: Config) -> anyhow::Result<Arc<EngineKernel>> {
    let chat_client = Arc::new(
        ChatClient::new(config.chat_provider_api_key.clone())
            .with_base_url(config.chat_provider_base_url.clone().unwrap_or_else(|| "https://api.openai.com/v1".to_string())),
    );

    let object_store: Arc<dyn ObjectStore> = Arc::new(HttpObjectStore::new(
        config.object_store_url.clone().unwrap_or_default(),
        config.object_store_admin_token.clone().unwrap_or_default(),
    ));

    let sandbox_provider: Arc<dyn SandboxProvider> = Arc::new(HttpSandboxProvider::new(
        config.sandbox_provider_url.clone().unwrap_or_default(),
        config.sandbox_provider_token.clone().unwrap_or_default(),
    ));

    let discovery: Arc<dyn DiscoveryService> = Arc::new(HttpDiscoveryService::new(
        config.discovery_service_url.clone().unwrap_or_default(),
    ));

    let rate_limiter = RateLimiter::new(config.rate_limiter_store_url.is_some());
    let credentials = CredentialStore::new(
        db.clone(),
        config.deploy_env,
        config.api_key_prefix_live.clone(),
        config.api_key_prefix_test.clone(),
    );
    let queue: Arc<dyn QueueStore> = Arc::new(PostgresQueueStore::new(db.clone()));
    let agents = Arc::new(PostgresAgentStore::new(db.clone()));

    Ok(Arc::new(EngineKernel {
        db,
        config,
        chat_client,
        object_store,
        sandbox_provider,
        discovery,
        rate_limiter,
        queue,
        credentials,
        agents,
    }))
}

async fn shutdown_signal() {
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

    tracing::info!("shutdown signal received");
}
