//! Environment-driven configuration.

use std::env;

/// Runtime configuration loaded from the process environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub object_store_url: Option<String>,
    pub object_store_admin_token: Option<String>,
    /// Absence means the rate limiter fails open (§4.2).
    pub rate_limiter_store_url: Option<String>,
    pub rate_limiter_store_token: Option<String>,
    pub chat_provider_api_key: String,
    pub chat_provider_base_url: Option<String>,
    pub sandbox_provider_token: Option<String>,
    pub sandbox_provider_url: Option<String>,
    pub discovery_service_url: Option<String>,
    pub worker_concurrency: usize,
    pub worker_poll_interval_ms: u64,
    pub worker_heartbeat_interval_ms: u64,
    pub worker_shutdown_timeout_ms: u64,
    pub deploy_env: DeployEnv,
    pub port: u16,
    pub api_key_prefix_live: String,
    pub api_key_prefix_test: String,
}

/// Deployment environment, used to tag issued API keys (`engine_live_` / `engine_test_`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployEnv {
    Live,
    Test,
}

impl DeployEnv {
    pub fn key_prefix(self) -> &'static str {
        match self {
            DeployEnv::Live => "engine_live_",
            DeployEnv::Test => "engine_test_",
        }
    }
}

impl Config {
    /// Load configuration from the environment, applying spec defaults.
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            database_url: require_env("DATABASE_URL")?,
            object_store_url: env::var("OBJECT_STORE_URL").ok(),
            object_store_admin_token: env::var("OBJECT_STORE_ADMIN_TOKEN").ok(),
            rate_limiter_store_url: env::var("RATE_LIMITER_STORE_URL").ok(),
            rate_limiter_store_token: env::var("RATE_LIMITER_STORE_TOKEN").ok(),
            chat_provider_api_key: require_env("CHAT_PROVIDER_API_KEY")?,
            chat_provider_base_url: env::var("CHAT_PROVIDER_BASE_URL").ok(),
            sandbox_provider_token: env::var("SANDBOX_PROVIDER_TOKEN").ok(),
            sandbox_provider_url: env::var("SANDBOX_PROVIDER_URL").ok(),
            discovery_service_url: env::var("DISCOVERY_SERVICE_URL").ok(),
            worker_concurrency: parse_env_or("WORKER_CONCURRENCY", 3),
            worker_poll_interval_ms: parse_env_or("WORKER_POLL_INTERVAL_MS", 1000),
            worker_heartbeat_interval_ms: parse_env_or("WORKER_HEARTBEAT_INTERVAL_MS", 30_000),
            worker_shutdown_timeout_ms: parse_env_or("WORKER_SHUTDOWN_TIMEOUT_MS", 30_000),
            deploy_env: match env::var("DEPLOY_ENV").as_deref() {
                Ok("live") => DeployEnv::Live,
                _ => DeployEnv::Test,
            },
            port: parse_env_or("PORT", 8080),
            api_key_prefix_live: env::var("API_KEY_PREFIX_LIVE")
                .unwrap_or_else(|_| DeployEnv::Live.key_prefix().to_string()),
            api_key_prefix_test: env::var("API_KEY_PREFIX_TEST")
                .unwrap_or_else(|_| DeployEnv::Test.key_prefix().to_string()),
        })
    }
}

fn require_env(key: &str) -> anyhow::Result<String> {
    env::var(key).map_err(|_| anyhow::anyhow!("{key} not set"))
}

fn parse_env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deploy_env_picks_prefix() {
        assert_eq!(DeployEnv::Live.key_prefix(), "engine_live_");
        assert_eq!(DeployEnv::Test.key_prefix(), "engine_test_");
    }

    #[test]
    fn parse_env_or_falls_back_to_default() {
        std::env::remove_var("ENGINE_TEST_NONEXISTENT_KNOB");
        let value: u64 = parse_env_or("ENGINE_TEST_NONEXISTENT_KNOB", 42);
        assert_eq!(value, 42);
    }
}
