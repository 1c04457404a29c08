//! Shared runtime handles threaded through every domain.

use std::sync::Arc;

use sqlx::PgPool;

use chat_client::ChatClient;

use crate::config::Config;
use crate::kernel::agents::AgentStore;
use crate::kernel::credentials::CredentialStore;
use crate::kernel::discovery::DiscoveryService;
use crate::kernel::object_store::ObjectStore;
use crate::kernel::queue::QueueStore;
use crate::kernel::rate_limiter::RateLimiter;
use crate::kernel::sandbox::SandboxProvider;

/// The set of connections and collaborator clients every domain depends on.
///
/// Mirrors the teacher's pattern of a single handle struct passed behind an
/// `Arc` rather than threading a dozen individual clients through every call.
pub struct EngineKernel {
    pub db: PgPool,
    pub config: Config,
    pub chat_client: Arc<ChatClient>,
    pub object_store: Arc<dyn ObjectStore>,
    pub sandbox_provider: Arc<dyn SandboxProvider>,
    pub discovery: Arc<dyn DiscoveryService>,
    pub rate_limiter: RateLimiter,
    pub queue: Arc<dyn QueueStore>,
    pub credentials: CredentialStore,
    pub agents: Arc<dyn AgentStore>,
}
