//! Application setup: the axum Router for the engine's HTTP API.

use std::sync::Arc;

use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::Method;
use axum::middleware as axum_middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::kernel::EngineKernel;
use crate::server::middleware::auth::auth_middleware;
use crate::server::routes::{admin, agents, health, jobs, keys};

/// Build the axum application router. `/health` is unauthenticated; every
/// other route runs the admission pipeline (§4.4) before reaching its handler.
pub fn build_app(kernel: Arc<EngineKernel>) -> Router {
    let api = Router::new()
        .route("/jobs", post(jobs::create_job).get(jobs::list_jobs))
        .route("/jobs/upload", post(jobs::upload_attachment))
        .route("/jobs/:id", get(jobs::get_job).delete(jobs::cancel_job))
        .route("/jobs/:id/respond", post(jobs::respond_job))
        .route("/jobs/:id/logs", get(jobs::list_job_logs))
        .route("/jobs/:id/artifacts", get(jobs::list_job_artifacts))
        .route("/agents/discover", post(agents::discover_agents))
        .route("/agents", get(agents::list_agents).post(agents::create_agent))
        .route("/admin/agents/reindex", post(admin::reindex_agents))
        .route("/admin/keys", get(keys::list_keys).post(keys::create_key))
        .route("/admin/keys/:id", get(keys::get_key).delete(keys::revoke_key))
        .route("/admin/metrics", get(admin::get_metrics))
        .route("/admin/workers", get(admin::list_workers))
        .route("/admin/workers/:id", get(admin::get_worker))
        .route_layer(axum_middleware::from_fn_with_state(kernel.clone(), auth_middleware));

    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health::health))
        .nest("/api/v1", api)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(kernel)
}
