//! HTTP-level integration tests against the assembled axum app (§4.4, §6.1):
//! auth admission, the ownership 404 rule, and rate limiting. Requires
//! `TEST_DATABASE_URL`.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use engine_core::kernel::credentials::Scope;
use engine_core::kernel::models::HitlMode;
use http_body_util::BodyExt;
use tower::ServiceExt;

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
}

#[tokio::test]
async fn health_requires_no_auth() {
    let Some(harness) = common::TestHarness::new().await else {
        eprintln!("skipping: TEST_DATABASE_URL not set");
        return;
    };
    let app = engine_core::server::build_app(harness.kernel.clone());

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn missing_bearer_token_is_unauthorized() {
    let Some(harness) = common::TestHarness::new().await else {
        eprintln!("skipping: TEST_DATABASE_URL not set");
        return;
    };
    let app = engine_core::server::build_app(harness.kernel.clone());

    let response = app
        .oneshot(Request::builder().uri("/api/v1/jobs").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn fetching_someone_elses_job_returns_404_not_403() {
    let Some(harness) = common::TestHarness::new().await else {
        eprintln!("skipping: TEST_DATABASE_URL not set");
        return;
    };

    let (owner_key, owner_id) = harness.issue_key(vec![Scope::JobsWrite, Scope::JobsRead]).await;
    let (stranger_key, _) = harness.issue_key(vec![Scope::JobsRead]).await;
    let _ = owner_key;

    let job = harness
        .kernel
        .queue
        .enqueue("private task", owner_id, 0, 300, "gpt-4o-mini", HitlMode::AutoExecute, 3, None)
        .await
        .unwrap();

    let app = engine_core::server::build_app(harness.kernel.clone());
    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/v1/jobs/{}", job.id))
                .header("authorization", format!("Bearer {stranger_key}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND, "a non-owner must see 404, never 403");
}

#[tokio::test]
async fn owner_can_fetch_their_own_job() {
    let Some(harness) = common::TestHarness::new().await else {
        eprintln!("skipping: TEST_DATABASE_URL not set");
        return;
    };

    let (owner_key, owner_id) = harness.issue_key(vec![Scope::JobsWrite, Scope::JobsRead]).await;
    let job = harness
        .kernel
        .queue
        .enqueue("my own task", owner_id, 0, 300, "gpt-4o-mini", HitlMode::AutoExecute, 3, None)
        .await
        .unwrap();

    let app = engine_core::server::build_app(harness.kernel.clone());
    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/v1/jobs/{}", job.id))
                .header("authorization", format!("Bearer {owner_key}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["id"], serde_json::json!(job.id));
}

#[tokio::test]
async fn create_job_validates_task_length() {
    let Some(harness) = common::TestHarness::new().await else {
        eprintln!("skipping: TEST_DATABASE_URL not set");
        return;
    };
    let (key, _) = harness.issue_key(vec![Scope::JobsWrite]).await;
    let app = engine_core::server::build_app(harness.kernel.clone());

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/jobs")
                .header("authorization", format!("Bearer {key}"))
                .header("content-type", "application/json")
                .body(Body::from(serde_json::json!({"task": ""}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn exceeding_rpm_limit_returns_429_with_retry_after() {
    let Some(harness) = common::TestHarness::new().await else {
        eprintln!("skipping: TEST_DATABASE_URL not set");
        return;
    };

    let (key, _) = harness
        .kernel
        .credentials
        .issue("rate limited caller", None, Some(vec![Scope::JobsRead]), Some(1))
        .await
        .unwrap();
    let app = engine_core::server::build_app(harness.kernel.clone());

    let first = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/jobs")
                .header("authorization", format!("Bearer {key}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/jobs")
                .header("authorization", format!("Bearer {key}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(second.headers().contains_key("retry-after"));
}

#[tokio::test]
async fn non_admin_cannot_list_keys() {
    let Some(harness) = common::TestHarness::new().await else {
        eprintln!("skipping: TEST_DATABASE_URL not set");
        return;
    };
    let (key, _) = harness.issue_key(vec![Scope::JobsRead]).await;
    let app = engine_core::server::build_app(harness.kernel.clone());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/admin/keys")
                .header("authorization", format!("Bearer {key}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
