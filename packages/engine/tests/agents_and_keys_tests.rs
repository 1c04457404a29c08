//! Agent registry and admin API-key integration tests (§4.1, §6.1).
//! Requires `TEST_DATABASE_URL`.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use engine_core::kernel::credentials::Scope;
use http_body_util::BodyExt;
use tower::ServiceExt;

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
}

#[tokio::test]
async fn registering_an_agent_then_duplicate_package_name_conflicts() {
    let Some(harness) = common::TestHarness::new().await else {
        eprintln!("skipping: TEST_DATABASE_URL not set");
        return;
    };
    let (key, _) = harness.issue_key(vec![Scope::AgentsWrite, Scope::AgentsRead]).await;
    let app = engine_core::server::build_app(harness.kernel.clone());

    let payload = serde_json::json!({
        "name": "Web Scraper",
        "description": "Crawls a URL and extracts structured data from the page",
        "package_name": "web-scraper",
    });

    let first = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/agents")
                .header("authorization", format!("Bearer {key}"))
                .header("content-type", "application/json")
                .body(Body::from(payload.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);

    let second = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/agents")
                .header("authorization", format!("Bearer {key}"))
                .header("content-type", "application/json")
                .body(Body::from(payload.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn create_agent_rejects_bad_package_name() {
    let Some(harness) = common::TestHarness::new().await else {
        eprintln!("skipping: TEST_DATABASE_URL not set");
        return;
    };
    let (key, _) = harness.issue_key(vec![Scope::AgentsWrite]).await;
    let app = engine_core::server::build_app(harness.kernel.clone());

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/agents")
                .header("authorization", format!("Bearer {key}"))
                .header("content-type", "application/json")
                .body(Body::from(
                    serde_json::json!({
                        "name": "Bad Agent",
                        "description": "this description is long enough to pass validation",
                        "package_name": "Not Valid!",
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn admin_can_issue_and_revoke_a_key() {
    let Some(harness) = common::TestHarness::new().await else {
        eprintln!("skipping: TEST_DATABASE_URL not set");
        return;
    };
    let (admin_key, _) = harness.issue_key(vec![Scope::Admin]).await;
    let app = engine_core::server::build_app(harness.kernel.clone());

    let created = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/admin/keys")
                .header("authorization", format!("Bearer {admin_key}"))
                .header("content-type", "application/json")
                .body(Body::from(serde_json::json!({"name": "ci bot"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(created.status(), StatusCode::CREATED);
    let body = body_json(created).await;
    let new_id = body["id"].as_str().unwrap().to_string();
    assert!(body["key"].as_str().unwrap().starts_with("engine_test_"));

    let revoked = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/v1/admin/keys/{new_id}"))
                .header("authorization", format!("Bearer {admin_key}"))
                .header("content-type", "application/json")
                .body(Body::from(serde_json::json!({}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(revoked.status(), StatusCode::OK);

    let meta = harness
        .kernel
        .credentials
        .get(uuid::Uuid::parse_str(&new_id).unwrap())
        .await
        .unwrap()
        .unwrap();
    assert!(!meta.is_active);
}

#[tokio::test]
async fn admin_metrics_reports_job_counts_by_status() {
    let Some(harness) = common::TestHarness::new().await else {
        eprintln!("skipping: TEST_DATABASE_URL not set");
        return;
    };
    let (admin_key, credential_id) = harness.issue_key(vec![Scope::Admin]).await;

    harness
        .kernel
        .queue
        .enqueue(
            "metrics task",
            credential_id,
            0,
            300,
            "gpt-4o-mini",
            engine_core::kernel::models::HitlMode::AutoExecute,
            3,
            None,
        )
        .await
        .unwrap();

    let app = engine_core::server::build_app(harness.kernel.clone());
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/admin/metrics")
                .header("authorization", format!("Bearer {admin_key}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["jobs"]["by_status"]["queued"], serde_json::json!(1));
}
