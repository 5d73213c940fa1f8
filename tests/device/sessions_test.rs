use axum::http::StatusCode;
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};

use crate::common::{test_email, TestContext, TestDevice, Tokens, CHROME, FIREFOX};

async fn current(ctx: &TestContext, tokens: &Tokens, path: &str) -> Value {
    let listed: Value = ctx
        .server
        .get(path)
        .authorization_bearer(&tokens.access)
        .await
        .json();
    listed
        .as_array()
        .unwrap()
        .iter()
        .find(|v| v["is_current"] == true)
        .unwrap()
        .clone()
}

async fn schedule(ctx: &TestContext, tokens: &Tokens, session_id: &str, at: Value) -> axum_test::TestResponse {
    ctx.server
        .put(&format!("/sessions/{}/revoke-at", session_id))
        .authorization_bearer(&tokens.access)
        .json(&json!({ "revoke_at": at }))
        .await
}

fn at(value: &Value) -> DateTime<Utc> {
    serde_json::from_value(value.clone()).unwrap()
}

#[tokio::test]
async fn sessions_are_listed_with_the_current_one_flagged() {
    let ctx = TestContext::new();
    let email = test_email();
    ctx.register(&email).await;
    ctx.login_tokens(&email, &TestDevice::new(CHROME)).await;
    let tokens = ctx.login_tokens(&email, &TestDevice::new(FIREFOX)).await;

    let response = ctx
        .server
        .get("/sessions")
        .authorization_bearer(&tokens.access)
        .await;

    response.assert_status_ok();
    let sessions: Value = response.json();
    let sessions = sessions.as_array().unwrap();
    assert_eq!(sessions.len(), 2);
    assert_eq!(
        sessions.iter().filter(|s| s["is_current"] == true).count(),
        1
    );
}

#[tokio::test]
async fn revoking_a_session_logs_that_device_out() {
    let ctx = TestContext::new();
    let email = test_email();
    ctx.register(&email).await;
    let other = ctx.login_tokens(&email, &TestDevice::new(CHROME)).await;
    let tokens = ctx.login_tokens(&email, &TestDevice::new(FIREFOX)).await;

    let sessions: Value = ctx
        .server
        .get("/sessions")
        .authorization_bearer(&tokens.access)
        .await
        .json();
    let other_id = sessions
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["is_current"] == false)
        .map(|s| s["id"].as_str().unwrap().to_string())
        .unwrap();

    ctx.server
        .delete(&format!("/sessions/{}", other_id))
        .authorization_bearer(&tokens.access)
        .await
        .assert_status(StatusCode::NO_CONTENT);

    ctx.server
        .get("/auth/me")
        .authorization_bearer(&other.access)
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    let sessions: Value = ctx
        .server
        .get("/sessions")
        .authorization_bearer(&tokens.access)
        .await
        .json();
    assert_eq!(sessions.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn unknown_sessions_are_not_found() {
    let ctx = TestContext::new();
    let email = test_email();
    ctx.register(&email).await;
    let tokens = ctx.login_tokens(&email, &TestDevice::new(FIREFOX)).await;

    ctx.server
        .delete("/sessions/does-not-exist")
        .authorization_bearer(&tokens.access)
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn session_routes_require_authentication() {
    let ctx = TestContext::new();

    ctx.server
        .get("/sessions")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
    ctx.server
        .get("/devices")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn scheduled_revocation_bounds_the_session() {
    let ctx = TestContext::new();
    let email = test_email();
    ctx.register(&email).await;
    let tokens = ctx.login_tokens(&email, &TestDevice::new(FIREFOX)).await;
    let session_id = current(&ctx, &tokens, "/sessions").await["id"]
        .as_str()
        .unwrap()
        .to_string();
    let revoke_at = Utc::now() + Duration::days(3);

    let response = schedule(&ctx, &tokens, &session_id, json!(revoke_at)).await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(at(&body["revoke_at"]), revoke_at);
    assert_eq!(at(&body["expires_at"]), revoke_at);

    // Trusting the device stretches the window but not past the schedule.
    let device_id = current(&ctx, &tokens, "/devices").await["id"]
        .as_str()
        .unwrap()
        .to_string();
    ctx.server
        .put(&format!("/devices/{}/trust", device_id))
        .authorization_bearer(&tokens.access)
        .json(&json!({ "trusted": true }))
        .await
        .assert_status_ok();
    assert_eq!(at(&current(&ctx, &tokens, "/sessions").await["expires_at"]), revoke_at);

    // Clearing the schedule restores the trusted window.
    let body: Value = schedule(&ctx, &tokens, &session_id, Value::Null).await.json();
    assert!(body["revoke_at"].is_null());
    assert!(at(&body["expires_at"]) > Utc::now() + Duration::days(100));
}

#[tokio::test]
async fn revocation_must_be_scheduled_in_the_future() {
    let ctx = TestContext::new();
    let email = test_email();
    ctx.register(&email).await;
    let tokens = ctx.login_tokens(&email, &TestDevice::new(FIREFOX)).await;
    let session_id = current(&ctx, &tokens, "/sessions").await["id"]
        .as_str()
        .unwrap()
        .to_string();

    schedule(&ctx, &tokens, &session_id, json!(Utc::now() - Duration::minutes(1)))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn revocation_cannot_be_scheduled_on_someone_elses_session() {
    let ctx = TestContext::new();
    let owner = test_email();
    let stranger = test_email();
    ctx.register(&owner).await;
    ctx.register(&stranger).await;
    let owner_tokens = ctx.login_tokens(&owner, &TestDevice::new(FIREFOX)).await;
    let stranger_tokens = ctx.login_tokens(&stranger, &TestDevice::new(CHROME)).await;
    let session_id = current(&ctx, &owner_tokens, "/sessions").await["id"]
        .as_str()
        .unwrap()
        .to_string();

    schedule(
        &ctx,
        &stranger_tokens,
        &session_id,
        json!(Utc::now() + Duration::days(1)),
    )
    .await
    .assert_status(StatusCode::NOT_FOUND);
}
