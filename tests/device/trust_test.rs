use account_guard::services::cache::{keys, Cache};
use axum::http::StatusCode;
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};

use crate::common::{test_email, TestContext, TestDevice, Tokens, CHROME, FIREFOX};

async fn devices(ctx: &TestContext, tokens: &Tokens) -> Vec<Value> {
    let response = ctx
        .server
        .get("/devices")
        .authorization_bearer(&tokens.access)
        .await;
    response.assert_status_ok();
    response.json::<Value>().as_array().unwrap().clone()
}

async fn current_device_id(ctx: &TestContext, tokens: &Tokens) -> String {
    devices(ctx, tokens)
        .await
        .into_iter()
        .find(|d| d["is_current"] == true)
        .map(|d| d["id"].as_str().unwrap().to_string())
        .unwrap()
}

async fn set_trust(ctx: &TestContext, tokens: &Tokens, device_id: &str, trusted: bool) -> StatusCode {
    ctx.server
        .put(&format!("/devices/{}/trust", device_id))
        .authorization_bearer(&tokens.access)
        .json(&json!({ "trusted": trusted }))
        .await
        .status_code()
}

async fn current_session_expiry(ctx: &TestContext, tokens: &Tokens) -> DateTime<Utc> {
    let sessions: Value = ctx
        .server
        .get("/sessions")
        .authorization_bearer(&tokens.access)
        .await
        .json();
    let current = sessions
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["is_current"] == true)
        .unwrap()
        .clone();
    serde_json::from_value(current["expires_at"].clone()).unwrap()
}

fn days_from_now(at: DateTime<Utc>) -> i64 {
    (at - Utc::now() + Duration::hours(1)).num_days()
}

#[tokio::test]
async fn devices_are_listed_with_the_current_one_flagged() {
    let ctx = TestContext::new();
    let email = test_email();
    ctx.register(&email).await;
    ctx.login_tokens(&email, &TestDevice::new(CHROME)).await;
    let tokens = ctx.login_tokens(&email, &TestDevice::new(FIREFOX)).await;

    let listed = devices(&ctx, &tokens).await;

    assert_eq!(listed.len(), 2);
    let current: Vec<&Value> = listed.iter().filter(|d| d["is_current"] == true).collect();
    assert_eq!(current.len(), 1);
    assert_eq!(current[0]["name"], "Firefox on Linux");
    assert_eq!(current[0]["trusted"], false);
}

#[tokio::test]
async fn first_device_can_trust_itself_and_sessions_grow() {
    let ctx = TestContext::new();
    let email = test_email();
    ctx.register(&email).await;
    let device = TestDevice::new(FIREFOX);
    let tokens = ctx.login_tokens(&email, &device).await;
    let user_id = ctx.user_id(&tokens).await;
    let device_id = current_device_id(&ctx, &tokens).await;

    assert_eq!(days_from_now(current_session_expiry(&ctx, &tokens).await), 28);

    assert_eq!(set_trust(&ctx, &tokens, &device_id, true).await, StatusCode::OK);

    assert_eq!(days_from_now(current_session_expiry(&ctx, &tokens).await), 150);
    let flag = ctx
        .cache
        .get(&keys::trusted_device(&user_id, &device.fingerprint()))
        .await
        .unwrap();
    assert_eq!(flag.as_deref(), Some("1"));
}

#[tokio::test]
async fn untrusted_session_cannot_promote_other_devices() {
    let ctx = TestContext::new();
    let email = test_email();
    ctx.register(&email).await;
    let first = ctx.login_tokens(&email, &TestDevice::new(FIREFOX)).await;
    let first_device = current_device_id(&ctx, &first).await;
    let second = ctx.login_tokens(&email, &TestDevice::new(CHROME)).await;

    assert_eq!(
        set_trust(&ctx, &second, &first_device, true).await,
        StatusCode::FORBIDDEN
    );
}

#[tokio::test]
async fn trusted_device_promotes_others_and_bypasses_2fa() {
    let ctx = TestContext::new();
    let email = test_email();
    ctx.register(&email).await;
    let laptop = TestDevice::new(FIREFOX);
    let phone = TestDevice::new(CHROME);

    let laptop_tokens = ctx.login_tokens(&email, &laptop).await;
    let laptop_id = current_device_id(&ctx, &laptop_tokens).await;
    let phone_tokens = ctx.login_tokens(&email, &phone).await;
    let phone_id = current_device_id(&ctx, &phone_tokens).await;

    assert_eq!(set_trust(&ctx, &laptop_tokens, &laptop_id, true).await, StatusCode::OK);
    // Once a trusted device exists, the untrusted one cannot bootstrap itself.
    assert_eq!(
        set_trust(&ctx, &phone_tokens, &phone_id, true).await,
        StatusCode::FORBIDDEN
    );
    assert_eq!(set_trust(&ctx, &laptop_tokens, &phone_id, true).await, StatusCode::OK);

    ctx.enable_totp(&email, &laptop_tokens).await;

    let response = ctx.login(&email, &laptop).await;
    assert!(response.json::<Value>().get("access_token").is_some());
    let response = ctx.login(&email, &phone).await;
    assert!(response.json::<Value>().get("access_token").is_some());

    let response = ctx.login(&email, &TestDevice::new(FIREFOX)).await;
    assert_eq!(response.json::<Value>()["requires_2fa"], true);
}

#[tokio::test]
async fn last_trusted_device_cannot_be_untrusted() {
    let ctx = TestContext::new();
    let email = test_email();
    ctx.register(&email).await;
    let laptop_tokens = ctx.login_tokens(&email, &TestDevice::new(FIREFOX)).await;
    let laptop_id = current_device_id(&ctx, &laptop_tokens).await;
    let phone_tokens = ctx.login_tokens(&email, &TestDevice::new(CHROME)).await;
    let phone_id = current_device_id(&ctx, &phone_tokens).await;

    set_trust(&ctx, &laptop_tokens, &laptop_id, true).await;
    set_trust(&ctx, &laptop_tokens, &phone_id, true).await;

    assert_eq!(set_trust(&ctx, &laptop_tokens, &phone_id, false).await, StatusCode::OK);
    assert_eq!(
        set_trust(&ctx, &laptop_tokens, &laptop_id, false).await,
        StatusCode::CONFLICT
    );
    assert_eq!(days_from_now(current_session_expiry(&ctx, &phone_tokens).await), 28);
}

#[tokio::test]
async fn untrusting_clears_the_trust_cache_and_restores_2fa() {
    let ctx = TestContext::new();
    let email = test_email();
    ctx.register(&email).await;
    let laptop = TestDevice::new(FIREFOX);
    let phone = TestDevice::new(CHROME);
    let laptop_tokens = ctx.login_tokens(&email, &laptop).await;
    let laptop_id = current_device_id(&ctx, &laptop_tokens).await;
    let phone_tokens = ctx.login_tokens(&email, &phone).await;
    let phone_id = current_device_id(&ctx, &phone_tokens).await;
    let user_id = ctx.user_id(&laptop_tokens).await;

    set_trust(&ctx, &laptop_tokens, &laptop_id, true).await;
    set_trust(&ctx, &laptop_tokens, &phone_id, true).await;
    ctx.enable_totp(&email, &laptop_tokens).await;

    // Populates the trust cache for the phone.
    let response = ctx.login(&email, &phone).await;
    assert!(response.json::<Value>().get("access_token").is_some());

    set_trust(&ctx, &laptop_tokens, &phone_id, false).await;

    let flag = ctx
        .cache
        .get(&keys::trusted_device(&user_id, &phone.fingerprint()))
        .await
        .unwrap();
    assert!(flag.is_none());
    let response = ctx.login(&email, &phone).await;
    assert_eq!(response.json::<Value>()["requires_2fa"], true);
}

#[tokio::test]
async fn devices_of_other_users_are_not_found() {
    let ctx = TestContext::new();
    let alice_email = test_email();
    let bob_email = test_email();
    ctx.register(&alice_email).await;
    ctx.register(&bob_email).await;
    let alice = ctx.login_tokens(&alice_email, &TestDevice::new(FIREFOX)).await;
    let bob = ctx.login_tokens(&bob_email, &TestDevice::new(FIREFOX)).await;
    let alice_device = current_device_id(&ctx, &alice).await;

    assert_eq!(
        set_trust(&ctx, &bob, &alice_device, true).await,
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn trusted_fingerprint_cannot_be_reconstructed_from_request_data() {
    let ctx = TestContext::new();
    let email = test_email();
    ctx.register(&email).await;
    let laptop = TestDevice::new(FIREFOX);
    let tokens = ctx.login_tokens(&email, &laptop).await;
    let laptop_id = current_device_id(&ctx, &tokens).await;
    set_trust(&ctx, &tokens, &laptop_id, true).await;
    ctx.enable_totp(&email, &tokens).await;

    // Same User-Agent and address as the trusted laptop, but no cookie.
    let lookalike = laptop.without_cookie();
    let response = ctx.login(&email, &lookalike).await;
    assert_eq!(response.json::<Value>()["requires_2fa"], true);
    assert_ne!(lookalike.fingerprint(), laptop.fingerprint());

    // A guessed cookie value is just another unknown device.
    let guesser = TestDevice::new(CHROME);
    guesser.pin(&"0".repeat(64));
    let response = ctx.login(&email, &guesser).await;
    assert_eq!(response.json::<Value>()["requires_2fa"], true);

    // The real cookie still skips the challenge.
    let response = ctx.login(&email, &laptop).await;
    assert!(response.json::<Value>().get("access_token").is_some());
}
