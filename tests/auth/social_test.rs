use account_guard::error::{AuthError, Result};
use account_guard::modules::auth::interface::{
    PasskeyRepository, RecoveryMethodRepository, TwoFactorSessionRepository, UserRepository,
    VerificationCodeRepository,
};
use account_guard::modules::auth::model::{
    CodePurpose, PasskeyCredential, RecoveryMethod, TwoFactorMethod, TwoFactorSession, User,
    VerificationCode,
};
use account_guard::modules::device::interface::{DeviceRepository, SessionRepository};
use account_guard::modules::device::model::{Device, Session};
use account_guard::store::{MemoryStore, Store};
use async_trait::async_trait;
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::common::{test_email, totp_code, TestContext, TestDevice, FIREFOX};

async fn social_token(ctx: &TestContext, email: &str) -> String {
    let response = ctx
        .server
        .get("/auth/social/google/callback")
        .add_query_param("code", email)
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert!(body["redirect"].as_str().unwrap().contains("token="));
    body["token"].as_str().unwrap().to_string()
}

async fn cached(ctx: &TestContext, token: &str) -> bool {
    use account_guard::services::cache::{keys, Cache};
    ctx.cache
        .get(&keys::social_token(token))
        .await
        .unwrap()
        .is_some()
}

#[tokio::test]
async fn unknown_provider_is_rejected() {
    let ctx = TestContext::new();

    ctx.server
        .get("/auth/social/myspace/callback")
        .add_query_param("code", "anything")
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn first_social_login_creates_the_user_and_issues_tokens() {
    let ctx = TestContext::new();
    let email = test_email();
    let token = social_token(&ctx, &email).await;

    let response = TestDevice::new(FIREFOX)
        .apply(ctx.server.post("/auth/social/complete"))
        .json(&json!({ "token": &token }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    let access = body["access_token"].as_str().unwrap();

    let me: Value = ctx
        .server
        .get("/auth/me")
        .authorization_bearer(access)
        .await
        .json();
    assert_eq!(me["email"], email.as_str());
    assert_eq!(me["email_verified"], true);

    // The token is spent once the session exists.
    assert!(!cached(&ctx, &token).await);
    TestDevice::new(FIREFOX)
        .apply(ctx.server.post("/auth/social/complete"))
        .json(&json!({ "token": &token }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn social_login_links_to_an_existing_account() {
    let ctx = TestContext::new();
    let email = test_email();
    ctx.register(&email).await;
    let tokens = ctx.login_tokens(&email, &TestDevice::new(FIREFOX)).await;
    let user_id = ctx.user_id(&tokens).await;

    let token = social_token(&ctx, &email.to_uppercase()).await;
    let body: Value = TestDevice::new(FIREFOX)
        .apply(ctx.server.post("/auth/social/complete"))
        .json(&json!({ "token": token }))
        .await
        .json();

    let access = body["access_token"].as_str().unwrap();
    let me: Value = ctx
        .server
        .get("/auth/me")
        .authorization_bearer(access)
        .await
        .json();
    assert_eq!(me["id"], user_id.as_str());
}

#[tokio::test]
async fn social_token_survives_until_the_second_factor_passes() {
    let ctx = TestContext::new();
    let email = test_email();
    ctx.register(&email).await;
    let tokens = ctx.login_tokens(&email, &TestDevice::new(FIREFOX)).await;
    let secret = ctx.enable_totp(&email, &tokens).await;

    let token = social_token(&ctx, &email).await;
    let body: Value = TestDevice::new(FIREFOX)
        .apply(ctx.server.post("/auth/social/complete"))
        .json(&json!({ "token": &token }))
        .await
        .json();

    assert_eq!(body["requires_2fa"], true);
    assert!(cached(&ctx, &token).await);

    let session_id = body["session_id"].as_str().unwrap();
    ctx.verify_2fa(session_id, "totp", &totp_code(&secret, &email))
        .await
        .assert_status_ok();

    assert!(!cached(&ctx, &token).await);
}

/// In-memory store whose session writes fail while `broken` is set.
struct FlakySessions {
    inner: Arc<MemoryStore>,
    broken: Arc<AtomicBool>,
}

#[async_trait]
impl UserRepository for FlakySessions {
    async fn create_user(&self, user: &User) -> Result<()> {
        self.inner.create_user(user).await
    }
    async fn find_user(&self, id: &str) -> Result<Option<User>> {
        self.inner.find_user(id).await
    }
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.inner.find_user_by_email(email).await
    }
    async fn record_login_failure(
        &self,
        user_id: &str,
        max_attempts: u32,
        lock_until: DateTime<Utc>,
    ) -> Result<u32> {
        self.inner.record_login_failure(user_id, max_attempts, lock_until).await
    }
    async fn reset_login_failures(&self, user_id: &str) -> Result<()> {
        self.inner.reset_login_failures(user_id).await
    }
    async fn claim_totp_step(&self, user_id: &str, step: u64) -> Result<bool> {
        self.inner.claim_totp_step(user_id, step).await
    }
    async fn enable_two_factor(
        &self,
        user_id: &str,
        method: TwoFactorMethod,
        secret: Option<&str>,
    ) -> Result<()> {
        self.inner.enable_two_factor(user_id, method, secret).await
    }
    async fn disable_two_factor(&self, user_id: &str) -> Result<()> {
        self.inner.disable_two_factor(user_id).await
    }
}

#[async_trait]
impl TwoFactorSessionRepository for FlakySessions {
    async fn create_challenge(&self, challenge: &TwoFactorSession) -> Result<()> {
        self.inner.create_challenge(challenge).await
    }
    async fn find_challenge(&self, id: &str) -> Result<Option<TwoFactorSession>> {
        self.inner.find_challenge(id).await
    }
    async fn record_challenge_failure(&self, id: &str) -> Result<u32> {
        self.inner.record_challenge_failure(id).await
    }
    async fn delete_challenge(&self, id: &str) -> Result<bool> {
        self.inner.delete_challenge(id).await
    }
    async fn delete_expired_challenges(&self, user_id: &str, now: DateTime<Utc>) -> Result<u64> {
        self.inner.delete_expired_challenges(user_id, now).await
    }
}

#[async_trait]
impl VerificationCodeRepository for FlakySessions {
    async fn create_code(&self, code: &VerificationCode) -> Result<()> {
        self.inner.create_code(code).await
    }
    async fn find_active_codes(
        &self,
        user_id: &str,
        purpose: CodePurpose,
        reference_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Vec<VerificationCode>> {
        self.inner.find_active_codes(user_id, purpose, reference_id, now).await
    }
    async fn consume_code(&self, id: &str) -> Result<bool> {
        self.inner.consume_code(id).await
    }
    async fn delete_expired_codes(&self, user_id: &str, now: DateTime<Utc>) -> Result<u64> {
        self.inner.delete_expired_codes(user_id, now).await
    }
}

#[async_trait]
impl RecoveryMethodRepository for FlakySessions {
    async fn create_recovery_method(&self, method: &RecoveryMethod) -> Result<()> {
        self.inner.create_recovery_method(method).await
    }
    async fn find_recovery_method(&self, id: &str) -> Result<Option<RecoveryMethod>> {
        self.inner.find_recovery_method(id).await
    }
    async fn list_recovery_methods(&self, user_id: &str) -> Result<Vec<RecoveryMethod>> {
        self.inner.list_recovery_methods(user_id).await
    }
    async fn mark_recovery_method_verified(&self, id: &str) -> Result<()> {
        self.inner.mark_recovery_method_verified(id).await
    }
    async fn delete_recovery_method(&self, id: &str) -> Result<()> {
        self.inner.delete_recovery_method(id).await
    }
}

#[async_trait]
impl PasskeyRepository for FlakySessions {
    async fn create_passkey(&self, credential: &PasskeyCredential) -> Result<()> {
        self.inner.create_passkey(credential).await
    }
    async fn find_passkey(
        &self,
        user_id: &str,
        credential_id: &str,
    ) -> Result<Option<PasskeyCredential>> {
        self.inner.find_passkey(user_id, credential_id).await
    }
    async fn bump_passkey_counter(&self, id: &str) -> Result<()> {
        self.inner.bump_passkey_counter(id).await
    }
}

#[async_trait]
impl DeviceRepository for FlakySessions {
    async fn find_device(&self, id: &str) -> Result<Option<Device>> {
        self.inner.find_device(id).await
    }
    async fn find_device_by_fingerprint(
        &self,
        user_id: &str,
        fingerprint: &str,
    ) -> Result<Option<Device>> {
        self.inner.find_device_by_fingerprint(user_id, fingerprint).await
    }
    async fn list_devices(&self, user_id: &str) -> Result<Vec<Device>> {
        self.inner.list_devices(user_id).await
    }
    async fn record_device_use(
        &self,
        user_id: &str,
        fingerprint: &str,
        name: &str,
        ip: &str,
        now: DateTime<Utc>,
    ) -> Result<Device> {
        self.inner.record_device_use(user_id, fingerprint, name, ip, now).await
    }
    async fn count_trusted_devices(&self, user_id: &str) -> Result<u64> {
        self.inner.count_trusted_devices(user_id).await
    }
    async fn set_device_trust(&self, user_id: &str, device_id: &str, trusted: bool) -> Result<()> {
        self.inner.set_device_trust(user_id, device_id, trusted).await
    }
}

#[async_trait]
impl SessionRepository for FlakySessions {
    async fn create_session(&self, session: &Session) -> Result<()> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(AuthError::Internal("session insert failed".to_string()));
        }
        self.inner.create_session(session).await
    }
    async fn find_session(&self, id: &str) -> Result<Option<Session>> {
        self.inner.find_session(id).await
    }
    async fn list_live_sessions(&self, user_id: &str, now: DateTime<Utc>) -> Result<Vec<Session>> {
        self.inner.list_live_sessions(user_id, now).await
    }
    async fn list_device_sessions(&self, device_id: &str) -> Result<Vec<Session>> {
        self.inner.list_device_sessions(device_id).await
    }
    async fn set_session_expiry(&self, id: &str, expires_at: DateTime<Utc>) -> Result<()> {
        self.inner.set_session_expiry(id, expires_at).await
    }
    async fn set_session_revoke_at(&self, id: &str, revoke_at: Option<DateTime<Utc>>) -> Result<()> {
        self.inner.set_session_revoke_at(id, revoke_at).await
    }
    async fn rotate_refresh_token(
        &self,
        id: &str,
        refresh_token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.inner.rotate_refresh_token(id, refresh_token_hash, now).await
    }
    async fn revoke_session(&self, id: &str) -> Result<()> {
        self.inner.revoke_session(id).await
    }
    async fn delete_expired_sessions(&self, user_id: &str, now: DateTime<Utc>) -> Result<u64> {
        self.inner.delete_expired_sessions(user_id, now).await
    }
}

#[tokio::test]
async fn social_token_is_kept_when_the_session_cannot_be_stored() {
    let broken = Arc::new(AtomicBool::new(true));
    let flag = broken.clone();
    let ctx = TestContext::with_store(move |inner| {
        Arc::new(FlakySessions { inner, broken: flag }) as Arc<dyn Store>
    });
    let email = test_email();
    let token = social_token(&ctx, &email).await;

    TestDevice::new(FIREFOX)
        .apply(ctx.server.post("/auth/social/complete"))
        .json(&json!({ "token": &token }))
        .await
        .assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    assert!(cached(&ctx, &token).await);

    // Once storage recovers the same token still finishes the sign-in.
    broken.store(false, Ordering::SeqCst);
    TestDevice::new(FIREFOX)
        .apply(ctx.server.post("/auth/social/complete"))
        .json(&json!({ "token": &token }))
        .await
        .assert_status_ok();
    assert!(!cached(&ctx, &token).await);
}
