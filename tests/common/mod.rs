use account_guard::error::{AuthError, Result};
use account_guard::modules::auth::model::CodePurpose;
use account_guard::services::cache::MemoryCache;
use account_guard::services::codes::{CodeDelivery, CodeHasher, CodeSender};
use account_guard::services::fingerprint::{TrustedProxies, DEVICE_COOKIE};
use account_guard::services::jwt::JwtService;
use account_guard::services::social::{SocialProfile, SocialProvider};
use account_guard::store::{MemoryStore, Store};
use account_guard::{create_app, AppState};
use async_trait::async_trait;
use axum::http::{header, HeaderName, HeaderValue};
use axum_extra::extract::cookie::Cookie;
use axum_test::{TestRequest, TestResponse, TestServer};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use totp_rs::{Algorithm, Secret, TOTP};

pub const FIREFOX: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:120.0) Gecko/20100101 Firefox/120.0";
pub const CHROME: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

/// Records every code instead of mailing it.
#[derive(Default)]
pub struct Outbox {
    sent: Mutex<Vec<CodeDelivery>>,
}

#[allow(dead_code)]
impl Outbox {
    pub fn last_code_to(&self, target: &str) -> Option<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|d| d.target == target)
            .map(|d| d.code.clone())
    }

    pub fn count_for(&self, purpose: CodePurpose) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|d| d.purpose == purpose)
            .count()
    }
}

pub struct RecordingSender(pub Arc<Outbox>);

#[async_trait]
impl CodeSender for RecordingSender {
    async fn send(&self, delivery: &CodeDelivery) -> Result<()> {
        self.0.sent.lock().unwrap().push(delivery.clone());
        Ok(())
    }
}

/// Accepts any code for "google"; the code doubles as the verified email.
pub struct FakeSocial;

#[async_trait]
impl SocialProvider for FakeSocial {
    async fn exchange_code(&self, provider: &str, code: &str) -> Result<SocialProfile> {
        if provider != "google" {
            return Err(AuthError::UnknownProvider(provider.to_string()));
        }
        Ok(SocialProfile {
            provider: provider.to_string(),
            email: code.to_lowercase(),
        })
    }
}

/// A browser identified by its User-Agent and client address. Like a real
/// browser it keeps the device cookie handed out at sign-in.
#[derive(Clone)]
pub struct TestDevice {
    pub user_agent: &'static str,
    pub ip: String,
    cookie: Arc<Mutex<Option<String>>>,
}

#[allow(dead_code)]
impl TestDevice {
    pub fn new(user_agent: &'static str) -> Self {
        let id = uuid::Uuid::new_v4().as_u128();
        Self {
            user_agent,
            ip: format!("10.{}.{}.{}", (id >> 16) as u8, (id >> 8) as u8, id as u8),
            cookie: Arc::default(),
        }
    }

    /// The fingerprint the server pinned on this device.
    pub fn fingerprint(&self) -> String {
        self.cookie
            .lock()
            .unwrap()
            .clone()
            .expect("device has not signed in yet")
    }

    /// Same browser and address, fresh cookie jar.
    pub fn without_cookie(&self) -> Self {
        Self {
            user_agent: self.user_agent,
            ip: self.ip.clone(),
            cookie: Arc::default(),
        }
    }

    /// Sends a chosen `device_fp` cookie from now on.
    pub fn pin(&self, fingerprint: &str) {
        *self.cookie.lock().unwrap() = Some(fingerprint.to_string());
    }

    pub fn remember(&self, response: &TestResponse) {
        let pinned = response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(|v| Cookie::parse(v.to_string()).ok())
            .find(|c| c.name() == DEVICE_COOKIE);
        if let Some(cookie) = pinned {
            self.pin(cookie.value());
        }
    }

    pub fn apply(&self, request: TestRequest) -> TestRequest {
        let request = request
            .add_header(header::USER_AGENT, HeaderValue::from_static(self.user_agent))
            .add_header(
                HeaderName::from_static("x-forwarded-for"),
                HeaderValue::from_str(&self.ip).unwrap(),
            );
        match self.cookie.lock().unwrap().clone() {
            Some(fp) => request.add_header(
                header::COOKIE,
                HeaderValue::from_str(&format!("{}={}", DEVICE_COOKIE, fp)).unwrap(),
            ),
            None => request,
        }
    }
}

// Allow dead_code for utilities used by other test files
#[allow(dead_code)]
pub struct TestContext {
    pub server: TestServer,
    pub store: Arc<MemoryStore>,
    pub cache: Arc<MemoryCache>,
    pub outbox: Arc<Outbox>,
}

#[allow(dead_code)]
impl TestContext {
    pub fn new() -> Self {
        // The harness has no socket peer; each device sets its own address.
        Self::build(TrustedProxies::Any, |store| store as Arc<dyn Store>)
    }

    /// Serves the app over a store built around the shared in-memory one.
    pub fn with_store(wrap: impl FnOnce(Arc<MemoryStore>) -> Arc<dyn Store>) -> Self {
        Self::build(TrustedProxies::Any, wrap)
    }

    /// Forwarding headers are not believed, as when no proxy is configured.
    pub fn without_proxies() -> Self {
        Self::build(TrustedProxies::None, |store| store as Arc<dyn Store>)
    }

    fn build(
        trusted_proxies: TrustedProxies,
        wrap: impl FnOnce(Arc<MemoryStore>) -> Arc<dyn Store>,
    ) -> Self {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(MemoryCache::new());
        let outbox = Arc::new(Outbox::default());

        let app = create_app(AppState {
            store: wrap(store.clone()),
            cache: cache.clone(),
            jwt_service: JwtService::new("test-secret-key-for-testing-only".to_string()),
            code_hasher: CodeHasher::new("test-code-secret"),
            code_sender: Arc::new(RecordingSender(outbox.clone())),
            social: Arc::new(FakeSocial),
            rate_limit_burst: 10_000,
            trusted_proxies,
        });
        let server = TestServer::new(app).expect("Failed to create test server");

        Self {
            server,
            store,
            cache,
            outbox,
        }
    }

    pub async fn register(&self, email: &str) {
        self.server
            .post("/auth/register")
            .json(&json!({
                "email": email,
                "password": test_password(),
                "password_confirm": test_password()
            }))
            .await
            .assert_status(axum::http::StatusCode::CREATED);
    }

    pub async fn login(&self, email: &str, device: &TestDevice) -> TestResponse {
        let response = device
            .apply(self.server.post("/auth/login"))
            .json(&json!({
                "email": email,
                "password": test_password()
            }))
            .await;
        device.remember(&response);
        response
    }

    /// Logs in on a path expected to skip the second factor.
    pub async fn login_tokens(&self, email: &str, device: &TestDevice) -> Tokens {
        let response = self.login(email, device).await;
        response.assert_status_ok();
        Tokens::from_body(&response.json())
    }

    pub async fn user_id(&self, tokens: &Tokens) -> String {
        let body: Value = self
            .server
            .get("/auth/me")
            .authorization_bearer(&tokens.access)
            .await
            .json();
        body["id"].as_str().unwrap().to_string()
    }

    /// Enables TOTP and returns the secret.
    pub async fn enable_totp(&self, email: &str, tokens: &Tokens) -> String {
        let body: Value = self
            .server
            .post("/auth/2fa/enable")
            .authorization_bearer(&tokens.access)
            .json(&json!({ "method": "totp" }))
            .await
            .json();
        let secret = body["secret"].as_str().unwrap().to_string();

        self.server
            .post("/auth/2fa/confirm")
            .authorization_bearer(&tokens.access)
            .json(&json!({ "code": totp_code(&secret, email) }))
            .await
            .assert_status_ok();

        secret
    }

    /// Adds a recovery email and verifies it with the delivered code.
    pub async fn add_recovery_email(&self, tokens: &Tokens, target: &str) -> String {
        let response = self
            .server
            .post("/auth/recovery-methods")
            .authorization_bearer(&tokens.access)
            .json(&json!({ "kind": "recovery_email", "target": target }))
            .await;
        response.assert_status(axum::http::StatusCode::CREATED);
        let id = response.json::<Value>()["id"].as_str().unwrap().to_string();

        let code = self.outbox.last_code_to(target).unwrap();
        self.server
            .post(&format!("/auth/recovery-methods/{}/verify", id))
            .authorization_bearer(&tokens.access)
            .json(&json!({ "code": code }))
            .await
            .assert_status_ok();

        id
    }

    pub async fn verify_2fa(&self, session_id: &str, method: &str, code: &str) -> TestResponse {
        self.server
            .post("/auth/2fa/verify")
            .json(&json!({
                "session_id": session_id,
                "method": method,
                "code": code
            }))
            .await
    }
}

#[derive(Debug, Clone)]
pub struct Tokens {
    pub access: String,
    pub refresh: String,
}

impl Tokens {
    pub fn from_body(body: &Value) -> Self {
        Self {
            access: body["access_token"].as_str().unwrap().to_string(),
            refresh: body["refresh_token"].as_str().unwrap().to_string(),
        }
    }
}

pub fn totp_code(secret: &str, email: &str) -> String {
    TOTP::new(
        Algorithm::SHA1,
        6,
        1,
        30,
        Secret::Encoded(secret.to_string()).to_bytes().unwrap(),
        Some("AccountGuard".to_string()),
        email.to_string(),
    )
    .unwrap()
    .generate_current()
    .unwrap()
}

// Helper to generate unique test email
#[allow(dead_code)]
pub fn test_email() -> String {
    format!("test_{}@example.com", uuid::Uuid::new_v4())
}

// Helper to generate test password
#[allow(dead_code)]
pub fn test_password() -> &'static str {
    "TestPassword123!"
}
