use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::model::{PasskeyCredential, RecoveryMethod, TwoFactorMethod, User};
use crate::services::codes::mask_target;

lazy_static! {
    /// E.164 phone number.
    pub static ref PHONE_REGEX: Regex = Regex::new(r"^\+[1-9]\d{6,14}$").unwrap();
}

// =============================================================================
// REGISTER
// =============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,
    pub password_confirm: String,
    #[validate(regex(path = *PHONE_REGEX, message = "Phone must be in E.164 format"))]
    pub phone: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user: UserResponse,
}

// =============================================================================
// LOGIN
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
}

#[derive(Debug, Serialize)]
pub struct MethodsResponse {
    pub primary: Vec<TwoFactorMethod>,
    pub additional: Vec<TwoFactorMethod>,
}

#[derive(Debug, Serialize)]
pub struct ChallengeResponse {
    pub requires_2fa: bool,
    pub session_id: String,
    pub methods: MethodsResponse,
    pub redirect: String,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum LoginResponse {
    Tokens(TokenResponse),
    Challenge(ChallengeResponse),
}

// =============================================================================
// SOCIAL LOGIN
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct SocialCallbackQuery {
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct SocialCallbackResponse {
    pub token: String,
    pub redirect: String,
}

#[derive(Debug, Deserialize)]
pub struct SocialCompleteRequest {
    pub token: String,
}

/// Cached under `social_token:{token}` between callback and completion.
#[derive(Debug, Serialize, Deserialize)]
pub struct PendingSocialLogin {
    pub user_id: String,
    pub provider: String,
}

// =============================================================================
// TWO-FACTOR CHALLENGE
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct TwoFactorCodeRequest {
    pub session_id: String,
    pub method: TwoFactorMethod,
}

#[derive(Debug, Serialize)]
pub struct TwoFactorCodeResponse {
    pub method: TwoFactorMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TwoFactorVerifyRequest {
    pub session_id: String,
    pub method: TwoFactorMethod,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub credential_id: Option<String>,
    #[serde(default)]
    pub signature: Option<String>,
}

// =============================================================================
// LOGOUT / REFRESH
// =============================================================================

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

// =============================================================================
// ME (Current User)
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: String,
    pub email: String,
    pub phone: Option<String>,
    pub email_verified: bool,
    pub phone_verified: bool,
    pub two_factor_enabled: bool,
    pub two_factor_method: Option<TwoFactorMethod>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            phone: user.phone.clone(),
            email_verified: user.email_verified,
            phone_verified: user.phone_verified,
            two_factor_enabled: user.two_factor_enabled,
            two_factor_method: user.two_factor_method,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SecurityOverviewResponse {
    pub two_factor_enabled: bool,
    pub two_factor_method: Option<TwoFactorMethod>,
    pub trusted_devices: u64,
    pub active_sessions: usize,
    pub recovery_methods: Vec<TwoFactorMethod>,
}

// =============================================================================
// TWO-FACTOR MANAGEMENT
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct Enable2faRequest {
    pub method: TwoFactorMethod,
}

#[derive(Debug, Serialize)]
pub struct Enable2faResponse {
    pub method: TwoFactorMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otpauth_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
}

/// Cached under `2fa_setup:{user}` until confirmed.
#[derive(Debug, Serialize, Deserialize)]
pub struct PendingTwoFactorSetup {
    pub method: TwoFactorMethod,
    pub secret: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Confirm2faRequest {
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct Disable2faRequest {
    pub password: String,
}

// =============================================================================
// RECOVERY METHODS
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct AddRecoveryMethodRequest {
    pub kind: TwoFactorMethod,
    pub target: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyRecoveryMethodRequest {
    pub code: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecoveryMethodResponse {
    pub id: String,
    pub kind: TwoFactorMethod,
    pub target: String,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&RecoveryMethod> for RecoveryMethodResponse {
    fn from(method: &RecoveryMethod) -> Self {
        Self {
            id: method.id.clone(),
            kind: method.kind,
            target: mask_target(&method.target),
            verified: method.verified,
            created_at: method.created_at,
        }
    }
}

// =============================================================================
// PASSKEYS
// =============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterPasskeyRequest {
    #[validate(length(min = 1, max = 255))]
    pub credential_id: String,
    pub public_key: String,
    #[validate(length(min = 1, max = 100))]
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct PasskeyResponse {
    pub id: String,
    pub credential_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl From<&PasskeyCredential> for PasskeyResponse {
    fn from(credential: &PasskeyCredential) -> Self {
        Self {
            id: credential.id.clone(),
            credential_id: credential.credential_id.clone(),
            name: credential.name.clone(),
            created_at: credential.created_at,
        }
    }
}

// =============================================================================
// ERROR RESPONSE
// =============================================================================

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: None,
        }
    }

    pub fn with_message(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: Some(message.into()),
        }
    }
}
