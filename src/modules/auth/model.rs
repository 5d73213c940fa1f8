use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{mysql::MySqlRow, FromRow, Row};

/// A second-factor channel. The first three can be a user's configured
/// method; the last three are recovery channels that must be whitelisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TwoFactorMethod {
    Totp,
    Email,
    Sms,
    RecoveryEmail,
    RecoveryPhone,
    Passkey,
}

impl TwoFactorMethod {
    pub const ADDITIONAL: [TwoFactorMethod; 3] = [
        TwoFactorMethod::RecoveryEmail,
        TwoFactorMethod::RecoveryPhone,
        TwoFactorMethod::Passkey,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Totp => "totp",
            Self::Email => "email",
            Self::Sms => "sms",
            Self::RecoveryEmail => "recovery_email",
            Self::RecoveryPhone => "recovery_phone",
            Self::Passkey => "passkey",
        }
    }

    pub fn is_primary(&self) -> bool {
        matches!(self, Self::Totp | Self::Email | Self::Sms)
    }

    /// Methods that deliver a one-time code to an address.
    pub fn sends_code(&self) -> bool {
        matches!(
            self,
            Self::Email | Self::Sms | Self::RecoveryEmail | Self::RecoveryPhone
        )
    }
}

impl TryFrom<String> for TwoFactorMethod {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "totp" => Ok(Self::Totp),
            "email" => Ok(Self::Email),
            "sms" => Ok(Self::Sms),
            "recovery_email" => Ok(Self::RecoveryEmail),
            "recovery_phone" => Ok(Self::RecoveryPhone),
            "passkey" => Ok(Self::Passkey),
            other => Err(format!("unknown two-factor method: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: String,
    pub email: String,
    pub phone: Option<String>,
    pub password_hash: String,
    pub email_verified: bool,
    pub phone_verified: bool,
    pub two_factor_enabled: bool,
    pub two_factor_method: Option<TwoFactorMethod>,
    pub two_factor_secret: Option<String>,
    /// Last TOTP time step accepted at a challenge.
    pub totp_last_step: Option<u64>,
    pub failed_login_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| until > now)
    }
}

impl<'r> FromRow<'r, MySqlRow> for User {
    fn from_row(row: &'r MySqlRow) -> Result<Self, sqlx::Error> {
        let method: Option<String> = row.try_get("two_factor_method")?;
        let two_factor_method = method
            .map(TwoFactorMethod::try_from)
            .transpose()
            .map_err(|e| sqlx::Error::ColumnDecode {
                index: "two_factor_method".to_string(),
                source: e.into(),
            })?;

        Ok(Self {
            id: row.try_get("id")?,
            email: row.try_get("email")?,
            phone: row.try_get("phone")?,
            password_hash: row.try_get("password_hash")?,
            email_verified: row.try_get("email_verified")?,
            phone_verified: row.try_get("phone_verified")?,
            two_factor_enabled: row.try_get("two_factor_enabled")?,
            two_factor_method,
            two_factor_secret: row.try_get("two_factor_secret")?,
            totp_last_step: row.try_get("totp_last_step")?,
            failed_login_attempts: row.try_get("failed_login_attempts")?,
            locked_until: row.try_get("locked_until")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Pending second-factor challenge created at login.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TwoFactorSession {
    pub id: String,
    pub user_id: String,
    pub device_fingerprint: String,
    pub device_name: String,
    pub ip_address: String,
    #[sqlx(json)]
    pub primary_methods: Vec<TwoFactorMethod>,
    #[sqlx(json)]
    pub additional_methods: Vec<TwoFactorMethod>,
    pub failed_attempts: u32,
    pub passkey_nonce: String,
    pub social_token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl TwoFactorSession {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodePurpose {
    Login,
    EnableTwoFactor,
    RecoveryMethod,
}

impl CodePurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::EnableTwoFactor => "enable_two_factor",
            Self::RecoveryMethod => "recovery_method",
        }
    }
}

impl TryFrom<String> for CodePurpose {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "login" => Ok(Self::Login),
            "enable_two_factor" => Ok(Self::EnableTwoFactor),
            "recovery_method" => Ok(Self::RecoveryMethod),
            other => Err(format!("unknown code purpose: {}", other)),
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct VerificationCode {
    pub id: String,
    pub user_id: String,
    /// Challenge id for login codes, recovery method id for whitelist codes.
    pub reference_id: Option<String>,
    #[sqlx(try_from = "String")]
    pub purpose: CodePurpose,
    #[sqlx(try_from = "String")]
    pub method: TwoFactorMethod,
    pub code_hash: String,
    pub consumed: bool,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Whitelisted recovery channel. Only verified rows are offered at login.
#[derive(Debug, Clone, FromRow)]
pub struct RecoveryMethod {
    pub id: String,
    pub user_id: String,
    #[sqlx(try_from = "String")]
    pub kind: TwoFactorMethod,
    pub target: String,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct PasskeyCredential {
    pub id: String,
    pub user_id: String,
    pub credential_id: String,
    pub public_key: Vec<u8>,
    pub name: String,
    pub sign_count: u32,
    pub created_at: DateTime<Utc>,
}
