use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Session lifetime on a device the user marked as trusted.
pub const TRUSTED_SESSION_DAYS: i64 = 150;
/// Session lifetime on any other device.
pub const UNTRUSTED_SESSION_DAYS: i64 = 28;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub user_id: String,
    pub fingerprint: String,
    pub name: String,
    pub trusted: bool,
    pub login_count: u32,
    pub last_ip: String,
    pub last_used_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub device_id: String,
    pub refresh_token_hash: String,
    pub ip_address: String,
    pub location: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Early revocation scheduled independently of the trust window.
    pub revoke_at: Option<DateTime<Utc>>,
    pub revoked: bool,
}

impl Session {
    pub fn effective_expiry(&self) -> DateTime<Utc> {
        match self.revoke_at {
            Some(revoke_at) if revoke_at < self.expires_at => revoke_at,
            _ => self.expires_at,
        }
    }

    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && self.effective_expiry() > now
    }
}

pub fn session_window(trusted: bool) -> Duration {
    if trusted {
        Duration::days(TRUSTED_SESSION_DAYS)
    } else {
        Duration::days(UNTRUSTED_SESSION_DAYS)
    }
}

/// Expiry of a session started at `created_at` on a device with the given
/// trust. `revoke_at` is left to bound the result through `effective_expiry`.
pub fn recalculate_expiry(created_at: DateTime<Utc>, trusted: bool) -> DateTime<Utc> {
    created_at + session_window(trusted)
}
