use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::model::{Device, Session};
use crate::error::Result;

#[async_trait]
pub trait DeviceRepository: Send + Sync {
    async fn find_device(&self, id: &str) -> Result<Option<Device>>;
    async fn find_device_by_fingerprint(
        &self,
        user_id: &str,
        fingerprint: &str,
    ) -> Result<Option<Device>>;
    async fn list_devices(&self, user_id: &str) -> Result<Vec<Device>>;
    /// Creates the device on first sight, otherwise bumps its usage counters.
    async fn record_device_use(
        &self,
        user_id: &str,
        fingerprint: &str,
        name: &str,
        ip: &str,
        now: DateTime<Utc>,
    ) -> Result<Device>;
    async fn count_trusted_devices(&self, user_id: &str) -> Result<u64>;
    /// Flips the trust flag. Untrusting the last trusted device fails with
    /// `LastTrustedDevice`; the count and the write happen atomically.
    async fn set_device_trust(&self, user_id: &str, device_id: &str, trusted: bool) -> Result<()>;
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn create_session(&self, session: &Session) -> Result<()>;
    async fn find_session(&self, id: &str) -> Result<Option<Session>>;
    async fn list_live_sessions(&self, user_id: &str, now: DateTime<Utc>) -> Result<Vec<Session>>;
    async fn list_device_sessions(&self, device_id: &str) -> Result<Vec<Session>>;
    async fn set_session_expiry(&self, id: &str, expires_at: DateTime<Utc>) -> Result<()>;
    /// Schedules (or with `None` cancels) an early end for the session.
    async fn set_session_revoke_at(&self, id: &str, revoke_at: Option<DateTime<Utc>>) -> Result<()>;
    async fn rotate_refresh_token(
        &self,
        id: &str,
        refresh_token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<()>;
    async fn revoke_session(&self, id: &str) -> Result<()>;
    async fn delete_expired_sessions(&self, user_id: &str, now: DateTime<Utc>) -> Result<u64>;
}
