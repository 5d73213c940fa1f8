use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Script};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::error::Result;

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
    async fn delete_many(&self, keys: &[String]) -> Result<()>;
    /// Increments a counter, starting its TTL window on the first hit.
    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<i64>;
}

pub async fn get_json<T: DeserializeOwned>(cache: &dyn Cache, key: &str) -> Option<T> {
    match cache.get(key).await {
        Ok(Some(raw)) => serde_json::from_str(&raw).ok(),
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(key, error = %e, "cache read failed");
            None
        }
    }
}

pub async fn set_json<T: Serialize>(cache: &dyn Cache, key: &str, value: &T, ttl: Duration) {
    let result = match serde_json::to_string(value) {
        Ok(raw) => cache.set(key, &raw, ttl).await,
        Err(e) => Err(e.into()),
    };
    if let Err(e) = result {
        tracing::warn!(key, error = %e, "cache write failed");
    }
}

/// Deletes keys, logging instead of failing: a stale entry only costs a
/// store round-trip on the next read.
pub async fn invalidate(cache: &dyn Cache, keys: &[String]) {
    if keys.is_empty() {
        return;
    }
    if let Err(e) = cache.delete_many(keys).await {
        tracing::warn!(count = keys.len(), error = %e, "cache invalidation failed");
    }
}

pub mod keys {
    pub fn challenge(id: &str) -> String {
        format!("2fa_session:{}", id)
    }

    pub fn trusted_device(user_id: &str, fingerprint: &str) -> String {
        format!("trusted_device:{}:{}", user_id, fingerprint)
    }

    pub fn social_token(token: &str) -> String {
        format!("social_token:{}", token)
    }

    pub fn two_factor_setup(user_id: &str) -> String {
        format!("2fa_setup:{}", user_id)
    }

    pub fn session(id: &str) -> String {
        format!("session:{}", id)
    }

    pub fn user_devices(id: &str) -> String {
        format!("user:{}:devices", id)
    }

    pub fn user_sessions(id: &str) -> String {
        format!("user:{}:sessions", id)
    }

    pub fn user_security_overview(id: &str) -> String {
        format!("user:{}:security_overview", id)
    }

    pub fn user_profile(id: &str) -> String {
        format!("user:{}:profile", id)
    }

    pub fn user_recovery_methods(id: &str) -> String {
        format!("user:{}:recovery_methods", id)
    }

    pub fn login_rate(ip: &str) -> String {
        format!("rate:login:{}", ip)
    }

    pub fn code_send_rate(challenge_id: &str) -> String {
        format!("rate:2fa_send:{}", challenge_id)
    }

    /// Keys derived from a user's security state.
    pub fn user_security(id: &str) -> Vec<String> {
        vec![
            user_devices(id),
            user_sessions(id),
            user_security_overview(id),
            user_profile(id),
            user_recovery_methods(id),
        ]
    }
}

// =============================================================================
// REDIS
// =============================================================================

#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, value, ttl.as_secs().max(1)).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn delete_many(&self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let _: () = conn.del(keys).await?;
        Ok(())
    }

    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<i64> {
        let mut conn = self.conn.clone();
        let script = Script::new(
            r"
            local current = redis.call('INCR', KEYS[1])
            if current == 1 then
                redis.call('EXPIRE', KEYS[1], ARGV[1])
            end
            return current
            ",
        );
        Ok(script
            .key(key)
            .arg(ttl.as_secs().max(1))
            .invoke_async(&mut conn)
            .await?)
    }
}

// =============================================================================
// IN-MEMORY
// =============================================================================

#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some((_, expires)) if *expires <= Instant::now() => {
                entries.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn delete_many(&self, keys: &[String]) -> Result<()> {
        let mut entries = self.entries.lock().await;
        for key in keys {
            entries.remove(key);
        }
        Ok(())
    }

    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<i64> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();

        let (count, expires) = match entries.get(key) {
            Some((value, expires)) if *expires > now => {
                (value.parse::<i64>().unwrap_or(0) + 1, *expires)
            }
            _ => (1, now + ttl),
        };
        entries.insert(key.to_string(), (count.to_string(), expires));
        Ok(count)
    }
}
