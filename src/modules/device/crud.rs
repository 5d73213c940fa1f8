use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::interface::{DeviceRepository, SessionRepository};
use super::model::{Device, Session};
use crate::error::{AuthError, Result};
use crate::store::MySqlStore;

#[async_trait]
impl DeviceRepository for MySqlStore {
    async fn find_device(&self, id: &str) -> Result<Option<Device>> {
        Ok(sqlx::query_as::<_, Device>("SELECT * FROM devices WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_device_by_fingerprint(
        &self,
        user_id: &str,
        fingerprint: &str,
    ) -> Result<Option<Device>> {
        Ok(
            sqlx::query_as::<_, Device>("SELECT * FROM devices WHERE user_id = ? AND fingerprint = ?")
                .bind(user_id)
                .bind(fingerprint)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn list_devices(&self, user_id: &str) -> Result<Vec<Device>> {
        Ok(sqlx::query_as::<_, Device>(
            "SELECT * FROM devices WHERE user_id = ? ORDER BY last_used_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn record_device_use(
        &self,
        user_id: &str,
        fingerprint: &str,
        name: &str,
        ip: &str,
        now: DateTime<Utc>,
    ) -> Result<Device> {
        sqlx::query(
            r#"
            INSERT INTO devices (id, user_id, fingerprint, name, trusted, login_count, last_ip, last_used_at, created_at)
            VALUES (?, ?, ?, ?, FALSE, 1, ?, ?, ?)
            ON DUPLICATE KEY UPDATE
                login_count = login_count + 1,
                name = VALUES(name),
                last_ip = VALUES(last_ip),
                last_used_at = VALUES(last_used_at)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(fingerprint)
        .bind(name)
        .bind(ip)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.find_device_by_fingerprint(user_id, fingerprint)
            .await?
            .ok_or_else(|| AuthError::Internal("device row missing after upsert".into()))
    }

    async fn count_trusted_devices(&self, user_id: &str) -> Result<u64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM devices WHERE user_id = ? AND trusted = TRUE")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u64)
    }

    async fn set_device_trust(&self, user_id: &str, device_id: &str, trusted: bool) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let current: Option<(bool,)> =
            sqlx::query_as("SELECT trusted FROM devices WHERE id = ? AND user_id = ? FOR UPDATE")
                .bind(device_id)
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await?;

        let Some((currently_trusted,)) = current else {
            return Err(AuthError::NotFound("Device"));
        };

        if currently_trusted && !trusted {
            let (count,): (i64,) = sqlx::query_as(
                "SELECT COUNT(*) FROM devices WHERE user_id = ? AND trusted = TRUE FOR UPDATE",
            )
            .bind(user_id)
            .fetch_one(&mut *tx)
            .await?;

            if count <= 1 {
                return Err(AuthError::LastTrustedDevice);
            }
        }

        sqlx::query("UPDATE devices SET trusted = ? WHERE id = ?")
            .bind(trusted)
            .bind(device_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl SessionRepository for MySqlStore {
    async fn create_session(&self, session: &Session) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (id, user_id, device_id, refresh_token_hash, ip_address, location,
                                  created_at, last_active_at, expires_at, revoke_at, revoked)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.id)
        .bind(&session.user_id)
        .bind(&session.device_id)
        .bind(&session.refresh_token_hash)
        .bind(&session.ip_address)
        .bind(&session.location)
        .bind(session.created_at)
        .bind(session.last_active_at)
        .bind(session.expires_at)
        .bind(session.revoke_at)
        .bind(session.revoked)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_session(&self, id: &str) -> Result<Option<Session>> {
        Ok(sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_live_sessions(&self, user_id: &str, now: DateTime<Utc>) -> Result<Vec<Session>> {
        Ok(sqlx::query_as::<_, Session>(
            r#"
            SELECT * FROM sessions
            WHERE user_id = ? AND revoked = FALSE AND expires_at > ?
              AND (revoke_at IS NULL OR revoke_at > ?)
            ORDER BY last_active_at DESC
            "#,
        )
        .bind(user_id)
        .bind(now)
        .bind(now)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn list_device_sessions(&self, device_id: &str) -> Result<Vec<Session>> {
        Ok(
            sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE device_id = ? AND revoked = FALSE")
                .bind(device_id)
                .fetch_all(&self.pool)
                .await?,
        )
    }

    async fn set_session_expiry(&self, id: &str, expires_at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE sessions SET expires_at = ? WHERE id = ?")
            .bind(expires_at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_session_revoke_at(&self, id: &str, revoke_at: Option<DateTime<Utc>>) -> Result<()> {
        sqlx::query("UPDATE sessions SET revoke_at = ? WHERE id = ?")
            .bind(revoke_at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn rotate_refresh_token(
        &self,
        id: &str,
        refresh_token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("UPDATE sessions SET refresh_token_hash = ?, last_active_at = ? WHERE id = ?")
            .bind(refresh_token_hash)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn revoke_session(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE sessions SET revoked = TRUE WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_expired_sessions(&self, user_id: &str, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM sessions
            WHERE user_id = ? AND (expires_at <= ? OR (revoke_at IS NOT NULL AND revoke_at <= ?))
            "#,
        )
        .bind(user_id)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
