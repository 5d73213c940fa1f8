use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;

use super::interface::{
    PasskeyRepository, RecoveryMethodRepository, TwoFactorSessionRepository, UserRepository,
    VerificationCodeRepository,
};
use super::model::{
    CodePurpose, PasskeyCredential, RecoveryMethod, TwoFactorMethod, TwoFactorSession, User,
    VerificationCode,
};
use crate::error::{AuthError, Result};
use crate::store::{is_duplicate_key, MySqlStore};

#[async_trait]
impl UserRepository for MySqlStore {
    async fn create_user(&self, user: &User) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO users (id, email, phone, password_hash, email_verified, phone_verified,
                               two_factor_enabled, two_factor_method, two_factor_secret,
                               totp_last_step, failed_login_attempts, locked_until,
                               created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&user.id)
        .bind(&user.email)
        .bind(&user.phone)
        .bind(&user.password_hash)
        .bind(user.email_verified)
        .bind(user.phone_verified)
        .bind(user.two_factor_enabled)
        .bind(user.two_factor_method.map(|m| m.as_str()))
        .bind(&user.two_factor_secret)
        .bind(user.totp_last_step)
        .bind(user.failed_login_attempts)
        .bind(user.locked_until)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key(&e) => Err(AuthError::EmailAlreadyExists),
            Err(e) => Err(e.into()),
        }
    }

    async fn find_user(&self, id: &str) -> Result<Option<User>> {
        Ok(sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn record_login_failure(
        &self,
        user_id: &str,
        max_attempts: u32,
        lock_until: DateTime<Utc>,
    ) -> Result<u32> {
        let mut tx = self.pool.begin().await?;

        // The row lock taken here is held until commit, so concurrent
        // failures queue up behind each other.
        sqlx::query(
            "UPDATE users SET failed_login_attempts = failed_login_attempts + 1, updated_at = ? WHERE id = ?",
        )
        .bind(Utc::now())
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        let (attempts,): (u32,) =
            sqlx::query_as("SELECT failed_login_attempts FROM users WHERE id = ?")
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or(AuthError::UserNotFound)?;

        if attempts >= max_attempts {
            sqlx::query("UPDATE users SET failed_login_attempts = 0, locked_until = ? WHERE id = ?")
                .bind(lock_until)
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(attempts)
    }

    async fn reset_login_failures(&self, user_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE users SET failed_login_attempts = 0, locked_until = NULL, updated_at = ? WHERE id = ?",
        )
        .bind(Utc::now())
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn claim_totp_step(&self, user_id: &str, step: u64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE users SET totp_last_step = ?
            WHERE id = ? AND (totp_last_step IS NULL OR totp_last_step < ?)
            "#,
        )
        .bind(step)
        .bind(user_id)
        .bind(step)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn enable_two_factor(
        &self,
        user_id: &str,
        method: TwoFactorMethod,
        secret: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET two_factor_enabled = TRUE, two_factor_method = ?, two_factor_secret = ?,
                totp_last_step = NULL, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(method.as_str())
        .bind(secret)
        .bind(Utc::now())
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn disable_two_factor(&self, user_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE users
            SET two_factor_enabled = FALSE, two_factor_method = NULL, two_factor_secret = NULL,
                totp_last_step = NULL, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(Utc::now())
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM two_factor_sessions WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM verification_codes WHERE user_id = ? AND consumed = FALSE")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl TwoFactorSessionRepository for MySqlStore {
    async fn create_challenge(&self, challenge: &TwoFactorSession) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO two_factor_sessions (id, user_id, device_fingerprint, device_name, ip_address,
                                             primary_methods, additional_methods, failed_attempts,
                                             passkey_nonce, social_token, created_at, expires_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&challenge.id)
        .bind(&challenge.user_id)
        .bind(&challenge.device_fingerprint)
        .bind(&challenge.device_name)
        .bind(&challenge.ip_address)
        .bind(Json(&challenge.primary_methods))
        .bind(Json(&challenge.additional_methods))
        .bind(challenge.failed_attempts)
        .bind(&challenge.passkey_nonce)
        .bind(&challenge.social_token)
        .bind(challenge.created_at)
        .bind(challenge.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_challenge(&self, id: &str) -> Result<Option<TwoFactorSession>> {
        Ok(
            sqlx::query_as::<_, TwoFactorSession>("SELECT * FROM two_factor_sessions WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn record_challenge_failure(&self, id: &str) -> Result<u32> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE two_factor_sessions SET failed_attempts = failed_attempts + 1 WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let attempts: Option<(u32,)> =
            sqlx::query_as("SELECT failed_attempts FROM two_factor_sessions WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;

        tx.commit().await?;
        attempts.map(|(n,)| n).ok_or(AuthError::InvalidChallenge)
    }

    async fn delete_challenge(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM two_factor_sessions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_expired_challenges(&self, user_id: &str, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM two_factor_sessions WHERE user_id = ? AND expires_at <= ?")
            .bind(user_id)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl VerificationCodeRepository for MySqlStore {
    async fn create_code(&self, code: &VerificationCode) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO verification_codes (id, user_id, reference_id, purpose, method, code_hash,
                                            consumed, expires_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&code.id)
        .bind(&code.user_id)
        .bind(&code.reference_id)
        .bind(code.purpose.as_str())
        .bind(code.method.as_str())
        .bind(&code.code_hash)
        .bind(code.consumed)
        .bind(code.expires_at)
        .bind(code.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_active_codes(
        &self,
        user_id: &str,
        purpose: CodePurpose,
        reference_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Vec<VerificationCode>> {
        Ok(sqlx::query_as::<_, VerificationCode>(
            r#"
            SELECT * FROM verification_codes
            WHERE user_id = ? AND purpose = ? AND reference_id <=> ?
              AND consumed = FALSE AND expires_at > ?
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .bind(purpose.as_str())
        .bind(reference_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn consume_code(&self, id: &str) -> Result<bool> {
        let result =
            sqlx::query("UPDATE verification_codes SET consumed = TRUE WHERE id = ? AND consumed = FALSE")
                .bind(id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_expired_codes(&self, user_id: &str, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM verification_codes WHERE user_id = ? AND (expires_at <= ? OR consumed = TRUE)",
        )
        .bind(user_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl RecoveryMethodRepository for MySqlStore {
    async fn create_recovery_method(&self, method: &RecoveryMethod) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO recovery_methods (id, user_id, kind, target, verified, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&method.id)
        .bind(&method.user_id)
        .bind(method.kind.as_str())
        .bind(&method.target)
        .bind(method.verified)
        .bind(method.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_recovery_method(&self, id: &str) -> Result<Option<RecoveryMethod>> {
        Ok(
            sqlx::query_as::<_, RecoveryMethod>("SELECT * FROM recovery_methods WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn list_recovery_methods(&self, user_id: &str) -> Result<Vec<RecoveryMethod>> {
        Ok(sqlx::query_as::<_, RecoveryMethod>(
            "SELECT * FROM recovery_methods WHERE user_id = ? ORDER BY created_at",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn mark_recovery_method_verified(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE recovery_methods SET verified = TRUE WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_recovery_method(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM recovery_methods WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl PasskeyRepository for MySqlStore {
    async fn create_passkey(&self, credential: &PasskeyCredential) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO passkey_credentials (id, user_id, credential_id, public_key, name, sign_count, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&credential.id)
        .bind(&credential.user_id)
        .bind(&credential.credential_id)
        .bind(&credential.public_key)
        .bind(&credential.name)
        .bind(credential.sign_count)
        .bind(credential.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key(&e) => {
                Err(AuthError::Validation("Credential already registered".into()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_passkey(
        &self,
        user_id: &str,
        credential_id: &str,
    ) -> Result<Option<PasskeyCredential>> {
        Ok(sqlx::query_as::<_, PasskeyCredential>(
            "SELECT * FROM passkey_credentials WHERE user_id = ? AND credential_id = ?",
        )
        .bind(user_id)
        .bind(credential_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn bump_passkey_counter(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE passkey_credentials SET sign_count = sign_count + 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
