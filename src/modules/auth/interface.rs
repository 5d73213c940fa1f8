use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::model::{
    CodePurpose, PasskeyCredential, RecoveryMethod, TwoFactorMethod, TwoFactorSession, User,
    VerificationCode,
};
use crate::error::Result;

// =============================================================================
// REPOSITORY TRAITS
// =============================================================================

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Fails with `EmailAlreadyExists` on a duplicate email.
    async fn create_user(&self, user: &User) -> Result<()>;
    async fn find_user(&self, id: &str) -> Result<Option<User>>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;
    /// Counts one wrong password in a single atomic step and returns the
    /// new count. Reaching `max_attempts` sets `locked_until` to `lock_until`
    /// and restarts the count from zero.
    async fn record_login_failure(
        &self,
        user_id: &str,
        max_attempts: u32,
        lock_until: DateTime<Utc>,
    ) -> Result<u32>;
    async fn reset_login_failures(&self, user_id: &str) -> Result<()>;
    /// Marks a TOTP time step as spent. False when `step` is not newer than
    /// the last accepted one.
    async fn claim_totp_step(&self, user_id: &str, step: u64) -> Result<bool>;
    async fn enable_two_factor(
        &self,
        user_id: &str,
        method: TwoFactorMethod,
        secret: Option<&str>,
    ) -> Result<()>;
    /// Clears the 2FA settings and drops open challenges and unconsumed codes
    /// of the user in one transaction.
    async fn disable_two_factor(&self, user_id: &str) -> Result<()>;
}

#[async_trait]
pub trait TwoFactorSessionRepository: Send + Sync {
    async fn create_challenge(&self, challenge: &TwoFactorSession) -> Result<()>;
    async fn find_challenge(&self, id: &str) -> Result<Option<TwoFactorSession>>;
    /// Returns the new failure count.
    async fn record_challenge_failure(&self, id: &str) -> Result<u32>;
    /// False when the challenge was already gone.
    async fn delete_challenge(&self, id: &str) -> Result<bool>;
    async fn delete_expired_challenges(&self, user_id: &str, now: DateTime<Utc>) -> Result<u64>;
}

#[async_trait]
pub trait VerificationCodeRepository: Send + Sync {
    async fn create_code(&self, code: &VerificationCode) -> Result<()>;
    /// Unconsumed, unexpired codes, newest first.
    async fn find_active_codes(
        &self,
        user_id: &str,
        purpose: CodePurpose,
        reference_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Vec<VerificationCode>>;
    /// False when the code was consumed in the meantime.
    async fn consume_code(&self, id: &str) -> Result<bool>;
    async fn delete_expired_codes(&self, user_id: &str, now: DateTime<Utc>) -> Result<u64>;
}

#[async_trait]
pub trait RecoveryMethodRepository: Send + Sync {
    async fn create_recovery_method(&self, method: &RecoveryMethod) -> Result<()>;
    async fn find_recovery_method(&self, id: &str) -> Result<Option<RecoveryMethod>>;
    async fn list_recovery_methods(&self, user_id: &str) -> Result<Vec<RecoveryMethod>>;
    async fn mark_recovery_method_verified(&self, id: &str) -> Result<()>;
    async fn delete_recovery_method(&self, id: &str) -> Result<()>;
}

#[async_trait]
pub trait PasskeyRepository: Send + Sync {
    async fn create_passkey(&self, credential: &PasskeyCredential) -> Result<()>;
    async fn find_passkey(&self, user_id: &str, credential_id: &str)
        -> Result<Option<PasskeyCredential>>;
    async fn bump_passkey_counter(&self, id: &str) -> Result<()>;
}
