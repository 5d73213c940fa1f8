//! In-process store backing `STORE_BACKEND=memory` and the integration tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{AuthError, Result};
use crate::modules::auth::interface::{
    PasskeyRepository, RecoveryMethodRepository, TwoFactorSessionRepository, UserRepository,
    VerificationCodeRepository,
};
use crate::modules::auth::model::{
    CodePurpose, PasskeyCredential, RecoveryMethod, TwoFactorMethod, TwoFactorSession, User,
    VerificationCode,
};
use crate::modules::device::interface::{DeviceRepository, SessionRepository};
use crate::modules::device::model::{Device, Session};

#[derive(Default)]
struct Tables {
    users: HashMap<String, User>,
    challenges: HashMap<String, TwoFactorSession>,
    codes: HashMap<String, VerificationCode>,
    recovery_methods: HashMap<String, RecoveryMethod>,
    passkeys: HashMap<String, PasskeyCredential>,
    devices: HashMap<String, Device>,
    sessions: HashMap<String, Session>,
}

/// All tables live behind one lock, so every method is atomic the way a
/// single transaction would be.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn create_user(&self, user: &User) -> Result<()> {
        let mut t = self.tables.lock().await;
        if t.users.values().any(|u| u.email == user.email) {
            return Err(AuthError::EmailAlreadyExists);
        }
        t.users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn find_user(&self, id: &str) -> Result<Option<User>> {
        Ok(self.tables.lock().await.users.get(id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let t = self.tables.lock().await;
        Ok(t.users.values().find(|u| u.email == email).cloned())
    }

    async fn record_login_failure(
        &self,
        user_id: &str,
        max_attempts: u32,
        lock_until: DateTime<Utc>,
    ) -> Result<u32> {
        let mut t = self.tables.lock().await;
        let user = t.users.get_mut(user_id).ok_or(AuthError::UserNotFound)?;
        user.failed_login_attempts += 1;
        user.updated_at = Utc::now();
        let attempts = user.failed_login_attempts;
        if attempts >= max_attempts {
            user.failed_login_attempts = 0;
            user.locked_until = Some(lock_until);
        }
        Ok(attempts)
    }

    async fn reset_login_failures(&self, user_id: &str) -> Result<()> {
        let mut t = self.tables.lock().await;
        if let Some(user) = t.users.get_mut(user_id) {
            user.failed_login_attempts = 0;
            user.locked_until = None;
            user.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn claim_totp_step(&self, user_id: &str, step: u64) -> Result<bool> {
        let mut t = self.tables.lock().await;
        let user = t.users.get_mut(user_id).ok_or(AuthError::UserNotFound)?;
        if user.totp_last_step.is_some_and(|last| last >= step) {
            return Ok(false);
        }
        user.totp_last_step = Some(step);
        Ok(true)
    }

    async fn enable_two_factor(
        &self,
        user_id: &str,
        method: TwoFactorMethod,
        secret: Option<&str>,
    ) -> Result<()> {
        let mut t = self.tables.lock().await;
        let user = t.users.get_mut(user_id).ok_or(AuthError::UserNotFound)?;
        user.two_factor_enabled = true;
        user.two_factor_method = Some(method);
        user.two_factor_secret = secret.map(str::to_string);
        user.totp_last_step = None;
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn disable_two_factor(&self, user_id: &str) -> Result<()> {
        let mut t = self.tables.lock().await;
        let user = t.users.get_mut(user_id).ok_or(AuthError::UserNotFound)?;
        user.two_factor_enabled = false;
        user.two_factor_method = None;
        user.two_factor_secret = None;
        user.totp_last_step = None;
        user.updated_at = Utc::now();
        t.challenges.retain(|_, c| c.user_id != user_id);
        t.codes.retain(|_, c| c.user_id != user_id || c.consumed);
        Ok(())
    }
}

#[async_trait]
impl TwoFactorSessionRepository for MemoryStore {
    async fn create_challenge(&self, challenge: &TwoFactorSession) -> Result<()> {
        let mut t = self.tables.lock().await;
        t.challenges.insert(challenge.id.clone(), challenge.clone());
        Ok(())
    }

    async fn find_challenge(&self, id: &str) -> Result<Option<TwoFactorSession>> {
        Ok(self.tables.lock().await.challenges.get(id).cloned())
    }

    async fn record_challenge_failure(&self, id: &str) -> Result<u32> {
        let mut t = self.tables.lock().await;
        let challenge = t.challenges.get_mut(id).ok_or(AuthError::InvalidChallenge)?;
        challenge.failed_attempts += 1;
        Ok(challenge.failed_attempts)
    }

    async fn delete_challenge(&self, id: &str) -> Result<bool> {
        Ok(self.tables.lock().await.challenges.remove(id).is_some())
    }

    async fn delete_expired_challenges(&self, user_id: &str, now: DateTime<Utc>) -> Result<u64> {
        let mut t = self.tables.lock().await;
        let before = t.challenges.len();
        t.challenges
            .retain(|_, c| c.user_id != user_id || !c.is_expired(now));
        Ok((before - t.challenges.len()) as u64)
    }
}

#[async_trait]
impl VerificationCodeRepository for MemoryStore {
    async fn create_code(&self, code: &VerificationCode) -> Result<()> {
        self.tables
            .lock()
            .await
            .codes
            .insert(code.id.clone(), code.clone());
        Ok(())
    }

    async fn find_active_codes(
        &self,
        user_id: &str,
        purpose: CodePurpose,
        reference_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Vec<VerificationCode>> {
        let t = self.tables.lock().await;
        let mut codes: Vec<VerificationCode> = t
            .codes
            .values()
            .filter(|c| {
                c.user_id == user_id
                    && c.purpose == purpose
                    && c.reference_id.as_deref() == reference_id
                    && !c.consumed
                    && c.expires_at > now
            })
            .cloned()
            .collect();
        codes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(codes)
    }

    async fn consume_code(&self, id: &str) -> Result<bool> {
        let mut t = self.tables.lock().await;
        match t.codes.get_mut(id) {
            Some(code) if !code.consumed => {
                code.consumed = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_expired_codes(&self, user_id: &str, now: DateTime<Utc>) -> Result<u64> {
        let mut t = self.tables.lock().await;
        let before = t.codes.len();
        t.codes
            .retain(|_, c| c.user_id != user_id || (c.expires_at > now && !c.consumed));
        Ok((before - t.codes.len()) as u64)
    }
}

#[async_trait]
impl RecoveryMethodRepository for MemoryStore {
    async fn create_recovery_method(&self, method: &RecoveryMethod) -> Result<()> {
        self.tables
            .lock()
            .await
            .recovery_methods
            .insert(method.id.clone(), method.clone());
        Ok(())
    }

    async fn find_recovery_method(&self, id: &str) -> Result<Option<RecoveryMethod>> {
        Ok(self.tables.lock().await.recovery_methods.get(id).cloned())
    }

    async fn list_recovery_methods(&self, user_id: &str) -> Result<Vec<RecoveryMethod>> {
        let t = self.tables.lock().await;
        let mut methods: Vec<RecoveryMethod> = t
            .recovery_methods
            .values()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect();
        methods.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(methods)
    }

    async fn mark_recovery_method_verified(&self, id: &str) -> Result<()> {
        if let Some(method) = self.tables.lock().await.recovery_methods.get_mut(id) {
            method.verified = true;
        }
        Ok(())
    }

    async fn delete_recovery_method(&self, id: &str) -> Result<()> {
        self.tables.lock().await.recovery_methods.remove(id);
        Ok(())
    }
}

#[async_trait]
impl PasskeyRepository for MemoryStore {
    async fn create_passkey(&self, credential: &PasskeyCredential) -> Result<()> {
        let mut t = self.tables.lock().await;
        let duplicate = t.passkeys.values().any(|p| {
            p.user_id == credential.user_id && p.credential_id == credential.credential_id
        });
        if duplicate {
            return Err(AuthError::Validation("Credential already registered".into()));
        }
        t.passkeys.insert(credential.id.clone(), credential.clone());
        Ok(())
    }

    async fn find_passkey(
        &self,
        user_id: &str,
        credential_id: &str,
    ) -> Result<Option<PasskeyCredential>> {
        let t = self.tables.lock().await;
        Ok(t.passkeys
            .values()
            .find(|p| p.user_id == user_id && p.credential_id == credential_id)
            .cloned())
    }

    async fn bump_passkey_counter(&self, id: &str) -> Result<()> {
        if let Some(passkey) = self.tables.lock().await.passkeys.get_mut(id) {
            passkey.sign_count += 1;
        }
        Ok(())
    }
}

#[async_trait]
impl DeviceRepository for MemoryStore {
    async fn find_device(&self, id: &str) -> Result<Option<Device>> {
        Ok(self.tables.lock().await.devices.get(id).cloned())
    }

    async fn find_device_by_fingerprint(
        &self,
        user_id: &str,
        fingerprint: &str,
    ) -> Result<Option<Device>> {
        let t = self.tables.lock().await;
        Ok(t.devices
            .values()
            .find(|d| d.user_id == user_id && d.fingerprint == fingerprint)
            .cloned())
    }

    async fn list_devices(&self, user_id: &str) -> Result<Vec<Device>> {
        let t = self.tables.lock().await;
        let mut devices: Vec<Device> = t
            .devices
            .values()
            .filter(|d| d.user_id == user_id)
            .cloned()
            .collect();
        devices.sort_by(|a, b| b.last_used_at.cmp(&a.last_used_at));
        Ok(devices)
    }

    async fn record_device_use(
        &self,
        user_id: &str,
        fingerprint: &str,
        name: &str,
        ip: &str,
        now: DateTime<Utc>,
    ) -> Result<Device> {
        let mut t = self.tables.lock().await;

        if let Some(device) = t
            .devices
            .values_mut()
            .find(|d| d.user_id == user_id && d.fingerprint == fingerprint)
        {
            device.login_count += 1;
            device.name = name.to_string();
            device.last_ip = ip.to_string();
            device.last_used_at = now;
            return Ok(device.clone());
        }

        let device = Device {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            fingerprint: fingerprint.to_string(),
            name: name.to_string(),
            trusted: false,
            login_count: 1,
            last_ip: ip.to_string(),
            last_used_at: now,
            created_at: now,
        };
        t.devices.insert(device.id.clone(), device.clone());
        Ok(device)
    }

    async fn count_trusted_devices(&self, user_id: &str) -> Result<u64> {
        let t = self.tables.lock().await;
        Ok(t.devices
            .values()
            .filter(|d| d.user_id == user_id && d.trusted)
            .count() as u64)
    }

    async fn set_device_trust(&self, user_id: &str, device_id: &str, trusted: bool) -> Result<()> {
        let mut t = self.tables.lock().await;

        let trusted_count = t
            .devices
            .values()
            .filter(|d| d.user_id == user_id && d.trusted)
            .count();

        let device = t
            .devices
            .get_mut(device_id)
            .filter(|d| d.user_id == user_id)
            .ok_or(AuthError::NotFound("Device"))?;

        if device.trusted && !trusted && trusted_count <= 1 {
            return Err(AuthError::LastTrustedDevice);
        }

        device.trusted = trusted;
        Ok(())
    }
}

#[async_trait]
impl SessionRepository for MemoryStore {
    async fn create_session(&self, session: &Session) -> Result<()> {
        self.tables
            .lock()
            .await
            .sessions
            .insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn find_session(&self, id: &str) -> Result<Option<Session>> {
        Ok(self.tables.lock().await.sessions.get(id).cloned())
    }

    async fn list_live_sessions(&self, user_id: &str, now: DateTime<Utc>) -> Result<Vec<Session>> {
        let t = self.tables.lock().await;
        let mut sessions: Vec<Session> = t
            .sessions
            .values()
            .filter(|s| s.user_id == user_id && s.is_live(now))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.last_active_at.cmp(&a.last_active_at));
        Ok(sessions)
    }

    async fn list_device_sessions(&self, device_id: &str) -> Result<Vec<Session>> {
        let t = self.tables.lock().await;
        Ok(t.sessions
            .values()
            .filter(|s| s.device_id == device_id && !s.revoked)
            .cloned()
            .collect())
    }

    async fn set_session_expiry(&self, id: &str, expires_at: DateTime<Utc>) -> Result<()> {
        if let Some(session) = self.tables.lock().await.sessions.get_mut(id) {
            session.expires_at = expires_at;
        }
        Ok(())
    }

    async fn set_session_revoke_at(&self, id: &str, revoke_at: Option<DateTime<Utc>>) -> Result<()> {
        if let Some(session) = self.tables.lock().await.sessions.get_mut(id) {
            session.revoke_at = revoke_at;
        }
        Ok(())
    }

    async fn rotate_refresh_token(
        &self,
        id: &str,
        refresh_token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if let Some(session) = self.tables.lock().await.sessions.get_mut(id) {
            session.refresh_token_hash = refresh_token_hash.to_string();
            session.last_active_at = now;
        }
        Ok(())
    }

    async fn revoke_session(&self, id: &str) -> Result<()> {
        if let Some(session) = self.tables.lock().await.sessions.get_mut(id) {
            session.revoked = true;
        }
        Ok(())
    }

    async fn delete_expired_sessions(&self, user_id: &str, now: DateTime<Utc>) -> Result<u64> {
        let mut t = self.tables.lock().await;
        let before = t.sessions.len();
        t.sessions
            .retain(|_, s| s.user_id != user_id || s.effective_expiry() > now);
        Ok((before - t.sessions.len()) as u64)
    }
}
