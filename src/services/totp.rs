use std::time::{SystemTime, UNIX_EPOCH};
use totp_rs::{Algorithm, Secret, TOTP};

use crate::error::{AuthError, Result};

const TOTP_DIGITS: usize = 6;
const TOTP_STEP: u64 = 30;
const TOTP_SKEW: u8 = 1;
const TOTP_ISSUER: &str = "AccountGuard";

pub fn generate_secret() -> String {
    Secret::generate_secret().to_encoded().to_string()
}

fn build(secret_base32: &str, account: &str) -> Result<TOTP> {
    build_with_skew(secret_base32, account, TOTP_SKEW)
}

fn build_with_skew(secret_base32: &str, account: &str, skew: u8) -> Result<TOTP> {
    let bytes = Secret::Encoded(secret_base32.to_string())
        .to_bytes()
        .map_err(|e| AuthError::Internal(format!("invalid TOTP secret: {:?}", e)))?;

    TOTP::new(
        Algorithm::SHA1,
        TOTP_DIGITS,
        skew,
        TOTP_STEP,
        bytes,
        Some(TOTP_ISSUER.to_string()),
        account.to_string(),
    )
    .map_err(|e| AuthError::Internal(format!("TOTP setup failed: {}", e)))
}

pub fn verify(secret_base32: &str, account: &str, code: &str) -> Result<bool> {
    let totp = build(secret_base32, account)?;
    Ok(totp.check_current(code.trim()).unwrap_or(false))
}

/// The time step `code` belongs to, searched within the allowed skew. Callers
/// that must not accept a code twice record the step.
pub fn matching_step(secret_base32: &str, account: &str, code: &str) -> Result<Option<u64>> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| AuthError::Internal(format!("clock before epoch: {}", e)))?
        .as_secs();
    step_at(secret_base32, account, code, now)
}

fn step_at(secret_base32: &str, account: &str, code: &str, now: u64) -> Result<Option<u64>> {
    let exact = build_with_skew(secret_base32, account, 0)?;
    let current = now / TOTP_STEP;
    let skew = u64::from(TOTP_SKEW);
    let code = code.trim();

    Ok((current.saturating_sub(skew)..=current + skew)
        .find(|step| exact.check(code, step * TOTP_STEP)))
}

pub fn otpauth_url(secret_base32: &str, account: &str) -> Result<String> {
    Ok(build(secret_base32, account)?.get_url())
}

#[cfg(test)]
pub fn current_code(secret_base32: &str, account: &str) -> String {
    build(secret_base32, account)
        .unwrap()
        .generate_current()
        .unwrap()
}
