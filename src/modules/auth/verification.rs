use chrono::{Duration, Utc};
use uuid::Uuid;

use super::interface::VerificationCodeRepository;
use super::model::{CodePurpose, TwoFactorMethod, VerificationCode};
use crate::error::Result;
use crate::services::codes::{generate_code, CodeDelivery};
use crate::AppState;

const CODE_TTL_MINUTES: i64 = 10;

/// Generates a one-time code, stores its hash and hands the plain code to
/// the delivery channel.
pub async fn issue_code(
    state: &AppState,
    user_id: &str,
    reference_id: Option<&str>,
    purpose: CodePurpose,
    method: TwoFactorMethod,
    target: &str,
) -> Result<()> {
    let code = generate_code();
    let now = Utc::now();

    let record = VerificationCode {
        id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        reference_id: reference_id.map(str::to_string),
        purpose,
        method,
        code_hash: state.code_hasher.hash(&code)?,
        consumed: false,
        expires_at: now + Duration::minutes(CODE_TTL_MINUTES),
        created_at: now,
    };
    state.store.create_code(&record).await?;

    state
        .code_sender
        .send(&CodeDelivery {
            user_id: user_id.to_string(),
            channel: method,
            target: target.to_string(),
            code,
            purpose,
        })
        .await
}

/// Consumes the matching active code. Returns false when nothing matches.
pub async fn redeem_code(
    state: &AppState,
    user_id: &str,
    reference_id: Option<&str>,
    purpose: CodePurpose,
    method: TwoFactorMethod,
    code: &str,
) -> Result<bool> {
    let active = state
        .store
        .find_active_codes(user_id, purpose, reference_id, Utc::now())
        .await?;

    let matched = active
        .iter()
        .filter(|c| c.method == method)
        .find(|c| state.code_hasher.matches(code, &c.code_hash));

    match matched {
        Some(record) => state.store.consume_code(&record.id).await,
        None => Ok(false),
    }
}
