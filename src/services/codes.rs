use async_trait::async_trait;
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;

use crate::error::{AuthError, Result};
use crate::modules::auth::model::{CodePurpose, TwoFactorMethod};

type HmacSha256 = Hmac<Sha256>;

/// Six-digit numeric one-time code.
pub fn generate_code() -> String {
    format!("{:06}", rand::rng().random_range(0..1_000_000u32))
}

/// Random hex nonce used for passkey assertions.
pub fn generate_nonce() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    hex::encode(bytes)
}

pub struct CodeHasher {
    key: Vec<u8>,
}

impl CodeHasher {
    pub fn new(secret: &str) -> Self {
        Self {
            key: secret.as_bytes().to_vec(),
        }
    }

    fn mac(&self, code: &str) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| AuthError::Internal(format!("code hasher key: {}", e)))?;
        mac.update(code.trim().as_bytes());
        Ok(mac)
    }

    pub fn hash(&self, code: &str) -> Result<String> {
        Ok(hex::encode(self.mac(code)?.finalize().into_bytes()))
    }

    /// Constant-time comparison against a stored hash.
    pub fn matches(&self, code: &str, stored_hash: &str) -> bool {
        let Ok(expected) = hex::decode(stored_hash) else {
            return false;
        };
        match self.mac(code) {
            Ok(mac) => mac.verify_slice(&expected).is_ok(),
            Err(_) => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CodeDelivery {
    pub user_id: String,
    pub channel: TwoFactorMethod,
    pub target: String,
    pub code: String,
    pub purpose: CodePurpose,
}

/// Outbound channel for one-time codes (mail and SMS gateways).
#[async_trait]
pub trait CodeSender: Send + Sync {
    async fn send(&self, delivery: &CodeDelivery) -> Result<()>;
}

/// Logs deliveries instead of sending them. Used when no gateway is wired in.
pub struct LogCodeSender;

#[async_trait]
impl CodeSender for LogCodeSender {
    async fn send(&self, delivery: &CodeDelivery) -> Result<()> {
        tracing::info!(
            user_id = %delivery.user_id,
            channel = delivery.channel.as_str(),
            purpose = delivery.purpose.as_str(),
            target = %mask_target(&delivery.target),
            "verification code issued"
        );
        Ok(())
    }
}

/// "j***@example.com", "+4*******89".
pub fn mask_target(target: &str) -> String {
    if let Some((local, domain)) = target.split_once('@') {
        let first: String = local.chars().take(1).collect();
        return format!("{}***@{}", first, domain);
    }
    let chars: Vec<char> = target.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..2].iter().collect();
    let tail: String = chars[chars.len() - 2..].iter().collect();
    format!("{}{}{}", head, "*".repeat(chars.len() - 4), tail)
}
