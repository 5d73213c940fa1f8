use base64::{engine::general_purpose::STANDARD, Engine as _};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};

use crate::error::{AuthError, Result};

/// Decodes and validates a base64 Ed25519 public key.
pub fn parse_public_key(encoded: &str) -> Result<Vec<u8>> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|_| AuthError::Validation("Public key must be base64".into()))?;
    let array: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| AuthError::Validation("Public key must be 32 bytes".into()))?;
    VerifyingKey::from_bytes(&array)
        .map_err(|_| AuthError::Validation("Invalid public key".into()))?;
    Ok(bytes)
}

/// Checks a base64 signature over the challenge nonce.
pub fn verify_assertion(public_key: &[u8], nonce: &str, signature_b64: &str) -> bool {
    let Ok(array) = <[u8; 32]>::try_from(public_key) else {
        return false;
    };
    let Ok(key) = VerifyingKey::from_bytes(&array) else {
        return false;
    };
    let Ok(raw) = STANDARD.decode(signature_b64.trim()) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(&raw) else {
        return false;
    };
    key.verify(nonce.as_bytes(), &signature).is_ok()
}
