pub mod cache;
pub mod codes;
pub mod fingerprint;
pub mod hashing;
pub mod jwt;
pub mod passkey;
pub mod rate_limit;
pub mod security;
pub mod social;
pub mod totp;
