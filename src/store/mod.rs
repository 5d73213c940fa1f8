//! Persistence backends. Every repository trait is implemented by both the
//! MySQL store (see the `crud` module of each feature) and the in-memory store.

pub mod memory;

use crate::config::DbPool;
use crate::modules::auth::interface::{
    PasskeyRepository, RecoveryMethodRepository, TwoFactorSessionRepository, UserRepository,
    VerificationCodeRepository,
};
use crate::modules::device::interface::{DeviceRepository, SessionRepository};

pub use memory::MemoryStore;

pub trait Store:
    UserRepository
    + TwoFactorSessionRepository
    + VerificationCodeRepository
    + RecoveryMethodRepository
    + PasskeyRepository
    + DeviceRepository
    + SessionRepository
{
}

impl<T> Store for T where
    T: UserRepository
        + TwoFactorSessionRepository
        + VerificationCodeRepository
        + RecoveryMethodRepository
        + PasskeyRepository
        + DeviceRepository
        + SessionRepository
{
}

#[derive(Clone)]
pub struct MySqlStore {
    pub(crate) pool: DbPool,
}

impl MySqlStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

/// MySQL duplicate-key error (1062).
pub(crate) fn is_duplicate_key(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            db.code().as_deref() == Some("23000") || db.message().contains("Duplicate entry")
        }
        _ => false,
    }
}
