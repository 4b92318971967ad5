use thiserror::Error;

/// Persistence-layer error type, grounded on `cyxcloud-metadata::postgres::DbError`.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("invalid row data: {0}")]
    Invalid(#[from] vault_core::VaultError),

    #[error("limit {0} exceeds maximum of 1000")]
    LimitTooLarge(i64),
}

pub type Result<T> = std::result::Result<T, StoreError>;
