use thiserror::Error;

/// Crate-wide error type for domain-level failures (no I/O lives here).
#[derive(Error, Debug)]
pub enum VaultError {
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("unrecognized currency: {0}")]
    InvalidCurrency(String),

    #[error("invalid protocol tag: {0}")]
    InvalidProtocol(String),

    #[error("invalid authorization status: {0}")]
    InvalidStatus(String),
}

pub type Result<T> = std::result::Result<T, VaultError>;
