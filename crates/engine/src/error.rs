//! The module contains the error the engine can throw.
//!
//! The errors are:
//!
//! - [`Validation`] thrown when an input is rejected before any write.
//! - [`MissingReason`] thrown when a balance change has no audit reason.
//! - [`InsufficientBalance`] thrown when a change would overdraw a pool.
//! - [`KeyNotFound`] thrown when an item is not found in the organization.
//! - [`ExistingKey`] thrown on unique conflicts.
//! - [`Consistency`] thrown when an operation would leave ledger effects
//!   unaccounted for.
//!
//!  [`Validation`]: EngineError::Validation
//!  [`MissingReason`]: EngineError::MissingReason
//!  [`InsufficientBalance`]: EngineError::InsufficientBalance
//!  [`KeyNotFound`]: EngineError::KeyNotFound
//!  [`ExistingKey`]: EngineError::ExistingKey
//!  [`Consistency`]: EngineError::Consistency
use sea_orm::{DbErr, SqlErr};
use thiserror::Error;

/// Engine custom errors.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Balance change without an audit reason")]
    MissingReason,
    #[error("Insufficient balance: {0}")]
    InsufficientBalance(String),
    #[error("\"{0}\" key not found!")]
    KeyNotFound(String),
    #[error("\"{0}\" already present!")]
    ExistingKey(String),
    #[error("Consistency violation: {0}")]
    Consistency(String),
    #[error("Invalid id: {0}")]
    InvalidId(String),
    #[error(transparent)]
    Database(DbErr),
}

impl From<DbErr> for EngineError {
    fn from(err: DbErr) -> Self {
        match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(detail)) => Self::ExistingKey(detail),
            _ => Self::Database(err),
        }
    }
}

impl PartialEq for EngineError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Validation(a), Self::Validation(b)) => a == b,
            (Self::MissingReason, Self::MissingReason) => true,
            (Self::InsufficientBalance(a), Self::InsufficientBalance(b)) => a == b,
            (Self::KeyNotFound(a), Self::KeyNotFound(b)) => a == b,
            (Self::ExistingKey(a), Self::ExistingKey(b)) => a == b,
            (Self::Consistency(a), Self::Consistency(b)) => a == b,
            (Self::InvalidId(a), Self::InvalidId(b)) => a == b,
            (Self::Database(a), Self::Database(b)) => a.to_string() == b.to_string(),
            _ => false,
        }
    }
}
