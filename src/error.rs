//! Core error type
//!
//! Errors fall into three classes (matcher routing depends on this):
//! - business validation failures: the current order is refunded, no retry
//! - system failures: the current order rolls back, the batch continues
//! - invariant violations: surfaced for manual reconciliation, never tolerated

use thiserror::Error;

use crate::core_types::{ConsignmentId, ItemId, SessionId, UserId};

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Insufficient balance: user {user_id} bucket {bucket} has {available}, needs {required}")]
    InsufficientBalance {
        user_id: UserId,
        bucket: &'static str,
        available: rust_decimal::Decimal,
        required: rust_decimal::Decimal,
    },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: u64 },

    #[error("Session {0} is not open")]
    SessionNotOpen(SessionId),

    #[error("Invalid state: {entity} {id} is {actual}, expected {expected}")]
    InvalidState {
        entity: &'static str,
        id: u64,
        actual: &'static str,
        expected: &'static str,
    },

    #[error("Holding {0} is not owned by user {1}")]
    NotOwner(u64, UserId),

    #[error("Holding {0} is locked for consignment until {1}")]
    ConsignmentLocked(u64, chrono::DateTime<chrono::Utc>),

    #[error("Consignment {0} already settled")]
    AlreadySettled(ConsignmentId),

    #[error("Item {0} is out of stock")]
    OutOfStock(ItemId),

    #[error("Invariant violation: {0}")]
    Invariant(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl CoreError {
    /// Business validation failures abort one order and route it to the
    /// refund path; everything else is a system fault or an invariant bug.
    pub fn is_business(&self) -> bool {
        matches!(
            self,
            CoreError::InsufficientBalance { .. }
                | CoreError::NotFound { .. }
                | CoreError::SessionNotOpen(_)
                | CoreError::InvalidState { .. }
                | CoreError::NotOwner(..)
                | CoreError::ConsignmentLocked(..)
                | CoreError::AlreadySettled(_)
                | CoreError::OutOfStock(_)
        )
    }

    /// Invariant violations require manual reconciliation
    pub fn is_invariant(&self) -> bool {
        matches!(self, CoreError::Invariant(_))
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_business_classification() {
        assert!(CoreError::SessionNotOpen(1).is_business());
        assert!(CoreError::OutOfStock(7).is_business());
        assert!(CoreError::AlreadySettled(3).is_business());
        assert!(!CoreError::Invariant("stock went negative".into()).is_business());
        assert!(CoreError::Invariant("x".into()).is_invariant());
    }
}
