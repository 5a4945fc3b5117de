//! Billing domain errors
//!
//! The taxonomy mirrors how callers must react: validation and permission
//! failures are rejected before any state change, conflicts require a
//! re-read and retry, and a partial save tells the caller exactly which
//! step is missing.

use core_kernel::{BillId, Money, MoneyError, PortError};
use thiserror::Error;

/// Errors that can occur in the billing domain
#[derive(Debug, Error)]
pub enum BillingError {
    /// Malformed input: negative amounts, empty item list, out-of-range
    /// percentages
    #[error("Validation error: {0}")]
    Validation(String),

    /// An id (patient, visit, bill, refund) did not resolve
    #[error("Unresolvable reference: {entity} {id}")]
    Reference { entity: String, id: String },

    /// An invariant would be violated: overpayment, refund exceeding the
    /// refundable balance, or a lost concurrent-update race
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The actor lacks the role required for this transition
    #[error("Permission denied: {0}")]
    Permission(String),

    /// A refund request cannot move between these states
    #[error("Invalid refund transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// The bill was persisted but the payment step failed; the caller can
    /// retry just the payment with the same idempotency key
    #[error("Bill {bill_id} saved but payment of {attempted_amount} not recorded: {reason}")]
    PartialSave {
        bill_id: BillId,
        attempted_amount: Money,
        reason: String,
    },

    /// The underlying store failed for a reason outside the taxonomy above
    #[error("Storage error: {0}")]
    Storage(#[source] PortError),
}

impl BillingError {
    pub fn validation(message: impl Into<String>) -> Self {
        BillingError::Validation(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        BillingError::Conflict(message.into())
    }

    pub fn permission(message: impl Into<String>) -> Self {
        BillingError::Permission(message.into())
    }

    pub fn reference(entity: impl Into<String>, id: impl std::fmt::Display) -> Self {
        BillingError::Reference {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Returns true if the caller should re-fetch state and retry
    pub fn is_conflict(&self) -> bool {
        matches!(self, BillingError::Conflict(_))
    }

    pub fn is_partial_save(&self) -> bool {
        matches!(self, BillingError::PartialSave { .. })
    }
}

impl From<MoneyError> for BillingError {
    fn from(err: MoneyError) -> Self {
        BillingError::Validation(err.to_string())
    }
}

impl From<PortError> for BillingError {
    fn from(err: PortError) -> Self {
        match err {
            PortError::NotFound { entity_type, id } => BillingError::Reference {
                entity: entity_type,
                id,
            },
            PortError::Validation { message } => BillingError::Validation(message),
            PortError::Conflict { message } => BillingError::Conflict(message),
            PortError::Unauthorized { message } => BillingError::Permission(message),
            other => BillingError::Storage(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_conflict_maps_to_conflict() {
        let err: BillingError = PortError::conflict("stale version").into();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_port_not_found_maps_to_reference() {
        let err: BillingError = PortError::not_found("Bill", "abc").into();
        assert!(matches!(err, BillingError::Reference { .. }));
    }

    #[test]
    fn test_money_error_maps_to_validation() {
        let err: BillingError =
            MoneyError::InvalidAmount("negative".to_string()).into();
        assert!(matches!(err, BillingError::Validation(_)));
    }
}
