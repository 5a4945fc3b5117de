//! Payment records
//!
//! A `PaymentRecord` is append-only: once created it is never edited or
//! deleted. The only way to reverse money is a refund request. The sum of
//! a bill's payment records always equals that bill's `paid_amount`; the
//! store commits the two together.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use core_kernel::{ActorId, BillId, ClinicId, Money, PaymentRecordId};

use crate::error::BillingError;

/// How money was received (or returned, for refunds)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    Upi,
    BankTransfer,
    Cheque,
    Other,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Card => "card",
            PaymentMethod::Upi => "upi",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::Cheque => "cheque",
            PaymentMethod::Other => "other",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cash" => Ok(PaymentMethod::Cash),
            "card" => Ok(PaymentMethod::Card),
            "upi" => Ok(PaymentMethod::Upi),
            "bank_transfer" => Ok(PaymentMethod::BankTransfer),
            "cheque" => Ok(PaymentMethod::Cheque),
            "other" => Ok(PaymentMethod::Other),
            other => Err(BillingError::validation(format!(
                "Unknown payment method: {other}"
            ))),
        }
    }
}

/// One receipt of money against a bill
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRecord {
    /// Unique identifier
    pub id: PaymentRecordId,
    /// Owning bill
    pub bill_id: BillId,
    /// Clinic scope
    pub clinic_id: ClinicId,
    /// Amount received, always positive
    pub amount: Money,
    /// Payment method
    pub method: PaymentMethod,
    /// When the money changed hands
    pub payment_date: DateTime<Utc>,
    /// Card / cheque / bank reference
    pub reference: Option<String>,
    /// Who took the payment
    pub received_by: ActorId,
    /// Notes
    pub notes: Option<String>,
    /// Client-supplied key that makes a retried submission safe
    pub idempotency_key: Option<String>,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

impl PaymentRecord {
    /// Creates a new payment record
    pub fn new(
        bill_id: BillId,
        clinic_id: ClinicId,
        amount: Money,
        method: PaymentMethod,
        payment_date: DateTime<Utc>,
        received_by: ActorId,
        now: DateTime<Utc>,
    ) -> Result<Self, BillingError> {
        if !amount.is_positive() {
            return Err(BillingError::validation(format!(
                "Payment amount must be positive, got {amount}"
            )));
        }

        Ok(Self {
            id: PaymentRecordId::new_v7(),
            bill_id,
            clinic_id,
            amount,
            method,
            payment_date,
            reference: None,
            received_by,
            notes: None,
            idempotency_key: None,
            created_at: now,
        })
    }

    /// Sets the external reference
    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    /// Attaches notes
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Attaches a client idempotency key
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_kernel::Currency;
    use rust_decimal_macros::dec;

    #[test]
    fn test_new_rejects_non_positive_amounts() {
        for amount in [dec!(0), dec!(-10)] {
            let result = PaymentRecord::new(
                BillId::new(),
                ClinicId::new(),
                Money::new(amount, Currency::INR),
                PaymentMethod::Cash,
                Utc::now(),
                ActorId::new(),
                Utc::now(),
            );
            assert!(matches!(result, Err(BillingError::Validation(_))));
        }
    }

    #[test]
    fn test_builder_fields() {
        let record = PaymentRecord::new(
            BillId::new(),
            ClinicId::new(),
            Money::new(dec!(150), Currency::INR),
            PaymentMethod::Card,
            Utc::now(),
            ActorId::new(),
            Utc::now(),
        )
        .unwrap()
        .with_reference("AUTH-4451")
        .with_idempotency_key("save-77f1");

        assert_eq!(record.reference.as_deref(), Some("AUTH-4451"));
        assert_eq!(record.idempotency_key.as_deref(), Some("save-77f1"));
    }

    #[test]
    fn test_method_round_trip() {
        for method in [
            PaymentMethod::Cash,
            PaymentMethod::Card,
            PaymentMethod::Upi,
            PaymentMethod::BankTransfer,
            PaymentMethod::Cheque,
            PaymentMethod::Other,
        ] {
            assert_eq!(method.as_str().parse::<PaymentMethod>().unwrap(), method);
        }
    }
}
