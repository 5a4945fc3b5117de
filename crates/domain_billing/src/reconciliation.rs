//! Daily cash reconciliation
//!
//! End-of-day aggregation of payments by method, used to match physical
//! cash/card totals against recorded transactions. The summary is a pure
//! projection over the payment ledger: same day, same ledger state, same
//! output.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use core_kernel::{ClinicId, Currency, Money};

use crate::config::LedgerConfig;
use crate::error::BillingError;
use crate::payment::{PaymentMethod, PaymentRecord};
use crate::ports::LedgerStore;

/// Per-method slice of a day's takings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodBreakdown {
    pub method: PaymentMethod,
    pub amount: Money,
    pub count: u64,
}

/// One clinic-local calendar day of payments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyPaymentSummary {
    pub date: NaiveDate,
    pub total: Money,
    pub transaction_count: u64,
    /// One entry per method seen that day, in a stable method order;
    /// empty for a day with no payments
    pub breakdown: Vec<MethodBreakdown>,
}

/// Groups a day's payment records by method
///
/// Pure and order-independent: the records may arrive in any order.
pub fn summarize(
    date: NaiveDate,
    currency: Currency,
    payments: &[PaymentRecord],
) -> Result<DailyPaymentSummary, BillingError> {
    let mut total = Money::zero(currency);
    let mut by_method: BTreeMap<PaymentMethod, (Money, u64)> = BTreeMap::new();

    for payment in payments {
        total = total.checked_add(&payment.amount)?;
        let entry = by_method
            .entry(payment.method)
            .or_insert((Money::zero(currency), 0));
        entry.0 = entry.0.checked_add(&payment.amount)?;
        entry.1 += 1;
    }

    Ok(DailyPaymentSummary {
        date,
        total,
        transaction_count: payments.len() as u64,
        breakdown: by_method
            .into_iter()
            .map(|(method, (amount, count))| MethodBreakdown {
                method,
                amount,
                count,
            })
            .collect(),
    })
}

/// Read-only reconciliation service
#[derive(Clone)]
pub struct Reconciliation {
    store: Arc<dyn LedgerStore>,
    config: LedgerConfig,
}

impl Reconciliation {
    pub fn new(store: Arc<dyn LedgerStore>, config: LedgerConfig) -> Self {
        Self { store, config }
    }

    /// Summary of all payments whose `payment_date` falls within the
    /// clinic-local calendar day. Idempotent; always safe to retry.
    pub async fn daily_summary(
        &self,
        clinic: ClinicId,
        date: NaiveDate,
    ) -> Result<DailyPaymentSummary, BillingError> {
        let (from, to) = self.config.timezone.day_bounds(date);
        let payments = self.store.payments_between(clinic, from, to).await?;
        summarize(date, self.config.currency, &payments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use core_kernel::{ActorId, BillId};
    use rust_decimal_macros::dec;

    fn inr(amount: rust_decimal::Decimal) -> Money {
        Money::new(amount, Currency::INR)
    }

    fn payment(amount: rust_decimal::Decimal, method: PaymentMethod) -> PaymentRecord {
        PaymentRecord::new(
            BillId::new(),
            ClinicId::new(),
            inr(amount),
            method,
            Utc::now(),
            ActorId::new(),
            Utc::now(),
        )
        .unwrap()
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()
    }

    #[test]
    fn test_empty_day() {
        let summary = summarize(day(), Currency::INR, &[]).unwrap();
        assert!(summary.total.is_zero());
        assert_eq!(summary.transaction_count, 0);
        assert!(summary.breakdown.is_empty());
    }

    #[test]
    fn test_groups_by_method() {
        let payments = vec![
            payment(dec!(300), PaymentMethod::Cash),
            payment(dec!(150), PaymentMethod::Card),
            payment(dec!(50), PaymentMethod::Cash),
        ];

        let summary = summarize(day(), Currency::INR, &payments).unwrap();
        assert_eq!(summary.total, inr(dec!(500)));
        assert_eq!(summary.transaction_count, 3);
        assert_eq!(summary.breakdown.len(), 2);

        let cash = summary
            .breakdown
            .iter()
            .find(|b| b.method == PaymentMethod::Cash)
            .unwrap();
        assert_eq!(cash.amount, inr(dec!(350)));
        assert_eq!(cash.count, 2);

        let card = summary
            .breakdown
            .iter()
            .find(|b| b.method == PaymentMethod::Card)
            .unwrap();
        assert_eq!(card.amount, inr(dec!(150)));
        assert_eq!(card.count, 1);
    }

    #[test]
    fn test_record_order_does_not_matter() {
        let mut payments = vec![
            payment(dec!(10.55), PaymentMethod::Upi),
            payment(dec!(99.45), PaymentMethod::Cash),
            payment(dec!(250), PaymentMethod::Upi),
        ];
        let forward = summarize(day(), Currency::INR, &payments).unwrap();
        payments.reverse();
        let reverse = summarize(day(), Currency::INR, &payments).unwrap();
        assert_eq!(forward, reverse);
    }
}
