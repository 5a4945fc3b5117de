//! Bill aggregate
//!
//! The bill owns its line items and the projections derived from them:
//! `total_amount`, `paid_amount`, `balance`, `payment_status`,
//! `total_refunded`, and `refund_status`. Derived fields are private and
//! recomputed inside the aggregate on every mutation; no caller can set
//! them directly, so the ledger and its readers cannot disagree.
//!
//! # Invariants
//!
//! - `total_amount` equals the sum of item line totals
//! - `balance = total_amount - paid_amount` at every observed state
//! - `payment_status` is `Paid` iff `paid >= total`, `Pending` iff
//!   `paid = 0`, otherwise `Partial`; a past `due_date` with an open
//!   balance overlays `Overdue`
//! - `overdue` is derived from the due date; it never blocks payments
//! - the `version` field supports optimistic concurrency in the store

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use core_kernel::{BillId, ClinicId, Currency, Money, PatientId, VisitId};

use crate::error::BillingError;
use crate::line_item::BillItem;

/// Payment status of a bill
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Partial,
    Paid,
    Overdue,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Partial => "partial",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Overdue => "overdue",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "partial" => Ok(PaymentStatus::Partial),
            "paid" => Ok(PaymentStatus::Paid),
            "overdue" => Ok(PaymentStatus::Overdue),
            other => Err(BillingError::validation(format!(
                "Unknown payment status: {other}"
            ))),
        }
    }
}

/// Refund exposure of a bill
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    /// Nothing refunded and no open refund requests
    None,
    /// Nothing refunded yet, but at least one refund request is open
    Pending,
    /// Part of the paid amount has been refunded
    Partial,
    /// The entire paid amount has been refunded
    Refunded,
}

impl RefundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundStatus::None => "none",
            RefundStatus::Pending => "pending",
            RefundStatus::Partial => "partial",
            RefundStatus::Refunded => "refunded",
        }
    }
}

impl fmt::Display for RefundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RefundStatus {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(RefundStatus::None),
            "pending" => Ok(RefundStatus::Pending),
            "partial" => Ok(RefundStatus::Partial),
            "refunded" => Ok(RefundStatus::Refunded),
            other => Err(BillingError::validation(format!(
                "Unknown refund status: {other}"
            ))),
        }
    }
}

/// Pure derivation of the payment status invariant
///
/// This is the only code path that computes `payment_status`. A past due
/// date with an open balance overlays `Overdue` on `Pending`/`Partial`;
/// a fully paid bill is never overdue.
pub fn derive_payment_status(
    total: Money,
    paid: Money,
    due_date: Option<NaiveDate>,
    today: NaiveDate,
) -> PaymentStatus {
    let base = if paid >= total {
        PaymentStatus::Paid
    } else if paid.is_zero() {
        PaymentStatus::Pending
    } else {
        PaymentStatus::Partial
    };

    match (base, due_date) {
        (PaymentStatus::Pending | PaymentStatus::Partial, Some(due)) if due < today => {
            PaymentStatus::Overdue
        }
        _ => base,
    }
}

/// Pure derivation of the refund status
pub fn derive_refund_status(
    paid: Money,
    refunded: Money,
    has_open_requests: bool,
) -> RefundStatus {
    if refunded.is_zero() {
        if has_open_requests {
            RefundStatus::Pending
        } else {
            RefundStatus::None
        }
    } else if refunded >= paid && paid.is_positive() {
        RefundStatus::Refunded
    } else {
        RefundStatus::Partial
    }
}

/// Plain-data snapshot of a bill, used by store adapters to persist and
/// rehydrate the aggregate without exposing field-level mutation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillSnapshot {
    pub id: BillId,
    pub clinic_id: ClinicId,
    pub patient_id: PatientId,
    pub visit_id: Option<VisitId>,
    pub bill_number: String,
    pub items: Vec<BillItem>,
    pub currency: Currency,
    pub total_amount: Money,
    pub paid_amount: Money,
    pub total_refunded: Money,
    pub payment_status: PaymentStatus,
    pub refund_status: RefundStatus,
    pub notes: Option<String>,
    pub bill_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The financial record for one patient transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bill {
    id: BillId,
    clinic_id: ClinicId,
    patient_id: PatientId,
    visit_id: Option<VisitId>,
    bill_number: String,
    items: Vec<BillItem>,
    currency: Currency,
    total_amount: Money,
    paid_amount: Money,
    total_refunded: Money,
    payment_status: PaymentStatus,
    refund_status: RefundStatus,
    notes: Option<String>,
    bill_date: NaiveDate,
    due_date: Option<NaiveDate>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Bill {
    /// Creates a new bill from at least one line item
    ///
    /// `total_amount` is computed from the items; `paid_amount` starts at
    /// zero and `payment_status` at `Pending` (or `Overdue` if created
    /// with an already-past due date).
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        clinic_id: ClinicId,
        patient_id: PatientId,
        visit_id: Option<VisitId>,
        bill_number: impl Into<String>,
        items: Vec<BillItem>,
        currency: Currency,
        notes: Option<String>,
        due_date: Option<NaiveDate>,
        now: DateTime<Utc>,
        today: NaiveDate,
    ) -> Result<Self, BillingError> {
        let total_amount = Self::total_of(&items, currency)?;

        let mut bill = Self {
            id: BillId::new_v7(),
            clinic_id,
            patient_id,
            visit_id,
            bill_number: bill_number.into(),
            items,
            currency,
            total_amount,
            paid_amount: Money::zero(currency),
            total_refunded: Money::zero(currency),
            payment_status: PaymentStatus::Pending,
            refund_status: RefundStatus::None,
            notes,
            bill_date: today,
            due_date,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        bill.recompute_payment_status(today);
        Ok(bill)
    }

    /// Rehydrates a bill from a stored snapshot. For store adapters only.
    pub fn restore(snapshot: BillSnapshot) -> Self {
        Self {
            id: snapshot.id,
            clinic_id: snapshot.clinic_id,
            patient_id: snapshot.patient_id,
            visit_id: snapshot.visit_id,
            bill_number: snapshot.bill_number,
            items: snapshot.items,
            currency: snapshot.currency,
            total_amount: snapshot.total_amount,
            paid_amount: snapshot.paid_amount,
            total_refunded: snapshot.total_refunded,
            payment_status: snapshot.payment_status,
            refund_status: snapshot.refund_status,
            notes: snapshot.notes,
            bill_date: snapshot.bill_date,
            due_date: snapshot.due_date,
            version: snapshot.version,
            created_at: snapshot.created_at,
            updated_at: snapshot.updated_at,
        }
    }

    /// Captures the full state for persistence
    pub fn snapshot(&self) -> BillSnapshot {
        BillSnapshot {
            id: self.id,
            clinic_id: self.clinic_id,
            patient_id: self.patient_id,
            visit_id: self.visit_id,
            bill_number: self.bill_number.clone(),
            items: self.items.clone(),
            currency: self.currency,
            total_amount: self.total_amount,
            paid_amount: self.paid_amount,
            total_refunded: self.total_refunded,
            payment_status: self.payment_status,
            refund_status: self.refund_status,
            notes: self.notes.clone(),
            bill_date: self.bill_date,
            due_date: self.due_date,
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    // --- accessors ---

    pub fn id(&self) -> BillId {
        self.id
    }

    pub fn clinic_id(&self) -> ClinicId {
        self.clinic_id
    }

    pub fn patient_id(&self) -> PatientId {
        self.patient_id
    }

    pub fn visit_id(&self) -> Option<VisitId> {
        self.visit_id
    }

    pub fn bill_number(&self) -> &str {
        &self.bill_number
    }

    pub fn items(&self) -> &[BillItem] {
        &self.items
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn total_amount(&self) -> Money {
        self.total_amount
    }

    pub fn paid_amount(&self) -> Money {
        self.paid_amount
    }

    pub fn total_refunded(&self) -> Money {
        self.total_refunded
    }

    /// `total_amount - paid_amount`; negative when overpayment was allowed
    pub fn balance_amount(&self) -> Money {
        self.total_amount - self.paid_amount
    }

    /// Paid amount not yet returned via a completed refund, floored at zero
    pub fn refundable_balance(&self) -> Money {
        self.paid_amount
            .saturating_sub(&self.total_refunded)
            .unwrap_or_else(|_| Money::zero(self.currency))
    }

    /// Paid amount net of completed refunds; the floor below which the
    /// total may not be edited without an override
    pub fn net_paid(&self) -> Money {
        self.refundable_balance()
    }

    pub fn payment_status(&self) -> PaymentStatus {
        self.payment_status
    }

    pub fn refund_status(&self) -> RefundStatus {
        self.refund_status
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn bill_date(&self) -> NaiveDate {
        self.bill_date
    }

    pub fn due_date(&self) -> Option<NaiveDate> {
        self.due_date
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    // --- mutations ---

    /// Replaces the item set and recomputes the totals and status
    ///
    /// Without `allow_below_net_paid`, the new total may not fall below
    /// `paid_amount - total_refunded`: that would leave the bill over-paid
    /// relative to its own value.
    pub fn replace_items(
        &mut self,
        items: Vec<BillItem>,
        allow_below_net_paid: bool,
        now: DateTime<Utc>,
        today: NaiveDate,
    ) -> Result<(), BillingError> {
        let new_total = Self::total_of(&items, self.currency)?;

        if !allow_below_net_paid && new_total < self.net_paid() {
            return Err(BillingError::conflict(format!(
                "New total {} is below the net paid amount {}; pass the \
                 override flag to reduce it anyway",
                new_total,
                self.net_paid()
            )));
        }

        self.items = items;
        self.total_amount = new_total;
        self.recompute_payment_status(today);
        self.touch(now);
        Ok(())
    }

    /// Updates the free-form fields that carry no invariants
    pub fn update_details(
        &mut self,
        notes: Option<String>,
        due_date: Option<NaiveDate>,
        now: DateTime<Utc>,
        today: NaiveDate,
    ) {
        self.notes = notes;
        self.due_date = due_date;
        self.recompute_payment_status(today);
        self.touch(now);
    }

    /// Adds a received payment to the paid amount. Called by the payment
    /// ledger only, inside its atomic commit; never call this without
    /// appending the matching `PaymentRecord`.
    pub fn apply_payment(
        &mut self,
        amount: Money,
        now: DateTime<Utc>,
        today: NaiveDate,
    ) -> Result<(), BillingError> {
        if !amount.is_positive() {
            return Err(BillingError::validation(format!(
                "Payment amount must be positive, got {amount}"
            )));
        }
        self.paid_amount = self.paid_amount.checked_add(&amount)?;
        self.recompute_payment_status(today);
        self.touch(now);
        Ok(())
    }

    /// Registers a refund request reaching the `paid` state. Called by the
    /// refund workflow only, inside its atomic commit.
    pub fn apply_refund_paid(
        &mut self,
        amount: Money,
        has_open_requests: bool,
        now: DateTime<Utc>,
        today: NaiveDate,
    ) -> Result<(), BillingError> {
        if !amount.is_positive() {
            return Err(BillingError::validation(format!(
                "Refund amount must be positive, got {amount}"
            )));
        }
        if amount > self.refundable_balance() {
            return Err(BillingError::conflict(format!(
                "Refund of {} exceeds the refundable balance {}",
                amount,
                self.refundable_balance()
            )));
        }
        self.total_refunded = self.total_refunded.checked_add(&amount)?;
        self.refund_status =
            derive_refund_status(self.paid_amount, self.total_refunded, has_open_requests);
        self.recompute_payment_status(today);
        self.touch(now);
        Ok(())
    }

    /// Recomputes `refund_status` when refund requests are opened, rejected,
    /// or cancelled without money moving
    pub fn set_refund_exposure(&mut self, has_open_requests: bool, now: DateTime<Utc>) {
        self.refund_status =
            derive_refund_status(self.paid_amount, self.total_refunded, has_open_requests);
        self.touch(now);
    }

    /// Advances the optimistic-concurrency version. For store adapters
    /// only, on a committed write.
    pub fn advance_version(&mut self) {
        self.version += 1;
    }

    fn recompute_payment_status(&mut self, today: NaiveDate) {
        self.payment_status =
            derive_payment_status(self.total_amount, self.paid_amount, self.due_date, today);
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    fn total_of(items: &[BillItem], currency: Currency) -> Result<Money, BillingError> {
        if items.is_empty() {
            return Err(BillingError::validation(
                "A bill requires at least one line item",
            ));
        }

        let mut total = Money::zero(currency);
        for item in items {
            if item.unit_price().currency() != currency {
                return Err(BillingError::validation(format!(
                    "Item '{}' is priced in {} but the bill is in {}",
                    item.name(),
                    item.unit_price().currency(),
                    currency
                )));
            }
            total = total.checked_add(&item.line_total())?;
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::line_item::ItemKind;
    use core_kernel::Percent;
    use rust_decimal_macros::dec;

    fn inr(amount: rust_decimal::Decimal) -> Money {
        Money::new(amount, Currency::INR)
    }

    fn consultation(price: rust_decimal::Decimal) -> BillItem {
        BillItem::new(
            ItemKind::Consultation,
            "Consultation",
            1,
            inr(price),
            Percent::ZERO,
            Percent::ZERO,
        )
        .unwrap()
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn new_bill(items: Vec<BillItem>) -> Bill {
        Bill::create(
            ClinicId::new(),
            PatientId::new(),
            None,
            "BILL-000001",
            items,
            Currency::INR,
            None,
            None,
            Utc::now(),
            day(2025, 3, 10),
        )
        .unwrap()
    }

    #[test]
    fn test_create_requires_items() {
        let result = Bill::create(
            ClinicId::new(),
            PatientId::new(),
            None,
            "BILL-000001",
            vec![],
            Currency::INR,
            None,
            None,
            Utc::now(),
            day(2025, 3, 10),
        );
        assert!(matches!(result, Err(BillingError::Validation(_))));
    }

    #[test]
    fn test_create_derives_total_and_pending_status() {
        let bill = new_bill(vec![consultation(dec!(300))]);

        assert_eq!(bill.total_amount(), inr(dec!(300)));
        assert!(bill.paid_amount().is_zero());
        assert_eq!(bill.balance_amount(), inr(dec!(300)));
        assert_eq!(bill.payment_status(), PaymentStatus::Pending);
        assert_eq!(bill.refund_status(), RefundStatus::None);
        assert_eq!(bill.version(), 0);
    }

    #[test]
    fn test_total_is_item_order_independent() {
        let a = consultation(dec!(300));
        let b = BillItem::new(
            ItemKind::Medicine,
            "Paracetamol",
            10,
            inr(dec!(2.55)),
            Percent::new(dec!(5)).unwrap(),
            Percent::new(dec!(12)).unwrap(),
        )
        .unwrap();

        let forward = new_bill(vec![a.clone(), b.clone()]);
        let reverse = new_bill(vec![b, a]);
        assert_eq!(forward.total_amount(), reverse.total_amount());
    }

    #[test]
    fn test_apply_payment_moves_status_to_partial_then_paid() {
        let mut bill = new_bill(vec![consultation(dec!(300))]);
        let now = Utc::now();

        bill.apply_payment(inr(dec!(100)), now, day(2025, 3, 10)).unwrap();
        assert_eq!(bill.payment_status(), PaymentStatus::Partial);
        assert_eq!(bill.balance_amount(), inr(dec!(200)));

        bill.apply_payment(inr(dec!(200)), now, day(2025, 3, 10)).unwrap();
        assert_eq!(bill.payment_status(), PaymentStatus::Paid);
        assert!(bill.balance_amount().is_zero());
    }

    #[test]
    fn test_overdue_overlays_open_balance_only() {
        let due = day(2025, 3, 1);
        let today = day(2025, 3, 10);

        assert_eq!(
            derive_payment_status(inr(dec!(300)), inr(dec!(0)), Some(due), today),
            PaymentStatus::Overdue
        );
        assert_eq!(
            derive_payment_status(inr(dec!(300)), inr(dec!(100)), Some(due), today),
            PaymentStatus::Overdue
        );
        // fully paid is never overdue
        assert_eq!(
            derive_payment_status(inr(dec!(300)), inr(dec!(300)), Some(due), today),
            PaymentStatus::Paid
        );
        // due today is not yet overdue
        assert_eq!(
            derive_payment_status(inr(dec!(300)), inr(dec!(0)), Some(today), today),
            PaymentStatus::Pending
        );
    }

    #[test]
    fn test_replace_items_guards_net_paid_floor() {
        let mut bill = new_bill(vec![consultation(dec!(300))]);
        let now = Utc::now();
        bill.apply_payment(inr(dec!(300)), now, day(2025, 3, 10)).unwrap();

        let cheaper = vec![consultation(dec!(100))];
        let result = bill.replace_items(cheaper.clone(), false, now, day(2025, 3, 10));
        assert!(matches!(result, Err(BillingError::Conflict(_))));
        // unchanged on failure
        assert_eq!(bill.total_amount(), inr(dec!(300)));

        bill.replace_items(cheaper, true, now, day(2025, 3, 10)).unwrap();
        assert_eq!(bill.total_amount(), inr(dec!(100)));
        assert_eq!(bill.payment_status(), PaymentStatus::Paid);
    }

    #[test]
    fn test_refund_derivations() {
        let mut bill = new_bill(vec![consultation(dec!(300))]);
        let now = Utc::now();
        let today = day(2025, 3, 10);
        bill.apply_payment(inr(dec!(300)), now, today).unwrap();

        bill.set_refund_exposure(true, now);
        assert_eq!(bill.refund_status(), RefundStatus::Pending);

        bill.apply_refund_paid(inr(dec!(100)), false, now, today).unwrap();
        assert_eq!(bill.refund_status(), RefundStatus::Partial);
        assert_eq!(bill.total_refunded(), inr(dec!(100)));
        assert_eq!(bill.refundable_balance(), inr(dec!(200)));

        bill.apply_refund_paid(inr(dec!(200)), false, now, today).unwrap();
        assert_eq!(bill.refund_status(), RefundStatus::Refunded);
        assert!(bill.refundable_balance().is_zero());
    }

    #[test]
    fn test_refund_beyond_refundable_is_conflict() {
        let mut bill = new_bill(vec![consultation(dec!(300))]);
        let now = Utc::now();
        let today = day(2025, 3, 10);
        bill.apply_payment(inr(dec!(200)), now, today).unwrap();

        let result = bill.apply_refund_paid(inr(dec!(250)), false, now, today);
        assert!(matches!(result, Err(BillingError::Conflict(_))));
        assert!(bill.total_refunded().is_zero());
    }

    #[test]
    fn test_snapshot_round_trip() {
        let bill = new_bill(vec![consultation(dec!(300))]);
        let restored = Bill::restore(bill.snapshot());
        assert_eq!(restored.id(), bill.id());
        assert_eq!(restored.total_amount(), bill.total_amount());
        assert_eq!(restored.version(), bill.version());
    }
}
