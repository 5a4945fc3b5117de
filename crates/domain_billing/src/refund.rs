//! Refund requests
//!
//! A refund request is a state machine over a bill's refundable balance.
//! The balance guard runs twice: at creation, and again at the `paid`
//! transition, because another request against the same bill may have
//! completed in between. The second check happens in the workflow service
//! with a freshly loaded bill, inside the store's atomic commit.
//!
//! Terminal states: `Paid`, `Rejected`, `Cancelled`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use core_kernel::{ActorId, BillId, ClinicId, Money, RefundRequestId};

use crate::bill::Bill;
use crate::error::BillingError;
use crate::payment::PaymentMethod;

/// State of a refund request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundState {
    Draft,
    PendingApproval,
    Approved,
    Rejected,
    Paid,
    Cancelled,
}

impl RefundState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundState::Draft => "draft",
            RefundState::PendingApproval => "pending_approval",
            RefundState::Approved => "approved",
            RefundState::Rejected => "rejected",
            RefundState::Paid => "paid",
            RefundState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RefundState::Paid | RefundState::Rejected | RefundState::Cancelled
        )
    }
}

impl fmt::Display for RefundState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RefundState {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(RefundState::Draft),
            "pending_approval" => Ok(RefundState::PendingApproval),
            "approved" => Ok(RefundState::Approved),
            "rejected" => Ok(RefundState::Rejected),
            "paid" => Ok(RefundState::Paid),
            "cancelled" => Ok(RefundState::Cancelled),
            other => Err(BillingError::validation(format!(
                "Unknown refund state: {other}"
            ))),
        }
    }
}

/// Plain-data snapshot of a refund request, for store adapters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundSnapshot {
    pub id: RefundRequestId,
    pub bill_id: BillId,
    pub clinic_id: ClinicId,
    pub state: RefundState,
    pub amount: Money,
    pub reason: Option<String>,
    pub refund_method: Option<PaymentMethod>,
    pub requested_by: ActorId,
    pub approved_by: Option<ActorId>,
    pub approved_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A request to return part of a bill's received payments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundRequest {
    id: RefundRequestId,
    bill_id: BillId,
    clinic_id: ClinicId,
    state: RefundState,
    amount: Money,
    reason: Option<String>,
    refund_method: Option<PaymentMethod>,
    requested_by: ActorId,
    approved_by: Option<ActorId>,
    approved_at: Option<DateTime<Utc>>,
    paid_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl RefundRequest {
    /// Opens a draft refund request against a bill
    ///
    /// The amount must be positive and within the bill's refundable
    /// balance at creation time. The balance is re-validated later, at the
    /// `paid` transition.
    pub fn open(
        bill: &Bill,
        amount: Money,
        reason: Option<String>,
        requested_by: ActorId,
        now: DateTime<Utc>,
    ) -> Result<Self, BillingError> {
        if !amount.is_positive() {
            return Err(BillingError::validation(format!(
                "Refund amount must be positive, got {amount}"
            )));
        }
        if amount.currency() != bill.currency() {
            return Err(BillingError::validation(format!(
                "Refund currency {} does not match the bill currency {}",
                amount.currency(),
                bill.currency()
            )));
        }
        if amount > bill.refundable_balance() {
            return Err(BillingError::conflict(format!(
                "Refund of {} exceeds the refundable balance {}",
                amount,
                bill.refundable_balance()
            )));
        }

        Ok(Self {
            id: RefundRequestId::new_v7(),
            bill_id: bill.id(),
            clinic_id: bill.clinic_id(),
            state: RefundState::Draft,
            amount,
            reason,
            refund_method: None,
            requested_by,
            approved_by: None,
            approved_at: None,
            paid_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Rehydrates a request from a stored snapshot. For store adapters only.
    pub fn restore(snapshot: RefundSnapshot) -> Self {
        Self {
            id: snapshot.id,
            bill_id: snapshot.bill_id,
            clinic_id: snapshot.clinic_id,
            state: snapshot.state,
            amount: snapshot.amount,
            reason: snapshot.reason,
            refund_method: snapshot.refund_method,
            requested_by: snapshot.requested_by,
            approved_by: snapshot.approved_by,
            approved_at: snapshot.approved_at,
            paid_at: snapshot.paid_at,
            created_at: snapshot.created_at,
            updated_at: snapshot.updated_at,
        }
    }

    /// Captures the full state for persistence
    pub fn snapshot(&self) -> RefundSnapshot {
        RefundSnapshot {
            id: self.id,
            bill_id: self.bill_id,
            clinic_id: self.clinic_id,
            state: self.state,
            amount: self.amount,
            reason: self.reason.clone(),
            refund_method: self.refund_method,
            requested_by: self.requested_by,
            approved_by: self.approved_by,
            approved_at: self.approved_at,
            paid_at: self.paid_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    // --- accessors ---

    pub fn id(&self) -> RefundRequestId {
        self.id
    }

    pub fn bill_id(&self) -> BillId {
        self.bill_id
    }

    pub fn clinic_id(&self) -> ClinicId {
        self.clinic_id
    }

    pub fn state(&self) -> RefundState {
        self.state
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn refund_method(&self) -> Option<PaymentMethod> {
        self.refund_method
    }

    pub fn requested_by(&self) -> ActorId {
        self.requested_by
    }

    pub fn approved_by(&self) -> Option<ActorId> {
        self.approved_by
    }

    pub fn approved_at(&self) -> Option<DateTime<Utc>> {
        self.approved_at
    }

    pub fn paid_at(&self) -> Option<DateTime<Utc>> {
        self.paid_at
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_open(&self) -> bool {
        !self.state.is_terminal()
    }

    // --- transitions ---

    /// Submits the draft for approval
    pub fn submit(&mut self, now: DateTime<Utc>) -> Result<(), BillingError> {
        self.transition(RefundState::PendingApproval, now)
    }

    /// Approves the request. The permission check happens in the workflow
    /// service before this is called.
    pub fn approve(&mut self, approver: ActorId, now: DateTime<Utc>) -> Result<(), BillingError> {
        self.transition(RefundState::Approved, now)?;
        self.approved_by = Some(approver);
        self.approved_at = Some(now);
        Ok(())
    }

    /// Rejects the request
    pub fn reject(&mut self, now: DateTime<Utc>) -> Result<(), BillingError> {
        self.transition(RefundState::Rejected, now)
    }

    /// Cancels the request from any non-terminal state
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), BillingError> {
        self.transition(RefundState::Cancelled, now)
    }

    /// Marks the refund as paid out; requires a refund method
    pub fn mark_paid(
        &mut self,
        method: PaymentMethod,
        now: DateTime<Utc>,
    ) -> Result<(), BillingError> {
        self.transition(RefundState::Paid, now)?;
        self.refund_method = Some(method);
        self.paid_at = Some(now);
        Ok(())
    }

    fn transition(&mut self, target: RefundState, now: DateTime<Utc>) -> Result<(), BillingError> {
        if !self.can_transition_to(target) {
            return Err(BillingError::InvalidTransition {
                from: self.state.to_string(),
                to: target.to_string(),
            });
        }
        self.state = target;
        self.updated_at = now;
        Ok(())
    }

    fn can_transition_to(&self, target: RefundState) -> bool {
        use RefundState::*;
        matches!(
            (self.state, target),
            (Draft, PendingApproval)
                | (PendingApproval, PendingApproval)
                | (Draft, Approved)
                | (PendingApproval, Approved)
                | (Draft, Rejected)
                | (PendingApproval, Rejected)
                | (Approved, Paid)
                | (PendingApproval, Paid)
                | (Draft, Cancelled)
                | (PendingApproval, Cancelled)
                | (Approved, Cancelled)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bill::Bill;
    use crate::line_item::{BillItem, ItemKind};
    use chrono::NaiveDate;
    use core_kernel::{ClinicId, Currency, PatientId, Percent};
    use rust_decimal_macros::dec;

    fn inr(amount: rust_decimal::Decimal) -> Money {
        Money::new(amount, Currency::INR)
    }

    fn paid_bill(total: rust_decimal::Decimal) -> Bill {
        let item = BillItem::new(
            ItemKind::Consultation,
            "Consultation",
            1,
            inr(total),
            Percent::ZERO,
            Percent::ZERO,
        )
        .unwrap();
        let today = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        let mut bill = Bill::create(
            ClinicId::new(),
            PatientId::new(),
            None,
            "BILL-000001",
            vec![item],
            Currency::INR,
            None,
            None,
            Utc::now(),
            today,
        )
        .unwrap();
        bill.apply_payment(inr(total), Utc::now(), today).unwrap();
        bill
    }

    #[test]
    fn test_open_within_refundable_balance() {
        let bill = paid_bill(dec!(300));
        let refund =
            RefundRequest::open(&bill, inr(dec!(100)), None, ActorId::new(), Utc::now()).unwrap();

        assert_eq!(refund.state(), RefundState::Draft);
        assert_eq!(refund.bill_id(), bill.id());
        assert!(refund.is_open());
    }

    #[test]
    fn test_open_beyond_refundable_balance_is_conflict() {
        let bill = paid_bill(dec!(200));
        let result = RefundRequest::open(&bill, inr(dec!(250)), None, ActorId::new(), Utc::now());
        assert!(matches!(result, Err(BillingError::Conflict(_))));
    }

    #[test]
    fn test_open_rejects_non_positive_amount() {
        let bill = paid_bill(dec!(200));
        let result = RefundRequest::open(&bill, inr(dec!(0)), None, ActorId::new(), Utc::now());
        assert!(matches!(result, Err(BillingError::Validation(_))));
    }

    #[test]
    fn test_full_happy_path() {
        let bill = paid_bill(dec!(300));
        let now = Utc::now();
        let mut refund =
            RefundRequest::open(&bill, inr(dec!(100)), None, ActorId::new(), now).unwrap();

        refund.submit(now).unwrap();
        assert_eq!(refund.state(), RefundState::PendingApproval);

        let approver = ActorId::new();
        refund.approve(approver, now).unwrap();
        assert_eq!(refund.state(), RefundState::Approved);
        assert_eq!(refund.approved_by(), Some(approver));
        assert!(refund.approved_at().is_some());

        refund.mark_paid(PaymentMethod::Cash, now).unwrap();
        assert_eq!(refund.state(), RefundState::Paid);
        assert_eq!(refund.refund_method(), Some(PaymentMethod::Cash));
        assert!(refund.paid_at().is_some());
        assert!(!refund.is_open());
    }

    #[test]
    fn test_terminal_states_are_frozen() {
        let bill = paid_bill(dec!(300));
        let now = Utc::now();
        let mut refund =
            RefundRequest::open(&bill, inr(dec!(100)), None, ActorId::new(), now).unwrap();
        refund.reject(now).unwrap();

        assert!(matches!(
            refund.submit(now),
            Err(BillingError::InvalidTransition { .. })
        ));
        assert!(matches!(
            refund.cancel(now),
            Err(BillingError::InvalidTransition { .. })
        ));
        assert!(matches!(
            refund.mark_paid(PaymentMethod::Cash, now),
            Err(BillingError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_paid_requires_approved_or_pending() {
        let bill = paid_bill(dec!(300));
        let now = Utc::now();
        let mut draft =
            RefundRequest::open(&bill, inr(dec!(100)), None, ActorId::new(), now).unwrap();

        // draft -> paid is not in the table
        assert!(matches!(
            draft.mark_paid(PaymentMethod::Cash, now),
            Err(BillingError::InvalidTransition { .. })
        ));

        draft.submit(now).unwrap();
        draft.mark_paid(PaymentMethod::Upi, now).unwrap();
        assert_eq!(draft.state(), RefundState::Paid);
    }

    #[test]
    fn test_cancel_from_any_open_state() {
        let bill = paid_bill(dec!(300));
        let now = Utc::now();

        for prepare in [
            (|_r: &mut RefundRequest| {}) as fn(&mut RefundRequest),
            |r| r.submit(Utc::now()).unwrap(),
            |r| {
                r.submit(Utc::now()).unwrap();
                r.approve(ActorId::new(), Utc::now()).unwrap();
            },
        ] {
            let mut refund =
                RefundRequest::open(&bill, inr(dec!(50)), None, ActorId::new(), now).unwrap();
            prepare(&mut refund);
            refund.cancel(now).unwrap();
            assert_eq!(refund.state(), RefundState::Cancelled);
        }
    }
}
