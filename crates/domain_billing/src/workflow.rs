//! Refund workflow service
//!
//! Drives refund requests through their state machine and keeps the
//! owning bill's refund projections in step. Every refund write pins the
//! state the request was loaded in, so two racing transitions cannot both
//! land; the loser reloads and re-runs the transition guard, which is how
//! a terminal state stays terminal. Transitions that move money or change
//! the bill's refund exposure commit the request and the bill atomically
//! through the store; the refundable-balance guard is re-evaluated at the
//! `paid` transition against a freshly loaded bill.

use std::sync::Arc;

use tracing::{info, warn};

use core_kernel::{ActorId, BillId, ClinicId, Clock, Money, RefundRequestId};

use crate::bill::Bill;
use crate::config::LedgerConfig;
use crate::error::BillingError;
use crate::payment::PaymentMethod;
use crate::ports::{AccessPolicy, LedgerStore};
use crate::refund::RefundRequest;

/// Application service over refund requests
#[derive(Clone)]
pub struct RefundWorkflow {
    store: Arc<dyn LedgerStore>,
    access: Arc<dyn AccessPolicy>,
    clock: Arc<dyn Clock>,
    config: LedgerConfig,
}

impl RefundWorkflow {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        access: Arc<dyn AccessPolicy>,
        clock: Arc<dyn Clock>,
        config: LedgerConfig,
    ) -> Self {
        Self {
            store,
            access,
            clock,
            config,
        }
    }

    /// Opens a draft refund request against a bill
    ///
    /// The amount is validated against the refundable balance at creation
    /// time; the bill's refund exposure moves to `pending` if nothing has
    /// been refunded yet.
    pub async fn open_request(
        &self,
        clinic: ClinicId,
        bill_id: BillId,
        amount: Money,
        reason: Option<String>,
        requested_by: ActorId,
    ) -> Result<RefundRequest, BillingError> {
        let mut attempts = 0u32;
        loop {
            let mut bill = self.store.load_bill(clinic, bill_id).await?;
            let now = self.clock.now();

            let refund = RefundRequest::open(&bill, amount, reason.clone(), requested_by, now)?;
            bill.set_refund_exposure(true, now);

            match self.store.insert_refund(&refund, &bill).await {
                Ok(_) => {
                    info!(
                        bill = %bill_id,
                        refund = %refund.id(),
                        amount = %amount,
                        "refund request opened"
                    );
                    return Ok(refund);
                }
                Err(err) if err.is_conflict() && attempts < self.config.write_retries => {
                    attempts += 1;
                    warn!(bill = %bill_id, attempt = attempts, "refund open lost a version race; retrying");
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Submits a draft for approval
    pub async fn submit(
        &self,
        clinic: ClinicId,
        id: RefundRequestId,
    ) -> Result<RefundRequest, BillingError> {
        let mut attempts = 0u32;
        loop {
            let mut refund = self.store.load_refund(clinic, id).await?;
            let loaded_state = refund.state();
            refund.submit(self.clock.now())?;

            match self.store.update_refund(&refund, loaded_state).await {
                Ok(()) => return Ok(refund),
                Err(err) if err.is_conflict() && attempts < self.config.write_retries => {
                    attempts += 1;
                    warn!(refund = %id, attempt = attempts, "refund submit lost a state race; retrying");
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Approves a request; the actor must hold refund-approval rights
    pub async fn approve(
        &self,
        clinic: ClinicId,
        id: RefundRequestId,
        approver: ActorId,
    ) -> Result<RefundRequest, BillingError> {
        self.require_approval_rights(approver).await?;

        let mut attempts = 0u32;
        loop {
            let mut refund = self.store.load_refund(clinic, id).await?;
            let loaded_state = refund.state();
            refund.approve(approver, self.clock.now())?;

            match self.store.update_refund(&refund, loaded_state).await {
                Ok(()) => {
                    info!(refund = %id, approver = %approver, "refund approved");
                    return Ok(refund);
                }
                Err(err) if err.is_conflict() && attempts < self.config.write_retries => {
                    attempts += 1;
                    warn!(refund = %id, attempt = attempts, "refund approval lost a state race; retrying");
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Rejects a request; the actor must hold refund-approval rights
    pub async fn reject(
        &self,
        clinic: ClinicId,
        id: RefundRequestId,
        approver: ActorId,
    ) -> Result<RefundRequest, BillingError> {
        self.require_approval_rights(approver).await?;
        self.close_without_paying(clinic, id, |refund, now| refund.reject(now))
            .await
    }

    /// Cancels a request from any non-terminal state
    pub async fn cancel(
        &self,
        clinic: ClinicId,
        id: RefundRequestId,
    ) -> Result<RefundRequest, BillingError> {
        self.close_without_paying(clinic, id, |refund, now| refund.cancel(now))
            .await
    }

    /// Pays out an approved (or pending) request
    ///
    /// The refundable balance is re-validated here with a fresh bill,
    /// because another request may have completed since this one was
    /// created. On violation the request stays in its prior state.
    pub async fn mark_paid(
        &self,
        clinic: ClinicId,
        id: RefundRequestId,
        method: PaymentMethod,
    ) -> Result<(RefundRequest, Bill), BillingError> {
        let mut attempts = 0u32;
        loop {
            let mut refund = self.store.load_refund(clinic, id).await?;
            let loaded_state = refund.state();
            let mut bill = self.store.load_bill(clinic, refund.bill_id()).await?;
            let now = self.clock.now();
            let today = self.clock.today(&self.config.timezone);

            if refund.amount() > bill.refundable_balance() {
                return Err(BillingError::conflict(format!(
                    "Refund of {} exceeds the current refundable balance {}",
                    refund.amount(),
                    bill.refundable_balance()
                )));
            }

            refund.mark_paid(method, now)?;

            let others_open = self
                .other_open_requests(clinic, refund.bill_id(), refund.id())
                .await?;
            bill.apply_refund_paid(refund.amount(), others_open, now, today)?;

            match self.store.commit_refund(&refund, loaded_state, &bill).await {
                Ok(saved) => {
                    info!(
                        bill = %saved.id(),
                        refund = %refund.id(),
                        amount = %refund.amount(),
                        refund_status = %saved.refund_status(),
                        "refund paid out"
                    );
                    return Ok((refund, saved));
                }
                Err(err) if err.is_conflict() && attempts < self.config.write_retries => {
                    attempts += 1;
                    warn!(refund = %id, attempt = attempts, "refund payout lost a version race; retrying");
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Refund requests for a bill
    pub async fn list_requests(
        &self,
        clinic: ClinicId,
        bill: BillId,
    ) -> Result<Vec<RefundRequest>, BillingError> {
        Ok(self.store.refunds_for_bill(clinic, bill).await?)
    }

    async fn require_approval_rights(&self, actor: ActorId) -> Result<(), BillingError> {
        if !self.access.can_approve_refunds(actor).await? {
            return Err(BillingError::permission(format!(
                "Actor {actor} lacks refund-approval rights"
            )));
        }
        Ok(())
    }

    /// Shared path for reject/cancel: close the request and recompute the
    /// bill's refund exposure from the remaining open requests
    async fn close_without_paying(
        &self,
        clinic: ClinicId,
        id: RefundRequestId,
        close: impl Fn(&mut RefundRequest, chrono::DateTime<chrono::Utc>) -> Result<(), BillingError>,
    ) -> Result<RefundRequest, BillingError> {
        let mut attempts = 0u32;
        loop {
            let mut refund = self.store.load_refund(clinic, id).await?;
            let loaded_state = refund.state();
            let mut bill = self.store.load_bill(clinic, refund.bill_id()).await?;
            let now = self.clock.now();

            close(&mut refund, now)?;

            let others_open = self
                .other_open_requests(clinic, refund.bill_id(), refund.id())
                .await?;
            bill.set_refund_exposure(others_open, now);

            match self.store.commit_refund(&refund, loaded_state, &bill).await {
                Ok(_) => {
                    info!(refund = %id, state = %refund.state(), "refund request closed");
                    return Ok(refund);
                }
                Err(err) if err.is_conflict() && attempts < self.config.write_retries => {
                    attempts += 1;
                    warn!(refund = %id, attempt = attempts, "refund close lost a version race; retrying");
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn other_open_requests(
        &self,
        clinic: ClinicId,
        bill: BillId,
        except: RefundRequestId,
    ) -> Result<bool, BillingError> {
        let requests = self.store.refunds_for_bill(clinic, bill).await?;
        Ok(requests
            .iter()
            .any(|r| r.id() != except && !r.state().is_terminal()))
    }
}
