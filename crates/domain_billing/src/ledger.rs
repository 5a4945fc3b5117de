//! Payment ledger service
//!
//! Records money received against bills. Each successful recording is one
//! atomic unit in the store: the append of the `PaymentRecord` and the
//! bill's `paid_amount`/status update commit together. Two simultaneous
//! recordings against the same bill cannot both read the pre-update
//! `paid_amount`: the store rejects the second writer's stale version and
//! the service retries against refreshed state.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use core_kernel::{ActorId, BillId, ClinicId, Clock, Money};

use crate::bill::Bill;
use crate::config::LedgerConfig;
use crate::error::BillingError;
use crate::payment::{PaymentMethod, PaymentRecord};
use crate::ports::LedgerStore;

/// Command to record one payment against a bill
#[derive(Debug, Clone)]
pub struct RecordPaymentRequest {
    pub clinic_id: ClinicId,
    pub bill_id: BillId,
    pub amount: Money,
    pub method: PaymentMethod,
    /// When the money changed hands; defaults to now
    pub payment_date: Option<DateTime<Utc>>,
    /// Card / cheque / bank reference
    pub reference: Option<String>,
    pub received_by: ActorId,
    pub notes: Option<String>,
    /// Client-supplied key making a retried submission safe
    pub idempotency_key: Option<String>,
    /// Explicit opt-in to push `paid_amount` past the total
    pub allow_overpayment: bool,
}

impl RecordPaymentRequest {
    pub fn new(
        clinic_id: ClinicId,
        bill_id: BillId,
        amount: Money,
        method: PaymentMethod,
        received_by: ActorId,
    ) -> Self {
        Self {
            clinic_id,
            bill_id,
            amount,
            method,
            payment_date: None,
            reference: None,
            received_by,
            notes: None,
            idempotency_key: None,
            allow_overpayment: false,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn allowing_overpayment(mut self) -> Self {
        self.allow_overpayment = true;
        self
    }
}

/// Application service over the append-only payment history
#[derive(Clone)]
pub struct PaymentLedger {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    config: LedgerConfig,
}

impl PaymentLedger {
    pub fn new(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>, config: LedgerConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Records a payment and updates the owning bill in one atomic unit
    ///
    /// Replaying an idempotency key returns the originally recorded
    /// payment without applying it again. A version conflict from a
    /// concurrent writer is retried against refreshed state, up to the
    /// configured budget.
    pub async fn record_payment(
        &self,
        request: RecordPaymentRequest,
    ) -> Result<(PaymentRecord, Bill), BillingError> {
        if !request.amount.is_positive() {
            return Err(BillingError::validation(format!(
                "Payment amount must be positive, got {}",
                request.amount
            )));
        }

        if let Some(replayed) = self.find_recorded(&request).await? {
            return Ok(replayed);
        }

        let mut attempts = 0u32;
        loop {
            let mut bill = self
                .store
                .load_bill(request.clinic_id, request.bill_id)
                .await?;

            self.check_overpayment(&bill, &request)?;

            let now = self.clock.now();
            let today = self.clock.today(&self.config.timezone);

            let mut record = PaymentRecord::new(
                bill.id(),
                bill.clinic_id(),
                request.amount,
                request.method,
                request.payment_date.unwrap_or(now),
                request.received_by,
                now,
            )?;
            if let Some(reference) = &request.reference {
                record = record.with_reference(reference.clone());
            }
            if let Some(notes) = &request.notes {
                record = record.with_notes(notes.clone());
            }
            if let Some(key) = &request.idempotency_key {
                record = record.with_idempotency_key(key.clone());
            }

            bill.apply_payment(request.amount, now, today)?;

            match self.store.commit_payment(&record, &bill).await {
                Ok(saved) => {
                    info!(
                        bill = %saved.id(),
                        amount = %record.amount,
                        method = %record.method,
                        status = %saved.payment_status(),
                        "payment recorded"
                    );
                    return Ok((record, saved));
                }
                // A conflict can also come from the store's unique check on
                // the idempotency key, when the duplicate submission slipped
                // in after the lookup above. Re-check the key before
                // retrying so the replay contract holds.
                Err(err) if err.is_conflict() => {
                    if let Some(replayed) = self.find_recorded(&request).await? {
                        return Ok(replayed);
                    }
                    if attempts >= self.config.write_retries {
                        return Err(err.into());
                    }
                    attempts += 1;
                    warn!(
                        bill = %request.bill_id,
                        attempt = attempts,
                        "payment commit lost a version race; retrying"
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Looks up the payment already recorded under the request's
    /// idempotency key, if any, together with the current bill
    async fn find_recorded(
        &self,
        request: &RecordPaymentRequest,
    ) -> Result<Option<(PaymentRecord, Bill)>, BillingError> {
        let Some(key) = &request.idempotency_key else {
            return Ok(None);
        };
        let Some(existing) = self
            .store
            .find_payment_by_key(request.clinic_id, request.bill_id, key)
            .await?
        else {
            return Ok(None);
        };

        info!(
            bill = %request.bill_id,
            key = %key,
            "idempotency key replayed; returning the recorded payment"
        );
        let bill = self
            .store
            .load_bill(request.clinic_id, request.bill_id)
            .await?;
        Ok(Some((existing, bill)))
    }

    /// Payments for a bill, most recent first. Read-only and always safe
    /// to retry.
    pub async fn list_payments(
        &self,
        clinic: ClinicId,
        bill: BillId,
    ) -> Result<Vec<PaymentRecord>, BillingError> {
        Ok(self.store.payments_for_bill(clinic, bill).await?)
    }

    fn check_overpayment(
        &self,
        bill: &Bill,
        request: &RecordPaymentRequest,
    ) -> Result<(), BillingError> {
        if request.allow_overpayment {
            return Ok(());
        }

        let new_paid = bill.paid_amount().checked_add(&request.amount)?;
        let tolerance = Money::new(self.config.overpayment_tolerance, bill.currency());
        let limit = bill.total_amount().checked_add(&tolerance)?;
        if new_paid > limit {
            return Err(BillingError::validation(format!(
                "Payment of {} would raise the paid amount to {}, above the \
                 bill total {}",
                request.amount,
                new_paid,
                bill.total_amount()
            )));
        }
        Ok(())
    }
}
