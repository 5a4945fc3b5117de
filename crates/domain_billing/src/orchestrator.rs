//! Save orchestrator
//!
//! One user-initiated "save bill" action is a saga of three
//! independently-committing steps with a defined partial-failure policy:
//!
//! 1. visit doctor update - best-effort, logged and swallowed
//! 2. bill create/update - all-or-nothing, aborts the save on failure
//! 3. payment delta      - retriable; failure surfaces as `PartialSave`
//!    carrying the bill id and attempted amount, so the caller can retry
//!    just the payment with the same idempotency key
//!
//! At most one save per bill is in flight at a time: the guard lives
//! here, keyed by the bill (or, for a new bill, by the patient), not in
//! any client-local flag, so double submission is rejected regardless of
//! how many tabs or sessions the client has open.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use tracing::{info, warn};

use core_kernel::{
    ActorId, BillId, ClinicId, Clock, DoctorId, Money, PatientId, VisitId,
};

use crate::bill::Bill;
use crate::config::LedgerConfig;
use crate::error::BillingError;
use crate::ledger::{PaymentLedger, RecordPaymentRequest};
use crate::line_item::BillItem;
use crate::payment::{PaymentMethod, PaymentRecord};
use crate::ports::{LedgerStore, PatientDirectory};

/// Everything the UI hands over for one save action
#[derive(Debug, Clone)]
pub struct SaveBillRequest {
    pub clinic_id: ClinicId,
    /// `None` creates a new bill
    pub bill_id: Option<BillId>,
    pub patient_id: PatientId,
    pub visit_id: Option<VisitId>,
    /// Doctor to link to the visit, if the user changed it
    pub doctor_id: Option<DoctorId>,
    pub items: Vec<BillItem>,
    pub notes: Option<String>,
    pub due_date: Option<NaiveDate>,
    /// Cumulative paid amount as entered by the user; a value above the
    /// bill's recorded `paid_amount` triggers a payment for the delta
    pub paid_amount_entered: Option<Money>,
    pub payment_method: Option<PaymentMethod>,
    pub payment_reference: Option<String>,
    pub saved_by: ActorId,
    /// Key for the payment step; reused verbatim on a `PartialSave` retry
    pub idempotency_key: Option<String>,
    /// Override to reduce the total below the net paid amount
    pub allow_total_below_net_paid: bool,
    pub allow_overpayment: bool,
}

impl SaveBillRequest {
    pub fn create(
        clinic_id: ClinicId,
        patient_id: PatientId,
        items: Vec<BillItem>,
        saved_by: ActorId,
    ) -> Self {
        Self {
            clinic_id,
            bill_id: None,
            patient_id,
            visit_id: None,
            doctor_id: None,
            items,
            notes: None,
            due_date: None,
            paid_amount_entered: None,
            payment_method: None,
            payment_reference: None,
            saved_by,
            idempotency_key: None,
            allow_total_below_net_paid: false,
            allow_overpayment: false,
        }
    }

    pub fn for_bill(mut self, bill_id: BillId) -> Self {
        self.bill_id = Some(bill_id);
        self
    }

    pub fn with_visit(mut self, visit: VisitId, doctor: Option<DoctorId>) -> Self {
        self.visit_id = Some(visit);
        self.doctor_id = doctor;
        self
    }

    pub fn with_payment(mut self, entered: Money, method: PaymentMethod) -> Self {
        self.paid_amount_entered = Some(entered);
        self.payment_method = Some(method);
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// What a completed save produced
#[derive(Debug, Clone)]
pub struct SaveOutcome {
    pub bill: Bill,
    /// The delta payment, when one was recorded
    pub payment: Option<PaymentRecord>,
}

/// Key under which a save holds its in-flight slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum SaveKey {
    Existing(BillId),
    /// A new bill has no id yet; concurrent creates for the same patient
    /// are treated as the same double submission
    NewFor(PatientId),
}

#[derive(Default)]
struct InFlight {
    keys: Mutex<HashSet<SaveKey>>,
}

impl InFlight {
    fn begin(self: &Arc<Self>, key: SaveKey) -> Result<InFlightGuard, BillingError> {
        let mut keys = self.keys.lock().expect("in-flight lock poisoned");
        if !keys.insert(key) {
            return Err(BillingError::conflict(
                "A save for this bill is already in progress",
            ));
        }
        Ok(InFlightGuard {
            registry: Arc::clone(self),
            key,
        })
    }
}

/// Releases the in-flight slot when the save finishes, on any path
struct InFlightGuard {
    registry: Arc<InFlight>,
    key: SaveKey,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut keys = self
            .registry
            .keys
            .lock()
            .expect("in-flight lock poisoned");
        keys.remove(&self.key);
    }
}

/// Sequences one "save bill" action end to end
pub struct SaveOrchestrator {
    store: Arc<dyn LedgerStore>,
    directory: Arc<dyn PatientDirectory>,
    clock: Arc<dyn Clock>,
    config: LedgerConfig,
    ledger: PaymentLedger,
    in_flight: Arc<InFlight>,
}

impl SaveOrchestrator {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        directory: Arc<dyn PatientDirectory>,
        clock: Arc<dyn Clock>,
        config: LedgerConfig,
    ) -> Self {
        let ledger = PaymentLedger::new(Arc::clone(&store), Arc::clone(&clock), config.clone());
        Self {
            store,
            directory,
            clock,
            config,
            ledger,
            in_flight: Arc::new(InFlight::default()),
        }
    }

    /// Runs the save saga. A re-entrant call for the same bill while one
    /// is running is rejected immediately with a conflict, not queued.
    pub async fn save_bill(&self, request: SaveBillRequest) -> Result<SaveOutcome, BillingError> {
        let key = match request.bill_id {
            Some(id) => SaveKey::Existing(id),
            None => SaveKey::NewFor(request.patient_id),
        };
        let _guard = self.in_flight.begin(key)?;

        // Step 1: best-effort visit linkage. A failure here must not
        // abort the bill save.
        if let (Some(visit), Some(doctor)) = (request.visit_id, request.doctor_id) {
            if let Err(err) = self
                .directory
                .update_visit_doctor(request.clinic_id, visit, doctor)
                .await
            {
                warn!(
                    visit = %visit,
                    error = %err,
                    "visit doctor update failed; continuing with the bill save"
                );
            }
        }

        // Step 2: bill write. All-or-nothing; any failure aborts the save.
        let bill = match request.bill_id {
            None => self.create_bill(&request).await?,
            Some(id) => self.update_bill(id, &request).await?,
        };

        // Step 3: payment delta, surfaced as PartialSave on failure.
        let prior_paid = bill.paid_amount();
        let entered = match request.paid_amount_entered {
            Some(entered) if entered > prior_paid => entered,
            _ => {
                return Ok(SaveOutcome {
                    bill,
                    payment: None,
                })
            }
        };
        let delta = entered.checked_sub(&prior_paid)?;

        let mut payment_request = RecordPaymentRequest::new(
            request.clinic_id,
            bill.id(),
            delta,
            request.payment_method.unwrap_or(PaymentMethod::Cash),
            request.saved_by,
        );
        payment_request.reference = request.payment_reference.clone();
        payment_request.idempotency_key = request.idempotency_key.clone();
        payment_request.allow_overpayment = request.allow_overpayment;

        match self.ledger.record_payment(payment_request).await {
            Ok((record, updated)) => {
                info!(bill = %updated.id(), amount = %record.amount, "bill saved with payment");
                Ok(SaveOutcome {
                    bill: updated,
                    payment: Some(record),
                })
            }
            Err(err) => Err(BillingError::PartialSave {
                bill_id: bill.id(),
                attempted_amount: delta,
                reason: err.to_string(),
            }),
        }
    }

    /// Deletes a bill with its payments and refund requests, refusing
    /// while any refund request is still open
    pub async fn delete_bill(&self, clinic: ClinicId, id: BillId) -> Result<(), BillingError> {
        let refunds = self.store.refunds_for_bill(clinic, id).await?;
        if refunds.iter().any(|r| !r.state().is_terminal()) {
            return Err(BillingError::conflict(
                "Bill has open refund requests and cannot be deleted",
            ));
        }
        self.store.delete_bill(clinic, id).await?;
        info!(bill = %id, "bill deleted with its payments and refunds");
        Ok(())
    }

    async fn create_bill(&self, request: &SaveBillRequest) -> Result<Bill, BillingError> {
        if !self
            .directory
            .patient_exists(request.clinic_id, request.patient_id)
            .await?
        {
            return Err(BillingError::reference("Patient", request.patient_id));
        }
        if let Some(visit) = request.visit_id {
            if !self.directory.visit_exists(request.clinic_id, visit).await? {
                return Err(BillingError::reference("Visit", visit));
            }
        }

        let number = self.store.next_bill_number(request.clinic_id).await?;
        let now = self.clock.now();
        let today = self.clock.today(&self.config.timezone);

        let bill = Bill::create(
            request.clinic_id,
            request.patient_id,
            request.visit_id,
            number,
            request.items.clone(),
            self.config.currency,
            request.notes.clone(),
            request.due_date,
            now,
            today,
        )?;
        self.store.insert_bill(&bill).await?;
        info!(bill = %bill.id(), number = %bill.bill_number(), "bill created");
        Ok(bill)
    }

    async fn update_bill(
        &self,
        id: BillId,
        request: &SaveBillRequest,
    ) -> Result<Bill, BillingError> {
        let mut attempts = 0u32;
        loop {
            let mut bill = self.store.load_bill(request.clinic_id, id).await?;
            let now = self.clock.now();
            let today = self.clock.today(&self.config.timezone);

            bill.replace_items(
                request.items.clone(),
                request.allow_total_below_net_paid,
                now,
                today,
            )?;
            bill.update_details(request.notes.clone(), request.due_date, now, today);

            match self.store.update_bill(&bill).await {
                Ok(saved) => {
                    info!(bill = %saved.id(), total = %saved.total_amount(), "bill updated");
                    return Ok(saved);
                }
                Err(err) if err.is_conflict() && attempts < self.config.write_retries => {
                    attempts += 1;
                    warn!(bill = %id, attempt = attempts, "bill update lost a version race; retrying");
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}
