//! Billing domain ports
//!
//! The services talk to persistence and to external collaborators only
//! through these traits, so the same logic runs against the in-memory
//! adapter in tests and the PostgreSQL repository in production.
//!
//! # Write contract
//!
//! Every write that touches a bill is version-checked: the adapter
//! compares the version the caller loaded against the stored one and
//! returns `PortError::Conflict` on a mismatch. `commit_payment` and
//! `commit_refund` are additionally atomic - the record and the bill
//! update land together or not at all. On success the adapter returns the
//! bill as stored, with its version advanced.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use core_kernel::{
    ActorId, BillId, ClinicId, DoctorId, DomainPort, PatientId, PortError, RefundRequestId,
    VisitId,
};

use crate::bill::Bill;
use crate::payment::PaymentRecord;
use crate::refund::{RefundRequest, RefundState};

/// Persistence port for bills, payment records, and refund requests
///
/// All operations are scoped to a clinic; an id that exists under another
/// clinic is reported as `NotFound`.
#[async_trait]
pub trait LedgerStore: DomainPort {
    /// Issues the next clinic-unique bill number
    async fn next_bill_number(&self, clinic: ClinicId) -> Result<String, PortError>;

    async fn insert_bill(&self, bill: &Bill) -> Result<(), PortError>;

    async fn load_bill(&self, clinic: ClinicId, id: BillId) -> Result<Bill, PortError>;

    /// Version-checked bill update; returns the stored bill
    async fn update_bill(&self, bill: &Bill) -> Result<Bill, PortError>;

    /// Cascade-deletes a bill with its items, payments, and refund
    /// requests in one atomic operation
    async fn delete_bill(&self, clinic: ClinicId, id: BillId) -> Result<(), PortError>;

    /// Atomically appends a payment record and applies the matching bill
    /// update; version-checked. This is the transaction boundary that
    /// keeps `paid_amount` equal to the sum of payment records.
    async fn commit_payment(
        &self,
        record: &PaymentRecord,
        bill: &Bill,
    ) -> Result<Bill, PortError>;

    /// Payments for a bill, ordered by `payment_date` descending
    async fn payments_for_bill(
        &self,
        clinic: ClinicId,
        bill: BillId,
    ) -> Result<Vec<PaymentRecord>, PortError>;

    /// Payments whose `payment_date` falls in `[from, to)`
    async fn payments_between(
        &self,
        clinic: ClinicId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PaymentRecord>, PortError>;

    /// Looks up a payment by its client idempotency key
    async fn find_payment_by_key(
        &self,
        clinic: ClinicId,
        bill: BillId,
        key: &str,
    ) -> Result<Option<PaymentRecord>, PortError>;

    /// Atomically inserts a refund request and applies the matching bill
    /// update (refund exposure); version-checked
    async fn insert_refund(
        &self,
        refund: &RefundRequest,
        bill: &Bill,
    ) -> Result<Bill, PortError>;

    async fn load_refund(
        &self,
        clinic: ClinicId,
        id: RefundRequestId,
    ) -> Result<RefundRequest, PortError>;

    /// Updates a refund request without touching its bill (submit/approve)
    ///
    /// The write only lands if the stored request is still in `expected`;
    /// a request moved by a concurrent transition yields `Conflict`, so a
    /// terminal state can never be overwritten.
    async fn update_refund(
        &self,
        refund: &RefundRequest,
        expected: RefundState,
    ) -> Result<(), PortError>;

    /// Atomically updates a refund request together with its bill
    /// (paid / rejected / cancelled transitions); the bill write is
    /// version-checked and the refund write is guarded by `expected`,
    /// like [`update_refund`](Self::update_refund)
    async fn commit_refund(
        &self,
        refund: &RefundRequest,
        expected: RefundState,
        bill: &Bill,
    ) -> Result<Bill, PortError>;

    async fn refunds_for_bill(
        &self,
        clinic: ClinicId,
        bill: BillId,
    ) -> Result<Vec<RefundRequest>, PortError>;
}

/// Read-mostly port to the patient/visit collaborator
///
/// The ledger only resolves ids and, best-effort, forwards the doctor
/// linkage of a visit; it never owns patient or visit data.
#[async_trait]
pub trait PatientDirectory: DomainPort {
    async fn patient_exists(
        &self,
        clinic: ClinicId,
        patient: PatientId,
    ) -> Result<bool, PortError>;

    async fn visit_exists(&self, clinic: ClinicId, visit: VisitId) -> Result<bool, PortError>;

    async fn update_visit_doctor(
        &self,
        clinic: ClinicId,
        visit: VisitId,
        doctor: DoctorId,
    ) -> Result<(), PortError>;
}

/// Port to the identity/permission collaborator
#[async_trait]
pub trait AccessPolicy: DomainPort {
    /// Whether the actor holds refund-approval rights
    async fn can_approve_refunds(&self, actor: ActorId) -> Result<bool, PortError>;
}
