//! In-memory ledger adapters
//!
//! Full implementations of the billing ports over process-local state,
//! honouring the same write contract as the PostgreSQL repository:
//! version-checked bill writes, atomic payment/refund commits, and
//! clinic scoping. Used by the service tests and handy for demos.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use core_kernel::{
    ActorId, BillId, ClinicId, DoctorId, DomainPort, PatientId, PortError, RefundRequestId,
    VisitId,
};

use crate::bill::Bill;
use crate::payment::PaymentRecord;
use crate::ports::{AccessPolicy, LedgerStore, PatientDirectory};
use crate::refund::{RefundRequest, RefundState};

#[derive(Default)]
struct StoreInner {
    bills: HashMap<BillId, Bill>,
    payments: Vec<PaymentRecord>,
    refunds: HashMap<RefundRequestId, RefundRequest>,
    bill_sequences: HashMap<ClinicId, u64>,
}

/// In-memory implementation of [`LedgerStore`]
#[derive(Default)]
pub struct InMemoryLedgerStore {
    inner: RwLock<StoreInner>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of payment records held, across all bills
    pub fn payment_count(&self) -> usize {
        self.read().payments.len()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, StoreInner> {
        self.inner.read().expect("ledger store lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().expect("ledger store lock poisoned")
    }
}

fn bill_in_clinic<'a>(
    inner: &'a StoreInner,
    clinic: ClinicId,
    id: BillId,
) -> Result<&'a Bill, PortError> {
    inner
        .bills
        .get(&id)
        .filter(|b| b.clinic_id() == clinic)
        .ok_or_else(|| PortError::not_found("Bill", id))
}

/// Version check shared by every bill write. Stores the incoming bill
/// with its version advanced and returns the stored copy.
fn store_bill_checked(inner: &mut StoreInner, bill: &Bill) -> Result<Bill, PortError> {
    let stored = inner
        .bills
        .get(&bill.id())
        .ok_or_else(|| PortError::not_found("Bill", bill.id()))?;
    if stored.version() != bill.version() {
        return Err(PortError::conflict(format!(
            "Bill {} was modified concurrently (expected version {}, found {})",
            bill.id(),
            bill.version(),
            stored.version()
        )));
    }
    let mut next = bill.clone();
    next.advance_version();
    inner.bills.insert(next.id(), next.clone());
    Ok(next)
}

/// State check shared by every refund write. The stored request must
/// still be in the state the caller loaded it in.
fn store_refund_checked(
    inner: &mut StoreInner,
    refund: &RefundRequest,
    expected: RefundState,
) -> Result<(), PortError> {
    let stored = inner
        .refunds
        .get(&refund.id())
        .ok_or_else(|| PortError::not_found("RefundRequest", refund.id()))?;
    if stored.state() != expected {
        return Err(PortError::conflict(format!(
            "Refund request {} was modified concurrently (expected state {}, found {})",
            refund.id(),
            expected,
            stored.state()
        )));
    }
    inner.refunds.insert(refund.id(), refund.clone());
    Ok(())
}

impl DomainPort for InMemoryLedgerStore {}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn next_bill_number(&self, clinic: ClinicId) -> Result<String, PortError> {
        let mut inner = self.write();
        let seq = inner.bill_sequences.entry(clinic).or_insert(0);
        *seq += 1;
        Ok(format!("BILL-{:06}", seq))
    }

    async fn insert_bill(&self, bill: &Bill) -> Result<(), PortError> {
        let mut inner = self.write();
        if inner.bills.contains_key(&bill.id()) {
            return Err(PortError::conflict(format!(
                "Bill {} already exists",
                bill.id()
            )));
        }
        inner.bills.insert(bill.id(), bill.clone());
        Ok(())
    }

    async fn load_bill(&self, clinic: ClinicId, id: BillId) -> Result<Bill, PortError> {
        let inner = self.read();
        bill_in_clinic(&inner, clinic, id).cloned()
    }

    async fn update_bill(&self, bill: &Bill) -> Result<Bill, PortError> {
        let mut inner = self.write();
        bill_in_clinic(&inner, bill.clinic_id(), bill.id())?;
        store_bill_checked(&mut inner, bill)
    }

    async fn delete_bill(&self, clinic: ClinicId, id: BillId) -> Result<(), PortError> {
        let mut inner = self.write();
        bill_in_clinic(&inner, clinic, id)?;
        inner.bills.remove(&id);
        inner.payments.retain(|p| p.bill_id != id);
        inner.refunds.retain(|_, r| r.bill_id() != id);
        Ok(())
    }

    async fn commit_payment(
        &self,
        record: &PaymentRecord,
        bill: &Bill,
    ) -> Result<Bill, PortError> {
        let mut inner = self.write();
        bill_in_clinic(&inner, bill.clinic_id(), bill.id())?;
        if let Some(key) = &record.idempotency_key {
            let duplicate = inner
                .payments
                .iter()
                .any(|p| p.bill_id == record.bill_id && p.idempotency_key.as_deref() == Some(key));
            if duplicate {
                return Err(PortError::conflict(format!(
                    "Idempotency key {key} already recorded for bill {}",
                    record.bill_id
                )));
            }
        }
        let saved = store_bill_checked(&mut inner, bill)?;
        inner.payments.push(record.clone());
        Ok(saved)
    }

    async fn payments_for_bill(
        &self,
        clinic: ClinicId,
        bill: BillId,
    ) -> Result<Vec<PaymentRecord>, PortError> {
        let inner = self.read();
        let mut payments: Vec<PaymentRecord> = inner
            .payments
            .iter()
            .filter(|p| p.clinic_id == clinic && p.bill_id == bill)
            .cloned()
            .collect();
        payments.sort_by(|a, b| b.payment_date.cmp(&a.payment_date));
        Ok(payments)
    }

    async fn payments_between(
        &self,
        clinic: ClinicId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PaymentRecord>, PortError> {
        let inner = self.read();
        Ok(inner
            .payments
            .iter()
            .filter(|p| p.clinic_id == clinic && p.payment_date >= from && p.payment_date < to)
            .cloned()
            .collect())
    }

    async fn find_payment_by_key(
        &self,
        clinic: ClinicId,
        bill: BillId,
        key: &str,
    ) -> Result<Option<PaymentRecord>, PortError> {
        let inner = self.read();
        Ok(inner
            .payments
            .iter()
            .find(|p| {
                p.clinic_id == clinic
                    && p.bill_id == bill
                    && p.idempotency_key.as_deref() == Some(key)
            })
            .cloned())
    }

    async fn insert_refund(
        &self,
        refund: &RefundRequest,
        bill: &Bill,
    ) -> Result<Bill, PortError> {
        let mut inner = self.write();
        bill_in_clinic(&inner, refund.clinic_id(), refund.bill_id())?;
        let saved = store_bill_checked(&mut inner, bill)?;
        inner.refunds.insert(refund.id(), refund.clone());
        Ok(saved)
    }

    async fn load_refund(
        &self,
        clinic: ClinicId,
        id: RefundRequestId,
    ) -> Result<RefundRequest, PortError> {
        let inner = self.read();
        inner
            .refunds
            .get(&id)
            .filter(|r| r.clinic_id() == clinic)
            .cloned()
            .ok_or_else(|| PortError::not_found("RefundRequest", id))
    }

    async fn update_refund(
        &self,
        refund: &RefundRequest,
        expected: RefundState,
    ) -> Result<(), PortError> {
        let mut inner = self.write();
        store_refund_checked(&mut inner, refund, expected)
    }

    async fn commit_refund(
        &self,
        refund: &RefundRequest,
        expected: RefundState,
        bill: &Bill,
    ) -> Result<Bill, PortError> {
        let mut inner = self.write();
        let stored = inner
            .refunds
            .get(&refund.id())
            .ok_or_else(|| PortError::not_found("RefundRequest", refund.id()))?;
        if stored.state() != expected {
            return Err(PortError::conflict(format!(
                "Refund request {} was modified concurrently (expected state {}, found {})",
                refund.id(),
                expected,
                stored.state()
            )));
        }
        let saved = store_bill_checked(&mut inner, bill)?;
        inner.refunds.insert(refund.id(), refund.clone());
        Ok(saved)
    }

    async fn refunds_for_bill(
        &self,
        clinic: ClinicId,
        bill: BillId,
    ) -> Result<Vec<RefundRequest>, PortError> {
        let inner = self.read();
        let mut refunds: Vec<RefundRequest> = inner
            .refunds
            .values()
            .filter(|r| r.clinic_id() == clinic && r.bill_id() == bill)
            .cloned()
            .collect();
        refunds.sort_by_key(|r| r.created_at());
        Ok(refunds)
    }
}

#[derive(Default)]
struct DirectoryInner {
    patients: HashSet<(ClinicId, PatientId)>,
    visits: HashMap<(ClinicId, VisitId), Option<DoctorId>>,
}

/// In-memory implementation of [`PatientDirectory`]
#[derive(Default)]
pub struct InMemoryPatientDirectory {
    inner: RwLock<DirectoryInner>,
    fail_doctor_updates: AtomicBool,
}

impl InMemoryPatientDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_patient(&self, clinic: ClinicId, patient: PatientId) {
        let mut inner = self.inner.write().expect("directory lock poisoned");
        inner.patients.insert((clinic, patient));
    }

    pub fn register_visit(&self, clinic: ClinicId, visit: VisitId) {
        let mut inner = self.inner.write().expect("directory lock poisoned");
        inner.visits.insert((clinic, visit), None);
    }

    /// Makes subsequent doctor updates fail, to exercise the best-effort
    /// path of the save saga
    pub fn fail_doctor_updates(&self, fail: bool) {
        self.fail_doctor_updates.store(fail, Ordering::SeqCst);
    }

    pub fn visit_doctor(&self, clinic: ClinicId, visit: VisitId) -> Option<DoctorId> {
        let inner = self.inner.read().expect("directory lock poisoned");
        inner.visits.get(&(clinic, visit)).copied().flatten()
    }
}

impl DomainPort for InMemoryPatientDirectory {}

#[async_trait]
impl PatientDirectory for InMemoryPatientDirectory {
    async fn patient_exists(
        &self,
        clinic: ClinicId,
        patient: PatientId,
    ) -> Result<bool, PortError> {
        let inner = self.inner.read().expect("directory lock poisoned");
        Ok(inner.patients.contains(&(clinic, patient)))
    }

    async fn visit_exists(&self, clinic: ClinicId, visit: VisitId) -> Result<bool, PortError> {
        let inner = self.inner.read().expect("directory lock poisoned");
        Ok(inner.visits.contains_key(&(clinic, visit)))
    }

    async fn update_visit_doctor(
        &self,
        clinic: ClinicId,
        visit: VisitId,
        doctor: DoctorId,
    ) -> Result<(), PortError> {
        if self.fail_doctor_updates.load(Ordering::SeqCst) {
            return Err(PortError::connection("visit service unavailable"));
        }
        let mut inner = self.inner.write().expect("directory lock poisoned");
        match inner.visits.get_mut(&(clinic, visit)) {
            Some(slot) => {
                *slot = Some(doctor);
                Ok(())
            }
            None => Err(PortError::not_found("Visit", visit)),
        }
    }
}

/// Access policy backed by a fixed allow-list of approvers
#[derive(Default)]
pub struct StaticAccessPolicy {
    approvers: RwLock<Vec<ActorId>>,
}

impl StaticAccessPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(&self, actor: ActorId) {
        let mut approvers = self.approvers.write().expect("access policy lock poisoned");
        approvers.push(actor);
    }
}

impl DomainPort for StaticAccessPolicy {}

#[async_trait]
impl AccessPolicy for StaticAccessPolicy {
    async fn can_approve_refunds(&self, actor: ActorId) -> Result<bool, PortError> {
        let approvers = self.approvers.read().expect("access policy lock poisoned");
        Ok(approvers.contains(&actor))
    }
}
