//! Wired Service Harness
//!
//! A fully wired billing environment over the in-memory adapters, with a
//! controllable clock. Integration tests construct one harness and drive
//! the real services against it.

use std::sync::Arc;

use core_kernel::{ActorId, ClinicId, FixedClock, PatientId, VisitId};

use domain_billing::adapters::{
    InMemoryLedgerStore, InMemoryPatientDirectory, StaticAccessPolicy,
};
use domain_billing::config::LedgerConfig;
use domain_billing::ledger::PaymentLedger;
use domain_billing::orchestrator::SaveOrchestrator;
use domain_billing::reconciliation::Reconciliation;
use domain_billing::workflow::RefundWorkflow;

use crate::fixtures::TemporalFixtures;

/// One clinic's worth of wired billing services over in-memory state
pub struct BillingHarness {
    pub clinic: ClinicId,
    pub store: Arc<InMemoryLedgerStore>,
    pub directory: Arc<InMemoryPatientDirectory>,
    pub access: Arc<StaticAccessPolicy>,
    pub clock: Arc<FixedClock>,
    pub config: LedgerConfig,
    pub ledger: PaymentLedger,
    pub workflow: RefundWorkflow,
    pub reconciliation: Reconciliation,
    pub orchestrator: SaveOrchestrator,
}

impl BillingHarness {
    /// Builds a harness whose clock is frozen at the reference instant
    pub fn new() -> Self {
        let clinic = ClinicId::new();
        let store = Arc::new(InMemoryLedgerStore::new());
        let directory = Arc::new(InMemoryPatientDirectory::new());
        let access = Arc::new(StaticAccessPolicy::new());
        let clock = Arc::new(FixedClock::at(TemporalFixtures::reference_instant()));
        let config = LedgerConfig::default();

        let store_port: Arc<dyn domain_billing::ports::LedgerStore> = store.clone();
        let directory_port: Arc<dyn domain_billing::ports::PatientDirectory> = directory.clone();
        let access_port: Arc<dyn domain_billing::ports::AccessPolicy> = access.clone();
        let clock_port: Arc<dyn core_kernel::Clock> = clock.clone();

        let ledger = PaymentLedger::new(store_port.clone(), clock_port.clone(), config.clone());
        let workflow = RefundWorkflow::new(
            store_port.clone(),
            access_port,
            clock_port.clone(),
            config.clone(),
        );
        let reconciliation = Reconciliation::new(store_port.clone(), config.clone());
        let orchestrator = SaveOrchestrator::new(
            store_port,
            directory_port,
            clock_port,
            config.clone(),
        );

        Self {
            clinic,
            store,
            directory,
            access,
            clock,
            config,
            ledger,
            workflow,
            reconciliation,
            orchestrator,
        }
    }

    /// Registers a patient under the harness clinic
    pub fn patient(&self) -> PatientId {
        let patient = PatientId::new();
        self.directory.register_patient(self.clinic, patient);
        patient
    }

    /// Registers a visit under the harness clinic
    pub fn visit(&self) -> VisitId {
        let visit = VisitId::new();
        self.directory.register_visit(self.clinic, visit);
        visit
    }

    /// Registers an actor with refund-approval rights
    pub fn approver(&self) -> ActorId {
        let actor = ActorId::new();
        self.access.allow(actor);
        actor
    }
}

impl Default for BillingHarness {
    fn default() -> Self {
        Self::new()
    }
}
