//! Billing Ledger & Refund Workflow Domain
//!
//! This crate implements clinic billing from line-item calculation through
//! the append-only payment ledger, the refund approval workflow, and daily
//! cash reconciliation.
//!
//! # Refund Lifecycle
//!
//! ```text
//! Draft -> Pending Approval -> Approved/Rejected -> Paid/Cancelled
//! ```

pub mod adapters;
pub mod bill;
pub mod config;
pub mod error;
pub mod ledger;
pub mod line_item;
pub mod orchestrator;
pub mod payment;
pub mod ports;
pub mod reconciliation;
pub mod refund;
pub mod workflow;

pub use bill::{
    derive_payment_status, derive_refund_status, Bill, BillSnapshot, PaymentStatus, RefundStatus,
};
pub use config::LedgerConfig;
pub use error::BillingError;
pub use ledger::{PaymentLedger, RecordPaymentRequest};
pub use line_item::{compute_line_total, BillItem, ItemKind};
pub use orchestrator::{SaveBillRequest, SaveOrchestrator, SaveOutcome};
pub use payment::{PaymentMethod, PaymentRecord};
pub use ports::{AccessPolicy, LedgerStore, PatientDirectory};
pub use reconciliation::{summarize, DailyPaymentSummary, MethodBreakdown, Reconciliation};
pub use refund::{RefundRequest, RefundSnapshot, RefundState};
pub use workflow::RefundWorkflow;
