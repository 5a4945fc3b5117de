//! Core Kernel - Foundational types and utilities for the clinic ledger
//!
//! This crate provides the fundamental building blocks used across all domain
//! modules:
//! - Money types with precise decimal arithmetic (never floating point)
//! - Validated percentage rates for discounts and taxes
//! - An injectable clock for deterministic time handling
//! - Common identifiers and port abstractions

pub mod money;
pub mod clock;
pub mod identifiers;
pub mod ports;

pub use money::{Money, Currency, Percent, MoneyError};
pub use clock::{Clock, SystemClock, FixedClock, ClinicTimezone};
pub use identifiers::{
    BillId, PaymentRecordId, RefundRequestId,
    PatientId, VisitId, ClinicId, DoctorId, ActorId,
};
pub use ports::{PortError, DomainPort};
