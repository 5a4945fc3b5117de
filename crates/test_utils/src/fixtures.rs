//! Pre-built Test Fixtures
//!
//! Ready-to-use test data for common billing entities. Fixtures are
//! consistent and predictable so assertions can use exact values.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use core_kernel::{
    ActorId, BillId, ClinicId, ClinicTimezone, Currency, Money, PatientId, Percent, VisitId,
};
use rust_decimal_macros::dec;

/// Fixture for Money test data
pub struct MoneyFixtures;

impl MoneyFixtures {
    /// A standard consultation fee
    pub fn inr_300() -> Money {
        Money::new(dec!(300.00), Currency::INR)
    }

    /// A partial payment against [`MoneyFixtures::inr_300`]
    pub fn inr_150() -> Money {
        Money::new(dec!(150.00), Currency::INR)
    }

    /// A typical refund amount
    pub fn inr_100() -> Money {
        Money::new(dec!(100.00), Currency::INR)
    }

    pub fn inr_zero() -> Money {
        Money::zero(Currency::INR)
    }

    /// A USD amount for currency mismatch tests
    pub fn usd_100() -> Money {
        Money::new(dec!(100.00), Currency::USD)
    }
}

/// Fixture for Percent test data
pub struct PercentFixtures;

impl PercentFixtures {
    pub fn none() -> Percent {
        Percent::ZERO
    }

    /// A standard 10% discount
    pub fn ten() -> Percent {
        Percent::new(dec!(10)).expect("10 is a valid percent")
    }

    /// A standard 18% tax rate
    pub fn gst() -> Percent {
        Percent::new(dec!(18)).expect("18 is a valid percent")
    }
}

/// Fixture for temporal test data
pub struct TemporalFixtures;

impl TemporalFixtures {
    /// A fixed reference instant, mid-morning clinic time
    pub fn reference_instant() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 5, 30, 0)
            .single()
            .expect("valid reference instant")
    }

    /// The clinic-local date of [`TemporalFixtures::reference_instant`]
    pub fn reference_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 10).expect("valid reference date")
    }

    /// A due date safely in the past relative to the reference instant
    pub fn past_due_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 2, 1).expect("valid past due date")
    }

    /// The default clinic timezone
    pub fn clinic_tz() -> ClinicTimezone {
        ClinicTimezone::new(Tz::Asia__Kolkata)
    }
}

/// Fixture for entity identifiers
pub struct IdFixtures;

impl IdFixtures {
    pub fn clinic_id() -> ClinicId {
        ClinicId::new()
    }

    pub fn bill_id() -> BillId {
        BillId::new()
    }

    pub fn patient_id() -> PatientId {
        PatientId::new()
    }

    pub fn visit_id() -> VisitId {
        VisitId::new()
    }

    pub fn actor_id() -> ActorId {
        ActorId::new()
    }
}
