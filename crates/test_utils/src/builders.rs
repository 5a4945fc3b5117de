//! Test Data Builders
//!
//! Builder patterns for constructing billing test data with sensible
//! defaults, so tests only spell out the fields they care about.

use chrono::NaiveDate;
use core_kernel::{ClinicId, Currency, Money, PatientId, Percent, VisitId};
use fake::faker::lorem::en::Word;
use fake::Fake;
use rust_decimal_macros::dec;

use domain_billing::bill::Bill;
use domain_billing::error::BillingError;
use domain_billing::line_item::{BillItem, ItemKind};
use domain_billing::payment::{PaymentMethod, PaymentRecord};

use crate::fixtures::{IdFixtures, MoneyFixtures, TemporalFixtures};

/// A plausible random item name for tests that don't assert on it
pub fn random_item_name() -> String {
    let word: String = Word().fake();
    format!("Test {word}")
}

/// Builder for constructing test bill items
pub struct BillItemBuilder {
    kind: ItemKind,
    name: String,
    quantity: u32,
    unit_price: Money,
    discount: Percent,
    tax: Percent,
}

impl Default for BillItemBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BillItemBuilder {
    /// Creates a builder for a single 300.00 INR consultation
    pub fn new() -> Self {
        Self {
            kind: ItemKind::Consultation,
            name: "Consultation".to_string(),
            quantity: 1,
            unit_price: MoneyFixtures::inr_300(),
            discount: Percent::ZERO,
            tax: Percent::ZERO,
        }
    }

    pub fn with_kind(mut self, kind: ItemKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_quantity(mut self, quantity: u32) -> Self {
        self.quantity = quantity;
        self
    }

    pub fn with_unit_price(mut self, price: Money) -> Self {
        self.unit_price = price;
        self
    }

    pub fn with_discount(mut self, discount: Percent) -> Self {
        self.discount = discount;
        self
    }

    pub fn with_tax(mut self, tax: Percent) -> Self {
        self.tax = tax;
        self
    }

    pub fn build(self) -> Result<BillItem, BillingError> {
        BillItem::new(
            self.kind,
            self.name,
            self.quantity,
            self.unit_price,
            self.discount,
            self.tax,
        )
    }
}

/// Builder for constructing test bills directly, without going through
/// the save orchestrator
pub struct BillBuilder {
    clinic_id: ClinicId,
    patient_id: PatientId,
    visit_id: Option<VisitId>,
    bill_number: String,
    items: Vec<BillItem>,
    currency: Currency,
    notes: Option<String>,
    due_date: Option<NaiveDate>,
}

impl Default for BillBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BillBuilder {
    /// Creates a builder for a one-item 300.00 INR bill
    pub fn new() -> Self {
        Self {
            clinic_id: IdFixtures::clinic_id(),
            patient_id: IdFixtures::patient_id(),
            visit_id: None,
            bill_number: "BILL-000001".to_string(),
            items: Vec::new(),
            currency: Currency::INR,
            notes: None,
            due_date: None,
        }
    }

    pub fn with_clinic(mut self, clinic: ClinicId) -> Self {
        self.clinic_id = clinic;
        self
    }

    pub fn with_patient(mut self, patient: PatientId) -> Self {
        self.patient_id = patient;
        self
    }

    pub fn with_visit(mut self, visit: VisitId) -> Self {
        self.visit_id = Some(visit);
        self
    }

    pub fn with_bill_number(mut self, number: impl Into<String>) -> Self {
        self.bill_number = number.into();
        self
    }

    pub fn with_item(mut self, item: BillItem) -> Self {
        self.items.push(item);
        self
    }

    pub fn with_currency(mut self, currency: Currency) -> Self {
        self.currency = currency;
        self
    }

    pub fn with_due_date(mut self, due: NaiveDate) -> Self {
        self.due_date = Some(due);
        self
    }

    pub fn build(mut self) -> Result<Bill, BillingError> {
        if self.items.is_empty() {
            self.items.push(BillItemBuilder::new().build()?);
        }
        Bill::create(
            self.clinic_id,
            self.patient_id,
            self.visit_id,
            self.bill_number,
            self.items,
            self.currency,
            self.notes,
            self.due_date,
            TemporalFixtures::reference_instant(),
            TemporalFixtures::reference_date(),
        )
    }
}

/// Builder for constructing test payment records
pub struct PaymentBuilder {
    bill_id: core_kernel::BillId,
    clinic_id: ClinicId,
    amount: Money,
    method: PaymentMethod,
    payment_date: chrono::DateTime<chrono::Utc>,
    received_by: core_kernel::ActorId,
    reference: Option<String>,
    idempotency_key: Option<String>,
}

impl Default for PaymentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PaymentBuilder {
    /// Creates a builder for a 150.00 INR cash payment
    pub fn new() -> Self {
        Self {
            bill_id: IdFixtures::bill_id(),
            clinic_id: IdFixtures::clinic_id(),
            amount: MoneyFixtures::inr_150(),
            method: PaymentMethod::Cash,
            payment_date: TemporalFixtures::reference_instant(),
            received_by: IdFixtures::actor_id(),
            reference: None,
            idempotency_key: None,
        }
    }

    pub fn for_bill(mut self, bill: &Bill) -> Self {
        self.bill_id = bill.id();
        self.clinic_id = bill.clinic_id();
        self
    }

    pub fn with_amount(mut self, amount: Money) -> Self {
        self.amount = amount;
        self
    }

    pub fn with_method(mut self, method: PaymentMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_payment_date(mut self, date: chrono::DateTime<chrono::Utc>) -> Self {
        self.payment_date = date;
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn build(self) -> Result<PaymentRecord, BillingError> {
        let mut record = PaymentRecord::new(
            self.bill_id,
            self.clinic_id,
            self.amount,
            self.method,
            self.payment_date,
            self.received_by,
            self.payment_date,
        )?;
        if let Some(reference) = self.reference {
            record = record.with_reference(reference);
        }
        if let Some(key) = self.idempotency_key {
            record = record.with_idempotency_key(key);
        }
        Ok(record)
    }
}

/// Shorthand for an item priced at a given whole amount
pub fn priced_item(name: &str, price: Money) -> Result<BillItem, BillingError> {
    BillItemBuilder::new().with_name(name).with_unit_price(price).build()
}

/// Shorthand for the common one-line 300.00 INR bill
pub fn simple_bill(clinic: ClinicId, patient: PatientId) -> Result<Bill, BillingError> {
    BillBuilder::new()
        .with_clinic(clinic)
        .with_patient(patient)
        .build()
}

/// A 100.00 INR medicine line with quantity 2 and a 10% discount, for
/// tests that need a multi-line bill
pub fn discounted_medicine() -> Result<BillItem, BillingError> {
    BillItemBuilder::new()
        .with_kind(ItemKind::Medicine)
        .with_name("Paracetamol 500mg")
        .with_quantity(2)
        .with_unit_price(Money::new(dec!(100.00), Currency::INR))
        .with_discount(crate::fixtures::PercentFixtures::ten())
        .build()
}
