//! Ledger repository implementation
//!
//! PostgreSQL-backed implementation of the billing `LedgerStore` port.
//! Bills carry a `version` column; every write compares the caller's
//! version in the `WHERE` clause and treats zero affected rows as a
//! concurrent modification. Refund requests are guarded by their state
//! instead of a version column: the `WHERE` clause pins the state the
//! caller loaded, so a transition that lost the race cannot overwrite one
//! that committed first. `commit_payment` and `commit_refund` run the
//! record write and the bill update in one transaction.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::debug;
use uuid::Uuid;

use core_kernel::{
    ActorId, BillId, ClinicId, Currency, DomainPort, Money, PatientId, PaymentRecordId,
    PortError, RefundRequestId, VisitId,
};
use domain_billing::bill::{Bill, BillSnapshot, PaymentStatus, RefundStatus};
use domain_billing::line_item::BillItem;
use domain_billing::payment::{PaymentMethod, PaymentRecord};
use domain_billing::ports::LedgerStore;
use domain_billing::refund::{RefundRequest, RefundSnapshot, RefundState};

use crate::error::DatabaseError;

const UPDATE_REFUND_SQL: &str =
    "UPDATE refund_requests SET state = $1, refund_method = $2, approved_by = $3, \
     approved_at = $4, paid_at = $5, updated_at = $6 \
     WHERE refund_id = $7 AND clinic_id = $8 AND state = $9";

/// PostgreSQL repository behind the billing services
#[derive(Debug, Clone)]
pub struct PgLedgerRepository {
    pool: PgPool,
}

impl PgLedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn parse_enum<T>(value: &str, what: &str) -> Result<T, DatabaseError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| DatabaseError::SerializationError(format!("invalid {what}: {e}")))
}

fn bill_from_row(row: &PgRow) -> Result<Bill, DatabaseError> {
    let currency: Currency = parse_enum(&row.try_get::<String, _>("currency")?, "currency")?;
    let items_json: String = row.try_get("items")?;
    let items: Vec<BillItem> = serde_json::from_str(&items_json)
        .map_err(|e| DatabaseError::SerializationError(format!("invalid bill items: {e}")))?;

    let payment_status: PaymentStatus =
        parse_enum(&row.try_get::<String, _>("payment_status")?, "payment status")?;
    let refund_status: RefundStatus =
        parse_enum(&row.try_get::<String, _>("refund_status")?, "refund status")?;

    Ok(Bill::restore(BillSnapshot {
        id: BillId::from_uuid(row.try_get("bill_id")?),
        clinic_id: ClinicId::from_uuid(row.try_get("clinic_id")?),
        patient_id: PatientId::from_uuid(row.try_get("patient_id")?),
        visit_id: row
            .try_get::<Option<Uuid>, _>("visit_id")?
            .map(VisitId::from_uuid),
        bill_number: row.try_get("bill_number")?,
        items,
        currency,
        total_amount: Money::new(row.try_get::<Decimal, _>("total_amount")?, currency),
        paid_amount: Money::new(row.try_get::<Decimal, _>("paid_amount")?, currency),
        total_refunded: Money::new(row.try_get::<Decimal, _>("total_refunded")?, currency),
        payment_status,
        refund_status,
        notes: row.try_get("notes")?,
        bill_date: row.try_get::<NaiveDate, _>("bill_date")?,
        due_date: row.try_get::<Option<NaiveDate>, _>("due_date")?,
        version: row.try_get("version")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    }))
}

fn payment_from_row(row: &PgRow) -> Result<PaymentRecord, DatabaseError> {
    let currency: Currency = parse_enum(&row.try_get::<String, _>("currency")?, "currency")?;
    let method: PaymentMethod =
        parse_enum(&row.try_get::<String, _>("method")?, "payment method")?;

    Ok(PaymentRecord {
        id: PaymentRecordId::from_uuid(row.try_get("payment_id")?),
        bill_id: BillId::from_uuid(row.try_get("bill_id")?),
        clinic_id: ClinicId::from_uuid(row.try_get("clinic_id")?),
        amount: Money::new(row.try_get::<Decimal, _>("amount")?, currency),
        method,
        payment_date: row.try_get("payment_date")?,
        reference: row.try_get("reference")?,
        received_by: ActorId::from_uuid(row.try_get("received_by")?),
        notes: row.try_get("notes")?,
        idempotency_key: row.try_get("idempotency_key")?,
        created_at: row.try_get("created_at")?,
    })
}

fn refund_from_row(row: &PgRow) -> Result<RefundRequest, DatabaseError> {
    let currency: Currency = parse_enum(&row.try_get::<String, _>("currency")?, "currency")?;
    let state: RefundState = parse_enum(&row.try_get::<String, _>("state")?, "refund state")?;
    let refund_method = row
        .try_get::<Option<String>, _>("refund_method")?
        .map(|m| parse_enum::<PaymentMethod>(&m, "refund method"))
        .transpose()?;

    Ok(RefundRequest::restore(RefundSnapshot {
        id: RefundRequestId::from_uuid(row.try_get("refund_id")?),
        bill_id: BillId::from_uuid(row.try_get("bill_id")?),
        clinic_id: ClinicId::from_uuid(row.try_get("clinic_id")?),
        state,
        amount: Money::new(row.try_get::<Decimal, _>("amount")?, currency),
        reason: row.try_get("reason")?,
        refund_method,
        requested_by: ActorId::from_uuid(row.try_get("requested_by")?),
        approved_by: row
            .try_get::<Option<Uuid>, _>("approved_by")?
            .map(ActorId::from_uuid),
        approved_at: row.try_get("approved_at")?,
        paid_at: row.try_get("paid_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    }))
}

const BILL_COLUMNS: &str = "bill_id, clinic_id, patient_id, visit_id, bill_number, items, \
     currency, total_amount, paid_amount, total_refunded, payment_status, refund_status, \
     notes, bill_date, due_date, version, created_at, updated_at";

const PAYMENT_COLUMNS: &str = "payment_id, bill_id, clinic_id, amount, currency, method, \
     payment_date, reference, received_by, notes, idempotency_key, created_at";

const REFUND_COLUMNS: &str = "refund_id, bill_id, clinic_id, state, amount, currency, reason, \
     refund_method, requested_by, approved_by, approved_at, paid_at, created_at, updated_at";

impl PgLedgerRepository {
    /// Version-checked bill update inside an open transaction. Returns
    /// the bill as stored, with its version advanced by the statement.
    async fn update_bill_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        bill: &Bill,
    ) -> Result<Bill, DatabaseError> {
        let snapshot = bill.snapshot();
        let items_json = serde_json::to_string(&snapshot.items)
            .map_err(|e| DatabaseError::SerializationError(e.to_string()))?;

        let sql = format!(
            "UPDATE bills SET items = $1, total_amount = $2, paid_amount = $3, \
             total_refunded = $4, payment_status = $5, refund_status = $6, notes = $7, \
             due_date = $8, version = version + 1, updated_at = $9 \
             WHERE bill_id = $10 AND clinic_id = $11 AND version = $12 \
             RETURNING {BILL_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(&items_json)
            .bind(snapshot.total_amount.amount())
            .bind(snapshot.paid_amount.amount())
            .bind(snapshot.total_refunded.amount())
            .bind(snapshot.payment_status.as_str())
            .bind(snapshot.refund_status.as_str())
            .bind(&snapshot.notes)
            .bind(snapshot.due_date)
            .bind(snapshot.updated_at)
            .bind(snapshot.id.as_uuid())
            .bind(snapshot.clinic_id.as_uuid())
            .bind(snapshot.version)
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| DatabaseError::from(&e))?;

        match row {
            Some(row) => bill_from_row(&row),
            None => {
                let exists: Option<PgRow> =
                    sqlx::query("SELECT 1 AS one FROM bills WHERE bill_id = $1")
                        .bind(snapshot.id.as_uuid())
                        .fetch_optional(&mut **tx)
                        .await
                        .map_err(|e| DatabaseError::from(&e))?;
                if exists.is_some() {
                    Err(DatabaseError::version_conflict("Bill", snapshot.id))
                } else {
                    Err(DatabaseError::not_found("Bill", snapshot.id))
                }
            }
        }
    }

    /// State-guarded refund update inside an open transaction. Zero
    /// affected rows on an existing request means a concurrent transition
    /// moved it out of `expected`.
    async fn update_refund_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        refund: &RefundRequest,
        expected: RefundState,
    ) -> Result<(), DatabaseError> {
        let snapshot = refund.snapshot();
        let result = sqlx::query(UPDATE_REFUND_SQL)
            .bind(snapshot.state.as_str())
            .bind(snapshot.refund_method.map(|m| m.as_str()))
            .bind(snapshot.approved_by.map(|a| *a.as_uuid()))
            .bind(snapshot.approved_at)
            .bind(snapshot.paid_at)
            .bind(snapshot.updated_at)
            .bind(snapshot.id.as_uuid())
            .bind(snapshot.clinic_id.as_uuid())
            .bind(expected.as_str())
            .execute(&mut **tx)
            .await
            .map_err(|e| DatabaseError::from(&e))?;

        if result.rows_affected() == 0 {
            let exists: Option<PgRow> =
                sqlx::query("SELECT 1 AS one FROM refund_requests WHERE refund_id = $1")
                    .bind(snapshot.id.as_uuid())
                    .fetch_optional(&mut **tx)
                    .await
                    .map_err(|e| DatabaseError::from(&e))?;
            if exists.is_some() {
                return Err(DatabaseError::version_conflict("RefundRequest", snapshot.id));
            }
            return Err(DatabaseError::not_found("RefundRequest", snapshot.id));
        }
        Ok(())
    }
}

impl DomainPort for PgLedgerRepository {}

#[async_trait]
impl LedgerStore for PgLedgerRepository {
    async fn next_bill_number(&self, clinic: ClinicId) -> Result<String, PortError> {
        let row = sqlx::query(
            "INSERT INTO bill_sequences (clinic_id, next_value) VALUES ($1, 1) \
             ON CONFLICT (clinic_id) \
             DO UPDATE SET next_value = bill_sequences.next_value + 1 \
             RETURNING next_value",
        )
        .bind(clinic.as_uuid())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| DatabaseError::from(&e))?;

        let value: i64 = row.try_get("next_value").map_err(DatabaseError::from)?;
        Ok(format!("BILL-{:06}", value))
    }

    async fn insert_bill(&self, bill: &Bill) -> Result<(), PortError> {
        let snapshot = bill.snapshot();
        let items_json = serde_json::to_string(&snapshot.items)
            .map_err(|e| DatabaseError::SerializationError(e.to_string()))?;

        sqlx::query(
            "INSERT INTO bills (bill_id, clinic_id, patient_id, visit_id, bill_number, \
             items, currency, total_amount, paid_amount, total_refunded, payment_status, \
             refund_status, notes, bill_date, due_date, version, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, \
             $16, $17, $18)",
        )
        .bind(snapshot.id.as_uuid())
        .bind(snapshot.clinic_id.as_uuid())
        .bind(snapshot.patient_id.as_uuid())
        .bind(snapshot.visit_id.map(|v| *v.as_uuid()))
        .bind(&snapshot.bill_number)
        .bind(&items_json)
        .bind(snapshot.currency.code())
        .bind(snapshot.total_amount.amount())
        .bind(snapshot.paid_amount.amount())
        .bind(snapshot.total_refunded.amount())
        .bind(snapshot.payment_status.as_str())
        .bind(snapshot.refund_status.as_str())
        .bind(&snapshot.notes)
        .bind(snapshot.bill_date)
        .bind(snapshot.due_date)
        .bind(snapshot.version)
        .bind(snapshot.created_at)
        .bind(snapshot.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| DatabaseError::from(&e))?;

        debug!(bill = %snapshot.id, "bill row inserted");
        Ok(())
    }

    async fn load_bill(&self, clinic: ClinicId, id: BillId) -> Result<Bill, PortError> {
        let sql = format!("SELECT {BILL_COLUMNS} FROM bills WHERE clinic_id = $1 AND bill_id = $2");
        let row = sqlx::query(&sql)
            .bind(clinic.as_uuid())
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| DatabaseError::from(&e))?;

        match row {
            Some(row) => Ok(bill_from_row(&row)?),
            None => Err(PortError::not_found("Bill", id)),
        }
    }

    async fn update_bill(&self, bill: &Bill) -> Result<Bill, PortError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DatabaseError::from(&e))?;
        let saved = Self::update_bill_in_tx(&mut tx, bill).await?;
        tx.commit().await.map_err(|e| DatabaseError::from(&e))?;
        Ok(saved)
    }

    async fn delete_bill(&self, clinic: ClinicId, id: BillId) -> Result<(), PortError> {
        // Payments and refund requests go with the bill via ON DELETE CASCADE
        let result = sqlx::query("DELETE FROM bills WHERE clinic_id = $1 AND bill_id = $2")
            .bind(clinic.as_uuid())
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| DatabaseError::from(&e))?;

        if result.rows_affected() == 0 {
            return Err(PortError::not_found("Bill", id));
        }
        Ok(())
    }

    async fn commit_payment(
        &self,
        record: &PaymentRecord,
        bill: &Bill,
    ) -> Result<Bill, PortError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DatabaseError::from(&e))?;

        let saved = Self::update_bill_in_tx(&mut tx, bill).await?;

        sqlx::query(
            "INSERT INTO payment_records (payment_id, bill_id, clinic_id, amount, currency, \
             method, payment_date, reference, received_by, notes, idempotency_key, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(record.id.as_uuid())
        .bind(record.bill_id.as_uuid())
        .bind(record.clinic_id.as_uuid())
        .bind(record.amount.amount())
        .bind(record.amount.currency().code())
        .bind(record.method.as_str())
        .bind(record.payment_date)
        .bind(&record.reference)
        .bind(record.received_by.as_uuid())
        .bind(&record.notes)
        .bind(&record.idempotency_key)
        .bind(record.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| DatabaseError::from(&e))?;

        tx.commit().await.map_err(|e| DatabaseError::from(&e))?;
        Ok(saved)
    }

    async fn payments_for_bill(
        &self,
        clinic: ClinicId,
        bill: BillId,
    ) -> Result<Vec<PaymentRecord>, PortError> {
        let sql = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payment_records \
             WHERE clinic_id = $1 AND bill_id = $2 ORDER BY payment_date DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(clinic.as_uuid())
            .bind(bill.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DatabaseError::from(&e))?;

        rows.iter()
            .map(|row| payment_from_row(row).map_err(PortError::from))
            .collect()
    }

    async fn payments_between(
        &self,
        clinic: ClinicId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PaymentRecord>, PortError> {
        let sql = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payment_records \
             WHERE clinic_id = $1 AND payment_date >= $2 AND payment_date < $3 \
             ORDER BY payment_date"
        );
        let rows = sqlx::query(&sql)
            .bind(clinic.as_uuid())
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DatabaseError::from(&e))?;

        rows.iter()
            .map(|row| payment_from_row(row).map_err(PortError::from))
            .collect()
    }

    async fn find_payment_by_key(
        &self,
        clinic: ClinicId,
        bill: BillId,
        key: &str,
    ) -> Result<Option<PaymentRecord>, PortError> {
        let sql = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payment_records \
             WHERE clinic_id = $1 AND bill_id = $2 AND idempotency_key = $3"
        );
        let row = sqlx::query(&sql)
            .bind(clinic.as_uuid())
            .bind(bill.as_uuid())
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| DatabaseError::from(&e))?;

        row.map(|row| payment_from_row(&row).map_err(PortError::from))
            .transpose()
    }

    async fn insert_refund(
        &self,
        refund: &RefundRequest,
        bill: &Bill,
    ) -> Result<Bill, PortError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DatabaseError::from(&e))?;

        let saved = Self::update_bill_in_tx(&mut tx, bill).await?;

        let snapshot = refund.snapshot();
        sqlx::query(
            "INSERT INTO refund_requests (refund_id, bill_id, clinic_id, state, amount, \
             currency, reason, refund_method, requested_by, approved_by, approved_at, \
             paid_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
        )
        .bind(snapshot.id.as_uuid())
        .bind(snapshot.bill_id.as_uuid())
        .bind(snapshot.clinic_id.as_uuid())
        .bind(snapshot.state.as_str())
        .bind(snapshot.amount.amount())
        .bind(snapshot.amount.currency().code())
        .bind(&snapshot.reason)
        .bind(snapshot.refund_method.map(|m| m.as_str()))
        .bind(snapshot.requested_by.as_uuid())
        .bind(snapshot.approved_by.map(|a| *a.as_uuid()))
        .bind(snapshot.approved_at)
        .bind(snapshot.paid_at)
        .bind(snapshot.created_at)
        .bind(snapshot.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| DatabaseError::from(&e))?;

        tx.commit().await.map_err(|e| DatabaseError::from(&e))?;
        Ok(saved)
    }

    async fn load_refund(
        &self,
        clinic: ClinicId,
        id: RefundRequestId,
    ) -> Result<RefundRequest, PortError> {
        let sql = format!(
            "SELECT {REFUND_COLUMNS} FROM refund_requests \
             WHERE clinic_id = $1 AND refund_id = $2"
        );
        let row = sqlx::query(&sql)
            .bind(clinic.as_uuid())
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| DatabaseError::from(&e))?;

        match row {
            Some(row) => Ok(refund_from_row(&row)?),
            None => Err(PortError::not_found("RefundRequest", id)),
        }
    }

    async fn update_refund(
        &self,
        refund: &RefundRequest,
        expected: RefundState,
    ) -> Result<(), PortError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DatabaseError::from(&e))?;
        Self::update_refund_in_tx(&mut tx, refund, expected).await?;
        tx.commit().await.map_err(|e| DatabaseError::from(&e))?;
        Ok(())
    }

    async fn commit_refund(
        &self,
        refund: &RefundRequest,
        expected: RefundState,
        bill: &Bill,
    ) -> Result<Bill, PortError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DatabaseError::from(&e))?;

        let saved = Self::update_bill_in_tx(&mut tx, bill).await?;
        Self::update_refund_in_tx(&mut tx, refund, expected).await?;

        tx.commit().await.map_err(|e| DatabaseError::from(&e))?;
        Ok(saved)
    }

    async fn refunds_for_bill(
        &self,
        clinic: ClinicId,
        bill: BillId,
    ) -> Result<Vec<RefundRequest>, PortError> {
        let sql = format!(
            "SELECT {REFUND_COLUMNS} FROM refund_requests \
             WHERE clinic_id = $1 AND bill_id = $2 ORDER BY created_at"
        );
        let rows = sqlx::query(&sql)
            .bind(clinic.as_uuid())
            .bind(bill.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DatabaseError::from(&e))?;

        rows.iter()
            .map(|row| refund_from_row(row).map_err(PortError::from))
            .collect()
    }
}
