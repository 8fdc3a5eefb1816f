//! Payment rows

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::duplicates::{map_write_error, FieldMap};
use super::models::{current_timestamp, decode_paths, encode_paths, payment_for, payment_status};
use super::settlement::AnimalIdList;
use crate::error::ProcurementError;
use crate::validation;

const SELECT_PAYMENT: &str = r#"
    SELECT p.*, v.external_id AS vendor_external_id
    FROM payments p
    LEFT JOIN vendors v ON v.id = p.vendor_id
"#;

/// Payment row from database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRow {
    pub id: i64,
    pub external_id: String,
    pub payment_for: String,
    pub vendor_id: Option<i64>,
    pub vendor_external_id: Option<String>,
    /// Animal row ids; always empty for transport payments
    pub animal_ids: Vec<i64>,
    pub amount: f64,
    pub status: String,
    pub transaction_id: Option<String>,
    pub invoice_number: Option<String>,
    pub payment_date: Option<String>,
    pub notes: Option<String>,
    pub receipt_paths: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
    pub deleted_at: Option<String>,
}

impl PaymentRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        let raw_ids: Option<String> = row.get("animal_ids")?;
        let raw_paths: String = row.get("receipt_paths")?;
        Ok(Self {
            id: row.get("id")?,
            external_id: row.get("external_id")?,
            payment_for: row.get("payment_for")?,
            vendor_id: row.get("vendor_id")?,
            vendor_external_id: row.get("vendor_external_id")?,
            animal_ids: raw_ids.map(|raw| AnimalIdList::Encoded(raw).decode()).unwrap_or_default(),
            amount: row.get("amount")?,
            status: row.get("status")?,
            transaction_id: row.get("transaction_id")?,
            invoice_number: row.get("invoice_number")?,
            payment_date: row.get("payment_date")?,
            notes: row.get("notes")?,
            receipt_paths: decode_paths(&raw_paths, "payments.receipt_paths"),
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            deleted_at: row.get("deleted_at")?,
        })
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn is_vendor_payment(&self) -> bool {
        self.payment_for == payment_for::VENDOR
    }

    pub fn unique_fields(&self) -> FieldMap {
        FieldMap::new()
            .with("transaction_id", self.transaction_id.as_deref())
            .with("invoice_number", self.invoice_number.as_deref())
    }

    /// Check the payment's own columns and the vendor/transport shape
    pub fn validate(&self) -> Result<(), ProcurementError> {
        validation::check_one_of("paymentFor", &self.payment_for, &payment_for::ALL)?;
        validation::check_one_of("status", &self.status, &payment_status::ALL)?;

        if !self.amount.is_finite() || self.amount <= 0.0 {
            return Err(ProcurementError::validation("amount", "must be greater than zero"));
        }

        if let Some(date) = &self.payment_date {
            NaiveDate::parse_from_str(date, "%Y-%m-%d")
                .map_err(|_| ProcurementError::validation("paymentDate", "must be a date as YYYY-MM-DD"))?;
        }

        if self.is_vendor_payment() {
            if self.vendor_id.is_none() && self.vendor_external_id.is_none() {
                return Err(ProcurementError::validation(
                    "vendorId",
                    "is required for vendor payments",
                ));
            }
            if self.animal_ids.is_empty() {
                return Err(ProcurementError::validation(
                    "animalIds",
                    "at least one animal is required for vendor payments",
                ));
            }
        } else if !self.animal_ids.is_empty() {
            return Err(ProcurementError::validation(
                "animalIds",
                "transport payments cannot list animals",
            ));
        }

        Ok(())
    }

    /// Storage form of `animal_ids`
    fn stored_animal_ids(&self) -> Option<String> {
        self.is_vendor_payment().then(|| AnimalIdList::encode(&self.animal_ids))
    }
}

fn decode_input_ids(ids: Option<&AnimalIdList>) -> Result<Vec<i64>, ProcurementError> {
    match ids {
        Some(list) => list
            .try_decode()
            .map_err(|reason| ProcurementError::validation("animalIds", reason)),
        None => Ok(Vec::new()),
    }
}

/// Input for recording a payment
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordPaymentInput {
    pub payment_for: String,
    /// Vendor external id
    #[serde(default)]
    pub vendor_id: Option<String>,
    /// Animal row ids, as a JSON array or a JSON-encoded string
    #[serde(default)]
    pub animal_ids: Option<AnimalIdList>,
    pub amount: f64,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub invoice_number: Option<String>,
    #[serde(default)]
    pub payment_date: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

fn default_status() -> String {
    payment_status::PENDING.to_string()
}

impl RecordPaymentInput {
    /// Draft row with normalized values; fails only on an unreadable id list
    pub fn to_draft(&self) -> Result<PaymentRow, ProcurementError> {
        Ok(PaymentRow {
            id: 0,
            external_id: String::new(),
            payment_for: self.payment_for.trim().to_lowercase(),
            vendor_id: None,
            vendor_external_id: validation::normalize(self.vendor_id.as_deref()),
            animal_ids: decode_input_ids(self.animal_ids.as_ref())?,
            amount: self.amount,
            status: validation::normalize(Some(self.status.as_str()))
                .map(|s| s.to_lowercase())
                .unwrap_or_else(default_status),
            transaction_id: validation::normalize(self.transaction_id.as_deref()),
            invoice_number: validation::normalize_code(self.invoice_number.as_deref()),
            payment_date: validation::normalize(self.payment_date.as_deref()),
            notes: validation::normalize(self.notes.as_deref()),
            receipt_paths: vec![],
            created_at: String::new(),
            updated_at: String::new(),
            deleted_at: None,
        })
    }
}

/// Partial payment update. `payment_for` and the vendor are fixed once
/// recorded; the animal list of a vendor payment may be replaced.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePaymentInput {
    pub animal_ids: Option<AnimalIdList>,
    pub amount: Option<f64>,
    pub status: Option<String>,
    pub transaction_id: Option<String>,
    pub invoice_number: Option<String>,
    pub payment_date: Option<String>,
    pub notes: Option<String>,
    #[serde(default)]
    pub replace_receipts: bool,
}

impl UpdatePaymentInput {
    pub fn apply(&self, row: &mut PaymentRow) -> Result<(), ProcurementError> {
        if self.animal_ids.is_some() {
            row.animal_ids = decode_input_ids(self.animal_ids.as_ref())?;
        }
        if let Some(amount) = self.amount {
            row.amount = amount;
        }
        if let Some(status) = &self.status {
            row.status = status.trim().to_lowercase();
        }
        if let Some(v) = &self.transaction_id {
            row.transaction_id = validation::normalize(Some(v));
        }
        if let Some(v) = &self.invoice_number {
            row.invoice_number = validation::normalize_code(Some(v));
        }
        if let Some(v) = &self.payment_date {
            row.payment_date = validation::normalize(Some(v));
        }
        if let Some(v) = &self.notes {
            row.notes = validation::normalize(Some(v));
        }
        Ok(())
    }
}

/// Get a payment by external id, optionally including retired rows
pub fn get_payment(
    conn: &Connection,
    external_id: &str,
    include_deleted: bool,
) -> Result<Option<PaymentRow>, ProcurementError> {
    let mut sql = format!("{} WHERE p.external_id = ?", SELECT_PAYMENT);
    if !include_deleted {
        sql.push_str(" AND p.deleted_at IS NULL");
    }
    conn.query_row(&sql, params![external_id], |row| PaymentRow::from_row(row))
        .optional()
        .map_err(|e| ProcurementError::Internal(format!("Query failed: {}", e)))
}

pub fn get_payment_by_id(conn: &Connection, id: i64) -> Result<Option<PaymentRow>, ProcurementError> {
    let sql = format!("{} WHERE p.id = ?", SELECT_PAYMENT);
    conn.query_row(&sql, params![id], |row| PaymentRow::from_row(row))
        .optional()
        .map_err(|e| ProcurementError::Internal(format!("Query failed: {}", e)))
}

/// Active payment by external id, or `NotFound`
pub fn require_payment(conn: &Connection, external_id: &str) -> Result<PaymentRow, ProcurementError> {
    get_payment(conn, external_id, false)?
        .ok_or_else(|| ProcurementError::not_found("Payment", external_id))
}

/// List payments, newest first
pub fn list_payments(
    conn: &Connection,
    kind: Option<&str>,
    vendor_external_id: Option<&str>,
    include_deleted: bool,
) -> Result<Vec<PaymentRow>, ProcurementError> {
    let mut sql = format!("{} WHERE 1 = 1", SELECT_PAYMENT);
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![];

    if !include_deleted {
        sql.push_str(" AND p.deleted_at IS NULL");
    }
    if let Some(kind) = kind {
        sql.push_str(" AND p.payment_for = ?");
        params.push(Box::new(kind.to_string()));
    }
    if let Some(vendor) = vendor_external_id {
        sql.push_str(" AND v.external_id = ?");
        params.push(Box::new(vendor.to_string()));
    }
    sql.push_str(" ORDER BY p.id DESC");

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| ProcurementError::Internal(format!("Prepare failed: {}", e)))?;
    let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

    let rows = stmt
        .query_map(param_refs.as_slice(), |row| PaymentRow::from_row(row))
        .map_err(|e| ProcurementError::Internal(format!("Query failed: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ProcurementError::Internal(format!("Row parse failed: {}", e)))?;

    Ok(rows)
}

/// Insert a validated draft with its vendor resolved; returns the row id
pub fn insert_payment(
    conn: &Connection,
    external_id: &str,
    draft: &PaymentRow,
) -> Result<i64, rusqlite::Error> {
    conn.execute(
        r#"
        INSERT INTO payments (
            external_id, payment_for, vendor_id, animal_ids, amount, status,
            transaction_id, invoice_number, payment_date, notes, receipt_paths
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            external_id,
            draft.payment_for,
            draft.vendor_id,
            draft.stored_animal_ids(),
            draft.amount,
            draft.status,
            draft.transaction_id,
            draft.invoice_number,
            draft.payment_date,
            draft.notes,
            encode_paths(&draft.receipt_paths),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Write every mutable column of `row`
pub fn update_payment(conn: &Connection, row: &PaymentRow) -> Result<(), ProcurementError> {
    conn.execute(
        r#"
        UPDATE payments SET
            animal_ids = ?, amount = ?, status = ?, transaction_id = ?, invoice_number = ?,
            payment_date = ?, notes = ?, receipt_paths = ?, updated_at = ?
        WHERE id = ?
        "#,
        params![
            row.stored_animal_ids(),
            row.amount,
            row.status,
            row.transaction_id,
            row.invoice_number,
            row.payment_date,
            row.notes,
            encode_paths(&row.receipt_paths),
            current_timestamp(),
            row.id,
        ],
    )
    .map_err(map_write_error)?;
    Ok(())
}
