//! Entity descriptors shared by the allocation and duplicate checks
//!
//! Column names used in dynamically built SQL come only from these static
//! tables, never from caller input.

use std::fmt;

use rusqlite::{params, Connection, OptionalExtension};

use super::duplicates::map_write_error;
use super::models::current_timestamp;
use crate::error::ProcurementError;

/// A column whose non-blank values must be distinct across active rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniqueField {
    /// Column name in the entity's table
    pub column: &'static str,
    /// Human-readable name used in conflict messages
    pub label: &'static str,
}

const fn field(column: &'static str, label: &'static str) -> UniqueField {
    UniqueField { column, label }
}

const VENDOR_FIELDS: &[UniqueField] = &[
    field("phone", "Phone number"),
    field("email", "Email"),
    field("gst_number", "GST number"),
    field("pan_number", "PAN number"),
    field("bank_account_number", "Bank account number"),
];

const ANIMAL_FIELDS: &[UniqueField] = &[
    field("ear_tag_id", "Ear tag ID"),
    field("calf_ear_tag_id", "Calf ear tag ID"),
    field("external_studbook_id", "External studbook ID"),
];

const PAYMENT_FIELDS: &[UniqueField] = &[
    field("transaction_id", "Transaction ID"),
    field("invoice_number", "Invoice number"),
];

const PARTY_FIELDS: &[UniqueField] = &[
    field("phone", "Phone number"),
    field("national_id", "National ID"),
];

const USER_FIELDS: &[UniqueField] = &[
    field("email", "Email"),
    field("phone", "Phone number"),
];

const ROLE_FIELDS: &[UniqueField] = &[field("name", "Role name")];

const INCHARGE_FIELDS: &[UniqueField] = &[
    field("phone", "Incharge phone number"),
    field("email", "Incharge email"),
];

const CARETAKER_FIELDS: &[UniqueField] = &[
    field("phone", "Caretaker phone number"),
    field("national_id", "Caretaker national ID"),
];

/// Every table the consistency components operate on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Vendor,
    HoldingStation,
    Animal,
    Payment,
    Seller,
    CommissionAgent,
    User,
    Role,
    Incharge,
    Caretaker,
}

impl EntityKind {
    pub fn table(&self) -> &'static str {
        match self {
            Self::Vendor => "vendors",
            Self::HoldingStation => "holding_stations",
            Self::Animal => "animals",
            Self::Payment => "payments",
            Self::Seller => "sellers",
            Self::CommissionAgent => "commission_agents",
            Self::User => "users",
            Self::Role => "roles",
            Self::Incharge => "holding_station_incharges",
            Self::Caretaker => "holding_station_caretakers",
        }
    }

    /// Name used in messages and `NotFound` errors
    pub fn label(&self) -> &'static str {
        match self {
            Self::Vendor => "Vendor",
            Self::HoldingStation => "Holding station",
            Self::Animal => "Animal",
            Self::Payment => "Payment",
            Self::Seller => "Seller",
            Self::CommissionAgent => "Commission agent",
            Self::User => "User",
            Self::Role => "Role",
            Self::Incharge => "Holding station incharge",
            Self::Caretaker => "Holding station caretaker",
        }
    }

    /// External id prefix, for entities that carry one
    pub fn id_prefix(&self) -> Option<&'static str> {
        match self {
            Self::Vendor => Some("VEN"),
            Self::HoldingStation => Some("HS"),
            Self::Animal => Some("ANI"),
            Self::Payment => Some("PAY"),
            Self::Seller => Some("SEL"),
            Self::CommissionAgent => Some("CA"),
            Self::User => Some("USR"),
            Self::Role => Some("ROL"),
            Self::Incharge | Self::Caretaker => None,
        }
    }

    pub fn unique_fields(&self) -> &'static [UniqueField] {
        match self {
            Self::Vendor => VENDOR_FIELDS,
            Self::HoldingStation => &[],
            Self::Animal => ANIMAL_FIELDS,
            Self::Payment => PAYMENT_FIELDS,
            Self::Seller | Self::CommissionAgent => PARTY_FIELDS,
            Self::User => USER_FIELDS,
            Self::Role => ROLE_FIELDS,
            Self::Incharge => INCHARGE_FIELDS,
            Self::Caretaker => CARETAKER_FIELDS,
        }
    }

    /// Whether rows are retired through `deleted_at`
    pub fn soft_deletes(&self) -> bool {
        !matches!(self, Self::Incharge | Self::Caretaker)
    }

    /// `(column, table)` of the soft-deletable row that owns this one.
    /// Owned rows are only live while their owner is.
    pub fn owner(&self) -> Option<(&'static str, &'static str)> {
        match self {
            Self::Incharge | Self::Caretaker => Some(("station_id", "holding_stations")),
            _ => None,
        }
    }

    pub fn unique_field(&self, column: &str) -> Option<&'static UniqueField> {
        self.unique_fields().iter().find(|f| f.column == column)
    }

    /// Resolve the entity owning a table name, as reported by SQLite errors
    pub fn from_table(table: &str) -> Option<Self> {
        ALL_KINDS.iter().copied().find(|k| k.table() == table)
    }
}

pub const ALL_KINDS: [EntityKind; 10] = [
    EntityKind::Vendor,
    EntityKind::HoldingStation,
    EntityKind::Animal,
    EntityKind::Payment,
    EntityKind::Seller,
    EntityKind::CommissionAgent,
    EntityKind::User,
    EntityKind::Role,
    EntityKind::Incharge,
    EntityKind::Caretaker,
];

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Row id and retired flag of the row carrying `external_id`
pub fn lookup(
    conn: &Connection,
    kind: EntityKind,
    external_id: &str,
) -> Result<Option<(i64, bool)>, ProcurementError> {
    let sql = format!(
        "SELECT id, deleted_at IS NOT NULL FROM {} WHERE external_id = ?",
        kind.table()
    );
    conn.query_row(&sql, params![external_id], |row| Ok((row.get(0)?, row.get(1)?)))
        .optional()
        .map_err(|e| ProcurementError::Internal(format!("Lookup failed: {}", e)))
}

/// Stamp `deleted_at` on an active row; false if it was already retired
pub fn soft_delete(conn: &Connection, kind: EntityKind, id: i64) -> Result<bool, ProcurementError> {
    let now = current_timestamp();
    let sql = format!(
        "UPDATE {} SET deleted_at = ?2, updated_at = ?2 WHERE id = ?1 AND deleted_at IS NULL",
        kind.table()
    );
    let changed = conn
        .execute(&sql, params![id, now])
        .map_err(|e| ProcurementError::Internal(format!("Soft delete failed: {}", e)))?;
    Ok(changed > 0)
}

/// Clear `deleted_at`; unique-index clashes with rows created meanwhile
/// surface as `DuplicateField`
pub fn restore(conn: &Connection, kind: EntityKind, id: i64) -> Result<bool, ProcurementError> {
    let sql = format!(
        "UPDATE {} SET deleted_at = NULL, updated_at = ?2 WHERE id = ?1 AND deleted_at IS NOT NULL",
        kind.table()
    );
    let changed = conn
        .execute(&sql, params![id, current_timestamp()])
        .map_err(map_write_error)?;
    Ok(changed > 0)
}

/// Physically remove a row
pub fn hard_delete(conn: &Connection, kind: EntityKind, id: i64) -> Result<bool, ProcurementError> {
    let sql = format!("DELETE FROM {} WHERE id = ?", kind.table());
    let changed = conn
        .execute(&sql, params![id])
        .map_err(|e| ProcurementError::Internal(format!("Delete failed: {}", e)))?;
    Ok(changed > 0)
}
