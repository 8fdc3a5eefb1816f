//! Vendor rows

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::duplicates::{map_write_error, FieldMap};
use super::models::{current_timestamp, decode_paths, encode_paths, vendor_status};
use crate::error::ProcurementError;
use crate::validation::{self, Pattern};

/// Vendor row from database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorRow {
    pub id: i64,
    pub external_id: String,
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub gst_number: Option<String>,
    pub pan_number: Option<String>,
    pub bank_account_number: Option<String>,
    pub ifsc_code: Option<String>,
    pub address: Option<String>,
    pub status: String,
    pub document_paths: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
    pub deleted_at: Option<String>,
}

impl VendorRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        let raw_paths: String = row.get("document_paths")?;
        Ok(Self {
            id: row.get("id")?,
            external_id: row.get("external_id")?,
            name: row.get("name")?,
            phone: row.get("phone")?,
            email: row.get("email")?,
            gst_number: row.get("gst_number")?,
            pan_number: row.get("pan_number")?,
            bank_account_number: row.get("bank_account_number")?,
            ifsc_code: row.get("ifsc_code")?,
            address: row.get("address")?,
            status: row.get("status")?,
            document_paths: decode_paths(&raw_paths, "vendors.document_paths"),
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            deleted_at: row.get("deleted_at")?,
        })
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn is_active(&self) -> bool {
        !self.is_deleted() && self.status == vendor_status::ACTIVE
    }

    /// Candidate values for the duplicate guard
    pub fn unique_fields(&self) -> FieldMap {
        FieldMap::new()
            .with("phone", self.phone.as_deref())
            .with("email", self.email.as_deref())
            .with("gst_number", self.gst_number.as_deref())
            .with("pan_number", self.pan_number.as_deref())
            .with("bank_account_number", self.bank_account_number.as_deref())
    }

    /// Check every field of a fully merged row
    pub fn validate(&self) -> Result<(), ProcurementError> {
        validation::require("name", Some(self.name.as_str()))?;
        validation::check("phone", self.phone.as_deref(), Pattern::Phone)?;
        validation::check("email", self.email.as_deref(), Pattern::Email)?;
        validation::check("gstNumber", self.gst_number.as_deref(), Pattern::Gst)?;
        validation::check("panNumber", self.pan_number.as_deref(), Pattern::Pan)?;
        validation::check("bankAccountNumber", self.bank_account_number.as_deref(), Pattern::BankAccount)?;
        validation::check("ifscCode", self.ifsc_code.as_deref(), Pattern::Ifsc)?;
        if self.bank_account_number.is_some() != self.ifsc_code.is_some() {
            return Err(ProcurementError::validation(
                "ifscCode",
                "bank account number and IFSC code must be provided together",
            ));
        }
        validation::check_one_of("status", &self.status, &vendor_status::ALL)
    }
}

/// Input for creating a vendor
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVendorInput {
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub gst_number: Option<String>,
    #[serde(default)]
    pub pan_number: Option<String>,
    #[serde(default)]
    pub bank_account_number: Option<String>,
    #[serde(default)]
    pub ifsc_code: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default = "default_status")]
    pub status: String,
}

fn default_status() -> String {
    vendor_status::ACTIVE.to_string()
}

impl CreateVendorInput {
    /// Draft row with normalized values, ready to validate
    pub fn to_draft(&self) -> VendorRow {
        VendorRow {
            id: 0,
            external_id: String::new(),
            name: self.name.trim().to_string(),
            phone: validation::normalize(self.phone.as_deref()),
            email: validation::normalize_email(self.email.as_deref()),
            gst_number: validation::normalize_code(self.gst_number.as_deref()),
            pan_number: validation::normalize_code(self.pan_number.as_deref()),
            bank_account_number: validation::normalize(self.bank_account_number.as_deref()),
            ifsc_code: validation::normalize_code(self.ifsc_code.as_deref()),
            address: validation::normalize(self.address.as_deref()),
            status: validation::normalize(Some(self.status.as_str()))
                .map(|s| s.to_lowercase())
                .unwrap_or_else(default_status),
            document_paths: vec![],
            created_at: String::new(),
            updated_at: String::new(),
            deleted_at: None,
        }
    }
}

/// Partial update; `None` keeps the stored value, a blank string clears it
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateVendorInput {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub gst_number: Option<String>,
    pub pan_number: Option<String>,
    pub bank_account_number: Option<String>,
    pub ifsc_code: Option<String>,
    pub address: Option<String>,
    pub status: Option<String>,
    /// Replace the stored documents with the newly staged ones
    #[serde(default)]
    pub replace_documents: bool,
}

impl UpdateVendorInput {
    pub fn apply(&self, row: &mut VendorRow) {
        if let Some(name) = &self.name {
            row.name = name.trim().to_string();
        }
        if let Some(v) = &self.phone {
            row.phone = validation::normalize(Some(v));
        }
        if let Some(v) = &self.email {
            row.email = validation::normalize_email(Some(v));
        }
        if let Some(v) = &self.gst_number {
            row.gst_number = validation::normalize_code(Some(v));
        }
        if let Some(v) = &self.pan_number {
            row.pan_number = validation::normalize_code(Some(v));
        }
        if let Some(v) = &self.bank_account_number {
            row.bank_account_number = validation::normalize(Some(v));
        }
        if let Some(v) = &self.ifsc_code {
            row.ifsc_code = validation::normalize_code(Some(v));
        }
        if let Some(v) = &self.address {
            row.address = validation::normalize(Some(v));
        }
        if let Some(status) = &self.status {
            row.status = status.trim().to_lowercase();
        }
    }
}

/// Get a vendor by external id, optionally including retired rows
pub fn get_vendor(
    conn: &Connection,
    external_id: &str,
    include_deleted: bool,
) -> Result<Option<VendorRow>, ProcurementError> {
    let sql = if include_deleted {
        "SELECT * FROM vendors WHERE external_id = ?"
    } else {
        "SELECT * FROM vendors WHERE external_id = ? AND deleted_at IS NULL"
    };
    conn.query_row(sql, params![external_id], |row| VendorRow::from_row(row))
        .optional()
        .map_err(|e| ProcurementError::Internal(format!("Query failed: {}", e)))
}

/// Get a vendor by row id, including retired rows
pub fn get_vendor_by_id(conn: &Connection, id: i64) -> Result<Option<VendorRow>, ProcurementError> {
    conn.query_row("SELECT * FROM vendors WHERE id = ?", params![id], |row| VendorRow::from_row(row))
        .optional()
        .map_err(|e| ProcurementError::Internal(format!("Query failed: {}", e)))
}

/// Active vendor by external id, or `NotFound`
pub fn require_vendor(conn: &Connection, external_id: &str) -> Result<VendorRow, ProcurementError> {
    get_vendor(conn, external_id, false)?
        .ok_or_else(|| ProcurementError::not_found("Vendor", external_id))
}

/// List vendors, newest first
pub fn list_vendors(
    conn: &Connection,
    status: Option<&str>,
    include_deleted: bool,
) -> Result<Vec<VendorRow>, ProcurementError> {
    let mut sql = String::from("SELECT * FROM vendors WHERE 1 = 1");
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![];

    if !include_deleted {
        sql.push_str(" AND deleted_at IS NULL");
    }
    if let Some(status) = status {
        sql.push_str(" AND status = ?");
        params.push(Box::new(status.to_string()));
    }
    sql.push_str(" ORDER BY id DESC");

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| ProcurementError::Internal(format!("Prepare failed: {}", e)))?;
    let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

    let rows = stmt
        .query_map(param_refs.as_slice(), |row| VendorRow::from_row(row))
        .map_err(|e| ProcurementError::Internal(format!("Query failed: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ProcurementError::Internal(format!("Row parse failed: {}", e)))?;

    Ok(rows)
}

/// Insert a validated draft under `external_id`; returns the row id.
///
/// Returns the raw driver error so the allocator can tell an external-id
/// race from a business-key clash.
pub fn insert_vendor(
    conn: &Connection,
    external_id: &str,
    draft: &VendorRow,
) -> Result<i64, rusqlite::Error> {
    conn.execute(
        r#"
        INSERT INTO vendors (
            external_id, name, phone, email, gst_number, pan_number,
            bank_account_number, ifsc_code, address, status, document_paths
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            external_id,
            draft.name,
            draft.phone,
            draft.email,
            draft.gst_number,
            draft.pan_number,
            draft.bank_account_number,
            draft.ifsc_code,
            draft.address,
            draft.status,
            encode_paths(&draft.document_paths),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Write every mutable column of `row`
pub fn update_vendor(conn: &Connection, row: &VendorRow) -> Result<(), ProcurementError> {
    conn.execute(
        r#"
        UPDATE vendors SET
            name = ?, phone = ?, email = ?, gst_number = ?, pan_number = ?,
            bank_account_number = ?, ifsc_code = ?, address = ?, status = ?,
            document_paths = ?, updated_at = ?
        WHERE id = ?
        "#,
        params![
            row.name,
            row.phone,
            row.email,
            row.gst_number,
            row.pan_number,
            row.bank_account_number,
            row.ifsc_code,
            row.address,
            row.status,
            encode_paths(&row.document_paths),
            current_timestamp(),
            row.id,
        ],
    )
    .map_err(map_write_error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draft_normalizes_values() {
        let input = CreateVendorInput {
            name: "  Shree Dairy ".into(),
            email: Some(" Sales@Dairy.IN ".into()),
            pan_number: Some("abcde1234f".into()),
            phone: Some("".into()),
            status: "Active".into(),
            ..Default::default()
        };
        let draft = input.to_draft();
        assert_eq!(draft.name, "Shree Dairy");
        assert_eq!(draft.email.as_deref(), Some("sales@dairy.in"));
        assert_eq!(draft.pan_number.as_deref(), Some("ABCDE1234F"));
        assert_eq!(draft.phone, None);
        assert!(draft.validate().is_ok());
    }

    #[test]
    fn test_bank_details_go_together() {
        let input = CreateVendorInput {
            name: "Vendor".into(),
            bank_account_number: Some("123456789012".into()),
            status: "active".into(),
            ..Default::default()
        };
        let err = input.to_draft().validate().unwrap_err();
        assert_eq!(err.field(), Some("ifscCode"));
    }

    #[test]
    fn test_update_blank_clears_field() {
        let mut row = CreateVendorInput {
            name: "Vendor".into(),
            phone: Some("9876543210".into()),
            status: "active".into(),
            ..Default::default()
        }
        .to_draft();

        UpdateVendorInput {
            phone: Some("  ".into()),
            status: Some("inactive".into()),
            ..Default::default()
        }
        .apply(&mut row);

        assert_eq!(row.phone, None);
        assert_eq!(row.status, "inactive");
    }
}
