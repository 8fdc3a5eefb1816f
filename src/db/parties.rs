//! Sellers, commission agents, users and roles
//!
//! These records only need external ids and unique business keys; nothing
//! else in the engine depends on them.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::duplicates::{map_write_error, FieldMap};
use super::entities::EntityKind;
use super::models::current_timestamp;
use crate::error::ProcurementError;
use crate::validation::{self, Pattern};

/// Tables sharing the seller/commission agent shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartyKind {
    Seller,
    CommissionAgent,
}

impl PartyKind {
    pub fn entity(&self) -> EntityKind {
        match self {
            Self::Seller => EntityKind::Seller,
            Self::CommissionAgent => EntityKind::CommissionAgent,
        }
    }
}

// ============================================================================
// Sellers and commission agents
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartyRow {
    pub id: i64,
    pub external_id: String,
    pub name: String,
    pub phone: Option<String>,
    pub national_id: Option<String>,
    pub address: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub deleted_at: Option<String>,
}

impl PartyRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            external_id: row.get("external_id")?,
            name: row.get("name")?,
            phone: row.get("phone")?,
            national_id: row.get("national_id")?,
            address: row.get("address")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            deleted_at: row.get("deleted_at")?,
        })
    }
}

/// Seller or commission agent submission; also used for full updates
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartyInput {
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub national_id: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

impl PartyInput {
    pub fn checked(&self) -> Result<Self, ProcurementError> {
        let checked = Self {
            name: validation::require_pattern("name", Some(self.name.as_str()), Pattern::PersonName)?,
            phone: validation::normalize(self.phone.as_deref()),
            national_id: validation::normalize(self.national_id.as_deref()),
            address: validation::normalize(self.address.as_deref()),
        };
        validation::check("phone", checked.phone.as_deref(), Pattern::Phone)?;
        validation::check("nationalId", checked.national_id.as_deref(), Pattern::NationalId)?;
        Ok(checked)
    }

    pub fn unique_fields(&self) -> FieldMap {
        FieldMap::new()
            .with("phone", self.phone.as_deref())
            .with("national_id", self.national_id.as_deref())
    }
}

pub fn get_party(
    conn: &Connection,
    kind: PartyKind,
    external_id: &str,
    include_deleted: bool,
) -> Result<Option<PartyRow>, ProcurementError> {
    let mut sql = format!("SELECT * FROM {} WHERE external_id = ?", kind.entity().table());
    if !include_deleted {
        sql.push_str(" AND deleted_at IS NULL");
    }
    conn.query_row(&sql, params![external_id], |row| PartyRow::from_row(row))
        .optional()
        .map_err(|e| ProcurementError::Internal(format!("Query failed: {}", e)))
}

pub fn list_parties(conn: &Connection, kind: PartyKind) -> Result<Vec<PartyRow>, ProcurementError> {
    let sql = format!(
        "SELECT * FROM {} WHERE deleted_at IS NULL ORDER BY name",
        kind.entity().table()
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| ProcurementError::Internal(format!("Prepare failed: {}", e)))?;

    let rows = stmt
        .query_map([], |row| PartyRow::from_row(row))
        .map_err(|e| ProcurementError::Internal(format!("Query failed: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ProcurementError::Internal(format!("Row parse failed: {}", e)))?;

    Ok(rows)
}

pub fn insert_party(
    conn: &Connection,
    kind: PartyKind,
    external_id: &str,
    input: &PartyInput,
) -> Result<i64, rusqlite::Error> {
    let sql = format!(
        "INSERT INTO {} (external_id, name, phone, national_id, address) VALUES (?, ?, ?, ?, ?)",
        kind.entity().table()
    );
    conn.execute(
        &sql,
        params![external_id, input.name, input.phone, input.national_id, input.address],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn update_party(
    conn: &Connection,
    kind: PartyKind,
    id: i64,
    input: &PartyInput,
) -> Result<(), ProcurementError> {
    let sql = format!(
        "UPDATE {} SET name = ?, phone = ?, national_id = ?, address = ?, updated_at = ? WHERE id = ?",
        kind.entity().table()
    );
    conn.execute(
        &sql,
        params![input.name, input.phone, input.national_id, input.address, current_timestamp(), id],
    )
    .map_err(map_write_error)?;
    Ok(())
}

// ============================================================================
// Roles
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleRow {
    pub id: i64,
    pub external_id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub deleted_at: Option<String>,
}

impl RoleRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            external_id: row.get("external_id")?,
            name: row.get("name")?,
            description: row.get("description")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            deleted_at: row.get("deleted_at")?,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleInput {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl RoleInput {
    /// Role names compare case-insensitively, so they are stored lower-cased
    pub fn checked(&self) -> Result<Self, ProcurementError> {
        Ok(Self {
            name: validation::require("name", Some(self.name.as_str()))?.to_lowercase(),
            description: validation::normalize(self.description.as_deref()),
        })
    }

    pub fn unique_fields(&self) -> FieldMap {
        FieldMap::new().with("name", Some(self.name.as_str()))
    }
}

pub fn get_role(
    conn: &Connection,
    external_id: &str,
    include_deleted: bool,
) -> Result<Option<RoleRow>, ProcurementError> {
    let sql = if include_deleted {
        "SELECT * FROM roles WHERE external_id = ?"
    } else {
        "SELECT * FROM roles WHERE external_id = ? AND deleted_at IS NULL"
    };
    conn.query_row(sql, params![external_id], |row| RoleRow::from_row(row))
        .optional()
        .map_err(|e| ProcurementError::Internal(format!("Query failed: {}", e)))
}

pub fn require_role(conn: &Connection, external_id: &str) -> Result<RoleRow, ProcurementError> {
    get_role(conn, external_id, false)?.ok_or_else(|| ProcurementError::not_found("Role", external_id))
}

pub fn insert_role(conn: &Connection, external_id: &str, input: &RoleInput) -> Result<i64, rusqlite::Error> {
    conn.execute(
        "INSERT INTO roles (external_id, name, description) VALUES (?, ?, ?)",
        params![external_id, input.name, input.description],
    )?;
    Ok(conn.last_insert_rowid())
}

// ============================================================================
// Users
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRow {
    pub id: i64,
    pub external_id: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub role_id: Option<i64>,
    pub role_external_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub deleted_at: Option<String>,
}

impl UserRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            external_id: row.get("external_id")?,
            name: row.get("name")?,
            email: row.get("email")?,
            phone: row.get("phone")?,
            role_id: row.get("role_id")?,
            role_external_id: row.get("role_external_id")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            deleted_at: row.get("deleted_at")?,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInput {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    /// Role external id
    #[serde(default)]
    pub role_id: Option<String>,
}

impl UserInput {
    pub fn checked(&self) -> Result<Self, ProcurementError> {
        let checked = Self {
            name: validation::require_pattern("name", Some(self.name.as_str()), Pattern::PersonName)?,
            email: validation::normalize_email(self.email.as_deref()),
            phone: validation::normalize(self.phone.as_deref()),
            role_id: validation::normalize(self.role_id.as_deref()),
        };
        if checked.email.is_none() && checked.phone.is_none() {
            return Err(ProcurementError::validation("email", "an email or phone number is required"));
        }
        validation::check("email", checked.email.as_deref(), Pattern::Email)?;
        validation::check("phone", checked.phone.as_deref(), Pattern::Phone)?;
        Ok(checked)
    }

    pub fn unique_fields(&self) -> FieldMap {
        FieldMap::new()
            .with("email", self.email.as_deref())
            .with("phone", self.phone.as_deref())
    }
}

const SELECT_USER: &str = r#"
    SELECT u.*, r.external_id AS role_external_id
    FROM users u
    LEFT JOIN roles r ON r.id = u.role_id
"#;

pub fn get_user(
    conn: &Connection,
    external_id: &str,
    include_deleted: bool,
) -> Result<Option<UserRow>, ProcurementError> {
    let mut sql = format!("{} WHERE u.external_id = ?", SELECT_USER);
    if !include_deleted {
        sql.push_str(" AND u.deleted_at IS NULL");
    }
    conn.query_row(&sql, params![external_id], |row| UserRow::from_row(row))
        .optional()
        .map_err(|e| ProcurementError::Internal(format!("Query failed: {}", e)))
}

pub fn insert_user(
    conn: &Connection,
    external_id: &str,
    input: &UserInput,
    role_id: Option<i64>,
) -> Result<i64, rusqlite::Error> {
    conn.execute(
        "INSERT INTO users (external_id, name, email, phone, role_id) VALUES (?, ?, ?, ?, ?)",
        params![external_id, input.name, input.email, input.phone, role_id],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn update_user(
    conn: &Connection,
    id: i64,
    input: &UserInput,
    role_id: Option<i64>,
) -> Result<(), ProcurementError> {
    conn.execute(
        "UPDATE users SET name = ?, email = ?, phone = ?, role_id = ?, updated_at = ? WHERE id = ?",
        params![input.name, input.email, input.phone, role_id, current_timestamp(), id],
    )
    .map_err(map_write_error)?;
    Ok(())
}
