//! Holding station rows and their staff
//!
//! Incharge and caretaker rows belong to exactly one station and are only
//! ever written as a complete set: the station workflows delete the old set
//! and insert the new one inside the same transaction.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::duplicates::{map_write_error, FieldMap};
use super::models::{current_timestamp, decode_paths, encode_paths, station_status};
use crate::error::ProcurementError;
use crate::validation::{self, Pattern};

/// Holding station row, with its staff loaded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoldingStationRow {
    pub id: i64,
    pub external_id: String,
    pub name: String,
    pub location: Option<String>,
    pub total_capacity: i64,
    pub current_occupancy: i64,
    pub status: String,
    pub document_paths: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
    pub deleted_at: Option<String>,
    #[serde(default)]
    pub incharges: Vec<InchargeRow>,
    #[serde(default)]
    pub caretakers: Vec<CaretakerRow>,
}

impl HoldingStationRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        let raw_paths: String = row.get("document_paths")?;
        Ok(Self {
            id: row.get("id")?,
            external_id: row.get("external_id")?,
            name: row.get("name")?,
            location: row.get("location")?,
            total_capacity: row.get("total_capacity")?,
            current_occupancy: row.get("current_occupancy")?,
            status: row.get("status")?,
            document_paths: decode_paths(&raw_paths, "holding_stations.document_paths"),
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            deleted_at: row.get("deleted_at")?,
            incharges: vec![],  // Loaded separately
            caretakers: vec![], // Loaded separately
        })
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn available(&self) -> i64 {
        (self.total_capacity - self.current_occupancy).max(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InchargeRow {
    pub id: i64,
    pub station_id: i64,
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub national_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaretakerRow {
    pub id: i64,
    pub station_id: i64,
    pub name: String,
    pub phone: String,
    pub national_id: Option<String>,
}

/// Submitted incharge record
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InchargeInput {
    pub name: String,
    pub phone: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub national_id: Option<String>,
}

impl InchargeInput {
    /// Normalize and validate; `index` locates the record in error fields
    pub fn checked(&self, index: usize) -> Result<Self, ProcurementError> {
        let field = |name: &str| format!("incharges[{}].{}", index, name);
        let email = validation::normalize_email(self.email.as_deref());
        let national_id = validation::normalize(self.national_id.as_deref());

        let checked = Self {
            name: validation::require_pattern(&field("name"), Some(self.name.as_str()), Pattern::PersonName)?,
            phone: validation::require_pattern(&field("phone"), Some(self.phone.as_str()), Pattern::Phone)?,
            email,
            national_id,
        };
        validation::check(&field("email"), checked.email.as_deref(), Pattern::Email)?;
        validation::check(&field("nationalId"), checked.national_id.as_deref(), Pattern::NationalId)?;
        Ok(checked)
    }

    pub fn unique_fields(&self) -> FieldMap {
        FieldMap::new()
            .with("phone", Some(self.phone.as_str()))
            .with("email", self.email.as_deref())
    }
}

impl From<&InchargeRow> for InchargeInput {
    fn from(row: &InchargeRow) -> Self {
        Self {
            name: row.name.clone(),
            phone: row.phone.clone(),
            email: row.email.clone(),
            national_id: row.national_id.clone(),
        }
    }
}

/// Submitted caretaker record
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaretakerInput {
    pub name: String,
    pub phone: String,
    #[serde(default)]
    pub national_id: Option<String>,
}

impl CaretakerInput {
    pub fn checked(&self, index: usize) -> Result<Self, ProcurementError> {
        let field = |name: &str| format!("caretakers[{}].{}", index, name);

        let checked = Self {
            name: validation::require_pattern(&field("name"), Some(self.name.as_str()), Pattern::PersonName)?,
            phone: validation::require_pattern(&field("phone"), Some(self.phone.as_str()), Pattern::Phone)?,
            national_id: validation::normalize(self.national_id.as_deref()),
        };
        validation::check(&field("nationalId"), checked.national_id.as_deref(), Pattern::NationalId)?;
        Ok(checked)
    }

    pub fn unique_fields(&self) -> FieldMap {
        FieldMap::new()
            .with("phone", Some(self.phone.as_str()))
            .with("national_id", self.national_id.as_deref())
    }
}

impl From<&CaretakerRow> for CaretakerInput {
    fn from(row: &CaretakerRow) -> Self {
        Self {
            name: row.name.clone(),
            phone: row.phone.clone(),
            national_id: row.national_id.clone(),
        }
    }
}

/// Input for creating a holding station together with its staff
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateStationInput {
    pub name: String,
    #[serde(default)]
    pub location: Option<String>,
    pub total_capacity: i64,
    #[serde(default = "default_status")]
    pub status: String,
    pub incharges: Vec<InchargeInput>,
    #[serde(default)]
    pub caretakers: Vec<CaretakerInput>,
}

fn default_status() -> String {
    station_status::ACTIVE.to_string()
}

/// Station update. Staff lists are always submitted in full and replace
/// the stored set.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStationInput {
    pub name: Option<String>,
    pub location: Option<String>,
    pub status: Option<String>,
    pub total_capacity: Option<i64>,
    pub incharges: Vec<InchargeInput>,
    #[serde(default)]
    pub caretakers: Vec<CaretakerInput>,
    #[serde(default)]
    pub replace_documents: bool,
}

/// Validate a station's own columns
pub fn validate_station_fields(name: &str, status: &str, total_capacity: i64) -> Result<(), ProcurementError> {
    validation::require("name", Some(name))?;
    validation::check_one_of("status", status, &station_status::ALL)?;
    if total_capacity < 0 {
        return Err(ProcurementError::validation("totalCapacity", "capacity cannot be negative"));
    }
    Ok(())
}

/// Validate and normalize a full staff submission
pub fn check_staff(
    incharges: &[InchargeInput],
    caretakers: &[CaretakerInput],
) -> Result<(Vec<InchargeInput>, Vec<CaretakerInput>), ProcurementError> {
    if incharges.is_empty() {
        return Err(ProcurementError::validation(
            "incharges",
            "at least one incharge is required",
        ));
    }

    let incharges = incharges
        .iter()
        .enumerate()
        .map(|(i, incharge)| incharge.checked(i))
        .collect::<Result<Vec<_>, _>>()?;
    let caretakers = caretakers
        .iter()
        .enumerate()
        .map(|(i, caretaker)| caretaker.checked(i))
        .collect::<Result<Vec<_>, _>>()?;

    Ok((incharges, caretakers))
}

fn load_incharges(conn: &Connection, station_id: i64) -> Result<Vec<InchargeRow>, ProcurementError> {
    let mut stmt = conn
        .prepare("SELECT id, station_id, name, phone, email, national_id FROM holding_station_incharges WHERE station_id = ? ORDER BY id")
        .map_err(|e| ProcurementError::Internal(format!("Prepare failed: {}", e)))?;

    let rows = stmt
        .query_map(params![station_id], |row| {
            Ok(InchargeRow {
                id: row.get(0)?,
                station_id: row.get(1)?,
                name: row.get(2)?,
                phone: row.get(3)?,
                email: row.get(4)?,
                national_id: row.get(5)?,
            })
        })
        .map_err(|e| ProcurementError::Internal(format!("Query failed: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ProcurementError::Internal(format!("Row parse failed: {}", e)))?;

    Ok(rows)
}

fn load_caretakers(conn: &Connection, station_id: i64) -> Result<Vec<CaretakerRow>, ProcurementError> {
    let mut stmt = conn
        .prepare("SELECT id, station_id, name, phone, national_id FROM holding_station_caretakers WHERE station_id = ? ORDER BY id")
        .map_err(|e| ProcurementError::Internal(format!("Prepare failed: {}", e)))?;

    let rows = stmt
        .query_map(params![station_id], |row| {
            Ok(CaretakerRow {
                id: row.get(0)?,
                station_id: row.get(1)?,
                name: row.get(2)?,
                phone: row.get(3)?,
                national_id: row.get(4)?,
            })
        })
        .map_err(|e| ProcurementError::Internal(format!("Query failed: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ProcurementError::Internal(format!("Row parse failed: {}", e)))?;

    Ok(rows)
}

fn with_staff(conn: &Connection, station: Option<HoldingStationRow>) -> Result<Option<HoldingStationRow>, ProcurementError> {
    match station {
        Some(mut station) => {
            station.incharges = load_incharges(conn, station.id)?;
            station.caretakers = load_caretakers(conn, station.id)?;
            Ok(Some(station))
        }
        None => Ok(None),
    }
}

/// Get a station by external id, optionally including retired rows
pub fn get_station(
    conn: &Connection,
    external_id: &str,
    include_deleted: bool,
) -> Result<Option<HoldingStationRow>, ProcurementError> {
    let sql = if include_deleted {
        "SELECT * FROM holding_stations WHERE external_id = ?"
    } else {
        "SELECT * FROM holding_stations WHERE external_id = ? AND deleted_at IS NULL"
    };
    let station = conn
        .query_row(sql, params![external_id], |row| HoldingStationRow::from_row(row))
        .optional()
        .map_err(|e| ProcurementError::Internal(format!("Query failed: {}", e)))?;
    with_staff(conn, station)
}

/// Get a station by row id, including retired rows
pub fn get_station_by_id(conn: &Connection, id: i64) -> Result<Option<HoldingStationRow>, ProcurementError> {
    let station = conn
        .query_row("SELECT * FROM holding_stations WHERE id = ?", params![id], |row| {
            HoldingStationRow::from_row(row)
        })
        .optional()
        .map_err(|e| ProcurementError::Internal(format!("Query failed: {}", e)))?;
    with_staff(conn, station)
}

/// Active station by external id, or `NotFound`
pub fn require_station(conn: &Connection, external_id: &str) -> Result<HoldingStationRow, ProcurementError> {
    get_station(conn, external_id, false)?
        .ok_or_else(|| ProcurementError::not_found("Holding station", external_id))
}

/// Active stations, optionally only those with a free slot
pub fn list_stations(conn: &Connection, with_space_only: bool) -> Result<Vec<HoldingStationRow>, ProcurementError> {
    let sql = if with_space_only {
        "SELECT * FROM holding_stations WHERE deleted_at IS NULL AND status = 'active' AND current_occupancy < total_capacity ORDER BY id"
    } else {
        "SELECT * FROM holding_stations WHERE deleted_at IS NULL ORDER BY id"
    };

    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| ProcurementError::Internal(format!("Prepare failed: {}", e)))?;

    let stations = stmt
        .query_map([], |row| HoldingStationRow::from_row(row))
        .map_err(|e| ProcurementError::Internal(format!("Query failed: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ProcurementError::Internal(format!("Row parse failed: {}", e)))?;

    let mut results = Vec::with_capacity(stations.len());
    for mut station in stations {
        station.incharges = load_incharges(conn, station.id)?;
        station.caretakers = load_caretakers(conn, station.id)?;
        results.push(station);
    }

    Ok(results)
}

/// Insert the station row itself (occupancy starts at zero)
pub fn insert_station(
    conn: &Connection,
    external_id: &str,
    name: &str,
    location: Option<&str>,
    total_capacity: i64,
    status: &str,
    document_paths: &[String],
) -> Result<i64, rusqlite::Error> {
    conn.execute(
        r#"
        INSERT INTO holding_stations (external_id, name, location, total_capacity, status, document_paths)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
        params![external_id, name, location, total_capacity, status, encode_paths(document_paths)],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Update descriptive columns; capacity and occupancy go through the ledger
pub fn update_station_fields(conn: &Connection, row: &HoldingStationRow) -> Result<(), ProcurementError> {
    conn.execute(
        "UPDATE holding_stations SET name = ?, location = ?, status = ?, document_paths = ?, updated_at = ? WHERE id = ?",
        params![
            row.name,
            row.location,
            row.status,
            encode_paths(&row.document_paths),
            current_timestamp(),
            row.id,
        ],
    )
    .map_err(|e| ProcurementError::Internal(format!("Station update failed: {}", e)))?;
    Ok(())
}

/// Remove every staff row of a station
pub fn delete_staff(conn: &Connection, station_id: i64) -> Result<(), ProcurementError> {
    conn.execute("DELETE FROM holding_station_incharges WHERE station_id = ?", params![station_id])
        .map_err(|e| ProcurementError::Internal(format!("Incharge delete failed: {}", e)))?;
    conn.execute("DELETE FROM holding_station_caretakers WHERE station_id = ?", params![station_id])
        .map_err(|e| ProcurementError::Internal(format!("Caretaker delete failed: {}", e)))?;
    Ok(())
}

/// Bulk-insert a station's staff
pub fn insert_staff(
    conn: &Connection,
    station_id: i64,
    incharges: &[InchargeInput],
    caretakers: &[CaretakerInput],
) -> Result<(), ProcurementError> {
    for incharge in incharges {
        conn.execute(
            "INSERT INTO holding_station_incharges (station_id, name, phone, email, national_id) VALUES (?, ?, ?, ?, ?)",
            params![station_id, incharge.name, incharge.phone, incharge.email, incharge.national_id],
        )
        .map_err(map_write_error)?;
    }

    for caretaker in caretakers {
        conn.execute(
            "INSERT INTO holding_station_caretakers (station_id, name, phone, national_id) VALUES (?, ?, ?, ?)",
            params![station_id, caretaker.name, caretaker.phone, caretaker.national_id],
        )
        .map_err(map_write_error)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn incharge(phone: &str) -> InchargeInput {
        InchargeInput {
            name: "Asha Patil".into(),
            phone: phone.into(),
            email: Some(" Asha@Station.in ".into()),
            national_id: None,
        }
    }

    #[test]
    fn test_staff_requires_an_incharge() {
        let err = check_staff(&[], &[]).unwrap_err();
        assert_eq!(err.field(), Some("incharges"));
    }

    #[test]
    fn test_staff_errors_point_at_the_record() {
        let caretakers = vec![
            CaretakerInput { name: "Ravi".into(), phone: "9876500001".into(), national_id: None },
            CaretakerInput { name: "Mohan".into(), phone: "55".into(), national_id: None },
        ];
        let err = check_staff(&[incharge("9876500000")], &caretakers).unwrap_err();
        assert_eq!(err.field(), Some("caretakers[1].phone"));
    }

    #[test]
    fn test_checked_incharge_is_normalized() {
        let checked = incharge(" 9876500000 ").checked(0).unwrap();
        assert_eq!(checked.phone, "9876500000");
        assert_eq!(checked.email.as_deref(), Some("asha@station.in"));
    }

    #[test]
    fn test_station_field_validation() {
        assert!(validate_station_fields("North Yard", "active", 10).is_ok());
        assert!(validate_station_fields("North Yard", "closed", 10).is_err());
        assert!(validate_station_fields("North Yard", "active", -1).is_err());
    }
}
