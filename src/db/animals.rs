//! Animal rows
//!
//! `vendor_id` and `holding_station_id` hold internal row ids. Reads join
//! the parents back in so snapshots carry their external ids as well.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::duplicates::{map_write_error, FieldMap};
use super::models::{animal_gender, current_timestamp, decode_paths, encode_paths};
use crate::error::ProcurementError;
use crate::validation;

const SELECT_ANIMAL: &str = r#"
    SELECT a.*,
           v.external_id AS vendor_external_id,
           s.external_id AS holding_station_external_id
    FROM animals a
    LEFT JOIN vendors v ON v.id = a.vendor_id
    LEFT JOIN holding_stations s ON s.id = a.holding_station_id
"#;

/// Animal row from database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnimalRow {
    pub id: i64,
    pub external_id: String,
    pub vendor_id: i64,
    /// `None` once the vendor row has been physically removed
    pub vendor_external_id: Option<String>,
    pub holding_station_id: i64,
    pub holding_station_external_id: Option<String>,
    pub species: String,
    pub breed: Option<String>,
    pub gender: Option<String>,
    pub ear_tag_id: Option<String>,
    pub calf_ear_tag_id: Option<String>,
    pub external_studbook_id: Option<String>,
    /// Derived: some active vendor payment lists this animal
    pub vendor_pay: bool,
    pub media_paths: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
    pub deleted_at: Option<String>,
}

impl AnimalRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        let raw_paths: String = row.get("media_paths")?;
        Ok(Self {
            id: row.get("id")?,
            external_id: row.get("external_id")?,
            vendor_id: row.get("vendor_id")?,
            vendor_external_id: row.get("vendor_external_id")?,
            holding_station_id: row.get("holding_station_id")?,
            holding_station_external_id: row.get("holding_station_external_id")?,
            species: row.get("species")?,
            breed: row.get("breed")?,
            gender: row.get("gender")?,
            ear_tag_id: row.get("ear_tag_id")?,
            calf_ear_tag_id: row.get("calf_ear_tag_id")?,
            external_studbook_id: row.get("external_studbook_id")?,
            vendor_pay: row.get("vendor_pay")?,
            media_paths: decode_paths(&raw_paths, "animals.media_paths"),
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            deleted_at: row.get("deleted_at")?,
        })
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn unique_fields(&self) -> FieldMap {
        FieldMap::new()
            .with("ear_tag_id", self.ear_tag_id.as_deref())
            .with("calf_ear_tag_id", self.calf_ear_tag_id.as_deref())
            .with("external_studbook_id", self.external_studbook_id.as_deref())
    }

    /// Check the animal's own columns; parents are checked by the workflow
    pub fn validate(&self) -> Result<(), ProcurementError> {
        validation::require("species", Some(self.species.as_str()))?;
        if let Some(gender) = &self.gender {
            validation::check_one_of("gender", gender, &animal_gender::ALL)?;
        }
        if self.ear_tag_id.is_some() && self.ear_tag_id == self.calf_ear_tag_id {
            return Err(ProcurementError::validation(
                "calfEarTagId",
                "calf ear tag must differ from the ear tag",
            ));
        }
        Ok(())
    }
}

/// Input for registering an animal. Parents are given by external id.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterAnimalInput {
    pub vendor_id: String,
    pub holding_station_id: String,
    pub species: String,
    #[serde(default)]
    pub breed: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub ear_tag_id: Option<String>,
    #[serde(default)]
    pub calf_ear_tag_id: Option<String>,
    #[serde(default)]
    pub external_studbook_id: Option<String>,
}

impl RegisterAnimalInput {
    /// Draft row with normalized values; parent ids are filled in later
    pub fn to_draft(&self) -> AnimalRow {
        AnimalRow {
            id: 0,
            external_id: String::new(),
            vendor_id: 0,
            vendor_external_id: validation::normalize(Some(&self.vendor_id)),
            holding_station_id: 0,
            holding_station_external_id: validation::normalize(Some(&self.holding_station_id)),
            species: self.species.trim().to_string(),
            breed: validation::normalize(self.breed.as_deref()),
            gender: validation::normalize(self.gender.as_deref()).map(|g| g.to_lowercase()),
            ear_tag_id: validation::normalize_code(self.ear_tag_id.as_deref()),
            calf_ear_tag_id: validation::normalize_code(self.calf_ear_tag_id.as_deref()),
            external_studbook_id: validation::normalize_code(self.external_studbook_id.as_deref()),
            vendor_pay: false,
            media_paths: vec![],
            created_at: String::new(),
            updated_at: String::new(),
            deleted_at: None,
        }
    }
}

/// Partial animal update; `None` keeps the stored value, a blank string clears it.
///
/// A new `holding_station_id` moves the animal through the capacity ledger.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAnimalInput {
    pub holding_station_id: Option<String>,
    pub species: Option<String>,
    pub breed: Option<String>,
    pub gender: Option<String>,
    pub ear_tag_id: Option<String>,
    pub calf_ear_tag_id: Option<String>,
    pub external_studbook_id: Option<String>,
    /// Replace the stored media with the newly staged files
    #[serde(default)]
    pub replace_media: bool,
}

impl UpdateAnimalInput {
    /// Apply descriptive fields; the station move is handled by the workflow
    pub fn apply(&self, row: &mut AnimalRow) {
        if let Some(species) = &self.species {
            row.species = species.trim().to_string();
        }
        if let Some(v) = &self.breed {
            row.breed = validation::normalize(Some(v));
        }
        if let Some(v) = &self.gender {
            row.gender = validation::normalize(Some(v)).map(|g| g.to_lowercase());
        }
        if let Some(v) = &self.ear_tag_id {
            row.ear_tag_id = validation::normalize_code(Some(v));
        }
        if let Some(v) = &self.calf_ear_tag_id {
            row.calf_ear_tag_id = validation::normalize_code(Some(v));
        }
        if let Some(v) = &self.external_studbook_id {
            row.external_studbook_id = validation::normalize_code(Some(v));
        }
    }
}

/// Filters for listing animals
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnimalQuery {
    /// Vendor external id
    pub vendor_id: Option<String>,
    /// Holding station external id
    pub holding_station_id: Option<String>,
    pub vendor_pay: Option<bool>,
    #[serde(default)]
    pub include_deleted: bool,
    pub limit: Option<i64>,
}

/// Get an animal by external id, optionally including retired rows
pub fn get_animal(
    conn: &Connection,
    external_id: &str,
    include_deleted: bool,
) -> Result<Option<AnimalRow>, ProcurementError> {
    let mut sql = format!("{} WHERE a.external_id = ?", SELECT_ANIMAL);
    if !include_deleted {
        sql.push_str(" AND a.deleted_at IS NULL");
    }
    conn.query_row(&sql, params![external_id], |row| AnimalRow::from_row(row))
        .optional()
        .map_err(|e| ProcurementError::Internal(format!("Query failed: {}", e)))
}

/// Get an animal by row id, including retired rows
pub fn get_animal_by_id(conn: &Connection, id: i64) -> Result<Option<AnimalRow>, ProcurementError> {
    let sql = format!("{} WHERE a.id = ?", SELECT_ANIMAL);
    conn.query_row(&sql, params![id], |row| AnimalRow::from_row(row))
        .optional()
        .map_err(|e| ProcurementError::Internal(format!("Query failed: {}", e)))
}

/// Active animal by external id, or `NotFound`
pub fn require_animal(conn: &Connection, external_id: &str) -> Result<AnimalRow, ProcurementError> {
    get_animal(conn, external_id, false)?
        .ok_or_else(|| ProcurementError::not_found("Animal", external_id))
}

/// List animals matching `query`, oldest first
pub fn list_animals(conn: &Connection, query: &AnimalQuery) -> Result<Vec<AnimalRow>, ProcurementError> {
    let mut sql = format!("{} WHERE 1 = 1", SELECT_ANIMAL);
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![];

    if !query.include_deleted {
        sql.push_str(" AND a.deleted_at IS NULL");
    }
    if let Some(vendor) = &query.vendor_id {
        sql.push_str(" AND v.external_id = ?");
        params.push(Box::new(vendor.clone()));
    }
    if let Some(station) = &query.holding_station_id {
        sql.push_str(" AND s.external_id = ?");
        params.push(Box::new(station.clone()));
    }
    if let Some(vendor_pay) = query.vendor_pay {
        sql.push_str(" AND a.vendor_pay = ?");
        params.push(Box::new(vendor_pay));
    }
    sql.push_str(" ORDER BY a.id");
    if let Some(limit) = query.limit {
        sql.push_str(" LIMIT ?");
        params.push(Box::new(limit));
    }

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| ProcurementError::Internal(format!("Prepare failed: {}", e)))?;
    let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

    let rows = stmt
        .query_map(param_refs.as_slice(), |row| AnimalRow::from_row(row))
        .map_err(|e| ProcurementError::Internal(format!("Query failed: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ProcurementError::Internal(format!("Row parse failed: {}", e)))?;

    Ok(rows)
}

/// Load the given animals by row id, skipping ids with no row
pub fn animals_by_ids(conn: &Connection, ids: &[i64]) -> Result<Vec<AnimalRow>, ProcurementError> {
    let mut animals = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(animal) = get_animal_by_id(conn, *id)? {
            animals.push(animal);
        }
    }
    Ok(animals)
}

/// Insert a validated draft; `vendor_id` and `holding_station_id` must be resolved
pub fn insert_animal(
    conn: &Connection,
    external_id: &str,
    draft: &AnimalRow,
) -> Result<i64, rusqlite::Error> {
    conn.execute(
        r#"
        INSERT INTO animals (
            external_id, vendor_id, holding_station_id, species, breed, gender,
            ear_tag_id, calf_ear_tag_id, external_studbook_id, vendor_pay, media_paths
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?)
        "#,
        params![
            external_id,
            draft.vendor_id,
            draft.holding_station_id,
            draft.species,
            draft.breed,
            draft.gender,
            draft.ear_tag_id,
            draft.calf_ear_tag_id,
            draft.external_studbook_id,
            encode_paths(&draft.media_paths),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Write descriptive columns and media. `vendor_pay` is owned by settlement
/// and the station by [`set_station`].
pub fn update_animal(conn: &Connection, row: &AnimalRow) -> Result<(), ProcurementError> {
    conn.execute(
        r#"
        UPDATE animals SET
            species = ?, breed = ?, gender = ?, ear_tag_id = ?, calf_ear_tag_id = ?,
            external_studbook_id = ?, media_paths = ?, updated_at = ?
        WHERE id = ?
        "#,
        params![
            row.species,
            row.breed,
            row.gender,
            row.ear_tag_id,
            row.calf_ear_tag_id,
            row.external_studbook_id,
            encode_paths(&row.media_paths),
            current_timestamp(),
            row.id,
        ],
    )
    .map_err(map_write_error)?;
    Ok(())
}

/// Point an animal at another station. The ledger must already have moved the slot.
pub fn set_station(conn: &Connection, animal_id: i64, station_id: i64) -> Result<(), ProcurementError> {
    conn.execute(
        "UPDATE animals SET holding_station_id = ?2, updated_at = ?3 WHERE id = ?1",
        params![animal_id, station_id, current_timestamp()],
    )
    .map_err(|e| ProcurementError::Internal(format!("Station move failed: {}", e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::init_schema;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn.execute("INSERT INTO vendors (external_id, name) VALUES ('VEN00001', 'Vendor')", [])
            .unwrap();
        conn.execute(
            "INSERT INTO holding_stations (external_id, name, total_capacity) VALUES ('HS00001', 'North', 5)",
            [],
        )
        .unwrap();
        conn
    }

    fn draft(ear_tag: &str) -> AnimalRow {
        let mut draft = RegisterAnimalInput {
            vendor_id: "VEN00001".into(),
            holding_station_id: "HS00001".into(),
            species: "Cattle".into(),
            ear_tag_id: Some(ear_tag.into()),
            ..Default::default()
        }
        .to_draft();
        draft.vendor_id = 1;
        draft.holding_station_id = 1;
        draft
    }

    #[test]
    fn test_ear_tags_must_differ() {
        let mut row = draft("et-1");
        row.calf_ear_tag_id = Some("ET-1".into());
        let err = row.validate().unwrap_err();
        assert_eq!(err.field(), Some("calfEarTagId"));
    }

    #[test]
    fn test_gender_vocabulary() {
        let mut row = draft("ET-1");
        row.gender = Some("female".into());
        assert!(row.validate().is_ok());
        row.gender = Some("unknown".into());
        assert!(row.validate().is_err());
    }

    #[test]
    fn test_reads_carry_parent_external_ids() {
        let conn = setup();
        insert_animal(&conn, "ANI0000001", &draft("ET-1")).unwrap();

        let animal = require_animal(&conn, "ANI0000001").unwrap();
        assert_eq!(animal.vendor_external_id.as_deref(), Some("VEN00001"));
        assert_eq!(animal.holding_station_external_id.as_deref(), Some("HS00001"));
        assert_eq!(animal.ear_tag_id.as_deref(), Some("ET-1"));
        assert!(!animal.vendor_pay);
    }

    #[test]
    fn test_list_filters() {
        let conn = setup();
        insert_animal(&conn, "ANI0000001", &draft("ET-1")).unwrap();
        insert_animal(&conn, "ANI0000002", &draft("ET-2")).unwrap();
        conn.execute("UPDATE animals SET deleted_at = 'x' WHERE external_id = 'ANI0000002'", [])
            .unwrap();

        let active = list_animals(&conn, &AnimalQuery {
            holding_station_id: Some("HS00001".into()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(active.len(), 1);

        let all = list_animals(&conn, &AnimalQuery { include_deleted: true, ..Default::default() }).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_update_maps_tag_clash_to_duplicate() {
        let conn = setup();
        insert_animal(&conn, "ANI0000001", &draft("ET-1")).unwrap();
        insert_animal(&conn, "ANI0000002", &draft("ET-2")).unwrap();

        let mut second = require_animal(&conn, "ANI0000002").unwrap();
        second.ear_tag_id = Some("ET-1".into());
        let err = update_animal(&conn, &second).unwrap_err();
        assert_eq!(err.field(), Some("ear_tag_id"));
    }
}
