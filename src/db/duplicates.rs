//! Duplicate business-key detection
//!
//! The guard is entity-agnostic: every entity declares its unique columns in
//! [`EntityKind::unique_fields`], and a candidate record is checked against
//! all active rows with one `OR` query. Staff rows count as active while
//! their station is. For top-level entities this is a pre-check that
//! produces a friendly message; the partial unique indexes in the schema
//! remain the race-safe backstop, and [`map_write_error`] turns their
//! violations into the same `DuplicateField` error. Staff values have no
//! index behind them, so callers run the check inside their IMMEDIATE
//! write transaction.

use std::collections::{BTreeMap, HashSet};

use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use tracing::debug;

use super::entities::EntityKind;
use crate::error::ProcurementError;

/// Candidate values keyed by column name.
///
/// Blank values are dropped on insert: an empty string means "not
/// provided" and never collides with other blank rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMap {
    values: BTreeMap<&'static str, String>,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`FieldMap::insert`]
    pub fn with(mut self, column: &'static str, value: Option<&str>) -> Self {
        self.insert(column, value);
        self
    }

    pub fn insert(&mut self, column: &'static str, value: Option<&str>) {
        match value.map(str::trim) {
            Some(v) if !v.is_empty() => {
                self.values.insert(column, v.to_string());
            }
            _ => {
                self.values.remove(column);
            }
        }
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.values.get(column).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Which existing row the check should ignore
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exclude<'a> {
    Nothing,
    /// The record being updated, by external id
    ExternalId(&'a str),
    /// Staff rows owned by this station (they are about to be replaced)
    Station(i64),
}

/// A unique field that is already taken
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conflict {
    pub field: String,
    pub value: String,
    pub message: String,
}

impl From<Conflict> for ProcurementError {
    fn from(conflict: Conflict) -> Self {
        ProcurementError::DuplicateField {
            field: conflict.field,
            message: conflict.message,
        }
    }
}

/// Find the first declared unique field of `candidate` already used by an
/// active row of `kind`.
pub fn find_duplicate(
    conn: &Connection,
    kind: EntityKind,
    candidate: &FieldMap,
    exclude: Exclude<'_>,
) -> Result<Option<Conflict>, ProcurementError> {
    let fields: Vec<_> = kind
        .unique_fields()
        .iter()
        .filter(|f| candidate.get(f.column).is_some())
        .collect();

    if fields.is_empty() {
        return Ok(None);
    }

    let mut conditions = vec![];
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![];

    let matches: Vec<String> = fields.iter().map(|f| format!("{} = ?", f.column)).collect();
    conditions.push(format!("({})", matches.join(" OR ")));
    for f in &fields {
        params.push(Box::new(candidate.get(f.column).unwrap_or_default().to_string()));
    }

    if kind.soft_deletes() {
        conditions.push("deleted_at IS NULL".to_string());
    }
    if let Some((column, owner_table)) = kind.owner() {
        conditions.push(format!(
            "{} IN (SELECT id FROM {} WHERE deleted_at IS NULL)",
            column, owner_table
        ));
    }

    match exclude {
        Exclude::Nothing => {}
        Exclude::ExternalId(external_id) => {
            if kind.id_prefix().is_none() {
                return Err(ProcurementError::Internal(format!(
                    "{} rows have no external id to exclude",
                    kind
                )));
            }
            conditions.push("external_id <> ?".to_string());
            params.push(Box::new(external_id.to_string()));
        }
        Exclude::Station(station_id) => {
            conditions.push("station_id <> ?".to_string());
            params.push(Box::new(station_id));
        }
    }

    let columns: Vec<&str> = fields.iter().map(|f| f.column).collect();
    let sql = format!(
        "SELECT {} FROM {} WHERE {} ORDER BY id LIMIT 1",
        columns.join(", "),
        kind.table(),
        conditions.join(" AND "),
    );

    debug!("Executing duplicate check: {}", sql);

    let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

    let existing: Option<Vec<Option<String>>> = conn
        .query_row(&sql, param_refs.as_slice(), |row| {
            (0..columns.len()).map(|i| row.get(i)).collect()
        })
        .optional()
        .map_err(|e| ProcurementError::Internal(format!("Duplicate check failed: {}", e)))?;

    let Some(existing) = existing else {
        return Ok(None);
    };

    let conflict = fields.iter().zip(existing).find_map(|(f, value)| {
        let wanted = candidate.get(f.column)?;
        (value.as_deref() == Some(wanted)).then(|| Conflict {
            field: f.column.to_string(),
            value: wanted.to_string(),
            message: format!(
                "{} '{}' is already used by another {}",
                f.label,
                wanted,
                kind.label().to_lowercase()
            ),
        })
    });

    Ok(conflict)
}

/// [`find_duplicate`] as a guard: any conflict becomes `DuplicateField`
pub fn ensure_unique(
    conn: &Connection,
    kind: EntityKind,
    candidate: &FieldMap,
    exclude: Exclude<'_>,
) -> Result<(), ProcurementError> {
    match find_duplicate(conn, kind, candidate, exclude)? {
        Some(conflict) => Err(conflict.into()),
        None => Ok(()),
    }
}

/// Find a unique field repeated inside one submitted batch of rows
pub fn find_duplicate_within(kind: EntityKind, rows: &[FieldMap]) -> Option<Conflict> {
    for f in kind.unique_fields() {
        let mut seen = HashSet::new();
        for row in rows {
            if let Some(value) = row.get(f.column) {
                if !seen.insert(value) {
                    return Some(Conflict {
                        field: f.column.to_string(),
                        value: value.to_string(),
                        message: format!("{} '{}' is listed more than once", f.label, value),
                    });
                }
            }
        }
    }
    None
}

/// `(table, column)` of a UNIQUE constraint violation, if `err` is one
pub fn unique_violation(err: &rusqlite::Error) -> Option<(String, String)> {
    let rusqlite::Error::SqliteFailure(failure, Some(message)) = err else {
        return None;
    };

    if failure.extended_code != rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE {
        return None;
    }

    let target = message.strip_prefix("UNIQUE constraint failed: ")?;
    let first = target.split(',').next()?.trim();
    let (table, column) = first.split_once('.')?;
    Some((table.to_string(), column.to_string()))
}

/// Map a write error, turning unique-index violations into `DuplicateField`
pub fn map_write_error(err: rusqlite::Error) -> ProcurementError {
    match unique_violation(&err) {
        Some((table, column)) => {
            let label = EntityKind::from_table(&table)
                .and_then(|kind| kind.unique_field(&column))
                .map(|f| f.label.to_string())
                .unwrap_or_else(|| column.clone());

            debug!(table = %table, column = %column, "Unique index rejected write");

            ProcurementError::DuplicateField {
                field: column,
                message: format!("{} is already in use", label),
            }
        }
        None => ProcurementError::Database(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::init_schema;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn.execute_batch(
            r#"
            INSERT INTO animals (external_id, vendor_id, holding_station_id, species, ear_tag_id, calf_ear_tag_id)
                VALUES ('ANI0000001', 1, 1, 'cattle', 'ET-1', 'CET-1');
            INSERT INTO animals (external_id, vendor_id, holding_station_id, species, ear_tag_id, deleted_at)
                VALUES ('ANI0000002', 1, 1, 'cattle', 'ET-2', '2024-01-01T00:00:00Z');
            INSERT INTO animals (external_id, vendor_id, holding_station_id, species, ear_tag_id, calf_ear_tag_id)
                VALUES ('ANI0000003', 1, 1, 'cattle', '', '');
            "#,
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_detects_active_duplicate() {
        let conn = setup();
        let candidate = FieldMap::new().with("ear_tag_id", Some("ET-1"));

        let conflict = find_duplicate(&conn, EntityKind::Animal, &candidate, Exclude::Nothing)
            .unwrap()
            .unwrap();
        assert_eq!(conflict.field, "ear_tag_id");
        assert!(conflict.message.contains("ET-1"));
    }

    #[test]
    fn test_reports_first_declared_field() {
        let conn = setup();
        let candidate = FieldMap::new()
            .with("calf_ear_tag_id", Some("CET-1"))
            .with("ear_tag_id", Some("ET-1"));

        let conflict = find_duplicate(&conn, EntityKind::Animal, &candidate, Exclude::Nothing)
            .unwrap()
            .unwrap();
        assert_eq!(conflict.field, "ear_tag_id");
    }

    #[test]
    fn test_soft_deleted_rows_are_ignored() {
        let conn = setup();
        let candidate = FieldMap::new().with("ear_tag_id", Some("ET-2"));
        assert!(find_duplicate(&conn, EntityKind::Animal, &candidate, Exclude::Nothing)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_blank_values_never_collide() {
        let conn = setup();
        let candidate = FieldMap::new()
            .with("ear_tag_id", Some("   "))
            .with("calf_ear_tag_id", Some(""));
        assert!(candidate.is_empty());
        assert!(find_duplicate(&conn, EntityKind::Animal, &candidate, Exclude::Nothing)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_update_excludes_own_row() {
        let conn = setup();
        let candidate = FieldMap::new().with("ear_tag_id", Some("ET-1"));
        let result = find_duplicate(
            &conn,
            EntityKind::Animal,
            &candidate,
            Exclude::ExternalId("ANI0000001"),
        )
        .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_repeated_checks_agree() {
        let conn = setup();
        let candidate = FieldMap::new()
            .with("ear_tag_id", Some("ET-1"))
            .with("external_studbook_id", Some("SB-9"));
        let first = find_duplicate(&conn, EntityKind::Animal, &candidate, Exclude::Nothing).unwrap();
        let second = find_duplicate(&conn, EntityKind::Animal, &candidate, Exclude::Nothing).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_within_batch_duplicates() {
        let rows = vec![
            FieldMap::new().with("phone", Some("9876543210")),
            FieldMap::new().with("phone", Some("9876543211")),
            FieldMap::new().with("phone", Some("9876543210")),
        ];
        let conflict = find_duplicate_within(EntityKind::Caretaker, &rows).unwrap();
        assert_eq!(conflict.field, "phone");
    }

    #[test]
    fn test_unique_index_violation_maps_to_duplicate_field() {
        let conn = setup();
        let err = conn
            .execute(
                "INSERT INTO animals (external_id, vendor_id, holding_station_id, species, ear_tag_id)
                 VALUES ('ANI0000009', 1, 1, 'cattle', 'ET-1')",
                [],
            )
            .unwrap_err();

        match map_write_error(err) {
            ProcurementError::DuplicateField { field, message } => {
                assert_eq!(field, "ear_tag_id");
                assert!(message.starts_with("Ear tag ID"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_staff_of_retired_station_is_ignored() {
        let conn = setup();
        conn.execute_batch(
            r#"
            INSERT INTO holding_stations (id, external_id, name, total_capacity) VALUES (1, 'HS00001', 'North', 5);
            INSERT INTO holding_stations (id, external_id, name, total_capacity, deleted_at)
                VALUES (2, 'HS00002', 'South', 5, '2024-01-01T00:00:00Z');
            INSERT INTO holding_station_incharges (station_id, name, phone) VALUES (1, 'Ravi', '9876543210');
            INSERT INTO holding_station_incharges (station_id, name, phone) VALUES (2, 'Sita', '9876543211');
            "#,
        )
        .unwrap();

        let active = FieldMap::new().with("phone", Some("9876543210"));
        assert!(find_duplicate(&conn, EntityKind::Incharge, &active, Exclude::Nothing)
            .unwrap()
            .is_some());

        let retired = FieldMap::new().with("phone", Some("9876543211"));
        assert!(find_duplicate(&conn, EntityKind::Incharge, &retired, Exclude::Nothing)
            .unwrap()
            .is_none());
    }
}
