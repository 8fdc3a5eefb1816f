//! Holding-station occupancy ledger
//!
//! `current_occupancy` is the one hot shared counter in the system. Every
//! change to it is a single conditional `UPDATE`, so the bound check and the
//! increment happen in one statement under SQLite's write lock; concurrent
//! assignments to one station are linearized and can never overshoot
//! `total_capacity`. Callers run these functions inside the workflow's
//! transaction so a failed assignment rolls back everything else with it.

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, warn};

use super::models::{current_timestamp, station_status};
use crate::error::ProcurementError;

/// Capacity snapshot for one station
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Occupancy {
    pub station_id: i64,
    pub external_id: String,
    pub total_capacity: i64,
    pub current_occupancy: i64,
}

impl Occupancy {
    pub fn available(&self) -> i64 {
        (self.total_capacity - self.current_occupancy).max(0)
    }
}

/// A station whose stored occupancy disagrees with its active animals
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OccupancyDrift {
    pub station_id: i64,
    pub external_id: String,
    pub recorded: i64,
    pub actual: i64,
}

struct StationState {
    external_id: String,
    status: String,
    deleted: bool,
    total_capacity: i64,
    current_occupancy: i64,
}

fn load_state(conn: &Connection, station_id: i64) -> Result<Option<StationState>, ProcurementError> {
    conn.query_row(
        "SELECT external_id, status, deleted_at IS NOT NULL, total_capacity, current_occupancy
         FROM holding_stations WHERE id = ?",
        params![station_id],
        |row| {
            Ok(StationState {
                external_id: row.get(0)?,
                status: row.get(1)?,
                deleted: row.get(2)?,
                total_capacity: row.get(3)?,
                current_occupancy: row.get(4)?,
            })
        },
    )
    .optional()
    .map_err(|e| ProcurementError::Internal(format!("Station lookup failed: {}", e)))
}

/// Current occupancy of an active station
pub fn occupancy(conn: &Connection, station_id: i64) -> Result<Occupancy, ProcurementError> {
    match load_state(conn, station_id)? {
        Some(state) if !state.deleted => Ok(Occupancy {
            station_id,
            external_id: state.external_id,
            total_capacity: state.total_capacity,
            current_occupancy: state.current_occupancy,
        }),
        _ => Err(ProcurementError::not_found("Holding station", station_id.to_string())),
    }
}

/// Take one slot at `station_id`, or fail without changing anything
pub fn try_assign(conn: &Connection, station_id: i64) -> Result<(), ProcurementError> {
    let updated = conn
        .execute(
            "UPDATE holding_stations
             SET current_occupancy = current_occupancy + 1, updated_at = ?2
             WHERE id = ?1
               AND deleted_at IS NULL
               AND status = ?3
               AND current_occupancy < total_capacity",
            params![station_id, current_timestamp(), station_status::ACTIVE],
        )
        .map_err(|e| ProcurementError::Internal(format!("Occupancy update failed: {}", e)))?;

    if updated == 1 {
        debug!(station_id, "Assigned slot");
        return Ok(());
    }

    // Nothing changed; work out why for the caller
    match load_state(conn, station_id)? {
        None => Err(ProcurementError::not_found("Holding station", station_id.to_string())),
        Some(state) if state.deleted => {
            Err(ProcurementError::not_found("Holding station", state.external_id))
        }
        Some(state) if state.status != station_status::ACTIVE => Err(ProcurementError::validation(
            "holdingStationId",
            format!("holding station {} is {}", state.external_id, state.status),
        )),
        Some(state) => {
            debug!(
                station = %state.external_id,
                occupancy = state.current_occupancy,
                capacity = state.total_capacity,
                "Station full"
            );
            Err(ProcurementError::CapacityExceeded(state.external_id))
        }
    }
}

/// Give back one slot at `station_id`.
///
/// Clamped at zero and idempotent on an empty or missing station, so
/// re-running a retirement never fails on the ledger.
pub fn release(conn: &Connection, station_id: i64) -> Result<(), ProcurementError> {
    let updated = conn
        .execute(
            "UPDATE holding_stations
             SET current_occupancy = MAX(current_occupancy - 1, 0), updated_at = ?2
             WHERE id = ?1",
            params![station_id, current_timestamp()],
        )
        .map_err(|e| ProcurementError::Internal(format!("Occupancy update failed: {}", e)))?;

    if updated == 0 {
        warn!(station_id, "Released slot at a station that no longer exists");
    } else {
        debug!(station_id, "Released slot");
    }

    Ok(())
}

/// Change `total_capacity`, refusing to go below the current occupancy
pub fn resize(conn: &Connection, station_id: i64, new_capacity: i64) -> Result<(), ProcurementError> {
    if new_capacity < 0 {
        return Err(ProcurementError::validation(
            "totalCapacity",
            "capacity cannot be negative",
        ));
    }

    let updated = conn
        .execute(
            "UPDATE holding_stations
             SET total_capacity = ?2, updated_at = ?3
             WHERE id = ?1 AND deleted_at IS NULL AND current_occupancy <= ?2",
            params![station_id, new_capacity, current_timestamp()],
        )
        .map_err(|e| ProcurementError::Internal(format!("Capacity update failed: {}", e)))?;

    if updated == 1 {
        debug!(station_id, new_capacity, "Resized station");
        return Ok(());
    }

    match load_state(conn, station_id)? {
        Some(state) if !state.deleted => Err(ProcurementError::CapacityBelowOccupancy {
            station: state.external_id,
            occupancy: state.current_occupancy,
            requested: new_capacity,
        }),
        _ => Err(ProcurementError::not_found("Holding station", station_id.to_string())),
    }
}

/// Move one slot from `from` to `to`.
///
/// The destination is claimed first, so a full destination fails the move
/// while the animal still holds its original slot.
pub fn reassign(conn: &Connection, from: i64, to: i64) -> Result<(), ProcurementError> {
    if from == to {
        return Ok(());
    }
    try_assign(conn, to)?;
    release(conn, from)
}

/// Compare stored occupancy against the active animals at each active station
pub fn audit_occupancy(conn: &Connection) -> Result<Vec<OccupancyDrift>, ProcurementError> {
    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.external_id, s.current_occupancy,
                    (SELECT COUNT(*) FROM animals a
                     WHERE a.holding_station_id = s.id AND a.deleted_at IS NULL)
             FROM holding_stations s
             WHERE s.deleted_at IS NULL
             ORDER BY s.id",
        )
        .map_err(|e| ProcurementError::Internal(format!("Prepare failed: {}", e)))?;

    let rows = stmt
        .query_map([], |row| {
            Ok(OccupancyDrift {
                station_id: row.get(0)?,
                external_id: row.get(1)?,
                recorded: row.get(2)?,
                actual: row.get(3)?,
            })
        })
        .map_err(|e| ProcurementError::Internal(format!("Query failed: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ProcurementError::Internal(format!("Row parse failed: {}", e)))?;

    Ok(rows.into_iter().filter(|d| d.recorded != d.actual).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::init_schema;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    fn station(conn: &Connection, external_id: &str, capacity: i64, status: &str) -> i64 {
        conn.execute(
            "INSERT INTO holding_stations (external_id, name, total_capacity, status) VALUES (?, 'S', ?, ?)",
            params![external_id, capacity, status],
        )
        .unwrap();
        conn.last_insert_rowid()
    }

    #[test]
    fn test_assign_until_full() {
        let conn = setup();
        let id = station(&conn, "HS00001", 2, "active");

        try_assign(&conn, id).unwrap();
        try_assign(&conn, id).unwrap();
        let err = try_assign(&conn, id).unwrap_err();

        assert!(matches!(err, ProcurementError::CapacityExceeded(ref s) if s == "HS00001"));
        assert_eq!(occupancy(&conn, id).unwrap().current_occupancy, 2);
    }

    #[test]
    fn test_zero_capacity_station_rejects() {
        let conn = setup();
        let id = station(&conn, "HS00002", 0, "active");
        assert_eq!(try_assign(&conn, id).unwrap_err().kind(), "capacity_exceeded");
    }

    #[test]
    fn test_inactive_station_rejects_with_validation() {
        let conn = setup();
        let id = station(&conn, "HS00003", 5, "maintenance");
        let err = try_assign(&conn, id).unwrap_err();
        assert_eq!(err.kind(), "validation_failed");
        assert_eq!(err.field(), Some("holdingStationId"));
    }

    #[test]
    fn test_missing_station_is_not_found() {
        let conn = setup();
        assert_eq!(try_assign(&conn, 404).unwrap_err().kind(), "not_found");
    }

    #[test]
    fn test_release_clamps_at_zero() {
        let conn = setup();
        let id = station(&conn, "HS00004", 3, "active");
        try_assign(&conn, id).unwrap();
        release(&conn, id).unwrap();
        release(&conn, id).unwrap();
        release(&conn, 999).unwrap();
        assert_eq!(occupancy(&conn, id).unwrap().current_occupancy, 0);
    }

    #[test]
    fn test_resize_respects_occupancy() {
        let conn = setup();
        let id = station(&conn, "HS00005", 3, "active");
        try_assign(&conn, id).unwrap();

        let err = resize(&conn, id, 0).unwrap_err();
        assert!(matches!(
            err,
            ProcurementError::CapacityBelowOccupancy { occupancy: 1, requested: 0, .. }
        ));

        resize(&conn, id, 1).unwrap();
        let snapshot = occupancy(&conn, id).unwrap();
        assert_eq!(snapshot.total_capacity, 1);
        assert_eq!(snapshot.available(), 0);
    }

    #[test]
    fn test_resize_rejects_negative() {
        let conn = setup();
        let id = station(&conn, "HS00006", 3, "active");
        assert_eq!(resize(&conn, id, -1).unwrap_err().kind(), "validation_failed");
    }

    #[test]
    fn test_reassign_into_full_station_keeps_origin_slot() {
        let conn = setup();
        let origin = station(&conn, "HS00007", 2, "active");
        let full = station(&conn, "HS00008", 1, "active");
        try_assign(&conn, origin).unwrap();
        try_assign(&conn, full).unwrap();

        assert!(reassign(&conn, origin, full).is_err());
        assert_eq!(occupancy(&conn, origin).unwrap().current_occupancy, 1);
        assert_eq!(occupancy(&conn, full).unwrap().current_occupancy, 1);
    }

    #[test]
    fn test_audit_reports_drift() {
        let conn = setup();
        let id = station(&conn, "HS00009", 3, "active");
        try_assign(&conn, id).unwrap();

        let drift = audit_occupancy(&conn).unwrap();
        assert_eq!(drift.len(), 1);
        assert_eq!(drift[0].recorded, 1);
        assert_eq!(drift[0].actual, 0);
    }
}
