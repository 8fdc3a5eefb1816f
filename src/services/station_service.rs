//! Holding station service
//!
//! A station and its staff are one unit: every write replaces the staff set
//! inside the same transaction as the station row, so a rejected incharge or
//! caretaker leaves the previous state untouched.

use std::sync::Arc;

use tracing::{debug, info};

use crate::db::duplicates::{find_duplicate, find_duplicate_within, Conflict, Exclude, FieldMap};
use crate::db::references::{assert_no_active_references, ParentKind, ParentRef};
use crate::db::models::station_status;
use crate::db::{capacity, entities, stations, EntityKind, IdentifierAllocator, ProcurementDb};
use crate::db::{CaretakerInput, CreateStationInput, HoldingStationRow, InchargeInput, UpdateStationInput};
use crate::error::ProcurementError;
use crate::files::{remove_files, StagedFiles};
use crate::validation;

use super::events::{EventBus, ProcurementEvent};
use super::reloaded;

/// Holding station service
pub struct StationService {
    db: Arc<ProcurementDb>,
    events: Arc<EventBus>,
    ids: Arc<IdentifierAllocator>,
}

/// Re-key a staff conflict to the record that caused it
fn staff_conflict(list: &str, index: usize, conflict: Conflict) -> ProcurementError {
    ProcurementError::DuplicateField {
        field: format!("{}[{}].{}", list, index, conflict.field),
        message: conflict.message,
    }
}

/// Check a normalized staff submission against itself and the stored staff
/// of other stations
fn guard_staff(
    conn: &rusqlite::Connection,
    incharges: &[InchargeInput],
    caretakers: &[CaretakerInput],
    exclude: Exclude<'_>,
) -> Result<(), ProcurementError> {
    let incharge_fields: Vec<FieldMap> = incharges.iter().map(InchargeInput::unique_fields).collect();
    let caretaker_fields: Vec<FieldMap> = caretakers.iter().map(CaretakerInput::unique_fields).collect();

    if let Some(conflict) = find_duplicate_within(EntityKind::Incharge, &incharge_fields) {
        return Err(ProcurementError::DuplicateField {
            field: format!("incharges.{}", conflict.field),
            message: conflict.message,
        });
    }
    if let Some(conflict) = find_duplicate_within(EntityKind::Caretaker, &caretaker_fields) {
        return Err(ProcurementError::DuplicateField {
            field: format!("caretakers.{}", conflict.field),
            message: conflict.message,
        });
    }

    for (i, fields) in incharge_fields.iter().enumerate() {
        if let Some(conflict) = find_duplicate(conn, EntityKind::Incharge, fields, exclude)? {
            return Err(staff_conflict("incharges", i, conflict));
        }
    }
    for (i, fields) in caretaker_fields.iter().enumerate() {
        if let Some(conflict) = find_duplicate(conn, EntityKind::Caretaker, fields, exclude)? {
            return Err(staff_conflict("caretakers", i, conflict));
        }
    }

    Ok(())
}

impl StationService {
    pub fn new(db: Arc<ProcurementDb>, events: Arc<EventBus>, ids: Arc<IdentifierAllocator>) -> Self {
        Self { db, events, ids }
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    pub fn get(&self, external_id: &str) -> Result<Option<HoldingStationRow>, ProcurementError> {
        self.db.with_conn(|conn| stations::get_station(conn, external_id, false))
    }

    /// Active stations; `with_space_only` keeps those able to take an animal
    pub fn list(&self, with_space_only: bool) -> Result<Vec<HoldingStationRow>, ProcurementError> {
        self.db.with_conn(|conn| stations::list_stations(conn, with_space_only))
    }

    pub fn occupancy(&self, external_id: &str) -> Result<capacity::Occupancy, ProcurementError> {
        self.db.with_conn(|conn| {
            let station = stations::require_station(conn, external_id)?;
            capacity::occupancy(conn, station.id)
        })
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    /// Create a station together with its incharges and caretakers
    pub fn create(
        &self,
        input: CreateStationInput,
        documents: StagedFiles,
    ) -> Result<HoldingStationRow, ProcurementError> {
        let name = input.name.trim().to_string();
        let location = validation::normalize(input.location.as_deref());
        let status = validation::normalize(Some(input.status.as_str()))
            .map(|s| s.to_lowercase())
            .unwrap_or_else(|| station_status::ACTIVE.to_string());
        stations::validate_station_fields(&name, &status, input.total_capacity)?;
        let (incharges, caretakers) = stations::check_staff(&input.incharges, &input.caretakers)?;
        let document_paths = documents.stored_paths();

        let station = self.db.transaction(|tx| {
            guard_staff(tx, &incharges, &caretakers, Exclude::Nothing)?;

            let id = self
                .ids
                .insert_with_external_id(tx, EntityKind::HoldingStation, |external_id| {
                    stations::insert_station(
                        tx,
                        external_id,
                        &name,
                        location.as_deref(),
                        input.total_capacity,
                        &status,
                        &document_paths,
                    )
                })?;

            stations::insert_staff(tx, id, &incharges, &caretakers)?;
            reloaded(stations::get_station_by_id(tx, id)?, EntityKind::HoldingStation, id)
        })?;
        documents.commit();

        info!(
            id = %station.external_id,
            capacity = station.total_capacity,
            incharges = station.incharges.len(),
            caretakers = station.caretakers.len(),
            "Holding station created"
        );
        self.events.emit(ProcurementEvent::Created {
            kind: EntityKind::HoldingStation,
            id: station.external_id.clone(),
        });

        Ok(station)
    }

    /// Update a station. The submitted staff lists replace the stored ones;
    /// a new capacity goes through the ledger's occupancy check.
    pub fn update(
        &self,
        external_id: &str,
        input: UpdateStationInput,
        documents: StagedFiles,
    ) -> Result<HoldingStationRow, ProcurementError> {
        let (incharges, caretakers) = stations::check_staff(&input.incharges, &input.caretakers)?;

        let (station, superseded, resized) = self.db.transaction(|tx| {
            let mut row = stations::require_station(tx, external_id)?;
            if let Some(name) = &input.name {
                row.name = name.trim().to_string();
            }
            if let Some(location) = &input.location {
                row.location = validation::normalize(Some(location));
            }
            if let Some(status) = &input.status {
                row.status = status.trim().to_lowercase();
            }
            let new_capacity = input.total_capacity.unwrap_or(row.total_capacity);
            stations::validate_station_fields(&row.name, &row.status, new_capacity)?;

            guard_staff(tx, &incharges, &caretakers, Exclude::Station(row.id))?;
            stations::delete_staff(tx, row.id)?;
            stations::insert_staff(tx, row.id, &incharges, &caretakers)?;

            let resized = new_capacity != row.total_capacity;
            if resized {
                capacity::resize(tx, row.id, new_capacity)?;
            }

            let superseded = if input.replace_documents {
                std::mem::replace(&mut row.document_paths, documents.stored_paths())
            } else {
                row.document_paths.extend(documents.stored_paths());
                Vec::new()
            };
            stations::update_station_fields(tx, &row)?;

            let station = reloaded(stations::get_station_by_id(tx, row.id)?, EntityKind::HoldingStation, row.id)?;
            Ok((station, superseded, resized))
        })?;
        documents.commit();
        remove_files(&superseded);

        debug!(id = %station.external_id, staff = station.incharges.len() + station.caretakers.len(), "Station updated");
        self.events.emit(ProcurementEvent::Updated {
            kind: EntityKind::HoldingStation,
            id: station.external_id.clone(),
        });
        if resized {
            self.events.emit(ProcurementEvent::StationResized {
                id: station.external_id.clone(),
                capacity: station.total_capacity,
                occupancy: station.current_occupancy,
            });
        }

        Ok(station)
    }

    /// Change a station's capacity; rejected below the current occupancy
    pub fn resize(&self, external_id: &str, new_capacity: i64) -> Result<HoldingStationRow, ProcurementError> {
        let station = self.db.transaction(|tx| {
            let row = stations::require_station(tx, external_id)?;
            capacity::resize(tx, row.id, new_capacity)?;
            reloaded(stations::get_station_by_id(tx, row.id)?, EntityKind::HoldingStation, row.id)
        })?;

        self.events.emit(ProcurementEvent::StationResized {
            id: station.external_id.clone(),
            capacity: station.total_capacity,
            occupancy: station.current_occupancy,
        });

        Ok(station)
    }

    /// Deactivate (soft-delete) a station. Its animals keep their slots.
    pub fn soft_delete(&self, external_id: &str) -> Result<HoldingStationRow, ProcurementError> {
        let station = self.db.transaction(|tx| {
            let row = stations::require_station(tx, external_id)?;
            entities::soft_delete(tx, EntityKind::HoldingStation, row.id)?;
            reloaded(stations::get_station_by_id(tx, row.id)?, EntityKind::HoldingStation, row.id)
        })?;

        self.events.emit(ProcurementEvent::SoftDeleted {
            kind: EntityKind::HoldingStation,
            id: station.external_id.clone(),
        });

        Ok(station)
    }

    /// Bring a deactivated station back
    pub fn restore(&self, external_id: &str) -> Result<HoldingStationRow, ProcurementError> {
        let (station, restored) = self.db.transaction(|tx| {
            let row = stations::get_station(tx, external_id, true)?
                .ok_or_else(|| ProcurementError::not_found("Holding station", external_id))?;
            if !row.is_deleted() {
                return Ok((row, false));
            }

            stations::validate_station_fields(&row.name, &row.status, row.total_capacity)?;

            // Another station may have taken these staff values meanwhile
            let incharges: Vec<InchargeInput> = row.incharges.iter().map(InchargeInput::from).collect();
            let caretakers: Vec<CaretakerInput> = row.caretakers.iter().map(CaretakerInput::from).collect();
            guard_staff(tx, &incharges, &caretakers, Exclude::Station(row.id))?;

            entities::restore(tx, EntityKind::HoldingStation, row.id)?;
            let station = reloaded(stations::get_station_by_id(tx, row.id)?, EntityKind::HoldingStation, row.id)?;
            Ok((station, true))
        })?;

        if restored {
            self.events.emit(ProcurementEvent::Restored {
                kind: EntityKind::HoldingStation,
                id: station.external_id.clone(),
            });
        }

        Ok(station)
    }

    /// Physically delete a station, its staff and its documents.
    ///
    /// Fails with `ReferencedByChildren` while any active animal is held there.
    pub fn hard_delete(&self, external_id: &str) -> Result<(), ProcurementError> {
        let documents = self.db.transaction(|tx| {
            let row = stations::get_station(tx, external_id, true)?
                .ok_or_else(|| ProcurementError::not_found("Holding station", external_id))?;

            assert_no_active_references(
                tx,
                ParentRef {
                    kind: ParentKind::HoldingStation,
                    id: row.id,
                    external_id: &row.external_id,
                },
            )?;

            // Staff rows go with the station (ON DELETE CASCADE)
            entities::hard_delete(tx, EntityKind::HoldingStation, row.id)?;
            Ok(row.document_paths)
        })?;

        let files_removed = remove_files(&documents);
        info!(id = %external_id, files_removed, "Holding station permanently deleted");

        self.events.emit(ProcurementEvent::HardDeleted {
            kind: EntityKind::HoldingStation,
            id: external_id.to_string(),
            files_removed,
        });

        Ok(())
    }
}
