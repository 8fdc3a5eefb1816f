//! Animal service - registration and movement through the capacity ledger
//!
//! Every path that creates, moves, retires or revives an active animal
//! changes exactly one station slot in the same transaction, which keeps
//! each station's occupancy equal to its count of active animals.

use std::sync::Arc;

use tracing::{debug, info};

use crate::db::duplicates::{ensure_unique, Exclude};
use crate::db::references::{assert_no_active_references, ParentKind, ParentRef};
use crate::db::{animals, capacity, entities, settlement, stations, vendors};
use crate::db::{AnimalQuery, AnimalRow, EntityKind, IdentifierAllocator, ProcurementDb};
use crate::db::{RegisterAnimalInput, UpdateAnimalInput};
use crate::error::ProcurementError;
use crate::files::{remove_files, StagedFiles};
use crate::validation;

use super::events::{EventBus, ProcurementEvent};
use super::reloaded;

/// Animal service for business logic
pub struct AnimalService {
    db: Arc<ProcurementDb>,
    events: Arc<EventBus>,
    ids: Arc<IdentifierAllocator>,
}

impl AnimalService {
    pub fn new(db: Arc<ProcurementDb>, events: Arc<EventBus>, ids: Arc<IdentifierAllocator>) -> Self {
        Self { db, events, ids }
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    pub fn get(&self, external_id: &str) -> Result<Option<AnimalRow>, ProcurementError> {
        self.db.with_conn(|conn| animals::get_animal(conn, external_id, false))
    }

    pub fn list(&self, query: &AnimalQuery) -> Result<Vec<AnimalRow>, ProcurementError> {
        self.db.with_conn(|conn| animals::list_animals(conn, query))
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    /// Register an animal at a station.
    ///
    /// Order: media present, field checks, parents, duplicate guard, station
    /// slot, external id, insert. Any failure rolls the slot back with the
    /// rest of the transaction and deletes the staged media.
    pub fn register(
        &self,
        input: RegisterAnimalInput,
        media: StagedFiles,
    ) -> Result<AnimalRow, ProcurementError> {
        media.require("media", 1)?;

        let mut draft = input.to_draft();
        draft.validate()?;
        let vendor_id = draft
            .vendor_external_id
            .clone()
            .ok_or_else(|| ProcurementError::validation("vendorId", "is required"))?;
        let station_id = draft
            .holding_station_external_id
            .clone()
            .ok_or_else(|| ProcurementError::validation("holdingStationId", "is required"))?;
        draft.media_paths = media.stored_paths();

        let (animal, occupancy) = self.db.transaction(|tx| {
            let vendor = vendors::require_vendor(tx, &vendor_id)?;
            if !vendor.is_active() {
                return Err(ProcurementError::validation(
                    "vendorId",
                    format!("vendor {} is {}", vendor.external_id, vendor.status),
                ));
            }
            let station = stations::require_station(tx, &station_id)?;

            ensure_unique(tx, EntityKind::Animal, &draft.unique_fields(), Exclude::Nothing)?;
            capacity::try_assign(tx, station.id)?;

            draft.vendor_id = vendor.id;
            draft.holding_station_id = station.id;
            let id = self
                .ids
                .insert_with_external_id(tx, EntityKind::Animal, |external_id| {
                    animals::insert_animal(tx, external_id, &draft)
                })?;

            let animal = reloaded(animals::get_animal_by_id(tx, id)?, EntityKind::Animal, id)?;
            let occupancy = capacity::occupancy(tx, station.id)?;
            Ok((animal, occupancy))
        })?;
        media.commit();

        info!(
            id = %animal.external_id,
            station = %occupancy.external_id,
            occupancy = occupancy.current_occupancy,
            "Animal registered"
        );
        self.events.emit(ProcurementEvent::AnimalRegistered {
            id: animal.external_id.clone(),
            station: occupancy.external_id,
            occupancy: occupancy.current_occupancy,
            capacity: occupancy.total_capacity,
        });

        Ok(animal)
    }

    /// Move an animal to another station: claim the new slot, then free the old one
    pub fn reassign(&self, external_id: &str, station_external_id: &str) -> Result<AnimalRow, ProcurementError> {
        let (animal, from) = self.db.transaction(|tx| {
            let animal = animals::require_animal(tx, external_id)?;
            let from = animal.holding_station_external_id.clone().unwrap_or_default();
            move_to_station(tx, &animal, station_external_id)?;
            let animal = reloaded(animals::get_animal_by_id(tx, animal.id)?, EntityKind::Animal, animal.id)?;
            Ok((animal, from))
        })?;

        let to = animal.holding_station_external_id.clone().unwrap_or_default();
        if from != to {
            self.events.emit(ProcurementEvent::AnimalReassigned {
                id: animal.external_id.clone(),
                from_station: from,
                to_station: to,
            });
        }

        Ok(animal)
    }

    /// Update an animal; a changed `holdingStationId` moves it like [`reassign`](Self::reassign)
    pub fn update(
        &self,
        external_id: &str,
        input: UpdateAnimalInput,
        media: StagedFiles,
    ) -> Result<AnimalRow, ProcurementError> {
        let (animal, superseded) = self.db.transaction(|tx| {
            let mut row = animals::require_animal(tx, external_id)?;
            input.apply(&mut row);
            row.validate()?;
            ensure_unique(tx, EntityKind::Animal, &row.unique_fields(), Exclude::ExternalId(external_id))?;

            if let Some(station) = validation::normalize(input.holding_station_id.as_deref()) {
                move_to_station(tx, &row, &station)?;
            }

            let superseded = if input.replace_media {
                std::mem::replace(&mut row.media_paths, media.stored_paths())
            } else {
                row.media_paths.extend(media.stored_paths());
                Vec::new()
            };
            if row.media_paths.is_empty() {
                return Err(ProcurementError::validation("media", "at least 1 file(s) required"));
            }

            animals::update_animal(tx, &row)?;
            let animal = reloaded(animals::get_animal_by_id(tx, row.id)?, EntityKind::Animal, row.id)?;
            Ok((animal, superseded))
        })?;
        media.commit();
        remove_files(&superseded);

        self.events.emit(ProcurementEvent::Updated {
            kind: EntityKind::Animal,
            id: animal.external_id.clone(),
        });

        Ok(animal)
    }

    /// Retire an animal and give its station slot back
    pub fn soft_delete(&self, external_id: &str) -> Result<AnimalRow, ProcurementError> {
        let animal = self.db.transaction(|tx| {
            let row = animals::require_animal(tx, external_id)?;
            entities::soft_delete(tx, EntityKind::Animal, row.id)?;
            capacity::release(tx, row.holding_station_id)?;
            reloaded(animals::get_animal_by_id(tx, row.id)?, EntityKind::Animal, row.id)
        })?;

        self.events.emit(ProcurementEvent::SoftDeleted {
            kind: EntityKind::Animal,
            id: animal.external_id.clone(),
        });

        Ok(animal)
    }

    /// Bring a retired animal back into its station.
    ///
    /// Re-runs the registration checks: the vendor and station must still be
    /// active, its tags must still be free and the station needs a free slot.
    /// The settlement flag is recomputed in case payments changed meanwhile.
    pub fn restore(&self, external_id: &str) -> Result<AnimalRow, ProcurementError> {
        let (animal, restored) = self.db.transaction(|tx| {
            let row = animals::get_animal(tx, external_id, true)?
                .ok_or_else(|| ProcurementError::not_found("Animal", external_id))?;
            if !row.is_deleted() {
                return Ok((row, false));
            }

            row.validate()?;
            let vendor = vendors::get_vendor_by_id(tx, row.vendor_id)?
                .filter(|v| !v.is_deleted())
                .ok_or_else(|| ProcurementError::validation("vendorId", "vendor is no longer active"))?;
            if !vendor.is_active() {
                return Err(ProcurementError::validation(
                    "vendorId",
                    format!("vendor {} is {}", vendor.external_id, vendor.status),
                ));
            }
            stations::get_station_by_id(tx, row.holding_station_id)?
                .filter(|s| !s.is_deleted())
                .ok_or_else(|| ProcurementError::validation("holdingStationId", "holding station is no longer active"))?;

            ensure_unique(tx, EntityKind::Animal, &row.unique_fields(), Exclude::ExternalId(external_id))?;
            capacity::try_assign(tx, row.holding_station_id)?;
            entities::restore(tx, EntityKind::Animal, row.id)?;
            settlement::recompute(tx, &[row.id], None)?;

            let animal = reloaded(animals::get_animal_by_id(tx, row.id)?, EntityKind::Animal, row.id)?;
            Ok((animal, true))
        })?;

        if restored {
            self.events.emit(ProcurementEvent::Restored {
                kind: EntityKind::Animal,
                id: animal.external_id.clone(),
            });
        }

        Ok(animal)
    }

    /// Physically delete an animal and its media; an active animal frees its slot first.
    /// Refused while an active vendor payment still lists the animal.
    pub fn hard_delete(&self, external_id: &str) -> Result<(), ProcurementError> {
        let media = self.db.transaction(|tx| {
            let row = animals::get_animal(tx, external_id, true)?
                .ok_or_else(|| ProcurementError::not_found("Animal", external_id))?;
            assert_no_active_references(
                tx,
                ParentRef {
                    kind: ParentKind::Animal,
                    id: row.id,
                    external_id: &row.external_id,
                },
            )?;
            if !row.is_deleted() {
                capacity::release(tx, row.holding_station_id)?;
            }
            entities::hard_delete(tx, EntityKind::Animal, row.id)?;
            Ok(row.media_paths)
        })?;

        let files_removed = remove_files(&media);
        debug!(id = %external_id, files_removed, "Animal permanently deleted");

        self.events.emit(ProcurementEvent::HardDeleted {
            kind: EntityKind::Animal,
            id: external_id.to_string(),
            files_removed,
        });

        Ok(())
    }
}

/// Move `animal` to the station `station_external_id`; a no-op when it is already there
fn move_to_station(
    conn: &rusqlite::Connection,
    animal: &AnimalRow,
    station_external_id: &str,
) -> Result<(), ProcurementError> {
    let station = stations::require_station(conn, station_external_id)?;
    if station.id == animal.holding_station_id {
        return Ok(());
    }

    capacity::reassign(conn, animal.holding_station_id, station.id)?;
    animals::set_station(conn, animal.id, station.id)?;
    debug!(
        id = %animal.external_id,
        to = %station.external_id,
        "Moved animal"
    );
    Ok(())
}
