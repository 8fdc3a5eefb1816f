//! Consistency engine
//!
//! Entry point for embedding the ledger. Owns the database handle, the
//! identifier allocator and the event bus, and hands out the per-entity
//! services. The named workflows below are the cross-entity ones; every
//! other operation is reached through the service accessors.
//!
//! Several engines opened on the same database file behave as independent
//! workers: each holds one connection, and SQLite's write lock plus the
//! configured busy timeout serializes their transactions.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::Config;
use crate::db::capacity::{self, Occupancy, OccupancyDrift};
use crate::db::settlement::{self, SettlementDrift};
use crate::db::{AnimalRow, DbStats, HoldingStationRow, IdentifierAllocator, PaymentRow, ProcurementDb, VendorRow};
use crate::db::{CreateStationInput, RecordPaymentInput, RegisterAnimalInput, UpdateStationInput};
use crate::error::ProcurementError;
use crate::files::StagedFiles;

use super::events::{spawn_logging_listener, EventBus, ProcurementEvent};
use super::{AnimalService, PartyService, PaymentService, Services, StationService, VendorService};

/// Result of recounting the derived values against their sources
#[derive(Debug, Clone, Default, Serialize)]
pub struct InvariantReport {
    pub occupancy: Vec<OccupancyDrift>,
    pub settlement: Vec<SettlementDrift>,
}

impl InvariantReport {
    pub fn is_clean(&self) -> bool {
        self.occupancy.is_empty() && self.settlement.is_empty()
    }
}

/// Procurement ledger with all consistency guards wired in
pub struct ConsistencyEngine {
    config: Config,
    db: Arc<ProcurementDb>,
    ids: Arc<IdentifierAllocator>,
    services: Services,
}

impl ConsistencyEngine {
    /// Open (or create) the database under `config.storage_dir`
    pub fn open(config: Config) -> Result<Self, ProcurementError> {
        config.validate()?;
        let db = ProcurementDb::open(
            &config.database_path(),
            Duration::from_millis(config.busy_timeout_ms),
        )?;
        info!(path = ?config.database_path(), "Consistency engine ready");
        Ok(Self::assemble(config, db))
    }

    /// Engine over a private in-memory database (for testing)
    pub fn open_in_memory(config: Config) -> Result<Self, ProcurementError> {
        config.validate()?;
        let db = ProcurementDb::open_in_memory()?;
        Ok(Self::assemble(config, db))
    }

    fn assemble(config: Config, db: ProcurementDb) -> Self {
        let db = Arc::new(db);
        let ids = Arc::new(IdentifierAllocator::from_config(&config));
        let services = Services::new(db.clone(), ids.clone());
        Self {
            config,
            db,
            ids,
            services,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn db(&self) -> &Arc<ProcurementDb> {
        &self.db
    }

    pub fn allocator(&self) -> &Arc<IdentifierAllocator> {
        &self.ids
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.services.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProcurementEvent> {
        self.services.events.subscribe()
    }

    /// Log every event at debug level from a background task.
    /// Must be called from within a tokio runtime.
    pub fn spawn_event_logger(&self) -> JoinHandle<()> {
        spawn_logging_listener(Arc::clone(&self.services.events))
    }

    pub fn vendors(&self) -> &VendorService {
        &self.services.vendors
    }

    pub fn stations(&self) -> &StationService {
        &self.services.stations
    }

    pub fn animals(&self) -> &AnimalService {
        &self.services.animals
    }

    pub fn payments(&self) -> &PaymentService {
        &self.services.payments
    }

    pub fn parties(&self) -> &PartyService {
        &self.services.parties
    }

    pub fn stats(&self) -> Result<DbStats, ProcurementError> {
        self.db.stats()
    }

    // =========================================================================
    // Workflows
    // =========================================================================

    pub fn register_animal(
        &self,
        input: RegisterAnimalInput,
        media: StagedFiles,
    ) -> Result<AnimalRow, ProcurementError> {
        self.services.animals.register(input, media)
    }

    pub fn reassign_animal(&self, animal: &str, station: &str) -> Result<AnimalRow, ProcurementError> {
        self.services.animals.reassign(animal, station)
    }

    pub fn create_station(
        &self,
        input: CreateStationInput,
        documents: StagedFiles,
    ) -> Result<HoldingStationRow, ProcurementError> {
        self.services.stations.create(input, documents)
    }

    pub fn update_station(
        &self,
        station: &str,
        input: UpdateStationInput,
        documents: StagedFiles,
    ) -> Result<HoldingStationRow, ProcurementError> {
        self.services.stations.update(station, input, documents)
    }

    pub fn resize_station(&self, station: &str, new_capacity: i64) -> Result<HoldingStationRow, ProcurementError> {
        self.services.stations.resize(station, new_capacity)
    }

    pub fn station_occupancy(&self, station: &str) -> Result<Occupancy, ProcurementError> {
        self.services.stations.occupancy(station)
    }

    pub fn record_payment(
        &self,
        input: RecordPaymentInput,
        receipts: StagedFiles,
    ) -> Result<PaymentRow, ProcurementError> {
        self.services.payments.record(input, receipts)
    }

    pub fn cancel_payment(&self, payment: &str) -> Result<PaymentRow, ProcurementError> {
        self.services.payments.cancel(payment)
    }

    /// Permanently remove a vendor and its documents. Refused with
    /// `ReferencedByChildren` while any active animal names the vendor.
    pub fn retire_vendor(&self, vendor: &str) -> Result<(), ProcurementError> {
        self.services.vendors.hard_delete(vendor)
    }

    /// Permanently remove a holding station, its staff and its documents.
    /// Refused with `ReferencedByChildren` while any active animal is held there.
    pub fn retire_station(&self, station: &str) -> Result<(), ProcurementError> {
        self.services.stations.hard_delete(station)
    }

    /// Soft-delete a vendor; its animals and payments are untouched
    pub fn deactivate_vendor(&self, vendor: &str) -> Result<VendorRow, ProcurementError> {
        self.services.vendors.soft_delete(vendor)
    }

    /// Soft-delete a holding station; its animals keep their slots
    pub fn deactivate_station(&self, station: &str) -> Result<HoldingStationRow, ProcurementError> {
        self.services.stations.soft_delete(station)
    }

    /// Recount occupancy and settlement flags and report any drift
    pub fn verify_invariants(&self) -> Result<InvariantReport, ProcurementError> {
        let report = self.db.with_conn(|conn| {
            Ok(InvariantReport {
                occupancy: capacity::audit_occupancy(conn)?,
                settlement: settlement::audit_settlement(conn)?,
            })
        })?;

        if !report.is_clean() {
            warn!(
                occupancy_drift = report.occupancy.len(),
                settlement_drift = report.settlement.len(),
                "Derived values disagree with their sources"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{CreateVendorInput, InchargeInput};

    fn engine() -> ConsistencyEngine {
        ConsistencyEngine::open_in_memory(Config::default()).unwrap()
    }

    fn station_input(capacity: i64) -> CreateStationInput {
        CreateStationInput {
            name: "North Yard".into(),
            location: Some("Sector 4".into()),
            total_capacity: capacity,
            status: "active".into(),
            incharges: vec![InchargeInput {
                name: "Ravi Kumar".into(),
                phone: "9876500001".into(),
                ..Default::default()
            }],
            caretakers: vec![],
        }
    }

    #[test]
    fn test_fresh_engine_is_clean() {
        let engine = engine();
        let report = engine.verify_invariants().unwrap();
        assert!(report.is_clean());
        assert_eq!(engine.stats().unwrap().animal_count, 0);
    }

    #[test]
    fn test_rejects_invalid_config() {
        let mut config = Config::default();
        config.max_allocation_retries = 0;
        assert!(matches!(
            ConsistencyEngine::open_in_memory(config),
            Err(ProcurementError::Config(_))
        ));
    }

    #[test]
    fn test_register_and_resize_through_engine() {
        let engine = engine();
        let vendor = engine
            .vendors()
            .create(
                CreateVendorInput {
                    name: "Lakshmi Traders".into(),
                    phone: Some("9876543210".into()),
                    ..Default::default()
                },
                StagedFiles::empty(),
            )
            .unwrap();
        let station = engine.create_station(station_input(1), StagedFiles::empty()).unwrap();

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("front.jpg");
        std::fs::write(&path, b"jpeg").unwrap();
        let animal = engine
            .register_animal(
                RegisterAnimalInput {
                    vendor_id: vendor.external_id.clone(),
                    holding_station_id: station.external_id.clone(),
                    species: "cattle".into(),
                    ..Default::default()
                },
                StagedFiles::new([path.clone()]),
            )
            .unwrap();
        assert!(animal.external_id.starts_with("ANI"));

        let err = engine.resize_station(&station.external_id, 0).unwrap_err();
        assert!(matches!(err, ProcurementError::CapacityBelowOccupancy { occupancy: 1, requested: 0, .. }));

        let occupancy = engine.station_occupancy(&station.external_id).unwrap();
        assert_eq!(occupancy.current_occupancy, 1);
        assert!(engine.verify_invariants().unwrap().is_clean());
        assert!(path.exists());
    }
}
