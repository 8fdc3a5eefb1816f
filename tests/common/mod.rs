//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use livestock_ledger::db::{
    AnimalRow, CreateStationInput, CreateVendorInput, HoldingStationRow, InchargeInput,
    RegisterAnimalInput, VendorRow,
};
use livestock_ledger::{Config, ConsistencyEngine, StagedFiles};
use tempfile::TempDir;

static SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next() -> u64 {
    SEQUENCE.fetch_add(1, Ordering::Relaxed)
}

/// A fresh ten-digit mobile number
pub fn phone() -> String {
    format!("98{:08}", next())
}

/// Engine over an on-disk database inside a temporary directory
pub fn open_engine() -> (ConsistencyEngine, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let engine = ConsistencyEngine::open(Config::with_storage_dir(temp_dir.path())).unwrap();
    (engine, temp_dir)
}

/// Another worker on the same database file
pub fn reopen(temp_dir: &TempDir) -> ConsistencyEngine {
    ConsistencyEngine::open(Config::with_storage_dir(temp_dir.path())).unwrap()
}

/// Write a file into the uploads directory, as the upload layer would
pub fn upload(temp_dir: &TempDir, name: &str) -> PathBuf {
    let dir = temp_dir.path().join("uploads");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(format!("{}-{}", next(), name));
    std::fs::write(&path, b"file contents").unwrap();
    path
}

pub fn staged(temp_dir: &TempDir, name: &str) -> (StagedFiles, PathBuf) {
    let path = upload(temp_dir, name);
    (StagedFiles::new([path.clone()]), path)
}

pub fn create_vendor(engine: &ConsistencyEngine) -> VendorRow {
    engine
        .vendors()
        .create(
            CreateVendorInput {
                name: "Lakshmi Traders".into(),
                phone: Some(phone()),
                status: "active".into(),
                ..Default::default()
            },
            StagedFiles::empty(),
        )
        .unwrap()
}

pub fn station_input(name: &str, capacity: i64) -> CreateStationInput {
    CreateStationInput {
        name: name.into(),
        location: Some("Anantapur".into()),
        total_capacity: capacity,
        status: "active".into(),
        incharges: vec![InchargeInput {
            name: "Ravi Kumar".into(),
            phone: phone(),
            ..Default::default()
        }],
        caretakers: vec![],
    }
}

pub fn create_station(engine: &ConsistencyEngine, capacity: i64) -> HoldingStationRow {
    engine
        .create_station(station_input("North Yard", capacity), StagedFiles::empty())
        .unwrap()
}

pub fn animal_input(vendor: &VendorRow, station: &HoldingStationRow) -> RegisterAnimalInput {
    RegisterAnimalInput {
        vendor_id: vendor.external_id.clone(),
        holding_station_id: station.external_id.clone(),
        species: "cattle".into(),
        breed: Some("Ongole".into()),
        ..Default::default()
    }
}

pub fn register_animal(
    engine: &ConsistencyEngine,
    temp_dir: &TempDir,
    vendor: &VendorRow,
    station: &HoldingStationRow,
) -> AnimalRow {
    let (media, _) = staged(temp_dir, "animal.jpg");
    engine.register_animal(animal_input(vendor, station), media).unwrap()
}

/// Current occupancy of a station by external id
pub fn occupancy(engine: &ConsistencyEngine, station: &HoldingStationRow) -> i64 {
    engine
        .station_occupancy(&station.external_id)
        .unwrap()
        .current_occupancy
}
