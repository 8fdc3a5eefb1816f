//! Integration tests for the referential, duplicate and identifier guards

mod common;

use std::collections::HashSet;
use std::thread;

use common::*;
use livestock_ledger::db::{
    CaretakerInput, CreateVendorInput, InchargeInput, PartyInput, PartyKind, RoleInput, UpdateStationInput,
    UpdateVendorInput, UserInput,
};
use livestock_ledger::services::outcome;
use livestock_ledger::{Config, ConsistencyEngine, EntityKind, IdRange, ProcurementError, StagedFiles};
use tempfile::TempDir;

// ============================================================================
// Referential guard
// ============================================================================

#[test]
fn test_retire_vendor_blocked_by_active_animals() {
    let (engine, temp) = open_engine();
    let vendor = create_vendor(&engine);
    let station = create_station(&engine, 5);
    let a1 = register_animal(&engine, &temp, &vendor, &station);
    let a2 = register_animal(&engine, &temp, &vendor, &station);

    let err = engine.retire_vendor(&vendor.external_id).unwrap_err();
    match &err {
        ProcurementError::ReferencedByChildren { parent, children } => {
            assert_eq!(parent, &vendor.external_id);
            assert_eq!(children, &vec![a1.external_id.clone(), a2.external_id.clone()]);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(outcome::status_for(&err), 409);

    engine.animals().soft_delete(&a1.external_id).unwrap();
    engine.animals().soft_delete(&a2.external_id).unwrap();
    engine.retire_vendor(&vendor.external_id).unwrap();

    assert!(engine.vendors().get(&vendor.external_id).unwrap().is_none());
    assert!(matches!(
        engine.vendors().hard_delete(&vendor.external_id),
        Err(ProcurementError::NotFound { .. })
    ));
}

#[test]
fn test_retire_station_blocked_then_removes_staff_and_documents() {
    let (engine, temp) = open_engine();
    let vendor = create_vendor(&engine);
    let (documents, document) = staged(&temp, "licence.pdf");
    let station = engine
        .create_station(station_input("South Yard", 2), documents)
        .unwrap();
    assert!(document.exists());
    let animal = register_animal(&engine, &temp, &vendor, &station);

    let err = engine.retire_station(&station.external_id).unwrap_err();
    assert!(matches!(err, ProcurementError::ReferencedByChildren { ref children, .. } if children.len() == 1));
    assert!(document.exists());

    // Deactivating a station never blocks and keeps its animals' slots
    let deactivated = engine.deactivate_station(&station.external_id).unwrap();
    assert!(deactivated.deleted_at.is_some());
    assert_eq!(deactivated.current_occupancy, 1);

    engine.animals().soft_delete(&animal.external_id).unwrap();
    engine.retire_station(&station.external_id).unwrap();
    assert!(!document.exists());

    // The staff phone is free again
    let reused = station.incharges[0].phone.clone();
    let mut input = station_input("West Yard", 1);
    input.incharges[0].phone = reused;
    engine.create_station(input, StagedFiles::empty()).unwrap();
}

#[test]
fn test_deactivated_vendor_cannot_supply_animals() {
    let (engine, temp) = open_engine();
    let vendor = create_vendor(&engine);
    let station = create_station(&engine, 5);

    engine.deactivate_vendor(&vendor.external_id).unwrap();
    let (media, media_path) = staged(&temp, "a.jpg");
    let err = engine.register_animal(animal_input(&vendor, &station), media).unwrap_err();
    assert!(matches!(err, ProcurementError::NotFound { entity: "Vendor", .. }));
    assert!(!media_path.exists());
    assert_eq!(occupancy(&engine, &station), 0);

    let restored = engine.vendors().restore(&vendor.external_id).unwrap();
    assert!(restored.deleted_at.is_none());
    register_animal(&engine, &temp, &vendor, &station);
}

// ============================================================================
// Duplicate guard
// ============================================================================

#[test]
fn test_vendor_duplicates_and_soft_delete_frees_keys() {
    let (engine, _temp) = open_engine();
    let vendor = engine
        .vendors()
        .create(
            CreateVendorInput {
                name: "Sri Balaji Cattle".into(),
                phone: Some("9123456780".into()),
                email: Some("Balaji@Example.com".into()),
                pan_number: Some("abcde1234f".into()),
                ..Default::default()
            },
            StagedFiles::empty(),
        )
        .unwrap();
    assert_eq!(vendor.email.as_deref(), Some("balaji@example.com"));
    assert_eq!(vendor.pan_number.as_deref(), Some("ABCDE1234F"));

    let clash = CreateVendorInput {
        name: "Other Trader".into(),
        email: Some("balaji@example.com".into()),
        ..Default::default()
    };
    let err = engine.vendors().create(clash.clone(), StagedFiles::empty()).unwrap_err();
    assert!(matches!(err, ProcurementError::DuplicateField { ref field, .. } if field == "email"));

    // Updating a vendor with its own values is not a conflict
    engine
        .vendors()
        .update(
            &vendor.external_id,
            UpdateVendorInput {
                phone: Some("9123456780".into()),
                ..Default::default()
            },
            StagedFiles::empty(),
        )
        .unwrap();

    engine.deactivate_vendor(&vendor.external_id).unwrap();
    let newcomer = engine.vendors().create(clash, StagedFiles::empty()).unwrap();

    // The retired vendor's email is now taken
    let err = engine.vendors().restore(&vendor.external_id).unwrap_err();
    assert!(matches!(err, ProcurementError::DuplicateField { ref field, .. } if field == "email"));
    assert!(engine.vendors().get(&newcomer.external_id).unwrap().is_some());
}

#[test]
fn test_station_create_rolls_back_on_staff_conflict() {
    let (engine, temp) = open_engine();
    let existing = create_station(&engine, 3);
    let taken = existing.incharges[0].phone.clone();

    let mut input = station_input("East Yard", 3);
    input.caretakers = vec![CaretakerInput {
        name: "Suresh".into(),
        phone: phone(),
        ..Default::default()
    }];
    input.incharges.push(InchargeInput {
        name: "Anil Reddy".into(),
        phone: taken,
        ..Default::default()
    });

    let (documents, document) = staged(&temp, "lease.pdf");
    let err = engine.create_station(input, documents).unwrap_err();
    assert!(matches!(err, ProcurementError::DuplicateField { ref field, .. } if field == "incharges[1].phone"));
    assert!(!document.exists());
    assert_eq!(engine.stations().list(false).unwrap().len(), 1);

    let mut repeated = station_input("East Yard", 3);
    let shared = phone();
    repeated.caretakers = (0..2)
        .map(|_| CaretakerInput {
            name: "Suresh".into(),
            phone: shared.clone(),
            ..Default::default()
        })
        .collect();
    let err = engine.create_station(repeated, StagedFiles::empty()).unwrap_err();
    assert!(matches!(err, ProcurementError::DuplicateField { ref field, .. } if field == "caretakers.phone"));
    assert_eq!(engine.stations().list(false).unwrap().len(), 1);
}

#[test]
fn test_deactivated_station_releases_staff_values() {
    let (engine, _temp) = open_engine();
    let mut input = station_input("East Yard", 3);
    input.caretakers = vec![CaretakerInput {
        name: "Suresh".into(),
        phone: phone(),
        national_id: Some("234567890123".into()),
    }];
    let original = engine.create_station(input, StagedFiles::empty()).unwrap();
    let incharge_phone = original.incharges[0].phone.clone();
    let caretaker_phone = original.caretakers[0].phone.clone();

    engine.deactivate_station(&original.external_id).unwrap();

    // The same people can staff a new station
    let mut input = station_input("New East Yard", 3);
    input.incharges[0].phone = incharge_phone.clone();
    input.caretakers = vec![CaretakerInput {
        name: "Suresh".into(),
        phone: caretaker_phone,
        national_id: Some("234567890123".into()),
    }];
    let successor = engine.create_station(input, StagedFiles::empty()).unwrap();
    assert_eq!(successor.incharges[0].phone, incharge_phone);

    // and the old station cannot come back while they do
    let err = engine.stations().restore(&original.external_id).unwrap_err();
    assert!(matches!(err, ProcurementError::DuplicateField { ref field, .. } if field == "incharges[0].phone"));
    assert!(engine.stations().get(&original.external_id).unwrap().is_none());

    engine.deactivate_station(&successor.external_id).unwrap();
    let restored = engine.stations().restore(&original.external_id).unwrap();
    assert!(restored.deleted_at.is_none());
    assert_eq!(restored.incharges[0].phone, incharge_phone);
}

#[test]
fn test_station_update_replaces_staff_atomically() {
    let (engine, _temp) = open_engine();
    let station = create_station(&engine, 3);
    let original = station.incharges.clone();

    let err = engine
        .update_station(
            &station.external_id,
            UpdateStationInput {
                incharges: vec![InchargeInput {
                    name: "Mahesh Babu".into(),
                    phone: phone(),
                    ..Default::default()
                }],
                caretakers: vec![CaretakerInput {
                    name: "Venkat".into(),
                    phone: "12345".into(),
                    ..Default::default()
                }],
                ..Default::default()
            },
            StagedFiles::empty(),
        )
        .unwrap_err();
    assert!(matches!(err, ProcurementError::ValidationFailed { ref field, .. } if field == "caretakers[0].phone"));

    let stored = engine.stations().get(&station.external_id).unwrap().unwrap();
    assert_eq!(stored.incharges.len(), 1);
    assert_eq!(stored.incharges[0].phone, original[0].phone);

    // Keeping an incharge's own phone across an update is not a conflict
    let updated = engine
        .update_station(
            &station.external_id,
            UpdateStationInput {
                incharges: vec![
                    InchargeInput {
                        name: original[0].name.clone(),
                        phone: original[0].phone.clone(),
                        ..Default::default()
                    },
                    InchargeInput {
                        name: "Mahesh Babu".into(),
                        phone: phone(),
                        email: Some("mahesh@example.com".into()),
                        ..Default::default()
                    },
                ],
                ..Default::default()
            },
            StagedFiles::empty(),
        )
        .unwrap();
    assert_eq!(updated.incharges.len(), 2);
    assert!(updated.caretakers.is_empty());

    let err = engine
        .update_station(&station.external_id, UpdateStationInput::default(), StagedFiles::empty())
        .unwrap_err();
    assert!(matches!(err, ProcurementError::ValidationFailed { ref field, .. } if field == "incharges"));
}

// ============================================================================
// Files
// ============================================================================

#[test]
fn test_replaced_documents_removed_after_commit() {
    let (engine, temp) = open_engine();
    let (documents, first) = staged(&temp, "gst.pdf");
    let vendor = engine
        .vendors()
        .create(
            CreateVendorInput {
                name: "Kaveri Livestock".into(),
                ..Default::default()
            },
            documents,
        )
        .unwrap();
    assert_eq!(vendor.document_paths.len(), 1);

    let (appended, second) = staged(&temp, "pan.pdf");
    let vendor = engine
        .vendors()
        .update(&vendor.external_id, UpdateVendorInput::default(), appended)
        .unwrap();
    assert_eq!(vendor.document_paths.len(), 2);
    assert!(first.exists() && second.exists());

    let (replacement, third) = staged(&temp, "bank.pdf");
    let vendor = engine
        .vendors()
        .update(
            &vendor.external_id,
            UpdateVendorInput {
                replace_documents: true,
                ..Default::default()
            },
            replacement,
        )
        .unwrap();
    assert_eq!(vendor.document_paths, vec![third.to_string_lossy().into_owned()]);
    assert!(!first.exists());
    assert!(!second.exists());
    assert!(third.exists());

    // A failed update keeps the stored files and drops the staged one
    let (rejected, fourth) = staged(&temp, "bad.pdf");
    let err = engine
        .vendors()
        .update(
            &vendor.external_id,
            UpdateVendorInput {
                phone: Some("not a phone".into()),
                replace_documents: true,
                ..Default::default()
            },
            rejected,
        )
        .unwrap_err();
    assert!(matches!(err, ProcurementError::ValidationFailed { .. }));
    assert!(third.exists());
    assert!(!fourth.exists());
}

#[test]
fn test_animal_requires_media() {
    let (engine, _temp) = open_engine();
    let vendor = create_vendor(&engine);
    let station = create_station(&engine, 1);

    let err = engine
        .register_animal(animal_input(&vendor, &station), StagedFiles::empty())
        .unwrap_err();
    assert!(matches!(err, ProcurementError::ValidationFailed { ref field, .. } if field == "media"));
    assert_eq!(occupancy(&engine, &station), 0);
}

// ============================================================================
// Identifiers
// ============================================================================

#[test]
fn test_concurrent_allocation_yields_distinct_ids() {
    const WORKERS: usize = 6;
    const PER_WORKER: usize = 15;

    let (_engine, temp) = open_engine();

    let ids: Vec<String> = thread::scope(|scope| {
        let handles: Vec<_> = (0..WORKERS)
            .map(|_| {
                let worker = reopen(&temp);
                scope.spawn(move || {
                    (0..PER_WORKER)
                        .map(|_| {
                            worker
                                .parties()
                                .register_party(
                                    PartyKind::Seller,
                                    PartyInput {
                                        name: "Gopal Rao".into(),
                                        ..Default::default()
                                    },
                                )
                                .unwrap()
                                .external_id
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
    });

    let distinct: HashSet<_> = ids.iter().collect();
    assert_eq!(ids.len(), WORKERS * PER_WORKER);
    assert_eq!(distinct.len(), ids.len());
    assert!(ids.iter().all(|id| id.starts_with("SEL") && id.len() == 8));
}

#[test]
fn test_exhausted_identifier_space() {
    let temp = TempDir::new().unwrap();
    let mut config = Config::with_storage_dir(temp.path());
    config.id_ranges.insert("ROL".into(), IdRange::new(1, 1));
    config.max_allocation_retries = 5;
    let engine = ConsistencyEngine::open(config).unwrap();

    let admin = engine
        .parties()
        .register_role(RoleInput {
            name: "Admin".into(),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(admin.external_id, "ROL1");
    assert_eq!(admin.name, "admin");

    let err = engine
        .parties()
        .register_role(RoleInput {
            name: "buyer".into(),
            ..Default::default()
        })
        .unwrap_err();
    assert!(matches!(err, ProcurementError::ExhaustedIdentifierSpace(ref p) if p == "ROL"));
    assert_eq!(outcome::status_for(&err), 503);

    // Retired rows keep their ids
    engine.parties().soft_delete(EntityKind::Role, &admin.external_id).unwrap();
    let err = engine
        .parties()
        .register_role(RoleInput {
            name: "buyer".into(),
            ..Default::default()
        })
        .unwrap_err();
    assert!(matches!(err, ProcurementError::ExhaustedIdentifierSpace(_)));
}

// ============================================================================
// Parties
// ============================================================================

#[test]
fn test_users_roles_and_party_lifecycle() {
    let (engine, _temp) = open_engine();
    let parties = engine.parties();

    let role = parties
        .register_role(RoleInput {
            name: "Procurement Officer".into(),
            description: Some("Buys animals".into()),
        })
        .unwrap();
    let err = parties
        .register_role(RoleInput {
            name: "procurement officer".into(),
            ..Default::default()
        })
        .unwrap_err();
    assert!(matches!(err, ProcurementError::DuplicateField { ref field, .. } if field == "name"));

    let user = parties
        .register_user(UserInput {
            name: "Priya Sharma".into(),
            email: Some("priya@example.com".into()),
            role_id: Some(role.external_id.clone()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(user.role_external_id.as_deref(), Some(role.external_id.as_str()));

    let err = parties
        .register_user(UserInput {
            name: "Nobody".into(),
            ..Default::default()
        })
        .unwrap_err();
    assert!(matches!(err, ProcurementError::ValidationFailed { .. }));

    let err = parties
        .update_user(
            &user.external_id,
            UserInput {
                name: "Priya Sharma".into(),
                email: Some("priya@example.com".into()),
                role_id: Some("ROL000".into()),
                ..Default::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err, ProcurementError::NotFound { entity: "Role", .. }));

    let agent = parties
        .register_party(
            PartyKind::CommissionAgent,
            PartyInput {
                name: "Ramesh".into(),
                phone: Some("9988776655".into()),
                ..Default::default()
            },
        )
        .unwrap();
    assert!(agent.external_id.starts_with("CA"));

    // Same phone is fine in a different table
    parties
        .register_party(
            PartyKind::Seller,
            PartyInput {
                name: "Ramesh".into(),
                phone: Some("9988776655".into()),
                ..Default::default()
            },
        )
        .unwrap();

    parties.soft_delete(EntityKind::CommissionAgent, &agent.external_id).unwrap();
    assert!(parties.get_party(PartyKind::CommissionAgent, &agent.external_id).unwrap().is_none());
    parties.restore(EntityKind::CommissionAgent, &agent.external_id).unwrap();
    assert_eq!(parties.list_parties(PartyKind::CommissionAgent).unwrap().len(), 1);

    let err = parties.soft_delete(EntityKind::Vendor, "VEN00001").unwrap_err();
    assert!(matches!(err, ProcurementError::ValidationFailed { .. }));
}
