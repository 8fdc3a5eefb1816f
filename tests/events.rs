//! Integration tests for post-commit events

mod common;

use std::time::Duration;

use common::*;
use livestock_ledger::ProcurementEvent;
use tokio::sync::broadcast::error::TryRecvError;

#[tokio::test]
async fn test_events_follow_committed_workflows_only() {
    let (engine, temp) = open_engine();
    let mut rx = engine.subscribe();

    let vendor = create_vendor(&engine);
    let station = create_station(&engine, 1);
    let animal = register_animal(&engine, &temp, &vendor, &station);

    let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(event, ProcurementEvent::Created { ref id, .. } if *id == vendor.external_id));

    let event = rx.recv().await.unwrap();
    assert!(matches!(event, ProcurementEvent::Created { ref id, .. } if *id == station.external_id));

    match rx.recv().await.unwrap() {
        ProcurementEvent::AnimalRegistered { id, station: at, occupancy, capacity } => {
            assert_eq!(id, animal.external_id);
            assert_eq!(at, station.external_id);
            assert_eq!((occupancy, capacity), (1, 1));
        }
        other => panic!("unexpected event: {other:?}"),
    }

    // A refused registration rolls back and emits nothing
    let (media, _) = staged(&temp, "late.jpg");
    assert!(engine.register_animal(animal_input(&vendor, &station), media).is_err());
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));

    engine.resize_station(&station.external_id, 3).unwrap();
    match rx.recv().await.unwrap() {
        ProcurementEvent::StationResized { capacity, occupancy, .. } => {
            assert_eq!((capacity, occupancy), (3, 1));
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn test_event_logger_runs_alongside_subscribers() {
    livestock_ledger::init_tracing();
    let (engine, _temp) = open_engine();
    let logger = engine.spawn_event_logger();
    let mut rx = engine.subscribe();
    assert_eq!(engine.events().subscriber_count(), 2);

    let vendor = create_vendor(&engine);
    engine.vendors().soft_delete(&vendor.external_id).unwrap();

    assert!(matches!(rx.recv().await.unwrap(), ProcurementEvent::Created { .. }));
    assert!(matches!(rx.recv().await.unwrap(), ProcurementEvent::SoftDeleted { .. }));

    logger.abort();
    assert!(logger.await.unwrap_err().is_cancelled());
}
