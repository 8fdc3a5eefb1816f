//! Service layer for the procurement ledger
//!
//! Services run each workflow as one unit: validation, the consistency
//! guards, the row writes and the staged-file bookkeeping either all happen
//! or none do. Each service wraps repository calls with:
//! - Input validation
//! - Duplicate, capacity and reference guards
//! - Transaction boundaries
//! - Event emission after commit
//!
//! ## Architecture
//!
//! ```text
//! Controllers (excluded)
//!     ↓
//! ConsistencyEngine / Service Layer
//!     ↓
//! Repository Layer (db/*.rs)
//!     ↓
//! SQLite Database
//! ```

pub mod outcome;
pub mod events;
pub mod vendor_service;
pub mod station_service;
pub mod animal_service;
pub mod payment_service;
pub mod party_service;
pub mod engine;

// Re-exports
pub use outcome::*;
pub use events::{EventBus, EventListener, LoggingEventListener, ProcurementEvent};
pub use vendor_service::VendorService;
pub use station_service::StationService;
pub use animal_service::AnimalService;
pub use payment_service::PaymentService;
pub use party_service::PartyService;
pub use engine::{ConsistencyEngine, InvariantReport};

use std::sync::Arc;

use crate::db::{EntityKind, IdentifierAllocator, ProcurementDb};
use crate::error::ProcurementError;

/// Service container for dependency injection
///
/// Holds all services sharing one database handle, event bus and allocator.
pub struct Services {
    pub vendors: Arc<VendorService>,
    pub stations: Arc<StationService>,
    pub animals: Arc<AnimalService>,
    pub payments: Arc<PaymentService>,
    pub parties: Arc<PartyService>,
    pub events: Arc<EventBus>,
}

impl Services {
    /// Create all services over a shared database
    pub fn new(db: Arc<ProcurementDb>, ids: Arc<IdentifierAllocator>) -> Self {
        Self::with_events(db, ids, Arc::new(EventBus::new()))
    }

    pub fn with_events(db: Arc<ProcurementDb>, ids: Arc<IdentifierAllocator>, events: Arc<EventBus>) -> Self {
        Self {
            vendors: Arc::new(VendorService::new(db.clone(), events.clone(), ids.clone())),
            stations: Arc::new(StationService::new(db.clone(), events.clone(), ids.clone())),
            animals: Arc::new(AnimalService::new(db.clone(), events.clone(), ids.clone())),
            payments: Arc::new(PaymentService::new(db.clone(), events.clone(), ids.clone())),
            parties: Arc::new(PartyService::new(db, events.clone(), ids)),
            events,
        }
    }
}

/// Unwrap a row re-read inside the transaction that just wrote it
pub(crate) fn reloaded<T>(row: Option<T>, kind: EntityKind, id: i64) -> Result<T, ProcurementError> {
    row.ok_or_else(|| ProcurementError::Internal(format!("{} {} vanished after write", kind, id)))
}
