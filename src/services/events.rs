//! Event system for procurement workflows
//!
//! Services emit an event only after their transaction has committed, so a
//! listener never sees a change that was rolled back. Useful for:
//! - Audit logging
//! - Cache invalidation in the excluded HTTP layer
//! - Operator notifications (stations filling up)

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, trace};

use crate::db::EntityKind;

/// Events emitted by services after commit
#[derive(Debug, Clone)]
pub enum ProcurementEvent {
    // Generic lifecycle events
    Created {
        kind: EntityKind,
        id: String,
    },
    Updated {
        kind: EntityKind,
        id: String,
    },
    SoftDeleted {
        kind: EntityKind,
        id: String,
    },
    Restored {
        kind: EntityKind,
        id: String,
    },
    HardDeleted {
        kind: EntityKind,
        id: String,
        files_removed: usize,
    },

    // Capacity events
    AnimalRegistered {
        id: String,
        station: String,
        occupancy: i64,
        capacity: i64,
    },
    AnimalReassigned {
        id: String,
        from_station: String,
        to_station: String,
    },
    StationResized {
        id: String,
        capacity: i64,
        occupancy: i64,
    },

    // Settlement events
    PaymentRecorded {
        id: String,
        payment_for: String,
        settled: usize,
    },
    PaymentCancelled {
        id: String,
        unsettled: usize,
    },
}

/// Trait for event listeners
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &ProcurementEvent);
}

/// Event bus for broadcasting procurement events
pub struct EventBus {
    sender: broadcast::Sender<ProcurementEvent>,
}

impl EventBus {
    /// Create a new event bus with default capacity
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: ProcurementEvent) {
        trace!(event = ?event, "Emitting procurement event");
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProcurementEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Logging event listener for audit trails
pub struct LoggingEventListener;

impl EventListener for LoggingEventListener {
    fn on_event(&self, event: &ProcurementEvent) {
        match event {
            ProcurementEvent::AnimalRegistered { id, station, occupancy, capacity } => {
                debug!(id = %id, station = %station, occupancy, capacity, "Animal registered");
                if occupancy >= capacity {
                    info!(station = %station, capacity, "Holding station is now full");
                }
            }
            ProcurementEvent::AnimalReassigned { id, from_station, to_station } => {
                debug!(id = %id, from = %from_station, to = %to_station, "Animal reassigned");
            }
            ProcurementEvent::PaymentRecorded { id, payment_for, settled } => {
                debug!(id = %id, payment_for = %payment_for, settled, "Payment recorded");
            }
            ProcurementEvent::PaymentCancelled { id, unsettled } => {
                debug!(id = %id, unsettled, "Payment cancelled");
            }
            ProcurementEvent::HardDeleted { kind, id, files_removed } => {
                info!(kind = %kind, id = %id, files_removed, "Record permanently deleted");
            }
            _ => {
                trace!(event = ?event, "Procurement event");
            }
        }
    }
}

/// Spawn a background task that logs all events
pub fn spawn_logging_listener(event_bus: Arc<EventBus>) -> tokio::task::JoinHandle<()> {
    let mut receiver = event_bus.subscribe();
    let listener = LoggingEventListener;

    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => listener.on_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "Event listener lagged, skipped events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed, stopping listener");
                    break;
                }
            }
        }
    })
}
