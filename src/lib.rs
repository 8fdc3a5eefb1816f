//! Livestock Ledger - consistency engine for livestock procurement
//!
//! Vendors supply animals, animals wait at capacity-limited holding
//! stations, and payments are reconciled against vendors and specific
//! animals. This crate keeps those records consistent under concurrent
//! writers; routing, authentication and file upload stay with the host.
//!
//! ## Architecture
//!
//! - **IdentifierAllocator**: random, collision-checked external ids (`VEN00042`)
//! - **DuplicateGuard**: unique business keys across active rows
//! - **CapacityLedger**: atomic occupancy counter per holding station
//! - **ReferentialGuard**: no hard delete of a parent with active animals
//! - **SettlementSync**: per-animal vendor payment flag derived from payments
//! - **ConsistencyEngine**: the workflows tying them together
//!
//! ## Storage Layout
//!
//! ```text
//! <local data dir>/livestock-ledger/
//! ├── procurement.db         # SQLite database (WAL mode)
//! ├── uploads/               # Media, documents and receipts saved by the host
//! └── config.toml            # Configuration
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use livestock_ledger::{Config, ConsistencyEngine};
//!
//! let engine = ConsistencyEngine::open(Config::default())?;
//! let report = engine.verify_invariants()?;
//! assert!(report.is_clean());
//! # Ok::<(), livestock_ledger::ProcurementError>(())
//! ```

pub mod config;
pub mod error;
pub mod validation;
pub mod files;
pub mod db;
pub mod services;

// Re-exports
pub use config::{Config, IdRange};
pub use error::ProcurementError;
pub use files::{remove_files, StagedFiles};
pub use db::{EntityKind, IdentifierAllocator, ProcurementDb};
pub use services::{ConsistencyEngine, EventBus, InvariantReport, ProcurementEvent, Services};

use tracing_subscriber::EnvFilter;

/// Install a `tracing` subscriber honouring `RUST_LOG` (default `info`).
///
/// Safe to call more than once; later calls leave the first subscriber in place.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
