//! SQLite database module for procurement records
//!
//! Repository functions take a plain `&Connection`, so the same code runs
//! against a bare connection or inside a [`rusqlite::Transaction`] (which
//! derefs to `Connection`). Workflows that touch more than one row go
//! through [`ProcurementDb::transaction`], which always opens the
//! transaction with `BEGIN IMMEDIATE` so the write lock is taken before the
//! first read.
//!
//! ## Tables
//!
//! - `vendors`, `holding_stations`, `animals`, `payments`
//! - `holding_station_incharges`, `holding_station_caretakers` - station staff
//! - `sellers`, `commission_agents`, `users`, `roles`
//!
//! ## Consistency components
//!
//! - [`identifiers`] - external id allocation
//! - [`duplicates`] - unique business key checks
//! - [`capacity`] - station occupancy ledger
//! - [`references`] - guards against deleting referenced parents
//! - [`settlement`] - derived vendor-payment flag on animals

pub mod schema;
pub mod models;
pub mod entities;
pub mod identifiers;
pub mod duplicates;
pub mod capacity;
pub mod references;
pub mod settlement;
pub mod vendors;
pub mod stations;
pub mod animals;
pub mod payments;
pub mod parties;

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::{debug, info};

use crate::error::ProcurementError;

/// SQLite database handle.
///
/// One handle owns one connection. Several handles opened on the same file
/// behave like independent workers; SQLite's write lock plus the busy
/// timeout serializes their transactions.
pub struct ProcurementDb {
    conn: Mutex<Connection>,
}

impl ProcurementDb {
    /// Open or create the database at `db_path`
    pub fn open(db_path: &Path, busy_timeout: Duration) -> Result<Self, ProcurementError> {
        info!("Opening SQLite database at {:?}", db_path);

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)
            .map_err(|e| ProcurementError::Internal(format!("Failed to open SQLite: {}", e)))?;

        conn.busy_timeout(busy_timeout)
            .map_err(|e| ProcurementError::Internal(format!("Failed to set busy timeout: {}", e)))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| ProcurementError::Internal(format!("Failed to set PRAGMA: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
        };

        db.init_schema()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, ProcurementError> {
        debug!("Opening in-memory SQLite database");

        let conn = Connection::open_in_memory()
            .map_err(|e| ProcurementError::Internal(format!("Failed to open in-memory SQLite: {}", e)))?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| ProcurementError::Internal(format!("Failed to set PRAGMA: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
        };

        db.init_schema()?;

        Ok(db)
    }

    fn init_schema(&self) -> Result<(), ProcurementError> {
        self.with_conn(|conn| schema::init_schema(conn))
    }

    /// Run a read against the connection
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, ProcurementError>
    where
        F: FnOnce(&Connection) -> Result<T, ProcurementError>,
    {
        let conn = self.conn.lock()
            .map_err(|e| ProcurementError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Execute a write operation with exclusive access
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T, ProcurementError>
    where
        F: FnOnce(&mut Connection) -> Result<T, ProcurementError>,
    {
        let mut conn = self.conn.lock()
            .map_err(|e| ProcurementError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&mut conn)
    }

    /// Run `f` inside one IMMEDIATE transaction.
    ///
    /// Commits when `f` returns `Ok`; any `Err` drops the transaction,
    /// which rolls every statement back.
    pub fn transaction<F, T>(&self, f: F) -> Result<T, ProcurementError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, ProcurementError>,
    {
        self.with_conn_mut(|conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(|e| ProcurementError::Internal(format!("Transaction failed: {}", e)))?;

            let value = f(&tx)?;

            tx.commit()
                .map_err(|e| ProcurementError::Internal(format!("Commit failed: {}", e)))?;

            Ok(value)
        })
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats, ProcurementError> {
        self.with_conn(|conn| {
            let count = |sql: &str| -> Result<u64, ProcurementError> {
                let n: i64 = conn
                    .query_row(sql, [], |row| row.get(0))
                    .map_err(|e| ProcurementError::Internal(format!("Query failed: {}", e)))?;
                Ok(n as u64)
            };

            Ok(DbStats {
                vendor_count: count("SELECT COUNT(*) FROM vendors WHERE deleted_at IS NULL")?,
                station_count: count("SELECT COUNT(*) FROM holding_stations WHERE deleted_at IS NULL")?,
                animal_count: count("SELECT COUNT(*) FROM animals WHERE deleted_at IS NULL")?,
                payment_count: count("SELECT COUNT(*) FROM payments WHERE deleted_at IS NULL")?,
                total_capacity: count(
                    "SELECT COALESCE(SUM(total_capacity), 0) FROM holding_stations WHERE deleted_at IS NULL",
                )?,
                total_occupancy: count(
                    "SELECT COALESCE(SUM(current_occupancy), 0) FROM holding_stations WHERE deleted_at IS NULL",
                )?,
            })
        })
    }
}

/// Database statistics over active rows
#[derive(Debug, Clone, serde::Serialize)]
pub struct DbStats {
    pub vendor_count: u64,
    pub station_count: u64,
    pub animal_count: u64,
    pub payment_count: u64,
    pub total_capacity: u64,
    pub total_occupancy: u64,
}

// Re-exports
pub use entities::EntityKind;
pub use identifiers::IdentifierAllocator;
pub use duplicates::{Conflict, Exclude, FieldMap};
pub use settlement::AnimalIdList;
pub use vendors::{VendorRow, CreateVendorInput, UpdateVendorInput};
pub use stations::{HoldingStationRow, InchargeRow, CaretakerRow, CreateStationInput, UpdateStationInput, InchargeInput, CaretakerInput};
pub use animals::{AnimalRow, RegisterAnimalInput, UpdateAnimalInput, AnimalQuery};
pub use payments::{PaymentRow, RecordPaymentInput, UpdatePaymentInput};
pub use parties::{PartyKind, PartyRow, PartyInput, UserRow, UserInput, RoleRow, RoleInput};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let db = ProcurementDb::open_in_memory().unwrap();

        let result: Result<(), ProcurementError> = db.transaction(|tx| {
            tx.execute(
                "INSERT INTO roles (external_id, name) VALUES ('ROL001', 'admin')",
                [],
            )?;
            Err(ProcurementError::validation("name", "forced failure"))
        });
        assert!(result.is_err());

        let count: i64 = db
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM roles", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_stats_on_empty_db() {
        let db = ProcurementDb::open_in_memory().unwrap();
        let stats = db.stats().unwrap();
        assert_eq!(stats.animal_count, 0);
        assert_eq!(stats.total_occupancy, 0);
    }
}
