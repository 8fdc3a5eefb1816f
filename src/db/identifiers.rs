//! External identifier allocation
//!
//! External ids are a prefix plus a zero-padded random number, e.g.
//! `VEN00042`. Candidates are checked against every row of the target
//! table, soft-deleted ones included, so a retired record can always be
//! restored under its old id. The check is advisory: the insert itself
//! runs in the caller's transaction, and losing the race on the
//! `external_id` unique index sends the allocator back for another number.

use std::collections::HashMap;
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rusqlite::{params, Connection};
use tracing::{debug, warn};

use super::duplicates::{map_write_error, unique_violation};
use super::entities::EntityKind;
use crate::config::{Config, IdRange};
use crate::error::ProcurementError;

/// Format a numeric id with its prefix, padded to the range width
pub fn format_external_id(prefix: &str, range: IdRange, number: u64) -> String {
    format!("{}{:0width$}", prefix, number, width = range.width())
}

/// Whether any row of `kind`, retired or not, already uses `external_id`
pub fn external_id_exists(
    conn: &Connection,
    kind: EntityKind,
    external_id: &str,
) -> Result<bool, ProcurementError> {
    let sql = format!("SELECT EXISTS(SELECT 1 FROM {} WHERE external_id = ?)", kind.table());
    conn.query_row(&sql, params![external_id], |row| row.get(0))
        .map_err(|e| ProcurementError::Internal(format!("Id lookup failed: {}", e)))
}

/// Random external id allocator with a bounded retry budget
pub struct IdentifierAllocator {
    ranges: HashMap<String, IdRange>,
    max_retries: u32,
    rng: Mutex<StdRng>,
}

impl IdentifierAllocator {
    pub fn new(ranges: HashMap<String, IdRange>, max_retries: u32) -> Self {
        Self {
            ranges,
            max_retries: max_retries.max(1),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.id_ranges.clone(), config.max_allocation_retries)
    }

    /// Deterministic allocator (for testing)
    pub fn with_seed(ranges: HashMap<String, IdRange>, max_retries: u32, seed: u64) -> Self {
        Self {
            ranges,
            max_retries: max_retries.max(1),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    fn prefix_and_range(&self, kind: EntityKind) -> Result<(&'static str, IdRange), ProcurementError> {
        let prefix = kind.id_prefix().ok_or_else(|| {
            ProcurementError::Internal(format!("{} rows have no external id", kind))
        })?;
        let range = self.ranges.get(prefix).copied().ok_or_else(|| {
            ProcurementError::Config(format!("No id range configured for prefix {}", prefix))
        })?;
        Ok((prefix, range))
    }

    fn draw(&self, range: IdRange) -> Result<u64, ProcurementError> {
        let mut rng = self.rng.lock()
            .map_err(|e| ProcurementError::Internal(format!("Lock poisoned: {}", e)))?;
        Ok(rng.gen_range(range.min..=range.max))
    }

    /// Draw candidates until one is unused, spending from `attempts`
    fn next_free(
        &self,
        conn: &Connection,
        kind: EntityKind,
        attempts: &mut u32,
    ) -> Result<String, ProcurementError> {
        let (prefix, range) = self.prefix_and_range(kind)?;

        while *attempts < self.max_retries {
            *attempts += 1;
            let candidate = format_external_id(prefix, range, self.draw(range)?);
            if !external_id_exists(conn, kind, &candidate)? {
                return Ok(candidate);
            }
            debug!(candidate = %candidate, attempt = *attempts, "External id taken, drawing again");
        }

        warn!(
            prefix = prefix,
            range_size = range.size(),
            attempts = *attempts,
            "Identifier space exhausted"
        );
        Err(ProcurementError::ExhaustedIdentifierSpace(prefix.to_string()))
    }

    /// Allocate an unused external id for `kind`
    pub fn allocate(&self, conn: &Connection, kind: EntityKind) -> Result<String, ProcurementError> {
        let mut attempts = 0;
        self.next_free(conn, kind, &mut attempts)
    }

    /// Allocate an id and run `insert` with it, re-allocating when the insert
    /// loses a race on the `external_id` unique index.
    ///
    /// Every other write error is mapped through [`map_write_error`], so a
    /// clash on a business key still surfaces as `DuplicateField`.
    pub fn insert_with_external_id<T, F>(
        &self,
        conn: &Connection,
        kind: EntityKind,
        mut insert: F,
    ) -> Result<T, ProcurementError>
    where
        F: FnMut(&str) -> Result<T, rusqlite::Error>,
    {
        let mut attempts = 0;
        loop {
            let external_id = self.next_free(conn, kind, &mut attempts)?;
            match insert(&external_id) {
                Ok(value) => return Ok(value),
                Err(e) if is_external_id_clash(&e, kind) => {
                    warn!(external_id = %external_id, "Lost external id race at insert, retrying");
                }
                Err(e) => return Err(map_write_error(e)),
            }
        }
    }
}

fn is_external_id_clash(err: &rusqlite::Error, kind: EntityKind) -> bool {
    matches!(
        unique_violation(err),
        Some((table, column)) if table == kind.table() && column == "external_id"
    )
}
