//! Derived vendor-payment flag on animals
//!
//! `animals.vendor_pay` must equal "some active vendor payment lists this
//! animal". Creating a vendor payment can only turn flags on. Removing one
//! recomputes each listed animal against the payments that remain, so an
//! animal covered by two overlapping payments stays settled when only one
//! of them is cancelled.

use std::collections::HashSet;

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::models::{current_timestamp, payment_for};
use super::payments::PaymentRow;
use crate::error::ProcurementError;

/// Animal ids attached to a payment, as they arrive.
///
/// Callers send either a native JSON array or a JSON array that has itself
/// been encoded into a string (multipart forms do this). Stored rows are
/// always read back as `Encoded`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnimalIdList {
    List(Vec<i64>),
    Encoded(String),
}

impl AnimalIdList {
    /// Strict decode, used when validating new input
    pub fn try_decode(&self) -> Result<Vec<i64>, String> {
        let ids = match self {
            Self::List(ids) => ids.clone(),
            Self::Encoded(raw) => decode_encoded(raw)?,
        };

        let mut seen = HashSet::new();
        Ok(ids.into_iter().filter(|id| seen.insert(*id)).collect())
    }

    /// Lenient decode: anything unreadable is an empty list, with a warning
    pub fn decode(&self) -> Vec<i64> {
        self.try_decode().unwrap_or_else(|e| {
            warn!(error = %e, "Unreadable animal id list, treating as empty");
            Vec::new()
        })
    }

    /// Storage form of a decoded list
    pub fn encode(ids: &[i64]) -> String {
        serde_json::to_string(ids).unwrap_or_else(|_| "[]".to_string())
    }
}

fn decode_encoded(raw: &str) -> Result<Vec<i64>, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    if let Ok(ids) = serde_json::from_str::<Vec<i64>>(trimmed) {
        return Ok(ids);
    }

    // Arrays of numeric strings, e.g. ["12","13"]
    let strings: Vec<String> = serde_json::from_str(trimmed)
        .map_err(|e| format!("not a JSON id array: {}", e))?;
    strings
        .iter()
        .map(|s| s.trim().parse::<i64>().map_err(|_| format!("not an animal id: {:?}", s)))
        .collect()
}

/// Ids of animals listed by at least one active vendor payment
pub fn settled_animal_ids(
    conn: &Connection,
    excluding_payment: Option<i64>,
) -> Result<HashSet<i64>, ProcurementError> {
    let mut stmt = conn
        .prepare(
            "SELECT id, animal_ids FROM payments
             WHERE payment_for = ? AND deleted_at IS NULL AND animal_ids IS NOT NULL",
        )
        .map_err(|e| ProcurementError::Internal(format!("Prepare failed: {}", e)))?;

    let rows = stmt
        .query_map(params![payment_for::VENDOR], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })
        .map_err(|e| ProcurementError::Internal(format!("Query failed: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ProcurementError::Internal(format!("Row parse failed: {}", e)))?;

    Ok(rows
        .into_iter()
        .filter(|(id, _)| Some(*id) != excluding_payment)
        .flat_map(|(_, raw)| AnimalIdList::Encoded(raw).decode())
        .collect())
}

fn set_flag(conn: &Connection, animal_id: i64, settled: bool) -> Result<usize, ProcurementError> {
    conn.execute(
        "UPDATE animals SET vendor_pay = ?2, updated_at = ?3 WHERE id = ?1 AND vendor_pay <> ?2",
        params![animal_id, settled, current_timestamp()],
    )
    .map_err(|e| ProcurementError::Internal(format!("Settlement update failed: {}", e)))
}

/// Mark every animal of a new vendor payment as paid
pub fn on_payment_created(conn: &Connection, payment: &PaymentRow) -> Result<usize, ProcurementError> {
    if payment.payment_for != payment_for::VENDOR {
        return Ok(0);
    }

    let mut changed = 0;
    for animal_id in &payment.animal_ids {
        changed += set_flag(conn, *animal_id, true)?;
    }

    debug!(payment = %payment.external_id, changed, "Settled animals for payment");
    Ok(changed)
}

/// Recompute the flag of every animal a removed vendor payment listed
pub fn on_payment_deleted(conn: &Connection, payment: &PaymentRow) -> Result<usize, ProcurementError> {
    if payment.payment_for != payment_for::VENDOR {
        return Ok(0);
    }

    let changed = recompute(conn, &payment.animal_ids, Some(payment.id))?;
    debug!(payment = %payment.external_id, changed, "Recomputed settlement after payment removal");
    Ok(changed)
}

/// Bring each listed animal's flag in line with the active vendor payments
pub fn recompute(
    conn: &Connection,
    animal_ids: &[i64],
    excluding_payment: Option<i64>,
) -> Result<usize, ProcurementError> {
    if animal_ids.is_empty() {
        return Ok(0);
    }

    let settled = settled_animal_ids(conn, excluding_payment)?;
    let mut changed = 0;
    for animal_id in animal_ids {
        changed += set_flag(conn, *animal_id, settled.contains(animal_id))?;
    }
    Ok(changed)
}

/// An active animal whose flag disagrees with the payments
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettlementDrift {
    pub animal_id: i64,
    pub external_id: String,
    pub recorded: bool,
    pub expected: bool,
}

/// Check the flag of every active animal
pub fn audit_settlement(conn: &Connection) -> Result<Vec<SettlementDrift>, ProcurementError> {
    let settled = settled_animal_ids(conn, None)?;

    let mut stmt = conn
        .prepare("SELECT id, external_id, vendor_pay FROM animals WHERE deleted_at IS NULL ORDER BY id")
        .map_err(|e| ProcurementError::Internal(format!("Prepare failed: {}", e)))?;

    let animals = stmt
        .query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, bool>(2)?))
        })
        .map_err(|e| ProcurementError::Internal(format!("Query failed: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ProcurementError::Internal(format!("Row parse failed: {}", e)))?;

    Ok(animals
        .into_iter()
        .filter_map(|(animal_id, external_id, recorded)| {
            let expected = settled.contains(&animal_id);
            (recorded != expected).then_some(SettlementDrift {
                animal_id,
                external_id,
                recorded,
                expected,
            })
        })
        .collect())
}
