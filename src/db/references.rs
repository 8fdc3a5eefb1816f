//! Guards against hard-deleting parents that active children still point at
//!
//! Animals reference vendors and holding stations without a FOREIGN KEY
//! clause, and vendor payments reference animals through their JSON id
//! list, so nothing in the database stops a parent from disappearing.
//! Soft deletes never consult this guard; only physical deletion does.

use rusqlite::{params, Connection};
use tracing::debug;

use super::models::payment_for;
use super::settlement::AnimalIdList;
use crate::error::ProcurementError;

/// Parent rows that other records reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentKind {
    /// Referenced by animals
    Vendor,
    /// Referenced by animals
    HoldingStation,
    /// Referenced by the animal lists of vendor payments
    Animal,
}

impl ParentKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Vendor => "Vendor",
            Self::HoldingStation => "Holding station",
            Self::Animal => "Animal",
        }
    }
}

/// A parent row about to be removed
#[derive(Debug, Clone, Copy)]
pub struct ParentRef<'a> {
    pub kind: ParentKind,
    pub id: i64,
    pub external_id: &'a str,
}

/// External ids of active records referencing `parent`, oldest first
pub fn active_children(conn: &Connection, parent: ParentRef<'_>) -> Result<Vec<String>, ProcurementError> {
    match parent.kind {
        ParentKind::Vendor => animals_referencing(conn, "vendor_id", parent.id),
        ParentKind::HoldingStation => animals_referencing(conn, "holding_station_id", parent.id),
        ParentKind::Animal => payments_listing(conn, parent.id),
    }
}

fn animals_referencing(conn: &Connection, column: &str, id: i64) -> Result<Vec<String>, ProcurementError> {
    let sql = format!(
        "SELECT external_id FROM animals WHERE {} = ? AND deleted_at IS NULL ORDER BY id",
        column
    );

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| ProcurementError::Internal(format!("Prepare failed: {}", e)))?;

    let children = stmt
        .query_map(params![id], |row| row.get(0))
        .map_err(|e| ProcurementError::Internal(format!("Query failed: {}", e)))?
        .collect::<Result<Vec<String>, _>>()
        .map_err(|e| ProcurementError::Internal(format!("Row parse failed: {}", e)))?;

    Ok(children)
}

/// Active vendor payments whose animal list contains `animal_id`
fn payments_listing(conn: &Connection, animal_id: i64) -> Result<Vec<String>, ProcurementError> {
    let mut stmt = conn
        .prepare(
            "SELECT external_id, animal_ids FROM payments
             WHERE payment_for = ? AND deleted_at IS NULL AND animal_ids IS NOT NULL
             ORDER BY id",
        )
        .map_err(|e| ProcurementError::Internal(format!("Prepare failed: {}", e)))?;

    let rows = stmt
        .query_map(params![payment_for::VENDOR], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })
        .map_err(|e| ProcurementError::Internal(format!("Query failed: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ProcurementError::Internal(format!("Row parse failed: {}", e)))?;

    Ok(rows
        .into_iter()
        .filter(|(_, raw)| AnimalIdList::Encoded(raw.clone()).decode().contains(&animal_id))
        .map(|(external_id, _)| external_id)
        .collect())
}

/// Fail with `ReferencedByChildren` listing every active referencing record
pub fn assert_no_active_references(conn: &Connection, parent: ParentRef<'_>) -> Result<(), ProcurementError> {
    let children = active_children(conn, parent)?;

    if children.is_empty() {
        return Ok(());
    }

    debug!(
        parent = %parent.external_id,
        count = children.len(),
        "{} still referenced",
        parent.kind.label()
    );

    Err(ProcurementError::ReferencedByChildren {
        parent: parent.external_id.to_string(),
        children,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::init_schema;

    #[test]
    fn test_lists_only_active_children() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn.execute_batch(
            r#"
            INSERT INTO animals (external_id, vendor_id, holding_station_id, species) VALUES ('ANI0000001', 7, 1, 'cattle');
            INSERT INTO animals (external_id, vendor_id, holding_station_id, species) VALUES ('ANI0000002', 7, 2, 'cattle');
            INSERT INTO animals (external_id, vendor_id, holding_station_id, species, deleted_at)
                VALUES ('ANI0000003', 7, 1, 'cattle', '2024-01-01T00:00:00Z');
            INSERT INTO animals (external_id, vendor_id, holding_station_id, species) VALUES ('ANI0000004', 8, 1, 'cattle');
            "#,
        )
        .unwrap();

        let vendor = ParentRef { kind: ParentKind::Vendor, id: 7, external_id: "VEN00007" };
        match assert_no_active_references(&conn, vendor).unwrap_err() {
            ProcurementError::ReferencedByChildren { parent, children } => {
                assert_eq!(parent, "VEN00007");
                assert_eq!(children, vec!["ANI0000001", "ANI0000002"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let station = ParentRef { kind: ParentKind::HoldingStation, id: 2, external_id: "HS00002" };
        assert_eq!(active_children(&conn, station).unwrap(), vec!["ANI0000002"]);

        let unused = ParentRef { kind: ParentKind::Vendor, id: 9, external_id: "VEN00009" };
        assert!(assert_no_active_references(&conn, unused).is_ok());
    }

    #[test]
    fn test_animal_referenced_by_active_vendor_payments() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn.execute_batch(
            r#"
            INSERT INTO payments (external_id, payment_for, vendor_id, animal_ids, amount) VALUES ('PAY000001', 'vendor', 7, '[1,2]', 100);
            INSERT INTO payments (external_id, payment_for, vendor_id, animal_ids, amount) VALUES ('PAY000002', 'vendor', 7, '[2]', 50);
            INSERT INTO payments (external_id, payment_for, vendor_id, animal_ids, amount, deleted_at)
                VALUES ('PAY000003', 'vendor', 7, '[1]', 75, '2024-01-01T00:00:00Z');
            INSERT INTO payments (external_id, payment_for, amount) VALUES ('PAY000004', 'transport', 20);
            "#,
        )
        .unwrap();

        let listed = ParentRef { kind: ParentKind::Animal, id: 2, external_id: "ANI0000002" };
        assert_eq!(active_children(&conn, listed).unwrap(), vec!["PAY000001", "PAY000002"]);

        let cancelled_only = ParentRef { kind: ParentKind::Animal, id: 1, external_id: "ANI0000001" };
        assert_eq!(active_children(&conn, cancelled_only).unwrap(), vec!["PAY000001"]);

        let unpaid = ParentRef { kind: ParentKind::Animal, id: 3, external_id: "ANI0000003" };
        assert!(assert_no_active_references(&conn, unpaid).is_ok());
    }
}
