//! Payment service - payments and the settlement flag they drive

use std::collections::BTreeSet;
use std::sync::Arc;

use rusqlite::Connection;
use tracing::{debug, info};

use crate::db::duplicates::{ensure_unique, Exclude};
use crate::db::{animals, entities, payments, settlement, vendors};
use crate::db::{EntityKind, IdentifierAllocator, PaymentRow, ProcurementDb};
use crate::db::{RecordPaymentInput, UpdatePaymentInput};
use crate::error::ProcurementError;
use crate::files::{remove_files, StagedFiles};

use super::events::{EventBus, ProcurementEvent};
use super::reloaded;

/// Payment service for business logic
pub struct PaymentService {
    db: Arc<ProcurementDb>,
    events: Arc<EventBus>,
    ids: Arc<IdentifierAllocator>,
}

/// Every listed animal must exist, be active and belong to `vendor_id`
fn check_animals(conn: &Connection, vendor_id: i64, animal_ids: &[i64]) -> Result<(), ProcurementError> {
    let found = animals::animals_by_ids(conn, animal_ids)?;

    for id in animal_ids {
        let Some(animal) = found.iter().find(|a| a.id == *id) else {
            return Err(ProcurementError::validation("animalIds", format!("animal {} does not exist", id)));
        };
        if animal.is_deleted() {
            return Err(ProcurementError::validation(
                "animalIds",
                format!("animal {} has been deleted", animal.external_id),
            ));
        }
        if animal.vendor_id != vendor_id {
            return Err(ProcurementError::validation(
                "animalIds",
                format!("animal {} was not supplied by this vendor", animal.external_id),
            ));
        }
    }

    Ok(())
}

impl PaymentService {
    pub fn new(db: Arc<ProcurementDb>, events: Arc<EventBus>, ids: Arc<IdentifierAllocator>) -> Self {
        Self { db, events, ids }
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    pub fn get(&self, external_id: &str) -> Result<Option<PaymentRow>, ProcurementError> {
        self.db.with_conn(|conn| payments::get_payment(conn, external_id, false))
    }

    /// Active payments, optionally filtered by kind and vendor external id
    pub fn list(&self, kind: Option<&str>, vendor: Option<&str>) -> Result<Vec<PaymentRow>, ProcurementError> {
        self.db.with_conn(|conn| payments::list_payments(conn, kind, vendor, false))
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    /// Record a payment and settle the animals it lists
    pub fn record(
        &self,
        input: RecordPaymentInput,
        receipts: StagedFiles,
    ) -> Result<PaymentRow, ProcurementError> {
        let mut draft = input.to_draft()?;
        draft.validate()?;
        draft.receipt_paths = receipts.stored_paths();

        let (payment, settled) = self.db.transaction(|tx| {
            if let Some(vendor_external_id) = &draft.vendor_external_id {
                let vendor = vendors::require_vendor(tx, vendor_external_id)?;
                draft.vendor_id = Some(vendor.id);
            }
            if let (true, Some(vendor_id)) = (draft.is_vendor_payment(), draft.vendor_id) {
                check_animals(tx, vendor_id, &draft.animal_ids)?;
            }

            ensure_unique(tx, EntityKind::Payment, &draft.unique_fields(), Exclude::Nothing)?;
            let id = self
                .ids
                .insert_with_external_id(tx, EntityKind::Payment, |external_id| {
                    payments::insert_payment(tx, external_id, &draft)
                })?;

            let payment = reloaded(payments::get_payment_by_id(tx, id)?, EntityKind::Payment, id)?;
            let settled = settlement::on_payment_created(tx, &payment)?;
            Ok((payment, settled))
        })?;
        receipts.commit();

        info!(
            id = %payment.external_id,
            payment_for = %payment.payment_for,
            amount = payment.amount,
            settled,
            "Payment recorded"
        );
        self.events.emit(ProcurementEvent::PaymentRecorded {
            id: payment.external_id.clone(),
            payment_for: payment.payment_for.clone(),
            settled,
        });

        Ok(payment)
    }

    /// Update a payment. A new animal list re-settles the union of the old
    /// and new animals.
    pub fn update(
        &self,
        external_id: &str,
        input: UpdatePaymentInput,
        receipts: StagedFiles,
    ) -> Result<PaymentRow, ProcurementError> {
        let (payment, superseded) = self.db.transaction(|tx| {
            let mut row = payments::require_payment(tx, external_id)?;
            let previous: BTreeSet<i64> = row.animal_ids.iter().copied().collect();

            input.apply(&mut row)?;
            row.validate()?;
            if let (true, Some(vendor_id)) = (row.is_vendor_payment(), row.vendor_id) {
                check_animals(tx, vendor_id, &row.animal_ids)?;
            }
            ensure_unique(tx, EntityKind::Payment, &row.unique_fields(), Exclude::ExternalId(external_id))?;

            let superseded = if input.replace_receipts {
                std::mem::replace(&mut row.receipt_paths, receipts.stored_paths())
            } else {
                row.receipt_paths.extend(receipts.stored_paths());
                Vec::new()
            };
            payments::update_payment(tx, &row)?;

            let affected: Vec<i64> = previous.union(&row.animal_ids.iter().copied().collect()).copied().collect();
            let changed = settlement::recompute(tx, &affected, None)?;
            debug!(id = %row.external_id, changed, "Re-settled animals after payment update");

            let payment = reloaded(payments::get_payment(tx, external_id, false)?, EntityKind::Payment, row.id)?;
            Ok((payment, superseded))
        })?;
        receipts.commit();
        remove_files(&superseded);

        self.events.emit(ProcurementEvent::Updated {
            kind: EntityKind::Payment,
            id: payment.external_id.clone(),
        });

        Ok(payment)
    }

    /// Soft-delete a payment. Each animal it listed stays settled only if
    /// another active vendor payment still lists it.
    pub fn cancel(&self, external_id: &str) -> Result<PaymentRow, ProcurementError> {
        let (payment, unsettled) = self.db.transaction(|tx| {
            let row = payments::require_payment(tx, external_id)?;
            entities::soft_delete(tx, EntityKind::Payment, row.id)?;
            let unsettled = settlement::on_payment_deleted(tx, &row)?;
            let payment = reloaded(payments::get_payment(tx, external_id, true)?, EntityKind::Payment, row.id)?;
            Ok((payment, unsettled))
        })?;

        info!(id = %payment.external_id, unsettled, "Payment cancelled");
        self.events.emit(ProcurementEvent::PaymentCancelled {
            id: payment.external_id.clone(),
            unsettled,
        });

        Ok(payment)
    }

    /// Bring a cancelled payment back, re-running the record-time checks
    pub fn restore(&self, external_id: &str) -> Result<PaymentRow, ProcurementError> {
        let (payment, restored) = self.db.transaction(|tx| {
            let row = payments::get_payment(tx, external_id, true)?
                .ok_or_else(|| ProcurementError::not_found("Payment", external_id))?;
            if !row.is_deleted() {
                return Ok((row, false));
            }

            row.validate()?;
            if row.is_vendor_payment() {
                let vendor_id = row
                    .vendor_id
                    .filter(|_| row.vendor_external_id.is_some())
                    .ok_or_else(|| ProcurementError::validation("vendorId", "vendor no longer exists"))?;
                vendors::get_vendor_by_id(tx, vendor_id)?
                    .filter(|v| !v.is_deleted())
                    .ok_or_else(|| ProcurementError::validation("vendorId", "vendor is no longer active"))?;
                check_animals(tx, vendor_id, &row.animal_ids)?;
            }
            ensure_unique(tx, EntityKind::Payment, &row.unique_fields(), Exclude::ExternalId(external_id))?;

            entities::restore(tx, EntityKind::Payment, row.id)?;
            let payment = reloaded(payments::get_payment(tx, external_id, false)?, EntityKind::Payment, row.id)?;
            settlement::on_payment_created(tx, &payment)?;
            Ok((payment, true))
        })?;

        if restored {
            self.events.emit(ProcurementEvent::Restored {
                kind: EntityKind::Payment,
                id: payment.external_id.clone(),
            });
        }

        Ok(payment)
    }

    /// Physically delete a payment (active or cancelled) and its receipts
    pub fn hard_delete(&self, external_id: &str) -> Result<(), ProcurementError> {
        let receipts = self.db.transaction(|tx| {
            let row = payments::get_payment(tx, external_id, true)?
                .ok_or_else(|| ProcurementError::not_found("Payment", external_id))?;
            entities::hard_delete(tx, EntityKind::Payment, row.id)?;
            if !row.is_deleted() {
                settlement::on_payment_deleted(tx, &row)?;
            }
            Ok(row.receipt_paths)
        })?;

        let files_removed = remove_files(&receipts);
        self.events.emit(ProcurementEvent::HardDeleted {
            kind: EntityKind::Payment,
            id: external_id.to_string(),
            files_removed,
        });

        Ok(())
    }
}
