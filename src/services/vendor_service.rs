//! Vendor service - vendor lifecycle with duplicate and reference guards

use std::sync::Arc;

use tracing::info;

use crate::db::duplicates::{ensure_unique, Exclude};
use crate::db::references::{assert_no_active_references, ParentKind, ParentRef};
use crate::db::{entities, vendors, EntityKind, IdentifierAllocator, ProcurementDb};
use crate::db::{CreateVendorInput, UpdateVendorInput, VendorRow};
use crate::error::ProcurementError;
use crate::files::{remove_files, StagedFiles};

use super::events::{EventBus, ProcurementEvent};
use super::reloaded;

/// Vendor service for business logic
pub struct VendorService {
    db: Arc<ProcurementDb>,
    events: Arc<EventBus>,
    ids: Arc<IdentifierAllocator>,
}

impl VendorService {
    pub fn new(db: Arc<ProcurementDb>, events: Arc<EventBus>, ids: Arc<IdentifierAllocator>) -> Self {
        Self { db, events, ids }
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    pub fn get(&self, external_id: &str) -> Result<Option<VendorRow>, ProcurementError> {
        self.db.with_conn(|conn| vendors::get_vendor(conn, external_id, false))
    }

    pub fn list(&self, status: Option<&str>) -> Result<Vec<VendorRow>, ProcurementError> {
        self.db.with_conn(|conn| vendors::list_vendors(conn, status, false))
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    /// Create a vendor owning the staged documents
    pub fn create(
        &self,
        input: CreateVendorInput,
        documents: StagedFiles,
    ) -> Result<VendorRow, ProcurementError> {
        let mut draft = input.to_draft();
        draft.validate()?;
        draft.document_paths = documents.stored_paths();

        let vendor = self.db.transaction(|tx| {
            ensure_unique(tx, EntityKind::Vendor, &draft.unique_fields(), Exclude::Nothing)?;
            let id = self
                .ids
                .insert_with_external_id(tx, EntityKind::Vendor, |external_id| {
                    vendors::insert_vendor(tx, external_id, &draft)
                })?;
            reloaded(vendors::get_vendor_by_id(tx, id)?, EntityKind::Vendor, id)
        })?;
        documents.commit();

        info!(id = %vendor.external_id, name = %vendor.name, "Vendor created");
        self.events.emit(ProcurementEvent::Created {
            kind: EntityKind::Vendor,
            id: vendor.external_id.clone(),
        });

        Ok(vendor)
    }

    /// Update a vendor; staged documents are appended, or replace the stored
    /// set when `replace_documents` is set
    pub fn update(
        &self,
        external_id: &str,
        input: UpdateVendorInput,
        documents: StagedFiles,
    ) -> Result<VendorRow, ProcurementError> {
        let (vendor, superseded) = self.db.transaction(|tx| {
            let mut row = vendors::require_vendor(tx, external_id)?;
            input.apply(&mut row);
            row.validate()?;
            ensure_unique(tx, EntityKind::Vendor, &row.unique_fields(), Exclude::ExternalId(external_id))?;

            let superseded = if input.replace_documents {
                std::mem::replace(&mut row.document_paths, documents.stored_paths())
            } else {
                row.document_paths.extend(documents.stored_paths());
                Vec::new()
            };

            vendors::update_vendor(tx, &row)?;
            let vendor = reloaded(vendors::get_vendor_by_id(tx, row.id)?, EntityKind::Vendor, row.id)?;
            Ok((vendor, superseded))
        })?;
        documents.commit();
        remove_files(&superseded);

        self.events.emit(ProcurementEvent::Updated {
            kind: EntityKind::Vendor,
            id: vendor.external_id.clone(),
        });

        Ok(vendor)
    }

    /// Retire a vendor. Never guarded: the vendor's animals and payments stay intact.
    pub fn soft_delete(&self, external_id: &str) -> Result<VendorRow, ProcurementError> {
        let vendor = self.db.transaction(|tx| {
            let row = vendors::require_vendor(tx, external_id)?;
            entities::soft_delete(tx, EntityKind::Vendor, row.id)?;
            reloaded(vendors::get_vendor_by_id(tx, row.id)?, EntityKind::Vendor, row.id)
        })?;

        self.events.emit(ProcurementEvent::SoftDeleted {
            kind: EntityKind::Vendor,
            id: vendor.external_id.clone(),
        });

        Ok(vendor)
    }

    /// Bring a retired vendor back, re-running the create-time checks
    pub fn restore(&self, external_id: &str) -> Result<VendorRow, ProcurementError> {
        let (vendor, restored) = self.db.transaction(|tx| {
            let row = vendors::get_vendor(tx, external_id, true)?
                .ok_or_else(|| ProcurementError::not_found("Vendor", external_id))?;
            if !row.is_deleted() {
                return Ok((row, false));
            }

            row.validate()?;
            ensure_unique(tx, EntityKind::Vendor, &row.unique_fields(), Exclude::ExternalId(external_id))?;
            entities::restore(tx, EntityKind::Vendor, row.id)?;
            let vendor = reloaded(vendors::get_vendor_by_id(tx, row.id)?, EntityKind::Vendor, row.id)?;
            Ok((vendor, true))
        })?;

        if restored {
            self.events.emit(ProcurementEvent::Restored {
                kind: EntityKind::Vendor,
                id: vendor.external_id.clone(),
            });
        }

        Ok(vendor)
    }

    /// Physically delete a vendor (active or retired) and its documents.
    ///
    /// Fails with `ReferencedByChildren` while any active animal points at it.
    pub fn hard_delete(&self, external_id: &str) -> Result<(), ProcurementError> {
        let documents = self.db.transaction(|tx| {
            let row = vendors::get_vendor(tx, external_id, true)?
                .ok_or_else(|| ProcurementError::not_found("Vendor", external_id))?;

            assert_no_active_references(
                tx,
                ParentRef {
                    kind: ParentKind::Vendor,
                    id: row.id,
                    external_id: &row.external_id,
                },
            )?;

            entities::hard_delete(tx, EntityKind::Vendor, row.id)?;
            Ok(row.document_paths)
        })?;

        let files_removed = remove_files(&documents);
        info!(id = %external_id, files_removed, "Vendor permanently deleted");

        self.events.emit(ProcurementEvent::HardDeleted {
            kind: EntityKind::Vendor,
            id: external_id.to_string(),
            files_removed,
        });

        Ok(())
    }
}
