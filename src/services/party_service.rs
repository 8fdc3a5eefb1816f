//! Party service - sellers, commission agents, roles and users
//!
//! These records take part in the identifier allocator and duplicate guard
//! only. None of them hold capacity or drive settlement.

use std::sync::Arc;

use tracing::info;

use crate::db::duplicates::{ensure_unique, Exclude};
use crate::db::{entities, parties, EntityKind, IdentifierAllocator, ProcurementDb};
use crate::db::{PartyInput, PartyKind, PartyRow, RoleInput, RoleRow, UserInput, UserRow};
use crate::error::ProcurementError;

use super::events::{EventBus, ProcurementEvent};
use super::reloaded;

/// Service for the records that only need ids and unique keys
pub struct PartyService {
    db: Arc<ProcurementDb>,
    events: Arc<EventBus>,
    ids: Arc<IdentifierAllocator>,
}

impl PartyService {
    pub fn new(db: Arc<ProcurementDb>, events: Arc<EventBus>, ids: Arc<IdentifierAllocator>) -> Self {
        Self { db, events, ids }
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    pub fn get_party(&self, kind: PartyKind, external_id: &str) -> Result<Option<PartyRow>, ProcurementError> {
        self.db.with_conn(|conn| parties::get_party(conn, kind, external_id, false))
    }

    pub fn list_parties(&self, kind: PartyKind) -> Result<Vec<PartyRow>, ProcurementError> {
        self.db.with_conn(|conn| parties::list_parties(conn, kind))
    }

    pub fn get_role(&self, external_id: &str) -> Result<Option<RoleRow>, ProcurementError> {
        self.db.with_conn(|conn| parties::get_role(conn, external_id, false))
    }

    pub fn get_user(&self, external_id: &str) -> Result<Option<UserRow>, ProcurementError> {
        self.db.with_conn(|conn| parties::get_user(conn, external_id, false))
    }

    // =========================================================================
    // Sellers and commission agents
    // =========================================================================

    pub fn register_party(&self, kind: PartyKind, input: PartyInput) -> Result<PartyRow, ProcurementError> {
        let input = input.checked()?;
        let entity = kind.entity();

        let party = self.db.transaction(|tx| {
            ensure_unique(tx, entity, &input.unique_fields(), Exclude::Nothing)?;
            let (id, external_id) = self.ids.insert_with_external_id(tx, entity, |external_id| {
                parties::insert_party(tx, kind, external_id, &input).map(|id| (id, external_id.to_string()))
            })?;
            reloaded(parties::get_party(tx, kind, &external_id, false)?, entity, id)
        })?;

        info!(kind = %entity, id = %party.external_id, "Party registered");
        self.events.emit(ProcurementEvent::Created {
            kind: entity,
            id: party.external_id.clone(),
        });

        Ok(party)
    }

    /// Full update: the submission replaces every stored field
    pub fn update_party(
        &self,
        kind: PartyKind,
        external_id: &str,
        input: PartyInput,
    ) -> Result<PartyRow, ProcurementError> {
        let input = input.checked()?;
        let entity = kind.entity();

        let party = self.db.transaction(|tx| {
            let row = parties::get_party(tx, kind, external_id, false)?
                .ok_or_else(|| ProcurementError::not_found(entity.label(), external_id))?;
            ensure_unique(tx, entity, &input.unique_fields(), Exclude::ExternalId(external_id))?;
            parties::update_party(tx, kind, row.id, &input)?;
            reloaded(parties::get_party(tx, kind, external_id, false)?, entity, row.id)
        })?;

        self.events.emit(ProcurementEvent::Updated {
            kind: entity,
            id: party.external_id.clone(),
        });

        Ok(party)
    }

    // =========================================================================
    // Roles and users
    // =========================================================================

    pub fn register_role(&self, input: RoleInput) -> Result<RoleRow, ProcurementError> {
        let input = input.checked()?;

        let role = self.db.transaction(|tx| {
            ensure_unique(tx, EntityKind::Role, &input.unique_fields(), Exclude::Nothing)?;
            let (id, external_id) = self.ids.insert_with_external_id(tx, EntityKind::Role, |external_id| {
                parties::insert_role(tx, external_id, &input).map(|id| (id, external_id.to_string()))
            })?;
            reloaded(parties::get_role(tx, &external_id, false)?, EntityKind::Role, id)
        })?;

        self.events.emit(ProcurementEvent::Created {
            kind: EntityKind::Role,
            id: role.external_id.clone(),
        });

        Ok(role)
    }

    /// Register a user; a given `roleId` must name an active role
    pub fn register_user(&self, input: UserInput) -> Result<UserRow, ProcurementError> {
        let input = input.checked()?;

        let user = self.db.transaction(|tx| {
            let role_id = match input.role_id.as_deref() {
                Some(role) => Some(parties::require_role(tx, role)?.id),
                None => None,
            };
            ensure_unique(tx, EntityKind::User, &input.unique_fields(), Exclude::Nothing)?;
            let (id, external_id) = self.ids.insert_with_external_id(tx, EntityKind::User, |external_id| {
                parties::insert_user(tx, external_id, &input, role_id).map(|id| (id, external_id.to_string()))
            })?;
            reloaded(parties::get_user(tx, &external_id, false)?, EntityKind::User, id)
        })?;

        info!(id = %user.external_id, role = ?user.role_external_id, "User registered");
        self.events.emit(ProcurementEvent::Created {
            kind: EntityKind::User,
            id: user.external_id.clone(),
        });

        Ok(user)
    }

    pub fn update_user(&self, external_id: &str, input: UserInput) -> Result<UserRow, ProcurementError> {
        let input = input.checked()?;

        let user = self.db.transaction(|tx| {
            let row = parties::get_user(tx, external_id, false)?
                .ok_or_else(|| ProcurementError::not_found("User", external_id))?;
            let role_id = match input.role_id.as_deref() {
                Some(role) => Some(parties::require_role(tx, role)?.id),
                None => None,
            };
            ensure_unique(tx, EntityKind::User, &input.unique_fields(), Exclude::ExternalId(external_id))?;
            parties::update_user(tx, row.id, &input, role_id)?;
            reloaded(parties::get_user(tx, external_id, false)?, EntityKind::User, row.id)
        })?;

        self.events.emit(ProcurementEvent::Updated {
            kind: EntityKind::User,
            id: user.external_id.clone(),
        });

        Ok(user)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Retire a seller, commission agent, role or user
    pub fn soft_delete(&self, kind: EntityKind, external_id: &str) -> Result<(), ProcurementError> {
        ensure_party_kind(kind)?;
        self.db.transaction(|tx| {
            let (id, _) = entities::lookup(tx, kind, external_id)?
                .filter(|(_, deleted)| !deleted)
                .ok_or_else(|| ProcurementError::not_found(kind.label(), external_id))?;
            entities::soft_delete(tx, kind, id)
        })?;

        self.events.emit(ProcurementEvent::SoftDeleted {
            kind,
            id: external_id.to_string(),
        });
        Ok(())
    }

    /// Bring a retired record back. A business key taken over in the
    /// meantime surfaces as `DuplicateField` from the unique index.
    pub fn restore(&self, kind: EntityKind, external_id: &str) -> Result<(), ProcurementError> {
        ensure_party_kind(kind)?;
        let restored = self.db.transaction(|tx| {
            let (id, _) = entities::lookup(tx, kind, external_id)?
                .ok_or_else(|| ProcurementError::not_found(kind.label(), external_id))?;
            entities::restore(tx, kind, id)
        })?;

        if restored {
            self.events.emit(ProcurementEvent::Restored {
                kind,
                id: external_id.to_string(),
            });
        }
        Ok(())
    }

    /// Physically delete a seller, commission agent, role or user. Users
    /// holding a deleted role keep a dangling `role_id`, reported as no role.
    pub fn hard_delete(&self, kind: EntityKind, external_id: &str) -> Result<(), ProcurementError> {
        ensure_party_kind(kind)?;
        self.db.transaction(|tx| {
            let (id, _) = entities::lookup(tx, kind, external_id)?
                .ok_or_else(|| ProcurementError::not_found(kind.label(), external_id))?;
            entities::hard_delete(tx, kind, id)
        })?;

        self.events.emit(ProcurementEvent::HardDeleted {
            kind,
            id: external_id.to_string(),
            files_removed: 0,
        });
        Ok(())
    }
}

/// Vendors, stations, animals and payments have their own guarded lifecycles
fn ensure_party_kind(kind: EntityKind) -> Result<(), ProcurementError> {
    match kind {
        EntityKind::Seller | EntityKind::CommissionAgent | EntityKind::Role | EntityKind::User => Ok(()),
        other => Err(ProcurementError::validation(
            "kind",
            format!("{} has its own lifecycle workflow", other.label()),
        )),
    }
}
