//! Database schema definitions

use rusqlite::Connection;
use tracing::info;

use crate::error::ProcurementError;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 2;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<(), ProcurementError> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new database schema v{}", SCHEMA_VERSION);
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        info!("Migrating schema from v{} to v{}", current_version, SCHEMA_VERSION);
        migrate_schema(conn, current_version)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else {
        info!("Database schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &Connection) -> Result<i32, ProcurementError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )
    .map_err(|e| ProcurementError::Internal(format!("Failed to create schema_version table: {}", e)))?;

    let version: i32 = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .unwrap_or(0);

    Ok(version)
}

/// Apply each migration step after `from_version` in order
fn migrate_schema(conn: &Connection, from_version: i32) -> Result<(), ProcurementError> {
    if from_version < 2 {
        // v2: staff uniqueness depends on the owning station being active,
        // which an index cannot express
        conn.execute_batch(
            r#"
            DROP INDEX IF EXISTS ux_incharges_phone;
            DROP INDEX IF EXISTS ux_incharges_email;
            DROP INDEX IF EXISTS ux_caretakers_phone;
            DROP INDEX IF EXISTS ux_caretakers_national_id;
            "#,
        )
        .map_err(|e| ProcurementError::Internal(format!("Failed to drop staff unique indexes: {}", e)))?;
        conn.execute_batch(INDEXES_SCHEMA)
            .map_err(|e| ProcurementError::Internal(format!("Failed to create indexes: {}", e)))?;
    }
    Ok(())
}

/// Set schema version
fn set_schema_version(conn: &Connection, version: i32) -> Result<(), ProcurementError> {
    conn.execute("DELETE FROM schema_version", [])
        .map_err(|e| ProcurementError::Internal(format!("Failed to clear schema_version: {}", e)))?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])
        .map_err(|e| ProcurementError::Internal(format!("Failed to set schema_version: {}", e)))?;
    Ok(())
}

/// Create all tables
fn create_tables(conn: &Connection) -> Result<(), ProcurementError> {
    conn.execute_batch(VENDOR_SCHEMA)
        .map_err(|e| ProcurementError::Internal(format!("Failed to create vendor tables: {}", e)))?;

    conn.execute_batch(STATION_SCHEMA)
        .map_err(|e| ProcurementError::Internal(format!("Failed to create station tables: {}", e)))?;

    conn.execute_batch(ANIMAL_SCHEMA)
        .map_err(|e| ProcurementError::Internal(format!("Failed to create animal tables: {}", e)))?;

    conn.execute_batch(PAYMENT_SCHEMA)
        .map_err(|e| ProcurementError::Internal(format!("Failed to create payment tables: {}", e)))?;

    conn.execute_batch(PARTY_SCHEMA)
        .map_err(|e| ProcurementError::Internal(format!("Failed to create party tables: {}", e)))?;

    conn.execute_batch(INDEXES_SCHEMA)
        .map_err(|e| ProcurementError::Internal(format!("Failed to create indexes: {}", e)))?;

    Ok(())
}

/// Vendors
const VENDOR_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS vendors (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    external_id TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    phone TEXT,
    email TEXT,
    gst_number TEXT,
    pan_number TEXT,
    bank_account_number TEXT,
    ifsc_code TEXT,
    address TEXT,
    status TEXT NOT NULL DEFAULT 'active',

    -- JSON array of stored file paths owned by this vendor
    document_paths TEXT NOT NULL DEFAULT '[]',

    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    deleted_at TEXT
);
"#;

/// Holding stations and their staff
const STATION_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS holding_stations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    external_id TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    location TEXT,
    total_capacity INTEGER NOT NULL CHECK (total_capacity >= 0),
    current_occupancy INTEGER NOT NULL DEFAULT 0
        CHECK (current_occupancy >= 0 AND current_occupancy <= total_capacity),
    status TEXT NOT NULL DEFAULT 'active',
    document_paths TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    deleted_at TEXT
);

-- Staff rows are replaced as a set whenever the station is updated
CREATE TABLE IF NOT EXISTS holding_station_incharges (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    station_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    phone TEXT NOT NULL,
    email TEXT,
    national_id TEXT,
    FOREIGN KEY (station_id) REFERENCES holding_stations(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS holding_station_caretakers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    station_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    phone TEXT NOT NULL,
    national_id TEXT,
    FOREIGN KEY (station_id) REFERENCES holding_stations(id) ON DELETE CASCADE
);
"#;

/// Animals
///
/// vendor_id and holding_station_id carry no FOREIGN KEY clause: soft-deleted
/// animals may outlive a hard-deleted parent, and the referential guard is
/// what protects active rows.
const ANIMAL_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS animals (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    external_id TEXT NOT NULL UNIQUE,
    vendor_id INTEGER NOT NULL,
    holding_station_id INTEGER NOT NULL,
    species TEXT NOT NULL,
    breed TEXT,
    gender TEXT,
    ear_tag_id TEXT,
    calf_ear_tag_id TEXT,
    external_studbook_id TEXT,
    vendor_pay INTEGER NOT NULL DEFAULT 0,
    media_paths TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    deleted_at TEXT
);
"#;

/// Payments
const PAYMENT_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS payments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    external_id TEXT NOT NULL UNIQUE,
    payment_for TEXT NOT NULL CHECK (payment_for IN ('vendor', 'transport')),
    vendor_id INTEGER,

    -- JSON array of animal row ids; NULL for transport payments
    animal_ids TEXT,

    amount REAL NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    transaction_id TEXT,
    invoice_number TEXT,
    payment_date TEXT,
    notes TEXT,
    receipt_paths TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    deleted_at TEXT
);
"#;

/// Sellers, commission agents, users and roles
const PARTY_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sellers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    external_id TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    phone TEXT,
    national_id TEXT,
    address TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    deleted_at TEXT
);

CREATE TABLE IF NOT EXISTS commission_agents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    external_id TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    phone TEXT,
    national_id TEXT,
    address TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    deleted_at TEXT
);

CREATE TABLE IF NOT EXISTS roles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    external_id TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    description TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    deleted_at TEXT
);

CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    external_id TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    email TEXT,
    phone TEXT,
    role_id INTEGER,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    deleted_at TEXT
);
"#;

/// Indexes, including the partial unique indexes that back the duplicate guard.
/// Soft-deleted rows are left out so their values can be reused.
const INDEXES_SCHEMA: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS ux_vendors_phone ON vendors(phone) WHERE deleted_at IS NULL;
CREATE UNIQUE INDEX IF NOT EXISTS ux_vendors_email ON vendors(email) WHERE deleted_at IS NULL;
CREATE UNIQUE INDEX IF NOT EXISTS ux_vendors_gst_number ON vendors(gst_number) WHERE deleted_at IS NULL;
CREATE UNIQUE INDEX IF NOT EXISTS ux_vendors_pan_number ON vendors(pan_number) WHERE deleted_at IS NULL;
CREATE UNIQUE INDEX IF NOT EXISTS ux_vendors_bank_account_number ON vendors(bank_account_number) WHERE deleted_at IS NULL;

-- Staff values are unique among active stations only. The duplicate guard
-- enforces that inside the IMMEDIATE write transaction; these are lookups.
CREATE INDEX IF NOT EXISTS idx_incharges_phone ON holding_station_incharges(phone);
CREATE INDEX IF NOT EXISTS idx_incharges_email ON holding_station_incharges(email);
CREATE INDEX IF NOT EXISTS idx_caretakers_phone ON holding_station_caretakers(phone);
CREATE INDEX IF NOT EXISTS idx_caretakers_national_id ON holding_station_caretakers(national_id);

CREATE UNIQUE INDEX IF NOT EXISTS ux_animals_ear_tag_id ON animals(ear_tag_id) WHERE deleted_at IS NULL;
CREATE UNIQUE INDEX IF NOT EXISTS ux_animals_calf_ear_tag_id ON animals(calf_ear_tag_id) WHERE deleted_at IS NULL;
CREATE UNIQUE INDEX IF NOT EXISTS ux_animals_external_studbook_id ON animals(external_studbook_id) WHERE deleted_at IS NULL;

CREATE UNIQUE INDEX IF NOT EXISTS ux_payments_transaction_id ON payments(transaction_id) WHERE deleted_at IS NULL;
CREATE UNIQUE INDEX IF NOT EXISTS ux_payments_invoice_number ON payments(invoice_number) WHERE deleted_at IS NULL;

CREATE UNIQUE INDEX IF NOT EXISTS ux_sellers_phone ON sellers(phone) WHERE deleted_at IS NULL;
CREATE UNIQUE INDEX IF NOT EXISTS ux_sellers_national_id ON sellers(national_id) WHERE deleted_at IS NULL;
CREATE UNIQUE INDEX IF NOT EXISTS ux_commission_agents_phone ON commission_agents(phone) WHERE deleted_at IS NULL;
CREATE UNIQUE INDEX IF NOT EXISTS ux_commission_agents_national_id ON commission_agents(national_id) WHERE deleted_at IS NULL;
CREATE UNIQUE INDEX IF NOT EXISTS ux_users_email ON users(email) WHERE deleted_at IS NULL;
CREATE UNIQUE INDEX IF NOT EXISTS ux_users_phone ON users(phone) WHERE deleted_at IS NULL;
CREATE UNIQUE INDEX IF NOT EXISTS ux_roles_name ON roles(name) WHERE deleted_at IS NULL;

CREATE INDEX IF NOT EXISTS idx_animals_vendor ON animals(vendor_id, deleted_at);
CREATE INDEX IF NOT EXISTS idx_animals_station ON animals(holding_station_id, deleted_at);
CREATE INDEX IF NOT EXISTS idx_payments_vendor ON payments(vendor_id);
CREATE INDEX IF NOT EXISTS idx_payments_for ON payments(payment_for, deleted_at);
CREATE INDEX IF NOT EXISTS idx_incharges_station ON holding_station_incharges(station_id);
CREATE INDEX IF NOT EXISTS idx_caretakers_station ON holding_station_caretakers(station_id);
"#;
