//! Error types for livestock-ledger

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProcurementError {
    #[error("Invalid {field}: {reason}")]
    ValidationFailed { field: String, reason: String },

    #[error("{message}")]
    DuplicateField { field: String, message: String },

    #[error("Holding station {0} has no free capacity")]
    CapacityExceeded(String),

    #[error("Holding station {station} currently holds {occupancy} animals; capacity cannot be set to {requested}")]
    CapacityBelowOccupancy {
        station: String,
        occupancy: i64,
        requested: i64,
    },

    #[error("{parent} is still referenced by active animals: {}", children.join(", "))]
    ReferencedByChildren { parent: String, children: Vec<String> },

    #[error("Identifier space exhausted for prefix {0}")]
    ExhaustedIdentifierSpace(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProcurementError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ValidationFailed {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Stable machine-readable kind, safe to match on in callers
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ValidationFailed { .. } => "validation_failed",
            Self::DuplicateField { .. } => "duplicate_field",
            Self::CapacityExceeded(_) => "capacity_exceeded",
            Self::CapacityBelowOccupancy { .. } => "capacity_below_occupancy",
            Self::ReferencedByChildren { .. } => "referenced_by_children",
            Self::ExhaustedIdentifierSpace(_) => "exhausted_identifier_space",
            Self::NotFound { .. } => "not_found",
            Self::Database(_) | Self::Io(_) | Self::Json(_) | Self::Config(_) | Self::Internal(_) => {
                "internal"
            }
        }
    }

    /// Field the error is attached to, when there is one
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::ValidationFailed { field, .. } | Self::DuplicateField { field, .. } => Some(field),
            _ => None,
        }
    }

    /// Whether the error is a business-rule outcome rather than an infrastructure failure
    pub fn is_recoverable(&self) -> bool {
        self.kind() != "internal"
    }
}
