//! Workflow outcome reporting
//!
//! The engine has no transport of its own. These helpers turn a workflow
//! result into the `(status, JSON body)` pair the controller layer sends,
//! with a consistent error shape:
//!
//! ```json
//! { "kind": "capacity_exceeded", "message": "...", "field": null, "status": 409 }
//! ```

use serde::Serialize;
use serde_json::{json, Value};

use crate::error::ProcurementError;

pub const OK: u16 = 200;
pub const CREATED: u16 = 201;
pub const NO_CONTENT: u16 = 204;

/// Error body returned to callers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReport {
    /// Stable machine-readable kind
    pub kind: &'static str,
    pub message: String,
    /// Offending input field, when there is one
    pub field: Option<String>,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ErrorReport {
    pub fn from_error(error: &ProcurementError) -> Self {
        let details = match error {
            ProcurementError::ReferencedByChildren { parent, children } => {
                Some(json!({ "parent": parent, "children": children }))
            }
            ProcurementError::CapacityBelowOccupancy { station, occupancy, requested } => {
                Some(json!({ "station": station, "occupancy": occupancy, "requested": requested }))
            }
            ProcurementError::CapacityExceeded(station) => Some(json!({ "station": station })),
            ProcurementError::ExhaustedIdentifierSpace(prefix) => Some(json!({ "prefix": prefix })),
            _ => None,
        };

        // Infrastructure failures are reported without driver detail
        let message = if error.is_recoverable() {
            error.to_string()
        } else {
            "Internal error".to_string()
        };

        Self {
            kind: error.kind(),
            message,
            field: error.field().map(str::to_string),
            status: status_for(error),
            details,
        }
    }
}

impl From<&ProcurementError> for ErrorReport {
    fn from(error: &ProcurementError) -> Self {
        Self::from_error(error)
    }
}

/// HTTP status the controller layer should use for `error`
pub fn status_for(error: &ProcurementError) -> u16 {
    match error {
        ProcurementError::ValidationFailed { .. } => 422,
        ProcurementError::DuplicateField { .. } => 409,
        ProcurementError::CapacityExceeded(_) => 409,
        ProcurementError::CapacityBelowOccupancy { .. } => 409,
        ProcurementError::ReferencedByChildren { .. } => 409,
        ProcurementError::ExhaustedIdentifierSpace(_) => 503,
        ProcurementError::NotFound { .. } => 404,
        _ => 500,
    }
}

/// Serialize a value, falling back to an empty object
fn to_body<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|_| json!({}))
}

/// Error status and body
pub fn error_response(error: &ProcurementError) -> (u16, Value) {
    let report = ErrorReport::from_error(error);
    if report.status >= 500 {
        tracing::error!(error = %error, kind = report.kind, "Workflow failed");
    }
    (report.status, to_body(&report))
}

/// Wrap a workflow result with 200 OK
pub fn from_result<T: Serialize>(result: &Result<T, ProcurementError>) -> (u16, Value) {
    match result {
        Ok(value) => (OK, to_body(value)),
        Err(e) => error_response(e),
    }
}

/// Wrap a create result with 201 Created
pub fn from_create_result<T: Serialize>(result: &Result<T, ProcurementError>) -> (u16, Value) {
    match result {
        Ok(value) => (CREATED, to_body(value)),
        Err(e) => error_response(e),
    }
}

/// Wrap a delete result with 204 No Content
pub fn from_delete_result(result: &Result<(), ProcurementError>) -> (u16, Value) {
    match result {
        Ok(()) => (NO_CONTENT, Value::Null),
        Err(e) => error_response(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_referenced_by_children_lists_ids() {
        let err = ProcurementError::ReferencedByChildren {
            parent: "VEN00001".into(),
            children: vec!["ANI0000001".into(), "ANI0000002".into()],
        };
        let (status, body) = error_response(&err);
        assert_eq!(status, 409);
        assert_eq!(body["kind"], "referenced_by_children");
        assert_eq!(body["details"]["children"][1], "ANI0000002");
    }

    #[test]
    fn test_validation_carries_field() {
        let err = ProcurementError::validation("incharges[0].phone", "must be a 10-digit mobile number");
        let report = ErrorReport::from(&err);
        assert_eq!(report.status, 422);
        assert_eq!(report.field.as_deref(), Some("incharges[0].phone"));
        assert!(report.details.is_none());
    }

    #[test]
    fn test_internal_errors_hide_detail() {
        let err = ProcurementError::Internal("database is locked".into());
        let (status, body) = error_response(&err);
        assert_eq!(status, 500);
        assert_eq!(body["message"], "Internal error");
    }

    #[test]
    fn test_result_wrappers() {
        let created: Result<_, ProcurementError> = Ok(json!({ "externalId": "VEN00001" }));
        assert_eq!(from_create_result(&created).0, CREATED);

        let missing: Result<(), ProcurementError> = Err(ProcurementError::not_found("Vendor", "VEN00009"));
        let (status, body) = from_delete_result(&missing);
        assert_eq!(status, 404);
        assert_eq!(body["message"], "Vendor not found: VEN00009");
    }
}
