//! Shared row helpers and status vocabularies

use tracing::warn;

/// Current UTC timestamp in the format stored in every `*_at` column
pub fn current_timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Decode a JSON array of stored file paths.
///
/// Columns written by older tooling may hold garbage; that decodes to an
/// empty list with a warning rather than failing the read.
pub fn decode_paths(raw: &str, column: &str) -> Vec<String> {
    match serde_json::from_str::<Vec<String>>(raw) {
        Ok(paths) => paths,
        Err(e) => {
            warn!(column = column, error = %e, "Unreadable file path list, treating as empty");
            Vec::new()
        }
    }
}

/// Encode stored file paths as a JSON array
pub fn encode_paths(paths: &[String]) -> String {
    serde_json::to_string(paths).unwrap_or_else(|_| "[]".to_string())
}

// ============================================================================
// Status Vocabularies
// ============================================================================

pub mod vendor_status {
    pub const ACTIVE: &str = "active";
    pub const INACTIVE: &str = "inactive";

    pub const ALL: [&str; 2] = [ACTIVE, INACTIVE];

    pub fn is_valid(status: &str) -> bool {
        ALL.contains(&status)
    }
}

pub mod station_status {
    pub const ACTIVE: &str = "active";
    pub const INACTIVE: &str = "inactive";
    pub const MAINTENANCE: &str = "maintenance";

    pub const ALL: [&str; 3] = [ACTIVE, INACTIVE, MAINTENANCE];

    pub fn is_valid(status: &str) -> bool {
        ALL.contains(&status)
    }
}

pub mod payment_for {
    pub const VENDOR: &str = "vendor";
    pub const TRANSPORT: &str = "transport";

    pub const ALL: [&str; 2] = [VENDOR, TRANSPORT];

    pub fn is_valid(kind: &str) -> bool {
        ALL.contains(&kind)
    }
}

pub mod payment_status {
    pub const PENDING: &str = "pending";
    pub const COMPLETED: &str = "completed";
    pub const FAILED: &str = "failed";

    pub const ALL: [&str; 3] = [PENDING, COMPLETED, FAILED];

    pub fn is_valid(status: &str) -> bool {
        ALL.contains(&status)
    }
}

pub mod animal_gender {
    pub const MALE: &str = "male";
    pub const FEMALE: &str = "female";

    pub const ALL: [&str; 2] = [MALE, FEMALE];

    pub fn is_valid(gender: &str) -> bool {
        ALL.contains(&gender)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_paths_falls_back_to_empty() {
        assert_eq!(decode_paths(r#"["a.jpg","b.jpg"]"#, "media_paths").len(), 2);
        assert!(decode_paths("not json", "media_paths").is_empty());
    }

    #[test]
    fn test_status_vocabularies() {
        assert!(station_status::is_valid("maintenance"));
        assert!(!station_status::is_valid("closed"));
        assert!(payment_for::is_valid("transport"));
        assert!(!vendor_status::is_valid("banned"));
    }
}
