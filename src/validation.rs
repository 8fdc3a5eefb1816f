//! Field validation shared by every workflow
//!
//! Patterns follow Indian registration formats: ten-digit mobile numbers,
//! twelve-digit Aadhaar numbers, GSTIN, PAN and IFSC codes.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::ProcurementError;

/// Known field formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    PersonName,
    Phone,
    NationalId,
    Email,
    Gst,
    Pan,
    Ifsc,
    BankAccount,
}

impl Pattern {
    fn source(&self) -> &'static str {
        match self {
            Self::PersonName => r"^[A-Za-z][A-Za-z .'-]{1,99}$",
            Self::Phone => r"^[6-9][0-9]{9}$",
            Self::NationalId => r"^[2-9][0-9]{11}$",
            Self::Email => r"^[^\s@]+@[^\s@]+\.[^\s@]+$",
            Self::Gst => r"^[0-9]{2}[A-Z]{5}[0-9]{4}[A-Z][1-9A-Z]Z[0-9A-Z]$",
            Self::Pan => r"^[A-Z]{5}[0-9]{4}[A-Z]$",
            Self::Ifsc => r"^[A-Z]{4}0[A-Z0-9]{6}$",
            Self::BankAccount => r"^[0-9]{9,18}$",
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            Self::PersonName => "must start with a letter and contain only letters, spaces, dots, apostrophes or hyphens",
            Self::Phone => "must be a 10-digit mobile number starting with 6-9",
            Self::NationalId => "must be a 12-digit national ID not starting with 0 or 1",
            Self::Email => "must be a valid email address",
            Self::Gst => "must be a 15-character GSTIN",
            Self::Pan => "must be a 10-character PAN",
            Self::Ifsc => "must be an 11-character IFSC code",
            Self::BankAccount => "must be 9 to 18 digits",
        }
    }

    fn regex(&self) -> Option<&'static Regex> {
        static CACHE: OnceLock<Vec<(Pattern, Regex)>> = OnceLock::new();
        let compiled = CACHE.get_or_init(|| {
            ALL_PATTERNS
                .iter()
                .map(|p| (*p, Regex::new(p.source()).expect("static pattern compiles")))
                .collect()
        });
        compiled.iter().find(|(p, _)| p == self).map(|(_, re)| re)
    }

    /// A pattern missing from the compiled set never matches
    pub fn matches(&self, value: &str) -> bool {
        self.regex().is_some_and(|re| re.is_match(value))
    }
}

const ALL_PATTERNS: [Pattern; 8] = [
    Pattern::PersonName,
    Pattern::Phone,
    Pattern::NationalId,
    Pattern::Email,
    Pattern::Gst,
    Pattern::Pan,
    Pattern::Ifsc,
    Pattern::BankAccount,
];

/// Trim a submitted value; blank means "not provided"
pub fn normalize(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Trimmed, upper-cased form for registration codes (GST, PAN, IFSC)
pub fn normalize_code(value: Option<&str>) -> Option<String> {
    normalize(value).map(|v| v.to_uppercase())
}

/// Trimmed, lower-cased email
pub fn normalize_email(value: Option<&str>) -> Option<String> {
    normalize(value).map(|v| v.to_lowercase())
}

/// Require a non-blank value
pub fn require(field: &str, value: Option<&str>) -> Result<String, ProcurementError> {
    normalize(value).ok_or_else(|| ProcurementError::validation(field, "is required"))
}

/// Check an optional value against a pattern
pub fn check(field: &str, value: Option<&str>, pattern: Pattern) -> Result<(), ProcurementError> {
    match value {
        Some(v) if !pattern.matches(v) => Err(ProcurementError::validation(field, pattern.describe())),
        _ => Ok(()),
    }
}

/// Require a value and check it against a pattern
pub fn require_pattern(field: &str, value: Option<&str>, pattern: Pattern) -> Result<String, ProcurementError> {
    let value = require(field, value)?;
    check(field, Some(&value), pattern)?;
    Ok(value)
}

/// Check membership in a status vocabulary
pub fn check_one_of(field: &str, value: &str, allowed: &[&str]) -> Result<(), ProcurementError> {
    if allowed.contains(&value) {
        Ok(())
    } else {
        Err(ProcurementError::validation(
            field,
            format!("must be one of: {}", allowed.join(", ")),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phone_pattern() {
        assert!(Pattern::Phone.matches("9876543210"));
        assert!(!Pattern::Phone.matches("1234567890"));
        assert!(!Pattern::Phone.matches("98765"));
    }

    #[test]
    fn test_national_id_pattern() {
        assert!(Pattern::NationalId.matches("234567890123"));
        assert!(!Pattern::NationalId.matches("123456789012"));
    }

    #[test]
    fn test_registration_codes() {
        assert!(Pattern::Gst.matches("27ABCDE1234F1Z5"));
        assert!(Pattern::Pan.matches("ABCDE1234F"));
        assert!(Pattern::Ifsc.matches("SBIN0001234"));
        assert!(!Pattern::Ifsc.matches("SBIN1001234"));
    }

    #[test]
    fn test_person_name() {
        assert!(Pattern::PersonName.matches("Ravi K. D'Souza"));
        assert!(!Pattern::PersonName.matches("9Ravi"));
        assert!(!Pattern::PersonName.matches("R"));
    }

    #[test]
    fn test_blank_is_not_provided() {
        assert_eq!(normalize(Some("   ")), None);
        assert_eq!(normalize_code(Some(" abcde1234f ")), Some("ABCDE1234F".into()));
        assert!(require("name", Some("")).is_err());
        assert!(check("phone", None, Pattern::Phone).is_ok());
    }

    #[test]
    fn test_validation_error_names_field() {
        let err = require_pattern("incharges[0].phone", Some("12"), Pattern::Phone).unwrap_err();
        assert_eq!(err.field(), Some("incharges[0].phone"));
    }

    #[test]
    fn test_every_pattern_resolves_to_its_own_regex() {
        for pattern in ALL_PATTERNS {
            let re = pattern.regex().unwrap();
            assert_eq!(re.as_str(), pattern.source(), "{pattern:?}");
        }
    }
}
