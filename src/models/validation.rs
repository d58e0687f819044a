//! Format rules for ISBNs and phone numbers

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{AppError, AppResult};

static PHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+?[\d\s\-()]{10,}$").expect("phone regex is valid"));

/// Strip separators from an ISBN; `None` unless 10 or 13 digits remain
pub fn normalize_isbn(isbn: &str) -> Option<String> {
    let digits: String = isbn.chars().filter(|c| *c != '-' && *c != ' ').collect();
    if (digits.len() == 10 || digits.len() == 13) && digits.chars().all(|c| c.is_ascii_digit()) {
        Some(digits)
    } else {
        None
    }
}

/// Validate an optional ISBN, returning its normalized form. Blank means absent.
pub fn check_isbn(isbn: Option<&str>) -> AppResult<Option<String>> {
    match isbn.map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => normalize_isbn(raw)
            .map(Some)
            .ok_or_else(|| AppError::Validation(format!("Invalid ISBN format: {}", raw))),
    }
}

pub fn is_valid_phone(phone: &str) -> bool {
    PHONE_RE.is_match(phone)
}

/// Validate an optional phone number. Blank means absent.
pub fn check_phone(phone: Option<&str>) -> AppResult<Option<String>> {
    match phone.map(str::trim) {
        None | Some("") => Ok(None),
        Some(p) if is_valid_phone(p) => Ok(Some(p.to_string())),
        Some(p) => Err(AppError::Validation(format!("Invalid phone format: {}", p))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isbn_accepts_10_and_13_digits_with_separators() {
        assert_eq!(normalize_isbn("978-0-06-112008-4").as_deref(), Some("9780061120084"));
        assert_eq!(normalize_isbn("0 452 28423 6").as_deref(), Some("0452284236"));
    }

    #[test]
    fn isbn_rejects_other_lengths_and_letters() {
        assert!(normalize_isbn("12345").is_none());
        assert!(normalize_isbn("03064061X2").is_none());
        assert!(check_isbn(Some("abc")).is_err());
        assert_eq!(check_isbn(Some("  ")).unwrap(), None);
    }

    #[test]
    fn phone_rules() {
        assert!(is_valid_phone("+1 (555) 123-4567"));
        assert!(is_valid_phone("0123456789"));
        assert!(!is_valid_phone("12345"));
        assert!(!is_valid_phone("call me maybe"));
        assert_eq!(check_phone(None).unwrap(), None);
    }
}
