//! Recipient number validation.

use std::sync::LazyLock;

use regex::Regex;

/// Digits with country code, no leading zero, 2–15 digits total.
static PHONE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[1-9]\d{1,14}$").unwrap_or_else(|e| panic!("phone regex: {e}"))
});

/// Whether `number` is a dialable recipient.
#[must_use]
pub fn is_valid_number(number: &str) -> bool {
    PHONE_RE.is_match(number)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_country_code_numbers() {
        assert!(is_valid_number("14155550100"));
        assert!(is_valid_number("5215512345678"));
        assert!(is_valid_number("49"));
    }

    #[test]
    fn rejects_malformed_numbers() {
        assert!(!is_valid_number(""));
        assert!(!is_valid_number("1"));
        assert!(!is_valid_number("0123456789"));
        assert!(!is_valid_number("+14155550100"));
        assert!(!is_valid_number("415-555-0100"));
        assert!(!is_valid_number("1234567890123456"));
    }
}
