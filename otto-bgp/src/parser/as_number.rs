//! AS number validation shared by the parser, the bgpq4 wrapper, and the
//! guardrail engine. Reserved ranges follow RFC 5398 / RFC 6996 / RFC 7300.

use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsNumberError {
    #[error("not an integer")]
    NotAnInteger,
    #[error("negative AS numbers are not valid")]
    Negative,
    #[error("AS number out of range [0, 2^32-1]")]
    OutOfRange,
}

/// Accepts a strict integer in `[0, 2^32-1]`, optionally prefixed with
/// `AS`/`as` (the form bgpq4 accepts). Rejects floats, negatives,
/// and any other non-digit token.
pub fn validate_as_number(token: &str) -> Result<u32, AsNumberError> {
    let trimmed = token.trim();
    let digits = trimmed
        .strip_prefix("AS")
        .or_else(|| trimmed.strip_prefix("as"))
        .unwrap_or(trimmed);

    if digits.is_empty() {
        return Err(AsNumberError::NotAnInteger);
    }
    if let Some(rest) = digits.strip_prefix('-') {
        if rest.chars().all(|c| c.is_ascii_digit()) && !rest.is_empty() {
            return Err(AsNumberError::Negative);
        }
        return Err(AsNumberError::NotAnInteger);
    }
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(AsNumberError::NotAnInteger);
    }

    digits
        .parse::<u64>()
        .map_err(|_| AsNumberError::OutOfRange)
        .and_then(|n| {
            if n <= u32::MAX as u64 {
                Ok(n as u32)
            } else {
                Err(AsNumberError::OutOfRange)
            }
        })
}

/// Reserved/special-use ranges that should be accepted but flagged with a
/// warning rather than rejected outright.
pub fn is_reserved_range(asn: u32) -> bool {
    matches!(asn, 23456)
        || (64496..=64511).contains(&asn)
        || (64512..=65534).contains(&asn)
        || asn == 65535
        || (65536..=65551).contains(&asn)
        || (4_200_000_000..=4_294_967_294).contains(&asn)
        || asn == 4_294_967_295
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_digits() {
        assert_eq!(validate_as_number("13335"), Ok(13335));
    }

    #[test]
    fn accepts_as_prefix() {
        assert_eq!(validate_as_number("AS13335"), Ok(13335));
        assert_eq!(validate_as_number("as13335"), Ok(13335));
    }

    #[test]
    fn accepts_boundary_values() {
        assert_eq!(validate_as_number("0"), Ok(0));
        assert_eq!(validate_as_number("23456"), Ok(23456));
        assert_eq!(validate_as_number("65535"), Ok(65535));
        assert_eq!(validate_as_number("65536"), Ok(65536));
        assert_eq!(validate_as_number("4294967295"), Ok(4294967295));
    }

    #[test]
    fn rejects_negative() {
        assert_eq!(validate_as_number("-1"), Err(AsNumberError::Negative));
    }

    #[test]
    fn rejects_overflow() {
        assert_eq!(validate_as_number("4294967296"), Err(AsNumberError::OutOfRange));
    }

    #[test]
    fn rejects_non_numeric() {
        assert_eq!(validate_as_number("AS_"), Err(AsNumberError::NotAnInteger));
        assert_eq!(validate_as_number("13.5"), Err(AsNumberError::NotAnInteger));
        assert_eq!(validate_as_number("abc"), Err(AsNumberError::NotAnInteger));
    }

    #[test]
    fn reserved_ranges() {
        assert!(is_reserved_range(23456));
        assert!(is_reserved_range(64500));
        assert!(is_reserved_range(65535));
        assert!(is_reserved_range(65540));
        assert!(is_reserved_range(4_294_967_295));
        assert!(!is_reserved_range(13335));
    }
}
