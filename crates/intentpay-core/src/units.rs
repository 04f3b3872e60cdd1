//! Decimal token amounts <-> raw integer units.

use crate::error::PlanError;

/// Parse a decimal string such as `"1.5"` into raw units with `decimals` places.
///
/// Rejects signs, exponents, empty input and more fractional digits than `decimals`.
pub fn parse_units(amount: &str, decimals: u8) -> Result<u128, PlanError> {
    let trimmed = amount.trim();
    let invalid = |reason: &str| PlanError::Ledger(format!("invalid amount '{amount}': {reason}"));

    if trimmed.is_empty() {
        return Err(invalid("empty"));
    }

    if !is_plain_decimal(trimmed) {
        return Err(invalid("not a plain decimal"));
    }
    let (whole, fraction) = trimmed.split_once('.').unwrap_or((trimmed, ""));
    if fraction.len() > decimals as usize {
        return Err(invalid("too many fractional digits"));
    }

    let scale = 10u128
        .checked_pow(decimals as u32)
        .ok_or_else(|| invalid("decimals out of range"))?;
    let whole_units = if whole.is_empty() {
        0
    } else {
        whole
            .parse::<u128>()
            .map_err(|_| invalid("whole part overflow"))?
    };

    let mut padded = fraction.to_string();
    while padded.len() < decimals as usize {
        padded.push('0');
    }
    let fraction_units = if padded.is_empty() {
        0
    } else {
        padded
            .parse::<u128>()
            .map_err(|_| invalid("fraction overflow"))?
    };

    whole_units
        .checked_mul(scale)
        .and_then(|units| units.checked_add(fraction_units))
        .ok_or_else(|| invalid("overflow"))
}

/// Format raw units as a decimal string without trailing zeros.
pub fn format_units(raw: u128, decimals: u8) -> String {
    if decimals == 0 {
        return raw.to_string();
    }
    let digits = format!("{:0>width$}", raw, width = decimals as usize + 1);
    let (whole, fraction) = digits.split_at(digits.len() - decimals as usize);
    let fraction = fraction.trim_end_matches('0');
    if fraction.is_empty() {
        whole.to_string()
    } else {
        format!("{whole}.{fraction}")
    }
}

/// Most fractional digits any supported token carries.
pub const MAX_FRACTION_DIGITS: usize = 18;

/// `digits[.digits]` with at least one digit and no sign or exponent.
pub fn is_plain_decimal(raw: &str) -> bool {
    let (whole, fraction) = raw.split_once('.').unwrap_or((raw, ""));
    !(whole.is_empty() && fraction.is_empty())
        && whole.chars().all(|c| c.is_ascii_digit())
        && fraction.chars().all(|c| c.is_ascii_digit())
}

/// Lenient numeric parse for state values and balances read back from the ledger.
pub fn parse_amount(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|value| value.is_finite())
}

/// Transfer amount in the form [`parse_units`] accepts, with at most
/// [`MAX_FRACTION_DIGITS`] fractional digits.
pub fn parse_transfer_amount(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if !is_plain_decimal(trimmed) {
        return None;
    }
    let fraction_digits = trimmed.split_once('.').map_or(0, |(_, fraction)| fraction.len());
    if fraction_digits > MAX_FRACTION_DIGITS {
        return None;
    }
    parse_amount(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_whole_and_fractional_amounts() {
        assert_eq!(parse_units("5", 18).unwrap(), 5_000_000_000_000_000_000);
        assert_eq!(parse_units("0.5", 6).unwrap(), 500_000);
        assert_eq!(parse_units(".25", 2).unwrap(), 25);
        assert_eq!(parse_units("12.", 2).unwrap(), 1200);
    }

    #[test]
    fn rejects_malformed_amounts() {
        assert!(parse_units("", 6).is_err());
        assert!(parse_units("-1", 6).is_err());
        assert!(parse_units("1e5", 6).is_err());
        assert!(parse_units("1.1234567", 6).is_err());
        assert!(parse_units("abc", 6).is_err());
    }

    #[test]
    fn transfer_amounts_must_be_plain_decimals() {
        assert_eq!(parse_transfer_amount("5"), Some(5.0));
        assert_eq!(parse_transfer_amount(" 0.25 "), Some(0.25));
        assert_eq!(parse_transfer_amount("1.000000000000000001"), Some(1.0));
        assert_eq!(parse_transfer_amount("5e0"), None);
        assert_eq!(parse_transfer_amount("+5"), None);
        assert_eq!(parse_transfer_amount("1e3"), None);
        assert_eq!(parse_transfer_amount("-1"), None);
        assert_eq!(parse_transfer_amount("."), None);
        assert_eq!(parse_transfer_amount("5.0000000000000000001"), None);
        assert!(parse_units("+5", 18).is_err());
    }

    #[test]
    fn formats_without_trailing_zeros() {
        assert_eq!(format_units(5_000_000, 6), "5");
        assert_eq!(format_units(1_500_000, 6), "1.5");
        assert_eq!(format_units(25, 6), "0.000025");
        assert_eq!(format_units(42, 0), "42");
    }
}
