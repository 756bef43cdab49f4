//! Size expression parsing
//!
//! Converts human-readable sizes such as `"50 MiB"`, `"8MB"` or `"2 gigabytes"`
//! into exact byte counts.
//!
//! # Grammar
//!
//! A size expression is a whole number optionally followed by whitespace and a
//! unit token. Both decimal (`kB`, `MB`, `megabyte`, ...) and binary (`KiB`,
//! `MiB`, `mebibyte`, ...) units are recognised, up to yotta scale. A bare
//! number is scaled by the default multiplier (`MiB` unless told otherwise).
//!
//! # Example
//!
//! ```
//! use s3_mp_upload::size::parse_size;
//!
//! assert_eq!(parse_size("50 MiB", "byte", "MiB").unwrap(), 50 * 1024 * 1024);
//! assert_eq!(parse_size("50MB", "byte", "MiB").unwrap(), 50_000_000);
//! assert_eq!(parse_size("50", "byte", "MiB").unwrap(), 50 * 1024 * 1024);
//! assert!(parse_size("50.5", "byte", "MiB").is_err());
//! ```

use lazy_static::lazy_static;
use regex_lite::Regex;
use thiserror::Error;

/// Unit applied to a bare count
pub const DEFAULT_UNIT: &str = "byte";

/// Multiplier applied to a bare count
pub const DEFAULT_MULTIPLIER: &str = "MiB";

/// Recognised unit tokens and their multipliers.
///
/// Order matters for the case-insensitive fallback: the first entry whose
/// name matches wins, so `"kb"` resolves to `kB` (1000) rather than `KB`.
pub const UNIT_MULTIPLIERS: &[(&str, u128)] = &[
    ("byte", 1),
    ("kilobyte", 1000),
    ("kB", 1000),
    ("kibibyte", 1024),
    ("KiB", 1024),
    ("KB", 1024),
    ("megabyte", 1000u128.pow(2)),
    ("MB", 1000u128.pow(2)),
    ("mebibyte", 1024u128.pow(2)),
    ("MiB", 1024u128.pow(2)),
    ("gigabyte", 1000u128.pow(3)),
    ("GB", 1000u128.pow(3)),
    ("gibibyte", 1024u128.pow(3)),
    ("GiB", 1024u128.pow(3)),
    ("terabyte", 1000u128.pow(4)),
    ("TB", 1000u128.pow(4)),
    ("tebibyte", 1024u128.pow(4)),
    ("TiB", 1024u128.pow(4)),
    ("petabyte", 1000u128.pow(5)),
    ("PB", 1000u128.pow(5)),
    ("pebibyte", 1024u128.pow(5)),
    ("PiB", 1024u128.pow(5)),
    ("exabyte", 1000u128.pow(6)),
    ("EB", 1000u128.pow(6)),
    ("exbibyte", 1024u128.pow(6)),
    ("EiB", 1024u128.pow(6)),
    ("zettabyte", 1000u128.pow(7)),
    ("ZB", 1000u128.pow(7)),
    ("zebibyte", 1024u128.pow(7)),
    ("ZiB", 1024u128.pow(7)),
    ("yottabyte", 1000u128.pow(8)),
    ("YB", 1000u128.pow(8)),
    ("yobibyte", 1024u128.pow(8)),
    ("YiB", 1024u128.pow(8)),
];

lazy_static! {
    static ref SIZE_EXPRESSION: Regex =
        Regex::new(r"^(\d+)\s*(\S+)?").expect("size expression regex is valid");
}

/// Size parsing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SizeError {
    #[error("Split string must use whole numbers: {0}")]
    InvalidFormat(String),

    #[error("Could not parse split string: {0}")]
    Unparseable(String),

    #[error("Invalid units specified in split string: {0}")]
    InvalidUnits(String),

    #[error("Size does not fit in a byte count: {0}")]
    Overflow(String),
}

/// Parse a size expression into a byte count.
///
/// `default_unit` scales every result (normally `"byte"`), `default_multiplier`
/// is used when the expression carries no unit token.
pub fn parse_size(
    expression: &str,
    default_unit: &str,
    default_multiplier: &str,
) -> Result<u128, SizeError> {
    let unit = lookup_unit(default_unit)
        .ok_or_else(|| SizeError::InvalidUnits(default_unit.to_string()))?;

    if !expression.is_empty() && expression.bytes().all(|b| b.is_ascii_digit()) {
        let multiplier = lookup_unit(default_multiplier)
            .ok_or_else(|| SizeError::InvalidUnits(default_multiplier.to_string()))?;
        return scale(expression, expression, unit, multiplier);
    }

    if expression.contains('.') {
        tracing::error!(expression = %expression, "Fractional size rejected");
        return Err(SizeError::InvalidFormat(expression.to_string()));
    }

    let captures = SIZE_EXPRESSION.captures(expression).ok_or_else(|| {
        tracing::error!(expression = %expression, "Could not parse size");
        SizeError::Unparseable(expression.to_string())
    })?;

    let count = captures.get(1).map_or("", |m| m.as_str());
    let token = captures.get(2).map_or(default_multiplier, |m| m.as_str());

    let multiplier = lookup_unit(singular(token)).ok_or_else(|| {
        tracing::error!(expression = %expression, unit = %token, "Invalid size units");
        SizeError::InvalidUnits(expression.to_string())
    })?;

    scale(expression, count, unit, multiplier)
}

/// Parse a size expression with the default unit and multiplier and narrow
/// it to a 64-bit byte count.
pub fn parse_byte_count(expression: &str) -> Result<u64, SizeError> {
    let bytes = parse_size(expression, DEFAULT_UNIT, DEFAULT_MULTIPLIER)?;
    u64::try_from(bytes).map_err(|_| SizeError::Overflow(expression.to_string()))
}

/// Names of every recognised unit, sorted, for help output
pub fn unit_names() -> Vec<&'static str> {
    let mut names: Vec<_> = UNIT_MULTIPLIERS.iter().map(|(name, _)| *name).collect();
    names.sort_unstable();
    names
}

/// Case-sensitive lookup first, then the first case-insensitive match.
fn lookup_unit(token: &str) -> Option<u128> {
    UNIT_MULTIPLIERS
        .iter()
        .find(|(name, _)| *name == token)
        .or_else(|| {
            UNIT_MULTIPLIERS
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(token))
        })
        .map(|(_, multiplier)| *multiplier)
}

/// `"megabytes"` -> `"megabyte"`
fn singular(token: &str) -> &str {
    match token.len().checked_sub(5).and_then(|start| token.get(start..)) {
        Some(suffix) if suffix.eq_ignore_ascii_case("bytes") => &token[..token.len() - 1],
        _ => token,
    }
}

fn scale(expression: &str, count: &str, unit: u128, multiplier: u128) -> Result<u128, SizeError> {
    let overflow = || SizeError::Overflow(expression.to_string());
    let count: u128 = count.parse().map_err(|_| overflow())?;
    multiplier
        .checked_mul(count)
        .and_then(|bytes| bytes.checked_mul(unit))
        .ok_or_else(overflow)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u128 = 1024 * 1024;

    fn parse(expression: &str) -> Result<u128, SizeError> {
        parse_size(expression, DEFAULT_UNIT, DEFAULT_MULTIPLIER)
    }

    #[test]
    fn test_binary_and_decimal_units() {
        assert_eq!(parse("50 MiB").unwrap(), 50 * MIB);
        assert_eq!(parse("50MB").unwrap(), 50 * 1000 * 1000);
        assert_eq!(parse("3 KiB").unwrap(), 3 * 1024);
        assert_eq!(parse("3 kB").unwrap(), 3000);
        assert_eq!(parse("1 TiB").unwrap(), 1024u128.pow(4));
    }

    #[test]
    fn test_bare_number_uses_default_multiplier() {
        assert_eq!(parse("50").unwrap(), 50 * MIB);
        assert_eq!(parse_size("7", "byte", "KB").unwrap(), 7 * 1024);
    }

    #[test]
    fn test_trailing_whitespace_without_unit() {
        assert_eq!(parse("12 ").unwrap(), 12 * MIB);
    }

    #[test]
    fn test_fractional_count_rejected() {
        assert_eq!(
            parse("50.5"),
            Err(SizeError::InvalidFormat("50.5".to_string()))
        );
        assert!(matches!(parse("1.5 GiB"), Err(SizeError::InvalidFormat(_))));
    }

    #[test]
    fn test_unparseable_expressions() {
        assert!(matches!(parse(""), Err(SizeError::Unparseable(_))));
        assert!(matches!(parse("MiB"), Err(SizeError::Unparseable(_))));
        assert!(matches!(parse("-5 MiB"), Err(SizeError::Unparseable(_))));
    }

    #[test]
    fn test_invalid_units() {
        assert!(matches!(parse("5 parsecs"), Err(SizeError::InvalidUnits(_))));
        assert!(matches!(
            parse_size("5", "byte", "nope"),
            Err(SizeError::InvalidUnits(_))
        ));
    }

    #[test]
    fn test_plural_and_long_names() {
        assert_eq!(parse("2 megabytes").unwrap(), 2_000_000);
        assert_eq!(parse("2 mebibytes").unwrap(), 2 * MIB);
        assert_eq!(parse("1 byte").unwrap(), 1);
        assert_eq!(parse("10 bytes").unwrap(), 10);
    }

    #[test]
    fn test_case_insensitive_fallback() {
        // exact match wins: KB is binary
        assert_eq!(parse("1 KB").unwrap(), 1024);
        // first case-insensitive match: kB is decimal
        assert_eq!(parse("1 kb").unwrap(), 1000);
        assert_eq!(parse("1 mib").unwrap(), MIB);
        assert_eq!(parse("1 GIGABYTE").unwrap(), 1000u128.pow(3));
    }

    #[test]
    fn test_yotta_scale_does_not_truncate() {
        assert_eq!(parse("1 YiB").unwrap(), 1u128 << 80);
        assert_eq!(parse("3 YB").unwrap(), 3 * 10u128.pow(24));
    }

    #[test]
    fn test_overflow_is_reported() {
        let huge = format!("{} YiB", u128::MAX);
        assert!(matches!(parse(&huge), Err(SizeError::Overflow(_))));
        assert!(matches!(
            parse_byte_count("1 YiB"),
            Err(SizeError::Overflow(_))
        ));
        assert_eq!(parse_byte_count("1 EiB").unwrap(), 1u64 << 60);
    }

    #[test]
    fn test_unit_names_sorted() {
        let names = unit_names();
        assert_eq!(names.len(), UNIT_MULTIPLIERS.len());
        assert!(names.windows(2).all(|w| w[0] <= w[1]));
    }
}
