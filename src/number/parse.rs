//! Numeric literal parsing.
//!
//! The reader strips radix prefixes and signs before calling in; the
//! parser receives the bare digits, the radix, the sign and the
//! requested kind. Malformed input yields `None`.

use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::Zero;

use super::{demote_bigint, demote_rational, make_int};
use crate::consts::FIXNUM_BITS;
use crate::value::Value;

/// Numeric kind requested by the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseKind {
    /// A plain integer in the given radix.
    Integer,
    /// A `num/den` ratio in the given radix.
    Rational,
    /// A radix-10 floating point literal.
    Float,
}

fn digit_value(c: u8, radix: u32) -> Option<i64> {
    let v = (c as char).to_digit(radix)?;
    Some(v as i64)
}

/// Upper bound on the bit length of `len` digits in `radix`.
fn bits_for(len: usize, radix: u32) -> Option<usize> {
    match radix {
        2 => Some(len),
        8 => Some(len * 3),
        10 => Some(len * 33 / 10),
        16 => Some(len * 4),
        _ => None,
    }
}

fn parse_integer(buf: &[u8], radix: u32, sign: i64) -> Option<Value> {
    if buf.is_empty() {
        return None;
    }
    let bits = bits_for(buf.len(), radix)?;
    if bits < FIXNUM_BITS as usize {
        // Small literals accumulate directly in the fixnum range.
        let mut value: i64 = 0;
        for &c in buf {
            value = value * radix as i64 + digit_value(c, radix)?;
        }
        Some(make_int(value * sign))
    } else {
        let z = BigInt::parse_bytes(buf, radix)?;
        let z = if sign < 0 { -z } else { z };
        Some(demote_bigint(z))
    }
}

fn parse_rational(buf: &[u8], radix: u32, sign: i64) -> Option<Value> {
    let slash = buf.iter().position(|&c| c == b'/')?;
    let (num, den) = (&buf[..slash], &buf[slash + 1..]);
    if num.is_empty() || den.is_empty() {
        return None;
    }
    if !num.iter().chain(den).all(|&c| (c as char).is_digit(radix)) {
        return None;
    }
    let num = BigInt::parse_bytes(num, radix)?;
    let den = BigInt::parse_bytes(den, radix)?;
    if den.is_zero() {
        return None;
    }
    let q = BigRational::new(num, den);
    let q = if sign < 0 { -q } else { q };
    Some(demote_rational(q))
}

fn parse_float(buf: &[u8], radix: u32, sign: i64) -> Option<Value> {
    if radix != 10 {
        return None;
    }
    let text = std::str::from_utf8(buf).ok()?;
    // Reject forms Rust accepts but the literal grammar does not.
    if text.is_empty() || text.starts_with(['+', '-']) || text.contains(['i', 'n', 'N']) {
        return None;
    }
    let d: f64 = text.parse().ok()?;
    Some(Value::Float(d * sign as f64))
}

/// Parse a numeric literal. `radix` must be one of 2, 8, 10 or 16;
/// `sign` is ±1. Returns `None` on malformed input.
pub fn parse_number(buf: &[u8], radix: u32, sign: i64, kind: ParseKind) -> Option<Value> {
    if !matches!(radix, 2 | 8 | 10 | 16) || (sign != 1 && sign != -1) {
        return None;
    }
    match kind {
        ParseKind::Integer => {
            if !buf.iter().all(|&c| (c as char).is_digit(radix)) {
                return None;
            }
            parse_integer(buf, radix, sign)
        }
        ParseKind::Rational => parse_rational(buf, radix, sign),
        ParseKind::Float => parse_float(buf, radix, sign),
    }
}

/// Convenience wrapper over [`parse_number`] for string input.
pub fn parse_number_str(s: &str, radix: u32, sign: i64, kind: ParseKind) -> Option<Value> {
    parse_number(s.as_bytes(), radix, sign, kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_small_integers() {
        assert_eq!(
            parse_number_str("42", 10, 1, ParseKind::Integer),
            Some(Value::Fixnum(42))
        );
        assert_eq!(
            parse_number_str("ff", 16, 1, ParseKind::Integer),
            Some(Value::Fixnum(255))
        );
        assert_eq!(
            parse_number_str("101", 2, -1, ParseKind::Integer),
            Some(Value::Fixnum(-5))
        );
    }

    #[test]
    fn parses_big_integers() {
        let v = parse_number_str("1000000000000000000000000", 10, 1, ParseKind::Integer).unwrap();
        assert!(matches!(v, Value::Bignum(_)));
    }

    #[test]
    fn parses_rationals_canonically() {
        let v = parse_number_str("2/4", 10, 1, ParseKind::Rational).unwrap();
        assert!(matches!(v, Value::Rational(_)));
        // denominator 1 demotes
        assert_eq!(
            parse_number_str("4/2", 10, 1, ParseKind::Rational),
            Some(Value::Fixnum(2))
        );
        assert_eq!(parse_number_str("1/0", 10, 1, ParseKind::Rational), None);
    }

    #[test]
    fn parses_floats_in_radix_ten_only() {
        assert_eq!(
            parse_number_str("1.5", 10, 1, ParseKind::Float),
            Some(Value::Float(1.5))
        );
        assert_eq!(
            parse_number_str("2.5e3", 10, -1, ParseKind::Float),
            Some(Value::Float(-2500.0))
        );
        assert_eq!(parse_number_str("1.5", 16, 1, ParseKind::Float), None);
    }

    #[test]
    fn rejects_malformed_input() {
        assert_eq!(parse_number_str("12x", 10, 1, ParseKind::Integer), None);
        assert_eq!(parse_number_str("", 10, 1, ParseKind::Integer), None);
        assert_eq!(parse_number_str("1//2", 10, 1, ParseKind::Rational), None);
        assert_eq!(parse_number_str("inf", 10, 1, ParseKind::Float), None);
    }
}
