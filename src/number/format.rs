//! Numeric printing.
//!
//! Exact integers print in any radix from 2 through 36; rationals as
//! `num/den` with the sign on the numerator; floats with a precision
//! argument and a guaranteed `.` or `e` so the output reads back as a
//! float.

use num_bigint::BigInt;

use crate::consts::{FLOAT_PRINT_PRECISION, MAX_PRINT_RADIX};
use crate::value::Value;

fn bigint_to_string(z: &BigInt, radix: u32) -> String {
    z.to_str_radix(radix)
}

/// Render a float. `None` precision means the default of
/// [`FLOAT_PRINT_PRECISION`] significant digits, rendered as the
/// shortest digit string that reads back to the same double.
pub fn float_to_string(x: f64, prec: Option<usize>) -> String {
    let mut out = match prec {
        None => format!("{}", x),
        Some(p) if p >= FLOAT_PRINT_PRECISION => format!("{}", x),
        Some(p) => format!("{:.*}", p, x),
    };
    if !out.contains(['.', 'e', 'E']) {
        out.push('.');
    }
    out
}

/// Render a numeric value in `radix` (2..=36) with float precision
/// `prec`. `None` for non-numbers, unsupported radices, or float
/// printing in a radix other than ten.
pub fn print_number(v: &Value, radix: u32, prec: Option<usize>) -> Option<String> {
    if !(2..=MAX_PRINT_RADIX).contains(&radix) {
        return None;
    }
    match v {
        Value::Fixnum(n) => {
            if radix == 10 {
                Some(format!("{}", n))
            } else {
                Some(bigint_to_string(&BigInt::from(*n), radix))
            }
        }
        Value::Bignum(z) => Some(bigint_to_string(z, radix)),
        Value::Rational(q) => {
            // Canonical form keeps the denominator positive.
            debug_assert!(num_traits::Signed::is_positive(q.denom()));
            Some(format!(
                "{}/{}",
                bigint_to_string(q.numer(), radix),
                bigint_to_string(q.denom(), radix)
            ))
        }
        Value::Float(x) => {
            if radix != 10 {
                return None;
            }
            Some(float_to_string(*x, prec))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::number::parse::{parse_number_str, ParseKind};
    use std::rc::Rc;

    #[test]
    fn fixnums_print_in_decimal() {
        assert_eq!(print_number(&Value::Fixnum(-42), 10, None).unwrap(), "-42");
    }

    #[test]
    fn exact_integers_print_in_any_radix() {
        assert_eq!(print_number(&Value::Fixnum(255), 16, None).unwrap(), "ff");
        assert_eq!(print_number(&Value::Fixnum(-5), 2, None).unwrap(), "-101");
        let z = Value::Bignum(Rc::new(BigInt::from(35)));
        assert_eq!(print_number(&z, 36, None).unwrap(), "z");
    }

    #[test]
    fn rationals_print_with_sign_on_numerator() {
        let q = parse_number_str("7/3", 10, -1, ParseKind::Rational).unwrap();
        assert_eq!(print_number(&q, 10, None).unwrap(), "-7/3");
    }

    #[test]
    fn floats_always_read_back_as_floats() {
        assert_eq!(print_number(&Value::Float(1.0), 10, None).unwrap(), "1.");
        let s = print_number(&Value::Float(0.1), 10, None).unwrap();
        assert_eq!(s.parse::<f64>().unwrap(), 0.1);
        assert!(print_number(&Value::Float(1.0), 16, None).is_none());
    }
}
