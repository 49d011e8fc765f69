//! The tower of numeric types.
//!
//! Kinds are ordered by width: fixnum < bignum < rational < float.
//! Mixed-kind operations promote the narrower operand; every exact
//! result is demoted back to its narrowest representation, so no
//! bignum in fixnum range and no rational with denominator one ever
//! escapes this module.

use std::cmp::Ordering;
use std::rc::Rc;

use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{FromPrimitive, One, ToPrimitive, Zero};
use thiserror::Error;

use crate::consts::{MAX_FIXNUM, MIN_FIXNUM};
use crate::value::Value;

pub mod arith;
pub mod format;
pub mod parse;

/// Numeric kinds, ordered by width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NumberKind {
    Fixnum,
    Bignum,
    Rational,
    Float,
}

/// Failures of the tower, independent of the interpreter; the dispatch
/// loop turns these into Lisp conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum NumberError {
    #[error("Divide by zero")]
    DivideByZero,
    #[error("Domain error")]
    Domain,
    /// Operand at the given 1-based position is not numeric (or not of
    /// the kind the operation requires).
    #[error("bad numeric argument {0}")]
    NotANumber(usize),
}

pub type NumResult = Result<Value, NumberError>;

/// Kind of a numeric value; `None` for non-numbers.
pub fn kind_of(v: &Value) -> Option<NumberKind> {
    match v {
        Value::Fixnum(_) => Some(NumberKind::Fixnum),
        Value::Bignum(_) => Some(NumberKind::Bignum),
        Value::Rational(_) => Some(NumberKind::Rational),
        Value::Float(_) => Some(NumberKind::Float),
        _ => None,
    }
}

/// Make an exact integer, promoting past the fixnum boundary.
pub fn make_int(n: i64) -> Value {
    if (MIN_FIXNUM..=MAX_FIXNUM).contains(&n) {
        Value::Fixnum(n)
    } else {
        Value::Bignum(Rc::new(BigInt::from(n)))
    }
}

/// Make an exact integer from a doubled-width intermediate.
pub fn make_int_wide(n: i128) -> Value {
    if n >= MIN_FIXNUM as i128 && n <= MAX_FIXNUM as i128 {
        Value::Fixnum(n as i64)
    } else {
        Value::Bignum(Rc::new(BigInt::from(n)))
    }
}

/// Demote a bignum into a fixnum when it fits.
pub fn demote_bigint(z: BigInt) -> Value {
    match z.to_i64() {
        Some(n) if (MIN_FIXNUM..=MAX_FIXNUM).contains(&n) => Value::Fixnum(n),
        _ => Value::Bignum(Rc::new(z)),
    }
}

/// Demote a rational: denominator one becomes an integer, which may
/// demote further to a fixnum.
pub fn demote_rational(q: BigRational) -> Value {
    if q.denom().is_one() {
        demote_bigint(q.numer().clone())
    } else {
        Value::Rational(Rc::new(q))
    }
}

/// Normalize an already-built numeric value to its narrowest kind.
/// Idempotent; floats and fixnums pass through.
pub fn maybe_demote(v: Value) -> Value {
    match v {
        Value::Bignum(z) => demote_bigint(Rc::try_unwrap(z).unwrap_or_else(|rc| (*rc).clone())),
        Value::Rational(q) => demote_rational(Rc::try_unwrap(q).unwrap_or_else(|rc| (*rc).clone())),
        other => other,
    }
}

/// Make a float. Unless `force` is set, an integral double in exact
/// range collapses to an exact integer.
pub fn make_float(x: f64, force: bool) -> Value {
    if !force && x.is_finite() && x.floor() == x && x > i64::MIN as f64 && x < i64::MAX as f64 {
        make_int(x as i64)
    } else {
        Value::Float(x)
    }
}

/// Widen any numeric value to a double. `None` for non-numbers.
pub fn to_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Fixnum(n) => Some(*n as f64),
        Value::Bignum(z) => Some(z.to_f64().unwrap_or(f64::NAN)),
        Value::Rational(q) => Some(q.to_f64().unwrap_or(f64::NAN)),
        Value::Float(x) => Some(*x),
        _ => None,
    }
}

/// Exact integer payload of a value. `None` for anything else.
pub fn to_bigint(v: &Value) -> Option<BigInt> {
    match v {
        Value::Fixnum(n) => Some(BigInt::from(*n)),
        Value::Bignum(z) => Some((**z).clone()),
        _ => None,
    }
}

/// Exact payload of a value as a ratio. `None` for floats and
/// non-numbers.
pub fn to_rational(v: &Value) -> Option<BigRational> {
    match v {
        Value::Fixnum(n) => Some(BigRational::from_integer(BigInt::from(*n))),
        Value::Bignum(z) => Some(BigRational::from_integer((**z).clone())),
        Value::Rational(q) => Some((**q).clone()),
        _ => None,
    }
}

fn promote_to(v: &Value, kind: NumberKind) -> Value {
    let from = match kind_of(v) {
        Some(k) => k,
        None => return v.clone(),
    };
    if from >= kind {
        return v.clone();
    }
    match kind {
        NumberKind::Fixnum => v.clone(),
        NumberKind::Bignum => match v {
            Value::Fixnum(n) => Value::Bignum(Rc::new(BigInt::from(*n))),
            _ => v.clone(),
        },
        NumberKind::Rational => match to_rational(v) {
            Some(q) => Value::Rational(Rc::new(q)),
            None => v.clone(),
        },
        NumberKind::Float => match to_f64(v) {
            Some(x) => Value::Float(x),
            None => v.clone(),
        },
    }
}

/// Widen the narrower operand of a pair to the kind of the wider one.
pub fn promote(a: &Value, b: &Value) -> (Value, Value) {
    match (kind_of(a), kind_of(b)) {
        (Some(ka), Some(kb)) if ka < kb => (promote_to(a, kb), b.clone()),
        (Some(ka), Some(kb)) if ka > kb => (a.clone(), promote_to(b, ka)),
        _ => (a.clone(), b.clone()),
    }
}

/// Three-valued numeric comparison after promotion. `None` when either
/// operand is non-numeric or the comparison is undefined (NaN).
pub fn cmp_values(a: &Value, b: &Value) -> Option<Ordering> {
    if !a.is_numeric() || !b.is_numeric() {
        return None;
    }
    let (a, b) = promote(a, b);
    match (&a, &b) {
        (Value::Fixnum(x), Value::Fixnum(y)) => Some(x.cmp(y)),
        (Value::Bignum(x), Value::Bignum(y)) => Some(x.cmp(y)),
        (Value::Rational(x), Value::Rational(y)) => Some(x.cmp(y)),
        (Value::Float(x), Value::Float(y)) => x.partial_cmp(y),
        _ => None,
    }
}

/// Numeric zero test; nil-ish for non-numbers.
pub fn is_zero(v: &Value) -> bool {
    match v {
        Value::Fixnum(n) => *n == 0,
        Value::Bignum(z) => z.is_zero(),
        Value::Rational(q) => q.is_zero(),
        Value::Float(x) => *x == 0.0,
        _ => false,
    }
}

/// An exact number: integer or rational.
pub fn is_exact(v: &Value) -> bool {
    matches!(v, Value::Fixnum(_) | Value::Bignum(_) | Value::Rational(_))
}

/// Numerator of a rational; integers are their own numerator.
pub fn numerator(v: &Value) -> NumResult {
    match v {
        Value::Fixnum(_) | Value::Bignum(_) => Ok(v.clone()),
        Value::Rational(q) => Ok(demote_bigint(q.numer().clone())),
        _ => Err(NumberError::NotANumber(1)),
    }
}

/// Denominator of a rational; integers have denominator one.
pub fn denominator(v: &Value) -> NumResult {
    match v {
        Value::Fixnum(_) | Value::Bignum(_) => Ok(Value::Fixnum(1)),
        Value::Rational(q) => Ok(demote_bigint(q.denom().clone())),
        _ => Err(NumberError::NotANumber(1)),
    }
}

/// Explicit exact→inexact conversion.
pub fn exact_to_inexact(v: &Value) -> NumResult {
    match v {
        Value::Float(_) => Ok(v.clone()),
        _ => to_f64(v)
            .map(|x| make_float(x, true))
            .ok_or(NumberError::NotANumber(1)),
    }
}

/// Explicit inexact→exact conversion; truncates toward negative
/// infinity like the floor it is built on.
pub fn inexact_to_exact(v: &Value) -> NumResult {
    match v {
        Value::Float(x) => {
            if !x.is_finite() {
                return Err(NumberError::Domain);
            }
            let d = x.floor();
            if d > i64::MIN as f64 && d < i64::MAX as f64 {
                Ok(make_int(d as i64))
            } else {
                BigInt::from_f64(d)
                    .map(demote_bigint)
                    .ok_or(NumberError::Domain)
            }
        }
        _ if v.is_numeric() => Ok(v.clone()),
        _ => Err(NumberError::NotANumber(1)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixnum_boundary_promotes() {
        assert!(matches!(make_int(MAX_FIXNUM), Value::Fixnum(_)));
        assert!(matches!(make_int_wide(MAX_FIXNUM as i128 + 1), Value::Bignum(_)));
        assert!(matches!(make_int(MIN_FIXNUM), Value::Fixnum(_)));
        assert!(matches!(make_int_wide(MIN_FIXNUM as i128 - 1), Value::Bignum(_)));
    }

    #[test]
    fn demote_is_idempotent() {
        let v = demote_bigint(BigInt::from(42));
        assert_eq!(v, Value::Fixnum(42));
        let v = maybe_demote(v);
        assert_eq!(v, Value::Fixnum(42));

        let q = BigRational::new(BigInt::from(4), BigInt::from(2));
        assert_eq!(demote_rational(q), Value::Fixnum(2));
    }

    #[test]
    fn promotion_orders_by_width() {
        let (a, b) = promote(&Value::Fixnum(1), &Value::Float(2.0));
        assert!(matches!(a, Value::Float(_)));
        assert!(matches!(b, Value::Float(_)));
    }

    #[test]
    fn mixed_comparison_promotes() {
        assert_eq!(
            cmp_values(&Value::Fixnum(1), &Value::Float(1.0)),
            Some(Ordering::Equal)
        );
        assert_eq!(cmp_values(&Value::Fixnum(1), &Value::Nil), None);
    }

    #[test]
    fn integral_float_collapses_unless_forced() {
        assert_eq!(make_float(8.0, false), Value::Fixnum(8));
        assert!(matches!(make_float(8.0, true), Value::Float(_)));
    }
}
