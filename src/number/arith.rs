//! Arithmetic, bitwise and transcendental operations.
//!
//! Exact/exact stays exact; mixed operands promote to the widest kind
//! first. Division by zero and domain violations surface as
//! [`NumberError`] for the dispatch loop to convert into conditions.

use std::rc::Rc;

use num_bigint::BigInt;
use num_integer::Integer;
use num_rational::BigRational;
use num_traits::{FromPrimitive, One, Signed, ToPrimitive, Zero};

use super::{
    demote_bigint, demote_rational, is_zero, make_float, make_int, make_int_wide, promote, to_f64,
    NumResult, NumberError,
};
use crate::consts::FIXNUM_BITS;
use crate::value::Value;

fn check_numeric(v: &Value, pos: usize) -> Result<(), NumberError> {
    if v.is_numeric() {
        Ok(())
    } else {
        Err(NumberError::NotANumber(pos))
    }
}

fn check_integer(v: &Value, pos: usize) -> Result<(), NumberError> {
    if v.is_integer() {
        Ok(())
    } else {
        Err(NumberError::NotANumber(pos))
    }
}

pub fn add(x: &Value, y: &Value) -> NumResult {
    check_numeric(x, 1)?;
    check_numeric(y, 2)?;
    match promote(x, y) {
        (Value::Fixnum(a), Value::Fixnum(b)) => Ok(make_int(a + b)),
        (Value::Bignum(a), Value::Bignum(b)) => Ok(demote_bigint(&*a + &*b)),
        (Value::Rational(a), Value::Rational(b)) => Ok(demote_rational(&*a + &*b)),
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a + b)),
        _ => Err(NumberError::NotANumber(1)),
    }
}

pub fn sub(x: &Value, y: &Value) -> NumResult {
    check_numeric(x, 1)?;
    check_numeric(y, 2)?;
    match promote(x, y) {
        (Value::Fixnum(a), Value::Fixnum(b)) => Ok(make_int(a - b)),
        (Value::Bignum(a), Value::Bignum(b)) => Ok(demote_bigint(&*a - &*b)),
        (Value::Rational(a), Value::Rational(b)) => Ok(demote_rational(&*a - &*b)),
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a - b)),
        _ => Err(NumberError::NotANumber(1)),
    }
}

pub fn mul(x: &Value, y: &Value) -> NumResult {
    check_numeric(x, 1)?;
    check_numeric(y, 2)?;
    match promote(x, y) {
        (Value::Fixnum(a), Value::Fixnum(b)) => Ok(make_int_wide(a as i128 * b as i128)),
        (Value::Bignum(a), Value::Bignum(b)) => Ok(demote_bigint(&*a * &*b)),
        (Value::Rational(a), Value::Rational(b)) => Ok(demote_rational(&*a * &*b)),
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a * b)),
        _ => Err(NumberError::NotANumber(1)),
    }
}

/// Exact division: integer when the quotient is exact, rational
/// otherwise. A zero divisor of any kind is an error.
pub fn div(x: &Value, y: &Value) -> NumResult {
    check_numeric(x, 1)?;
    check_numeric(y, 2)?;
    if is_zero(y) {
        return Err(NumberError::DivideByZero);
    }
    match promote(x, y) {
        (Value::Fixnum(a), Value::Fixnum(b)) => {
            if a % b == 0 {
                Ok(make_int(a / b))
            } else {
                Ok(Value::Rational(Rc::new(BigRational::new(
                    BigInt::from(a),
                    BigInt::from(b),
                ))))
            }
        }
        (Value::Bignum(a), Value::Bignum(b)) => {
            if (&*a % &*b).is_zero() {
                Ok(demote_bigint(&*a / &*b))
            } else {
                Ok(Value::Rational(Rc::new(BigRational::new(
                    (*a).clone(),
                    (*b).clone(),
                ))))
            }
        }
        (Value::Rational(a), Value::Rational(b)) => Ok(demote_rational(&*a / &*b)),
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a / b)),
        _ => Err(NumberError::NotANumber(1)),
    }
}

pub fn neg(x: &Value) -> NumResult {
    match x {
        Value::Fixnum(n) => Ok(make_int(-n)),
        Value::Bignum(z) => Ok(demote_bigint(-(&**z))),
        Value::Rational(q) => Ok(Value::Rational(Rc::new(-(&**q)))),
        Value::Float(f) => Ok(Value::Float(-f)),
        _ => Err(NumberError::NotANumber(1)),
    }
}

pub fn abs(x: &Value) -> NumResult {
    match x {
        Value::Fixnum(n) if *n < 0 => Ok(make_int(-n)),
        Value::Fixnum(_) => Ok(x.clone()),
        Value::Bignum(z) => Ok(demote_bigint(z.abs())),
        Value::Rational(q) => Ok(demote_rational(q.abs())),
        Value::Float(f) => Ok(Value::Float(f.abs())),
        _ => Err(NumberError::NotANumber(1)),
    }
}

/// Truncating remainder; sign follows the dividend.
pub fn rem(x: &Value, y: &Value) -> NumResult {
    check_numeric(x, 1)?;
    check_numeric(y, 2)?;
    if is_zero(y) {
        return Err(NumberError::DivideByZero);
    }
    match promote(x, y) {
        (Value::Fixnum(a), Value::Fixnum(b)) => Ok(make_int(a % b)),
        (Value::Bignum(a), Value::Bignum(b)) => Ok(demote_bigint(&*a % &*b)),
        _ => Err(NumberError::NotANumber(1)),
    }
}

/// Flooring modulus; the result takes the sign of the divisor.
pub fn modulo(x: &Value, y: &Value) -> NumResult {
    check_numeric(x, 1)?;
    check_numeric(y, 2)?;
    if is_zero(y) {
        return Err(NumberError::DivideByZero);
    }
    match promote(x, y) {
        (Value::Fixnum(a), Value::Fixnum(b)) => {
            let mut tem = a % b;
            if if b < 0 { tem > 0 } else { tem < 0 } {
                tem += b;
            }
            Ok(make_int(tem))
        }
        (Value::Bignum(a), Value::Bignum(b)) => {
            let mut tem = &*a % &*b;
            let wrong_sign = if b.is_negative() {
                tem.is_positive()
            } else {
                tem.is_negative()
            };
            if wrong_sign {
                tem += &*b;
            }
            Ok(demote_bigint(tem))
        }
        _ => Err(NumberError::NotANumber(1)),
    }
}

/// Truncating integer quotient.
pub fn quotient(x: &Value, y: &Value) -> NumResult {
    check_integer(x, 1)?;
    check_integer(y, 2)?;
    if is_zero(y) {
        return Err(NumberError::DivideByZero);
    }
    match promote(x, y) {
        (Value::Fixnum(a), Value::Fixnum(b)) => Ok(make_int(a / b)),
        (Value::Bignum(a), Value::Bignum(b)) => Ok(demote_bigint(&*a / &*b)),
        _ => Err(NumberError::NotANumber(1)),
    }
}

pub fn plus1(x: &Value) -> NumResult {
    match x {
        Value::Fixnum(n) => Ok(make_int(n + 1)),
        Value::Bignum(z) => Ok(demote_bigint(&**z + 1)),
        Value::Rational(q) => Ok(demote_rational(&**q + BigRational::one())),
        Value::Float(f) => Ok(Value::Float(f + 1.0)),
        _ => Err(NumberError::NotANumber(1)),
    }
}

pub fn sub1(x: &Value) -> NumResult {
    match x {
        Value::Fixnum(n) => Ok(make_int(n - 1)),
        Value::Bignum(z) => Ok(demote_bigint(&**z - 1)),
        Value::Rational(q) => Ok(demote_rational(&**q - BigRational::one())),
        Value::Float(f) => Ok(Value::Float(f - 1.0)),
        _ => Err(NumberError::NotANumber(1)),
    }
}

/// Signed arithmetic shift; positive counts shift left. Shifts past
/// the fixnum width promote to bignum.
pub fn ash(num: &Value, shift: &Value) -> NumResult {
    check_integer(num, 1)?;
    check_integer(shift, 2)?;
    let count = match shift {
        Value::Fixnum(n) => *n,
        Value::Bignum(z) => z.to_i64().ok_or(NumberError::Domain)?,
        _ => return Err(NumberError::NotANumber(2)),
    };
    match num {
        Value::Fixnum(n) => {
            if count >= FIXNUM_BITS as i64 {
                let z = BigInt::from(*n) << count as usize;
                Ok(demote_bigint(z))
            } else if count > 0 {
                Ok(make_int_wide((*n as i128) << count as u32))
            } else {
                let right = (-count).min(i64::BITS as i64 - 1) as u32;
                Ok(make_int(*n >> right))
            }
        }
        Value::Bignum(z) => {
            let out = if count > 0 {
                &**z << count as usize
            } else {
                &**z >> (-count) as usize
            };
            Ok(demote_bigint(out))
        }
        _ => Err(NumberError::NotANumber(1)),
    }
}

pub fn lognot(x: &Value) -> NumResult {
    match x {
        Value::Fixnum(n) => Ok(Value::Fixnum(!n)),
        Value::Bignum(z) => Ok(demote_bigint(!(&**z))),
        _ => Err(NumberError::NotANumber(1)),
    }
}

pub fn logior(x: &Value, y: &Value) -> NumResult {
    match promote(x, y) {
        (Value::Fixnum(a), Value::Fixnum(b)) => Ok(Value::Fixnum(a | b)),
        (Value::Bignum(a), Value::Bignum(b)) => Ok(demote_bigint(&*a | &*b)),
        _ => Err(NumberError::NotANumber(1)),
    }
}

pub fn logxor(x: &Value, y: &Value) -> NumResult {
    match promote(x, y) {
        (Value::Fixnum(a), Value::Fixnum(b)) => Ok(Value::Fixnum(a ^ b)),
        (Value::Bignum(a), Value::Bignum(b)) => Ok(demote_bigint(&*a ^ &*b)),
        _ => Err(NumberError::NotANumber(1)),
    }
}

pub fn logand(x: &Value, y: &Value) -> NumResult {
    match promote(x, y) {
        (Value::Fixnum(a), Value::Fixnum(b)) => Ok(Value::Fixnum(a & b)),
        (Value::Bignum(a), Value::Bignum(b)) => Ok(demote_bigint(&*a & &*b)),
        _ => Err(NumberError::NotANumber(1)),
    }
}

pub fn gcd(x: &Value, y: &Value) -> NumResult {
    check_integer(x, 1)?;
    check_integer(y, 2)?;
    match promote(x, y) {
        (Value::Fixnum(a), Value::Fixnum(b)) => Ok(make_int(a.gcd(&b))),
        (Value::Bignum(a), Value::Bignum(b)) => Ok(demote_bigint(a.gcd(&b))),
        _ => Err(NumberError::NotANumber(1)),
    }
}

fn float_to_exact(d: f64) -> NumResult {
    if !d.is_finite() {
        return Err(NumberError::Domain);
    }
    if d > i64::MIN as f64 && d < i64::MAX as f64 {
        Ok(make_int(d as i64))
    } else {
        BigInt::from_f64(d)
            .map(demote_bigint)
            .ok_or(NumberError::Domain)
    }
}

/// Largest integer not above the argument; exact in, exact out.
pub fn floor(x: &Value) -> NumResult {
    match x {
        Value::Fixnum(_) | Value::Bignum(_) => Ok(x.clone()),
        Value::Rational(q) => Ok(demote_rational(q.floor())),
        Value::Float(f) => float_to_exact(f.floor()),
        _ => Err(NumberError::NotANumber(1)),
    }
}

/// Smallest integer not below the argument.
pub fn ceiling(x: &Value) -> NumResult {
    match x {
        Value::Fixnum(_) | Value::Bignum(_) => Ok(x.clone()),
        Value::Rational(q) => Ok(demote_rational(q.ceil())),
        Value::Float(f) => float_to_exact(f.ceil()),
        _ => Err(NumberError::NotANumber(1)),
    }
}

/// Nearest integer between the argument and zero.
pub fn truncate(x: &Value) -> NumResult {
    match x {
        Value::Fixnum(_) | Value::Bignum(_) => Ok(x.clone()),
        Value::Rational(q) => Ok(demote_rational(q.trunc())),
        Value::Float(f) => float_to_exact(f.trunc()),
        _ => Err(NumberError::NotANumber(1)),
    }
}

fn round_half_even_f64(d: f64) -> f64 {
    let plus_half = d + 0.5;
    let result = plus_half.floor();
    if plus_half == result && plus_half / 2.0 != (plus_half / 2.0).floor() {
        result - 1.0
    } else {
        result
    }
}

/// Nearest integer; halfway cases round to even.
pub fn round(x: &Value) -> NumResult {
    match x {
        Value::Fixnum(_) | Value::Bignum(_) => Ok(x.clone()),
        Value::Rational(q) => {
            let half = BigRational::new(BigInt::one(), BigInt::from(2));
            let plus_half = &**q + half;
            let result = plus_half.floor();
            let rounded = if plus_half == result && result.numer().is_odd() {
                result - BigRational::one()
            } else {
                result
            };
            Ok(demote_rational(rounded))
        }
        Value::Float(f) => float_to_exact(round_half_even_f64(*f)),
        _ => Err(NumberError::NotANumber(1)),
    }
}

pub fn exp(x: &Value) -> NumResult {
    let d = to_f64(x).ok_or(NumberError::NotANumber(1))?;
    Ok(make_float(d.exp(), true))
}

/// Natural logarithm; negative arguments are out of domain.
pub fn log(x: &Value) -> NumResult {
    let d = to_f64(x).ok_or(NumberError::NotANumber(1))?;
    if d >= 0.0 {
        Ok(make_float(d.ln(), true))
    } else {
        Err(NumberError::Domain)
    }
}

pub fn sin(x: &Value) -> NumResult {
    let d = to_f64(x).ok_or(NumberError::NotANumber(1))?;
    Ok(make_float(d.sin(), true))
}

pub fn cos(x: &Value) -> NumResult {
    let d = to_f64(x).ok_or(NumberError::NotANumber(1))?;
    Ok(make_float(d.cos(), true))
}

pub fn tan(x: &Value) -> NumResult {
    let d = to_f64(x).ok_or(NumberError::NotANumber(1))?;
    Ok(make_float(d.tan(), true))
}

pub fn asin(x: &Value) -> NumResult {
    let d = to_f64(x).ok_or(NumberError::NotANumber(1))?;
    if (-1.0..=1.0).contains(&d) {
        Ok(make_float(d.asin(), true))
    } else {
        Err(NumberError::Domain)
    }
}

pub fn acos(x: &Value) -> NumResult {
    let d = to_f64(x).ok_or(NumberError::NotANumber(1))?;
    if (-1.0..=1.0).contains(&d) {
        Ok(make_float(d.acos(), true))
    } else {
        Err(NumberError::Domain)
    }
}

/// One-argument arc tangent, or the two-argument quadrant-aware form
/// when `x` is numeric.
pub fn atan(y: &Value, x: Option<&Value>) -> NumResult {
    let dy = to_f64(y).ok_or(NumberError::NotANumber(1))?;
    match x.and_then(to_f64) {
        Some(dx) => Ok(make_float(dy.atan2(dx), true)),
        None => Ok(make_float(dy.atan(), true)),
    }
}

/// Nonnegative square root; negative arguments are out of domain.
pub fn sqrt(x: &Value) -> NumResult {
    let d = to_f64(x).ok_or(NumberError::NotANumber(1))?;
    if d >= 0.0 {
        Ok(make_float(d.sqrt(), true))
    } else {
        Err(NumberError::Domain)
    }
}

/// Exponentiation. A negative base demands an integer exponent; an
/// integral result demotes back to an exact integer.
pub fn expt(x: &Value, y: &Value) -> NumResult {
    let dx = to_f64(x).ok_or(NumberError::NotANumber(1))?;
    let dy = to_f64(y).ok_or(NumberError::NotANumber(2))?;
    if dx >= 0.0 || dy.ceil() == dy {
        Ok(make_float(dx.powf(dy), false))
    } else {
        Err(NumberError::Domain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fx(n: i64) -> Value {
        Value::Fixnum(n)
    }

    #[test]
    fn exact_division_produces_rationals() {
        let third = div(&fx(1), &fx(3)).unwrap();
        assert!(matches!(third, Value::Rational(_)));
        let one = add(&third, &div(&fx(2), &fx(3)).unwrap()).unwrap();
        assert_eq!(one, fx(1));
    }

    #[test]
    fn division_by_zero_is_an_error() {
        assert_eq!(div(&fx(1), &fx(0)), Err(NumberError::DivideByZero));
        assert_eq!(
            div(&fx(1), &Value::Float(0.0)),
            Err(NumberError::DivideByZero)
        );
        assert_eq!(modulo(&fx(1), &fx(0)), Err(NumberError::DivideByZero));
        assert_eq!(rem(&fx(1), &fx(0)), Err(NumberError::DivideByZero));
    }

    #[test]
    fn mod_sign_follows_divisor() {
        assert_eq!(modulo(&fx(-7), &fx(3)).unwrap(), fx(2));
        assert_eq!(modulo(&fx(7), &fx(-3)).unwrap(), fx(-2));
        assert_eq!(rem(&fx(-7), &fx(3)).unwrap(), fx(-1));
    }

    #[test]
    fn round_is_bankers() {
        assert_eq!(round(&Value::Float(0.5)).unwrap(), fx(0));
        assert_eq!(round(&Value::Float(1.5)).unwrap(), fx(2));
        assert_eq!(round(&Value::Float(-0.5)).unwrap(), fx(0));
        assert_eq!(round(&Value::Float(2.5)).unwrap(), fx(2));
        let half = div(&fx(1), &fx(2)).unwrap();
        assert_eq!(round(&half).unwrap(), fx(0));
        let three_halves = div(&fx(3), &fx(2)).unwrap();
        assert_eq!(round(&three_halves).unwrap(), fx(2));
    }

    #[test]
    fn ash_promotes_on_overflow() {
        let wide = ash(&fx(1), &fx(80)).unwrap();
        assert!(matches!(wide, Value::Bignum(_)));
        let back = ash(&wide, &fx(-80)).unwrap();
        assert_eq!(back, fx(1));
        assert_eq!(ash(&fx(-8), &fx(-1)).unwrap(), fx(-4));
    }

    #[test]
    fn expt_demotes_integral_results() {
        assert_eq!(expt(&fx(2), &fx(10)).unwrap(), fx(1024));
        assert_eq!(expt(&fx(-2), &Value::Float(0.5)), Err(NumberError::Domain));
    }

    #[test]
    fn domain_checks() {
        assert_eq!(sqrt(&fx(-1)), Err(NumberError::Domain));
        assert_eq!(log(&fx(-1)), Err(NumberError::Domain));
        assert_eq!(asin(&fx(2)), Err(NumberError::Domain));
        assert_eq!(acos(&fx(-2)), Err(NumberError::Domain));
    }
}
