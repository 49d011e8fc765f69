//! Numeric parsing, printing and conversion behavior.

use lisp_vm::number::{self, make_float, make_int};
use lisp_vm::prelude::*;

use num_bigint::BigInt;
use quickcheck_macros::quickcheck;
use std::cmp::Ordering;
use std::rc::Rc;

fn fx(n: i64) -> Value {
    Value::Fixnum(n)
}

/// Print in radix 10 and parse back, splitting the sign off the way
/// the reader does.
fn reparse(v: &Value, kind: ParseKind) -> Option<Value> {
    let s = print_number(v, 10, None)?;
    let (sign, digits) = match s.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, s.as_str()),
    };
    parse_number_str(digits, 10, sign, kind)
}

#[quickcheck]
fn fixnums_survive_print_then_parse(n: i64) -> bool {
    let v = make_int(n >> 2);
    reparse(&v, ParseKind::Integer) == Some(v)
}

#[quickcheck]
fn big_integers_survive_print_then_parse(a: i64, b: u32) -> bool {
    let v = number::demote_bigint(BigInt::from(a) * BigInt::from(b) * BigInt::from(1i64 << 40));
    reparse(&v, ParseKind::Integer) == Some(v)
}

#[quickcheck]
fn rationals_survive_print_then_parse(n: i64, d: i64) -> quickcheck::TestResult {
    if d == 0 {
        return quickcheck::TestResult::discard();
    }
    let q = lisp_vm::number::arith::div(&make_int(n), &make_int(d)).unwrap();
    let kind = if matches!(q, Value::Rational(_)) {
        ParseKind::Rational
    } else {
        ParseKind::Integer
    };
    quickcheck::TestResult::from_bool(reparse(&q, kind) == Some(q))
}

#[quickcheck]
fn finite_floats_survive_print_then_parse(bits: u64) -> quickcheck::TestResult {
    let x = f64::from_bits(bits);
    if !x.is_finite() {
        return quickcheck::TestResult::discard();
    }
    let v = Value::Float(x);
    let s = print_number(&v, 10, None).unwrap();
    let (sign, digits) = match s.strip_prefix('-') {
        Some(rest) => (-1.0, rest),
        None => (1.0, s.as_str()),
    };
    let parsed = parse_number_str(digits, 10, sign as i64, ParseKind::Float);
    let back = match parsed {
        Some(Value::Float(y)) => y,
        _ => return quickcheck::TestResult::failed(),
    };
    quickcheck::TestResult::from_bool(back.to_bits() == x.to_bits() || (x == 0.0 && back == 0.0))
}

#[test]
fn radix_parsing() {
    assert_eq!(
        parse_number_str("deadbeef", 16, 1, ParseKind::Integer),
        Some(fx(0xdead_beef))
    );
    assert_eq!(
        parse_number_str("777", 8, -1, ParseKind::Integer),
        Some(fx(-0o777))
    );
    assert_eq!(
        parse_number_str("a/10", 16, 1, ParseKind::Rational),
        Some(lisp_vm::number::arith::div(&fx(10), &fx(16)).unwrap())
    );
    // radix 12 is not a reader radix
    assert_eq!(parse_number_str("11", 12, 1, ParseKind::Integer), None);
}

#[test]
fn printing_covers_radix_two_through_thirty_six() {
    let v = fx(255);
    assert_eq!(print_number(&v, 2, None).unwrap(), "11111111");
    assert_eq!(print_number(&v, 16, None).unwrap(), "ff");
    assert_eq!(print_number(&v, 36, None).unwrap(), "73");
    assert!(print_number(&v, 1, None).is_none());
    assert!(print_number(&v, 37, None).is_none());

    let big = number::demote_bigint(BigInt::from(1) << 100u32);
    assert_eq!(
        print_number(&big, 16, None).unwrap(),
        (BigInt::from(1i32) << 100u32).to_str_radix(16)
    );
}

#[test]
fn negative_rationals_keep_the_sign_on_the_numerator() {
    let q = lisp_vm::number::arith::div(&fx(7), &fx(-3)).unwrap();
    assert_eq!(print_number(&q, 10, None).unwrap(), "-7/3");
}

#[test]
fn float_printing_always_reads_back_as_a_float() {
    assert_eq!(print_number(&Value::Float(100.0), 10, None).unwrap(), "100.");
    let s = print_number(&Value::Float(1e300), 10, None).unwrap();
    assert!(s.contains(['.', 'e', 'E']));
    // explicit precision
    assert_eq!(
        print_number(&Value::Float(1.5), 10, Some(3)).unwrap(),
        "1.500"
    );
}

#[test]
fn comparison_promotes_and_rejects_non_numbers() {
    assert_eq!(
        number::cmp_values(&fx(1), &Value::Float(1.5)),
        Some(Ordering::Less)
    );
    let big = number::demote_bigint(BigInt::from(1) << 80u32);
    assert_eq!(number::cmp_values(&big, &fx(1)), Some(Ordering::Greater));
    let third = lisp_vm::number::arith::div(&fx(1), &fx(3)).unwrap();
    let half = lisp_vm::number::arith::div(&fx(1), &fx(2)).unwrap();
    assert_eq!(number::cmp_values(&third, &half), Some(Ordering::Less));

    assert_eq!(number::cmp_values(&Value::Nil, &fx(1)), None);
    assert_eq!(
        number::cmp_values(&Value::Float(f64::NAN), &Value::Float(1.0)),
        None
    );
}

#[test]
fn exactness_conversions() {
    let third = lisp_vm::number::arith::div(&fx(1), &fx(3)).unwrap();
    let inexact = number::exact_to_inexact(&third).unwrap();
    assert!(matches!(inexact, Value::Float(_)));

    assert_eq!(number::inexact_to_exact(&Value::Float(2.75)).unwrap(), fx(2));
    assert_eq!(number::inexact_to_exact(&fx(5)).unwrap(), fx(5));
    assert!(number::inexact_to_exact(&Value::Float(f64::INFINITY)).is_err());
}

#[test]
fn numerator_and_denominator() {
    let q = lisp_vm::number::arith::div(&fx(6), &fx(-4)).unwrap();
    assert_eq!(number::numerator(&q).unwrap(), fx(-3));
    assert_eq!(number::denominator(&q).unwrap(), fx(2));
    assert_eq!(number::numerator(&fx(9)).unwrap(), fx(9));
    assert_eq!(number::denominator(&fx(9)).unwrap(), fx(1));
}

#[test]
fn integral_floats_collapse_only_when_allowed() {
    assert_eq!(make_float(3.0, false), fx(3));
    assert!(matches!(make_float(3.0, true), Value::Float(_)));
    assert!(matches!(make_float(3.5, false), Value::Float(_)));
}

#[test]
fn parse_rejects_junk_through_the_public_api() {
    assert_eq!(parse_number(b"12 34", 10, 1, ParseKind::Integer), None);
    assert_eq!(parse_number(b"", 10, 1, ParseKind::Integer), None);
    assert_eq!(parse_number(b"1.5.2", 10, 1, ParseKind::Float), None);
    assert_eq!(parse_number(b"12", 10, 0, ParseKind::Integer), None);
}

#[test]
fn printing_non_numbers_yields_none() {
    assert!(print_number(&Value::Nil, 10, None).is_none());
    assert!(print_number(&Value::String(Rc::from(&b"9"[..])), 10, None).is_none());
}
