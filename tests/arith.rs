//! Arithmetic semantics, end to end through the VM and as tower laws.

use lisp_vm::consts::MAX_FIXNUM;
use lisp_vm::number::{self, arith, make_int};
use lisp_vm::opcode::*;
use lisp_vm::prelude::*;

use num_bigint::BigInt;
use quickcheck_macros::quickcheck;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;

fn compiled(lambda: Value, code: Vec<u8>, consts: Vec<Value>) -> Rc<CompiledFn> {
    Rc::new(CompiledFn::new(
        lambda,
        Rc::from(code),
        Rc::new(RefCell::new(consts)),
        StackReq::new(16, 8),
        Value::Nil,
        Value::Nil,
    ))
}

fn closure_of(fun: Rc<CompiledFn>) -> Value {
    Value::Closure(Rc::new(Closure::new(
        Value::Compiled(fun),
        Value::Nil,
        Value::Nil,
    )))
}

fn run(vm: &mut Interpreter, code: Vec<u8>, consts: Vec<Value>) -> Value {
    let f = closure_of(compiled(Value::Nil, code, consts));
    vm.call(&f, &[]).expect("program should complete")
}

fn fx(n: i64) -> Value {
    Value::Fixnum(n)
}

#[test]
fn add_three_fixnums_through_call() {
    let mut vm = Interpreter::new();
    let plus = vm.intern_value("+");

    let mut asm = Assembler::new();
    asm.op(OP_PUSHI1);
    asm.op(OP_PUSHI2);
    asm.pushi(3);
    asm.op_arg(OP_REFQ, 0);
    asm.op_arg(OP_CALL, 3);
    asm.op(OP_RETURN);

    let v = run(&mut vm, asm.finish(), vec![plus]);
    assert_eq!(v, fx(6));
}

#[test]
fn inline_add_fast_path() {
    let mut vm = Interpreter::new();
    let mut asm = Assembler::new();
    asm.pushi(40);
    asm.op(OP_PUSHI2);
    asm.op(OP_ADD);
    asm.op(OP_RETURN);
    assert_eq!(run(&mut vm, asm.finish(), vec![]), fx(42));
}

#[test]
fn fixnum_overflow_promotes_to_bignum() {
    let mut vm = Interpreter::new();

    let mut asm = Assembler::new();
    asm.op_arg(OP_PUSH, 0);
    asm.op(OP_PUSHI1);
    asm.op(OP_ADD);
    asm.op(OP_RETURN);

    let v = run(&mut vm, asm.finish(), vec![fx(MAX_FIXNUM)]);
    assert!(matches!(v, Value::Bignum(_)));
    let expected = BigInt::from(MAX_FIXNUM) + 1i64;
    assert_eq!(
        print_number(&v, 10, None).unwrap(),
        expected.to_string()
    );
}

#[test]
fn million_squared_prints_all_digits() {
    let mut vm = Interpreter::new();

    let mut asm = Assembler::new();
    asm.op_arg(OP_PUSH, 0);
    asm.op_arg(OP_PUSH, 0);
    asm.op(OP_MUL);
    asm.op(OP_RETURN);

    let v = run(&mut vm, asm.finish(), vec![fx(1_000_000)]);
    assert_eq!(print_number(&v, 10, None).unwrap(), "1000000000000");
}

#[test]
fn exact_division_yields_rationals_that_demote() {
    let mut vm = Interpreter::new();

    // (/ 1 3)
    let mut asm = Assembler::new();
    asm.op(OP_PUSHI1);
    asm.pushi(3);
    asm.op(OP_DIV);
    asm.op(OP_RETURN);
    let third = run(&mut vm, asm.finish(), vec![]);
    assert!(matches!(third, Value::Rational(_)));
    assert_eq!(print_number(&third, 10, None).unwrap(), "1/3");

    // (+ (/ 1 3) (/ 2 3)) demotes back to a fixnum
    let mut asm = Assembler::new();
    asm.op(OP_PUSHI1);
    asm.pushi(3);
    asm.op(OP_DIV);
    asm.op(OP_PUSHI2);
    asm.pushi(3);
    asm.op(OP_DIV);
    asm.op(OP_ADD);
    asm.op(OP_RETURN);
    assert_eq!(run(&mut vm, asm.finish(), vec![]), fx(1));
}

#[test]
fn mod_and_remainder_signs() {
    let mut vm = Interpreter::new();

    let mut asm = Assembler::new();
    asm.pushi(-7);
    asm.pushi(3);
    asm.op(OP_MOD);
    asm.op(OP_RETURN);
    assert_eq!(run(&mut vm, asm.finish(), vec![]), fx(2));

    let mut asm = Assembler::new();
    asm.pushi(-7);
    asm.pushi(3);
    asm.op(OP_REM);
    asm.op(OP_RETURN);
    assert_eq!(run(&mut vm, asm.finish(), vec![]), fx(-1));
}

#[test]
fn division_by_zero_signals_arith_error() {
    let mut vm = Interpreter::new();
    let mut asm = Assembler::new();
    asm.op(OP_PUSHI1);
    asm.op(OP_PUSHI0);
    asm.op(OP_DIV);
    asm.op(OP_RETURN);
    let f = closure_of(compiled(Value::Nil, asm.finish(), vec![]));
    let err = vm.call(&f, &[]).unwrap_err();
    let thrown = err.thrown().expect("an uncaught condition").clone();
    // (error arith-error "Divide by zero")
    assert_eq!(thrown.cdr().car(), vm.intern_value("arith-error"));
    assert_eq!(thrown.cdr().cdr().car(), Value::string("Divide by zero"));
}

#[test]
fn variadic_subrs_fold_their_argument_list() {
    let mut vm = Interpreter::new();
    let plus = vm.intern("+").value();
    let minus = vm.intern("-").value();
    let product = vm.intern("*").value();

    assert_eq!(vm.call(&plus, &[]).unwrap(), fx(0));
    assert_eq!(vm.call(&product, &[]).unwrap(), fx(1));
    assert_eq!(
        vm.call(&plus, &[fx(1), fx(2), fx(3), fx(4)]).unwrap(),
        fx(10)
    );
    assert_eq!(vm.call(&minus, &[fx(5)]).unwrap(), fx(-5));
    assert_eq!(vm.call(&minus, &[fx(5), fx(2), fx(1)]).unwrap(), fx(2));
}

#[test]
fn trig_and_roots_are_inexact() {
    let mut vm = Interpreter::new();
    let sqrt = vm.intern("sqrt").value();
    let v = vm.call(&sqrt, &[fx(4)]).unwrap();
    // transcendental results stay floats even when integral
    assert!(matches!(v, Value::Float(_)));

    let expt = vm.intern("expt").value();
    assert_eq!(vm.call(&expt, &[fx(2), fx(10)]).unwrap(), fx(1024));
}

#[test]
fn ash_through_the_vm() {
    let mut vm = Interpreter::new();
    let mut asm = Assembler::new();
    asm.op(OP_PUSHI1);
    asm.pushi(70);
    asm.op(OP_ASH);
    asm.op(OP_RETURN);
    let v = run(&mut vm, asm.finish(), vec![]);
    assert!(matches!(v, Value::Bignum(_)));
    assert_eq!(
        print_number(&v, 10, None).unwrap(),
        (BigInt::from(1) << 70u32).to_string()
    );
}

/* tower laws */

#[quickcheck]
fn addition_commutes(a: i64, b: i64) -> bool {
    let (a, b) = (make_int(a), make_int(b));
    arith::add(&a, &b).unwrap() == arith::add(&b, &a).unwrap()
}

#[quickcheck]
fn multiplication_commutes(a: i64, b: i64) -> bool {
    let (a, b) = (make_int(a), make_int(b));
    arith::mul(&a, &b).unwrap() == arith::mul(&b, &a).unwrap()
}

#[quickcheck]
fn addition_associates(a: i64, b: i64, c: i64) -> bool {
    let (a, b, c) = (make_int(a), make_int(b), make_int(c));
    let left = arith::add(&arith::add(&a, &b).unwrap(), &c).unwrap();
    let right = arith::add(&a, &arith::add(&b, &c).unwrap()).unwrap();
    left == right
}

#[quickcheck]
fn additive_and_multiplicative_identities(a: i64) -> bool {
    let a = make_int(a);
    let zero = fx(0);
    let one = fx(1);
    arith::add(&a, &zero).unwrap() == a
        && arith::mul(&a, &one).unwrap() == a
        && arith::sub(&a, &a).unwrap() == zero
        && arith::mul(&a, &zero).unwrap() == zero
}

#[quickcheck]
fn floor_and_ceiling_bracket_rationals(n: i64, d: i64) -> quickcheck::TestResult {
    if d == 0 {
        return quickcheck::TestResult::discard();
    }
    let q = arith::div(&make_int(n), &make_int(d)).unwrap();
    let lo = arith::floor(&q).unwrap();
    let hi = arith::ceiling(&q).unwrap();
    let ordered = number::cmp_values(&lo, &q) != Some(Ordering::Greater)
        && number::cmp_values(&q, &hi) != Some(Ordering::Greater);
    let gap = arith::sub(&hi, &lo).unwrap();
    quickcheck::TestResult::from_bool(ordered && (gap == fx(0) || gap == fx(1)))
}

#[quickcheck]
fn mod_stays_in_divisor_range(x: i64, y: i64) -> quickcheck::TestResult {
    if y == 0 {
        return quickcheck::TestResult::discard();
    }
    let m = arith::modulo(&make_int(x), &make_int(y)).unwrap();
    let y_abs = arith::abs(&make_int(y)).unwrap();
    let in_range = number::cmp_values(&m, &y_abs) == Some(Ordering::Less)
        && number::cmp_values(&arith::neg(&y_abs).unwrap(), &m) == Some(Ordering::Less)
            || m == fx(0);
    // non-zero results take the divisor's sign
    let sign_ok = m == fx(0)
        || (y > 0) == (number::cmp_values(&m, &fx(0)) == Some(Ordering::Greater));
    quickcheck::TestResult::from_bool(in_range && sign_ok)
}

#[quickcheck]
fn quotient_remainder_identity(x: i64, y: i64) -> quickcheck::TestResult {
    if y == 0 {
        return quickcheck::TestResult::discard();
    }
    let (xv, yv) = (make_int(x), make_int(y));
    let q = arith::quotient(&xv, &yv).unwrap();
    let r = arith::rem(&xv, &yv).unwrap();
    let back = arith::add(&arith::mul(&q, &yv).unwrap(), &r).unwrap();
    quickcheck::TestResult::from_bool(back == xv)
}

#[quickcheck]
fn overflow_addition_is_exact(b: u32) -> bool {
    let sum = arith::add(&fx(MAX_FIXNUM), &fx(b as i64)).unwrap();
    let expected = BigInt::from(MAX_FIXNUM) + b;
    print_number(&sum, 10, None).unwrap() == expected.to_string()
}

#[quickcheck]
fn demotion_is_idempotent(n: i64, d: i64) -> quickcheck::TestResult {
    // keep both operands in fixnum range so the quotient stays there too
    let (n, d) = (n >> 2, d >> 2);
    if d == 0 {
        return quickcheck::TestResult::discard();
    }
    let q = arith::div(&make_int(n), &make_int(d)).unwrap();
    let once = number::maybe_demote(q.clone());
    let twice = number::maybe_demote(once.clone());
    let canonical = match &once {
        Value::Bignum(_) => false, // a quotient of fixnums always fits
        Value::Rational(r) => !num_traits::One::is_one(r.denom()),
        _ => true,
    };
    quickcheck::TestResult::from_bool(once == twice && once == q && canonical)
}

#[test]
fn bankers_rounding_cases() {
    for (input, expected) in [(0.5, 0), (1.5, 2), (-0.5, 0), (2.5, 2), (3.5, 4)] {
        assert_eq!(
            arith::round(&Value::Float(input)).unwrap(),
            fx(expected),
            "round({})",
            input
        );
    }
}
