//! Registered native primitives.
//!
//! Mirrors the numeric tower's Lisp-visible surface plus the byte-code
//! packaging entry points. Registration stores each descriptor in the
//! value cell of its interned name.

use std::rc::Rc;

use crate::bytecode::{validate_byte_code, CompiledFn, PackError};
use crate::call::{SubrDef, SubrImpl};
use crate::error::{ConditionKind, VmResult};
use crate::interpreter::Interpreter;
use crate::number::{self, arith, NumResult};
use crate::value::Value;

fn fold_numbers(
    vm: &mut Interpreter,
    args: Value,
    op: fn(&Value, &Value) -> NumResult,
) -> VmResult<Value> {
    let mut iter = args.iter_list();
    let first = match iter.next() {
        Some(v) => v,
        None => return Err(vm.missing_arg(1)),
    };
    if !first.is_numeric() {
        return Err(vm.bad_arg(&first, 1));
    }
    let mut acc = first;
    let mut pos = 2;
    for arg in iter {
        if !arg.is_numeric() {
            return Err(vm.bad_arg(&arg, pos));
        }
        acc = op(&acc, &arg).map_err(|e| vm.number_error(e, &[&acc, &arg]))?;
        vm.note_number_alloc(&acc);
        pos += 1;
    }
    Ok(acc)
}

fn plus(vm: &mut Interpreter, args: Value) -> VmResult<Value> {
    if args.is_nil() {
        return Ok(Value::Fixnum(0));
    }
    fold_numbers(vm, args, arith::add)
}

fn minus(vm: &mut Interpreter, args: Value) -> VmResult<Value> {
    if args.is_nil() {
        return Err(vm.missing_arg(1));
    }
    if !args.cdr().is_cons() {
        let x = args.car();
        return arith::neg(&x).map_err(|e| vm.number_error(e, &[&x]));
    }
    fold_numbers(vm, args, arith::sub)
}

fn product(vm: &mut Interpreter, args: Value) -> VmResult<Value> {
    if args.is_nil() {
        return Ok(Value::Fixnum(1));
    }
    fold_numbers(vm, args, arith::mul)
}

fn divide(vm: &mut Interpreter, args: Value) -> VmResult<Value> {
    fold_numbers(vm, args, arith::div)
}

fn logior(vm: &mut Interpreter, args: Value) -> VmResult<Value> {
    if args.is_nil() {
        return Ok(Value::Fixnum(0));
    }
    fold_numbers(vm, args, arith::logior)
}

fn logxor(vm: &mut Interpreter, args: Value) -> VmResult<Value> {
    fold_numbers(vm, args, arith::logxor)
}

fn logand(vm: &mut Interpreter, args: Value) -> VmResult<Value> {
    fold_numbers(vm, args, arith::logand)
}

macro_rules! tower_subr1 {
    ($name:ident, $f:path) => {
        fn $name(vm: &mut Interpreter, x: Value) -> VmResult<Value> {
            $f(&x).map_err(|e| vm.number_error(e, &[&x]))
        }
    };
}

macro_rules! tower_subr2 {
    ($name:ident, $f:path) => {
        fn $name(vm: &mut Interpreter, x: Value, y: Value) -> VmResult<Value> {
            $f(&x, &y).map_err(|e| vm.number_error(e, &[&x, &y]))
        }
    };
}

tower_subr2!(remainder, arith::rem);
tower_subr2!(modulo, arith::modulo);
tower_subr2!(quotient, arith::quotient);
tower_subr2!(ash, arith::ash);
tower_subr2!(gcd, arith::gcd);
tower_subr2!(expt, arith::expt);
tower_subr1!(lognot, arith::lognot);
tower_subr1!(plus1, arith::plus1);
tower_subr1!(sub1, arith::sub1);
tower_subr1!(abs, arith::abs);
tower_subr1!(floor, arith::floor);
tower_subr1!(ceiling, arith::ceiling);
tower_subr1!(truncate, arith::truncate);
tower_subr1!(round, arith::round);
tower_subr1!(exp, arith::exp);
tower_subr1!(log, arith::log);
tower_subr1!(sin, arith::sin);
tower_subr1!(cos, arith::cos);
tower_subr1!(tan, arith::tan);
tower_subr1!(asin, arith::asin);
tower_subr1!(acos, arith::acos);
tower_subr1!(sqrt, arith::sqrt);
tower_subr1!(numerator, number::numerator);
tower_subr1!(denominator, number::denominator);
tower_subr1!(exact_to_inexact, number::exact_to_inexact);
tower_subr1!(inexact_to_exact, number::inexact_to_exact);

fn atan(vm: &mut Interpreter, y: Value, x: Value) -> VmResult<Value> {
    let two_arg = x.is_numeric().then_some(&x);
    arith::atan(&y, two_arg).map_err(|e| vm.number_error(e, &[&y, &x]))
}

fn eql(_vm: &mut Interpreter, a: Value, b: Value) -> VmResult<Value> {
    Ok(Value::from_bool(a.eql(&b)))
}

fn zerop(_vm: &mut Interpreter, x: Value) -> VmResult<Value> {
    Ok(Value::from_bool(number::is_zero(&x)))
}

fn numberp(_vm: &mut Interpreter, x: Value) -> VmResult<Value> {
    Ok(Value::from_bool(x.is_numeric()))
}

fn integerp(_vm: &mut Interpreter, x: Value) -> VmResult<Value> {
    Ok(Value::from_bool(x.is_integer()))
}

fn fixnump(_vm: &mut Interpreter, x: Value) -> VmResult<Value> {
    Ok(Value::from_bool(x.is_fixnum()))
}

fn rationalp(_vm: &mut Interpreter, x: Value) -> VmResult<Value> {
    Ok(Value::from_bool(number::is_exact(&x)))
}

fn realp(_vm: &mut Interpreter, x: Value) -> VmResult<Value> {
    Ok(Value::from_bool(x.is_numeric()))
}

fn exactp(_vm: &mut Interpreter, x: Value) -> VmResult<Value> {
    Ok(Value::from_bool(number::is_exact(&x)))
}

fn inexactp(_vm: &mut Interpreter, x: Value) -> VmResult<Value> {
    Ok(Value::from_bool(x.is_numeric() && !number::is_exact(&x)))
}

fn cons(vm: &mut Interpreter, car: Value, cdr: Value) -> VmResult<Value> {
    Ok(vm.cons_alloc(car, cdr))
}

fn car(_vm: &mut Interpreter, x: Value) -> VmResult<Value> {
    Ok(x.car())
}

fn cdr(_vm: &mut Interpreter, x: Value) -> VmResult<Value> {
    Ok(x.cdr())
}

fn list(_vm: &mut Interpreter, args: Value) -> VmResult<Value> {
    Ok(args)
}

fn signal(vm: &mut Interpreter, sym: Value, data: Value) -> VmResult<Value> {
    Err(vm.signal_with_symbol(sym, data))
}

fn validate_byte_code_subr(vm: &mut Interpreter, major: Value, minor: Value) -> VmResult<Value> {
    match (&major, &minor) {
        (Value::Fixnum(a), Value::Fixnum(b)) if validate_byte_code(*a, *b) => Ok(Value::True),
        _ => Err(vm.signal(ConditionKind::BytecodeError, vec![])),
    }
}

fn make_byte_code_subr(vm: &mut Interpreter, args: Value) -> VmResult<Value> {
    let slots: Vec<Value> = args.iter_list().collect();
    match CompiledFn::from_slots(&slots) {
        Ok(cf) => Ok(Value::Compiled(Rc::new(cf))),
        Err(PackError::Missing(pos)) => Err(vm.missing_arg(pos)),
        Err(PackError::BadSlot(pos)) => Err(vm.bad_arg(&slots[pos - 1], pos)),
    }
}

macro_rules! defsubr {
    ($def:ident, $name:literal, $variant:ident, $fn:ident) => {
        pub static $def: SubrDef = SubrDef {
            name: $name,
            imp: SubrImpl::$variant($fn),
            special_form: false,
        };
    };
}

defsubr!(SPLUS, "+", SubrN, plus);
defsubr!(SMINUS, "-", SubrN, minus);
defsubr!(SPRODUCT, "*", SubrN, product);
defsubr!(SDIVIDE, "/", SubrN, divide);
defsubr!(SREMAINDER, "remainder", Subr2, remainder);
defsubr!(SMOD, "mod", Subr2, modulo);
defsubr!(SQUOTIENT, "quotient", Subr2, quotient);
defsubr!(SASH, "ash", Subr2, ash);
defsubr!(SGCD, "gcd", Subr2, gcd);
defsubr!(SEXPT, "expt", Subr2, expt);
defsubr!(SATAN, "atan", Subr2, atan);
defsubr!(SEQL, "eql", Subr2, eql);
defsubr!(SLOGNOT, "lognot", Subr1, lognot);
defsubr!(SLOGIOR, "logior", SubrN, logior);
defsubr!(SLOGXOR, "logxor", SubrN, logxor);
defsubr!(SLOGAND, "logand", SubrN, logand);
defsubr!(SZEROP, "zerop", Subr1, zerop);
defsubr!(SPLUS1, "1+", Subr1, plus1);
defsubr!(SSUB1, "1-", Subr1, sub1);
defsubr!(SABS, "abs", Subr1, abs);
defsubr!(SFLOOR, "floor", Subr1, floor);
defsubr!(SCEILING, "ceiling", Subr1, ceiling);
defsubr!(STRUNCATE, "truncate", Subr1, truncate);
defsubr!(SROUND, "round", Subr1, round);
defsubr!(SEXP, "exp", Subr1, exp);
defsubr!(SLOG, "log", Subr1, log);
defsubr!(SSIN, "sin", Subr1, sin);
defsubr!(SCOS, "cos", Subr1, cos);
defsubr!(STAN, "tan", Subr1, tan);
defsubr!(SASIN, "asin", Subr1, asin);
defsubr!(SACOS, "acos", Subr1, acos);
defsubr!(SSQRT, "sqrt", Subr1, sqrt);
defsubr!(SNUMBERP, "numberp", Subr1, numberp);
defsubr!(SINTEGERP, "integerp", Subr1, integerp);
defsubr!(SFIXNUMP, "fixnump", Subr1, fixnump);
defsubr!(SRATIONALP, "rationalp", Subr1, rationalp);
defsubr!(SREALP, "realp", Subr1, realp);
defsubr!(SEXACTP, "exactp", Subr1, exactp);
defsubr!(SINEXACTP, "inexactp", Subr1, inexactp);
defsubr!(SEXACT_TO_INEXACT, "exact->inexact", Subr1, exact_to_inexact);
defsubr!(SINEXACT_TO_EXACT, "inexact->exact", Subr1, inexact_to_exact);
defsubr!(SNUMERATOR, "numerator", Subr1, numerator);
defsubr!(SDENOMINATOR, "denominator", Subr1, denominator);
defsubr!(SCONS, "cons", Subr2, cons);
defsubr!(SCAR, "car", Subr1, car);
defsubr!(SCDR, "cdr", Subr1, cdr);
defsubr!(SLIST, "list", SubrN, list);
defsubr!(SSIGNAL, "signal", Subr2, signal);
defsubr!(
    SVALIDATE_BYTE_CODE,
    "validate-byte-code",
    Subr2,
    validate_byte_code_subr
);
defsubr!(
    SMAKE_BYTE_CODE_SUBR,
    "make-byte-code-subr",
    SubrN,
    make_byte_code_subr
);

static SUBRS: &[&SubrDef] = &[
    &SPLUS,
    &SMINUS,
    &SPRODUCT,
    &SDIVIDE,
    &SREMAINDER,
    &SMOD,
    &SQUOTIENT,
    &SASH,
    &SGCD,
    &SEXPT,
    &SATAN,
    &SEQL,
    &SLOGNOT,
    &SLOGIOR,
    &SLOGXOR,
    &SLOGAND,
    &SZEROP,
    &SPLUS1,
    &SSUB1,
    &SABS,
    &SFLOOR,
    &SCEILING,
    &STRUNCATE,
    &SROUND,
    &SEXP,
    &SLOG,
    &SSIN,
    &SCOS,
    &STAN,
    &SASIN,
    &SACOS,
    &SSQRT,
    &SNUMBERP,
    &SINTEGERP,
    &SFIXNUMP,
    &SRATIONALP,
    &SREALP,
    &SEXACTP,
    &SINEXACTP,
    &SEXACT_TO_INEXACT,
    &SINEXACT_TO_EXACT,
    &SNUMERATOR,
    &SDENOMINATOR,
    &SCONS,
    &SCAR,
    &SCDR,
    &SLIST,
    &SSIGNAL,
    &SVALIDATE_BYTE_CODE,
    &SMAKE_BYTE_CODE_SUBR,
];

/// Register the default primitive set into an interpreter.
pub fn install(vm: &mut Interpreter) {
    for def in SUBRS {
        vm.register_subr(*def);
    }
}
