//! Native primitive descriptors and per-call records.

use std::fmt;

use crate::error::VmResult;
use crate::interpreter::Interpreter;
use crate::value::Value;

pub type Subr0Fn = fn(&mut Interpreter) -> VmResult<Value>;
pub type Subr1Fn = fn(&mut Interpreter, Value) -> VmResult<Value>;
pub type Subr2Fn = fn(&mut Interpreter, Value, Value) -> VmResult<Value>;
pub type Subr3Fn = fn(&mut Interpreter, Value, Value, Value) -> VmResult<Value>;
pub type Subr4Fn = fn(&mut Interpreter, Value, Value, Value, Value) -> VmResult<Value>;
pub type Subr5Fn = fn(&mut Interpreter, Value, Value, Value, Value, Value) -> VmResult<Value>;
/// Variadic primitives receive their arguments as a single list.
pub type SubrNFn = fn(&mut Interpreter, Value) -> VmResult<Value>;

/// Arity-tagged implementation of a native primitive.
#[derive(Clone, Copy)]
pub enum SubrImpl {
    Subr0(Subr0Fn),
    Subr1(Subr1Fn),
    Subr2(Subr2Fn),
    Subr3(Subr3Fn),
    Subr4(Subr4Fn),
    Subr5(Subr5Fn),
    SubrN(SubrNFn),
}

impl SubrImpl {
    /// Human-readable arity tag.
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::Subr0(_) => "0",
            Self::Subr1(_) => "1",
            Self::Subr2(_) => "2",
            Self::Subr3(_) => "3",
            Self::Subr4(_) => "4",
            Self::Subr5(_) => "5",
            Self::SubrN(_) => "n",
        }
    }
}

/// A registered native routine: interned name, arity tag and pointer.
pub struct SubrDef {
    pub name: &'static str,
    pub imp: SubrImpl,
    /// Special forms are excluded from `functionp`.
    pub special_form: bool,
}

impl fmt::Debug for SubrDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubrDef")
            .field("name", &self.name)
            .field("arity", &self.imp.tag())
            .field("special_form", &self.special_form)
            .finish()
    }
}

/// Invoke a primitive with the arguments gathered by the VM. Fixed
/// arities fill missing trailing arguments with nil; variadic
/// primitives receive the arguments consed into a list in original
/// order.
pub fn apply_subr(vm: &mut Interpreter, def: &'static SubrDef, args: &[Value]) -> VmResult<Value> {
    fn nth(args: &[Value], i: usize) -> Value {
        args.get(i).cloned().unwrap_or(Value::Nil)
    }

    match def.imp {
        SubrImpl::Subr0(f) => f(vm),
        SubrImpl::Subr1(f) => f(vm, nth(args, 0)),
        SubrImpl::Subr2(f) => f(vm, nth(args, 0), nth(args, 1)),
        SubrImpl::Subr3(f) => f(vm, nth(args, 0), nth(args, 1), nth(args, 2)),
        SubrImpl::Subr4(f) => f(vm, nth(args, 0), nth(args, 1), nth(args, 2), nth(args, 3)),
        SubrImpl::Subr5(f) => f(
            vm,
            nth(args, 0),
            nth(args, 1),
            nth(args, 2),
            nth(args, 3),
            nth(args, 4),
        ),
        SubrImpl::SubrN(f) => {
            let list = Value::list(args);
            vm.set_current_call_args(list.clone());
            f(vm, list)
        }
    }
}

/// One activation on the Lisp call stack, threaded for backtraces and
/// for unwinding pending calls when a throw escapes.
#[derive(Debug, Clone)]
pub struct CallRecord {
    fun: Value,
    args: Value,
    args_evalled: bool,
}

impl CallRecord {
    pub fn new(fun: Value, args: Value, args_evalled: bool) -> Self {
        Self {
            fun,
            args,
            args_evalled,
        }
    }

    /// The called function.
    pub fn fun(&self) -> &Value {
        &self.fun
    }

    /// Argument list, or nil when the callee took them straight from
    /// the operand stack.
    pub fn args(&self) -> &Value {
        &self.args
    }

    pub const fn args_evalled(&self) -> bool {
        self.args_evalled
    }

    /// Short human-readable description of the callee.
    pub fn describe(&self) -> String {
        match &self.fun {
            Value::Subr(def) => def.name.to_string(),
            Value::Closure(c) => match c.name() {
                Value::Nil => "#<closure>".to_string(),
                name => format!("{}", name),
            },
            Value::Compiled(_) => "#<bytecode>".to_string(),
            other => format!("{}", other),
        }
    }
}
