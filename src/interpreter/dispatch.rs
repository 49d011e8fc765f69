//! The byte-code dispatch loop.
//!
//! One activation owns an operand stack and a binding stack sized from
//! the function's stack requirement. Exceptions travel as `Err` from
//! opcode to the unwind phase, which releases binding entries in LIFO
//! order until a handler installed by `BINDERR` accepts the value.

use std::cell::RefCell;
use std::rc::Rc;

use crate::bytecode::CompiledFn;
use crate::call::CallRecord;
use crate::consts::{ARG_SHIFT, MAX_FIXNUM, MIN_FIXNUM};
use crate::env::{BindEntry, BindError, FrameCounts};
use crate::error::{ConditionKind, Throw, VmResult, MAX_DEPTH};
use crate::gc::Roots;
use crate::list;
use crate::number::{self, arith};
use crate::opcode::*;
use crate::value::{Symbol, Value};

use super::Interpreter;

/// Outcome of one executed instruction.
enum Flow {
    /// Proceed with the next fetch.
    Fetch,
    /// The activation completed with a value.
    Return(Value),
    /// Eliminated tail call: rebind and restart with this callee.
    Tail(Rc<CompiledFn>, Value, Vec<Value>),
}

macro_rules! fetch {
    ($self:ident, $code:ident, $pc:ident) => {
        match $code.get(*$pc) {
            Some(b) => {
                *$pc += 1;
                *b
            }
            None => return Err($self.truncated()),
        }
    };
}

macro_rules! fetch2 {
    ($self:ident, $code:ident, $pc:ident) => {{
        let hi = fetch!($self, $code, $pc) as usize;
        let lo = fetch!($self, $code, $pc) as usize;
        (hi << ARG_SHIFT) | lo
    }};
}

macro_rules! pop {
    ($self:ident, $stack:ident) => {
        match $stack.pop() {
            Some(v) => v,
            None => return Err($self.underflow()),
        }
    };
}

macro_rules! top {
    ($self:ident, $stack:ident) => {
        match $stack.last_mut() {
            Some(v) => v,
            None => return Err($self.underflow()),
        }
    };
}

/// Binary tower operation: pop two, push the result.
macro_rules! num2 {
    ($self:ident, $stack:ident, $f:path) => {{
        let y = pop!($self, $stack);
        let x = pop!($self, $stack);
        let v = $f(&x, &y).map_err(|e| $self.number_error(e, &[&x, &y]))?;
        $self.note_number_alloc(&v);
        $stack.push(v);
    }};
}

/// Unary tower operation on the top of stack.
macro_rules! num1 {
    ($self:ident, $stack:ident, $f:path) => {{
        let x = pop!($self, $stack);
        let v = $f(&x).map_err(|e| $self.number_error(e, &[&x]))?;
        $self.note_number_alloc(&v);
        $stack.push(v);
    }};
}

fn is_macro(v: &Value) -> bool {
    fn macro_cons(v: &Value) -> bool {
        matches!(v, Value::Cons(c) if matches!(c.car(), Value::Symbol(s) if s.name() == "macro"))
    }
    macro_cons(v) || matches!(v, Value::Closure(c) if macro_cons(c.fun()))
}

impl Interpreter {
    /// Execute a compiled function in the given environment. Guards the
    /// recursion limit and restores the binding heads of the caller on
    /// both exits.
    pub(crate) fn run(&mut self, fun: Rc<CompiledFn>, env: Value, args: &[Value]) -> VmResult<Value> {
        self.depth += 1;
        if self.depth > self.max_depth {
            self.depth -= 1;
            return Err(self.signal_str(ConditionKind::MaxDepthExceeded, MAX_DEPTH));
        }
        let saved_lex = self.bindings.lexical_head();
        let saved_spec = self.bindings.special_head();

        let result = self.run_inner(fun, env, args);

        self.bindings.set_lexical_head(saved_lex);
        if result.is_err() {
            // The unwind released every frame; resetting the head is a
            // no-op then, but covers failures during argument binding.
            self.bindings.set_special_head(saved_spec);
        }
        self.depth -= 1;
        result
    }

    fn run_inner(
        &mut self,
        mut fun: Rc<CompiledFn>,
        mut env: Value,
        first_args: &[Value],
    ) -> VmResult<Value> {
        let mut args: Vec<Value> = first_args.to_vec();
        let mut stack: Vec<Value> = Vec::new();
        let mut binds: Vec<BindEntry> = Vec::new();

        // Tail calls land here: rebind the lambda list in place and
        // restart the fetch loop with the callee's code and constants.
        'activation: loop {
            self.bindings.set_lexical_head(env.clone());
            let frame = match self.bindings.bind_formals(fun.lambda(), &args) {
                Ok(frame) => frame,
                Err(e) => return Err(self.bind_error(e)),
            };
            let code = fun.code();
            let consts = fun.consts();
            let req = fun.stack_req();
            stack.clear();
            stack.reserve(req.operands() as usize);
            binds.clear();
            binds.reserve(req.bindings() as usize);
            binds.push(BindEntry::Frame(frame));
            let mut impurity = frame.specials() as usize;
            let mut pc: usize = 0;

            self.gc_and_yield(&stack, &binds, &consts);

            loop {
                debug_assert!(stack.len() <= req.operands() as usize);
                debug_assert!(binds.len() <= req.bindings() as usize);

                let flow = match code.get(pc) {
                    Some(&insn) => {
                        pc += 1;
                        self.step(
                            insn,
                            &mut pc,
                            &code,
                            &consts,
                            &mut stack,
                            &mut binds,
                            &mut impurity,
                        )
                    }
                    None => Err(self.truncated()),
                };
                match flow {
                    Ok(Flow::Fetch) => {}
                    Ok(Flow::Return(v)) => {
                        while let Some(entry) = binds.pop() {
                            self.unbind_entry(entry);
                        }
                        return Ok(v);
                    }
                    Ok(Flow::Tail(next_fun, next_env, next_args)) => {
                        fun = next_fun;
                        env = next_env;
                        args = next_args;
                        continue 'activation;
                    }
                    Err(throw) => match self.unwind(throw, &mut stack, &mut binds, &mut impurity) {
                        Ok(handler_pc) => pc = handler_pc,
                        Err(t) => return Err(t),
                    },
                }
            }
        }
    }

    /// Release binding entries until a handler accepts the throw value.
    /// On a match the recorded stack depth is restored, the value is
    /// pushed for the handler, and dispatch resumes at its address.
    /// With no handler left the activation propagates the exception.
    fn unwind(
        &mut self,
        throw: Throw,
        stack: &mut Vec<Value>,
        binds: &mut Vec<BindEntry>,
        impurity: &mut usize,
    ) -> VmResult<usize> {
        tracing::trace!(target: "lisp_vm::vm", thrown = %throw.value(), "unwinding");
        while let Some(entry) = binds.pop() {
            match entry {
                BindEntry::Handler { pc, sp } => {
                    stack.truncate(sp);
                    stack.push(throw.into_value());
                    *impurity = impurity.saturating_sub(1);
                    self.failed_stack.clear();
                    return Ok(pc);
                }
                other => {
                    let released = self.unbind_entry(other);
                    *impurity = impurity.saturating_sub(released);
                }
            }
        }
        Err(throw)
    }

    #[allow(clippy::too_many_arguments)]
    fn step(
        &mut self,
        insn: u8,
        pc: &mut usize,
        code: &[u8],
        consts: &RefCell<Vec<Value>>,
        stack: &mut Vec<Value>,
        binds: &mut Vec<BindEntry>,
        impurity: &mut usize,
    ) -> VmResult<Flow> {
        // Embedded-argument decode: op+0..op+5 inline, op+6 one byte,
        // op+7 two bytes high-first.
        let (op, arg) = if (OP_CALL..OP_PLAIN_BASE).contains(&insn) {
            let base = insn & !0x07;
            let arg = match insn & 0x07 {
                n @ 0..=5 => n as usize,
                6 => fetch!(self, code, pc) as usize,
                _ => fetch2!(self, code, pc),
            };
            (base, arg)
        } else {
            (insn, 0usize)
        };

        match op {
            OP_CALL => {
                let fun = pop!(self, stack);
                if stack.len() < arg {
                    return Err(self.underflow());
                }
                let call_args = stack.split_off(stack.len() - arg);

                // Tail position with no live dynamic bindings: reuse
                // this activation instead of recursing.
                if *impurity == 0 && code.get(*pc) == Some(&OP_RETURN) {
                    if let Value::Closure(c) = &fun {
                        if let Value::Compiled(cf) = c.fun() {
                            tracing::trace!(target: "lisp_vm::vm", "tail call eliminated");
                            if let Some(rec) = self.call_stack.last_mut() {
                                *rec = CallRecord::new(fun.clone(), Value::Nil, true);
                            }
                            return Ok(Flow::Tail(cf.clone(), c.env().clone(), call_args));
                        }
                    }
                }

                let v = self.funcall(fun, &call_args)?;
                stack.push(v);
                self.check_interrupt()?;
                self.gc_and_yield(stack, binds, consts);
            }

            OP_PUSH => {
                let v = self.constant(consts, arg)?;
                stack.push(v);
            }

            OP_REFQ => {
                let sym_v = self.constant(consts, arg)?;
                let sym = self.want_symbol(&sym_v, 1)?;
                let v = self.refq_value(&sym)?;
                stack.push(v);
            }

            OP_SETQ => {
                let sym_v = self.constant(consts, arg)?;
                let sym = self.want_symbol(&sym_v, 1)?;
                let value = pop!(self, stack);
                self.set_symbol_value(&sym, value);
            }

            OP_LIST => {
                let mut tmp = Value::Nil;
                for _ in 0..arg {
                    let v = pop!(self, stack);
                    tmp = self.cons_alloc(v, tmp);
                }
                stack.push(tmp);
            }

            OP_BIND => {
                let sym_v = self.constant(consts, arg)?;
                let sym = self.want_symbol(&sym_v, 1)?;
                let value = pop!(self, stack);
                self.heap.note_alloc(4 * std::mem::size_of::<Value>());
                self.bindings.bind_lexical(sym, value);
                self.mark_frame(binds, false)?;
            }

            OP_BINDSPEC => {
                let sym_v = self.constant(consts, arg)?;
                let sym = self.want_symbol(&sym_v, 1)?;
                let value = pop!(self, stack);
                self.heap.note_alloc(4 * std::mem::size_of::<Value>());
                self.bindings.bind_special(sym, value);
                self.mark_frame(binds, true)?;
                *impurity += 1;
            }

            OP_REFN => {
                let pair = match self.bindings.snap(arg) {
                    Some(pair) => pair,
                    None => return Err(self.signal_str(ConditionKind::Error, "lexical reference out of range")),
                };
                stack.push(pair.cdr());
            }

            OP_SETN => {
                let pair = match self.bindings.snap(arg) {
                    Some(pair) => pair,
                    None => return Err(self.signal_str(ConditionKind::Error, "lexical reference out of range")),
                };
                let value = pop!(self, stack);
                if let Value::Cons(cell) = pair {
                    cell.set_cdr(value);
                }
            }

            OP_REFG => {
                let sym_v = self.constant(consts, arg)?;
                let sym = self.want_symbol(&sym_v, 1)?;
                if let Some(st) = self.current_structure.clone() {
                    if let Some(v) = st.get(&sym) {
                        stack.push(v);
                        return Ok(Flow::Fetch);
                    }
                }
                let v = self.refq_value(&sym)?;
                stack.push(v);
            }

            OP_SETG => {
                let sym_v = self.constant(consts, arg)?;
                let sym = self.want_symbol(&sym_v, 1)?;
                let value = pop!(self, stack);
                match self.current_structure.clone() {
                    Some(st) => st.set(&sym, value),
                    None => self.set_symbol_value(&sym, value),
                }
            }

            OP_INIT_BIND => binds.push(BindEntry::Frame(FrameCounts::default())),

            OP_UNBIND => {
                let entry = match binds.pop() {
                    Some(entry) => entry,
                    None => return Err(self.signal_str(ConditionKind::Error, "binding stack underflow")),
                };
                let released = self.unbind_entry(entry);
                *impurity = impurity.saturating_sub(released);
            }

            OP_UNBINDALL => {
                while binds.len() > 1 {
                    let entry = binds.pop().expect("len checked");
                    self.unbind_entry(entry);
                }
                *impurity = match binds.first() {
                    Some(BindEntry::Frame(c)) => c.specials() as usize,
                    _ => 0,
                };
            }

            OP_UNBINDALL_0 => {
                while let Some(entry) = binds.pop() {
                    self.unbind_entry(entry);
                }
                *impurity = 0;
            }

            OP_BINDOBJ => {
                let obj = pop!(self, stack);
                let handle = self.bind_object(&obj);
                binds.push(BindEntry::Object(handle));
                *impurity += 1;
            }

            OP_BINDERR => {
                let target_v = pop!(self, stack);
                let target = self.want_fixnum(&target_v, 1)?;
                binds.push(BindEntry::Handler {
                    pc: target as usize,
                    sp: stack.len(),
                });
                *impurity += 1;
            }

            OP_DUP => {
                let v = top!(self, stack).clone();
                stack.push(v);
            }

            OP_SWAP => {
                let len = stack.len();
                if len < 2 {
                    return Err(self.underflow());
                }
                stack.swap(len - 1, len - 2);
            }

            OP_SWAP2 => {
                let len = stack.len();
                if len < 3 {
                    return Err(self.underflow());
                }
                stack.swap(len - 1, len - 2);
                stack.swap(len - 2, len - 3);
            }

            OP_POP => {
                pop!(self, stack);
            }

            OP_POP_ALL => stack.clear(),

            OP_NIL => stack.push(Value::Nil),

            OP_T => stack.push(Value::True),

            OP_SCM_TEST => {
                let t = top!(self, stack);
                *t = Value::from_bool(!matches!(t, Value::ScmFalse));
            }

            OP_ENCLOSE => {
                let fun = pop!(self, stack);
                let closure = self.make_closure(fun, Value::Nil);
                stack.push(closure);
            }

            OP_MAKE_CLOSURE => {
                let name = pop!(self, stack);
                let fun = pop!(self, stack);
                let closure = self.make_closure(fun, name);
                stack.push(closure);
            }

            OP_CONS => {
                let cdr = pop!(self, stack);
                let car = pop!(self, stack);
                let pair = self.cons_alloc(car, cdr);
                stack.push(pair);
            }

            OP_CAR => {
                let t = top!(self, stack);
                *t = t.car();
            }

            OP_CDR => {
                let t = top!(self, stack);
                *t = t.cdr();
            }

            OP_RPLACA => {
                let value = pop!(self, stack);
                let target = top!(self, stack).clone();
                match &target {
                    Value::Cons(c) => c.set_car(value),
                    other => {
                        let v = other.clone();
                        return Err(self.bad_arg(&v, 1));
                    }
                }
            }

            OP_RPLACD => {
                let value = pop!(self, stack);
                let target = top!(self, stack).clone();
                match &target {
                    Value::Cons(c) => c.set_cdr(value),
                    other => {
                        let v = other.clone();
                        return Err(self.bad_arg(&v, 1));
                    }
                }
            }

            OP_NTH => {
                let l = pop!(self, stack);
                let index_v = pop!(self, stack);
                let index = self.want_fixnum(&index_v, 1)?;
                stack.push(list::nth(index, &l));
            }

            OP_NTHCDR => {
                let l = pop!(self, stack);
                let index_v = pop!(self, stack);
                let index = self.want_fixnum(&index_v, 1)?;
                stack.push(list::nthcdr(index, &l));
            }

            OP_CAAR => {
                let t = top!(self, stack);
                *t = t.car().car();
            }

            OP_CADR => {
                let t = top!(self, stack);
                *t = t.cdr().car();
            }

            OP_CDAR => {
                let t = top!(self, stack);
                *t = t.car().cdr();
            }

            OP_CDDR => {
                let t = top!(self, stack);
                *t = t.cdr().cdr();
            }

            OP_CADDR => {
                let t = top!(self, stack);
                *t = list::list_ref(t, 2);
            }

            OP_CADDDR => {
                let t = top!(self, stack);
                *t = list::list_ref(t, 3);
            }

            OP_CAD5R => {
                let t = top!(self, stack);
                *t = list::list_ref(t, 4);
            }

            OP_CAD6R => {
                let t = top!(self, stack);
                *t = list::list_ref(t, 5);
            }

            OP_CAD7R => {
                let t = top!(self, stack);
                *t = list::list_ref(t, 6);
            }

            OP_CAD8R => {
                let t = top!(self, stack);
                *t = list::list_ref(t, 7);
            }

            OP_REVERSE => {
                let l = pop!(self, stack);
                if !l.is_list() {
                    return Err(self.bad_arg(&l, 1));
                }
                stack.push(list::reverse(&l));
            }

            OP_NREVERSE => {
                let l = pop!(self, stack);
                if !l.is_list() {
                    return Err(self.bad_arg(&l, 1));
                }
                stack.push(list::nreverse(l));
            }

            OP_MEMBER => {
                let l = pop!(self, stack);
                let elt = pop!(self, stack);
                stack.push(list::member(&elt, &l));
            }

            OP_MEMQ => {
                let l = pop!(self, stack);
                let elt = pop!(self, stack);
                stack.push(list::memq(&elt, &l));
            }

            OP_ASSOC => {
                let alist = pop!(self, stack);
                let key = pop!(self, stack);
                stack.push(list::assoc(&key, &alist));
            }

            OP_ASSQ => {
                let alist = pop!(self, stack);
                let key = pop!(self, stack);
                stack.push(list::assq(&key, &alist));
            }

            OP_RASSOC => {
                let alist = pop!(self, stack);
                let key = pop!(self, stack);
                stack.push(list::rassoc(&key, &alist));
            }

            OP_RASSQ => {
                let alist = pop!(self, stack);
                let key = pop!(self, stack);
                stack.push(list::rassq(&key, &alist));
            }

            OP_LAST => {
                let t = top!(self, stack);
                *t = list::last(t);
            }

            OP_COPY_SEQUENCE => {
                let seq = pop!(self, stack);
                match list::copy_sequence(&seq) {
                    Some(copy) => stack.push(copy),
                    None => return Err(self.bad_arg(&seq, 1)),
                }
            }

            OP_AREF => {
                let index_v = pop!(self, stack);
                let seq = pop!(self, stack);
                let index = self.want_fixnum(&index_v, 2)?;
                if index < 0 {
                    return Err(self.bad_arg(&index_v, 2));
                }
                match list::aref(&seq, index as usize) {
                    Some(v) => stack.push(v),
                    None => return Err(self.bad_arg(&index_v, 2)),
                }
            }

            OP_ASET => {
                let value = pop!(self, stack);
                let index_v = pop!(self, stack);
                let seq = pop!(self, stack);
                let index = self.want_fixnum(&index_v, 2)?;
                if index < 0 || !list::aset(&seq, index as usize, value.clone()) {
                    return Err(self.bad_arg(&index_v, 2));
                }
                stack.push(value);
            }

            OP_LENGTH => {
                let seq = pop!(self, stack);
                match list::length(&seq) {
                    Some(n) => stack.push(Value::Fixnum(n as i64)),
                    None => return Err(self.bad_arg(&seq, 1)),
                }
            }

            OP_GET => {
                let prop = pop!(self, stack);
                let sym_v = pop!(self, stack);
                let sym = self.want_symbol(&sym_v, 1)?;
                stack.push(list::plist_get(&sym.plist(), &prop));
            }

            OP_PUT => {
                let value = pop!(self, stack);
                let prop = pop!(self, stack);
                let sym_v = pop!(self, stack);
                let sym = self.want_symbol(&sym_v, 1)?;
                let plist = list::plist_put(&sym.plist(), &prop, value.clone());
                sym.set_plist(plist);
                stack.push(value);
            }

            OP_STRUCT_REF => {
                let var = pop!(self, stack);
                let name = pop!(self, stack);
                let v = self.structure_ref(&name, &var)?;
                stack.push(v);
            }

            OP_ADD => {
                let y = pop!(self, stack);
                let x = pop!(self, stack);
                if let (Value::Fixnum(a), Value::Fixnum(b)) = (&x, &y) {
                    let sum = a + b;
                    if (MIN_FIXNUM..=MAX_FIXNUM).contains(&sum) {
                        stack.push(Value::Fixnum(sum));
                        return Ok(Flow::Fetch);
                    }
                }
                let v = arith::add(&x, &y).map_err(|e| self.number_error(e, &[&x, &y]))?;
                self.note_number_alloc(&v);
                stack.push(v);
            }

            OP_SUB => {
                let y = pop!(self, stack);
                let x = pop!(self, stack);
                if let (Value::Fixnum(a), Value::Fixnum(b)) = (&x, &y) {
                    let diff = a - b;
                    if (MIN_FIXNUM..=MAX_FIXNUM).contains(&diff) {
                        stack.push(Value::Fixnum(diff));
                        return Ok(Flow::Fetch);
                    }
                }
                let v = arith::sub(&x, &y).map_err(|e| self.number_error(e, &[&x, &y]))?;
                self.note_number_alloc(&v);
                stack.push(v);
            }

            OP_NEG => {
                let x = pop!(self, stack);
                if let Value::Fixnum(n) = &x {
                    let neg = -n;
                    if (MIN_FIXNUM..=MAX_FIXNUM).contains(&neg) {
                        stack.push(Value::Fixnum(neg));
                        return Ok(Flow::Fetch);
                    }
                }
                let v = arith::neg(&x).map_err(|e| self.number_error(e, &[&x]))?;
                self.note_number_alloc(&v);
                stack.push(v);
            }

            OP_MUL => num2!(self, stack, arith::mul),
            OP_DIV => num2!(self, stack, arith::div),
            OP_REM => num2!(self, stack, arith::rem),
            OP_QUOTIENT => num2!(self, stack, arith::quotient),
            OP_MOD => num2!(self, stack, arith::modulo),
            OP_ASH => num2!(self, stack, arith::ash),

            OP_INC => {
                let x = pop!(self, stack);
                if let Value::Fixnum(n) = &x {
                    if *n < MAX_FIXNUM {
                        stack.push(Value::Fixnum(n + 1));
                        return Ok(Flow::Fetch);
                    }
                }
                let v = arith::plus1(&x).map_err(|e| self.number_error(e, &[&x]))?;
                self.note_number_alloc(&v);
                stack.push(v);
            }

            OP_DEC => {
                let x = pop!(self, stack);
                if let Value::Fixnum(n) = &x {
                    if *n > MIN_FIXNUM {
                        stack.push(Value::Fixnum(n - 1));
                        return Ok(Flow::Fetch);
                    }
                }
                let v = arith::sub1(&x).map_err(|e| self.number_error(e, &[&x]))?;
                self.note_number_alloc(&v);
                stack.push(v);
            }

            OP_ZEROP => {
                let t = top!(self, stack);
                *t = Value::from_bool(number::is_zero(t));
            }

            OP_EXP => num1!(self, stack, arith::exp),
            OP_LOG => num1!(self, stack, arith::log),
            OP_SIN => num1!(self, stack, arith::sin),
            OP_COS => num1!(self, stack, arith::cos),
            OP_TAN => num1!(self, stack, arith::tan),
            OP_SQRT => num1!(self, stack, arith::sqrt),
            OP_EXPT => num2!(self, stack, arith::expt),
            OP_FLOOR => num1!(self, stack, arith::floor),
            OP_CEILING => num1!(self, stack, arith::ceiling),
            OP_TRUNCATE => num1!(self, stack, arith::truncate),
            OP_ROUND => num1!(self, stack, arith::round),

            OP_NOT => {
                let t = top!(self, stack);
                *t = Value::from_bool(t.is_nil());
            }

            OP_EQ => {
                let y = pop!(self, stack);
                let t = top!(self, stack);
                *t = Value::from_bool((*t).eq(&y));
            }

            OP_EQL => {
                let y = pop!(self, stack);
                let t = top!(self, stack);
                *t = Value::from_bool(t.eql(&y));
            }

            OP_EQUAL => {
                let y = pop!(self, stack);
                let t = top!(self, stack);
                *t = Value::from_bool(t.equal(&y));
            }

            OP_LT => {
                let y = pop!(self, stack);
                let t = top!(self, stack);
                *t = Value::from_bool(matches!(
                    t.cmp_generic(&y),
                    Some(std::cmp::Ordering::Less)
                ));
            }

            OP_LE => {
                let y = pop!(self, stack);
                let t = top!(self, stack);
                *t = Value::from_bool(matches!(
                    t.cmp_generic(&y),
                    Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)
                ));
            }

            OP_GT => {
                let y = pop!(self, stack);
                let t = top!(self, stack);
                *t = Value::from_bool(matches!(
                    t.cmp_generic(&y),
                    Some(std::cmp::Ordering::Greater)
                ));
            }

            OP_GE => {
                let y = pop!(self, stack);
                let t = top!(self, stack);
                *t = Value::from_bool(matches!(
                    t.cmp_generic(&y),
                    Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal)
                ));
            }

            OP_MAX => {
                let y = pop!(self, stack);
                let t = top!(self, stack);
                if matches!(y.cmp_generic(t), Some(std::cmp::Ordering::Greater)) {
                    *t = y;
                }
            }

            OP_MIN => {
                let y = pop!(self, stack);
                let t = top!(self, stack);
                if matches!(y.cmp_generic(t), Some(std::cmp::Ordering::Less)) {
                    *t = y;
                }
            }

            OP_ATOM => {
                let t = top!(self, stack);
                *t = Value::from_bool(!t.is_cons());
            }

            OP_CONSP => {
                let t = top!(self, stack);
                *t = Value::from_bool(t.is_cons());
            }

            OP_LISTP => {
                let t = top!(self, stack);
                *t = Value::from_bool(t.is_list());
            }

            OP_NUMBERP => {
                let t = top!(self, stack);
                *t = Value::from_bool(t.is_numeric());
            }

            OP_STRINGP => {
                let t = top!(self, stack);
                *t = Value::from_bool(t.is_string());
            }

            OP_VECTORP => {
                let t = top!(self, stack);
                *t = Value::from_bool(t.is_vector());
            }

            OP_SYMBOLP => {
                let t = top!(self, stack);
                *t = Value::from_bool(t.is_symbol());
            }

            OP_BOUNDP => {
                let v = pop!(self, stack);
                let sym = self.want_symbol(&v, 1)?;
                let bound = self.is_bound(&sym);
                stack.push(Value::from_bool(bound));
            }

            OP_FUNCTIONP => {
                let t = top!(self, stack);
                let is_fun = match &*t {
                    Value::Subr(def) => !def.special_form,
                    Value::Closure(_) => true,
                    _ => false,
                };
                *t = Value::from_bool(is_fun);
            }

            OP_MACROP => {
                let t = top!(self, stack);
                *t = Value::from_bool(is_macro(t));
            }

            OP_BYTECODEP => {
                let t = top!(self, stack);
                *t = Value::from_bool(t.is_compiled());
            }

            OP_SPECIAL_FORM_P => {
                let t = top!(self, stack);
                *t = Value::from_bool(matches!(&*t, Value::Subr(def) if def.special_form));
            }

            OP_SUBRP => {
                let t = top!(self, stack);
                *t = Value::from_bool(t.is_subr());
            }

            OP_CLOSUREP => {
                let t = top!(self, stack);
                *t = Value::from_bool(t.is_closure());
            }

            OP_SEQUENCEP => {
                let t = top!(self, stack);
                *t = Value::from_bool(t.is_sequence());
            }

            OP_LNOT => num1!(self, stack, arith::lognot),
            OP_LOR => num2!(self, stack, arith::logior),
            OP_LXOR => num2!(self, stack, arith::logxor),
            OP_LAND => num2!(self, stack, arith::logand),

            OP_PUSHI0 => stack.push(Value::Fixnum(0)),
            OP_PUSHI1 => stack.push(Value::Fixnum(1)),
            OP_PUSHI2 => stack.push(Value::Fixnum(2)),
            OP_PUSHIM1 => stack.push(Value::Fixnum(-1)),
            OP_PUSHIM2 => stack.push(Value::Fixnum(-2)),

            OP_PUSHI => {
                let b = fetch!(self, code, pc);
                stack.push(Value::Fixnum(b as i8 as i64));
            }

            OP_PUSHIWP => {
                let w = fetch2!(self, code, pc);
                stack.push(Value::Fixnum(w as i64));
            }

            OP_PUSHIWN => {
                let w = fetch2!(self, code, pc);
                stack.push(Value::Fixnum(-(w as i64)));
            }

            OP_FORBID => {
                let prior = self.preemptible;
                self.preemptible = false;
                stack.push(Value::from_bool(prior));
            }

            OP_PERMIT => {
                let prior = self.preemptible;
                self.preemptible = true;
                stack.push(Value::from_bool(prior));
            }

            OP_EVAL => {
                let form = pop!(self, stack);
                let v = self.eval(&form)?;
                stack.push(v);
            }

            OP_CATCH => {
                // Stack: saved throw value below, tag on top. On a tag
                // match leave the extracted value with nil above it so
                // a following EJMP completes normally.
                let tag = pop!(self, stack);
                let thrown = top!(self, stack).clone();
                if let Value::Cons(c) = &thrown {
                    if c.car().eq(&tag) {
                        let idx = stack.len() - 1;
                        stack[idx] = c.cdr();
                        stack.push(Value::Nil);
                    }
                }
            }

            OP_THROW => {
                let value = pop!(self, stack);
                let tag = top!(self, stack).clone();
                let pair = self.cons_alloc(tag, value);
                return Err(Throw(pair));
            }

            OP_SIGNAL => {
                let data = pop!(self, stack);
                let sym = pop!(self, stack);
                return Err(self.signal_with_symbol(sym, data));
            }

            OP_ERRORPRO => {
                // Stack: symbol-to-bind, throw value, conditions (top).
                let conditions = pop!(self, stack);
                let thrown = top!(self, stack).clone();
                if let Value::Cons(c) = &thrown {
                    let is_condition =
                        matches!(c.car(), Value::Symbol(s) if s.name() == "error");
                    if is_condition && self.compare_error(&c.cdr(), &conditions) {
                        let data = c.cdr();
                        let to_bind = if stack.len() >= 2 {
                            stack[stack.len() - 2].clone()
                        } else {
                            Value::Nil
                        };
                        let entry = match to_bind {
                            Value::Symbol(sym) => {
                                let mut counts = FrameCounts::default();
                                if sym.is_special() {
                                    self.bindings.bind_special(sym, data);
                                    counts.mark_special();
                                    *impurity += 1;
                                } else {
                                    self.bindings.bind_lexical(sym, data);
                                    counts.mark_lexical();
                                }
                                BindEntry::Frame(counts)
                            }
                            _ => BindEntry::Frame(FrameCounts::default()),
                        };
                        binds.push(entry);
                        let idx = stack.len() - 1;
                        stack[idx] = Value::Nil;
                    }
                }
            }

            OP_RETURN => {
                let v = pop!(self, stack);
                return Ok(Flow::Return(v));
            }

            OP_JMP => {
                let target = fetch2!(self, code, pc);
                *pc = target;
                self.jump_safe_point(stack, binds, consts)?;
            }

            OP_JN => {
                if pop!(self, stack).is_nil() {
                    let target = fetch2!(self, code, pc);
                    *pc = target;
                    self.jump_safe_point(stack, binds, consts)?;
                } else {
                    *pc += 2;
                }
            }

            OP_JT => {
                if !pop!(self, stack).is_nil() {
                    let target = fetch2!(self, code, pc);
                    *pc = target;
                    self.jump_safe_point(stack, binds, consts)?;
                } else {
                    *pc += 2;
                }
            }

            OP_JPN => {
                if top!(self, stack).is_nil() {
                    stack.pop();
                    let target = fetch2!(self, code, pc);
                    *pc = target;
                    self.jump_safe_point(stack, binds, consts)?;
                } else {
                    *pc += 2;
                }
            }

            OP_JPT => {
                if !top!(self, stack).is_nil() {
                    stack.pop();
                    let target = fetch2!(self, code, pc);
                    *pc = target;
                    self.jump_safe_point(stack, binds, consts)?;
                } else {
                    *pc += 2;
                }
            }

            OP_JNP => {
                if top!(self, stack).is_nil() {
                    let target = fetch2!(self, code, pc);
                    *pc = target;
                    self.jump_safe_point(stack, binds, consts)?;
                } else {
                    stack.pop();
                    *pc += 2;
                }
            }

            OP_JTP => {
                if !top!(self, stack).is_nil() {
                    let target = fetch2!(self, code, pc);
                    *pc = target;
                    self.jump_safe_point(stack, binds, consts)?;
                } else {
                    stack.pop();
                    *pc += 2;
                }
            }

            OP_EJMP => {
                // Nil means the protected form completed; anything else
                // republishes the value as the current exception.
                let v = pop!(self, stack);
                if v.is_nil() {
                    let target = fetch2!(self, code, pc);
                    *pc = target;
                    self.jump_safe_point(stack, binds, consts)?;
                } else {
                    return Err(Throw(v));
                }
            }

            unknown => {
                return Err(self.signal(
                    ConditionKind::Error,
                    vec![
                        Value::string("Unknown lisp opcode"),
                        Value::Fixnum(unknown as i64),
                    ],
                ));
            }
        }

        Ok(Flow::Fetch)
    }

    /* dispatch support */

    fn constant(&mut self, consts: &RefCell<Vec<Value>>, idx: usize) -> VmResult<Value> {
        let v = consts.borrow().get(idx).cloned();
        v.ok_or_else(|| self.signal_str(ConditionKind::Error, "constant index out of range"))
    }

    /// `REFQ` body: innermost special binding, then the symbol value.
    fn refq_value(&mut self, sym: &Rc<Symbol>) -> VmResult<Value> {
        if sym.is_special() && !sym.is_local() {
            if let Some(cell) = self.bindings.lookup_special(sym) {
                let v = cell.cdr();
                if !v.is_void() {
                    return Ok(v);
                }
            }
        }
        self.symbol_value(sym)
    }

    fn mark_frame(&mut self, binds: &mut [BindEntry], special: bool) -> VmResult<()> {
        match binds.last_mut() {
            Some(BindEntry::Frame(counts)) => {
                if special {
                    counts.mark_special();
                } else {
                    counts.mark_lexical();
                }
                Ok(())
            }
            _ => Err(self.signal_str(ConditionKind::Error, "no binding frame to mark")),
        }
    }

    fn want_symbol(&mut self, v: &Value, pos: usize) -> VmResult<Rc<Symbol>> {
        match v {
            Value::Symbol(s) => Ok(s.clone()),
            other => {
                let v = other.clone();
                Err(self.bad_arg(&v, pos))
            }
        }
    }

    fn want_fixnum(&mut self, v: &Value, pos: usize) -> VmResult<i64> {
        match v {
            Value::Fixnum(n) => Ok(*n),
            other => {
                let v = other.clone();
                Err(self.bad_arg(&v, pos))
            }
        }
    }

    fn truncated(&mut self) -> Throw {
        self.signal_str(ConditionKind::Error, "byte code string truncated")
    }

    fn underflow(&mut self) -> Throw {
        self.signal_str(ConditionKind::Error, "operand stack underflow")
    }

    fn bind_error(&mut self, e: BindError) -> Throw {
        match e {
            BindError::Missing(pos) => self.missing_arg(pos),
            BindError::Surplus => self.signal_str(ConditionKind::BadArg, "too many arguments"),
            BindError::BadFormals(v) => self.bad_arg(&v, 1),
        }
    }

    /// Count a heap-allocating tower result toward the GC threshold.
    pub(crate) fn note_number_alloc(&mut self, v: &Value) {
        if matches!(v, Value::Bignum(_) | Value::Rational(_)) {
            self.heap.note_alloc(32);
        }
    }

    fn check_interrupt(&mut self) -> VmResult<()> {
        if self.interrupt.take() {
            tracing::debug!(target: "lisp_vm::vm", "async interrupt observed");
            return Err(self.signal(ConditionKind::UserInterrupt, vec![]));
        }
        Ok(())
    }

    /// GC and cooperative-yield half of a safe point.
    fn gc_and_yield(&mut self, stack: &[Value], binds: &[BindEntry], consts: &RefCell<Vec<Value>>) {
        if self.heap.should_collect() {
            tracing::debug!(
                target: "lisp_vm::gc",
                bytes = self.heap.bytes_since_gc(),
                "collecting at safe point"
            );
            let lexical = self.bindings.lexical_head();
            let special = self.bindings.special_head();
            let pool = consts.borrow();
            self.hooks.collect(Roots {
                operands: stack,
                bindings: binds,
                constants: pool.as_slice(),
                lexical_env: &lexical,
                special_env: &special,
            });
            self.heap.collection_done();
        }
        if self.preemptible {
            self.hooks.yield_now();
        }
    }

    /// Full safe point at jump back-edges.
    fn jump_safe_point(
        &mut self,
        stack: &[Value],
        binds: &[BindEntry],
        consts: &RefCell<Vec<Value>>,
    ) -> VmResult<()> {
        self.check_interrupt()?;
        self.gc_and_yield(stack, binds, consts);
        Ok(())
    }
}
