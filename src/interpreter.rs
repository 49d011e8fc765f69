//! VM state and host-facing API.
//!
//! Every process-global of a classic Lisp runtime — environment heads,
//! the call stack, the recursion depth, allocation accounting, the
//! preemption flag — lives in one [`Interpreter`] value, so fibers are
//! just separate interpreters sharing an interrupt handle.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::call::{apply_subr, CallRecord, SubrDef};
use crate::consts::{DEFAULT_GC_THRESHOLD, DEFAULT_MAX_LISP_DEPTH};
use crate::error::{ConditionKind, Throw, VmError, VmResult, DIVIDE_BY_ZERO, DOMAIN_ERROR};
use crate::env::{BindEntry, BindingEnv, ObjectHooks};
use crate::gc::{Heap, NoopHooks, RuntimeHooks};
use crate::number::NumberError;
use crate::value::{Symbol, SymbolTable, TypeTag, Value};

mod dispatch;

/// Cloneable cross-thread handle used to request async cancellation;
/// the VM observes the flag at its next safe point.
#[derive(Debug, Clone, Default)]
pub struct InterruptHandle(Arc<AtomicBool>);

impl InterruptHandle {
    /// Request cancellation of the running program.
    pub fn interrupt(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether a request is pending.
    pub fn is_pending(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

/// A module-scoped namespace: symbol-id to value.
#[derive(Debug)]
pub struct Structure {
    name: Rc<Symbol>,
    table: RefCell<HashMap<u32, Value>>,
}

impl Structure {
    pub fn new(name: Rc<Symbol>) -> Self {
        Self {
            name,
            table: RefCell::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &Rc<Symbol> {
        &self.name
    }

    pub fn get(&self, sym: &Rc<Symbol>) -> Option<Value> {
        self.table.borrow().get(&sym.id()).cloned()
    }

    pub fn set(&self, sym: &Rc<Symbol>, value: Value) {
        self.table.borrow_mut().insert(sym.id(), value);
    }
}

/// The byte-code virtual machine.
pub struct Interpreter {
    bindings: BindingEnv,
    call_stack: Vec<CallRecord>,
    failed_stack: Vec<CallRecord>,
    depth: usize,
    max_depth: usize,
    heap: Heap,
    hooks: Box<dyn RuntimeHooks>,
    interrupt: InterruptHandle,
    preemptible: bool,
    symbols: SymbolTable,
    structures: HashMap<u32, Rc<Structure>>,
    current_structure: Option<Rc<Structure>>,
    object_hooks: HashMap<TypeTag, ObjectHooks>,
}

impl fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interpreter")
            .field("depth", &self.depth)
            .field("call_stack", &self.call_stack.len())
            .field("symbols", &self.symbols.len())
            .field("preemptible", &self.preemptible)
            .finish()
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        Self::with_hooks(Box::new(NoopHooks))
    }

    /// Build a VM with collector/scheduler hooks installed.
    pub fn with_hooks(hooks: Box<dyn RuntimeHooks>) -> Self {
        let mut vm = Self {
            bindings: BindingEnv::new(),
            call_stack: Vec::new(),
            failed_stack: Vec::new(),
            depth: 0,
            max_depth: DEFAULT_MAX_LISP_DEPTH,
            heap: Heap::new(DEFAULT_GC_THRESHOLD),
            hooks,
            interrupt: InterruptHandle::default(),
            preemptible: true,
            symbols: SymbolTable::new(),
            structures: HashMap::new(),
            current_structure: None,
            object_hooks: HashMap::new(),
        };
        crate::primitives::install(&mut vm);
        vm
    }

    /* host API */

    /// Apply a function to arguments, running byte code as needed.
    pub fn call(&mut self, fun: &Value, args: &[Value]) -> Result<Value, VmError> {
        if !matches!(fun, Value::Closure(_) | Value::Subr(_)) {
            return Err(VmError::NotCallable(fun.clone()));
        }
        self.failed_stack.clear();
        self.funcall(fun.clone(), args).map_err(VmError::from)
    }

    /// Evaluate a single form: atoms, quoting and applications.
    pub fn eval_form(&mut self, form: &Value) -> Result<Value, VmError> {
        self.failed_stack.clear();
        self.eval(form).map_err(VmError::from)
    }

    /// Handle for requesting async cancellation from another thread.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    /// Bound on nested VM activations.
    pub fn set_max_depth(&mut self, max: usize) {
        self.max_depth = max;
    }

    pub const fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Current activation depth.
    pub const fn depth(&self) -> usize {
        self.depth
    }

    /// Allocation volume after which safe points trigger collection.
    pub fn set_gc_threshold(&mut self, bytes: usize) {
        self.heap.set_threshold(bytes);
    }

    /// Allocation/collection accounting.
    pub const fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Whether the cooperative yield hook runs at safe points.
    pub const fn is_preemptible(&self) -> bool {
        self.preemptible
    }

    /// Call records pending when the last uncaught error escaped,
    /// outermost first.
    pub fn failed_call_stack(&self) -> &[CallRecord] {
        self.failed_stack.as_slice()
    }

    /// Currently pending call records, outermost first.
    pub fn call_stack(&self) -> &[CallRecord] {
        self.call_stack.as_slice()
    }

    /* symbols */

    /// Intern a symbol.
    pub fn intern(&mut self, name: &str) -> Rc<Symbol> {
        self.symbols.intern(name)
    }

    /// Intern a symbol as a value.
    pub fn intern_value(&mut self, name: &str) -> Value {
        Value::Symbol(self.symbols.intern(name))
    }

    /// Intern a symbol, mark it special, and optionally give its
    /// global cell a value.
    pub fn define_special(&mut self, name: &str, value: Option<Value>) -> Rc<Symbol> {
        let sym = self.symbols.intern(name);
        sym.make_special();
        if let Some(v) = value {
            sym.set_value(v);
        }
        sym
    }

    /// Register a native primitive under its name's value cell.
    pub fn register_subr(&mut self, def: &'static SubrDef) {
        let sym = self.symbols.intern(def.name);
        sym.set_value(Value::Subr(def));
    }

    /// Value of a symbol: innermost special binding first, then the
    /// global cell. Unbound symbols signal.
    pub fn symbol_value(&mut self, sym: &Rc<Symbol>) -> VmResult<Value> {
        if sym.is_special() && !sym.is_local() {
            if let Some(cell) = self.bindings.lookup_special(sym) {
                let v = cell.cdr();
                if !v.is_void() {
                    return Ok(v);
                }
            }
        }
        let v = sym.value();
        if v.is_void() {
            let s = Value::Symbol(sym.clone());
            Err(self.signal(
                ConditionKind::Error,
                vec![Value::string("No value for symbol"), s],
            ))
        } else {
            Ok(v)
        }
    }

    /// Assign a symbol: innermost special binding first, then the
    /// global cell.
    pub fn set_symbol_value(&mut self, sym: &Rc<Symbol>, value: Value) {
        if sym.is_special() && !sym.is_local() {
            if let Some(cell) = self.bindings.lookup_special(sym) {
                cell.set_cdr(value);
                return;
            }
        }
        sym.set_value(value);
    }

    /// Whether the symbol currently has a value.
    pub fn is_bound(&self, sym: &Rc<Symbol>) -> bool {
        if sym.is_special() {
            if let Some(cell) = self.bindings.lookup_special(sym) {
                return !cell.cdr().is_void();
            }
        }
        !sym.value().is_void()
    }

    /* structures */

    /// Create and register a named structure.
    pub fn define_structure(&mut self, name: &str) -> Rc<Structure> {
        let sym = self.symbols.intern(name);
        let st = Rc::new(Structure::new(sym.clone()));
        self.structures.insert(sym.id(), st.clone());
        st
    }

    /// Select the structure scoping `REFG`/`SETG`.
    pub fn set_current_structure(&mut self, st: Option<Rc<Structure>>) {
        self.current_structure = st;
    }

    pub fn current_structure(&self) -> Option<&Rc<Structure>> {
        self.current_structure.as_ref()
    }

    /// Look `var` up inside the structure registered under `name`.
    pub fn structure_ref(&mut self, name: &Value, var: &Value) -> VmResult<Value> {
        let sym = match name {
            Value::Symbol(s) => s,
            other => {
                let v = other.clone();
                return Err(self.bad_arg(&v, 1));
            }
        };
        let var_sym = match var {
            Value::Symbol(s) => s.clone(),
            other => {
                let v = other.clone();
                return Err(self.bad_arg(&v, 2));
            }
        };
        match self.structures.get(&sym.id()).cloned() {
            Some(st) => match st.get(&var_sym) {
                Some(v) => Ok(v),
                None => {
                    let s = Value::Symbol(var_sym);
                    Err(self.signal(
                        ConditionKind::Error,
                        vec![Value::string("No value in structure"), s],
                    ))
                }
            },
            None => {
                let s = name.clone();
                Err(self.signal(
                    ConditionKind::Error,
                    vec![Value::string("No such structure"), s],
                ))
            }
        }
    }

    /* resource binds */

    /// Register bind/release hooks for a value type.
    pub fn register_object_hooks(&mut self, tag: TypeTag, hooks: ObjectHooks) {
        self.object_hooks.insert(tag, hooks);
    }

    /// Obtain the release handle for a resource bind of `obj`.
    pub(crate) fn bind_object(&mut self, obj: &Value) -> Value {
        match self.object_hooks.get(&obj.type_tag()) {
            Some(hooks) => (hooks.bind)(obj),
            None => Value::Nil,
        }
    }

    /// Run the release hook for a bind handle.
    pub(crate) fn release_object(&mut self, handle: &Value) {
        if let Some(hooks) = self.object_hooks.get(&handle.type_tag()) {
            (hooks.unbind)(handle);
        }
    }

    /// Release one binding-stack entry; returns the number of dynamic
    /// bindings removed. Handler entries are consumed by the error
    /// protocol, not by unwinding, and release nothing.
    pub(crate) fn unbind_entry(&mut self, entry: BindEntry) -> usize {
        match entry {
            BindEntry::Frame(counts) => self.bindings.unbind_counts(counts),
            BindEntry::Handler { .. } => 0,
            BindEntry::Object(handle) => {
                self.release_object(&handle);
                1
            }
        }
    }

    /* conditions */

    /// Build a throw for a condition of the given kind.
    pub fn signal(&mut self, kind: ConditionKind, data: Vec<Value>) -> Throw {
        let kind_sym = self.intern_value(kind.name());
        self.signal_with_symbol(kind_sym, Value::list(&data))
    }

    /// Build a throw for a condition whose kind symbol and data list
    /// are already values: `(error kind . data)`.
    pub fn signal_with_symbol(&mut self, kind: Value, data: Value) -> Throw {
        tracing::debug!(target: "lisp_vm::condition", kind = %kind, "signalling");
        let err = self.intern_value("error");
        self.heap.note_alloc(2 * std::mem::size_of::<Value>() * 2);
        Throw(Value::cons(err, Value::cons(kind, data)))
    }

    /// Condition carrying a single message string.
    pub fn signal_str(&mut self, kind: ConditionKind, msg: &str) -> Throw {
        self.signal(kind, vec![Value::string(msg)])
    }

    pub(crate) fn bad_arg(&mut self, value: &Value, pos: usize) -> Throw {
        self.signal(
            ConditionKind::BadArg,
            vec![value.clone(), Value::Fixnum(pos as i64)],
        )
    }

    pub(crate) fn missing_arg(&mut self, pos: usize) -> Throw {
        self.signal(ConditionKind::MissingArg, vec![Value::Fixnum(pos as i64)])
    }

    /// Map a tower failure onto its condition, attaching the offending
    /// operand for argument-type errors.
    pub(crate) fn number_error(&mut self, e: NumberError, args: &[&Value]) -> Throw {
        match e {
            NumberError::DivideByZero => self.signal_str(ConditionKind::ArithError, DIVIDE_BY_ZERO),
            NumberError::Domain => self.signal_str(ConditionKind::ArithError, DOMAIN_ERROR),
            NumberError::NotANumber(pos) => {
                let v = args.get(pos - 1).map(|v| (*v).clone()).unwrap_or(Value::Nil);
                self.bad_arg(&v, pos)
            }
        }
    }

    /// Does the handler's condition list cover this `(kind . data)`
    /// error object? A bare symbol matches its own kind, a list
    /// matches by membership, and the root `error` symbol matches
    /// everything.
    pub(crate) fn compare_error(&self, error_data: &Value, conditions: &Value) -> bool {
        let kind = error_data.car();
        let is_root = |v: &Value| matches!(v, Value::Symbol(s) if s.name() == "error");
        match conditions {
            Value::Symbol(_) => is_root(conditions) || conditions.eq(&kind),
            Value::Cons(_) => conditions
                .iter_list()
                .any(|c| is_root(&c) || c.eq(&kind)),
            _ => false,
        }
    }

    /* application */

    /// Call a function value on evaluated arguments, pushing a call
    /// record for backtraces.
    pub fn funcall(&mut self, fun: Value, args: &[Value]) -> VmResult<Value> {
        let mark = self.call_stack.len();
        self.call_stack
            .push(CallRecord::new(fun.clone(), Value::Nil, true));
        let result = self.apply(fun, args);
        if result.is_err() && self.failed_stack.is_empty() {
            self.failed_stack = self.call_stack.clone();
        }
        self.call_stack.truncate(mark);
        result
    }

    fn apply(&mut self, fun: Value, args: &[Value]) -> VmResult<Value> {
        match fun {
            Value::Subr(def) => apply_subr(self, def, args),
            Value::Closure(ref c) => match c.fun() {
                Value::Compiled(cf) => {
                    let cf = cf.clone();
                    let env = c.env().clone();
                    self.run(cf, env, args)
                }
                _ => Err(self.invalid_function(fun.clone())),
            },
            other => Err(self.invalid_function(other)),
        }
    }

    pub(crate) fn invalid_function(&mut self, fun: Value) -> Throw {
        self.signal(ConditionKind::InvalidFunction, vec![fun])
    }

    /// Overwrite the argument list of the innermost call record.
    pub(crate) fn set_current_call_args(&mut self, args: Value) {
        if let Some(rec) = self.call_stack.last_mut() {
            *rec = CallRecord::new(rec.fun().clone(), args, rec.args_evalled());
        }
    }

    /// The single-form evaluator behind the `EVAL` opcode: atoms,
    /// `quote`, and function application. Anything richer belongs to
    /// an outer driver.
    pub fn eval(&mut self, form: &Value) -> VmResult<Value> {
        match form {
            Value::Symbol(sym) => {
                if !sym.is_special() {
                    if let Some(cell) = self.bindings.assq_lexical(sym) {
                        return Ok(cell.cdr());
                    }
                }
                let sym = sym.clone();
                self.symbol_value(&sym)
            }
            Value::Cons(c) => {
                let head = c.car();
                if let Value::Symbol(s) = &head {
                    if s.name() == "quote" {
                        return Ok(c.cdr().car());
                    }
                }
                let fun = self.eval(&head)?;
                let mut args = Vec::new();
                for a in c.cdr().iter_list() {
                    args.push(self.eval(&a)?);
                }
                self.funcall(fun, &args)
            }
            other => Ok(other.clone()),
        }
    }

    /// Wrap a function with the current lexical environment.
    pub(crate) fn make_closure(&mut self, fun: Value, name: Value) -> Value {
        let env = self.bindings.lexical_head();
        Value::Closure(Rc::new(crate::value::Closure::new(fun, env, name)))
    }

    /// Allocate a pair, counting it toward the GC threshold.
    pub(crate) fn cons_alloc(&mut self, car: Value, cdr: Value) -> Value {
        self.heap.note_alloc(2 * std::mem::size_of::<Value>());
        Value::cons(car, cdr)
    }
}
