//! Byte-code interpreter and numeric tower for a Lisp runtime.
//!
//! The crate has two tightly-coupled halves: a stack-based virtual
//! machine executing compiled byte code, and the tower of exact and
//! inexact numeric types its arithmetic opcodes dispatch into. They
//! share the tagged [`value::Value`] representation; the compiler that
//! emits byte code, the garbage collector and the outer read/eval
//! driver all live elsewhere and talk to this crate through
//! [`interpreter::Interpreter`] and [`gc::RuntimeHooks`].

pub mod backtrace;
pub mod bytecode;
pub mod call;
pub mod consts;
pub mod env;
pub mod error;
pub mod gc;
pub mod interpreter;
pub mod list;
pub mod number;
pub mod opcode;
pub mod primitives;
pub mod value;

pub mod prelude {
    pub use crate::backtrace::Backtrace;
    pub use crate::bytecode::{validate_byte_code, CompiledFn, StackReq};
    pub use crate::call::{CallRecord, SubrDef, SubrImpl};
    pub use crate::consts::{
        BYTECODE_MAJOR_VERSION, BYTECODE_MINOR_VERSION, MAX_FIXNUM, MIN_FIXNUM,
    };
    pub use crate::env::{BindEntry, BindingEnv, FrameCounts, ObjectHooks};
    pub use crate::error::{ConditionKind, Throw, VmError, VmResult};
    pub use crate::gc::{Heap, NoopHooks, Roots, RuntimeHooks};
    pub use crate::interpreter::{Interpreter, InterruptHandle, Structure};
    pub use crate::number::format::print_number;
    pub use crate::number::parse::{parse_number, parse_number_str, ParseKind};
    pub use crate::number::NumberKind;
    pub use crate::opcode::{Assembler, Label};
    pub use crate::value::{Closure, Cons, Symbol, SymbolFlags, SymbolTable, TypeTag, Value};
}
