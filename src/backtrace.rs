//! Backtrace implementation to track Lisp execution errors.

use itertools::Itertools;
use std::fmt;

use crate::call::CallRecord;
use crate::error::VmError;
use crate::interpreter::Interpreter;
use crate::value::Value;

/// Runtime description derived from a VM error: the pending call
/// records at the moment the exception escaped, innermost first, and
/// the escaped value itself.
#[derive(Debug, Clone)]
pub struct Backtrace {
    call_stack: Vec<CallRecord>,
    thrown: Value,
}

impl Backtrace {
    /// Create a backtrace from a vm instance and the error it
    /// reported.
    ///
    /// This isn't copy-free and shouldn't be taken by default.
    pub fn from_vm_error(vm: &Interpreter, error: &VmError) -> Self {
        let thrown = error.thrown().cloned().unwrap_or(Value::Nil);
        let mut call_stack = vm.failed_call_stack().to_owned();
        call_stack.reverse();

        Self { call_stack, thrown }
    }

    /// Call records pending when the error occurred, innermost first.
    pub fn call_stack(&self) -> &[CallRecord] {
        self.call_stack.as_slice()
    }

    /// The escaped `(tag . data)` value.
    pub fn thrown(&self) -> &Value {
        &self.thrown
    }

    /// Expose the internal attributes of the backtrace.
    pub fn into_inner(self) -> (Vec<CallRecord>, Value) {
        (self.call_stack, self.thrown)
    }
}

impl fmt::Display for Backtrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "uncaught: {}", self.thrown)?;
        let frames = self
            .call_stack
            .iter()
            .enumerate()
            .map(|(i, record)| format!("  #{} {}", i, record.describe()))
            .join("\n");
        write!(f, "{}", frames)
    }
}
