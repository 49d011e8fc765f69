//! Runtime error implementation for the VM and the numeric tower.

use crate::value::Value;

use strum::IntoStaticStr;
use thiserror::Error;

/// Data string carried by divide-by-zero conditions.
pub const DIVIDE_BY_ZERO: &str = "Divide by zero";

/// Data string carried by domain-violation conditions.
pub const DOMAIN_ERROR: &str = "Domain error";

/// Message attached to the recursion-limit condition.
pub const MAX_DEPTH: &str = "max-lisp-depth exceeded, possible infinite recursion?";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
/// Condition kinds the core raises. Each maps to an interned symbol of
/// the same (kebab-case) name, used as the head of the error object.
pub enum ConditionKind {
    /// Generic error.
    Error,
    /// Byte-code version check failed.
    BytecodeError,
    /// Division by zero or domain violation.
    ArithError,
    /// Attempt to call a non-callable value.
    InvalidFunction,
    /// A required argument was not supplied.
    MissingArg,
    /// An argument had the wrong type.
    BadArg,
    /// Async cancellation flag observed at a safe point.
    UserInterrupt,
    /// Recursion limit exceeded.
    MaxDepthExceeded,
}

impl ConditionKind {
    /// Symbol name of this condition kind.
    pub fn name(self) -> &'static str {
        self.into()
    }
}

#[derive(Debug, Clone)]
/// An in-flight non-local exit: the `(tag . data)` pair travelling to
/// its handler. Conditions raised by `signal` carry the `error` symbol
/// as tag and the `(kind . data)` error object as data.
pub struct Throw(pub Value);

impl Throw {
    /// The thrown `(tag . data)` pair.
    pub fn value(&self) -> &Value {
        &self.0
    }

    /// Take ownership of the thrown pair.
    pub fn into_value(self) -> Value {
        self.0
    }
}

/// Result alphabet of every fallible VM operation. There is no *null*
/// sentinel value marking "exception raised, result invalid"; that
/// state is the `Err` branch and never appears as a `Value`.
pub type VmResult<T> = Result<T, Throw>;

/// Host-facing interpreter error variants.
#[derive(Debug, Error)]
pub enum VmError {
    /// An exception escaped every installed handler.
    #[error("uncaught lisp exception: {0}")]
    Uncaught(Value),
    /// The host handed the VM a value that cannot be applied.
    #[error("not a callable value: {0}")]
    NotCallable(Value),
}

impl VmError {
    /// The escaped `(tag . data)` pair, if this is an uncaught throw.
    pub fn thrown(&self) -> Option<&Value> {
        match self {
            Self::Uncaught(v) => Some(v),
            _ => None,
        }
    }
}

impl From<Throw> for VmError {
    fn from(t: Throw) -> Self {
        Self::Uncaught(t.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn condition_names_are_kebab_case_symbols() {
        assert_eq!(ConditionKind::ArithError.name(), "arith-error");
        assert_eq!(ConditionKind::BytecodeError.name(), "bytecode-error");
        assert_eq!(ConditionKind::UserInterrupt.name(), "user-interrupt");
        assert_eq!(ConditionKind::MaxDepthExceeded.name(), "max-depth-exceeded");
        assert_eq!(ConditionKind::Error.name(), "error");
    }
}
