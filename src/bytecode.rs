//! Compiled-function records and byte-code validation.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::consts::{BYTECODE_MAJOR_VERSION, BYTECODE_MINOR_VERSION};
use crate::value::Value;

/// Packed stack requirement of a compiled function: operand-stack
/// depth in the low 16 bits, binding-stack depth minus one in the
/// high 16 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackReq {
    operands: u16,
    bindings: u16,
}

impl StackReq {
    /// `bindings` counts the argument frame, so it is at least one.
    pub const fn new(operands: u16, bindings: u16) -> Self {
        Self {
            operands,
            bindings: if bindings == 0 { 1 } else { bindings },
        }
    }

    pub const fn operands(&self) -> u16 {
        self.operands
    }

    pub const fn bindings(&self) -> u16 {
        self.bindings
    }

    pub const fn pack(&self) -> i64 {
        (((self.bindings - 1) as i64) << 16) | self.operands as i64
    }

    pub const fn unpack(v: i64) -> Self {
        Self {
            operands: (v & 0xffff) as u16,
            bindings: ((v >> 16) & 0xffff) as u16 + 1,
        }
    }
}

/// Slot-shape failures of [`CompiledFn::from_slots`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackError {
    /// Fewer than the four mandatory slots.
    Missing(usize),
    /// Slot at this 1-based position has the wrong type.
    BadSlot(usize),
}

/// A compiled function: lambda list, code string, constant pool,
/// stack requirement, and optional documentation and interactive
/// specification. Externally this is a vector-shaped object of 4..6
/// slots with a distinguishing type tag.
pub struct CompiledFn {
    lambda: Value,
    code: Rc<[u8]>,
    consts: Rc<RefCell<Vec<Value>>>,
    stack: StackReq,
    doc: Value,
    interactive: Value,
}

impl CompiledFn {
    pub fn new(
        lambda: Value,
        code: Rc<[u8]>,
        consts: Rc<RefCell<Vec<Value>>>,
        stack: StackReq,
        doc: Value,
        interactive: Value,
    ) -> Self {
        Self {
            lambda,
            code,
            consts,
            stack,
            doc,
            interactive,
        }
    }

    /// Build from the external 4..6-slot vector shape, checking each
    /// slot's type the way `make-byte-code-subr` demands.
    pub fn from_slots(slots: &[Value]) -> Result<Self, PackError> {
        if slots.len() < 4 {
            return Err(PackError::Missing(slots.len() + 1));
        }
        let lambda = match &slots[0] {
            v @ (Value::Cons(_) | Value::Symbol(_) | Value::Nil) => v.clone(),
            _ => return Err(PackError::BadSlot(1)),
        };
        let code = match &slots[1] {
            Value::String(bytes) => bytes.clone(),
            _ => return Err(PackError::BadSlot(2)),
        };
        let consts = match &slots[2] {
            Value::Vector(v) => v.clone(),
            _ => return Err(PackError::BadSlot(3)),
        };
        let stack = match &slots[3] {
            Value::Fixnum(n) => StackReq::unpack(*n),
            _ => return Err(PackError::BadSlot(4)),
        };
        let doc = slots.get(4).cloned().unwrap_or(Value::Nil);
        let interactive = slots.get(5).cloned().unwrap_or(Value::Nil);
        Ok(Self::new(lambda, code, consts, stack, doc, interactive))
    }

    /// Lambda list.
    pub fn lambda(&self) -> &Value {
        &self.lambda
    }

    /// The byte-code string.
    pub fn code(&self) -> Rc<[u8]> {
        self.code.clone()
    }

    /// The constant pool.
    pub fn consts(&self) -> Rc<RefCell<Vec<Value>>> {
        self.consts.clone()
    }

    pub const fn stack_req(&self) -> StackReq {
        self.stack
    }

    pub fn doc(&self) -> &Value {
        &self.doc
    }

    pub fn interactive(&self) -> &Value {
        &self.interactive
    }

    /// External vector shape with trailing nil slots normalized away.
    pub fn slots(&self) -> Vec<Value> {
        let mut out = vec![
            self.lambda.clone(),
            Value::String(self.code.clone()),
            Value::Vector(self.consts.clone()),
            Value::Fixnum(self.stack.pack()),
            self.doc.clone(),
            self.interactive.clone(),
        ];
        while out.len() > 4 && out.last().is_some_and(Value::is_nil) {
            out.pop();
        }
        out
    }
}

impl fmt::Debug for CompiledFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledFn")
            .field("lambda", &self.lambda)
            .field("code_len", &self.code.len())
            .field("consts", &self.consts.borrow().len())
            .field("stack", &self.stack)
            .finish()
    }
}

/// Check that byte codes of instruction set `major.minor` may run on
/// this VM: the major must match exactly, the stream's minor must not
/// exceed ours.
pub const fn validate_byte_code(major: i64, minor: i64) -> bool {
    major == BYTECODE_MAJOR_VERSION && minor <= BYTECODE_MINOR_VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_req_packs_binding_depth_minus_one() {
        let req = StackReq::new(12, 3);
        assert_eq!(req.pack(), (2 << 16) | 12);
        assert_eq!(StackReq::unpack(req.pack()), req);
        // zero binding depth still accounts for the argument frame
        assert_eq!(StackReq::new(4, 0).bindings(), 1);
    }

    #[test]
    fn slots_normalize_trailing_nils() {
        let code = Value::String(Rc::from(&[OP_RET_BYTE][..]));
        let consts = Value::vector(vec![]);
        let built = CompiledFn::from_slots(&[
            Value::Nil,
            code,
            consts,
            Value::Fixnum(StackReq::new(1, 1).pack()),
            Value::Nil,
            Value::Nil,
        ])
        .unwrap();
        assert_eq!(built.slots().len(), 4);
    }

    #[test]
    fn slot_types_are_checked() {
        assert!(matches!(
            CompiledFn::from_slots(&[Value::Nil]),
            Err(PackError::Missing(2))
        ));
        let r = CompiledFn::from_slots(&[
            Value::Fixnum(1),
            Value::Nil,
            Value::Nil,
            Value::Nil,
        ]);
        assert!(matches!(r, Err(PackError::BadSlot(1))));
    }

    #[test]
    fn version_check_is_major_exact_minor_monotone() {
        assert!(validate_byte_code(
            BYTECODE_MAJOR_VERSION,
            BYTECODE_MINOR_VERSION
        ));
        assert!(validate_byte_code(BYTECODE_MAJOR_VERSION, 0));
        assert!(!validate_byte_code(BYTECODE_MAJOR_VERSION + 1, 0));
        assert!(!validate_byte_code(
            BYTECODE_MAJOR_VERSION,
            BYTECODE_MINOR_VERSION + 1
        ));
    }

    const OP_RET_BYTE: u8 = crate::opcode::OP_RETURN;
}
