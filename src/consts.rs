//! VM parameters

/* FIXNUM REPRESENTATION */

/// Bits of a fixnum payload; the remainder of the word is reserved for
/// tagging in the serialized representation.
pub const FIXNUM_BITS: u32 = 62;

/// Largest integer representable without a heap cell.
pub const MAX_FIXNUM: i64 = (1 << (FIXNUM_BITS - 1)) - 1;

/// Smallest integer representable without a heap cell.
pub const MIN_FIXNUM: i64 = -(1 << (FIXNUM_BITS - 1));

/* INSTRUCTION ENCODING */

/// Shift applied to the high byte of a two-byte embedded argument or
/// jump target.
pub const ARG_SHIFT: u32 = 8;

/// Largest immediate that fits in the low three bits of an opcode.
pub const MAX_INLINE_ARG: u8 = 5;

/// Low-bits value selecting a one-byte trailing argument.
pub const ARG_1BYTE: u8 = 6;

/// Low-bits value selecting a two-byte trailing argument.
pub const ARG_2BYTE: u8 = 7;

/* BYTECODE VERSIONING */

/// Instruction-set major version; streams must match exactly.
pub const BYTECODE_MAJOR_VERSION: i64 = 12;

/// Instruction-set minor version; streams may require at most this.
pub const BYTECODE_MINOR_VERSION: i64 = 2;

/* LIMITS */

/// Default bound on nested VM activations.
pub const DEFAULT_MAX_LISP_DEPTH: usize = 500;

/// Default allocation volume (bytes) between garbage collections.
pub const DEFAULT_GC_THRESHOLD: usize = 200_000;

/// Default float printing precision (significant digits).
pub const FLOAT_PRINT_PRECISION: usize = 16;

/// Largest radix accepted when printing exact numbers.
pub const MAX_PRINT_RADIX: u32 = 36;
