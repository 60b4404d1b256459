//! The closed set of failure kinds.
//!
//! Textual messages on [`DecodeError`](crate::parser::DecodeError) and
//! [`Trap`](crate::runtime::Trap) are advisory; the [`ErrorKind`] they map
//! to is the contract.

use std::fmt;

use crate::parser::DecodeError;
use crate::runtime::Trap;

/// Every way a module can fail to decode, instantiate, or execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    MalformedBinary,
    UnsupportedVersion,
    InvalidSection,
    InvalidImportKind,
    UnknownImport,
    TypeMismatch,
    InvalidOpcode,
    StackUnderflow,
    MemoryOutOfBounds,
    TableOutOfBounds,
    IndirectCallTypeMismatch,
    IntegerDivideByZero,
    IntegerOverflow,
    InvalidConversionToInteger,
    UnreachableExecuted,
    OutOfGas,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::MalformedBinary => "malformed-binary",
            ErrorKind::UnsupportedVersion => "unsupported-version",
            ErrorKind::InvalidSection => "invalid-section",
            ErrorKind::InvalidImportKind => "invalid-import-kind",
            ErrorKind::UnknownImport => "unknown-import",
            ErrorKind::TypeMismatch => "type-mismatch",
            ErrorKind::InvalidOpcode => "invalid-opcode",
            ErrorKind::StackUnderflow => "stack-underflow",
            ErrorKind::MemoryOutOfBounds => "memory-out-of-bounds",
            ErrorKind::TableOutOfBounds => "table-out-of-bounds",
            ErrorKind::IndirectCallTypeMismatch => "indirect-call-type-mismatch",
            ErrorKind::IntegerDivideByZero => "integer-divide-by-zero",
            ErrorKind::IntegerOverflow => "integer-overflow",
            ErrorKind::InvalidConversionToInteger => "invalid-conversion-to-integer",
            ErrorKind::UnreachableExecuted => "unreachable-executed",
            ErrorKind::OutOfGas => "out-of-gas",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level error: a decode failure or an execution trap.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Trap(#[from] Trap),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Decode(e) => e.kind(),
            Error::Trap(t) => t.kind(),
        }
    }
}
