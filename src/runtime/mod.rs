//! WebAssembly runtime implementation.
//!
//! This module provides the execution engine for decoded modules: the
//! operand stack, call frames, linear memory, tables, globals, the
//! instruction interpreter, and the host-function bridge. Execution is
//! single-threaded and synchronous; a trap unwinds every active frame
//! and surfaces to the outermost caller.

pub mod frame;
pub mod hostfunc;
pub mod instance;
pub mod memory;
pub mod opcode;
pub mod ops;
pub mod stack;
pub mod table;
pub mod value;
pub mod vm;

pub use hostfunc::{HostContext, HostResults, HostSignature, ModuleBuilder};
pub use instance::{Instance, Registry};
pub use memory::Memory;
pub use table::Table;
pub use value::Value;
pub use vm::VirtualMachine;

use crate::error::ErrorKind;
use crate::gas::OutOfGas;
use crate::parser::DecodeError;

/// An execution failure. Traps unwind all active frames of the current
/// invocation; runtime state keeps every write that preceded the trap.
#[derive(Debug, thiserror::Error)]
pub enum Trap {
    #[error("stack underflow")]
    StackUnderflow,
    #[error("call stack exhausted")]
    CallStackExhausted,
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },
    #[error("invalid opcode {0:#04x}")]
    InvalidOpcode(u8),
    #[error("truncated or malformed code body")]
    MalformedBody,
    #[error("branch label {0} out of bounds")]
    InvalidLabel(u32),
    #[error("local variable index out of bounds: {0}")]
    LocalIndexOutOfBounds(u32),
    #[error("global variable index out of bounds: {0}")]
    GlobalIndexOutOfBounds(u32),
    #[error("cannot set immutable global {0}")]
    ImmutableGlobal(u32),
    #[error("constant expression reads mutable global {0}")]
    ConstExprMutableGlobal(u32),
    #[error("function index out of bounds: {0}")]
    FunctionIndexOutOfBounds(u32),
    #[error("type index out of bounds: {0}")]
    TypeIndexOutOfBounds(u32),
    #[error("no linear memory available")]
    NoMemory,
    #[error("out of bounds memory access")]
    MemoryOutOfBounds,
    #[error("no table available")]
    NoTable,
    #[error("out of bounds table access at {0}")]
    TableOutOfBounds(u32),
    #[error("indirect call type mismatch: expected {expected}, got {actual}")]
    IndirectCallTypeMismatch { expected: String, actual: String },
    #[error("integer divide by zero")]
    DivideByZero,
    #[error("integer overflow")]
    IntegerOverflow,
    #[error("invalid conversion to integer")]
    InvalidConversion,
    #[error("unreachable executed")]
    Unreachable,
    #[error("unknown export: {0}")]
    UnknownExport(String),
    #[error("unknown import: {module}.{name}")]
    UnknownImport { module: String, name: String },
    #[error("import kind mismatch for {module}.{name}: imported as {imported}, exported as {exported}")]
    ImportKindMismatch {
        module: String,
        name: String,
        imported: String,
        exported: String,
    },
    #[error("incompatible import type for {module}.{name}: expected {expected}, got {actual}")]
    ImportTypeMismatch {
        module: String,
        name: String,
        expected: String,
        actual: String,
    },
    #[error("host function returned {actual} values, declared {expected}")]
    HostResultMismatch { expected: usize, actual: usize },
    #[error("out of gas")]
    OutOfGas,
}

impl Trap {
    /// The error kind this trap reports as.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Trap::StackUnderflow | Trap::CallStackExhausted => ErrorKind::StackUnderflow,
            Trap::TypeMismatch { .. }
            | Trap::ImmutableGlobal(_)
            | Trap::ConstExprMutableGlobal(_)
            | Trap::ImportTypeMismatch { .. }
            | Trap::HostResultMismatch { .. } => ErrorKind::TypeMismatch,
            Trap::InvalidOpcode(_) => ErrorKind::InvalidOpcode,
            Trap::MalformedBody
            | Trap::InvalidLabel(_)
            | Trap::LocalIndexOutOfBounds(_)
            | Trap::GlobalIndexOutOfBounds(_)
            | Trap::FunctionIndexOutOfBounds(_)
            | Trap::TypeIndexOutOfBounds(_) => ErrorKind::MalformedBinary,
            Trap::NoMemory | Trap::MemoryOutOfBounds => ErrorKind::MemoryOutOfBounds,
            Trap::NoTable | Trap::TableOutOfBounds(_) => ErrorKind::TableOutOfBounds,
            Trap::IndirectCallTypeMismatch { .. } => ErrorKind::IndirectCallTypeMismatch,
            Trap::DivideByZero => ErrorKind::IntegerDivideByZero,
            Trap::IntegerOverflow => ErrorKind::IntegerOverflow,
            Trap::InvalidConversion => ErrorKind::InvalidConversionToInteger,
            Trap::Unreachable => ErrorKind::UnreachableExecuted,
            Trap::UnknownExport(_) | Trap::UnknownImport { .. } => ErrorKind::UnknownImport,
            Trap::ImportKindMismatch { .. } => ErrorKind::InvalidImportKind,
            Trap::OutOfGas => ErrorKind::OutOfGas,
        }
    }
}

impl From<OutOfGas> for Trap {
    fn from(_: OutOfGas) -> Trap {
        Trap::OutOfGas
    }
}

impl From<DecodeError> for Trap {
    fn from(err: DecodeError) -> Trap {
        match err {
            DecodeError::OutOfGas => Trap::OutOfGas,
            _ => Trap::MalformedBody,
        }
    }
}
