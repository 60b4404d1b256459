//! Binary module format decoder.
//!
//! [`decode`] reads a byte stream into a [`module::Module`]: the 4-byte
//! magic and version header followed by the twelve standard section kinds.
//! Non-custom sections must appear at most once each and in ascending id
//! order; custom sections are read and discarded wherever they appear.
//! Decoding charges gas per field consumed, with bulk charges for custom
//! payloads, code bodies, and data initialisers.

pub mod module;
pub mod reader;
pub mod types;

use tracing::debug;

use crate::error::ErrorKind;
use crate::gas::{GasMeter, OutOfGas};
use module::Module;
use reader::Reader;

/// Module header constants: `\0asm` and version 1.
pub const MAGIC: u32 = 0x6d736100;
pub const VERSION: u32 = 0x00000001;

/// Local declarations per function are capped to keep a hostile count
/// from ballooning the expansion.
const MAX_LOCALS: usize = 50_000;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("unexpected end of stream")]
    UnexpectedEof,
    #[error("malformed varint")]
    MalformedVarint,
    #[error("invalid utf-8 in name")]
    InvalidName,
    #[error("bad magic number {0:#010x}")]
    BadMagic(u32),
    #[error("unsupported version {0}")]
    UnsupportedVersion(u32),
    #[error("invalid section id {0}")]
    InvalidSectionId(u8),
    #[error("section id {0} out of order")]
    SectionOutOfOrder(u8),
    #[error("duplicate section id {0}")]
    DuplicateSection(u8),
    #[error("section size mismatch: declared {declared}, consumed {consumed}")]
    SectionSizeMismatch { declared: u32, consumed: usize },
    #[error("function type does not begin with 0x60, got {0:#04x}")]
    InvalidFunctionTypeMarker(u8),
    #[error("function type has {0} results")]
    MultiValueResult(usize),
    #[error("invalid value type {0:#04x}")]
    InvalidValueType(u8),
    #[error("invalid limits flag {0:#04x}")]
    InvalidLimitsFlag(u8),
    #[error("invalid element type {0:#04x}, expected funcref")]
    InvalidElementType(u8),
    #[error("invalid mutability flag {0:#04x}")]
    InvalidMutabilityFlag(u8),
    #[error("invalid import kind {0:#04x}")]
    InvalidImportKind(u8),
    #[error("invalid export kind {0:#04x}")]
    InvalidExportKind(u8),
    #[error("invalid constant-expression opcode {0:#04x}")]
    InvalidConstOpcode(u8),
    #[error("constant expression not terminated")]
    UnterminatedConstExpr,
    #[error("type index {0} out of range")]
    TypeIndexOutOfRange(u32),
    #[error("function and code section counts differ: {functions} vs {bodies}")]
    FunctionCountMismatch { functions: usize, bodies: usize },
    #[error("more than one start function")]
    MultipleStartFunctions,
    #[error("too many locals in function body")]
    TooManyLocals,
    #[error("code body not terminated with end")]
    UnterminatedBody,
    #[error("data segment memory index {0} is not zero")]
    InvalidDataMemoryIndex(u32),
    #[error("out of gas")]
    OutOfGas,
    #[error("{path}: {source}")]
    At {
        path: String,
        #[source]
        source: Box<DecodeError>,
    },
}

impl DecodeError {
    /// Wrap this error with a `section/index/field` path tag.
    pub(crate) fn at(self, path: impl Into<String>) -> DecodeError {
        DecodeError::At {
            path: path.into(),
            source: Box::new(self),
        }
    }

    /// The error kind this failure reports as. Path wrappers are
    /// transparent.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DecodeError::UnexpectedEof
            | DecodeError::MalformedVarint
            | DecodeError::InvalidName
            | DecodeError::BadMagic(_)
            | DecodeError::InvalidFunctionTypeMarker(_)
            | DecodeError::InvalidValueType(_)
            | DecodeError::InvalidLimitsFlag(_)
            | DecodeError::InvalidElementType(_)
            | DecodeError::InvalidMutabilityFlag(_)
            | DecodeError::InvalidExportKind(_)
            | DecodeError::InvalidConstOpcode(_)
            | DecodeError::UnterminatedConstExpr
            | DecodeError::UnterminatedBody => ErrorKind::MalformedBinary,
            DecodeError::UnsupportedVersion(_) => ErrorKind::UnsupportedVersion,
            DecodeError::InvalidSectionId(_)
            | DecodeError::SectionOutOfOrder(_)
            | DecodeError::DuplicateSection(_)
            | DecodeError::SectionSizeMismatch { .. }
            | DecodeError::MultiValueResult(_)
            | DecodeError::TypeIndexOutOfRange(_)
            | DecodeError::FunctionCountMismatch { .. }
            | DecodeError::MultipleStartFunctions
            | DecodeError::TooManyLocals
            | DecodeError::InvalidDataMemoryIndex(_) => ErrorKind::InvalidSection,
            DecodeError::InvalidImportKind(_) => ErrorKind::InvalidImportKind,
            DecodeError::OutOfGas => ErrorKind::OutOfGas,
            DecodeError::At { source, .. } => source.kind(),
        }
    }
}

impl From<OutOfGas> for DecodeError {
    fn from(_: OutOfGas) -> DecodeError {
        DecodeError::OutOfGas
    }
}

/// Section ids in the order the binary format assigns them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionId {
    Custom = 0,
    Type = 1,
    Import = 2,
    Function = 3,
    Table = 4,
    Memory = 5,
    Global = 6,
    Export = 7,
    Start = 8,
    Element = 9,
    Code = 10,
    Data = 11,
}

impl SectionId {
    pub fn decode(byte: u8) -> Result<SectionId, DecodeError> {
        match byte {
            0 => Ok(SectionId::Custom),
            1 => Ok(SectionId::Type),
            2 => Ok(SectionId::Import),
            3 => Ok(SectionId::Function),
            4 => Ok(SectionId::Table),
            5 => Ok(SectionId::Memory),
            6 => Ok(SectionId::Global),
            7 => Ok(SectionId::Export),
            8 => Ok(SectionId::Start),
            9 => Ok(SectionId::Element),
            10 => Ok(SectionId::Code),
            11 => Ok(SectionId::Data),
            _ => Err(DecodeError::InvalidSectionId(byte)),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SectionId::Custom => "custom",
            SectionId::Type => "type",
            SectionId::Import => "import",
            SectionId::Function => "function",
            SectionId::Table => "table",
            SectionId::Memory => "memory",
            SectionId::Global => "global",
            SectionId::Export => "export",
            SectionId::Start => "start",
            SectionId::Element => "element",
            SectionId::Code => "code",
            SectionId::Data => "data",
        }
    }
}

/// Decode a binary module, charging gas as bytes are consumed.
pub fn decode(bytes: Vec<u8>, gas: &mut dyn GasMeter) -> Result<Module, DecodeError> {
    let mut reader = Reader::new(bytes);
    let mut unit = Module::new();

    read_header(&mut reader, gas, &mut unit)?;

    let mut last_id: Option<u8> = None;
    while reader.has_at_least(1) {
        let id_byte = reader.read_byte()?;
        gas.charge(1)?;
        let id = SectionId::decode(id_byte)?;

        let size = reader
            .read_vu32()
            .map_err(|e| e.at(format!("{}/size", id.name())))?;
        gas.charge(4)?;

        if !reader.has_at_least(size as usize) {
            return Err(DecodeError::UnexpectedEof.at(format!("{}/payload", id.name())));
        }

        // Non-custom sections appear at most once, in ascending id order.
        if id != SectionId::Custom {
            match last_id {
                Some(last) if id_byte == last => {
                    return Err(DecodeError::DuplicateSection(id_byte));
                }
                Some(last) if id_byte < last => {
                    return Err(DecodeError::SectionOutOfOrder(id_byte));
                }
                _ => last_id = Some(id_byte),
            }
        }

        debug!(section = id.name(), size, "reading section");

        let start = reader.pos();
        read_section(id, size, &mut reader, gas, &mut unit)
            .map_err(|e| e.at(id.name().to_string()))?;

        let consumed = reader.pos() - start;
        if consumed != size as usize {
            return Err(DecodeError::SectionSizeMismatch {
                declared: size,
                consumed,
            }
            .at(id.name().to_string()));
        }
    }

    debug!(
        types = unit.types.len(),
        imports = unit.imports.len(),
        functions = unit.functions.len(),
        exports = unit.exports.len(),
        "module decoded"
    );
    Ok(unit)
}

fn read_header(
    reader: &mut Reader,
    gas: &mut dyn GasMeter,
    unit: &mut Module,
) -> Result<(), DecodeError> {
    unit.magic = reader.read_u32().map_err(|e| e.at("header/magic"))?;
    gas.charge(4)?;
    if unit.magic != MAGIC {
        return Err(DecodeError::BadMagic(unit.magic));
    }

    unit.version = reader.read_u32().map_err(|e| e.at("header/version"))?;
    gas.charge(4)?;
    if unit.version != VERSION {
        return Err(DecodeError::UnsupportedVersion(unit.version));
    }
    Ok(())
}

fn read_section(
    id: SectionId,
    size: u32,
    reader: &mut Reader,
    gas: &mut dyn GasMeter,
    unit: &mut Module,
) -> Result<(), DecodeError> {
    match id {
        SectionId::Custom => {
            // Read and discard; the payload (name included) is opaque.
            // The gas charge lands after the read succeeds so a bad
            // section cannot drain the meter arbitrarily.
            reader.read_bytes(size as usize)?;
            gas.charge(size as u64)?;
            Ok(())
        }
        SectionId::Type => module::read_type_section(reader, gas, unit),
        SectionId::Import => module::read_import_section(reader, gas, unit),
        SectionId::Function => module::read_function_section(reader, gas, unit),
        SectionId::Table => module::read_table_section(reader, gas, unit),
        SectionId::Memory => module::read_memory_section(reader, gas, unit),
        SectionId::Global => module::read_global_section(reader, gas, unit),
        SectionId::Export => module::read_export_section(reader, gas, unit),
        SectionId::Start => module::read_start_section(reader, gas, unit),
        SectionId::Element => module::read_element_section(reader, gas, unit),
        SectionId::Code => module::read_code_section(reader, gas, unit, MAX_LOCALS),
        SectionId::Data => module::read_data_section(reader, gas, unit),
    }
}
