//! The decoded module record and its section readers.
//!
//! A [`Module`] is the immutable result of decoding: every section's
//! contents in declaration order, ready for instantiation. Section
//! readers consume a [`Reader`] positioned at the section payload and
//! charge gas per field.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::gas::GasMeter;

use super::reader::Reader;
use super::types::{
    read_const_expr, read_function_type, read_global_type, read_memory_type, read_table_type,
    ConstExpr, FunctionType, GlobalType, MemoryType, TableType, ValueType,
};
use super::DecodeError;

/// A decoded module. Populated in section-id order during decode and
/// immutable afterwards.
#[derive(Debug, Default)]
pub struct Module {
    pub magic: u32,
    pub version: u32,

    pub types: Vec<FunctionType>,
    pub imports: Vec<Import>,
    /// Type indices of locally defined functions, in declaration order.
    pub functions: Vec<u32>,
    pub tables: Vec<TableType>,
    pub memories: Vec<MemoryType>,
    pub globals: Vec<GlobalSegment>,
    pub exports: HashMap<String, Export>,
    pub start: Option<u32>,
    pub elements: Vec<ElementSegment>,
    pub code: Vec<CodeSegment>,
    pub data: Vec<DataSegment>,
}

impl Module {
    pub fn new() -> Module {
        Module::default()
    }

    /// Look up a named export.
    pub fn export(&self, name: &str) -> Option<&Export> {
        self.exports.get(name)
    }
}

/// The four kinds an import or export can describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalKind {
    Function,
    Table,
    Memory,
    Global,
}

impl fmt::Display for ExternalKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                ExternalKind::Function => "function",
                ExternalKind::Table => "table",
                ExternalKind::Memory => "memory",
                ExternalKind::Global => "global",
            }
        )
    }
}

/// What an import binds: a function type index or an entity type.
#[derive(Debug, Clone)]
pub enum ImportDesc {
    Function(u32),
    Table(TableType),
    Memory(MemoryType),
    Global(GlobalType),
}

impl ImportDesc {
    pub fn kind(&self) -> ExternalKind {
        match self {
            ImportDesc::Function(_) => ExternalKind::Function,
            ImportDesc::Table(_) => ExternalKind::Table,
            ImportDesc::Memory(_) => ExternalKind::Memory,
            ImportDesc::Global(_) => ExternalKind::Global,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Import {
    pub module: String,
    pub name: String,
    pub desc: ImportDesc,
}

impl fmt::Display for Import {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}::{} kind = {}", self.module, self.name, self.desc.kind())
    }
}

/// A named export: kind plus an index into that kind's index space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Export {
    pub kind: ExternalKind,
    pub index: u32,
}

/// A global definition: its type and the init expression evaluated at
/// instantiation.
#[derive(Debug, Clone)]
pub struct GlobalSegment {
    pub global_type: GlobalType,
    pub init: ConstExpr,
}

/// Function indices written into a table at the evaluated offset.
#[derive(Debug, Clone)]
pub struct ElementSegment {
    pub table_index: u32,
    pub offset: ConstExpr,
    pub init: Vec<u32>,
}

/// A function body: expanded local declarations plus the bytecode with
/// its trailing `end` stripped. The body is shared so index spaces can
/// reference it without copying.
#[derive(Debug, Clone)]
pub struct CodeSegment {
    pub locals: Vec<ValueType>,
    pub body: Rc<[u8]>,
}

/// Raw bytes copied into linear memory at the evaluated offset.
#[derive(Debug, Clone)]
pub struct DataSegment {
    pub memory_index: u32,
    pub offset: ConstExpr,
    pub init: Vec<u8>,
}

/* SECTION READERS ************************************************/

pub(super) fn read_type_section(
    reader: &mut Reader,
    gas: &mut dyn GasMeter,
    unit: &mut Module,
) -> Result<(), DecodeError> {
    let count = reader.read_vu32()?;
    gas.charge(4)?;

    for i in 0..count {
        let ft = read_function_type(reader, gas).map_err(|e| e.at(i.to_string()))?;
        unit.types.push(ft);
    }
    Ok(())
}

fn read_import_desc(
    reader: &mut Reader,
    gas: &mut dyn GasMeter,
) -> Result<ImportDesc, DecodeError> {
    let kind = reader.read_byte()?;
    gas.charge(1)?;
    match kind {
        0x00 => {
            let type_index = reader.read_vu32()?;
            gas.charge(4)?;
            Ok(ImportDesc::Function(type_index))
        }
        0x01 => Ok(ImportDesc::Table(read_table_type(reader, gas)?)),
        0x02 => Ok(ImportDesc::Memory(read_memory_type(reader, gas)?)),
        0x03 => Ok(ImportDesc::Global(read_global_type(reader, gas)?)),
        _ => Err(DecodeError::InvalidImportKind(kind)),
    }
}

pub(super) fn read_import_section(
    reader: &mut Reader,
    gas: &mut dyn GasMeter,
    unit: &mut Module,
) -> Result<(), DecodeError> {
    let count = reader.read_vu32()?;
    gas.charge(4)?;

    for i in 0..count {
        let module = reader.read_name().map_err(|e| e.at(format!("{i}/module")))?;
        gas.charge(4 + module.len() as u64)?;
        let name = reader.read_name().map_err(|e| e.at(format!("{i}/name")))?;
        gas.charge(4 + name.len() as u64)?;
        let desc = read_import_desc(reader, gas).map_err(|e| e.at(format!("{i}/desc")))?;

        unit.imports.push(Import { module, name, desc });
    }
    Ok(())
}

pub(super) fn read_function_section(
    reader: &mut Reader,
    gas: &mut dyn GasMeter,
    unit: &mut Module,
) -> Result<(), DecodeError> {
    let count = reader.read_vu32()?;
    gas.charge(4)?;

    for i in 0..count {
        let type_index = reader.read_vu32().map_err(|e| e.at(i.to_string()))?;
        gas.charge(4)?;
        if type_index as usize >= unit.types.len() {
            return Err(DecodeError::TypeIndexOutOfRange(type_index).at(i.to_string()));
        }
        unit.functions.push(type_index);
    }
    Ok(())
}

pub(super) fn read_table_section(
    reader: &mut Reader,
    gas: &mut dyn GasMeter,
    unit: &mut Module,
) -> Result<(), DecodeError> {
    let count = reader.read_vu32()?;
    gas.charge(4)?;

    for i in 0..count {
        let tt = read_table_type(reader, gas).map_err(|e| e.at(i.to_string()))?;
        unit.tables.push(tt);
    }
    Ok(())
}

pub(super) fn read_memory_section(
    reader: &mut Reader,
    gas: &mut dyn GasMeter,
    unit: &mut Module,
) -> Result<(), DecodeError> {
    let count = reader.read_vu32()?;
    gas.charge(4)?;

    for i in 0..count {
        let mt = read_memory_type(reader, gas).map_err(|e| e.at(i.to_string()))?;
        unit.memories.push(mt);
    }
    Ok(())
}

pub(super) fn read_global_section(
    reader: &mut Reader,
    gas: &mut dyn GasMeter,
    unit: &mut Module,
) -> Result<(), DecodeError> {
    let count = reader.read_vu32()?;
    gas.charge(4)?;

    for i in 0..count {
        let global_type = read_global_type(reader, gas).map_err(|e| e.at(i.to_string()))?;
        let init = read_const_expr(reader, gas).map_err(|e| e.at(format!("{i}/init")))?;
        unit.globals.push(GlobalSegment { global_type, init });
    }
    Ok(())
}

pub(super) fn read_export_section(
    reader: &mut Reader,
    gas: &mut dyn GasMeter,
    unit: &mut Module,
) -> Result<(), DecodeError> {
    let count = reader.read_vu32()?;
    gas.charge(4)?;

    for i in 0..count {
        let name = reader.read_name().map_err(|e| e.at(format!("{i}/name")))?;
        gas.charge(4 + name.len() as u64)?;

        let kind_byte = reader.read_byte()?;
        gas.charge(1)?;
        let kind = match kind_byte {
            0x00 => ExternalKind::Function,
            0x01 => ExternalKind::Table,
            0x02 => ExternalKind::Memory,
            0x03 => ExternalKind::Global,
            _ => return Err(DecodeError::InvalidExportKind(kind_byte).at(i.to_string())),
        };

        let index = reader.read_vu32().map_err(|e| e.at(format!("{i}/index")))?;
        gas.charge(4)?;

        unit.exports.insert(name, Export { kind, index });
    }
    Ok(())
}

pub(super) fn read_start_section(
    reader: &mut Reader,
    gas: &mut dyn GasMeter,
    unit: &mut Module,
) -> Result<(), DecodeError> {
    let count = reader.read_vu32()?;
    gas.charge(4)?;
    if count > 1 {
        return Err(DecodeError::MultipleStartFunctions);
    }

    for _ in 0..count {
        let index = reader.read_vu32()?;
        gas.charge(4)?;
        unit.start = Some(index);
    }
    Ok(())
}

pub(super) fn read_element_section(
    reader: &mut Reader,
    gas: &mut dyn GasMeter,
    unit: &mut Module,
) -> Result<(), DecodeError> {
    let count = reader.read_vu32()?;
    gas.charge(4)?;

    for i in 0..count {
        let table_index = reader.read_vu32().map_err(|e| e.at(i.to_string()))?;
        gas.charge(4)?;
        let offset = read_const_expr(reader, gas).map_err(|e| e.at(format!("{i}/offset")))?;

        let size = reader.read_vu32().map_err(|e| e.at(format!("{i}/init")))?;
        gas.charge(4)?;
        let mut init = Vec::with_capacity(size.min(1024) as usize);
        for _ in 0..size {
            let func_index = reader.read_vu32().map_err(|e| e.at(format!("{i}/init")))?;
            gas.charge(4)?;
            init.push(func_index);
        }

        unit.elements.push(ElementSegment {
            table_index,
            offset,
            init,
        });
    }
    Ok(())
}

pub(super) fn read_code_section(
    reader: &mut Reader,
    gas: &mut dyn GasMeter,
    unit: &mut Module,
    max_locals: usize,
) -> Result<(), DecodeError> {
    let count = reader.read_vu32()?;
    gas.charge(4)?;
    if count as usize != unit.functions.len() {
        return Err(DecodeError::FunctionCountMismatch {
            functions: unit.functions.len(),
            bodies: count as usize,
        });
    }

    for i in 0..count {
        let size = reader.read_vu32().map_err(|e| e.at(format!("{i}/size")))?;
        gas.charge(4)?;
        let start = reader.pos();

        let local_groups = reader.read_vu32().map_err(|e| e.at(format!("{i}/locals")))?;
        let mut locals: Vec<ValueType> = Vec::new();
        for _ in 0..local_groups {
            let n = reader.read_vu32().map_err(|e| e.at(format!("{i}/locals")))?;
            let value_type = ValueType::decode(reader.read_byte()?).map_err(|e| e.at(format!("{i}/locals")))?;
            if locals.len() + n as usize > max_locals {
                return Err(DecodeError::TooManyLocals.at(i.to_string()));
            }
            for _ in 0..n {
                locals.push(value_type);
            }
        }

        let consumed = reader.pos() - start;
        let body_len = (size as usize)
            .checked_sub(consumed)
            .ok_or_else(|| DecodeError::UnterminatedBody.at(i.to_string()))?;
        let mut body = reader
            .read_bytes(body_len)
            .map_err(|e| e.at(format!("{i}/body")))?;
        gas.charge(size as u64)?;

        // the trailing end byte is stripped; running off the body returns
        if body.pop() != Some(0x0b) {
            return Err(DecodeError::UnterminatedBody.at(i.to_string()));
        }

        unit.code.push(CodeSegment {
            locals,
            body: body.into(),
        });
    }
    Ok(())
}

pub(super) fn read_data_section(
    reader: &mut Reader,
    gas: &mut dyn GasMeter,
    unit: &mut Module,
) -> Result<(), DecodeError> {
    let count = reader.read_vu32()?;
    gas.charge(4)?;

    for i in 0..count {
        let memory_index = reader.read_vu32().map_err(|e| e.at(i.to_string()))?;
        gas.charge(4)?;
        if memory_index != 0 {
            return Err(DecodeError::InvalidDataMemoryIndex(memory_index).at(i.to_string()));
        }

        let offset = read_const_expr(reader, gas).map_err(|e| e.at(format!("{i}/offset")))?;

        let size = reader.read_vu32().map_err(|e| e.at(format!("{i}/init")))?;
        gas.charge(4)?;
        let init = reader
            .read_bytes(size as usize)
            .map_err(|e| e.at(format!("{i}/init")))?;
        gas.charge(size as u64)?;

        unit.data.push(DataSegment {
            memory_index,
            offset,
            init,
        });
    }
    Ok(())
}
