//! Module instantiation: the registry, import resolution, and index
//! space construction.
//!
//! An [`Instance`] is the post-link view of a module: per-kind index
//! spaces with imports first (in import-section order) followed by
//! local definitions. Globals, memory, and table sit behind shared
//! cells, so an importer binds the exporter's actual cell and writes by
//! either side are visible to both. Instances clone shallowly; clones
//! share those cells.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::debug;

use crate::error::Error;
use crate::gas::GasMeter;
use crate::parser;
use crate::parser::module::{Export, ExternalKind, ImportDesc, Module};
use crate::parser::types::{ConstExpr, FunctionType, ValueType};

use super::hostfunc::HostFunc;
use super::memory::Memory;
use super::table::Table;
use super::vm::VirtualMachine;
use super::{Trap, Value};

/// A mutable global cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlobalInst {
    pub value: Value,
    pub mutable: bool,
}

/// A locally defined function: its signature, declared locals, and
/// shared body bytecode.
#[derive(Debug)]
pub struct WasmFunc {
    pub func_type: FunctionType,
    pub locals: Vec<ValueType>,
    pub body: Rc<[u8]>,
}

/// One slot of the function index space.
#[derive(Debug, Clone)]
pub enum FuncInst {
    Wasm(Rc<WasmFunc>),
    Host(Rc<HostFunc>),
}

impl FuncInst {
    pub fn func_type(&self) -> &FunctionType {
        match self {
            FuncInst::Wasm(f) => &f.func_type,
            FuncInst::Host(h) => &h.func_type,
        }
    }
}

/// The linked, executable view of a module.
#[derive(Debug, Clone, Default)]
pub struct Instance {
    pub types: Vec<FunctionType>,
    pub functions: Vec<FuncInst>,
    pub globals: Vec<Rc<RefCell<GlobalInst>>>,
    pub memory: Option<Rc<RefCell<Memory>>>,
    pub table: Option<Rc<RefCell<Table>>>,
    pub exports: HashMap<String, Export>,
    pub start: Option<u32>,
}

impl Instance {
    pub fn export(&self, name: &str) -> Option<&Export> {
        self.exports.get(name)
    }

    /// Build the runtime view of a decoded module against previously
    /// registered modules: resolve imports, append local definitions,
    /// initialise memory, table, and globals. The start function is not
    /// run here; the caller invokes it on a fresh machine.
    pub fn link(module: &Module, registry: &Registry) -> Result<Instance, Trap> {
        let mut instance = Instance {
            types: module.types.clone(),
            exports: module.exports.clone(),
            start: module.start,
            ..Instance::default()
        };

        // Imports first, in import-section order.
        for import in &module.imports {
            resolve_import(&mut instance, module, import, registry)?;
        }

        // Local definitions append to each index space.
        for (i, &type_index) in module.functions.iter().enumerate() {
            let func_type = instance
                .types
                .get(type_index as usize)
                .ok_or(Trap::TypeIndexOutOfBounds(type_index))?
                .clone();
            let code = &module.code[i];
            instance.functions.push(FuncInst::Wasm(Rc::new(WasmFunc {
                func_type,
                locals: code.locals.clone(),
                body: code.body.clone(),
            })));
        }

        if instance.table.is_none() {
            if let Some(table_type) = module.tables.first() {
                instance.table = Some(Rc::new(RefCell::new(Table::new(&table_type.limits))));
            }
        }

        if instance.memory.is_none() {
            if let Some(limits) = module.memories.first() {
                instance.memory = Some(Rc::new(RefCell::new(Memory::new(
                    limits.min, limits.max,
                )?)));
            }
        }

        instance.apply_data_segments(module)?;
        instance.apply_element_segments(module)?;
        instance.build_globals(module)?;

        if let Some(start) = instance.start {
            if start as usize >= instance.functions.len() {
                return Err(Trap::FunctionIndexOutOfBounds(start));
            }
        }

        debug!(
            functions = instance.functions.len(),
            globals = instance.globals.len(),
            has_memory = instance.memory.is_some(),
            has_table = instance.table.is_some(),
            "module linked"
        );
        Ok(instance)
    }

    /// Evaluate each data segment's offset and copy its bytes into
    /// memory, range-checked.
    fn apply_data_segments(&mut self, module: &Module) -> Result<(), Trap> {
        if module.data.is_empty() {
            return Ok(());
        }
        let memory = self.memory.clone().ok_or(Trap::NoMemory)?;
        for segment in &module.data {
            let offset = evaluate_offset(&segment.offset, &self.globals)?;
            memory.borrow_mut().write_bytes(offset, &segment.init)?;
        }
        Ok(())
    }

    /// Evaluate each element segment's offset and write its function
    /// indices into the table, range-checked.
    fn apply_element_segments(&mut self, module: &Module) -> Result<(), Trap> {
        if module.elements.is_empty() {
            return Ok(());
        }
        let table = self.table.clone().ok_or(Trap::NoTable)?;
        for segment in &module.elements {
            let offset = evaluate_offset(&segment.offset, &self.globals)?;
            let mut table = table.borrow_mut();
            for (i, &func_index) in segment.init.iter().enumerate() {
                if func_index as usize >= self.functions.len() {
                    return Err(Trap::FunctionIndexOutOfBounds(func_index));
                }
                let slot = offset
                    .checked_add(i as u32)
                    .ok_or(Trap::TableOutOfBounds(u32::MAX))?;
                table.set(slot, func_index)?;
            }
        }
        Ok(())
    }

    /// Evaluate global init expressions against the already-built
    /// prefix: imports plus locals initialised earlier in this pass.
    fn build_globals(&mut self, module: &Module) -> Result<(), Trap> {
        for segment in &module.globals {
            let value = evaluate_const_expr(&segment.init, &self.globals)?;
            if value.typ() != segment.global_type.value_type {
                return Err(Trap::TypeMismatch {
                    expected: segment.global_type.value_type.to_string(),
                    actual: value.typ().to_string(),
                });
            }
            self.globals.push(Rc::new(RefCell::new(GlobalInst {
                value,
                mutable: segment.global_type.mutable,
            })));
        }
        Ok(())
    }
}

fn unknown_import(import: &parser::module::Import) -> Trap {
    Trap::UnknownImport {
        module: import.module.clone(),
        name: import.name.clone(),
    }
}

fn kind_mismatch(import: &parser::module::Import, exported: ExternalKind) -> Trap {
    Trap::ImportKindMismatch {
        module: import.module.clone(),
        name: import.name.clone(),
        imported: import.desc.kind().to_string(),
        exported: exported.to_string(),
    }
}

/// Bind one import: look up the exporter's named export, check kinds
/// and types, and share the exporter's index-space slot.
fn resolve_import(
    instance: &mut Instance,
    module: &Module,
    import: &parser::module::Import,
    registry: &Registry,
) -> Result<(), Trap> {
    let exporter = registry
        .get(&import.module)
        .ok_or_else(|| unknown_import(import))?;
    let export = exporter
        .export(&import.name)
        .ok_or_else(|| unknown_import(import))?;

    if import.desc.kind() != export.kind {
        return Err(kind_mismatch(import, export.kind));
    }

    debug!(
        module = %import.module,
        name = %import.name,
        kind = %import.desc.kind(),
        "import resolved"
    );

    match &import.desc {
        ImportDesc::Function(type_index) => {
            let expected = module
                .types
                .get(*type_index as usize)
                .ok_or(Trap::TypeIndexOutOfBounds(*type_index))?;
            let func = exporter
                .functions
                .get(export.index as usize)
                .ok_or(Trap::FunctionIndexOutOfBounds(export.index))?;
            if func.func_type() != expected {
                return Err(Trap::ImportTypeMismatch {
                    module: import.module.clone(),
                    name: import.name.clone(),
                    expected: expected.to_string(),
                    actual: func.func_type().to_string(),
                });
            }
            instance.functions.push(func.clone());
        }
        ImportDesc::Table(_) => {
            let table = exporter.table.clone().ok_or_else(|| unknown_import(import))?;
            instance.table = Some(table);
        }
        ImportDesc::Memory(_) => {
            let memory = exporter
                .memory
                .clone()
                .ok_or_else(|| unknown_import(import))?;
            instance.memory = Some(memory);
        }
        ImportDesc::Global(global_type) => {
            let cell = exporter
                .globals
                .get(export.index as usize)
                .ok_or(Trap::GlobalIndexOutOfBounds(export.index))?;
            let global = cell.borrow();
            if global.value.typ() != global_type.value_type || global.mutable != global_type.mutable
            {
                return Err(Trap::ImportTypeMismatch {
                    module: import.module.clone(),
                    name: import.name.clone(),
                    expected: global_type.to_string(),
                    actual: format!(
                        "{} {}",
                        if global.mutable { "var" } else { "const" },
                        global.value.typ()
                    ),
                });
            }
            drop(global);
            instance.globals.push(cell.clone());
        }
    }
    Ok(())
}

/// Evaluate a constant expression against the globals built so far.
/// `global.get` of a mutable cell is rejected.
pub fn evaluate_const_expr(
    expr: &ConstExpr,
    globals: &[Rc<RefCell<GlobalInst>>],
) -> Result<Value, Trap> {
    match expr {
        ConstExpr::I32(v) => Ok(Value::I32(*v)),
        ConstExpr::I64(v) => Ok(Value::I64(*v)),
        ConstExpr::F32(v) => Ok(Value::F32(*v)),
        ConstExpr::F64(v) => Ok(Value::F64(*v)),
        ConstExpr::GlobalGet(index) => {
            let cell = globals
                .get(*index as usize)
                .ok_or(Trap::GlobalIndexOutOfBounds(*index))?;
            let global = cell.borrow();
            if global.mutable {
                return Err(Trap::ConstExprMutableGlobal(*index));
            }
            Ok(global.value)
        }
    }
}

/// Evaluate an offset expression for a data or element segment; the
/// result must be i32.
fn evaluate_offset(expr: &ConstExpr, globals: &[Rc<RefCell<GlobalInst>>]) -> Result<u32, Trap> {
    match evaluate_const_expr(expr, globals)? {
        Value::I32(v) => Ok(v as u32),
        other => Err(Trap::TypeMismatch {
            expected: "i32".to_string(),
            actual: other.typ().to_string(),
        }),
    }
}

/// Named modules available for import resolution.
#[derive(Default)]
pub struct Registry {
    modules: HashMap<String, Instance>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry::default()
    }

    /// Register a module under a name, making its exports available to
    /// later instantiations. Re-registering a name replaces it.
    pub fn register(&mut self, name: impl Into<String>, instance: Instance) {
        self.modules.insert(name.into(), instance);
    }

    /// Register every module from a host [`super::ModuleBuilder`].
    pub fn register_all(&mut self, modules: HashMap<String, Instance>) {
        self.modules.extend(modules);
    }

    pub fn get(&self, name: &str) -> Option<&Instance> {
        self.modules.get(name)
    }

    /// Decode and instantiate a binary module, consuming the bytes and
    /// the meter. Runs the start function, if any, before returning the
    /// executable machine.
    pub fn instantiate(
        &self,
        bytes: Vec<u8>,
        mut gas: Box<dyn GasMeter>,
    ) -> Result<VirtualMachine, Error> {
        let module = parser::decode(bytes, gas.as_mut())?;
        let instance = Instance::link(&module, self)?;
        let mut vm = VirtualMachine::new(instance, gas);
        vm.run_start()?;
        Ok(vm)
    }
}
