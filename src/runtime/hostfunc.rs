//! Host-function bridge.
//!
//! Reflects native callables into a module's function index space. A
//! native signature is declared explicitly as parameter value types plus
//! a [`HostResults`] arity tag. Because the MVP ABI permits at most one
//! return, a multi-return native function is adapted: the wasm-visible
//! signature gains a leading i32 out-pointer parameter and loses its
//! return list, and at call time the native results are written into
//! linear memory at that pointer, in reverse declaration order,
//! little-endian, each at its full native width.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::parser::module::{Export, ExternalKind};
use crate::parser::types::{FunctionType, Limits, ValueType};

use super::instance::{FuncInst, GlobalInst, Instance};
use super::memory::Memory;
use super::table::Table;
use super::{Trap, Value};

/// Native result shape, tagged by arity. `Multi` is what triggers the
/// out-pointer adaptation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostResults {
    None,
    Scalar(ValueType),
    Multi(Vec<ValueType>),
}

impl HostResults {
    /// Result types as a slice, regardless of arity.
    pub fn types(&self) -> &[ValueType] {
        match self {
            HostResults::None => &[],
            HostResults::Scalar(t) => std::slice::from_ref(t),
            HostResults::Multi(ts) => ts,
        }
    }
}

/// A native callable's declared signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSignature {
    pub params: Vec<ValueType>,
    pub results: HostResults,
}

impl HostSignature {
    pub fn new(params: Vec<ValueType>, results: HostResults) -> HostSignature {
        HostSignature { params, results }
    }

    /// The wasm-visible function type. Multi-return signatures gain the
    /// leading i32 out-pointer and return nothing.
    pub fn to_function_type(&self) -> FunctionType {
        match &self.results {
            HostResults::None => FunctionType {
                parameters: self.params.clone(),
                return_types: vec![],
            },
            HostResults::Scalar(t) => FunctionType {
                parameters: self.params.clone(),
                return_types: vec![*t],
            },
            HostResults::Multi(_) => {
                let mut parameters = Vec::with_capacity(self.params.len() + 1);
                parameters.push(ValueType::I32);
                parameters.extend_from_slice(&self.params);
                FunctionType {
                    parameters,
                    return_types: vec![],
                }
            }
        }
    }
}

/// What a host closure sees of the calling module: its linear memory as
/// a mutable byte window.
pub struct HostContext {
    memory: Option<Rc<RefCell<Memory>>>,
}

impl HostContext {
    pub(crate) fn new(memory: Option<Rc<RefCell<Memory>>>) -> HostContext {
        HostContext { memory }
    }

    pub fn memory(&self) -> Result<&Rc<RefCell<Memory>>, Trap> {
        self.memory.as_ref().ok_or(Trap::NoMemory)
    }

    pub fn read_bytes(&self, addr: u32, len: usize) -> Result<Vec<u8>, Trap> {
        self.memory()?.borrow().read_bytes(addr, len)
    }

    pub fn write_bytes(&self, addr: u32, bytes: &[u8]) -> Result<(), Trap> {
        self.memory()?.borrow_mut().write_bytes(addr, bytes)
    }
}

/// Boxed native callable. Receives the caller's context and its declared
/// parameters; returns its declared results in declaration order.
pub type HostFn = Box<dyn Fn(&mut HostContext, &[Value]) -> Result<Vec<Value>, Trap>>;

/// A native function bound into an index space.
pub struct HostFunc {
    /// The wasm-visible (adapted) signature.
    pub func_type: FunctionType,
    /// The native result shape; drives the memory write-back on calls.
    pub results: HostResults,
    pub(crate) code: HostFn,
}

impl HostFunc {
    pub fn new(signature: HostSignature, code: HostFn) -> HostFunc {
        HostFunc {
            func_type: signature.to_function_type(),
            results: signature.results,
            code,
        }
    }
}

impl fmt::Debug for HostFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFunc")
            .field("func_type", &self.func_type)
            .field("results", &self.results)
            .finish()
    }
}

/// Assembles named host modules out of native callables and
/// pre-constructed globals, memories, and tables, for registration in a
/// [`super::Registry`].
#[derive(Default)]
pub struct ModuleBuilder {
    modules: HashMap<String, Instance>,
}

impl ModuleBuilder {
    pub fn new() -> ModuleBuilder {
        ModuleBuilder::default()
    }

    pub fn with_modules(modules: HashMap<String, Instance>) -> ModuleBuilder {
        ModuleBuilder { modules }
    }

    fn module(&mut self, name: &str) -> &mut Instance {
        self.modules.entry(name.to_string()).or_default()
    }

    /// Bind a native callable as a named function export.
    pub fn add_function<F>(
        &mut self,
        module: &str,
        name: &str,
        signature: HostSignature,
        code: F,
    ) -> &mut Self
    where
        F: Fn(&mut HostContext, &[Value]) -> Result<Vec<Value>, Trap> + 'static,
    {
        let host = HostFunc::new(signature, Box::new(code));
        let instance = self.module(module);
        let index = instance.functions.len() as u32;
        instance.functions.push(FuncInst::Host(Rc::new(host)));
        instance.exports.insert(
            name.to_string(),
            Export {
                kind: ExternalKind::Function,
                index,
            },
        );
        self
    }

    /// Bind a pre-constructed global cell as a named export.
    pub fn add_global(&mut self, module: &str, name: &str, value: Value, mutable: bool) -> &mut Self {
        let instance = self.module(module);
        let index = instance.globals.len() as u32;
        instance
            .globals
            .push(Rc::new(RefCell::new(GlobalInst { value, mutable })));
        instance.exports.insert(
            name.to_string(),
            Export {
                kind: ExternalKind::Global,
                index,
            },
        );
        self
    }

    /// Bind a fresh linear memory as a named export.
    pub fn add_memory(
        &mut self,
        module: &str,
        name: &str,
        min_pages: u32,
        max_pages: Option<u32>,
    ) -> Result<&mut Self, Trap> {
        let memory = Memory::new(min_pages, max_pages)?;
        let instance = self.module(module);
        instance.memory = Some(Rc::new(RefCell::new(memory)));
        instance.exports.insert(
            name.to_string(),
            Export {
                kind: ExternalKind::Memory,
                index: 0,
            },
        );
        Ok(self)
    }

    /// Bind a fresh table as a named export.
    pub fn add_table(&mut self, module: &str, name: &str, min: u32, max: Option<u32>) -> &mut Self {
        let table = Table::new(&Limits { min, max });
        let instance = self.module(module);
        instance.table = Some(Rc::new(RefCell::new(table)));
        instance.exports.insert(
            name.to_string(),
            Export {
                kind: ExternalKind::Table,
                index: 0,
            },
        );
        self
    }

    /// The finished host modules, keyed by module name.
    pub fn done(self) -> HashMap<String, Instance> {
        self.modules
    }
}
