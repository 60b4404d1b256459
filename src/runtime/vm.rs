//! The virtual machine: frame stack, instruction dispatch, and calls.
//!
//! Execution walks raw function bodies with a per-frame program counter.
//! Structured control flow pushes labels carrying the operand-stack
//! depth at entry, the branch arity, and a continuation PC; `br`
//! truncates the operand stack to the target label's depth plus arity
//! and jumps. Continuations for `block`/`if` are found by a forward scan
//! to the matching `else`/`end`, stepping over immediates. One unit of
//! gas is charged before every instruction.

use std::rc::Rc;

use tracing::debug;

use crate::gas::GasMeter;
use crate::parser::module::ExternalKind;
use crate::parser::reader;
use crate::parser::DecodeError;

use super::frame::{Frame, Label, LabelKind};
use super::hostfunc::{HostContext, HostFunc, HostResults};
use super::instance::{FuncInst, Instance, WasmFunc};
use super::opcode;
use super::ops;
use super::stack::Stack;
use super::{Trap, Value};

/// Bound on frame-stack depth, independent of the gas meter.
const MAX_CALL_DEPTH: usize = 1000;

/// An executable module instance: owns the operand stack, the frame
/// stack, and the gas meter, and holds shared handles to the instance's
/// memory, table, and globals. Reusable across invocations.
pub struct VirtualMachine {
    instance: Instance,
    stack: Stack,
    frames: Vec<Frame>,
    gas: Box<dyn GasMeter>,
}

impl std::fmt::Debug for VirtualMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualMachine").finish_non_exhaustive()
    }
}

/// Continuation targets of a block: the `else` at nesting depth zero,
/// if any, and the matching `end`.
struct BlockEnds {
    else_pc: Option<usize>,
    end: usize,
}

impl VirtualMachine {
    pub fn new(instance: Instance, gas: Box<dyn GasMeter>) -> VirtualMachine {
        VirtualMachine {
            instance,
            stack: Stack::new(),
            frames: Vec::new(),
            gas,
        }
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    pub fn gas(&self) -> &dyn GasMeter {
        self.gas.as_ref()
    }

    /// Invoke an exported function by name. On a trap, all frames are
    /// unwound and the operand stack is emptied; memory and globals
    /// keep the writes that preceded the trap.
    pub fn invoke(&mut self, name: &str, args: &[Value]) -> Result<Vec<Value>, Trap> {
        let export = *self
            .instance
            .exports
            .get(name)
            .ok_or_else(|| Trap::UnknownExport(name.to_string()))?;
        if export.kind != ExternalKind::Function {
            return Err(Trap::UnknownExport(name.to_string()));
        }

        debug!(name, args = args.len(), "invoking export");
        let result = self.invoke_index(export.index, args);
        if result.is_err() {
            self.stack.clear();
            self.frames.clear();
        }
        result
    }

    /// Run the start function, if the module declares one.
    pub(crate) fn run_start(&mut self) -> Result<(), Trap> {
        if let Some(start) = self.instance.start {
            debug!(index = start, "running start function");
            let result = self.invoke_index(start, &[]);
            if let Err(trap) = result {
                self.stack.clear();
                self.frames.clear();
                return Err(trap);
            }
        }
        Ok(())
    }

    fn invoke_index(&mut self, func_index: u32, args: &[Value]) -> Result<Vec<Value>, Trap> {
        let func_type = self
            .instance
            .functions
            .get(func_index as usize)
            .ok_or(Trap::FunctionIndexOutOfBounds(func_index))?
            .func_type()
            .clone();

        if args.len() != func_type.parameters.len() {
            return Err(Trap::TypeMismatch {
                expected: format!("{} arguments", func_type.parameters.len()),
                actual: format!("{} arguments", args.len()),
            });
        }
        for (arg, expected) in args.iter().zip(&func_type.parameters) {
            if arg.typ() != *expected {
                return Err(Trap::TypeMismatch {
                    expected: expected.to_string(),
                    actual: arg.typ().to_string(),
                });
            }
        }

        for arg in args {
            self.stack.push(*arg);
        }
        self.call_function(func_index)?;
        self.stack.pop_n(func_type.return_types.len())
    }

    /// Call a function in the index space: arguments are popped from
    /// the operand stack, results are left on it.
    fn call_function(&mut self, func_index: u32) -> Result<(), Trap> {
        let func = self
            .instance
            .functions
            .get(func_index as usize)
            .cloned()
            .ok_or(Trap::FunctionIndexOutOfBounds(func_index))?;

        match func {
            FuncInst::Wasm(f) => self.call_wasm(func_index, f),
            FuncInst::Host(h) => self.call_host(h),
        }
    }

    fn call_wasm(&mut self, func_index: u32, func: Rc<WasmFunc>) -> Result<(), Trap> {
        if self.frames.len() >= MAX_CALL_DEPTH {
            return Err(Trap::CallStackExhausted);
        }

        let mut locals = self.stack.pop_n(func.func_type.parameters.len())?;
        for value_type in &func.locals {
            locals.push(Value::zero(*value_type));
        }

        self.frames.push(Frame::new(
            func_index,
            locals,
            func.body.clone(),
            self.stack.depth(),
            func.func_type.return_types.len(),
        ));

        let result = self.run();
        let frame = self.frames.pop().ok_or(Trap::StackUnderflow)?;
        result?;

        // keep the results, discard anything the body left below them
        self.stack.truncate(frame.stack_depth, frame.arity)
    }

    fn call_host(&mut self, host: Rc<HostFunc>) -> Result<(), Trap> {
        let args = self.stack.pop_n(host.func_type.parameters.len())?;
        let mut ctx = HostContext::new(self.instance.memory.clone());

        match &host.results {
            HostResults::None => {
                let results = (host.code)(&mut ctx, &args)?;
                if !results.is_empty() {
                    return Err(Trap::HostResultMismatch {
                        expected: 0,
                        actual: results.len(),
                    });
                }
            }
            HostResults::Scalar(declared) => {
                let results = (host.code)(&mut ctx, &args)?;
                if results.len() != 1 {
                    return Err(Trap::HostResultMismatch {
                        expected: 1,
                        actual: results.len(),
                    });
                }
                if results[0].typ() != *declared {
                    return Err(Trap::TypeMismatch {
                        expected: declared.to_string(),
                        actual: results[0].typ().to_string(),
                    });
                }
                self.stack.push(results[0]);
            }
            HostResults::Multi(declared) => {
                // adapted call: the leading parameter is the out-pointer
                let out_ptr = match args.first() {
                    Some(Value::I32(ptr)) => *ptr as u32,
                    _ => {
                        return Err(Trap::TypeMismatch {
                            expected: "i32 out-pointer".to_string(),
                            actual: "missing".to_string(),
                        })
                    }
                };
                let results = (host.code)(&mut ctx, &args[1..])?;
                if results.len() != declared.len() {
                    return Err(Trap::HostResultMismatch {
                        expected: declared.len(),
                        actual: results.len(),
                    });
                }

                // write back in reverse declaration order, little-endian
                let memory = self.instance.memory.clone().ok_or(Trap::NoMemory)?;
                let mut memory = memory.borrow_mut();
                let mut addr = out_ptr;
                for (value, declared) in results.iter().zip(declared.iter()).rev() {
                    if value.typ() != *declared {
                        return Err(Trap::TypeMismatch {
                            expected: declared.to_string(),
                            actual: value.typ().to_string(),
                        });
                    }
                    match value {
                        Value::I32(v) => {
                            memory.write_i32(addr, *v)?;
                            addr = addr.wrapping_add(4);
                        }
                        Value::I64(v) => {
                            memory.write_i64(addr, *v)?;
                            addr = addr.wrapping_add(8);
                        }
                        Value::F32(v) => {
                            memory.write_f32(addr, *v)?;
                            addr = addr.wrapping_add(4);
                        }
                        Value::F64(v) => {
                            memory.write_f64(addr, *v)?;
                            addr = addr.wrapping_add(8);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Dispatch loop for the top frame. Returns when the frame's body
    /// is exhausted, a bare `end` is executed, or `return` runs.
    fn run(&mut self) -> Result<(), Trap> {
        macro_rules! load {
            ($op:ident) => {{
                let offset = self.fetch_memarg()?;
                let memory = self.memory()?;
                ops::memory::$op(&mut self.stack, &memory.borrow(), offset)?;
            }};
        }
        macro_rules! store {
            ($op:ident) => {{
                let offset = self.fetch_memarg()?;
                let memory = self.memory()?;
                ops::memory::$op(&mut self.stack, &mut memory.borrow_mut(), offset)?;
            }};
        }

        loop {
            let op = {
                let frame = self.frames.last_mut().ok_or(Trap::StackUnderflow)?;
                if frame.pc >= frame.body.len() {
                    return Ok(());
                }
                let op = frame.body[frame.pc];
                frame.pc += 1;
                op
            };

            self.gas.charge(1)?;

            match op {
                // Control flow --------------------------------------------
                opcode::UNREACHABLE => return Err(Trap::Unreachable),
                opcode::NOP => {}
                opcode::BLOCK => self.enter_block()?,
                opcode::LOOP => self.enter_loop()?,
                opcode::IF => self.enter_if()?,
                opcode::ELSE => {
                    // the then-branch ran to completion; skip past end
                    let frame = self.frames.last_mut().ok_or(Trap::StackUnderflow)?;
                    let label = frame.labels.pop().ok_or(Trap::MalformedBody)?;
                    frame.pc = label.continuation;
                }
                opcode::END => {
                    let frame = self.frames.last_mut().ok_or(Trap::StackUnderflow)?;
                    if frame.labels.pop().is_none() {
                        return Ok(());
                    }
                }
                opcode::BR => {
                    let depth = self.fetch_vu32()?;
                    self.branch(depth)?;
                }
                opcode::BR_IF => {
                    let depth = self.fetch_vu32()?;
                    if self.stack.pop_i32()? != 0 {
                        self.branch(depth)?;
                    }
                }
                opcode::BR_TABLE => {
                    let count = self.fetch_vu32()?;
                    let mut targets = Vec::with_capacity(count.min(1024) as usize);
                    for _ in 0..count {
                        targets.push(self.fetch_vu32()?);
                    }
                    let default = self.fetch_vu32()?;
                    // saturate to the default on overflow
                    let index = self.stack.pop_i32()? as u32;
                    let depth = targets.get(index as usize).copied().unwrap_or(default);
                    self.branch(depth)?;
                }
                opcode::RETURN => return Ok(()),
                opcode::CALL => {
                    let func_index = self.fetch_vu32()?;
                    self.call_function(func_index)?;
                }
                opcode::CALL_INDIRECT => self.call_indirect()?,

                // Parametric ----------------------------------------------
                opcode::DROP => ops::parametric::drop(&mut self.stack)?,
                opcode::SELECT => ops::parametric::select(&mut self.stack)?,

                // Variables -----------------------------------------------
                opcode::LOCAL_GET => {
                    let index = self.fetch_vu32()?;
                    let frame = self.frames.last().ok_or(Trap::StackUnderflow)?;
                    ops::variable::local_get(&mut self.stack, frame, index)?;
                }
                opcode::LOCAL_SET => {
                    let index = self.fetch_vu32()?;
                    let frame = self.frames.last_mut().ok_or(Trap::StackUnderflow)?;
                    ops::variable::local_set(&mut self.stack, frame, index)?;
                }
                opcode::LOCAL_TEE => {
                    let index = self.fetch_vu32()?;
                    let frame = self.frames.last_mut().ok_or(Trap::StackUnderflow)?;
                    ops::variable::local_tee(&mut self.stack, frame, index)?;
                }
                opcode::GLOBAL_GET => {
                    let index = self.fetch_vu32()?;
                    ops::variable::global_get(&mut self.stack, &self.instance.globals, index)?;
                }
                opcode::GLOBAL_SET => {
                    let index = self.fetch_vu32()?;
                    ops::variable::global_set(&mut self.stack, &self.instance.globals, index)?;
                }

                // Memory --------------------------------------------------
                opcode::I32_LOAD => load!(i32_load),
                opcode::I64_LOAD => load!(i64_load),
                opcode::F32_LOAD => load!(f32_load),
                opcode::F64_LOAD => load!(f64_load),
                opcode::I32_LOAD8_S => load!(i32_load8_s),
                opcode::I32_LOAD8_U => load!(i32_load8_u),
                opcode::I32_LOAD16_S => load!(i32_load16_s),
                opcode::I32_LOAD16_U => load!(i32_load16_u),
                opcode::I64_LOAD8_S => load!(i64_load8_s),
                opcode::I64_LOAD8_U => load!(i64_load8_u),
                opcode::I64_LOAD16_S => load!(i64_load16_s),
                opcode::I64_LOAD16_U => load!(i64_load16_u),
                opcode::I64_LOAD32_S => load!(i64_load32_s),
                opcode::I64_LOAD32_U => load!(i64_load32_u),
                opcode::I32_STORE => store!(i32_store),
                opcode::I64_STORE => store!(i64_store),
                opcode::F32_STORE => store!(f32_store),
                opcode::F64_STORE => store!(f64_store),
                opcode::I32_STORE8 => store!(i32_store8),
                opcode::I32_STORE16 => store!(i32_store16),
                opcode::I64_STORE8 => store!(i64_store8),
                opcode::I64_STORE16 => store!(i64_store16),
                opcode::I64_STORE32 => store!(i64_store32),
                opcode::MEMORY_SIZE => {
                    self.fetch_u8()?; // reserved
                    let memory = self.memory()?;
                    ops::memory::memory_size(&mut self.stack, &memory.borrow());
                }
                opcode::MEMORY_GROW => {
                    self.fetch_u8()?; // reserved
                    let memory = self.memory()?;
                    ops::memory::memory_grow(&mut self.stack, &mut memory.borrow_mut())?;
                }

                // Constants -----------------------------------------------
                opcode::I32_CONST => {
                    let value = self.fetch_vs32()?;
                    ops::numeric::i32_const(&mut self.stack, value);
                }
                opcode::I64_CONST => {
                    let value = self.fetch_vs64()?;
                    ops::numeric::i64_const(&mut self.stack, value);
                }
                opcode::F32_CONST => {
                    let value = self.fetch_f32()?;
                    ops::numeric::f32_const(&mut self.stack, value);
                }
                opcode::F64_CONST => {
                    let value = self.fetch_f64()?;
                    ops::numeric::f64_const(&mut self.stack, value);
                }

                // Comparisons ---------------------------------------------
                opcode::I32_EQZ => ops::comparison::i32_eqz(&mut self.stack)?,
                opcode::I32_EQ => ops::comparison::i32_eq(&mut self.stack)?,
                opcode::I32_NE => ops::comparison::i32_ne(&mut self.stack)?,
                opcode::I32_LT_S => ops::comparison::i32_lt_s(&mut self.stack)?,
                opcode::I32_LT_U => ops::comparison::i32_lt_u(&mut self.stack)?,
                opcode::I32_GT_S => ops::comparison::i32_gt_s(&mut self.stack)?,
                opcode::I32_GT_U => ops::comparison::i32_gt_u(&mut self.stack)?,
                opcode::I32_LE_S => ops::comparison::i32_le_s(&mut self.stack)?,
                opcode::I32_LE_U => ops::comparison::i32_le_u(&mut self.stack)?,
                opcode::I32_GE_S => ops::comparison::i32_ge_s(&mut self.stack)?,
                opcode::I32_GE_U => ops::comparison::i32_ge_u(&mut self.stack)?,
                opcode::I64_EQZ => ops::comparison::i64_eqz(&mut self.stack)?,
                opcode::I64_EQ => ops::comparison::i64_eq(&mut self.stack)?,
                opcode::I64_NE => ops::comparison::i64_ne(&mut self.stack)?,
                opcode::I64_LT_S => ops::comparison::i64_lt_s(&mut self.stack)?,
                opcode::I64_LT_U => ops::comparison::i64_lt_u(&mut self.stack)?,
                opcode::I64_GT_S => ops::comparison::i64_gt_s(&mut self.stack)?,
                opcode::I64_GT_U => ops::comparison::i64_gt_u(&mut self.stack)?,
                opcode::I64_LE_S => ops::comparison::i64_le_s(&mut self.stack)?,
                opcode::I64_LE_U => ops::comparison::i64_le_u(&mut self.stack)?,
                opcode::I64_GE_S => ops::comparison::i64_ge_s(&mut self.stack)?,
                opcode::I64_GE_U => ops::comparison::i64_ge_u(&mut self.stack)?,
                opcode::F32_EQ => ops::comparison::f32_eq(&mut self.stack)?,
                opcode::F32_NE => ops::comparison::f32_ne(&mut self.stack)?,
                opcode::F32_LT => ops::comparison::f32_lt(&mut self.stack)?,
                opcode::F32_GT => ops::comparison::f32_gt(&mut self.stack)?,
                opcode::F32_LE => ops::comparison::f32_le(&mut self.stack)?,
                opcode::F32_GE => ops::comparison::f32_ge(&mut self.stack)?,
                opcode::F64_EQ => ops::comparison::f64_eq(&mut self.stack)?,
                opcode::F64_NE => ops::comparison::f64_ne(&mut self.stack)?,
                opcode::F64_LT => ops::comparison::f64_lt(&mut self.stack)?,
                opcode::F64_GT => ops::comparison::f64_gt(&mut self.stack)?,
                opcode::F64_LE => ops::comparison::f64_le(&mut self.stack)?,
                opcode::F64_GE => ops::comparison::f64_ge(&mut self.stack)?,

                // Numeric -------------------------------------------------
                opcode::I32_CLZ => ops::numeric::i32_clz(&mut self.stack)?,
                opcode::I32_CTZ => ops::numeric::i32_ctz(&mut self.stack)?,
                opcode::I32_POPCNT => ops::numeric::i32_popcnt(&mut self.stack)?,
                opcode::I32_ADD => ops::numeric::i32_add(&mut self.stack)?,
                opcode::I32_SUB => ops::numeric::i32_sub(&mut self.stack)?,
                opcode::I32_MUL => ops::numeric::i32_mul(&mut self.stack)?,
                opcode::I32_DIV_S => ops::numeric::i32_div_s(&mut self.stack)?,
                opcode::I32_DIV_U => ops::numeric::i32_div_u(&mut self.stack)?,
                opcode::I32_REM_S => ops::numeric::i32_rem_s(&mut self.stack)?,
                opcode::I32_REM_U => ops::numeric::i32_rem_u(&mut self.stack)?,
                opcode::I32_AND => ops::bitwise::i32_and(&mut self.stack)?,
                opcode::I32_OR => ops::bitwise::i32_or(&mut self.stack)?,
                opcode::I32_XOR => ops::bitwise::i32_xor(&mut self.stack)?,
                opcode::I32_SHL => ops::bitwise::i32_shl(&mut self.stack)?,
                opcode::I32_SHR_S => ops::bitwise::i32_shr_s(&mut self.stack)?,
                opcode::I32_SHR_U => ops::bitwise::i32_shr_u(&mut self.stack)?,
                opcode::I32_ROTL => ops::bitwise::i32_rotl(&mut self.stack)?,
                opcode::I32_ROTR => ops::bitwise::i32_rotr(&mut self.stack)?,
                opcode::I64_CLZ => ops::numeric::i64_clz(&mut self.stack)?,
                opcode::I64_CTZ => ops::numeric::i64_ctz(&mut self.stack)?,
                opcode::I64_POPCNT => ops::numeric::i64_popcnt(&mut self.stack)?,
                opcode::I64_ADD => ops::numeric::i64_add(&mut self.stack)?,
                opcode::I64_SUB => ops::numeric::i64_sub(&mut self.stack)?,
                opcode::I64_MUL => ops::numeric::i64_mul(&mut self.stack)?,
                opcode::I64_DIV_S => ops::numeric::i64_div_s(&mut self.stack)?,
                opcode::I64_DIV_U => ops::numeric::i64_div_u(&mut self.stack)?,
                opcode::I64_REM_S => ops::numeric::i64_rem_s(&mut self.stack)?,
                opcode::I64_REM_U => ops::numeric::i64_rem_u(&mut self.stack)?,
                opcode::I64_AND => ops::bitwise::i64_and(&mut self.stack)?,
                opcode::I64_OR => ops::bitwise::i64_or(&mut self.stack)?,
                opcode::I64_XOR => ops::bitwise::i64_xor(&mut self.stack)?,
                opcode::I64_SHL => ops::bitwise::i64_shl(&mut self.stack)?,
                opcode::I64_SHR_S => ops::bitwise::i64_shr_s(&mut self.stack)?,
                opcode::I64_SHR_U => ops::bitwise::i64_shr_u(&mut self.stack)?,
                opcode::I64_ROTL => ops::bitwise::i64_rotl(&mut self.stack)?,
                opcode::I64_ROTR => ops::bitwise::i64_rotr(&mut self.stack)?,
                opcode::F32_ABS => ops::numeric::f32_abs(&mut self.stack)?,
                opcode::F32_NEG => ops::numeric::f32_neg(&mut self.stack)?,
                opcode::F32_CEIL => ops::numeric::f32_ceil(&mut self.stack)?,
                opcode::F32_FLOOR => ops::numeric::f32_floor(&mut self.stack)?,
                opcode::F32_TRUNC => ops::numeric::f32_trunc(&mut self.stack)?,
                opcode::F32_NEAREST => ops::numeric::f32_nearest(&mut self.stack)?,
                opcode::F32_SQRT => ops::numeric::f32_sqrt(&mut self.stack)?,
                opcode::F32_ADD => ops::numeric::f32_add(&mut self.stack)?,
                opcode::F32_SUB => ops::numeric::f32_sub(&mut self.stack)?,
                opcode::F32_MUL => ops::numeric::f32_mul(&mut self.stack)?,
                opcode::F32_DIV => ops::numeric::f32_div(&mut self.stack)?,
                opcode::F32_MIN => ops::numeric::f32_min(&mut self.stack)?,
                opcode::F32_MAX => ops::numeric::f32_max(&mut self.stack)?,
                opcode::F32_COPYSIGN => ops::numeric::f32_copysign(&mut self.stack)?,
                opcode::F64_ABS => ops::numeric::f64_abs(&mut self.stack)?,
                opcode::F64_NEG => ops::numeric::f64_neg(&mut self.stack)?,
                opcode::F64_CEIL => ops::numeric::f64_ceil(&mut self.stack)?,
                opcode::F64_FLOOR => ops::numeric::f64_floor(&mut self.stack)?,
                opcode::F64_TRUNC => ops::numeric::f64_trunc(&mut self.stack)?,
                opcode::F64_NEAREST => ops::numeric::f64_nearest(&mut self.stack)?,
                opcode::F64_SQRT => ops::numeric::f64_sqrt(&mut self.stack)?,
                opcode::F64_ADD => ops::numeric::f64_add(&mut self.stack)?,
                opcode::F64_SUB => ops::numeric::f64_sub(&mut self.stack)?,
                opcode::F64_MUL => ops::numeric::f64_mul(&mut self.stack)?,
                opcode::F64_DIV => ops::numeric::f64_div(&mut self.stack)?,
                opcode::F64_MIN => ops::numeric::f64_min(&mut self.stack)?,
                opcode::F64_MAX => ops::numeric::f64_max(&mut self.stack)?,
                opcode::F64_COPYSIGN => ops::numeric::f64_copysign(&mut self.stack)?,

                // Conversions ---------------------------------------------
                opcode::I32_WRAP_I64 => ops::conversion::i32_wrap_i64(&mut self.stack)?,
                opcode::I32_TRUNC_F32_S => ops::conversion::i32_trunc_f32_s(&mut self.stack)?,
                opcode::I32_TRUNC_F32_U => ops::conversion::i32_trunc_f32_u(&mut self.stack)?,
                opcode::I32_TRUNC_F64_S => ops::conversion::i32_trunc_f64_s(&mut self.stack)?,
                opcode::I32_TRUNC_F64_U => ops::conversion::i32_trunc_f64_u(&mut self.stack)?,
                opcode::I64_EXTEND_I32_S => ops::conversion::i64_extend_i32_s(&mut self.stack)?,
                opcode::I64_EXTEND_I32_U => ops::conversion::i64_extend_i32_u(&mut self.stack)?,
                opcode::I64_TRUNC_F32_S => ops::conversion::i64_trunc_f32_s(&mut self.stack)?,
                opcode::I64_TRUNC_F32_U => ops::conversion::i64_trunc_f32_u(&mut self.stack)?,
                opcode::I64_TRUNC_F64_S => ops::conversion::i64_trunc_f64_s(&mut self.stack)?,
                opcode::I64_TRUNC_F64_U => ops::conversion::i64_trunc_f64_u(&mut self.stack)?,
                opcode::F32_CONVERT_I32_S => ops::conversion::f32_convert_i32_s(&mut self.stack)?,
                opcode::F32_CONVERT_I32_U => ops::conversion::f32_convert_i32_u(&mut self.stack)?,
                opcode::F32_CONVERT_I64_S => ops::conversion::f32_convert_i64_s(&mut self.stack)?,
                opcode::F32_CONVERT_I64_U => ops::conversion::f32_convert_i64_u(&mut self.stack)?,
                opcode::F32_DEMOTE_F64 => ops::conversion::f32_demote_f64(&mut self.stack)?,
                opcode::F64_CONVERT_I32_S => ops::conversion::f64_convert_i32_s(&mut self.stack)?,
                opcode::F64_CONVERT_I32_U => ops::conversion::f64_convert_i32_u(&mut self.stack)?,
                opcode::F64_CONVERT_I64_S => ops::conversion::f64_convert_i64_s(&mut self.stack)?,
                opcode::F64_CONVERT_I64_U => ops::conversion::f64_convert_i64_u(&mut self.stack)?,
                opcode::F64_PROMOTE_F32 => ops::conversion::f64_promote_f32(&mut self.stack)?,
                opcode::I32_REINTERPRET_F32 => {
                    ops::conversion::i32_reinterpret_f32(&mut self.stack)?
                }
                opcode::I64_REINTERPRET_F64 => {
                    ops::conversion::i64_reinterpret_f64(&mut self.stack)?
                }
                opcode::F32_REINTERPRET_I32 => {
                    ops::conversion::f32_reinterpret_i32(&mut self.stack)?
                }
                opcode::F64_REINTERPRET_I64 => {
                    ops::conversion::f64_reinterpret_i64(&mut self.stack)?
                }

                other => return Err(Trap::InvalidOpcode(other)),
            }
        }
    }

    // Control-flow helpers ----------------------------------------------

    fn enter_block(&mut self) -> Result<(), Trap> {
        let block_type = self.fetch_u8()?;
        let arity = block_arity(block_type)?;
        let stack_depth = self.stack.depth();
        let frame = self.frames.last_mut().ok_or(Trap::StackUnderflow)?;
        let ends = find_block_end(&frame.body, frame.pc)?;
        frame.labels.push(Label {
            kind: LabelKind::Block,
            stack_depth,
            arity,
            continuation: ends.end + 1,
        });
        Ok(())
    }

    fn enter_loop(&mut self) -> Result<(), Trap> {
        let block_type = self.fetch_u8()?;
        block_arity(block_type)?;
        let stack_depth = self.stack.depth();
        let frame = self.frames.last_mut().ok_or(Trap::StackUnderflow)?;
        frame.labels.push(Label {
            kind: LabelKind::Loop,
            stack_depth,
            // a branch to a loop re-enters it and carries no values
            arity: 0,
            continuation: frame.pc,
        });
        Ok(())
    }

    fn enter_if(&mut self) -> Result<(), Trap> {
        let block_type = self.fetch_u8()?;
        let arity = block_arity(block_type)?;
        let condition = self.stack.pop_i32()?;
        let stack_depth = self.stack.depth();
        let frame = self.frames.last_mut().ok_or(Trap::StackUnderflow)?;
        let ends = find_block_end(&frame.body, frame.pc)?;

        if condition != 0 {
            frame.labels.push(Label {
                kind: LabelKind::If,
                stack_depth,
                arity,
                continuation: ends.end + 1,
            });
        } else if let Some(else_pc) = ends.else_pc {
            frame.labels.push(Label {
                kind: LabelKind::If,
                stack_depth,
                arity,
                continuation: ends.end + 1,
            });
            frame.pc = else_pc + 1;
        } else {
            frame.pc = ends.end + 1;
        }
        Ok(())
    }

    /// `br depth`: truncate the operand stack to the target label's
    /// entry depth plus its arity, then jump to its continuation.
    fn branch(&mut self, depth: u32) -> Result<(), Trap> {
        let (stack_depth, arity) = {
            let frame = self.frames.last_mut().ok_or(Trap::StackUnderflow)?;
            let len = frame.labels.len();
            if depth as usize >= len {
                return Err(Trap::InvalidLabel(depth));
            }
            let target = len - 1 - depth as usize;
            let label = frame.labels[target].clone();
            match label.kind {
                // the loop label survives the branch back to its start
                LabelKind::Loop => frame.labels.truncate(target + 1),
                _ => frame.labels.truncate(target),
            }
            frame.pc = label.continuation;
            (label.stack_depth, label.arity)
        };
        self.stack.truncate(stack_depth, arity)
    }

    fn call_indirect(&mut self) -> Result<(), Trap> {
        let type_index = self.fetch_vu32()?;
        self.fetch_u8()?; // reserved table index

        let expected = self
            .instance
            .types
            .get(type_index as usize)
            .cloned()
            .ok_or(Trap::TypeIndexOutOfBounds(type_index))?;

        let element = self.stack.pop_i32()? as u32;
        let table = self.instance.table.clone().ok_or(Trap::NoTable)?;
        let func_index = table
            .borrow()
            .get(element)?
            .ok_or(Trap::TableOutOfBounds(element))?;

        let actual = self
            .instance
            .functions
            .get(func_index as usize)
            .ok_or(Trap::FunctionIndexOutOfBounds(func_index))?
            .func_type()
            .clone();
        if actual != expected {
            return Err(Trap::IndirectCallTypeMismatch {
                expected: expected.to_string(),
                actual: actual.to_string(),
            });
        }

        self.call_function(func_index)
    }

    // Immediate fetching -------------------------------------------------

    fn memory(&self) -> Result<Rc<std::cell::RefCell<super::Memory>>, Trap> {
        self.instance.memory.clone().ok_or(Trap::NoMemory)
    }

    fn fetch_u8(&mut self) -> Result<u8, Trap> {
        let frame = self.frames.last_mut().ok_or(Trap::StackUnderflow)?;
        if frame.pc >= frame.body.len() {
            return Err(Trap::MalformedBody);
        }
        let byte = frame.body[frame.pc];
        frame.pc += 1;
        Ok(byte)
    }

    fn fetch_vu32(&mut self) -> Result<u32, Trap> {
        let frame = self.frames.last_mut().ok_or(Trap::StackUnderflow)?;
        let mut next = || -> Result<u8, DecodeError> {
            if frame.pc < frame.body.len() {
                let byte = frame.body[frame.pc];
                frame.pc += 1;
                Ok(byte)
            } else {
                Err(DecodeError::UnexpectedEof)
            }
        };
        Ok(reader::read_vu32(&mut next)?)
    }

    fn fetch_vs32(&mut self) -> Result<i32, Trap> {
        let frame = self.frames.last_mut().ok_or(Trap::StackUnderflow)?;
        let mut next = || -> Result<u8, DecodeError> {
            if frame.pc < frame.body.len() {
                let byte = frame.body[frame.pc];
                frame.pc += 1;
                Ok(byte)
            } else {
                Err(DecodeError::UnexpectedEof)
            }
        };
        Ok(reader::read_vs32(&mut next)?)
    }

    fn fetch_vs64(&mut self) -> Result<i64, Trap> {
        let frame = self.frames.last_mut().ok_or(Trap::StackUnderflow)?;
        let mut next = || -> Result<u8, DecodeError> {
            if frame.pc < frame.body.len() {
                let byte = frame.body[frame.pc];
                frame.pc += 1;
                Ok(byte)
            } else {
                Err(DecodeError::UnexpectedEof)
            }
        };
        Ok(reader::read_vs64(&mut next)?)
    }

    fn fetch_f32(&mut self) -> Result<f32, Trap> {
        let frame = self.frames.last_mut().ok_or(Trap::StackUnderflow)?;
        let mut next = || -> Result<u8, DecodeError> {
            if frame.pc < frame.body.len() {
                let byte = frame.body[frame.pc];
                frame.pc += 1;
                Ok(byte)
            } else {
                Err(DecodeError::UnexpectedEof)
            }
        };
        Ok(reader::read_f32(&mut next)?)
    }

    fn fetch_f64(&mut self) -> Result<f64, Trap> {
        let frame = self.frames.last_mut().ok_or(Trap::StackUnderflow)?;
        let mut next = || -> Result<u8, DecodeError> {
            if frame.pc < frame.body.len() {
                let byte = frame.body[frame.pc];
                frame.pc += 1;
                Ok(byte)
            } else {
                Err(DecodeError::UnexpectedEof)
            }
        };
        Ok(reader::read_f64(&mut next)?)
    }

    /// `(align, offset)` immediate pair; the align hint is discarded.
    fn fetch_memarg(&mut self) -> Result<u32, Trap> {
        self.fetch_vu32()?;
        self.fetch_vu32()
    }
}

/// Result arity encoded by a block-type byte: 0x40 is empty, a value
/// type is one result.
fn block_arity(block_type: u8) -> Result<usize, Trap> {
    use crate::parser::types::ValueType;
    if block_type == 0x40 {
        Ok(0)
    } else {
        ValueType::decode(block_type)
            .map(|_| 1)
            .map_err(|_| Trap::MalformedBody)
    }
}

/// Scan forward from the first instruction of a block to its matching
/// `end`, recording a depth-zero `else` on the way.
fn find_block_end(body: &[u8], mut pc: usize) -> Result<BlockEnds, Trap> {
    let mut depth = 0usize;
    let mut else_pc = None;
    while pc < body.len() {
        let op = body[pc];
        pc += 1;
        match op {
            opcode::BLOCK | opcode::LOOP | opcode::IF => {
                depth += 1;
                pc = skip_immediates(body, pc, op)?;
            }
            opcode::ELSE => {
                if depth == 0 && else_pc.is_none() {
                    else_pc = Some(pc - 1);
                }
            }
            opcode::END => {
                if depth == 0 {
                    return Ok(BlockEnds {
                        else_pc,
                        end: pc - 1,
                    });
                }
                depth -= 1;
            }
            _ => pc = skip_immediates(body, pc, op)?,
        }
    }
    Err(Trap::MalformedBody)
}

/// Advance past the immediates of `op`, which sits just before `pc`.
fn skip_immediates(body: &[u8], mut pc: usize, op: u8) -> Result<usize, Trap> {
    fn skip_leb(body: &[u8], pc: &mut usize) -> Result<u64, Trap> {
        let mut result = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = *body.get(*pc).ok_or(Trap::MalformedBody)?;
            *pc += 1;
            if shift < 64 {
                result |= ((byte & 0x7f) as u64) << shift;
            }
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
    }

    fn skip_fixed(body: &[u8], pc: &mut usize, len: usize) -> Result<(), Trap> {
        *pc += len;
        if *pc > body.len() {
            return Err(Trap::MalformedBody);
        }
        Ok(())
    }

    match op {
        opcode::BLOCK | opcode::LOOP | opcode::IF => skip_fixed(body, &mut pc, 1)?,
        opcode::BR
        | opcode::BR_IF
        | opcode::CALL
        | opcode::LOCAL_GET
        | opcode::LOCAL_SET
        | opcode::LOCAL_TEE
        | opcode::GLOBAL_GET
        | opcode::GLOBAL_SET
        | opcode::I32_CONST
        | opcode::I64_CONST => {
            skip_leb(body, &mut pc)?;
        }
        opcode::BR_TABLE => {
            let count = skip_leb(body, &mut pc)?;
            for _ in 0..=count {
                skip_leb(body, &mut pc)?;
            }
        }
        opcode::CALL_INDIRECT => {
            skip_leb(body, &mut pc)?;
            skip_fixed(body, &mut pc, 1)?;
        }
        opcode::F32_CONST => skip_fixed(body, &mut pc, 4)?,
        opcode::F64_CONST => skip_fixed(body, &mut pc, 8)?,
        opcode::MEMORY_SIZE | opcode::MEMORY_GROW => skip_fixed(body, &mut pc, 1)?,
        opcode::I32_LOAD..=opcode::I64_STORE32 => {
            skip_leb(body, &mut pc)?;
            skip_leb(body, &mut pc)?;
        }
        opcode::UNREACHABLE
        | opcode::NOP
        | opcode::ELSE
        | opcode::END
        | opcode::RETURN
        | opcode::DROP
        | opcode::SELECT => {}
        0x45..=0xbf => {}
        other => return Err(Trap::InvalidOpcode(other)),
    }
    Ok(pc)
}
