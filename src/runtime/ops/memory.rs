//! Memory instructions: loads, stores, size, and grow.
//!
//! Every load and store pops an i32 base address; the effective address
//! is `base + offset` from the instruction's immediate, computed in
//! 64-bit so the overflow itself is an out-of-bounds trap. The align
//! immediate is a hint and is ignored.

use super::{Memory, Stack, Trap, Value};

/// Effective address of an access: popped base plus static offset.
fn effective_address(base: i32, offset: u32) -> Result<u32, Trap> {
    let addr = base as u32 as u64 + offset as u64;
    u32::try_from(addr).map_err(|_| Trap::MemoryOutOfBounds)
}

// ============================================================================
// Loads
// ============================================================================

pub fn i32_load(stack: &mut Stack, memory: &Memory, offset: u32) -> Result<(), Trap> {
    let base = stack.pop_i32()?;
    let value = memory.read_i32(effective_address(base, offset)?)?;
    stack.push(Value::I32(value));
    Ok(())
}

pub fn i64_load(stack: &mut Stack, memory: &Memory, offset: u32) -> Result<(), Trap> {
    let base = stack.pop_i32()?;
    let value = memory.read_i64(effective_address(base, offset)?)?;
    stack.push(Value::I64(value));
    Ok(())
}

pub fn f32_load(stack: &mut Stack, memory: &Memory, offset: u32) -> Result<(), Trap> {
    let base = stack.pop_i32()?;
    let value = memory.read_f32(effective_address(base, offset)?)?;
    stack.push(Value::F32(value));
    Ok(())
}

pub fn f64_load(stack: &mut Stack, memory: &Memory, offset: u32) -> Result<(), Trap> {
    let base = stack.pop_i32()?;
    let value = memory.read_f64(effective_address(base, offset)?)?;
    stack.push(Value::F64(value));
    Ok(())
}

pub fn i32_load8_s(stack: &mut Stack, memory: &Memory, offset: u32) -> Result<(), Trap> {
    let base = stack.pop_i32()?;
    let value = memory.read_i8(effective_address(base, offset)?)?;
    stack.push(Value::I32(value as i32));
    Ok(())
}

pub fn i32_load8_u(stack: &mut Stack, memory: &Memory, offset: u32) -> Result<(), Trap> {
    let base = stack.pop_i32()?;
    let value = memory.read_u8(effective_address(base, offset)?)?;
    stack.push(Value::I32(value as i32));
    Ok(())
}

pub fn i32_load16_s(stack: &mut Stack, memory: &Memory, offset: u32) -> Result<(), Trap> {
    let base = stack.pop_i32()?;
    let value = memory.read_i16(effective_address(base, offset)?)?;
    stack.push(Value::I32(value as i32));
    Ok(())
}

pub fn i32_load16_u(stack: &mut Stack, memory: &Memory, offset: u32) -> Result<(), Trap> {
    let base = stack.pop_i32()?;
    let value = memory.read_u16(effective_address(base, offset)?)?;
    stack.push(Value::I32(value as i32));
    Ok(())
}

pub fn i64_load8_s(stack: &mut Stack, memory: &Memory, offset: u32) -> Result<(), Trap> {
    let base = stack.pop_i32()?;
    let value = memory.read_i8(effective_address(base, offset)?)?;
    stack.push(Value::I64(value as i64));
    Ok(())
}

pub fn i64_load8_u(stack: &mut Stack, memory: &Memory, offset: u32) -> Result<(), Trap> {
    let base = stack.pop_i32()?;
    let value = memory.read_u8(effective_address(base, offset)?)?;
    stack.push(Value::I64(value as i64));
    Ok(())
}

pub fn i64_load16_s(stack: &mut Stack, memory: &Memory, offset: u32) -> Result<(), Trap> {
    let base = stack.pop_i32()?;
    let value = memory.read_i16(effective_address(base, offset)?)?;
    stack.push(Value::I64(value as i64));
    Ok(())
}

pub fn i64_load16_u(stack: &mut Stack, memory: &Memory, offset: u32) -> Result<(), Trap> {
    let base = stack.pop_i32()?;
    let value = memory.read_u16(effective_address(base, offset)?)?;
    stack.push(Value::I64(value as i64));
    Ok(())
}

pub fn i64_load32_s(stack: &mut Stack, memory: &Memory, offset: u32) -> Result<(), Trap> {
    let base = stack.pop_i32()?;
    let value = memory.read_i32(effective_address(base, offset)?)?;
    stack.push(Value::I64(value as i64));
    Ok(())
}

pub fn i64_load32_u(stack: &mut Stack, memory: &Memory, offset: u32) -> Result<(), Trap> {
    let base = stack.pop_i32()?;
    let value = memory.read_u32(effective_address(base, offset)?)?;
    stack.push(Value::I64(value as i64));
    Ok(())
}

// ============================================================================
// Stores
// ============================================================================

pub fn i32_store(stack: &mut Stack, memory: &mut Memory, offset: u32) -> Result<(), Trap> {
    let value = stack.pop_i32()?;
    let base = stack.pop_i32()?;
    memory.write_i32(effective_address(base, offset)?, value)
}

pub fn i64_store(stack: &mut Stack, memory: &mut Memory, offset: u32) -> Result<(), Trap> {
    let value = stack.pop_i64()?;
    let base = stack.pop_i32()?;
    memory.write_i64(effective_address(base, offset)?, value)
}

pub fn f32_store(stack: &mut Stack, memory: &mut Memory, offset: u32) -> Result<(), Trap> {
    let value = stack.pop_f32()?;
    let base = stack.pop_i32()?;
    memory.write_f32(effective_address(base, offset)?, value)
}

pub fn f64_store(stack: &mut Stack, memory: &mut Memory, offset: u32) -> Result<(), Trap> {
    let value = stack.pop_f64()?;
    let base = stack.pop_i32()?;
    memory.write_f64(effective_address(base, offset)?, value)
}

pub fn i32_store8(stack: &mut Stack, memory: &mut Memory, offset: u32) -> Result<(), Trap> {
    let value = stack.pop_i32()?;
    let base = stack.pop_i32()?;
    memory.write_u8(effective_address(base, offset)?, value as u8)
}

pub fn i32_store16(stack: &mut Stack, memory: &mut Memory, offset: u32) -> Result<(), Trap> {
    let value = stack.pop_i32()?;
    let base = stack.pop_i32()?;
    memory.write_u16(effective_address(base, offset)?, value as u16)
}

pub fn i64_store8(stack: &mut Stack, memory: &mut Memory, offset: u32) -> Result<(), Trap> {
    let value = stack.pop_i64()?;
    let base = stack.pop_i32()?;
    memory.write_u8(effective_address(base, offset)?, value as u8)
}

pub fn i64_store16(stack: &mut Stack, memory: &mut Memory, offset: u32) -> Result<(), Trap> {
    let value = stack.pop_i64()?;
    let base = stack.pop_i32()?;
    memory.write_u16(effective_address(base, offset)?, value as u16)
}

pub fn i64_store32(stack: &mut Stack, memory: &mut Memory, offset: u32) -> Result<(), Trap> {
    let value = stack.pop_i64()?;
    let base = stack.pop_i32()?;
    memory.write_u32(effective_address(base, offset)?, value as u32)
}

// ============================================================================
// Size and grow
// ============================================================================

/// memory.size: current page count.
pub fn memory_size(stack: &mut Stack, memory: &Memory) {
    stack.push(Value::I32(memory.size() as i32));
}

/// memory.grow: previous page count, or -1 without mutation on failure.
pub fn memory_grow(stack: &mut Stack, memory: &mut Memory) -> Result<(), Trap> {
    let delta = stack.pop_i32()?;
    stack.push(Value::I32(memory.grow(delta as u32)));
    Ok(())
}
