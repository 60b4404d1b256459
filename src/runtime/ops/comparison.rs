//! Comparison and test instructions.
//!
//! Every comparison pushes an i32 that is 1 when the relation holds and
//! 0 otherwise. Integer relations come in explicit signed and unsigned
//! forms; float relations are IEEE 754, so any NaN operand makes `eq`,
//! `lt`, `gt`, `le`, and `ge` false and `ne` true.

use super::{Stack, Trap, Value};

fn push_bool(stack: &mut Stack, v: bool) {
    stack.push(Value::I32(v as i32));
}

// ============================================================================
// i32 comparisons
// ============================================================================

pub fn i32_eqz(stack: &mut Stack) -> Result<(), Trap> {
    let value = stack.pop_i32()?;
    push_bool(stack, value == 0);
    Ok(())
}

pub fn i32_eq(stack: &mut Stack) -> Result<(), Trap> {
    let c2 = stack.pop_i32()?;
    let c1 = stack.pop_i32()?;
    push_bool(stack, c1 == c2);
    Ok(())
}

pub fn i32_ne(stack: &mut Stack) -> Result<(), Trap> {
    let c2 = stack.pop_i32()?;
    let c1 = stack.pop_i32()?;
    push_bool(stack, c1 != c2);
    Ok(())
}

pub fn i32_lt_s(stack: &mut Stack) -> Result<(), Trap> {
    let c2 = stack.pop_i32()?;
    let c1 = stack.pop_i32()?;
    push_bool(stack, c1 < c2);
    Ok(())
}

pub fn i32_lt_u(stack: &mut Stack) -> Result<(), Trap> {
    let c2 = stack.pop_i32()?;
    let c1 = stack.pop_i32()?;
    push_bool(stack, (c1 as u32) < (c2 as u32));
    Ok(())
}

pub fn i32_gt_s(stack: &mut Stack) -> Result<(), Trap> {
    let c2 = stack.pop_i32()?;
    let c1 = stack.pop_i32()?;
    push_bool(stack, c1 > c2);
    Ok(())
}

pub fn i32_gt_u(stack: &mut Stack) -> Result<(), Trap> {
    let c2 = stack.pop_i32()?;
    let c1 = stack.pop_i32()?;
    push_bool(stack, (c1 as u32) > (c2 as u32));
    Ok(())
}

pub fn i32_le_s(stack: &mut Stack) -> Result<(), Trap> {
    let c2 = stack.pop_i32()?;
    let c1 = stack.pop_i32()?;
    push_bool(stack, c1 <= c2);
    Ok(())
}

pub fn i32_le_u(stack: &mut Stack) -> Result<(), Trap> {
    let c2 = stack.pop_i32()?;
    let c1 = stack.pop_i32()?;
    push_bool(stack, (c1 as u32) <= (c2 as u32));
    Ok(())
}

pub fn i32_ge_s(stack: &mut Stack) -> Result<(), Trap> {
    let c2 = stack.pop_i32()?;
    let c1 = stack.pop_i32()?;
    push_bool(stack, c1 >= c2);
    Ok(())
}

pub fn i32_ge_u(stack: &mut Stack) -> Result<(), Trap> {
    let c2 = stack.pop_i32()?;
    let c1 = stack.pop_i32()?;
    push_bool(stack, (c1 as u32) >= (c2 as u32));
    Ok(())
}

// ============================================================================
// i64 comparisons
// ============================================================================

pub fn i64_eqz(stack: &mut Stack) -> Result<(), Trap> {
    let value = stack.pop_i64()?;
    push_bool(stack, value == 0);
    Ok(())
}

pub fn i64_eq(stack: &mut Stack) -> Result<(), Trap> {
    let c2 = stack.pop_i64()?;
    let c1 = stack.pop_i64()?;
    push_bool(stack, c1 == c2);
    Ok(())
}

pub fn i64_ne(stack: &mut Stack) -> Result<(), Trap> {
    let c2 = stack.pop_i64()?;
    let c1 = stack.pop_i64()?;
    push_bool(stack, c1 != c2);
    Ok(())
}

pub fn i64_lt_s(stack: &mut Stack) -> Result<(), Trap> {
    let c2 = stack.pop_i64()?;
    let c1 = stack.pop_i64()?;
    push_bool(stack, c1 < c2);
    Ok(())
}

pub fn i64_lt_u(stack: &mut Stack) -> Result<(), Trap> {
    let c2 = stack.pop_i64()?;
    let c1 = stack.pop_i64()?;
    push_bool(stack, (c1 as u64) < (c2 as u64));
    Ok(())
}

pub fn i64_gt_s(stack: &mut Stack) -> Result<(), Trap> {
    let c2 = stack.pop_i64()?;
    let c1 = stack.pop_i64()?;
    push_bool(stack, c1 > c2);
    Ok(())
}

pub fn i64_gt_u(stack: &mut Stack) -> Result<(), Trap> {
    let c2 = stack.pop_i64()?;
    let c1 = stack.pop_i64()?;
    push_bool(stack, (c1 as u64) > (c2 as u64));
    Ok(())
}

pub fn i64_le_s(stack: &mut Stack) -> Result<(), Trap> {
    let c2 = stack.pop_i64()?;
    let c1 = stack.pop_i64()?;
    push_bool(stack, c1 <= c2);
    Ok(())
}

pub fn i64_le_u(stack: &mut Stack) -> Result<(), Trap> {
    let c2 = stack.pop_i64()?;
    let c1 = stack.pop_i64()?;
    push_bool(stack, (c1 as u64) <= (c2 as u64));
    Ok(())
}

pub fn i64_ge_s(stack: &mut Stack) -> Result<(), Trap> {
    let c2 = stack.pop_i64()?;
    let c1 = stack.pop_i64()?;
    push_bool(stack, c1 >= c2);
    Ok(())
}

pub fn i64_ge_u(stack: &mut Stack) -> Result<(), Trap> {
    let c2 = stack.pop_i64()?;
    let c1 = stack.pop_i64()?;
    push_bool(stack, (c1 as u64) >= (c2 as u64));
    Ok(())
}

// ============================================================================
// f32 comparisons
// ============================================================================

pub fn f32_eq(stack: &mut Stack) -> Result<(), Trap> {
    let c2 = stack.pop_f32()?;
    let c1 = stack.pop_f32()?;
    push_bool(stack, c1 == c2);
    Ok(())
}

pub fn f32_ne(stack: &mut Stack) -> Result<(), Trap> {
    let c2 = stack.pop_f32()?;
    let c1 = stack.pop_f32()?;
    push_bool(stack, c1 != c2);
    Ok(())
}

pub fn f32_lt(stack: &mut Stack) -> Result<(), Trap> {
    let c2 = stack.pop_f32()?;
    let c1 = stack.pop_f32()?;
    push_bool(stack, c1 < c2);
    Ok(())
}

pub fn f32_gt(stack: &mut Stack) -> Result<(), Trap> {
    let c2 = stack.pop_f32()?;
    let c1 = stack.pop_f32()?;
    push_bool(stack, c1 > c2);
    Ok(())
}

pub fn f32_le(stack: &mut Stack) -> Result<(), Trap> {
    let c2 = stack.pop_f32()?;
    let c1 = stack.pop_f32()?;
    push_bool(stack, c1 <= c2);
    Ok(())
}

pub fn f32_ge(stack: &mut Stack) -> Result<(), Trap> {
    let c2 = stack.pop_f32()?;
    let c1 = stack.pop_f32()?;
    push_bool(stack, c1 >= c2);
    Ok(())
}

// ============================================================================
// f64 comparisons
// ============================================================================

pub fn f64_eq(stack: &mut Stack) -> Result<(), Trap> {
    let c2 = stack.pop_f64()?;
    let c1 = stack.pop_f64()?;
    push_bool(stack, c1 == c2);
    Ok(())
}

pub fn f64_ne(stack: &mut Stack) -> Result<(), Trap> {
    let c2 = stack.pop_f64()?;
    let c1 = stack.pop_f64()?;
    push_bool(stack, c1 != c2);
    Ok(())
}

pub fn f64_lt(stack: &mut Stack) -> Result<(), Trap> {
    let c2 = stack.pop_f64()?;
    let c1 = stack.pop_f64()?;
    push_bool(stack, c1 < c2);
    Ok(())
}

pub fn f64_gt(stack: &mut Stack) -> Result<(), Trap> {
    let c2 = stack.pop_f64()?;
    let c1 = stack.pop_f64()?;
    push_bool(stack, c1 > c2);
    Ok(())
}

pub fn f64_le(stack: &mut Stack) -> Result<(), Trap> {
    let c2 = stack.pop_f64()?;
    let c1 = stack.pop_f64()?;
    push_bool(stack, c1 <= c2);
    Ok(())
}

pub fn f64_ge(stack: &mut Stack) -> Result<(), Trap> {
    let c2 = stack.pop_f64()?;
    let c1 = stack.pop_f64()?;
    push_bool(stack, c1 >= c2);
    Ok(())
}
