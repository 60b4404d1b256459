//! Conversion instructions: wrapping, extension, truncation,
//! int-to-float conversion, demotion/promotion, and reinterpretation.
//!
//! Float-to-int truncation traps on NaN and on values whose truncated
//! result does not fit the target width. Reinterpretations are
//! bit-exact.

use super::{Stack, Trap, Value};

// ============================================================================
// Integer width changes
// ============================================================================

/// i32.wrap_i64: keep the low 32 bits.
pub fn i32_wrap_i64(stack: &mut Stack) -> Result<(), Trap> {
    let value = stack.pop_i64()?;
    stack.push(Value::I32(value as i32));
    Ok(())
}

pub fn i64_extend_i32_s(stack: &mut Stack) -> Result<(), Trap> {
    let value = stack.pop_i32()?;
    stack.push(Value::I64(value as i64));
    Ok(())
}

pub fn i64_extend_i32_u(stack: &mut Stack) -> Result<(), Trap> {
    let value = stack.pop_i32()?;
    stack.push(Value::I64(value as u32 as i64));
    Ok(())
}

// ============================================================================
// Float-to-int truncation
// ============================================================================

// Truncate first, then compare against exact type bounds. The negative
// bound is representable exactly, so the closed comparison on that side
// keeps INT_MIN itself valid.

fn trunc_checked_f32(value: f32, lo: f32, hi: f32) -> Result<f32, Trap> {
    if value.is_nan() {
        return Err(Trap::InvalidConversion);
    }
    let t = value.trunc();
    if t < lo || t >= hi {
        return Err(Trap::InvalidConversion);
    }
    Ok(t)
}

fn trunc_checked_f64(value: f64, lo: f64, hi: f64) -> Result<f64, Trap> {
    if value.is_nan() {
        return Err(Trap::InvalidConversion);
    }
    let t = value.trunc();
    if t < lo || t >= hi {
        return Err(Trap::InvalidConversion);
    }
    Ok(t)
}

pub fn i32_trunc_f32_s(stack: &mut Stack) -> Result<(), Trap> {
    let value = stack.pop_f32()?;
    let t = trunc_checked_f32(value, -2147483648.0, 2147483648.0)?;
    stack.push(Value::I32(t as i32));
    Ok(())
}

pub fn i32_trunc_f32_u(stack: &mut Stack) -> Result<(), Trap> {
    let value = stack.pop_f32()?;
    let t = trunc_checked_f32(value, -0.0, 4294967296.0)?;
    stack.push(Value::I32(t as u32 as i32));
    Ok(())
}

pub fn i32_trunc_f64_s(stack: &mut Stack) -> Result<(), Trap> {
    let value = stack.pop_f64()?;
    let t = trunc_checked_f64(value, -2147483648.0, 2147483648.0)?;
    stack.push(Value::I32(t as i32));
    Ok(())
}

pub fn i32_trunc_f64_u(stack: &mut Stack) -> Result<(), Trap> {
    let value = stack.pop_f64()?;
    let t = trunc_checked_f64(value, -0.0, 4294967296.0)?;
    stack.push(Value::I32(t as u32 as i32));
    Ok(())
}

pub fn i64_trunc_f32_s(stack: &mut Stack) -> Result<(), Trap> {
    let value = stack.pop_f32()?;
    let t = trunc_checked_f32(value, -9223372036854775808.0, 9223372036854775808.0)?;
    stack.push(Value::I64(t as i64));
    Ok(())
}

pub fn i64_trunc_f32_u(stack: &mut Stack) -> Result<(), Trap> {
    let value = stack.pop_f32()?;
    let t = trunc_checked_f32(value, -0.0, 18446744073709551616.0)?;
    stack.push(Value::I64(t as u64 as i64));
    Ok(())
}

pub fn i64_trunc_f64_s(stack: &mut Stack) -> Result<(), Trap> {
    let value = stack.pop_f64()?;
    let t = trunc_checked_f64(value, -9223372036854775808.0, 9223372036854775808.0)?;
    stack.push(Value::I64(t as i64));
    Ok(())
}

pub fn i64_trunc_f64_u(stack: &mut Stack) -> Result<(), Trap> {
    let value = stack.pop_f64()?;
    let t = trunc_checked_f64(value, -0.0, 18446744073709551616.0)?;
    stack.push(Value::I64(t as u64 as i64));
    Ok(())
}

// ============================================================================
// Int-to-float conversion
// ============================================================================

pub fn f32_convert_i32_s(stack: &mut Stack) -> Result<(), Trap> {
    let value = stack.pop_i32()?;
    stack.push(Value::F32(value as f32));
    Ok(())
}

pub fn f32_convert_i32_u(stack: &mut Stack) -> Result<(), Trap> {
    let value = stack.pop_i32()?;
    stack.push(Value::F32(value as u32 as f32));
    Ok(())
}

pub fn f32_convert_i64_s(stack: &mut Stack) -> Result<(), Trap> {
    let value = stack.pop_i64()?;
    stack.push(Value::F32(value as f32));
    Ok(())
}

pub fn f32_convert_i64_u(stack: &mut Stack) -> Result<(), Trap> {
    let value = stack.pop_i64()?;
    stack.push(Value::F32(value as u64 as f32));
    Ok(())
}

pub fn f64_convert_i32_s(stack: &mut Stack) -> Result<(), Trap> {
    let value = stack.pop_i32()?;
    stack.push(Value::F64(value as f64));
    Ok(())
}

pub fn f64_convert_i32_u(stack: &mut Stack) -> Result<(), Trap> {
    let value = stack.pop_i32()?;
    stack.push(Value::F64(value as u32 as f64));
    Ok(())
}

pub fn f64_convert_i64_s(stack: &mut Stack) -> Result<(), Trap> {
    let value = stack.pop_i64()?;
    stack.push(Value::F64(value as f64));
    Ok(())
}

pub fn f64_convert_i64_u(stack: &mut Stack) -> Result<(), Trap> {
    let value = stack.pop_i64()?;
    stack.push(Value::F64(value as u64 as f64));
    Ok(())
}

// ============================================================================
// Demotion, promotion, reinterpretation
// ============================================================================

pub fn f32_demote_f64(stack: &mut Stack) -> Result<(), Trap> {
    let value = stack.pop_f64()?;
    stack.push(Value::F32(value as f32));
    Ok(())
}

pub fn f64_promote_f32(stack: &mut Stack) -> Result<(), Trap> {
    let value = stack.pop_f32()?;
    stack.push(Value::F64(value as f64));
    Ok(())
}

pub fn i32_reinterpret_f32(stack: &mut Stack) -> Result<(), Trap> {
    let value = stack.pop_f32()?;
    stack.push(Value::I32(value.to_bits() as i32));
    Ok(())
}

pub fn i64_reinterpret_f64(stack: &mut Stack) -> Result<(), Trap> {
    let value = stack.pop_f64()?;
    stack.push(Value::I64(value.to_bits() as i64));
    Ok(())
}

pub fn f32_reinterpret_i32(stack: &mut Stack) -> Result<(), Trap> {
    let value = stack.pop_i32()?;
    stack.push(Value::F32(f32::from_bits(value as u32)));
    Ok(())
}

pub fn f64_reinterpret_i64(stack: &mut Stack) -> Result<(), Trap> {
    let value = stack.pop_i64()?;
    stack.push(Value::F64(f64::from_bits(value as u64)));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_and_extend() {
        let mut stack = Stack::new();
        stack.push(Value::I64(0x1_0000_0001));
        i32_wrap_i64(&mut stack).unwrap();
        assert_eq!(stack.pop_i32().unwrap(), 1);

        stack.push(Value::I32(-1));
        i64_extend_i32_s(&mut stack).unwrap();
        assert_eq!(stack.pop_i64().unwrap(), -1);

        stack.push(Value::I32(-1));
        i64_extend_i32_u(&mut stack).unwrap();
        assert_eq!(stack.pop_i64().unwrap(), 0xffffffff);
    }

    #[test]
    fn test_trunc_basic() {
        let mut stack = Stack::new();
        stack.push(Value::F32(-3.9));
        i32_trunc_f32_s(&mut stack).unwrap();
        assert_eq!(stack.pop_i32().unwrap(), -3);

        stack.push(Value::F64(4294967295.9));
        i32_trunc_f64_u(&mut stack).unwrap();
        assert_eq!(stack.pop_i32().unwrap(), -1); // u32::MAX as i32

        stack.push(Value::F64(-0.7));
        i32_trunc_f64_u(&mut stack).unwrap();
        assert_eq!(stack.pop_i32().unwrap(), 0);
    }

    #[test]
    fn test_trunc_nan_traps() {
        let mut stack = Stack::new();
        stack.push(Value::F32(f32::NAN));
        assert!(matches!(
            i32_trunc_f32_s(&mut stack),
            Err(Trap::InvalidConversion)
        ));

        stack.push(Value::F64(f64::NAN));
        assert!(matches!(
            i64_trunc_f64_u(&mut stack),
            Err(Trap::InvalidConversion)
        ));
    }

    #[test]
    fn test_trunc_out_of_range_traps() {
        let mut stack = Stack::new();
        stack.push(Value::F32(f32::INFINITY));
        assert!(matches!(
            i32_trunc_f32_s(&mut stack),
            Err(Trap::InvalidConversion)
        ));

        stack.push(Value::F64(2147483648.0));
        assert!(matches!(
            i32_trunc_f64_s(&mut stack),
            Err(Trap::InvalidConversion)
        ));

        stack.push(Value::F64(-2147483649.0));
        assert!(matches!(
            i32_trunc_f64_s(&mut stack),
            Err(Trap::InvalidConversion)
        ));

        stack.push(Value::F64(-1.0));
        assert!(matches!(
            i32_trunc_f64_u(&mut stack),
            Err(Trap::InvalidConversion)
        ));
    }

    #[test]
    fn test_trunc_int_min_valid() {
        let mut stack = Stack::new();
        stack.push(Value::F64(-2147483648.0));
        i32_trunc_f64_s(&mut stack).unwrap();
        assert_eq!(stack.pop_i32().unwrap(), i32::MIN);
    }

    #[test]
    fn test_convert() {
        let mut stack = Stack::new();
        stack.push(Value::I32(-1));
        f64_convert_i32_u(&mut stack).unwrap();
        assert_eq!(stack.pop_f64().unwrap(), 4294967295.0);

        stack.push(Value::I64(-1));
        f32_convert_i64_s(&mut stack).unwrap();
        assert_eq!(stack.pop_f32().unwrap(), -1.0);
    }

    #[test]
    fn test_reinterpret_bit_exact() {
        let mut stack = Stack::new();
        stack.push(Value::F32(1.0));
        i32_reinterpret_f32(&mut stack).unwrap();
        assert_eq!(stack.pop_i32().unwrap(), 0x3f800000);

        stack.push(Value::I64(0x7ff8000000000000u64 as i64));
        f64_reinterpret_i64(&mut stack).unwrap();
        assert!(stack.pop_f64().unwrap().is_nan());

        stack.push(Value::I32(0x3f800000));
        f32_reinterpret_i32(&mut stack).unwrap();
        assert_eq!(stack.pop_f32().unwrap(), 1.0);
    }

    #[test]
    fn test_demote_promote() {
        let mut stack = Stack::new();
        stack.push(Value::F64(1.5));
        f32_demote_f64(&mut stack).unwrap();
        assert_eq!(stack.pop_f32().unwrap(), 1.5);

        stack.push(Value::F32(2.5));
        f64_promote_f32(&mut stack).unwrap();
        assert_eq!(stack.pop_f64().unwrap(), 2.5);
    }
}
