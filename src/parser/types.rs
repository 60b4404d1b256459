//! Type model of the binary format.
//!
//! Value types, function signatures, limits, table/memory/global types,
//! and the restricted constant-expression form used to initialise
//! globals, data segments, and element segments.

use std::fmt;

use crate::gas::GasMeter;

use super::reader::Reader;
use super::DecodeError;

/// One of the four MVP scalar types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    I32,
    I64,
    F32,
    F64,
}

impl ValueType {
    pub fn decode(byte: u8) -> Result<Self, DecodeError> {
        match byte {
            0x7f => Ok(ValueType::I32),
            0x7e => Ok(ValueType::I64),
            0x7d => Ok(ValueType::F32),
            0x7c => Ok(ValueType::F64),
            _ => Err(DecodeError::InvalidValueType(byte)),
        }
    }

    /// Width in bytes of this type's little-endian encoding.
    pub fn byte_width(&self) -> u32 {
        match self {
            ValueType::I32 | ValueType::F32 => 4,
            ValueType::I64 | ValueType::F64 => 8,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                ValueType::I32 => "i32",
                ValueType::I64 => "i64",
                ValueType::F32 => "f32",
                ValueType::F64 => "f64",
            }
        )
    }
}

/// A function signature: parameter types and return types in order.
/// The MVP permits at most one return.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FunctionType {
    pub parameters: Vec<ValueType>,
    pub return_types: Vec<ValueType>,
}

impl fmt::Display for FunctionType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "({}) -> {}",
            self.parameters
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<String>>()
                .join(", "),
            if self.return_types.is_empty() {
                "nil".to_string()
            } else {
                self.return_types
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<String>>()
                    .join(", ")
            }
        )
    }
}

fn read_value_types(
    reader: &mut Reader,
    gas: &mut dyn GasMeter,
) -> Result<Vec<ValueType>, DecodeError> {
    let count = reader.read_vu32()?;
    gas.charge(4)?;
    let mut types = Vec::with_capacity(count.min(64) as usize);
    for _ in 0..count {
        types.push(ValueType::decode(reader.read_byte()?)?);
        gas.charge(1)?;
    }
    Ok(types)
}

pub fn read_function_type(
    reader: &mut Reader,
    gas: &mut dyn GasMeter,
) -> Result<FunctionType, DecodeError> {
    let marker = reader.read_byte()?;
    gas.charge(1)?;
    if marker != 0x60 {
        return Err(DecodeError::InvalidFunctionTypeMarker(marker));
    }

    let parameters = read_value_types(reader, gas)?;
    let return_types = read_value_types(reader, gas)?;
    if return_types.len() > 1 {
        return Err(DecodeError::MultiValueResult(return_types.len()));
    }

    Ok(FunctionType {
        parameters,
        return_types,
    })
}

/// Size bounds for tables and memories: `(min, max?)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    pub min: u32,
    pub max: Option<u32>,
}

impl fmt::Display for Limits {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.max {
            Some(max) => write!(f, "min = {}, max = {}", self.min, max),
            None => write!(f, "min = {}", self.min),
        }
    }
}

pub fn read_limits(reader: &mut Reader, gas: &mut dyn GasMeter) -> Result<Limits, DecodeError> {
    let flag = reader.read_byte()?;
    gas.charge(1)?;
    match flag {
        0x00 => {
            let min = reader.read_vu32()?;
            gas.charge(4)?;
            Ok(Limits { min, max: None })
        }
        0x01 => {
            let min = reader.read_vu32()?;
            let max = reader.read_vu32()?;
            gas.charge(8)?;
            Ok(Limits {
                min,
                max: Some(max),
            })
        }
        _ => Err(DecodeError::InvalidLimitsFlag(flag)),
    }
}

/// A table of function references with size limits. The MVP's only
/// element kind is funcref (0x70).
#[derive(Debug, Clone)]
pub struct TableType {
    pub limits: Limits,
}

pub fn read_table_type(
    reader: &mut Reader,
    gas: &mut dyn GasMeter,
) -> Result<TableType, DecodeError> {
    let elem = reader.read_byte()?;
    gas.charge(1)?;
    if elem != 0x70 {
        return Err(DecodeError::InvalidElementType(elem));
    }
    let limits = read_limits(reader, gas)?;
    Ok(TableType { limits })
}

/// Memory types are limits counted in 64 KiB pages.
pub type MemoryType = Limits;

pub fn read_memory_type(
    reader: &mut Reader,
    gas: &mut dyn GasMeter,
) -> Result<MemoryType, DecodeError> {
    read_limits(reader, gas)
}

/// A global's value type plus its mutability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalType {
    pub value_type: ValueType,
    pub mutable: bool,
}

impl fmt::Display for GlobalType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {}",
            if self.mutable { "var" } else { "const" },
            self.value_type
        )
    }
}

pub fn read_global_type(
    reader: &mut Reader,
    gas: &mut dyn GasMeter,
) -> Result<GlobalType, DecodeError> {
    let value_type = ValueType::decode(reader.read_byte()?)?;
    gas.charge(1)?;

    let flag = reader.read_byte()?;
    gas.charge(1)?;
    let mutable = match flag {
        0x00 => false,
        0x01 => true,
        _ => return Err(DecodeError::InvalidMutabilityFlag(flag)),
    };

    Ok(GlobalType {
        value_type,
        mutable,
    })
}

/// A constant expression: one leading opcode, one immediate, then `end`.
/// Evaluated at instantiation time against the already-built globals.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstExpr {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    GlobalGet(u32),
}

impl ConstExpr {
    /// The value type this expression produces, where it is known
    /// without resolving globals.
    pub fn value_type(&self) -> Option<ValueType> {
        match self {
            ConstExpr::I32(_) => Some(ValueType::I32),
            ConstExpr::I64(_) => Some(ValueType::I64),
            ConstExpr::F32(_) => Some(ValueType::F32),
            ConstExpr::F64(_) => Some(ValueType::F64),
            ConstExpr::GlobalGet(_) => None,
        }
    }
}

pub fn read_const_expr(
    reader: &mut Reader,
    gas: &mut dyn GasMeter,
) -> Result<ConstExpr, DecodeError> {
    let opcode = reader.read_byte()?;
    gas.charge(1)?;

    let expr = match opcode {
        0x41 => {
            let v = reader.read_vs32()?;
            gas.charge(4)?;
            ConstExpr::I32(v)
        }
        0x42 => {
            let v = reader.read_vs64()?;
            gas.charge(8)?;
            ConstExpr::I64(v)
        }
        0x43 => {
            let v = reader.read_f32()?;
            gas.charge(4)?;
            ConstExpr::F32(v)
        }
        0x44 => {
            let v = reader.read_f64()?;
            gas.charge(8)?;
            ConstExpr::F64(v)
        }
        0x23 => {
            let idx = reader.read_vu32()?;
            gas.charge(4)?;
            ConstExpr::GlobalGet(idx)
        }
        _ => return Err(DecodeError::InvalidConstOpcode(opcode)),
    };

    let end = reader.read_byte()?;
    gas.charge(1)?;
    if end != 0x0b {
        return Err(DecodeError::UnterminatedConstExpr);
    }
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gas::Unmetered;

    fn reader(bytes: &[u8]) -> Reader {
        Reader::new(bytes.to_vec())
    }

    #[test]
    fn test_value_type_decode() {
        assert_eq!(ValueType::decode(0x7f).unwrap(), ValueType::I32);
        assert_eq!(ValueType::decode(0x7e).unwrap(), ValueType::I64);
        assert_eq!(ValueType::decode(0x7d).unwrap(), ValueType::F32);
        assert_eq!(ValueType::decode(0x7c).unwrap(), ValueType::F64);
        assert!(ValueType::decode(0x7b).is_err()); // v128 is post-MVP
        assert!(ValueType::decode(0x70).is_err());
    }

    #[test]
    fn test_function_type_decode() {
        // (i32, i32) -> i32
        let ft =
            read_function_type(&mut reader(&[0x60, 0x02, 0x7f, 0x7f, 0x01, 0x7f]), &mut Unmetered)
                .unwrap();
        assert_eq!(ft.parameters, vec![ValueType::I32, ValueType::I32]);
        assert_eq!(ft.return_types, vec![ValueType::I32]);
        assert_eq!(ft.to_string(), "(i32, i32) -> i32");

        // () -> nil
        let ft = read_function_type(&mut reader(&[0x60, 0x00, 0x00]), &mut Unmetered).unwrap();
        assert!(ft.parameters.is_empty());
        assert!(ft.return_types.is_empty());
        assert_eq!(ft.to_string(), "() -> nil");
    }

    #[test]
    fn test_function_type_bad_marker() {
        assert!(matches!(
            read_function_type(&mut reader(&[0x5f, 0x00, 0x00]), &mut Unmetered),
            Err(DecodeError::InvalidFunctionTypeMarker(0x5f))
        ));
    }

    #[test]
    fn test_function_type_multi_value() {
        assert!(matches!(
            read_function_type(
                &mut reader(&[0x60, 0x00, 0x02, 0x7f, 0x7f]),
                &mut Unmetered
            ),
            Err(DecodeError::MultiValueResult(2))
        ));
    }

    #[test]
    fn test_limits_decode() {
        let limits = read_limits(&mut reader(&[0x00, 0x01]), &mut Unmetered).unwrap();
        assert_eq!(limits, Limits { min: 1, max: None });

        let limits = read_limits(&mut reader(&[0x01, 0x01, 0x10]), &mut Unmetered).unwrap();
        assert_eq!(
            limits,
            Limits {
                min: 1,
                max: Some(16)
            }
        );

        assert!(matches!(
            read_limits(&mut reader(&[0x02, 0x01]), &mut Unmetered),
            Err(DecodeError::InvalidLimitsFlag(0x02))
        ));
    }

    #[test]
    fn test_table_type_decode() {
        let tt = read_table_type(&mut reader(&[0x70, 0x00, 0x02]), &mut Unmetered).unwrap();
        assert_eq!(tt.limits.min, 2);

        assert!(matches!(
            read_table_type(&mut reader(&[0x6f, 0x00, 0x02]), &mut Unmetered),
            Err(DecodeError::InvalidElementType(0x6f))
        ));
    }

    #[test]
    fn test_global_type_decode() {
        let gt = read_global_type(&mut reader(&[0x7f, 0x00]), &mut Unmetered).unwrap();
        assert_eq!(gt.value_type, ValueType::I32);
        assert!(!gt.mutable);

        let gt = read_global_type(&mut reader(&[0x7e, 0x01]), &mut Unmetered).unwrap();
        assert_eq!(gt.value_type, ValueType::I64);
        assert!(gt.mutable);

        assert!(matches!(
            read_global_type(&mut reader(&[0x7f, 0x02]), &mut Unmetered),
            Err(DecodeError::InvalidMutabilityFlag(0x02))
        ));
    }

    #[test]
    fn test_const_expr_decode() {
        let expr = read_const_expr(&mut reader(&[0x41, 0x10, 0x0b]), &mut Unmetered).unwrap();
        assert_eq!(expr, ConstExpr::I32(16));

        let expr = read_const_expr(&mut reader(&[0x42, 0x7f, 0x0b]), &mut Unmetered).unwrap();
        assert_eq!(expr, ConstExpr::I64(-1));

        let expr = read_const_expr(
            &mut reader(&[0x43, 0x00, 0x00, 0x80, 0x3f, 0x0b]),
            &mut Unmetered,
        )
        .unwrap();
        assert_eq!(expr, ConstExpr::F32(1.0));

        let expr = read_const_expr(&mut reader(&[0x23, 0x02, 0x0b]), &mut Unmetered).unwrap();
        assert_eq!(expr, ConstExpr::GlobalGet(2));
    }

    #[test]
    fn test_const_expr_rejects_other_opcodes() {
        // i32.add is not a constant opcode
        assert!(matches!(
            read_const_expr(&mut reader(&[0x6a, 0x0b]), &mut Unmetered),
            Err(DecodeError::InvalidConstOpcode(0x6a))
        ));
    }

    #[test]
    fn test_const_expr_requires_end() {
        assert!(matches!(
            read_const_expr(&mut reader(&[0x41, 0x10, 0x41]), &mut Unmetered),
            Err(DecodeError::UnterminatedConstExpr)
        ));
    }
}
