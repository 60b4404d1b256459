//! Variable instructions: local and global access.
//!
//! Globals live in shared cells so an importer and its exporter observe
//! each other's writes. `global.set` on an immutable cell traps.

use std::cell::RefCell;
use std::rc::Rc;

use super::{Stack, Trap};
use crate::runtime::frame::Frame;
use crate::runtime::instance::GlobalInst;

pub fn local_get(stack: &mut Stack, frame: &Frame, index: u32) -> Result<(), Trap> {
    stack.push(frame.local(index)?);
    Ok(())
}

pub fn local_set(stack: &mut Stack, frame: &mut Frame, index: u32) -> Result<(), Trap> {
    let value = stack.pop()?;
    frame.set_local(index, value)
}

/// local.tee: like local.set but leaves the value on the stack.
pub fn local_tee(stack: &mut Stack, frame: &mut Frame, index: u32) -> Result<(), Trap> {
    let value = *stack.peek().ok_or(Trap::StackUnderflow)?;
    frame.set_local(index, value)
}

pub fn global_get(
    stack: &mut Stack,
    globals: &[Rc<RefCell<GlobalInst>>],
    index: u32,
) -> Result<(), Trap> {
    let cell = globals
        .get(index as usize)
        .ok_or(Trap::GlobalIndexOutOfBounds(index))?;
    stack.push(cell.borrow().value);
    Ok(())
}

pub fn global_set(
    stack: &mut Stack,
    globals: &[Rc<RefCell<GlobalInst>>],
    index: u32,
) -> Result<(), Trap> {
    let value = stack.pop()?;
    let cell = globals
        .get(index as usize)
        .ok_or(Trap::GlobalIndexOutOfBounds(index))?;
    let mut global = cell.borrow_mut();
    if !global.mutable {
        return Err(Trap::ImmutableGlobal(index));
    }
    global.value = value;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Value;

    fn globals(cells: Vec<GlobalInst>) -> Vec<Rc<RefCell<GlobalInst>>> {
        cells
            .into_iter()
            .map(|g| Rc::new(RefCell::new(g)))
            .collect()
    }

    #[test]
    fn test_locals() {
        let mut stack = Stack::new();
        let mut frame = Frame::new(
            0,
            vec![Value::I32(1), Value::I32(2)],
            Rc::from(&[][..]),
            0,
            0,
        );

        local_get(&mut stack, &frame, 0).unwrap();
        assert_eq!(stack.pop_i32().unwrap(), 1);

        stack.push(Value::I32(9));
        local_set(&mut stack, &mut frame, 1).unwrap();
        assert!(stack.is_empty());
        assert_eq!(frame.local(1).unwrap(), Value::I32(9));

        stack.push(Value::I32(7));
        local_tee(&mut stack, &mut frame, 0).unwrap();
        assert_eq!(stack.pop_i32().unwrap(), 7);
        assert_eq!(frame.local(0).unwrap(), Value::I32(7));
    }

    #[test]
    fn test_global_get_set() {
        let mut stack = Stack::new();
        let globals = globals(vec![GlobalInst {
            value: Value::I64(5),
            mutable: true,
        }]);

        global_get(&mut stack, &globals, 0).unwrap();
        assert_eq!(stack.pop_i64().unwrap(), 5);

        stack.push(Value::I64(6));
        global_set(&mut stack, &globals, 0).unwrap();
        assert_eq!(globals[0].borrow().value, Value::I64(6));

        assert!(matches!(
            global_get(&mut stack, &globals, 1),
            Err(Trap::GlobalIndexOutOfBounds(1))
        ));
    }

    #[test]
    fn test_immutable_global_set_traps() {
        let mut stack = Stack::new();
        let globals = globals(vec![GlobalInst {
            value: Value::I32(1),
            mutable: false,
        }]);

        stack.push(Value::I32(2));
        assert!(matches!(
            global_set(&mut stack, &globals, 0),
            Err(Trap::ImmutableGlobal(0))
        ));
        assert_eq!(globals[0].borrow().value, Value::I32(1));
    }
}
