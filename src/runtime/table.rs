//! Function-reference tables.
//!
//! A table is a vector of optional function indices into the owning
//! instance's function index space. Element segments fill it during
//! instantiation; `call_indirect` reads it at every dispatch.

use super::Trap;
use crate::parser::types::Limits;

/// A funcref table with size limits.
#[derive(Debug)]
pub struct Table {
    elements: Vec<Option<u32>>,
    max: Option<u32>,
}

impl Table {
    /// Create a table with `limits.min` empty slots.
    pub fn new(limits: &Limits) -> Table {
        Table {
            elements: vec![None; limits.min as usize],
            max: limits.max,
        }
    }

    pub fn size(&self) -> u32 {
        self.elements.len() as u32
    }

    pub fn max(&self) -> Option<u32> {
        self.max
    }

    /// The function index stored at `index`, or None for an empty slot.
    pub fn get(&self, index: u32) -> Result<Option<u32>, Trap> {
        self.elements
            .get(index as usize)
            .copied()
            .ok_or(Trap::TableOutOfBounds(index))
    }

    /// Store a function index at `index`.
    pub fn set(&mut self, index: u32, func_index: u32) -> Result<(), Trap> {
        match self.elements.get_mut(index as usize) {
            Some(slot) => {
                *slot = Some(func_index);
                Ok(())
            }
            None => Err(Trap::TableOutOfBounds(index)),
        }
    }
}
