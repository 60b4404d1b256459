//! Gas metering for decoding and execution.
//!
//! Gas is an abstract unit consumed per increment of work. The decoder
//! charges per field read, the interpreter charges once per instruction,
//! and bulk reads (custom sections, code bodies, data initialisers)
//! charge proportionally to their size. Exhausting the meter fails the
//! charge, which callers surface as an out-of-gas trap.

use thiserror::Error;

/// The gas meter ran out of budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("out of gas")]
pub struct OutOfGas;

/// Tracks gas consumption across decoding and execution.
pub trait GasMeter {
    /// Consume `n` units of gas. Fails once the balance reaches zero or
    /// below; a failed charge still depletes the meter.
    fn charge(&mut self, n: u64) -> Result<(), OutOfGas>;

    /// Whether the meter has been exhausted.
    fn exceeded(&self) -> bool;
}

/// A metered implementation with a fixed budget.
#[derive(Debug)]
pub struct Gas {
    remaining: i64,
}

impl Gas {
    /// Create a gas meter with the specified budget.
    pub fn new(limit: i64) -> Gas {
        Gas { remaining: limit }
    }

    /// The remaining balance. Negative once exhausted.
    pub fn remaining(&self) -> i64 {
        self.remaining
    }
}

impl GasMeter for Gas {
    fn charge(&mut self, n: u64) -> Result<(), OutOfGas> {
        self.remaining = self.remaining.saturating_sub_unsigned(n);
        if self.remaining <= 0 {
            return Err(OutOfGas);
        }
        Ok(())
    }

    fn exceeded(&self) -> bool {
        self.remaining <= 0
    }
}

/// Accepts all charges without ever failing.
#[derive(Debug, Default)]
pub struct Unmetered;

impl GasMeter for Unmetered {
    fn charge(&mut self, _n: u64) -> Result<(), OutOfGas> {
        Ok(())
    }

    fn exceeded(&self) -> bool {
        false
    }
}
