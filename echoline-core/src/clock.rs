//! World Clock — the monotonic turn counter.
//!
//! Every other component reads elapsed time from here; nothing else
//! depends on the clock. The counter never moves backward.

use serde::{Deserialize, Serialize};

use crate::error::{EchoError, Result};

/// Monotonic turn counter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorldClock {
    turn: u64,
}

impl WorldClock {
    /// Create a clock at turn zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a clock already at `turn` (snapshot restore).
    #[must_use]
    pub fn at(turn: u64) -> Self {
        Self { turn }
    }

    /// Current turn. Pure read.
    #[must_use]
    pub fn now(&self) -> u64 {
        self.turn
    }

    /// Strictly increase the counter by `n` turns and return the new value.
    ///
    /// # Errors
    ///
    /// Returns [`EchoError::InvalidArgument`] when `n` is zero. Negative
    /// input is unrepresentable by construction.
    pub fn advance(&mut self, n: u64) -> Result<u64> {
        if n == 0 {
            return Err(EchoError::InvalidArgument(
                "clock advance must be a positive number of turns".to_string(),
            ));
        }
        self.turn += n;
        Ok(self.turn)
    }
}
