//! Output scheduling priority.
//!
//! Eight levels, `0` (least urgent) to `7` (most urgent). Stream writes carry
//! their urgency as a priority; the control queue always runs at [`Priority::MAX`].

use std::fmt;

/// Scheduling priority (0..=7, higher drains first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(u8);

impl Priority {
    /// Lowest priority.
    pub const MIN: Self = Self(0);

    /// Default urgency for stream writes.
    pub const DEFAULT: Self = Self(3);

    /// Highest priority, used by the control queue.
    pub const MAX: Self = Self(7);

    /// Create a priority, returning `None` above 7.
    pub fn new(level: u8) -> Option<Self> {
        (level <= Self::MAX.0).then_some(Self(level))
    }

    /// Create a priority from the low three bits of `bits`.
    pub fn from_bits(bits: u8) -> Self {
        Self(bits & 0x07)
    }

    /// Raw level.
    pub fn level(self) -> u8 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}
