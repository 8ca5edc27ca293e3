// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Handle identifiers.
//!
//! The numeric value belongs to whoever created the socket or timer; the
//! registry only indexes by it. Numeric values get reused after close, so
//! each one is paired with a generation that the owner bumps on reuse
//! (see `Registry::claim`). A record remembers the generation it was
//! registered under and stops matching once the handle moves on.

use std::fmt;

/// Numeric handle value as handed out by the OS.
pub type RawHandle = i32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Handle {
    pub raw: RawHandle,
    pub generation: u32,
}

impl Handle {
    pub fn new(raw: RawHandle, generation: u32) -> Self {
        Self { raw, generation }
    }

    /// Same numeric value, next occupant.
    pub fn next_generation(self) -> Self {
        Self {
            raw: self.raw,
            generation: self.generation.wrapping_add(1),
        }
    }
}

impl From<RawHandle> for Handle {
    fn from(raw: RawHandle) -> Self {
        Self { raw, generation: 0 }
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.generation == 0 {
            write!(f, "{}", self.raw)
        } else {
            write!(f, "{}#{}", self.raw, self.generation)
        }
    }
}
