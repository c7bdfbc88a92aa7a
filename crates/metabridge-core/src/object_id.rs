//! Generational identity of host objects.

use std::fmt;

/// Identity of a host object.
///
/// Ids are generational: once an object is destroyed its slot may be reused,
/// but the new occupant gets a bumped generation, so a stale id never
/// resolves to the wrong object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId {
    /// Slot index in the host arena
    pub index: u32,
    /// Generation of the slot when the id was issued
    pub generation: u32,
}

impl ObjectId {
    /// Create an id from its parts.
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Pack the id into a non-zero 64-bit word.
    ///
    /// Zero is reserved for "no object", so the packed form can travel
    /// through opaque pointer-sized values.
    pub const fn to_bits(self) -> u64 {
        ((self.generation as u64) << 32 | self.index as u64).wrapping_add(1)
    }

    /// Unpack an id produced by [`ObjectId::to_bits`].
    ///
    /// Returns `None` for zero.
    pub const fn from_bits(bits: u64) -> Option<Self> {
        if bits == 0 {
            return None;
        }
        let raw = bits - 1;
        Some(Self {
            index: raw as u32,
            generation: (raw >> 32) as u32,
        })
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}
