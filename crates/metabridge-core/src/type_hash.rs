//! Deterministic hash-based identity for type tags and member signatures.
//!
//! [`TypeHash`] is a 64-bit XXHash64 digest mixed with a domain constant, so
//! a type tag and a method signature with the same spelling never collide.
//!
//! # Examples
//!
//! ```
//! use metabridge_core::TypeHash;
//!
//! let int_hash = TypeHash::from_tag("int");
//! assert_eq!(int_hash, TypeHash::from_tag("int"));
//! assert_ne!(int_hash, TypeHash::from_signature("int"));
//! ```

use std::fmt;
use xxhash_rust::xxh64::xxh64;

/// Domain-specific mixing constants for hash computation.
pub mod hash_constants {
    /// Domain marker for type tag hashes
    pub const TYPE: u64 = 0x2fac10b63a6cc57c;

    /// Domain marker for member signature hashes
    pub const SIGNATURE: u64 = 0x7d3c8b4a92e15f6d;
}

/// A 64-bit hash identifying a type tag or a member signature.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeHash(pub u64);

impl TypeHash {
    /// The empty hash.
    pub const EMPTY: TypeHash = TypeHash(0);

    /// Hash a type tag.
    pub fn from_tag(tag: &str) -> Self {
        TypeHash(hash_constants::TYPE ^ xxh64(tag.as_bytes(), 0))
    }

    /// Hash a normalized member signature.
    pub fn from_signature(signature: &str) -> Self {
        TypeHash(hash_constants::SIGNATURE ^ xxh64(signature.as_bytes(), 0))
    }

    /// Returns true for [`TypeHash::EMPTY`].
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for TypeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeHash({:#018x})", self.0)
    }
}

impl fmt::Display for TypeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}
