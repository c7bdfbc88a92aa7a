//! Shared vocabulary of the metabridge workspace.
//!
//! This crate holds the types every layer agrees on:
//!
//! - [`ObjectId`]: generational identity of a host object
//! - [`Variant`]: the host's dynamic value (properties, structured data)
//! - [`NativeValue`]: one decoded value per marshallable native type
//! - [`TypeHash`]: deterministic hashes of type tags and signatures
//! - the error hierarchy topped by [`BridgeError`]

pub mod convert;
pub mod error;
mod native_value;
mod object_id;
mod type_hash;
mod variant;

pub use convert::{FromNative, IntoNative};
pub use error::{BridgeError, HostError, MarshalError, ScriptError};
pub use native_value::NativeValue;
pub use object_id::ObjectId;
pub use type_hash::{TypeHash, hash_constants};
pub use variant::{Variant, VariantList, VariantMap};
