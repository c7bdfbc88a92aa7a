//! Conversion traits between Rust types and [`NativeValue`].
//!
//! - [`FromNative`]: extract a Rust value from a [`NativeValue`]
//! - [`IntoNative`]: wrap a Rust value into a [`NativeValue`]
//!
//! Host method implementations use these through the typed argument
//! accessors of their call context:
//!
//! ```ignore
//! let a: i32 = call.arg(0)?;
//! let tags: Vec<String> = call.arg(1)?;
//! call.set_return(a * 2);
//! ```

use crate::error::MarshalError;
use crate::{NativeValue, ObjectId, VariantList, VariantMap};

/// Extract a value from a [`NativeValue`].
pub trait FromNative: Sized {
    /// Returns a `MarshalError` if the value holds an incompatible type.
    fn from_native(value: &NativeValue) -> Result<Self, MarshalError>;
}

/// Convert a value into a [`NativeValue`].
pub trait IntoNative {
    fn into_native(self) -> NativeValue;
}

macro_rules! impl_native {
    ($($ty:ty => $variant:ident, $name:literal);* $(;)?) => {
        $(
            impl FromNative for $ty {
                fn from_native(value: &NativeValue) -> Result<Self, MarshalError> {
                    match value {
                        NativeValue::$variant(v) => Ok(v.clone()),
                        other => Err(MarshalError::TypeMismatch {
                            expected: $name,
                            actual: other.type_name(),
                        }),
                    }
                }
            }

            impl IntoNative for $ty {
                fn into_native(self) -> NativeValue {
                    NativeValue::$variant(self)
                }
            }
        )*
    };
}

impl_native! {
    i32 => Int, "int";
    f32 => Float, "float";
    f64 => Double, "double";
    String => Text, "string";
    VariantMap => Map, "map";
    VariantList => List, "list";
    Option<ObjectId> => Object, "object";
    Vec<f64> => DoubleSeq, "double sequence";
    Vec<f32> => FloatSeq, "float sequence";
    Vec<i32> => IntSeq, "int sequence";
    Vec<i16> => ShortSeq, "short sequence";
    Vec<String> => StringList, "string list";
}

impl IntoNative for ObjectId {
    fn into_native(self) -> NativeValue {
        NativeValue::Object(Some(self))
    }
}

impl IntoNative for &str {
    fn into_native(self) -> NativeValue {
        NativeValue::Text(self.to_string())
    }
}

impl IntoNative for () {
    fn into_native(self) -> NativeValue {
        NativeValue::Void
    }
}

impl IntoNative for NativeValue {
    fn into_native(self) -> NativeValue {
        self
    }
}
