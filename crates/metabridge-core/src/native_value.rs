//! Typed native values exchanged with host methods.

use std::any::Any;

use crate::{ObjectId, VariantList, VariantMap};

/// One decoded native value.
///
/// There is one variant per native representation the marshaller can
/// produce. List and vector sequences share a representation; the
/// distinction lives in the type tag only.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum NativeValue {
    /// No value (void return)
    #[default]
    Void,
    Int(i32),
    Float(f32),
    Double(f64),
    Text(String),
    Map(VariantMap),
    List(VariantList),
    /// Object identity, `None` for a null object
    Object(Option<ObjectId>),
    /// Opaque pointer-sized value
    Pointer(u64),
    DoubleSeq(Vec<f64>),
    FloatSeq(Vec<f32>),
    IntSeq(Vec<i32>),
    ShortSeq(Vec<i16>),
    StringList(Vec<String>),
}

impl NativeValue {
    /// Get a human-readable type name for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            NativeValue::Void => "void",
            NativeValue::Int(_) => "int",
            NativeValue::Float(_) => "float",
            NativeValue::Double(_) => "double",
            NativeValue::Text(_) => "string",
            NativeValue::Map(_) => "map",
            NativeValue::List(_) => "list",
            NativeValue::Object(_) => "object",
            NativeValue::Pointer(_) => "pointer",
            NativeValue::DoubleSeq(_) => "double sequence",
            NativeValue::FloatSeq(_) => "float sequence",
            NativeValue::IntSeq(_) => "int sequence",
            NativeValue::ShortSeq(_) => "short sequence",
            NativeValue::StringList(_) => "string list",
        }
    }

    /// Check if this is void.
    pub fn is_void(&self) -> bool {
        matches!(self, NativeValue::Void)
    }

    /// Borrow the payload as an untyped reference.
    ///
    /// This is the form event arguments travel in: the emitter hands out one
    /// `&dyn Any` per parameter and the receiver downcasts according to the
    /// parameter's type tag. `Void` yields `&()`.
    pub fn as_any(&self) -> &dyn Any {
        match self {
            NativeValue::Void => &(),
            NativeValue::Int(v) => v,
            NativeValue::Float(v) => v,
            NativeValue::Double(v) => v,
            NativeValue::Text(v) => v,
            NativeValue::Map(v) => v,
            NativeValue::List(v) => v,
            NativeValue::Object(v) => v,
            NativeValue::Pointer(v) => v,
            NativeValue::DoubleSeq(v) => v,
            NativeValue::FloatSeq(v) => v,
            NativeValue::IntSeq(v) => v,
            NativeValue::ShortSeq(v) => v,
            NativeValue::StringList(v) => v,
        }
    }
}
