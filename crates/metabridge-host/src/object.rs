//! Host object trait and method call context.

use metabridge_core::{FromNative, HostError, IntoNative, NativeValue, ObjectId, Variant};

use crate::{HostRuntime, MetaObject};

/// A reflective host object.
///
/// Objects describe themselves through [`MetaObject`] and implement
/// invocation by member index. Methods take `&self`: an invocation can
/// re-enter the runtime (emit events, call other objects, even call back
/// into this object), so mutable state lives behind `Cell`/`RefCell`.
pub trait HostObject {
    /// Introspection data of this object's class.
    fn meta_object(&self) -> &MetaObject;

    /// Invoke the method `call.method_index()` synchronously.
    ///
    /// Argument count has already been checked against the signature.
    fn invoke(&self, call: &mut MethodCall<'_>) -> Result<(), HostError>;

    /// Read the property at `index` in [`MetaObject::properties`] order.
    fn read_property(&self, index: usize) -> Variant {
        let _ = index;
        Variant::Invalid
    }
}

/// Context for one host method invocation.
///
/// ## Typed Argument Access
///
/// ```ignore
/// let a: i32 = call.arg(0)?;
/// let b: i32 = call.arg(1)?;
/// call.set_return(a + b);
/// ```
pub struct MethodCall<'a> {
    runtime: &'a HostRuntime,
    this: ObjectId,
    method_index: usize,
    args: &'a [NativeValue],
    return_value: NativeValue,
}

impl<'a> MethodCall<'a> {
    pub(crate) fn new(
        runtime: &'a HostRuntime,
        this: ObjectId,
        method_index: usize,
        args: &'a [NativeValue],
    ) -> Self {
        Self {
            runtime,
            this,
            method_index,
            args,
            return_value: NativeValue::Void,
        }
    }

    /// The runtime owning the called object.
    pub fn runtime(&self) -> &HostRuntime {
        self.runtime
    }

    /// Id of the called object.
    pub fn this_id(&self) -> ObjectId {
        self.this
    }

    /// Index of the invoked member.
    pub fn method_index(&self) -> usize {
        self.method_index
    }

    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    /// Get a raw argument value.
    pub fn arg_value(&self, index: usize) -> Result<&NativeValue, HostError> {
        self.args
            .get(index)
            .ok_or_else(|| HostError::InvocationFailed(format!("missing argument {index}")))
    }

    /// Get a typed argument.
    pub fn arg<T: FromNative>(&self, index: usize) -> Result<T, HostError> {
        T::from_native(self.arg_value(index)?)
            .map_err(|source| HostError::Argument { index, source })
    }

    /// Set the return value.
    pub fn set_return<T: IntoNative>(&mut self, value: T) {
        self.return_value = value.into_native();
    }

    /// Emit one of this object's events.
    pub fn emit(&self, signal_index: usize, args: &[NativeValue]) -> Result<usize, HostError> {
        self.runtime.emit(self.this, signal_index, args)
    }

    pub(crate) fn into_return(self) -> NativeValue {
        self.return_value
    }
}
