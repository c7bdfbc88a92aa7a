//! Native closures and their call context.

use std::fmt;
use std::rc::Rc;

use metabridge_core::ScriptError;

use crate::{FunctionRef, ScriptState, Value};

/// Trait for callable native functions.
///
/// The function reads its arguments through the [`CallContext`], pushes
/// its results onto the stack and returns how many it pushed.
pub trait NativeCallable {
    fn call(&self, ctx: &mut CallContext<'_>) -> Result<usize, ScriptError>;
}

impl<F> NativeCallable for F
where
    F: Fn(&mut CallContext<'_>) -> Result<usize, ScriptError>,
{
    fn call(&self, ctx: &mut CallContext<'_>) -> Result<usize, ScriptError> {
        (self)(ctx)
    }
}

/// Type-erased native function.
#[derive(Clone)]
pub struct NativeFn {
    inner: Rc<dyn NativeCallable>,
}

impl NativeFn {
    pub fn new<F>(f: F) -> Self
    where
        F: NativeCallable + 'static,
    {
        Self { inner: Rc::new(f) }
    }

    pub fn call(&self, ctx: &mut CallContext<'_>) -> Result<usize, ScriptError> {
        self.inner.call(ctx)
    }
}

impl fmt::Debug for NativeFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFn").finish_non_exhaustive()
    }
}

/// A function value: native code plus captured upvalues.
#[derive(Debug, Clone)]
pub(crate) struct Closure {
    pub(crate) func: NativeFn,
    pub(crate) upvalues: Vec<Value>,
}

/// Context of one native function call.
///
/// Arguments occupy stack positions `1..=arg_count()` of the current frame.
pub struct CallContext<'s> {
    state: &'s ScriptState,
    function: FunctionRef,
    arg_count: usize,
}

impl<'s> CallContext<'s> {
    pub(crate) fn new(state: &'s ScriptState, function: FunctionRef, arg_count: usize) -> Self {
        Self {
            state,
            function,
            arg_count,
        }
    }

    /// The state this call runs in.
    pub fn state(&self) -> &'s ScriptState {
        self.state
    }

    /// The function being called.
    pub fn function(&self) -> FunctionRef {
        self.function
    }

    /// Number of arguments passed.
    pub fn arg_count(&self) -> usize {
        self.arg_count
    }

    /// Get an argument by 0-based index; missing arguments read as nil.
    pub fn arg(&self, index: usize) -> Value {
        if index >= self.arg_count {
            return Value::Nil;
        }
        self.state.get(index as i32 + 1).unwrap_or_default()
    }

    /// Get a captured upvalue; missing upvalues read as nil.
    pub fn upvalue(&self, index: usize) -> Value {
        self.state.upvalue(self.function, index)
    }

    /// Push one result.
    pub fn push(&self, value: impl Into<Value>) {
        self.state.push(value.into());
    }
}
