//! Embedded stack-based scripting runtime.
//!
//! The runtime offers what a marshalling layer needs from a dynamic
//! language engine:
//!
//! - [`Value`]: nil, booleans, integers, floats, strings, tables,
//!   functions and light userdata
//! - a frame-relative value stack with push/read/protected-call
//! - native closures with upvalues ([`NativeCallable`], [`CallContext`])
//! - a registry of strong references ([`RegistryRef`]) and a globals table
//! - table finalizers and a mark-and-sweep collector
//!
//! Tables and functions live in generational heaps; a handle to a reclaimed
//! value is detected rather than aliased.

mod function;
mod heap;
mod state;
mod table;
mod value;

pub use function::{CallContext, NativeCallable, NativeFn};
pub use state::{CollectStats, RegistryRef, ScriptState};
pub use value::{FunctionRef, TableRef, Value};
