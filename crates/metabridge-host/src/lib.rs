//! Reflective host object framework.
//!
//! Host objects describe their methods, events and properties through a
//! [`MetaObject`], are owned by a [`HostRuntime`] arena and addressed by
//! generational [`ObjectId`](metabridge_core::ObjectId). The runtime offers
//! synchronous invocation by member index, event connections to other
//! objects or to numbered slots of a [`SlotReceiver`], and immediate or
//! deferred destruction.

mod meta;
mod object;
mod runtime;

pub use meta::{
    MetaMethod, MetaObject, MetaObjectBuilder, MetaProperty, MethodKind, normalize_signature,
};
pub use object::{HostObject, MethodCall};
pub use runtime::{ConnectionTarget, HostRuntime, RawArguments, ReceiverId, SlotReceiver};
