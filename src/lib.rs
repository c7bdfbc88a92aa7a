//! Marshalling and dispatch core between a reflective host object runtime
//! and an embedded scripting runtime.
//!
//! - [`marshal`]: type tags resolved into per-kind value converters
//! - [`dispatch`]: per-object method tables with arity-based overload selection
//! - [`lifecycle`]: object exposure, wrapper tables and deletion policies
//! - [`callback`]: routing of host events into script functions
//!
//! [`Bridge`] ties the four together and installs the script-side utility
//! namespace.

mod bridge;
pub mod callback;
mod config;
pub mod dispatch;
pub mod lifecycle;
pub mod marshal;

pub use bridge::Bridge;
pub use config::BridgeConfig;

pub use metabridge_core::{BridgeError, HostError, MarshalError, ScriptError};

pub mod prelude {
    pub use crate::callback::CallbackDispatcher;
    pub use crate::dispatch::{MethodDescriptor, MethodFilter, MethodKinds, MethodTable, NameOnly, SignatureMapper};
    pub use crate::lifecycle::{DeleteMode, ExposeOptions, ObjectLifecycleManager};
    pub use crate::marshal::{IDENTITY_FIELD, MarshalKind, TypeMarshaller, ValueConstructor, ValueProducer};
    pub use crate::{Bridge, BridgeConfig};
    pub use metabridge_core::{BridgeError, NativeValue, ObjectId, Variant, VariantList, VariantMap};
    pub use metabridge_host::{HostObject, HostRuntime, MetaObject, MethodCall, MethodKind};
    pub use metabridge_script::{CallContext, FunctionRef, ScriptState, TableRef, Value};
}

pub use lifecycle::{DeleteMode, ExposeOptions};
