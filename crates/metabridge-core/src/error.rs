//! Unified error types for the bridge.
//!
//! Each layer of the system has its own error type so callers can handle
//! faults at the granularity they care about, while [`BridgeError`] is the
//! single type surfaced by the marshalling and dispatch core.
//!
//! ## Error Hierarchy
//!
//! ```text
//! BridgeError (top-level wrapper)
//! ├── UnknownType / MethodNotFound / InvocationError / MissingTarget / ...
//! ├── CallbackFailure(ScriptError)  - swallowed at the event boundary
//! ├── MarshalError                  - single value conversion faults
//! ├── HostError                     - host object framework faults
//! │   └── MarshalError
//! └── ScriptError                   - scripting runtime faults
//!     └── Bridge(Box<BridgeError>)  - native failures raised inside a script call
//! ```

use thiserror::Error;

use crate::ObjectId;

// ============================================================================
// Marshal Errors
// ============================================================================

/// Errors raised by a single value conversion.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MarshalError {
    /// The value has a different dynamic type than the converter expects.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    /// A raw event argument did not hold the native type its tag promised.
    #[error("raw argument does not hold a {expected} value")]
    RawTypeMismatch { expected: &'static str },

    /// An integer does not fit the target native type.
    #[error("integer {value} out of range for {target}")]
    IntegerOverflow { value: i64, target: &'static str },
}

// ============================================================================
// Host Errors
// ============================================================================

/// Errors raised by the host object framework.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HostError {
    /// The object was destroyed or never existed.
    #[error("object {0} is not alive")]
    StaleObject(ObjectId),

    /// A method index is outside the object's method table.
    #[error("method index {index} out of range ({count} methods)")]
    MethodIndexOutOfRange { index: usize, count: usize },

    /// A connection source index does not name an event.
    #[error("method {index} is not an event")]
    NotAnEvent { index: usize },

    /// A method was invoked with the wrong number of arguments.
    #[error("'{signature}' expects {expected} arguments, got {actual}")]
    ArgumentCount {
        signature: String,
        expected: usize,
        actual: usize,
    },

    /// An argument could not be extracted.
    #[error("argument {index}: {source}")]
    Argument {
        index: usize,
        #[source]
        source: MarshalError,
    },

    /// The callee reported a failure.
    #[error("invocation failed: {0}")]
    InvocationFailed(String),
}

impl HostError {
    /// Returns true if the error refers to a dead object.
    pub fn is_stale(&self) -> bool {
        matches!(self, HostError::StaleObject(_))
    }
}

// ============================================================================
// Script Errors
// ============================================================================

/// Errors raised by the scripting runtime.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScriptError {
    /// A script-level error with a message.
    #[error("{0}")]
    Runtime(String),

    /// A value had the wrong dynamic type for an operation.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    /// Attempted to call a value that is not a function.
    #[error("attempt to call a {0} value")]
    NotCallable(&'static str),

    /// Not enough values on the stack.
    #[error("stack underflow: needed {needed}, have {available}")]
    StackUnderflow { needed: usize, available: usize },

    /// A stack position does not refer to a live slot.
    #[error("invalid stack index {0}")]
    InvalidStackIndex(i32),

    /// A table or function handle outlived its value.
    #[error("stale {0} handle")]
    StaleHandle(&'static str),

    /// A registry reference was never issued or already released.
    #[error("invalid registry reference {0}")]
    InvalidReference(i32),

    /// Table keys cannot be nil or NaN.
    #[error("invalid table key: {0}")]
    InvalidKey(&'static str),

    /// A native function failed inside a script call.
    #[error(transparent)]
    Bridge(Box<BridgeError>),
}

impl ScriptError {
    /// Create a runtime error from any message.
    pub fn runtime(message: impl Into<String>) -> Self {
        ScriptError::Runtime(message.into())
    }

    /// Returns the bridge error carried by this script error, if any.
    pub fn as_bridge(&self) -> Option<&BridgeError> {
        match self {
            ScriptError::Bridge(inner) => Some(inner),
            _ => None,
        }
    }
}

impl From<BridgeError> for ScriptError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Script(inner) => inner,
            other => ScriptError::Bridge(Box::new(other)),
        }
    }
}

// ============================================================================
// Bridge Errors
// ============================================================================

/// Errors raised by the marshalling and dispatch core.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BridgeError {
    /// A type tag is not part of the marshalling vocabulary.
    #[error("unknown type tag '{tag}'")]
    UnknownType { tag: String },

    /// No overload of the method accepts the supplied argument count.
    #[error("method '{name}' not found for {arg_count} arguments")]
    MethodNotFound { name: String, arg_count: usize },

    /// The native call failed.
    #[error("invocation of '{name}' failed")]
    InvocationError { name: String },

    /// Malformed connect/disconnect arguments.
    #[error("missing target: {reason}")]
    MissingTarget { reason: String },

    /// The source object has no event with this signature.
    #[error("event '{signature}' not found")]
    EventNotFound { signature: String },

    /// The target object has no method with this signature.
    #[error("target method '{signature}' not found")]
    TargetMethodNotFound { signature: String },

    /// A script callback failed while handling an event.
    #[error("callback failed: {0}")]
    CallbackFailure(#[source] ScriptError),

    /// A value conversion failed.
    #[error(transparent)]
    Marshal(#[from] MarshalError),

    /// Host framework failure.
    #[error(transparent)]
    Host(#[from] HostError),

    /// Scripting runtime failure.
    #[error(transparent)]
    Script(#[from] ScriptError),
}

impl BridgeError {
    /// Shorthand for [`BridgeError::MissingTarget`].
    pub fn missing_target(reason: impl Into<String>) -> Self {
        BridgeError::MissingTarget {
            reason: reason.into(),
        }
    }

    /// Returns true if this is an unknown type error.
    pub fn is_unknown_type(&self) -> bool {
        matches!(self, BridgeError::UnknownType { .. })
    }

    /// Returns true if this is a method lookup failure.
    pub fn is_method_not_found(&self) -> bool {
        matches!(self, BridgeError::MethodNotFound { .. })
    }

    /// Returns true if this is an invocation failure.
    pub fn is_invocation_error(&self) -> bool {
        matches!(self, BridgeError::InvocationError { .. })
    }

    /// Returns true if connect/disconnect arguments were malformed.
    pub fn is_missing_target(&self) -> bool {
        matches!(self, BridgeError::MissingTarget { .. })
    }
}
