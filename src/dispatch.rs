//! Per-object method tables and overload resolution.
//!
//! A [`MethodTable`] is built once, when an object is exposed. Every
//! admitted member of the object's class is mapped to a script-facing name
//! and compiled into a [`MethodDescriptor`] holding the converters for its
//! parameters and return value. Overloads sharing a name are resolved at
//! call time by argument count alone; the first registered overload with a
//! matching arity wins.

use std::fmt;
use std::rc::Rc;

use bitflags::bitflags;
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use metabridge_core::{BridgeError, NativeValue, ObjectId};
use metabridge_host::{HostRuntime, MetaObject, MethodKind};
use metabridge_script::ScriptState;

use crate::marshal::{TypeMarshaller, ValueConstructor, ValueProducer};

bitflags! {
    /// Set of member kinds admitted into a method table.
    ///
    /// The empty set admits every kind.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MethodKinds: u8 {
        const METHOD = 1 << 0;
        const SIGNAL = 1 << 1;
        const SLOT = 1 << 2;
        const CONSTRUCTOR = 1 << 3;
    }
}

impl MethodKinds {
    pub fn admits(self, kind: MethodKind) -> bool {
        self.is_empty() || self.contains(MethodKinds::from(kind))
    }
}

impl From<MethodKind> for MethodKinds {
    fn from(kind: MethodKind) -> Self {
        match kind {
            MethodKind::Method => MethodKinds::METHOD,
            MethodKind::Signal => MethodKinds::SIGNAL,
            MethodKind::Slot => MethodKinds::SLOT,
            MethodKind::Constructor => MethodKinds::CONSTRUCTOR,
        }
    }
}

// ============================================================================
// Name mapping
// ============================================================================

/// Maps a normalized member signature to its script-facing name.
pub trait SignatureMapper {
    fn map_signature(&self, signature: &str) -> String;
}

impl<F> SignatureMapper for F
where
    F: Fn(&str) -> String,
{
    fn map_signature(&self, signature: &str) -> String {
        (self)(signature)
    }
}

/// Default mapping: the signature up to the opening parenthesis.
#[derive(Debug, Clone, Copy, Default)]
pub struct NameOnly;

impl SignatureMapper for NameOnly {
    fn map_signature(&self, signature: &str) -> String {
        match signature.find('(') {
            Some(end) => signature[..end].to_string(),
            None => signature.to_string(),
        }
    }
}

/// Which members of a class are exposed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MethodFilter {
    /// Script-facing names to expose; empty exposes every name.
    pub names: Vec<String>,
    /// Member kinds to expose; empty exposes every kind.
    pub kinds: MethodKinds,
}

impl MethodFilter {
    pub fn with_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_kinds(mut self, kinds: MethodKinds) -> Self {
        self.kinds = kinds;
        self
    }

    fn admits(&self, name: &str, kind: MethodKind) -> bool {
        self.kinds.admits(kind) && (self.names.is_empty() || self.names.iter().any(|n| n == name))
    }
}

// ============================================================================
// Descriptors
// ============================================================================

/// One invocable member, bound to its converters.
pub struct MethodDescriptor {
    method_index: usize,
    name: String,
    signature: String,
    kind: MethodKind,
    parameters: Vec<ValueConstructor>,
    returns: ValueProducer,
}

impl MethodDescriptor {
    pub fn method_index(&self) -> usize {
        self.method_index
    }

    /// Script-facing name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn kind(&self) -> MethodKind {
        self.kind
    }

    pub fn arity(&self) -> usize {
        self.parameters.len()
    }

    pub fn returns(&self) -> ValueProducer {
        self.returns
    }

    /// Decode arguments from stack positions `1..=arity` and invoke.
    ///
    /// Any conversion or host failure surfaces as
    /// [`BridgeError::InvocationError`].
    pub fn invoke(
        &self,
        host: &HostRuntime,
        object: ObjectId,
        state: &ScriptState,
    ) -> Result<NativeValue, BridgeError> {
        self.try_invoke(host, object, state).map_err(|err| {
            debug!(method = %self.signature, %object, error = %err, "invocation failed");
            BridgeError::InvocationError {
                name: self.name.clone(),
            }
        })
    }

    fn try_invoke(
        &self,
        host: &HostRuntime,
        object: ObjectId,
        state: &ScriptState,
    ) -> Result<NativeValue, BridgeError> {
        let mut args = Vec::with_capacity(self.parameters.len());
        for (position, constructor) in (1..).zip(&self.parameters) {
            args.push(constructor.read(state, position)?);
        }
        Ok(host.invoke(object, self.method_index, &args)?)
    }
}

impl fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .field("kind", &self.kind)
            .field("arity", &self.arity())
            .finish()
    }
}

// ============================================================================
// Method table
// ============================================================================

/// Overload sets of one exposed object, keyed by script-facing name.
#[derive(Debug, Default)]
pub struct MethodTable {
    entries: FxHashMap<String, Vec<Rc<MethodDescriptor>>>,
    count: usize,
}

impl MethodTable {
    /// Compile the admitted members of a class.
    ///
    /// Members with more than `max_arguments` parameters are skipped. An
    /// unknown parameter or return tag fails the whole build.
    pub fn build(
        meta: &MetaObject,
        filter: &MethodFilter,
        mapper: &dyn SignatureMapper,
        max_arguments: usize,
    ) -> Result<Self, BridgeError> {
        let marshaller = TypeMarshaller::global();
        let mut table = MethodTable::default();

        for (method_index, method) in meta.methods().iter().enumerate() {
            let name = mapper.map_signature(method.signature());
            if !filter.admits(&name, method.kind()) {
                continue;
            }
            if method.parameter_count() > max_arguments {
                warn!(
                    class = meta.class_name(),
                    method = method.signature(),
                    max_arguments,
                    "too many parameters, method not exposed"
                );
                continue;
            }

            let parameters = method
                .parameter_types()
                .iter()
                .map(|tag| marshaller.build_incoming(tag))
                .collect::<Result<Vec<_>, _>>()?;
            let returns = marshaller.build_outgoing(method.return_type())?;

            table.count += 1;
            table.entries.entry(name.clone()).or_default().push(Rc::new(MethodDescriptor {
                method_index,
                name,
                signature: method.signature().to_string(),
                kind: method.kind(),
                parameters,
                returns,
            }));
        }

        Ok(table)
    }

    /// Pick the first overload of `name` taking `arg_count` arguments.
    pub fn select(&self, name: &str, arg_count: usize) -> Result<Rc<MethodDescriptor>, BridgeError> {
        self.entries
            .get(name)
            .and_then(|overloads| overloads.iter().find(|d| d.arity() == arg_count))
            .cloned()
            .ok_or_else(|| BridgeError::MethodNotFound {
                name: name.to_string(),
                arg_count,
            })
    }

    /// Script-facing names, in no particular order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Overloads registered under `name`, in registration order.
    pub fn overloads(&self, name: &str) -> &[Rc<MethodDescriptor>] {
        self.entries.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of descriptors across all names.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}
