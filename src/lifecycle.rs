//! Object exposure and wrapper lifetime.
//!
//! Exposing a host object builds a script-side wrapper table holding:
//!
//! - one function per exposed method name, dispatching by arity through the
//!   object's [`MethodTable`]
//! - one data field per property, snapshotted at exposure time
//! - the hidden [`IDENTITY_FIELD`] carrying the object id as light userdata
//!
//! Under a reclaiming [`DeleteMode`] the wrapper gets a finalizer: when the
//! collector reclaims it the binding is removed and the object is destroyed
//! or queued for deferred destruction.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use num_enum::{IntoPrimitive, TryFromPrimitive};
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use metabridge_core::{BridgeError, NativeValue, ObjectId, ScriptError, Variant};
use metabridge_host::HostRuntime;
use metabridge_script::{CallContext, FunctionRef, RegistryRef, ScriptState, TableRef, Value};

use crate::config::BridgeConfig;
use crate::dispatch::{MethodFilter, MethodKinds, MethodTable, NameOnly, SignatureMapper};
use crate::marshal::{IDENTITY_FIELD, ValueProducer, object_identity, variant_to_value};

/// What happens to a host object when its wrapper is collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum DeleteMode {
    /// The object outlives its wrapper.
    #[default]
    NoDelete = 0,
    /// The object is destroyed during finalization.
    Immediate = 1,
    /// The object is queued for deferred destruction.
    Later = 2,
}

impl DeleteMode {
    pub fn reclaims(self) -> bool {
        self != DeleteMode::NoDelete
    }
}

/// Options for a single exposure.
#[derive(Clone, Default)]
pub struct ExposeOptions {
    /// Global name to publish the wrapper under.
    pub name: Option<String>,
    /// Keep the wrapper alive and return it from later exposures.
    pub cache: bool,
    pub delete_mode: DeleteMode,
    pub filter: MethodFilter,
    /// Signature to name mapping; [`NameOnly`] when unset.
    pub mapper: Option<Rc<dyn SignatureMapper>>,
}

impl ExposeOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self::default().with_name(name)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_delete_mode(mut self, mode: DeleteMode) -> Self {
        self.delete_mode = mode;
        self
    }

    pub fn with_method_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filter = self.filter.with_names(names);
        self
    }

    pub fn with_method_kinds(mut self, kinds: MethodKinds) -> Self {
        self.filter = self.filter.with_kinds(kinds);
        self
    }

    pub fn with_mapper(mut self, mapper: impl SignatureMapper + 'static) -> Self {
        self.mapper = Some(Rc::new(mapper));
        self
    }
}

impl fmt::Debug for ExposeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExposeOptions")
            .field("name", &self.name)
            .field("cache", &self.cache)
            .field("delete_mode", &self.delete_mode)
            .field("filter", &self.filter)
            .field("custom_mapper", &self.mapper.is_some())
            .finish()
    }
}

/// Bookkeeping for one exposed object.
#[derive(Debug)]
struct ObjectBinding {
    methods: Rc<MethodTable>,
    properties: Vec<(String, Variant)>,
    cached: Option<RegistryRef>,
    delete_mode: DeleteMode,
}

// ============================================================================
// Manager
// ============================================================================

/// Exposes host objects to a script state and tracks their bindings.
pub struct ObjectLifecycleManager {
    script: ScriptState,
    host: HostRuntime,
    max_arguments: usize,
    cache_returned: bool,
    own_returned: Cell<bool>,
    bindings: RefCell<FxHashMap<ObjectId, ObjectBinding>>,
    this: Weak<ObjectLifecycleManager>,
}

impl ObjectLifecycleManager {
    pub fn new(script: ScriptState, host: HostRuntime, config: &BridgeConfig) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            script,
            host,
            max_arguments: config.max_arguments,
            cache_returned: config.cache_returned_objects,
            own_returned: Cell::new(config.own_returned_objects),
            bindings: RefCell::new(FxHashMap::default()),
            this: this.clone(),
        })
    }

    pub fn script(&self) -> &ScriptState {
        &self.script
    }

    pub fn host(&self) -> &HostRuntime {
        &self.host
    }

    /// Expose an object and return its wrapper.
    ///
    /// With caching, a previously cached wrapper is returned as is (and
    /// published under the new name, if any). Nothing is recorded unless the
    /// whole wrapper could be built.
    pub fn expose(&self, object: ObjectId, options: &ExposeOptions) -> Result<TableRef, BridgeError> {
        let instance = self.host.object(object)?;

        if options.cache
            && let Some(wrapper) = self.cached_wrapper(object)
        {
            debug!(%object, "reusing cached wrapper");
            self.publish(options.name.as_deref(), wrapper)?;
            return Ok(wrapper);
        }

        let meta = instance.meta_object();
        let mapper: &dyn SignatureMapper = match &options.mapper {
            Some(mapper) => mapper.as_ref(),
            None => &NameOnly,
        };
        let methods = Rc::new(MethodTable::build(
            meta,
            &options.filter,
            mapper,
            self.max_arguments,
        )?);
        let properties: Vec<(String, Variant)> = meta
            .properties()
            .iter()
            .enumerate()
            .map(|(index, property)| (property.name().to_string(), instance.read_property(index)))
            .collect();

        let wrapper = self.script.create_table();
        for name in methods.names() {
            let function = self.method_function(object, &methods, name);
            self.script.set_field(wrapper, name, Value::Function(function))?;
        }
        for (name, value) in &properties {
            let value = variant_to_value(&self.script, value)?;
            self.script.set_field(wrapper, name, value)?;
        }
        self.script
            .set_field(wrapper, IDENTITY_FIELD, Value::LightUserData(object.to_bits()))?;
        if options.delete_mode.reclaims() {
            let finalizer = self.finalizer_function(object, options.delete_mode);
            self.script.set_finalizer(wrapper, finalizer)?;
        }
        self.publish(options.name.as_deref(), wrapper)?;

        let method_count = methods.len();
        let mut bindings = self.bindings.borrow_mut();
        let previous_cache = bindings.get(&object).and_then(|b| b.cached);
        let cached = if options.cache {
            Some(self.script.reference(Value::Table(wrapper)))
        } else {
            previous_cache
        };
        bindings.insert(
            object,
            ObjectBinding {
                methods,
                properties,
                cached,
                delete_mode: options.delete_mode,
            },
        );
        debug!(
            %object,
            methods = method_count,
            cache = options.cache,
            delete_mode = ?options.delete_mode,
            "object exposed"
        );
        Ok(wrapper)
    }

    fn publish(&self, name: Option<&str>, wrapper: TableRef) -> Result<(), ScriptError> {
        match name {
            Some(name) => self.script.set_global(name, Value::Table(wrapper)),
            None => Ok(()),
        }
    }

    fn method_function(
        &self,
        object: ObjectId,
        methods: &Rc<MethodTable>,
        name: &str,
    ) -> FunctionRef {
        let manager = self.this.clone();
        let methods = Rc::clone(methods);
        let name = name.to_string();
        self.script.create_function(move |ctx: &mut CallContext<'_>| {
            let manager = manager
                .upgrade()
                .ok_or_else(|| ScriptError::runtime("object bridge no longer exists"))?;
            Ok(manager.dispatch(ctx, object, &methods, &name)?)
        })
    }

    fn finalizer_function(&self, object: ObjectId, mode: DeleteMode) -> FunctionRef {
        let manager = self.this.clone();
        self.script.create_function(move |_: &mut CallContext<'_>| {
            if let Some(manager) = manager.upgrade() {
                manager.finalize(object, mode);
            }
            Ok(0)
        })
    }

    /// Remove an object's binding and release its cached wrapper.
    ///
    /// The object itself is left alone. Returns false if it was not exposed.
    pub fn remove(&self, object: ObjectId) -> bool {
        let Some(binding) = self.bindings.borrow_mut().remove(&object) else {
            return false;
        };
        if let Some(reference) = binding.cached
            && let Err(err) = self.script.unreference(reference)
        {
            warn!(%object, error = %err, "failed to release cached wrapper");
        }
        debug!(%object, "binding removed");
        true
    }

    fn finalize(&self, object: ObjectId, mode: DeleteMode) {
        self.remove(object);
        let destroyed = match mode {
            DeleteMode::NoDelete => return,
            DeleteMode::Immediate => self.host.destroy(object),
            DeleteMode::Later => self.host.delete_later(object),
        };
        debug!(%object, ?mode, destroyed, "wrapper finalized");
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn is_exposed(&self, object: ObjectId) -> bool {
        self.bindings.borrow().contains_key(&object)
    }

    pub fn exposed_count(&self) -> usize {
        self.bindings.borrow().len()
    }

    /// The cached wrapper of an object, if it is still alive.
    pub fn cached_wrapper(&self, object: ObjectId) -> Option<TableRef> {
        let reference = self.bindings.borrow().get(&object)?.cached?;
        self.script.registry_value(reference).ok()?.as_table()
    }

    /// The method table built at the latest exposure.
    pub fn method_table(&self, object: ObjectId) -> Option<Rc<MethodTable>> {
        self.bindings.borrow().get(&object).map(|b| Rc::clone(&b.methods))
    }

    /// Property values as read at the latest exposure.
    pub fn properties(&self, object: ObjectId) -> Option<Vec<(String, Variant)>> {
        self.bindings.borrow().get(&object).map(|b| b.properties.clone())
    }

    pub fn delete_mode(&self, object: ObjectId) -> Option<DeleteMode> {
        self.bindings.borrow().get(&object).map(|b| b.delete_mode)
    }

    /// Default ownership policy for objects returned by native methods.
    pub fn own_returned_objects(&self) -> bool {
        self.own_returned.get()
    }

    pub fn set_own_returned_objects(&self, own: bool) {
        self.own_returned.set(own);
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Wrap an object for the script side; a null or dead object is nil.
    ///
    /// A cached wrapper is reused when one exists; otherwise a new wrapper
    /// is built and cached only when `cache` is set.
    pub fn wrap_object(
        &self,
        object: Option<ObjectId>,
        mode: DeleteMode,
        cache: bool,
    ) -> Result<Value, BridgeError> {
        let Some(object) = object.filter(|id| self.host.contains(*id)) else {
            return Ok(Value::Nil);
        };
        if let Some(wrapper) = self.cached_wrapper(object) {
            return Ok(Value::Table(wrapper));
        }
        let options = ExposeOptions::default()
            .with_cache(cache)
            .with_delete_mode(mode);
        Ok(Value::Table(self.expose(object, &options)?))
    }

    /// Delete mode applied to auto-wrapped return values.
    fn returned_mode(&self) -> DeleteMode {
        if self.own_returned.get() {
            DeleteMode::Immediate
        } else {
            DeleteMode::NoDelete
        }
    }

    #[cfg_attr(feature = "profiling", profiling::function)]
    fn dispatch(
        &self,
        ctx: &mut CallContext<'_>,
        object: ObjectId,
        methods: &MethodTable,
        name: &str,
    ) -> Result<usize, BridgeError> {
        let state = ctx.state();
        let descriptor = methods.select(name, ctx.arg_count())?;
        let result = descriptor.invoke(&self.host, object, state)?;
        self.push_return(state, descriptor.returns(), &result)
    }

    fn push_return(
        &self,
        state: &ScriptState,
        producer: ValueProducer,
        result: &NativeValue,
    ) -> Result<usize, BridgeError> {
        if producer.kind().is_object() {
            let object = object_identity(result.as_any())?;
            let wrapper = self.wrap_object(object, self.returned_mode(), self.cache_returned)?;
            state.push(wrapper);
            return Ok(1);
        }
        producer.write(state, result)
    }
}

impl fmt::Debug for ObjectLifecycleManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectLifecycleManager")
            .field("exposed", &self.exposed_count())
            .field("own_returned", &self.own_returned.get())
            .finish_non_exhaustive()
    }
}
