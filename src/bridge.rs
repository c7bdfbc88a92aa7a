//! The bridge facade and the script-side utility namespace.

use std::rc::{Rc, Weak};

use tracing::debug;

use metabridge_core::{BridgeError, ObjectId, ScriptError};
use metabridge_host::{ConnectionTarget, HostRuntime};
use metabridge_script::{CallContext, FunctionRef, ScriptState, TableRef, Value};

use crate::callback::CallbackDispatcher;
use crate::config::BridgeConfig;
use crate::lifecycle::{ExposeOptions, ObjectLifecycleManager};
use crate::marshal::object_identity_of;

/// Connects one host runtime to one script state.
///
/// Creating a bridge installs the namespace table (see
/// [`BridgeConfig::namespace`]) with three functions:
///
/// - `connect(source, event, function)` or
///   `connect(source, event, target, "method(sig)")`
/// - `disconnect(...)` with the same arguments
/// - `own_objects(flag)` toggling ownership of returned objects
///
/// `source` and `target` are wrappers or raw object ids (light userdata).
///
/// # Example
///
/// ```
/// use metabridge::Bridge;
/// use metabridge_host::HostRuntime;
/// use metabridge_script::ScriptState;
///
/// let bridge = Bridge::new(ScriptState::new(), HostRuntime::new()).unwrap();
/// assert!(bridge.script().global("bridge").as_table().is_some());
/// ```
#[derive(Debug)]
pub struct Bridge {
    config: BridgeConfig,
    lifecycle: Rc<ObjectLifecycleManager>,
    callbacks: Rc<CallbackDispatcher>,
}

impl Bridge {
    pub fn new(script: ScriptState, host: HostRuntime) -> Result<Self, BridgeError> {
        Self::with_config(script, host, BridgeConfig::default())
    }

    pub fn with_config(script: ScriptState, host: HostRuntime, config: BridgeConfig) -> Result<Self, BridgeError> {
        let lifecycle = ObjectLifecycleManager::new(script, host, &config);
        let callbacks = CallbackDispatcher::new(Rc::clone(&lifecycle));
        let bridge = Self {
            config,
            lifecycle,
            callbacks,
        };
        bridge.install_namespace()?;
        Ok(bridge)
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn script(&self) -> &ScriptState {
        self.lifecycle.script()
    }

    pub fn host(&self) -> &HostRuntime {
        self.lifecycle.host()
    }

    pub fn lifecycle(&self) -> &ObjectLifecycleManager {
        &self.lifecycle
    }

    pub fn callbacks(&self) -> &CallbackDispatcher {
        &self.callbacks
    }

    // ========================================================================
    // Native surface
    // ========================================================================

    /// Expose an object; see [`ObjectLifecycleManager::expose`].
    pub fn expose(&self, object: ObjectId, options: &ExposeOptions) -> Result<TableRef, BridgeError> {
        self.lifecycle.expose(object, options)
    }

    /// Remove an object's binding without destroying it.
    pub fn remove(&self, object: ObjectId) -> bool {
        self.lifecycle.remove(object)
    }

    /// Connect an event, named by signature, to a script function.
    pub fn connect(&self, source: ObjectId, event: &str, function: FunctionRef) -> Result<usize, BridgeError> {
        let (signal_index, tags) = self.resolve_event(source, event)?;
        self.callbacks.connect(source, signal_index, &tags, function)
    }

    /// Disconnect an event, named by signature, from a script function.
    pub fn disconnect(&self, source: ObjectId, event: &str, function: FunctionRef) -> Result<usize, BridgeError> {
        let (signal_index, _) = self.resolve_event(source, event)?;
        Ok(self.callbacks.disconnect(source, signal_index, function))
    }

    pub fn set_own_returned_objects(&self, own: bool) {
        self.lifecycle.set_own_returned_objects(own);
    }

    fn resolve_event(&self, source: ObjectId, event: &str) -> Result<(usize, Vec<String>), BridgeError> {
        resolve_event(self.host(), source, event)
    }

    fn install_namespace(&self) -> Result<(), BridgeError> {
        let script = self.script();
        let namespace = script.create_table();

        let lifecycle = Rc::downgrade(&self.lifecycle);
        let callbacks = Rc::downgrade(&self.callbacks);
        let connect = script.create_function(move |ctx: &mut CallContext<'_>| {
            let (lifecycle, callbacks) = upgrade(&lifecycle, &callbacks)?;
            script_connect(ctx, &lifecycle, &callbacks, Operation::Connect)?;
            ctx.push(true);
            Ok(1)
        });
        script.set_field(namespace, "connect", Value::Function(connect))?;

        let lifecycle = Rc::downgrade(&self.lifecycle);
        let callbacks = Rc::downgrade(&self.callbacks);
        let disconnect = script.create_function(move |ctx: &mut CallContext<'_>| {
            let (lifecycle, callbacks) = upgrade(&lifecycle, &callbacks)?;
            let removed = script_connect(ctx, &lifecycle, &callbacks, Operation::Disconnect)?;
            ctx.push(removed > 0);
            Ok(1)
        });
        script.set_field(namespace, "disconnect", Value::Function(disconnect))?;

        let lifecycle = Rc::downgrade(&self.lifecycle);
        let own_objects = script.create_function(move |ctx: &mut CallContext<'_>| {
            if let Some(lifecycle) = lifecycle.upgrade() {
                lifecycle.set_own_returned_objects(ctx.arg(0).is_truthy());
            }
            Ok(0)
        });
        script.set_field(namespace, "own_objects", Value::Function(own_objects))?;

        script.set_global(&self.config.namespace, Value::Table(namespace))?;
        debug!(namespace = %self.config.namespace, "namespace installed");
        Ok(())
    }
}

// ============================================================================
// Script-facing connect/disconnect
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Connect,
    Disconnect,
}

impl Operation {
    fn name(self) -> &'static str {
        match self {
            Operation::Connect => "connect",
            Operation::Disconnect => "disconnect",
        }
    }
}

fn upgrade(
    lifecycle: &Weak<ObjectLifecycleManager>,
    callbacks: &Weak<CallbackDispatcher>,
) -> Result<(Rc<ObjectLifecycleManager>, Rc<CallbackDispatcher>), ScriptError> {
    lifecycle
        .upgrade()
        .zip(callbacks.upgrade())
        .ok_or_else(|| ScriptError::runtime("object bridge no longer exists"))
}

fn resolve_event(host: &HostRuntime, source: ObjectId, event: &str) -> Result<(usize, Vec<String>), BridgeError> {
    let object = host.object(source)?;
    let meta = object.meta_object();
    let (index, method) = meta
        .index_of_signal(event)
        .and_then(|index| meta.method(index).map(|m| (index, m)))
        .ok_or_else(|| BridgeError::EventNotFound {
            signature: event.to_string(),
        })?;
    Ok((index, method.parameter_types().to_vec()))
}

/// Shared argument handling of `connect` and `disconnect`.
///
/// Returns the number of connections made or removed.
fn script_connect(
    ctx: &CallContext<'_>,
    lifecycle: &ObjectLifecycleManager,
    callbacks: &CallbackDispatcher,
    operation: Operation,
) -> Result<usize, BridgeError> {
    let name = operation.name();
    if !matches!(ctx.arg_count(), 3 | 4) {
        return Err(BridgeError::missing_target(format!(
            "{name}: three or four arguments required"
        )));
    }
    let state = ctx.state();
    let host = lifecycle.host();

    let source = object_identity_of(state, &ctx.arg(0)).ok_or_else(|| {
        BridgeError::missing_target(format!("{name}: first argument is not an object"))
    })?;
    let event = ctx.arg(1);
    let event = event.as_str().ok_or_else(|| {
        BridgeError::missing_target(format!("{name}: second argument is not an event signature"))
    })?;
    let (signal_index, tags) = resolve_event(host, source, event)?;

    let target = ctx.arg(2);
    if let Some(function) = target.as_function() {
        return match operation {
            Operation::Connect => callbacks.connect(source, signal_index, &tags, function).map(|_| 1),
            Operation::Disconnect => Ok(callbacks.disconnect(source, signal_index, function)),
        };
    }

    let target_object = match &target {
        Value::Table(_) | Value::LightUserData(_) => object_identity_of(state, &target),
        _ => {
            return Err(BridgeError::missing_target(format!(
                "{name}: third argument must be a function, an object or an object id"
            )));
        }
    }
    .ok_or_else(|| BridgeError::missing_target(format!("{name}: third argument is not an object")))?;
    let method = ctx.arg(3);
    let method = method
        .as_str()
        .ok_or_else(|| BridgeError::missing_target(format!("{name}: missing target method")))?;
    let method_index = host
        .index_of_method(target_object, method)?
        .ok_or_else(|| BridgeError::TargetMethodNotFound {
            signature: method.to_string(),
        })?;

    let target = ConnectionTarget::Method {
        object: target_object,
        method_index,
    };
    match operation {
        Operation::Connect => {
            host.connect(source, signal_index, target)?;
            Ok(1)
        }
        Operation::Disconnect => Ok(host.disconnect(source, signal_index, target)),
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};

    use super::*;
    use metabridge_core::{HostError, NativeValue};
    use metabridge_host::{HostObject, MetaObject, MethodCall};

    struct Relay {
        meta: MetaObject,
        received: RefCell<Vec<i32>>,
    }

    impl Relay {
        fn new() -> Self {
            Self {
                meta: MetaObject::builder("Relay")
                    .signal("fired(int)")
                    .slot("accept(int)", "")
                    .method("fire(int)", "")
                    .build(),
                received: RefCell::new(Vec::new()),
            }
        }
    }

    impl HostObject for Relay {
        fn meta_object(&self) -> &MetaObject {
            &self.meta
        }

        fn invoke(&self, call: &mut MethodCall<'_>) -> Result<(), HostError> {
            match call.method_index() {
                1 => self.received.borrow_mut().push(call.arg(0)?),
                2 => {
                    let value: i32 = call.arg(0)?;
                    call.emit(0, &[NativeValue::Int(value)])?;
                }
                _ => {}
            }
            Ok(())
        }
    }

    fn namespace_call(bridge: &Bridge, name: &str, args: &[Value]) -> Result<Vec<Value>, ScriptError> {
        let namespace = bridge.script().global("bridge").as_table().expect("namespace");
        let function = bridge.script().get_field(namespace, name)?;
        bridge.script().call_function(&function, args)
    }

    #[test]
    fn namespace_is_installed_under_configured_name() {
        let config = BridgeConfig::default().with_namespace("qt");
        let bridge = Bridge::with_config(ScriptState::new(), HostRuntime::new(), config).expect("bridge");
        let namespace = bridge.script().global("qt").as_table().expect("namespace");
        for name in ["connect", "disconnect", "own_objects"] {
            assert!(bridge.script().get_field(namespace, name).expect("field").as_function().is_some());
        }
    }

    #[test]
    fn own_objects_toggles_policy() {
        let bridge = Bridge::new(ScriptState::new(), HostRuntime::new()).expect("bridge");
        namespace_call(&bridge, "own_objects", &[Value::Boolean(true)]).expect("call");
        assert!(bridge.lifecycle().own_returned_objects());
        namespace_call(&bridge, "own_objects", &[Value::Nil]).expect("call");
        assert!(!bridge.lifecycle().own_returned_objects());
    }

    #[test]
    fn script_connect_to_function() {
        let bridge = Bridge::new(ScriptState::new(), HostRuntime::new()).expect("bridge");
        let source = bridge.host().insert(Relay::new());
        let wrapper = bridge.expose(source, &ExposeOptions::default()).expect("expose");
        let hits = Rc::new(Cell::new(0));
        let counter = Rc::clone(&hits);
        let f = bridge.script().create_function(move |ctx: &mut CallContext<'_>| {
            counter.set(counter.get() + ctx.arg(0).as_integer().unwrap_or(0));
            Ok(0)
        });

        let result = namespace_call(
            &bridge,
            "connect",
            &[Value::Table(wrapper), Value::from("fired( int )"), Value::Function(f)],
        );
        assert_eq!(result, Ok(vec![Value::Boolean(true)]));

        bridge.host().invoke(source, 2, &[NativeValue::Int(4)]).expect("fire");
        assert_eq!(hits.get(), 4);

        let result = namespace_call(
            &bridge,
            "disconnect",
            &[Value::LightUserData(source.to_bits()), Value::from("fired(int)"), Value::Function(f)],
        );
        assert_eq!(result, Ok(vec![Value::Boolean(true)]));
        assert_eq!(bridge.callbacks().slot_count(), 1);
        assert_eq!(bridge.host().connection_count(), 0);
    }

    #[test]
    fn script_connect_to_host_method() {
        let bridge = Bridge::new(ScriptState::new(), HostRuntime::new()).expect("bridge");
        let relay = Rc::new(Relay::new());
        let source = bridge.host().insert(Relay::new());
        let target = bridge.host().insert_rc(relay.clone());
        let source_wrapper = bridge.expose(source, &ExposeOptions::default()).expect("expose");
        let target_wrapper = bridge.expose(target, &ExposeOptions::default()).expect("expose");

        namespace_call(
            &bridge,
            "connect",
            &[
                Value::Table(source_wrapper),
                Value::from("fired(int)"),
                Value::Table(target_wrapper),
                Value::from("accept(int)"),
            ],
        )
        .expect("connect");
        bridge.host().emit(source, 0, &[NativeValue::Int(7)]).expect("emit");
        assert_eq!(*relay.received.borrow(), vec![7]);
    }

    #[test]
    fn malformed_arguments_are_missing_target() {
        let bridge = Bridge::new(ScriptState::new(), HostRuntime::new()).expect("bridge");
        let source = bridge.host().insert(Relay::new());
        let id = Value::LightUserData(source.to_bits());

        let too_few = namespace_call(&bridge, "connect", &[id.clone()]).unwrap_err();
        assert!(too_few.as_bridge().is_some_and(BridgeError::is_missing_target));

        let bad_target = namespace_call(&bridge, "connect", &[id.clone(), Value::from("fired(int)"), Value::from(1)])
            .unwrap_err();
        assert!(bad_target.as_bridge().is_some_and(BridgeError::is_missing_target));

        let no_method = namespace_call(
            &bridge,
            "connect",
            &[id.clone(), Value::from("fired(int)"), id.clone()],
        )
        .unwrap_err();
        assert!(no_method.as_bridge().is_some_and(BridgeError::is_missing_target));
    }

    #[test]
    fn unknown_event_and_method_are_reported() {
        let bridge = Bridge::new(ScriptState::new(), HostRuntime::new()).expect("bridge");
        let source = bridge.host().insert(Relay::new());
        let id = Value::LightUserData(source.to_bits());

        let err = namespace_call(
            &bridge,
            "connect",
            &[id.clone(), Value::from("missing()"), id.clone(), Value::from("accept(int)")],
        )
        .unwrap_err();
        assert_eq!(
            err.as_bridge(),
            Some(&BridgeError::EventNotFound {
                signature: "missing()".into()
            })
        );

        let err = namespace_call(
            &bridge,
            "connect",
            &[id.clone(), Value::from("fired(int)"), id, Value::from("nope()")],
        )
        .unwrap_err();
        assert_eq!(
            err.as_bridge(),
            Some(&BridgeError::TargetMethodNotFound {
                signature: "nope()".into()
            })
        );
    }

    #[test]
    fn native_connect_by_signature() {
        let bridge = Bridge::new(ScriptState::new(), HostRuntime::new()).expect("bridge");
        let source = bridge.host().insert(Relay::new());
        let f = bridge.script().create_function(|_: &mut CallContext<'_>| Ok(0));
        assert_eq!(bridge.connect(source, "fired(int)", f), Ok(0));
        assert!(matches!(
            bridge.connect(source, "accept(int)", f),
            Err(BridgeError::EventNotFound { .. })
        ));
        assert_eq!(bridge.disconnect(source, "fired(int)", f), Ok(1));
    }
}
