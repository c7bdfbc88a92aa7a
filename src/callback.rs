//! Routing host events into script functions.
//!
//! Each distinct script function gets one proxy slot on a single
//! [`SlotReceiver`] registered with the host. Host connections address a
//! slot by its position, so slots are never removed: the slot list only
//! grows, and a slot whose connections are all gone merely releases its
//! registry reference to the function.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::{debug, warn};

use metabridge_core::{BridgeError, ObjectId};
use metabridge_host::{ConnectionTarget, HostRuntime, RawArguments, ReceiverId, SlotReceiver};
use metabridge_script::{FunctionRef, RegistryRef, ScriptState, Value};

use crate::lifecycle::{DeleteMode, ObjectLifecycleManager};
use crate::marshal::{TypeMarshaller, ValueProducer, object_identity};

/// One host connection routed through a proxy slot.
#[derive(Debug, Clone)]
struct SlotConnection {
    source: ObjectId,
    signal_index: usize,
    producers: Rc<[ValueProducer]>,
}

#[derive(Debug)]
struct ProxySlot {
    function: FunctionRef,
    /// Keeps the function alive while the slot has connections.
    reference: Option<RegistryRef>,
    connections: Vec<SlotConnection>,
}

impl ProxySlot {
    /// Take the function reference once no connection is left.
    fn release_if_idle(&mut self) -> Option<RegistryRef> {
        if self.connections.is_empty() {
            self.reference.take()
        } else {
            None
        }
    }
}

/// Delivers host events to script functions.
pub struct CallbackDispatcher {
    script: ScriptState,
    host: HostRuntime,
    lifecycle: Rc<ObjectLifecycleManager>,
    slots: RefCell<Vec<ProxySlot>>,
    receiver: ReceiverId,
}

impl CallbackDispatcher {
    /// Create a dispatcher and register it as a host receiver.
    pub fn new(lifecycle: Rc<ObjectLifecycleManager>) -> Rc<Self> {
        Rc::new_cyclic(|this: &Weak<CallbackDispatcher>| {
            let host = lifecycle.host().clone();
            let endpoint: Weak<dyn SlotReceiver> = this.clone();
            let receiver = host.register_receiver(endpoint);
            Self {
                script: lifecycle.script().clone(),
                host,
                lifecycle,
                slots: RefCell::new(Vec::new()),
                receiver,
            }
        })
    }

    pub fn host(&self) -> &HostRuntime {
        &self.host
    }

    /// Connect an event to a script function.
    ///
    /// `parameter_tags` are the event's parameter type tags in declaration
    /// order. A function already known reuses its slot; every call still adds
    /// one host connection. Returns the slot index.
    pub fn connect<S: AsRef<str>>(
        &self,
        source: ObjectId,
        signal_index: usize,
        parameter_tags: &[S],
        function: FunctionRef,
    ) -> Result<usize, BridgeError> {
        let marshaller = TypeMarshaller::global();
        let producers = parameter_tags
            .iter()
            .map(|tag| {
                let producer = marshaller.build_outgoing(tag.as_ref())?;
                if producer.kind().is_void() {
                    return Err(BridgeError::UnknownType {
                        tag: tag.as_ref().to_string(),
                    });
                }
                Ok(producer)
            })
            .collect::<Result<Rc<[_]>, _>>()?;
        if !self.script.is_alive(&Value::Function(function)) {
            return Err(BridgeError::missing_target("callback function is no longer alive"));
        }

        let existing = self.slots.borrow().iter().position(|s| s.function == function);
        let index = existing.unwrap_or_else(|| self.slots.borrow().len());
        self.host.connect(
            source,
            signal_index,
            ConnectionTarget::Receiver {
                receiver: self.receiver,
                slot: index,
            },
        )?;

        let mut slots = self.slots.borrow_mut();
        if existing.is_none() {
            slots.push(ProxySlot {
                function,
                reference: None,
                connections: Vec::new(),
            });
        }
        let slot = &mut slots[index];
        if slot.reference.is_none() {
            slot.reference = Some(self.script.reference(Value::Function(function)));
        }
        slot.connections.push(SlotConnection {
            source,
            signal_index,
            producers,
        });
        debug!(%source, signal = signal_index, slot = index, "callback connected");
        Ok(index)
    }

    /// Disconnect an event from a script function.
    ///
    /// Returns the number of host connections removed. The function
    /// reference is released once its slot has no connection left; the slot
    /// itself stays.
    pub fn disconnect(&self, source: ObjectId, signal_index: usize, function: FunctionRef) -> usize {
        let mut removed = 0;
        let mut released = Vec::new();
        {
            let mut slots = self.slots.borrow_mut();
            for (index, slot) in slots.iter_mut().enumerate() {
                if slot.function != function {
                    continue;
                }
                removed += self.host.disconnect(
                    source,
                    signal_index,
                    ConnectionTarget::Receiver {
                        receiver: self.receiver,
                        slot: index,
                    },
                );
                slot.connections
                    .retain(|c| !(c.source == source && c.signal_index == signal_index));
                released.extend(slot.release_if_idle());
            }
        }
        self.release(released);
        debug!(%source, signal = signal_index, removed, "callback disconnected");
        removed
    }

    /// Forget every connection from a destroyed source.
    ///
    /// The host has already dropped its side; slots left without
    /// connections release their function reference.
    fn prune_source(&self, source: ObjectId) {
        let mut pruned = 0;
        let mut released = Vec::new();
        {
            let mut slots = self.slots.borrow_mut();
            for slot in slots.iter_mut() {
                let before = slot.connections.len();
                slot.connections.retain(|c| c.source != source);
                pruned += before - slot.connections.len();
                released.extend(slot.release_if_idle());
            }
        }
        self.release(released);
        debug!(%source, pruned, "callbacks of destroyed source pruned");
    }

    fn release(&self, references: Vec<RegistryRef>) {
        for reference in references {
            if let Err(err) = self.script.unreference(reference) {
                warn!(error = %err, "failed to release callback reference");
            }
        }
    }

    /// Number of proxy slots ever created.
    pub fn slot_count(&self) -> usize {
        self.slots.borrow().len()
    }

    /// Number of live connections routed through proxy slots.
    pub fn connection_count(&self) -> usize {
        self.slots.borrow().iter().map(|s| s.connections.len()).sum()
    }

    /// Call the slot's function with the event arguments.
    ///
    /// Failures are logged and swallowed; the emitter never sees them.
    #[cfg_attr(feature = "profiling", profiling::function)]
    fn invoke(&self, slot: usize, args: &RawArguments<'_>) {
        let route = {
            let slots = self.slots.borrow();
            slots.get(slot).and_then(|s| {
                s.connections
                    .iter()
                    .find(|c| c.source == args.source() && c.signal_index == args.signal_index())
                    .map(|c| (s.function, Rc::clone(&c.producers)))
            })
        };
        let Some((function, producers)) = route else {
            warn!(slot, source = %args.source(), "event delivered to an unrouted slot");
            return;
        };

        let top = self.script.top();
        self.script.push(Value::Function(function));
        for (position, producer) in (1..).zip(producers.iter()) {
            let pushed = match args.get(position) {
                Some(raw) => self.push_argument(*producer, raw),
                None => {
                    self.script.push(Value::Nil);
                    Ok(())
                }
            };
            if let Err(err) = pushed {
                self.script.set_top(top);
                warn!(slot, position, error = %err, "event argument conversion failed");
                return;
            }
        }

        if let Err(err) = self.script.pcall(producers.len(), Some(0)) {
            let failure = BridgeError::CallbackFailure(err);
            warn!(slot, source = %args.source(), error = %failure, "callback failed");
        }
    }

    fn push_argument(&self, producer: ValueProducer, raw: &dyn Any) -> Result<(), BridgeError> {
        if producer.kind().is_object() {
            let wrapper = self
                .lifecycle
                .wrap_object(object_identity(raw)?, DeleteMode::NoDelete, false)?;
            self.script.push(wrapper);
            return Ok(());
        }
        producer.write_from(&self.script, raw).map(|_| ())
    }
}

impl SlotReceiver for CallbackDispatcher {
    fn receive(&self, slot: usize, args: &RawArguments<'_>) {
        self.invoke(slot, args);
    }

    fn source_destroyed(&self, source: ObjectId) {
        self.prune_source(source);
    }
}

impl fmt::Debug for CallbackDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackDispatcher")
            .field("receiver", &self.receiver)
            .field("slots", &self.slot_count())
            .field("connections", &self.connection_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::BridgeConfig;
    use metabridge_core::{HostError, NativeValue, ScriptError};
    use metabridge_host::{HostObject, MetaObject, MethodCall};
    use metabridge_script::CallContext;

    struct Emitter {
        meta: MetaObject,
    }

    impl Emitter {
        fn new() -> Self {
            Self {
                meta: MetaObject::builder("Emitter")
                    .signal("ticked(int)")
                    .signal("named(string,double)")
                    .build(),
            }
        }
    }

    impl HostObject for Emitter {
        fn meta_object(&self) -> &MetaObject {
            &self.meta
        }

        fn invoke(&self, _call: &mut MethodCall<'_>) -> Result<(), HostError> {
            Ok(())
        }
    }

    fn setup() -> (Rc<CallbackDispatcher>, ObjectId) {
        let script = ScriptState::new();
        let host = HostRuntime::new();
        let source = host.insert(Emitter::new());
        let lifecycle = ObjectLifecycleManager::new(script, host, &BridgeConfig::default());
        (CallbackDispatcher::new(lifecycle), source)
    }

    fn counting(dispatcher: &CallbackDispatcher, hits: &Rc<Cell<i64>>) -> FunctionRef {
        let hits = Rc::clone(hits);
        dispatcher.script.create_function(move |ctx: &mut CallContext<'_>| {
            hits.set(hits.get() + ctx.arg(0).as_integer().unwrap_or(1));
            Ok(0)
        })
    }

    #[test]
    fn same_function_reuses_its_slot() {
        let (dispatcher, source) = setup();
        let hits = Rc::new(Cell::new(0));
        let f = counting(&dispatcher, &hits);

        assert_eq!(dispatcher.connect(source, 0, &["int"], f), Ok(0));
        assert_eq!(dispatcher.connect(source, 1, &["string", "double"], f), Ok(0));
        assert_eq!(dispatcher.slot_count(), 1);
        assert_eq!(dispatcher.host().connection_count(), 2);

        dispatcher.host().emit(source, 0, &[NativeValue::Int(5)]).expect("emit");
        assert_eq!(hits.get(), 5);
    }

    #[test]
    fn event_arguments_are_converted() {
        let (dispatcher, source) = setup();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let f = dispatcher.script.create_function(move |ctx: &mut CallContext<'_>| {
            sink.borrow_mut().push((ctx.arg(0), ctx.arg(1)));
            Ok(0)
        });
        dispatcher.connect(source, 1, &["string", "double"], f).expect("connect");

        dispatcher
            .host()
            .emit(source, 1, &[NativeValue::Text("hi".into()), NativeValue::Double(0.5)])
            .expect("emit");
        assert_eq!(*seen.borrow(), vec![(Value::from("hi"), Value::Number(0.5))]);
    }

    #[test]
    fn disconnect_keeps_slots_and_releases_reference() {
        let (dispatcher, source) = setup();
        let hits = Rc::new(Cell::new(0));
        let f = counting(&dispatcher, &hits);
        let g = counting(&dispatcher, &hits);
        dispatcher.connect(source, 0, &["int"], f).expect("connect");
        dispatcher.connect(source, 0, &["int"], g).expect("connect");
        let refs = dispatcher.script.registry_len();

        assert_eq!(dispatcher.disconnect(source, 0, f), 1);
        assert_eq!(dispatcher.slot_count(), 2);
        assert_eq!(dispatcher.connection_count(), 1);
        assert_eq!(dispatcher.script.registry_len(), refs - 1);

        dispatcher.host().emit(source, 0, &[NativeValue::Int(1)]).expect("emit");
        assert_eq!(hits.get(), 1);
        assert_eq!(dispatcher.disconnect(source, 0, f), 0);
    }

    #[test]
    fn reconnect_after_release_rearms_reference() {
        let (dispatcher, source) = setup();
        let hits = Rc::new(Cell::new(0));
        let f = counting(&dispatcher, &hits);
        dispatcher.connect(source, 0, &["int"], f).expect("connect");
        dispatcher.disconnect(source, 0, f);
        assert_eq!(dispatcher.script.registry_len(), 0);

        assert_eq!(dispatcher.connect(source, 0, &["int"], f), Ok(0));
        assert_eq!(dispatcher.script.registry_len(), 1);
    }

    #[test]
    fn destroyed_source_releases_its_connections() {
        let (dispatcher, source) = setup();
        let other = dispatcher.host().insert(Emitter::new());
        let hits = Rc::new(Cell::new(0));
        let f = counting(&dispatcher, &hits);
        let g = counting(&dispatcher, &hits);
        dispatcher.connect(source, 0, &["int"], f).expect("connect");
        dispatcher.connect(other, 0, &["int"], f).expect("connect");
        dispatcher.connect(source, 0, &["int"], g).expect("connect");
        assert_eq!(dispatcher.script.registry_len(), 2);

        dispatcher.host().destroy(source);
        assert_eq!(dispatcher.connection_count(), 1);
        assert_eq!(dispatcher.connection_count(), dispatcher.host().connection_count());
        assert_eq!(dispatcher.slot_count(), 2);
        assert_eq!(dispatcher.script.registry_len(), 1);

        dispatcher.host().emit(other, 0, &[NativeValue::Int(3)]).expect("emit");
        assert_eq!(hits.get(), 3);
    }

    #[test]
    fn callback_failure_is_swallowed() {
        let (dispatcher, source) = setup();
        let f = dispatcher
            .script
            .create_function(|_: &mut CallContext<'_>| Err(ScriptError::runtime("boom")));
        dispatcher.connect(source, 0, &["int"], f).expect("connect");

        let top = dispatcher.script.top();
        assert_eq!(dispatcher.host().emit(source, 0, &[NativeValue::Int(1)]), Ok(1));
        assert_eq!(dispatcher.script.top(), top);
    }

    #[test]
    fn unknown_parameter_tag_is_rejected() {
        let (dispatcher, source) = setup();
        let hits = Rc::new(Cell::new(0));
        let f = counting(&dispatcher, &hits);
        let err = dispatcher.connect(source, 0, &["matrix"], f).unwrap_err();
        assert!(err.is_unknown_type());
        assert_eq!(dispatcher.slot_count(), 0);
        assert_eq!(dispatcher.host().connection_count(), 0);
    }

    #[test]
    fn failed_host_connect_creates_no_slot() {
        let (dispatcher, source) = setup();
        let hits = Rc::new(Cell::new(0));
        let f = counting(&dispatcher, &hits);
        let err = dispatcher.connect(source, 9, &["int"], f).unwrap_err();
        assert!(matches!(err, BridgeError::Host(_)));
        assert_eq!(dispatcher.slot_count(), 0);
    }
}
