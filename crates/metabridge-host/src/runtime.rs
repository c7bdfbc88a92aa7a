//! Host object runtime: object arena, invocation, event connections.
//!
//! [`HostRuntime`] is a cheap, cloneable handle to single-threaded shared
//! state. No internal borrow is held while user code runs, so objects may
//! re-enter the runtime from inside an invocation or an event delivery.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::{debug, warn};

use metabridge_core::{HostError, NativeValue, ObjectId, Variant};

use crate::{HostObject, MethodCall, MethodKind};

/// Identity of a registered [`SlotReceiver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReceiverId(pub usize);

/// A native endpoint that receives events through numbered slots.
///
/// Receivers are held weakly; a dropped receiver silently stops receiving.
pub trait SlotReceiver {
    /// Handle one event delivered to `slot`.
    fn receive(&self, slot: usize, args: &RawArguments<'_>);

    /// Called after `source` is destroyed, once per receiver that had a
    /// connection from it. Those connections are already gone.
    fn source_destroyed(&self, _source: ObjectId) {}
}

/// Where an event connection delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionTarget {
    /// A numbered slot of a registered receiver
    Receiver { receiver: ReceiverId, slot: usize },
    /// A method of another host object
    Method { object: ObjectId, method_index: usize },
}

/// The raw argument block of one event emission.
///
/// Position 0 is a return-value placeholder; the event's parameters follow
/// at positions `1..=n`, each as an untyped reference the receiver
/// downcasts according to the parameter's type tag.
pub struct RawArguments<'a> {
    source: ObjectId,
    signal_index: usize,
    values: Vec<&'a dyn Any>,
}

impl<'a> RawArguments<'a> {
    /// Build a block from parameter values.
    pub fn new(source: ObjectId, signal_index: usize, args: &'a [NativeValue]) -> Self {
        let mut values: Vec<&'a dyn Any> = Vec::with_capacity(args.len() + 1);
        values.push(&());
        values.extend(args.iter().map(NativeValue::as_any));
        Self {
            source,
            signal_index,
            values,
        }
    }

    /// The emitting object.
    pub fn source(&self) -> ObjectId {
        self.source
    }

    /// Index of the emitted event.
    pub fn signal_index(&self) -> usize {
        self.signal_index
    }

    /// Get the entry at `position` (0 is the placeholder).
    pub fn get(&self, position: usize) -> Option<&'a dyn Any> {
        self.values.get(position).copied()
    }

    /// Number of entries including the placeholder.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

struct ObjectSlot {
    generation: u32,
    object: Option<Rc<dyn HostObject>>,
}

#[derive(Clone, Copy)]
struct Connection {
    source: ObjectId,
    signal_index: usize,
    target: ConnectionTarget,
}

#[derive(Default)]
struct HostInner {
    slots: Vec<ObjectSlot>,
    free_list: Vec<u32>,
    connections: Vec<Connection>,
    receivers: Vec<Weak<dyn SlotReceiver>>,
    deferred: Vec<ObjectId>,
}

impl HostInner {
    fn get(&self, id: ObjectId) -> Option<&Rc<dyn HostObject>> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.object.as_ref()
    }
}

/// Handle to the host object runtime.
#[derive(Clone, Default)]
pub struct HostRuntime {
    inner: Rc<RefCell<HostInner>>,
}

impl HostRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Objects
    // ========================================================================

    /// Take ownership of an object and return its id.
    pub fn insert<T: HostObject + 'static>(&self, object: T) -> ObjectId {
        self.insert_rc(Rc::new(object))
    }

    /// Register a shared object and return its id.
    pub fn insert_rc(&self, object: Rc<dyn HostObject>) -> ObjectId {
        let mut inner = self.inner.borrow_mut();
        if let Some(index) = inner.free_list.pop() {
            let slot = &mut inner.slots[index as usize];
            slot.object = Some(object);
            ObjectId::new(index, slot.generation)
        } else {
            let index = inner.slots.len() as u32;
            inner.slots.push(ObjectSlot {
                generation: 0,
                object: Some(object),
            });
            ObjectId::new(index, 0)
        }
    }

    /// Check whether an id refers to a live object.
    pub fn contains(&self, id: ObjectId) -> bool {
        self.inner.borrow().get(id).is_some()
    }

    /// Get a live object.
    pub fn object(&self, id: ObjectId) -> Result<Rc<dyn HostObject>, HostError> {
        self.inner
            .borrow()
            .get(id)
            .cloned()
            .ok_or(HostError::StaleObject(id))
    }

    /// Number of live objects.
    pub fn object_count(&self) -> usize {
        self.inner
            .borrow()
            .slots
            .iter()
            .filter(|slot| slot.object.is_some())
            .count()
    }

    /// Destroy an object immediately.
    ///
    /// Connections from or to the object are dropped. Returns false, with a
    /// warning, when the object is already gone.
    pub fn destroy(&self, id: ObjectId) -> bool {
        let mut notified: Vec<ReceiverId> = Vec::new();
        let removed = {
            let mut inner = self.inner.borrow_mut();
            let removed = match inner.slots.get_mut(id.index as usize) {
                Some(slot) if slot.generation == id.generation && slot.object.is_some() => {
                    slot.generation = slot.generation.wrapping_add(1);
                    slot.object.take()
                }
                _ => None,
            };
            if removed.is_some() {
                inner.free_list.push(id.index);
                for c in inner.connections.iter().filter(|c| c.source == id) {
                    if let ConnectionTarget::Receiver { receiver, .. } = c.target
                        && !notified.contains(&receiver)
                    {
                        notified.push(receiver);
                    }
                }
                inner.connections.retain(|c| {
                    c.source != id
                        && !matches!(c.target, ConnectionTarget::Method { object, .. } if object == id)
                });
                inner.deferred.retain(|&queued| queued != id);
            }
            removed
        };

        match removed {
            Some(object) => {
                debug!(object = %id, class = object.meta_object().class_name(), "destroyed host object");
                // drop outside the borrow, the object may touch the runtime
                drop(object);
                for receiver in notified {
                    let endpoint = self.inner.borrow().receivers.get(receiver.0).and_then(Weak::upgrade);
                    if let Some(endpoint) = endpoint {
                        endpoint.source_destroyed(id);
                    }
                }
                true
            }
            None => {
                warn!(object = %id, "destroy of an object that is not alive");
                false
            }
        }
    }

    /// Schedule an object for destruction by [`HostRuntime::process_deferred_deletes`].
    pub fn delete_later(&self, id: ObjectId) -> bool {
        if !self.contains(id) {
            warn!(object = %id, "deferred delete of an object that is not alive");
            return false;
        }
        let mut inner = self.inner.borrow_mut();
        if !inner.deferred.contains(&id) {
            inner.deferred.push(id);
        }
        true
    }

    /// Number of objects waiting for deferred destruction.
    pub fn pending_deletes(&self) -> usize {
        self.inner.borrow().deferred.len()
    }

    /// Destroy every object scheduled with [`HostRuntime::delete_later`].
    pub fn process_deferred_deletes(&self) -> usize {
        let queued = std::mem::take(&mut self.inner.borrow_mut().deferred);
        queued.into_iter().filter(|&id| self.destroy(id)).count()
    }

    // ========================================================================
    // Invocation
    // ========================================================================

    /// Invoke a member synchronously.
    ///
    /// Invoking an event member emits the event and returns `Void`.
    pub fn invoke(
        &self,
        id: ObjectId,
        method_index: usize,
        args: &[NativeValue],
    ) -> Result<NativeValue, HostError> {
        let object = self.object(id)?;
        let meta = object.meta_object();
        let method = meta
            .method(method_index)
            .ok_or(HostError::MethodIndexOutOfRange {
                index: method_index,
                count: meta.method_count(),
            })?;
        if method.parameter_count() != args.len() {
            return Err(HostError::ArgumentCount {
                signature: method.signature().to_string(),
                expected: method.parameter_count(),
                actual: args.len(),
            });
        }
        if method.kind() == MethodKind::Signal {
            self.emit(id, method_index, args)?;
            return Ok(NativeValue::Void);
        }

        let mut call = MethodCall::new(self, id, method_index, args);
        object.invoke(&mut call)?;
        Ok(call.into_return())
    }

    /// Read a property value.
    pub fn read_property(&self, id: ObjectId, index: usize) -> Result<Variant, HostError> {
        Ok(self.object(id)?.read_property(index))
    }

    /// Look up an event index by signature.
    pub fn index_of_signal(&self, id: ObjectId, signature: &str) -> Result<Option<usize>, HostError> {
        Ok(self.object(id)?.meta_object().index_of_signal(signature))
    }

    /// Look up a member index by signature.
    pub fn index_of_method(&self, id: ObjectId, signature: &str) -> Result<Option<usize>, HostError> {
        Ok(self.object(id)?.meta_object().index_of_method(signature))
    }

    // ========================================================================
    // Connections
    // ========================================================================

    /// Register a slot receiver.
    pub fn register_receiver(&self, receiver: Weak<dyn SlotReceiver>) -> ReceiverId {
        let mut inner = self.inner.borrow_mut();
        inner.receivers.push(receiver);
        ReceiverId(inner.receivers.len() - 1)
    }

    /// Connect an event of `source` to a target.
    ///
    /// Every call adds an independent connection, so connecting the same
    /// pair twice delivers twice.
    pub fn connect(
        &self,
        source: ObjectId,
        signal_index: usize,
        target: ConnectionTarget,
    ) -> Result<(), HostError> {
        self.check_signal(source, signal_index)?;
        if let ConnectionTarget::Method {
            object,
            method_index,
        } = target
        {
            let receiver = self.object(object)?;
            let count = receiver.meta_object().method_count();
            if method_index >= count {
                return Err(HostError::MethodIndexOutOfRange {
                    index: method_index,
                    count,
                });
            }
        }
        self.inner.borrow_mut().connections.push(Connection {
            source,
            signal_index,
            target,
        });
        debug!(source = %source, signal = signal_index, ?target, "connected");
        Ok(())
    }

    /// Remove every connection matching the triple; returns how many.
    pub fn disconnect(&self, source: ObjectId, signal_index: usize, target: ConnectionTarget) -> usize {
        let mut inner = self.inner.borrow_mut();
        let before = inner.connections.len();
        inner.connections.retain(|c| {
            !(c.source == source && c.signal_index == signal_index && c.target == target)
        });
        let removed = before - inner.connections.len();
        if removed > 0 {
            debug!(source = %source, signal = signal_index, ?target, removed, "disconnected");
        }
        removed
    }

    /// Total number of live connections.
    pub fn connection_count(&self) -> usize {
        self.inner.borrow().connections.len()
    }

    /// Number of live connections leaving `source`.
    pub fn connections_from(&self, source: ObjectId) -> usize {
        self.inner
            .borrow()
            .connections
            .iter()
            .filter(|c| c.source == source)
            .count()
    }

    /// Emit an event and deliver it to every connection, in connection order.
    ///
    /// Returns the number of deliveries. Failures of method targets are
    /// logged and do not stop delivery.
    pub fn emit(
        &self,
        source: ObjectId,
        signal_index: usize,
        args: &[NativeValue],
    ) -> Result<usize, HostError> {
        self.check_signal(source, signal_index)?;
        let targets: Vec<ConnectionTarget> = self
            .inner
            .borrow()
            .connections
            .iter()
            .filter(|c| c.source == source && c.signal_index == signal_index)
            .map(|c| c.target)
            .collect();

        let raw = RawArguments::new(source, signal_index, args);
        let mut delivered = 0;
        for target in targets {
            match target {
                ConnectionTarget::Receiver { receiver, slot } => {
                    let endpoint = self
                        .inner
                        .borrow()
                        .receivers
                        .get(receiver.0)
                        .and_then(Weak::upgrade);
                    if let Some(endpoint) = endpoint {
                        endpoint.receive(slot, &raw);
                        delivered += 1;
                    }
                }
                ConnectionTarget::Method {
                    object,
                    method_index,
                } => {
                    // receivers may take fewer arguments than the event carries
                    let wanted = match self.object(object) {
                        Ok(target) => target
                            .meta_object()
                            .method(method_index)
                            .map_or(0, |m| m.parameter_count()),
                        Err(_) => continue,
                    };
                    let forwarded = &args[..wanted.min(args.len())];
                    match self.invoke(object, method_index, forwarded) {
                        Ok(_) => delivered += 1,
                        Err(error) => {
                            warn!(receiver = %object, method = method_index, %error, "event delivery failed")
                        }
                    }
                }
            }
        }
        Ok(delivered)
    }

    fn check_signal(&self, source: ObjectId, signal_index: usize) -> Result<(), HostError> {
        let object = self.object(source)?;
        let meta = object.meta_object();
        match meta.method(signal_index) {
            Some(method) if method.kind() == MethodKind::Signal => Ok(()),
            Some(_) => Err(HostError::NotAnEvent {
                index: signal_index,
            }),
            None => Err(HostError::MethodIndexOutOfRange {
                index: signal_index,
                count: meta.method_count(),
            }),
        }
    }
}

impl fmt::Debug for HostRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("HostRuntime")
            .field("slot_count", &inner.slots.len())
            .field("free_count", &inner.free_list.len())
            .field("connection_count", &inner.connections.len())
            .finish()
    }
}
