//! Host object fixtures shared by the integration tests.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};

use metabridge::prelude::*;
use metabridge::HostError;
use metabridge_script::CallContext;

pub mod calculator {
    pub const TOTAL: usize = 0;
    pub const TOTAL2: usize = 1;
    pub const ECHO_MAP: usize = 2;
    pub const ECHO_LIST: usize = 3;
    pub const ECHO_SHORTS: usize = 4;
    pub const ECHO_DOUBLES: usize = 5;
    pub const ECHO_STRINGS: usize = 6;
    pub const SPAWN: usize = 7;
    pub const FAIL: usize = 8;
    pub const CHANGED: usize = 9;
    pub const RENAMED: usize = 10;
    pub const SPAWNED: usize = 11;
    pub const SET: usize = 12;
    pub const RECEIVE: usize = 13;
}

/// A host object with overloads, structured echo methods and events.
pub struct Calculator {
    meta: MetaObject,
    pub value: Cell<i32>,
    pub name: RefCell<String>,
    pub received: RefCell<Vec<i32>>,
}

impl Calculator {
    pub fn new(name: &str) -> Self {
        Self {
            meta: MetaObject::builder("Calculator")
                .method("total()", "int")
                .method("total(int, int)", "int")
                .method("echo_map(map)", "map")
                .method("echo_list(list)", "list")
                .method("echo_shorts(list<short>)", "list<short>")
                .method("echo_doubles(vector<double>)", "vector<double>")
                .method("echo_strings(string_list)", "string_list")
                .method("spawn()", "object")
                .method("fail()", "int")
                .signal("changed(int)")
                .signal("renamed(string)")
                .signal("spawned(object)")
                .slot("set(int)", "")
                .slot("receive(int)", "")
                .property("name", "string")
                .property("value", "int")
                .build(),
            value: Cell::new(0),
            name: RefCell::new(name.to_string()),
            received: RefCell::new(Vec::new()),
        }
    }
}

impl HostObject for Calculator {
    fn meta_object(&self) -> &MetaObject {
        &self.meta
    }

    fn invoke(&self, call: &mut MethodCall<'_>) -> Result<(), HostError> {
        use calculator::*;

        match call.method_index() {
            TOTAL => call.set_return(self.value.get()),
            TOTAL2 => {
                let a: i32 = call.arg(0)?;
                let b: i32 = call.arg(1)?;
                call.set_return(a + b);
            }
            ECHO_MAP => call.set_return(call.arg::<VariantMap>(0)?),
            ECHO_LIST => call.set_return(call.arg::<VariantList>(0)?),
            ECHO_SHORTS => call.set_return(call.arg::<Vec<i16>>(0)?),
            ECHO_DOUBLES => call.set_return(call.arg::<Vec<f64>>(0)?),
            ECHO_STRINGS => call.set_return(call.arg::<Vec<String>>(0)?),
            SPAWN => {
                let child = call.runtime().insert(Calculator::new("child"));
                call.emit(SPAWNED, &[NativeValue::Object(Some(child))])?;
                call.set_return(child);
            }
            FAIL => return Err(HostError::InvocationFailed("always fails".into())),
            SET => {
                let value: i32 = call.arg(0)?;
                self.value.set(value);
                call.emit(CHANGED, &[NativeValue::Int(value)])?;
            }
            RECEIVE => self.received.borrow_mut().push(call.arg(0)?),
            _ => {}
        }
        Ok(())
    }

    fn read_property(&self, index: usize) -> Variant {
        match index {
            0 => Variant::String(self.name.borrow().clone()),
            1 => Variant::Int(self.value.get()),
            _ => Variant::Invalid,
        }
    }
}

/// A class using a type tag outside the marshalling vocabulary.
pub struct Transform {
    meta: MetaObject,
}

impl Transform {
    pub fn new() -> Self {
        Self {
            meta: MetaObject::builder("Transform")
                .method("scale(double)", "")
                .method("invert(matrix)", "matrix")
                .build(),
        }
    }
}

impl HostObject for Transform {
    fn meta_object(&self) -> &MetaObject {
        &self.meta
    }

    fn invoke(&self, _call: &mut MethodCall<'_>) -> Result<(), HostError> {
        Ok(())
    }
}

/// Call a wrapper method from the native side, returning every result.
pub fn call_method(
    bridge: &Bridge,
    wrapper: TableRef,
    name: &str,
    args: &[Value],
) -> Result<Vec<Value>, metabridge::ScriptError> {
    let function = bridge.script().get_field(wrapper, name)?;
    bridge.script().call_function(&function, args)
}

/// A script function counting its calls and recording its first argument.
pub fn recorder(bridge: &Bridge) -> (FunctionRef, std::rc::Rc<RefCell<Vec<Value>>>) {
    let seen = std::rc::Rc::new(RefCell::new(Vec::new()));
    let sink = std::rc::Rc::clone(&seen);
    let function = bridge.script().create_function(move |ctx: &mut CallContext<'_>| {
        sink.borrow_mut().push(ctx.arg(0));
        Ok(0)
    });
    (function, seen)
}

pub fn bridge() -> Bridge {
    Bridge::new(ScriptState::new(), HostRuntime::new()).expect("bridge")
}
