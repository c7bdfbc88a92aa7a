//! End-to-end tests of exposure, dispatch, lifetime and event routing.

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use proptest::prelude::*;

use common::{Calculator, Transform, bridge, calculator, call_method, recorder};
use metabridge::prelude::*;
use metabridge::{ScriptError, marshal};

fn expect_bridge_error(result: Result<Vec<Value>, ScriptError>) -> BridgeError {
    let err = result.expect_err("call should fail");
    err.as_bridge().cloned().expect("bridge error")
}

// ============================================================================
// Arity dispatch
// ============================================================================

#[test]
fn test_arity_selects_overload() {
    let bridge = bridge();
    let calc = bridge.host().insert(Calculator::new("calc"));
    let wrapper = bridge.expose(calc, &ExposeOptions::default()).unwrap();

    assert_eq!(call_method(&bridge, wrapper, "total", &[]), Ok(vec![Value::Integer(0)]));
    assert_eq!(
        call_method(&bridge, wrapper, "total", &[Value::from(2), Value::from(40)]),
        Ok(vec![Value::Integer(42)])
    );

    let err = expect_bridge_error(call_method(&bridge, wrapper, "total", &[Value::from(1)]));
    assert_eq!(
        err,
        BridgeError::MethodNotFound {
            name: "total".into(),
            arg_count: 1
        }
    );
}

#[test]
fn test_native_failure_is_invocation_error() {
    let bridge = bridge();
    let calc = bridge.host().insert(Calculator::new("calc"));
    let wrapper = bridge.expose(calc, &ExposeOptions::default()).unwrap();

    let err = expect_bridge_error(call_method(&bridge, wrapper, "fail", &[]));
    assert!(err.is_invocation_error());

    // the next call is unaffected
    assert_eq!(call_method(&bridge, wrapper, "total", &[]), Ok(vec![Value::Integer(0)]));
}

#[test]
fn test_invoking_event_member_emits_it() {
    let bridge = bridge();
    let calc = bridge.host().insert(Calculator::new("calc"));
    let wrapper = bridge.expose(calc, &ExposeOptions::default()).unwrap();
    let (callback, seen) = recorder(&bridge);
    bridge.connect(calc, "changed(int)", callback).unwrap();

    assert_eq!(call_method(&bridge, wrapper, "changed", &[Value::from(3)]), Ok(vec![]));
    assert_eq!(*seen.borrow(), vec![Value::Integer(3)]);
}

// ============================================================================
// Exposure
// ============================================================================

#[test]
fn test_wrapper_contents() {
    let bridge = bridge();
    let calc = bridge.host().insert(Calculator::new("calc"));
    let wrapper = bridge.expose(calc, &ExposeOptions::named("calc")).unwrap();
    let script = bridge.script();

    assert_eq!(script.global("calc"), Value::Table(wrapper));
    assert_eq!(script.get_field(wrapper, "name"), Ok(Value::from("calc")));
    assert_eq!(script.get_field(wrapper, "value"), Ok(Value::Integer(0)));
    assert_eq!(marshal::object_identity_of(script, &Value::Table(wrapper)), Some(calc));
    assert!(script.get_field(wrapper, "echo_map").unwrap().as_function().is_some());
}

#[test]
fn test_properties_are_snapshots() {
    let bridge = bridge();
    let calc = bridge.host().insert(Calculator::new("calc"));
    let wrapper = bridge.expose(calc, &ExposeOptions::default()).unwrap();

    call_method(&bridge, wrapper, "set", &[Value::from(9)]).unwrap();
    assert_eq!(bridge.script().get_field(wrapper, "value"), Ok(Value::Integer(0)));
    assert_eq!(call_method(&bridge, wrapper, "total", &[]), Ok(vec![Value::Integer(9)]));
}

#[test]
fn test_filters_limit_exposed_members() {
    let bridge = bridge();
    let calc = bridge.host().insert(Calculator::new("calc"));
    let options = ExposeOptions::default()
        .with_method_names(["total", "set", "changed"])
        .with_method_kinds(MethodKinds::METHOD | MethodKinds::SLOT);
    let wrapper = bridge.expose(calc, &options).unwrap();
    let script = bridge.script();

    assert!(script.get_field(wrapper, "total").unwrap().as_function().is_some());
    assert!(script.get_field(wrapper, "set").unwrap().as_function().is_some());
    assert_eq!(script.get_field(wrapper, "changed"), Ok(Value::Nil));
    assert_eq!(script.get_field(wrapper, "spawn"), Ok(Value::Nil));
}

#[test]
fn test_signature_mapper_names_overloads_apart() {
    let bridge = bridge();
    let calc = bridge.host().insert(Calculator::new("calc"));
    let options = ExposeOptions::default().with_mapper(|signature: &str| {
        signature.replace(['(', ')'], "_").replace(',', "_")
    });
    let wrapper = bridge.expose(calc, &options).unwrap();

    assert_eq!(
        call_method(&bridge, wrapper, "total_int_int_", &[Value::from(1), Value::from(2)]),
        Ok(vec![Value::Integer(3)])
    );
    assert_eq!(bridge.script().get_field(wrapper, "total"), Ok(Value::Nil));
}

#[test]
fn test_exposure_is_atomic() {
    let bridge = bridge();
    let transform = bridge.host().insert(Transform::new());
    let tables = bridge.script().table_count();

    let err = bridge
        .expose(transform, &ExposeOptions::named("transform"))
        .unwrap_err();
    assert_eq!(err, BridgeError::UnknownType { tag: "matrix".into() });
    assert!(!bridge.lifecycle().is_exposed(transform));
    assert_eq!(bridge.script().global("transform"), Value::Nil);
    assert_eq!(bridge.script().table_count(), tables);
}

#[test]
fn test_cached_exposure_returns_same_wrapper() {
    let bridge = bridge();
    let calc = bridge.host().insert(Calculator::new("calc"));
    let options = ExposeOptions::default().with_cache(true);

    let first = bridge.expose(calc, &options).unwrap();
    let second = bridge.expose(calc, &options.clone().with_name("again")).unwrap();
    assert_eq!(first, second);
    assert_eq!(bridge.script().global("again"), Value::Table(first));

    bridge.script().collect();
    assert!(bridge.script().is_alive(&Value::Table(first)));

    assert!(bridge.remove(calc));
    assert_eq!(bridge.script().registry_len(), 0);
    assert_eq!(bridge.lifecycle().cached_wrapper(calc), None);
    assert!(bridge.host().contains(calc));
}

#[test]
fn test_uncached_exposure_builds_independent_wrappers() {
    let bridge = bridge();
    let calc = bridge.host().insert(Calculator::new("calc"));
    let first = bridge.expose(calc, &ExposeOptions::default()).unwrap();
    let second = bridge.expose(calc, &ExposeOptions::default()).unwrap();
    assert_ne!(first, second);

    // both wrappers keep dispatching
    assert_eq!(call_method(&bridge, first, "total", &[]), Ok(vec![Value::Integer(0)]));
    assert_eq!(call_method(&bridge, second, "total", &[]), Ok(vec![Value::Integer(0)]));
}

// ============================================================================
// Lifetime
// ============================================================================

#[test]
fn test_immediate_delete_on_collect() {
    let bridge = bridge();
    let calc = bridge.host().insert(Calculator::new("calc"));
    bridge
        .expose(calc, &ExposeOptions::default().with_delete_mode(DeleteMode::Immediate))
        .unwrap();

    let stats = bridge.script().collect();
    assert_eq!(stats.finalized, 1);
    assert!(!bridge.host().contains(calc));
    assert!(!bridge.lifecycle().is_exposed(calc));
}

#[test]
fn test_deferred_delete_on_collect() {
    let bridge = bridge();
    let calc = bridge.host().insert(Calculator::new("calc"));
    bridge
        .expose(calc, &ExposeOptions::default().with_delete_mode(DeleteMode::Later))
        .unwrap();

    bridge.script().collect();
    assert!(bridge.host().contains(calc));
    assert_eq!(bridge.host().pending_deletes(), 1);
    bridge.host().process_deferred_deletes();
    assert!(!bridge.host().contains(calc));
}

#[test]
fn test_no_delete_keeps_object() {
    let bridge = bridge();
    let calc = bridge.host().insert(Calculator::new("calc"));
    bridge.expose(calc, &ExposeOptions::default()).unwrap();

    let stats = bridge.script().collect();
    assert_eq!(stats.finalized, 0);
    assert!(bridge.host().contains(calc));
}

#[test]
fn test_double_exposure_with_immediate_delete_destroys_once() {
    let bridge = bridge();
    let calc = bridge.host().insert(Calculator::new("calc"));
    let options = ExposeOptions::default().with_delete_mode(DeleteMode::Immediate);
    bridge.expose(calc, &options).unwrap();
    bridge.expose(calc, &options).unwrap();
    let other = bridge.host().insert(Calculator::new("other"));

    let stats = bridge.script().collect();
    assert_eq!(stats.finalized, 2);
    assert!(!bridge.host().contains(calc));
    assert!(bridge.host().contains(other));
}

#[test]
fn test_calls_on_destroyed_object_fail() {
    let bridge = bridge();
    let calc = bridge.host().insert(Calculator::new("calc"));
    let wrapper = bridge.expose(calc, &ExposeOptions::named("calc")).unwrap();
    bridge.host().destroy(calc);

    let err = expect_bridge_error(call_method(&bridge, wrapper, "total", &[]));
    assert!(err.is_invocation_error());
}

// ============================================================================
// Returned objects
// ============================================================================

#[test]
fn test_returned_object_is_wrapped() {
    let bridge = bridge();
    let calc = bridge.host().insert(Calculator::new("calc"));
    let wrapper = bridge.expose(calc, &ExposeOptions::named("calc")).unwrap();

    let result = call_method(&bridge, wrapper, "spawn", &[]).unwrap();
    let child = result[0].as_table().expect("child wrapper");
    let child_id = marshal::object_identity_of(bridge.script(), &result[0]).expect("identity");
    assert!(bridge.host().contains(child_id));
    assert_eq!(bridge.script().get_field(child, "name"), Ok(Value::from("child")));
    assert_eq!(
        call_method(&bridge, child, "total", &[Value::from(1), Value::from(1)]),
        Ok(vec![Value::Integer(2)])
    );
}

#[test]
fn test_ownership_toggle_from_script() {
    let bridge = bridge();
    let calc = bridge.host().insert(Calculator::new("calc"));
    let wrapper = bridge.expose(calc, &ExposeOptions::named("calc")).unwrap();
    let namespace = bridge.script().global("bridge").as_table().unwrap();
    let own = bridge.script().get_field(namespace, "own_objects").unwrap();

    bridge.script().call_function(&own, &[Value::Boolean(true)]).unwrap();
    let result = call_method(&bridge, wrapper, "spawn", &[]).unwrap();
    let child = marshal::object_identity_of(bridge.script(), &result[0]).unwrap();
    drop(result);

    bridge.script().collect();
    assert!(!bridge.host().contains(child));
    assert!(bridge.host().contains(calc));
}

#[test]
fn test_cached_returned_objects_are_reused() {
    let config = BridgeConfig::default().with_cache_returned_objects(true);
    let bridge = Bridge::with_config(ScriptState::new(), HostRuntime::new(), config).unwrap();
    let calc = bridge.host().insert(Calculator::new("calc"));
    let wrapper = bridge.expose(calc, &ExposeOptions::named("calc")).unwrap();

    let result = call_method(&bridge, wrapper, "spawn", &[]).unwrap();
    let child = marshal::object_identity_of(bridge.script(), &result[0]).unwrap();
    assert_eq!(bridge.lifecycle().cached_wrapper(child), result[0].as_table());
}

// ============================================================================
// Events
// ============================================================================

#[test]
fn test_one_slot_per_function() {
    let bridge = bridge();
    let calc = bridge.host().insert(Calculator::new("calc"));
    let (callback, seen) = recorder(&bridge);

    bridge.connect(calc, "changed(int)", callback).unwrap();
    bridge.connect(calc, "renamed(string)", callback).unwrap();
    assert_eq!(bridge.callbacks().slot_count(), 1);
    assert_eq!(bridge.host().connection_count(), 2);

    bridge.host().emit(calc, calculator::CHANGED, &[NativeValue::Int(1)]).unwrap();
    bridge
        .host()
        .emit(calc, calculator::RENAMED, &[NativeValue::Text("x".into())])
        .unwrap();
    assert_eq!(*seen.borrow(), vec![Value::Integer(1), Value::from("x")]);
}

#[test]
fn test_connecting_twice_to_same_event_fires_twice() {
    let bridge = bridge();
    let calc = bridge.host().insert(Calculator::new("calc"));
    let (callback, seen) = recorder(&bridge);

    bridge.connect(calc, "changed(int)", callback).unwrap();
    bridge.connect(calc, "changed(int)", callback).unwrap();
    bridge.host().emit(calc, calculator::CHANGED, &[NativeValue::Int(5)]).unwrap();
    assert_eq!(seen.borrow().len(), 2);
}

#[test]
fn test_disconnect_preserves_slot_count() {
    let bridge = bridge();
    let calc = bridge.host().insert(Calculator::new("calc"));
    let functions: Vec<FunctionRef> = (0..3).map(|_| recorder(&bridge).0).collect();
    for &f in &functions {
        bridge.connect(calc, "changed(int)", f).unwrap();
    }
    assert_eq!(bridge.host().connection_count(), 3);

    for &f in &functions[..2] {
        assert_eq!(bridge.disconnect(calc, "changed(int)", f), Ok(1));
    }
    assert_eq!(bridge.host().connection_count(), 1);
    assert_eq!(bridge.callbacks().slot_count(), 3);
}

#[test]
fn test_event_object_argument_is_wrapped() {
    let bridge = bridge();
    let calc = bridge.host().insert(Calculator::new("calc"));
    let wrapper = bridge.expose(calc, &ExposeOptions::default()).unwrap();
    let (callback, seen) = recorder(&bridge);
    bridge.connect(calc, "spawned(object)", callback).unwrap();

    call_method(&bridge, wrapper, "spawn", &[]).unwrap();
    let arg = seen.borrow()[0].clone();
    let child = arg.as_table().expect("wrapped child");
    assert_eq!(call_method(&bridge, child, "total", &[]), Ok(vec![Value::Integer(0)]));
}

#[test]
fn test_event_object_arguments_are_never_cached() {
    let config = BridgeConfig::default().with_cache_returned_objects(true);
    let bridge = Bridge::with_config(ScriptState::new(), HostRuntime::new(), config).unwrap();
    let calc = bridge.host().insert(Calculator::new("calc"));
    let other = bridge.host().insert(Calculator::new("other"));
    let (callback, seen) = recorder(&bridge);
    bridge.connect(calc, "spawned(object)", callback).unwrap();

    bridge
        .host()
        .emit(calc, calculator::SPAWNED, &[NativeValue::Object(Some(other))])
        .unwrap();
    assert!(seen.borrow()[0].as_table().is_some());
    assert_eq!(bridge.lifecycle().cached_wrapper(other), None);
    assert_eq!(bridge.lifecycle().delete_mode(other), Some(DeleteMode::NoDelete));

    seen.borrow_mut().clear();
    bridge.script().collect();
    assert!(bridge.host().contains(other));
}

#[test]
fn test_destroyed_source_drops_script_connections() {
    let bridge = bridge();
    let calc = bridge.host().insert(Calculator::new("calc"));
    let (callback, seen) = recorder(&bridge);
    let refs = bridge.script().registry_len();
    bridge.connect(calc, "changed(int)", callback).unwrap();
    assert_eq!(bridge.script().registry_len(), refs + 1);

    assert!(bridge.host().destroy(calc));
    assert_eq!(bridge.host().connection_count(), 0);
    assert_eq!(bridge.callbacks().connection_count(), 0);
    assert_eq!(bridge.callbacks().slot_count(), 1);
    assert_eq!(bridge.script().registry_len(), refs);

    let next = bridge.host().insert(Calculator::new("next"));
    assert_eq!(bridge.connect(next, "changed(int)", callback), Ok(0));
    bridge.host().emit(next, calculator::CHANGED, &[NativeValue::Int(2)]).unwrap();
    assert_eq!(*seen.borrow(), vec![Value::Integer(2)]);
}

#[test]
fn test_callback_failure_does_not_reach_emitter() {
    let bridge = bridge();
    let calc = bridge.host().insert(Calculator::new("calc"));
    let wrapper = bridge.expose(calc, &ExposeOptions::default()).unwrap();
    let failing = bridge
        .script()
        .create_function(|_: &mut CallContext<'_>| Err(ScriptError::runtime("callback broke")));
    let (after, seen) = recorder(&bridge);
    bridge.connect(calc, "changed(int)", failing).unwrap();
    bridge.connect(calc, "changed(int)", after).unwrap();

    assert_eq!(call_method(&bridge, wrapper, "set", &[Value::from(4)]), Ok(vec![]));
    assert_eq!(*seen.borrow(), vec![Value::Integer(4)]);
}

#[test]
fn test_callback_may_reenter_the_bridge() {
    let bridge = bridge();
    let calc = bridge.host().insert(Calculator::new("calc"));
    let wrapper = bridge.expose(calc, &ExposeOptions::named("calc")).unwrap();
    let totals = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&totals);
    let callback = bridge.script().create_function(move |ctx: &mut CallContext<'_>| {
        let state = ctx.state();
        let calc = state
            .global("calc")
            .as_table()
            .ok_or_else(|| ScriptError::runtime("calc is not exposed"))?;
        let total = state.get_field(calc, "total")?;
        sink.borrow_mut().extend(state.call_function(&total, &[])?);
        Ok(0)
    });
    bridge.connect(calc, "changed(int)", callback).unwrap();

    assert_eq!(call_method(&bridge, wrapper, "set", &[Value::from(11)]), Ok(vec![]));
    assert_eq!(*totals.borrow(), vec![Value::Integer(11)]);
}

#[test]
fn test_script_connects_event_to_host_slot() {
    let bridge = bridge();
    let receiver = Rc::new(Calculator::new("receiver"));
    let source = bridge.host().insert(Calculator::new("source"));
    let target = bridge.host().insert_rc(receiver.clone());
    let source_wrapper = bridge.expose(source, &ExposeOptions::default()).unwrap();
    let namespace = bridge.script().global("bridge").as_table().unwrap();
    let connect = bridge.script().get_field(namespace, "connect").unwrap();

    bridge
        .script()
        .call_function(
            &connect,
            &[
                Value::Table(source_wrapper),
                Value::from("changed(int)"),
                Value::LightUserData(target.to_bits()),
                Value::from("receive(int)"),
            ],
        )
        .unwrap();
    call_method(&bridge, source_wrapper, "set", &[Value::from(6)]).unwrap();
    assert_eq!(*receiver.received.borrow(), vec![6]);
}

// ============================================================================
// Structured values
// ============================================================================

#[test]
fn test_map_round_trip_through_method() {
    let bridge = bridge();
    let calc = bridge.host().insert(Calculator::new("calc"));
    let wrapper = bridge.expose(calc, &ExposeOptions::default()).unwrap();
    let script = bridge.script();

    let input = script.create_table();
    script.set_field(input, "a", Value::from(1)).unwrap();
    script.set_field(input, "b", Value::from("x")).unwrap();
    let result = call_method(&bridge, wrapper, "echo_map", &[Value::Table(input)]).unwrap();
    let output = result[0].as_table().unwrap();
    assert_eq!(script.get_field(output, "a"), Ok(Value::Integer(1)));
    assert_eq!(script.get_field(output, "b"), Ok(Value::from("x")));
}

#[test]
fn test_short_sequence_round_trip_through_method() {
    let bridge = bridge();
    let calc = bridge.host().insert(Calculator::new("calc"));
    let wrapper = bridge.expose(calc, &ExposeOptions::default()).unwrap();
    let script = bridge.script();

    let input = script.create_table();
    for i in 1..=3i32 {
        script.raw_set(input, Value::from(i), Value::from(i)).unwrap();
    }
    let result = call_method(&bridge, wrapper, "echo_shorts", &[Value::Table(input)]).unwrap();
    let output = result[0].as_table().unwrap();
    assert_eq!(script.raw_len(output), Ok(3));
    for i in 1..=3i32 {
        assert_eq!(script.raw_get(output, &Value::from(i)), Ok(Value::Integer(i64::from(i))));
    }
}

#[test]
fn test_unsupported_nested_value_degrades() {
    let bridge = bridge();
    let calc = bridge.host().insert(Calculator::new("calc"));
    let wrapper = bridge.expose(calc, &ExposeOptions::default()).unwrap();
    let script = bridge.script();

    let nested = script.create_table();
    let function = script.create_function(|_: &mut CallContext<'_>| Ok(0));
    script.set_field(nested, "f", Value::Function(function)).unwrap();
    script.set_field(nested, "n", Value::from(2)).unwrap();
    let input = script.create_table();
    script.set_field(input, "nested", Value::Table(nested)).unwrap();

    let result = call_method(&bridge, wrapper, "echo_map", &[Value::Table(input)]).unwrap();
    let output = result[0].as_table().unwrap();
    let echoed = script.get_field(output, "nested").unwrap().as_table().unwrap();
    assert_eq!(script.get_field(echoed, "f"), Ok(Value::Nil));
    assert_eq!(script.get_field(echoed, "n"), Ok(Value::Integer(2)));
}

// ============================================================================
// Round-trip properties
// ============================================================================

fn variant() -> impl Strategy<Value = Variant> {
    let leaf = prop_oneof![
        any::<bool>().prop_map(Variant::Bool),
        any::<i32>().prop_map(Variant::Int),
        (-1.0e9..1.0e9f64).prop_map(Variant::Double),
        "[a-z ]{0,12}".prop_map(Variant::String),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 1..4).prop_map(Variant::List),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..4).prop_map(Variant::Map),
        ]
    })
}

fn round_trip(tag: &str, value: NativeValue) -> NativeValue {
    let state = ScriptState::new();
    let marshaller = TypeMarshaller::global();
    marshaller
        .build_outgoing(tag)
        .unwrap()
        .write(&state, &value)
        .unwrap();
    marshaller.build_incoming(tag).unwrap().read(&state, -1).unwrap()
}

proptest! {
    #[test]
    fn prop_map_round_trip(map in prop::collection::btree_map("[a-z]{1,6}", variant(), 0..5)) {
        let value = NativeValue::Map(map);
        prop_assert_eq!(round_trip("map", value.clone()), value);
    }

    #[test]
    fn prop_list_round_trip(list in prop::collection::vec(variant(), 0..5)) {
        let value = NativeValue::List(list);
        prop_assert_eq!(round_trip("list", value.clone()), value);
    }

    #[test]
    fn prop_short_sequence_round_trip(items in prop::collection::vec(any::<i16>(), 0..16)) {
        let value = NativeValue::ShortSeq(items);
        prop_assert_eq!(round_trip("list<short>", value.clone()), value);
    }

    #[test]
    fn prop_int_vector_round_trip(items in prop::collection::vec(any::<i32>(), 0..16)) {
        let value = NativeValue::IntSeq(items);
        prop_assert_eq!(round_trip("vector<int>", value.clone()), value);
    }

    #[test]
    fn prop_double_sequence_round_trip(items in prop::collection::vec(-1.0e12..1.0e12f64, 0..16)) {
        let value = NativeValue::DoubleSeq(items);
        prop_assert_eq!(round_trip("vector<double>", value.clone()), value);
    }

    #[test]
    fn prop_string_list_round_trip(items in prop::collection::vec("[a-zA-Z0-9 ]{0,10}", 0..8)) {
        let value = NativeValue::StringList(items);
        prop_assert_eq!(round_trip("string_list", value.clone()), value);
    }

    #[test]
    fn prop_scalar_round_trip(i in any::<i32>(), d in -1.0e12..1.0e12f64, s in "\\PC{0,16}") {
        prop_assert_eq!(round_trip("int", NativeValue::Int(i)), NativeValue::Int(i));
        prop_assert_eq!(round_trip("double", NativeValue::Double(d)), NativeValue::Double(d));
        prop_assert_eq!(round_trip("string", NativeValue::Text(s.clone())), NativeValue::Text(s));
    }
}
