//! Type-tag driven value marshalling.
//!
//! The marshalling vocabulary is a closed set of type tags, one per
//! [`MarshalKind`]. [`TypeMarshaller`] resolves a tag once, at exposure or
//! connection time, into a bound converter:
//!
//! - [`ValueConstructor`] (incoming): decodes the script value at a stack
//!   position into a fresh [`NativeValue`] for each call
//! - [`ValueProducer`] (outgoing): pushes a native value, either an owned
//!   [`NativeValue`] or an untyped reference taken from a raw event argument
//!   block
//!
//! Structured values use the script table as wire format: consecutive
//! integer keys from 1 denote a list, anything else a map with stringified
//! keys. Values with no structured counterpart (functions, nested depth
//! beyond [`MAX_NESTING`]) degrade to [`Variant::Invalid`] instead of
//! failing the whole conversion.

use std::any::Any;
use std::sync::OnceLock;

use rustc_hash::FxHashMap;

use metabridge_core::{
    BridgeError, MarshalError, NativeValue, ObjectId, TypeHash, Variant, VariantList, VariantMap,
};
use metabridge_script::{ScriptState, TableRef, Value};

/// Name of the hidden wrapper field holding the object identity.
pub const IDENTITY_FIELD: &str = "__object";

/// Nesting depth beyond which structured values degrade to placeholders.
pub const MAX_NESTING: usize = 64;

/// One marshallable native type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarshalKind {
    Int,
    Float,
    Double,
    Text,
    Map,
    List,
    /// Plain object identity
    Object,
    /// Specialized (visual) object identity
    Widget,
    Pointer,
    DoubleList,
    FloatList,
    IntList,
    ShortList,
    DoubleVector,
    FloatVector,
    IntVector,
    ShortVector,
    StringList,
    /// No value; outgoing only
    Void,
}

impl MarshalKind {
    /// Every kind, in registration order.
    pub const ALL: [MarshalKind; 19] = [
        MarshalKind::Int,
        MarshalKind::Float,
        MarshalKind::Double,
        MarshalKind::Text,
        MarshalKind::Map,
        MarshalKind::List,
        MarshalKind::Object,
        MarshalKind::Widget,
        MarshalKind::Pointer,
        MarshalKind::DoubleList,
        MarshalKind::FloatList,
        MarshalKind::IntList,
        MarshalKind::ShortList,
        MarshalKind::DoubleVector,
        MarshalKind::FloatVector,
        MarshalKind::IntVector,
        MarshalKind::ShortVector,
        MarshalKind::StringList,
        MarshalKind::Void,
    ];

    /// The type tag naming this kind.
    pub fn tag(self) -> &'static str {
        match self {
            MarshalKind::Int => "int",
            MarshalKind::Float => "float",
            MarshalKind::Double => "double",
            MarshalKind::Text => "string",
            MarshalKind::Map => "map",
            MarshalKind::List => "list",
            MarshalKind::Object => "object",
            MarshalKind::Widget => "widget",
            MarshalKind::Pointer => "pointer",
            MarshalKind::DoubleList => "list<double>",
            MarshalKind::FloatList => "list<float>",
            MarshalKind::IntList => "list<int>",
            MarshalKind::ShortList => "list<short>",
            MarshalKind::DoubleVector => "vector<double>",
            MarshalKind::FloatVector => "vector<float>",
            MarshalKind::IntVector => "vector<int>",
            MarshalKind::ShortVector => "vector<short>",
            MarshalKind::StringList => "string_list",
            MarshalKind::Void => "",
        }
    }

    /// Object identities are auto-wrapped on the way out.
    pub fn is_object(self) -> bool {
        matches!(self, MarshalKind::Object | MarshalKind::Widget)
    }

    pub fn is_void(self) -> bool {
        self == MarshalKind::Void
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Process-wide registry of type tags.
///
/// Built once on first use and read-only afterwards.
#[derive(Debug)]
pub struct TypeMarshaller {
    by_tag: FxHashMap<TypeHash, MarshalKind>,
}

impl TypeMarshaller {
    /// The shared registry.
    pub fn global() -> &'static TypeMarshaller {
        static REGISTRY: OnceLock<TypeMarshaller> = OnceLock::new();
        REGISTRY.get_or_init(TypeMarshaller::new)
    }

    fn new() -> Self {
        let by_tag = MarshalKind::ALL
            .iter()
            .map(|&kind| (TypeHash::from_tag(kind.tag()), kind))
            .collect();
        Self { by_tag }
    }

    /// Resolve a tag, ignoring surrounding whitespace.
    pub fn resolve(&self, tag: &str) -> Result<MarshalKind, BridgeError> {
        let tag = tag.trim();
        self.by_tag
            .get(&TypeHash::from_tag(tag))
            .copied()
            .filter(|kind| kind.tag() == tag)
            .ok_or_else(|| BridgeError::UnknownType {
                tag: tag.to_string(),
            })
    }

    /// Build the incoming converter for a parameter tag.
    pub fn build_incoming(&self, tag: &str) -> Result<ValueConstructor, BridgeError> {
        match self.resolve(tag)? {
            MarshalKind::Void => Err(BridgeError::UnknownType {
                tag: tag.to_string(),
            }),
            kind => Ok(ValueConstructor { kind }),
        }
    }

    /// Build the outgoing converter for a return or event parameter tag.
    pub fn build_outgoing(&self, tag: &str) -> Result<ValueProducer, BridgeError> {
        Ok(ValueProducer {
            kind: self.resolve(tag)?,
        })
    }

    /// Every registered tag.
    pub fn tags(&self) -> impl Iterator<Item = &'static str> {
        MarshalKind::ALL.iter().map(|kind| kind.tag())
    }
}

// ============================================================================
// Incoming
// ============================================================================

/// Decodes script values of one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueConstructor {
    kind: MarshalKind,
}

impl ValueConstructor {
    pub fn kind(&self) -> MarshalKind {
        self.kind
    }

    /// Decode the value at a stack position of the current frame.
    pub fn read(&self, state: &ScriptState, position: i32) -> Result<NativeValue, BridgeError> {
        let value = state.get(position)?;
        self.decode(state, &value)
    }

    /// Decode a script value.
    pub fn decode(&self, state: &ScriptState, value: &Value) -> Result<NativeValue, BridgeError> {
        Ok(match self.kind {
            MarshalKind::Int => NativeValue::Int(to_i32(value)?),
            MarshalKind::Float => NativeValue::Float(to_f64(value)? as f32),
            MarshalKind::Double => NativeValue::Double(to_f64(value)?),
            MarshalKind::Text => NativeValue::Text(to_text(value)?),
            MarshalKind::Map => NativeValue::Map(table_to_map(state, expect_table(value)?)?),
            MarshalKind::List => NativeValue::List(table_to_list(state, expect_table(value)?)?),
            MarshalKind::Object | MarshalKind::Widget => NativeValue::Object(match value {
                Value::Nil => None,
                other => Some(object_identity_of(state, other).ok_or(MarshalError::TypeMismatch {
                    expected: "object",
                    actual: other.type_name(),
                })?),
            }),
            MarshalKind::Pointer => NativeValue::Pointer(match value {
                Value::Nil => 0,
                Value::LightUserData(p) => *p,
                other => {
                    return Err(MarshalError::TypeMismatch {
                        expected: "userdata",
                        actual: other.type_name(),
                    }
                    .into());
                }
            }),
            MarshalKind::DoubleList | MarshalKind::DoubleVector => {
                NativeValue::DoubleSeq(numbers(state, expect_table(value)?, |v| Ok(float_element(v)))?)
            }
            MarshalKind::FloatList | MarshalKind::FloatVector => {
                NativeValue::FloatSeq(numbers(state, expect_table(value)?, |v| Ok(float_element(v) as f32))?)
            }
            MarshalKind::IntList | MarshalKind::IntVector => {
                NativeValue::IntSeq(numbers(state, expect_table(value)?, |v| narrow(v, "int"))?)
            }
            MarshalKind::ShortList | MarshalKind::ShortVector => {
                NativeValue::ShortSeq(numbers(state, expect_table(value)?, |v| narrow(v, "short"))?)
            }
            MarshalKind::StringList => {
                let table = expect_table(value)?;
                let strings = state
                    .pairs(table)?
                    .iter()
                    .map(|(_, v)| to_text(v))
                    .collect::<Result<Vec<_>, _>>()?;
                NativeValue::StringList(strings)
            }
            MarshalKind::Void => NativeValue::Void,
        })
    }
}

fn expect_table(value: &Value) -> Result<TableRef, MarshalError> {
    value.as_table().ok_or(MarshalError::TypeMismatch {
        expected: "table",
        actual: value.type_name(),
    })
}

fn to_i32(value: &Value) -> Result<i32, MarshalError> {
    match value {
        Value::Integer(_) | Value::Number(_) => narrow(value, "int"),
        other => Err(MarshalError::TypeMismatch {
            expected: "number",
            actual: other.type_name(),
        }),
    }
}

/// Narrow a numeric value, rejecting anything out of range for `target`.
fn narrow<T: TryFrom<i64>>(value: &Value, target: &'static str) -> Result<T, MarshalError> {
    let wide = match value {
        Value::Integer(i) => *i,
        Value::Number(n) => *n as i64,
        _ => 0,
    };
    T::try_from(wide).map_err(|_| MarshalError::IntegerOverflow { value: wide, target })
}

fn to_f64(value: &Value) -> Result<f64, MarshalError> {
    value.as_number().ok_or(MarshalError::TypeMismatch {
        expected: "number",
        actual: value.type_name(),
    })
}

fn to_text(value: &Value) -> Result<String, MarshalError> {
    match value {
        Value::String(s) => Ok(s.to_string()),
        Value::Integer(i) => Ok(i.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(MarshalError::TypeMismatch {
            expected: "string",
            actual: other.type_name(),
        }),
    }
}

/// Read the sequence part of a table.
///
/// Non-numeric elements read as zero; integer elements out of range for
/// the element type fail with `IntegerOverflow`.
fn numbers<T>(
    state: &ScriptState,
    table: TableRef,
    convert: impl Fn(&Value) -> Result<T, MarshalError>,
) -> Result<Vec<T>, BridgeError> {
    let len = state.raw_len(table)?;
    let mut out = Vec::with_capacity(len);
    for i in 1..=len {
        let element = state.raw_get(table, &Value::Integer(i as i64))?;
        out.push(convert(&element)?);
    }
    Ok(out)
}

fn float_element(value: &Value) -> f64 {
    value.as_number().unwrap_or(0.0)
}

/// Extract the object identity from a wrapper table or a light userdata.
pub fn object_identity_of(state: &ScriptState, value: &Value) -> Option<ObjectId> {
    match value {
        Value::LightUserData(bits) => ObjectId::from_bits(*bits),
        Value::Table(table) => state
            .get_field(*table, IDENTITY_FIELD)
            .ok()?
            .as_light_userdata()
            .and_then(ObjectId::from_bits),
        _ => None,
    }
}

// ============================================================================
// Structured values
// ============================================================================

/// Convert any script value into a variant.
///
/// Nested tables become lists when their keys are exactly `1..=n` and maps
/// otherwise; an empty nested table becomes an empty map.
pub fn value_to_variant(state: &ScriptState, value: &Value) -> Result<Variant, BridgeError> {
    nested_variant(state, value, 0)
}

fn nested_variant(state: &ScriptState, value: &Value, depth: usize) -> Result<Variant, BridgeError> {
    Ok(match value {
        Value::Boolean(b) => Variant::Bool(*b),
        Value::Integer(i) => match i32::try_from(*i) {
            Ok(small) => Variant::Int(small),
            Err(_) => Variant::LongLong(*i),
        },
        Value::Number(n) => Variant::Double(*n),
        Value::String(s) => Variant::String(s.to_string()),
        Value::LightUserData(p) => Variant::Pointer(*p),
        Value::Table(_) if depth >= MAX_NESTING => Variant::Invalid,
        Value::Table(t) => {
            if is_sequence(state, *t)? {
                Variant::List(list_entries(state, *t, depth + 1)?)
            } else {
                Variant::Map(map_entries(state, *t, depth + 1)?)
            }
        }
        Value::Nil | Value::Function(_) => Variant::Invalid,
    })
}

fn is_sequence(state: &ScriptState, table: TableRef) -> Result<bool, BridgeError> {
    let len = state.raw_len(table)?;
    Ok(len > 0 && state.pairs(table)?.len() == len)
}

/// Read a table as a map; keys are stringified.
pub fn table_to_map(state: &ScriptState, table: TableRef) -> Result<VariantMap, BridgeError> {
    map_entries(state, table, 0)
}

/// Read a table's values, in iteration order, as a list.
pub fn table_to_list(state: &ScriptState, table: TableRef) -> Result<VariantList, BridgeError> {
    list_entries(state, table, 0)
}

fn map_entries(state: &ScriptState, table: TableRef, depth: usize) -> Result<VariantMap, BridgeError> {
    let mut map = VariantMap::new();
    for (key, value) in state.pairs(table)? {
        map.insert(key_to_string(&key), nested_variant(state, &value, depth)?);
    }
    Ok(map)
}

fn list_entries(state: &ScriptState, table: TableRef, depth: usize) -> Result<VariantList, BridgeError> {
    state
        .pairs(table)?
        .iter()
        .map(|(_, value)| nested_variant(state, value, depth))
        .collect()
}

fn key_to_string(key: &Value) -> String {
    match key {
        Value::String(s) => s.to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

/// Convert a variant into a script value.
///
/// `Invalid` becomes nil, so it vanishes from the enclosing table.
pub fn variant_to_value(state: &ScriptState, variant: &Variant) -> Result<Value, BridgeError> {
    Ok(match variant {
        Variant::Invalid => Value::Nil,
        Variant::Bool(b) => Value::Boolean(*b),
        Variant::Int(i) => Value::Integer(i64::from(*i)),
        Variant::UInt(u) => Value::Integer(i64::from(*u)),
        Variant::LongLong(i) => Value::Integer(*i),
        Variant::ULongLong(u) => match i64::try_from(*u) {
            Ok(i) => Value::Integer(i),
            Err(_) => Value::Number(*u as f64),
        },
        Variant::Double(d) => Value::Number(*d),
        Variant::String(s) => Value::from(s.as_str()),
        Variant::Pointer(p) => Value::LightUserData(*p),
        Variant::List(list) => Value::Table(list_to_table(state, list)?),
        Variant::Map(map) => Value::Table(map_to_table(state, map)?),
    })
}

fn list_to_table(state: &ScriptState, list: &[Variant]) -> Result<TableRef, BridgeError> {
    let table = state.create_table();
    for (i, item) in list.iter().enumerate() {
        state.raw_set(table, Value::Integer(i as i64 + 1), variant_to_value(state, item)?)?;
    }
    Ok(table)
}

fn map_to_table(state: &ScriptState, map: &VariantMap) -> Result<TableRef, BridgeError> {
    let table = state.create_table();
    for (key, item) in map {
        state.raw_set(table, Value::from(key.as_str()), variant_to_value(state, item)?)?;
    }
    Ok(table)
}

fn sequence_to_table<T: Copy>(
    state: &ScriptState,
    items: &[T],
    to_value: impl Fn(T) -> Value,
) -> Result<TableRef, BridgeError> {
    let table = state.create_table();
    for (i, item) in items.iter().enumerate() {
        state.raw_set(table, Value::Integer(i as i64 + 1), to_value(*item))?;
    }
    Ok(table)
}

// ============================================================================
// Outgoing
// ============================================================================

/// Pushes native values of one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueProducer {
    kind: MarshalKind,
}

impl ValueProducer {
    pub fn kind(&self) -> MarshalKind {
        self.kind
    }

    /// Push an owned native value; returns the number of values pushed.
    pub fn write(&self, state: &ScriptState, value: &NativeValue) -> Result<usize, BridgeError> {
        self.write_from(state, value.as_any())
    }

    /// Push the value behind an untyped reference; returns the number of
    /// values pushed (0 for void, 1 otherwise).
    ///
    /// Object identities are pushed as light userdata; callers that want a
    /// wrapper go through the lifecycle manager instead.
    pub fn write_from(&self, state: &ScriptState, raw: &dyn Any) -> Result<usize, BridgeError> {
        let value = match self.kind {
            MarshalKind::Void => return Ok(0),
            MarshalKind::Int => Value::Integer(i64::from(*downcast::<i32>(raw, "int")?)),
            MarshalKind::Float => Value::Number(f64::from(*downcast::<f32>(raw, "float")?)),
            MarshalKind::Double => Value::Number(*downcast::<f64>(raw, "double")?),
            MarshalKind::Text => Value::from(downcast::<String>(raw, "string")?.as_str()),
            MarshalKind::Map => Value::Table(map_to_table(state, downcast(raw, "map")?)?),
            MarshalKind::List => {
                Value::Table(list_to_table(state, downcast::<VariantList>(raw, "list")?)?)
            }
            MarshalKind::Object | MarshalKind::Widget => match object_identity(raw)? {
                Some(id) => Value::LightUserData(id.to_bits()),
                None => Value::Nil,
            },
            MarshalKind::Pointer => Value::LightUserData(*downcast::<u64>(raw, "pointer")?),
            MarshalKind::DoubleList | MarshalKind::DoubleVector => Value::Table(sequence_to_table(
                state,
                downcast::<Vec<f64>>(raw, "double sequence")?,
                Value::Number,
            )?),
            MarshalKind::FloatList | MarshalKind::FloatVector => Value::Table(sequence_to_table(
                state,
                downcast::<Vec<f32>>(raw, "float sequence")?,
                |f| Value::Number(f64::from(f)),
            )?),
            MarshalKind::IntList | MarshalKind::IntVector => Value::Table(sequence_to_table(
                state,
                downcast::<Vec<i32>>(raw, "int sequence")?,
                |i| Value::Integer(i64::from(i)),
            )?),
            MarshalKind::ShortList | MarshalKind::ShortVector => Value::Table(sequence_to_table(
                state,
                downcast::<Vec<i16>>(raw, "short sequence")?,
                |i| Value::Integer(i64::from(i)),
            )?),
            MarshalKind::StringList => {
                let strings = downcast::<Vec<String>>(raw, "string list")?;
                let table = state.create_table();
                for (i, s) in strings.iter().enumerate() {
                    state.raw_set(table, Value::Integer(i as i64 + 1), Value::from(s.as_str()))?;
                }
                Value::Table(table)
            }
        };
        state.push(value);
        Ok(1)
    }
}

fn downcast<'a, T: 'static>(raw: &'a dyn Any, expected: &'static str) -> Result<&'a T, MarshalError> {
    raw.downcast_ref::<T>()
        .ok_or(MarshalError::RawTypeMismatch { expected })
}

/// Read an object identity from a raw argument.
///
/// Accepts `Option<ObjectId>` (the native value payload) or a bare `ObjectId`.
pub fn object_identity(raw: &dyn Any) -> Result<Option<ObjectId>, MarshalError> {
    if let Some(id) = raw.downcast_ref::<Option<ObjectId>>() {
        return Ok(*id);
    }
    raw.downcast_ref::<ObjectId>()
        .map(|id| Some(*id))
        .ok_or(MarshalError::RawTypeMismatch { expected: "object" })
}
