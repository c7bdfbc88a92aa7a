//! Script values and table keys.

use std::fmt;
use std::rc::Rc;

use ordered_float::OrderedFloat;

use metabridge_core::ScriptError;

use crate::heap::Handle;

/// Handle to a table in the script heap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableRef {
    index: u32,
    generation: u32,
}

/// Handle to a function in the script heap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionRef {
    index: u32,
    generation: u32,
}

macro_rules! impl_handle {
    ($($ty:ty),*) => {
        $(
            impl Handle for $ty {
                fn new(index: u32, generation: u32) -> Self {
                    Self { index, generation }
                }

                fn index(self) -> u32 {
                    self.index
                }

                fn generation(self) -> u32 {
                    self.generation
                }
            }
        )*
    };
}

impl_handle!(TableRef, FunctionRef);

/// A dynamically typed script value.
///
/// Tables and functions are compared by identity.
#[derive(Clone, Default, PartialEq)]
pub enum Value {
    #[default]
    Nil,
    Boolean(bool),
    Integer(i64),
    Number(f64),
    String(Rc<str>),
    Table(TableRef),
    Function(FunctionRef),
    /// Opaque pointer-sized value
    LightUserData(u64),
}

impl Value {
    /// Get a human-readable type name for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) | Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Table(_) => "table",
            Value::Function(_) => "function",
            Value::LightUserData(_) => "userdata",
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Everything except nil and false is true.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Boolean(false))
    }

    pub fn as_table(&self) -> Option<TableRef> {
        match self {
            Value::Table(t) => Some(*t),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<FunctionRef> {
        match self {
            Value::Function(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric value as a float.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Numeric value as an integer; floats must be integral.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Number(n) => float_to_integer(*n),
            _ => None,
        }
    }

    pub fn as_light_userdata(&self) -> Option<u64> {
        match self {
            Value::LightUserData(p) => Some(*p),
            _ => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Number(n) => write!(f, "{n:?}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Table(t) => write!(f, "table({}:{})", t.index, t.generation),
            Value::Function(func) => write!(f, "function({}:{})", func.index, func.generation),
            Value::LightUserData(p) => write!(f, "userdata({p:#x})"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(Rc::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(Rc::from(v))
    }
}

impl From<TableRef> for Value {
    fn from(v: TableRef) -> Self {
        Value::Table(v)
    }
}

impl From<FunctionRef> for Value {
    fn from(v: FunctionRef) -> Self {
        Value::Function(v)
    }
}

fn float_to_integer(n: f64) -> Option<i64> {
    if n.fract() == 0.0 && n >= i64::MIN as f64 && n < i64::MAX as f64 {
        Some(n as i64)
    } else {
        None
    }
}

/// A table key: any value except nil and NaN.
///
/// Integral floats are normalized to integers so `t[1]` and `t[1.0]` name
/// the same entry.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Key {
    Boolean(bool),
    Integer(i64),
    Number(OrderedFloat<f64>),
    String(Rc<str>),
    Table(TableRef),
    Function(FunctionRef),
    LightUserData(u64),
}

impl Key {
    pub(crate) fn from_value(value: &Value) -> Result<Key, ScriptError> {
        Ok(match value {
            Value::Nil => return Err(ScriptError::InvalidKey("nil")),
            Value::Boolean(b) => Key::Boolean(*b),
            Value::Integer(i) => Key::Integer(*i),
            Value::Number(n) if n.is_nan() => return Err(ScriptError::InvalidKey("NaN")),
            Value::Number(n) => match float_to_integer(*n) {
                Some(i) => Key::Integer(i),
                None => Key::Number(OrderedFloat(*n)),
            },
            Value::String(s) => Key::String(s.clone()),
            Value::Table(t) => Key::Table(*t),
            Value::Function(f) => Key::Function(*f),
            Value::LightUserData(p) => Key::LightUserData(*p),
        })
    }

    pub(crate) fn to_value(&self) -> Value {
        match self {
            Key::Boolean(b) => Value::Boolean(*b),
            Key::Integer(i) => Value::Integer(*i),
            Key::Number(n) => Value::Number(n.0),
            Key::String(s) => Value::String(s.clone()),
            Key::Table(t) => Value::Table(*t),
            Key::Function(f) => Value::Function(*f),
            Key::LightUserData(p) => Value::LightUserData(*p),
        }
    }
}
