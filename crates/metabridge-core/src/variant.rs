//! Host-side dynamic value.

use std::collections::BTreeMap;

/// Associative structured value: string key to recursive variant.
pub type VariantMap = BTreeMap<String, Variant>;

/// Ordered structured value.
pub type VariantList = Vec<Variant>;

/// A dynamically typed host value.
///
/// This is what host properties hold and what structured map/list
/// arguments contain.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Variant {
    /// Empty placeholder
    #[default]
    Invalid,
    Bool(bool),
    Int(i32),
    UInt(u32),
    LongLong(i64),
    ULongLong(u64),
    Double(f64),
    String(String),
    /// Opaque pointer-sized value
    Pointer(u64),
    List(VariantList),
    Map(VariantMap),
}

impl Variant {
    /// Get a human-readable type name for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Variant::Invalid => "invalid",
            Variant::Bool(_) => "bool",
            Variant::Int(_) => "int",
            Variant::UInt(_) => "uint",
            Variant::LongLong(_) => "longlong",
            Variant::ULongLong(_) => "ulonglong",
            Variant::Double(_) => "double",
            Variant::String(_) => "string",
            Variant::Pointer(_) => "pointer",
            Variant::List(_) => "list",
            Variant::Map(_) => "map",
        }
    }

    /// Check if this is the empty placeholder.
    pub fn is_valid(&self) -> bool {
        !matches!(self, Variant::Invalid)
    }

    /// Get the map payload, if any.
    pub fn as_map(&self) -> Option<&VariantMap> {
        match self {
            Variant::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Get the list payload, if any.
    pub fn as_list(&self) -> Option<&VariantList> {
        match self {
            Variant::List(l) => Some(l),
            _ => None,
        }
    }

    /// Get the string payload, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Variant::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for Variant {
    fn from(v: bool) -> Self {
        Variant::Bool(v)
    }
}

impl From<i32> for Variant {
    fn from(v: i32) -> Self {
        Variant::Int(v)
    }
}

impl From<i64> for Variant {
    fn from(v: i64) -> Self {
        Variant::LongLong(v)
    }
}

impl From<f64> for Variant {
    fn from(v: f64) -> Self {
        Variant::Double(v)
    }
}

impl From<&str> for Variant {
    fn from(v: &str) -> Self {
        Variant::String(v.to_string())
    }
}

impl From<String> for Variant {
    fn from(v: String) -> Self {
        Variant::String(v)
    }
}

impl From<VariantList> for Variant {
    fn from(v: VariantList) -> Self {
        Variant::List(v)
    }
}

impl From<VariantMap> for Variant {
    fn from(v: VariantMap) -> Self {
        Variant::Map(v)
    }
}
