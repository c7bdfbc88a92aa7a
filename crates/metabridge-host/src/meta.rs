//! Introspection metadata for host object classes.
//!
//! A [`MetaObject`] lists the callable members (methods, slots, events,
//! constructors) and the properties of a class, in declaration order. The
//! index of a member in that order is its identity for invocation and for
//! event connections.

use rustc_hash::FxHashMap;

use metabridge_core::TypeHash;

/// What kind of callable member a method is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodKind {
    /// Ordinary invokable method
    Method,
    /// Event source; invoking it emits the event
    Signal,
    /// Method that may also be the target of an event connection
    Slot,
    Constructor,
}

/// One callable member.
#[derive(Debug, Clone, PartialEq)]
pub struct MetaMethod {
    signature: String,
    parameter_types: Vec<String>,
    return_type: String,
    kind: MethodKind,
}

impl MetaMethod {
    fn new(signature: &str, return_type: &str, kind: MethodKind) -> Self {
        let signature = normalize_signature(signature);
        let parameter_types = parse_parameter_types(&signature);
        Self {
            signature,
            parameter_types,
            return_type: return_type.trim().to_string(),
            kind,
        }
    }

    /// Normalized signature, e.g. `add(int,int)`.
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// Member name: the signature up to the opening parenthesis.
    pub fn name(&self) -> &str {
        match self.signature.find('(') {
            Some(end) => &self.signature[..end],
            None => &self.signature,
        }
    }

    /// Type tags of the parameters, in order.
    pub fn parameter_types(&self) -> &[String] {
        &self.parameter_types
    }

    pub fn parameter_count(&self) -> usize {
        self.parameter_types.len()
    }

    /// Type tag of the return value, empty for void.
    pub fn return_type(&self) -> &str {
        &self.return_type
    }

    pub fn kind(&self) -> MethodKind {
        self.kind
    }
}

/// One readable property.
#[derive(Debug, Clone, PartialEq)]
pub struct MetaProperty {
    name: String,
    type_name: String,
}

impl MetaProperty {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }
}

/// Introspection data of a host class.
#[derive(Debug, Clone)]
pub struct MetaObject {
    class_name: String,
    methods: Vec<MetaMethod>,
    properties: Vec<MetaProperty>,
    by_signature: FxHashMap<TypeHash, usize>,
}

impl MetaObject {
    /// Start describing a class.
    pub fn builder(class_name: impl Into<String>) -> MetaObjectBuilder {
        MetaObjectBuilder {
            class_name: class_name.into(),
            methods: Vec::new(),
            properties: Vec::new(),
        }
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn methods(&self) -> &[MetaMethod] {
        &self.methods
    }

    pub fn method(&self, index: usize) -> Option<&MetaMethod> {
        self.methods.get(index)
    }

    pub fn method_count(&self) -> usize {
        self.methods.len()
    }

    pub fn properties(&self) -> &[MetaProperty] {
        &self.properties
    }

    /// Look up a member by signature. Whitespace is ignored.
    pub fn index_of_method(&self, signature: &str) -> Option<usize> {
        let key = TypeHash::from_signature(&normalize_signature(signature));
        self.by_signature.get(&key).copied()
    }

    /// Look up an event by signature. Whitespace is ignored.
    pub fn index_of_signal(&self, signature: &str) -> Option<usize> {
        self.index_of_method(signature)
            .filter(|&index| self.methods[index].kind == MethodKind::Signal)
    }
}

/// Builder for [`MetaObject`].
///
/// ```
/// use metabridge_host::MetaObject;
///
/// let meta = MetaObject::builder("Counter")
///     .method("add(int, int)", "int")
///     .signal("changed(int)")
///     .property("count", "int")
///     .build();
///
/// assert_eq!(meta.index_of_method("add(int,int)"), Some(0));
/// assert_eq!(meta.index_of_signal("changed( int )"), Some(1));
/// ```
#[derive(Debug, Clone)]
pub struct MetaObjectBuilder {
    class_name: String,
    methods: Vec<MetaMethod>,
    properties: Vec<MetaProperty>,
}

impl MetaObjectBuilder {
    /// Add an ordinary method. Use `""` as the return type for void.
    pub fn method(mut self, signature: &str, return_type: &str) -> Self {
        self.methods
            .push(MetaMethod::new(signature, return_type, MethodKind::Method));
        self
    }

    /// Add a slot.
    pub fn slot(mut self, signature: &str, return_type: &str) -> Self {
        self.methods
            .push(MetaMethod::new(signature, return_type, MethodKind::Slot));
        self
    }

    /// Add an event.
    pub fn signal(mut self, signature: &str) -> Self {
        self.methods
            .push(MetaMethod::new(signature, "", MethodKind::Signal));
        self
    }

    /// Add a constructor.
    pub fn constructor(mut self, signature: &str) -> Self {
        self.methods
            .push(MetaMethod::new(signature, "object", MethodKind::Constructor));
        self
    }

    /// Add a readable property.
    pub fn property(mut self, name: &str, type_name: &str) -> Self {
        self.properties.push(MetaProperty {
            name: name.to_string(),
            type_name: type_name.to_string(),
        });
        self
    }

    pub fn build(self) -> MetaObject {
        let mut by_signature = FxHashMap::default();
        for (index, method) in self.methods.iter().enumerate() {
            // first declaration wins, like lookup order
            by_signature
                .entry(TypeHash::from_signature(&method.signature))
                .or_insert(index);
        }
        MetaObject {
            class_name: self.class_name,
            methods: self.methods,
            properties: self.properties,
            by_signature,
        }
    }
}

/// Strip all whitespace from a signature.
pub fn normalize_signature(signature: &str) -> String {
    signature.chars().filter(|c| !c.is_whitespace()).collect()
}

fn parse_parameter_types(signature: &str) -> Vec<String> {
    let (Some(open), Some(close)) = (signature.find('('), signature.rfind(')')) else {
        return Vec::new();
    };
    if close <= open + 1 {
        return Vec::new();
    }
    signature[open + 1..close]
        .split(',')
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MetaObject {
        MetaObject::builder("Sample")
            .method("total()", "int")
            .method("total(int, int)", "int")
            .slot("reset()", "")
            .signal("changed(int)")
            .constructor("Sample()")
            .property("label", "string")
            .build()
    }

    #[test]
    fn parameters_are_parsed_from_signature() {
        let meta = sample();
        assert_eq!(meta.method(0).map(MetaMethod::parameter_count), Some(0));
        let total = meta.method(1).expect("method");
        assert_eq!(total.parameter_types(), ["int", "int"]);
        assert_eq!(total.signature(), "total(int,int)");
        assert_eq!(total.name(), "total");
        assert_eq!(total.return_type(), "int");
    }

    #[test]
    fn lookup_ignores_whitespace() {
        let meta = sample();
        assert_eq!(meta.index_of_method("total( int,int )"), Some(1));
        assert_eq!(meta.index_of_method("missing()"), None);
    }

    #[test]
    fn signal_lookup_requires_signal_kind() {
        let meta = sample();
        assert_eq!(meta.index_of_signal("changed(int)"), Some(3));
        assert_eq!(meta.index_of_signal("reset()"), None);
    }

    #[test]
    fn kinds_are_recorded() {
        let meta = sample();
        let kinds: Vec<_> = meta.methods().iter().map(MetaMethod::kind).collect();
        assert_eq!(
            kinds,
            [
                MethodKind::Method,
                MethodKind::Method,
                MethodKind::Slot,
                MethodKind::Signal,
                MethodKind::Constructor,
            ]
        );
        assert_eq!(meta.method(3).map(MetaMethod::return_type), Some(""));
    }

    #[test]
    fn generic_parameter_types_survive() {
        let meta = MetaObject::builder("Seq")
            .method("fill(list<short>, vector<double>)", "")
            .build();
        assert_eq!(
            meta.method(0).map(MetaMethod::parameter_types),
            Some(&["list<short>".to_string(), "vector<double>".to_string()][..])
        );
    }

    #[test]
    fn properties_in_order() {
        let meta = sample();
        assert_eq!(meta.properties().len(), 1);
        assert_eq!(meta.properties()[0].name(), "label");
        assert_eq!(meta.properties()[0].type_name(), "string");
        assert_eq!(meta.class_name(), "Sample");
    }
}
