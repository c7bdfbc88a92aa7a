//! Bridge configuration.

/// Settings for a [`Bridge`](crate::Bridge).
///
/// # Example
///
/// ```
/// use metabridge::BridgeConfig;
///
/// let config = BridgeConfig::default()
///     .with_namespace("qt")
///     .with_own_returned_objects(true);
/// assert_eq!(config.namespace, "qt");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Global table holding `connect`, `disconnect` and `own_objects`.
    pub namespace: String,
    /// Whether objects returned by native methods are destroyed when their
    /// wrapper is collected.
    pub own_returned_objects: bool,
    /// Whether wrappers of returned objects are cached and reused.
    pub cache_returned_objects: bool,
    /// Methods with more parameters than this are not exposed.
    pub max_arguments: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            namespace: "bridge".to_string(),
            own_returned_objects: false,
            cache_returned_objects: false,
            max_arguments: 10,
        }
    }
}

impl BridgeConfig {
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_own_returned_objects(mut self, own: bool) -> Self {
        self.own_returned_objects = own;
        self
    }

    pub fn with_cache_returned_objects(mut self, cache: bool) -> Self {
        self.cache_returned_objects = cache;
        self
    }

    pub fn with_max_arguments(mut self, max: usize) -> Self {
        self.max_arguments = max;
        self
    }
}
