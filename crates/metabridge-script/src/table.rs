//! Table storage.

use std::collections::BTreeMap;
use std::ops::Bound;

use crate::FunctionRef;
use crate::value::{Key, Value};

/// An associative array with an optional finalizer.
///
/// Entries are kept in key order, so integer keys iterate ascending.
#[derive(Debug, Default)]
pub(crate) struct Table {
    entries: BTreeMap<Key, Value>,
    pub(crate) finalizer: Option<FunctionRef>,
}

impl Table {
    pub(crate) fn get(&self, key: &Key) -> Value {
        self.entries.get(key).cloned().unwrap_or_default()
    }

    /// Assigning nil removes the entry.
    pub(crate) fn set(&mut self, key: Key, value: Value) {
        if value.is_nil() {
            self.entries.remove(&key);
        } else {
            self.entries.insert(key, value);
        }
    }

    /// The entry following `after`, or the first entry for `None`.
    pub(crate) fn next(&self, after: Option<&Key>) -> Option<(Key, Value)> {
        let mut range = match after {
            Some(key) => self
                .entries
                .range((Bound::Excluded(key.clone()), Bound::Unbounded)),
            None => self.entries.range::<Key, _>(..),
        };
        range.next().map(|(k, v)| (k.clone(), v.clone()))
    }

    /// Border of the sequence part: the count of consecutive integer keys from 1.
    pub(crate) fn len(&self) -> usize {
        let mut n = 0usize;
        while self.entries.contains_key(&Key::Integer(n as i64 + 1)) {
            n += 1;
        }
        n
    }

    /// Every value reachable from this table for the collector.
    pub(crate) fn references(&self) -> Vec<Value> {
        let mut out = Vec::with_capacity(self.entries.len() * 2 + 1);
        for (key, value) in &self.entries {
            out.push(key.to_value());
            out.push(value.clone());
        }
        if let Some(finalizer) = self.finalizer {
            out.push(Value::Function(finalizer));
        }
        out
    }
}
