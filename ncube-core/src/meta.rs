//! Case-insensitive meta-property maps, used by axes, columns and cubes alike.
//!
//! Keys are compared case-insensitively everywhere in N-Cube (cube names,
//! axis names, meta-property keys); this map canonicalizes to lowercase for
//! lookup while keeping the originally-supplied casing for display/iteration.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value as JsonValue;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetaProperties {
    /// lowercase key -> (original-case key, value)
    entries: BTreeMap<String, (String, JsonValue)>,
}

impl MetaProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: JsonValue) -> Option<JsonValue> {
        let key = key.into();
        let lower = key.to_lowercase();
        self.entries
            .insert(lower, (key, value))
            .map(|(_, old)| old)
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.entries.get(&key.to_lowercase()).map(|(_, v)| v)
    }

    pub fn remove(&mut self, key: &str) -> Option<JsonValue> {
        self.entries.remove(&key.to_lowercase()).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(&key.to_lowercase())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &JsonValue)> {
        self.entries.values().map(|(k, v)| (k.as_str(), v))
    }

    /// Overlays `other` on top of `self`: keys present in `other` win.
    pub fn merged_with(&self, other: &MetaProperties) -> MetaProperties {
        let mut merged = self.clone();
        for (k, v) in other.iter() {
            merged.insert(k.to_string(), v.clone());
        }
        merged
    }
}

impl fmt::Display for MetaProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (k, v)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{k}={v}")?;
        }
        write!(f, "}}")
    }
}

impl FromIterator<(String, JsonValue)> for MetaProperties {
    fn from_iter<T: IntoIterator<Item = (String, JsonValue)>>(iter: T) -> Self {
        let mut m = MetaProperties::new();
        for (k, v) in iter {
            m.insert(k, v);
        }
        m
    }
}
