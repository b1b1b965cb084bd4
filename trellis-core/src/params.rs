//! Ordered route parameters.
//!
//! Parameters keep the order of the segments they were captured from, so
//! `/users/:user_id/posts/:post_id` always yields `user_id` before `post_id`.
//! Up to eight parameters are stored inline before spilling to the heap.

use serde::ser::{Serialize, SerializeMap, Serializer};
use smallvec::SmallVec;

/// Maximum number of inline path parameters before heap allocation.
pub const INLINE_PARAM_COUNT: usize = 8;

/// Path parameters in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteParams {
    params: SmallVec<[(String, String); INLINE_PARAM_COUNT]>,
}

impl RouteParams {
    /// Create empty params.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter. A repeated name overwrites the earlier value in place.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        if let Some(slot) = self.params.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = value;
        } else {
            self.params.push((name, value));
        }
    }

    /// Get parameter by name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Get parameter and parse as type T.
    pub fn get_parsed<T: std::str::FromStr>(&self, name: &str) -> Option<Result<T, T::Err>> {
        self.get(name).map(|v| v.parse())
    }

    /// Parameter names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.params.iter().map(|(n, _)| n.as_str())
    }

    /// Iterate `(name, value)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Whether the params still fit in inline storage.
    pub fn is_inline(&self) -> bool {
        !self.params.spilled()
    }

    /// Convert into a JSON object, preserving order.
    pub fn to_json(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .params
            .iter()
            .map(|(n, v)| (n.clone(), serde_json::Value::String(v.clone())))
            .collect();
        serde_json::Value::Object(map)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RouteParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = RouteParams::new();
        for (k, v) in iter {
            params.push(k, v);
        }
        params
    }
}

impl Serialize for RouteParams {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.params.len()))?;
        for (name, value) in &self.params {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}
