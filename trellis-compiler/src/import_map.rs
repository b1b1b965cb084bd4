//! Import maps.
//!
//! The same structure serves two purposes: project aliases resolved at
//! compile time (`"@/": "./src/"`) and the browser import map emitted into
//! every page (`"react": "https://esm.sh/react@18"`). Keys ending in `/`
//! are prefix mappings, as in the browser spec.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Specifier -> target mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportMap {
    #[serde(default)]
    pub imports: BTreeMap<String, String>,
}

impl ImportMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a mapping, builder style.
    pub fn with(mut self, specifier: impl Into<String>, target: impl Into<String>) -> Self {
        self.insert(specifier, target);
        self
    }

    pub fn insert(&mut self, specifier: impl Into<String>, target: impl Into<String>) {
        self.imports.insert(specifier.into(), target.into());
    }

    pub fn is_empty(&self) -> bool {
        self.imports.is_empty()
    }

    pub fn len(&self) -> usize {
        self.imports.len()
    }

    /// Add every entry of `other`, overwriting existing keys.
    pub fn merge(&mut self, other: &ImportMap) {
        for (k, v) in &other.imports {
            self.imports.insert(k.clone(), v.clone());
        }
    }

    /// Resolve a specifier. Exact keys win; otherwise the longest matching
    /// prefix key (ending in `/`) is substituted.
    pub fn resolve(&self, specifier: &str) -> Option<String> {
        if let Some(target) = self.imports.get(specifier) {
            return Some(target.clone());
        }
        self.imports
            .iter()
            .filter(|(key, _)| key.ends_with('/') && specifier.starts_with(key.as_str()))
            .max_by_key(|(key, _)| key.len())
            .map(|(key, target)| format!("{}{}", target, &specifier[key.len()..]))
    }

    /// Whether the specifier is covered by some entry.
    pub fn covers(&self, specifier: &str) -> bool {
        self.resolve(specifier).is_some()
    }

    /// JSON payload of a `<script type="importmap">` tag.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| String::from(r#"{"imports":{}}"#))
    }
}

/// Whether a specifier points at a local file rather than a package.
pub fn is_local_specifier(specifier: &str) -> bool {
    specifier.starts_with("./") || specifier.starts_with("../") || specifier.starts_with('/')
}

/// Whether a specifier is a full URL.
pub fn is_url_specifier(specifier: &str) -> bool {
    specifier.starts_with("http://")
        || specifier.starts_with("https://")
        || specifier.starts_with("data:")
}

/// Package part of a bare specifier: `react-dom/client` -> `react-dom`,
/// `@scope/pkg/sub` -> `@scope/pkg`.
pub fn package_name(specifier: &str) -> &str {
    let mut parts = specifier.splitn(3, '/');
    let first = parts.next().unwrap_or("");
    if first.starts_with('@') {
        match parts.next() {
            Some(second) => &specifier[..first.len() + 1 + second.len()],
            None => specifier,
        }
    } else {
        first
    }
}
