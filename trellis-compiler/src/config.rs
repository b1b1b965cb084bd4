//! Compiler configuration.

use crate::import_map::{ImportMap, package_name};
use serde::Deserialize;
use std::path::PathBuf;

/// Default number of compiled modules kept in memory.
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

/// Extensions tried, in order, when an import omits one.
pub const RESOLVE_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "mjs"];

/// Module compiler configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Project root. Every compiled module must live below it.
    pub root_dir: PathBuf,
    /// Compile-time aliases, e.g. `"@/": "./src/"`.
    pub aliases: ImportMap,
    /// Bare packages left as imports for the browser to resolve.
    pub externals: Vec<String>,
    pub cache_capacity: usize,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("."),
            aliases: ImportMap::default(),
            externals: Vec::new(),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl CompilerConfig {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            ..Self::default()
        }
    }

    pub fn with_alias(mut self, specifier: impl Into<String>, target: impl Into<String>) -> Self {
        self.aliases.insert(specifier, target);
        self
    }

    pub fn with_aliases(mut self, aliases: ImportMap) -> Self {
        self.aliases = aliases;
        self
    }

    pub fn with_external(mut self, package: impl Into<String>) -> Self {
        self.externals.push(package.into());
        self
    }

    /// Treat every key of a browser import map as external.
    pub fn with_browser_import_map(mut self, map: &ImportMap) -> Self {
        self.externals.extend(map.imports.keys().cloned());
        self
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Whether a bare specifier may stay unbundled.
    pub fn is_external(&self, specifier: &str) -> bool {
        let package = package_name(specifier);
        self.externals.iter().any(|e| {
            e == specifier || e == package || (e.ends_with('/') && specifier.starts_with(e.as_str()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_externals() {
        let browser = ImportMap::new().with("preact/", "https://esm.sh/preact/");
        let config = CompilerConfig::new("/app")
            .with_external("react")
            .with_browser_import_map(&browser);

        assert!(config.is_external("react"));
        assert!(config.is_external("react/jsx-runtime"));
        assert!(config.is_external("preact/hooks"));
        assert!(!config.is_external("lodash"));
    }

    #[test]
    fn test_deserialize_defaults() {
        let config: CompilerConfig =
            serde_json::from_str(r#"{"root_dir": "/srv/app", "externals": ["vue"]}"#).unwrap();
        assert_eq!(config.cache_capacity, DEFAULT_CACHE_CAPACITY);
        assert_eq!(config.root_dir, PathBuf::from("/srv/app"));
        assert!(config.aliases.is_empty());
    }
}
