//! Server configuration.

use crate::hmr::HmrConfig;
use serde::Deserialize;
use std::path::PathBuf;
use tracing::warn;
use trellis_compiler::{CompilerConfig, ImportMap};
use trellis_prefetch::PrefetchConfig;
use trellis_ssr::{RenderConfig, RenderMode};

/// Endpoint answering prefetch batches.
pub const PREFETCH_ENDPOINT: &str = "/__prefetch/batch";

/// Everything a [`PageServer`](crate::PageServer) needs, with defaults for
/// every field.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Project root; pages, layouts and modules live below it.
    pub root_dir: PathBuf,
    /// Pages directory, relative to the root.
    pub pages_dir: PathBuf,
    /// Aliases, externals and cache size. `root_dir` is taken from this struct.
    pub compiler: CompilerConfig,
    pub render: RenderConfig,
    pub prefetch: PrefetchConfig,
    pub hmr: HmrConfig,
    /// Import map sent to the browser. Its keys are also bundle externals.
    pub browser_import_map: ImportMap,
    /// Used when the request names no language.
    pub default_lang: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("."),
            pages_dir: PathBuf::from("pages"),
            compiler: CompilerConfig::default(),
            render: RenderConfig::default(),
            prefetch: PrefetchConfig::default(),
            hmr: HmrConfig::default(),
            browser_import_map: ImportMap::default(),
            default_lang: "en".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            ..Self::default()
        }
    }

    /// Defaults with `TRELLIS_ROOT`, `TRELLIS_DEV`, `TRELLIS_STREAMING` and
    /// `TRELLIS_RENDER_MODE` applied.
    pub fn from_env() -> Self {
        Self::default().apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup. Unparseable values are logged
    /// and ignored.
    pub fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(root) = lookup("TRELLIS_ROOT").filter(|v| !v.is_empty()) {
            self.root_dir = PathBuf::from(root);
        }
        if let Some(value) = lookup("TRELLIS_DEV") {
            match parse_bool(&value) {
                Some(dev) => self = self.with_dev(dev),
                None => warn!(key = "TRELLIS_DEV", value = %value, "Ignoring invalid boolean"),
            }
        }
        if let Some(value) = lookup("TRELLIS_STREAMING") {
            match parse_bool(&value) {
                Some(streaming) => self.render.streaming = streaming,
                None => warn!(key = "TRELLIS_STREAMING", value = %value, "Ignoring invalid boolean"),
            }
        }
        if let Some(value) = lookup("TRELLIS_RENDER_MODE") {
            match value.parse::<RenderMode>() {
                Ok(mode) => self.render.default_mode = Some(mode),
                Err(e) => warn!(key = "TRELLIS_RENDER_MODE", error = %e, "Ignoring invalid render mode"),
            }
        }
        self
    }

    pub fn with_pages_dir(mut self, pages_dir: impl Into<PathBuf>) -> Self {
        self.pages_dir = pages_dir.into();
        self
    }

    /// Development mode: hot reload and its client script.
    pub fn with_dev(mut self, dev: bool) -> Self {
        self.render.dev = dev;
        self.hmr.enabled = dev;
        self
    }

    pub fn with_compiler(mut self, compiler: CompilerConfig) -> Self {
        self.compiler = compiler;
        self
    }

    pub fn with_render(mut self, render: RenderConfig) -> Self {
        self.render = render;
        self
    }

    pub fn with_prefetch(mut self, prefetch: PrefetchConfig) -> Self {
        self.prefetch = prefetch;
        self
    }

    pub fn with_hmr(mut self, hmr: HmrConfig) -> Self {
        self.hmr = hmr;
        self
    }

    pub fn with_browser_import(mut self, specifier: impl Into<String>, url: impl Into<String>) -> Self {
        self.browser_import_map.insert(specifier, url);
        self
    }

    pub fn with_default_lang(mut self, lang: impl Into<String>) -> Self {
        self.default_lang = lang.into();
        self
    }

    /// Compiler settings rooted at `root_dir`, with the browser import map
    /// keys marked external.
    pub fn compiler_config(&self) -> CompilerConfig {
        let mut compiler = self
            .compiler
            .clone()
            .with_browser_import_map(&self.browser_import_map);
        compiler.root_dir = self.root_dir.clone();
        compiler
    }

    /// Hot reload is on and has somewhere to send clients.
    pub fn hmr_endpoint(&self) -> Option<&str> {
        (self.render.dev && self.hmr.enabled).then_some(self.hmr.endpoint.as_str())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.pages_dir, PathBuf::from("pages"));
        assert_eq!(config.default_lang, "en");
        assert_eq!(config.prefetch.concurrency, 10);
        assert!(config.hmr_endpoint().is_none());
    }

    #[test]
    fn test_overrides() {
        let config = ServerConfig::default().apply_overrides(lookup(&[
            ("TRELLIS_ROOT", "/srv/site"),
            ("TRELLIS_DEV", "true"),
            ("TRELLIS_STREAMING", "1"),
            ("TRELLIS_RENDER_MODE", "hybrid"),
        ]));
        assert_eq!(config.root_dir, PathBuf::from("/srv/site"));
        assert!(config.render.dev);
        assert!(config.render.streaming);
        assert_eq!(config.render.default_mode, Some(RenderMode::Hybrid));
        assert_eq!(config.hmr_endpoint(), Some("/__hmr"));
    }

    #[test]
    fn test_invalid_overrides_ignored() {
        let config = ServerConfig::default().apply_overrides(lookup(&[
            ("TRELLIS_DEV", "maybe"),
            ("TRELLIS_RENDER_MODE", "spa"),
        ]));
        assert!(!config.render.dev);
        assert_eq!(config.render.default_mode, None);
    }

    #[test]
    fn test_compiler_config_is_rooted() {
        let config = ServerConfig::new("/srv/site").with_browser_import("preact", "https://esm.sh/preact");
        let compiler = config.compiler_config();
        assert_eq!(compiler.root_dir, PathBuf::from("/srv/site"));
        assert!(compiler.is_external("preact/hooks"));
    }

    #[test]
    fn test_deserialize_partial() {
        let config: ServerConfig = serde_json::from_str(
            r#"{"root_dir": "site", "render": {"streaming": true}, "prefetch": {"patterns": ["/*"]}}"#,
        )
        .unwrap();
        assert!(config.render.streaming);
        assert_eq!(config.render.root_id, "app");
        assert_eq!(config.prefetch.patterns, vec!["/*"]);
        assert_eq!(config.pages_dir, PathBuf::from("pages"));
    }
}
