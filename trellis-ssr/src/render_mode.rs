//! Render mode resolution.
//!
//! Precedence, highest first: the page module's own `renderMode` export,
//! a per-route override from configuration, client-only API detection on
//! the module source, the configured default, and finally `ssr`.

use crate::module::PageModule;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::debug;
use trellis_compiler::{ClientApiUsage, detect_client_apis};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    /// Rendered on the server only.
    #[default]
    Ssr,
    /// Rendered in the browser; the server sends an empty shell.
    Csr,
    /// Server-rendered, then hydrated.
    Hybrid,
}

impl RenderMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenderMode::Ssr => "ssr",
            RenderMode::Csr => "csr",
            RenderMode::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for RenderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RenderMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ssr" => Ok(RenderMode::Ssr),
            "csr" => Ok(RenderMode::Csr),
            "hybrid" => Ok(RenderMode::Hybrid),
            other => Err(format!("unknown render mode `{other}`")),
        }
    }
}

/// Which precedence level produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DecisionSource {
    PageExport,
    RouteConfig,
    Detected,
    GlobalDefault,
    HardDefault,
}

/// Render mode and hydration flag for one request. Never mutated once made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderDecision {
    pub render_mode: RenderMode,
    pub should_hydrate: bool,
    pub source: DecisionSource,
}

impl RenderDecision {
    /// Whether the browser needs the page module at all.
    pub fn needs_client(&self) -> bool {
        self.should_hydrate || self.render_mode == RenderMode::Csr
    }
}

/// Rendering configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub default_mode: Option<RenderMode>,
    /// Enable client-only API detection.
    pub auto_detect: bool,
    /// Stream page bodies when the adapter supports it.
    pub streaming: bool,
    /// Id of the element the page mounts into.
    pub root_id: String,
    pub dev: bool,
    /// Per-route overrides keyed by canonical route pattern.
    pub route_modes: BTreeMap<String, RenderMode>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            default_mode: None,
            auto_detect: true,
            streaming: false,
            root_id: "app".to_string(),
            dev: false,
            route_modes: BTreeMap::new(),
        }
    }
}

impl RenderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_mode(mut self, mode: RenderMode) -> Self {
        self.default_mode = Some(mode);
        self
    }

    pub fn with_auto_detect(mut self, enabled: bool) -> Self {
        self.auto_detect = enabled;
        self
    }

    pub fn with_streaming(mut self, enabled: bool) -> Self {
        self.streaming = enabled;
        self
    }

    pub fn with_root_id(mut self, root_id: impl Into<String>) -> Self {
        self.root_id = root_id.into();
        self
    }

    pub fn with_dev(mut self, dev: bool) -> Self {
        self.dev = dev;
        self
    }

    pub fn with_route_mode(mut self, route_pattern: impl Into<String>, mode: RenderMode) -> Self {
        self.route_modes.insert(route_pattern.into(), mode);
        self
    }
}

/// Decides how a page renders.
#[derive(Debug, Clone, Default)]
pub struct RenderModeResolver {
    config: RenderConfig,
}

impl RenderModeResolver {
    pub fn new(config: RenderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Resolve the decision for a page. `source` is the module's source
    /// text when available, used only for detection.
    pub fn resolve(&self, module: &PageModule, route_pattern: &str, source: Option<&str>) -> RenderDecision {
        let (mode, from) = self.resolve_mode(module, route_pattern, source);
        let should_hydrate = match mode {
            RenderMode::Hybrid => true,
            RenderMode::Ssr => module.hydrate == Some(true),
            RenderMode::Csr => false,
        };
        debug!(route = route_pattern, mode = %mode, hydrate = should_hydrate, source = ?from, "Render mode resolved");
        RenderDecision {
            render_mode: mode,
            should_hydrate,
            source: from,
        }
    }

    fn resolve_mode(&self, module: &PageModule, route_pattern: &str, source: Option<&str>) -> (RenderMode, DecisionSource) {
        if let Some(mode) = module.render_mode {
            return (mode, DecisionSource::PageExport);
        }
        if let Some(mode) = self.config.route_modes.get(route_pattern) {
            return (*mode, DecisionSource::RouteConfig);
        }
        if self.config.auto_detect {
            let source = source.or(module.source.as_deref());
            match source.map(detect_client_apis) {
                Some(ClientApiUsage::TopLevel) => return (RenderMode::Csr, DecisionSource::Detected),
                Some(ClientApiUsage::InFunctions) => {
                    return (RenderMode::Hybrid, DecisionSource::Detected);
                }
                Some(ClientApiUsage::None) | None => {}
            }
        }
        if let Some(mode) = self.config.default_mode {
            return (mode, DecisionSource::GlobalDefault);
        }
        (RenderMode::Ssr, DecisionSource::HardDefault)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mode() {
        assert_eq!("Hybrid".parse::<RenderMode>().unwrap(), RenderMode::Hybrid);
        assert!("spa".parse::<RenderMode>().is_err());
    }

    #[test]
    fn test_hard_default() {
        let decision = RenderModeResolver::default().resolve(&PageModule::new(), "/", None);
        assert_eq!(decision.render_mode, RenderMode::Ssr);
        assert!(!decision.should_hydrate);
        assert_eq!(decision.source, DecisionSource::HardDefault);
    }

    #[test]
    fn test_page_export_beats_everything() {
        let resolver = RenderModeResolver::new(
            RenderConfig::new()
                .with_default_mode(RenderMode::Csr)
                .with_route_mode("/", RenderMode::Csr),
        );
        let module = PageModule::new()
            .render_mode(RenderMode::Hybrid)
            .source("const w = window.innerWidth;");
        let decision = resolver.resolve(&module, "/", None);
        assert_eq!(decision.render_mode, RenderMode::Hybrid);
        assert!(decision.should_hydrate);
        assert_eq!(decision.source, DecisionSource::PageExport);
    }

    #[test]
    fn test_global_default_and_hydrate_opt_in() {
        let resolver = RenderModeResolver::new(RenderConfig::new().with_default_mode(RenderMode::Ssr));
        let module = PageModule::new().hydrate(true);
        let decision = resolver.resolve(&module, "/", None);
        assert_eq!(decision.source, DecisionSource::GlobalDefault);
        assert!(decision.should_hydrate);

        let csr = RenderModeResolver::new(RenderConfig::new().with_default_mode(RenderMode::Csr));
        let decision = csr.resolve(&PageModule::new().hydrate(true), "/", None);
        assert_eq!(decision.render_mode, RenderMode::Csr);
        assert!(!decision.should_hydrate);
        assert!(decision.needs_client());
    }

    #[test]
    fn test_detection_levels() {
        let resolver = RenderModeResolver::new(RenderConfig::new().with_default_mode(RenderMode::Ssr));
        let top = resolver.resolve(&PageModule::new(), "/", Some("localStorage.getItem('k');"));
        assert_eq!((top.render_mode, top.source), (RenderMode::Csr, DecisionSource::Detected));

        let inner = resolver.resolve(
            &PageModule::new(),
            "/",
            Some("export default function P() { onClick(() => window.scrollTo(0, 0)); }"),
        );
        assert_eq!(inner.render_mode, RenderMode::Hybrid);

        let off = RenderModeResolver::new(RenderConfig::new().with_auto_detect(false));
        let decision = off.resolve(&PageModule::new(), "/", Some("window.x = 1;"));
        assert_eq!(decision.render_mode, RenderMode::Ssr);
    }

    #[test]
    fn test_route_override() {
        let resolver = RenderModeResolver::new(RenderConfig::new().with_route_mode("/admin/*rest", RenderMode::Csr));
        let decision = resolver.resolve(&PageModule::new(), "/admin/*rest", None);
        assert_eq!(decision.source, DecisionSource::RouteConfig);
        assert_eq!(decision.render_mode, RenderMode::Csr);
    }
}
