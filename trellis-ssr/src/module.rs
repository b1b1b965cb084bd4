//! Page, layout and API modules, and the loader seam that provides them.
//!
//! A module is the server-side view of one source file: its default
//! component, optional `load()` and `metadata`, render-mode overrides, and
//! for API routes the per-method handlers. Where the modules come from is
//! the [`ModuleLoader`]'s business; [`ModuleRegistry`] keeps them in memory.

use crate::context::LoadContext;
use crate::metadata::Metadata;
use crate::render_mode::RenderMode;
use crate::vnode::{Props, VNode};
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use trellis_core::modules::to_slash_path;
use trellis_core::{Error, HttpResponse, Result};

pub type RenderFn = Arc<dyn Fn(&Props) -> Result<VNode> + Send + Sync>;
pub type AsyncRenderFn = Arc<dyn Fn(Props) -> BoxFuture<'static, Result<VNode>> + Send + Sync>;
pub type LoaderFn = Arc<dyn Fn(LoadContext) -> BoxFuture<'static, Result<Value>> + Send + Sync>;
pub type MetadataFn = Arc<dyn Fn(&LoadContext, &Value) -> Result<Metadata> + Send + Sync>;
pub type ApiHandler = Arc<dyn Fn(LoadContext) -> BoxFuture<'static, Result<HttpResponse>> + Send + Sync>;

/// A component function.
///
/// Async components are representable so they can be rejected with a clear
/// error: the tree must be built synchronously.
#[derive(Clone)]
pub enum Component {
    Sync { name: String, render: RenderFn },
    Async { name: String, render: AsyncRenderFn },
}

impl Component {
    pub fn new<F>(name: impl Into<String>, render: F) -> Self
    where
        F: Fn(&Props) -> Result<VNode> + Send + Sync + 'static,
    {
        Component::Sync {
            name: name.into(),
            render: Arc::new(render),
        }
    }

    pub fn new_async<F, Fut>(name: impl Into<String>, render: F) -> Self
    where
        F: Fn(Props) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<VNode>> + Send + 'static,
    {
        Component::Async {
            name: name.into(),
            render: Arc::new(move |props| Box::pin(render(props))),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Component::Sync { name, .. } | Component::Async { name, .. } => name,
        }
    }

    pub fn is_async(&self) -> bool {
        matches!(self, Component::Async { .. })
    }

    /// Build this component's tree.
    pub fn call(&self, props: &Props) -> Result<VNode> {
        match self {
            Component::Sync { render, .. } => render(props),
            Component::Async { name, .. } => Err(Error::AsyncComponent(name.clone())),
        }
    }
}

impl std::fmt::Debug for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.is_async() { "async" } else { "sync" };
        write!(f, "Component({}, {kind})", self.name())
    }
}

/// `metadata` export: a fixed value or a function of the loader context and data.
#[derive(Clone)]
pub enum MetadataExport {
    Static(Metadata),
    Dynamic(MetadataFn),
}

impl MetadataExport {
    pub fn resolve(&self, ctx: &LoadContext, data: &Value) -> Result<Metadata> {
        match self {
            MetadataExport::Static(meta) => Ok(meta.clone()),
            MetadataExport::Dynamic(f) => f(ctx, data),
        }
    }
}

/// Exports of a page, layout, app-shell or API module.
#[derive(Clone, Default)]
pub struct PageModule {
    /// Default export.
    pub component: Option<Component>,
    pub load: Option<LoaderFn>,
    pub metadata: Option<MetadataExport>,
    pub render_mode: Option<RenderMode>,
    pub hydrate: Option<bool>,
    /// `Some(false)` stops layout inheritance at this module.
    pub layout: Option<bool>,
    /// API handlers keyed by upper-case method.
    pub handlers: HashMap<String, ApiHandler>,
    /// Source text, used for client-only API detection.
    pub source: Option<String>,
}

impl PageModule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn component<F>(mut self, name: impl Into<String>, render: F) -> Self
    where
        F: Fn(&Props) -> Result<VNode> + Send + Sync + 'static,
    {
        self.component = Some(Component::new(name, render));
        self
    }

    pub fn async_component<F, Fut>(mut self, name: impl Into<String>, render: F) -> Self
    where
        F: Fn(Props) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<VNode>> + Send + 'static,
    {
        self.component = Some(Component::new_async(name, render));
        self
    }

    pub fn loader<F, Fut>(mut self, load: F) -> Self
    where
        F: Fn(LoadContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.load = Some(Arc::new(move |ctx| Box::pin(load(ctx))));
        self
    }

    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(MetadataExport::Static(metadata));
        self
    }

    pub fn metadata_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&LoadContext, &Value) -> Result<Metadata> + Send + Sync + 'static,
    {
        self.metadata = Some(MetadataExport::Dynamic(Arc::new(f)));
        self
    }

    pub fn render_mode(mut self, mode: RenderMode) -> Self {
        self.render_mode = Some(mode);
        self
    }

    pub fn hydrate(mut self, hydrate: bool) -> Self {
        self.hydrate = Some(hydrate);
        self
    }

    /// Opt out of outer layouts (`layout = false`).
    pub fn no_layout(mut self) -> Self {
        self.layout = Some(false);
        self
    }

    pub fn handler<F, Fut>(mut self, method: &str, handler: F) -> Self
    where
        F: Fn(LoadContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HttpResponse>> + Send + 'static,
    {
        self.handlers
            .insert(method.to_uppercase(), Arc::new(move |ctx| Box::pin(handler(ctx))));
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Handler for a method; `HEAD` falls back to `GET`.
    pub fn handler_for(&self, method: &str) -> Option<&ApiHandler> {
        let method = method.to_uppercase();
        self.handlers.get(&method).or_else(|| {
            if method == "HEAD" {
                self.handlers.get("GET")
            } else {
                None
            }
        })
    }

    /// Methods with a handler, sorted.
    pub fn allowed_methods(&self) -> Vec<String> {
        let mut methods: Vec<String> = self.handlers.keys().cloned().collect();
        methods.sort();
        methods
    }

    /// Whether `layout = false` was declared.
    pub fn terminates_layouts(&self) -> bool {
        self.layout == Some(false)
    }

    /// Run `load()` if defined; `Value::Null` otherwise.
    pub async fn run_load(&self, ctx: &LoadContext) -> Result<Value> {
        match &self.load {
            Some(load) => load(ctx.clone()).await,
            None => Ok(Value::Null),
        }
    }
}

impl std::fmt::Debug for PageModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageModule")
            .field("component", &self.component)
            .field("has_load", &self.load.is_some())
            .field("has_metadata", &self.metadata.is_some())
            .field("render_mode", &self.render_mode)
            .field("hydrate", &self.hydrate)
            .field("layout", &self.layout)
            .field("handlers", &self.allowed_methods())
            .finish()
    }
}

/// Supplies modules by source path (relative to the project root).
#[async_trait]
pub trait ModuleLoader: Send + Sync {
    async fn load_module(&self, path: &Path) -> Result<Arc<PageModule>>;
}

/// In-memory module loader.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: RwLock<HashMap<String, Arc<PageModule>>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the module for a source path.
    pub fn register(&self, path: impl AsRef<Path>, module: PageModule) {
        self.modules
            .write()
            .insert(to_slash_path(path.as_ref()), Arc::new(module));
    }

    pub fn with(self, path: impl AsRef<Path>, module: PageModule) -> Self {
        self.register(path, module);
        self
    }

    pub fn remove(&self, path: impl AsRef<Path>) -> bool {
        self.modules
            .write()
            .remove(&to_slash_path(path.as_ref()))
            .is_some()
    }

    pub fn contains(&self, path: impl AsRef<Path>) -> bool {
        self.modules.read().contains_key(&to_slash_path(path.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.modules.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.read().is_empty()
    }
}

#[async_trait]
impl ModuleLoader for ModuleRegistry {
    async fn load_module(&self, path: &Path) -> Result<Arc<PageModule>> {
        let key = to_slash_path(path);
        self.modules
            .read()
            .get(&key)
            .cloned()
            .ok_or(Error::ModuleNotFound(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_registry_normalizes_paths() {
        let registry = ModuleRegistry::new().with(
            "./pages/index.tsx",
            PageModule::new().component("Home", |_| Ok(VNode::text("home"))),
        );
        assert!(registry.contains("pages/index.tsx"));
        let module = registry
            .load_module(Path::new("pages/index.tsx"))
            .await
            .unwrap();
        assert_eq!(module.component.as_ref().unwrap().name(), "Home");

        let err = registry
            .load_module(Path::new("pages/missing.tsx"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ModuleNotFound(_)));
    }

    #[test]
    fn test_async_component_rejected() {
        let component = Component::new_async("Slow", |_| async { Ok(VNode::Empty) });
        assert!(component.is_async());
        let err = component.call(&Props::new()).unwrap_err();
        assert!(matches!(err, Error::AsyncComponent(name) if name == "Slow"));
    }

    #[tokio::test]
    async fn test_handlers_and_load() {
        let module = PageModule::new()
            .handler("get", |_| async { Ok(HttpResponse::ok()) })
            .handler("POST", |_| async { Ok(HttpResponse::new(201)) })
            .loader(|_| async { Ok(json!({"n": 1})) });

        assert!(module.handler_for("HEAD").is_some());
        assert!(module.handler_for("DELETE").is_none());
        assert_eq!(module.allowed_methods(), vec!["GET", "POST"]);

        let ctx = LoadContext::new(trellis_core::HttpRequest::get("/"), "/");
        assert_eq!(module.run_load(&ctx).await.unwrap(), json!({"n": 1}));
    }
}
