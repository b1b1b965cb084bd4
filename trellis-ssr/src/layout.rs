//! Layout chain loading.
//!
//! Layouts are visited from the most path-specific to the root. Each one's
//! `load()` runs with the request's [`LoadContext`]; a redirect set by any
//! loader aborts the chain on the spot. Missing or failing layouts are
//! logged and skipped.

use crate::context::LoadContext;
use crate::module::{Component, ModuleLoader};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// One resolved layout.
#[derive(Debug, Clone)]
pub struct LayoutChainEntry {
    /// Source path relative to the project root.
    pub path: PathBuf,
    pub component: Component,
    /// `load()` result, `Null` if the layout has no loader.
    pub load_result: Value,
    /// The layout declared `layout = false`.
    pub terminates_inheritance: bool,
}

/// Layouts for one request, most specific first.
#[derive(Debug, Clone, Default)]
pub struct LayoutChain {
    pub entries: Vec<LayoutChainEntry>,
    /// A loader requested a redirect; nothing further may render.
    pub aborted: bool,
}

impl LayoutChain {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn data(&self) -> Vec<Value> {
        self.entries.iter().map(|e| e.load_result.clone()).collect()
    }

    pub fn paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.entries.iter().map(|e| &e.path)
    }
}

/// Builds the [`LayoutChain`] for a route.
#[derive(Clone)]
pub struct LayoutChainLoader {
    loader: Arc<dyn ModuleLoader>,
}

impl LayoutChainLoader {
    pub fn new(loader: Arc<dyn ModuleLoader>) -> Self {
        Self { loader }
    }

    /// Load the chain for `layout_paths` (most specific first, as returned
    /// by the route table).
    #[instrument(skip(self, layout_paths, ctx), fields(route = %ctx.route_path, layouts = layout_paths.len()))]
    pub async fn load_chain(&self, layout_paths: &[PathBuf], ctx: &LoadContext) -> LayoutChain {
        let mut chain = LayoutChain::default();

        for path in layout_paths {
            let module = match self.loader.load_module(path).await {
                Ok(module) => module,
                Err(e) => {
                    warn!(layout = %path.display(), error = %e, "Layout module unavailable, skipping");
                    continue;
                }
            };
            let Some(component) = module.component.clone() else {
                warn!(layout = %path.display(), "Layout has no default component, skipping");
                continue;
            };

            let load_result = match module.run_load(ctx).await {
                Ok(value) => value,
                Err(e) => {
                    if ctx.res.is_redirect() {
                        chain.aborted = true;
                        return chain;
                    }
                    warn!(layout = %path.display(), error = %e, "Layout load() failed, skipping");
                    continue;
                }
            };
            if let Some((status, location)) = ctx.res.redirect_target() {
                debug!(layout = %path.display(), status, location = %location, "Layout redirected");
                chain.aborted = true;
                return chain;
            }

            let terminates = module.terminates_layouts();
            chain.entries.push(LayoutChainEntry {
                path: path.clone(),
                component,
                load_result,
                terminates_inheritance: terminates,
            });
            if terminates {
                debug!(layout = %path.display(), "Layout inheritance stops here");
                break;
            }
        }

        chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{ModuleRegistry, PageModule};
    use crate::vnode::VNode;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use trellis_core::{Error, HttpRequest};

    fn layout(name: &'static str) -> PageModule {
        PageModule::new().component(name, move |props| {
            Ok(VNode::element("div")
                .attr("data-layout", name)
                .child(props.children()))
        })
    }

    fn paths(list: &[&str]) -> Vec<PathBuf> {
        list.iter().map(PathBuf::from).collect()
    }

    fn ctx() -> LoadContext {
        LoadContext::new(HttpRequest::get("/a/b"), "/a/b")
    }

    #[tokio::test]
    async fn test_chain_order_and_data() {
        let registry = ModuleRegistry::new()
            .with("pages/a/_layout.tsx", layout("A").loader(|_| async { Ok(json!({"a": 1})) }))
            .with("pages/_layout.tsx", layout("Root"));
        let loader = LayoutChainLoader::new(Arc::new(registry));

        let chain = loader
            .load_chain(&paths(&["pages/a/_layout.tsx", "pages/_layout.tsx"]), &ctx())
            .await;
        assert!(!chain.aborted);
        assert_eq!(chain.len(), 2);
        assert_eq!(chain.entries[0].component.name(), "A");
        assert_eq!(chain.data(), vec![json!({"a": 1}), Value::Null]);
    }

    #[tokio::test]
    async fn test_missing_and_failing_layouts_are_skipped() {
        let registry = ModuleRegistry::new()
            .with(
                "pages/a/_layout.tsx",
                layout("A").loader(|_| async { Err(Error::Internal("db down".into())) }),
            )
            .with("pages/_layout.tsx", layout("Root"))
            .with("pages/b/_layout.tsx", PageModule::new());
        let loader = LayoutChainLoader::new(Arc::new(registry));

        let chain = loader
            .load_chain(
                &paths(&["pages/missing/_layout.tsx", "pages/b/_layout.tsx", "pages/a/_layout.tsx", "pages/_layout.tsx"]),
                &ctx(),
            )
            .await;
        assert!(!chain.aborted);
        assert_eq!(chain.len(), 1);
        assert_eq!(chain.entries[0].component.name(), "Root");
    }

    #[tokio::test]
    async fn test_redirect_aborts_chain() {
        let outer_calls = Arc::new(AtomicUsize::new(0));
        let counter = outer_calls.clone();
        let registry = ModuleRegistry::new()
            .with(
                "pages/a/_layout.tsx",
                layout("A").loader(|ctx: LoadContext| async move {
                    ctx.res.redirect("/login", 302);
                    Ok(Value::Null)
                }),
            )
            .with(
                "pages/_layout.tsx",
                layout("Root").loader(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Ok(Value::Null) }
                }),
            );
        let loader = LayoutChainLoader::new(Arc::new(registry));
        let ctx = ctx();

        let chain = loader
            .load_chain(&paths(&["pages/a/_layout.tsx", "pages/_layout.tsx"]), &ctx)
            .await;
        assert!(chain.aborted);
        assert!(chain.is_empty());
        assert_eq!(outer_calls.load(Ordering::SeqCst), 0);
        assert_eq!(ctx.res.redirect_target(), Some((302, "/login".to_string())));
    }

    #[tokio::test]
    async fn test_layout_false_stops_inheritance() {
        let registry = ModuleRegistry::new()
            .with("pages/a/_layout.tsx", layout("A").no_layout())
            .with("pages/_layout.tsx", layout("Root"));
        let loader = LayoutChainLoader::new(Arc::new(registry));

        let chain = loader
            .load_chain(&paths(&["pages/a/_layout.tsx", "pages/_layout.tsx"]), &ctx())
            .await;
        assert_eq!(chain.len(), 1);
        assert!(chain.entries[0].terminates_inheritance);
    }
}
