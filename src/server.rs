//! The page server: route lookup, middleware, API dispatch and the internal
//! endpoints. Page rendering lives in [`crate::page`].

use crate::config::{PREFETCH_ENDPOINT, ServerConfig};
use crate::hmr::{HmrEvent, HmrManager};
use async_trait::async_trait;
use parking_lot::{RwLock, RwLockReadGuard};
use std::any::Any;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};
use trellis_compiler::ModuleCompiler;
use trellis_core::{
    Error, HandlerFn, HandlerFuture, HttpRequest, HttpResponse, MODULES_PREFIX, Middleware,
    MiddlewareChain, Result,
};
use trellis_prefetch::{BatchEntry, PrefetchBatchResolver, PrefetchSource, parse_pattern_list};
use trellis_router::{RouteDescriptor, RouteKind, RouteTable};
use trellis_ssr::{
    HtmlAdapter, LayoutChainLoader, LoadContext, ModuleLoader, PageRenderer, RenderAdapter,
    RenderModeResolver, SessionProvider, detect_lang,
};

pub(crate) struct ServerInner {
    pub(crate) config: ServerConfig,
    pub(crate) routes: RwLock<RouteTable>,
    /// Whether the table came from a directory scan and can be rescanned.
    scanned: bool,
    pub(crate) modules: Arc<dyn ModuleLoader>,
    pub(crate) compiler: ModuleCompiler,
    pub(crate) renderer: PageRenderer,
    pub(crate) resolver: RenderModeResolver,
    pub(crate) layouts: LayoutChainLoader,
    prefetch: PrefetchBatchResolver,
    middleware: MiddlewareChain,
    session: Option<Arc<dyn SessionProvider>>,
    db: Option<Arc<dyn Any + Send + Sync>>,
    hmr: Option<HmrManager>,
}

/// Serves pages, API routes, compiled modules and prefetch batches.
///
/// Cheap to clone; every clone shares the same route table and module cache.
#[derive(Clone)]
pub struct PageServer {
    pub(crate) inner: Arc<ServerInner>,
}

/// Builder for [`PageServer`].
pub struct PageServerBuilder {
    config: ServerConfig,
    modules: Option<Arc<dyn ModuleLoader>>,
    routes: Option<RouteTable>,
    compiler: Option<ModuleCompiler>,
    adapter: Arc<dyn RenderAdapter>,
    middleware: MiddlewareChain,
    session: Option<Arc<dyn SessionProvider>>,
    db: Option<Arc<dyn Any + Send + Sync>>,
}

impl PageServerBuilder {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            modules: None,
            routes: None,
            compiler: None,
            adapter: Arc::new(HtmlAdapter::new()),
            middleware: MiddlewareChain::new(),
            session: None,
            db: None,
        }
    }

    /// Where page, layout and API modules come from. Required.
    pub fn modules(mut self, loader: Arc<dyn ModuleLoader>) -> Self {
        self.modules = Some(loader);
        self
    }

    /// Use a prepared route table instead of scanning the pages directory.
    pub fn route_table(mut self, table: RouteTable) -> Self {
        self.routes = Some(table);
        self
    }

    /// Use a prepared compiler, e.g. one with a transpiling transform.
    pub fn compiler(mut self, compiler: ModuleCompiler) -> Self {
        self.compiler = Some(compiler);
        self
    }

    pub fn adapter(mut self, adapter: Arc<dyn RenderAdapter>) -> Self {
        self.adapter = adapter;
        self
    }

    pub fn middleware<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.middleware.use_middleware(middleware);
        self
    }

    pub fn session_provider(mut self, provider: Arc<dyn SessionProvider>) -> Self {
        self.session = Some(provider);
        self
    }

    /// Handle exposed to loaders as `ctx.db()`.
    pub fn db<T: Any + Send + Sync>(mut self, db: Arc<T>) -> Self {
        self.db = Some(db as Arc<dyn Any + Send + Sync>);
        self
    }

    pub fn build(self) -> Result<PageServer> {
        let modules = self
            .modules
            .ok_or_else(|| Error::Internal("PageServer needs a module loader".to_string()))?;
        let config = self.config;

        let (routes, scanned) = match self.routes {
            Some(table) => (table, false),
            None => (RouteTable::scan(&config.root_dir, &config.pages_dir)?, true),
        };
        let compiler = match self.compiler {
            Some(compiler) => compiler,
            None => ModuleCompiler::new(config.compiler_config())?,
        };
        let hmr = config
            .hmr_endpoint()
            .is_some()
            .then(|| HmrManager::new(config.hmr.clone()));

        info!(
            routes = routes.routes().len(),
            adapter = self.adapter.name(),
            dev = config.render.dev,
            streaming = config.render.streaming,
            "Page server ready"
        );

        Ok(PageServer {
            inner: Arc::new(ServerInner {
                routes: RwLock::new(routes),
                scanned,
                layouts: LayoutChainLoader::new(modules.clone()),
                modules,
                compiler,
                renderer: PageRenderer::new(self.adapter),
                resolver: RenderModeResolver::new(config.render.clone()),
                prefetch: PrefetchBatchResolver::new(config.prefetch.clone()),
                middleware: self.middleware,
                session: self.session,
                db: self.db,
                hmr,
                config,
            }),
        })
    }
}

impl PageServer {
    pub fn builder(config: ServerConfig) -> PageServerBuilder {
        PageServerBuilder::new(config)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    pub fn compiler(&self) -> &ModuleCompiler {
        &self.inner.compiler
    }

    /// Read access to the route table. Do not hold across an `.await`.
    pub fn routes(&self) -> RwLockReadGuard<'_, RouteTable> {
        self.inner.routes.read()
    }

    pub fn hmr(&self) -> Option<&HmrManager> {
        self.inner.hmr.as_ref()
    }

    /// Handle one request. Never fails: every error becomes a response.
    #[instrument(skip_all, fields(method = %req.method, path = %req.path))]
    pub async fn handle(&self, mut req: HttpRequest) -> HttpResponse {
        if let Some(encoded) = req.path.strip_prefix(MODULES_PREFIX) {
            let encoded = encoded.to_string();
            return self.serve_module(&encoded, &req).await;
        }
        if req.path == PREFETCH_ENDPOINT {
            return self.serve_prefetch(&req).await;
        }
        if let Some(hmr) = &self.inner.hmr
            && req.path == hmr.config().endpoint
        {
            return hmr.sse_response();
        }

        let matched = self.inner.routes.read().lookup(&req.path);
        let Some(matched) = matched else {
            debug!("No route matched");
            return self.not_found(&req).await;
        };
        req.path_params = matched.params;
        let route = matched.descriptor;
        let kind = route.kind;

        let server = self.clone();
        let handler: HandlerFn = Arc::new(move |req: HttpRequest| -> HandlerFuture {
            let server = server.clone();
            let route = route.clone();
            Box::pin(async move { Ok(server.dispatch(&route, req).await) })
        });

        match self.inner.middleware.apply(req, handler).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Middleware rejected request");
                match kind {
                    RouteKind::Api => json_error(&e),
                    RouteKind::Page => crate::error_pages::fallback_response(e.status_code(), &e.message()),
                }
            }
        }
    }

    async fn dispatch(&self, route: &RouteDescriptor, req: HttpRequest) -> HttpResponse {
        match route.kind {
            RouteKind::Api => self.dispatch_api(route, req).await,
            RouteKind::Page => self.render_page(route, req).await,
        }
    }

    async fn dispatch_api(&self, route: &RouteDescriptor, req: HttpRequest) -> HttpResponse {
        let module = match self.inner.modules.load_module(&route.source_file).await {
            Ok(module) => module,
            Err(e) => {
                error!(route = %route.path_pattern, error = %e, "API module unavailable");
                return json_error(&e);
            }
        };
        let Some(handler) = module.handler_for(&req.method).cloned() else {
            let err = Error::MethodNotAllowed(format!(
                "Method {} not allowed on {}",
                req.method, route.path_pattern
            ));
            return json_error(&err).with_header("Allow", module.allowed_methods().join(", "));
        };

        let ctx = self.load_context(req, &route.path_pattern);
        let res = ctx.res.clone();
        match handler(ctx).await {
            Ok(response) => res.apply_to(response),
            Err(e) => {
                warn!(route = %route.path_pattern, status = e.status_code(), error = %e, "API handler failed");
                json_error(&e)
            }
        }
    }

    /// Loader context for a request, carrying the session provider, the db
    /// handle and the detected language.
    pub(crate) fn load_context(&self, req: HttpRequest, route_path: &str) -> LoadContext {
        let lang = detect_lang(&req, &self.inner.config.default_lang);
        let mut ctx = LoadContext::new(req, route_path).with_lang(lang);
        if let Some(session) = &self.inner.session {
            ctx = ctx.with_session_provider(session.clone());
        }
        if let Some(db) = &self.inner.db {
            ctx = ctx.with_db(db.clone());
        }
        ctx
    }

    async fn serve_module(&self, encoded: &str, req: &HttpRequest) -> HttpResponse {
        let path = match urlencoding::decode(encoded) {
            Ok(path) => path.into_owned(),
            Err(_) => return json_error(&Error::BadRequest("Invalid module path encoding".to_string())),
        };
        let bypass = req.has_query("t");
        match self.inner.compiler.get_compiled_module(Path::new(&path), bypass).await {
            Ok(code) => HttpResponse::javascript(code.to_string()).with_header("Cache-Control", "no-cache"),
            Err(e) => {
                let err = Error::from(e);
                warn!(module = %path, status = err.status_code(), error = %err, "Module request failed");
                json_error(&err)
            }
        }
    }

    async fn serve_prefetch(&self, req: &HttpRequest) -> HttpResponse {
        let requested = req.query("patterns").map(parse_pattern_list);
        let resolved = {
            let table = self.inner.routes.read();
            self.inner.prefetch.resolve_table(&table, requested.as_deref())
        };
        let (dynamic, routes): (Vec<_>, Vec<_>) = resolved.into_iter().partition(|r| r.is_dynamic());
        if !dynamic.is_empty() {
            debug!(skipped = dynamic.len(), "Dynamic routes left out of prefetch batch");
        }

        let entries = self.inner.prefetch.batch_fetch(self, &routes, req).await;
        match HttpResponse::json(&entries) {
            Ok(response) => response.with_header("Cache-Control", "no-cache"),
            Err(e) => json_error(&e),
        }
    }

    /// Start watching for file changes and reloading connected browsers.
    /// A no-op outside development mode.
    pub fn start_hmr(&self) -> Result<()> {
        let Some(hmr) = self.inner.hmr.clone() else {
            return Ok(());
        };
        let mut events = hmr.subscribe();
        hmr.start_watching(&self.inner.config.root_dir)?;

        let server = self.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => server.apply_change(&hmr, &event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Hot reload events dropped, clearing module cache");
                        server.inner.compiler.clear_cache();
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(())
    }

    /// Apply one file change: drop compiled modules, rescan routes when
    /// files came or went, then tell the browsers.
    pub async fn apply_change(&self, hmr: &HmrManager, event: &HmrEvent) {
        // Bundles inline their dependencies, so any change can affect any entry.
        self.inner.compiler.clear_cache();
        if event.kind.changes_routes() && self.inner.scanned {
            match self.rescan_routes().await {
                Ok(table) => *self.inner.routes.write() = table,
                Err(e) => warn!(error = %e, "Route rescan failed, keeping previous routes"),
            }
        }
        let clients = hmr.notify_clients(event);
        info!(path = %event.path.display(), kind = ?event.kind, clients, "Reloaded after change");
    }
}

impl PageServer {
    /// Build a fresh table on the blocking pool; lookups keep using the
    /// current one until the caller swaps it in.
    async fn rescan_routes(&self) -> Result<RouteTable> {
        let config = &self.inner.config;
        let (root, pages) = (config.root_dir.clone(), config.pages_dir.clone());
        let table = tokio::task::spawn_blocking(move || RouteTable::scan(root, pages))
            .await
            .map_err(|e| Error::Internal(format!("Route scan task failed: {e}")))??;
        Ok(table)
    }
}

#[async_trait]
impl PrefetchSource for PageServer {
    async fn fetch_entry(&self, route: &RouteDescriptor, origin: &HttpRequest) -> Result<BatchEntry> {
        let body = self
            .inner
            .compiler
            .get_compiled_module(&route.source_file, false)
            .await?;
        let module = self.inner.modules.load_module(&route.source_file).await?;

        let mut req = HttpRequest::new("GET", route.path_pattern.clone());
        req.headers = origin.headers.clone();
        let ctx = self.load_context(req, &route.path_pattern);

        let layout_paths = if module.terminates_layouts() {
            Vec::new()
        } else {
            self.inner.routes.read().layouts_for(&route.path_pattern)
        };
        let chain = self.inner.layouts.load_chain(&layout_paths, &ctx).await;
        if chain.aborted {
            return Err(Error::load(&route.path_pattern, "layout redirected"));
        }
        let page_data = module.run_load(&ctx).await?;
        if ctx.res.is_redirect() {
            return Err(Error::load(&route.path_pattern, "page redirected"));
        }

        Ok(BatchEntry {
            route: route.path_pattern.clone(),
            body: body.to_string(),
            page_data,
            layouts: (!chain.is_empty()).then(|| chain.data()),
        })
    }
}

/// `{ success: false, error, details? }` with the error's status.
pub(crate) fn json_error(err: &Error) -> HttpResponse {
    HttpResponse::new(err.status_code())
        .with_json(&err.to_api_body())
        .unwrap_or_else(|_| HttpResponse::internal_server_error())
}
