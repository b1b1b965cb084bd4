//! Page rendering for matched routes, plus the `_404` and `_error` pages.

use crate::error_pages::fallback_response;
use crate::server::PageServer;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};
use trellis_core::{Error, HttpRequest, HttpResponse, Result, module_url};
use trellis_router::RouteDescriptor;
use trellis_ssr::{
    ClientScripts, DocumentShell, HydrationPayload, LayoutChain, LoadContext, PageModule,
    RenderInput, RenderMode, RenderOutput, inject, inject_into_stream,
};

const HTML: &str = "text/html; charset=utf-8";

impl PageServer {
    /// Run the whole page pipeline: module, render decision, layout chain,
    /// page `load()`, metadata, render, scripts, response state.
    #[instrument(skip_all, fields(route = %route.path_pattern))]
    pub(crate) async fn render_page(&self, route: &RouteDescriptor, req: HttpRequest) -> HttpResponse {
        let inner = &self.inner;
        let module = match inner.modules.load_module(&route.source_file).await {
            Ok(module) if module.component.is_some() => module,
            Ok(_) => {
                let err = Error::PageComponentMissing(route.path_pattern.clone());
                error!(error = %err, "Page has no default component");
                return self.error_page(&req, err.status_code(), &err.message()).await;
            }
            Err(e) => {
                error!(error = %e, "Page module unavailable");
                let err = Error::PageComponentMissing(route.path_pattern.clone());
                return self.error_page(&req, err.status_code(), &err.message()).await;
            }
        };

        let source = self.detection_source(&module, route).await;
        let decision = inner
            .resolver
            .resolve(&module, &route.path_pattern, source.as_deref());

        let ctx = self.load_context(req, &route.path_pattern);
        let layout_paths = if module.terminates_layouts() {
            Vec::new()
        } else {
            inner.routes.read().layouts_for(&route.path_pattern)
        };
        let chain = inner.layouts.load_chain(&layout_paths, &ctx).await;
        if chain.aborted {
            return redirect_response(&ctx);
        }

        let data = match module.run_load(&ctx).await {
            Ok(data) => data,
            Err(_) if ctx.res.is_redirect() => return redirect_response(&ctx),
            Err(e) => {
                error!(error = %e, "Page load() failed");
                let status = if e.is_client_error() { e.status_code() } else { 500 };
                return self.error_page(&ctx.req, status, &e.message()).await;
            }
        };
        if ctx.res.is_redirect() {
            return redirect_response(&ctx);
        }

        let head_html = match &module.metadata {
            Some(metadata) => match metadata.resolve(&ctx, &data) {
                Ok(meta) => meta.to_head_html(),
                Err(e) => {
                    warn!(error = %e, "Metadata failed, rendering without it");
                    String::new()
                }
            },
            None => String::new(),
        };

        let shell_path = inner.routes.read().app_shell().map(Path::to_path_buf);
        let shell = self.load_optional(shell_path).await;

        let params = ctx.params_json();
        let config = &inner.config;
        let rendered = inner.renderer.render(RenderInput {
            page: module.component.as_ref(),
            layouts: &chain,
            app_shell: shell.as_ref().and_then(|m| m.component.as_ref()),
            data: &data,
            params: &params,
            route_path: &route.path_pattern,
            url: &ctx.url,
            mode: decision.render_mode,
            stream: config.render.streaming,
        });
        let output = match rendered {
            Ok(output) => output,
            Err(e) => return self.error_page(&ctx.req, e.status_code(), &e.message()).await,
        };

        let payload = decision.needs_client().then(|| HydrationPayload {
            route: route.path_pattern.clone(),
            url: ctx.url.clone(),
            module: route.client_bundle_ref.clone(),
            layouts: chain.paths().map(|p| module_url(p)).collect(),
            page_data: data.clone(),
            layout_data: chain.data(),
            params: params.clone(),
            render_mode: decision.render_mode,
            hydrate: decision.should_hydrate,
            root_id: config.render.root_id.clone(),
        });
        let scripts = match ClientScripts::assemble(
            inner.renderer.adapter().as_ref(),
            &config.browser_import_map,
            payload.as_ref(),
            config.hmr_endpoint(),
        ) {
            Ok(scripts) => scripts,
            Err(e) => {
                error!(error = %e, "Client scripts failed");
                return self.error_page(&ctx.req, 500, &e.message()).await;
            }
        };

        let document = DocumentShell::new()
            .with_lang(ctx.lang.clone())
            .with_head(head_html)
            .with_root_id(config.render.root_id.clone());
        debug!(
            mode = %decision.render_mode,
            hydrate = decision.should_hydrate,
            stream = output.is_stream(),
            "Page rendered"
        );
        let response = match output {
            RenderOutput::Html(body) => {
                HttpResponse::html(inject(&document.wrap(&body), &scripts.head, &scripts.body))
            }
            RenderOutput::Stream(body) => HttpResponse::ok()
                .with_header("Content-Type", HTML)
                .with_stream(inject_into_stream(
                    document.wrap_stream(body),
                    &scripts.head,
                    &scripts.body,
                )),
        };
        ctx.res.apply_to(response)
    }

    /// Source text for client-only API detection, read from disk only when
    /// nothing earlier in the precedence order could decide.
    async fn detection_source(&self, module: &PageModule, route: &RouteDescriptor) -> Option<String> {
        let render = &self.inner.config.render;
        if module.render_mode.is_some()
            || module.source.is_some()
            || !render.auto_detect
            || render.route_modes.contains_key(&route.path_pattern)
        {
            return None;
        }
        let path = self.inner.compiler.root().join(&route.source_file);
        tokio::fs::read_to_string(&path).await.ok()
    }

    async fn load_optional(&self, path: Option<PathBuf>) -> Option<Arc<PageModule>> {
        let path = path?;
        match self.inner.modules.load_module(&path).await {
            Ok(module) => Some(module),
            Err(e) => {
                warn!(module = %path.display(), error = %e, "Optional module unavailable");
                None
            }
        }
    }

    /// 404 for an unmatched path, through `_404` when there is one.
    pub(crate) async fn not_found(&self, req: &HttpRequest) -> HttpResponse {
        let page = self.inner.routes.read().not_found_page().map(Path::to_path_buf);
        let message = Error::RouteNotFound(req.path.clone()).message();
        self.special_page(req, page, 404, &message).await
    }

    /// Error response through `_error` when there is one.
    pub(crate) async fn error_page(&self, req: &HttpRequest, status: u16, message: &str) -> HttpResponse {
        let page = self.inner.routes.read().error_page().map(Path::to_path_buf);
        self.special_page(req, page, status, message).await
    }

    async fn special_page(
        &self,
        req: &HttpRequest,
        page: Option<PathBuf>,
        status: u16,
        message: &str,
    ) -> HttpResponse {
        if let Some(page) = page {
            match self.render_special(req, &page, status, message).await {
                Ok(html) => return HttpResponse::html(html).with_status(status),
                Err(e) => warn!(page = %page.display(), error = %e, "Error page failed, using fallback"),
            }
        }
        fallback_response(status, message)
    }

    /// Server-render a special page with `{ status, message }` as its data,
    /// inside the app shell and without layouts or hydration.
    async fn render_special(&self, req: &HttpRequest, page: &Path, status: u16, message: &str) -> Result<String> {
        let inner = &self.inner;
        let module = inner.modules.load_module(page).await?;
        let shell_path = inner.routes.read().app_shell().map(Path::to_path_buf);
        let shell = self.load_optional(shell_path).await;

        let data = json!({ "status": status, "message": message });
        let url = req.url();
        let layouts = LayoutChain::default();
        let output = inner.renderer.render(RenderInput {
            page: module.component.as_ref(),
            layouts: &layouts,
            app_shell: shell.as_ref().and_then(|m| m.component.as_ref()),
            data: &data,
            params: &Value::Object(Default::default()),
            route_path: &req.path,
            url: &url,
            mode: RenderMode::Ssr,
            stream: false,
        })?;
        let RenderOutput::Html(body) = output else {
            return Err(Error::Render("special pages render to a string".to_string()));
        };

        let config = &inner.config;
        let scripts = ClientScripts::assemble(
            inner.renderer.adapter().as_ref(),
            &config.browser_import_map,
            None,
            config.hmr_endpoint(),
        )?;
        let document = DocumentShell::new()
            .with_lang(trellis_ssr::detect_lang(req, &config.default_lang))
            .with_root_id(config.render.root_id.clone());
        Ok(inject(&document.wrap(&body), &scripts.head, &scripts.body))
    }
}

fn redirect_response(ctx: &LoadContext) -> HttpResponse {
    debug!(location = ?ctx.res.header("location"), "Loader redirected");
    ctx.res.apply_to(HttpResponse::new(302))
}
