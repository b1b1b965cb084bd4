//! Page composition and rendering.
//!
//! The page is built first, then wrapped by each layout from the most
//! specific outwards, then by the app shell. Every component in the chain
//! must build its tree synchronously; async components are rejected before
//! anything is called.

use crate::adapter::RenderAdapter;
use crate::layout::LayoutChain;
use crate::module::Component;
use crate::render_mode::RenderMode;
use crate::vnode::{Props, VNode};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error};
use trellis_core::{BoxByteStream, Error, Result};

/// Rendered page body.
pub enum RenderOutput {
    Html(String),
    Stream(BoxByteStream),
}

impl RenderOutput {
    pub fn is_stream(&self) -> bool {
        matches!(self, RenderOutput::Stream(_))
    }

    /// The buffered body, if this is not a stream.
    pub fn as_html(&self) -> Option<&str> {
        match self {
            RenderOutput::Html(html) => Some(html),
            RenderOutput::Stream(_) => None,
        }
    }
}

impl std::fmt::Debug for RenderOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RenderOutput::Html(html) => f.debug_tuple("Html").field(&html.len()).finish(),
            RenderOutput::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Everything needed to render one page.
#[derive(Debug, Clone, Copy)]
pub struct RenderInput<'a> {
    pub page: Option<&'a Component>,
    pub layouts: &'a LayoutChain,
    pub app_shell: Option<&'a Component>,
    /// Page `load()` result.
    pub data: &'a Value,
    pub params: &'a Value,
    /// Matched route pattern.
    pub route_path: &'a str,
    pub url: &'a str,
    pub mode: RenderMode,
    /// Prefer a streamed body when the adapter can produce one.
    pub stream: bool,
}

/// Composes and renders pages through a [`RenderAdapter`].
#[derive(Clone)]
pub struct PageRenderer {
    adapter: Arc<dyn RenderAdapter>,
}

impl PageRenderer {
    pub fn new(adapter: Arc<dyn RenderAdapter>) -> Self {
        Self { adapter }
    }

    pub fn adapter(&self) -> &Arc<dyn RenderAdapter> {
        &self.adapter
    }

    /// Render the page body. `csr` yields an empty body without calling
    /// any component.
    pub fn render(&self, input: RenderInput<'_>) -> Result<RenderOutput> {
        if input.mode == RenderMode::Csr {
            debug!(route = input.route_path, "Client-rendered page, empty body");
            return Ok(RenderOutput::Html(String::new()));
        }

        let tree = self.compose(&input)?;

        if input.stream && self.adapter.supports_streaming() {
            if let Some(stream) = self.adapter.render_to_stream(tree.clone()) {
                debug!(route = input.route_path, adapter = self.adapter.name(), "Streaming page body");
                return Ok(RenderOutput::Stream(stream));
            }
        }
        self.adapter
            .render_to_string(&tree)
            .map(RenderOutput::Html)
            .inspect_err(|e| error!(route = input.route_path, error = %e, "Render failed"))
    }

    /// Build the composed tree: page, then layouts outwards, then the app shell.
    pub fn compose(&self, input: &RenderInput<'_>) -> Result<VNode> {
        let page = input
            .page
            .ok_or_else(|| Error::PageComponentMissing(input.route_path.to_string()))?;
        reject_async(
            std::iter::once(page)
                .chain(input.layouts.entries.iter().map(|e| &e.component))
                .chain(input.app_shell),
        )?;

        let props = Props::from_value(input.data)
            .with("params", input.params.clone())
            .with("routePath", input.route_path)
            .with("url", input.url);
        let mut node = self.adapter.create_element(page, props)?;

        for layout in &input.layouts.entries {
            let props = Props::from_value(&layout.load_result)
                .with("routePath", input.route_path)
                .with("url", input.url)
                .with_children(node);
            node = self.adapter.create_element(&layout.component, props)?;
        }

        if let Some(shell) = input.app_shell {
            node = self
                .adapter
                .create_element(shell, Props::new().with_children(node))?;
        }
        Ok(node)
    }
}

fn reject_async<'a>(components: impl Iterator<Item = &'a Component>) -> Result<()> {
    for component in components {
        if component.is_async() {
            error!(component = component.name(), "Async component in render chain");
            return Err(Error::AsyncComponent(component.name().to_string()));
        }
    }
    Ok(())
}
