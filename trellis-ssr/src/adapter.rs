//! The render adapter seam and the built-in HTML adapter.

use crate::inject::HydrationPayload;
use crate::module::Component;
use crate::vnode::{Props, VNode, escape_html};
use bytes::Bytes;
use trellis_core::{BoxByteStream, Result};

/// What the rendering pipeline needs from a UI library.
pub trait RenderAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Instantiate a component with props.
    fn create_element(&self, component: &Component, props: Props) -> Result<VNode> {
        component.call(&props)
    }

    fn render_to_string(&self, node: &VNode) -> Result<String>;

    /// Pull-based stream of the rendered tree, if supported.
    fn render_to_stream(&self, _node: VNode) -> Option<BoxByteStream> {
        None
    }

    fn supports_streaming(&self) -> bool {
        false
    }

    /// Head tags that preload the adapter's browser runtime.
    fn preload_scripts(&self) -> Vec<String> {
        Vec::new()
    }

    /// Module script that mounts or hydrates the page in the browser.
    fn bootstrap_script(&self, _payload: &HydrationPayload) -> String {
        bootstrap(None)
    }
}

/// Client bootstrap: read the embedded payload, import the page and layout
/// modules, and hand them to the runtime's `mount`.
pub fn bootstrap(runtime_url: Option<&str>) -> String {
    let import = match runtime_url {
        Some(url) => format!("import {{ mount }} from {};\n", js_string(url)),
        None => "const mount = window.__trellis_mount;\n".to_string(),
    };
    format!(
        "<script type=\"module\">\n{import}\
const data = JSON.parse(document.getElementById({id}).textContent);\n\
const [page, ...layouts] = await Promise.all([data.module, ...data.layouts].map((u) => import(u)));\n\
if (typeof mount === \"function\") mount({{ data, page, layouts, root: document.getElementById(data.rootId), hydrate: data.hydrate }});\n\
</script>",
        id = js_string(crate::inject::DATA_ELEMENT_ID),
    )
}

fn js_string(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

/// Default stream chunk size.
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

/// Renders [`VNode`] trees to HTML.
#[derive(Debug, Clone)]
pub struct HtmlAdapter {
    chunk_size: usize,
    runtime_url: Option<String>,
}

impl Default for HtmlAdapter {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            runtime_url: None,
        }
    }
}

impl HtmlAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// Browser module exporting `mount`.
    pub fn with_runtime(mut self, url: impl Into<String>) -> Self {
        self.runtime_url = Some(url.into());
        self
    }
}

impl RenderAdapter for HtmlAdapter {
    fn name(&self) -> &str {
        "html"
    }

    fn render_to_string(&self, node: &VNode) -> Result<String> {
        Ok(HtmlChunks::new(node.clone(), usize::MAX).collect())
    }

    fn render_to_stream(&self, node: VNode) -> Option<BoxByteStream> {
        let chunks = HtmlChunks::new(node, self.chunk_size)
            .map(|chunk| Ok::<_, trellis_core::Error>(Bytes::from(chunk)));
        Some(Box::pin(futures_util::stream::iter(chunks)))
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    fn preload_scripts(&self) -> Vec<String> {
        self.runtime_url
            .iter()
            .map(|url| format!("<link rel=\"modulepreload\" href=\"{}\">", escape_html(url)))
            .collect()
    }

    fn bootstrap_script(&self, _payload: &HydrationPayload) -> String {
        bootstrap(self.runtime_url.as_deref())
    }
}

enum Work {
    Node(VNode),
    Close(String),
}

/// Lazily serializes a tree, yielding chunks of at least `chunk_size`
/// bytes (the last one may be shorter).
pub struct HtmlChunks {
    stack: Vec<Work>,
    chunk_size: usize,
}

impl HtmlChunks {
    pub fn new(root: VNode, chunk_size: usize) -> Self {
        Self {
            stack: vec![Work::Node(root)],
            chunk_size,
        }
    }
}

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| !b.is_ascii_whitespace() && !matches!(b, b'"' | b'\'' | b'>' | b'/' | b'=' | b'<'))
}

impl Iterator for HtmlChunks {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let mut buf = String::new();
        while let Some(work) = self.stack.pop() {
            match work {
                Work::Close(tag) => {
                    buf.push_str("</");
                    buf.push_str(&tag);
                    buf.push('>');
                }
                Work::Node(VNode::Element {
                    tag,
                    attrs,
                    children,
                }) => {
                    if !valid_name(&tag) {
                        continue;
                    }
                    buf.push('<');
                    buf.push_str(&tag);
                    for (name, value) in attrs.iter().filter(|(n, _)| valid_name(n)) {
                        buf.push(' ');
                        buf.push_str(name);
                        buf.push_str("=\"");
                        buf.push_str(&escape_html(value));
                        buf.push('"');
                    }
                    buf.push('>');
                    if !VOID_ELEMENTS.contains(&tag.to_ascii_lowercase().as_str()) {
                        self.stack.push(Work::Close(tag));
                        self.stack
                            .extend(children.into_iter().rev().map(Work::Node));
                    }
                }
                Work::Node(VNode::Text(text)) => buf.push_str(&escape_html(&text)),
                Work::Node(VNode::Raw(html)) => buf.push_str(&html),
                Work::Node(VNode::Fragment(children)) => {
                    self.stack
                        .extend(children.into_iter().rev().map(Work::Node));
                }
                Work::Node(VNode::Empty) => {}
            }
            if buf.len() >= self.chunk_size {
                return Some(buf);
            }
        }
        if buf.is_empty() { None } else { Some(buf) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vnode::h;
    use trellis_core::streaming::collect_stream;

    fn tree() -> VNode {
        h(
            "main",
            &[("class", "a\"b")],
            vec![
                h("h1", &[], vec![VNode::text("<Hi>")]),
                VNode::element("br"),
                VNode::fragment([VNode::raw("<em>x</em>"), VNode::Empty]),
            ],
        )
    }

    #[test]
    fn test_render_to_string() {
        let html = HtmlAdapter::new().render_to_string(&tree()).unwrap();
        assert_eq!(
            html,
            "<main class=\"a&quot;b\"><h1>&lt;Hi&gt;</h1><br><em>x</em></main>"
        );
    }

    #[test]
    fn test_invalid_attribute_names_dropped() {
        let node = VNode::element("div").attr("onclick=\"x\"", "1").attr("id", "ok");
        let html = HtmlAdapter::new().render_to_string(&node).unwrap();
        assert_eq!(html, "<div id=\"ok\"></div>");
    }

    #[tokio::test]
    async fn test_stream_matches_string() {
        let adapter = HtmlAdapter::new().with_chunk_size(4);
        let chunks: Vec<String> = HtmlChunks::new(tree(), 4).collect();
        assert!(chunks.len() > 3);

        let stream = adapter.render_to_stream(tree()).unwrap();
        let streamed = String::from_utf8(collect_stream(stream).await.unwrap()).unwrap();
        assert_eq!(streamed, adapter.render_to_string(&tree()).unwrap());
    }
}
