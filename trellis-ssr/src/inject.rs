//! Client script assembly and buffered HTML injection.

use crate::adapter::RenderAdapter;
use crate::render_mode::RenderMode;
use crate::vnode::escape_html;
use memchr::memmem;
use serde::Serialize;
use serde_json::Value;
use trellis_compiler::ImportMap;
use trellis_core::Result;

/// Id of the `<script type="application/json">` element carrying page data.
pub const DATA_ELEMENT_ID: &str = "__TRELLIS_DATA__";

/// Everything the browser needs to mount or hydrate a page.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HydrationPayload {
    /// Route pattern.
    pub route: String,
    pub url: String,
    /// Page module URL.
    pub module: String,
    /// Layout module URLs, most specific first.
    pub layouts: Vec<String>,
    pub page_data: Value,
    pub layout_data: Vec<Value>,
    pub params: Value,
    pub render_mode: RenderMode,
    pub hydrate: bool,
    pub root_id: String,
}

/// Serialize to JSON that is safe inside a `<script>` element.
///
/// `<`, `>`, `&` and the JS line separators are written as `\u` escapes so
/// the payload can neither close the script element nor start a comment.
pub fn serialize_for_html<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let json = serde_json::to_string(value)?;
    Ok(escape_json_for_html(&json))
}

fn escape_json_for_html(json: &str) -> String {
    let mut out = String::with_capacity(json.len());
    for c in json.chars() {
        match c {
            '<' => out.push_str("\\u003c"),
            '>' => out.push_str("\\u003e"),
            '&' => out.push_str("\\u0026"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            c => out.push(c),
        }
    }
    out
}

/// `<script type="importmap">`, or `None` for an empty map.
pub fn import_map_script(map: &ImportMap) -> Option<String> {
    if map.is_empty() {
        return None;
    }
    Some(format!(
        "<script type=\"importmap\">{}</script>",
        escape_json_for_html(&map.to_json())
    ))
}

/// The serialized hydration payload.
pub fn hydration_data_script(payload: &HydrationPayload) -> Result<String> {
    Ok(format!(
        "<script id=\"{DATA_ELEMENT_ID}\" type=\"application/json\">{}</script>",
        serialize_for_html(payload)?
    ))
}

/// Hot-reload client listening on the server-sent events endpoint.
pub fn hmr_client_script(endpoint: &str) -> String {
    let endpoint = serde_json::Value::String(endpoint.to_string()).to_string();
    format!(
        "<script type=\"module\">\n\
const source = new EventSource({endpoint});\n\
source.addEventListener(\"reload\", () => location.reload());\n\
source.addEventListener(\"update\", (e) => {{ const d = JSON.parse(e.data); if (d.kind === \"style\") {{ for (const l of document.querySelectorAll(\"link[rel=stylesheet]\")) l.href = l.href.split(\"?\")[0] + \"?t=\" + Date.now(); }} else location.reload(); }});\n\
source.onerror = () => console.debug(\"[trellis] hot reload disconnected\");\n\
</script>"
    )
}

/// Head and body script tags for one response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientScripts {
    pub head: Vec<String>,
    pub body: Vec<String>,
}

impl ClientScripts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assemble the standard set: import map and preloads in the head,
    /// hydration payload and bootstrap in the body, then the hot-reload
    /// client when an endpoint is given.
    pub fn assemble(
        adapter: &dyn RenderAdapter,
        import_map: &ImportMap,
        payload: Option<&HydrationPayload>,
        hmr_endpoint: Option<&str>,
    ) -> Result<Self> {
        let mut scripts = Self::new();
        if let Some(script) = import_map_script(import_map) {
            scripts.head.push(script);
        }
        scripts.head.extend(adapter.preload_scripts());

        if let Some(payload) = payload {
            for url in std::iter::once(&payload.module).chain(payload.layouts.iter()) {
                scripts.head.push(format!(
                    "<link rel=\"modulepreload\" href=\"{}\">",
                    escape_html(url)
                ));
            }
            scripts.body.push(hydration_data_script(payload)?);
            scripts.body.push(adapter.bootstrap_script(payload));
        }
        if let Some(endpoint) = hmr_endpoint {
            scripts.body.push(hmr_client_script(endpoint));
        }
        Ok(scripts)
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_empty() && self.body.is_empty()
    }
}

/// Index just past the `>` of the first `<tag>` or `<tag ...>`.
pub(crate) fn find_open_tag(lower: &[u8], tag: &str) -> Option<usize> {
    let needle = format!("<{tag}");
    let finder = memmem::Finder::new(needle.as_bytes());
    let mut from = 0;
    while let Some(pos) = finder.find(&lower[from..]).map(|p| p + from) {
        let after = pos + needle.len();
        match lower.get(after) {
            Some(b'>') => return Some(after + 1),
            Some(b) if b.is_ascii_whitespace() => {
                return memchr::memchr(b'>', &lower[after..]).map(|p| after + p + 1);
            }
            _ => from = after,
        }
    }
    None
}

/// Insert head scripts before `</head>` and body scripts before the last
/// `</body>`.
///
/// Without `</head>`, head scripts go right after `<head>`; without any head,
/// a head block is synthesized after `<html>` or at the very start. Without
/// `</body>`, body scripts are appended.
pub fn inject(html: &str, head: &[String], body: &[String]) -> String {
    let head_html = head.concat();
    let body_html = body.concat();
    if head_html.is_empty() && body_html.is_empty() {
        return html.to_string();
    }
    let lower = html.to_ascii_lowercase();
    let bytes = lower.as_bytes();

    let (head_at, head_block) = if let Some(i) = memmem::find(bytes, b"</head>") {
        (i, head_html)
    } else if let Some(i) = find_open_tag(bytes, "head") {
        (i, head_html)
    } else {
        let at = find_open_tag(bytes, "html").unwrap_or(0);
        let block = if head_html.is_empty() {
            head_html
        } else {
            format!("<head>{head_html}</head>")
        };
        (at, block)
    };

    let body_at = memmem::rfind(bytes, b"</body>")
        .filter(|&i| i >= head_at)
        .unwrap_or(html.len());

    let mut out = String::with_capacity(html.len() + head_block.len() + body_html.len());
    out.push_str(&html[..head_at]);
    out.push_str(&head_block);
    out.push_str(&html[head_at..body_at]);
    out.push_str(&body_html);
    out.push_str(&html[body_at..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::HtmlAdapter;
    use serde_json::json;

    fn scripts() -> (Vec<String>, Vec<String>) {
        (vec!["<H/>".to_string()], vec!["<B/>".to_string()])
    }

    #[test]
    fn test_inject_full_document() {
        let (head, body) = scripts();
        let html = "<html><HEAD><title>x</title></HEAD><body><p>hi</p></BODY></html>";
        assert_eq!(
            inject(html, &head, &body),
            "<html><HEAD><title>x</title><H/></HEAD><body><p>hi</p><B/></BODY></html>"
        );
    }

    #[test]
    fn test_inject_without_head_close() {
        let (head, body) = scripts();
        let out = inject("<html><head lang=\"en\"><body>x</body></html>", &head, &body);
        assert_eq!(out, "<html><head lang=\"en\"><H/><body>x<B/></body></html>");
    }

    #[test]
    fn test_inject_synthesizes_head() {
        let (head, body) = scripts();
        assert_eq!(
            inject("<html><header>x</header></html>", &head, &body),
            "<html><head><H/></head><header>x</header></html><B/>"
        );
        assert_eq!(inject("<p>frag</p>", &head, &body), "<head><H/></head><p>frag</p><B/>");
    }

    #[test]
    fn test_payload_escaping() {
        let out = serialize_for_html(&json!({"x": "</script><!--&"})).unwrap();
        assert_eq!(out, r#"{"x":"\u003c/script\u003e\u003c!--\u0026"}"#);
        assert!(!out.contains("</"));
    }

    #[test]
    fn test_assemble_scripts() {
        let payload = HydrationPayload {
            route: "/users/:id".into(),
            url: "/users/1".into(),
            module: "/__modules/pages%2Fusers%2F%5Bid%5D.tsx".into(),
            layouts: vec!["/__modules/pages%2F_layout.tsx".into()],
            page_data: json!({"name": "<b>"}),
            layout_data: vec![json!({})],
            params: json!({"id": "1"}),
            render_mode: RenderMode::Hybrid,
            hydrate: true,
            root_id: "app".into(),
        };
        let map = ImportMap::new().with("preact", "https://esm.sh/preact");
        let scripts = ClientScripts::assemble(&HtmlAdapter::new(), &map, Some(&payload), Some("/__hmr")).unwrap();

        assert!(scripts.head[0].starts_with("<script type=\"importmap\">"));
        assert_eq!(scripts.head.len(), 3);
        assert_eq!(scripts.body.len(), 3);
        assert!(scripts.body[0].contains("\\u003cb\\u003e"));
        assert!(scripts.body[0].contains("\"renderMode\":\"hybrid\""));
        assert!(scripts.body[2].contains("new EventSource(\"/__hmr\")"));

        let bare = ClientScripts::assemble(&HtmlAdapter::new(), &ImportMap::new(), None, None).unwrap();
        assert!(bare.is_empty());
    }
}
