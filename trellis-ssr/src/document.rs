//! The HTML document around a rendered page body.

use crate::vnode::escape_html;
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream;
use trellis_core::BoxByteStream;

/// Doctype, `<head>` and the mount element wrapped around the body markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentShell {
    pub lang: String,
    /// Extra head markup (metadata tags).
    pub head_html: String,
    pub root_id: String,
}

impl Default for DocumentShell {
    fn default() -> Self {
        Self {
            lang: "en".to_string(),
            head_html: String::new(),
            root_id: "app".to_string(),
        }
    }
}

impl DocumentShell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = lang.into();
        self
    }

    pub fn with_head(mut self, head_html: impl Into<String>) -> Self {
        self.head_html = head_html.into();
        self
    }

    pub fn with_root_id(mut self, root_id: impl Into<String>) -> Self {
        self.root_id = root_id.into();
        self
    }

    /// Everything up to and including the opening mount element.
    pub fn prefix(&self) -> String {
        format!(
            "<!DOCTYPE html><html lang=\"{}\"><head><meta charset=\"utf-8\">\
<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">{}</head>\
<body><div id=\"{}\">",
            escape_html(&self.lang),
            self.head_html,
            escape_html(&self.root_id)
        )
    }

    pub fn suffix(&self) -> &'static str {
        "</div></body></html>"
    }

    pub fn wrap(&self, body: &str) -> String {
        let mut out = self.prefix();
        out.push_str(body);
        out.push_str(self.suffix());
        out
    }

    /// Stream the prefix, the body chunks, then the suffix.
    pub fn wrap_stream(&self, body: BoxByteStream) -> BoxByteStream {
        let prefix = stream::once(futures_util::future::ready(Ok(Bytes::from(self.prefix()))));
        let suffix = stream::once(futures_util::future::ready(Ok(Bytes::from_static(
            self.suffix().as_bytes(),
        ))));
        Box::pin(prefix.chain(body).chain(suffix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::streaming::{collect_stream, stream_from_chunks};

    #[test]
    fn test_wrap() {
        let shell = DocumentShell::new()
            .with_lang("fr")
            .with_head("<title>x</title>")
            .with_root_id("root");
        let html = shell.wrap("<p>hi</p>");
        assert!(html.starts_with("<!DOCTYPE html><html lang=\"fr\"><head><meta charset=\"utf-8\">"));
        assert!(html.contains("<title>x</title></head><body><div id=\"root\"><p>hi</p></div></body></html>"));
    }

    #[tokio::test]
    async fn test_wrap_stream_matches_wrap() {
        let shell = DocumentShell::new();
        let streamed = collect_stream(shell.wrap_stream(stream_from_chunks(vec!["<p>", "hi</p>"])))
            .await
            .unwrap();
        assert_eq!(String::from_utf8(streamed).unwrap(), shell.wrap("<p>hi</p>"));
    }
}
