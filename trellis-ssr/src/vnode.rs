//! Virtual DOM nodes and component props.

use serde_json::{Map, Value};

/// A node in a rendered component tree.
#[derive(Debug, Clone, PartialEq)]
pub enum VNode {
    Element {
        tag: String,
        attrs: Vec<(String, String)>,
        children: Vec<VNode>,
    },
    /// Text content, escaped on output.
    Text(String),
    /// Pre-rendered HTML, emitted verbatim.
    Raw(String),
    Fragment(Vec<VNode>),
    Empty,
}

impl VNode {
    pub fn element(tag: impl Into<String>) -> Self {
        VNode::Element {
            tag: tag.into(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        VNode::Text(text.into())
    }

    pub fn raw(html: impl Into<String>) -> Self {
        VNode::Raw(html.into())
    }

    pub fn fragment(children: impl IntoIterator<Item = VNode>) -> Self {
        VNode::Fragment(children.into_iter().collect())
    }

    /// Add an attribute. No-op on non-element nodes.
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        if let VNode::Element { attrs, .. } = &mut self {
            attrs.push((name.into(), value.into()));
        }
        self
    }

    /// Append a child. No-op on text and raw nodes.
    pub fn child(mut self, node: VNode) -> Self {
        match &mut self {
            VNode::Element { children, .. } | VNode::Fragment(children) => children.push(node),
            _ => {}
        }
        self
    }

    pub fn children(self, nodes: impl IntoIterator<Item = VNode>) -> Self {
        nodes.into_iter().fold(self, VNode::child)
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, VNode::Empty)
    }
}

/// Shorthand for an element with text-free children.
pub fn h(tag: &str, attrs: &[(&str, &str)], children: Vec<VNode>) -> VNode {
    attrs
        .iter()
        .fold(VNode::element(tag), |node, (k, v)| node.attr(*k, *v))
        .children(children)
}

/// Props handed to a component: a JSON object plus optional children.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Props {
    pub data: Map<String, Value>,
    pub children: Option<VNode>,
}

impl Props {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spread a JSON value into props. Objects merge key by key; any other
    /// non-null value lands under `data`.
    pub fn from_value(value: &Value) -> Self {
        let mut props = Self::new();
        props.spread(value);
        props
    }

    pub fn spread(&mut self, value: &Value) {
        match value {
            Value::Object(map) => {
                for (k, v) in map {
                    self.data.insert(k.clone(), v.clone());
                }
            }
            Value::Null => {}
            other => {
                self.data.insert("data".to_string(), other.clone());
            }
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn with_children(mut self, children: VNode) -> Self {
        self.children = Some(children);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    /// Children, or an empty node.
    pub fn children(&self) -> VNode {
        self.children.clone().unwrap_or(VNode::Empty)
    }
}

/// Escape text for use in HTML element content.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder() {
        let node = h("a", &[("href", "/x")], vec![VNode::text("go")]);
        assert_eq!(
            node,
            VNode::Element {
                tag: "a".into(),
                attrs: vec![("href".into(), "/x".into())],
                children: vec![VNode::Text("go".into())],
            }
        );
    }

    #[test]
    fn test_props_spread() {
        let props = Props::from_value(&json!({"a": 1})).with("routePath", "/");
        assert_eq!(props.get("a"), Some(&json!(1)));
        assert_eq!(props.get_str("routePath"), Some("/"));

        let scalar = Props::from_value(&json!([1, 2]));
        assert_eq!(scalar.get("data"), Some(&json!([1, 2])));
        assert!(Props::from_value(&Value::Null).data.is_empty());
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html(r#"<a href="x">&'"#),
            "&lt;a href=&quot;x&quot;&gt;&amp;&#x27;"
        );
    }
}
