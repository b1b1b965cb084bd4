//! Page metadata rendered into `<head>`.

use crate::vnode::escape_html;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metadata {
    pub title: Option<String>,
    pub description: Option<String>,
    /// Extra `<meta name=.. content=..>` pairs.
    pub meta: BTreeMap<String, String>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_meta(mut self, name: impl Into<String>, content: impl Into<String>) -> Self {
        self.meta.insert(name.into(), content.into());
        self
    }

    /// Parse from a loose JSON object; unknown keys are ignored.
    pub fn from_value(value: &serde_json::Value) -> trellis_core::Result<Self> {
        Ok(serde_json::from_value(value.clone())?)
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none() && self.meta.is_empty()
    }

    /// Head tags, each value escaped.
    pub fn to_head_html(&self) -> String {
        let mut out = String::new();
        if let Some(title) = &self.title {
            out.push_str(&format!("<title>{}</title>", escape_html(title)));
        }
        if let Some(description) = &self.description {
            out.push_str(&format!(
                "<meta name=\"description\" content=\"{}\">",
                escape_html(description)
            ));
        }
        for (name, content) in &self.meta {
            out.push_str(&format!(
                "<meta name=\"{}\" content=\"{}\">",
                escape_html(name),
                escape_html(content)
            ));
        }
        out
    }
}
