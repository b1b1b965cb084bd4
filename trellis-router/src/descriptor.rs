//! Route descriptors and pattern segments.

use crate::error::{Result, RouterError};
use serde::Serialize;
use std::path::PathBuf;
use trellis_core::module_url;

/// Whether a route renders a page or answers an API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteKind {
    Page,
    Api,
}

/// One segment of a route pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Literal text, matched exactly.
    Static(String),
    /// `:id` or `[id]`, matches exactly one path segment.
    Param(String),
    /// `*`, `*rest` or `[...rest]`, matches every remaining segment.
    CatchAll(String),
}

impl Segment {
    /// Classify a single raw segment.
    pub fn parse(raw: &str, pattern: &str) -> Result<Self> {
        let named = |name: &str| {
            if name.is_empty() {
                Err(RouterError::invalid(pattern, format!("segment `{raw}` has no name")))
            } else {
                Ok(name.to_string())
            }
        };

        if raw == "*" {
            return Ok(Segment::CatchAll(DEFAULT_CATCH_ALL.to_string()));
        }
        if let Some(name) = raw.strip_prefix('*') {
            return named(name).map(Segment::CatchAll);
        }
        if let Some(name) = raw.strip_prefix(':') {
            return named(name).map(Segment::Param);
        }
        if let Some(inner) = raw.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            return match inner.strip_prefix("...") {
                Some(name) => named(name).map(Segment::CatchAll),
                None => named(inner).map(Segment::Param),
            };
        }
        Ok(Segment::Static(raw.to_string()))
    }

    pub fn is_dynamic(&self) -> bool {
        !matches!(self, Segment::Static(_))
    }

    /// Canonical spelling used in stored patterns (`:id`, `*rest`).
    pub fn canonical(&self) -> String {
        match self {
            Segment::Static(s) => s.clone(),
            Segment::Param(name) => format!(":{name}"),
            Segment::CatchAll(name) => format!("*{name}"),
        }
    }
}

/// Parameter name bound by a bare `*` segment.
pub const DEFAULT_CATCH_ALL: &str = "rest";

/// Split a pattern into segments. Empty segments are ignored, so `/a//b/` is `/a/b`.
pub fn parse_pattern(pattern: &str) -> Result<Vec<Segment>> {
    pattern
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|raw| Segment::parse(raw, pattern))
        .collect()
}

/// Rewrite a pattern into its canonical form: `/users/[id]` becomes `/users/:id`.
pub fn canonical_pattern(pattern: &str) -> Result<String> {
    let segments = parse_pattern(pattern)?;
    Ok(join_segments(&segments))
}

pub(crate) fn join_segments(segments: &[Segment]) -> String {
    let mut out = String::from("/");
    out.push_str(
        &segments
            .iter()
            .map(Segment::canonical)
            .collect::<Vec<_>>()
            .join("/"),
    );
    out
}

/// Immutable description of a route, built once when the table is assembled.
///
/// The router hands out shared `Arc<RouteDescriptor>` values; per-request
/// data such as extracted parameters lives in [`crate::RouteMatch`] instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteDescriptor {
    /// Canonical pattern, e.g. `/users/:id` or `/docs/*slug`.
    pub path_pattern: String,
    /// Source file, relative to the project root.
    pub source_file: PathBuf,
    pub kind: RouteKind,
    /// Dynamic segment names in path order.
    pub param_names: Vec<String>,
    pub is_catch_all: bool,
    /// URL the browser fetches the compiled module from.
    pub client_bundle_ref: String,
}

impl RouteDescriptor {
    /// Build a descriptor from a pattern in any accepted spelling.
    pub fn new(pattern: &str, source_file: impl Into<PathBuf>, kind: RouteKind) -> Result<Self> {
        let segments = parse_pattern(pattern)?;
        let source_file = source_file.into();

        let param_names = segments
            .iter()
            .filter_map(|s| match s {
                Segment::Param(n) | Segment::CatchAll(n) => Some(n.clone()),
                Segment::Static(_) => None,
            })
            .collect();
        let is_catch_all = matches!(segments.last(), Some(Segment::CatchAll(_)));

        Ok(Self {
            path_pattern: join_segments(&segments),
            client_bundle_ref: module_url(&source_file),
            source_file,
            kind,
            param_names,
            is_catch_all,
        })
    }

    /// Mark the final dynamic segment as a catch-all.
    ///
    /// `/files/:path` flagged this way behaves like `/files/*path`.
    pub fn flag_catch_all(mut self) -> Self {
        self.is_catch_all = true;
        self
    }

    /// Whether the pattern contains any dynamic segment.
    pub fn is_dynamic(&self) -> bool {
        !self.param_names.is_empty()
    }

    pub fn is_page(&self) -> bool {
        self.kind == RouteKind::Page
    }

    /// Segments of the stored pattern, honouring the catch-all flag.
    pub fn segments(&self) -> Vec<Segment> {
        let mut segments = match parse_pattern(&self.path_pattern) {
            Ok(segments) => segments,
            Err(_) => return Vec::new(),
        };
        if self.is_catch_all {
            if let Some(Segment::Param(name)) = segments.last().cloned() {
                if let Some(last) = segments.last_mut() {
                    *last = Segment::CatchAll(name);
                }
            }
        }
        segments
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_spellings() {
        let p = "/x";
        assert_eq!(Segment::parse("users", p).unwrap(), Segment::Static("users".into()));
        assert_eq!(Segment::parse(":id", p).unwrap(), Segment::Param("id".into()));
        assert_eq!(Segment::parse("[id]", p).unwrap(), Segment::Param("id".into()));
        assert_eq!(
            Segment::parse("[...slug]", p).unwrap(),
            Segment::CatchAll("slug".into())
        );
        assert_eq!(Segment::parse("*", p).unwrap(), Segment::CatchAll("rest".into()));
        assert!(Segment::parse("[]", p).is_err());
        assert!(Segment::parse(":", p).is_err());
    }

    #[test]
    fn test_descriptor_from_file_pattern() {
        let d = RouteDescriptor::new(
            "/users/[userId]/posts/[...path]",
            "pages/users/[userId]/posts/[...path].tsx",
            RouteKind::Page,
        )
        .unwrap();
        assert_eq!(d.path_pattern, "/users/:userId/posts/*path");
        assert_eq!(d.param_names, vec!["userId", "path"]);
        assert!(d.is_catch_all);
        assert_eq!(
            d.client_bundle_ref,
            "/__modules/pages%2Fusers%2F%5BuserId%5D%2Fposts%2F%5B...path%5D.tsx"
        );
    }

    #[test]
    fn test_root_pattern() {
        let d = RouteDescriptor::new("/", "pages/index.tsx", RouteKind::Page).unwrap();
        assert_eq!(d.path_pattern, "/");
        assert!(!d.is_dynamic());
    }

    #[test]
    fn test_flagged_catch_all_segments() {
        let d = RouteDescriptor::new("/files/:path", "pages/files.ts", RouteKind::Api)
            .unwrap()
            .flag_catch_all();
        assert_eq!(
            d.segments(),
            vec![
                Segment::Static("files".into()),
                Segment::CatchAll("path".into())
            ]
        );
    }
}
