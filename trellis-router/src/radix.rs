//! Segment-level radix tree.
//!
//! Each node owns the routes continuing below it, split three ways: static
//! children keyed by literal text, at most one single-segment parameter
//! child, and at most one catch-all child. Matching prefers static over
//! parameter over catch-all at every level and backtracks when a preferred
//! branch dead-ends deeper down, so `/users/active/edit` can still fall back
//! to `/users/:id/edit` if `/users/active` has no `edit` child.

use crate::descriptor::{RouteDescriptor, Segment};
use crate::error::{Result, RouterError};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use trellis_core::RouteParams;

/// A node in the routing tree.
#[derive(Debug, Default)]
pub struct RadixNode {
    /// Raw segment this node was created for (`""` for the root).
    pub segment: String,
    pub static_children: HashMap<String, RadixNode>,
    pub param_child: Option<Box<RadixNode>>,
    pub catch_all_child: Option<Box<RadixNode>>,
    /// Name bound by a parameter or catch-all node.
    pub param_name: Option<String>,
    pub descriptor: Option<Arc<RouteDescriptor>>,
}

impl RadixNode {
    fn child(segment: &str, param_name: Option<&str>) -> Self {
        Self {
            segment: segment.to_string(),
            param_name: param_name.map(str::to_string),
            ..Self::default()
        }
    }

    fn find<'a>(&'a self, segments: &[&str]) -> Option<&'a Arc<RouteDescriptor>> {
        let Some((head, tail)) = segments.split_first() else {
            // Path consumed; an empty catch-all still matches.
            return self.descriptor.as_ref().or_else(|| {
                self.catch_all_child
                    .as_ref()
                    .and_then(|c| c.descriptor.as_ref())
            });
        };

        if let Some(found) = self
            .static_children
            .get(*head)
            .and_then(|child| child.find(tail))
        {
            return Some(found);
        }

        if let Some(found) = self.param_child.as_ref().and_then(|child| child.find(tail)) {
            return Some(found);
        }

        self.catch_all_child
            .as_ref()
            .and_then(|child| child.descriptor.as_ref())
    }

    fn collect<'a>(&'a self, out: &mut Vec<&'a Arc<RouteDescriptor>>) {
        if let Some(d) = &self.descriptor {
            out.push(d);
        }
        let mut keys: Vec<&String> = self.static_children.keys().collect();
        keys.sort();
        for key in keys {
            if let Some(child) = self.static_children.get(key) {
                child.collect(out);
            }
        }
        if let Some(child) = &self.param_child {
            child.collect(out);
        }
        if let Some(child) = &self.catch_all_child {
            child.collect(out);
        }
    }
}

/// A matched route plus the parameters captured from the concrete path.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub descriptor: Arc<RouteDescriptor>,
    pub params: RouteParams,
}

/// Radix router mapping path patterns to route descriptors.
#[derive(Debug, Default)]
pub struct RadixRouter {
    root: RadixNode,
    len: usize,
}

impl RadixRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a descriptor under its own pattern.
    pub fn add(&mut self, descriptor: RouteDescriptor) -> Result<()> {
        let pattern = descriptor.path_pattern.clone();
        self.insert(&pattern, descriptor)
    }

    /// Insert a descriptor under `pattern`.
    ///
    /// A catch-all anywhere but the last segment is rejected and the tree is
    /// left untouched, as is a pattern that differs from the descriptor's
    /// own (parameters are read back through the descriptor). Inserting the
    /// same pattern twice replaces the earlier descriptor.
    pub fn insert(&mut self, pattern: &str, descriptor: RouteDescriptor) -> Result<()> {
        let mut segments = crate::descriptor::parse_pattern(pattern)?;

        if descriptor.is_catch_all {
            if let Some(Segment::Param(name)) = segments.last().cloned() {
                if let Some(last) = segments.last_mut() {
                    *last = Segment::CatchAll(name);
                }
            }
        }

        let last = segments.len().saturating_sub(1);
        if let Some((_, Segment::CatchAll(name))) = segments
            .iter()
            .enumerate()
            .find(|(i, s)| matches!(s, Segment::CatchAll(_)) && *i != last)
        {
            return Err(RouterError::NonTerminalCatchAll {
                pattern: pattern.to_string(),
                segment: format!("*{name}"),
            });
        }
        if segments != descriptor.segments() {
            return Err(RouterError::PatternMismatch {
                pattern: pattern.to_string(),
                descriptor: descriptor.path_pattern.clone(),
            });
        }

        let mut node = &mut self.root;
        for segment in &segments {
            node = match segment {
                Segment::Static(text) => node
                    .static_children
                    .entry(text.clone())
                    .or_insert_with(|| RadixNode::child(text, None)),
                Segment::Param(name) => {
                    let child = node
                        .param_child
                        .get_or_insert_with(|| Box::new(RadixNode::child(":", Some(name))));
                    if child.param_name.as_deref() != Some(name.as_str()) {
                        debug!(
                            pattern,
                            existing = ?child.param_name,
                            name = %name,
                            "Parameter name differs from sibling route"
                        );
                    }
                    child.as_mut()
                }
                Segment::CatchAll(name) => node
                    .catch_all_child
                    .get_or_insert_with(|| Box::new(RadixNode::child("*", Some(name))))
                    .as_mut(),
            };
        }

        if let Some(previous) = node.descriptor.replace(Arc::new(descriptor)) {
            warn!(
                pattern,
                previous = %previous.source_file.display(),
                "Duplicate route pattern, replacing earlier route"
            );
        } else {
            self.len += 1;
        }
        Ok(())
    }

    /// Find the descriptor for a concrete path.
    pub fn match_path(&self, path: &str) -> Option<Arc<RouteDescriptor>> {
        let segments = split_path(path);
        self.root.find(&segments).cloned()
    }

    /// Match a path and capture its parameters.
    pub fn lookup(&self, path: &str) -> Option<RouteMatch> {
        let descriptor = self.match_path(path)?;
        let params = extract_params(&descriptor, path);
        Some(RouteMatch { descriptor, params })
    }

    /// Every stored descriptor, static branches in sorted order.
    pub fn descriptors(&self) -> Vec<Arc<RouteDescriptor>> {
        let mut out = Vec::with_capacity(self.len);
        self.root.collect(&mut out);
        out.into_iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Path segments, ignoring empty ones and any query string.
pub fn split_path(path: &str) -> Vec<&str> {
    let path = path.split(['?', '#']).next().unwrap_or("");
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Extract parameters of `descriptor`'s pattern from a concrete path.
///
/// Values are percent-decoded. A catch-all receives the remaining segments
/// joined with `/`, or an empty string when nothing remains.
pub fn extract_params(descriptor: &RouteDescriptor, path: &str) -> RouteParams {
    let path_segments = split_path(path);
    let mut params = RouteParams::new();

    for (i, segment) in descriptor.segments().iter().enumerate() {
        match segment {
            Segment::Static(_) => {}
            Segment::Param(name) => {
                if let Some(value) = path_segments.get(i) {
                    params.push(name.clone(), decode(value));
                }
            }
            Segment::CatchAll(name) => {
                let rest = path_segments.get(i..).unwrap_or(&[]);
                let value = rest.iter().map(|s| decode(s)).collect::<Vec<_>>().join("/");
                params.push(name.clone(), value);
                break;
            }
        }
    }
    params
}

fn decode(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}
