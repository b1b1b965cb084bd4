//! Prefetch route patterns.
//!
//! | pattern        | matches                                                    |
//! |----------------|------------------------------------------------------------|
//! | `*`            | every page route                                           |
//! | `/*`, `/*/*`   | routes at most as deep as the number of wildcards          |
//! | `/docs/*`      | routes strictly below `/docs`, at any depth                |
//! | `/docs/*/intro`| `*` stands for exactly one segment; depth must be equal    |
//! | `/users/[id]`  | dynamic segments match any dynamic route segment           |
//! | `!<pattern>`   | excluded from the inclusions                               |

use trellis_router::{RouteDescriptor, Segment};

#[derive(Debug, Clone, PartialEq, Eq)]
enum PatternSegment {
    Literal(String),
    Dynamic,
    Wildcard,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Shape {
    All,
    /// Only wildcards: depth `<= n`.
    Depth(usize),
    Segments(Vec<PatternSegment>),
}

/// One parsed include or exclude pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefetchPattern {
    pub is_exclude: bool,
    pub raw_pattern: String,
    shape: Shape,
}

impl PrefetchPattern {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        let (is_exclude, body) = match trimmed.strip_prefix('!') {
            Some(rest) => (true, rest.trim()),
            None => (false, trimmed),
        };

        let shape = if body == "*" {
            Shape::All
        } else {
            let segments: Vec<PatternSegment> = body
                .split('/')
                .filter(|s| !s.is_empty())
                .map(|s| match s {
                    "*" => PatternSegment::Wildcard,
                    s if s.starts_with(':') || (s.starts_with('[') && s.ends_with(']')) => {
                        PatternSegment::Dynamic
                    }
                    s => PatternSegment::Literal(s.to_string()),
                })
                .collect();
            if !segments.is_empty() && segments.iter().all(|s| *s == PatternSegment::Wildcard) {
                Shape::Depth(segments.len())
            } else {
                Shape::Segments(segments)
            }
        };

        Self {
            is_exclude,
            raw_pattern: raw.to_string(),
            shape,
        }
    }

    pub fn matches(&self, route: &RouteDescriptor) -> bool {
        self.matches_segments(&route.segments())
    }

    pub fn matches_segments(&self, route: &[Segment]) -> bool {
        match &self.shape {
            Shape::All => true,
            Shape::Depth(n) => route.len() <= *n,
            Shape::Segments(pattern) => {
                let trailing = pattern.last() == Some(&PatternSegment::Wildcard);
                let depth_ok = if trailing {
                    route.len() >= pattern.len()
                } else {
                    route.len() == pattern.len()
                };
                depth_ok
                    && pattern
                        .iter()
                        .zip(route)
                        .all(|(p, r)| segment_matches(p, r))
            }
        }
    }
}

fn segment_matches(pattern: &PatternSegment, route: &Segment) -> bool {
    match (pattern, route) {
        (PatternSegment::Wildcard, _) => true,
        (PatternSegment::Dynamic, segment) => segment.is_dynamic(),
        (PatternSegment::Literal(lit), Segment::Static(s)) => lit == s,
        (PatternSegment::Literal(_), _) => false,
    }
}

/// Split a comma-separated pattern list, dropping blanks.
pub fn parse_pattern_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
