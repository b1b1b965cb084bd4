//! File-system route table.
//!
//! Pages live under `<root>/<pages_dir>` and map to URLs by path:
//!
//! - `pages/index.tsx` -> `/`
//! - `pages/about.tsx` -> `/about`
//! - `pages/users/[id].tsx` -> `/users/:id`
//! - `pages/docs/[...slug].tsx` -> `/docs/*slug`
//! - `pages/api/users.ts` -> `/api/users` (API route)
//!
//! Files starting with `_` are not routes. `_layout` wraps every page in its
//! directory and below, `_app` is the app shell, `_404` and `_error` are the
//! custom error pages.

use crate::descriptor::{RouteDescriptor, RouteKind, Segment, canonical_pattern, join_segments};
use crate::error::{Result, RouterError};
use crate::radix::{RadixRouter, RouteMatch};
use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Source extensions picked up by the scan.
pub const PAGE_EXTENSIONS: &[&str] = &["js", "jsx", "ts", "tsx", "mjs"];

const LAYOUT_FILE: &str = "_layout";
const APP_FILE: &str = "_app";
const NOT_FOUND_FILE: &str = "_404";
const ERROR_FILE: &str = "_error";

/// Routes, layouts and special pages for one project.
#[derive(Debug)]
pub struct RouteTable {
    root_dir: PathBuf,
    pages_dir: PathBuf,
    router: RadixRouter,
    /// Canonical directory pattern -> layout source file.
    layouts: HashMap<String, PathBuf>,
    app_shell: Option<PathBuf>,
    not_found_page: Option<PathBuf>,
    error_page: Option<PathBuf>,
}

impl RouteTable {
    /// An empty table; populate it with the `add_*` methods.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            pages_dir: PathBuf::from("pages"),
            router: RadixRouter::new(),
            layouts: HashMap::new(),
            app_shell: None,
            not_found_page: None,
            error_page: None,
        }
    }

    pub fn with_pages_dir(mut self, pages_dir: impl Into<PathBuf>) -> Self {
        self.pages_dir = pages_dir.into();
        self
    }

    /// Scan `<root_dir>/<pages_dir>` and build the table.
    #[instrument(skip_all, fields(root = %root_dir.as_ref().display()))]
    pub fn scan(root_dir: impl AsRef<Path>, pages_dir: impl AsRef<Path>) -> Result<Self> {
        let mut table =
            Self::new(root_dir.as_ref()).with_pages_dir(pages_dir.as_ref().to_path_buf());
        table.populate()?;
        Ok(table)
    }

    /// Scan the pages directory again and replace every entry, including
    /// ones added programmatically. On error the table is left as it was.
    pub fn rescan(&mut self) -> Result<()> {
        *self = Self::scan(&self.root_dir, &self.pages_dir)?;
        Ok(())
    }

    fn populate(&mut self) -> Result<()> {
        let pages_root = self.root_dir.join(&self.pages_dir);
        if !pages_root.is_dir() {
            return Err(RouterError::PagesDirNotFound { path: pages_root });
        }

        let mut files = Vec::new();
        collect_sources(&pages_root, &mut files)?;
        files.sort();

        for file in files {
            let rel_to_pages = match file.strip_prefix(&pages_root) {
                Ok(rel) => rel.to_path_buf(),
                Err(_) => continue,
            };
            let source = self.pages_dir.join(&rel_to_pages);
            if let Err(err) = self.register_file(&rel_to_pages, source) {
                warn!(file = %file.display(), error = %err, "Skipping invalid route file");
            }
        }

        info!(
            routes = self.router.len(),
            layouts = self.layouts.len(),
            "Route table built"
        );
        Ok(())
    }

    fn register_file(&mut self, rel: &Path, source: PathBuf) -> Result<()> {
        let Some(stem) = rel.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
            return Ok(());
        };
        let dirs: Vec<String> = rel
            .parent()
            .map(|p| {
                p.components()
                    .filter_map(|c| match c {
                        Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        let dir_pattern = format!("/{}", dirs.join("/"));

        if stem.starts_with('_') {
            let top_level = dirs.is_empty();
            match stem.as_str() {
                LAYOUT_FILE => self.add_layout(&dir_pattern, source)?,
                APP_FILE if top_level => self.app_shell = Some(source),
                NOT_FOUND_FILE if top_level => self.not_found_page = Some(source),
                ERROR_FILE if top_level => self.error_page = Some(source),
                _ => debug!(file = %source.display(), "Ignoring private file"),
            }
            return Ok(());
        }

        let kind = if dirs.first().map(String::as_str) == Some("api") {
            RouteKind::Api
        } else {
            RouteKind::Page
        };

        let mut pattern = dir_pattern;
        if stem != "index" {
            if !pattern.ends_with('/') {
                pattern.push('/');
            }
            pattern.push_str(&stem);
        }

        let descriptor = RouteDescriptor::new(&pattern, source, kind)?;
        debug!(
            pattern = %descriptor.path_pattern,
            file = %descriptor.source_file.display(),
            kind = ?kind,
            "Discovered route"
        );
        self.router.add(descriptor)
    }

    /// Register a route programmatically.
    pub fn add_route(
        &mut self,
        pattern: &str,
        source_file: impl Into<PathBuf>,
        kind: RouteKind,
    ) -> Result<()> {
        self.router
            .add(RouteDescriptor::new(pattern, source_file, kind)?)
    }

    pub fn add_page(&mut self, pattern: &str, source_file: impl Into<PathBuf>) -> Result<()> {
        self.add_route(pattern, source_file, RouteKind::Page)
    }

    pub fn add_api(&mut self, pattern: &str, source_file: impl Into<PathBuf>) -> Result<()> {
        self.add_route(pattern, source_file, RouteKind::Api)
    }

    /// Register a layout for every route under `dir_pattern`.
    pub fn add_layout(&mut self, dir_pattern: &str, source_file: impl Into<PathBuf>) -> Result<()> {
        let key = canonical_pattern(dir_pattern)?;
        self.layouts.insert(key, source_file.into());
        Ok(())
    }

    pub fn set_app_shell(&mut self, source_file: impl Into<PathBuf>) {
        self.app_shell = Some(source_file.into());
    }

    pub fn set_not_found_page(&mut self, source_file: impl Into<PathBuf>) {
        self.not_found_page = Some(source_file.into());
    }

    pub fn set_error_page(&mut self, source_file: impl Into<PathBuf>) {
        self.error_page = Some(source_file.into());
    }

    /// Match a concrete path.
    pub fn lookup(&self, path: &str) -> Option<RouteMatch> {
        self.router.lookup(path)
    }

    pub fn router(&self) -> &RadixRouter {
        &self.router
    }

    /// All routes, static branches sorted.
    pub fn routes(&self) -> Vec<Arc<RouteDescriptor>> {
        self.router.descriptors()
    }

    /// Page routes only.
    pub fn page_routes(&self) -> Vec<Arc<RouteDescriptor>> {
        self.routes().into_iter().filter(|d| d.is_page()).collect()
    }

    /// Layout files that apply to `route_pattern`, most specific first.
    ///
    /// `/blog/:slug` checks `/blog/:slug`, `/blog` and `/` in that order.
    pub fn layouts_for(&self, route_pattern: &str) -> Vec<PathBuf> {
        let segments: Vec<Segment> = match crate::descriptor::parse_pattern(route_pattern) {
            Ok(segments) => segments,
            Err(err) => {
                warn!(route = route_pattern, error = %err, "Cannot resolve layouts");
                return Vec::new();
            }
        };

        (0..=segments.len())
            .rev()
            .filter_map(|depth| self.layouts.get(&join_segments(&segments[..depth])))
            .cloned()
            .collect()
    }

    pub fn app_shell(&self) -> Option<&Path> {
        self.app_shell.as_deref()
    }

    pub fn not_found_page(&self) -> Option<&Path> {
        self.not_found_page.as_deref()
    }

    pub fn error_page(&self) -> Option<&Path> {
        self.error_page.as_deref()
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn pages_dir(&self) -> &Path {
        &self.pages_dir
    }
}

fn is_source_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| PAGE_EXTENSIONS.contains(&e))
        .unwrap_or(false)
}

/// Directory symlinks are not followed; a link back up the tree would
/// otherwise register the same pages under ever longer prefixes.
fn collect_sources(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') || name == "node_modules" {
            continue;
        }
        let file_type = entry.file_type()?;
        if file_type.is_symlink() && path.is_dir() {
            debug!(path = %path.display(), "Skipping directory symlink");
        } else if file_type.is_dir() {
            collect_sources(&path, out)?;
        } else if is_source_file(&path) && !name.ends_with(".d.ts") {
            out.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layouts_most_specific_first() {
        let mut table = RouteTable::new("/project");
        table.add_layout("/", "pages/_layout.tsx").unwrap();
        table.add_layout("/blog", "pages/blog/_layout.tsx").unwrap();
        table
            .add_layout("/blog/[slug]", "pages/blog/[slug]/_layout.tsx")
            .unwrap();

        assert_eq!(
            table.layouts_for("/blog/:slug/comments"),
            vec![
                PathBuf::from("pages/blog/[slug]/_layout.tsx"),
                PathBuf::from("pages/blog/_layout.tsx"),
                PathBuf::from("pages/_layout.tsx"),
            ]
        );
        assert_eq!(
            table.layouts_for("/"),
            vec![PathBuf::from("pages/_layout.tsx")]
        );
        assert_eq!(
            table.layouts_for("/about"),
            vec![PathBuf::from("pages/_layout.tsx")]
        );
    }

    #[test]
    fn test_page_routes_filter() {
        let mut table = RouteTable::new("/project");
        table.add_page("/", "pages/index.tsx").unwrap();
        table.add_api("/api/users", "pages/api/users.ts").unwrap();
        let pages: Vec<_> = table
            .page_routes()
            .iter()
            .map(|d| d.path_pattern.clone())
            .collect();
        assert_eq!(pages, vec!["/"]);
    }
}
