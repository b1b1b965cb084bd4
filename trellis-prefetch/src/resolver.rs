//! Pattern expansion and batched fetching.

use crate::config::PrefetchConfig;
use crate::pattern::PrefetchPattern;
use async_trait::async_trait;
use futures_util::future::join_all;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use trellis_core::{HttpRequest, Result};
use trellis_router::{RouteDescriptor, RouteTable};

/// Payload for one prefetched route.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchEntry {
    pub route: String,
    /// Compiled page module.
    pub body: String,
    pub page_data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layouts: Option<Vec<Value>>,
}

/// Produces the payload for a single route.
#[async_trait]
pub trait PrefetchSource: Send + Sync {
    /// `origin` is the request that asked for the batch; its cookies and
    /// headers apply to the synthetic page load.
    async fn fetch_entry(&self, route: &RouteDescriptor, origin: &HttpRequest) -> Result<BatchEntry>;
}

/// Expands prefetch patterns and fetches the matching routes.
#[derive(Debug, Clone, Default)]
pub struct PrefetchBatchResolver {
    config: PrefetchConfig,
}

impl PrefetchBatchResolver {
    pub fn new(config: PrefetchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PrefetchConfig {
        &self.config
    }

    /// Routes matching the union of the inclusions, minus the exclusions,
    /// ordered by route path.
    pub fn resolve<S: AsRef<str>>(
        &self,
        patterns: &[S],
        routes: &[Arc<RouteDescriptor>],
    ) -> Vec<Arc<RouteDescriptor>> {
        let parsed: Vec<PrefetchPattern> = patterns
            .iter()
            .map(|p| PrefetchPattern::parse(p.as_ref()))
            .collect();
        let (excludes, includes): (Vec<_>, Vec<_>) = parsed.iter().partition(|p| p.is_exclude);

        let mut matched = BTreeMap::new();
        for route in routes {
            if includes.iter().any(|p| p.matches(route)) {
                matched.insert(route.path_pattern.clone(), route.clone());
            }
        }
        matched.retain(|_, route| !excludes.iter().any(|p| p.matches(route)));

        debug!(patterns = parsed.len(), matched = matched.len(), "Prefetch patterns resolved");
        matched.into_values().collect()
    }

    /// Resolve against the page routes of a table, using `patterns` when
    /// given and the configured patterns otherwise.
    pub fn resolve_table(&self, table: &RouteTable, patterns: Option<&[String]>) -> Vec<Arc<RouteDescriptor>> {
        let patterns = patterns.unwrap_or(&self.config.patterns);
        self.resolve(patterns, &table.page_routes())
    }

    /// Route paths of [`resolve`](Self::resolve).
    pub fn resolve_paths<S: AsRef<str>>(&self, patterns: &[S], routes: &[Arc<RouteDescriptor>]) -> Vec<String> {
        self.resolve(patterns, routes)
            .into_iter()
            .map(|r| r.path_pattern.clone())
            .collect()
    }

    /// Fetch every route, `concurrency` at a time. A failing route is
    /// logged and left out; it never fails the batch.
    #[instrument(skip_all, fields(routes = routes.len(), concurrency = self.config.concurrency))]
    pub async fn batch_fetch(
        &self,
        source: &dyn PrefetchSource,
        routes: &[Arc<RouteDescriptor>],
        origin: &HttpRequest,
    ) -> Vec<BatchEntry> {
        let mut entries = Vec::with_capacity(routes.len());
        for chunk in routes.chunks(self.config.concurrency.max(1)) {
            let results = join_all(chunk.iter().map(|route| source.fetch_entry(route, origin))).await;
            for (route, result) in chunk.iter().zip(results) {
                match result {
                    Ok(entry) => entries.push(entry),
                    Err(e) => warn!(route = %route.path_pattern, error = %e, "Prefetch entry failed"),
                }
            }
        }
        entries
    }
}
