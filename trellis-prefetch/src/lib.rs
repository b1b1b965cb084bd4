//! Route prefetch batches for trellis.
//!
//! A client asks for several routes at once with include/exclude wildcard
//! patterns; [`PrefetchBatchResolver`] expands them against the page routes
//! and fetches each route's compiled module and loader data through a
//! [`PrefetchSource`], a bounded number at a time.

pub mod config;
pub mod pattern;
pub mod resolver;

pub use config::{DEFAULT_CONCURRENCY, PrefetchConfig};
pub use pattern::{PrefetchPattern, parse_pattern_list};
pub use resolver::{BatchEntry, PrefetchBatchResolver, PrefetchSource};
