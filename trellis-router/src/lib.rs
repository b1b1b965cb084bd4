//! Page routing for trellis.
//!
//! [`RadixRouter`] maps URL paths to [`RouteDescriptor`]s with static,
//! parameter (`:id`, `[id]`) and catch-all (`*rest`, `[...rest]`) segments.
//! [`RouteTable`] builds a router from a pages directory and tracks layouts
//! and special pages alongside it.
//!
//! ```
//! use trellis_router::{RadixRouter, RouteDescriptor, RouteKind};
//!
//! let mut router = RadixRouter::new();
//! router
//!     .add(RouteDescriptor::new("/users/[id]", "pages/users/[id].tsx", RouteKind::Page).unwrap())
//!     .unwrap();
//!
//! let found = router.lookup("/users/42").unwrap();
//! assert_eq!(found.descriptor.path_pattern, "/users/:id");
//! assert_eq!(found.params.get("id"), Some("42"));
//! ```

pub mod descriptor;
pub mod error;
pub mod radix;
pub mod table;

pub use descriptor::{
    DEFAULT_CATCH_ALL, RouteDescriptor, RouteKind, Segment, canonical_pattern, parse_pattern,
};
pub use error::{Result, RouterError};
pub use radix::{RadixNode, RadixRouter, RouteMatch, extract_params, split_path};
pub use table::{PAGE_EXTENSIONS, RouteTable};
