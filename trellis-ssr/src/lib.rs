//! Server-side rendering for trellis.
//!
//! The pipeline for one page request:
//!
//! 1. [`RenderModeResolver`] decides between `ssr`, `csr` and `hybrid` and
//!    whether the page hydrates.
//! 2. [`LayoutChainLoader`] runs each layout's `load()` from the most
//!    specific layout outwards, stopping on a redirect or `layout = false`.
//! 3. [`PageRenderer`] composes page, layouts and app shell and renders the
//!    tree through a [`RenderAdapter`] to a string or a byte stream.
//! 4. [`inject()`] / [`inject_into_stream`] splice the [`ClientScripts`]
//!    (import map, hydration payload, bootstrap, hot-reload client) into the
//!    document.
//!
//! Modules come from a [`ModuleLoader`]; [`ModuleRegistry`] is the in-memory
//! one. [`HtmlAdapter`] renders the [`VNode`] tree to HTML directly.

pub mod adapter;
pub mod context;
pub mod document;
pub mod inject;
pub mod inject_stream;
pub mod layout;
pub mod metadata;
pub mod module;
pub mod render_mode;
pub mod renderer;
pub mod vnode;

pub use adapter::{DEFAULT_CHUNK_SIZE, HtmlAdapter, HtmlChunks, RenderAdapter, bootstrap};
pub use context::{
    LoadContext, REDIRECT_STATUSES, ResponseState, SessionProvider, Store, detect_lang,
};
pub use document::DocumentShell;
pub use inject::{
    ClientScripts, DATA_ELEMENT_ID, HydrationPayload, hmr_client_script, hydration_data_script,
    import_map_script, inject, serialize_for_html,
};
pub use inject_stream::{DEFAULT_LOOKAHEAD, inject_into_stream, inject_into_stream_with_limit};
pub use layout::{LayoutChain, LayoutChainEntry, LayoutChainLoader};
pub use metadata::Metadata;
pub use module::{
    ApiHandler, AsyncRenderFn, Component, LoaderFn, MetadataExport, MetadataFn, ModuleLoader,
    ModuleRegistry, PageModule, RenderFn,
};
pub use render_mode::{
    DecisionSource, RenderConfig, RenderDecision, RenderMode, RenderModeResolver,
};
pub use renderer::{PageRenderer, RenderInput, RenderOutput};
pub use vnode::{Props, VNode, escape_html, h};
