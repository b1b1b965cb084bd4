// Trellis - a page-based web framework for Rust
//
// File-system routes on a radix router, on-demand browser module bundling,
// SSR/CSR/hybrid rendering with streaming, and batched route prefetching.

pub mod config;
pub mod error_pages;
pub mod hmr;
mod listen;
mod page;
pub mod server;

pub use config::{PREFETCH_ENDPOINT, ServerConfig};
pub use hmr::{DEFAULT_HMR_ENDPOINT, HmrConfig, HmrEvent, HmrEventKind, HmrManager};
pub use server::{PageServer, PageServerBuilder};

// Re-export the member crates
pub use trellis_compiler as compiler;
pub use trellis_core as core;
pub use trellis_prefetch as prefetch;
pub use trellis_router as router;
pub use trellis_ssr as ssr;

pub use trellis_core::{Error, HttpRequest, HttpResponse, Result};

// Prelude for common imports
pub mod prelude {
    pub use crate::{HmrConfig, PageServer, PageServerBuilder, ServerConfig};
    pub use trellis_compiler::{CompilerConfig, ImportMap, ModuleCompiler};
    pub use trellis_core::logging::LogConfig;
    pub use trellis_core::{
        Error, HttpRequest, HttpResponse, LoggingMiddleware, Middleware, Next,
        RequestIdMiddleware, Result, RouteParams,
    };
    pub use trellis_prefetch::PrefetchConfig;
    pub use trellis_router::{RouteKind, RouteTable};
    pub use trellis_ssr::{
        Component, HtmlAdapter, LoadContext, Metadata, ModuleLoader, ModuleRegistry, PageModule,
        Props, RenderAdapter, RenderConfig, RenderMode, SessionProvider, VNode, h,
    };
}
