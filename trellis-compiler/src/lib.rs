//! Browser module compilation for trellis.
//!
//! [`ModuleCompiler`] turns a page source file into a single ES module the
//! browser can import from `/__modules/...`:
//!
//! - local imports are bundled in dependency order,
//! - compile-time aliases (`@/` and friends) are resolved,
//! - server-only exports (`load`, `metadata`) and the imports only they used
//!   are stripped,
//! - bare packages listed as externals stay as imports.
//!
//! When bundling fails the compiler falls back to resolving aliases only,
//! then to the raw source. Results are cached by canonical path and file
//! modification time in an LRU cache.

pub mod analysis;
pub mod bundler;
pub mod cache;
pub mod compiler;
pub mod config;
pub mod error;
pub mod import_map;
pub mod syntax;
pub mod transform;

pub use analysis::{CLIENT_ONLY_GLOBALS, ClientApiUsage, detect_client_apis};
pub use bundler::{Bundler, ResolvedImport, resolve_file, resolve_import};
pub use cache::{CacheStats, CompiledModuleEntry, ModuleCache};
pub use compiler::{CompileOutput, CompileStrategy, ModuleCompiler};
pub use config::{CompilerConfig, DEFAULT_CACHE_CAPACITY, RESOLVE_EXTENSIONS};
pub use error::{CompileError, Result};
pub use import_map::ImportMap;
pub use transform::{
    IdentityTransform, SERVER_ONLY_EXPORTS, SourceTransform, prune_unused_imports,
    rewrite_specifiers, strip_exports, strip_server_exports,
};
